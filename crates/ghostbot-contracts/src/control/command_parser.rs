use std::path::PathBuf;

use super::command_registry::{
    CommandSpec, IGNORE_COMMAND, IMAGE_COMMAND, NO_ARG_COMMANDS, TOGGLE_COMMANDS,
};
use crate::color::{parse_color_list, ColorId};

/// One line typed at the operator console.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    Noop,
    Start,
    Stop,
    Reload,
    Status,
    Help,
    Quit,
    /// Replaces the ignored set. `rejected` holds tokens that were not colors.
    Ignore {
        ids: Vec<ColorId>,
        rejected: Vec<String>,
    },
    ClearIgnored,
    SetTransparent(bool),
    SetFreeColors(bool),
    SetImage {
        path: PathBuf,
        x: i64,
        y: i64,
    },
    Invalid {
        command: String,
        message: String,
    },
    Unknown {
        command: String,
        arg: String,
    },
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_toggle(arg: &str) -> Option<bool> {
    match arg.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Some(true),
        "off" | "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

fn split_args(arg: &str) -> Vec<String> {
    match shell_words::split(arg) {
        Ok(parts) => parts.into_iter().filter(|part| !part.is_empty()).collect(),
        Err(_) => arg.split_whitespace().map(str::to_string).collect(),
    }
}

fn parse_image_args(command: &str, arg: &str) -> OperatorCommand {
    let parts = split_args(arg);
    let invalid = |message: &str| OperatorCommand::Invalid {
        command: command.to_string(),
        message: message.to_string(),
    };
    let [path, x, y] = parts.as_slice() else {
        return invalid("expected <path> <x> <y>");
    };
    match (x.parse::<i64>(), y.parse::<i64>()) {
        (Ok(x), Ok(y)) => OperatorCommand::SetImage {
            path: PathBuf::from(path),
            x,
            y,
        },
        _ => invalid("grid coordinates must be integers"),
    }
}

/// Parses a console line. The leading `/` is optional.
pub fn parse_command(text: &str) -> OperatorCommand {
    let trimmed = text.trim();
    let body = trimmed.strip_prefix('/').unwrap_or(trimmed);
    if body.is_empty() {
        return OperatorCommand::Noop;
    }

    let command_len = body
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    let command = body[..command_len].to_ascii_lowercase();
    let arg = body[command_len..].trim();

    if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
        return match action {
            "start" => OperatorCommand::Start,
            "stop" => OperatorCommand::Stop,
            "reload" => OperatorCommand::Reload,
            "status" => OperatorCommand::Status,
            "clear_ignored" => OperatorCommand::ClearIgnored,
            "quit" => OperatorCommand::Quit,
            _ => OperatorCommand::Help,
        };
    }

    if let Some(action) = find_action(&command, TOGGLE_COMMANDS) {
        let Some(enabled) = parse_toggle(arg) else {
            return OperatorCommand::Invalid {
                command,
                message: "expected on or off".to_string(),
            };
        };
        return if action == "set_transparent" {
            OperatorCommand::SetTransparent(enabled)
        } else {
            OperatorCommand::SetFreeColors(enabled)
        };
    }

    if command == IGNORE_COMMAND.command {
        let (ids, rejected) = parse_color_list(arg);
        return OperatorCommand::Ignore { ids, rejected };
    }

    if command == IMAGE_COMMAND.command {
        return parse_image_args(&command, arg);
    }

    OperatorCommand::Unknown {
        command,
        arg: arg.to_string(),
    }
}
