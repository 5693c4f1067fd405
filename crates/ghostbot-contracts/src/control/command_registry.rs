#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "start",
        action: "start",
    },
    CommandSpec {
        command: "stop",
        action: "stop",
    },
    CommandSpec {
        command: "reload",
        action: "reload",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "clear_ignored",
        action: "clear_ignored",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub(crate) const TOGGLE_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "transparent",
        action: "set_transparent",
    },
    CommandSpec {
        command: "free_colors",
        action: "set_free_colors",
    },
];

pub(crate) const IGNORE_COMMAND: CommandSpec = CommandSpec {
    command: "ignore",
    action: "ignore",
};

pub(crate) const IMAGE_COMMAND: CommandSpec = CommandSpec {
    command: "image",
    action: "set_image",
};

pub const CONSOLE_HELP_COMMANDS: &[&str] = &[
    "/start",
    "/stop",
    "/reload",
    "/status",
    "/ignore <colors>",
    "/clear_ignored",
    "/transparent on|off",
    "/free_colors on|off",
    "/image <path> <x> <y>",
    "/help",
    "/quit",
];
