use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use ghostbot_contracts::color::{parse_color_list, Color};
use ghostbot_contracts::config::{BotConfig, ImageConfig};
use ghostbot_contracts::control::{parse_command, OperatorCommand, CONSOLE_HELP_COMMANDS};
use ghostbot_contracts::events::{now_utc_iso, EventWriter};
use ghostbot_contracts::grid::{GridCoordinate, PixelSample};
use ghostbot_contracts::summary::{write_summary, SessionSummary};
use ghostbot_engine::api::{EnergySource, PaletteSource, Relogin};
use ghostbot_engine::http::{GeoPixelsClient, NoRelogin, SessionFileRelogin};
use ghostbot_engine::local::{FileImageSource, LocalEnergyMeter, StaticPalette};
use ghostbot_engine::{
    BotState, BotStatus, Collaborators, EngineSettings, FilterPolicy, GhostBot, LoopExit, Session,
    StartOutcome,
};
use serde_json::{json, Map};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "ghostbot",
    version,
    about = "Paints a ghost image onto a GeoPixels canvas"
)]
struct Cli {
    /// Debug-level logs regardless of RUST_LOG.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Place pixels until the canvas matches the image, then exit.
    Run(RunArgs),
    /// Sync once and list what would be placed.
    Plan(PlanArgs),
    /// Interactive operator console.
    Console(ConsoleArgs),
}

#[derive(Debug, Clone, Default, Parser)]
struct BotArgs {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long, allow_negative_numbers = true)]
    x: Option<i64>,
    #[arg(long, allow_negative_numbers = true)]
    y: Option<i64>,
    #[arg(long)]
    base_url: Option<String>,
    #[arg(long)]
    token: Option<String>,
    #[arg(long)]
    session_file: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
    /// Comma-separated colors to skip, e.g. "#ff0000,#ffca3a".
    #[arg(long)]
    ignore: Option<String>,
    #[arg(long)]
    transparent: bool,
    #[arg(long)]
    no_free_colors: bool,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[command(flatten)]
    bot: BotArgs,
    #[arg(long)]
    summary: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct PlanArgs {
    #[command(flatten)]
    bot: BotArgs,
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

#[derive(Debug, Parser)]
struct ConsoleArgs {
    #[command(flatten)]
    bot: BotArgs,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("ghostbot error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;
    match cli.command {
        Command::Run(args) => run_headless(args),
        Command::Plan(args) => run_plan(args),
        Command::Console(args) => {
            run_console(args)?;
            Ok(0)
        }
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("tracing init failed: {err}"))
}

fn load_config(args: &BotArgs) -> Result<BotConfig> {
    let mut config = BotConfig::load(args.config.as_deref())?;
    apply_overrides(&mut config, args)?;
    config.validate()?;
    Ok(config)
}

fn apply_overrides(config: &mut BotConfig, args: &BotArgs) -> Result<()> {
    if let Some(base_url) = args.base_url.as_ref() {
        config.server.base_url = base_url.trim_end_matches('/').to_string();
    }
    if let Some(token) = args.token.as_ref() {
        config.session.token = token.clone();
    }
    if let Some(path) = args.session_file.as_ref() {
        config.session.session_file = Some(path.clone());
    }
    if args.transparent {
        config.filters.include_transparent = true;
    }
    if args.no_free_colors {
        config.filters.include_free_colors = false;
    }
    if let Some(list) = args.ignore.as_deref() {
        let (_, rejected) = parse_color_list(list);
        if !rejected.is_empty() {
            bail!("invalid --ignore colors: {}", rejected.join(", "));
        }
        config.filters.ignored = list
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(str::to_string)
            .collect();
    }

    let previous = config.image.clone();
    match (args.image.as_ref(), previous) {
        (Some(path), previous) => {
            config.image = Some(ImageConfig {
                path: path.clone(),
                x: args.x.or(previous.as_ref().map(|image| image.x)).unwrap_or(0),
                y: args.y.or(previous.as_ref().map(|image| image.y)).unwrap_or(0),
            });
        }
        (None, Some(mut image)) => {
            image.x = args.x.unwrap_or(image.x);
            image.y = args.y.unwrap_or(image.y);
            config.image = Some(image);
        }
        (None, None) => {
            if args.x.is_some() || args.y.is_some() {
                bail!("--x/--y need an image (--image or image.path in the config)");
            }
        }
    }
    Ok(())
}

fn event_writer(args: &BotArgs) -> EventWriter {
    let session_id = uuid::Uuid::new_v4().to_string();
    match args.events.as_ref() {
        Some(path) => EventWriter::new(path, session_id),
        None => EventWriter::disabled(session_id),
    }
}

fn build_bot(config: &BotConfig, events: EventWriter) -> Result<GhostBot> {
    let client = Arc::new(
        GeoPixelsClient::new(&config.server.base_url).context("failed building http client")?,
    );
    let relogin: Arc<dyn Relogin> = match config.session.session_file.as_ref() {
        Some(path) => Arc::new(SessionFileRelogin::new(path)),
        None => Arc::new(NoRelogin),
    };
    let energy: Arc<dyn EnergySource> = Arc::new(LocalEnergyMeter::new(
        config.energy.current,
        config.energy.max,
        config.energy.seconds_per_pixel,
    ));
    let palette: Arc<dyn PaletteSource> = Arc::new(StaticPalette(config.palette_colors()?));

    let mut session = Session {
        token: config.session.token.clone(),
        subject: config.session.subject.clone(),
        user_id: config.session.user_id,
    };
    if !session.is_active() {
        match relogin.relogin() {
            Ok(Some(fresh)) => session = fresh,
            Ok(None) => warn!("no session token configured; placements will be rejected"),
            Err(err) => warn!("initial login failed: {err}"),
        }
    }

    let collaborators = Collaborators {
        tiles: client.clone(),
        placement: client,
        relogin,
        energy,
        palette,
    };
    let settings = EngineSettings {
        tile_size: config.server.tile_size,
        tiles_per_request: config.server.tiles_per_request,
        energy_reserve: config.energy.reserve,
        ..EngineSettings::default()
    };
    let bot = GhostBot::new(collaborators, settings, session, events);
    bot.configure(FilterPolicy {
        include_transparent: config.filters.include_transparent,
        include_free_colors: config.filters.include_free_colors,
    });
    bot.ignore_colors(config.ignored_ids()?);
    if let Some(image) = config.image.as_ref() {
        bot.set_image_source(Arc::new(FileImageSource::new(
            &image.path,
            GridCoordinate::new(image.x, image.y),
        )));
    }
    Ok(bot)
}

fn run_headless(args: RunArgs) -> Result<i32> {
    let config = load_config(&args.bot)?;
    let events = event_writer(&args.bot);
    let session_id = events.session_id().to_string();
    let summary_path = args.summary.clone().or_else(|| {
        events
            .path()
            .and_then(|path| path.parent())
            .map(|dir| dir.join("summary.json"))
    });
    let mut bot = build_bot(&config, events.clone())?;

    let started = Utc::now();
    let started_at = now_utc_iso();
    let exit = if !bot.reload() {
        LoopExit::ImageNotLoaded
    } else {
        match bot.start() {
            StartOutcome::Started => match bot.wait() {
                Some(exit) => exit,
                None => bail!("placement loop ended abnormally"),
            },
            StartOutcome::AlreadyRunning => bail!("placement loop already running"),
            StartOutcome::ImageNotLoaded(_) => LoopExit::ImageNotLoaded,
            StartOutcome::Failed(reason) => bail!("ghost bot could not start: {reason}"),
        }
    };

    let status = bot.status();
    info!(
        reason = exit.as_str(),
        placed = status.stats.pixels_submitted,
        "run finished"
    );
    if let Some(path) = summary_path.as_ref() {
        let summary = SessionSummary {
            session_id,
            started_at,
            finished_at: now_utc_iso(),
            exit_reason: exit.as_str().to_string(),
            iterations: status.stats.iterations,
            batches_submitted: status.stats.batches_submitted,
            pixels_submitted: status.stats.pixels_submitted,
            target_pixels: status.target_pixels as u64,
            outstanding_pixels: status.stats.last_outstanding,
        };
        let mut extra = Map::new();
        extra.insert(
            "duration_s".to_string(),
            json!((Utc::now() - started).num_seconds()),
        );
        extra.insert("events_logged".to_string(), json!(events.written()));
        write_summary(path, &summary, Some(&extra))?;
    }
    println!("Exit: {}", exit.as_str());
    Ok(exit_code(exit))
}

fn exit_code(exit: LoopExit) -> i32 {
    match exit {
        LoopExit::Completed => 0,
        LoopExit::Cancelled => 130,
        LoopExit::AuthLost | LoopExit::NetworkError | LoopExit::ImageNotLoaded => 2,
    }
}

fn run_plan(args: PlanArgs) -> Result<i32> {
    let config = load_config(&args.bot)?;
    let bot = build_bot(&config, event_writer(&args.bot))?;
    let pixels = bot.preview()?;
    let status = bot.status();
    println!(
        "{} of {} target pixels outstanding",
        pixels.len(),
        status.target_pixels
    );
    let groups = group_by_color(&pixels);
    for (color, count) in groups.iter().take(args.limit) {
        println!("  {}  {count}", color.hex());
    }
    if groups.len() > args.limit {
        println!("  ... {} more colors", groups.len() - args.limit);
    }
    Ok(0)
}

/// Per-color counts in first-seen order.
fn group_by_color(pixels: &[PixelSample]) -> Vec<(Color, usize)> {
    let mut groups: Vec<(Color, usize)> = Vec::new();
    for pixel in pixels {
        match groups
            .iter_mut()
            .find(|(color, _)| color.id() == pixel.color.id())
        {
            Some((_, count)) => *count += 1,
            None => groups.push((pixel.color, 1)),
        }
    }
    groups
}

fn run_console(args: ConsoleArgs) -> Result<()> {
    let config = load_config(&args.bot)?;
    let mut bot = build_bot(&config, event_writer(&args.bot))?;

    let stdin = io::stdin();
    let mut line = String::new();
    println!("GhostPixel Bot loaded. Type /help for commands.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        match parse_command(line.trim_end_matches(['\n', '\r'])) {
            OperatorCommand::Noop => continue,
            OperatorCommand::Help => {
                println!("Commands: {}", CONSOLE_HELP_COMMANDS.join(" "));
            }
            OperatorCommand::Start => match bot.start() {
                StartOutcome::Started => println!("Ghost bot started"),
                StartOutcome::AlreadyRunning => println!("Ghost bot is already running"),
                StartOutcome::ImageNotLoaded(reason) => {
                    println!("Ghost image not loaded ({reason})")
                }
                StartOutcome::Failed(reason) => println!("Start failed: {reason}"),
            },
            OperatorCommand::Stop => {
                bot.stop();
                match bot.wait() {
                    Some(exit) => println!("Ghost bot stopped ({})", exit.as_str()),
                    None => println!("Ghost bot is not running"),
                }
            }
            OperatorCommand::Reload => {
                if bot.reload() {
                    println!("Reloaded: {} target pixels", bot.status().target_pixels);
                } else {
                    println!("Reload failed, see log");
                }
            }
            OperatorCommand::Status => print_status(&bot.status()),
            OperatorCommand::Ignore { ids, rejected } => {
                for token in &rejected {
                    println!("Skipping invalid color: {token}");
                }
                bot.ignore_colors(ids.iter().copied());
                println!("Ignored colors: {} (reload to apply)", format_ids(&ids));
            }
            OperatorCommand::ClearIgnored => {
                bot.ignore_colors(Vec::new());
                println!("Ignored colors cleared (reload to apply)");
            }
            OperatorCommand::SetTransparent(on) => {
                let mut policy = bot.status().policy;
                policy.include_transparent = on;
                bot.configure(policy);
                println!("Transparent pixels: {} (reload to apply)", on_off(on));
            }
            OperatorCommand::SetFreeColors(on) => {
                let mut policy = bot.status().policy;
                policy.include_free_colors = on;
                bot.configure(policy);
                println!("Free colors: {} (reload to apply)", on_off(on));
            }
            OperatorCommand::SetImage { path, x, y } => {
                if !path.exists() {
                    println!("Image not found: {}", path.display());
                    continue;
                }
                bot.set_image_source(Arc::new(FileImageSource::new(
                    path,
                    GridCoordinate::new(x, y),
                )));
                println!("Image set (reload to apply)");
            }
            OperatorCommand::Invalid { command, message } => println!("/{command}: {message}"),
            OperatorCommand::Unknown { command, .. } => {
                println!("Unknown command: /{command}. Type /help for commands.")
            }
            OperatorCommand::Quit => break,
        }
    }

    bot.stop();
    let _ = bot.wait();
    Ok(())
}

fn print_status(status: &BotStatus) {
    let state = match status.state {
        BotState::Idle => "idle",
        BotState::Running => "running",
    };
    println!(
        "State: {state}  image: {}",
        status.image.as_deref().unwrap_or("none")
    );
    println!(
        "Target: {}  cached: {}  outstanding: {}  cursor: {}",
        status.target_pixels, status.cached_pixels, status.stats.last_outstanding, status.cursor
    );
    println!(
        "Transparent: {}  free colors: {}  ignored: {}",
        on_off(status.policy.include_transparent),
        on_off(status.policy.include_free_colors),
        format_ids(&status.ignored)
    );
    println!(
        "Placed: {} pixels in {} batches  session: {}",
        status.stats.pixels_submitted,
        status.stats.batches_submitted,
        if status.session_active {
            "active"
        } else {
            "logged out"
        }
    );
    if let Some(exit) = status.last_exit {
        println!("Last exit: {}", exit.as_str());
    }
}

fn format_ids(ids: &[i32]) -> String {
    if ids.is_empty() {
        return "none".to_string();
    }
    ids.iter()
        .map(|id| Color::from_id(*id).hex())
        .collect::<Vec<_>>()
        .join(", ")
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}
