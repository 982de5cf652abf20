//! dartsense CLI: replay recorded camera frames, score board points and
//! inspect rig configuration.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{Args, Parser, Subcommand};
use dartsense::{
    init_with_level, Coordinator, CycleOutcome, FrameSource, ImageSequenceSource, PixelReading,
    RigConfig, ShutdownToken, TriangulationEngine,
};
use log::{info, LevelFilter};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "dartsense")]
#[command(about = "Multi-camera dart detection, triangulation and scoring")]
#[command(version)]
struct Cli {
    /// Log level (off, error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit JSON tracing output instead of the plain logger.
    #[cfg(feature = "tracing")]
    #[arg(long, global = true)]
    tracing_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay per-camera frame directories through the detection loop.
    Run(CliRunArgs),

    /// Score a board point given in millimetres from the bullseye.
    Score {
        /// Horizontal offset, mm (positive right).
        #[arg(allow_negative_numbers = true)]
        x: f64,
        /// Vertical offset, mm (positive up).
        #[arg(allow_negative_numbers = true)]
        y: f64,
    },

    /// Triangulate one set of per-camera tip pixels.
    Locate {
        /// Rig configuration (file or directory); defaults when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// One tip x coordinate per camera, in camera order; `-` or `N` for none.
        #[arg(required = true, allow_hyphen_values = true)]
        readings: Vec<String>,
    },

    /// Print the effective rig configuration as JSON.
    ShowConfig {
        /// Rig configuration (file or directory); defaults when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Args)]
struct CliRunArgs {
    /// Rig configuration (file or directory); defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding one `cam<id>/` image sequence per camera.
    #[arg(long)]
    frames: PathBuf,

    /// Stop after this many throws.
    #[arg(long)]
    max_throws: Option<u64>,

    /// Print throws as JSON lines.
    #[arg(long)]
    json: bool,

    /// Disable all waits (recorded frames carry no timing).
    #[arg(long)]
    fast: bool,
}

fn load_config(path: Option<&Path>) -> RigConfig {
    match path {
        Some(p) if p.is_dir() => RigConfig::load_dir(p),
        Some(p) => RigConfig::load(p),
        None => RigConfig::default(),
    }
}

fn init_logging(cli: &Cli) -> CliResult<()> {
    #[cfg(feature = "tracing")]
    if cli.tracing_json {
        dartsense::init_tracing(true);
        return Ok(());
    }
    let level = LevelFilter::from_str(&cli.log_level).unwrap_or(LevelFilter::Info);
    init_with_level(level)?;
    Ok(())
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    match cli.command {
        Commands::Run(args) => run_replay(&args),
        Commands::Score { x, y } => run_score(x, y),
        Commands::Locate { config, readings } => run_locate(config.as_deref(), &readings),
        Commands::ShowConfig { config } => run_show_config(config.as_deref()),
    }
}

// ── run ───────────────────────────────────────────────────────────────

fn run_replay(args: &CliRunArgs) -> CliResult<()> {
    let mut config = load_config(args.config.as_deref());
    if args.fast {
        config.detection = config.detection.with_zero_delays();
    }

    let mut sources: Vec<Box<dyn FrameSource>> = Vec::with_capacity(config.cameras.len());
    for profile in config.cameras.iter() {
        let dir = args.frames.join(format!("cam{}", profile.camera_id));
        sources.push(Box::new(ImageSequenceSource::open(profile.camera_id, dir)?));
    }

    let mut coordinator = Coordinator::new(&config, sources)?;
    coordinator.prime()?;
    let token = ShutdownToken::new();
    if !coordinator.stabilize(&token) {
        return Ok(());
    }

    let mut throws = 0u64;
    loop {
        match coordinator.poll_cycle(&token) {
            CycleOutcome::Resolved(throw) => {
                throws += 1;
                if args.json {
                    println!("{}", serde_json::to_string(&throw)?);
                } else {
                    println!("{throw}");
                }
                if args.max_throws.is_some_and(|max| throws >= max) {
                    break;
                }
            }
            CycleOutcome::Takeout { trigger_camera } if !args.json => {
                println!("takeout (camera {trigger_camera})");
            }
            CycleOutcome::Exhausted | CycleOutcome::Cancelled => break,
            _ => {}
        }
    }
    info!("replay finished: {throws} throw(s)");
    Ok(())
}

// ── score ─────────────────────────────────────────────────────────────

fn run_score(x: f64, y: f64) -> CliResult<()> {
    let board = dartsense::BoardGeometry::default();
    let score = board.score_xy(x, y);
    println!("{score} ({} pts)", score.total());
    Ok(())
}

// ── locate ────────────────────────────────────────────────────────────

fn parse_reading(raw: &str, surface_y: f64) -> CliResult<Option<PixelReading>> {
    if raw == "-" || raw.eq_ignore_ascii_case("n") {
        return Ok(None);
    }
    let x: f64 = raw
        .parse()
        .map_err(|_| format!("invalid pixel reading '{raw}' (expected a number, '-' or 'N')"))?;
    Ok(Some(PixelReading::new(x, surface_y)))
}

fn run_locate(config: Option<&Path>, raw: &[String]) -> CliResult<()> {
    let config = load_config(config);
    if raw.len() != config.cameras.len() {
        return Err(format!(
            "expected {} readings (one per camera), got {}",
            config.cameras.len(),
            raw.len()
        )
        .into());
    }

    let readings = raw
        .iter()
        .zip(config.cameras.iter())
        .map(|(r, profile)| parse_reading(r, profile.surface_line_y as f64))
        .collect::<CliResult<Vec<_>>>()?;

    let engine =
        TriangulationEngine::new(config.board, config.triangulation.clone(), &config.cameras);
    match engine.locate(&readings) {
        Some(impact) => {
            let score = config.board.score(impact.position);
            println!(
                "({:.1}, {:.1}) mm  r={:.1} theta={:.1}  {score} ({} pts)",
                impact.position.x,
                impact.position.y,
                impact.r,
                impact.theta_deg,
                score.total()
            );
        }
        None => println!("no detection"),
    }
    Ok(())
}

// ── show-config ───────────────────────────────────────────────────────

fn run_show_config(config: Option<&Path>) -> CliResult<()> {
    let config = load_config(config);
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
