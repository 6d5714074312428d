use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use compositor::MemoryGraph;
use project::{listing_range, render_exposure, Config, Session, SessionCommand};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "xsheet-cli")]
#[command(about = "Headless exposure sheet: navigate, onion-skin and persist cel archives")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an empty archive
    New {
        /// Archive path
        output: PathBuf,

        /// Layer count (overrides the config)
        #[arg(long)]
        layers: Option<usize>,

        /// Sheet length in frames (overrides the config)
        #[arg(long)]
        frames: Option<i64>,
    },

    /// Print the exposure grid of an archive
    Info {
        /// Archive path
        archive: PathBuf,

        /// Also dump the compositing graph
        #[arg(long)]
        graph: bool,
    },

    /// Apply commands from a script (or stdin), one per line
    Run {
        /// Archive to load before running
        #[arg(short, long)]
        archive: Option<PathBuf>,

        /// Script file; text (`goto 12`) or JSON (`{"command": "add_cel"}`) lines
        #[arg(short, long)]
        script: Option<PathBuf>,

        /// Stop at the first failing command
        #[arg(long)]
        strict: bool,
    },

    /// Play an archive in real time
    Play {
        /// Archive path
        archive: PathBuf,

        /// How long to play, in seconds
        #[arg(long, default_value = "2")]
        seconds: f64,

        /// Wrap around at the end of the sheet
        #[arg(long = "loop")]
        looping: bool,

        /// Sound the metronome while playing
        #[arg(long)]
        metronome: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config: {:?}", config_path))?;

    match cli.command {
        Commands::New {
            output,
            layers,
            frames,
        } => new_command(config, output, layers, frames),
        Commands::Info { archive, graph } => info_command(config, archive, graph),
        Commands::Run {
            archive,
            script,
            strict,
        } => run_command(config, archive, script, strict),
        Commands::Play {
            archive,
            seconds,
            looping,
            metronome,
        } => play_command(config, archive, seconds, looping, metronome).await,
    }
}

fn open_session(config: Config, archive: Option<&Path>) -> Result<Session> {
    let mut session = Session::new(config, MemoryGraph::new())?;
    if let Some(path) = archive {
        session
            .load(path)
            .with_context(|| format!("Failed to load archive: {:?}", path))?;
    }
    Ok(session)
}

fn print_sheet(session: &Session) {
    let sheet = session.sheet();
    print!("{}", render_exposure(sheet, listing_range(sheet)));
}

fn new_command(
    mut config: Config,
    output: PathBuf,
    layers: Option<usize>,
    frames: Option<i64>,
) -> Result<()> {
    if let Some(layers) = layers {
        config.sheet.layers_length = layers;
    }
    if let Some(frames) = frames {
        config.sheet.frames_length = frames;
    }
    let config = config.validated()?;
    let session = open_session(config, None)?;
    session.save(&output)?;
    info!(
        "Created {:?} with {} layers",
        output,
        session.sheet().layers_length()
    );
    Ok(())
}

fn info_command(config: Config, archive: PathBuf, graph: bool) -> Result<()> {
    let session = open_session(config, Some(&archive))?;
    let sheet = session.sheet();

    println!("archive: {}", archive.display());
    println!(
        "layers: {}  frames: {}  fps: {}",
        sheet.layers_length(),
        sheet.frames_length(),
        sheet.fps().frames_per_second()
    );
    for (idx, layer) in sheet.layers().iter().enumerate() {
        let cels = layer.entries().filter(|(_, cel)| cel.is_some()).count();
        let clears = layer.len() - cels;
        println!("  layer {idx}: {cels} cels, {clears} clears");
    }
    print_sheet(&session);

    if graph {
        println!();
        print!("{}", session.describe_graph());
    }
    Ok(())
}

fn parse_line(line: &str) -> Result<SessionCommand> {
    if line.starts_with('{') {
        Ok(serde_json::from_str(line)?)
    } else {
        Ok(line.parse()?)
    }
}

fn run_command(
    config: Config,
    archive: Option<PathBuf>,
    script: Option<PathBuf>,
    strict: bool,
) -> Result<()> {
    let mut session = open_session(config, archive.as_deref())?;

    let reader: Box<dyn BufRead> = match &script {
        Some(path) => Box::new(BufReader::new(
            std::fs::File::open(path)
                .with_context(|| format!("Failed to open script: {:?}", path))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let mut failures = 0usize;
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let outcome = parse_line(line).and_then(|command| Ok(session.apply(command)?));
        match outcome {
            Ok(true) => info!("{}: {}", number + 1, line),
            Ok(false) => info!("{}: {} (no change)", number + 1, line),
            Err(e) if strict => {
                return Err(e.context(format!("line {}: {}", number + 1, line)));
            }
            Err(e) => {
                failures += 1;
                warn!("line {}: {}: {}", number + 1, line, e);
            }
        }
    }

    print_sheet(&session);
    if failures > 0 {
        warn!("{} commands failed", failures);
    }
    Ok(())
}

async fn play_command(
    mut config: Config,
    archive: PathBuf,
    seconds: f64,
    looping: bool,
    metronome: bool,
) -> Result<()> {
    if !(seconds.is_finite() && seconds > 0.0) {
        bail!("--seconds must be a positive number");
    }
    config.sheet.playback_loop = looping;
    let mut session = open_session(config, Some(&archive))?;
    if metronome {
        session.apply(SessionCommand::ToggleMetronome)?;
    }

    let period = session.sheet().fps().frame_duration().max(Duration::from_millis(1));
    session.apply(SessionCommand::TogglePlay { looping: None })?;
    info!(
        "Playing {:?} at {} fps for {}s",
        archive,
        session.sheet().fps().frames_per_second(),
        seconds
    );

    let deadline = Instant::now() + Duration::from_secs_f64(seconds);
    let mut interval = tokio::time::interval(period);
    let mut last = Instant::now();
    while Instant::now() < deadline && session.sheet().is_playing() {
        interval.tick().await;
        let now = Instant::now();
        let moved = session.advance(now - last);
        last = now;
        if moved > 0 {
            let sheet = session.sheet();
            let showing = sheet
                .get_cel(None, None)
                .map(|cel| cel.id().to_string())
                .unwrap_or_else(|| "-".into());
            println!("frame {:>6}  {}", sheet.current_frame(), showing);
        }
    }

    session.apply(SessionCommand::Stop)?;
    info!("Stopped at frame {}", session.sheet().current_frame());
    Ok(())
}
