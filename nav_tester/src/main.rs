use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use minimap_nav::services::NoSequences;
use minimap_nav::{
    BgrImage, CvAutoOrchestrator, DetectionCell, DetectionFeed, DetectorConfig, FrameSource, NavConfig, NavServices,
    Region, StopSignal,
};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod sim;

#[cfg(feature = "video")]
mod video;

#[derive(Parser)]
#[command(name = "nav_tester")]
#[command(about = "Offline and simulated runs of the minimap navigation engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the marker detector over a directory of PNG minimap crops.
    Detect(DetectArgs),
    /// Drive a full navigation run against a simulated agent.
    Simulate(SimulateArgs),
    /// Draw detected markers onto every frame of a video (needs feature `video`).
    Video(VideoArgs),
}

#[derive(Debug, Clone, Args)]
struct DetectArgs {
    /// Directory holding the PNG frames.
    #[arg(long)]
    frames: PathBuf,
    /// Config whose `[detector]` section is used.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Crop each frame to `x,y,w,h` before detecting.
    #[arg(long, value_parser = parse_region)]
    region: Option<Region>,
}

#[derive(Debug, Clone, Args)]
struct SimulateArgs {
    /// Run configuration (TOML).
    #[arg(long)]
    config: PathBuf,
    /// Seed for jitter and rotation choice.
    #[arg(long)]
    seed: Option<u64>,
    /// How far left of the first waypoint the agent starts, in pixels.
    #[arg(long, default_value_t = 40)]
    start_offset: i32,
    /// Length of every simulated rotation at speed 1.0.
    #[arg(long, default_value_t = 1500)]
    rotation_ms: u64,
    /// Camera frame period.
    #[arg(long, default_value_t = 33)]
    frame_ms: u64,
    /// Directory of recorded pathfinding sequences (`<id>.json`).
    #[arg(long)]
    sequences: Option<PathBuf>,
    /// Serve status and events while the run is going (needs feature `web`).
    #[arg(long)]
    monitor: bool,
}

#[derive(Debug, Clone, Args)]
struct VideoArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    output: PathBuf,
    /// Minimap area of each frame as `x,y,w,h`.
    #[arg(long, value_parser = parse_region)]
    region: Region,
    /// Config whose `[detector]` section is used.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn parse_region(s: &str) -> Result<Region, String> {
    let parts: Vec<u32> = s
        .split(',')
        .map(|p| p.trim().parse::<u32>().map_err(|e| format!("bad region component '{p}': {e}")))
        .collect::<Result<_, _>>()?;
    match parts.as_slice() {
        [x, y, width, height] if *width > 0 && *height > 0 => Ok(Region {
            x: *x,
            y: *y,
            width: *width,
            height: *height,
        }),
        _ => Err(format!("expected x,y,w,h with a non-empty size, got '{s}'")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Detect(args) => run_detect(args).await,
        Commands::Simulate(args) => run_simulate(args).await,
        Commands::Video(args) => run_video(args).await,
    }
}

async fn detector_config(path: Option<&Path>) -> anyhow::Result<DetectorConfig> {
    match path {
        Some(path) => Ok(NavConfig::from_file(path)
            .await
            .with_context(|| format!("loading {}", path.display()))?
            .detector),
        None => Ok(DetectorConfig::default()),
    }
}

async fn run_detect(args: DetectArgs) -> anyhow::Result<()> {
    let config = detector_config(args.config.as_deref()).await?;

    let mut paths: Vec<PathBuf> = std::fs::read_dir(&args.frames)
        .with_context(|| format!("reading {}", args.frames.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("png")))
        .collect();
    paths.sort();
    if paths.is_empty() {
        bail!("no PNG frames in {}", args.frames.display());
    }

    let mut feed = DetectionFeed::new(config, DetectionCell::new());
    let stats = feed.stats_handle();
    for path in &paths {
        let rgb = image::open(path)
            .with_context(|| format!("decoding {}", path.display()))?
            .to_rgb8();
        let mut frame = BgrImage::from_rgb_image(&rgb);
        if let Some(region) = args.region {
            frame = frame.crop(region);
        }
        let result = feed.process(&frame);
        let line = serde_json::json!({
            "frame": path.file_name().map(|n| n.to_string_lossy().into_owned()),
            "detection": result,
        });
        println!("{line}");
    }

    let stats = *stats.lock().map_err(|_| anyhow::anyhow!("stats lock poisoned"))?;
    info!(
        frames = stats.frames,
        over_budget = stats.over_deadline,
        mean_ms = stats.mean_time().as_secs_f64() * 1000.0,
        max_ms = stats.max_time.as_secs_f64() * 1000.0,
        "detection summary"
    );
    Ok(())
}

async fn run_simulate(args: SimulateArgs) -> anyhow::Result<()> {
    let mut config = NavConfig::from_file(&args.config)
        .await
        .with_context(|| format!("loading {}", args.config.display()))?;
    if args.seed.is_some() {
        config.timings.rng_seed = args.seed;
    }
    config.validate()?;

    let world = sim::SimWorld::from_config(&config, sim::Physics::default(), args.start_offset);
    let (width, height) = world.size();
    info!(width, height, start = ?world.position(), "simulated minimap ready");

    let camera_stop = StopSignal::new();
    let cell = DetectionCell::new();
    let (frames_tx, frames_rx) = mpsc::channel(2);
    let feed = DetectionFeed::new(config.detector.clone(), cell.clone()).spawn(frames_rx);
    let camera = world.spawn_camera(frames_tx, Duration::from_millis(args.frame_ms), camera_stop.clone());

    // the orchestrator refuses to start until detection is live
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cell.is_available() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("detection feed produced no frame")?;

    let sequences: std::sync::Arc<dyn minimap_nav::SequenceLibrary> = match args.sequences {
        Some(dir) => std::sync::Arc::new(sim::DirSequences { dir }),
        None => std::sync::Arc::new(NoSequences),
    };
    let services = NavServices {
        frames: std::sync::Arc::new(cell.clone()),
        rotations: std::sync::Arc::new(sim::SimRotations {
            duration: Duration::from_millis(args.rotation_ms),
        }),
        keys: Box::new(sim::SimKeys::new(&world)),
        sequences,
    };

    let orchestrator = CvAutoOrchestrator::new(config, services);
    let mut events = orchestrator.subscribe();
    let run = orchestrator.spawn()?;

    if args.monitor {
        attach_monitor(&run).await?;
    }

    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(err) => warn!(%err, "event not serializable"),
                },
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event printer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let stop = run.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c, stopping run");
            stop.stop();
        }
    });

    let outcome = run.join().await;
    camera_stop.stop();
    let _ = camera.await;
    let _ = feed.await;
    // the monitor keeps a sender alive, so the printer may never see Closed
    let _ = tokio::time::timeout(Duration::from_millis(200), printer).await;

    let outcome = outcome?;
    info!(
        reason = ?outcome.reason,
        cycles = outcome.state.cycles_completed,
        rotations = outcome.state.rotations_played_count,
        end = ?world.position(),
        "simulation finished"
    );
    Ok(())
}

#[cfg(feature = "web")]
async fn attach_monitor(run: &minimap_nav::RunHandle) -> anyhow::Result<()> {
    let monitor = nav_monitor::MonitorHandle::from_run(run);
    let server = nav_monitor::start_server(monitor, nav_monitor::ServerConfig::from_env()).await?;
    info!(addr = %server.local_addr, "monitor attached");
    Ok(())
}

#[cfg(not(feature = "web"))]
async fn attach_monitor(_run: &minimap_nav::RunHandle) -> anyhow::Result<()> {
    bail!("--monitor needs nav_tester built with --features web")
}

#[cfg(feature = "video")]
async fn run_video(args: VideoArgs) -> anyhow::Result<()> {
    let config = detector_config(args.config.as_deref()).await?;
    tokio::task::spawn_blocking(move || video::annotate(&args.input, &args.output, args.region, config)).await?
}

#[cfg(not(feature = "video"))]
async fn run_video(_args: VideoArgs) -> anyhow::Result<()> {
    bail!("the video subcommand needs nav_tester built with --features video")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_parses_four_components() {
        assert_eq!(
            parse_region("10, 20,160,90"),
            Ok(Region { x: 10, y: 20, width: 160, height: 90 })
        );
        assert!(parse_region("10,20,160").is_err());
        assert!(parse_region("10,20,0,90").is_err());
        assert!(parse_region("a,b,c,d").is_err());
    }

    #[test]
    fn cli_accepts_simulate_flags() {
        let cli = Cli::try_parse_from(["nav_tester", "simulate", "--config", "run.toml", "--seed", "7"]).unwrap();
        match cli.command {
            Commands::Simulate(args) => {
                assert_eq!(args.seed, Some(7));
                assert_eq!(args.rotation_ms, 1500);
                assert!(!args.monitor);
            }
            _ => panic!("wrong subcommand"),
        }
    }
}
