//! Cam-interface smoke test: open a backend, stream a few frames and snapshot.

use std::path::PathBuf;
use std::time::Instant;

use cam_interface::traits::DEFAULT_READ_TIMEOUT;
use cam_interface::{factory, BackendProfile, Camera, CameraExt};
use clap::Parser;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "cam-interface")]
#[command(about = "Stream frames from a camera backend and report the measured FPS")]
#[command(version)]
struct Cli {
    /// Backend profile (JSON); the built-in profile when omitted
    #[arg(short, long)]
    profile: Option<PathBuf>,

    /// Override the profile's backend key
    #[arg(short, long)]
    backend: Option<String>,

    /// Number of frames to stream
    #[arg(short, long, default_value = "30")]
    frames: usize,

    /// Save one still image here after streaming
    #[arg(short, long)]
    snapshot: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run(&Cli::parse()) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> cam_interface::Result<()> {
    let mut profile = match &cli.profile {
        Some(path) => BackendProfile::from_path(path)?,
        None => BackendProfile::default(),
    };
    if let Some(backend) = &cli.backend {
        profile.backend.clone_from(backend);
    }

    let camera = factory::create(&profile)?;
    let session = camera.session()?;

    if let Some(config) = session.current_config() {
        info!(
            camera = session.name(),
            resolution = %config.resolution,
            framerate = config.framerate,
            pixel_format = %config.pixel_format,
            "Applied configuration"
        );
    }
    let caps = session.capabilities()?;
    info!(
        resolutions = ?caps.resolutions,
        framerates = ?caps.framerates,
        "Device capabilities"
    );

    session.start_stream()?;
    session.flush();

    let started = Instant::now();
    let mut received = 0usize;
    for frame in session.frames(Some(DEFAULT_READ_TIMEOUT)).take(cli.frames) {
        match frame {
            Ok(frame) => {
                received += 1;
                println!(
                    "Frame {}: {}x{} {} bytes, timestamp: {:?}",
                    frame.sequence,
                    frame.width,
                    frame.height,
                    frame.data.len(),
                    frame.timestamp
                );
            }
            Err(err) => warn!(error = %err, "Frame read failed"),
        }
    }
    let elapsed = started.elapsed().as_secs_f64();

    #[allow(clippy::cast_precision_loss)]
    let fps = if elapsed > 0.0 {
        received as f64 / elapsed
    } else {
        0.0
    };
    info!(frames = received, elapsed_s = elapsed, fps, "Streaming finished");

    if let Some(path) = &cli.snapshot {
        let frame = session.capture(Some(path))?;
        info!(
            path = %path.display(),
            width = frame.width,
            height = frame.height,
            "Snapshot saved"
        );
    }

    session.stop_stream();
    Ok(())
}
