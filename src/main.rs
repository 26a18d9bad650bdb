use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use framegrab::capture::frame_channel;
use framegrab::config::{self, AppConfig};
use framegrab::driver::sim::{SimConfig, SimulatedDriver};
use framegrab::{Buffer, OpenStream, System};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// How frames are pulled from the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Frame generator on the calling thread
    #[default]
    Sync,
    /// Streaming session feeding a channel
    Stream,
}

/// framegrab command line arguments
#[derive(Parser, Debug)]
#[command(name = "framegrab")]
#[command(version, about = "Capture frames from a camera", long_about = None)]
struct CliArgs {
    /// Configuration file (TOML)
    #[arg(short = 'c', long, value_name = "FILE", default_value = "framegrab.toml")]
    config: PathBuf,

    /// Acquisition mode
    #[arg(short = 'm', long, value_enum, default_value_t = Mode::Sync)]
    mode: Mode,

    /// Frames to capture (overrides capture.frame_limit)
    #[arg(short = 'n', long, value_name = "COUNT")]
    count: Option<u64>,

    /// How long to stream in stream mode
    #[arg(short = 's', long, value_name = "SECONDS", default_value_t = 3)]
    seconds: u64,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting framegrab v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load(&args.config)?;
    if let Some(count) = args.count {
        config.capture.frame_limit = Some(count);
    }
    config::store::validate(&config)?;

    let driver = Arc::new(SimulatedDriver::new(SimConfig::from(&config.simulation)));
    let system = System::new(driver);
    let _guard = system.enter()?;

    let camera = system.open_camera(&config.capture.device_id, config.capture.access_mode)?;
    let stream = camera.primary_stream()?;

    match args.mode {
        Mode::Sync => run_sync(&stream, &config)?,
        Mode::Stream => run_stream(&stream, &config, Duration::from_secs(args.seconds)).await?,
    }

    stream.close()?;
    camera.close()?;
    tracing::info!("Bye");
    Ok(())
}

fn run_sync(stream: &OpenStream, config: &AppConfig) -> anyhow::Result<()> {
    let capture = &config.capture;
    let frames = stream.get_frame_generator(
        capture.frame_limit,
        Duration::from_millis(capture.timeout_ms),
        capture.allocation_mode,
    )?;
    for frame in frames {
        log_frame(&frame?);
    }
    Ok(())
}

async fn run_stream(stream: &OpenStream, config: &AppConfig, duration: Duration) -> anyhow::Result<()> {
    let capture = &config.capture;
    let (handler, mut rx) = frame_channel(capture.channel_capacity);
    let dropped = handler.dropped_counter();
    stream.start_streaming(handler, capture.buffer_count, capture.allocation_mode)?;

    let mut received = 0u64;
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            frame = rx.recv() => match frame {
                Some(frame) => {
                    received += 1;
                    log_frame(&frame);
                    if capture.frame_limit.is_some_and(|limit| received >= limit) {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    stream.stop_streaming()?;
    tracing::info!(
        "Received {} frames, {} dropped",
        received,
        dropped.load(Ordering::Relaxed)
    );
    Ok(())
}

fn log_frame(frame: &Buffer) {
    tracing::info!(
        "{} {}x{} {} ({} bytes)",
        frame,
        frame.width().unwrap_or(0),
        frame.height().unwrap_or(0),
        frame.pixel_format(),
        frame.capacity()
    );
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "framegrab=error",
        LogLevel::Warn => "framegrab=warn",
        LogLevel::Info => "framegrab=info",
        LogLevel::Verbose => "framegrab=debug,framegrab::capture::fsm=info",
        LogLevel::Debug => "framegrab=debug",
        LogLevel::Trace => "framegrab=trace",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
