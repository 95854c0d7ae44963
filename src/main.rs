// src/main.rs

//! `jes-show`: the display process.
//!
//! Spawned by the producer with the channel on stdin (downstream) and stdout
//! (upstream). Nothing else may write to stdout; logs go to stderr.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use jes_show::channel::FrameChannel;
use jes_show::config::Config;
use jes_show::display::{
    DisplayDriver, HeadlessDisplayDriver, HeadlessOptions, RenderLoop, RenderSummary,
};
use log::{info, warn};
use std::fs::File;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// X11 when compiled in and $DISPLAY is set, headless otherwise
    Auto,
    /// Xlib window (needs the `x11-display` feature)
    X11,
    /// In-memory canvas, no window
    Headless,
}

/// Shows the frames a JES program sends on stdin
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// GUI backend
    #[arg(long, value_enum, default_value = "auto")]
    backend: Backend,

    /// env_logger filter, overrides RUST_LOG
    #[arg(long)]
    log_filter: Option<String>,

    /// Headless only: append one JSON line per presented frame to this file
    #[arg(long)]
    render_log: Option<PathBuf>,

    /// Headless only: behave as if the user closed the window after N frames
    #[arg(long)]
    close_after_frames: Option<u64>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(filter) = &args.log_filter {
        logger.parse_filters(filter);
    }
    logger.format_timestamp_micros().init();

    info!("jes-show: starting (pid {})", std::process::id());

    // --- Configuration ---
    let config = Config::load().context("Failed to load configuration")?;
    let channel = FrameChannel::from_stdio(config.channel.max_payload_bytes)
        .context("Failed to bind channel to stdio")?;

    let summary = match resolve_backend(args.backend)? {
        Selected::Headless => {
            let driver = HeadlessDisplayDriver::new(HeadlessOptions {
                close_after_frames: args.close_after_frames,
                render_log: args.render_log.clone(),
            })?;
            run_session(driver, channel, &config)?
        }
        Selected::X11 => run_x11(channel, &config)?,
    };

    if summary.cause.is_abnormal() {
        bail!("session ended abnormally: {}", summary.cause);
    }
    info!("jes-show: exiting ({})", summary.cause);
    Ok(())
}

enum Selected {
    X11,
    Headless,
}

fn resolve_backend(requested: Backend) -> Result<Selected> {
    let x11_compiled = cfg!(feature = "x11-display");
    match requested {
        Backend::Auto if x11_compiled && std::env::var_os("DISPLAY").is_some() => Ok(Selected::X11),
        Backend::Auto => {
            info!("jes-show: no X11 display available, running headless");
            Ok(Selected::Headless)
        }
        Backend::X11 if !x11_compiled => {
            bail!("jes-show was built without the `x11-display` feature")
        }
        Backend::X11 => Ok(Selected::X11),
        Backend::Headless => Ok(Selected::Headless),
    }
}

fn run_session<D: DisplayDriver>(
    driver: D,
    channel: FrameChannel<File, File>,
    config: &Config,
) -> Result<RenderSummary> {
    let mut render_loop = RenderLoop::start(driver, channel, config)?;
    let summary = render_loop.run()?;
    if summary.frames_dropped > 0 {
        warn!("jes-show: {} frame(s) were not rendered", summary.frames_dropped);
    }
    Ok(summary)
}

#[cfg(feature = "x11-display")]
fn run_x11(channel: FrameChannel<File, File>, config: &Config) -> Result<RenderSummary> {
    let driver = jes_show::display::X11DisplayDriver::new()?;
    run_session(driver, channel, config)
}

#[cfg(not(feature = "x11-display"))]
fn run_x11(_channel: FrameChannel<File, File>, _config: &Config) -> Result<RenderSummary> {
    bail!("jes-show was built without the `x11-display` feature")
}
