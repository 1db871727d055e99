//! Pixelbox - Command-line surface for the image display device
//!
//! # Usage
//!
//! ```bash
//! # What is stored, what is shown
//! pixelbox list
//! pixelbox show
//! pixelbox status
//!
//! # Change things
//! pixelbox upload ./cat.png
//! pixelbox select cat.png
//! pixelbox delete dog.png
//! pixelbox brightness 60
//! pixelbox max-current 500
//!
//! # Keep a live view until Ctrl-C
//! pixelbox watch
//!
//! # Another device, or no device at all
//! pixelbox --device http://10.0.0.7 list
//! pixelbox --simulate watch
//!
//! # Verbose logging
//! RUST_LOG=pixelbox_core=debug pixelbox status
//! ```

mod render;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use pixelbox_core::device::SimulatedDevice;
use pixelbox_core::renderer::solid_png;
use pixelbox_core::{
    load_config_with_overrides, ClientConfig, ClientSession, ConfigOverrides, DeviceResult,
    DisplayedImage, MutationOutcome, Url,
};

/// Pixelbox - manage the images on a pixelbox display
#[derive(Parser, Debug)]
#[command(name = "pixelbox")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Device base URL (overrides config and PIXELBOX_DEVICE_URL)
    #[arg(short = 'd', long, value_name = "URL")]
    device: Option<Url>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "PIXELBOX_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Per-request timeout in milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Refresh period for `watch`, in milliseconds
    #[arg(long, value_name = "MS")]
    poll_ms: Option<u64>,

    /// Talk to an in-memory device instead of the network
    #[arg(long)]
    simulate: bool,

    /// Debug logging
    #[arg(short = 'v', long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// List stored images
    List,
    /// Show filesystem status
    Status,
    /// Draw the displayed image in the terminal
    Show,
    /// Upload an image (it becomes the displayed one)
    Upload {
        /// PNG or GIF file
        path: PathBuf,
        /// Name to store it under (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Delete a stored image
    Delete {
        /// Image name as listed
        name: String,
    },
    /// Make a stored image the displayed one
    Select {
        /// Image name as listed
        name: String,
    },
    /// Set LED brightness
    Brightness {
        /// Percent, 0-100
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        percent: u8,
    },
    /// Set the LED current limit
    MaxCurrent {
        /// Milliamps
        milliamps: u32,
    },
    /// Refresh periodically and print every change until Ctrl-C
    Watch,
}

/// Initialize logging; stdout is reserved for command output
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("pixelbox={level},pixelbox_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve configuration: CLI > env > file > defaults
fn resolve_config(args: &Args) -> Result<ClientConfig> {
    let mut overrides = ConfigOverrides::new();
    if let Some(ref url) = args.device {
        overrides = overrides.with_device_url(url.clone());
    }
    if let Some(ms) = args.timeout_ms {
        overrides = overrides.with_request_timeout_ms(ms);
    }
    if let Some(ms) = args.poll_ms {
        overrides = overrides.with_poll_interval_ms(ms);
    }
    let config = load_config_with_overrides(
        args.config.clone().or_else(pixelbox_core::default_config_path),
        |key| std::env::var(key).ok(),
        &overrides,
    )
    .context("Failed to load configuration")?;

    info!(
        device = %config.device_url,
        source = %config.source(),
        "Configuration resolved"
    );
    Ok(config)
}

/// A small in-memory device with two images, for trying things out
fn demo_device() -> DeviceResult<SimulatedDevice> {
    Ok(SimulatedDevice::new()
        .with_image("sunset.png", solid_png(32, 16, [250, 120, 40, 255])?)
        .with_image("ocean.png", solid_png(32, 16, [20, 90, 200, 255])?)
        .with_displayed("sunset.png"))
}

fn open_session(args: &Args, config: &ClientConfig) -> Result<ClientSession> {
    if args.simulate {
        info!("Using simulated device");
        let device = demo_device().context("Failed to build simulated device")?;
        return Ok(ClientSession::with_device(
            Arc::new(device),
            config.poll_interval,
            config.event_buffer,
        ));
    }
    ClientSession::connect(config).context("Failed to create HTTP client")
}

/// Stored name for an uploaded file
fn upload_name(path: &Path, name: Option<String>) -> Result<String> {
    if let Some(name) = name {
        return Ok(name);
    }
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .with_context(|| format!("Cannot derive an image name from {}", path.display()))
}

/// Draw the displayed image at the terminal's width
fn draw(displayed: &DisplayedImage) -> Result<()> {
    let width = crossterm::terminal::size().map_or(80, |(cols, _)| u32::from(cols));
    let mut stdout = std::io::stdout().lock();
    render::write_displayed(&mut stdout, displayed, width)?;
    Ok(())
}

/// Report follow-up refresh failures and fail if the mutation itself failed
fn finish(outcome: MutationOutcome) -> Result<()> {
    if !outcome.refresh.is_ok() {
        warn!(
            mutation = %outcome.kind,
            failures = outcome.refresh.failures(),
            "Some views could not be refreshed"
        );
    }
    let kind = outcome.kind;
    outcome.mutation.with_context(|| format!("{kind} failed"))
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}

async fn run(args: Args) -> Result<()> {
    let config = resolve_config(&args)?;
    let mut session = open_session(&args, &config)?;
    let reconciler = session.reconciler().clone();

    match args.command {
        Command::List => {
            let view = reconciler.gallery().refresh().await?;
            print_lines(&view.render_lines());
        }
        Command::Status => {
            let panel = reconciler.status().refresh().await?;
            print_lines(&render::status_lines(&panel));
        }
        Command::Show => {
            let displayed = reconciler.renderer().refresh().await?;
            draw(&displayed)?;
        }
        Command::Upload { path, name } => {
            let file_name = upload_name(&path, name)?;
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let outcome = reconciler.upload(bytes, file_name).await;
            finish(outcome)?;
            print_lines(&reconciler.gallery().view().render_lines());
        }
        Command::Delete { name } => {
            let outcome = reconciler.delete(name).await;
            finish(outcome)?;
            print_lines(&reconciler.gallery().view().render_lines());
        }
        Command::Select { name } => {
            let outcome = reconciler.select(name).await;
            finish(outcome)?;
            draw(&reconciler.renderer().displayed())?;
        }
        Command::Brightness { percent } => {
            let outcome = reconciler.set_brightness(percent).await;
            finish(outcome)?;
            print_lines(&render::parameter_lines(&reconciler.parameters()));
        }
        Command::MaxCurrent { milliamps } => {
            let outcome = reconciler.set_max_current(milliamps).await;
            finish(outcome)?;
            print_lines(&render::parameter_lines(&reconciler.parameters()));
        }
        Command::Watch => {
            let mut events = session
                .take_events()
                .context("Event channel already taken")?;
            session.start_polling();
            info!(
                period_ms = u64::try_from(config.poll_interval.as_millis()).unwrap_or(u64::MAX),
                "Watching device, Ctrl-C to stop"
            );

            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => println!("{}", render::describe_event(&event)),
                        None => break,
                    },
                    signal = tokio::signal::ctrl_c() => {
                        if let Err(e) = signal {
                            warn!(error = %e, "Failed to listen for Ctrl-C");
                        }
                        info!("Received Ctrl-C, stopping");
                        break;
                    }
                }
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    run(args).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_global_options() {
        let args = Args::try_parse_from([
            "pixelbox",
            "--device",
            "http://10.0.0.7",
            "--timeout-ms",
            "1500",
            "--simulate",
            "list",
        ])
        .unwrap();
        assert_eq!(args.device.unwrap().as_str(), "http://10.0.0.7/");
        assert_eq!(args.timeout_ms, Some(1500));
        assert!(args.simulate);
        assert_eq!(args.command, Command::List);
    }

    #[test]
    fn test_parse_commands() {
        let args = Args::try_parse_from(["pixelbox", "upload", "cat.png", "--name", "kitty.png"])
            .unwrap();
        assert_eq!(
            args.command,
            Command::Upload {
                path: PathBuf::from("cat.png"),
                name: Some("kitty.png".into())
            }
        );

        let args = Args::try_parse_from(["pixelbox", "max-current", "500"]).unwrap();
        assert_eq!(args.command, Command::MaxCurrent { milliamps: 500 });
    }

    #[test]
    fn test_brightness_range_checked() {
        assert!(Args::try_parse_from(["pixelbox", "brightness", "100"]).is_ok());
        assert!(Args::try_parse_from(["pixelbox", "brightness", "101"]).is_err());
    }

    #[test]
    fn test_bad_url_rejected() {
        assert!(Args::try_parse_from(["pixelbox", "--device", "not a url", "list"]).is_err());
    }

    #[test]
    fn test_upload_name() {
        assert_eq!(
            upload_name(Path::new("/tmp/pics/cat.png"), None).unwrap(),
            "cat.png"
        );
        assert_eq!(
            upload_name(Path::new("cat.png"), Some("other.png".into())).unwrap(),
            "other.png"
        );
        assert!(upload_name(Path::new("/"), None).is_err());
    }

    #[tokio::test]
    async fn test_finish_reports_mutation_failure() {
        let device = demo_device().unwrap();
        device.fail(
            pixelbox_core::DeviceOp::Delete,
            pixelbox_core::InjectedFailure::server_error("Failed to delete image."),
        );
        let session = ClientSession::with_device(
            Arc::new(device),
            std::time::Duration::from_secs(10),
            8,
        );

        let err = finish(session.reconciler().delete("ocean.png").await).unwrap_err();
        assert!(err.to_string().contains("delete failed"));
        assert!(finish(session.reconciler().select("ocean.png").await).is_ok());
    }
}
