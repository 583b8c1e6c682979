//! Send command: stream an image to a device waiting in the loader.

use anyhow::{Context, Result};
use console::style;
use hexboot::{HexSender, NativePort, Port, SenderConfig, SerialConfig};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::{Cli, CliError, get_baud, get_port, use_fancy_output, was_interrupted};

/// How long the target is held in reset by `--reset-pulse`.
const RESET_PULSE: Duration = Duration::from_millis(100);

/// Time for the loader to start after the reset is released.
const LOADER_STARTUP: Duration = Duration::from_millis(250);

/// Options of `hexboot send`.
#[derive(Debug, Clone, Default)]
pub(crate) struct SendOptions {
    pub redundant: bool,
    pub retries: Option<u32>,
    pub ack_timeout_ms: Option<u64>,
    pub reset_pulse: bool,
}

/// Command line over config file over library defaults.
fn sender_config(options: &SendOptions, config: &Config) -> SenderConfig {
    let mut sender = SenderConfig {
        redundant: options.redundant || config.loader_config().redundant,
        ..SenderConfig::default()
    };
    if let Some(retries) = options.retries.or(config.send.max_retries) {
        sender.max_retries = retries;
    }
    if let Some(ms) = options.ack_timeout_ms.or(config.send.ack_timeout_ms) {
        sender.ack_timeout = Duration::from_millis(ms);
    }
    sender
}

fn map_transfer_error(err: hexboot::Error) -> anyhow::Error {
    match err {
        hexboot::Error::Interrupted => CliError::Cancelled("Transfer interrupted".to_string()).into(),
        other => anyhow::Error::new(other).context("Transfer failed"),
    }
}

/// Hold DTR and RTS low, then release them.
fn pulse_reset(port: &mut NativePort) -> Result<()> {
    port.set_dtr(false)?;
    port.set_rts(false)?;
    thread::sleep(RESET_PULSE);
    port.set_dtr(true)?;
    port.set_rts(true)?;
    thread::sleep(LOADER_STARTUP);
    port.clear_buffers()?;
    Ok(())
}

/// Send command implementation.
pub(crate) fn cmd_send(
    cli: &Cli,
    config: &mut Config,
    image: &Path,
    options: &SendOptions,
) -> Result<()> {
    let text = std::fs::read_to_string(image)
        .with_context(|| format!("Failed to read image {}", image.display()))?;
    let lines = HexSender::<NativePort>::prepare(&text)
        .with_context(|| format!("Invalid image {}", image.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} Loaded {} ({} records)",
            style("📦").cyan(),
            image.display(),
            lines.len()
        );
    }

    let port_name = get_port(cli, config)?;
    let baud = get_baud(cli, config);
    if !cli.quiet {
        eprintln!(
            "{} Using port {port_name} at {baud} baud",
            style("🔌").cyan()
        );
    }

    let mut port = NativePort::open(&SerialConfig::new(&port_name, baud))
        .with_context(|| format!("Failed to open {port_name}"))?;

    if options.reset_pulse {
        pulse_reset(&mut port).context("Failed to pulse the reset lines")?;
    } else {
        port.clear_buffers()?;
    }
    if was_interrupted() {
        return Err(CliError::Cancelled("Transfer interrupted".to_string()).into());
    }

    let pb = if cli.quiet || !use_fancy_output() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(lines.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} lines {msg}")?
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    let sender_config = sender_config(options, config);
    log::debug!("Sender settings: {sender_config:?}");

    let summary = HexSender::with_config(&mut port, sender_config)
        .transfer_lines(&lines, |done, _total| pb.set_position(done as u64))
        .map_err(|e| {
            pb.abandon();
            map_transfer_error(e)
        })?;

    pb.finish_with_message("done");

    if !cli.quiet {
        eprintln!(
            "\n{} Sent {} lines ({} retries)",
            style("🎉").green().bold(),
            summary.lines_sent,
            summary.retries
        );
        if !summary.reset_confirmed {
            eprintln!(
                "{} The loader did not confirm the reset",
                style("⚠").yellow()
            );
        }
    }

    Ok(())
}
