//! hexboot CLI - Command-line tool for the hexboot serial loader.
//!
//! ## Features
//!
//! - Send Intel HEX images to a device running the loader
//! - Emulate a device on a serial port against simulated flash
//! - Validate images offline
//! - Interactive serial port selection
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;
mod serial;

use config::Config;
use serial::{SerialOptions, ask_remember_port, select_serial_port};

/// Baud rate used when neither the command line nor the config names one.
const DEFAULT_BAUD: u32 = 115_200;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors with a dedicated exit status.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or an unanswerable prompt.
    #[error("{0}")]
    Usage(String),
    /// The user cancelled.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 2,
            Self::Cancelled(_) => 130,
        }
    }
}

/// hexboot - Send hex images to a PIC serial bootloader.
///
/// Environment variables:
///   HEXBOOT_PORT              - Default serial port
///   HEXBOOT_BAUD              - Default baud rate (default: 115200)
///   HEXBOOT_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "hexboot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "HEXBOOT_PORT")]
    port: Option<String>,

    /// Baud rate [default: 115200].
    #[arg(short, long, global = true, env = "HEXBOOT_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "HEXBOOT_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long, global = true)]
    confirm_port: bool,

    /// Offer all available ports (including unknown types).
    #[arg(long, global = true)]
    list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Send a hex image to a device waiting in the loader.
    Send {
        /// Path to the Intel HEX image.
        image: PathBuf,

        /// Send every line twice (loader built in redundant mode).
        #[arg(long)]
        redundant: bool,

        /// Resends of a line before giving up.
        #[arg(long)]
        retries: Option<u32>,

        /// Handshake timeout per line in milliseconds.
        #[arg(long, value_name = "MS")]
        ack_timeout_ms: Option<u64>,

        /// Pulse DTR/RTS before sending to drop the target into its loader.
        #[arg(long)]
        reset_pulse: bool,
    },

    /// Act as a device: run the loader on a serial port against simulated flash.
    Emulate {
        /// Flash image file, loaded at start and saved after every session.
        #[arg(long, value_name = "FILE")]
        image: Option<PathBuf>,

        /// Program memory size in words.
        #[arg(long)]
        words: Option<u32>,

        /// Receive every line twice.
        #[arg(long)]
        redundant: bool,
    },

    /// Validate a hex image without a device.
    Check {
        /// Path to the Intel HEX image.
        image: PathBuf,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type (auto-detected with --install).
        #[arg(value_enum)]
        shell: Option<Shell>,

        /// Install completions into the shell's completion directory.
        #[arg(long)]
        install: bool,
    },
}

fn main() {
    if let Err(err) = run() {
        let code = err.downcast_ref::<CliError>().map_or(1, CliError::exit_code);
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(code);
    }
}

fn run() -> Result<()> {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "hexboot v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    // A second Ctrl-C while the first is being handled exits at once
    if let Err(e) = ctrlc::set_handler(|| {
        if INTERRUPTED.swap(true, Ordering::Relaxed) {
            std::process::exit(130);
        }
    }) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    hexboot::set_interrupt_checker(was_interrupted);

    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Send {
            image,
            redundant,
            retries,
            ack_timeout_ms,
            reset_pulse,
        } => commands::send::cmd_send(
            &cli,
            &mut config,
            image,
            &commands::send::SendOptions {
                redundant: *redundant,
                retries: *retries,
                ack_timeout_ms: *ack_timeout_ms,
                reset_pulse: *reset_pulse,
            },
        ),
        Commands::Emulate {
            image,
            words,
            redundant,
        } => commands::emulate::cmd_emulate(
            &cli,
            &mut config,
            image.as_deref(),
            *words,
            *redundant,
        ),
        Commands::Check { image, json } => commands::check::cmd_check(&config, image, *json),
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Completions { shell, install } => {
            if *install {
                commands::completions::cmd_completions_install(*shell)
            } else {
                let shell = shell.ok_or_else(|| {
                    CliError::Usage(
                        "specify a shell type, e.g. `hexboot completions bash`, \
                         or use `hexboot completions --install`"
                            .to_string(),
                    )
                })?;
                commands::completions::cmd_completions(shell);
                Ok(())
            }
        },
    }
}

/// Get serial port from CLI args or interactive selection.
fn get_port(cli: &Cli, config: &mut Config) -> Result<String> {
    let options = SerialOptions {
        port: cli.port.clone(),
        list_all_ports: cli.list_all_ports,
        non_interactive: cli.non_interactive,
        confirm_port: cli.confirm_port,
    };

    let selected = select_serial_port(&options, config)?;

    // Ask to remember if not a known device and interactive mode
    if !selected.is_known && !cli.non_interactive && cli.port.is_none() {
        ask_remember_port(&selected.port, config)?;
    }

    Ok(selected.port.name)
}

/// Baud rate from the command line, then the config, then the default.
fn get_baud(cli: &Cli, config: &Config) -> u32 {
    cli.baud
        .or(config.port.connection.baud)
        .unwrap_or(DEFAULT_BAUD)
}
