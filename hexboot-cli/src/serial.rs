//! Serial port selection.
//!
//! Order of precedence: `--port`/`HEXBOOT_PORT`, the configured port, then
//! detection. With several candidates the user picks one through
//! `dialoguer`; in non-interactive mode exactly one candidate must remain.

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    hexboot::{DetectedPort, DeviceKind, device},
    log::{debug, error, info},
    std::io::IsTerminal,
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI or environment.
    pub port: Option<String>,
    /// Offer all ports, not just recognised bridges.
    pub list_all_ports: bool,
    /// Fail instead of prompting.
    pub non_interactive: bool,
    /// Ask even when a single recognised port was found.
    pub confirm_port: bool,
}

/// Selected port and whether it matched a known device.
pub struct SelectedPort {
    /// The selected port info.
    pub port: DetectedPort,
    /// Whether this port matched a known or remembered device.
    pub is_known: bool,
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

fn cancelled() -> anyhow::Error {
    CliError::Cancelled("Port selection cancelled".to_string()).into()
}

/// Check if a port is a built-in bridge or a remembered USB device.
fn is_known_device(port: &DetectedPort, config: &Config) -> bool {
    if port.device.is_known() {
        return true;
    }
    match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => config.knows_usb_device(vid, pid),
        _ => false,
    }
}

/// Exactly one candidate is required without a terminal.
fn select_non_interactive_port(
    mut candidates: Vec<DetectedPort>,
    config: &Config,
) -> Result<SelectedPort> {
    match candidates.len() {
        0 => Err(usage_err("No serial ports available")),
        1 => {
            let port = candidates.remove(0);
            Ok(SelectedPort {
                is_known: is_known_device(&port, config),
                port,
            })
        },
        n => Err(usage_err(&format!(
            "{n} serial ports found; pass --port in non-interactive mode"
        ))),
    }
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(options: &SerialOptions, config: &Config) -> Result<SelectedPort> {
    if let Some(name) = &options.port {
        return Ok(find_port_by_name(name));
    }

    if let Some(name) = &config.port.connection.serial {
        debug!("Using port from config: {name}");
        return Ok(find_port_by_name(name));
    }

    let ports = device::detect_ports();
    if ports.is_empty() {
        return Err(usage_err("No serial ports found"));
    }

    let known: Vec<DetectedPort> = ports
        .iter()
        .filter(|p| is_known_device(p, config))
        .cloned()
        .collect();
    let candidates = if options.list_all_ports || known.is_empty() {
        ports
    } else {
        known
    };

    if options.non_interactive {
        return select_non_interactive_port(candidates, config);
    }

    if candidates.len() == 1 {
        let port = candidates
            .into_iter()
            .next()
            .ok_or_else(|| usage_err("No serial ports available"))?;
        let is_known = is_known_device(&port, config);
        if is_known && !options.confirm_port {
            info!("Auto-selected port: {} [{}]", port.name, port.device.name());
            return Ok(SelectedPort { port, is_known });
        }
        ensure_interactive_terminal()?;
        return confirm_single_port(port, is_known);
    }

    ensure_interactive_terminal()?;
    select_port_interactive(candidates, config)
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Port selection needs a terminal; pass --port or --non-interactive",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) if io_err.kind() == std::io::ErrorKind::Interrupted => {
            cancelled()
        },
        DialoguerError::IO(io_err) => usage_err(&format!("Prompt failed: {io_err}")),
    }
}

/// Find a port by name, or describe it as an unknown port.
fn find_port_by_name(name: &str) -> SelectedPort {
    let ports = device::detect_ports();

    // Exact match first, then case-insensitive (Windows)
    let found = ports
        .iter()
        .find(|p| p.name == name)
        .or_else(|| ports.iter().find(|p| p.name.eq_ignore_ascii_case(name)));

    match found {
        Some(port) => SelectedPort {
            port: port.clone(),
            is_known: port.device.is_known(),
        },
        None => SelectedPort {
            port: DetectedPort {
                name: name.to_string(),
                device: DeviceKind::Unknown,
                vid: None,
                pid: None,
                manufacturer: None,
                product: None,
                serial: None,
            },
            is_known: false,
        },
    }
}

/// Label for one port in the selection menu.
fn port_label(port: &DetectedPort, known: bool) -> String {
    let name = if known {
        style(&port.name).bold().to_string()
    } else {
        port.name.clone()
    };

    let device_info = if port.device.is_known() {
        format!(" [{}]", style(port.device.name()).yellow())
    } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{name}{device_info}{product}")
}

fn select_port_interactive(mut ports: Vec<DetectedPort>, config: &Config) -> Result<SelectedPort> {
    eprintln!(
        "{} Found {} serial ports (recognised bridges in bold)",
        style("ℹ").blue(),
        ports.len()
    );

    ports.sort_by_key(|p| !is_known_device(p, config));

    // Keep each label on one line in narrow terminals
    let max_width = usize::from(console::Term::stderr().size().1).saturating_sub(4);
    let labels: Vec<String> = ports
        .iter()
        .map(|p| {
            let label = port_label(p, is_known_device(p, config));
            console::truncate_str(&label, max_width, "\u{2026}").into_owned()
        })
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select the target's serial port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?
        .ok_or_else(cancelled)?;

    let port = ports
        .into_iter()
        .nth(selection)
        .ok_or_else(|| anyhow::anyhow!("Invalid port index: {selection}"))?;
    let is_known = is_known_device(&port, config);
    Ok(SelectedPort { port, is_known })
}

fn confirm_single_port(port: DetectedPort, is_known: bool) -> Result<SelectedPort> {
    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use {}?", port_label(&port, is_known)))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort { port, is_known })
    } else {
        Err(cancelled())
    }
}

/// Offer to remember an unrecognised USB port for next time.
pub fn ask_remember_port(port: &DetectedPort, config: &mut Config) -> Result<()> {
    let (Some(vid), Some(pid)) = (port.vid, port.pid) else {
        return Ok(());
    };
    if config.knows_usb_device(vid, pid) {
        return Ok(());
    }

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Remember {vid:04X}:{pid:04X} as a target bridge?"))
        .default(false)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        if let Err(e) = config.remember_usb_device(vid, pid) {
            error!("Failed to save port configuration: {e}");
        }
    }

    Ok(())
}
