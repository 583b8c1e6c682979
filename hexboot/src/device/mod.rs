//! Serial port discovery.
//!
//! Ports are classified by the USB bridge behind them so the CLI can pick
//! the most likely target link when no port is given.

use crate::error::{Error, Result};

#[cfg(feature = "native")]
use log::{debug, info, trace};

/// Known USB-to-UART bridges found on PIC development boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Microchip MCP2200/MCP2221 or a PICkit/debugger serial bridge.
    Microchip,
    /// FTDI FT232/FT2232/FT4232 USB-to-Serial converter.
    Ftdi,
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// Prolific PL2303 USB-to-Serial converter.
    Prolific,
    /// Unknown device.
    Unknown,
}

/// Known USB VID/PID pairs. An empty PID list matches any product.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (0x04D8, &[], DeviceKind::Microchip),
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        DeviceKind::Ftdi,
    ),
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x5512, 0x55D4],
        DeviceKind::Ch340,
    ),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71, 0xEA63], DeviceKind::Cp210x),
    (0x067B, &[0x2303, 0x23A3, 0x23C3, 0x23D3], DeviceKind::Prolific),
];

impl DeviceKind {
    /// Classify a USB VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_USB_DEVICES
            .iter()
            .find(|(known_vid, pids, _)| vid == *known_vid && (pids.is_empty() || pids.contains(&pid)))
            .map_or(Self::Unknown, |(_, _, device)| *device)
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Microchip => "Microchip",
            Self::Ftdi => "FTDI",
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Prolific => "PL2303",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known bridge.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Check if this bridge should be preferred during auto-selection.
    pub fn is_high_priority(&self) -> bool {
        matches!(self, Self::Microchip | Self::Ftdi)
    }
}

/// Discovered serial port with metadata.
#[derive(Debug, Clone)]
pub struct DetectedPort {
    /// Port name/path (e.g., "/dev/ttyUSB0" or "COM3").
    pub name: String,
    /// Classified bridge.
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// Check if this port sits behind a known bridge.
    pub fn is_likely_target(&self) -> bool {
        self.device.is_known()
    }
}

/// Detect all available serial ports with metadata.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
            return Vec::new();
        },
    };

    ports
        .into_iter()
        .map(|port_info| {
            let mut detected = DetectedPort {
                name: port_info.port_name.clone(),
                device: DeviceKind::Unknown,
                vid: None,
                pid: None,
                manufacturer: None,
                product: None,
                serial: None,
            };

            if let serialport::SerialPortType::UsbPort(usb_info) = port_info.port_type {
                detected.vid = Some(usb_info.vid);
                detected.pid = Some(usb_info.pid);
                detected.manufacturer = usb_info.manufacturer;
                detected.product = usb_info.product;
                detected.serial = usb_info.serial_number;
                detected.device = DeviceKind::from_vid_pid(usb_info.vid, usb_info.pid);

                trace!(
                    "Found USB port: {} (VID: {:04X}, PID: {:04X}, Device: {:?})",
                    port_info.port_name, usb_info.vid, usb_info.pid, detected.device
                );
            }

            detected
        })
        .collect()
}

/// Without native serial support there is nothing to enumerate.
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Detect ports behind a known bridge.
pub fn detect_bridge_ports() -> Vec<DetectedPort> {
    detect_ports()
        .into_iter()
        .filter(DetectedPort::is_likely_target)
        .collect()
}

/// Pick the best candidate from `ports`.
///
/// Preference: high-priority bridges, then any known bridge, then the
/// first port.
pub fn select_port(ports: Vec<DetectedPort>) -> Result<DetectedPort> {
    if let Some(port) = ports.iter().find(|p| p.device.is_high_priority()) {
        return Ok(port.clone());
    }
    if let Some(port) = ports.iter().find(|p| p.device.is_known()) {
        return Ok(port.clone());
    }
    ports.into_iter().next().ok_or(Error::DeviceNotFound)
}

/// Auto-detect a single serial port.
#[cfg(feature = "native")]
pub fn auto_detect_port() -> Result<DetectedPort> {
    let port = select_port(detect_ports())?;
    if port.device.is_known() {
        info!("Auto-detected {} USB-UART bridge: {}", port.device.name(), port.name);
    } else {
        info!("Using first available port: {}", port.name);
    }
    Ok(port)
}

/// Format a list of detected ports for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    ports
        .iter()
        .map(|port| {
            let device_info = if port.device.is_known() {
                format!(" [{}]", port.device.name())
            } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
                format!(" [VID:{vid:04X} PID:{pid:04X}]")
            } else {
                String::new()
            };

            let product_info = port
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();

            format!("{}{}{}", port.name, device_info, product_info)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(name: &str, device: DeviceKind) -> DetectedPort {
        DetectedPort {
            name: name.to_string(),
            device,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial: None,
        }
    }

    #[test]
    fn test_device_kind_from_vid_pid() {
        assert_eq!(DeviceKind::from_vid_pid(0x04D8, 0x00DF), DeviceKind::Microchip);
        assert_eq!(DeviceKind::from_vid_pid(0x04D8, 0x9012), DeviceKind::Microchip);
        assert_eq!(DeviceKind::from_vid_pid(0x0403, 0x6001), DeviceKind::Ftdi);
        assert_eq!(DeviceKind::from_vid_pid(0x1A86, 0x7523), DeviceKind::Ch340);
        assert_eq!(DeviceKind::from_vid_pid(0x10C4, 0xEA60), DeviceKind::Cp210x);
        assert_eq!(DeviceKind::from_vid_pid(0x067B, 0x2303), DeviceKind::Prolific);
        assert_eq!(DeviceKind::from_vid_pid(0x0403, 0x1234), DeviceKind::Unknown);
        assert_eq!(DeviceKind::from_vid_pid(0x1234, 0x5678), DeviceKind::Unknown);
    }

    #[test]
    fn test_select_port_prefers_microchip_bridge() {
        let ports = vec![
            port("/dev/ttyS0", DeviceKind::Unknown),
            port("/dev/ttyUSB0", DeviceKind::Ch340),
            port("/dev/ttyACM0", DeviceKind::Microchip),
        ];
        assert_eq!(select_port(ports).unwrap().name, "/dev/ttyACM0");
    }

    #[test]
    fn test_select_port_falls_back_to_known_then_first() {
        let ports = vec![
            port("/dev/ttyS0", DeviceKind::Unknown),
            port("/dev/ttyUSB0", DeviceKind::Prolific),
        ];
        assert_eq!(select_port(ports).unwrap().name, "/dev/ttyUSB0");

        let ports = vec![port("/dev/ttyS0", DeviceKind::Unknown)];
        assert_eq!(select_port(ports).unwrap().name, "/dev/ttyS0");
    }

    #[test]
    fn test_select_port_empty() {
        assert!(matches!(select_port(Vec::new()), Err(Error::DeviceNotFound)));
    }

    #[test]
    fn test_format_port_list() {
        let mut known = port("/dev/ttyACM0", DeviceKind::Microchip);
        known.product = Some("MCP2221 USB-I2C/UART Combo".to_string());
        let mut unknown = port("/dev/ttyUSB1", DeviceKind::Unknown);
        unknown.vid = Some(0x1234);
        unknown.pid = Some(0x5678);

        let formatted = format_port_list(&[known, unknown]);
        assert_eq!(formatted.len(), 2);
        assert_eq!(formatted[0], "/dev/ttyACM0 [Microchip] - MCP2221 USB-I2C/UART Combo");
        assert_eq!(formatted[1], "/dev/ttyUSB1 [VID:1234 PID:5678]");
    }
}
