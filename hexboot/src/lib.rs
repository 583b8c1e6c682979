//! # hexboot
//!
//! A serial loader for word-addressed flash microcontrollers, and the host
//! side that feeds it.
//!
//! The loader receives an image as ASCII hex records, one per line, and
//! programs it into flash with an in-band XON/XOFF/ACK handshake:
//!
//! - [`protocol::hex`]: record parsing and formatting
//! - [`loader`]: the device-side state machine, line reception and
//!   erase-before-write reconciliation
//! - [`flash`]: flash geometry, the [`FlashMemory`] trait and a simulated
//!   part
//! - [`protocol::sender`]: the host-side sender with retries
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use hexboot::{HexSender, NativePort, SerialConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = std::fs::read_to_string("app.hex")?;
//!     let mut port = NativePort::open(&SerialConfig::new("/dev/ttyUSB0", 115_200))?;
//!
//!     let summary = HexSender::new(&mut port).transfer(&image, |done, total| {
//!         println!("{done}/{total}");
//!     })?;
//!     println!("{} lines, {} retries", summary.lines_sent, summary.retries);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod device;
pub mod error;
pub mod flash;
pub mod loader;
pub mod port;
pub mod protocol;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Only the first
/// registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    device::{DetectedPort, DeviceKind},
    error::{Error, Result},
    flash::{FlashGeometry, FlashMemory, SimFlash},
    loader::{
        DeviceControl, Loader, LoaderConfig, LoaderRegion, Session, SessionStats, State,
        StreamTransport, Transport,
    },
    port::{Port, SerialConfig},
    protocol::{HexError, HexRecord, HexSender, RecordType, SenderConfig, TransferSummary},
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_unset_is_false() {
        // Unit tests never register a checker; see tests/interrupt.rs.
        assert!(!is_interrupted_requested());
    }
}
