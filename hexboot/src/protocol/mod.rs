//! Wire protocol: hex record codec, control bytes, and the host-side sender.
//!
//! The loader speaks ASCII hex records, one per line, each terminated by a
//! carriage return. Flow control is in-band and stop-and-wait:
//!
//! ```text
//!  host                         loader
//!   | ":10000000...\r"  ------>   |
//!   |                   <------   | XOFF        (line received)
//!   |                             |  ... parse, erase, write ...
//!   |                   <------   | ACK         (only if the line was accepted)
//!   |                   <------   | XON         (always)
//! ```

pub mod hex;
pub mod sender;

/// Control bytes exchanged between host and loader.
pub mod control {
    /// Resume transmission.
    pub const XON: u8 = 0x11;
    /// Suspend transmission.
    pub const XOFF: u8 = 0x13;
    /// Line accepted.
    pub const ACK: u8 = 0x06;
    /// Line terminator.
    pub const CR: u8 = 0x0D;
    /// Line feed, tolerated before a line.
    pub const LF: u8 = 0x0A;
    /// First character of every hex record.
    pub const START_CODE: u8 = b':';
}

// Re-export common types
pub use hex::{HexError, HexRecord, RecordType};
pub use sender::{HexSender, SenderConfig, TransferSummary};
