//! Device-side loader.
//!
//! [`Loader`] receives hex records over a [`Transport`], programs them into
//! a [`FlashMemory`] and answers with the XOFF/ACK/XON handshake. On the end
//! of file record it acknowledges twice and hands control to the
//! application through [`DeviceControl::reset`].
//!
//! Data records overlapping the [`LoaderRegion`] are acknowledged but never
//! written, so a full image that includes the loader itself can be sent
//! unchanged.

mod config;
mod line;
#[cfg(test)]
mod mock;
mod reconcile;
mod session;
mod transport;

pub use config::{LoaderConfig, LoaderRegion};
pub use line::{
    LINE_CAPACITY, LineBuffer, LineFault, LineReceiver, LineStrategy, Received, RedundantLine,
    SingleLine,
};
pub use session::{Session, SessionStats, State};
pub use transport::{DeviceControl, StreamTransport, Transport};

use byteorder::{BigEndian, ByteOrder};
use log::{debug, info, trace, warn};
use thiserror::Error;

use crate::error::Result;
use crate::flash::{BYTES_PER_WORD, FlashMemory};
use crate::protocol::control::{ACK, XOFF, XON};
use crate::protocol::{HexError, HexRecord, RecordType};
use reconcile::Reconciler;

/// Reason a line is not acknowledged.
#[derive(Debug, Error)]
enum Rejection {
    #[error(transparent)]
    Malformed(#[from] HexError),
    #[error(transparent)]
    Line(#[from] LineFault),
}

/// What to answer for a dispatched line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Accept,
    Reject,
    Finish,
}

/// Serial hex-record loader.
pub struct Loader<T: Transport, F: FlashMemory> {
    transport: T,
    flash: F,
    config: LoaderConfig,
    lines: LineReceiver,
    reconciler: Reconciler,
    session: Session,
}

impl<T: Transport, F: FlashMemory> Loader<T, F> {
    /// Create a loader after validating `config`.
    pub fn new(transport: T, flash: F, config: LoaderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            flash,
            lines: LineReceiver::for_mode(config.redundant),
            reconciler: Reconciler::new(&config),
            session: Session::new(),
            config,
        })
    }

    /// Current session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Flash being programmed.
    pub fn flash(&self) -> &F {
        &self.flash
    }

    /// Mutable access to the flash.
    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Take the loader apart.
    pub fn into_parts(self) -> (T, F) {
        (self.transport, self.flash)
    }

    /// Run one session to completion, then reset the device.
    ///
    /// Starts from a fresh session, processes lines until the end of file
    /// record and returns the session counters. Transport errors end the
    /// session early without a reset.
    pub fn run<D: DeviceControl + ?Sized>(&mut self, device: &mut D) -> Result<SessionStats> {
        self.session = Session::new();
        info!(
            "Loader ready ({} mode)",
            if self.lines.is_redundant() {
                "redundant"
            } else {
                "single-line"
            }
        );

        while self.step()? != State::Resetting {}

        let stats = self.session.stats;
        info!(
            "Image loaded: {} records written, {} units erased, {} lines rejected",
            stats.records_written, stats.units_erased, stats.rejected
        );
        info!("Resetting device");
        device.reset()?;
        Ok(stats)
    }

    /// Receive and process one line.
    ///
    /// Returns the state after the line: [`State::Resetting`] once the end of
    /// file record was acknowledged, [`State::Acknowledging`] otherwise.
    pub fn step(&mut self) -> Result<State> {
        self.session.enter(State::AwaitingLine);
        let parsed = match self.lines.receive(&mut self.transport)? {
            Received::Line(line) => HexRecord::parse(line).map_err(Rejection::from),
            Received::Faulty(fault) => Err(Rejection::from(fault)),
        };
        self.transport.put_byte(XOFF)?;
        self.session.stats.lines += 1;

        self.session.enter(State::Validating);
        let verdict = match parsed {
            Ok(Some(record)) => {
                self.session.enter(State::Dispatching);
                self.dispatch(&record)
            },
            Ok(None) => {
                trace!("Ignoring non-record line");
                Verdict::Accept
            },
            Err(rejection) => {
                warn!("Rejecting line {}: {rejection}", self.session.stats.lines);
                Verdict::Reject
            },
        };

        self.session.enter(State::Acknowledging);
        if verdict == Verdict::Reject {
            self.session.stats.rejected += 1;
        } else {
            self.session.stats.acknowledged += 1;
            self.transport.put_byte(ACK)?;
        }
        self.transport.put_byte(XON)?;

        if verdict == Verdict::Finish {
            // Second handshake tells the host the loader is about to reset.
            self.transport.put_byte(ACK)?;
            self.transport.put_byte(XON)?;
            self.session.enter(State::Resetting);
        }

        Ok(self.session.state())
    }

    fn dispatch(&mut self, record: &HexRecord) -> Verdict {
        match record.record_type {
            RecordType::Data => self.write_data(record),
            RecordType::EndOfFile => {
                debug!("End of file record");
                Verdict::Finish
            },
            RecordType::ExtendedAddress => {
                let payload = record.payload();
                if payload.len() != 2 {
                    warn!(
                        "Extended address record carries {} bytes, expected 2",
                        payload.len()
                    );
                    return Verdict::Reject;
                }
                let upper = BigEndian::read_u16(payload);
                debug!("Extended address 0x{upper:04X}");
                self.session.extended_address = upper;
                Verdict::Accept
            },
            RecordType::Other(code) => {
                debug!("Ignoring record type 0x{code:02X}");
                Verdict::Accept
            },
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_data(&mut self, record: &HexRecord) -> Verdict {
        let data = record.payload();
        if data.is_empty() {
            return Verdict::Accept;
        }

        let linear = (u32::from(self.session.extended_address) << 16) | u32::from(record.address);
        let address = linear / BYTES_PER_WORD as u32;
        if linear % BYTES_PER_WORD as u32 != 0 {
            debug!("Odd byte address 0x{linear:06X} truncated to word 0x{address:06X}");
        }
        let end = address + data.len().div_ceil(BYTES_PER_WORD) as u32;

        if self.config.region.overlaps(address, end) {
            debug!("Skipping 0x{address:06X}..0x{end:06X}: loader region");
            self.session.stats.skipped_protected += 1;
            return Verdict::Accept;
        }
        if end > self.config.program_words {
            debug!("Skipping 0x{address:06X}..0x{end:06X}: beyond program memory");
            self.session.stats.skipped_out_of_range += 1;
            return Verdict::Accept;
        }

        match self
            .reconciler
            .program(&mut self.flash, &mut self.session, address, data)
        {
            Ok(erased) => {
                let stats = &mut self.session.stats;
                stats.records_written += 1;
                stats.bytes_written += data.len() as u64;
                stats.units_erased += erased;
                Verdict::Accept
            },
            Err(e) => {
                warn!("Programming 0x{address:06X} failed: {e}");
                Verdict::Reject
            },
        }
    }
}
