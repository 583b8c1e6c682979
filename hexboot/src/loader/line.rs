//! Line reception: fixed buffers and the single/redundant strategies.

use log::{trace, warn};
use thiserror::Error;

use crate::error::Result;
use crate::loader::transport::Transport;
use crate::protocol::control::{CR, LF};

/// Characters a line buffer holds, excluding the carriage return.
pub const LINE_CAPACITY: usize = 64;

/// Fixed-size buffer for one received line.
#[derive(Clone)]
pub struct LineBuffer {
    bytes: [u8; LINE_CAPACITY],
    len: usize,
    overflowed: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    /// Empty buffer.
    pub const fn new() -> Self {
        Self {
            bytes: [0; LINE_CAPACITY],
            len: 0,
            overflowed: false,
        }
    }

    /// Receive bytes up to and including the next carriage return.
    ///
    /// A line feed left over from a CR-LF sender is skipped when it arrives
    /// first. Characters beyond [`LINE_CAPACITY`] are drained and dropped,
    /// and the line is marked as overflowed.
    pub fn receive<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<()> {
        self.len = 0;
        self.overflowed = false;

        loop {
            let byte = transport.get_byte()?;
            match byte {
                CR => break,
                LF if self.len == 0 && !self.overflowed => {},
                _ if self.len < LINE_CAPACITY => {
                    self.bytes[self.len] = byte;
                    self.len += 1;
                },
                _ => self.overflowed = true,
            }
        }

        trace!(
            "line received: {} bytes{}",
            self.len,
            if self.overflowed { " (overflowed)" } else { "" }
        );
        Ok(())
    }

    /// Received characters, without the terminator.
    pub fn content(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Whether characters were dropped.
    pub fn is_overflowed(&self) -> bool {
        self.overflowed
    }
}

/// Why a received line cannot be processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LineFault {
    /// The line did not fit in the buffer.
    #[error("line longer than {LINE_CAPACITY} characters")]
    Overflow,
    /// The two copies of a redundant transfer differ.
    #[error("redundant copies differ")]
    Mismatch,
}

/// Outcome of receiving one logical line.
#[derive(Debug, PartialEq, Eq)]
pub enum Received<'a> {
    /// Line content, ready for parsing.
    Line(&'a [u8]),
    /// Line must be rejected.
    Faulty(LineFault),
}

/// How one logical line is taken off the wire.
pub trait LineStrategy {
    /// Block until one logical line has been received.
    fn receive<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<Received<'_>>;
}

/// Every line is sent once.
#[derive(Default)]
pub struct SingleLine {
    buffer: LineBuffer,
}

impl LineStrategy for SingleLine {
    fn receive<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<Received<'_>> {
        self.buffer.receive(transport)?;
        if self.buffer.is_overflowed() {
            return Ok(Received::Faulty(LineFault::Overflow));
        }
        Ok(Received::Line(self.buffer.content()))
    }
}

/// Every line is sent twice and both copies must agree.
#[derive(Default)]
pub struct RedundantLine {
    first: LineBuffer,
    second: LineBuffer,
}

impl LineStrategy for RedundantLine {
    fn receive<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<Received<'_>> {
        self.first.receive(transport)?;
        self.second.receive(transport)?;

        if self.first.is_overflowed() || self.second.is_overflowed() {
            return Ok(Received::Faulty(LineFault::Overflow));
        }
        if self.first.content() != self.second.content() {
            warn!("redundant copies differ, rejecting line");
            return Ok(Received::Faulty(LineFault::Mismatch));
        }
        Ok(Received::Line(self.first.content()))
    }
}

/// Line strategy selected by configuration.
pub enum LineReceiver {
    /// One copy per line.
    Single(SingleLine),
    /// Two matching copies per line.
    Redundant(RedundantLine),
}

impl LineReceiver {
    /// Strategy for the given mode.
    pub fn for_mode(redundant: bool) -> Self {
        if redundant {
            Self::Redundant(RedundantLine::default())
        } else {
            Self::Single(SingleLine::default())
        }
    }

    /// Whether lines are received twice.
    pub fn is_redundant(&self) -> bool {
        matches!(self, Self::Redundant(_))
    }
}

impl LineStrategy for LineReceiver {
    fn receive<T: Transport + ?Sized>(&mut self, transport: &mut T) -> Result<Received<'_>> {
        match self {
            Self::Single(strategy) => strategy.receive(transport),
            Self::Redundant(strategy) => strategy.receive(transport),
        }
    }
}
