//! Per-session state of the loader.

use log::trace;

/// Loader state machine.
///
/// ```text
/// AwaitingLine -> Validating -> Dispatching -> (Erasing) -> Writing -> Acknowledging
///      ^                                                                     |
///      +---------------------------------------------------------------------+
///
/// Dispatching --(end of file)--> Acknowledging -> Resetting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    /// Receiving a line.
    #[default]
    AwaitingLine,
    /// Checking the line and its record.
    Validating,
    /// Routing the record by type.
    Dispatching,
    /// Erasing a flash unit.
    Erasing,
    /// Programming flash.
    Writing,
    /// Sending ACK/XON.
    Acknowledging,
    /// Image complete; handing over to the application.
    Resetting,
}

/// Counters collected during one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    /// Lines received.
    pub lines: u32,
    /// Lines acknowledged.
    pub acknowledged: u32,
    /// Lines rejected (no ACK sent).
    pub rejected: u32,
    /// Data records programmed.
    pub records_written: u32,
    /// Payload bytes programmed.
    pub bytes_written: u64,
    /// Erase operations issued.
    pub units_erased: u32,
    /// Data records skipped because they touch the loader region.
    pub skipped_protected: u32,
    /// Data records skipped because they lie beyond program memory.
    pub skipped_out_of_range: u32,
}

/// Mutable context of one load session.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub(crate) extended_address: u16,
    pub(crate) next_address: Option<u32>,
    pub(crate) stats: SessionStats,
    state: State,
}

impl Session {
    /// Fresh session: extended address 0, nothing written yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Upper 16 bits of the linear address.
    pub fn extended_address(&self) -> u16 {
        self.extended_address
    }

    /// Word following the last successful write.
    pub fn next_address(&self) -> Option<u32> {
        self.next_address
    }

    /// Current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Counters so far.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub(crate) fn enter(&mut self, state: State) {
        if self.state != state {
            trace!("{:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }
}
