//! Test doubles for the loader collaborators.

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::flash::{FlashMemory, SimFlash};
use crate::loader::transport::Transport;

/// Transport replaying a fixed script and recording what the loader sends.
pub(crate) struct ScriptTransport {
    rx: VecDeque<u8>,
    pub(crate) tx: Vec<u8>,
}

impl ScriptTransport {
    pub(crate) fn new(script: &[u8]) -> Self {
        Self {
            rx: script.iter().copied().collect(),
            tx: Vec::new(),
        }
    }

    /// Script built from lines, each terminated by a carriage return.
    pub(crate) fn lines(lines: &[&str]) -> Self {
        let mut script = Vec::new();
        for line in lines {
            script.extend_from_slice(line.as_bytes());
            script.push(b'\r');
        }
        Self::new(&script)
    }

    pub(crate) fn remaining(&self) -> usize {
        self.rx.len()
    }
}

impl Transport for ScriptTransport {
    fn get_byte(&mut self) -> Result<u8> {
        self.rx.pop_front().ok_or(Error::Disconnected)
    }

    fn put_byte(&mut self, byte: u8) -> Result<()> {
        self.tx.push(byte);
        Ok(())
    }
}

/// Flash whose erase or write fails on demand.
pub(crate) struct FailingFlash {
    pub(crate) inner: SimFlash,
    pub(crate) fail_erase: bool,
    pub(crate) fail_write: bool,
}

impl FlashMemory for FailingFlash {
    fn erase(&mut self, address: u32) -> Result<()> {
        if self.fail_erase {
            return Err(Error::Flash(format!("erase timeout at 0x{address:06X}")));
        }
        self.inner.erase(address)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        if self.fail_write {
            return Err(Error::Flash(format!("verify failed at 0x{address:06X}")));
        }
        self.inner.write(address, data)
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        self.inner.read(address, buf)
    }
}
