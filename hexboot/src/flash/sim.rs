//! In-memory flash used by the emulator and the tests.

use log::trace;

use crate::error::{Error, Result};
use crate::flash::{BLANK, BYTES_PER_WORD, FlashGeometry, FlashMemory};

/// Simulated program memory backed by a byte array.
///
/// Writes store bytes as given; the simulation does not model bit-clearing,
/// so a missing erase shows up only in [`SimFlash::erases`].
#[derive(Debug, Clone)]
pub struct SimFlash {
    memory: Vec<u8>,
    geometry: FlashGeometry,
    erases: Vec<u32>,
    writes: usize,
}

impl SimFlash {
    /// Blank flash of `words` word addresses.
    pub fn new(words: u32, geometry: FlashGeometry) -> Self {
        Self::from_image(vec![BLANK; words as usize * BYTES_PER_WORD], geometry)
    }

    /// Flash initialised from an existing image.
    pub fn from_image(image: Vec<u8>, geometry: FlashGeometry) -> Self {
        Self {
            memory: image,
            geometry,
            erases: Vec::new(),
            writes: 0,
        }
    }

    /// Whole memory contents.
    pub fn image(&self) -> &[u8] {
        &self.memory
    }

    /// Consume the flash and return its contents.
    pub fn into_image(self) -> Vec<u8> {
        self.memory
    }

    /// Bytes stored at word `address`, `len` bytes long.
    pub fn bytes(&self, address: u32, len: usize) -> &[u8] {
        let start = address as usize * BYTES_PER_WORD;
        &self.memory[start..start + len]
    }

    /// Unit addresses erased so far, in order.
    pub fn erases(&self) -> &[u32] {
        &self.erases
    }

    /// Number of write operations performed.
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Size in words.
    #[allow(clippy::cast_possible_truncation)]
    pub fn words(&self) -> u32 {
        (self.memory.len() / BYTES_PER_WORD) as u32
    }

    fn range(&self, address: u32, len: usize) -> Result<std::ops::Range<usize>> {
        let start = address as usize * BYTES_PER_WORD;
        let end = start + len;
        if end > self.memory.len() {
            return Err(Error::Flash(format!(
                "access of {len} bytes at 0x{address:06X} is outside {} words",
                self.words()
            )));
        }
        Ok(start..end)
    }
}

impl FlashMemory for SimFlash {
    fn erase(&mut self, address: u32) -> Result<()> {
        if !self.geometry.is_unit_aligned(address) {
            return Err(Error::Flash(format!(
                "erase address 0x{address:06X} is not unit aligned"
            )));
        }
        let range = self.range(address, self.geometry.erase_unit_bytes())?;
        trace!("sim: erase unit 0x{address:06X}");
        self.memory[range].fill(BLANK);
        self.erases.push(address);
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let range = self.range(address, data.len())?;
        trace!("sim: write {} bytes at 0x{address:06X}", data.len());
        self.memory[range].copy_from_slice(data);
        self.writes += 1;
        Ok(())
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        let range = self.range(address, buf.len())?;
        buf.copy_from_slice(&self.memory[range]);
        Ok(())
    }
}
