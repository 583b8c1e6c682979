//! Flash program-memory abstraction.
//!
//! Addresses are word addresses: a hex record's byte address divided by two.
//! Each word address holds [`BYTES_PER_WORD`] bytes of image data.
//!
//! The loader only needs three primitives from the flash driver, which keeps
//! it independent of the actual NVM controller:
//!
//! ```text
//! erase(unit_base)          whole erase unit -> blank (0xFF)
//! write(address, bytes)     program bytes starting at a word address
//! read(address, buffer)     read back bytes starting at a word address
//! ```

mod sim;

pub use sim::SimFlash;

use crate::error::{Error, Result};

/// Bytes of image data stored per word address.
pub const BYTES_PER_WORD: usize = 2;

/// Largest erase unit the loader's scratch buffer can hold.
pub const MAX_ERASE_UNIT_BYTES: usize = 4096;

/// Value of an erased byte.
pub const BLANK: u8 = 0xFF;

/// Erase/write granularity of the program memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlashGeometry {
    /// Words per erase unit.
    pub erase_unit_words: u32,
    /// Words per write unit.
    pub write_unit_words: u32,
}

impl Default for FlashGeometry {
    /// PIC24/dsPIC33: 512-instruction pages, 64-instruction rows.
    fn default() -> Self {
        Self {
            erase_unit_words: 1024,
            write_unit_words: 128,
        }
    }
}

impl FlashGeometry {
    /// Create a geometry.
    pub const fn new(erase_unit_words: u32, write_unit_words: u32) -> Self {
        Self {
            erase_unit_words,
            write_unit_words,
        }
    }

    /// Check that the geometry is usable by the loader.
    pub fn validate(&self) -> Result<()> {
        if !self.erase_unit_words.is_power_of_two() || !self.write_unit_words.is_power_of_two() {
            return Err(Error::Config(format!(
                "flash units must be non-zero powers of two (erase {}, write {})",
                self.erase_unit_words, self.write_unit_words
            )));
        }
        if self.erase_unit_words % self.write_unit_words != 0 {
            return Err(Error::Config(format!(
                "erase unit ({} words) is not a multiple of the write unit ({} words)",
                self.erase_unit_words, self.write_unit_words
            )));
        }
        if self.erase_unit_bytes() > MAX_ERASE_UNIT_BYTES {
            return Err(Error::Config(format!(
                "erase unit of {} bytes exceeds the {MAX_ERASE_UNIT_BYTES}-byte scratch buffer",
                self.erase_unit_bytes()
            )));
        }
        Ok(())
    }

    /// Whether erases must be tracked separately from writes.
    pub fn needs_erase_tracking(&self) -> bool {
        self.erase_unit_words != self.write_unit_words
    }

    /// Base address of the erase unit containing `address`.
    pub fn unit_base(&self, address: u32) -> u32 {
        address & !(self.erase_unit_words - 1)
    }

    /// Whether `address` is the first word of an erase unit.
    pub fn is_unit_aligned(&self, address: u32) -> bool {
        self.unit_base(address) == address
    }

    /// Size of one erase unit in bytes.
    pub fn erase_unit_bytes(&self) -> usize {
        self.erase_unit_words as usize * BYTES_PER_WORD
    }
}

/// Flash program-memory driver used by the loader.
pub trait FlashMemory {
    /// Erase the unit starting at `address` (unit aligned).
    fn erase(&mut self, address: u32) -> Result<()>;

    /// Program `data` starting at word `address`.
    fn write(&mut self, address: u32, data: &[u8]) -> Result<()>;

    /// Read `buf.len()` bytes starting at word `address`.
    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<()>;
}

impl<F: FlashMemory + ?Sized> FlashMemory for &mut F {
    fn erase(&mut self, address: u32) -> Result<()> {
        (**self).erase(address)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        (**self).write(address, data)
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        (**self).read(address, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_geometry_is_valid() {
        let geometry = FlashGeometry::default();
        assert!(geometry.validate().is_ok());
        assert!(geometry.needs_erase_tracking());
        assert_eq!(geometry.erase_unit_bytes(), 2048);
    }

    #[test]
    fn test_unit_base_and_alignment() {
        let geometry = FlashGeometry::new(64, 16);

        assert_eq!(geometry.unit_base(0), 0);
        assert_eq!(geometry.unit_base(63), 0);
        assert_eq!(geometry.unit_base(64), 64);
        assert_eq!(geometry.unit_base(130), 128);
        assert!(geometry.is_unit_aligned(192));
        assert!(!geometry.is_unit_aligned(193));
    }

    #[test]
    fn test_validate_rejects_bad_geometry() {
        assert!(matches!(
            FlashGeometry::new(0, 16).validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            FlashGeometry::new(96, 32).validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            FlashGeometry::new(16, 64).validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            FlashGeometry::new(4096, 64).validate(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_equal_units_need_no_tracking() {
        assert!(!FlashGeometry::new(32, 32).needs_erase_tracking());
    }
}
