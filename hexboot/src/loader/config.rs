//! Loader configuration: flash geometry and the protected loader region.

use crate::error::{Error, Result};
use crate::flash::FlashGeometry;

/// Word-address range holding the loader itself (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LoaderRegion {
    /// First word of the loader.
    pub start: u32,
    /// Last word of the loader.
    pub end: u32,
}

impl LoaderRegion {
    /// Create a region from its first and last word.
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Whether the half-open range `start..end` touches the loader.
    pub fn overlaps(&self, start: u32, end: u32) -> bool {
        start <= self.end && end > self.start
    }
}

/// Static configuration of a [`Loader`](crate::loader::Loader).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LoaderConfig {
    /// Erase/write granularity.
    pub geometry: FlashGeometry,
    /// Resident loader code, never written.
    pub region: LoaderRegion,
    /// Size of program memory in words; data beyond it is skipped.
    pub program_words: u32,
    /// Receive every line twice and require both copies to match.
    pub redundant: bool,
}

impl Default for LoaderConfig {
    /// 128K-word part with a 3K-word loader at the top of program memory.
    fn default() -> Self {
        Self {
            geometry: FlashGeometry::default(),
            region: LoaderRegion::new(0x01_4C00, 0x01_57FF),
            program_words: 0x01_5800,
            redundant: false,
        }
    }
}

impl LoaderConfig {
    /// Check that the configuration is consistent.
    pub fn validate(&self) -> Result<()> {
        self.geometry.validate()?;

        if self.region.start > self.region.end {
            return Err(Error::Config(format!(
                "loader region start 0x{:06X} is above its end 0x{:06X}",
                self.region.start, self.region.end
            )));
        }
        if self.region.end >= self.program_words {
            return Err(Error::Config(format!(
                "loader region end 0x{:06X} is outside program memory (0x{:06X} words)",
                self.region.end, self.program_words
            )));
        }
        Ok(())
    }

    /// Erase units shared by application code and the loader region.
    ///
    /// These are the units around an unaligned region edge. Erasing them
    /// plainly would wipe part of the loader, so they are only ever
    /// rewritten through read-modify-write.
    pub fn shared_units(&self) -> [Option<u32>; 2] {
        if !self.geometry.needs_erase_tracking() {
            return [None, None];
        }

        let below = (!self.geometry.is_unit_aligned(self.region.start))
            .then(|| self.geometry.unit_base(self.region.start));

        let above_start = self.region.end + 1;
        let above = (above_start < self.program_words
            && !self.geometry.is_unit_aligned(above_start))
        .then(|| self.geometry.unit_base(above_start));

        [below, above]
    }
}
