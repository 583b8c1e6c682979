//! Erase-before-write bookkeeping.
//!
//! When the erase unit is larger than the write unit a unit must be erased
//! exactly once, before the first write into it, and never again while the
//! image is streaming into it. The session's `next_address` identifies the
//! open unit; a write entering a later unit at its base erases that unit.
//!
//! Units shared with the loader region are handled by read-modify-write so
//! the loader words in them survive. Once such a unit has been erased, the
//! scratch copy stays authoritative until the rewrite succeeds; a retried
//! line merges into it instead of reading the blank unit back.

use log::debug;

use crate::error::Result;
use crate::flash::{BYTES_PER_WORD, FlashGeometry, FlashMemory, MAX_ERASE_UNIT_BYTES};
use crate::loader::config::LoaderConfig;
use crate::loader::session::{Session, State};

#[allow(clippy::cast_possible_truncation)]
fn words(bytes: usize) -> u32 {
    bytes.div_ceil(BYTES_PER_WORD) as u32
}

pub(crate) struct Reconciler {
    geometry: FlashGeometry,
    shared_units: [Option<u32>; 2],
    scratch: [u8; MAX_ERASE_UNIT_BYTES],
    /// Shared unit whose contents live only in `scratch`.
    pending: Option<u32>,
}

impl Reconciler {
    pub(crate) fn new(config: &LoaderConfig) -> Self {
        Self {
            geometry: config.geometry,
            shared_units: config.shared_units(),
            scratch: [0; MAX_ERASE_UNIT_BYTES],
            pending: None,
        }
    }

    /// Program `data` at word `address`, erasing as needed.
    ///
    /// Returns the number of erase operations issued. `next_address` only
    /// advances past chunks that were programmed successfully.
    pub(crate) fn program<F: FlashMemory + ?Sized>(
        &mut self,
        flash: &mut F,
        session: &mut Session,
        address: u32,
        data: &[u8],
    ) -> Result<u32> {
        if !self.geometry.needs_erase_tracking() {
            session.enter(State::Writing);
            flash.write(address, data)?;
            session.next_address = Some(address + words(data.len()));
            return Ok(0);
        }

        let mut erased = 0;
        let mut chunk_address = address;
        let mut remaining = data;

        while !remaining.is_empty() {
            let unit_end = self.geometry.unit_base(chunk_address) + self.geometry.erase_unit_words;
            let room = (unit_end - chunk_address) as usize * BYTES_PER_WORD;
            let (chunk, rest) = remaining.split_at(room.min(remaining.len()));

            erased += self.program_chunk(flash, session, chunk_address, chunk)?;

            chunk_address = unit_end;
            remaining = rest;
        }

        Ok(erased)
    }

    /// Program a chunk lying inside a single erase unit.
    fn program_chunk<F: FlashMemory + ?Sized>(
        &mut self,
        flash: &mut F,
        session: &mut Session,
        address: u32,
        chunk: &[u8],
    ) -> Result<u32> {
        let base = self.geometry.unit_base(address);
        let mut erased = 0;

        if self.shared_units.contains(&Some(base)) {
            self.read_modify_write(flash, session, base, address, chunk)?;
            erased = 1;
        } else {
            if self.enters_new_unit(session.next_address, address) {
                if self.geometry.is_unit_aligned(address) {
                    session.enter(State::Erasing);
                    debug!("Erasing unit 0x{base:06X}");
                    flash.erase(base)?;
                    erased = 1;
                } else {
                    debug!("Entering unit 0x{base:06X} mid-way at 0x{address:06X}, not erased");
                }
            }

            session.enter(State::Writing);
            flash.write(address, chunk)?;
        }

        session.next_address = Some(address + words(chunk.len()));
        Ok(erased)
    }

    /// Whether `address` lies at or beyond the boundary after the open unit.
    fn enters_new_unit(&self, next_address: Option<u32>, address: u32) -> bool {
        match next_address {
            None => true,
            Some(next) => {
                let open_unit = self.geometry.unit_base(next.saturating_sub(1));
                address >= open_unit + self.geometry.erase_unit_words
            },
        }
    }

    fn read_modify_write<F: FlashMemory + ?Sized>(
        &mut self,
        flash: &mut F,
        session: &mut Session,
        base: u32,
        address: u32,
        chunk: &[u8],
    ) -> Result<()> {
        let unit_len = self.geometry.erase_unit_bytes();
        let offset = (address - base) as usize * BYTES_PER_WORD;

        match self.pending {
            Some(pending) if pending == base => {
                debug!("Merging into pending copy of shared unit 0x{base:06X}");
            },
            Some(other) => {
                // The other shared unit is still blank; restore it first.
                self.rewrite(flash, session, other)?;
                flash.read(base, &mut self.scratch[..unit_len])?;
            },
            None => {
                debug!("Read-modify-write of shared unit 0x{base:06X}");
                flash.read(base, &mut self.scratch[..unit_len])?;
            },
        }
        self.scratch[offset..offset + chunk.len()].copy_from_slice(chunk);

        self.rewrite(flash, session, base)
    }

    /// Erase a shared unit and program it from `scratch`.
    fn rewrite<F: FlashMemory + ?Sized>(
        &mut self,
        flash: &mut F,
        session: &mut Session,
        base: u32,
    ) -> Result<()> {
        let unit = &self.scratch[..self.geometry.erase_unit_bytes()];

        session.enter(State::Erasing);
        self.pending = Some(base);
        flash.erase(base)?;

        session.enter(State::Writing);
        flash.write(base, unit)?;
        self.pending = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::{BLANK, SimFlash};
    use crate::loader::config::LoaderRegion;
    use crate::loader::mock::FailingFlash;

    fn config() -> LoaderConfig {
        LoaderConfig {
            geometry: FlashGeometry::new(64, 16),
            region: LoaderRegion::new(0x3A0, 0x3FF),
            program_words: 0x400,
            redundant: false,
        }
    }

    fn zeroed_flash(config: &LoaderConfig) -> SimFlash {
        SimFlash::from_image(
            vec![0u8; config.program_words as usize * BYTES_PER_WORD],
            config.geometry,
        )
    }

    #[test]
    fn test_first_write_at_unit_base_erases() {
        let config = config();
        let mut flash = zeroed_flash(&config);
        let mut session = Session::new();
        let mut reconciler = Reconciler::new(&config);

        let erased = reconciler
            .program(&mut flash, &mut session, 0x40, &[1; 16])
            .unwrap();

        assert_eq!(erased, 1);
        assert_eq!(flash.erases(), &[0x40]);
        assert_eq!(session.next_address(), Some(0x48));
        assert_eq!(flash.bytes(0x40, 16), &[1; 16]);
        assert!(flash.bytes(0x48, 112).iter().all(|b| *b == BLANK));
    }

    #[test]
    fn test_two_writes_in_one_unit_erase_once() {
        let config = config();
        let mut flash = zeroed_flash(&config);
        let mut session = Session::new();
        let mut reconciler = Reconciler::new(&config);

        reconciler
            .program(&mut flash, &mut session, 0x40, &[0xA1; 8])
            .unwrap();
        reconciler
            .program(&mut flash, &mut session, 0x50, &[0xB2; 8])
            .unwrap();

        assert_eq!(flash.erases(), &[0x40]);
        assert_eq!(flash.bytes(0x40, 8), &[0xA1; 8]);
        assert_eq!(flash.bytes(0x50, 8), &[0xB2; 8]);
        // Between the two payloads the unit reads back erased.
        assert!(flash.bytes(0x44, 24).iter().all(|b| *b == BLANK));
        // Neighbouring units are untouched.
        assert!(flash.bytes(0x00, 128).iter().all(|b| *b == 0));
        assert!(flash.bytes(0x80, 128).iter().all(|b| *b == 0));
    }

    #[test]
    fn test_contiguous_stream_erases_each_unit_once() {
        let config = config();
        let mut flash = zeroed_flash(&config);
        let mut session = Session::new();
        let mut reconciler = Reconciler::new(&config);

        // 9 records of 16 bytes (8 words): one full unit plus one record.
        for i in 0..9u32 {
            reconciler
                .program(&mut flash, &mut session, i * 8, &[i as u8; 16])
                .unwrap();
        }

        assert_eq!(flash.erases(), &[0x00, 0x40]);
        assert_eq!(flash.bytes(0x40, 16), &[8; 16]);
    }

    #[test]
    fn test_write_spanning_boundary_erases_next_unit() {
        let config = config();
        let mut flash = zeroed_flash(&config);
        let mut session = Session::new();
        let mut reconciler = Reconciler::new(&config);

        reconciler
            .program(&mut flash, &mut session, 0x00, &[1; 16])
            .unwrap();
        let erased = reconciler
            .program(&mut flash, &mut session, 0x38, &[2; 32])
            .unwrap();

        assert_eq!(erased, 1);
        assert_eq!(flash.erases(), &[0x00, 0x40]);
        assert_eq!(flash.bytes(0x38, 32), &[2; 32]);
        assert_eq!(session.next_address(), Some(0x48));
    }

    #[test]
    fn test_unaligned_entry_does_not_erase() {
        let config = config();
        let mut flash = zeroed_flash(&config);
        let mut session = Session::new();
        let mut reconciler = Reconciler::new(&config);

        reconciler
            .program(&mut flash, &mut session, 0x44, &[3; 8])
            .unwrap();

        assert!(flash.erases().is_empty());
        assert_eq!(flash.bytes(0x44, 8), &[3; 8]);
    }

    #[test]
    fn test_going_back_into_earlier_unit_does_not_erase() {
        let config = config();
        let mut flash = zeroed_flash(&config);
        let mut session = Session::new();
        let mut reconciler = Reconciler::new(&config);

        reconciler
            .program(&mut flash, &mut session, 0x80, &[4; 8])
            .unwrap();
        reconciler
            .program(&mut flash, &mut session, 0x40, &[5; 8])
            .unwrap();

        assert_eq!(flash.erases(), &[0x80]);
    }

    #[test]
    fn test_equal_granularity_never_erases() {
        let config = LoaderConfig {
            geometry: FlashGeometry::new(16, 16),
            ..config()
        };
        let mut flash = zeroed_flash(&config);
        let mut session = Session::new();
        let mut reconciler = Reconciler::new(&config);

        reconciler
            .program(&mut flash, &mut session, 0x00, &[6; 64])
            .unwrap();

        assert!(flash.erases().is_empty());
        assert_eq!(flash.bytes(0x00, 64), &[6; 64]);
        assert_eq!(session.next_address(), Some(0x20));
    }

    #[test]
    fn test_shared_unit_is_read_modify_written() {
        let config = config();
        let mut flash = zeroed_flash(&config);
        // Loader code occupies 0x3A0..=0x3FF.
        flash.write(0x3A0, &[0xAA; 0x60 * 2]).unwrap();
        let mut session = Session::new();
        let mut reconciler = Reconciler::new(&config);

        let erased = reconciler
            .program(&mut flash, &mut session, 0x390, &[7; 8])
            .unwrap();

        assert_eq!(erased, 1);
        assert_eq!(flash.erases(), &[0x380]);
        assert_eq!(flash.bytes(0x390, 8), &[7; 8]);
        assert!(flash.bytes(0x3A0, 0x60 * 2).iter().all(|b| *b == 0xAA));
        assert!(flash.bytes(0x380, 0x20).iter().all(|b| *b == 0));
    }

    #[test]
    fn test_shared_unit_survives_failed_rewrite() {
        let config = config();
        let mut inner = zeroed_flash(&config);
        inner.write(0x3A0, &[0xAA; 0x60 * 2]).unwrap();
        let mut flash = FailingFlash {
            inner,
            fail_erase: false,
            fail_write: true,
        };
        let mut session = Session::new();
        let mut reconciler = Reconciler::new(&config);

        assert!(
            reconciler
                .program(&mut flash, &mut session, 0x390, &[7; 8])
                .is_err()
        );
        // The unit was erased before the write failed.
        assert!(flash.inner.bytes(0x3A0, 0x40).iter().all(|b| *b == BLANK));

        // The host resends the same line.
        flash.fail_write = false;
        reconciler
            .program(&mut flash, &mut session, 0x390, &[7; 8])
            .unwrap();

        assert_eq!(flash.inner.erases(), &[0x380, 0x380]);
        assert_eq!(flash.inner.bytes(0x390, 8), &[7; 8]);
        assert!(flash.inner.bytes(0x3A0, 0x60 * 2).iter().all(|b| *b == 0xAA));
        assert!(flash.inner.bytes(0x380, 0x20).iter().all(|b| *b == 0));
    }

    #[test]
    fn test_failed_write_does_not_advance() {
        let config = config();
        let mut flash = FailingFlash {
            inner: zeroed_flash(&config),
            fail_erase: false,
            fail_write: true,
        };
        let mut session = Session::new();
        let mut reconciler = Reconciler::new(&config);

        assert!(
            reconciler
                .program(&mut flash, &mut session, 0x00, &[1; 16])
                .is_err()
        );
        assert_eq!(session.next_address(), None);
    }
}
