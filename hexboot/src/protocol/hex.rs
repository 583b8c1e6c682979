//! Hex record codec.
//!
//! ## Record format
//!
//! ```text
//! +---+-------+---------+------+-----------------+----------+
//! | : | COUNT | ADDRESS | TYPE |      DATA       | CHECKSUM |
//! +---+-------+---------+------+-----------------+----------+
//! | 1 |   2   |    4    |  2   |    2 * COUNT    |    2     |
//! +---+-------+---------+------+-----------------+----------+
//! ```
//!
//! Every field is upper-case ASCII hex. The checksum is the two's complement
//! of the 8-bit sum of all preceding bytes, so a valid record sums to zero.
//! Lower-case digits are rejected: the loader accepts exactly what the
//! generator tools emit.

use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use crate::protocol::control::START_CODE;

/// Largest payload a single record can carry.
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// Characters before the payload: start code, count, address, type.
const HEADER_CHARS: usize = 1 + 2 + 4 + 2;

/// Shortest valid record (no payload).
const MIN_RECORD_CHARS: usize = HEADER_CHARS + 2;

/// Record parse/build errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HexError {
    /// Character that is not `0-9` or `A-F`.
    #[error("invalid hex digit 0x{found:02X} at offset {offset}")]
    InvalidDigit {
        /// Offset of the character within the line.
        offset: usize,
        /// The offending character.
        found: u8,
    },

    /// Line shorter than the smallest record.
    #[error("record too short ({0} characters)")]
    TooShort(usize),

    /// Line length disagrees with the declared byte count.
    #[error("record declares {declared} data bytes but is {actual} characters long")]
    LengthMismatch {
        /// Declared byte count.
        declared: u8,
        /// Actual line length.
        actual: usize,
    },

    /// Stored checksum differs from the computed one.
    #[error("checksum mismatch: expected 0x{expected:02X}, found 0x{found:02X}")]
    ChecksumMismatch {
        /// Checksum computed from the record bytes.
        expected: u8,
        /// Checksum stored in the line.
        found: u8,
    },

    /// Payload longer than [`MAX_PAYLOAD`].
    #[error("payload of {0} bytes does not fit in a record")]
    PayloadTooLong(usize),
}

/// Record type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    /// Program data (0x00).
    Data,
    /// End of image (0x01).
    EndOfFile,
    /// Upper 16 bits of the linear address (0x04).
    ExtendedAddress,
    /// Any other type; accepted and ignored by the loader.
    Other(u8),
}

impl RecordType {
    /// Wire code of this record type.
    pub fn code(self) -> u8 {
        match self {
            Self::Data => 0x00,
            Self::EndOfFile => 0x01,
            Self::ExtendedAddress => 0x04,
            Self::Other(code) => code,
        }
    }
}

impl From<u8> for RecordType {
    fn from(code: u8) -> Self {
        match code {
            0x00 => Self::Data,
            0x01 => Self::EndOfFile,
            0x04 => Self::ExtendedAddress,
            other => Self::Other(other),
        }
    }
}

/// One decoded hex record.
///
/// The payload lives in a fixed array so that decoding never allocates.
#[derive(Clone, PartialEq, Eq)]
pub struct HexRecord {
    /// Number of payload bytes.
    pub byte_count: u8,
    /// 16-bit address field.
    pub address: u16,
    /// Record type.
    pub record_type: RecordType,
    /// Checksum as stored in the record.
    pub checksum: u8,
    payload: [u8; MAX_PAYLOAD],
}

/// Two's complement of the 8-bit sum of `bytes`.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |sum, b| sum.wrapping_add(*b))
        .wrapping_neg()
}

fn decode_nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Decode the two characters at `offset` into one byte.
fn decode_byte(line: &[u8], offset: usize) -> Result<u8, HexError> {
    let digit = |at: usize| {
        let found = line.get(at).copied().unwrap_or(0);
        decode_nibble(found).ok_or(HexError::InvalidDigit { offset: at, found })
    };
    Ok((digit(offset)? << 4) | digit(offset + 1)?)
}

impl HexRecord {
    /// Build a record, computing its checksum.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new(address: u16, record_type: RecordType, data: &[u8]) -> Result<Self, HexError> {
        if data.len() > MAX_PAYLOAD {
            return Err(HexError::PayloadTooLong(data.len()));
        }

        let mut payload = [0u8; MAX_PAYLOAD];
        payload[..data.len()].copy_from_slice(data);

        let mut record = Self {
            byte_count: data.len() as u8,
            address,
            record_type,
            checksum: 0,
            payload,
        };
        record.checksum = record.computed_checksum();
        Ok(record)
    }

    /// Parse one line (without its terminator).
    ///
    /// Returns `Ok(None)` for lines that do not start with `:`; those are
    /// not records and carry nothing to validate.
    pub fn parse(line: &[u8]) -> Result<Option<Self>, HexError> {
        if line.first() != Some(&START_CODE) {
            return Ok(None);
        }

        if line.len() < MIN_RECORD_CHARS {
            return Err(HexError::TooShort(line.len()));
        }

        let byte_count = decode_byte(line, 1)?;
        let expected_len = MIN_RECORD_CHARS + 2 * usize::from(byte_count);
        if line.len() != expected_len {
            return Err(HexError::LengthMismatch {
                declared: byte_count,
                actual: line.len(),
            });
        }

        let address = BigEndian::read_u16(&[decode_byte(line, 3)?, decode_byte(line, 5)?]);
        let record_type = RecordType::from(decode_byte(line, 7)?);

        let mut payload = [0u8; MAX_PAYLOAD];
        for (i, slot) in payload
            .iter_mut()
            .take(usize::from(byte_count))
            .enumerate()
        {
            *slot = decode_byte(line, HEADER_CHARS + 2 * i)?;
        }

        let record = Self {
            byte_count,
            address,
            record_type,
            checksum: decode_byte(line, expected_len - 2)?,
            payload,
        };

        let expected = record.computed_checksum();
        if expected != record.checksum {
            return Err(HexError::ChecksumMismatch {
                expected,
                found: record.checksum,
            });
        }

        Ok(Some(record))
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload[..usize::from(self.byte_count)]
    }

    /// Checksum computed from the record's fields.
    pub fn computed_checksum(&self) -> u8 {
        let [hi, lo] = self.address.to_be_bytes();
        let header = checksum(&[self.byte_count, hi, lo, self.record_type.code()]);
        // -(a + b) == -a + -b (mod 256)
        checksum(self.payload()).wrapping_add(header)
    }
}

impl fmt::Debug for HexRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HexRecord")
            .field("byte_count", &self.byte_count)
            .field("address", &format_args!("0x{:04X}", self.address))
            .field("record_type", &self.record_type)
            .field("payload", &self.payload())
            .field("checksum", &format_args!("0x{:02X}", self.checksum))
            .finish()
    }
}

impl fmt::Display for HexRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            ":{:02X}{:04X}{:02X}",
            self.byte_count,
            self.address,
            self.record_type.code()
        )?;
        for byte in self.payload() {
            write!(f, "{byte:02X}")?;
        }
        write!(f, "{:02X}", self.checksum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<Option<HexRecord>, HexError> {
        HexRecord::parse(line.as_bytes())
    }

    #[test]
    fn test_parse_data_record() {
        let record = parse(":0300300002337A1E").unwrap().unwrap();

        assert_eq!(record.byte_count, 3);
        assert_eq!(record.address, 0x0030);
        assert_eq!(record.record_type, RecordType::Data);
        assert_eq!(record.payload(), &[0x02, 0x33, 0x7A]);
        assert_eq!(record.checksum, 0x1E);
    }

    #[test]
    fn test_parse_end_of_file() {
        let record = parse(":00000001FF").unwrap().unwrap();

        assert_eq!(record.record_type, RecordType::EndOfFile);
        assert!(record.payload().is_empty());
    }

    #[test]
    fn test_parse_extended_address() {
        let record = parse(":020000040001F9").unwrap().unwrap();

        assert_eq!(record.record_type, RecordType::ExtendedAddress);
        assert_eq!(record.payload(), &[0x00, 0x01]);
    }

    #[test]
    fn test_parse_unknown_type_is_other() {
        // Extended segment address, not handled by the loader.
        let record = parse(":020000021000EC").unwrap().unwrap();

        assert_eq!(record.record_type, RecordType::Other(0x02));
        assert_eq!(record.record_type.code(), 0x02);
    }

    #[test]
    fn test_parse_full_16_byte_record() {
        let line = ":10010000214601360121470136007EFE09D2190140";
        let record = parse(line).unwrap().unwrap();

        assert_eq!(record.byte_count, 16);
        assert_eq!(record.address, 0x0100);
        assert_eq!(
            record.payload(),
            &[
                0x21, 0x46, 0x01, 0x36, 0x01, 0x21, 0x47, 0x01, 0x36, 0x00, 0x7E, 0xFE, 0x09,
                0xD2, 0x19, 0x01
            ]
        );
    }

    #[test]
    fn test_non_record_line_is_ignored() {
        assert_eq!(parse("").unwrap(), None);
        assert_eq!(parse("; comment").unwrap(), None);
        assert_eq!(parse("0300300002337A1E").unwrap(), None);
    }

    #[test]
    fn test_checksum_mismatch() {
        let err = parse(":0300300002337A1F").unwrap_err();
        assert_eq!(
            err,
            HexError::ChecksumMismatch {
                expected: 0x1E,
                found: 0x1F
            }
        );
    }

    #[test]
    fn test_lowercase_digits_rejected() {
        let err = parse(":0300300002337a1E").unwrap_err();
        assert_eq!(
            err,
            HexError::InvalidDigit {
                offset: 14,
                found: b'a'
            }
        );
    }

    #[test]
    fn test_too_short() {
        assert_eq!(parse(":000000").unwrap_err(), HexError::TooShort(7));
    }

    #[test]
    fn test_length_mismatch() {
        // Declares 3 bytes but carries only 2 before the checksum.
        assert!(matches!(
            parse(":03003000023392"),
            Err(HexError::LengthMismatch { declared: 3, .. })
        ));
        // Trailing garbage after the checksum.
        assert!(matches!(
            parse(":00000001FF00"),
            Err(HexError::LengthMismatch { declared: 0, .. })
        ));
    }

    #[test]
    fn test_new_computes_checksum_and_displays() {
        let record = HexRecord::new(0x0030, RecordType::Data, &[0x02, 0x33, 0x7A]).unwrap();

        assert_eq!(record.checksum, 0x1E);
        assert_eq!(record.to_string(), ":0300300002337A1E");

        let eof = HexRecord::new(0, RecordType::EndOfFile, &[]).unwrap();
        assert_eq!(eof.to_string(), ":00000001FF");
    }

    #[test]
    fn test_new_rejects_oversized_payload() {
        let data = vec![0u8; MAX_PAYLOAD + 1];
        assert_eq!(
            HexRecord::new(0, RecordType::Data, &data).unwrap_err(),
            HexError::PayloadTooLong(256)
        );
    }

    #[test]
    fn test_record_sums_to_zero() {
        let record = HexRecord::new(0xBEEF, RecordType::Data, &[0xFF; 32]).unwrap();
        let [hi, lo] = record.address.to_be_bytes();

        let mut bytes = vec![record.byte_count, hi, lo, record.record_type.code()];
        bytes.extend_from_slice(record.payload());
        bytes.push(record.checksum);

        assert_eq!(bytes.iter().fold(0u8, |s, b| s.wrapping_add(*b)), 0);
    }
}
