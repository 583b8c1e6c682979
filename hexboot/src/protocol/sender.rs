//! Host-side sender for the hex-record loader.
//!
//! Streams an image one line at a time and waits for the loader's
//! XOFF/ACK/XON handshake after each. A line that is not acknowledged is
//! sent again.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use log::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::loader::LINE_CAPACITY;
use crate::protocol::control::{ACK, CR, XOFF, XON};
use crate::protocol::hex::{HexRecord, RecordType};

/// Sender configuration options.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// How long to wait for XON after a line. Covers an erase cycle.
    pub ack_timeout: Duration,
    /// How long to wait for the second handshake after end of file.
    pub final_timeout: Duration,
    /// Resends of a line before giving up.
    pub max_retries: u32,
    /// Send every line twice.
    pub redundant: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(5),
            final_timeout: Duration::from_millis(500),
            max_retries: 5,
            redundant: false,
        }
    }
}

/// Outcome of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferSummary {
    /// Lines acknowledged by the loader.
    pub lines_sent: usize,
    /// Resends needed along the way.
    pub retries: usize,
    /// Whether the loader confirmed the reset after end of file.
    pub reset_confirmed: bool,
}

/// Hex image sender.
pub struct HexSender<'a, P: Read + Write> {
    port: &'a mut P,
    config: SenderConfig,
}

impl<'a, P: Read + Write> HexSender<'a, P> {
    /// Create a new sender.
    pub fn new(port: &'a mut P) -> Self {
        Self {
            port,
            config: SenderConfig::default(),
        }
    }

    /// Create a new sender with custom configuration.
    pub fn with_config(port: &'a mut P, config: SenderConfig) -> Self {
        Self { port, config }
    }

    /// Validate an image and return the lines to send.
    ///
    /// Lines are trimmed and upper-cased. Blank lines and lines that are not
    /// records are dropped. Every record must parse and fit in the loader's
    /// line buffer.
    pub fn prepare(image: &str) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        let mut saw_end = false;

        for (index, raw) in image.lines().enumerate() {
            let line = raw.trim().to_ascii_uppercase();
            if !line.starts_with(':') {
                if !line.is_empty() {
                    debug!("Line {}: not a record, skipped", index + 1);
                }
                continue;
            }

            if line.len() > LINE_CAPACITY {
                return Err(Error::Protocol(format!(
                    "line {} is {} characters, the loader buffers at most {LINE_CAPACITY}",
                    index + 1,
                    line.len()
                )));
            }

            let record = HexRecord::parse(line.as_bytes())
                .map_err(|source| Error::Hex {
                    line: index + 1,
                    source,
                })?
                .ok_or_else(|| Error::Protocol(format!("line {} is not a record", index + 1)))?;

            if record.record_type == RecordType::ExtendedAddress && record.byte_count != 2 {
                return Err(Error::Protocol(format!(
                    "line {}: extended address record carries {} bytes, the loader expects 2",
                    index + 1,
                    record.byte_count
                )));
            }
            if saw_end {
                warn!("Line {}: record after end of file", index + 1);
            }
            saw_end |= record.record_type == RecordType::EndOfFile;
            lines.push(line);
        }

        if !saw_end {
            warn!("Image has no end of file record; the loader will not reset");
        }
        Ok(lines)
    }

    /// Read a single byte.
    fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(1) => Ok(buf[0]),
            Ok(_) => Err(Error::Timeout("read_byte: no data".into())),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) =>
            {
                Err(Error::Timeout("read_byte: timeout".into()))
            },
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Read until XON or `timeout`. Returns whether an ACK came first.
    ///
    /// `Ok(None)` means XON never arrived.
    fn await_handshake(&mut self, timeout: Duration) -> Result<Option<bool>> {
        let start = Instant::now();
        let mut acked = false;

        while start.elapsed() < timeout {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            match self.read_byte() {
                Ok(ACK) => acked = true,
                Ok(XON) => return Ok(Some(acked)),
                Ok(XOFF) => trace!("XOFF"),
                Ok(c) => trace!("Ignoring unexpected byte 0x{c:02X}"),
                Err(Error::Timeout(_)) => {},
                Err(e) => return Err(e),
            }
        }

        Ok(None)
    }

    /// Send one line until it is acknowledged. Returns the resend count.
    fn send_line(&mut self, number: usize, line: &str) -> Result<usize> {
        let mut frame = Vec::with_capacity(2 * (line.len() + 1));
        frame.extend_from_slice(line.as_bytes());
        frame.push(CR);
        if self.config.redundant {
            frame.extend_from_slice(line.as_bytes());
            frame.push(CR);
        }

        for attempt in 0..=self.config.max_retries {
            trace!("Sending line {number} (attempt {})", attempt + 1);
            self.port.write_all(&frame)?;
            self.port.flush()?;

            match self.await_handshake(self.config.ack_timeout)? {
                Some(true) => return Ok(attempt as usize),
                Some(false) => debug!("Line {number} rejected, resending"),
                None => debug!("Timeout waiting for line {number}, resending"),
            }
        }

        Err(Error::Protocol(format!(
            "line {number} not acknowledged after {} retries",
            self.config.max_retries
        )))
    }

    /// Validate and transfer an image.
    ///
    /// # Arguments
    ///
    /// * `image` - Hex image text
    /// * `progress` - Called with `(lines_done, lines_total)` after each line
    pub fn transfer<F>(&mut self, image: &str, progress: F) -> Result<TransferSummary>
    where
        F: FnMut(usize, usize),
    {
        let lines = Self::prepare(image)?;
        self.transfer_lines(&lines, progress)
    }

    /// Transfer lines already returned by [`HexSender::prepare`].
    pub fn transfer_lines<F>(&mut self, lines: &[String], mut progress: F) -> Result<TransferSummary>
    where
        F: FnMut(usize, usize),
    {
        let total = lines.len();
        let mut summary = TransferSummary::default();
        debug!("Sending {total} lines");

        for (index, line) in lines.iter().enumerate() {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }

            summary.retries += self.send_line(index + 1, line)?;
            summary.lines_sent += 1;
            progress(index + 1, total);

            if is_end_of_file(line) {
                summary.reset_confirmed = self.await_handshake(self.config.final_timeout)?
                    == Some(true);
                if !summary.reset_confirmed {
                    debug!("No reset confirmation after end of file");
                }
                break;
            }
        }

        Ok(summary)
    }
}

fn is_end_of_file(line: &str) -> bool {
    matches!(
        HexRecord::parse(line.as_bytes()),
        Ok(Some(record)) if record.record_type == RecordType::EndOfFile
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct MockSerial {
        read_buf: VecDeque<u8>,
        write_buf: Vec<u8>,
    }

    impl MockSerial {
        fn new(response: &[u8]) -> Self {
            Self {
                read_buf: response.iter().copied().collect(),
                write_buf: Vec::new(),
            }
        }
    }

    impl Read for MockSerial {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.read_buf.pop_front() {
                Some(b) => {
                    buf[0] = b;
                    Ok(1)
                },
                None => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data")),
            }
        }
    }

    impl Write for MockSerial {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.write_buf.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn fast_config() -> SenderConfig {
        SenderConfig {
            ack_timeout: Duration::from_millis(20),
            final_timeout: Duration::from_millis(20),
            max_retries: 2,
            redundant: false,
        }
    }

    const IMAGE: &str = ":0300300002337A1E\n:00000001FF\n";

    #[test]
    fn test_prepare_uppercases_and_skips_noise() {
        let lines = HexSender::<MockSerial>::prepare(
            "\n; comment\n:0300300002337a1e\r\n  :00000001ff  \n",
        )
        .unwrap();
        assert_eq!(lines, [":0300300002337A1E", ":00000001FF"]);
    }

    #[test]
    fn test_prepare_reports_line_number() {
        let err = HexSender::<MockSerial>::prepare(":00000001FF\n\n:0300300002337A1F\n")
            .unwrap_err();
        assert!(matches!(err, Error::Hex { line: 3, .. }), "{err}");
    }

    #[test]
    fn test_prepare_rejects_line_longer_than_buffer() {
        let line = HexRecord::new(0, RecordType::Data, &[0; 28])
            .unwrap()
            .to_string();
        assert!(line.len() > LINE_CAPACITY);
        assert!(matches!(
            HexSender::<MockSerial>::prepare(&line),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_prepare_rejects_short_extended_address() {
        let err = HexSender::<MockSerial>::prepare(":00000001FF\n:0100000401FA\n").unwrap_err();
        assert!(matches!(err, Error::Protocol(ref msg) if msg.starts_with("line 2")), "{err}");
    }

    #[test]
    fn test_transfer_happy_path() {
        let mut port = MockSerial::new(&[XOFF, ACK, XON, XOFF, ACK, XON, ACK, XON]);
        let mut progress = Vec::new();

        let summary = HexSender::with_config(&mut port, fast_config())
            .transfer(IMAGE, |done, total| progress.push((done, total)))
            .unwrap();

        assert_eq!(summary.lines_sent, 2);
        assert_eq!(summary.retries, 0);
        assert!(summary.reset_confirmed);
        assert_eq!(progress, [(1, 2), (2, 2)]);
        assert_eq!(port.write_buf, b":0300300002337A1E\r:00000001FF\r");
    }

    #[test]
    fn test_rejected_line_is_resent() {
        // First attempt: XOFF, XON without ACK.
        let mut port = MockSerial::new(&[XOFF, XON, XOFF, ACK, XON]);

        let summary = HexSender::with_config(&mut port, fast_config())
            .transfer(":0300300002337A1E\n", |_, _| {})
            .unwrap();

        assert_eq!(summary.retries, 1);
        assert_eq!(
            port.write_buf,
            b":0300300002337A1E\r:0300300002337A1E\r"
        );
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let mut port = MockSerial::new(&[XOFF, XON, XOFF, XON, XOFF, XON]);

        let result = HexSender::with_config(&mut port, fast_config())
            .transfer(":0300300002337A1E\n", |_, _| {});

        assert!(matches!(result, Err(Error::Protocol(_))));
        // Initial attempt plus two resends.
        assert_eq!(port.write_buf.len(), 3 * 18);
    }

    #[test]
    fn test_redundant_mode_sends_each_line_twice() {
        let mut port = MockSerial::new(&[XOFF, ACK, XON, ACK, XON]);
        let config = SenderConfig {
            redundant: true,
            ..fast_config()
        };

        HexSender::with_config(&mut port, config)
            .transfer(":00000001FF\n", |_, _| {})
            .unwrap();

        assert_eq!(port.write_buf, b":00000001FF\r:00000001FF\r");
    }

    #[test]
    fn test_missing_final_ack_is_tolerated() {
        let mut port = MockSerial::new(&[XOFF, ACK, XON]);

        let summary = HexSender::with_config(&mut port, fast_config())
            .transfer(":00000001FF\n", |_, _| {})
            .unwrap();

        assert_eq!(summary.lines_sent, 1);
        assert!(!summary.reset_confirmed);
    }
}
