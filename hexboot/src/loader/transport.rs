//! Byte channel and device-control collaborators of the loader.

use std::io::{ErrorKind, Read, Write};

use log::trace;

use crate::error::{Error, Result};

/// Blocking byte channel to the host.
pub trait Transport {
    /// Wait for the next byte.
    fn get_byte(&mut self) -> Result<u8>;

    /// Send one byte.
    fn put_byte(&mut self, byte: u8) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn get_byte(&mut self) -> Result<u8> {
        (**self).get_byte()
    }

    fn put_byte(&mut self, byte: u8) -> Result<()> {
        (**self).put_byte(byte)
    }
}

/// Hands control to the freshly written application.
pub trait DeviceControl {
    /// Reset the device.
    fn reset(&mut self) -> Result<()>;
}

impl<F: FnMut() -> Result<()>> DeviceControl for F {
    fn reset(&mut self) -> Result<()> {
        self()
    }
}

/// [`Transport`] over any `Read + Write` stream.
///
/// Read timeouts are waited through, so `get_byte` blocks like a UART
/// receive would. It only gives up when the stream reports end-of-file or
/// the embedding application requests interruption
/// (see [`crate::set_interrupt_checker`]).
pub struct StreamTransport<P: Read + Write> {
    port: P,
}

impl<P: Read + Write> StreamTransport<P> {
    /// Wrap a stream.
    pub fn new(port: P) -> Self {
        Self { port }
    }

    /// Consume the transport and return the underlying stream.
    pub fn into_inner(self) -> P {
        self.port
    }
}

impl<P: Read + Write> Transport for StreamTransport<P> {
    fn get_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        loop {
            if crate::is_interrupted_requested() {
                return Err(Error::Interrupted);
            }

            match self.port.read(&mut buf) {
                Ok(1) => {
                    trace!("rx 0x{:02X}", buf[0]);
                    return Ok(buf[0]);
                },
                Ok(_) => return Err(Error::Disconnected),
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {},
                Err(e) => return Err(Error::Io(e)),
            }
        }
    }

    fn put_byte(&mut self, byte: u8) -> Result<()> {
        trace!("tx 0x{byte:02X}");
        self.port.write_all(&[byte])?;
        self.port.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Stream that times out a fixed number of times before each byte.
    struct SlowStream {
        rx: VecDeque<u8>,
        tx: Vec<u8>,
        stalls: usize,
        stalls_left: usize,
    }

    impl Read for SlowStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.stalls_left > 0 {
                self.stalls_left -= 1;
                return Err(std::io::Error::new(ErrorKind::TimedOut, "stall"));
            }
            self.stalls_left = self.stalls;
            match self.rx.pop_front() {
                Some(b) => {
                    buf[0] = b;
                    Ok(1)
                },
                None => Ok(0),
            }
        }
    }

    impl Write for SlowStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.tx.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_get_byte_waits_through_timeouts() {
        let stream = SlowStream {
            rx: b":0".iter().copied().collect(),
            tx: Vec::new(),
            stalls: 3,
            stalls_left: 3,
        };
        let mut transport = StreamTransport::new(stream);

        assert_eq!(transport.get_byte().unwrap(), b':');
        assert_eq!(transport.get_byte().unwrap(), b'0');
        assert!(matches!(transport.get_byte(), Err(Error::Disconnected)));
    }

    #[test]
    fn test_put_byte_writes_through() {
        let stream = SlowStream {
            rx: VecDeque::new(),
            tx: Vec::new(),
            stalls: 0,
            stalls_left: 0,
        };
        let mut transport = StreamTransport::new(stream);
        transport.put_byte(0x13).unwrap();
        transport.put_byte(0x11).unwrap();

        assert_eq!(transport.into_inner().tx, vec![0x13, 0x11]);
    }

    #[test]
    fn test_closure_resets_device() {
        let mut resets = 0;
        let mut device = || -> Result<()> {
            resets += 1;
            Ok(())
        };
        device.reset().unwrap();
        assert_eq!(resets, 1);
    }
}
