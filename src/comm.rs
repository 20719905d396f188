//! The byte transport consumed by the stub: blocking send/receive of one
//! octet on a serial line.
//!
//! This module defines the boundary between the stub and whatever serial
//! line actually carries bytes to and from the host GDB; it does not
//! implement that transport itself.

use std::error;
use std::io::{self, Read, Write};

/// A blocking, bidirectional, one-byte-at-a-time channel to a connected GDB
/// instance. This is a `put_byte`/`get_byte` interface generalized to
/// anything that looks like `Read + Write` (e.g. a `TcpStream`, serial port
/// handle, or an in-memory test double).
pub trait ByteTransport {
    /// Error type returned when sending or receiving fails.
    type Error: Into<Box<dyn error::Error + Send + Sync>>;

    /// Blocking receive of one byte from the host.
    fn get_byte(&mut self) -> Result<u8, Self::Error>;

    /// Blocking send of one byte to the host.
    fn put_byte(&mut self, byte: u8) -> Result<(), Self::Error>;

    /// Sends every byte of `data`, in order.
    fn put_bytes(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        for &b in data {
            self.put_byte(b)?;
        }
        Ok(())
    }
}

impl<T> ByteTransport for T
where
    T: Read + Write,
{
    type Error = io::Error;

    fn get_byte(&mut self) -> io::Result<u8> {
        let mut buf = [0u8];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn put_byte(&mut self, byte: u8) -> io::Result<()> {
        self.write_all(&[byte])
    }
}

/// An in-memory [`ByteTransport`] used by tests and `demos/basic.rs`: bytes
/// written by the stub are appended to `to_host`, bytes fed into `from_host`
/// are consumed in order by `get_byte`.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    pub from_host: std::collections::VecDeque<u8>,
    pub to_host: Vec<u8>,
}

impl LoopbackTransport {
    pub fn with_input(bytes: &[u8]) -> Self {
        Self {
            from_host: bytes.iter().copied().collect(),
            to_host: Vec::new(),
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.from_host.extend(bytes.iter().copied());
    }
}

/// Error raised when a [`LoopbackTransport`] runs out of input bytes.
#[derive(Debug)]
pub struct LoopbackExhausted;

impl std::fmt::Display for LoopbackExhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "loopback transport ran out of input bytes")
    }
}

impl error::Error for LoopbackExhausted {}

impl ByteTransport for LoopbackTransport {
    type Error = LoopbackExhausted;

    fn get_byte(&mut self) -> Result<u8, Self::Error> {
        self.from_host.pop_front().ok_or(LoopbackExhausted)
    }

    fn put_byte(&mut self, byte: u8) -> Result<(), Self::Error> {
        self.to_host.push(byte);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_feeds_and_records() {
        let mut t = LoopbackTransport::with_input(b"ab");
        assert_eq!(t.get_byte().unwrap(), b'a');
        assert_eq!(t.get_byte().unwrap(), b'b');
        assert!(t.get_byte().is_err());

        t.put_byte(b'x').unwrap();
        assert_eq!(t.to_host, vec![b'x']);
    }
}
