use std::error;
use std::fmt;

/// The possible errors returned by this library.
#[derive(Debug)]
pub enum Error {
    /// Error during communication on the byte transport.
    CommError(Box<dyn error::Error + Send + Sync>),

    /// An unexpected byte was received where the protocol required something
    /// else (e.g. neither `+` nor `-` after a reply, or a non-ASCII checksum
    /// digit).
    Unexpected { byte: u8, expected: &'static str },

    /// Received otherwise malformed data: an `m`/`M`/`P` command that didn't
    /// parse, or a packet that grew past `BUFMAX`.
    Malformed,

    /// The packet checksum didn't match what was computed locally.
    Checksum { received: u8, computed: u8 },

    /// A memory access faulted while servicing `m`/`M`. Converts to the wire
    /// reply via [`Error::wire_code`].
    MemoryFault,

    /// `P` referenced a register index outside `0..REG_COUNT`. Converts to
    /// the wire reply via [`Error::wire_code`].
    UnknownRegister(usize),
}

impl Error {
    pub(crate) fn comm<E>(e: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Error::CommError(e.into())
    }

    pub(crate) fn unexpected(byte: u8, expected: &'static str) -> Self {
        Error::Unexpected { byte, expected }
    }

    /// The `Exx` reply this error maps to, for variants the command loop
    /// reports back to the host instead of tearing down the connection.
    pub fn wire_code(&self) -> Option<&'static [u8]> {
        match self {
            Error::MemoryFault => Some(b"E03"),
            Error::UnknownRegister(_) => Some(b"E01"),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::CommError(e) => write!(f, "communication error: {}", e),
            Error::Unexpected { byte, expected } => write!(
                f,
                "unexpected byte {} ({:#04x}/{}), expected {}",
                byte, byte, *byte as char, expected
            ),
            Error::Malformed => write!(f, "malformed packet"),
            Error::Checksum { received, computed } => write!(
                f,
                "incorrect checksum, got {:02x}, expected {:02x}",
                received, computed
            ),
            Error::MemoryFault => write!(f, "target memory access faulted"),
            Error::UnknownRegister(n) => write!(f, "unknown register index {}", n),
        }
    }
}

impl error::Error for Error {}
