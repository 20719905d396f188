//! Parses an inbound packet payload into a [`Command`] per the RSP dispatch
//! table. Framing (checksums, ack/nak, sequence prefixes) is handled one
//! layer down, in [`crate::packet`]; this module only ever sees a payload
//! that has already been stripped of `$...#cc` and any `xx:` prefix.

use crate::hex;
use crate::regs::Registers;

/// A command received from the host, already fully parsed.
#[derive(Debug)]
pub enum Command<'a> {
    /// `?` -- re-report the last signal.
    GetHaltReason,
    /// `H` -- thread selection. A no-op in this single-threaded stub, but
    /// still parsed so a conforming GDB doesn't see a protocol error.
    SetThread { action: ThreadAction, thread: ThreadId },
    /// `qC` -- current thread.
    QCurrentThread,
    /// `qAttached` -- attached-to-existing-process handshake.
    QAttached,
    /// `qfThreadInfo` -- first batch of the thread list.
    QFirstThreadInfo,
    /// `qsThreadInfo` -- subsequent batches (always empty: one thread).
    QNextThreadInfo,
    /// `qSymbol::` -- symbol lookup handshake.
    QSymbol,
    /// `d` -- toggle verbose logging.
    ToggleDebug,
    /// `g` -- dump the register snapshot.
    ReadRegisters,
    /// `G` -- load a full register snapshot.
    WriteRegisters(Registers),
    /// `P n=hhhh` -- set register `n`.
    SetRegister { index: usize, value: u32 },
    /// `m addr,len` -- read memory.
    ReadMem { addr: u32, len: u32 },
    /// `M addr,len:hex` -- write memory.
    WriteMem { addr: u32, bytes: &'a [u8] },
    /// `c [addr]` -- continue, clearing the trace flag.
    Continue { addr: Option<u32> },
    /// `s [addr]` -- single-step, setting the trace flag.
    Step { addr: Option<u32> },
    /// `k` -- kill. A no-op that stays in the command loop, matching
    /// observed GDB-stub behavior.
    Kill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadAction {
    /// `Hc` -- applies to subsequent `c`/`s`.
    ContStep,
    /// `Hg` -- applies to other operations.
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadId {
    All,
    Any,
    Thread(u32),
}

impl ThreadId {
    fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        match buf {
            b"-1" => Ok(ThreadId::All),
            b"0" => Ok(ThreadId::Any),
            _ => {
                let mut cursor = 0;
                let (value, consumed) = hex::hex_to_int(buf, &mut cursor);
                if consumed == 0 || consumed != buf.len() {
                    return Err(ParseError::Malformed);
                }
                Ok(ThreadId::Thread(value as u32))
            }
        }
    }
}

/// Why a packet couldn't be turned into a [`Command`].
#[derive(Debug)]
pub enum ParseError {
    /// Structurally broken -- a protocol-defined error reply is warranted
    /// rather than silence.
    Malformed,
    /// A syntactically fine but unrecognized command. An unknown packet
    /// type replies with an empty payload.
    Unsupported,
}

impl<'a> Command<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<Self, ParseError> {
        if buf.is_empty() {
            return Err(ParseError::Malformed);
        }

        match buf[0] {
            b'?' => Ok(Command::GetHaltReason),
            b'g' => Ok(Command::ReadRegisters),
            b'd' => Ok(Command::ToggleDebug),
            b'k' => Ok(Command::Kill),
            b'G' => {
                let regs = Registers::decode_hex(&buf[1..]).ok_or(ParseError::Malformed)?;
                Ok(Command::WriteRegisters(regs))
            }
            b'P' => parse_set_register(&buf[1..]),
            b'H' => parse_set_thread(&buf[1..]),
            b'c' => Ok(Command::Continue {
                addr: parse_optional_addr(&buf[1..])?,
            }),
            b's' => Ok(Command::Step {
                addr: parse_optional_addr(&buf[1..])?,
            }),
            b'm' => parse_read_mem(&buf[1..]),
            b'M' => parse_write_mem(&buf[1..]),
            b'q' => parse_query(&buf[1..]),
            _ => Err(ParseError::Unsupported),
        }
    }
}

fn parse_optional_addr(rest: &[u8]) -> Result<Option<u32>, ParseError> {
    if rest.is_empty() {
        return Ok(None);
    }
    let mut cursor = 0;
    let (value, consumed) = hex::hex_to_int(rest, &mut cursor);
    if consumed == 0 {
        return Err(ParseError::Malformed);
    }
    Ok(Some(value as u32))
}

fn parse_set_register(rest: &[u8]) -> Result<Command<'static>, ParseError> {
    let mut cursor = 0;
    let (index, consumed) = hex::hex_to_int(rest, &mut cursor);
    if consumed == 0 || rest.get(cursor) != Some(&b'=') {
        return Err(ParseError::Malformed);
    }
    cursor += 1;
    let (value, consumed) = hex::hex_to_int(rest, &mut cursor);
    if consumed == 0 {
        return Err(ParseError::Malformed);
    }
    Ok(Command::SetRegister {
        index: index as usize,
        value: value as u32,
    })
}

fn parse_set_thread(rest: &[u8]) -> Result<Command<'static>, ParseError> {
    let (&action_byte, thread_bytes) = rest.split_first().ok_or(ParseError::Malformed)?;
    let action = match action_byte {
        b'c' => ThreadAction::ContStep,
        b'g' => ThreadAction::Other,
        _ => return Err(ParseError::Malformed),
    };
    let thread = ThreadId::parse(thread_bytes)?;
    Ok(Command::SetThread { action, thread })
}

fn parse_read_mem(rest: &[u8]) -> Result<Command<'static>, ParseError> {
    let mut parts = rest.splitn(2, |&b| b == b',');
    let mut cursor = 0;
    let addr_bytes = parts.next().ok_or(ParseError::Malformed)?;
    let (addr, consumed) = hex::hex_to_int(addr_bytes, &mut cursor);
    if consumed == 0 || consumed != addr_bytes.len() {
        return Err(ParseError::Malformed);
    }
    let len_bytes = parts.next().ok_or(ParseError::Malformed)?;
    let mut cursor = 0;
    let (len, consumed) = hex::hex_to_int(len_bytes, &mut cursor);
    if consumed == 0 || consumed != len_bytes.len() {
        return Err(ParseError::Malformed);
    }
    Ok(Command::ReadMem {
        addr: addr as u32,
        len: len as u32,
    })
}

fn parse_write_mem(rest: &[u8]) -> Result<Command, ParseError> {
    let mut parts = rest.splitn(3, |&b| b == b',' || b == b':');
    let addr_bytes = parts.next().ok_or(ParseError::Malformed)?;
    let mut cursor = 0;
    let (addr, consumed) = hex::hex_to_int(addr_bytes, &mut cursor);
    if consumed == 0 || consumed != addr_bytes.len() {
        return Err(ParseError::Malformed);
    }

    // `splitn` over two distinct separator bytes can't directly hand us
    // "everything after the second separator", so re-split the remainder
    // by hand instead of relying on the iterator's third item.
    let after_addr = &rest[addr_bytes.len() + 1..];
    let colon = after_addr
        .iter()
        .position(|&b| b == b':')
        .ok_or(ParseError::Malformed)?;
    let len_bytes = &after_addr[..colon];
    let hex_bytes = &after_addr[colon + 1..];

    let mut cursor = 0;
    let (len, consumed) = hex::hex_to_int(len_bytes, &mut cursor);
    if consumed == 0 || consumed != len_bytes.len() {
        return Err(ParseError::Malformed);
    }

    if hex_bytes.len() != len as usize * 2 {
        return Err(ParseError::Malformed);
    }
    if hex_bytes.iter().any(|&b| hex::hex_nibble(b).is_none()) {
        return Err(ParseError::Malformed);
    }

    Ok(Command::WriteMem {
        addr: addr as u32,
        bytes: hex_bytes,
    })
}

fn parse_query(rest: &[u8]) -> Result<Command<'static>, ParseError> {
    match rest {
        b"C" => Ok(Command::QCurrentThread),
        b"Attached" => Ok(Command::QAttached),
        b"fThreadInfo" => Ok(Command::QFirstThreadInfo),
        b"sThreadInfo" => Ok(Command::QNextThreadInfo),
        _ if rest.starts_with(b"Symbol::") => Ok(Command::QSymbol),
        _ => Err(ParseError::Unsupported),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_halt_reason_and_registers() {
        assert!(matches!(Command::parse(b"?"), Ok(Command::GetHaltReason)));
        assert!(matches!(Command::parse(b"g"), Ok(Command::ReadRegisters)));
    }

    #[test]
    fn parses_read_mem() {
        match Command::parse(b"m1000,3").unwrap() {
            Command::ReadMem { addr, len } => {
                assert_eq!(addr, 0x1000);
                assert_eq!(len, 3);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_zero_length_read_mem() {
        match Command::parse(b"m0,0").unwrap() {
            Command::ReadMem { addr, len } => {
                assert_eq!(addr, 0);
                assert_eq!(len, 0);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_write_mem() {
        match Command::parse(b"M1000,2:abcd").unwrap() {
            Command::WriteMem { addr, bytes } => {
                assert_eq!(addr, 0x1000);
                assert_eq!(bytes, b"abcd");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rejects_write_mem_length_mismatch() {
        assert!(matches!(
            Command::parse(b"M1000,2:ab"),
            Err(ParseError::Malformed)
        ));
    }

    #[test]
    fn rejects_write_mem_non_hex_payload() {
        assert!(matches!(
            Command::parse(b"M1000,2:zzzz"),
            Err(ParseError::Malformed)
        ));
    }

    #[test]
    fn parses_continue_and_step_with_and_without_addr() {
        assert!(matches!(
            Command::parse(b"c").unwrap(),
            Command::Continue { addr: None }
        ));
        assert!(matches!(
            Command::parse(b"c2000").unwrap(),
            Command::Continue { addr: Some(0x2000) }
        ));
        assert!(matches!(
            Command::parse(b"s").unwrap(),
            Command::Step { addr: None }
        ));
    }

    #[test]
    fn parses_set_register() {
        match Command::parse(b"P0=deadbeef").unwrap() {
            Command::SetRegister { index, value } => {
                assert_eq!(index, 0);
                assert_eq!(value, 0xdeadbeef);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn parses_queries() {
        assert!(matches!(
            Command::parse(b"qC").unwrap(),
            Command::QCurrentThread
        ));
        assert!(matches!(
            Command::parse(b"qAttached").unwrap(),
            Command::QAttached
        ));
        assert!(matches!(
            Command::parse(b"qfThreadInfo").unwrap(),
            Command::QFirstThreadInfo
        ));
        assert!(matches!(
            Command::parse(b"qsThreadInfo").unwrap(),
            Command::QNextThreadInfo
        ));
        assert!(matches!(
            Command::parse(b"qSymbol::").unwrap(),
            Command::QSymbol
        ));
    }

    #[test]
    fn parses_set_thread() {
        match Command::parse(b"Hc-1").unwrap() {
            Command::SetThread { action, thread } => {
                assert_eq!(action, ThreadAction::ContStep);
                assert_eq!(thread, ThreadId::All);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_command_is_unsupported() {
        assert!(matches!(Command::parse(b"z"), Err(ParseError::Unsupported)));
    }
}
