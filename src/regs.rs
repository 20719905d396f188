//! The canonical register snapshot exchanged with GDB over `g`/`G`/`P`.
//!
//! This is the authoritative CPU state between packets: the exception
//! dispatcher fills it in at fault time, the command loop reads and mutates
//! it in place, and the resume trampoline reloads it into the CPU verbatim.

use byteorder::{ByteOrder, LittleEndian};

/// Number of 32-bit registers in the snapshot.
pub const REG_COUNT: usize = 16;

/// Wire size of a full snapshot: 16 registers * 4 bytes each.
pub const NUMREGBYTES: usize = REG_COUNT * 4;

/// EFLAGS bit 8: the trace flag. When set, the CPU raises vector 1
/// (a debug exception) after executing the next instruction.
pub const EFLAGS_TF: u32 = 1 << 8;

/// Index of each register within [`Registers`], matching the layout GDB
/// expects for `i386` targets.
pub mod index {
    pub const EAX: usize = 0;
    pub const ECX: usize = 1;
    pub const EDX: usize = 2;
    pub const EBX: usize = 3;
    pub const ESP: usize = 4;
    pub const EBP: usize = 5;
    pub const ESI: usize = 6;
    pub const EDI: usize = 7;
    pub const EIP: usize = 8;
    pub const EFLAGS: usize = 9;
    pub const CS: usize = 10;
    pub const SS: usize = 11;
    pub const DS: usize = 12;
    pub const ES: usize = 13;
    pub const FS: usize = 14;
    pub const GS: usize = 15;
}

/// A snapshot of the 16 general-purpose/control registers GDB exchanges for
/// an `i386` target, in the canonical order `EAX ECX EDX EBX ESP EBP ESI EDI
/// EIP EFL CS SS DS ES FS GS`.
///
/// Segment selectors occupy the low 16 bits of their slot; the upper 16 bits
/// are don't-care on read and forced to zero on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Registers {
    words: [u32; REG_COUNT],
}

impl Registers {
    /// A snapshot with every register set to zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads register `n` (0-15). Panics if `n >= REG_COUNT`; callers coming
    /// from the wire (the `P` command) must validate the index themselves
    /// and reply `E01` instead of calling this out of range.
    pub fn get(&self, n: usize) -> u32 {
        self.words[n]
    }

    /// Writes register `n`, masking segment selectors to their low 16 bits.
    pub fn set(&mut self, n: usize, value: u32) {
        self.words[n] = if is_segment_register(n) {
            value & 0xffff
        } else {
            value
        };
    }

    /// Fetch-and-increment style accessor for the program counter.
    pub fn eip(&self) -> u32 {
        self.words[index::EIP]
    }

    pub fn set_eip(&mut self, value: u32) {
        self.words[index::EIP] = value;
    }

    pub fn eflags(&self) -> u32 {
        self.words[index::EFLAGS]
    }

    pub fn set_eflags(&mut self, value: u32) {
        self.words[index::EFLAGS] = value;
    }

    /// Forces EFLAGS.TF to the given value: the trace flag is always
    /// forced to reflect the chosen resume mode, regardless of its prior
    /// value.
    pub fn set_trace_flag(&mut self, enabled: bool) {
        let flags = self.eflags();
        self.set_eflags(if enabled {
            flags | EFLAGS_TF
        } else {
            flags & !EFLAGS_TF
        });
    }

    /// Encodes the snapshot as the 128-char hex string expected by `g`'s
    /// reply: little-endian bytes per register, concatenated in order.
    pub fn encode_hex(&self) -> Vec<u8> {
        let mut raw = [0u8; NUMREGBYTES];
        for (i, word) in self.words.iter().enumerate() {
            LittleEndian::write_u32(&mut raw[i * 4..i * 4 + 4], *word);
        }
        crate::hex::encode_bytes(&raw)
    }

    /// Decodes a `G` payload (128 hex chars) into a full snapshot.
    ///
    /// Returns `None` if the payload isn't exactly `NUMREGBYTES * 2` valid
    /// hex characters.
    pub fn decode_hex(hex: &[u8]) -> Option<Self> {
        let raw = crate::hex::decode_bytes(hex)?;
        if raw.len() != NUMREGBYTES {
            return None;
        }
        let mut regs = Registers::new();
        for i in 0..REG_COUNT {
            regs.words[i] = LittleEndian::read_u32(&raw[i * 4..i * 4 + 4]);
        }
        Some(regs)
    }
}

fn is_segment_register(n: usize) -> bool {
    matches!(
        n,
        index::CS | index::SS | index::DS | index::ES | index::FS | index::GS
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_order_matches_spec() {
        let mut r = Registers::new();
        r.set(index::EAX, 0x11223344);
        let hex = r.encode_hex();
        // First 8 hex chars are EAX, little-endian.
        assert_eq!(&hex[..8], b"44332211");
    }

    #[test]
    fn roundtrip_through_g_and_capital_g() {
        let mut r = Registers::new();
        r.set(index::EAX, 0xDEADBEEF);
        r.set(index::EIP, 0x2000);
        r.set(index::CS, 0xFFFF_0008); // upper bits must be masked away
        let hex = r.encode_hex();
        let decoded = Registers::decode_hex(&hex).unwrap();
        assert_eq!(decoded.get(index::EAX), 0xDEADBEEF);
        assert_eq!(decoded.get(index::EIP), 0x2000);
        assert_eq!(decoded.get(index::CS), 0x0008);
        assert_eq!(decoded, r);
    }

    #[test]
    fn trace_flag_is_forced_regardless_of_prior_state() {
        let mut r = Registers::new();
        r.set_eflags(0xFFFF_FFFF);
        r.set_trace_flag(false);
        assert_eq!(r.eflags() & EFLAGS_TF, 0);

        r.set_eflags(0);
        r.set_trace_flag(true);
        assert_eq!(r.eflags() & EFLAGS_TF, EFLAGS_TF);
    }

    #[test]
    fn decode_rejects_wrong_length() {
        assert!(Registers::decode_hex(b"abcd").is_none());
    }
}
