//! Fault-tolerant memory access: lets the stub poke at arbitrary target
//! addresses -- including unmapped ones -- without itself being killed.
//!
//! A cooperative long-jump out of a signal handler is the classic way to
//! recover from a bad-address fault mid-access; the structured equivalent
//! used here is `try_read`/`try_write` returning a `Result`. The
//! [`crate::lifecycle`] state
//! ([`mem_fault_routine`](crate::lifecycle::StubState::arm_fault_routine)/
//! `mem_err`) is still armed and disarmed around every access, both to
//! uphold the invariant that the fault-recovery window is closed
//! (`mem_fault_routine` is null) once an access returns, and so
//! [`crate::exception::dispatch`] has the information it needs if a host
//! wires up real asynchronous hardware-fault delivery instead of going
//! through this module's `catch_unwind`-based implementation (see module
//! docs on [`crate::exception`]).

use std::panic::{self, AssertUnwindSafe};

use crate::hex;
use crate::lifecycle::{set_mem_err, StubState};

/// A memory fault encountered while servicing a target access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryFault;

/// Raw, unchecked single-byte access to target memory.
///
/// Implementations are expected to be thin, register-lean code sequences:
/// a bare load or store with nothing else live across it. A bad address
/// may cause the load/store itself to raise a
/// hardware exception -- that's fine, as long as the exception eventually
/// reaches [`crate::exception::dispatch`] with [`StubState`]'s fault
/// routine still armed.
pub trait RawMemory {
    fn load(&self, addr: u32) -> u8;
    fn store(&mut self, addr: u32, value: u8);
}

/// Performs one fault-armed byte read.
///
/// Arms the window, does the raw load, disarms the window, reports what
/// happened. The `catch_unwind` here stands in for the non-local escape a
/// `longjmp` out of a `SIGSEGV` handler would perform -- Rust's own
/// structured unwinding gives the same "abort this one access, resume the
/// caller" effect without exposing raw control flow to callers.
pub fn try_read_byte<M: RawMemory>(state: &StubState, mem: &M, addr: u32) -> Result<u8, MemoryFault> {
    state.arm_fault_routine(set_mem_err);
    let result = panic::catch_unwind(AssertUnwindSafe(|| mem.load(addr)));
    let byte = match result {
        Ok(byte) => byte,
        Err(_) => {
            set_mem_err(state);
            0
        }
    };
    state.disarm_fault_routine();
    if state.take_mem_err() {
        Err(MemoryFault)
    } else {
        Ok(byte)
    }
}

/// Performs one fault-armed byte write. See [`try_read_byte`].
pub fn try_write_byte<M: RawMemory>(
    state: &StubState,
    mem: &mut M,
    addr: u32,
    value: u8,
) -> Result<(), MemoryFault> {
    state.arm_fault_routine(set_mem_err);
    let result = panic::catch_unwind(AssertUnwindSafe(|| mem.store(addr, value)));
    if result.is_err() {
        set_mem_err(state);
    }
    state.disarm_fault_routine();
    if state.take_mem_err() {
        Err(MemoryFault)
    } else {
        Ok(())
    }
}

/// Hex-encodes `count` bytes starting at `addr`.
///
/// When `may_fault` is true, each byte is read through the fault-armed
/// primitive; a faulting read stops the loop and the second element of the
/// return value is `true` (the `mem_err=1` case). The caller (the command
/// loop) is expected to discard the truncated hex and reply `E03` in that
/// case.
pub fn mem_to_hex<M: RawMemory>(
    state: &StubState,
    mem: &M,
    addr: u32,
    count: u32,
    may_fault: bool,
) -> (Vec<u8>, bool) {
    let mut out = Vec::with_capacity(count as usize * 2);
    for i in 0..count {
        let byte = if may_fault {
            match try_read_byte(state, mem, addr.wrapping_add(i)) {
                Ok(b) => b,
                Err(MemoryFault) => return (out, true),
            }
        } else {
            mem.load(addr.wrapping_add(i))
        };
        hex::encode_byte(byte, &mut out);
    }
    (out, false)
}

/// The dual of [`mem_to_hex`]. Decodes `hex` and writes
/// it to target memory starting at `addr`. Returns `true` if a write
/// faulted partway through.
pub fn hex_to_mem<M: RawMemory>(
    state: &StubState,
    mem: &mut M,
    addr: u32,
    hex: &[u8],
    may_fault: bool,
) -> bool {
    let Some(bytes) = hex::decode_bytes(hex) else {
        // Unreachable from the command loop: `Command::WriteMem` is only
        // ever constructed over content `Command::parse` has already
        // validated as hex. Kept as a safe fallback rather than an
        // unreachable!() in case a caller builds a Command by hand.
        return false;
    };
    for (i, byte) in bytes.iter().enumerate() {
        let addr = addr.wrapping_add(i as u32);
        if may_fault {
            if try_write_byte(state, mem, addr, *byte).is_err() {
                return true;
            }
        } else {
            mem.store(addr, *byte);
        }
    }
    false
}

/// A [`RawMemory`] implementation over a plain byte slice, bounds-checked by
/// panicking out of range. Used by tests and `demos/basic.rs` as a stand-in
/// for real target memory, and exercises the `catch_unwind`-based fault path
/// end to end.
pub struct SliceMemory<'a> {
    pub bytes: &'a mut [u8],
}

impl<'a> RawMemory for SliceMemory<'a> {
    fn load(&self, addr: u32) -> u8 {
        self.bytes[addr as usize]
    }

    fn store(&mut self, addr: u32, value: u8) {
        self.bytes[addr as usize] = value;
    }
}
