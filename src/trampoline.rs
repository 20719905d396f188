//! The resume trampoline: restores every register from the snapshot and
//! returns control to the debuggee at `eip`/`cs`/`eflags`, atomically.
//!
//! This step is inherently architecture-specific assembly: a separate write
//! of `EFLAGS` followed by a jump risks the trace flag firing one
//! instruction early or late, so the only correct sequence on x86 is an
//! interrupt-return (`iret`) with a stack frame of `eip`, `cs`, `eflags`
//! reloaded by one instruction. This crate does not (and, being portable
//! Rust, cannot) hand-write that sequence; instead it exposes the step as a
//! single opaque trait with a precise contract, and leaves the actual
//! `iret` to the host's `#[naked]`/`global_asm!` glue -- the same division
//! of labor between a Rust-level handler signature and a `global_asm!`
//! vector table that embedded exception-vector runtimes typically use.

use crate::regs::Registers;

/// Implemented by the host: performs the atomic register-restore + resume.
///
/// # Safety contract
///
/// An implementation must, in a single non-interruptible sequence:
/// 1. Load every general-purpose register and segment selector from
///    `registers`.
/// 2. Reload `eip`, `cs`, and `eflags` together (e.g. via `iret`) so that
///    EFLAGS.TF takes effect starting with the *next* instruction executed
///    by the debuggee, never the one that performs the reload itself.
///
/// A caller that splits step 2 into separate writes violates the trace-flag
/// timing invariant and is not a conforming implementation.
pub trait ResumeTrampoline {
    /// Does not return to its caller in a real target: control passes to
    /// the debuggee. The reference implementations in this crate are test
    /// doubles that return normally to make the contract observable.
    fn resume(&mut self, registers: &Registers);
}

/// A [`ResumeTrampoline`] that records the last snapshot it was asked to
/// resume with, for tests and `demos/basic.rs`. Does not and cannot
/// actually transfer control -- there is no portable way to do that, per
/// this module's docs.
#[derive(Debug, Default)]
pub struct RecordingTrampoline {
    pub last_resumed: Option<Registers>,
}

impl ResumeTrampoline for RecordingTrampoline {
    fn resume(&mut self, registers: &Registers) {
        self.last_resumed = Some(*registers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::index;

    #[test]
    fn recording_trampoline_observes_final_snapshot() {
        let mut t = RecordingTrampoline::default();
        let mut regs = Registers::new();
        regs.set(index::EIP, 0x4000);
        t.resume(&regs);
        assert_eq!(t.last_resumed.unwrap().eip(), 0x4000);
    }
}
