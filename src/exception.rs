//! The exception-driven state machine: snapshots CPU state at a fault,
//! decides whether a memory-fault is in flight, otherwise runs the command
//! loop, then publishes the (possibly modified) register snapshot back for
//! resumption.
//!
//! This module is written for hosts that wire up real asynchronous
//! hardware exception delivery (an OS/extender invoking a stub-registered
//! handler with a vector and a mutable register record). It is a second
//! strategy alongside [`crate::memaccess`]'s `catch_unwind`-based
//! primitives, which are what the in-crate reference target and tests
//! actually use; see that module's docs for why both exist.

use crate::lifecycle::StubState;
use crate::regs::Registers;

/// GDB's numeric signal for a synthetic breakpoint vector this DOS extender
/// uses in addition to the architectural `int3` vector 3. Extender-specific;
/// kept behind this named constant rather than an inline magic number.
pub const EXTENDER_BREAKPOINT_VECTOR: u32 = 302;

/// GDB/Unix-style signal numbers the vector table below can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// 4
    Ill,
    /// 5
    Trap,
    /// 7
    Bus,
    /// 8
    Fpe,
    /// 11
    Segv,
    /// 16
    Urg,
}

impl Signal {
    /// GDB's numeric signal value, used in `Snn`/`?` replies.
    pub fn number(self) -> u8 {
        match self {
            Signal::Ill => 4,
            Signal::Trap => 5,
            Signal::Bus => 7,
            Signal::Fpe => 8,
            Signal::Segv => 11,
            Signal::Urg => 16,
        }
    }
}

/// Translates a CPU exception vector to the GDB signal number reported in
/// `Snn`.
pub fn vector_to_signal(vector: u32) -> Signal {
    match vector {
        0 => Signal::Fpe,                              // divide error
        1 => Signal::Trap,                              // debug exception
        3 | EXTENDER_BREAKPOINT_VECTOR => Signal::Trap, // breakpoint
        4 | 5 => Signal::Urg,                            // overflow / bound
        6 => Signal::Ill,                                // invalid opcode
        7 => Signal::Fpe,                                // FPU unavailable
        16 => Signal::Bus,                               // FPU error
        8 => Signal::Bus,                                // double fault
        9..=14 => Signal::Segv,                          // segment/stack/GP/page faults
        _ => Signal::Bus,                                // software-generated
    }
}

/// Vectors treated as the `SIGSEGV`-equivalent memory-fault exception:
/// diverted to the armed fault routine instead of the command loop.
fn is_memory_fault_vector(vector: u32) -> bool {
    matches!(vector_to_signal(vector), Signal::Segv)
}

/// The OS/extender-provided mutable exception-state record: the stub both
/// reads and writes this to snapshot/restore CPU state around a fault.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExceptionFrame {
    pub registers: Registers,
    /// Low 16 bits used as the CPU-reported error code.
    pub error_code: u32,
}

/// What the caller (the host's real exception handler, or
/// `demos/basic.rs`'s simulated one) should do after [`dispatch`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A memory fault was diverted to the armed fault routine; the frame
    /// was not modified and the memory primitive's caller will observe
    /// `mem_err`. Resume exactly where the fault occurred.
    MemoryFaultHandled,
    /// The command loop ran to completion; the frame now holds whatever
    /// registers the host sent via `G`/`P`/`c addr`/`s addr`, with
    /// EFLAGS.TF already set to match the chosen resume mode. Hand the
    /// frame to [`crate::trampoline`].
    Resume,
}

/// Snapshots, diverts a memory fault if one is armed, otherwise runs the
/// command loop and publishes the result. The final non-local resume is the
/// caller's responsibility via [`crate::trampoline::ResumeTrampoline`] --
/// this function never touches the CPU directly.
pub fn dispatch<F>(
    vector: u32,
    frame: &mut ExceptionFrame,
    state: &StubState,
    run_command_loop: F,
) -> DispatchOutcome
where
    F: FnOnce(&mut Registers, u32),
{
    trace!("exception vector {} ({:?})", vector, vector_to_signal(vector));

    // Step 1: the registers are already in `frame.registers` -- the host is
    // responsible for having copied them out of its native exception-state
    // record before calling `dispatch`.

    // Step 2: divert memory faults to the armed routine.
    if is_memory_fault_vector(vector) {
        if let Some(routine) = state.fault_routine() {
            debug!("diverting vector {} to the armed fault routine", vector);
            routine(state);
            state.disarm_fault_routine();
            return DispatchOutcome::MemoryFaultHandled;
        }
    }

    // Step 3: record the vector/error code, then run the command loop.
    state.record_exception(vector, frame.error_code & 0xffff);
    run_command_loop(&mut frame.registers, vector);

    // Step 4: the frame's `registers` field *is* the snapshot, so "publish
    // back" is already done; nothing further to copy.
    DispatchOutcome::Resume
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::index;

    #[test]
    fn vector_table_matches_spec() {
        assert_eq!(vector_to_signal(0), Signal::Fpe);
        assert_eq!(vector_to_signal(1), Signal::Trap);
        assert_eq!(vector_to_signal(3), Signal::Trap);
        assert_eq!(vector_to_signal(EXTENDER_BREAKPOINT_VECTOR), Signal::Trap);
        assert_eq!(vector_to_signal(4), Signal::Urg);
        assert_eq!(vector_to_signal(5), Signal::Urg);
        assert_eq!(vector_to_signal(6), Signal::Ill);
        assert_eq!(vector_to_signal(7), Signal::Fpe);
        assert_eq!(vector_to_signal(16), Signal::Bus);
        assert_eq!(vector_to_signal(8), Signal::Bus);
        for v in 9..=14 {
            assert_eq!(vector_to_signal(v), Signal::Segv);
        }
        assert_eq!(vector_to_signal(999), Signal::Bus);
    }

    #[test]
    fn memory_fault_with_armed_routine_skips_command_loop() {
        let state = StubState::new();
        state.arm_fault_routine(crate::lifecycle::set_mem_err);
        let mut frame = ExceptionFrame::default();

        let mut loop_ran = false;
        let outcome = dispatch(13, &mut frame, &state, |_regs, _vector| {
            loop_ran = true;
        });

        assert_eq!(outcome, DispatchOutcome::MemoryFaultHandled);
        assert!(!loop_ran);
        assert!(state.fault_window_closed());
        assert!(state.take_mem_err());
    }

    #[test]
    fn normal_exception_runs_command_loop_and_records_vector() {
        let state = StubState::new();
        let mut frame = ExceptionFrame::default();
        frame.registers.set(index::EIP, 0x2000);
        frame.error_code = 0x1234_5678;

        let outcome = dispatch(13, &mut frame, &state, |regs, vector| {
            assert_eq!(vector, 13);
            regs.set_eip(0x3000);
        });

        assert_eq!(outcome, DispatchOutcome::Resume);
        assert_eq!(frame.registers.eip(), 0x3000);
        assert_eq!(state.last_vector(), 13);
        assert_eq!(state.last_error_code(), 0x5678);
    }

    #[test]
    fn segv_without_armed_routine_falls_through_to_command_loop() {
        let state = StubState::new();
        let mut frame = ExceptionFrame::default();
        let mut loop_ran = false;
        dispatch(13, &mut frame, &state, |_regs, _vector| {
            loop_ran = true;
        });
        assert!(loop_ran);
    }
}
