//! Process-wide stub state and the install/teardown lifecycle.
//!
//! Everything here is a process-wide singleton owned by the stub and
//! mutated only in stub context: the debuggee and the stub never run
//! concurrently, so plain [`Cell`]s are sufficient -- no locks, no atomics.

use std::cell::Cell;

/// A fault routine: invoked by the exception dispatcher in place of the
/// command loop when a memory-fault exception arrives while a memory
/// primitive has armed the window.
pub type FaultRoutine = fn(&StubState);

/// The stub's process-wide singleton state.
///
/// A single instance is meant to be created once (typically in a `static`,
/// see [`StubState::new`]'s doc) and shared by reference between the
/// exception dispatcher, the command loop, and the memory-access
/// primitives.
pub struct StubState {
    /// Non-null only while a memory primitive has armed the fault-recovery
    /// window. When set, a memory-fault exception is diverted to this
    /// routine instead of the command loop.
    mem_fault_routine: Cell<Option<FaultRoutine>>,

    /// Set by the armed fault routine to tell the memory primitive its
    /// access faulted. Consumed (and cleared) by the primitive once it has
    /// observed it.
    mem_err: Cell<bool>,

    /// Gates [`breakpoint`] so pre-initialization calls are silently
    /// ignored.
    gdb_initialized: Cell<bool>,

    /// Verbose logging toggle, flipped by the `d` packet.
    remote_debug: Cell<bool>,

    /// Last exception vector and CPU-reported error code, preserved for
    /// post-mortem inspection.
    gdb_i386vector: Cell<u32>,
    gdb_i386errcode: Cell<u32>,
}

impl StubState {
    /// An instance with every field at its lifecycle-start default.
    pub const fn new() -> Self {
        Self {
            mem_fault_routine: Cell::new(None),
            mem_err: Cell::new(false),
            gdb_initialized: Cell::new(false),
            remote_debug: Cell::new(false),
            gdb_i386vector: Cell::new(0),
            gdb_i386errcode: Cell::new(0),
        }
    }

    /// Arms the fault-recovery window ahead of a potentially-faulting
    /// access.
    pub fn arm_fault_routine(&self, routine: FaultRoutine) {
        self.mem_fault_routine.set(Some(routine));
    }

    /// Closes the fault-recovery window. Idempotent.
    pub fn disarm_fault_routine(&self) {
        self.mem_fault_routine.set(None);
    }

    /// The armed routine, if any. The exception dispatcher consults this to
    /// decide whether a `SIGSEGV`-equivalent should be diverted instead of
    /// entering the command loop.
    pub fn fault_routine(&self) -> Option<FaultRoutine> {
        self.mem_fault_routine.get()
    }

    /// True once the fault-recovery window has closed, i.e. after every
    /// memory primitive call.
    pub fn fault_window_closed(&self) -> bool {
        self.mem_fault_routine.get().is_none()
    }

    pub fn set_mem_err(&self, faulted: bool) {
        self.mem_err.set(faulted);
    }

    /// Reads and clears the fault flag in one step -- this is what a memory
    /// primitive does right after disarming the window.
    pub fn take_mem_err(&self) -> bool {
        let err = self.mem_err.get();
        self.mem_err.set(false);
        err
    }

    pub fn is_initialized(&self) -> bool {
        self.gdb_initialized.get()
    }

    pub fn remote_debug(&self) -> bool {
        self.remote_debug.get()
    }

    pub fn set_remote_debug(&self, on: bool) {
        self.remote_debug.set(on);
    }

    pub fn toggle_remote_debug(&self) {
        self.remote_debug.set(!self.remote_debug.get());
    }

    pub fn last_vector(&self) -> u32 {
        self.gdb_i386vector.get()
    }

    pub fn last_error_code(&self) -> u32 {
        self.gdb_i386errcode.get()
    }

    pub(crate) fn record_exception(&self, vector: u32, error_code: u32) {
        self.gdb_i386vector.set(vector);
        self.gdb_i386errcode.set(error_code);
    }
}

impl Default for StubState {
    fn default() -> Self {
        Self::new()
    }
}

/// The fault routine armed by every memory primitive in [`crate::memaccess`].
pub fn set_mem_err(state: &StubState) {
    state.set_mem_err(true);
}

/// A facility to mark a code or data range as non-pageable for the lifetime
/// of the stub. Exception handlers must not themselves fault, so the
/// stub's own code and data need to be pinned before any handler is
/// installed.
pub trait MemoryPinning {
    type Error;

    /// Locks `[addr, addr+len)` into physical memory.
    fn lock(&mut self, addr: usize, len: usize) -> Result<(), Self::Error>;

    /// Reverses a previous [`lock`](Self::lock) call.
    fn unlock(&mut self, addr: usize, len: usize) -> Result<(), Self::Error>;
}

/// The four exception vectors the stub installs handlers for:
/// `SIGSEGV`, `SIGFPE`, `SIGTRAP`, `SIGILL`, expressed as GDB/Unix signal
/// numbers so a single type serves both registration and the `Snn` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandledSignal {
    Fpe,
    Trap,
    Ill,
    Segv,
}

impl HandledSignal {
    pub const ALL: [HandledSignal; 4] = [
        HandledSignal::Fpe,
        HandledSignal::Trap,
        HandledSignal::Ill,
        HandledSignal::Segv,
    ];
}

/// An OS/extender-provided mechanism to install and restore exception
/// handlers.
pub trait ExceptionSource {
    type Error;

    /// Registers the stub's handler for `signal`, to be invoked on the
    /// matching CPU exception.
    fn install(&mut self, signal: HandledSignal) -> Result<(), Self::Error>;

    /// Restores whatever handler was in place before `install`.
    ///
    /// An earlier teardown implementation restored `SIGTRAP` twice and
    /// never restored `SIGFPE`. This trait's contract requires every signal
    /// in [`HandledSignal::ALL`] to be restored exactly once;
    /// [`gdb_target_close`] upholds that.
    fn restore(&mut self, signal: HandledSignal) -> Result<(), Self::Error>;

    /// Issues a software breakpoint trap in the debuggee, used by
    /// [`breakpoint`] to synchronize with the host at program start.
    fn trap(&mut self);
}

/// Installs all four exception handlers, pins the stub's code and data, and
/// marks the stub initialized.
///
/// Called once, before the debuggee runs any code the host might want to
/// interrupt.
pub fn gdb_target_init<S, M>(
    state: &StubState,
    source: &mut S,
    pinning: &mut M,
    stub_addr: usize,
    stub_len: usize,
) -> Result<(), InitError<S::Error, M::Error>>
where
    S: ExceptionSource,
    M: MemoryPinning,
{
    pinning
        .lock(stub_addr, stub_len)
        .map_err(InitError::Pinning)?;

    for signal in HandledSignal::ALL {
        source.install(signal).map_err(InitError::Source)?;
    }

    state.gdb_initialized.set(true);
    Ok(())
}

/// Restores the four default handlers and unpins stub memory, undoing
/// [`gdb_target_init`]. Shared by the explicit-close call and the process
/// exit handler, which need the same teardown.
pub fn gdb_target_close<S, M>(
    state: &StubState,
    source: &mut S,
    pinning: &mut M,
    stub_addr: usize,
    stub_len: usize,
) -> Result<(), InitError<S::Error, M::Error>>
where
    S: ExceptionSource,
    M: MemoryPinning,
{
    for signal in HandledSignal::ALL {
        source.restore(signal).map_err(InitError::Source)?;
    }

    pinning
        .unlock(stub_addr, stub_len)
        .map_err(InitError::Pinning)?;

    state.gdb_initialized.set(false);
    Ok(())
}

/// Issues a software breakpoint trap, synchronizing with the host on
/// program start. A no-op if the stub hasn't been initialized yet.
pub fn breakpoint<S: ExceptionSource>(state: &StubState, source: &mut S) {
    if state.is_initialized() {
        source.trap();
    }
}

#[derive(Debug)]
pub enum InitError<SE, ME> {
    Source(SE),
    Pinning(ME),
}
