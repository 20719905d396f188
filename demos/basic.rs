//! A TCP-based demonstration of `gdbstub_i386dos`.
//!
//! This is a toy harness standing in for the real DOS-extender exception
//! delivery: it interprets a tiny in-memory "program" itself (stepping one
//! byte at a time) and calls [`gdbstub_i386dos::GdbStub::handle_exception`]
//! whenever that interpreter would have raised a CPU exception. A real host
//! would instead call `handle_exception` from its actual `SIGSEGV`/`SIGFPE`/
//! `SIGTRAP`/`SIGILL` handlers.
//!
//! This file, and everything in `demos/`, is not part of the library --
//! it exists only as a runnable illustration of wiring one up.

extern crate env_logger;
extern crate gdbstub_i386dos;

use std::net::TcpListener;

use gdbstub_i386dos::exception::ExceptionFrame;
use gdbstub_i386dos::memaccess::SliceMemory;
use gdbstub_i386dos::regs::index;
use gdbstub_i386dos::GdbStub;

const MEMORY: &[u8] = &[
    0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, // 0x7
    0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, // 0xf
    0xCC, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, 0x90, // 0x17 -- int3 at 0x10
];

/// Debug vector: CPU-architectural "single step" exception.
const VECTOR_DEBUG: u32 = 1;
/// Breakpoint vector: `int3`.
const VECTOR_BREAKPOINT: u32 = 3;
/// Invalid opcode vector.
const VECTOR_INVALID_OPCODE: u32 = 6;

fn main() {
    env_logger::init();

    let (stream, addr) = TcpListener::bind("127.0.0.1:9001")
        .unwrap()
        .accept()
        .unwrap();
    println!("Incoming connection from {}", addr);

    let mut mem = Vec::from(MEMORY);
    let mut stub = GdbStub::new(stream);

    let mut frame = ExceptionFrame::default();
    frame.registers.set_eip(0x10);

    // Synchronize with the host before it starts issuing commands, mirroring
    // what a debuggee calling `breakpoint()` at start-of-day would do.
    let mut outcome = stub
        .handle_exception(
            VECTOR_BREAKPOINT,
            &mut frame,
            &mut SliceMemory { bytes: &mut mem },
        )
        .unwrap();

    loop {
        let pc = frame.registers.eip() as usize;
        if pc >= mem.len() {
            eprintln!("ran off the end of memory");
            break;
        }

        let single_step = frame.registers.eflags() & gdbstub_i386dos::regs::EFLAGS_TF != 0;
        let vector = match mem[pc] {
            0x90 => {
                frame.registers.set(index::EIP, (pc + 1) as u32);
                if single_step {
                    VECTOR_DEBUG
                } else {
                    continue;
                }
            }
            0xCC => VECTOR_BREAKPOINT,
            invalid => {
                eprintln!("invalid opcode {:#04x} at {:#x}", invalid, pc);
                VECTOR_INVALID_OPCODE
            }
        };

        outcome = stub
            .handle_exception(vector, &mut frame, &mut SliceMemory { bytes: &mut mem })
            .unwrap();

        let _ = &outcome;
    }
}
