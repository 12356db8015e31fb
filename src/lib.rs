//! A MIPS32 assembler and instruction-level simulator.
//!
//! This crate assembles SPIM-compatible MIPS32 assembly source into an
//! in-memory image (text and data segments plus their kernel variants) and
//! interprets the assembled program against a modeled processor: the
//! general-purpose registers, Coprocessor 0 (exception handling), Coprocessor
//! 1 (floating point), memory-mapped I/O, syscalls, and a bounded reversible
//! step history.
//!
//! # Usage
//!
//! Source is tokenized, assembled into a simulator's memory, and then run:
//!
//! ```
//! use mips_ensemble::asm::{self, AssemblerFlags};
//! use mips_ensemble::err::ErrorList;
//! use mips_ensemble::parse;
//! use mips_ensemble::sim::mem::MemoryConfiguration;
//! use mips_ensemble::sim::{FinishReason, RunResult, Simulator};
//!
//! let source = "
//!     .text
//! main:
//!     li $v0, 17      # exit-with-code service
//!     li $a0, 3
//!     syscall
//! ";
//! let mut errors = ErrorList::new();
//! let file = parse::tokenize_source("example.asm", source, &mut errors);
//! assert!(!errors.errors_occurred());
//!
//! let mut sim = Simulator::new(MemoryConfiguration::default_layout(), Default::default());
//! let program = asm::assemble(&[file], &mut sim.memory, AssemblerFlags::default()).unwrap();
//! sim.registers.set_pc(program.entry_point);
//!
//! match sim.run(None) {
//!     RunResult::Finished(FinishReason::Exit(code)) => assert_eq!(code, 3),
//!     other => panic!("unexpected outcome: {other:?}"),
//! }
//! ```
//!
//! For stepping, breakpoints, reverse execution, and cross-thread control,
//! see the [`sim`] module.
#![warn(missing_docs)]

pub mod asm;
pub mod bits;
pub mod dump;
pub mod err;
pub mod isa;
pub mod parse;
pub mod sim;
