//! A simulator for a 64-bit RISC-V base integer instruction subset
//! ("RV64I"-like), with a two-pass assembler front end and a configurable
//! set-associative data cache interposed on loads and stores.
//!
//! [`Simulator`] is the entry point: `load` assembles a source file, `run`
//! and `step` drive execution, and the remaining methods expose read-only
//! inspection of registers, memory, the call stack, breakpoints, and cache
//! state. Command-line parsing and output formatting live in the `rvsim`
//! binary (see `src/bin/rvsim.rs`); this crate only implements the core.

pub mod assembler;
pub mod cache;
pub mod engine;
pub mod isa;
pub mod memory;
pub mod simulator;

pub use simulator::Simulator;
