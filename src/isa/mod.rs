//! The RV64I-like instruction set: format encode/decode helpers, the
//! decoded `Instruction` enum, and the ABI/canonical register resolver.

pub mod formats;
pub mod instructions;
pub mod registers;

pub use instructions::Instruction;
