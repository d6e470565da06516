//! Mapping between register names (ABI aliases and canonical `x<n>` form) and
//! the 0..31 index into the architectural register file.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidRegister(pub String);

impl fmt::Display for InvalidRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid register '{}'", self.0)
    }
}

impl std::error::Error for InvalidRegister {}

/// Resolves a register token (`x5`, `zero`, `ra`, `sp`, `a0`, ...) to its
/// 0..31 index. Matching is case-sensitive, as the original predicate set
/// only ever sees lowercase tokens out of `format`/`split_words`.
pub fn resolve(name: &str) -> Result<u8, InvalidRegister> {
    if let Some(rest) = name.strip_prefix('x') {
        if let Ok(n) = rest.parse::<u32>() {
            if n < 32 {
                return Ok(n as u8);
            }
        }
        return Err(InvalidRegister(name.to_string()));
    }

    let idx = match name {
        "zero" => 0,
        "ra" => 1,
        "sp" => 2,
        "gp" => 3,
        "tp" => 4,
        "t0" => 5,
        "t1" => 6,
        "t2" => 7,
        "s0" | "fp" => 8,
        "s1" => 9,
        "a0" => 10,
        "a1" => 11,
        "a2" => 12,
        "a3" => 13,
        "a4" => 14,
        "a5" => 15,
        "a6" => 16,
        "a7" => 17,
        "s2" => 18,
        "s3" => 19,
        "s4" => 20,
        "s5" => 21,
        "s6" => 22,
        "s7" => 23,
        "s8" => 24,
        "s9" => 25,
        "s10" => 26,
        "s11" => 27,
        "t3" => 28,
        "t4" => 29,
        "t5" => 30,
        "t6" => 31,
        _ => return Err(InvalidRegister(name.to_string())),
    };

    Ok(idx)
}

/// Canonical `x<n>` spelling for a register index, used by the inspection
/// API and by the cosmetic call-stack frame naming (see DESIGN.md).
pub fn canonical_name(index: u8) -> String {
    format!("x{index}")
}
