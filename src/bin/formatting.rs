//! Human-readable rendering of simulator state. Kept separate from the
//! library crate per the spec's "thin surfaces" split (§1): the core never
//! formats anything for a human.

use rvsim::cache::{CacheConfig, CacheStats};
use rvsim::engine::Frame;
use rvsim::isa::registers::canonical_name;

/// Two-column register dump, 64-bit values in hex and signed decimal, plus
/// `pc`. Mirrors the two-column layout of the teacher's register formatter.
pub fn format_registers(registers: &[i64; 32], pc: i64) -> String {
    let mut out = String::new();
    for i in 0..32 {
        let name = canonical_name(i as u8);
        let val = registers[i];
        let val_str = format!("0x{val:016x} ({val})", val = val as u64);
        out.push_str(&format!("{name:4}: {val_str}"));
        if i % 2 == 0 {
            out.push_str("  ");
        } else {
            out.push('\n');
        }
    }
    out.push_str(&format!("pc  : 0x{:016x}\n", pc as u64));
    out
}

pub fn format_memory(bytes: &[u8], start: i64) -> String {
    let mut out = String::new();
    for (i, chunk) in bytes.chunks(16).enumerate() {
        out.push_str(&format!("0x{:05x}: ", start + (i as i64) * 16));
        for byte in chunk {
            out.push_str(&format!("{byte:02x} "));
        }
        out.push('\n');
    }
    out
}

pub fn format_stack(frames: &[Frame]) -> String {
    let mut out = String::new();
    for (depth, frame) in frames.iter().enumerate().rev() {
        out.push_str(&format!("#{depth} {} (line {})\n", frame.name, frame.line));
    }
    out
}

pub fn format_cache_status(config: CacheConfig) -> String {
    format!(
        "cache_size={} block_size={} associativity={} replacement={} write_policy={}\n",
        config.cache_size, config.block_size, config.associativity, config.replacement, config.write_policy
    )
}

pub fn format_cache_stats(stats: CacheStats) -> String {
    format!(
        "accesses={} hits={} misses={} hit_rate={:.4}\n",
        stats.accesses(),
        stats.hits,
        stats.misses,
        stats.hit_rate()
    )
}
