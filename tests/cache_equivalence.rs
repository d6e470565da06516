//! Cache-related invariants from the spec's testable-properties section:
//! enabling the cache must not change a program's final register state
//! (invariant 3), hit/miss accounting must match the number of data
//! accesses (invariant 4), and LRU eviction must follow recency (invariant
//! 6 / scenario S4).

mod common;

use common::values::{write_cache_config, write_source};
use rvsim::cache::{ReplacementPolicy, WritePolicy};
use rvsim::simulator::Simulator;

const PROGRAM: &str = "\
.data
.word 0x11111111
.word 0x22222222
.word 0x33333333
.text
lui x1, 0x10
lw x5, 0(x1)
lw x6, 4(x1)
add x7, x5, x6
sw x7, 8(x1)
lw x8, 8(x1)
";

#[test]
fn cache_enabled_matches_cache_disabled_final_registers() {
    let path = write_source(PROGRAM);

    let mut without_cache = Simulator::new();
    without_cache.load(&path).unwrap();
    without_cache.run().unwrap();

    let mut with_cache = Simulator::new();
    let config = write_cache_config("16 4 2 LRU WB\n");
    with_cache.cache_enable(&config).unwrap();
    with_cache.load(&path).unwrap();
    with_cache.run().unwrap();

    assert_eq!(without_cache.registers(), with_cache.registers());
}

#[test]
fn invalidate_leaves_memory_matching_the_uncached_run() {
    let path = write_source(PROGRAM);

    let mut without_cache = Simulator::new();
    without_cache.load(&path).unwrap();
    without_cache.run().unwrap();

    let mut with_cache = Simulator::new();
    let config = write_cache_config("16 4 2 LRU WB\n");
    with_cache.cache_enable(&config).unwrap();
    with_cache.load(&path).unwrap();
    with_cache.run().unwrap();
    with_cache.cache_invalidate().unwrap();

    assert_eq!(
        without_cache.mem(0x10008, 4).unwrap(),
        with_cache.mem(0x10008, 4).unwrap(),
        "a dirty line's bytes must reach memory once invalidated"
    );
}

#[test]
fn hits_plus_misses_equals_total_data_accesses() {
    let path = write_source(PROGRAM);
    let mut sim = Simulator::new();
    let config = write_cache_config("16 4 2 LRU WB\n");
    sim.cache_enable(&config).unwrap();
    sim.load(&path).unwrap();
    sim.run().unwrap();

    // 3 loads + 1 store in PROGRAM's text section.
    let stats = sim.cache_stats().unwrap();
    assert_eq!(stats.accesses(), 4);
    assert_eq!(stats.hits + stats.misses, stats.accesses());
}

#[test]
fn s4_lru_eviction_keeps_the_two_most_recent_tags() {
    // Cache 16B, block 4B, A=2, LRU, WB: addresses 0x0, 0x10, 0x20 alias to
    // the same set (set index bits sit above the block offset and below
    // the tag), so the third access evicts the least-recently-used line.
    let config = rvsim::cache::CacheConfig {
        cache_size: 16,
        block_size: 4,
        associativity: 2,
        replacement: ReplacementPolicy::Lru,
        write_policy: WritePolicy::WriteBack,
    }
    .validate()
    .unwrap();
    let mut cache = rvsim::cache::Cache::new(config, write_cache_config(""));
    let mut mem = rvsim::memory::Memory::new();

    cache.read(&mut mem, 0x0, 8, false).unwrap(); // miss
    cache.read(&mut mem, 0x10, 8, false).unwrap(); // miss
    cache.read(&mut mem, 0x20, 8, false).unwrap(); // miss, evicts 0x0 (LRU)
    cache.read(&mut mem, 0x0, 8, false).unwrap(); // miss again: 0x0 was evicted

    let stats = cache.stats();
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 4);

    // Per spec scenario S4, the resident set is now {0x20, 0x0}: 0x10 was
    // the least-recently-used line when 0x0 was re-fetched, so it was the
    // one evicted.
    cache.read(&mut mem, 0x20, 8, false).unwrap();
    cache.read(&mut mem, 0x0, 8, false).unwrap();
    let stats = cache.stats();
    assert_eq!(stats.hits, 2, "0x20 and 0x0 should both still be resident");

    cache.read(&mut mem, 0x10, 8, false).unwrap();
    let stats = cache.stats();
    assert_eq!(stats.misses, 5, "0x10 was evicted and must miss again");
}

#[test]
fn write_through_never_defers_a_write() {
    let config = rvsim::cache::CacheConfig {
        cache_size: 16,
        block_size: 4,
        associativity: 2,
        replacement: ReplacementPolicy::Lru,
        write_policy: WritePolicy::WriteThrough,
    }
    .validate()
    .unwrap();
    let mut cache = rvsim::cache::Cache::new(config, write_cache_config(""));
    let mut mem = rvsim::memory::Memory::new();

    cache.write(&mut mem, 0x100, 0xab, 8).unwrap();
    assert_eq!(mem.load(0x100, 8, false).unwrap(), 0xab, "WT writes memory immediately");
}
