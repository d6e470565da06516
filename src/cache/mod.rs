//! Set-associative data cache interposed between the execution engine and
//! memory. Grounded directly in the original `CACHE` class (`cache.cpp`):
//! same address decomposition, victim selection, and per-access log format,
//! reworked so the cache borrows a memory handle per operation (see
//! DESIGN.md) instead of holding a back-pointer to the simulator.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write as _;

use crate::memory::AddressOutOfRange;

/// Anything the cache can read/write a block through. Implemented by
/// `Memory`; kept as a trait so the cache never owns the simulator.
pub trait MemoryPort {
    fn load(&self, index: i64, w: u32, signed: bool) -> Result<i64, AddressOutOfRange>;
    fn store(&mut self, data: i64, index: i64, w: u32) -> Result<(), AddressOutOfRange>;
}

impl MemoryPort for crate::memory::Memory {
    fn load(&self, index: i64, w: u32, signed: bool) -> Result<i64, AddressOutOfRange> {
        crate::memory::Memory::load(self, index, w, signed)
    }
    fn store(&mut self, data: i64, index: i64, w: u32) -> Result<(), AddressOutOfRange> {
        crate::memory::Memory::store(self, data, index, w)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacementPolicy {
    Fifo,
    Lru,
    Random,
}

impl fmt::Display for ReplacementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReplacementPolicy::Fifo => "FIFO",
            ReplacementPolicy::Lru => "LRU",
            ReplacementPolicy::Random => "RANDOM",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    WriteThrough,
    WriteBack,
}

impl fmt::Display for WritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WritePolicy::WriteThrough => "WT",
            WritePolicy::WriteBack => "WB",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfigInvalid(pub String);

impl fmt::Display for CacheConfigInvalid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid cache configuration: {}", self.0)
    }
}

impl std::error::Error for CacheConfigInvalid {}

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub cache_size: usize,
    pub block_size: usize,
    pub associativity: usize,
    pub replacement: ReplacementPolicy,
    pub write_policy: WritePolicy,
}

impl CacheConfig {
    pub fn validate(self) -> Result<Self, CacheConfigInvalid> {
        if self.cache_size == 0 || self.block_size == 0 {
            return Err(CacheConfigInvalid("cache_size and block_size must be nonzero".into()));
        }
        if !self.cache_size.is_power_of_two() || !self.block_size.is_power_of_two() {
            return Err(CacheConfigInvalid("cache_size and block_size must be powers of two".into()));
        }
        if self.cache_size % self.block_size != 0 {
            return Err(CacheConfigInvalid("cache_size must be a multiple of block_size".into()));
        }
        let lines_total = self.cache_size / self.block_size;
        let associativity = if self.associativity == 0 {
            lines_total
        } else {
            self.associativity
        };
        if lines_total % associativity != 0 {
            return Err(CacheConfigInvalid("associativity must divide cache_size/block_size".into()));
        }
        Ok(CacheConfig { associativity, ..self })
    }

    fn sets(&self) -> usize {
        self.cache_size / self.block_size / self.associativity
    }

    /// Parses the five-token cache config file format:
    /// `cache_size block_size associativity replacement_policy write_policy`.
    pub fn parse(contents: &str) -> Result<Self, CacheConfigInvalid> {
        let tokens: Vec<&str> = contents.split_whitespace().collect();
        if tokens.len() != 5 {
            return Err(CacheConfigInvalid(format!(
                "expected 5 tokens, found {}",
                tokens.len()
            )));
        }
        let cache_size: usize = tokens[0]
            .parse()
            .map_err(|_| CacheConfigInvalid(format!("bad cache_size '{}'", tokens[0])))?;
        let block_size: usize = tokens[1]
            .parse()
            .map_err(|_| CacheConfigInvalid(format!("bad block_size '{}'", tokens[1])))?;
        let associativity: usize = tokens[2]
            .parse()
            .map_err(|_| CacheConfigInvalid(format!("bad associativity '{}'", tokens[2])))?;
        let replacement = match tokens[3] {
            "FIFO" => ReplacementPolicy::Fifo,
            "LRU" => ReplacementPolicy::Lru,
            "RANDOM" => ReplacementPolicy::Random,
            other => return Err(CacheConfigInvalid(format!("unknown replacement policy '{other}'"))),
        };
        let write_policy = match tokens[4] {
            "WT" => WritePolicy::WriteThrough,
            "WB" => WritePolicy::WriteBack,
            other => return Err(CacheConfigInvalid(format!("unknown write policy '{other}'"))),
        };

        CacheConfig {
            cache_size,
            block_size,
            associativity,
            replacement,
            write_policy,
        }
        .validate()
    }
}

#[derive(Debug, Clone)]
struct Line {
    valid: bool,
    dirty: bool,
    rp_data: u64,
    tag: u64,
    block: Vec<u8>,
}

impl Line {
    fn empty(block_size: usize) -> Self {
        Line {
            valid: false,
            dirty: false,
            rp_data: 0,
            tag: 0,
            block: vec![0u8; block_size],
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn accesses(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        if self.accesses() == 0 {
            0.0
        } else {
            self.hits as f64 / self.accesses() as f64
        }
    }
}

pub struct Cache {
    config: CacheConfig,
    sets: Vec<Vec<Line>>,
    time_counter: u64,
    stats: CacheStats,
    log_path: String,
    log_file: Option<File>,
}

struct Decomposed {
    offset: u64,
    set: usize,
    tag: u64,
}

impl Cache {
    pub fn new(config: CacheConfig, log_path: String) -> Self {
        let num_sets = config.sets();
        let sets = (0..num_sets)
            .map(|_| (0..config.associativity).map(|_| Line::empty(config.block_size)).collect())
            .collect();
        Cache {
            config,
            sets,
            time_counter: 0,
            stats: CacheStats::default(),
            log_path,
            log_file: None,
        }
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    /// Repoints the per-access log at `path`, closing any already-open log
    /// file so the next access lazily opens the new one. Needed because
    /// `cache_sim enable` (which constructs the cache) happens before
    /// `load` (which is what tells us the log's basename), see DESIGN.md.
    pub fn set_log_path(&mut self, path: String) {
        self.log_path = path;
        self.log_file = None;
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn decompose(&self, address: i64) -> Decomposed {
        let a = address as u64;
        let block_shift = self.config.block_size.trailing_zeros();
        let set_shift = self.config.sets().trailing_zeros();
        let offset = a & (self.config.block_size as u64 - 1);
        let set = ((a >> block_shift) & (self.config.sets() as u64 - 1)) as usize;
        let tag = a >> (block_shift + set_shift);
        Decomposed { offset, set, tag }
    }

    fn block_aligned_address(&self, address: i64) -> i64 {
        let block_shift = self.config.block_size.trailing_zeros();
        ((address as u64 >> block_shift) << block_shift) as i64
    }

    fn address_of(&self, set: usize, tag: u64) -> i64 {
        let block_shift = self.config.block_size.trailing_zeros();
        let set_shift = self.config.sets().trailing_zeros();
        (((tag << set_shift) | (set as u64)) << block_shift) as i64
    }

    fn find_hit(&self, set: usize, tag: u64) -> Option<usize> {
        self.sets[set]
            .iter()
            .position(|line| line.valid && line.tag == tag)
    }

    fn find_victim(&self, set: usize) -> usize {
        if self.config.replacement == ReplacementPolicy::Random {
            return rand::random::<u32>() as usize % self.config.associativity;
        }
        if let Some(idx) = self.sets[set].iter().position(|line| !line.valid) {
            return idx;
        }
        self.sets[set]
            .iter()
            .enumerate()
            .min_by_key(|(_, line)| line.rp_data)
            .map(|(idx, _)| idx)
            .unwrap_or(0)
    }

    fn writeback_if_dirty(&mut self, mem: &mut dyn MemoryPort, set: usize, way: usize) {
        let line = &self.sets[set][way];
        if line.valid && line.dirty && self.config.write_policy == WritePolicy::WriteBack {
            let addr = self.address_of(set, line.tag);
            let block = line.block.clone();
            for (i, byte) in block.iter().enumerate() {
                let _ = mem.store(*byte as i64, addr + i as i64, 8);
            }
        }
    }

    fn fetch_block(&mut self, mem: &dyn MemoryPort, set: usize, way: usize, address: i64) {
        let base = self.block_aligned_address(address);
        let block_size = self.config.block_size;
        let mut block = vec![0u8; block_size];
        for (i, byte) in block.iter_mut().enumerate() {
            *byte = mem.load(base + i as i64, 8, false).unwrap_or(0) as u8;
        }
        let d = self.decompose(address);
        let line = &mut self.sets[set][way];
        line.block = block;
        line.valid = true;
        line.dirty = false;
        line.tag = d.tag;
    }

    /// Reads `w` bits at `address` through the cache, sign-extending when
    /// `signed`. Instruction fetch never goes through this path (§4.6).
    pub fn read(
        &mut self,
        mem: &mut dyn MemoryPort,
        address: i64,
        w: u32,
        signed: bool,
    ) -> Result<i64, AddressOutOfRange> {
        let d = self.decompose(address);

        let hit_way = self.find_hit(d.set, d.tag);
        let (way, hit) = match hit_way {
            Some(way) => {
                self.time_counter += 1;
                if self.config.replacement == ReplacementPolicy::Lru {
                    self.sets[d.set][way].rp_data = self.time_counter;
                }
                self.stats.hits += 1;
                (way, true)
            }
            None => {
                let victim = self.find_victim(d.set);
                self.writeback_if_dirty(mem, d.set, victim);
                self.fetch_block(mem, d.set, victim, address);
                self.time_counter += 1;
                self.sets[d.set][victim].rp_data = self.time_counter;
                self.stats.misses += 1;
                (victim, false)
            }
        };

        self.log_access('R', address, d.set, hit, self.sets[d.set][way].tag, self.sets[d.set][way].dirty);

        let width_bytes = (w / 8) as usize;
        let offset = d.offset as usize;
        let line = &self.sets[d.set][way];
        let mut value: u64 = 0;
        for i in 0..width_bytes {
            value |= (line.block[offset + i] as u64) << (8 * i);
        }
        if signed && w < 64 && (value >> (w - 1)) & 1 == 1 {
            let shift = 64 - w;
            Ok(((value << shift) as i64) >> shift)
        } else {
            Ok(value as i64)
        }
    }

    /// Writes the low `w` bits of `data` at `address` through the cache.
    pub fn write(
        &mut self,
        mem: &mut dyn MemoryPort,
        address: i64,
        data: i64,
        w: u32,
    ) -> Result<(), AddressOutOfRange> {
        let d = self.decompose(address);
        let width_bytes = (w / 8) as usize;

        let hit_way = self.find_hit(d.set, d.tag);
        let way = match hit_way {
            Some(way) => {
                self.time_counter += 1;
                {
                    let offset = d.offset as usize;
                    let line = &mut self.sets[d.set][way];
                    for i in 0..width_bytes {
                        line.block[offset + i] = ((data as u64 >> (8 * i)) & 0xff) as u8;
                    }
                }
                if self.config.write_policy == WritePolicy::WriteThrough {
                    mem.store(data, address, w)?;
                } else {
                    self.sets[d.set][way].dirty = true;
                }
                if self.config.replacement == ReplacementPolicy::Lru {
                    self.sets[d.set][way].rp_data = self.time_counter;
                }
                self.stats.hits += 1;
                way
            }
            None => {
                self.stats.misses += 1;
                if self.config.write_policy == WritePolicy::WriteThrough {
                    mem.store(data, address, w)?;
                    // no-write-allocate: cache state is unchanged, but we
                    // still need a way index to log against; use the set's
                    // existing occupant, if any, purely for the log record.
                    self.log_access('W', address, d.set, false, d.tag, false);
                    return Ok(());
                }
                let victim = self.find_victim(d.set);
                self.writeback_if_dirty(mem, d.set, victim);
                self.fetch_block(mem, d.set, victim, address);
                {
                    let offset = d.offset as usize;
                    let line = &mut self.sets[d.set][victim];
                    for i in 0..width_bytes {
                        line.block[offset + i] = ((data as u64 >> (8 * i)) & 0xff) as u8;
                    }
                    line.dirty = true;
                }
                self.time_counter += 1;
                self.sets[d.set][victim].rp_data = self.time_counter;
                victim
            }
        };

        self.log_access('W', address, d.set, hit_way.is_some(), self.sets[d.set][way].tag, self.sets[d.set][way].dirty);
        Ok(())
    }

    /// Writes back every valid dirty line and clears validity on all lines.
    pub fn invalidate(&mut self, mem: &mut dyn MemoryPort) {
        for set in 0..self.sets.len() {
            for way in 0..self.sets[set].len() {
                self.writeback_if_dirty(mem, set, way);
            }
        }
        for set in &mut self.sets {
            for line in set.iter_mut() {
                line.valid = false;
            }
        }
    }

    /// Writes one record per valid line to `path`: `set, tag, dirty-flag`.
    pub fn dump(&self, path: &str) -> std::io::Result<()> {
        let mut file = File::create(path)?;
        for (set_idx, set) in self.sets.iter().enumerate() {
            for line in set.iter().filter(|l| l.valid) {
                writeln!(
                    file,
                    "Set: 0x{:x}, Tag: 0x{:x}, {}",
                    set_idx,
                    line.tag,
                    if line.dirty { "Dirty" } else { "Clean" }
                )?;
            }
        }
        Ok(())
    }

    fn log_access(&mut self, kind: char, address: i64, set: usize, hit: bool, tag: u64, dirty: bool) {
        if self.log_file.is_none() {
            if let Ok(file) = OpenOptions::new().create(true).append(true).open(&self.log_path) {
                self.log_file = Some(file);
            }
        }
        if let Some(file) = self.log_file.as_mut() {
            let _ = writeln!(
                file,
                "{}: Address: 0x{:x}, Set: 0x{:x}, {}, Tag: 0x{:x}, {}",
                kind,
                address,
                set,
                if hit { "Hit" } else { "Miss" },
                tag,
                if dirty { "Dirty" } else { "Clean" }
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Memory;

    fn make_cache(replacement: ReplacementPolicy, write_policy: WritePolicy) -> Cache {
        let config = CacheConfig {
            cache_size: 16,
            block_size: 4,
            associativity: 2,
            replacement,
            write_policy,
        }
        .validate()
        .unwrap();
        Cache::new(config, "/tmp/rvsim_cache_test.output".to_string())
    }

    #[test]
    fn miss_then_hit_accounts_correctly() {
        let mut cache = make_cache(ReplacementPolicy::Lru, WritePolicy::WriteBack);
        let mut mem = Memory::new();
        mem.store(0x11, 0x100, 8).unwrap();

        cache.read(&mut mem, 0x100, 8, false).unwrap();
        cache.read(&mut mem, 0x100, 8, false).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn write_through_writes_memory_on_every_access() {
        let mut cache = make_cache(ReplacementPolicy::Lru, WritePolicy::WriteThrough);
        let mut mem = Memory::new();

        cache.write(&mut mem, 0x100, 0xab, 8).unwrap();
        assert_eq!(mem.load(0x100, 8, false).unwrap(), 0xab);

        cache.write(&mut mem, 0x100, 0xcd, 8).unwrap();
        assert_eq!(mem.load(0x100, 8, false).unwrap(), 0xcd);
    }

    #[test]
    fn write_back_defers_memory_write_until_eviction() {
        let mut cache = make_cache(ReplacementPolicy::Lru, WritePolicy::WriteBack);
        let mut mem = Memory::new();

        cache.write(&mut mem, 0x100, 0xab, 8).unwrap();
        // still zero in memory: the write is only in the cache
        assert_eq!(mem.load(0x100, 8, false).unwrap(), 0);

        // force eviction of the set holding 0x100 by filling its two ways
        // and a third distinct tag
        cache.read(&mut mem, 0x110, 8, false).unwrap();
        cache.read(&mut mem, 0x120, 8, false).unwrap();

        assert_eq!(mem.load(0x100, 8, false).unwrap(), 0xab);
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let mut cache = make_cache(ReplacementPolicy::Lru, WritePolicy::WriteBack);
        let mut mem = Memory::new();

        // same set (block 4B, two ways, so tags 0x0, 0x10, 0x20 alias)
        cache.read(&mut mem, 0x0, 8, false).unwrap();
        cache.read(&mut mem, 0x10, 8, false).unwrap();
        cache.read(&mut mem, 0x20, 8, false).unwrap(); // evicts 0x0 (LRU)
        cache.read(&mut mem, 0x0, 8, false).unwrap(); // miss again

        let stats = cache.stats();
        assert_eq!(stats.misses, 4);
        assert_eq!(stats.hits, 0);
    }

    #[test]
    fn invalidate_writes_back_dirty_lines() {
        let mut cache = make_cache(ReplacementPolicy::Lru, WritePolicy::WriteBack);
        let mut mem = Memory::new();

        cache.write(&mut mem, 0x100, 0x7f, 8).unwrap();
        assert_eq!(mem.load(0x100, 8, false).unwrap(), 0);

        cache.invalidate(&mut mem);
        assert_eq!(mem.load(0x100, 8, false).unwrap(), 0x7f);
    }
}
