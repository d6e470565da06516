//! Scratch-file helpers: the simulator's `load` and `cache_sim enable` both
//! take a path, so tests write their source/config text to a uniquely named
//! temp file rather than stubbing out the filesystem boundary.

use std::io::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Writes `contents` to a fresh file under `std::env::temp_dir()` with the
/// given `ext` and returns its path.
pub fn write_temp_file(contents: &str, ext: &str) -> String {
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!("rvsim_it_{id}.{ext}"));
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    path.to_string_lossy().into_owned()
}

pub fn write_source(contents: &str) -> String {
    write_temp_file(contents, "s")
}

pub fn write_cache_config(contents: &str) -> String {
    write_temp_file(contents, "cfg")
}
