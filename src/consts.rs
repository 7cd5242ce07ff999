//! Project-wide constants.

use std::path::PathBuf;

pub const AUTHOR: &str = env!("CARGO_PKG_AUTHORS");
pub const HOMEPAGE: &str = env!("CARGO_PKG_HOMEPAGE");

/// Default listen port.
pub const DEFAULT_PORT: u16 = 3000;

/// Engine binary, relative to the broker's working directory.
pub const DEFAULT_ENGINE_PATH: &str = "./analyzer";

/// Engine runs longer than this are killed.
pub const DEFAULT_ENGINE_TIMEOUT_SECS: u64 = 120;

/// Minimum age of a scratch directory before the startup sweep may remove
/// it when no engine timeout is configured.
pub const UNBOUNDED_STALE_SCRATCH_SECS: u64 = 24 * 60 * 60;

/// Body limit for `/api/analyze`.
pub const DEFAULT_MAX_JSON_BYTES: usize = 10 * 1024 * 1024;

/// Body limit for `/api/analyze-block`. Raw `blk*.dat` files run to ~128 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

/// Default scratch root: `<tmp>/txbroker`.
pub fn default_scratch_root() -> PathBuf {
    std::env::temp_dir().join("txbroker")
}

/// Format a number with comma separators (e.g. 1,234,567).
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i).is_multiple_of(3) {
            result.push(',');
        }
        result.push(c);
    }
    result
}
