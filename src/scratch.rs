//! Per-request scratch directories.
//!
//! Every request gets its own directory under the scratch root, named
//! `<prefix>-<32 hex chars>`. Inputs are written into it, the engine runs
//! with it as working directory and writes its results to the `out/`
//! directory inside it. Nothing under one request's directory is visible to
//! another request, so concurrent analyses need no locking.
//!
//! A [`ScratchSpace`] is released exactly once: explicitly through
//! [`ScratchSpace::release`], or on drop if the request bailed out early or
//! was cancelled. Release is best-effort; failures are logged, never returned.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use rand::RngExt;
use tracing::{debug, warn};

use crate::engine::protocol::OUTPUT_DIR;
use crate::error::BrokerError;

/// Length of the random part of a scratch name, in hex characters.
const ID_HEX_LEN: usize = 32;

/// Prefixes the broker allocates under. Used to recognise stale entries.
pub const KNOWN_PREFIXES: &[&str] = &["tx", "block"];

/// Hands out scratch directories under a single root.
#[derive(Debug, Clone)]
pub struct ScratchManager {
    root: PathBuf,
}

impl ScratchManager {
    /// Relative roots are made absolute: the engine runs with a different
    /// working directory and receives paths under the root as arguments.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A fresh path under the root. 128 random bits make collisions a
    /// non-issue even across processes sharing the root.
    pub fn create_unique_path(&self, prefix: &str) -> PathBuf {
        self.root.join(format!("{prefix}-{}", random_id()))
    }

    /// Create a private directory (plus its `out/` directory) for one request.
    pub async fn allocate(&self, prefix: &str) -> Result<ScratchSpace, BrokerError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| BrokerError::io("create scratch root", e))?;

        let dir = self.create_unique_path(prefix);
        // create_dir, not create_dir_all: an existing directory is an error.
        tokio::fs::create_dir(&dir)
            .await
            .map_err(|e| BrokerError::io("create scratch directory", e))?;

        let space = ScratchSpace {
            dir,
            released: false,
        };
        tokio::fs::create_dir(space.output_dir())
            .await
            .map_err(|e| BrokerError::io("create output directory", e))?;

        debug!(dir = %space.dir.display(), "allocated scratch");
        Ok(space)
    }

    /// Remove leftovers of a previous run: directories directly under the
    /// root whose name matches `<known prefix>-<32 hex>` and that were last
    /// modified at least `min_age` ago. Younger entries may belong to a live
    /// request of another broker sharing the root. Anything else is left
    /// alone. Returns how many entries were removed.
    pub async fn sweep(&self, min_age: Duration) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "cannot sweep scratch root");
                return 0;
            }
        };

        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_scratch_name(name) {
                continue;
            }
            if !is_older_than(&entry, min_age).await {
                debug!(path = %entry.path().display(), "scratch too recent to sweep");
                continue;
            }
            match tokio::fs::remove_dir_all(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %entry.path().display(), error = %e, "cannot remove stale scratch"),
            }
        }
        removed
    }
}

/// One request's scratch directory.
#[derive(Debug)]
pub struct ScratchSpace {
    dir: PathBuf,
    released: bool,
}

impl ScratchSpace {
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Where the engine drops its result files.
    pub fn output_dir(&self) -> PathBuf {
        self.dir.join(OUTPUT_DIR)
    }

    /// Write `bytes` to `name` inside the scratch directory.
    pub async fn materialize(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, BrokerError> {
        let path = self.dir.join(name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| BrokerError::io(&format!("write {name}"), e))?;
        Ok(path)
    }

    /// Delete the directory and everything in it.
    pub async fn release(mut self) {
        self.released = true;
        if let Err(e) = tokio::fs::remove_dir_all(&self.dir).await {
            warn!(dir = %self.dir.display(), error = %e, "scratch release failed");
        } else {
            debug!(dir = %self.dir.display(), "released scratch");
        }
    }
}

impl Drop for ScratchSpace {
    /// Inside a runtime the delete goes to the blocking pool so a large
    /// block upload does not stall a worker thread; outside one it runs inline.
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let dir = std::mem::take(&mut self.dir);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_dropped(&dir));
            }
            Err(_) => remove_dropped(&dir),
        }
    }
}

fn remove_dropped(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        warn!(dir = %dir.display(), error = %e, "scratch release on drop failed");
    } else {
        debug!(dir = %dir.display(), "released scratch on drop");
    }
}

async fn is_older_than(entry: &tokio::fs::DirEntry, min_age: Duration) -> bool {
    if min_age.is_zero() {
        return true;
    }
    let Ok(modified) = entry.metadata().await.and_then(|m| m.modified()) else {
        return false;
    };
    SystemTime::now()
        .duration_since(modified)
        .is_ok_and(|age| age >= min_age)
}

fn random_id() -> String {
    let bytes: [u8; ID_HEX_LEN / 2] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn is_scratch_name(name: &str) -> bool {
    let Some((prefix, id)) = name.rsplit_once('-') else {
        return false;
    };
    KNOWN_PREFIXES.contains(&prefix)
        && id.len() == ID_HEX_LEN
        && id.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}
