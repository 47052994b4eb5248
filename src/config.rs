//! `ScanConfig`: the scan's immutable parameters, and its external
//! collaborators.
//!
//! This crate is a library, not a CLI — the higher-level replication
//! protocol the spec places out of scope is what would own a TOML config
//! file and a `ConfigFile`-style loader (the teacher's
//! `src/config.rs::ConfigFile`). `ScanConfig` is built programmatically by
//! the embedder; only its scalar knobs derive `Serialize`/`Deserialize`, via
//! `ScanConfigValues`, so an embedder can still round-trip those through
//! their own config format.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::collaborators::{CurrentFiler, IgnoreMatcher, InternalPredicate, Lstater, TemporaryPredicate};
use crate::hash::primitive::BlockHashPrimitive;

/// The scalar subset of `ScanConfig`: every field except the trait-object
/// collaborators, so it can be deserialized from an embedder's own config
/// format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfigValues {
    /// Opaque identifier placed into progress events.
    pub folder: String,
    /// Absolute base directory.
    pub dir: PathBuf,
    /// Sub-paths (relative to `dir`) limiting traversal; empty means the
    /// whole tree.
    pub subs: Vec<String>,
    /// Block size for content hashing, in bytes.
    pub block_size: usize,
    /// Age threshold beyond which temporary files are deleted.
    pub temp_lifetime: std::time::Duration,
    /// When true, permission changes are not considered changes, and
    /// emitted descriptors carry `no_permissions = true`, `permissions = 0`.
    pub ignore_perms: bool,
    /// Whether to repair mis-normalized filenames on disk.
    pub auto_normalize: bool,
    /// Parallel hasher count.
    pub hashers: usize,
    /// Local replica identifier used to stamp descriptors and advance
    /// versions.
    pub short_id: String,
    /// Progress cadence in seconds; 0 means default (2s); negative disables
    /// progress.
    pub progress_tick_interval_s: i64,
    /// Whether to compute weak block hashes.
    pub use_weak_hashes: bool,
    /// Relative paths (under `dir`) whose targets, if directories, are
    /// admitted as additional traversal roots.
    pub follow_symlinks: Vec<String>,
}

/// Full scan configuration: the scalar values plus the external
/// collaborators the walker consults at each entry. Immutable for the
/// scan's lifetime.
#[derive(Clone)]
pub struct ScanConfig {
    pub values: ScanConfigValues,
    pub matcher: Arc<dyn IgnoreMatcher>,
    pub current_filer: Arc<dyn CurrentFiler>,
    pub lstater: Arc<dyn Lstater>,
    pub temporary: Arc<dyn TemporaryPredicate>,
    pub internal: Arc<dyn InternalPredicate>,
    pub primitive: Arc<dyn BlockHashPrimitive>,
    pub cancel: CancelToken,
}

impl ScanConfig {
    /// The progress cadence this config resolves to: `None` when progress is
    /// disabled (`progress_tick_interval_s < 0`), `Some(2)` for the default
    /// (`== 0`), `Some(n)` otherwise.
    pub fn progress_tick_interval(&self) -> Option<u64> {
        let raw = self.values.progress_tick_interval_s;
        if raw < 0 {
            None
        } else if raw == 0 {
            Some(2)
        } else {
            Some(raw as u64)
        }
    }

    pub fn hashers(&self) -> usize {
        self.values.hashers.max(1)
    }
}

/// 9-bit permission mask (`maskModePerm`): `0755` on Windows (drop
/// group/other write bits to avoid exporting world-writable intent derived
/// from the Windows read-only attribute), `0777` elsewhere.
pub fn mask_mode_perm() -> u32 {
    if cfg!(windows) {
        0o755
    } else {
        0o777
    }
}

/// Whether two raw mode values are equal under the platform's relaxed
/// comparison (`PermsEqual`): only the user-write bit on Windows, the full
/// low 9 bits elsewhere.
pub fn perms_equal(a: u32, b: u32) -> bool {
    if cfg!(windows) {
        (a ^ b) & 0o600 == 0
    } else {
        (a ^ b) & 0o777 == 0
    }
}
