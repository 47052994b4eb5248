//! Trait boundaries for the walker's external collaborators.
//!
//! None of these are implemented by this crate beyond simple test doubles:
//! the ignore-pattern language, the prior-state store, and the
//! temporary/internal-path policies all belong to the embedding engine.

use std::path::PathBuf;
use std::time::SystemTime;

use crate::descriptor::FileDescriptor;

/// Verdict from the ignore-pattern matcher for a relative path.
pub trait IgnoreMatcher: Send + Sync {
    /// Returns true if `rel_path` (and, for a directory, its entire subtree)
    /// should be skipped.
    fn is_ignored(&self, rel_path: &str) -> bool;
}

/// A matcher that never ignores anything, for callers with no ignore policy.
pub struct NeverIgnore;

impl IgnoreMatcher for NeverIgnore {
    fn is_ignored(&self, _rel_path: &str) -> bool {
        false
    }
}

/// The prior-state store: maps a relative name to the descriptor recorded by
/// the previous scan.
pub trait CurrentFiler: Send + Sync {
    /// Returns the prior descriptor for `name`, or `None` if the name was not
    /// present in the last scan's output.
    fn current_file(&self, name: &str) -> Option<FileDescriptor>;
}

/// A prior snapshot backed by an in-memory map, suitable for tests and for
/// callers who keep the last scan's output resident.
#[derive(Debug, Clone, Default)]
pub struct PriorSnapshot {
    entries: std::collections::HashMap<String, FileDescriptor>,
}

impl PriorSnapshot {
    pub fn new() -> Self {
        PriorSnapshot {
            entries: std::collections::HashMap::new(),
        }
    }

    pub fn insert(&mut self, descriptor: FileDescriptor) {
        self.entries.insert(descriptor.name.clone(), descriptor);
    }

    /// Build a snapshot from the output of a completed scan, so it can be
    /// fed straight back in as the next scan's prior state (the idempotence
    /// property relies on exactly this).
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = FileDescriptor>) -> Self {
        let mut snapshot = PriorSnapshot::new();
        for descriptor in descriptors {
            snapshot.insert(descriptor);
        }
        snapshot
    }
}

impl CurrentFiler for PriorSnapshot {
    fn current_file(&self, name: &str) -> Option<FileDescriptor> {
        self.entries.get(name).cloned()
    }
}

/// Minimal stat result the walker needs: enough to re-`lstat` a path without
/// trusting the directory-iteration stat, and to let a collaborator correct
/// the observed mtime (e.g. for filesystems with coarse mtime resolution).
#[derive(Debug, Clone, Copy)]
pub struct FileInfo {
    pub is_dir: bool,
    pub is_file: bool,
    pub is_symlink: bool,
    pub len: u64,
    pub modified: SystemTime,
    /// Raw platform mode bits (POSIX mode, or a Windows-derived equivalent);
    /// masking/equality rules live in `permissions`.
    pub mode: u32,
}

/// Stat collaborator, supplied so an embedder can correct mtimes (e.g. round
/// trip through a database with second-only precision) before the walker
/// compares them against prior state.
pub trait Lstater: Send + Sync {
    fn lstat(&self, abs_path: &std::path::Path) -> std::io::Result<FileInfo>;
}

/// Direct filesystem `lstat`, the default when no correction is needed.
pub struct OsLstater;

impl Lstater for OsLstater {
    fn lstat(&self, abs_path: &std::path::Path) -> std::io::Result<FileInfo> {
        let meta = std::fs::symlink_metadata(abs_path)?;
        let mode = platform_mode(&meta);
        Ok(FileInfo {
            is_dir: meta.is_dir(),
            is_file: meta.is_file(),
            is_symlink: meta.file_type().is_symlink(),
            len: meta.len(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            mode,
        })
    }
}

#[cfg(unix)]
fn platform_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
fn platform_mode(meta: &std::fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o555
    } else {
        0o755
    }
}

/// Whether a relative path names a temporary file the engine should delete
/// once it is older than `TempLifetime`, rather than treat as real content.
pub trait TemporaryPredicate: Send + Sync {
    fn is_temporary(&self, rel_path: &str) -> bool;
}

/// Whether a relative path is beneath the engine's own internal metadata
/// directory and its subtree should be skipped outright.
pub trait InternalPredicate: Send + Sync {
    fn is_internal(&self, rel_path: &str) -> bool;
}

/// Recognizes the conventional `~` prefix used by this codebase's sibling
/// tooling for scratch/temporary files.
pub struct TildePrefixTemporary;

impl TemporaryPredicate for TildePrefixTemporary {
    fn is_temporary(&self, rel_path: &str) -> bool {
        PathBuf::from(rel_path)
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('~'))
    }
}

/// Recognizes a single named top-level internal directory (e.g. `.stfolder`
/// or `.orbit`), matching the convention of excluding the engine's own
/// bookkeeping directory from scans.
pub struct NamedInternalDir {
    pub name: String,
}

impl InternalPredicate for NamedInternalDir {
    fn is_internal(&self, rel_path: &str) -> bool {
        PathBuf::from(rel_path)
            .components()
            .next()
            .map(|c| c.as_os_str() == self.name.as_str())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Kind;

    #[test]
    fn prior_snapshot_roundtrips_descriptors() {
        let d = FileDescriptor::new("a.txt", Kind::File, "r1");
        let snapshot = PriorSnapshot::from_descriptors(vec![d.clone()]);
        let found = snapshot.current_file("a.txt").unwrap();
        assert_eq!(found.name, d.name);
        assert!(snapshot.current_file("missing").is_none());
    }

    #[test]
    fn tilde_prefix_is_temporary() {
        let pred = TildePrefixTemporary;
        assert!(pred.is_temporary("dir/~tmp"));
        assert!(!pred.is_temporary("dir/real.txt"));
    }

    #[test]
    fn named_internal_dir_matches_top_level_only() {
        let pred = NamedInternalDir {
            name: ".orbit".to_string(),
        };
        assert!(pred.is_internal(".orbit/index.db"));
        assert!(!pred.is_internal("sub/.orbit/index.db"));
    }
}
