//! The descriptor data model: [`FileDescriptor`], [`Version`], [`Block`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// What kind of filesystem object a descriptor describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Kind {
    File,
    Directory,
    Symlink,
}

/// A single fixed-size span of a file's content, as produced by the hash
/// pipeline's block-hashing primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub offset: u64,
    pub length: usize,
    pub strong_hash: Vec<u8>,
    pub weak_hash: Option<u32>,
}

/// A vector-clock version: a sorted map from replica short ID to a
/// monotonically increasing counter.
///
/// `dominates` defines the partial order the scanning core relies on to
/// guarantee version monotonicity (spec invariant: the emitted version
/// strictly dominates the prior version for the same name). `advanced_with`
/// is the only way a `Version` is ever produced, composing prior history
/// with the local replica id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    counters: BTreeMap<String, u64>,
}

impl Version {
    /// The zero version: no replica has touched this name yet.
    pub fn zero() -> Self {
        Version {
            counters: BTreeMap::new(),
        }
    }

    /// Returns a new version with `replica`'s counter incremented by one,
    /// leaving all other replicas' counters unchanged. This is the only
    /// version-construction operation the core performs: every emitted
    /// descriptor's version is `prior.version.advanced_with(short_id)` (or
    /// `Version::zero().advanced_with(short_id)` when there is no prior).
    pub fn advanced_with(&self, replica: &str) -> Version {
        let mut counters = self.counters.clone();
        let counter = counters.entry(replica.to_string()).or_insert(0);
        *counter += 1;
        Version { counters }
    }

    /// True iff `self` is greater than or equal to `other` in every replica's
    /// counter, and strictly greater in at least one. This is the "strictly
    /// dominates" relation the spec's version-monotonicity invariant (and
    /// test S3: idempotence) relies on.
    pub fn dominates(&self, other: &Version) -> bool {
        let mut strictly_greater = false;
        for (replica, &other_count) in &other.counters {
            let self_count = self.counters.get(replica).copied().unwrap_or(0);
            if self_count < other_count {
                return false;
            }
            if self_count > other_count {
                strictly_greater = true;
            }
        }
        for (replica, &self_count) in &self.counters {
            if !other.counters.contains_key(replica) && self_count > 0 {
                strictly_greater = true;
            }
        }
        strictly_greater
    }

    pub fn counter(&self, replica: &str) -> u64 {
        self.counters.get(replica).copied().unwrap_or(0)
    }
}

/// The unit emitted by the walker and, for files, enriched by the hash
/// pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Relative path from `Dir`, in canonical Unicode normalization form.
    pub name: String,
    pub kind: Kind,
    /// Byte length; zero for anything but a regular file.
    pub size: u64,
    /// 9-bit POSIX mode bits, masked per the platform's `maskModePerm`.
    /// Meaningful only when `no_permissions` is false.
    pub permissions: u32,
    pub no_permissions: bool,
    pub modified_sec: i64,
    pub modified_nanosec: u32,
    /// The local replica's short identifier that stamped this descriptor.
    pub modified_by: String,
    pub version: Version,
    /// Raw link target string; symlinks only.
    pub symlink_target: Option<String>,
    /// Ordered block list, populated by the hash pipeline for files; always
    /// empty for directories and symlinks.
    pub blocks: Vec<Block>,
    /// Status flags read from prior state for comparison purposes. The core
    /// never sets these on newly emitted descriptors; they exist so a
    /// `FileDescriptor` can also represent a prior-snapshot entry.
    pub invalid: bool,
    pub deleted: bool,
}

impl FileDescriptor {
    /// Build a fresh descriptor for an unversioned name: version starts at
    /// `Version::zero().advanced_with(short_id)`, matching the walker's "no
    /// prior descriptor" case.
    pub fn new(name: impl Into<String>, kind: Kind, short_id: &str) -> Self {
        FileDescriptor {
            name: name.into(),
            kind,
            size: 0,
            permissions: 0,
            no_permissions: false,
            modified_sec: 0,
            modified_nanosec: 0,
            modified_by: short_id.to_string(),
            version: Version::zero().advanced_with(short_id),
            symlink_target: None,
            blocks: Vec::new(),
            invalid: false,
            deleted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advanced_with_increments_own_replica_only() {
        let v0 = Version::zero();
        let v1 = v0.advanced_with("r1");
        assert_eq!(v1.counter("r1"), 1);
        assert_eq!(v1.counter("r2"), 0);
    }

    #[test]
    fn advancing_strictly_dominates_prior() {
        let v0 = Version::zero();
        let v1 = v0.advanced_with("r1");
        assert!(v1.dominates(&v0));
        assert!(!v0.dominates(&v1));
    }

    #[test]
    fn equal_versions_do_not_dominate() {
        let v1 = Version::zero().advanced_with("r1");
        let v1b = v1.clone();
        assert!(!v1.dominates(&v1b));
    }

    #[test]
    fn concurrent_replica_histories_are_incomparable() {
        let v0 = Version::zero();
        let a = v0.advanced_with("r1");
        let b = v0.advanced_with("r2");
        assert!(!a.dominates(&b));
        assert!(!b.dominates(&a));
    }
}
