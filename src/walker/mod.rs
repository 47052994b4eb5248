//! The Walker: traversal, per-entry change detection, and dispatch into the
//! needs-hashing / already-final descriptor streams.
//!
//! Grounded in the teacher's producer half of `src/core/directory.rs`
//! (`produce_work_items`): a single sequential traversal using `walkdir`,
//! filtering and classifying each entry before it is handed downstream. This
//! crate's walker stays single-threaded per the spec's design rationale
//! (`readdir` is cheap relative to hashing), unlike the teacher's own
//! walker, which already runs on the producer side of a channel and is
//! reused here essentially unchanged in shape.

use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::SystemTime;

use crossbeam_channel::Sender;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::{mask_mode_perm, perms_equal, ScanConfig};
use crate::descriptor::{FileDescriptor, Kind, Version};
use crate::error::ScanError;
use crate::normalize::{self, NormalizeOutcome};

static SYMLINK_TARGETS_FILE_WARNED: Once = Once::new();

struct Root {
    /// Absolute directory this root walks.
    abs_dir: PathBuf,
    /// Relative-path prefix prepended to everything found under `abs_dir`,
    /// joined with `/`. Empty for ordinary roots, whose entries already sit
    /// under `Dir` so their relative path is `entry.strip_prefix(dir)`.
    prefix: Option<String>,
}

/// Compute the traversal roots: `Dir` (or `Dir/sub` for each `Subs` entry)
/// plus any admitted `FollowSymlinks` targets.
fn compute_roots(config: &ScanConfig) -> Result<Vec<Root>, ScanError> {
    let dir = &config.values.dir;
    let meta = std::fs::metadata(dir).map_err(|_| ScanError::ScanFatal(dir.clone()))?;
    if !meta.is_dir() {
        return Err(ScanError::ScanFatal(dir.clone()));
    }

    let mut base_roots = Vec::new();
    if config.values.subs.is_empty() {
        base_roots.push(dir.clone());
    } else {
        for sub in &config.values.subs {
            base_roots.push(dir.join(sub));
        }
    }

    let mut roots: Vec<Root> = base_roots
        .iter()
        .cloned()
        .map(|abs_dir| Root {
            abs_dir,
            prefix: None,
        })
        .collect();

    for link_rel in &config.values.follow_symlinks {
        let link_abs = dir.join(link_rel);

        let beneath_admitted = base_roots.iter().any(|root| is_beneath(&link_abs, root));
        if !beneath_admitted {
            continue;
        }

        let resolved = match std::fs::metadata(&link_abs) {
            Ok(meta) => meta,
            Err(_) => continue, // non-existent follow-symlink: silently skipped
        };

        if !resolved.is_dir() {
            SYMLINK_TARGETS_FILE_WARNED.call_once(|| {
                warn!(
                    link = %link_rel,
                    "FollowSymlinks entry targets a file, not a directory; rejecting"
                );
            });
            continue;
        }

        let target = std::fs::canonicalize(&link_abs).unwrap_or(link_abs);
        roots.push(Root {
            abs_dir: target,
            prefix: Some(link_rel.clone()),
        });
    }

    Ok(roots)
}

/// Prefix check with a trailing separator, to defeat partial-component
/// matches like `/a/bc` being considered "beneath" `/a/b`.
fn is_beneath(path: &Path, root: &Path) -> bool {
    if path == root {
        return true;
    }
    let mut root_with_sep = root.as_os_str().to_os_string();
    root_with_sep.push(std::path::MAIN_SEPARATOR.to_string());
    path.as_os_str()
        .to_string_lossy()
        .starts_with(&*root_with_sep.to_string_lossy())
}

fn relative_name(root: &Root, dir: &Path, abs_path: &Path) -> Option<String> {
    let stripped = match &root.prefix {
        None => abs_path.strip_prefix(dir).ok()?,
        Some(_) => abs_path.strip_prefix(&root.abs_dir).ok()?,
    };
    let suffix = stripped.to_str()?.replace(std::path::MAIN_SEPARATOR, "/");
    match &root.prefix {
        None => Some(suffix),
        Some(prefix) if suffix.is_empty() => Some(prefix.clone()),
        Some(prefix) => Some(format!("{prefix}/{suffix}")),
    }
}

/// Run the walker to completion, sending *needs-hashing* file descriptors to
/// `needs_hashing` and already-final (directory/symlink) descriptors to
/// `finals`. Returns `Err(ScanError::ScanFatal)` if `Dir` does not resolve to
/// a directory; every other error is logged and the offending entry/subtree
/// skipped.
pub fn run(
    config: &ScanConfig,
    needs_hashing: Sender<FileDescriptor>,
    finals: Sender<FileDescriptor>,
) -> Result<(), ScanError> {
    let roots = compute_roots(config)?;
    let dir = config.values.dir.clone();

    for root in &roots {
        if config.cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        walk_root(config, root, &dir, &needs_hashing, &finals);
    }

    if config.cancel.is_cancelled() {
        return Err(ScanError::Cancelled);
    }

    Ok(())
}

fn walk_root(
    config: &ScanConfig,
    root: &Root,
    dir: &Path,
    needs_hashing: &Sender<FileDescriptor>,
    finals: &Sender<FileDescriptor>,
) {
    let mut it = WalkDir::new(&root.abs_dir).follow_links(false).into_iter();

    loop {
        if config.cancel.is_cancelled() {
            break;
        }
        let entry = match it.next() {
            None => break,
            Some(Ok(entry)) => entry,
            Some(Err(err)) => {
                let path = err
                    .path()
                    .map(|p| p.to_path_buf())
                    .unwrap_or_else(|| root.abs_dir.clone());
                let io_err = err.into_io_error().unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::Other, "directory traversal error")
                });
                let scan_err = ScanError::TraversalError { path, source: io_err };
                warn!(error = %scan_err, category = ?scan_err.category(), "traversal error, skipping");
                continue;
            }
        };

        // Step 1: skip the root itself.
        if entry.depth() == 0 {
            continue;
        }

        let abs_path = entry.path().to_path_buf();

        let rel = match relative_name(root, dir, &abs_path) {
            Some(rel) => rel,
            None => {
                let scan_err = ScanError::InvalidEncoding(abs_path.clone());
                warn!(error = %scan_err, category = ?scan_err.category(), "invalid encoding, skipping");
                continue;
            }
        };

        // Step 2: re-lstat, don't trust the directory-iteration stat.
        let info = match config.lstater.lstat(&abs_path) {
            Ok(info) => info,
            Err(err) => {
                let scan_err = ScanError::TraversalError {
                    path: abs_path.clone(),
                    source: err,
                };
                warn!(error = %scan_err, category = ?scan_err.category(), "traversal error, skipping");
                if entry.file_type().is_dir() {
                    it.skip_current_dir();
                }
                continue;
            }
        };

        // Step 3: temporary-file predicate.
        if info.is_file && config.temporary.is_temporary(&rel) {
            if is_older_than(info.modified, config.values.temp_lifetime) {
                if let Err(err) = std::fs::remove_file(&abs_path) {
                    warn!(path = %abs_path.display(), error = %err, "failed to delete stale temporary file");
                }
                continue;
            }
        }

        // Step 4: internal-path predicate.
        if config.internal.is_internal(&rel) {
            if entry.file_type().is_dir() {
                it.skip_current_dir();
            }
            continue;
        }

        // Step 5: ignore matcher.
        if config.matcher.is_ignored(&rel) {
            if entry.file_type().is_dir() {
                it.skip_current_dir();
            }
            continue;
        }

        // Step 7: normalize.
        let rel = match normalize::normalize(dir, &rel, config.values.auto_normalize) {
            Ok(NormalizeOutcome::Proceed(name)) => name,
            Ok(NormalizeOutcome::Skip) => {
                if entry.file_type().is_dir() {
                    it.skip_current_dir();
                }
                continue;
            }
            Err(err) => {
                debug!(error = %err, "normalization conflict, skipping");
                if entry.file_type().is_dir() {
                    it.skip_current_dir();
                }
                continue;
            }
        };

        // Step 8: dispatch by type.
        if info.is_symlink {
            if config.values.follow_symlinks.iter().any(|f| f == &rel) {
                continue; // already admitted as a traversal root
            }
            handle_symlink(config, &abs_path, &rel, &info, finals);
        } else if info.is_dir {
            handle_directory(config, &rel, &info, finals);
        } else if info.is_file {
            handle_file(config, &rel, &info, needs_hashing);
        }
        // devices/sockets/fifos: fall through, nothing emitted.
    }
}

fn is_older_than(modified: SystemTime, lifetime: std::time::Duration) -> bool {
    SystemTime::now()
        .duration_since(modified)
        .map(|age| age > lifetime)
        .unwrap_or(false)
}

fn cur_mode(info: &crate::collaborators::FileInfo) -> u32 {
    let mut mode = info.mode;
    if cfg!(windows) {
        // Executable-extension detection is out of scope here: the caller's
        // `Lstater` is expected to have already folded `0111` into `mode`
        // for executable extensions, per the spec's Windows curMode note.
        mode |= 0;
    }
    mode
}

fn handle_file(
    config: &ScanConfig,
    rel: &str,
    info: &crate::collaborators::FileInfo,
    needs_hashing: &Sender<FileDescriptor>,
) {
    let prior = config.current_filer.current_file(rel);
    let cur_permissions = cur_mode(info) & mask_mode_perm();
    let modified_sec = info
        .modified
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let modified_nsec = info
        .modified
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);

    if let Some(prior) = &prior {
        let perms_ok = config.values.ignore_perms
            || prior.no_permissions
            || perms_equal(prior.permissions, cur_permissions);
        let unchanged = perms_ok
            && !prior.deleted
            && prior.modified_sec == modified_sec
            && prior.modified_nanosec == modified_nsec
            && prior.kind == Kind::File
            && !prior.invalid
            && prior.size == info.len;
        if unchanged {
            return;
        }
    }

    let version = prior
        .as_ref()
        .map(|p| p.version.advanced_with(&config.values.short_id))
        .unwrap_or_else(|| Version::zero().advanced_with(&config.values.short_id));

    let descriptor = FileDescriptor {
        name: rel.to_string(),
        kind: Kind::File,
        size: info.len,
        permissions: cur_permissions,
        no_permissions: config.values.ignore_perms,
        modified_sec,
        modified_nanosec: modified_nsec,
        modified_by: config.values.short_id.clone(),
        version,
        symlink_target: None,
        blocks: Vec::new(),
        invalid: false,
        deleted: false,
    };

    let _ = needs_hashing.send(descriptor);
}

fn handle_directory(
    config: &ScanConfig,
    rel: &str,
    info: &crate::collaborators::FileInfo,
    finals: &Sender<FileDescriptor>,
) {
    let prior = config.current_filer.current_file(rel);
    let cur_permissions = cur_mode(info) & mask_mode_perm();

    if let Some(prior) = &prior {
        let perms_ok = config.values.ignore_perms
            || prior.no_permissions
            || perms_equal(prior.permissions, cur_permissions);
        let unchanged =
            perms_ok && !prior.deleted && prior.kind == Kind::Directory && !prior.invalid;
        if unchanged {
            return;
        }
    }

    let version = prior
        .as_ref()
        .map(|p| p.version.advanced_with(&config.values.short_id))
        .unwrap_or_else(|| Version::zero().advanced_with(&config.values.short_id));

    let descriptor = FileDescriptor {
        name: rel.to_string(),
        kind: Kind::Directory,
        size: 0,
        permissions: cur_permissions,
        no_permissions: config.values.ignore_perms,
        modified_sec: 0,
        modified_nanosec: 0,
        modified_by: config.values.short_id.clone(),
        version,
        symlink_target: None,
        blocks: Vec::new(),
        invalid: false,
        deleted: false,
    };

    let _ = finals.send(descriptor);
}

fn handle_symlink(
    config: &ScanConfig,
    abs_path: &Path,
    rel: &str,
    _info: &crate::collaborators::FileInfo,
    finals: &Sender<FileDescriptor>,
) {
    if cfg!(windows) {
        return; // no symlink semantics on Windows
    }

    let target = match std::fs::read_link(abs_path) {
        Ok(target) => target.to_string_lossy().into_owned(),
        Err(err) => {
            warn!(path = %abs_path.display(), error = %err, "failed to read symlink target, skipping");
            return;
        }
    };

    let prior = config.current_filer.current_file(rel);
    if let Some(prior) = &prior {
        let unchanged = !prior.deleted
            && prior.kind == Kind::Symlink
            && !prior.invalid
            && prior.symlink_target.as_deref() == Some(target.as_str());
        if unchanged {
            return;
        }
    }

    let version = prior
        .as_ref()
        .map(|p| p.version.advanced_with(&config.values.short_id))
        .unwrap_or_else(|| Version::zero().advanced_with(&config.values.short_id));

    let descriptor = FileDescriptor {
        name: rel.to_string(),
        kind: Kind::Symlink,
        size: 0,
        permissions: 0,
        no_permissions: true,
        modified_sec: 0,
        modified_nanosec: 0,
        modified_by: config.values.short_id.clone(),
        version,
        symlink_target: Some(target),
        blocks: Vec::new(),
        invalid: false,
        deleted: false,
    };

    let _ = finals.send(descriptor);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{NamedInternalDir, NeverIgnore, OsLstater, PriorSnapshot, TildePrefixTemporary};
    use crate::hash::primitive::Blake3AdlerPrimitive;
    use crate::cancel::CancelToken;
    use crate::config::ScanConfigValues;
    use std::sync::Arc;

    fn test_config(dir: PathBuf, prior: PriorSnapshot) -> ScanConfig {
        ScanConfig {
            values: ScanConfigValues {
                folder: "f".into(),
                dir,
                subs: Vec::new(),
                block_size: 4,
                temp_lifetime: std::time::Duration::from_secs(3600),
                ignore_perms: false,
                auto_normalize: false,
                hashers: 2,
                short_id: "r1".into(),
                progress_tick_interval_s: -1,
                use_weak_hashes: false,
                follow_symlinks: Vec::new(),
            },
            matcher: Arc::new(NeverIgnore),
            current_filer: Arc::new(prior),
            lstater: Arc::new(OsLstater),
            temporary: Arc::new(TildePrefixTemporary),
            internal: Arc::new(NamedInternalDir {
                name: ".scancore".into(),
            }),
            primitive: Arc::new(Blake3AdlerPrimitive),
            cancel: CancelToken::new(),
        }
    }

    #[test]
    fn new_file_is_emitted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"0123456789").unwrap();
        let config = test_config(dir.path().to_path_buf(), PriorSnapshot::new());

        let (hash_tx, hash_rx) = crossbeam_channel::unbounded();
        let (final_tx, final_rx) = crossbeam_channel::unbounded();
        run(&config, hash_tx, final_tx).unwrap();

        let descriptors: Vec<_> = hash_rx.try_iter().collect();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].name, "a.txt");
        assert_eq!(descriptors[0].size, 10);
        assert!(final_rx.try_recv().is_err());
    }

    #[test]
    fn unchanged_file_is_not_emitted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello").unwrap();
        let meta = std::fs::symlink_metadata(&path).unwrap();
        let modified = meta.modified().unwrap();
        let modified_sec = modified
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64;
        let modified_nsec = modified
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .subsec_nanos();

        let mut prior = PriorSnapshot::new();
        let mut descriptor = FileDescriptor::new("a.txt", Kind::File, "r1");
        descriptor.size = 5;
        descriptor.modified_sec = modified_sec;
        descriptor.modified_nanosec = modified_nsec;
        descriptor.no_permissions = true;
        prior.insert(descriptor);

        let config = test_config(dir.path().to_path_buf(), prior);
        let (hash_tx, hash_rx) = crossbeam_channel::unbounded();
        let (final_tx, _final_rx) = crossbeam_channel::unbounded();
        run(&config, hash_tx, final_tx).unwrap();

        assert!(hash_rx.try_recv().is_err());
    }

    #[test]
    fn nonexistent_root_is_fatal() {
        let config = test_config(PathBuf::from("/does/not/exist"), PriorSnapshot::new());
        let (hash_tx, _hash_rx) = crossbeam_channel::unbounded();
        let (final_tx, _final_rx) = crossbeam_channel::unbounded();
        let result = run(&config, hash_tx, final_tx);
        assert!(matches!(result, Err(ScanError::ScanFatal(_))));
    }

    #[test]
    fn stale_temporary_file_is_deleted_and_not_emitted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("~scratch");
        std::fs::write(&path, b"x").unwrap();
        let old_time = std::time::SystemTime::now() - std::time::Duration::from_secs(7200);
        filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(old_time)).unwrap();

        let mut config = test_config(dir.path().to_path_buf(), PriorSnapshot::new());
        config.values.temp_lifetime = std::time::Duration::from_secs(3600);

        let (hash_tx, hash_rx) = crossbeam_channel::unbounded();
        let (final_tx, _final_rx) = crossbeam_channel::unbounded();
        run(&config, hash_tx, final_tx).unwrap();

        assert!(hash_rx.try_recv().is_err());
        assert!(!path.exists());
    }

    #[test]
    #[cfg(unix)]
    fn followed_symlink_is_admitted_as_a_root_and_prefixes_its_contents() {
        let base = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        std::fs::write(elsewhere.path().join("inner.txt"), b"hi").unwrap();

        std::os::unix::fs::symlink(elsewhere.path(), base.path().join("link")).unwrap();

        let mut config = test_config(base.path().to_path_buf(), PriorSnapshot::new());
        config.values.follow_symlinks = vec!["link".to_string()];

        let (hash_tx, hash_rx) = crossbeam_channel::unbounded();
        let (final_tx, final_rx) = crossbeam_channel::unbounded();
        run(&config, hash_tx, final_tx).unwrap();

        let files: Vec<_> = hash_rx.try_iter().collect();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "link/inner.txt");

        // No symlink descriptor is ever emitted for the followed root itself.
        let finals: Vec<_> = final_rx.try_iter().collect();
        assert!(finals.iter().all(|d| d.kind != Kind::Symlink));
    }
}
