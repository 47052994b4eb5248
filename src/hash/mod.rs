//! The Hash Pipeline: a fixed pool of worker threads that turn
//! *needs-hashing* file descriptors into enriched ones carrying block lists.

pub mod primitive;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::descriptor::{Block, FileDescriptor};
use crate::error::ScanError;
use crate::hash::primitive::BlockHashPrimitive;
use crate::progress::ProgressAccounter;

/// Spawn `hashers` worker threads that read from `input` and write enriched
/// descriptors to `output`. Returns the `JoinHandle`s so the caller can wait
/// for the pool to drain on `input` closure, per the spec's termination
/// rule: workers exit once input is closed and drained, and the last worker
/// to exit closes the output stream.
///
/// Mirrors the teacher's `produce_work_items`/`consume_work_items` split in
/// `src/core/directory.rs`: a shared bounded channel feeds a fixed worker
/// count, and pool shutdown is driven by channel closure rather than an
/// explicit stop message.
pub fn spawn_hasher_pool(
    hashers: usize,
    dir: PathBuf,
    block_size: usize,
    use_weak_hashes: bool,
    primitive: Arc<dyn BlockHashPrimitive>,
    input: Receiver<FileDescriptor>,
    output: Sender<FileDescriptor>,
    progress: Option<Arc<ProgressAccounter>>,
    cancel: CancelToken,
) -> Vec<thread::JoinHandle<()>> {
    let hashers = hashers.max(1);
    let mut handles = Vec::with_capacity(hashers);

    for worker_id in 0..hashers {
        let dir = dir.clone();
        let primitive = Arc::clone(&primitive);
        let input = input.clone();
        let output = output.clone();
        let progress = progress.clone();
        let cancel = cancel.clone();

        let handle = thread::Builder::new()
            .name(format!("hash-worker-{worker_id}"))
            .spawn(move || {
                hash_worker_loop(
                    &dir,
                    block_size,
                    use_weak_hashes,
                    primitive.as_ref(),
                    &input,
                    &output,
                    progress.as_deref(),
                    &cancel,
                );
            })
            .expect("failed to spawn hash worker thread");
        handles.push(handle);
    }

    handles
}

fn hash_worker_loop(
    dir: &Path,
    block_size: usize,
    use_weak_hashes: bool,
    primitive: &dyn BlockHashPrimitive,
    input: &Receiver<FileDescriptor>,
    output: &Sender<FileDescriptor>,
    progress: Option<&ProgressAccounter>,
    cancel: &CancelToken,
) {
    let cancelled = cancel.cancelled();
    loop {
        let descriptor = crossbeam_channel::select! {
            recv(input) -> msg => match msg {
                Ok(descriptor) => descriptor,
                Err(_) => break,
            },
            recv(cancelled) -> _ => break,
        };

        match hash_one(dir, block_size, use_weak_hashes, primitive, &descriptor, progress, cancel)
        {
            Ok(Some(enriched)) => {
                if output.send(enriched).is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!(name = %descriptor.name, "hashing cancelled mid-file, descriptor dropped");
            }
            Err(err) => {
                warn!(error = %err, name = %descriptor.name, "hash error, descriptor dropped");
            }
        }
    }
}

/// Hash a single file. Returns `Ok(None)` when cancellation interrupted the
/// read (no partial descriptor is ever emitted) and `Err` when the file
/// shrank, disappeared, or was unreadable.
fn hash_one(
    dir: &Path,
    block_size: usize,
    use_weak_hashes: bool,
    primitive: &dyn BlockHashPrimitive,
    descriptor: &FileDescriptor,
    progress: Option<&ProgressAccounter>,
    cancel: &CancelToken,
) -> Result<Option<FileDescriptor>, ScanError> {
    let abs_path = dir.join(&descriptor.name);
    let mut file = std::fs::File::open(&abs_path).map_err(|err| ScanError::HashError {
        path: abs_path.clone(),
        reason: err.to_string(),
    })?;

    let mut blocks = Vec::new();
    let mut buf = vec![0u8; block_size.max(1)];
    let mut offset: u64 = 0;
    let mut total_read: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Ok(None);
        }

        let n = file.read(&mut buf).map_err(|err| ScanError::HashError {
            path: abs_path.clone(),
            reason: err.to_string(),
        })?;
        if n == 0 {
            break;
        }
        let chunk = &buf[..n];
        let strong_hash = primitive.strong_hash(chunk);
        let weak_hash = use_weak_hashes.then(|| primitive.weak_hash(chunk));
        blocks.push(Block {
            offset,
            length: n,
            strong_hash,
            weak_hash,
        });
        offset += n as u64;
        total_read += n as u64;
        if let Some(progress) = progress {
            progress.update(n as u64);
        }
    }

    if total_read != descriptor.size {
        return Err(ScanError::HashError {
            path: abs_path,
            reason: format!(
                "size changed mid-hash: expected {}, read {}",
                descriptor.size, total_read
            ),
        });
    }

    let mut enriched = descriptor.clone();
    enriched.blocks = blocks;
    Ok(Some(enriched))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Kind;
    use crate::hash::primitive::Blake3AdlerPrimitive;
    use std::io::Write;

    #[test]
    fn hashes_a_small_file_into_expected_block_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"0123456789").unwrap();

        let descriptor = FileDescriptor {
            size: 10,
            ..FileDescriptor::new("a.txt", Kind::File, "r1")
        };
        let cancel = CancelToken::new();
        let primitive = Blake3AdlerPrimitive;
        let result = hash_one(dir.path(), 4, true, &primitive, &descriptor, None, &cancel)
            .unwrap()
            .unwrap();

        assert_eq!(result.blocks.len(), 3);
        assert_eq!(result.blocks[0].length, 4);
        assert_eq!(result.blocks[1].length, 4);
        assert_eq!(result.blocks[2].length, 2);
        assert!(result.blocks[0].weak_hash.is_some());
    }

    #[test]
    fn size_mismatch_mid_hash_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"short").unwrap();

        let descriptor = FileDescriptor {
            size: 999,
            ..FileDescriptor::new("a.txt", Kind::File, "r1")
        };
        let cancel = CancelToken::new();
        let primitive = Blake3AdlerPrimitive;
        let result = hash_one(dir.path(), 4, false, &primitive, &descriptor, None, &cancel);
        assert!(result.is_err());
    }

    #[test]
    fn cancellation_drops_the_descriptor_without_emitting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, vec![0u8; 64]).unwrap();

        let descriptor = FileDescriptor {
            size: 64,
            ..FileDescriptor::new("a.txt", Kind::File, "r1")
        };
        let cancel = CancelToken::new();
        cancel.cancel();
        let primitive = Blake3AdlerPrimitive;
        let result = hash_one(dir.path(), 4, false, &primitive, &descriptor, None, &cancel).unwrap();
        assert!(result.is_none());
    }
}
