//! Top-level orchestration: wires the Walker, the Progress Accounter, and
//! the Hash Pipeline into a single `scan` call.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver};
use tracing::{debug, trace, warn};

use crate::cancel::CancelToken;
use crate::config::ScanConfig;
use crate::descriptor::FileDescriptor;
use crate::error::ScanError;
use crate::hash::spawn_hasher_pool;
use crate::progress::{ProgressAccounter, ProgressEvent, ProgressPublisher};
use crate::walker;

/// Run a full scan. Returns a receiver of emitted descriptors (the
/// already-final directory/symlink descriptors merged with the enriched
/// file descriptors coming out of the hash pipeline) and a progress
/// subscriber. The output channel closes once every stage has drained,
/// whether the scan ran to completion or was cancelled.
pub fn scan(config: ScanConfig) -> Result<ScanHandle, ScanError> {
    let (output_tx, output_rx) = unbounded();
    let (progress_pub, progress_sub) = if config.progress_tick_interval().is_some() {
        ProgressPublisher::unbounded()
    } else {
        // No emitter will run; the subscriber side is just never fed.
        let (noop_pub, noop_sub) = ProgressPublisher::unbounded();
        (ProgressPublisher::noop(), { drop(noop_pub); noop_sub })
    };

    let accounter = ProgressAccounter::new();
    let tick_interval = config.progress_tick_interval();
    if tick_interval.is_some() {
        accounter.start_ticker();
    }

    let (hash_input_tx, hash_input_rx) = bounded(config.hashers() * 2);
    let hash_output_tx = output_tx.clone();

    let hasher_handles = spawn_hasher_pool(
        config.hashers(),
        config.values.dir.clone(),
        config.values.block_size,
        config.values.use_weak_hashes,
        Arc::clone(&config.primitive),
        hash_input_rx,
        hash_output_tx,
        Some(Arc::clone(&accounter)),
        config.cancel.clone(),
    );

    // Signals pipeline completion (distinct from `config.cancel`, which
    // signals an externally requested abort): fired once the walker and
    // every hasher have exited, so the emitter — and via it the EWMA
    // ticker — stops on a normal finish too, not only on cancellation.
    let pipeline_done = CancelToken::new();

    let emitter_handle = tick_interval.map(|interval_s| {
        spawn_emitter(
            config.values.folder.clone(),
            Arc::clone(&accounter),
            progress_pub.clone(),
            Duration::from_secs(interval_s),
            config.cancel.clone(),
            pipeline_done.clone(),
        )
    });

    let walk_config = config.clone();
    let walk_output_tx = output_tx.clone();
    let progress_mode = tick_interval.is_some();

    let walker_handle = thread::Builder::new()
        .name("walker".to_string())
        .spawn(move || {
            run_walker_and_feed_hashers(
                walk_config,
                hash_input_tx,
                walk_output_tx,
                progress_mode,
                Arc::clone(&accounter),
            )
        })
        .expect("failed to spawn walker thread");

    drop(output_tx);

    let completion_handle = thread::Builder::new()
        .name("scan-completion".to_string())
        .spawn(move || {
            join_and_log(walker_handle, "walker");
            for handle in hasher_handles {
                join_and_log(handle, "hash-worker");
            }
            pipeline_done.cancel();
        })
        .expect("failed to spawn scan-completion thread");

    Ok(ScanHandle {
        output: output_rx,
        progress: progress_sub,
        completion_handle: Some(completion_handle),
        emitter_handle,
    })
}

/// Runs the walker to completion and feeds its needs-hashing output into the
/// hasher pool, in either of the two modes the spec describes:
///
/// - **Progress enabled:** the walker first runs to completion into a
///   buffered `Vec`, so the total expected byte count is known before
///   streaming begins (the two-phase design in spec §4.3/§9).
/// - **Progress disabled:** descriptors stream straight from the walker into
///   the hasher input channel with no buffering, minimizing
///   scan-to-first-hash latency.
fn run_walker_and_feed_hashers(
    config: ScanConfig,
    hash_input_tx: crossbeam_channel::Sender<FileDescriptor>,
    finals_tx: crossbeam_channel::Sender<FileDescriptor>,
    buffered: bool,
    accounter: Arc<ProgressAccounter>,
) {
    let result = if buffered {
        let (walk_hash_tx, walk_hash_rx) = unbounded();
        let result = walker::run(&config, walk_hash_tx, finals_tx);
        if result.is_ok() {
            let buffered: Vec<FileDescriptor> = walk_hash_rx.try_iter().collect();
            let total: u64 = buffered.iter().map(|d| d.size).sum();
            accounter.set_expected_total(total.max(1));

            for descriptor in buffered {
                if config.cancel.is_cancelled() {
                    break;
                }
                if hash_input_tx.send(descriptor).is_err() {
                    break;
                }
            }
        }
        result
    } else {
        walker::run(&config, hash_input_tx, finals_tx)
    };

    if let Err(err) = result {
        // `ScanFatal` is the only variant that should ever be surprising to
        // an operator; everything else (notably `Cancelled`) is the
        // pipeline's normal way of winding down early.
        if err.is_fatal() {
            warn!(error = %err, category = ?err.category(), "scan aborted");
        } else {
            debug!(error = %err, category = ?err.category(), "scan ended early");
        }
        accounter.close();
    }
}

fn spawn_emitter(
    folder: String,
    accounter: Arc<ProgressAccounter>,
    publisher: ProgressPublisher,
    interval: Duration,
    cancel: CancelToken,
    pipeline_done: CancelToken,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("progress-emitter".to_string())
        .spawn(move || {
            let cancelled = cancel.cancelled();
            let done = pipeline_done.cancelled();
            loop {
                crossbeam_channel::select! {
                    recv(cancelled) -> _ => break,
                    recv(done) -> _ => break,
                    default(interval) => {
                        let event = ProgressEvent {
                            folder: folder.clone(),
                            current: accounter.total(),
                            total: accounter.expected_total().max(1),
                            rate: accounter.rate(),
                        };
                        if let Ok(json) = event.to_json() {
                            trace!(event = %json, "progress tick");
                        }
                        publisher.publish(event);
                    }
                }
            }
            accounter.close();
        })
        .expect("failed to spawn progress emitter thread")
}

/// Handle to a running scan: the output descriptor stream, the progress
/// event stream, and the background threads driving them.
pub struct ScanHandle {
    output: Receiver<FileDescriptor>,
    progress: crate::progress::ProgressSubscriber,
    /// Joins the walker thread and every hasher thread, then fires
    /// `pipeline_done`. Owning those handles here (rather than in
    /// `ScanHandle` directly) is what lets the emitter thread detect normal
    /// completion instead of only cancellation.
    completion_handle: Option<thread::JoinHandle<()>>,
    emitter_handle: Option<thread::JoinHandle<()>>,
}

impl ScanHandle {
    pub fn output(&self) -> &Receiver<FileDescriptor> {
        &self.output
    }

    pub fn progress(&self) -> &crate::progress::ProgressSubscriber {
        &self.progress
    }

    /// Block until every stage has drained: the walker finished, all
    /// hashers exited, and (if progress was enabled) the emitter — and its
    /// EWMA ticker — stopped.
    pub fn join(&mut self) {
        if let Some(handle) = self.completion_handle.take() {
            join_and_log(handle, "scan-completion");
        }
        if let Some(handle) = self.emitter_handle.take() {
            join_and_log(handle, "progress-emitter");
        }
    }
}

/// A panicking worker does not poison the pipeline: its channel drop still
/// unblocks peers waiting on it, and the panic is merely logged here rather
/// than propagated.
fn join_and_log(handle: thread::JoinHandle<()>, role: &str) {
    if let Err(panic) = handle.join() {
        let payload = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        warn!(role, payload = %payload, "scan worker thread panicked");
    }
}

impl Drop for ScanHandle {
    fn drop(&mut self) {
        self.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::collaborators::{
        NamedInternalDir, NeverIgnore, OsLstater, PriorSnapshot, TildePrefixTemporary,
    };
    use crate::config::ScanConfigValues;
    use crate::hash::primitive::Blake3AdlerPrimitive;
    use std::path::PathBuf;

    fn test_config(dir: PathBuf) -> ScanConfig {
        ScanConfig {
            values: ScanConfigValues {
                folder: "f".into(),
                dir,
                subs: Vec::new(),
                block_size: 4,
                temp_lifetime: Duration::from_secs(3600),
                ignore_perms: false,
                auto_normalize: false,
                hashers: 2,
                short_id: "r1".into(),
                progress_tick_interval_s: -1,
                use_weak_hashes: false,
                follow_symlinks: Vec::new(),
            },
            matcher: Arc::new(NeverIgnore),
            current_filer: Arc::new(PriorSnapshot::new()),
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
    fn scan_emits_a_hashed_descriptor_for_a_new_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"0123456789").unwrap();
        let config = test_config(dir.path().to_path_buf());

        let mut handle = scan(config).unwrap();
        let mut results = Vec::new();
        for descriptor in handle.output().iter() {
            results.push(descriptor);
        }
        handle.join();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "a.txt");
        assert_eq!(results[0].blocks.len(), 3);
    }

    /// Regression test for the emitter hanging forever on a normal finish:
    /// with progress enabled and no cancellation, `join()` must still
    /// return once the scan completes.
    #[test]
    fn scan_with_progress_enabled_buffers_before_hashing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"0123456789").unwrap();
        let mut config = test_config(dir.path().to_path_buf());
        config.values.progress_tick_interval_s = 0;

        let mut handle = scan(config).unwrap();
        let results: Vec<_> = handle.output().iter().collect();
        handle.join();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].blocks.iter().map(|b| b.length).sum::<usize>(), 10);
    }
}
