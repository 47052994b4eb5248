//! Cooperative cancellation, in the idiom of the teacher's
//! `ConcurrencyLimiter`/`ConcurrencyPermit`: a small `Arc`-wrapped
//! coordination primitive with inherent methods, no trait abstraction.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, Receiver, Sender};

/// A single cancellation signal shared by every stage of a scan: the
/// walker, the buffer task, every hasher, and the progress emitter.
///
/// Every blocking channel operation in the pipeline is paired with a
/// `cancelled()` receive in a `crossbeam_channel::select!`, so cancellation
/// is observed within one in-flight filesystem operation or block read.
/// The one `Sender` half lives behind a shared `Mutex<Option<_>>`; dropping
/// it on `cancel()` disconnects every clone of the `Receiver` at once.
#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    closed_tx: Arc<Mutex<Option<Sender<()>>>>,
    closed_rx: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (closed_tx, closed_rx) = bounded(0);
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
            closed_tx: Arc::new(Mutex::new(Some(closed_tx))),
            closed_rx,
        }
    }

    /// Signal cancellation. Idempotent: calling this more than once has no
    /// further effect.
    pub fn cancel(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            self.closed_tx.lock().unwrap().take();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// A receiver that becomes ready (disconnected) once `cancel()` is
    /// called, for use as a `select!` arm alongside a work channel's
    /// receiver.
    pub fn cancelled(&self) -> Receiver<()> {
        self.closed_rx.clone()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        CancelToken::new()
    }
}
