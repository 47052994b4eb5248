//! Progress Accounter: a thread-safe byte counter plus a 1-minute EWMA rate,
//! and the publish/subscribe plumbing used to emit scan progress events.
//!
//! The publish/subscribe shape (`ProgressPublisher`/`ProgressSubscriber`
//! over a `crossbeam_channel`) mirrors the teacher's transfer-progress
//! module (`src/core/progress.rs`); the EWMA rate calculation itself has no
//! teacher precedent and is new to this crate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;

/// One tick of the accounter's private 5-second timer. A 1-minute window
/// sampled every 5 seconds is 12 samples; the smoothing constant follows
/// the conventional EWMA choice `alpha = 2 / (N + 1)`.
const TICK_INTERVAL: Duration = Duration::from_secs(5);
const WINDOW_SAMPLES: f64 = 12.0;

/// `{ folder, current, total, rate }`, emitted on the progress cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub folder: String,
    pub current: u64,
    pub total: u64,
    pub rate: f64,
}

impl ProgressEvent {
    /// Render as the `{ "folder": ..., "current": ..., "total": ...,
    /// "rate": ... }` wire payload from spec §6, for embedders that forward
    /// progress events to a JSON event bus rather than consuming the struct
    /// directly.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Progress publisher: sends scan progress events to subscribers.
#[derive(Clone)]
pub struct ProgressPublisher {
    sender: Option<Sender<ProgressEvent>>,
}

impl ProgressPublisher {
    pub fn new(buffer_size: usize) -> (Self, ProgressSubscriber) {
        let (tx, rx) = bounded(buffer_size);
        (
            ProgressPublisher { sender: Some(tx) },
            ProgressSubscriber { receiver: rx },
        )
    }

    pub fn unbounded() -> (Self, ProgressSubscriber) {
        let (tx, rx) = unbounded();
        (
            ProgressPublisher { sender: Some(tx) },
            ProgressSubscriber { receiver: rx },
        )
    }

    /// A publisher that discards everything, for `ProgressTickIntervalS < 0`.
    pub fn noop() -> Self {
        ProgressPublisher { sender: None }
    }

    pub fn publish(&self, event: ProgressEvent) {
        if let Some(ref tx) = self.sender {
            let _ = tx.send(event);
        }
    }
}

pub struct ProgressSubscriber {
    receiver: Receiver<ProgressEvent>,
}

impl ProgressSubscriber {
    pub fn receiver(&self) -> &Receiver<ProgressEvent> {
        &self.receiver
    }

    pub fn try_recv(&self) -> Option<ProgressEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn recv(&self) -> Option<ProgressEvent> {
        self.receiver.recv().ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = ProgressEvent> + '_ {
        self.receiver.iter()
    }
}

struct EwmaState {
    rate: f64,
    since_last_tick: u64,
}

/// Thread-safe cumulative byte counter with a decaying rate estimate.
///
/// `total` is a plain atomic; the EWMA needs a tick-and-reset sequence so it
/// lives behind a `Mutex`, following the teacher's `ConcurrencyLimiter`
/// pattern of pairing an atomic fast path with a mutex for the part that
/// needs compound updates.
pub struct ProgressAccounter {
    total: AtomicU64,
    expected_total: AtomicU64,
    ewma: Mutex<EwmaState>,
    ticker: Mutex<Option<(thread::JoinHandle<()>, CancelToken)>>,
}

impl ProgressAccounter {
    pub fn new() -> Arc<Self> {
        Arc::new(ProgressAccounter {
            total: AtomicU64::new(0),
            expected_total: AtomicU64::new(1),
            ewma: Mutex::new(EwmaState {
                rate: 0.0,
                since_last_tick: 0,
            }),
            ticker: Mutex::new(None),
        })
    }

    /// Add `n` bytes to the cumulative total and to the current tick's
    /// pending increment.
    pub fn update(&self, n: u64) {
        self.total.fetch_add(n, Ordering::SeqCst);
        let mut state = self.ewma.lock().unwrap();
        state.since_last_tick += n;
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Set the denominator for progress events, once the walker's buffered
    /// phase has finished enumerating and the total expected byte count is
    /// known.
    pub fn set_expected_total(&self, total: u64) {
        self.expected_total.store(total.max(1), Ordering::SeqCst);
    }

    pub fn expected_total(&self) -> u64 {
        self.expected_total.load(Ordering::SeqCst)
    }

    /// Current EWMA rate, in bytes per second.
    pub fn rate(&self) -> f64 {
        self.ewma.lock().unwrap().rate
    }

    /// Decay the rate by one tick: fold in the bytes seen since the last
    /// tick as a per-second rate, weighted by the EWMA smoothing constant.
    fn tick(&self) {
        let mut state = self.ewma.lock().unwrap();
        let sample_rate = state.since_last_tick as f64 / TICK_INTERVAL.as_secs_f64();
        state.since_last_tick = 0;
        let alpha = 2.0 / (WINDOW_SAMPLES + 1.0);
        state.rate = alpha * sample_rate + (1.0 - alpha) * state.rate;
    }

    /// Start the private 5-second ticker. Idempotent: calling this while a
    /// ticker is already running is a no-op.
    pub fn start_ticker(self: &Arc<Self>) {
        let mut guard = self.ticker.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let cancel = CancelToken::new();
        let accounter = Arc::clone(self);
        let ticker_cancel = cancel.clone();
        let handle = thread::Builder::new()
            .name("progress-ticker".to_string())
            .spawn(move || loop {
                let cancelled = ticker_cancel.cancelled();
                crossbeam_channel::select! {
                    recv(cancelled) -> _ => break,
                    default(TICK_INTERVAL) => accounter.tick(),
                }
            })
            .expect("failed to spawn progress ticker thread");
        *guard = Some((handle, cancel));
    }

    /// Stop the 5-second ticker. Safe to call more than once, and from both
    /// normal and abnormal (cancelled scan) termination paths.
    pub fn close(&self) {
        let handle = self.ticker.lock().unwrap().take();
        if let Some((handle, cancel)) = handle {
            cancel.cancel();
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_accumulates_total() {
        let accounter = ProgressAccounter::new();
        accounter.update(100);
        accounter.update(50);
        assert_eq!(accounter.total(), 150);
    }

    #[test]
    fn rate_is_zero_before_any_tick() {
        let accounter = ProgressAccounter::new();
        accounter.update(1000);
        assert_eq!(accounter.rate(), 0.0);
    }

    #[test]
    fn tick_folds_pending_bytes_into_a_positive_rate() {
        let accounter = ProgressAccounter::new();
        accounter.update(5 * 5); // 5 bytes/sec over one 5s tick
        accounter.tick();
        assert!(accounter.rate() > 0.0);
    }

    #[test]
    fn close_without_start_does_not_panic() {
        let accounter = ProgressAccounter::new();
        accounter.close();
        accounter.close();
    }

    #[test]
    fn publisher_subscriber_roundtrip() {
        let (publisher, subscriber) = ProgressPublisher::new(4);
        publisher.publish(ProgressEvent {
            folder: "f".into(),
            current: 1,
            total: 10,
            rate: 0.0,
        });
        let event = subscriber.try_recv().unwrap();
        assert_eq!(event.total, 10);
    }

    #[test]
    fn noop_publisher_discards_silently() {
        let publisher = ProgressPublisher::noop();
        publisher.publish(ProgressEvent {
            folder: "f".into(),
            current: 1,
            total: 1,
            rate: 0.0,
        });
    }

    #[test]
    fn progress_event_serializes_to_the_documented_json_shape() {
        let event = ProgressEvent {
            folder: "photos".into(),
            current: 42,
            total: 100,
            rate: 3.5,
        };
        let json = event.to_json().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["folder"], "photos");
        assert_eq!(parsed["current"], 42);
        assert_eq!(parsed["total"], 100);
        assert_eq!(parsed["rate"], 3.5);
    }
}
