//! orbit-core-scan — the scanning core of a file-synchronization engine:
//! directory traversal and change detection, pipelined parallel hashing,
//! progress accounting, and filesystem-name normalization.
//!
//! The block-hashing primitive's algorithm, the ignore-pattern language, the
//! prior-state store, the event bus, and the replication protocol that
//! consumes emitted descriptors are all external collaborators, specified
//! only at their trait boundary (see [`collaborators`] and
//! [`hash::primitive`]).

pub mod cancel;
pub mod collaborators;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod hash;
pub mod logging;
pub mod normalize;
pub mod progress;
pub mod scan;
pub mod walker;

pub use cancel::CancelToken;
pub use collaborators::{CurrentFiler, IgnoreMatcher, InternalPredicate, Lstater, PriorSnapshot, TemporaryPredicate};
pub use config::{ScanConfig, ScanConfigValues};
pub use descriptor::{Block, FileDescriptor, Kind, Version};
pub use error::{ErrorCategory, ScanError};
pub use hash::primitive::{Blake3AdlerPrimitive, BlockHashPrimitive};
pub use progress::{ProgressAccounter, ProgressEvent, ProgressPublisher, ProgressSubscriber};
pub use scan::{scan, ScanHandle};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
