//! Name Normalizer: canonical Unicode form selection, on-disk repair, and
//! collision detection.
//!
//! Grounded in the teacher's `src/core/transform.rs::normalize_path_encoding`,
//! which gates `unicode-normalization` behind an optional feature; this
//! crate promotes it to an unconditional dependency since normalization is a
//! core concern here, not an optional transform.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;

use crate::error::ScanError;

/// What the walker should do with an entry after normalization.
pub enum NormalizeOutcome {
    /// The observed name was already canonical, or was repaired on disk;
    /// proceed with this relative path.
    Proceed(String),
    /// The entry should be skipped: either normalization was declined and
    /// the form doesn't match, or repair hit a conflict.
    Skip,
}

/// The platform's canonical Unicode form: NFD on Darwin, NFC everywhere
/// else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalForm {
    Nfc,
    Nfd,
}

impl CanonicalForm {
    pub fn for_platform() -> Self {
        if cfg!(target_os = "macos") {
            CanonicalForm::Nfd
        } else {
            CanonicalForm::Nfc
        }
    }

    pub fn apply(&self, s: &str) -> String {
        match self {
            CanonicalForm::Nfc => s.nfc().collect(),
            CanonicalForm::Nfd => s.nfd().collect(),
        }
    }
}

/// Apply normalization policy to one relative path, optionally repairing
/// the on-disk name.
///
/// `dir` is the scan root, `rel_path` the observed relative path (already
/// known to be valid UTF-8). When `auto_normalize` is true and the
/// canonical name does not already exist on disk, the entry is renamed in
/// place and the walker proceeds under the canonical name; any other
/// outcome (decline, existing conflict, failed rename) is reported via
/// `ScanError` and the caller should skip the entry.
pub fn normalize(
    dir: &Path,
    rel_path: &str,
    auto_normalize: bool,
) -> Result<NormalizeOutcome, ScanError> {
    let form = CanonicalForm::for_platform();
    let canonical = form.apply(rel_path);

    if canonical == rel_path {
        return Ok(NormalizeOutcome::Proceed(canonical));
    }

    if !auto_normalize {
        warn!(path = rel_path, canonical, "mis-normalized name, skipping");
        return Ok(NormalizeOutcome::Skip);
    }

    let canonical_abs = dir.join(&canonical);
    match std::fs::symlink_metadata(&canonical_abs) {
        Ok(_) => {
            let reason = "canonical name already exists on disk".to_string();
            warn!(path = rel_path, canonical, "normalization conflict");
            Err(ScanError::NormalizationConflict {
                path: PathBuf::from(rel_path),
                reason,
            })
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let observed_abs = dir.join(rel_path);
            match std::fs::rename(&observed_abs, &canonical_abs) {
                Ok(()) => {
                    debug!(from = rel_path, to = canonical, "repaired normalization");
                    Ok(NormalizeOutcome::Proceed(canonical))
                }
                Err(err) => {
                    warn!(path = rel_path, error = %err, "normalization repair failed");
                    Err(ScanError::NormalizationConflict {
                        path: PathBuf::from(rel_path),
                        reason: err.to_string(),
                    })
                }
            }
        }
        Err(err) => Err(ScanError::NormalizationConflict {
            path: PathBuf::from(rel_path),
            reason: err.to_string(),
        }),
    }
}
