//! Per-object version state and the rotation trigger seam.
//!
//! Each object identity carries an integer epoch, starting at 1. When the
//! rotation trigger is observed active during a mount call, identities
//! still at the initial epoch advance by one; epochs never regress. The
//! trigger source is a trait so tests can flip rotation deterministically
//! without touching the process environment.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// Rotation trigger
// ---------------------------------------------------------------------------

/// Environment variable read by [`EnvTrigger`].
pub const ROTATION_ENV: &str = "ROTATION_ENABLED";

/// Source of the external rotation signal. Read once per mount call.
pub trait RotationTrigger: Send + Sync {
    /// Current trigger state. Absence of the signal means inactive.
    fn active(&self) -> bool;
}

/// Trigger backed by the `ROTATION_ENABLED` environment variable.
///
/// Only the exact value `"true"` counts as active; an unset variable or any
/// other value is inactive.
#[derive(Debug, Default)]
pub struct EnvTrigger;

impl RotationTrigger for EnvTrigger {
    fn active(&self) -> bool {
        std::env::var(ROTATION_ENV).is_ok_and(|v| v == "true")
    }
}

/// Programmatically controlled trigger, for tests and embedders that drive
/// rotation out-of-band.
#[derive(Debug, Clone, Default)]
pub struct ManualTrigger {
    active: Arc<AtomicBool>,
}

impl ManualTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }
}

impl RotationTrigger for ManualTrigger {
    fn active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Version tracker
// ---------------------------------------------------------------------------

/// Process-wide epoch map, one counter per object identity.
///
/// Owned by the server instance rather than held in a global, so parallel
/// tests can construct independent servers. The single mutex serializes
/// every read-modify-write, which is enough at this concurrency level and
/// rules out lost updates.
#[derive(Debug, Default)]
pub struct VersionTracker {
    epochs: Mutex<HashMap<String, u64>>,
}

impl VersionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current epoch for an identity. Unseen identities are at epoch 1.
    pub fn current_epoch(&self, id: &str) -> u64 {
        let epochs = self.epochs.lock().expect("epoch map poisoned");
        epochs.get(id).copied().unwrap_or(1)
    }

    /// Record one observation of an identity and return its epoch for this
    /// call.
    ///
    /// An active trigger advances an identity still at the initial epoch by
    /// one; an identity that has already rotated keeps its epoch. With the
    /// trigger inactive this is a plain read.
    pub fn observe(&self, id: &str, trigger_active: bool) -> u64 {
        let mut epochs = self.epochs.lock().expect("epoch map poisoned");
        let epoch = epochs.entry(id.to_owned()).or_insert(1);
        if trigger_active && *epoch == 1 {
            *epoch += 1;
            tracing::debug!(id, epoch = *epoch, "rotated object to new epoch");
        }
        *epoch
    }

    /// Version label for an epoch, by the `"v" + epoch` convention.
    pub fn label(epoch: u64) -> String {
        format!("v{epoch}")
    }
}
