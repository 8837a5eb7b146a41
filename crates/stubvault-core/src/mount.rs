//! Mount orchestration: parse, resolve, and version every requested object.

use std::sync::Arc;

use crate::error::MountError;
use crate::objects::parse_attributes;
use crate::proto::{MountRequest, MountResponse, MountedFile, ObjectVersion};
use crate::resolve::resolve;
use crate::rotation::{RotationTrigger, VersionTracker};

/// Handles mount calls against one provider instance.
///
/// Owns the version tracker and the rotation trigger; constructing a second
/// handler yields fully independent rotation state.
pub struct MountHandler {
    tracker: VersionTracker,
    trigger: Arc<dyn RotationTrigger>,
}

impl MountHandler {
    pub fn new(trigger: Arc<dyn RotationTrigger>) -> Self {
        Self {
            tracker: VersionTracker::new(),
            trigger,
        }
    }

    /// Access to the tracker, mainly for assertions in tests.
    pub fn tracker(&self) -> &VersionTracker {
        &self.tracker
    }

    /// Serve one mount call.
    ///
    /// Parsing happens before any state is touched, so a malformed request
    /// never advances an epoch. The trigger is read once per call: all
    /// objects in the request observe the same trigger state.
    pub fn mount(&self, request: &MountRequest) -> Result<MountResponse, MountError> {
        let descriptors = parse_attributes(&request.attributes)?;
        let trigger_active = self.trigger.active();

        tracing::debug!(
            objects = descriptors.len(),
            trigger_active,
            "serving mount call"
        );

        let mut object_version = Vec::with_capacity(descriptors.len());
        let mut files = Vec::with_capacity(descriptors.len());

        for descriptor in &descriptors {
            let id = descriptor.identity();
            let epoch = self.tracker.observe(&id, trigger_active);
            let contents = resolve(descriptor, epoch);

            object_version.push(ObjectVersion {
                id,
                version: VersionTracker::label(epoch),
            });
            files.push(MountedFile {
                path: descriptor.name.clone(),
                contents,
            });
        }

        Ok(MountResponse {
            object_version,
            files,
        })
    }
}
