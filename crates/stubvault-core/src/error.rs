//! Error taxonomy for mount handling.
//!
//! Every failure mode a driver can provoke gets its own variant so that
//! end-to-end tests can assert on the specific kind, not a generic failure.
//! Parsing and resolution errors abort the whole mount call; no partial
//! response is ever returned.

/// Errors produced while handling a mount request.
#[derive(Debug, thiserror::Error)]
pub enum MountError {
    /// The outer attributes value is not a valid JSON string map.
    #[error("malformed attributes: {0}")]
    MalformedAttributes(#[from] serde_json::Error),

    /// The attributes map has no `objects` key.
    #[error("attributes missing 'objects' key")]
    MissingObjects,

    /// The nested object list could not be decoded into per-object records.
    #[error("malformed object list: {0}")]
    MalformedObjectList(#[from] serde_yaml::Error),

    /// `objectType` is not one of the recognized values.
    #[error("unknown object type {ty:?} for object {name:?}")]
    UnknownObjectType { name: String, ty: String },
}

impl MountError {
    /// Stable wire code for this error kind.
    ///
    /// `MissingObjects` is reported as `malformed_attributes`: it is the
    /// "lacks an objects key" half of the outer-decode contract, and callers
    /// classify on the outer/inner stage, not on which half failed.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedAttributes(_) | Self::MissingObjects => "malformed_attributes",
            Self::MalformedObjectList(_) => "malformed_object_list",
            Self::UnknownObjectType { .. } => "unknown_object_type",
        }
    }
}
