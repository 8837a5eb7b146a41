//! Decoding of the request attribute blob into object descriptors.
//!
//! The driver packs the object list two layers deep: the attributes field
//! is a JSON string map, and its `objects` value is a YAML document whose
//! `array` key holds a list of strings, each string itself a YAML record:
//!
//! ```yaml
//! array:
//!   - |
//!     objectName: foo
//!     objectType: secret
//! ```
//!
//! The two stages are decoded separately so a caller can tell a broken
//! outer map (`malformed_attributes`) from a broken inner list
//! (`malformed_object_list`).

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

use crate::error::MountError;

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// The kind of object a descriptor names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Secret,
    Key,
}

impl ObjectType {
    /// Parse the wire value of `objectType`.
    pub fn parse(name: &str, value: &str) -> Result<Self, MountError> {
        match value {
            "secret" => Ok(Self::Secret),
            "key" => Ok(Self::Key),
            other => Err(MountError::UnknownObjectType {
                name: name.to_owned(),
                ty: other.to_owned(),
            }),
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secret => write!(f, "secret"),
            Self::Key => write!(f, "key"),
        }
    }
}

/// One requested object: a (name, type) pair. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDescriptor {
    pub name: String,
    pub kind: ObjectType,
}

impl ObjectDescriptor {
    /// Identity string used for version lookups: `"<type>/<name>"`.
    ///
    /// Must be stable and unique across the descriptors of one request.
    pub fn identity(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Inner YAML wrapper: `array` holds one string per object.
#[derive(Debug, Deserialize)]
struct ObjectList {
    array: Vec<String>,
}

/// Per-entry YAML record.
#[derive(Debug, Deserialize)]
struct ObjectEntry {
    #[serde(rename = "objectName")]
    object_name: String,
    #[serde(rename = "objectType")]
    object_type: String,
}

/// Decode a request's attribute string into an ordered descriptor list.
pub fn parse_attributes(attributes: &str) -> Result<Vec<ObjectDescriptor>, MountError> {
    let attrib: HashMap<String, String> = serde_json::from_str(attributes)?;

    let objects = attrib.get("objects").ok_or(MountError::MissingObjects)?;

    let list: ObjectList = serde_yaml::from_str(objects)?;

    let mut descriptors = Vec::with_capacity(list.array.len());
    for entry in &list.array {
        let entry: ObjectEntry = serde_yaml::from_str(entry)?;
        let kind = ObjectType::parse(&entry.object_name, &entry.object_type)?;
        descriptors.push(ObjectDescriptor {
            name: entry.object_name,
            kind,
        });
    }

    Ok(descriptors)
}
