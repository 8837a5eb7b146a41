//! Deterministic content derivation for requested objects.
//!
//! The mock never talks to a real backend; content is a pure function of
//! the object type and the version epoch, so repeated mounts at the same
//! epoch are byte-identical.

use crate::objects::{ObjectDescriptor, ObjectType};

/// Placeholder payload for a plain secret at the initial epoch.
const SECRET_CONTENT: &[u8] = b"secret";

/// Placeholder PEM-like public key block at the initial epoch.
const KEY_CONTENT: &[u8] = b"-----BEGIN PUBLIC KEY-----\nThis is mock key\n-----END PUBLIC KEY-----";

/// Generic post-rotation payload. Once an identity has rotated, the type no
/// longer distinguishes content.
const ROTATED_CONTENT: &[u8] = b"rotated";

/// Derive the content bytes for one object at the given version epoch.
pub fn resolve(descriptor: &ObjectDescriptor, epoch: u64) -> Vec<u8> {
    if epoch > 1 {
        return ROTATED_CONTENT.to_vec();
    }
    match descriptor.kind {
        ObjectType::Secret => SECRET_CONTENT.to_vec(),
        ObjectType::Key => KEY_CONTENT.to_vec(),
    }
}
