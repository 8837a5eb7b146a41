pub mod error;
pub mod mount;
pub mod objects;
pub mod proto;
pub mod resolve;
pub mod rotation;

pub const API_VERSION: u32 = 1;

/// Maximum IPC frame size in bytes (128 KB).
///
/// Both daemon and client must agree on this limit. Using a shared constant
/// prevents frame-size mismatches that could cause silent truncation or
/// connection resets.
pub const MAX_FRAME_LENGTH: usize = 128 * 1024;
