//! Socket path resolution and endpoint parsing.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const DEFAULT_SOCKET_FILENAME: &str = "stubvaultd.sock";

/// Environment override for the socket path.
pub const SOCKET_ENV: &str = "STUBVAULT_SOCK";

/// Resolve the default socket path.
///
/// `STUBVAULT_SOCK` wins if set; otherwise a runtime directory under
/// `XDG_RUNTIME_DIR` is used, falling back to `$HOME/.stubvault/run`.
pub fn default_socket_path() -> PathBuf {
    if let Ok(p) = std::env::var(SOCKET_ENV) {
        return PathBuf::from(p);
    }

    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        let dir_path = Path::new(&dir);
        // Reject non-absolute or paths with `..` components.
        if dir_path.is_absolute()
            && !dir_path
                .components()
                .any(|c| c == std::path::Component::ParentDir)
        {
            return dir_path.join("stubvault").join(DEFAULT_SOCKET_FILENAME);
        }
    }

    let home = std::env::var_os("HOME").unwrap_or_else(|| OsString::from("."));
    PathBuf::from(home)
        .join(".stubvault")
        .join("run")
        .join(DEFAULT_SOCKET_FILENAME)
}

/// Parse a bind endpoint into a socket path.
///
/// Accepts a bare filesystem path or a `unix://` URI (the form the driver
/// under test passes, e.g. `unix:///tmp/stubvault.sock`). Any other scheme
/// is rejected.
pub fn parse_endpoint(endpoint: &str) -> Option<PathBuf> {
    let path = match endpoint.strip_prefix("unix://") {
        Some(rest) => rest,
        None if endpoint.contains("://") => return None,
        None => endpoint,
    };
    if path.is_empty() {
        return None;
    }
    Some(PathBuf::from(path))
}

pub fn ensure_socket_parent_dir(path: &Path) -> std::io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };

    std::fs::create_dir_all(parent)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // Ensure only the user can access the runtime dir.
        std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))?;
    }

    Ok(())
}
