//! Error taxonomy shared by every layer of the orchestrator.
//!
//! See distilled spec §7: resolver/id-map/orchestrator failures all surface
//! through this one enum so callers (and the launcher CLI) have a single
//! `Display` to print.

use thiserror::Error;

/// Errors surfaced by the namespace orchestrator.
#[derive(Debug, Error)]
pub enum NsError {
    /// A requested namespace kind is not in the registry.
    #[error("unknown namespaces found: {0:?}")]
    UnknownNamespace(Vec<String>),

    /// A requested namespace kind is known but was not available on probe.
    #[error("unavailable namespaces found: {0:?}")]
    UnavailableNamespace(Vec<String>),

    /// A configuration contradiction the resolver refused to silently fix.
    #[error("invalid namespace configuration: {0}")]
    SettingError(String),

    /// The resolved plan requires privileges the caller lacks.
    #[error("operation requires effective uid 0")]
    RequireSuperuser,

    /// A kernel call returned non-zero.
    #[error("{name} failed (errno {errno}): {message}")]
    SyscallFailed {
        name: &'static str,
        errno: i32,
        message: String,
    },

    /// procfs read/write or bind-directory access failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The handshake's sentinel byte did not match, or a pipe read came up
    /// short or saw EOF at a point where a peer should have signaled.
    #[error("handshake sync failed: {0}")]
    SyncFailed(String),
}

impl NsError {
    pub(crate) fn from_errno(name: &'static str, errno: nix::errno::Errno) -> Self {
        match errno {
            nix::errno::Errno::EPERM => NsError::RequireSuperuser,
            other => NsError::SyscallFailed {
                name,
                errno: other as i32,
                message: other.to_string(),
            },
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NsError>;
