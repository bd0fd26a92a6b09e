//! Error types shared by every engine component.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Host state forbids the operation. Never auto-remediated.
    PreconditionFailed,
    /// A single call carried bad input; the caller may retry with new input.
    InputValidation,
    /// The overlay address space is full.
    ResourceExhaustion,
    /// The named entity does not exist.
    NotFound,
    /// An engine-owned file could not be parsed.
    CorruptConfig,
    /// A host tool failed or is missing.
    ExternalTool,
    /// Filesystem failure.
    Io,
}

/// Errors raised by the engine
#[derive(Debug, Error)]
pub enum Error {
    /// Host state does not allow the operation
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// No installation created by this tool is present
    #[error("not installed: {0}")]
    NotInstalled(String),

    /// Another invocation holds the configuration lock
    #[error("configuration is locked by pid {pid} ({})", .path.display())]
    Locked { path: PathBuf, pid: u32 },

    /// Peer name fails the character-class check
    #[error("invalid client name {0:?}: use letters, digits, '_' or '-' (at most 15 characters)")]
    InvalidName(String),

    /// A peer with the same name already exists
    #[error("client {0:?} already exists")]
    DuplicateName(String),

    /// A peer with the same public key already exists
    #[error("public key is already assigned to client {0:?}")]
    DuplicatePublicKey(String),

    /// Key material is malformed
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Listen port outside 1-65535
    #[error("invalid port: {0}")]
    InvalidPort(String),

    /// Settings file rejected
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// Every host id in the overlay subnet is taken
    #[error("address space exhausted: all 253 client addresses are assigned")]
    AddressSpaceExhausted,

    /// Named entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// An engine-owned file failed to parse
    #[error("corrupt configuration {}:{line}: {reason}", .path.display())]
    CorruptConfig {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A host tool could not be run or exited with failure
    #[error("{tool} failed: {detail}")]
    ExternalTool { tool: String, detail: String },

    /// IO error on a specific path
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Map the error onto the taxonomy callers branch on.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::PreconditionFailed(_) | Error::NotInstalled(_) | Error::Locked { .. } => {
                ErrorKind::PreconditionFailed
            }
            Error::InvalidName(_)
            | Error::DuplicateName(_)
            | Error::DuplicatePublicKey(_)
            | Error::InvalidKey(_)
            | Error::InvalidPort(_)
            | Error::InvalidSettings(_) => ErrorKind::InputValidation,
            Error::AddressSpaceExhausted => ErrorKind::ResourceExhaustion,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::CorruptConfig { .. } => ErrorKind::CorruptConfig,
            Error::ExternalTool { .. } => ErrorKind::ExternalTool,
            Error::Io { .. } => ErrorKind::Io,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        Error::CorruptConfig {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }

    pub(crate) fn tool(tool: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::ExternalTool {
            tool: tool.into(),
            detail: detail.into(),
        }
    }
}
