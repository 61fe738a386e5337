// ABOUTME: Error types for SSH key lifecycle operations using thiserror.
// ABOUTME: Maps every failure onto the storage/collision/tool/request taxonomy.

use crate::key::KeyType;
use std::path::PathBuf;
use thiserror::Error;

/// Broad category of an [`SshError`].
///
/// Callers branch on this rather than on individual variants: storage and
/// collision errors abort the operation, tool errors have already been
/// through the RSA fallback by the time they surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Storage,
    Collision,
    GenerationTool,
    InvalidRequest,
}

/// Errors that can occur during SSH key operations.
#[derive(Error, Debug)]
pub enum SshError {
    /// Failed to create the key directory.
    #[error("failed to create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to stat the key directory.
    #[error("failed to inspect directory {path}: {source}")]
    InspectDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to list the key directory.
    #[error("failed to list directory {path}: {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to read a key file from disk.
    #[error("failed to read SSH key from {path}: {source}")]
    ReadKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The public key file exists but holds nothing.
    #[error("public key file {path} is empty")]
    EmptyPublicKey { path: PathBuf },

    /// Failed to remove a key file.
    #[error("failed to remove key file {path}: {source}")]
    RemoveKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The target key file exists and overwrite was not requested.
    #[error("key {path} already exists; request overwrite to replace it")]
    Collision { path: PathBuf },

    /// An external tool is not installed or not on PATH.
    #[error("{tool} command not found; please install OpenSSH")]
    ToolMissing { tool: String },

    /// An external tool exited unsuccessfully.
    #[error("{tool} failed (exit code {}): {output}", display_exit_code(.exit_code))]
    ToolFailed {
        tool: String,
        exit_code: Option<i32>,
        output: String,
    },

    /// An external tool did not finish within its time limit.
    #[error("{tool} timed out after {secs}s")]
    ToolTimeout { tool: String, secs: u64 },

    /// An external tool could not be started.
    #[error("failed to run {tool}: {source}")]
    ToolSpawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool reported success but the key files are missing.
    #[error("key files were not created: {private}, {public}")]
    FilesNotCreated { private: PathBuf, public: PathBuf },

    /// Both the ed25519 attempt and the RSA fallback failed.
    #[error("failed to generate both ed25519 and RSA keys: {fallback}")]
    FallbackFailed {
        primary: Box<SshError>,
        fallback: Box<SshError>,
    },

    /// The requested key file name cannot be used.
    #[error("invalid key name {name:?}: {reason}")]
    InvalidKeyName { name: String, reason: &'static str },

    /// The algorithm override names a key type that is never generated.
    #[error("cannot generate {algorithm} keys (expected ed25519 or rsa)")]
    UnsupportedAlgorithm { algorithm: KeyType },
}

impl SshError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SshError::CreateDirectory { .. }
            | SshError::InspectDirectory { .. }
            | SshError::ReadDirectory { .. }
            | SshError::ReadKey { .. }
            | SshError::EmptyPublicKey { .. }
            | SshError::RemoveKey { .. } => ErrorKind::Storage,
            SshError::Collision { .. } => ErrorKind::Collision,
            SshError::ToolMissing { .. }
            | SshError::ToolFailed { .. }
            | SshError::ToolTimeout { .. }
            | SshError::ToolSpawn { .. }
            | SshError::FilesNotCreated { .. }
            | SshError::FallbackFailed { .. } => ErrorKind::GenerationTool,
            SshError::InvalidKeyName { .. } | SshError::UnsupportedAlgorithm { .. } => {
                ErrorKind::InvalidRequest
            }
        }
    }

    /// Whether this failure means the target key is already on disk.
    ///
    /// Such failures are never retried with another algorithm.
    pub fn is_already_exists(&self) -> bool {
        match self {
            SshError::Collision { .. } => true,
            SshError::ToolFailed { output, .. } => {
                output.to_lowercase().contains("already exists")
            }
            _ => false,
        }
    }

    /// Whether a failed attempt must surface as-is instead of trying another algorithm.
    pub fn stops_fallback(&self) -> bool {
        self.is_already_exists() || matches!(self.kind(), ErrorKind::Storage | ErrorKind::Collision)
    }
}

fn display_exit_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_string(), |c| c.to_string())
}

/// Result type alias using SshError.
pub type Result<T> = std::result::Result<T, SshError>;
