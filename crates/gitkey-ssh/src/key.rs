// ABOUTME: Key pair model: algorithm classification, conventional names, and paths.
// ABOUTME: Inspects public key text and private key headers without touching the agent.

use crate::fingerprint::fingerprint_openssh;
use ssh_key::PrivateKey;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Suffix appended to a private key's file name to form its public key.
pub const PUBLIC_SUFFIX: &str = ".pub";

/// Files in the key directory that are never key candidates.
pub const RESERVED_FILE_NAMES: &[&str] = &["known_hosts", "config"];

/// Get the user's SSH directory (~/.ssh).
pub fn default_ssh_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".ssh"))
}

/// Key algorithm as inferred from public key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Ed25519,
    Rsa,
    Ecdsa,
    Unknown,
}

impl KeyType {
    /// Name passed to `ssh-keygen -t`.
    pub fn keygen_name(self) -> &'static str {
        match self {
            KeyType::Ed25519 => "ed25519",
            KeyType::Rsa => "rsa",
            KeyType::Ecdsa => "ecdsa",
            KeyType::Unknown => "unknown",
        }
    }

    /// Conventional private key file name (`id_ed25519`, `id_rsa`, ...).
    pub fn default_file_name(self) -> Option<&'static str> {
        match self {
            KeyType::Ed25519 => Some("id_ed25519"),
            KeyType::Rsa => Some("id_rsa"),
            KeyType::Ecdsa => Some("id_ecdsa"),
            KeyType::Unknown => None,
        }
    }

    /// Classify public key text by its algorithm marker. First match wins:
    /// `ssh-ed25519`, then `ssh-rsa`, then `ecdsa`.
    pub fn from_public_key_text(text: &str) -> Self {
        if text.contains("ssh-ed25519") {
            KeyType::Ed25519
        } else if text.contains("ssh-rsa") {
            KeyType::Rsa
        } else if text.contains("ecdsa") {
            KeyType::Ecdsa
        } else {
            KeyType::Unknown
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            KeyType::Ed25519 => "ED25519",
            KeyType::Rsa => "RSA",
            KeyType::Ecdsa => "ECDSA",
            KeyType::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

/// Parse error for [`KeyType`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKeyType(pub String);

impl fmt::Display for UnknownKeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown key type {:?} (expected ed25519 or rsa)", self.0)
    }
}

impl std::error::Error for UnknownKeyType {}

impl FromStr for KeyType {
    type Err = UnknownKeyType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ed25519" => Ok(KeyType::Ed25519),
            "rsa" => Ok(KeyType::Rsa),
            _ => Err(UnknownKeyType(s.to_string())),
        }
    }
}

/// Public key path for a private key path: same directory, name plus `.pub`.
pub fn public_path_for(private: &Path) -> PathBuf {
    let mut name = private
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(PUBLIC_SUFFIX);
    private.with_file_name(name)
}

/// A private/public key file pair in the key directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub key_type: KeyType,
    pub private_path: PathBuf,
    pub public_path: PathBuf,
    /// Third field of the public key line; empty if absent.
    pub comment: String,
}

impl KeyPair {
    /// Build a pair for `private_path`, classifying it from public key text.
    pub fn from_public_text(private_path: PathBuf, public_text: &str) -> Self {
        let public_path = public_path_for(&private_path);
        Self {
            key_type: KeyType::from_public_key_text(public_text),
            private_path,
            public_path,
            comment: comment_of(public_text),
        }
    }

    /// File name of the private key, e.g. `id_ed25519`.
    pub fn name(&self) -> String {
        self.private_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Both files are present on disk.
    pub fn is_complete(&self) -> bool {
        self.private_path.is_file() && self.public_path.is_file()
    }

    /// SHA256 fingerprint of the public key, if it parses.
    pub fn fingerprint(&self) -> Option<String> {
        let text = std::fs::read_to_string(&self.public_path).ok()?;
        fingerprint_openssh(&text)
    }

    /// Whether the private key is passphrase-protected; `None` if unreadable.
    pub fn is_protected(&self) -> Option<bool> {
        let data = std::fs::read_to_string(&self.private_path).ok()?;
        PrivateKey::from_openssh(&data)
            .ok()
            .map(|key| key.is_encrypted())
    }
}

fn comment_of(public_text: &str) -> String {
    public_text
        .lines()
        .next()
        .unwrap_or_default()
        .splitn(3, char::is_whitespace)
        .nth(2)
        .map(|c| c.trim().to_string())
        .unwrap_or_default()
}
