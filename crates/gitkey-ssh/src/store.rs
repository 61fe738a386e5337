// ABOUTME: KeyStore: discovery, loading, and deletion of key pairs in the key directory.
// ABOUTME: Ensures the directory exists owner-only before anything touches key material.

use crate::error::{Result, SshError};
use crate::key::{public_path_for, KeyPair, KeyType, PUBLIC_SUFFIX, RESERVED_FILE_NAMES};
use crate::permissions::{DirectoryAccess, PermissionGuard};
use std::path::{Path, PathBuf};

/// Key pairs living in one directory (normally `~/.ssh`).
#[derive(Clone)]
pub struct KeyStore {
    dir: PathBuf,
    guard: PermissionGuard,
}

impl KeyStore {
    pub fn new(dir: impl Into<PathBuf>, guard: PermissionGuard) -> Self {
        Self {
            dir: dir.into(),
            guard,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn guard(&self) -> &PermissionGuard {
        &self.guard
    }

    /// Create the directory owner-only if missing; warn if an existing one is too open.
    /// Every other entry point that touches keys calls this first.
    ///
    /// # Errors
    /// Returns a storage error if the directory cannot be created or stat'd.
    #[tracing::instrument(name = "keystore.ensure_directory", skip(self), fields(dir = %self.dir.display()))]
    pub async fn ensure_directory(&self) -> Result<DirectoryAccess> {
        if !self.dir.exists() {
            tracing::info!("Creating SSH directory");
            create_owner_only_dir(&self.dir).map_err(|e| SshError::CreateDirectory {
                path: self.dir.clone(),
                source: e,
            })?;
            self.guard.restrict_directory(&self.dir).await;
        }

        let access =
            self.guard
                .inspect_directory(&self.dir)
                .map_err(|e| SshError::InspectDirectory {
                    path: self.dir.clone(),
                    source: e,
                })?;
        if let DirectoryAccess::Loose(mode) = access {
            tracing::warn!(mode = %format!("{:o}", mode), "SSH directory permissions should be 700");
        }
        Ok(access)
    }

    /// The conventional ed25519 pair if complete, else the RSA one.
    ///
    /// # Errors
    /// Returns a storage error if the key directory cannot be ensured.
    #[tracing::instrument(name = "keystore.find_default", skip(self))]
    pub async fn find_default_key_pair(&self) -> Result<Option<KeyPair>> {
        self.ensure_directory().await?;
        for key_type in [KeyType::Ed25519, KeyType::Rsa] {
            let Some(name) = key_type.default_file_name() else {
                continue;
            };
            let private_path = self.dir.join(name);
            let public_path = public_path_for(&private_path);
            if private_path.exists() && public_path.exists() {
                tracing::info!(%key_type, "Found default key pair");
                let text = std::fs::read_to_string(&public_path).unwrap_or_default();
                let mut pair = KeyPair::from_public_text(private_path, &text);
                pair.key_type = key_type;
                return Ok(Some(pair));
            }
        }
        tracing::info!("No default SSH key pairs found");
        Ok(None)
    }

    /// Every private key candidate that has a matching `.pub` file.
    ///
    /// # Errors
    /// Returns a storage error if the directory cannot be ensured or listed.
    #[tracing::instrument(name = "keystore.find_all", skip(self), fields(dir = %self.dir.display()))]
    pub async fn find_all_key_pairs(&self) -> Result<Vec<KeyPair>> {
        self.ensure_directory().await?;
        let entries = std::fs::read_dir(&self.dir).map_err(|e| SshError::ReadDirectory {
            path: self.dir.clone(),
            source: e,
        })?;

        let mut pairs = Vec::new();
        for path in readable_paths(entries.map(|e| e.map(|entry| entry.path()))) {
            if !path.is_file() || !is_key_candidate(&path) {
                continue;
            }
            let public_path = public_path_for(&path);
            if !public_path.is_file() {
                continue;
            }
            let text = match std::fs::read_to_string(&public_path) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(path = %public_path.display(), error = %e, "Could not determine key type");
                    String::new()
                }
            };
            let pair = KeyPair::from_public_text(path, &text);
            tracing::info!(path = %pair.private_path.display(), key_type = %pair.key_type, "Found SSH key pair");
            pairs.push(pair);
        }

        pairs.sort_by(|a, b| a.private_path.cmp(&b.private_path));
        Ok(pairs)
    }

    /// Look up a complete pair by private key file name.
    pub async fn find_pair(&self, name: &str) -> Result<Option<KeyPair>> {
        validate_key_name(name)?;
        self.ensure_directory().await?;
        let private_path = self.dir.join(name);
        let public_path = public_path_for(&private_path);
        if !private_path.is_file() || !public_path.is_file() {
            return Ok(None);
        }
        let text = self.load_public_key(&public_path)?;
        Ok(Some(KeyPair::from_public_text(private_path, &text)))
    }

    /// Trimmed contents of a public key file.
    ///
    /// # Errors
    /// Returns a storage error if the file is missing, unreadable, or empty.
    pub fn load_public_key(&self, path: &Path) -> Result<String> {
        tracing::info!(path = %path.display(), "Loading public key");
        let content = std::fs::read_to_string(path).map_err(|e| SshError::ReadKey {
            path: path.to_path_buf(),
            source: e,
        })?;
        let content = content.trim();
        if content.is_empty() {
            return Err(SshError::EmptyPublicKey {
                path: path.to_path_buf(),
            });
        }
        Ok(content.to_string())
    }

    /// Remove both files of a pair. Missing files are warnings, not errors.
    ///
    /// # Errors
    /// Returns a storage error on an OS-level removal failure. The other file
    /// is still attempted first.
    #[tracing::instrument(name = "keystore.delete_pair", skip(self))]
    pub async fn delete_pair(&self, private: &Path, public: &Path) -> Result<()> {
        self.ensure_directory().await?;
        let first = remove_if_present(private, "private");
        let second = remove_if_present(public, "public");
        first?;
        second?;
        tracing::info!("SSH key pair deletion completed");
        Ok(())
    }
}

fn remove_if_present(path: &Path, label: &str) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "Deleted {} key", label);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "{} key not found, skipping deletion", label);
            Ok(())
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to delete {} key", label);
            Err(SshError::RemoveKey {
                path: path.to_path_buf(),
                source: e,
            })
        }
    }
}

/// Entries the OS failed to hand back are logged and skipped.
fn readable_paths(
    entries: impl Iterator<Item = std::io::Result<PathBuf>>,
) -> impl Iterator<Item = PathBuf> {
    entries.filter_map(|entry| match entry {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::warn!(error = %e, "Could not read directory entry");
            None
        }
    })
}

fn is_key_candidate(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    !name.ends_with(PUBLIC_SUFFIX) && !RESERVED_FILE_NAMES.contains(&name)
}

/// A key name must be one plain path component that is not reserved.
pub fn validate_key_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() || name.trim() != name {
        Some("must not be empty or padded with whitespace")
    } else if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        Some("must be a plain file name")
    } else if name.ends_with(PUBLIC_SUFFIX) {
        Some("must name the private key, not the .pub file")
    } else if RESERVED_FILE_NAMES.contains(&name) {
        Some("is reserved by the SSH client")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(SshError::InvalidKeyName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

#[cfg(unix)]
fn create_owner_only_dir(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)
}

#[cfg(not(unix))]
fn create_owner_only_dir(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::permissions::UnixPermissions;
    use crate::process::fake::write_key_pair;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store_in(dir: &Path) -> KeyStore {
        KeyStore::new(dir, PermissionGuard::new(Arc::new(UnixPermissions)))
    }

    #[tokio::test]
    async fn test_ensure_directory_creates_missing() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let ssh_dir = temp_dir.path().join("nested").join(".ssh");
        let store = store_in(&ssh_dir);

        store.ensure_directory().await.expect("should create");
        assert!(ssh_dir.is_dir());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&ssh_dir).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o700);
        }
    }

    #[tokio::test]
    async fn test_ensure_directory_tolerates_loose_existing() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(temp_dir.path(), std::fs::Permissions::from_mode(0o755))
                .unwrap();
        }
        let store = store_in(temp_dir.path());
        store.ensure_directory().await.expect("loose mode is only a warning");
    }

    #[tokio::test]
    async fn test_find_default_none_in_empty_dir() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        assert!(store_in(temp_dir.path()).find_default_key_pair().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_default_ignores_incomplete_pairs() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        std::fs::write(temp_dir.path().join("id_ed25519"), "private").unwrap();
        std::fs::write(temp_dir.path().join("id_rsa.pub"), "ssh-rsa AAAA").unwrap();
        std::fs::write(temp_dir.path().join("github"), "private").unwrap();
        std::fs::write(temp_dir.path().join("github.pub"), "ssh-ed25519 AAAA").unwrap();

        assert!(store_in(temp_dir.path()).find_default_key_pair().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_default_prefers_ed25519() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        write_key_pair(&temp_dir.path().join("id_rsa"), "rsa", "old@host");
        write_key_pair(&temp_dir.path().join("id_ed25519"), "ed25519", "new@host");

        let pair = store_in(temp_dir.path())
            .find_default_key_pair()
            .await
            .unwrap()
            .expect("should find a pair");
        assert_eq!(pair.key_type, KeyType::Ed25519);
        assert_eq!(pair.private_path, temp_dir.path().join("id_ed25519"));
        assert_eq!(pair.comment, "new@host");
    }

    #[tokio::test]
    async fn test_find_default_falls_back_to_rsa() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        write_key_pair(&temp_dir.path().join("id_rsa"), "rsa", "old@host");

        let pair = store_in(temp_dir.path())
            .find_default_key_pair()
            .await
            .unwrap()
            .expect("should find a pair");
        assert_eq!(pair.key_type, KeyType::Rsa);
    }

    #[tokio::test]
    async fn test_find_all_skips_reserved_and_orphans() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let dir = temp_dir.path();
        write_key_pair(&dir.join("id_ed25519"), "ed25519", "a@b.com");
        write_key_pair(&dir.join("work"), "rsa", "work@corp");
        std::fs::write(dir.join("known_hosts"), "github.com ssh-ed25519 AAAA").unwrap();
        std::fs::write(dir.join("config"), "Host *").unwrap();
        std::fs::write(dir.join("orphan"), "private only").unwrap();
        std::fs::write(dir.join("ecdsa_key"), "private").unwrap();
        std::fs::write(dir.join("ecdsa_key.pub"), "ecdsa-sha2-nistp256 AAAA me").unwrap();
        std::fs::write(dir.join("mystery"), "private").unwrap();
        std::fs::write(dir.join("mystery.pub"), "something else").unwrap();

        let pairs = store_in(dir).find_all_key_pairs().await.expect("should list");
        let summary: Vec<(String, KeyType)> =
            pairs.iter().map(|p| (p.name(), p.key_type)).collect();

        assert_eq!(
            summary,
            vec![
                ("ecdsa_key".to_string(), KeyType::Ecdsa),
                ("id_ed25519".to_string(), KeyType::Ed25519),
                ("mystery".to_string(), KeyType::Unknown),
                ("work".to_string(), KeyType::Rsa),
            ]
        );
    }

    #[tokio::test]
    async fn test_find_all_creates_missing_directory() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let ssh_dir = temp_dir.path().join(".ssh");

        let pairs = store_in(&ssh_dir)
            .find_all_key_pairs()
            .await
            .expect("missing directory lists as empty");
        assert!(pairs.is_empty());
        assert!(ssh_dir.is_dir());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&ssh_dir).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o700);
        }
    }

    #[tokio::test]
    async fn test_lookups_create_missing_directory() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let ssh_dir = temp_dir.path().join("default");
        assert!(store_in(&ssh_dir).find_default_key_pair().await.unwrap().is_none());
        assert!(ssh_dir.is_dir());

        let ssh_dir = temp_dir.path().join("named");
        assert!(store_in(&ssh_dir).find_pair("github").await.unwrap().is_none());
        assert!(ssh_dir.is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ensure_directory_reports_loose_access() {
        use std::os::unix::fs::PermissionsExt;
        let temp_dir = TempDir::new().expect("should create temp dir");
        std::fs::set_permissions(temp_dir.path(), std::fs::Permissions::from_mode(0o755))
            .unwrap();

        let access = store_in(temp_dir.path()).ensure_directory().await.unwrap();
        assert_eq!(access, DirectoryAccess::Loose(0o755));
    }

    #[test]
    fn test_unreadable_entries_are_skipped() {
        let entries = vec![
            Ok(PathBuf::from("/keys/id_ed25519")),
            Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied)),
            Ok(PathBuf::from("/keys/work")),
        ];
        let paths: Vec<PathBuf> = readable_paths(entries.into_iter()).collect();
        assert_eq!(
            paths,
            vec![PathBuf::from("/keys/id_ed25519"), PathBuf::from("/keys/work")]
        );
    }

    #[test]
    fn test_load_public_key_trims() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let path = temp_dir.path().join("k.pub");
        std::fs::write(&path, "  ssh-ed25519 AAAA a@b.com\n\n").unwrap();

        let content = store_in(temp_dir.path()).load_public_key(&path).unwrap();
        assert_eq!(content, "ssh-ed25519 AAAA a@b.com");
    }

    #[test]
    fn test_load_public_key_missing_or_empty() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let store = store_in(temp_dir.path());

        let missing = store
            .load_public_key(&temp_dir.path().join("nope.pub"))
            .expect_err("missing should fail");
        assert!(matches!(missing, SshError::ReadKey { .. }));

        let empty = temp_dir.path().join("empty.pub");
        std::fs::write(&empty, " \n").unwrap();
        let err = store.load_public_key(&empty).expect_err("empty should fail");
        assert!(matches!(err, SshError::EmptyPublicKey { .. }));
        assert_eq!(err.kind(), ErrorKind::Storage);
    }

    #[tokio::test]
    async fn test_delete_pair_twice_is_safe() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let private = temp_dir.path().join("id_ed25519");
        write_key_pair(&private, "ed25519", "a@b.com");
        let public = public_path_for(&private);
        let store = store_in(temp_dir.path());

        store.delete_pair(&private, &public).await.expect("first delete");
        assert!(!private.exists());
        assert!(!public.exists());

        store
            .delete_pair(&private, &public)
            .await
            .expect("second delete only warns");
    }

    #[tokio::test]
    async fn test_delete_pair_removes_remaining_half() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let private = temp_dir.path().join("half");
        let public = temp_dir.path().join("half.pub");
        std::fs::write(&public, "ssh-rsa AAAA").unwrap();

        store_in(temp_dir.path())
            .delete_pair(&private, &public)
            .await
            .expect("should delete the public half");
        assert!(!public.exists());
    }

    #[tokio::test]
    async fn test_find_pair_by_name() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        write_key_pair(&temp_dir.path().join("github"), "ed25519", "a@b.com");
        let store = store_in(temp_dir.path());

        let pair = store.find_pair("github").await.unwrap().expect("should exist");
        assert_eq!(pair.key_type, KeyType::Ed25519);
        assert!(store.find_pair("gitlab").await.unwrap().is_none());
        assert!(store.find_pair("../etc/passwd").await.is_err());
    }

    #[test]
    fn test_validate_key_name() {
        assert!(validate_key_name("id_work").is_ok());
        assert!(validate_key_name("github.personal").is_ok());
        for bad in ["", " x", "a/b", "a\\b", "..", "k.pub", "known_hosts", "config"] {
            assert!(validate_key_name(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
