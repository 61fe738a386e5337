// ABOUTME: Access control for the key directory and generated key files.
// ABOUTME: Unix mode bits or Windows ACLs behind one policy trait; failures only warn.

use crate::process::{Invocation, ProcessRunner};
use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// How tightly a directory is locked down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryAccess {
    /// Only the owner can enter or list it.
    OwnerOnly,
    /// Group or world bits are set; carries the permission bits.
    Loose(u32),
    /// The platform has no mode bits to inspect.
    Unknown,
}

/// Platform mechanism for restricting key material.
#[async_trait]
pub trait PermissionPolicy: Send + Sync {
    async fn restrict_directory(&self, path: &Path) -> io::Result<()>;

    async fn restrict_key_files(&self, private: &Path, public: &Path) -> io::Result<()>;

    fn inspect_directory(&self, path: &Path) -> io::Result<DirectoryAccess>;
}

/// POSIX mode bits: 0700 directory, 0600 private key, 0644 public key.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixPermissions;

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[async_trait]
impl PermissionPolicy for UnixPermissions {
    async fn restrict_directory(&self, path: &Path) -> io::Result<()> {
        set_mode(path, 0o700)
    }

    async fn restrict_key_files(&self, private: &Path, public: &Path) -> io::Result<()> {
        set_mode(private, 0o600)?;
        set_mode(public, 0o644)
    }

    #[cfg(unix)]
    fn inspect_directory(&self, path: &Path) -> io::Result<DirectoryAccess> {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(path)?.permissions().mode() & 0o777;
        if mode & 0o077 == 0 {
            Ok(DirectoryAccess::OwnerOnly)
        } else {
            Ok(DirectoryAccess::Loose(mode))
        }
    }

    #[cfg(not(unix))]
    fn inspect_directory(&self, path: &Path) -> io::Result<DirectoryAccess> {
        std::fs::metadata(path)?;
        Ok(DirectoryAccess::Unknown)
    }
}

/// Windows ACLs applied with `icacls`: inheritance removed, current user granted full control.
pub struct WindowsAcl {
    runner: Arc<dyn ProcessRunner>,
    user: String,
    timeout: Duration,
}

impl WindowsAcl {
    pub fn new(runner: Arc<dyn ProcessRunner>, timeout: Duration) -> Self {
        let user = std::env::var("USERNAME").unwrap_or_else(|_| "%USERNAME%".to_string());
        Self {
            runner,
            user,
            timeout,
        }
    }

    async fn icacls(&self, path: &Path, grants: &[String]) -> io::Result<()> {
        let mut invocation = Invocation::new("icacls")
            .arg(path.to_string_lossy())
            .arg("/inheritance:r");
        for grant in grants {
            invocation = invocation.arg("/grant:r").arg(grant.as_str());
        }
        let output = self
            .runner
            .run(&invocation, self.timeout)
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        if output.success() {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::Other, output.combined()))
        }
    }
}

#[async_trait]
impl PermissionPolicy for WindowsAcl {
    async fn restrict_directory(&self, path: &Path) -> io::Result<()> {
        self.icacls(path, &[format!("{}:(OI)(CI)F", self.user)]).await
    }

    async fn restrict_key_files(&self, private: &Path, public: &Path) -> io::Result<()> {
        self.icacls(private, &[format!("{}:F", self.user)]).await?;
        self.icacls(public, &[format!("{}:F", self.user), "Everyone:R".to_string()])
            .await
    }

    fn inspect_directory(&self, path: &Path) -> io::Result<DirectoryAccess> {
        std::fs::metadata(path)?;
        Ok(DirectoryAccess::Unknown)
    }
}

/// Applies a [`PermissionPolicy`] and turns its failures into warnings.
///
/// Keys stay usable with the wrong permissions; an SSH client that rejects an
/// over-permissive private key shows up later as a failed connection test.
#[derive(Clone)]
pub struct PermissionGuard {
    policy: Arc<dyn PermissionPolicy>,
}

impl PermissionGuard {
    pub fn new(policy: Arc<dyn PermissionPolicy>) -> Self {
        Self { policy }
    }

    /// Returns false (after logging) if the restriction could not be applied.
    pub async fn restrict_directory(&self, path: &Path) -> bool {
        match self.policy.restrict_directory(path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Restricted key directory");
                true
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Could not restrict key directory");
                false
            }
        }
    }

    /// Returns false (after logging) if the restriction could not be applied.
    pub async fn restrict_key_files(&self, private: &Path, public: &Path) -> bool {
        match self.policy.restrict_key_files(private, public).await {
            Ok(()) => {
                tracing::info!(
                    private = %private.display(),
                    public = %public.display(),
                    "Set key file permissions"
                );
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not set key permissions");
                false
            }
        }
    }

    pub fn inspect_directory(&self, path: &Path) -> io::Result<DirectoryAccess> {
        self.policy.inspect_directory(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fake::FakeRunner;
    use crate::process::ProcessOutput;
    use tempfile::TempDir;

    #[cfg(unix)]
    fn mode_of(path: &Path) -> u32 {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_key_file_modes() {
        let dir = TempDir::new().expect("should create temp dir");
        let private = dir.path().join("id_test");
        let public = dir.path().join("id_test.pub");
        std::fs::write(&private, "private").unwrap();
        std::fs::write(&public, "public").unwrap();

        let guard = PermissionGuard::new(Arc::new(UnixPermissions));
        assert!(guard.restrict_key_files(&private, &public).await);

        assert_eq!(mode_of(&private), 0o600);
        assert_eq!(mode_of(&public), 0o644);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unix_directory_inspection() {
        let dir = TempDir::new().expect("should create temp dir");
        let keys = dir.path().join("keys");
        std::fs::create_dir(&keys).unwrap();
        set_mode(&keys, 0o755).unwrap();

        let guard = PermissionGuard::new(Arc::new(UnixPermissions));
        assert_eq!(
            guard.inspect_directory(&keys).unwrap(),
            DirectoryAccess::Loose(0o755)
        );

        assert!(guard.restrict_directory(&keys).await);
        assert_eq!(mode_of(&keys), 0o700);
        assert_eq!(
            guard.inspect_directory(&keys).unwrap(),
            DirectoryAccess::OwnerOnly
        );
    }

    #[tokio::test]
    async fn test_missing_files_only_warn() {
        let dir = TempDir::new().expect("should create temp dir");
        let guard = PermissionGuard::new(Arc::new(UnixPermissions));
        let applied = guard
            .restrict_key_files(&dir.path().join("nope"), &dir.path().join("nope.pub"))
            .await;
        assert_eq!(applied, !cfg!(unix));
    }

    #[tokio::test]
    async fn test_windows_acl_invokes_icacls() {
        let runner = Arc::new(FakeRunner::default());
        let acl = WindowsAcl {
            runner: runner.clone(),
            user: "alice".to_string(),
            timeout: Duration::from_secs(10),
        };

        acl.restrict_key_files(Path::new("C:\\k\\id"), Path::new("C:\\k\\id.pub"))
            .await
            .expect("icacls should succeed");

        let calls = runner.calls_to("icacls");
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0].args,
            vec!["C:\\k\\id", "/inheritance:r", "/grant:r", "alice:F"]
        );
        assert!(calls[1].args.contains(&"Everyone:R".to_string()));
    }

    #[tokio::test]
    async fn test_windows_acl_failure_is_warning() {
        let mut runner = FakeRunner::default();
        runner.canned.insert(
            "icacls".to_string(),
            ProcessOutput {
                exit_code: Some(5),
                stderr: "Access is denied.".to_string(),
                ..Default::default()
            },
        );
        let guard = PermissionGuard::new(Arc::new(WindowsAcl {
            runner: Arc::new(runner),
            user: "alice".to_string(),
            timeout: Duration::from_secs(10),
        }));

        assert!(!guard.restrict_directory(Path::new("C:\\k")).await);
    }
}
