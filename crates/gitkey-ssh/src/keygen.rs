// ABOUTME: KeyGenerator: drives ssh-keygen through collision checks, ed25519-then-RSA fallback,
// ABOUTME: permission hardening, and agent registration.

use crate::agent::{AgentRegistrar, Registration};
use crate::error::{Result, SshError};
use crate::key::{public_path_for, KeyType};
use crate::platform::{TerminalLauncher, Toolchain};
use crate::process::{Invocation, ProcessRunner, RunError, ToolLocator};
use crate::store::{validate_key_name, KeyStore};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// How the new key is protected.
#[derive(Clone, PartialEq, Eq)]
pub enum Passphrase {
    /// Prompt for it in a separate terminal window.
    Interactive,
    /// No passphrase (`-N ""`).
    Empty,
    Set(String),
}

impl Passphrase {
    /// `None` means interactive, `Some("")` means no passphrase.
    pub fn from_option(value: Option<String>) -> Self {
        match value {
            None => Passphrase::Interactive,
            Some(s) if s.is_empty() => Passphrase::Empty,
            Some(s) => Passphrase::Set(s),
        }
    }

    fn as_arg(&self) -> Option<&str> {
        match self {
            Passphrase::Interactive => None,
            Passphrase::Empty => Some(""),
            Passphrase::Set(s) => Some(s),
        }
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Passphrase::Interactive => f.write_str("Interactive"),
            Passphrase::Empty => f.write_str("Empty"),
            Passphrase::Set(_) => f.write_str("Set(***)"),
        }
    }
}

/// One request to create a key pair. Consumed by [`KeyGenerator::generate`].
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Embedded in the public key; empty means `<user>@<hostname>`.
    pub comment: String,
    pub passphrase: Passphrase,
    pub overwrite: bool,
    /// Private key file name; defaults to the algorithm's conventional name.
    pub name: Option<String>,
    /// Force one algorithm instead of ed25519 with RSA fallback.
    pub algorithm: Option<KeyType>,
}

impl GenerationRequest {
    pub fn new(comment: impl Into<String>) -> Self {
        Self {
            comment: comment.into(),
            passphrase: Passphrase::Empty,
            overwrite: false,
            name: None,
            algorithm: None,
        }
    }

    pub fn passphrase(mut self, passphrase: Passphrase) -> Self {
        self.passphrase = passphrase;
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn algorithm(mut self, algorithm: KeyType) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    /// RSA fallback is only allowed when neither name nor algorithm was chosen.
    fn allows_fallback(&self) -> bool {
        self.name.is_none() && self.algorithm.is_none()
    }
}

/// Stages a generation passes through; logged at each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Idle,
    CheckingExisting,
    CollisionBlocked,
    Generating,
    Verifying,
    Failed,
    Permissioned,
    Registered,
    Degraded,
    Done,
}

impl fmt::Display for GenerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GenerationState::Idle => "idle",
            GenerationState::CheckingExisting => "checking-existing",
            GenerationState::CollisionBlocked => "collision-blocked",
            GenerationState::Generating => "generating",
            GenerationState::Verifying => "verifying",
            GenerationState::Failed => "failed",
            GenerationState::Permissioned => "permissioned",
            GenerationState::Registered => "registered",
            GenerationState::Degraded => "degraded",
            GenerationState::Done => "done",
        };
        f.write_str(name)
    }
}

/// A key pair that now exists on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedKey {
    pub algorithm: KeyType,
    pub private_path: PathBuf,
    pub public_path: PathBuf,
    pub comment: String,
    /// Whether the 0600/0644 (or ACL) restriction was applied.
    pub permissions_applied: bool,
    pub registration: Registration,
    /// `Registered` or `Degraded`.
    pub state: GenerationState,
    pub summary: String,
}

impl GeneratedKey {
    pub fn is_degraded(&self) -> bool {
        self.state == GenerationState::Degraded
    }
}

/// Result of [`KeyGenerator::generate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Generated(GeneratedKey),
    /// ssh-keygen is running in a separate terminal; its result is not observed.
    InteractiveStarted {
        private_path: PathBuf,
        public_path: PathBuf,
        comment: String,
        message: String,
    },
}

impl GenerationOutcome {
    pub fn summary(&self) -> &str {
        match self {
            GenerationOutcome::Generated(key) => &key.summary,
            GenerationOutcome::InteractiveStarted { message, .. } => message,
        }
    }
}

/// Creates key pairs with the external key-generation tool.
///
/// Callers must serialize requests against one key directory; two concurrent
/// requests for the same file name are not coordinated here.
pub struct KeyGenerator {
    store: KeyStore,
    registrar: AgentRegistrar,
    terminal: Arc<dyn TerminalLauncher>,
    runner: Arc<dyn ProcessRunner>,
    locator: ToolLocator,
    toolchain: Toolchain,
}

impl KeyGenerator {
    pub fn new(
        store: KeyStore,
        registrar: AgentRegistrar,
        terminal: Arc<dyn TerminalLauncher>,
        runner: Arc<dyn ProcessRunner>,
        locator: ToolLocator,
        toolchain: Toolchain,
    ) -> Self {
        Self {
            store,
            registrar,
            terminal,
            runner,
            locator,
            toolchain,
        }
    }

    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    /// Run one generation request to a terminal outcome.
    ///
    /// # Errors
    /// - `Collision` if the target exists and overwrite was not requested,
    ///   including the `id_rsa` target of the fallback attempt
    /// - `UnsupportedAlgorithm` if the override is neither ed25519 nor rsa
    /// - storage errors if the key directory is unusable
    /// - tool errors (after the single RSA fallback, when allowed)
    #[tracing::instrument(name = "keygen.generate", skip(self, request), fields(name = ?request.name, overwrite = request.overwrite))]
    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutcome> {
        transition(GenerationState::Idle);
        if let Some(name) = &request.name {
            validate_key_name(name)?;
        }
        if let Some(algorithm) = request.algorithm {
            if !matches!(algorithm, KeyType::Ed25519 | KeyType::Rsa) {
                return Err(SshError::UnsupportedAlgorithm { algorithm });
            }
        }
        self.store.ensure_directory().await?;

        let keygen = &self.toolchain.tools.keygen;
        if !self.locator.is_available(keygen).await {
            return Err(SshError::ToolMissing {
                tool: keygen.clone(),
            });
        }

        let comment = if request.comment.trim().is_empty() {
            default_comment()
        } else {
            request.comment.trim().to_string()
        };
        tracing::info!(%comment, "Using key comment");

        if request.passphrase == Passphrase::Interactive {
            let algorithm = request.algorithm.unwrap_or(KeyType::Ed25519);
            return self.start_interactive(&request, algorithm, comment);
        }

        let primary = request.algorithm.unwrap_or(KeyType::Ed25519);
        let first = self.generate_key_type(&request, primary, &comment).await;
        let err = match first {
            Ok(key) => return Ok(GenerationOutcome::Generated(key)),
            Err(e) => e,
        };
        tracing::warn!(algorithm = %primary, error = %err, "Key generation failed");

        if err.stops_fallback() || !request.allows_fallback() {
            return Err(err);
        }

        tracing::info!("Falling back to RSA key generation");
        match self.generate_key_type(&request, KeyType::Rsa, &comment).await {
            Ok(key) => Ok(GenerationOutcome::Generated(key)),
            Err(rsa_err) if rsa_err.stops_fallback() => Err(rsa_err),
            Err(rsa_err) => {
                tracing::error!(error = %rsa_err, "RSA generation also failed");
                Err(SshError::FallbackFailed {
                    primary: Box::new(err),
                    fallback: Box::new(rsa_err),
                })
            }
        }
    }

    fn target_path(&self, request: &GenerationRequest, algorithm: KeyType) -> PathBuf {
        let name = request
            .name
            .as_deref()
            .or_else(|| algorithm.default_file_name())
            .unwrap_or("id_ed25519");
        self.store.dir().join(name)
    }

    /// Refuse to clobber an existing key unless overwrite was requested.
    fn check_existing(&self, private: &Path, public: &Path, overwrite: bool) -> Result<()> {
        transition(GenerationState::CheckingExisting);
        if (private.exists() || public.exists()) && !overwrite {
            transition(GenerationState::CollisionBlocked);
            let path = if private.exists() { private } else { public };
            return Err(SshError::Collision {
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }

    fn keygen_invocation(
        &self,
        algorithm: KeyType,
        comment: &str,
        private: &Path,
        passphrase: Option<&str>,
    ) -> Invocation {
        let mut invocation = Invocation::new(&self.toolchain.tools.keygen)
            .args(["-t", algorithm.keygen_name()]);
        if algorithm == KeyType::Rsa {
            invocation = invocation.args(["-b", "4096"]);
        }
        invocation = invocation
            .args(["-C", comment])
            .arg("-f")
            .arg(private.to_string_lossy());
        if let Some(passphrase) = passphrase {
            invocation = invocation.args(["-N", passphrase]);
        }
        invocation
    }

    fn start_interactive(
        &self,
        request: &GenerationRequest,
        algorithm: KeyType,
        comment: String,
    ) -> Result<GenerationOutcome> {
        let private_path = self.target_path(request, algorithm);
        let public_path = public_path_for(&private_path);
        self.check_existing(&private_path, &public_path, request.overwrite)?;

        let command = self.keygen_invocation(algorithm, &comment, &private_path, None);
        tracing::info!(command = %command, "Opening terminal for interactive passphrase entry");
        self.terminal
            .launch(&command, self.store.dir())
            .map_err(|e| match e {
                RunError::NotFound { program } => SshError::ToolMissing { tool: program },
                other => tool_error(&self.toolchain.tools.keygen, other),
            })?;

        Ok(GenerationOutcome::InteractiveStarted {
            private_path,
            public_path,
            comment,
            message: "Interactive key generation started. Enter the passphrase in the new terminal."
                .to_string(),
        })
    }

    #[tracing::instrument(name = "keygen.attempt", skip(self, request, comment, algorithm), fields(algorithm = %algorithm))]
    async fn generate_key_type(
        &self,
        request: &GenerationRequest,
        algorithm: KeyType,
        comment: &str,
    ) -> Result<GeneratedKey> {
        let private_path = self.target_path(request, algorithm);
        let public_path = public_path_for(&private_path);
        self.check_existing(&private_path, &public_path, request.overwrite)?;

        if request.overwrite {
            self.store.delete_pair(&private_path, &public_path).await?;
        }

        transition(GenerationState::Generating);
        let invocation = self.keygen_invocation(
            algorithm,
            comment,
            &private_path,
            request.passphrase.as_arg(),
        );
        tracing::info!(command = %invocation, "Generating key");

        let timeout = self.toolchain.timeouts.generation;
        let output = self
            .runner
            .run(&invocation, timeout)
            .await
            .map_err(|e| {
                transition(GenerationState::Failed);
                tool_error(&self.toolchain.tools.keygen, e)
            })?;
        if !output.success() {
            transition(GenerationState::Failed);
            return Err(SshError::ToolFailed {
                tool: self.toolchain.tools.keygen.clone(),
                exit_code: output.exit_code,
                output: output.combined(),
            });
        }

        transition(GenerationState::Verifying);
        if !private_path.exists() || !public_path.exists() {
            transition(GenerationState::Failed);
            return Err(SshError::FilesNotCreated {
                private: private_path,
                public: public_path,
            });
        }

        let permissions_applied = self
            .store
            .guard()
            .restrict_key_files(&private_path, &public_path)
            .await;
        transition(GenerationState::Permissioned);

        let registration = self.registrar.register_key(&private_path).await;
        let state = match &registration {
            Registration::Loaded { .. } => GenerationState::Registered,
            Registration::Degraded { reason } => {
                tracing::warn!(%reason, "Key generated but not loaded into ssh-agent");
                GenerationState::Degraded
            }
        };
        transition(state);

        let mut summary = format!(
            "Successfully generated {} SSH key pair at {}",
            algorithm.keygen_name(),
            private_path.display()
        );
        if let Registration::Degraded { reason } = &registration {
            summary.push_str(&format!(" (not loaded into ssh-agent: {})", reason));
        }
        tracing::info!(%summary, "Key generation finished");
        transition(GenerationState::Done);

        Ok(GeneratedKey {
            algorithm,
            private_path,
            public_path,
            comment: comment.to_string(),
            permissions_applied,
            registration,
            state,
            summary,
        })
    }
}

fn transition(state: GenerationState) {
    tracing::debug!(%state, "Generation state");
}

fn tool_error(tool: &str, err: RunError) -> SshError {
    match err {
        RunError::NotFound { .. } => SshError::ToolMissing {
            tool: tool.to_string(),
        },
        RunError::TimedOut { timeout, .. } => SshError::ToolTimeout {
            tool: tool.to_string(),
            secs: timeout.as_secs(),
        },
        RunError::Io { source, .. } => SshError::ToolSpawn {
            tool: tool.to_string(),
            source,
        },
    }
}

/// `<user>@<hostname>`, or `user@localhost` when either is unknown.
pub fn default_comment() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|u| !u.is_empty());
    let host = hostname::get()
        .ok()
        .map(|h| h.to_string_lossy().to_string())
        .filter(|h| !h.is_empty());
    match (user, host) {
        (Some(user), Some(host)) => format!("{}@{}", user, host),
        _ => "user@localhost".to_string(),
    }
}
