// ABOUTME: SSH key lifecycle core for Git host setup.
// ABOUTME: Discovers, generates, inspects, deletes, and verifies SSH key pairs.

//! # gitkey-ssh
//!
//! Local SSH key lifecycle management for Git hosting accounts.
//!
//! ## Features
//!
//! - **Discovery**: find the conventional default key or every pair in `~/.ssh`
//! - **Generation**: drive `ssh-keygen` with ed25519 first and a single RSA fallback
//! - **Permissions**: owner-only key directory and private keys on every platform
//! - **Agent**: start `ssh-agent` if needed and load new keys into it
//! - **Verification**: batch-mode `ssh -T git@host` with classified failures
//!
//! External tools are reached through [`ProcessRunner`], so every component
//! can be driven by a scripted runner in tests.
//!
//! ## Example
//!
//! ```no_run
//! use gitkey_ssh::{GenerationRequest, KeyManager, Toolchain};
//!
//! # async fn run() -> gitkey_ssh::Result<()> {
//! let manager = KeyManager::system("/home/me/.ssh", Toolchain::default());
//! if manager.store().find_default_key_pair().await?.is_none() {
//!     let outcome = manager.generate(GenerationRequest::new("me@example.com")).await?;
//!     println!("{}", outcome.summary());
//! }
//! let result = manager.test_connection("github.com", "git").await;
//! println!("{}", result.guidance);
//! # Ok(())
//! # }
//! ```

mod agent;
mod connection;
mod error;
mod fingerprint;
mod key;
mod keygen;
mod manager;
mod permissions;
mod platform;
mod process;
mod store;

pub use agent::{
    parse_agent_output, AgentEnvironment, AgentLifecycle, AgentRegistrar, AgentVars,
    PosixAgent, ProcessEnvironment, Registration, WindowsAgentService, AGENT_PID_VAR,
    AUTH_SOCK_VAR,
};
pub use connection::{
    classify, ConnectionFailure, ConnectionOutcome, ConnectionTester, PLACEHOLDER_IDENTITY,
};
pub use error::{ErrorKind, Result, SshError};
pub use fingerprint::{compute_fingerprint, fingerprint_openssh};
pub use key::{
    default_ssh_dir, public_path_for, KeyPair, KeyType, UnknownKeyType, PUBLIC_SUFFIX,
    RESERVED_FILE_NAMES,
};
pub use keygen::{
    default_comment, GeneratedKey, GenerationOutcome, GenerationRequest, GenerationState,
    KeyGenerator, Passphrase,
};
pub use manager::KeyManager;
pub use permissions::{DirectoryAccess, PermissionGuard, PermissionPolicy, UnixPermissions, WindowsAcl};
pub use platform::{
    Capabilities, Platform, PosixTerminal, PowerShellTerminal, TerminalLauncher, Timeouts,
    Toolchain, Tools,
};
pub use process::{Invocation, ProcessOutput, ProcessRunner, RunError, SystemRunner, ToolLocator};
pub use store::{validate_key_name, KeyStore};

// Re-export ssh_key types for convenience
pub use ssh_key::{PrivateKey, PublicKey};
