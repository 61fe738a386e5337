// ABOUTME: ConnectionTester: batch-mode SSH authentication probe against a Git host.
// ABOUTME: Classifies client output into success or an actionable failure with guidance.

use crate::process::{Invocation, ProcessRunner, RunError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Identity reported when the server greeting carries no `Hi <name>!`.
pub const PLACEHOLDER_IDENTITY: &str = "your account";

/// Exit status GitHub returns after authenticating a shell-less session.
const AUTHENTICATED_EXIT: i32 = 1;
/// Generic OpenSSH failure status.
const SSH_PROTOCOL_EXIT: i32 = 255;

/// Why a connection test failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionFailure {
    PublicKeyDenied,
    HostUnresolved,
    NetworkBlocked,
    MissingIdentity,
    AgentRefused,
    SshProtocol,
    Timeout,
    /// The client could not be run at all.
    Invocation,
    Unknown,
}

impl ConnectionFailure {
    pub fn guidance(self) -> &'static str {
        match self {
            ConnectionFailure::PublicKeyDenied => {
                "Authentication failed. Please:\n\
                 1. Add your public key to your account (Settings > SSH and GPG keys)\n\
                 2. Ensure your key is added to ssh-agent (ssh-add ~/.ssh/id_ed25519)"
            }
            ConnectionFailure::HostUnresolved => {
                "Network error. Check your internet connection and DNS settings."
            }
            ConnectionFailure::NetworkBlocked => {
                "Connection blocked. Check firewall settings or try a different network."
            }
            ConnectionFailure::MissingIdentity => "SSH key not found. Generate an SSH key first.",
            ConnectionFailure::AgentRefused => {
                "Key not loaded in ssh-agent. Run: ssh-add ~/.ssh/id_ed25519"
            }
            ConnectionFailure::SshProtocol => {
                "SSH connection failed. Verify your SSH configuration."
            }
            ConnectionFailure::Timeout => {
                "Connection timeout. Check your internet connection or try again."
            }
            ConnectionFailure::Invocation => "Connection test error.",
            ConnectionFailure::Unknown => {
                "Unknown error. Verify your SSH key is correctly configured."
            }
        }
    }
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionFailure::PublicKeyDenied => "public key denied",
            ConnectionFailure::HostUnresolved => "host unresolved",
            ConnectionFailure::NetworkBlocked => "network blocked",
            ConnectionFailure::MissingIdentity => "missing identity",
            ConnectionFailure::AgentRefused => "agent refused to sign",
            ConnectionFailure::SshProtocol => "ssh protocol failure",
            ConnectionFailure::Timeout => "connection timeout",
            ConnectionFailure::Invocation => "invocation failure",
            ConnectionFailure::Unknown => "unknown error",
        };
        f.write_str(label)
    }
}

/// Result of one connection test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOutcome {
    pub success: bool,
    pub remote_identity: Option<String>,
    pub raw_output: String,
    /// `None` on timeout or when the client never ran.
    pub exit_code: Option<i32>,
    /// Human-readable result: a greeting on success, next steps on failure.
    pub guidance: String,
    pub failure: Option<ConnectionFailure>,
}

impl ConnectionOutcome {
    fn failed(failure: ConnectionFailure, raw_output: String, exit_code: Option<i32>) -> Self {
        Self {
            success: false,
            remote_identity: None,
            raw_output,
            exit_code,
            guidance: failure.guidance().to_string(),
            failure: Some(failure),
        }
    }
}

/// Extract `name` from `... Hi name! ...`.
fn remote_identity(output: &str) -> Option<String> {
    let (_, rest) = output.split_once("Hi ")?;
    let (name, _) = rest.split_once('!')?;
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Classify SSH client output. First matching rule wins.
pub fn classify(exit_code: Option<i32>, output: &str) -> ConnectionOutcome {
    if exit_code == Some(AUTHENTICATED_EXIT) && output.contains("successfully authenticated") {
        let identity = remote_identity(output).unwrap_or_else(|| PLACEHOLDER_IDENTITY.to_string());
        return ConnectionOutcome {
            success: true,
            guidance: format!("Successfully authenticated as {}!", identity),
            remote_identity: Some(identity),
            raw_output: output.to_string(),
            exit_code,
            failure: None,
        };
    }

    let failure = if output.contains("Permission denied (publickey)") {
        ConnectionFailure::PublicKeyDenied
    } else if output.contains("Could not resolve hostname") {
        ConnectionFailure::HostUnresolved
    } else if output.contains("Connection timed out") || output.contains("Connection refused") {
        ConnectionFailure::NetworkBlocked
    } else if output.contains("No such file or directory") || output.contains("No such identity")
    {
        ConnectionFailure::MissingIdentity
    } else if output.contains("Agent admitted failure to sign") {
        ConnectionFailure::AgentRefused
    } else if exit_code == Some(SSH_PROTOCOL_EXIT) {
        ConnectionFailure::SshProtocol
    } else {
        ConnectionFailure::Unknown
    };
    ConnectionOutcome::failed(failure, output.to_string(), exit_code)
}

/// Verifies end-to-end authentication with the SSH client.
pub struct ConnectionTester {
    runner: Arc<dyn ProcessRunner>,
    ssh: String,
}

impl ConnectionTester {
    pub fn new(runner: Arc<dyn ProcessRunner>, ssh: impl Into<String>) -> Self {
        Self {
            runner,
            ssh: ssh.into(),
        }
    }

    fn invocation(&self, host: &str, user: &str) -> Invocation {
        Invocation::new(&self.ssh)
            .args([
                "-T",
                "-o",
                "BatchMode=yes",
                "-o",
                "StrictHostKeyChecking=accept-new",
            ])
            .arg(format!("{}@{}", user, host))
    }

    /// Probe `user@host`. Never errors: every failure is classified.
    #[tracing::instrument(name = "connection.test", skip(self), fields(timeout_secs = timeout.as_secs()))]
    pub async fn test_connection(
        &self,
        host: &str,
        user: &str,
        timeout: Duration,
    ) -> ConnectionOutcome {
        let invocation = self.invocation(host, user);
        tracing::info!(command = %invocation, "Testing SSH connection");

        let output = match self.runner.run(&invocation, timeout).await {
            Ok(output) => output,
            Err(RunError::TimedOut { .. }) => {
                tracing::error!("SSH connection test timed out");
                let mut outcome = ConnectionOutcome::failed(
                    ConnectionFailure::Timeout,
                    format!("Connection timed out after {} seconds", timeout.as_secs()),
                    None,
                );
                outcome.guidance = format!(
                    "Connection timeout ({}s). Check your internet connection or try again.",
                    timeout.as_secs()
                );
                return outcome;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error testing SSH connection");
                let text = e.to_string();
                let mut outcome =
                    ConnectionOutcome::failed(ConnectionFailure::Invocation, text.clone(), None);
                outcome.guidance = format!("Connection test error: {}", text);
                return outcome;
            }
        };

        let text = output.combined();
        tracing::info!(exit_code = ?output.exit_code, output = %text, "SSH test output");
        let outcome = classify(output.exit_code, &text);
        if outcome.success {
            tracing::info!(identity = ?outcome.remote_identity, "SSH connection successful");
        } else {
            tracing::warn!(
                exit_code = ?output.exit_code,
                failure = ?outcome.failure,
                "SSH connection failed"
            );
        }
        outcome
    }
}
