// ABOUTME: AgentRegistrar: makes sure an ssh-agent is running and loads new keys into it.
// ABOUTME: POSIX spawn-and-capture-env and Windows service control behind AgentLifecycle.

use crate::process::{Invocation, ProcessRunner, RunError};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable advertising the agent socket.
pub const AUTH_SOCK_VAR: &str = "SSH_AUTH_SOCK";
/// Environment variable holding the agent PID.
pub const AGENT_PID_VAR: &str = "SSH_AGENT_PID";

/// Outcome of loading a key into the agent. Never an error: generation already succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// `ssh-add` accepted the key. `keychain` is true if the macOS keychain also took it.
    Loaded { keychain: bool },
    /// The key is on disk and usable but not loaded into an agent.
    Degraded { reason: String },
}

impl Registration {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Registration::Loaded { .. })
    }
}

/// Where agent connection variables are read and recorded.
///
/// Process-wide and set once per session; concurrent writers race, last one wins.
pub trait AgentEnvironment: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// The real process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnvironment;

impl AgentEnvironment for ProcessEnvironment {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }

    fn set(&self, key: &str, value: &str) {
        std::env::set_var(key, value);
    }
}

/// Platform-specific agent startup.
#[async_trait]
pub trait AgentLifecycle: Send + Sync {
    /// True if an agent is (now) available for `ssh-add`.
    async fn ensure_running(&self) -> bool;
}

/// Socket and PID advertised by `ssh-agent -s`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentVars {
    pub auth_sock: Option<String>,
    pub agent_pid: Option<String>,
}

/// Parse Bourne-shell output of `ssh-agent -s`:
/// `SSH_AUTH_SOCK=/tmp/ssh-XXX/agent.123; export SSH_AUTH_SOCK;`
pub fn parse_agent_output(stdout: &str) -> AgentVars {
    let mut vars = AgentVars::default();
    for line in stdout.lines() {
        let Some((name, rest)) = line.split_once('=') else {
            continue;
        };
        let value = rest.split(';').next().unwrap_or_default().trim().to_string();
        if value.is_empty() {
            continue;
        }
        match name.trim() {
            AUTH_SOCK_VAR => vars.auth_sock = Some(value),
            AGENT_PID_VAR => vars.agent_pid = Some(value),
            _ => {}
        }
    }
    vars
}

/// POSIX agents: reuse `SSH_AUTH_SOCK`, else start `ssh-agent -s` and record its variables.
pub struct PosixAgent {
    runner: Arc<dyn ProcessRunner>,
    env: Arc<dyn AgentEnvironment>,
    ssh_agent: String,
    timeout: Duration,
}

impl PosixAgent {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        env: Arc<dyn AgentEnvironment>,
        ssh_agent: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            env,
            ssh_agent: ssh_agent.into(),
            timeout,
        }
    }
}

#[async_trait]
impl AgentLifecycle for PosixAgent {
    async fn ensure_running(&self) -> bool {
        if self.env.get(AUTH_SOCK_VAR).is_some() {
            return true;
        }

        let invocation = Invocation::new(&self.ssh_agent).arg("-s");
        let output = match self.runner.run(&invocation, self.timeout).await {
            Ok(output) if output.success() => output,
            Ok(output) => {
                tracing::info!(output = %output.combined(), "Could not start ssh-agent, skipping key addition");
                return false;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not start ssh-agent");
                return false;
            }
        };

        let vars = parse_agent_output(&output.stdout);
        let Some(sock) = vars.auth_sock else {
            tracing::warn!("ssh-agent did not advertise a socket");
            return false;
        };
        self.env.set(AUTH_SOCK_VAR, &sock);
        if let Some(pid) = vars.agent_pid {
            self.env.set(AGENT_PID_VAR, &pid);
        }
        tracing::info!(socket = %sock, "Started ssh-agent");
        true
    }
}

/// Windows OpenSSH agent service, queried and started through PowerShell.
pub struct WindowsAgentService {
    runner: Arc<dyn ProcessRunner>,
    timeout: Duration,
}

impl WindowsAgentService {
    pub fn new(runner: Arc<dyn ProcessRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    async fn powershell(&self, script: &str) -> Result<crate::process::ProcessOutput, RunError> {
        let invocation = Invocation::new("powershell").args(["-Command", script]);
        self.runner.run(&invocation, self.timeout).await
    }
}

#[async_trait]
impl AgentLifecycle for WindowsAgentService {
    async fn ensure_running(&self) -> bool {
        let status = self
            .powershell("Get-Service ssh-agent -ErrorAction SilentlyContinue | Select-Object Status")
            .await;
        match status {
            Ok(output) if output.stdout.contains("Running") => return true,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Could not manage ssh-agent service");
                return false;
            }
        }

        match self
            .powershell("Start-Service ssh-agent -ErrorAction SilentlyContinue")
            .await
        {
            Ok(output) if output.success() => {
                tracing::info!("Started ssh-agent service");
                true
            }
            Ok(_) => {
                tracing::info!("ssh-agent service not available, skipping key addition");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not manage ssh-agent service");
                false
            }
        }
    }
}

/// Loads freshly generated keys into the agent.
pub struct AgentRegistrar {
    lifecycle: Arc<dyn AgentLifecycle>,
    runner: Arc<dyn ProcessRunner>,
    ssh_add: String,
    keychain: bool,
    timeout: Duration,
}

impl AgentRegistrar {
    /// `keychain` enables the macOS `--apple-use-keychain` follow-up.
    pub fn new(
        lifecycle: Arc<dyn AgentLifecycle>,
        runner: Arc<dyn ProcessRunner>,
        ssh_add: impl Into<String>,
        keychain: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            lifecycle,
            runner,
            ssh_add: ssh_add.into(),
            keychain,
            timeout,
        }
    }

    pub async fn ensure_agent_running(&self) -> bool {
        self.lifecycle.ensure_running().await
    }

    /// Add `private_key` to the agent; failures degrade, they never error.
    #[tracing::instrument(name = "agent.register", skip(self), fields(path = %private_key.display()))]
    pub async fn register_key(&self, private_key: &Path) -> Registration {
        if !self.ensure_agent_running().await {
            return Registration::Degraded {
                reason: "no ssh-agent available".to_string(),
            };
        }

        let invocation = Invocation::new(&self.ssh_add).arg(private_key.to_string_lossy());
        match self.runner.run(&invocation, self.timeout).await {
            Ok(output) if output.success() => {
                tracing::info!("Added key to ssh-agent");
                let keychain = self.keychain && self.add_to_keychain(private_key).await;
                Registration::Loaded { keychain }
            }
            Ok(output) => {
                let reason = match output.combined() {
                    text if text.is_empty() => "Unknown error".to_string(),
                    text => text,
                };
                tracing::warn!(%reason, "Could not add key to ssh-agent");
                Registration::Degraded { reason }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not add key to ssh-agent");
                Registration::Degraded {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn add_to_keychain(&self, private_key: &Path) -> bool {
        let invocation = Invocation::new(&self.ssh_add)
            .arg("--apple-use-keychain")
            .arg(private_key.to_string_lossy());
        match self.runner.run(&invocation, self.timeout).await {
            Ok(output) if output.success() => {
                tracing::info!("Added key to macOS keychain");
                true
            }
            Ok(_) => {
                tracing::info!("Could not add key to macOS keychain (normal without a passphrase)");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not add key to macOS keychain");
                false
            }
        }
    }
}
