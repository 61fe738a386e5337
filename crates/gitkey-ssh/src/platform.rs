// ABOUTME: Platform detection and per-platform capability wiring, selected once at startup.
// ABOUTME: Bundles permission policy, agent lifecycle, terminal launcher, and tool probe.

use crate::agent::{AgentLifecycle, AgentEnvironment, PosixAgent, WindowsAgentService};
use crate::permissions::{PermissionPolicy, UnixPermissions, WindowsAcl};
use crate::process::{Invocation, ProcessRunner, RunError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Operating system family the core adapts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Unix,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Unix
        }
    }

    /// Program used to probe tool availability.
    pub fn locator_program(self) -> &'static str {
        match self {
            Platform::Windows => "where",
            Platform::MacOs | Platform::Unix => "which",
        }
    }

    /// Whether `ssh-add` can persist passphrases in an OS credential store.
    pub fn has_keychain(self) -> bool {
        self == Platform::MacOs
    }
}

/// Binary names of the external OpenSSH tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tools {
    pub keygen: String,
    pub ssh: String,
    pub ssh_add: String,
    pub ssh_agent: String,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            keygen: "ssh-keygen".to_string(),
            ssh: "ssh".to_string(),
            ssh_add: "ssh-add".to_string(),
            ssh_agent: "ssh-agent".to_string(),
        }
    }
}

/// Time limits for external process calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// `which`/`where` probes and agent startup.
    pub availability: Duration,
    pub generation: Duration,
    pub registration: Duration,
    pub connection: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            availability: Duration::from_secs(10),
            generation: Duration::from_secs(30),
            registration: Duration::from_secs(15),
            connection: Duration::from_secs(45),
        }
    }
}

/// Tool names plus their timeouts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Toolchain {
    pub tools: Tools,
    pub timeouts: Timeouts,
}

/// Opens a new terminal window running a command. The window is never observed.
pub trait TerminalLauncher: Send + Sync {
    fn launch(&self, command: &Invocation, working_dir: &Path) -> Result<(), RunError>;
}

/// Quote one argument for a POSIX shell.
fn sh_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./@:+,".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Quote one argument for PowerShell.
fn ps_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', "''"))
}

/// `xterm -e`, falling back to `gnome-terminal --` when xterm is not installed.
pub struct PosixTerminal {
    runner: Arc<dyn ProcessRunner>,
    /// Terminal program and the flag that ends its own options.
    candidates: Vec<(&'static str, &'static str)>,
}

impl PosixTerminal {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            candidates: vec![("xterm", "-e"), ("gnome-terminal", "--")],
        }
    }

    /// Shell line run inside the window: the command, then a pause before closing.
    pub fn script(command: &Invocation) -> String {
        let mut parts = vec![sh_quote(&command.program)];
        parts.extend(command.args.iter().map(|a| sh_quote(a)));
        format!("{}; read -p 'Press Enter to close' _", parts.join(" "))
    }
}

impl TerminalLauncher for PosixTerminal {
    fn launch(&self, command: &Invocation, working_dir: &Path) -> Result<(), RunError> {
        let script = Self::script(command);
        let mut last_err = None;
        for &(terminal, exec_flag) in &self.candidates {
            let invocation = Invocation::new(terminal)
                .args([exec_flag, "bash", "-c"])
                .arg(script.as_str())
                .current_dir(working_dir);
            match self.runner.spawn_detached(&invocation) {
                Ok(()) => return Ok(()),
                Err(e @ RunError::NotFound { .. }) => {
                    tracing::debug!(terminal = %terminal, "Terminal not available");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(RunError::NotFound {
            program: "terminal".to_string(),
        }))
    }
}

/// New PowerShell window that stays open after the command.
pub struct PowerShellTerminal {
    runner: Arc<dyn ProcessRunner>,
}

impl PowerShellTerminal {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    pub fn script(command: &Invocation) -> String {
        let mut parts = vec![format!("& {}", ps_quote(&command.program))];
        parts.extend(command.args.iter().map(|a| ps_quote(a)));
        format!("{}; Read-Host -Prompt 'Press Enter to close'", parts.join(" "))
    }
}

impl TerminalLauncher for PowerShellTerminal {
    fn launch(&self, command: &Invocation, working_dir: &Path) -> Result<(), RunError> {
        let invocation = Invocation::new("powershell.exe")
            .args(["-NoExit", "-Command"])
            .arg(Self::script(command))
            .current_dir(working_dir);
        self.runner.spawn_detached(&invocation)
    }
}

/// Per-platform implementations of every capability the core needs.
#[derive(Clone)]
pub struct Capabilities {
    pub platform: Platform,
    pub permissions: Arc<dyn PermissionPolicy>,
    pub agent: Arc<dyn AgentLifecycle>,
    pub terminal: Arc<dyn TerminalLauncher>,
    pub keychain: bool,
}

impl Capabilities {
    pub fn for_platform(
        platform: Platform,
        runner: Arc<dyn ProcessRunner>,
        env: Arc<dyn AgentEnvironment>,
        toolchain: &Toolchain,
    ) -> Self {
        let timeouts = toolchain.timeouts;
        match platform {
            Platform::Windows => Self {
                platform,
                permissions: Arc::new(WindowsAcl::new(runner.clone(), timeouts.availability)),
                agent: Arc::new(WindowsAgentService::new(
                    runner.clone(),
                    timeouts.availability,
                )),
                terminal: Arc::new(PowerShellTerminal::new(runner)),
                keychain: false,
            },
            Platform::MacOs | Platform::Unix => Self {
                platform,
                permissions: Arc::new(UnixPermissions),
                agent: Arc::new(PosixAgent::new(
                    runner.clone(),
                    env,
                    toolchain.tools.ssh_agent.as_str(),
                    timeouts.availability,
                )),
                terminal: Arc::new(PosixTerminal::new(runner)),
                keychain: platform.has_keychain(),
            },
        }
    }
}
