// ABOUTME: KeyManager wires KeyStore, KeyGenerator, and ConnectionTester from one configuration.
// ABOUTME: The single entry point the presentation layer holds onto.

use crate::agent::{AgentRegistrar, ProcessEnvironment};
use crate::connection::{ConnectionOutcome, ConnectionTester};
use crate::error::Result;
use crate::keygen::{GenerationOutcome, GenerationRequest, KeyGenerator};
use crate::permissions::PermissionGuard;
use crate::platform::{Capabilities, Platform, Toolchain};
use crate::process::{ProcessRunner, SystemRunner, ToolLocator};
use crate::store::KeyStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Every lifecycle component for one key directory.
pub struct KeyManager {
    store: KeyStore,
    generator: KeyGenerator,
    tester: ConnectionTester,
    locator: ToolLocator,
    toolchain: Toolchain,
    platform: Platform,
}

impl KeyManager {
    /// Real processes and the current platform's capabilities.
    pub fn system(ssh_dir: impl Into<PathBuf>, toolchain: Toolchain) -> Self {
        let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner);
        let capabilities = Capabilities::for_platform(
            Platform::current(),
            runner.clone(),
            Arc::new(ProcessEnvironment),
            &toolchain,
        );
        Self::new(ssh_dir, toolchain, capabilities, runner)
    }

    pub fn new(
        ssh_dir: impl Into<PathBuf>,
        toolchain: Toolchain,
        capabilities: Capabilities,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        let store = KeyStore::new(ssh_dir, PermissionGuard::new(capabilities.permissions));
        let locator = ToolLocator::new(
            runner.clone(),
            capabilities.platform.locator_program(),
            toolchain.timeouts.availability,
        );
        let registrar = AgentRegistrar::new(
            capabilities.agent,
            runner.clone(),
            toolchain.tools.ssh_add.as_str(),
            capabilities.keychain,
            toolchain.timeouts.registration,
        );
        let generator = KeyGenerator::new(
            store.clone(),
            registrar,
            capabilities.terminal,
            runner.clone(),
            locator.clone(),
            toolchain.clone(),
        );
        let tester = ConnectionTester::new(runner, toolchain.tools.ssh.as_str());
        Self {
            store,
            generator,
            tester,
            locator,
            toolchain,
            platform: capabilities.platform,
        }
    }

    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutcome> {
        self.generator.generate(request).await
    }

    /// Connection test with the configured connection timeout.
    pub async fn test_connection(&self, host: &str, user: &str) -> ConnectionOutcome {
        self.test_connection_within(host, user, self.toolchain.timeouts.connection)
            .await
    }

    pub async fn test_connection_within(
        &self,
        host: &str,
        user: &str,
        timeout: Duration,
    ) -> ConnectionOutcome {
        self.tester.test_connection(host, user, timeout).await
    }

    /// Availability of each OpenSSH tool, in `keygen, ssh, ssh-add, ssh-agent` order.
    pub async fn tool_report(&self) -> Vec<(String, bool)> {
        let tools = &self.toolchain.tools;
        let mut report = Vec::new();
        for tool in [&tools.keygen, &tools.ssh, &tools.ssh_add, &tools.ssh_agent] {
            if self.platform == Platform::Windows && tool == &tools.ssh_agent {
                continue;
            }
            report.push((tool.clone(), self.locator.is_available(tool).await));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentLifecycle;
    use crate::permissions::UnixPermissions;
    use crate::platform::PosixTerminal;
    use crate::process::fake::FakeRunner;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct NoAgent;

    #[async_trait]
    impl AgentLifecycle for NoAgent {
        async fn ensure_running(&self) -> bool {
            false
        }
    }

    fn manager(dir: &std::path::Path, runner: FakeRunner, platform: Platform) -> KeyManager {
        let runner: Arc<dyn ProcessRunner> = Arc::new(runner);
        let capabilities = Capabilities {
            platform,
            permissions: Arc::new(UnixPermissions),
            agent: Arc::new(NoAgent),
            terminal: Arc::new(PosixTerminal::new(runner.clone())),
            keychain: false,
        };
        KeyManager::new(dir, Toolchain::default(), capabilities, runner)
    }

    #[tokio::test]
    async fn test_tool_report() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let mut runner = FakeRunner::default();
        runner.missing.insert("ssh-add".to_string());
        let manager = manager(temp_dir.path(), runner, Platform::Unix);

        let report = manager.tool_report().await;
        assert_eq!(
            report,
            vec![
                ("ssh-keygen".to_string(), true),
                ("ssh".to_string(), true),
                ("ssh-add".to_string(), false),
                ("ssh-agent".to_string(), true),
            ]
        );
    }

    #[tokio::test]
    async fn test_tool_report_skips_agent_binary_on_windows() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let manager = manager(temp_dir.path(), FakeRunner::default(), Platform::Windows);
        let report = manager.tool_report().await;
        assert_eq!(report.len(), 3);
    }

    #[tokio::test]
    async fn test_generate_without_agent_is_degraded() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let manager = manager(temp_dir.path(), FakeRunner::default(), Platform::Unix);

        let outcome = manager
            .generate(GenerationRequest::new("a@b.com"))
            .await
            .expect("should generate");
        match outcome {
            GenerationOutcome::Generated(key) => assert!(key.is_degraded()),
            other => panic!("expected generated key, got {other:?}"),
        }
        assert!(manager.store().find_default_key_pair().await.unwrap().is_some());
    }
}
