// ABOUTME: Clipboard capability backed by the platform's copy utility.
// ABOUTME: clip on Windows, pbcopy on macOS, xclip then xsel elsewhere.

use anyhow::{bail, Context, Result};
use std::io::Write;
use std::process::{Command, Stdio};

pub trait Clipboard {
    fn copy(&self, text: &str) -> Result<()>;
}

/// Pipes text into the first copy utility that runs successfully.
pub struct CommandClipboard {
    candidates: Vec<Vec<String>>,
}

impl CommandClipboard {
    pub fn new(candidates: Vec<Vec<String>>) -> Self {
        Self { candidates }
    }

    pub fn for_current_platform() -> Self {
        let candidates: &[&[&str]] = if cfg!(windows) {
            &[&["clip"]]
        } else if cfg!(target_os = "macos") {
            &[&["pbcopy"]]
        } else {
            &[
                &["xclip", "-selection", "clipboard"],
                &["xsel", "--clipboard", "--input"],
            ]
        };
        Self::new(
            candidates
                .iter()
                .map(|c| c.iter().map(|s| s.to_string()).collect())
                .collect(),
        )
    }

    fn pipe_into(argv: &[String], text: &str) -> Result<()> {
        let (program, args) = argv.split_first().context("empty clipboard command")?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to run {program}"))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .with_context(|| format!("Failed to write to {program}"))?;
        }
        let status = child
            .wait()
            .with_context(|| format!("Failed to wait for {program}"))?;
        if !status.success() {
            bail!("{program} exited with {status}");
        }
        Ok(())
    }
}

impl Clipboard for CommandClipboard {
    fn copy(&self, text: &str) -> Result<()> {
        let mut last_err = None;
        for argv in &self.candidates {
            match Self::pipe_into(argv, text) {
                Ok(()) => {
                    tracing::debug!(tool = ?argv.first(), "Copied to clipboard");
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Clipboard tool failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no clipboard tool configured")))
            .context("No clipboard utility available (install xclip or xsel)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_candidates_fails() {
        let clipboard = CommandClipboard::new(Vec::new());
        assert!(clipboard.copy("text").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_falls_through_to_working_tool() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("clip.txt");
        let clipboard = CommandClipboard::new(vec![
            vec!["definitely-not-a-clipboard-3f9a".to_string()],
            vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("cat > '{}'", out.display()),
            ],
        ]);

        clipboard.copy("ssh-ed25519 AAAA me@host").unwrap();
        assert_eq!(std::fs::read_to_string(out).unwrap(), "ssh-ed25519 AAAA me@host");
    }

    #[test]
    fn test_platform_candidates_present() {
        assert!(!CommandClipboard::for_current_platform().candidates.is_empty());
    }
}
