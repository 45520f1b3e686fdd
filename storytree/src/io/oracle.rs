//! Generation oracle boundary.
//!
//! The [`Oracle`] trait decouples classification from the actual text
//! generation backend. The call is a fallible, single-shot completion; no
//! streaming. Tests use scripted oracles that return predetermined replies
//! without spawning processes.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::core::error::TreeError;
use crate::io::config::OracleConfig;

/// A black-box yes/no or multiple-choice text classifier.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Send a prompt for completion and return the raw reply text.
    async fn classify(&self, prompt: &str) -> Result<String, TreeError>;
}

/// Oracle that spawns a configured command, feeds the prompt on stdin, and
/// reads the completion from stdout.
pub struct CommandOracle {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandOracle {
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            command,
            timeout,
            output_limit_bytes,
        }
    }

    pub fn from_config(config: &OracleConfig) -> Self {
        Self::new(
            config.command.clone(),
            Duration::from_secs(config.timeout_secs),
            config.output_limit_bytes,
        )
    }
}

#[async_trait]
impl Oracle for CommandOracle {
    async fn classify(&self, prompt: &str) -> Result<String, TreeError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| TreeError::OracleFailure("empty oracle command".to_string()))?;
        info!(program, "starting oracle command");

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| TreeError::OracleFailure(format!("spawn {program}: {err}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|err| TreeError::OracleFailure(format!("write prompt: {err}")))?;
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => {
                result.map_err(|err| TreeError::OracleFailure(format!("wait: {err}")))?
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "oracle timed out");
                return Err(TreeError::OracleFailure(format!(
                    "timed out after {:?}",
                    self.timeout
                )));
            }
        };

        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "oracle command failed");
            return Err(TreeError::OracleFailure(format!(
                "command exited with status {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let mut reply = String::from_utf8_lossy(&output.stdout).to_string();
        if reply.len() > self.output_limit_bytes {
            reply.truncate(self.output_limit_bytes);
        }
        debug!(bytes = reply.len(), "oracle replied");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{CommandOracle, Oracle};
    use crate::core::error::TreeError;

    fn shell_oracle(script: &str, timeout: Duration) -> CommandOracle {
        CommandOracle::new(
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            timeout,
            1024,
        )
    }

    #[tokio::test]
    async fn command_oracle_returns_stdout() {
        let oracle = shell_oracle("cat >/dev/null; echo yes", Duration::from_secs(5));
        let reply = oracle.classify("is it done?").await.expect("classify");
        assert_eq!(reply.trim(), "yes");
    }

    #[tokio::test]
    async fn failing_command_is_an_oracle_failure() {
        let oracle = shell_oracle("cat >/dev/null; exit 3", Duration::from_secs(5));
        let err = oracle.classify("prompt").await.unwrap_err();
        assert!(matches!(err, TreeError::OracleFailure(_)));
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let oracle = shell_oracle("sleep 5", Duration::from_millis(100));
        let err = oracle.classify("prompt").await.unwrap_err();
        assert!(matches!(err, TreeError::OracleFailure(_)));
    }
}
