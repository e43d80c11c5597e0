use tokio::process::Command;

use crate::error::{CoordinatorError, Result};
use crate::registry::{ClusterSettings, NodeEntry};

/// The captured result of one remote command: stdout and stderr are always
/// kept as two distinct buffers, never merged, so a caller can tell a
/// decorative stderr line (a Jolokia-agent warning, say) from the actual
/// payload on stdout.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl CommandOutput {
    fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Spawns the system SSH client (or `kubectl exec`, for the fixed
/// administrative pods the reset orchestrator talks to) for every call. There
/// is no connection pool and no concurrency limit here — callers bound their
/// own fan-out.
#[derive(Clone, Default)]
pub struct RemoteShell;

impl RemoteShell {
    pub fn new() -> Self {
        RemoteShell
    }

    /// Runs `command` on `node` over SSH with a fixed, non-interactive option
    /// set. Blocks until the remote process exits. A non-zero exit status is
    /// surfaced as `RemoteExecFailed` with both streams preserved.
    pub async fn run(
        &self,
        node: &NodeEntry,
        settings: &ClusterSettings,
        command: &str,
    ) -> Result<CommandOutput> {
        let output = Command::new("ssh")
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-o")
            .arg("UserKnownHostsFile=/dev/null")
            .arg("-o")
            .arg("LogLevel=ERROR")
            .arg("-o")
            .arg(format!(
                "ConnectTimeout={}",
                settings.connect_timeout_secs
            ))
            .arg("-i")
            .arg(&node.key_path)
            .arg(format!("{}@{}", node.user, node.host))
            .arg(command)
            .output()
            .await
            .map_err(|e| {
                CoordinatorError::RemoteExecFailed {
                    node: node.name.clone(),
                    message: format!("failed to spawn ssh: {e}"),
                    stdout: String::new(),
                    stderr: String::new(),
                }
            })?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_status: output.status.code().unwrap_or(-1),
        };

        if !result.success() {
            return Err(CoordinatorError::RemoteExecFailed {
                node: node.name.clone(),
                message: format!("command exited with status {}", result.exit_status),
                stdout: result.stdout,
                stderr: result.stderr,
            });
        }

        Ok(result)
    }

    /// Like `run`, but post-processes the combined output by extracting the
    /// last decimal number it contains. Reserved for legacy plain-text
    /// OS-metrics commands (`uptime`, `free`, ...); never use it to parse a
    /// JSON reply — if no number is found, the sentinel `"0"` is returned.
    pub async fn run_capturing_numeric(
        &self,
        node: &NodeEntry,
        settings: &ClusterSettings,
        command: &str,
    ) -> Result<String> {
        let result = self.run(node, settings, command).await?;
        Ok(last_decimal_number(&result.stdout).unwrap_or_else(|| "0".to_string()))
    }

    /// Execs into a fixed administrative pod (the Kafka broker pod or the
    /// analytics database pod) via `kubectl exec`, rather than an SSH session
    /// to a registered node. This is the pathway the reset orchestrator uses for topic
    /// describe/delete/create and clustered table truncation.
    pub async fn exec_in_pod(
        &self,
        namespace: &str,
        pod: &str,
        command: &str,
    ) -> Result<CommandOutput> {
        let output = Command::new("kubectl")
            .arg("exec")
            .arg("-n")
            .arg(namespace)
            .arg(pod)
            .arg("--")
            .arg("sh")
            .arg("-c")
            .arg(command)
            .output()
            .await
            .map_err(|e| CoordinatorError::RemoteExecFailed {
                node: format!("{namespace}/{pod}"),
                message: format!("failed to spawn kubectl exec: {e}"),
                stdout: String::new(),
                stderr: String::new(),
            })?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_status: output.status.code().unwrap_or(-1),
        })
    }
}

fn last_decimal_number(text: &str) -> Option<String> {
    let re = regex::Regex::new(r"\d+\.?\d*").expect("static pattern is valid");
    re.find_iter(text).last().map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_decimal_number_picks_the_final_match() {
        assert_eq!(
            last_decimal_number("load average: 0.12, 0.34, 1.5"),
            Some("1.5".to_string())
        );
    }

    #[test]
    fn last_decimal_number_none_when_absent() {
        assert_eq!(last_decimal_number("no numbers here"), None);
    }
}
