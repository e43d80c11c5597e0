use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoordinatorError, Result};
use crate::registry::NodeRegistry;
use crate::shell::RemoteShell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BinaryKind {
    Generator,
    MetricsAgent,
}

impl BinaryKind {
    fn executable(self) -> &'static str {
        match self {
            BinaryKind::Generator => "loadgen",
            BinaryKind::MetricsAgent => "node-metrics-agent",
        }
    }

    fn listen_port_flag(self, port: u16) -> Option<String> {
        match self {
            BinaryKind::Generator => None,
            BinaryKind::MetricsAgent => Some(format!("--port {port}")),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BinaryKind::Generator => "generator",
            BinaryKind::MetricsAgent => "metrics-agent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Running,
    Stopped,
    Disabled,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessStatus {
    pub status: StatusKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_info: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl ProcessStatus {
    fn disabled() -> Self {
        ProcessStatus {
            status: StatusKind::Disabled,
            pid: None,
            start_time: None,
            process_info: None,
            checked_at: Utc::now(),
        }
    }

    fn stopped() -> Self {
        ProcessStatus {
            status: StatusKind::Stopped,
            pid: None,
            start_time: None,
            process_info: None,
            checked_at: Utc::now(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        ProcessStatus {
            status: StatusKind::Error,
            pid: None,
            start_time: None,
            process_info: Some(message.into()),
            checked_at: Utc::now(),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionResponse {
    pub status: ProcessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub node: String,
    #[serde(flatten)]
    pub status: ProcessStatus,
}

const SETTLE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(2);

/// Starts, stops, and probes the two long-running binaries the load-testing
/// fleet runs on every node. The remote OS is the only source of truth: the
/// controller keeps no durable state of its own between requests.
pub struct BinaryController {
    registry: Arc<NodeRegistry>,
    shell: RemoteShell,
}

impl BinaryController {
    pub fn new(registry: Arc<NodeRegistry>, shell: RemoteShell) -> Self {
        BinaryController { registry, shell }
    }

    pub async fn status(&self, node_name: &str, kind: BinaryKind) -> Result<ProcessStatus> {
        let node = self.registry.get(node_name)?;
        if !node.enabled {
            return Ok(ProcessStatus::disabled());
        }
        let settings = self.registry.get_settings();

        let pgrep = self
            .shell
            .run(
                &node,
                &settings,
                &format!("pgrep -f {}", kind.executable()),
            )
            .await;

        // pgrep exits non-zero when nothing matches; that is "stopped", not
        // a remote-exec failure. An empty stdout can also mean ssh itself
        // never reached the remote command (bad host, bad key, exit ~255),
        // which always leaves its own message on stderr — only treat this
        // as "stopped" when stderr is empty too.
        let pgrep_stdout = match pgrep {
            Ok(out) => out.stdout,
            Err(CoordinatorError::RemoteExecFailed { stdout, stderr, .. })
                if stdout.trim().is_empty() && stderr.trim().is_empty() =>
            {
                return Ok(ProcessStatus::stopped());
            }
            Err(e) => return Err(e),
        };

        let pid = match parse_pgrep_pid(&pgrep_stdout) {
            Ok(None) => return Ok(ProcessStatus::stopped()),
            Ok(Some(pid)) => pid,
            Err(unparsable) => {
                return Ok(ProcessStatus::error(format!(
                    "could not parse pid from pgrep output: '{unparsable}'"
                )));
            }
        };

        let start_time = self
            .shell
            .run(&node, &settings, &format!("ps -p {pid} -o lstart="))
            .await
            .map(|o| o.stdout.trim().to_string())
            .ok();

        let process_info = self
            .shell
            .run(
                &node,
                &settings,
                &format!("ps -p {pid} -o pid,ppid,pcpu,pmem,etime,comm"),
            )
            .await
            .map(|o| o.stdout.trim().to_string())
            .ok();

        Ok(ProcessStatus {
            status: StatusKind::Running,
            pid: Some(pid),
            start_time,
            process_info,
            checked_at: Utc::now(),
        })
    }

    pub async fn status_all(&self) -> Vec<NodeStatus> {
        let nodes = self.registry.list_enabled();
        let mut results = Vec::with_capacity(nodes.len());
        for node in nodes {
            let status = match self.status(&node.name, BinaryKind::Generator).await {
                Ok(s) => s,
                Err(e) => ProcessStatus::error(e.to_string()),
            };
            results.push(NodeStatus {
                node: node.name,
                status,
            });
        }
        results
    }

    pub async fn start(
        &self,
        node_name: &str,
        kind: BinaryKind,
        timeout_minutes: u64,
    ) -> Result<ActionResponse> {
        let node = self.registry.get(node_name)?;
        if !node.enabled {
            return Err(CoordinatorError::NodeDisabled(node_name.to_string()));
        }
        let settings = self.registry.get_settings();

        let current = self.status(node_name, kind).await?;
        ensure_not_running(&current, node_name, kind)?;

        let port_args = kind
            .listen_port_flag(node.metrics_agent_port)
            .unwrap_or_default();
        let launch = format!(
            "cd {dir} && nohup ./{exe} {args} > /dev/null 2>&1 & echo $!; disown",
            dir = node.remote_bin_dir,
            exe = kind.executable(),
            args = port_args,
        );
        let launch_out = self.shell.run(&node, &settings, &launch).await?;

        if timeout_minutes > 0 {
            let pid_hint = launch_out.stdout.trim();
            if let Ok(pid) = pid_hint.parse::<u32>() {
                let kill_cmd = format!(
                    "nohup sh -c 'sleep {} && kill {} 2>/dev/null' > /dev/null 2>&1 &",
                    timeout_minutes * 60,
                    pid
                );
                if let Err(e) = self.shell.run(&node, &settings, &kill_cmd).await {
                    tracing::warn!(node = %node_name, error = %e, "failed to schedule auto-termination");
                }
            }
        }

        tokio::time::sleep(SETTLE_INTERVAL).await;
        match self.status(node_name, kind).await {
            Ok(status) => Ok(ActionResponse {
                status,
                warning: None,
            }),
            Err(e) => Ok(ActionResponse {
                status: ProcessStatus::stopped(),
                warning: Some(format!(
                    "start issued but re-verification failed: {e}"
                )),
            }),
        }
    }

    pub async fn stop(&self, node_name: &str, kind: BinaryKind) -> Result<ActionResponse> {
        let node = self.registry.get(node_name)?;
        if !node.enabled {
            return Err(CoordinatorError::NodeDisabled(node_name.to_string()));
        }
        let settings = self.registry.get_settings();

        let current = self.status(node_name, kind).await?;
        ensure_running(&current, node_name, kind)?;

        match kind {
            BinaryKind::MetricsAgent => {
                let kill_all = format!(
                    "pgrep -f {exe} | xargs -r kill; sleep 1; pgrep -f {exe} | xargs -r kill -9",
                    exe = kind.executable()
                );
                self.shell.run(&node, &settings, &kill_all).await?;
            }
            BinaryKind::Generator => {
                if let Some(pid) = current.pid {
                    let graceful = format!("kill {pid}");
                    if self.shell.run(&node, &settings, &graceful).await.is_err() {
                        let force = format!("kill -9 {pid}");
                        self.shell.run(&node, &settings, &force).await?;
                    }
                }
            }
        }

        tokio::time::sleep(SETTLE_INTERVAL).await;
        match self.status(node_name, kind).await {
            Ok(status) => Ok(ActionResponse {
                status,
                warning: None,
            }),
            Err(e) => Ok(ActionResponse {
                status: ProcessStatus::stopped(),
                warning: Some(format!(
                    "stop issued but re-verification failed: {e}"
                )),
            }),
        }
    }
}

/// Parses the first line of `pgrep -f ...` output. `Ok(None)` means no
/// matching process (stopped); `Err` carries the unparsable line verbatim.
fn parse_pgrep_pid(stdout: &str) -> std::result::Result<Option<u32>, String> {
    let first_line = stdout.lines().next().unwrap_or("").trim();
    if first_line.is_empty() {
        return Ok(None);
    }
    first_line
        .parse()
        .map(Some)
        .map_err(|_| first_line.to_string())
}

fn ensure_not_running(current: &ProcessStatus, node_name: &str, kind: BinaryKind) -> Result<()> {
    if current.status == StatusKind::Running {
        return Err(CoordinatorError::AlreadyRunning {
            node: node_name.to_string(),
            kind: kind.as_str().to_string(),
            pid: current.pid.unwrap_or(0),
        });
    }
    Ok(())
}

fn ensure_running(current: &ProcessStatus, node_name: &str, kind: BinaryKind) -> Result<()> {
    if current.status != StatusKind::Running {
        return Err(CoordinatorError::NotRunning {
            node: node_name.to_string(),
            kind: kind.as_str().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{NodeEntry, NodeRegistry};

    fn entry(name: &str, enabled: bool) -> NodeEntry {
        NodeEntry {
            name: name.to_string(),
            host: "10.0.0.1".to_string(),
            user: "loadgen".to_string(),
            key_path: "/home/loadgen/.ssh/id_rsa".to_string(),
            remote_config_dir: "/opt/loadgen/conf".to_string(),
            remote_bin_dir: "/opt/loadgen/bin".to_string(),
            metrics_agent_port: 9100,
            description: "".to_string(),
            enabled,
        }
    }

    fn controller_with(registry: NodeRegistry) -> BinaryController {
        BinaryController::new(Arc::new(registry), RemoteShell::new())
    }

    #[test]
    fn parse_pgrep_pid_empty_output_means_stopped() {
        assert_eq!(parse_pgrep_pid(""), Ok(None));
        assert_eq!(parse_pgrep_pid("\n\n"), Ok(None));
    }

    #[test]
    fn parse_pgrep_pid_reads_first_pid() {
        assert_eq!(parse_pgrep_pid("4821\n4822\n"), Ok(Some(4821)));
    }

    #[test]
    fn parse_pgrep_pid_rejects_garbage() {
        assert_eq!(parse_pgrep_pid("not-a-pid"), Err("not-a-pid".to_string()));
    }

    #[test]
    fn ensure_not_running_rejects_already_running() {
        let running = ProcessStatus {
            status: StatusKind::Running,
            pid: Some(123),
            start_time: None,
            process_info: None,
            checked_at: Utc::now(),
        };
        let err = ensure_not_running(&running, "node-a", BinaryKind::Generator).unwrap_err();
        assert!(matches!(err, CoordinatorError::AlreadyRunning { pid: 123, .. }));
    }

    #[test]
    fn ensure_not_running_accepts_stopped() {
        assert!(ensure_not_running(&ProcessStatus::stopped(), "node-a", BinaryKind::Generator).is_ok());
    }

    #[test]
    fn ensure_running_rejects_stopped() {
        let err = ensure_running(&ProcessStatus::stopped(), "node-a", BinaryKind::Generator)
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::NotRunning { .. }));
    }

    #[test]
    fn ensure_running_accepts_running() {
        let running = ProcessStatus {
            status: StatusKind::Running,
            pid: Some(1),
            start_time: None,
            process_info: None,
            checked_at: Utc::now(),
        };
        assert!(ensure_running(&running, "node-a", BinaryKind::Generator).is_ok());
    }

    #[tokio::test]
    async fn status_of_unknown_node_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let registry = NodeRegistry::load(dir.path().join("nodes.yaml")).unwrap();
        let controller = controller_with(registry);
        let err = controller
            .status("ghost", BinaryKind::Generator)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::NotFound(_)));
    }

    #[tokio::test]
    async fn status_of_disabled_node_is_disabled_without_remote_call() {
        let dir = tempfile::tempdir().unwrap();
        let registry = NodeRegistry::load(dir.path().join("nodes.yaml")).unwrap();
        registry.add(entry("node-a", false)).unwrap();
        let controller = controller_with(registry);
        let status = controller
            .status("node-a", BinaryKind::Generator)
            .await
            .unwrap();
        assert_eq!(status.status, StatusKind::Disabled);
    }

    #[tokio::test]
    async fn start_rejects_disabled_node() {
        let dir = tempfile::tempdir().unwrap();
        let registry = NodeRegistry::load(dir.path().join("nodes.yaml")).unwrap();
        registry.add(entry("node-a", false)).unwrap();
        let controller = controller_with(registry);
        let err = controller
            .start("node-a", BinaryKind::Generator, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::NodeDisabled(_)));
    }

    #[tokio::test]
    async fn stop_rejects_disabled_node() {
        let dir = tempfile::tempdir().unwrap();
        let registry = NodeRegistry::load(dir.path().join("nodes.yaml")).unwrap();
        registry.add(entry("node-a", false)).unwrap();
        let controller = controller_with(registry);
        let err = controller
            .stop("node-a", BinaryKind::Generator)
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::NodeDisabled(_)));
    }
}
