mod analytics;
mod fanout;

pub use analytics::{AnalyticsClient, AnalyticsSnapshot, NodeAggregate, PodMemory, PodStatus, TopicRate};
pub use fanout::Fanout;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

use crate::config::Config;
use crate::registry::NodeRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeMetricsStatus {
    Active,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub cpu_used_percent: f64,
    pub cpu_cores: u32,
    pub load_1m: f64,
    pub mem_used_gb: f64,
    pub mem_available_gb: f64,
    pub mem_total_gb: f64,
    pub mem_used_percent: f64,
    pub status: NodeMetricsStatus,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterState {
    pub simulation_running: bool,
    pub profile: Option<String>,
    pub target_eps: Option<u64>,
    pub target_kafka_topics: Option<u32>,
    pub target_ch_tables: Option<u32>,
}

impl Default for ClusterState {
    fn default() -> Self {
        ClusterState {
            simulation_running: false,
            profile: None,
            target_eps: None,
            target_kafka_topics: None,
            target_ch_tables: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub cluster: ClusterState,
    pub nodes: HashMap<String, NodeMetrics>,
    pub analytics: Option<AnalyticsSnapshot>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Snapshot {
            cluster: ClusterState::default(),
            nodes: HashMap::new(),
            analytics: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AgentCpu {
    used_percent: f64,
    cores: u32,
    load_1m: f64,
}

#[derive(Debug, Deserialize)]
struct AgentMemory {
    used_gb: f64,
    available_gb: f64,
    total_gb: f64,
    used_percent: f64,
}

#[derive(Debug, Deserialize)]
struct AgentSystem {
    cpu: AgentCpu,
    memory: AgentMemory,
}

#[derive(Debug, Deserialize)]
struct AgentMetricsResponse {
    system: AgentSystem,
}

/// Owns the live snapshot, the per-node HTTP poller, the analytical query
/// path, and the `/ws` fan-out. One instance for the whole process, held
/// behind an `Arc`.
pub struct MetricsCollector {
    registry: Arc<NodeRegistry>,
    http: reqwest::Client,
    poll_timeout: Duration,
    snapshot: RwLock<Snapshot>,
    fanout: Fanout,
    analytics: AnalyticsClient,
}

impl MetricsCollector {
    pub fn new(config: &Config, registry: Arc<NodeRegistry>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.metrics_poll_timeout_secs))
            .build()
            .expect("reqwest client configuration is static and always valid");

        MetricsCollector {
            registry,
            http,
            poll_timeout: Duration::from_secs(config.metrics_poll_timeout_secs),
            snapshot: RwLock::new(Snapshot::default()),
            fanout: Fanout::new(),
            analytics: AnalyticsClient::new(config),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.read().clone()
    }

    pub fn set_simulation_running(&self, running: bool) {
        self.snapshot.write().cluster.simulation_running = running;
    }

    /// Records the most recently applied EPS distribution so the dashboard
    /// snapshot reflects the cluster's current target instead of staying
    /// empty forever.
    pub fn record_eps_plan(&self, plan: &crate::eps::EpsPlanResult) {
        let mut cluster = self.snapshot.write();
        cluster.cluster.profile = if plan.assigned.is_empty() {
            None
        } else {
            Some(plan.assigned.keys().cloned().collect::<Vec<_>>().join(","))
        };
        cluster.cluster.target_eps = Some(plan.cluster_eps);
    }

    /// Records the topic/table counts the reset orchestrator last acted on.
    pub fn record_reset_targets(&self, kafka_topics: u32, ch_tables: u32) {
        let mut cluster = self.snapshot.write();
        cluster.cluster.target_kafka_topics = Some(kafka_topics);
        cluster.cluster.target_ch_tables = Some(ch_tables);
    }

    pub fn subscribe(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        self.fanout.subscribe()
    }

    pub fn unsubscribe(&self, id: Uuid) {
        self.fanout.unsubscribe(id);
    }

    pub async fn analytics_snapshot(&self) -> crate::error::Result<AnalyticsSnapshot> {
        self.analytics.snapshot().await
    }

    /// Default time window for the range-scoped metrics read endpoint: the
    /// last five minutes when the caller doesn't supply one.
    pub fn effective_range(
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> (DateTime<Utc>, DateTime<Utc>) {
        let to = to.unwrap_or_else(Utc::now);
        let from = from.unwrap_or_else(|| to - chrono::Duration::minutes(5));
        (from, to)
    }

    /// One tick of the live per-node poll. Polls run concurrently,
    /// bounded by a semaphore sized to the enabled node count, then the whole
    /// snapshot is broadcast once as a single message.
    pub async fn poll_once(&self) {
        let nodes = self.registry.list_enabled();
        if nodes.is_empty() {
            return;
        }
        let semaphore = Arc::new(Semaphore::new(nodes.len()));
        let mut handles = Vec::with_capacity(nodes.len());

        for node in nodes {
            let http = self.http.clone();
            let timeout = self.poll_timeout;
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closes");
                let name = node.name.clone();
                let metrics = poll_one_node(&http, &node.host, node.metrics_agent_port, timeout).await;
                (name, metrics)
            }));
        }

        let results = futures::future::join_all(handles).await;

        let mut snapshot = self.snapshot.write();
        for joined in results {
            let Ok((name, outcome)) = joined else {
                continue;
            };
            match outcome {
                Ok(metrics) => {
                    snapshot.nodes.insert(name, metrics);
                }
                Err(message) => {
                    // Preserve last-known metrics; only flip status to error.
                    if let Some(existing) = snapshot.nodes.get_mut(&name) {
                        existing.status = NodeMetricsStatus::Error;
                        existing.last_updated = Utc::now();
                    } else {
                        tracing::warn!(node = %name, error = %message, "metrics poll failed with no prior data");
                        snapshot.nodes.insert(
                            name,
                            NodeMetrics {
                                cpu_used_percent: 0.0,
                                cpu_cores: 0,
                                load_1m: 0.0,
                                mem_used_gb: 0.0,
                                mem_available_gb: 0.0,
                                mem_total_gb: 0.0,
                                mem_used_percent: 0.0,
                                status: NodeMetricsStatus::Error,
                                last_updated: Utc::now(),
                            },
                        );
                    }
                }
            }
        }

        let message = serde_json::to_string(&*snapshot)
            .unwrap_or_else(|e| format!("{{\"error\":\"serialization failed: {e}\"}}"));
        drop(snapshot);
        self.fanout.broadcast(message);
    }

    /// Spawns the background poll loop, reporting liveness to `health` after
    /// every tick so `/api/health` reflects real forward progress.
    pub fn spawn_poll_loop(
        self: Arc<Self>,
        interval: Duration,
        health: health::HealthHandle,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.poll_once().await;
                health.report_healthy().await;
            }
        })
    }
}

async fn poll_one_node(
    http: &reqwest::Client,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<NodeMetrics, String> {
    let url = format!("http://{host}:{port}/api/system/metrics");
    let response = http
        .get(&url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if !response.status().is_success() {
        return Err(format!("status {}", response.status()));
    }

    let parsed: AgentMetricsResponse = response.json().await.map_err(|e| e.to_string())?;

    Ok(NodeMetrics {
        cpu_used_percent: parsed.system.cpu.used_percent,
        cpu_cores: parsed.system.cpu.cores,
        load_1m: parsed.system.cpu.load_1m,
        mem_used_gb: parsed.system.memory.used_gb,
        mem_available_gb: parsed.system.memory.available_gb,
        mem_total_gb: parsed.system.memory.total_gb,
        mem_used_percent: parsed.system.memory.used_percent,
        status: NodeMetricsStatus::Active,
        last_updated: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_range_defaults_to_last_five_minutes() {
        let (from, to) = MetricsCollector::effective_range(None, None);
        let delta = to - from;
        assert_eq!(delta.num_minutes(), 5);
    }

    #[test]
    fn effective_range_honors_explicit_bounds() {
        let to = Utc::now();
        let from = to - chrono::Duration::minutes(30);
        let (actual_from, actual_to) = MetricsCollector::effective_range(Some(from), Some(to));
        assert_eq!(actual_from, from);
        assert_eq!(actual_to, to);
    }
}
