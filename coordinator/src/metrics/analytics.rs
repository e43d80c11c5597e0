use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use clickhouse::Row;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{CoordinatorError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct NodeAggregate {
    pub node: String,
    pub cpu_used_percent: f64,
    pub memory_used_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct PodStatus {
    pub pod: String,
    pub node: String,
    pub cpu_used_percent: f64,
    pub memory_used_percent: f64,
    pub phase: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct PodMemory {
    pub pod: String,
    pub memory_gb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Row)]
pub struct TopicRate {
    pub topic: String,
    pub messages_in_per_sec: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsSnapshot {
    pub node_aggregates: Vec<NodeAggregate>,
    pub pod_status: Vec<PodStatus>,
    pub top_pods_by_node: HashMap<String, Vec<PodMemory>>,
    pub topic_rates: Vec<TopicRate>,
    pub queried_at: DateTime<Utc>,
}

/// Analytical query path backed by the columnar analytics database, shielded
/// by a short-lived cache. Queries run on demand, never on a timer.
pub struct AnalyticsClient {
    client: Option<clickhouse::Client>,
    k8s_nodes: Vec<String>,
    pods: Vec<String>,
    topics: Vec<String>,
    ttl: Duration,
    query_timeout: Duration,
    cache: RwLock<Option<(Instant, AnalyticsSnapshot)>>,
}

impl AnalyticsClient {
    pub fn new(config: &Config) -> Self {
        let client = if config.analytics_configured() {
            Some(
                clickhouse::Client::default()
                    .with_url(format!(
                        "http://{}:{}",
                        config.analytics_host, config.analytics_http_port
                    ))
                    .with_database(&config.analytics_database)
                    .with_user(&config.analytics_user)
                    .with_password(&config.analytics_password)
                    .with_compression(clickhouse::Compression::Lz4),
            )
        } else {
            None
        };

        AnalyticsClient {
            client,
            k8s_nodes: config.analytics_k8s_nodes(),
            pods: config.analytics_pods(),
            topics: config.analytics_topics(),
            ttl: Duration::from_secs(config.analytics_cache_ttl_secs),
            query_timeout: Duration::from_secs(config.analytics_query_timeout_secs),
            cache: RwLock::new(None),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    /// Returns the cached snapshot if still fresh, otherwise runs the four
    /// queries below and refills the cache. A read under the
    /// shared lock is attempted first; the exclusive refill re-checks
    /// freshness after acquiring the write lock, in case another request won
    /// the race.
    pub async fn snapshot(&self) -> Result<AnalyticsSnapshot> {
        let Some(client) = &self.client else {
            return Err(CoordinatorError::DependencyUnavailable(
                "analytics database is not configured".into(),
            ));
        };

        if let Some((fetched_at, snapshot)) = self.cache.read().as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(snapshot.clone());
            }
        }

        let mut cache = self.cache.write();
        if let Some((fetched_at, snapshot)) = cache.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return Ok(snapshot.clone());
            }
        }

        let snapshot = self.query_all(client).await?;
        *cache = Some((Instant::now(), snapshot.clone()));
        Ok(snapshot)
    }

    async fn query_all(&self, client: &clickhouse::Client) -> Result<AnalyticsSnapshot> {
        let node_aggregates = self.with_timeout(self.query_node_aggregates(client)).await?;
        let pod_status = self.with_timeout(self.query_pod_status(client)).await?;
        let top_pods_by_node = self.with_timeout(self.query_top_pods(client)).await?;
        let topic_rates = self.with_timeout(self.query_topic_rates(client)).await?;

        Ok(AnalyticsSnapshot {
            node_aggregates,
            pod_status,
            top_pods_by_node,
            topic_rates,
            queried_at: Utc::now(),
        })
    }

    /// Enforces the per-query ceiling around a single analytics query.
    async fn with_timeout<T>(&self, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.query_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CoordinatorError::DependencyUnavailable(format!(
                "analytics query exceeded {}s timeout",
                self.query_timeout.as_secs()
            ))),
        }
    }

    async fn query_node_aggregates(&self, client: &clickhouse::Client) -> Result<Vec<NodeAggregate>> {
        if self.k8s_nodes.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = self.k8s_nodes.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT node, avg(cpu_used_percent) AS cpu_used_percent, \
             avg(memory_used_percent) AS memory_used_percent \
             FROM cluster_node_metrics WHERE node IN ({placeholders}) GROUP BY node"
        );
        let mut query = client.query(&sql);
        for node in &self.k8s_nodes {
            query = query.bind(node);
        }
        query
            .fetch_all::<NodeAggregate>()
            .await
            .map_err(|e| CoordinatorError::Internal(format!("node aggregate query failed: {e}")))
    }

    async fn query_pod_status(&self, client: &clickhouse::Client) -> Result<Vec<PodStatus>> {
        if self.pods.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = self.pods.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT pod, node, cpu_used_percent, memory_used_percent, phase \
             FROM pod_metrics WHERE pod IN ({placeholders})"
        );
        let mut query = client.query(&sql);
        for pod in &self.pods {
            query = query.bind(pod);
        }
        query
            .fetch_all::<PodStatus>()
            .await
            .map_err(|e| CoordinatorError::Internal(format!("pod status query failed: {e}")))
    }

    async fn query_top_pods(&self, client: &clickhouse::Client) -> Result<HashMap<String, Vec<PodMemory>>> {
        let mut result = HashMap::new();
        for node in &self.k8s_nodes {
            let sql = "SELECT pod, memory_gb FROM pod_metrics WHERE node = ? \
                       ORDER BY memory_gb DESC LIMIT 5";
            let rows = client
                .query(sql)
                .bind(node)
                .fetch_all::<PodMemory>()
                .await
                .map_err(|e| CoordinatorError::Internal(format!("top-pods query failed: {e}")))?;
            result.insert(node.clone(), rows);
        }
        Ok(result)
    }

    async fn query_topic_rates(&self, client: &clickhouse::Client) -> Result<Vec<TopicRate>> {
        if self.topics.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = self.topics.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT topic, avg(messages_in_per_sec) AS messages_in_per_sec \
             FROM kafka_topic_rates WHERE topic IN ({placeholders}) GROUP BY topic"
        );
        let mut query = client.query(&sql);
        for topic in &self.topics {
            query = query.bind(topic);
        }
        query
            .fetch_all::<TopicRate>()
            .await
            .map_err(|e| CoordinatorError::Internal(format!("topic rate query failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_client_reports_dependency_unavailable() {
        let mut config = Config::default();
        config.analytics_host = String::new();
        let client = AnalyticsClient::new(&config);
        assert!(!client.is_configured());
        let err = client.snapshot().await.unwrap_err();
        assert!(matches!(err, CoordinatorError::DependencyUnavailable(_)));
    }
}
