mod topics_map;

pub use topics_map::{SourceTopicsEntry, TopicsTablesMap};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;

use crate::config::Config;
use crate::eps::Switchboard;
use crate::error::Result;
use crate::shell::RemoteShell;

const DELETE_PROPAGATION_DELAY: Duration = Duration::from_secs(2);
const DEFAULT_PARTITIONS: u32 = 1;
const DEFAULT_REPLICATION_FACTOR: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct TopicRecreateResult {
    pub topic: String,
    pub partitions: u32,
    pub replication_factor: u32,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableTruncateResult {
    pub table: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecreateReport {
    pub topics: Vec<TopicRecreateResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TruncateReport {
    pub tables: Vec<TableTruncateResult>,
}

/// Recreates Kafka topics and truncates ClickHouse-shaped tables for the
/// currently-enabled source set. Both operations reach their target
/// exclusively through `RemoteShell::exec_in_pod` against a fixed
/// administrative pod — never through a native client library.
pub struct ResetOrchestrator {
    shell: RemoteShell,
    topics_tables: TopicsTablesMap,
    switchboard_path: String,
    kafka_namespace: String,
    kafka_broker_pod: String,
    analytics_db_namespace: String,
    analytics_db_pod: String,
    analytics_database: String,
    analytics_cluster_name: String,
}

impl ResetOrchestrator {
    pub fn new(config: &Config, shell: RemoteShell, topics_tables: TopicsTablesMap) -> Self {
        ResetOrchestrator {
            shell,
            topics_tables,
            switchboard_path: config.switchboard_path.clone(),
            kafka_namespace: config.kafka_namespace.clone(),
            kafka_broker_pod: config.kafka_broker_pod.clone(),
            analytics_db_namespace: config.analytics_db_namespace.clone(),
            analytics_db_pod: config.analytics_db_pod.clone(),
            analytics_database: config.analytics_database.clone(),
            analytics_cluster_name: config.analytics_cluster_name.clone(),
        }
    }

    /// Unions input topics, output topics, and tables over every source the
    /// switchboard currently has enabled, matching switchboard keys against
    /// catalog keys through a casing/spacing-insensitive translation.
    fn affected_sets(&self) -> Result<(HashSet<String>, HashSet<String>)> {
        let switchboard = Switchboard::load(&self.switchboard_path)?;
        let mut topics = HashSet::new();
        let mut tables = HashSet::new();

        for entry in self.topics_tables.entries() {
            let enabled = self
                .topics_tables
                .source_names()
                .iter()
                .find(|name| normalize_key(name) == normalize_key(&entry.source))
                .map(|name| switchboard.is_enabled(name))
                .unwrap_or(false);
            if !enabled {
                continue;
            }
            topics.extend(entry.input_topics.iter().cloned());
            topics.extend(entry.output_topics.iter().cloned());
            tables.extend(entry.tables.iter().cloned());
        }

        Ok((topics, tables))
    }

    pub async fn status(&self) -> Result<(Vec<String>, Vec<String>)> {
        let (topics, tables) = self.affected_sets()?;
        let mut topics: Vec<_> = topics.into_iter().collect();
        let mut tables: Vec<_> = tables.into_iter().collect();
        topics.sort();
        tables.sort();
        Ok((topics, tables))
    }

    /// Describes, deletes, and recreates every topic affected by the
    /// enabled source set, each topic's three substeps run serially but
    /// topics run in parallel with each other. One topic's failure does not
    /// abort the batch.
    pub async fn recreate_all(&self) -> Result<RecreateReport> {
        let (topics, _tables) = self.affected_sets()?;
        let results = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = topics
            .into_iter()
            .map(|topic| {
                let results = results.clone();
                async move {
                    let outcome = self.recreate_one(&topic).await;
                    results.lock().push(outcome);
                }
            })
            .collect();
        join_all(handles).await;

        let mut topics = Arc::try_unwrap(results)
            .expect("all tasks have completed and dropped their clone")
            .into_inner();
        topics.sort_by(|a, b| a.topic.cmp(&b.topic));
        Ok(RecreateReport { topics })
    }

    pub async fn recreate_one(&self, topic: &str) -> TopicRecreateResult {
        let (partitions, replication_factor) = match self.describe(topic).await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(topic = %topic, error = %e, "describe failed, using defaults");
                (DEFAULT_PARTITIONS, DEFAULT_REPLICATION_FACTOR)
            }
        };

        if let Err(e) = self.delete(topic).await {
            tracing::warn!(topic = %topic, error = %e, "delete failed, topic may not have existed");
        }

        tokio::time::sleep(DELETE_PROPAGATION_DELAY).await;

        match self.create(topic, partitions, replication_factor).await {
            Ok(()) => TopicRecreateResult {
                topic: topic.to_string(),
                partitions,
                replication_factor,
                ok: true,
                error: None,
            },
            Err(e) => TopicRecreateResult {
                topic: topic.to_string(),
                partitions,
                replication_factor,
                ok: false,
                error: Some(e.to_string()),
            },
        }
    }

    pub async fn describe(&self, topic: &str) -> Result<(u32, u32)> {
        let command = format!(
            "kafka-topics.sh --bootstrap-server localhost:9092 --describe --topic {topic}"
        );
        let output = self
            .shell
            .exec_in_pod(&self.kafka_namespace, &self.kafka_broker_pod, &command)
            .await?;
        Ok(parse_describe_output(&output.stdout))
    }

    pub async fn delete(&self, topic: &str) -> Result<()> {
        let command =
            format!("kafka-topics.sh --bootstrap-server localhost:9092 --delete --topic {topic}");
        self.shell
            .exec_in_pod(&self.kafka_namespace, &self.kafka_broker_pod, &command)
            .await?;
        Ok(())
    }

    pub async fn create(&self, topic: &str, partitions: u32, replication_factor: u32) -> Result<()> {
        let command = format!(
            "kafka-topics.sh --bootstrap-server localhost:9092 --create --topic {topic} \
             --partitions {partitions} --replication-factor {replication_factor}"
        );
        self.shell
            .exec_in_pod(&self.kafka_namespace, &self.kafka_broker_pod, &command)
            .await?;
        Ok(())
    }

    /// Truncates every affected table in turn via a clustered `TRUNCATE`.
    /// Sequential is acceptable per the design — tables are not the
    /// parallelism-sensitive part of a reset.
    pub async fn truncate_all(&self) -> Result<TruncateReport> {
        let (_topics, tables) = self.affected_sets()?;
        let mut results = Vec::with_capacity(tables.len());
        let mut tables: Vec<_> = tables.into_iter().collect();
        tables.sort();

        for table in tables {
            let command = format!(
                "clickhouse-client --query \"TRUNCATE TABLE {}.{} ON CLUSTER {}\"",
                self.analytics_database, table, self.analytics_cluster_name
            );
            let outcome = self
                .shell
                .exec_in_pod(&self.analytics_db_namespace, &self.analytics_db_pod, &command)
                .await;
            results.push(match outcome {
                Ok(_) => TableTruncateResult {
                    table,
                    ok: true,
                    error: None,
                },
                Err(e) => TableTruncateResult {
                    table,
                    ok: false,
                    error: Some(e.to_string()),
                },
            });
        }

        Ok(TruncateReport { tables: results })
    }
}

/// Strips case and whitespace/underscore distinctions so a switchboard key
/// like `Linux Monitor` matches a catalog key like `LinuxMonitor`.
fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

fn parse_describe_output(stdout: &str) -> (u32, u32) {
    let partition_re = Regex::new(r"PartitionCount:\s*(\d+)").expect("static pattern is valid");
    let replication_re = Regex::new(r"ReplicationFactor:\s*(\d+)").expect("static pattern is valid");

    let partitions = stdout
        .lines()
        .filter(|line| !line.contains("Jolokia"))
        .find_map(|line| partition_re.captures(line))
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(DEFAULT_PARTITIONS);

    let replication_factor = stdout
        .lines()
        .filter(|line| !line.contains("Jolokia"))
        .find_map(|line| replication_re.captures(line))
        .and_then(|caps| caps[1].parse().ok())
        .unwrap_or(DEFAULT_REPLICATION_FACTOR);

    (partitions, replication_factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_key_matches_across_casing_and_spacing() {
        assert_eq!(normalize_key("Linux Monitor"), normalize_key("LinuxMonitor"));
        assert_eq!(normalize_key("linux_monitor"), normalize_key("LinuxMonitor"));
    }

    #[test]
    fn parse_describe_output_ignores_jolokia_noise() {
        let stdout = "Could not start Jolokia agent: PartitionCount:999\n\
                      Topic: demo\tPartitionCount: 6\tReplicationFactor: 3\tConfigs:\n";
        assert_eq!(parse_describe_output(stdout), (6, 3));
    }

    #[test]
    fn parse_describe_output_defaults_when_absent() {
        assert_eq!(parse_describe_output("no useful output"), (1, 1));
    }
}
