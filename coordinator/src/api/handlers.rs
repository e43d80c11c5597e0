use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::binctl::BinaryKind;
use crate::error::{CoordinatorError, Envelope, Result};
use crate::registry::{ClusterSettings, NodeEntry};

use super::state::AppState;

fn parse_kind(params: &HashMap<String, String>) -> Result<BinaryKind> {
    match params.get("kind").map(String::as_str) {
        None | Some("generator") => Ok(BinaryKind::Generator),
        Some("metrics-agent") => Ok(BinaryKind::MetricsAgent),
        Some(other) => Err(CoordinatorError::Validation(format!(
            "unknown binary kind '{other}'"
        ))),
    }
}

pub async fn dashboard(State(state): State<AppState>) -> Json<Envelope<crate::metrics::Snapshot>> {
    Json(Envelope::ok_with(state.metrics.snapshot()))
}

pub async fn simulation_start(State(state): State<AppState>) -> Result<Json<Envelope<()>>> {
    if state.metrics.snapshot().cluster.simulation_running {
        return Err(CoordinatorError::Conflict(
            "simulation is already running".into(),
        ));
    }
    state.metrics.set_simulation_running(true);
    Ok(Json(Envelope::ok("simulation started")))
}

pub async fn simulation_stop(State(state): State<AppState>) -> Result<Json<Envelope<()>>> {
    if !state.metrics.snapshot().cluster.simulation_running {
        return Err(CoordinatorError::Conflict(
            "no simulation is running".into(),
        ));
    }
    state.metrics.set_simulation_running(false);
    Ok(Json(Envelope::ok("simulation stopped")))
}

#[derive(serde::Serialize)]
struct HealthBody {
    healthy: bool,
    uptime_secs: u64,
}

pub async fn health(State(state): State<AppState>) -> Json<Envelope<HealthBody>> {
    let status = state.health.get_status();
    Json(Envelope::ok_with(HealthBody {
        healthy: status.is_healthy(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    }))
}

pub async fn list_nodes(State(state): State<AppState>) -> Json<Envelope<Vec<NodeEntry>>> {
    Json(Envelope::ok_with(state.registry.list()))
}

pub async fn get_node(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Envelope<NodeEntry>>> {
    Ok(Json(Envelope::ok_with(state.registry.get(&name)?)))
}

pub async fn add_node(
    State(state): State<AppState>,
    Json(entry): Json<NodeEntry>,
) -> Result<impl IntoResponse> {
    let created = state.registry.add(entry)?;
    Ok((StatusCode::CREATED, Json(Envelope::ok_with(created))))
}

pub async fn update_node(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(entry): Json<NodeEntry>,
) -> Result<Json<Envelope<NodeEntry>>> {
    let updated = state.registry.replace(&name, entry)?;
    Ok(Json(Envelope::ok_with(updated)))
}

pub async fn delete_node(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Envelope<()>>> {
    state.registry.remove(&name)?;
    Ok(Json(Envelope::ok(format!("node '{name}' removed"))))
}

pub async fn enable_node(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Envelope<NodeEntry>>> {
    Ok(Json(Envelope::ok_with(state.registry.enable(&name)?)))
}

pub async fn disable_node(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Envelope<NodeEntry>>> {
    Ok(Json(Envelope::ok_with(state.registry.disable(&name)?)))
}

pub async fn get_cluster_settings(State(state): State<AppState>) -> Json<Envelope<ClusterSettings>> {
    Json(Envelope::ok_with(state.registry.get_settings()))
}

pub async fn put_cluster_settings(
    State(state): State<AppState>,
    Json(settings): Json<ClusterSettings>,
) -> Result<Json<Envelope<ClusterSettings>>> {
    Ok(Json(Envelope::ok_with(
        state.registry.update_settings(settings)?,
    )))
}

pub async fn binary_status_all(
    State(state): State<AppState>,
) -> Json<Envelope<Vec<crate::binctl::NodeStatus>>> {
    Json(Envelope::ok_with(state.binctl.status_all().await))
}

pub async fn binary_status_one(
    State(state): State<AppState>,
    Path(node): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Envelope<crate::binctl::ProcessStatus>>> {
    let kind = parse_kind(&params)?;
    Ok(Json(Envelope::ok_with(state.binctl.status(&node, kind).await?)))
}

pub async fn binary_start(
    State(state): State<AppState>,
    Path(node): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse> {
    let kind = parse_kind(&params)?;
    let timeout_minutes: u64 = params
        .get("timeout")
        .and_then(|v| v.parse().ok())
        .unwrap_or(state.config.generator_timeout_minutes);

    let response = state.binctl.start(&node, kind, timeout_minutes).await?;
    let status_code = if response.warning.is_some() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status_code, Json(Envelope::ok_with(response))))
}

pub async fn binary_stop(
    State(state): State<AppState>,
    Path(node): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse> {
    let kind = parse_kind(&params)?;
    let response = state.binctl.stop(&node, kind).await?;
    let status_code = if response.warning.is_some() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status_code, Json(Envelope::ok_with(response))))
}

#[derive(serde::Serialize)]
struct SshProbe {
    node: String,
    reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub async fn ssh_status(State(state): State<AppState>) -> Json<Envelope<Vec<SshProbe>>> {
    let settings = state.registry.get_settings();
    let mut probes = Vec::new();
    for node in state.registry.list_enabled() {
        let outcome = state.shell.run(&node, &settings, "true").await;
        probes.push(SshProbe {
            node: node.name,
            reachable: outcome.is_ok(),
            error: outcome.err().map(|e| e.to_string()),
        });
    }
    Json(Envelope::ok_with(probes))
}

pub async fn o11y_sources(State(state): State<AppState>) -> Result<Json<Envelope<Vec<crate::eps::SourceDetail>>>> {
    let catalog = state.eps.catalog()?;
    let mut details = Vec::new();
    for name in catalog.source_names() {
        details.push(state.eps.source_details(&name)?);
    }
    Ok(Json(Envelope::ok_with(details)))
}

pub async fn o11y_source_detail(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Envelope<crate::eps::SourceDetail>>> {
    Ok(Json(Envelope::ok_with(state.eps.source_details(&name)?)))
}

pub async fn o11y_eps_current(State(state): State<AppState>) -> Result<Json<Envelope<crate::eps::EpsPlanResult>>> {
    Ok(Json(Envelope::ok_with(state.eps.current_eps()?)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributeRequest {
    selected_sources: Vec<String>,
    total_eps: u64,
}

pub async fn o11y_eps_distribute(
    State(state): State<AppState>,
    Json(body): Json<DistributeRequest>,
) -> Result<Json<Envelope<crate::eps::EpsPlanResult>>> {
    let result = state.eps.apply(&body.selected_sources, body.total_eps)?;
    state.metrics.record_eps_plan(&result);
    Ok(Json(Envelope::ok_with(result)))
}

pub async fn o11y_source_enable(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Envelope<()>>> {
    state.eps.enable(&name)?;
    Ok(Json(Envelope::ok(format!("source '{name}' enabled"))))
}

pub async fn o11y_source_disable(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Envelope<()>>> {
    state.eps.disable(&name)?;
    Ok(Json(Envelope::ok(format!("source '{name}' disabled"))))
}

pub async fn o11y_max_eps(
    State(state): State<AppState>,
) -> Result<Json<Envelope<HashMap<String, u64>>>> {
    Ok(Json(Envelope::ok_with(state.eps.catalog()?.entries().clone())))
}

pub async fn cluster_metrics(
    State(state): State<AppState>,
) -> Result<Json<Envelope<crate::metrics::AnalyticsSnapshot>>> {
    Ok(Json(Envelope::ok_with(state.metrics.analytics_snapshot().await?)))
}

#[derive(Deserialize)]
pub struct MetricsRangeQuery {
    start: Option<chrono::DateTime<chrono::Utc>>,
    end: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(serde::Serialize)]
struct RangedAnalytics {
    from: chrono::DateTime<chrono::Utc>,
    to: chrono::DateTime<chrono::Utc>,
    #[serde(flatten)]
    analytics: crate::metrics::AnalyticsSnapshot,
}

pub async fn metrics_range(
    State(state): State<AppState>,
    Query(query): Query<MetricsRangeQuery>,
) -> Result<Json<Envelope<RangedAnalytics>>> {
    let (from, to) = crate::metrics::MetricsCollector::effective_range(query.start, query.end);
    let analytics = state.metrics.analytics_snapshot().await?;
    Ok(Json(Envelope::ok_with(RangedAnalytics { from, to, analytics })))
}

pub async fn kafka_topics_status(
    State(state): State<AppState>,
) -> Result<Json<Envelope<HashMap<String, Vec<String>>>>> {
    let (topics, tables) = state.reset.status().await?;
    state
        .metrics
        .record_reset_targets(topics.len() as u32, tables.len() as u32);
    let mut body = HashMap::new();
    body.insert("topics".to_string(), topics);
    body.insert("tables".to_string(), tables);
    Ok(Json(Envelope::ok_with(body)))
}

pub async fn kafka_topics_recreate(
    State(state): State<AppState>,
) -> Result<Json<Envelope<crate::reset::RecreateReport>>> {
    let report = state.reset.recreate_all().await?;
    let (_, tables) = state.reset.status().await?;
    state
        .metrics
        .record_reset_targets(report.topics.len() as u32, tables.len() as u32);
    Ok(Json(Envelope::ok_with(report)))
}

pub async fn kafka_topic_describe(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> Result<Json<Envelope<crate::reset::TopicRecreateResult>>> {
    let (partitions, replication_factor) = state.reset.describe(&topic).await?;
    Ok(Json(Envelope::ok_with(crate::reset::TopicRecreateResult {
        topic,
        partitions,
        replication_factor,
        ok: true,
        error: None,
    })))
}

pub async fn kafka_topic_delete(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> Result<Json<Envelope<()>>> {
    state.reset.delete(&topic).await?;
    Ok(Json(Envelope::ok(format!("topic '{topic}' deleted"))))
}

#[derive(Deserialize, Default)]
pub struct CreateTopicRequest {
    partitions: Option<u32>,
    replication_factor: Option<u32>,
}

pub async fn kafka_topic_create(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    Json(body): Json<CreateTopicRequest>,
) -> Result<Json<Envelope<()>>> {
    state
        .reset
        .create(&topic, body.partitions.unwrap_or(1), body.replication_factor.unwrap_or(1))
        .await?;
    Ok(Json(Envelope::ok(format!("topic '{topic}' created"))))
}

pub async fn clickhouse_truncate(
    State(state): State<AppState>,
) -> Result<Json<Envelope<crate::reset::TruncateReport>>> {
    let report = state.reset.truncate_all().await?;
    let (topics, _) = state.reset.status().await?;
    state
        .metrics
        .record_reset_targets(topics.len() as u32, report.tables.len() as u32);
    Ok(Json(Envelope::ok_with(report)))
}
