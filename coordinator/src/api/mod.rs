mod handlers;
mod state;
mod ws;

pub use state::AppState;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::metrics_routes::setup_metrics_routes;

/// Builds the full request-reply surface over `state`. `/metrics` and
/// its latency middleware are layered on last so every route underneath is
/// measured, matching how every sibling service in this lineage wires it.
pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/api/dashboard", get(handlers::dashboard))
        .route("/api/simulation/start", post(handlers::simulation_start))
        .route("/api/simulation/stop", post(handlers::simulation_stop))
        .route("/api/health", get(handlers::health))
        .route(
            "/api/nodes",
            get(handlers::list_nodes).post(handlers::add_node),
        )
        .route(
            "/api/nodes/:name",
            get(handlers::get_node)
                .put(handlers::update_node)
                .delete(handlers::delete_node),
        )
        .route("/api/nodes/:name/enable", post(handlers::enable_node))
        .route("/api/nodes/:name/disable", post(handlers::disable_node))
        .route(
            "/api/cluster-settings",
            get(handlers::get_cluster_settings).put(handlers::put_cluster_settings),
        )
        .route("/api/binary/status", get(handlers::binary_status_all))
        .route("/api/binary/status/:node", get(handlers::binary_status_one))
        .route("/api/binary/start/:node", post(handlers::binary_start))
        .route("/api/binary/stop/:node", post(handlers::binary_stop))
        .route("/api/ssh/status", get(handlers::ssh_status))
        .route("/api/o11y/sources", get(handlers::o11y_sources))
        .route("/api/o11y/sources/:name", get(handlers::o11y_source_detail))
        .route(
            "/api/o11y/sources/:name/enable",
            post(handlers::o11y_source_enable),
        )
        .route(
            "/api/o11y/sources/:name/disable",
            post(handlers::o11y_source_disable),
        )
        .route("/api/o11y/eps/current", get(handlers::o11y_eps_current))
        .route(
            "/api/o11y/eps/distribute",
            post(handlers::o11y_eps_distribute),
        )
        .route("/api/o11y/max-eps", get(handlers::o11y_max_eps))
        .route("/api/cluster/metrics", get(handlers::cluster_metrics))
        .route("/api/metrics", get(handlers::metrics_range))
        .route("/api/kafka/topics", get(handlers::kafka_topics_status))
        .route("/api/kafka/topics/status", get(handlers::kafka_topics_status))
        .route(
            "/api/kafka/topics/recreate",
            post(handlers::kafka_topics_recreate),
        )
        .route(
            "/api/kafka/topics/describe/:topic",
            get(handlers::kafka_topic_describe),
        )
        .route(
            "/api/kafka/topics/delete/:topic",
            delete(handlers::kafka_topic_delete),
        )
        .route(
            "/api/kafka/topics/create/:topic",
            post(handlers::kafka_topic_create),
        )
        .route(
            "/api/clickhouse/truncate",
            post(handlers::clickhouse_truncate),
        )
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    setup_metrics_routes(router)
}
