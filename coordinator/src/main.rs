use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use envconfig::Envconfig;
use health::HealthRegistry;

use coordinator::api::{build_router, AppState};
use coordinator::binctl::BinaryController;
use coordinator::cli::Cli;
use coordinator::config::Config;
use coordinator::eps::EpsPlanner;
use coordinator::metrics::MetricsCollector;
use coordinator::registry::NodeRegistry;
use coordinator::reset::{ResetOrchestrator, TopicsTablesMap};
use coordinator::shell::RemoteShell;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::init_from_env().unwrap_or_else(|e| {
        eprintln!("invalid configuration: {e}");
        std::process::exit(1);
    });

    if let Some(command) = &cli.command {
        if !command.is_web() {
            run_cli(command, &config);
            return;
        }
    }

    run_server(config).await;
}

fn run_cli(command: &coordinator::cli::Command, config: &Config) {
    let registry = NodeRegistry::load(&config.registry_path).unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(1);
    });

    match command.run_against_registry(&registry) {
        Ok(summary) => {
            if !summary.is_empty() {
                println!("{summary}");
            }
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

/// Construction order: registry, then the shell, then everything that
/// borrows both, then the metrics collector, then the router that wires
/// references to all of it together.
async fn run_server(config: Config) {
    let registry = Arc::new(NodeRegistry::load(&config.registry_path).unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(1);
    }));
    let shell = RemoteShell::new();

    let binctl = Arc::new(BinaryController::new(registry.clone(), shell.clone()));
    let eps = Arc::new(EpsPlanner::new(
        &config.max_eps_path,
        &config.switchboard_path,
        &config.sources_dir,
    ));
    let topics_tables = TopicsTablesMap::load(&config.topics_tables_path).unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(1);
    });
    let reset = Arc::new(ResetOrchestrator::new(&config, shell.clone(), topics_tables));

    let metrics = Arc::new(MetricsCollector::new(&config, registry.clone()));

    let health_registry = Arc::new(HealthRegistry::new("coordinator"));
    let poll_deadline = Duration::from_secs(config.metrics_poll_interval_secs.max(1) * 3);
    let poll_handle = health_registry
        .register("metrics-poller".to_string(), poll_deadline)
        .await;
    let poll_interval = Duration::from_secs(config.metrics_poll_interval_secs.max(1));
    let _poll_task = metrics.clone().spawn_poll_loop(poll_interval, poll_handle);

    let bind = config.bind();
    let state = AppState {
        config: Arc::new(config),
        registry,
        shell,
        binctl,
        eps,
        metrics: metrics.clone(),
        reset,
        health: health_registry,
        started_at: Instant::now(),
    };

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .unwrap_or_else(|e| {
            eprintln!("failed to bind {bind}: {e}");
            std::process::exit(1);
        });
    tracing::info!(addr = %bind, "coordinator listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(metrics))
        .await
        .expect("server exited unexpectedly");
}

async fn shutdown_signal(metrics: Arc<MetricsCollector>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    metrics.set_simulation_running(false);
    tracing::info!("shutting down");
}
