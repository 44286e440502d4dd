use axum::{
    Router,
    extract::Extension,
    routing::{get, post},
};
use shard_coordinator::archive::{FsArchive, LocalArchive};
use shard_coordinator::config::CoordinatorConfig;
use shard_coordinator::distribution::distributor::ShardDistributor;
use shard_coordinator::distribution::handlers::*;
use shard_coordinator::distribution::protocol::*;
use shard_coordinator::persistence::{CoordinatorStore, JsonFileStore};
use shard_coordinator::search::handlers::{
    handle_list, handle_status, handle_submit, handle_task_result,
};
use shard_coordinator::search::orchestrator::SearchOrchestrator;
use shard_coordinator::search::protocol::{ENDPOINT_SEARCH, ENDPOINT_SEARCH_STATUS};
use shard_coordinator::workers::client::HttpConnector;
use shard_coordinator::workers::handlers::{handle_add_server, handle_list_workers};
use shard_coordinator::workers::protocol::{
    ENDPOINT_ADD_SERVER, ENDPOINT_PING, ENDPOINT_TASK_RESULT, ENDPOINT_WORKERS,
};
use shard_coordinator::workers::registry::WorkerRegistry;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = CoordinatorConfig::from_env()?;
    let args: Vec<String> = std::env::args().collect();
    config.apply_args(&args)?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .init();

    tracing::info!("Starting coordinator on {}", config.bind_addr);
    tracing::info!("Photo archive: {}", config.photos_directory.display());

    // 1. Storage and local archive:
    let store: Arc<dyn CoordinatorStore> = Arc::new(JsonFileStore::new(
        config.assignments_file.clone(),
        config.workers_file.clone(),
    ));
    let archive: Arc<dyn LocalArchive> = Arc::new(FsArchive::open(&config.photos_directory).await?);

    // 2. Worker registry:
    let connector = Arc::new(HttpConnector::new(config.client_settings()));
    let registry = WorkerRegistry::new(connector, store.clone());
    registry.reload().await?;

    // 3. Shard distributor:
    let distributor = ShardDistributor::new(
        registry.clone(),
        archive,
        store,
        config.settle_delay,
    );

    if config.load_assignments {
        distributor.load_assignments().await?;
    }
    if config.load_directories {
        distributor.load_local_directories().await?;
        distributor.verify_assignment_consistency().await;
    }
    if config.check_distribution {
        match distributor.verify_network_integrity(true, false).await {
            Ok(report) if !report.is_clean() => {
                tracing::warn!(
                    "Startup integrity check found {} bad director(ies), {} unchecked",
                    report.bad_dir_count(),
                    report.unchecked.len()
                );
            }
            Ok(_) => {}
            Err(e) => tracing::error!("Startup integrity check failed: {}", e),
        }
    }

    // 4. Background loops:
    registry.clone().start_health_loop(config.health_interval);

    let orchestrator = SearchOrchestrator::new(
        registry.clone(),
        distributor.clone(),
        config.orchestrator_settings(),
    );
    orchestrator.clone().start();

    // 5. Spawn stats reporter:
    let stats_registry = registry.clone();
    let stats_distributor = distributor.clone();
    let stats_orchestrator = orchestrator.clone();
    let stats_interval = config.stats_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(stats_interval);

        loop {
            interval.tick().await;
            let shards = stats_distributor.stats().await;
            tracing::info!(
                "Cluster stats: {} workers ({} reachable), {} shards assigned, {} unassigned, {} active / {} completed searches",
                stats_registry.len(),
                stats_registry.reachable_count(),
                shards.assigned,
                shards.unassigned,
                stats_orchestrator.active_count(),
                stats_orchestrator.completed_count()
            );
            for node in stats_registry.list() {
                tracing::debug!(
                    "  - {} {} cpus={} queue={} latency={}",
                    node.id,
                    node.endpoint(),
                    node.cpu_count,
                    node.queue_depth,
                    node.last_latency_ms()
                        .map(|ms| format!("{}ms", ms))
                        .unwrap_or_else(|| "-".to_string())
                );
            }
        }
    });

    // 6. HTTP Router:
    let app = Router::new()
        .route(ENDPOINT_PING, get(|| async { "ok" }))
        .route(ENDPOINT_ADD_SERVER, get(handle_add_server))
        .route(ENDPOINT_WORKERS, get(handle_list_workers))
        .route(ENDPOINT_TASK_RESULT, get(handle_task_result))
        .route(ENDPOINT_SEARCH, post(handle_submit).get(handle_list))
        .route(ENDPOINT_SEARCH_STATUS, get(handle_status))
        .route(ENDPOINT_DISTRIBUTION_STATS, get(handle_stats))
        .route(ENDPOINT_DISTRIBUTION_RUN, post(handle_run))
        .route(ENDPOINT_DISTRIBUTION_VERIFY, post(handle_verify))
        .route(ENDPOINT_DISTRIBUTION_REDISTRIBUTE, post(handle_redistribute))
        .layer(Extension(registry))
        .layer(Extension(distributor))
        .layer(Extension(orchestrator));

    // 7. Start HTTP server:
    tracing::info!("HTTP server listening on {}", config.bind_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
