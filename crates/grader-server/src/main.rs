//! Process entrypoint: wires the Job Store, Event Bus, Watcher, Completion
//! Consumer, Result Uploader, and the HTTP surface (Container Callback
//! Endpoint + submission intake) into one orchestrator, and runs the
//! graceful shutdown sequence from spec §5.

mod auth;
mod config;
mod routes;
mod state;

use std::sync::Arc;
use std::time::Duration;

use grader_core::{JobStore, PgJobStore};
use grader_dispatcher::ClusterDispatcher;
use grader_eventbus::{EventPublisher, InMemoryEventBus, LapinEventBus};
use grader_uploader::{HttpResultSink, UploaderConfig};
use grader_workspace::SubmissionWorkspaces;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;

use crate::config::Config;
use crate::state::{AppState, ExerciseCatalog};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config_path = std::env::var("GRADER_CONFIG").ok().map(std::path::PathBuf::from);
    let config = Arc::new(Config::load(config_path.as_deref())?);

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database.url)
        .await?;
    sqlx::query(PgJobStore::CREATE_TABLE_SQL).execute(&pool).await?;
    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool));

    let workspaces = SubmissionWorkspaces::new(&config.workspace.root);

    let kube_client = kube::Client::try_default().await?;
    let cluster_client = Arc::new(grader_dispatcher::KubeClusterClient::new(
        kube_client.clone(),
        &config.cluster.namespace,
    ));
    let cluster_config = grader_dispatcher::ClusterConfig {
        namespace: config.cluster.namespace.clone(),
        image_puller_base_url: config.cluster.image_puller_base_url.clone(),
        constant_environment_node_selector: config.cluster.constant_environment_node_selector.clone(),
        constant_environment_toleration_key: config.cluster.constant_environment_toleration_key.clone(),
        default_cpu_limit: config.cluster.default_cpu_limit.clone(),
        default_memory_limit: config.cluster.default_memory_limit.clone(),
        default_memory_request: config.cluster.default_memory_request.clone(),
        grader_name: config.cluster.grader_name.clone(),
    };
    let dispatcher = Arc::new(ClusterDispatcher::new(cluster_client, cluster_config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Event Bus: a broker-backed bus when configured, otherwise the
    // in-process fallback spec §4.E allows for single-node deployments.
    let (publisher, consumer_task): (Arc<dyn EventPublisher>, tokio::task::JoinHandle<()>) =
        if let Some(amqp_url) = &config.amqp.url {
            let bus = Arc::new(LapinEventBus::connect(amqp_url).await?);
            let consumer = bus.consumer().await?;
            let consumer_store = store.clone();
            let handle = tokio::spawn(async move {
                grader_consumer::run(consumer_store.as_ref(), &consumer).await;
            });
            (bus, handle)
        } else {
            let bus = Arc::new(InMemoryEventBus::new());
            let consumer_store = store.clone();
            let bus_for_consumer = bus.clone();
            let handle = tokio::spawn(async move {
                grader_consumer::run(consumer_store.as_ref(), bus_for_consumer.as_ref()).await;
            });
            (bus, handle)
        };

    let watcher = grader_watcher::PodWatcher::new(kube_client, config.cluster.namespace.clone());
    let watcher_shutdown = shutdown_rx.clone();
    let watcher_publisher = publisher.clone();
    let watcher_task = tokio::spawn(async move {
        watcher.run(watcher_publisher, watcher_shutdown).await;
    });

    let uploader_store = store.clone();
    let uploader_workspaces = workspaces.clone();
    let catalog = Arc::new(ExerciseCatalog::default());
    let uploader_catalog = catalog.clone();
    let uploader_cfg = UploaderConfig {
        retry_ceiling: config.upload.retry_ceiling,
    };
    let mut uploader_shutdown = shutdown_rx.clone();
    let uploader_task = tokio::spawn(async move {
        let sink = HttpResultSink::new(reqwest::Client::new());
        loop {
            tokio::select! {
                _ = uploader_shutdown.changed() => {
                    if *uploader_shutdown.borrow() {
                        return;
                    }
                }
                _ = tokio::time::sleep(Duration::from_secs(5)) => {
                    let catalog = uploader_catalog.clone();
                    let result = grader_uploader::run_once(
                        uploader_store.as_ref(),
                        &sink,
                        &uploader_workspaces,
                        &uploader_cfg,
                        move |job| catalog.feedback_template(&job.course_key, &job.exercise_key),
                    )
                    .await;
                    if let Err(e) = result {
                        tracing::error!(error = %e, "uploader poll failed");
                    }
                }
            }
        }
    });

    let state = AppState {
        store: store.clone(),
        publisher: publisher.clone(),
        workspaces,
        catalog,
        config: config.clone(),
        dispatcher,
    };
    let router = routes::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    tracing::info!(addr = %config.server.bind_addr, "grader-server listening");

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
    });

    server.await?;

    // Shutdown sequence (spec §5): stop the Watcher first so no new events
    // enter the bus, then give the Consumer a bounded window to drain what
    // is already queued before everything is cancelled together.
    tracing::info!("shutting down: stopping watcher");
    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(10), watcher_task).await;

    tracing::info!("shutting down: draining event bus");
    let _ = tokio::time::timeout(Duration::from_secs(10), consumer_task).await;

    tracing::info!("shutting down: stopping uploader");
    let _ = tokio::time::timeout(Duration::from_secs(10), uploader_task).await;

    Ok(())
}
