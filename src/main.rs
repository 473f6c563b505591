use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use patch_sync::config::Config;
use patch_sync::feed::{FeedApi, FeedClient};
use patch_sync::publish::{ChannelPublisher, EvalPublisher, spawn_drain};
use patch_sync::server::{AppState, build_router};
use patch_sync::store::{CheckpointStore, HostStore, MemoryStore, PgStore};
use patch_sync::sync::{AffectedHostResolver, ChangeDetector, RepoBasedPass, SyncScheduler};
use patch_sync::types::EvaluationRequest;
use patch_sync::upload::{UploadHandler, UploadPool};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "patch_sync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Invalid configuration");
            std::process::exit(2);
        }
    };

    if let Err(err) = run(config).await {
        error!(error = %err, "Service failed");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), BoxError> {
    let shutdown = CancellationToken::new();
    // Cancelled only after the pool and scheduler have stopped publishing.
    let drain_shutdown = CancellationToken::new();

    let (checkpoints, hosts) = open_store(&config).await?;
    let (publisher, drain) = open_publisher(&config, drain_shutdown.clone()).await?;

    let feed: Arc<dyn FeedApi> = Arc::new(FeedClient::new(&config.feed, shutdown.child_token())?);
    let pass = RepoBasedPass::new(
        feed.clone(),
        ChangeDetector::new(feed, &config.feed, config.sync.checkpoint_margin),
        AffectedHostResolver::new(hosts.clone()),
        checkpoints.clone(),
        publisher.clone(),
        config.sync.skip_unchanged_export,
    );
    let (scheduler, sync_trigger) =
        SyncScheduler::new(pass, config.sync.interval, shutdown.child_token());
    let scheduler = tokio::spawn(scheduler.run());

    let handler = Arc::new(UploadHandler::new(hosts, publisher));
    let uploads = Arc::new(UploadPool::start(
        handler,
        &config.upload,
        shutdown.child_token(),
    ));

    #[cfg(feature = "rabbitmq")]
    {
        if let Some(uri) = config.broker.amqp_uri.as_deref() {
            let queue = config.broker.upload_queue.clone();
            let channel = patch_sync::broker::amqp::open_channel(uri, &queue).await?;
            let prefetch = config.broker.prefetch;
            let pool = uploads.clone();
            let cancel = shutdown.child_token();
            tokio::spawn(async move {
                if let Err(err) =
                    patch_sync::broker::run_upload_consumer(channel, &queue, prefetch, pool, cancel)
                        .await
                {
                    error!(error = %err, "Upload consumer failed");
                }
            });
        }
    }

    let app = build_router(AppState::new(checkpoints, sync_trigger, uploads.clone()));

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received"),
                Err(err) => error!(error = %err, "Unable to listen for shutdown signal"),
            }
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    uploads.shutdown().await;
    if let Err(err) = scheduler.await {
        error!(error = %err, "Sync scheduler task panicked");
    }
    drain_shutdown.cancel();
    if let Some(drain) = drain {
        if let Err(err) = drain.await {
            error!(error = %err, "Evaluation drain task panicked");
        }
    }
    info!("Shutdown complete");
    Ok(())
}

async fn open_store(
    config: &Config,
) -> Result<(Arc<dyn CheckpointStore>, Arc<dyn HostStore>), BoxError> {
    match config.database_url.as_deref() {
        Some(url) => {
            let store = PgStore::connect(url).await?;
            store.migrate().await?;
            info!("Using Postgres store");
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
        None => {
            let store = MemoryStore::new();
            info!("No database configured, using in-memory store");
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
    }
}

/// Returns the evaluation publisher and, without a broker, the task that
/// drains the in-process channel.
async fn open_publisher(
    config: &Config,
    shutdown: CancellationToken,
) -> Result<(Arc<dyn EvalPublisher>, Option<JoinHandle<()>>), BoxError> {
    #[cfg(feature = "rabbitmq")]
    {
        if let Some(uri) = config.broker.amqp_uri.as_deref() {
            let publisher =
                patch_sync::broker::AmqpPublisher::connect(uri, config.broker.eval_queue.clone())
                    .await?;
            info!(queue = %config.broker.eval_queue, "Publishing evaluation requests over AMQP");
            return Ok((Arc::new(publisher), None));
        }
    }

    let (publisher, requests) = ChannelPublisher::new(config.eval_channel_capacity);
    let drain = spawn_drain(requests, shutdown, |request| log_request(&request));
    Ok((Arc::new(publisher), Some(drain)))
}

fn log_request(request: &EvaluationRequest) {
    info!(
        inventory_id = %request.inventory_id,
        account_id = %request.account_id,
        org_id = %request.org_id,
        "Evaluation requested"
    );
}
