//! taskbridge: claims workflow external tasks and publishes them as device
//! protocol commands, completing tasks from the correlated responses.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use taskbridge::auth::OpenIdProvider;
use taskbridge::broker::Broker;
#[cfg(not(feature = "nats"))]
use taskbridge::broker::InMemoryBroker;
#[cfg(feature = "nats")]
use taskbridge::broker::NatsBroker;
use taskbridge::codec::{Codec, JsonCodec};
use taskbridge::config::WorkerConfig;
use taskbridge::consumer::ResponseConsumer;
use taskbridge::correlate::Correlator;
use taskbridge::directory::RestDirectory;
use taskbridge::policy::{Completer, CompletionStrategy};
use taskbridge::queue::{RestTaskQueue, TaskQueue};
use taskbridge::worker::{ExecutorOptions, TaskExecutor};

/// Wait before reopening an abandoned response subscription.
const RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(2);

/// Bridges workflow external tasks to device protocol handlers.
#[derive(Parser)]
#[command(name = "taskbridge")]
#[command(about = "External-task worker bridging a workflow engine to device protocols")]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config =
        WorkerConfig::load(cli.config.as_deref()).context("loading configuration")?;

    // A fresh id per process; the queue scopes task locks to it.
    let worker_id = uuid::Uuid::new_v4().to_string();
    info!(
        %worker_id,
        topic = %config.queue.topic,
        qos = %config.worker.qos,
        completion = %config.worker.completion_strategy,
        "starting taskbridge"
    );

    let credentials = Arc::new(
        OpenIdProvider::new(
            &config.auth.endpoint,
            &config.auth.client_id,
            &config.auth.client_secret,
            config.auth.expiry_buffer(),
        )
        .context("building credential provider")?,
    );
    let directory = Arc::new(
        RestDirectory::new(
            &config.directory.base_url,
            &config.directory.permissions_url,
            config.directory.cache_ttl(),
            credentials,
        )
        .context("building directory client")?,
    );
    let queue: Arc<dyn TaskQueue> = Arc::new(
        RestTaskQueue::new(&config.queue.base_url).context("building queue client")?,
    );
    let broker = connect_broker(&config).await?;
    let codec: Arc<dyn Codec> = Arc::new(JsonCodec);

    let cancel = CancellationToken::new();
    spawn_signal_handlers(cancel.clone());

    // Responses only matter when completion waits for them.
    let consumer = if config.worker.completion_strategy == CompletionStrategy::Pessimistic {
        let completer = Completer::new(queue.clone(), config.worker.completion_grace());
        let correlator = Correlator::new(
            completer,
            codec.clone(),
            config.worker.qos,
            config.worker.lock_duration(),
        );
        let consumer = ResponseConsumer::new(
            broker.clone(),
            correlator,
            config.broker.response_topic.clone(),
            config.broker.group.clone(),
            RESUBSCRIBE_BACKOFF,
        );
        let cancel = cancel.clone();
        Some(tokio::spawn(async move { consumer.run(cancel).await }))
    } else {
        info!("optimistic completion, response consumer not started");
        None
    };

    let options = ExecutorOptions {
        worker_id,
        topic: config.queue.topic.clone(),
        max_tasks: config.worker.max_tasks,
        lock_duration: config.worker.lock_duration(),
        poll_interval: config.worker.poll_interval(),
        qos: config.worker.qos,
        completion: config.worker.completion_strategy,
        completion_grace: config.worker.completion_grace(),
    };
    let executor = TaskExecutor::new(options, queue, broker, directory, codec);
    executor.run(cancel.clone()).await;

    if let Some(handle) = consumer {
        if let Err(error) = handle.await {
            warn!(%error, "response consumer ended abnormally");
        }
    }
    info!("shutdown complete");
    Ok(())
}

#[cfg(feature = "nats")]
async fn connect_broker(config: &WorkerConfig) -> Result<Arc<dyn Broker>> {
    let broker = NatsBroker::connect(&config.broker.url)
        .await
        .context("connecting to broker")?;
    Ok(Arc::new(broker))
}

#[cfg(not(feature = "nats"))]
async fn connect_broker(config: &WorkerConfig) -> Result<Arc<dyn Broker>> {
    warn!(
        url = %config.broker.url,
        "built without the nats feature, commands stay in an in-process broker"
    );
    Ok(Arc::new(InMemoryBroker::new()))
}

fn spawn_signal_handlers(cancel: CancellationToken) {
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received ctrl-c, stopping intake");
            ctrl_c_cancel.cancel();
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                let sigterm_cancel = cancel.clone();
                tokio::spawn(async move {
                    if sigterm.recv().await.is_some() {
                        info!("received SIGTERM, stopping intake");
                        sigterm_cancel.cancel();
                    }
                });
            }
            Err(error) => warn!(%error, "cannot install SIGTERM handler"),
        }
    }
}
