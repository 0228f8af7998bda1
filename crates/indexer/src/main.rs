//! ClauseForge Indexer
//!
//! Processes corpus maintenance jobs from the SQS queue:
//! 1. Ingest: term frequencies, avgdl delta, dense and sparse vectors
//! 2. Delete: vector removal, chunk archival, avgdl delta
//! 3. Reindex: sparse re-encoding when avgdl has drifted
//!
//! `indexer reindex <org_id>` runs one forced reindex and exits.

use anyhow::Context;
use clauseforge_common::{
    config::AppConfig,
    db::{DbPool, Repository, TermFrequencyStore},
    embeddings::create_embedder,
    metrics::register_metrics,
    queue::{Queue, QueueConfig},
    VERSION,
};
use clauseforge_indexer::{MaintenanceJob, MaintenanceProcessor, ProcessorConfig, ReindexJob};
use clauseforge_search::bm25::{Bm25Encoder, Bm25Params};
use clauseforge_search::corpus::{corpus_stats_from_config, CorpusStatisticsStore};
use clauseforge_search::index::{IndexRegistry, PineconeIndex};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const MAX_FAILURES: u32 = 5;
const CIRCUIT_BREAK_DURATION: Duration = Duration::from_secs(30);
const RECEIVE_ERROR_PAUSE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.observability.log_level))
        .with_target(true);
    if config.observability.json_logging {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(service = %config.observability.service_name, "Starting ClauseForge Indexer v{}", VERSION);

    if config.observability.metrics_port != 0 {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], config.observability.metrics_port))
            .install()
            .context("Failed to install Prometheus exporter")?;
        register_metrics();
        info!(port = config.observability.metrics_port, "Metrics exporter listening");
    }

    let processor = build_processor(&config).await?;

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && args[1] == "reindex" {
        let org_id = args
            .get(2)
            .context("usage: indexer reindex <org_id>")?
            .clone();
        let job = ReindexJob {
            org_id,
            force: true,
            dense_index: args.get(3).cloned(),
        };
        return match processor.reindex(&job).await {
            Ok(Some(report)) => {
                println!("{}", serde_json::to_string_pretty(&report)?);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                error!(org_id = %job.org_id, error = %e, "Reindex failed");
                Err(e.into())
            }
        };
    }

    let Some(queue_config) = QueueConfig::from_app(&config.queue) else {
        warn!("queue.maintenance_queue_url not set, waiting for shutdown signal...");
        tokio::signal::ctrl_c().await?;
        info!("Indexer shutting down");
        return Ok(());
    };

    info!(url = %queue_config.url, "Connecting to maintenance queue...");
    let queue = Queue::new(queue_config).await?;

    info!("Indexer ready, starting queue polling...");
    let mut consecutive_failures = 0;

    loop {
        if consecutive_failures >= MAX_FAILURES {
            warn!(failures = consecutive_failures, "Circuit breaker open, pausing...");
            tokio::time::sleep(CIRCUIT_BREAK_DURATION).await;
            consecutive_failures = 0;
            info!("Circuit breaker reset, resuming...");
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            result = queue.receive::<MaintenanceJob>() => {
                match result {
                    Ok(messages) => {
                        for (job, receipt_handle) in messages {
                            let org_id = job.org_id().to_string();
                            let kind = job.kind();
                            info!(org_id = %org_id, job = kind, "Received {}", job.describe());

                            match processor.process(job).await {
                                Ok(follow_up) => {
                                    consecutive_failures = 0;
                                    if let Err(e) = queue.delete(&receipt_handle).await {
                                        error!(error = %e, "Failed to delete message");
                                    }
                                    if let Some(next) = follow_up {
                                        if let Err(e) = queue.send(&next).await {
                                            warn!(org_id = %org_id, error = %e, "Failed to enqueue reindex job");
                                        }
                                    }
                                }
                                Err(e) if e.is_permanent() => {
                                    error!(
                                        org_id = %org_id,
                                        job = kind,
                                        error = %e,
                                        "Dropping job that cannot succeed on retry"
                                    );
                                    if let Err(e) = queue.delete(&receipt_handle).await {
                                        error!(error = %e, "Failed to delete message");
                                    }
                                }
                                Err(e) => {
                                    consecutive_failures += 1;
                                    error!(
                                        org_id = %org_id,
                                        job = kind,
                                        error = %e,
                                        failures = consecutive_failures,
                                        "Failed to process maintenance job"
                                    );
                                    // Redelivered after the visibility timeout, or moved to the DLQ
                                }
                            }
                        }
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        error!(error = %e, "Failed to receive messages from queue");
                        tokio::time::sleep(RECEIVE_ERROR_PAUSE).await;
                    }
                }
            }
        }
    }

    info!("Indexer shutting down");
    Ok(())
}

async fn build_processor(config: &AppConfig) -> anyhow::Result<MaintenanceProcessor> {
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    db.ping().await?;
    let store: Arc<dyn TermFrequencyStore> = Arc::new(Repository::new(db));

    let embedder = create_embedder(&config.embedding)?;
    info!(
        model = %embedder.model_name(),
        dimension = embedder.dimension(),
        "Embedder initialized"
    );

    let params = Bm25Params::from_config(&config.bm25)?;
    let stats = corpus_stats_from_config(&config.corpus_stats, store.clone())?;
    info!(provider = stats.name(), "Corpus statistics provider initialized");

    let corpus = CorpusStatisticsStore::new(store, stats, Bm25Encoder::new(params))
        .with_config(&config.corpus_stats, None);
    let index = PineconeIndex::new(&config.vector_index)?;

    Ok(MaintenanceProcessor::new(
        Arc::new(corpus),
        Arc::new(index),
        IndexRegistry::from_config(&config.vector_index),
        embedder,
        ProcessorConfig::from_app(config),
    ))
}
