//! Long-running sync daemon: schedules every reconciliation job on its own
//! interval until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use dotenv::dotenv;
use log::{error, info};

use aptflow::config::Config;
use aptflow::indexer::IndexerClient;
use aptflow::jobs::{
    catch_up_collections, discover_new_collections, refresh_collection_stats, refresh_owners,
    sync_listings, JobContext, JobReport,
};
use aptflow::store::SqliteCatalogStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    let config = Arc::new(Config::from_env()?);
    info!(
        "Starting aptflow (db: {}, indexer: {})",
        config.db_path, config.indexer_url
    );

    let source = Arc::new(IndexerClient::new(
        config.indexer_url.clone(),
        config.http_timeout_secs,
        config.metadata_retry,
    )?);
    let store = Arc::new(SqliteCatalogStore::open(&config.db_path)?);
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()?;

    let ctx = Arc::new(JobContext {
        source,
        store,
        http,
        config: config.clone(),
    });

    let mut handles = Vec::new();
    handles.push(spawn_job(ctx.clone(), config.sync_interval_secs, |ctx| {
        Box::pin(async move { sync_listings(&ctx).await })
    }));
    handles.push(spawn_job(ctx.clone(), config.catch_up_interval_secs, |ctx| {
        Box::pin(async move { catch_up_collections(&ctx).await })
    }));
    handles.push(spawn_job(ctx.clone(), config.stats_interval_secs, |ctx| {
        Box::pin(async move { refresh_collection_stats(&ctx).await })
    }));
    handles.push(spawn_job(ctx.clone(), config.owners_interval_secs, |ctx| {
        Box::pin(async move { refresh_owners(&ctx).await })
    }));
    handles.push(spawn_job(
        ctx.clone(),
        config.discovery_interval_secs,
        |ctx| Box::pin(async move { discover_new_collections(&ctx).await }),
    ));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping jobs");
    for handle in handles {
        handle.abort();
    }
    Ok(())
}

type JobFuture = std::pin::Pin<Box<dyn std::future::Future<Output = JobReport> + Send>>;

fn spawn_job<F>(
    ctx: Arc<JobContext>,
    interval_secs: u64,
    run: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn(Arc<JobContext>) -> JobFuture + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            let report = run(ctx.clone()).await;
            if report.success {
                info!("Job {} completed", report.job);
            } else {
                error!(
                    "Job {} failed: {}",
                    report.job,
                    report.error.as_deref().unwrap_or("unknown")
                );
            }
        }
    })
}
