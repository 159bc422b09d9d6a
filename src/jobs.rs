//! Scheduled job entry points.
//!
//! Each job is one idempotent run: it loads whatever cursor state it needs,
//! does its work, persists the cursor, and reports. Errors are folded into
//! the report so the scheduler loop never dies; the next tick retries.

use std::sync::Arc;

use crate::config::Config;
use crate::discovery::discover_collections;
use crate::error::SyncError;
use crate::indexer::EventSource;
use crate::stats::{refresh_owner_counts, refresh_stats};
use crate::store::CatalogStore;
use crate::sync::SyncEngine;

/// Cursor key for the steady-state sync job.
const STEADY_CURSOR: &str = "steady_sync";

#[derive(Debug)]
pub struct JobReport {
    pub job: &'static str,
    pub success: bool,
    pub error: Option<String>,
}

impl JobReport {
    fn ok(job: &'static str) -> Self {
        Self {
            job,
            success: true,
            error: None,
        }
    }

    fn failed(job: &'static str, err: SyncError) -> Self {
        log::error!("Job {} failed: {}", job, err);
        Self {
            job,
            success: false,
            error: Some(err.to_string()),
        }
    }
}

/// Shared handles every job runs against.
pub struct JobContext {
    pub source: Arc<dyn EventSource>,
    pub store: Arc<dyn CatalogStore>,
    pub http: reqwest::Client,
    pub config: Arc<Config>,
}

impl JobContext {
    fn engine(&self) -> SyncEngine {
        SyncEngine::new(self.source.clone(), self.store.clone(), self.http.clone())
    }
}

/// Steady-state sync over the next window of caught-up collections. The
/// page cursor is persisted between runs so successive ticks walk the whole
/// catalog instead of hammering the same collections.
pub async fn sync_listings(ctx: &JobContext) -> JobReport {
    let run = async {
        let cursor = ctx.store.get_cursor(STEADY_CURSOR).await?;
        let next = ctx.engine().run_steady(cursor).await?;
        ctx.store.set_cursor(STEADY_CURSOR, next).await?;
        Ok::<_, SyncError>(())
    };
    match run.await {
        Ok(()) => JobReport::ok("sync_listings"),
        Err(err) => JobReport::failed("sync_listings", err),
    }
}

/// Backfills the oldest collection still behind, one per tick.
pub async fn catch_up_collections(ctx: &JobContext) -> JobReport {
    match ctx.engine().run_catch_up().await {
        Ok(_) => JobReport::ok("catch_up_collections"),
        Err(err) => JobReport::failed("catch_up_collections", err),
    }
}

/// Recomputes the stats block for every active collection.
pub async fn refresh_collection_stats(ctx: &JobContext) -> JobReport {
    match refresh_stats(ctx.store.clone(), &ctx.http, &ctx.config.rates_url).await {
        Ok(_) => JobReport::ok("refresh_collection_stats"),
        Err(err) => JobReport::failed("refresh_collection_stats", err),
    }
}

/// Refreshes distinct-owner counts from the indexer.
pub async fn refresh_owners(ctx: &JobContext) -> JobReport {
    match refresh_owner_counts(ctx.source.clone(), ctx.store.clone()).await {
        Ok(_) => JobReport::ok("refresh_owners"),
        Err(err) => JobReport::failed("refresh_owners", err),
    }
}

/// Admits the top-volume untracked collections.
pub async fn discover_new_collections(ctx: &JobContext) -> JobReport {
    match discover_collections(ctx.source.clone(), ctx.store.clone(), &ctx.http).await {
        Ok(_) => JobReport::ok("discover_new_collections"),
        Err(err) => JobReport::failed("discover_new_collections", err),
    }
}
