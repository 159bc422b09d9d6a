//! Sync engine: drives each collection through catch-up and steady-state.
//!
//! A collection is NEW until its first catch-up pass, CATCHING_UP while
//! backfill pages still return full, and STEADY once `caught_up_txn` flips.
//! All effects of one pass land in a single [`CollectionBatch`]; a
//! collection that errors mid-pass is skipped for the run and its watermark
//! stays put, so the next run replays the same window.

use std::sync::Arc;

use chrono::Utc;

use crate::classifier::classify;
use crate::config::{
    CATCH_UP_DONE_THRESHOLD, CATCH_UP_MAX_PAGES, CATCH_UP_PAGE_SIZE, COLLECTIONS_PER_PAGE,
    DEFAULT_START_VERSION, STEADY_PAGES_PER_RUN, STEADY_PAGE_SIZE,
};
use crate::enrich::fetch_nft_image;
use crate::error::SyncError;
use crate::events::TokenEvent;
use crate::indexer::EventSource;
use crate::price::resolve_price;
use crate::store::{ActivityRecord, CatalogStore, CollectionBatch, CollectionRecord, ListingRecord};

pub struct SyncEngine {
    source: Arc<dyn EventSource>,
    store: Arc<dyn CatalogStore>,
    http: reqwest::Client,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn EventSource>,
        store: Arc<dyn CatalogStore>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            source,
            store,
            http,
        }
    }

    /// One steady-state run: walks catalog pages newest-collection-first
    /// from `cursor` and syncs each caught-up collection. Returns the cursor
    /// the next run should start from; `None` wraps back to the top.
    pub async fn run_steady(&self, cursor: Option<i64>) -> Result<Option<i64>, SyncError> {
        let mut cursor = cursor;
        for _ in 0..STEADY_PAGES_PER_RUN {
            let page = self.store.steady_page(cursor, COLLECTIONS_PER_PAGE).await?;
            if page.is_empty() {
                return Ok(None);
            }

            for collection in &page {
                if !collection.caught_up_txn {
                    // Backfill owns this collection until it catches up.
                    continue;
                }
                if let Err(err) = self.process_collection(collection, false).await {
                    if matches!(err, SyncError::Commit(_)) {
                        // A failed commit means the store itself is unhealthy;
                        // surface it instead of advancing the cursor past
                        // unpersisted work.
                        return Err(err);
                    }
                    log::error!(
                        "Steady sync failed for {} ({}): {}",
                        collection.name,
                        collection.verified_creator_address,
                        err
                    );
                }
            }

            cursor = next_cursor(&page, COLLECTIONS_PER_PAGE);
            if cursor.is_none() {
                break;
            }
        }
        Ok(cursor)
    }

    /// One catch-up run: backfills the oldest collection still behind.
    /// Returns false when every collection is caught up.
    pub async fn run_catch_up(&self) -> Result<bool, SyncError> {
        let Some(collection) = self.store.next_catch_up_collection().await? else {
            log::debug!("No collections awaiting catch-up");
            return Ok(false);
        };
        log::info!(
            "Catching up {} from version {:?}",
            collection.name,
            collection.last_transaction_version
        );
        self.process_collection(&collection, true).await?;
        Ok(true)
    }

    /// One full pass over a collection: fetch, classify, resolve prices,
    /// commit. Catch-up reads bigger, deeper pages than steady-state.
    async fn process_collection(
        &self,
        collection: &CollectionRecord,
        catch_up: bool,
    ) -> Result<(), SyncError> {
        let (page_size, max_pages) = if catch_up {
            (CATCH_UP_PAGE_SIZE, CATCH_UP_MAX_PAGES)
        } else {
            (STEADY_PAGE_SIZE, 1)
        };

        let mut after_version = collection
            .last_transaction_version
            .unwrap_or(DEFAULT_START_VERSION);
        let mut events: Vec<TokenEvent> = Vec::new();

        for _ in 0..max_pages {
            let page = self
                .source
                .fetch_token_events(
                    &collection.verified_creator_address,
                    after_version,
                    page_size,
                )
                .await?;
            let fetched = page.len();
            if let Some(max) = page.iter().map(|e| e.transaction_version).max() {
                after_version = max;
            }
            events.extend(page);
            if fetched < page_size {
                break;
            }
        }

        let mark_caught_up = catch_up && events.len() < CATCH_UP_DONE_THRESHOLD;
        let new_watermark = events.iter().map(|e| e.transaction_version).max();
        log::debug!(
            "{}: {} events after v{:?} ({})",
            collection.name,
            events.len(),
            collection.last_transaction_version,
            if catch_up { "catch-up" } else { "steady" }
        );

        let classified = classify(&events);
        let mut batch = CollectionBatch {
            collection_id: collection.id,
            new_watermark,
            mark_caught_up,
            touched_at: Utc::now().timestamp(),
            ..Default::default()
        };

        for event in &classified.listing_candidates {
            let resolved = resolve_price(
                self.source.as_ref(),
                event.transaction_version,
                &event.name,
            )
            .await;
            if resolved.kind().is_sale() {
                // The withdraw was the seller's side of a fill, not a listing.
                continue;
            }
            let Some(price) = resolved.price else {
                log::debug!(
                    "Skipping unpriced withdraw for {} at v{}",
                    event.name,
                    event.transaction_version
                );
                continue;
            };

            let image_url = match self.store.get_listing(&event.token_data_id_hash).await? {
                Some(existing) if existing.image_url.is_some() => existing.image_url,
                _ => {
                    fetch_nft_image(self.source.as_ref(), &self.http, &event.token_data_id_hash)
                        .await
                }
            };

            batch.upsert_listings.push(ListingRecord {
                token_data_id_hash: event.token_data_id_hash.clone(),
                collection_id: collection.id,
                collection_name: collection.name.clone(),
                slug: collection.slug.clone(),
                verified_creator_address: collection.verified_creator_address.clone(),
                token_name: event.name.clone(),
                seller_address: event.from_address.clone(),
                price,
                marketplace: resolved.marketplace,
                event_type: resolved.event_type,
                image_url,
                transaction_version: event.transaction_version,
                listed_at: event.timestamp,
            });
        }

        for event in &classified.sale_candidates {
            let resolved = resolve_price(
                self.source.as_ref(),
                event.transaction_version,
                &event.name,
            )
            .await;
            if resolved.price.is_none() {
                // Plain transfer; no marketplace was involved at this version.
                continue;
            }
            batch
                .delete_listings
                .push(event.token_data_id_hash.clone());

            if !resolved.kind().is_sale() {
                continue;
            }
            if self
                .store
                .activity_exists(event.transaction_version, &event.token_data_id_hash)
                .await?
            {
                continue;
            }

            let image_url =
                fetch_nft_image(self.source.as_ref(), &self.http, &event.token_data_id_hash)
                    .await;
            batch.insert_activities.push(ActivityRecord {
                collection_id: collection.id,
                collection_name: collection.name.clone(),
                slug: collection.slug.clone(),
                verified_creator_address: collection.verified_creator_address.clone(),
                token_data_id_hash: event.token_data_id_hash.clone(),
                token_name: event.name.clone(),
                transaction_version: event.transaction_version,
                event_type: resolved.event_type,
                price: resolved.price.unwrap_or(0.0),
                marketplace: resolved.marketplace,
                from_address: event.from_address.clone(),
                to_address: event.to_address.clone(),
                image_url,
                timestamp: event.timestamp,
            });
        }

        log::info!(
            "{}: {} listings, {} sales, {} removals, watermark {:?}{}",
            collection.name,
            batch.upsert_listings.len(),
            batch.insert_activities.len(),
            batch.delete_listings.len(),
            batch.new_watermark,
            if mark_caught_up { ", caught up" } else { "" }
        );
        self.store.commit_collection_batch(batch).await
    }
}

/// Cursor for the next steady run: last id of a full page, or `None` when
/// the page came back short (end of catalog, wrap around).
fn next_cursor(page: &[CollectionRecord], limit: usize) -> Option<i64> {
    if page.len() < limit {
        return None;
    }
    page.last().map(|c| c.id)
}
