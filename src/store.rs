//! SQLite-backed catalog store.
//!
//! Single-writer persistence for collections, listings, activities and job
//! cursors. Every per-collection sync result lands through
//! [`CatalogStore::commit_collection_batch`] inside one transaction, so a
//! crash mid-run never leaves listings and the watermark disagreeing.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::config::CHAIN;
use crate::error::SyncError;

/// Wholesale per-collection stats, replaced as a unit on each refresh.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionStats {
    /// `None` until at least one active listing exists.
    pub floor_price: Option<f64>,
    pub usd_floor_price: f64,
    pub one_day_volume: f64,
    pub one_day_sales: u64,
    pub one_day_average_price: f64,
    pub average_price: f64,
    pub listed_count: u64,
    pub market_cap: f64,
    pub total_supply: u64,
    pub num_owners: u64,
}

/// Denominated projection of the headline stats.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EthStats {
    pub floor_price: f64,
    pub market_cap: f64,
    pub one_day_volume: f64,
}

/// A tracked NFT collection and its sync state.
#[derive(Debug, Clone)]
pub struct CollectionRecord {
    pub id: i64,
    pub name: String,
    pub lowercase_name: String,
    pub slug: String,
    pub chain: String,
    pub active: bool,
    pub verified_creator_address: String,
    /// True once backfill has exhausted the collection's history.
    pub caught_up_txn: bool,
    /// High-water mark: last transaction version already ingested.
    pub last_transaction_version: Option<u64>,
    pub last_updated_listings_at: Option<i64>,
    pub created_at: i64,
    pub description: String,
    pub image_url: Option<String>,
    pub gallery: Vec<String>,
    pub stats: CollectionStats,
    pub stats_eth: EthStats,
}

/// An active listing; one row per token, keyed by token hash. Collection
/// identity is denormalized so readers never need a join.
#[derive(Debug, Clone)]
pub struct ListingRecord {
    pub token_data_id_hash: String,
    pub collection_id: i64,
    pub collection_name: String,
    pub slug: String,
    pub verified_creator_address: String,
    pub token_name: String,
    pub seller_address: Option<String>,
    pub price: f64,
    pub marketplace: String,
    pub event_type: String,
    pub image_url: Option<String>,
    pub transaction_version: u64,
    pub listed_at: i64,
}

/// A historical sale; append-only, unique per (version, token hash).
#[derive(Debug, Clone)]
pub struct ActivityRecord {
    pub collection_id: i64,
    pub collection_name: String,
    pub slug: String,
    pub verified_creator_address: String,
    pub token_data_id_hash: String,
    pub token_name: String,
    pub transaction_version: u64,
    pub event_type: String,
    pub price: f64,
    pub marketplace: String,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub image_url: Option<String>,
    pub timestamp: i64,
}

/// Everything one per-collection sync pass decided, committed atomically.
#[derive(Debug, Default)]
pub struct CollectionBatch {
    pub collection_id: i64,
    /// Token hashes whose listings a sale/delist removed.
    pub delete_listings: Vec<String>,
    pub upsert_listings: Vec<ListingRecord>,
    pub insert_activities: Vec<ActivityRecord>,
    /// Advances the watermark; never moves it backwards.
    pub new_watermark: Option<u64>,
    /// One-way flip, false to true only.
    pub mark_caught_up: bool,
    pub touched_at: i64,
}

/// Persistence boundary for the catalog.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// One page of active collections, id descending, starting strictly
    /// after `start_after` when given.
    async fn steady_page(
        &self,
        start_after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<CollectionRecord>, SyncError>;

    /// Oldest active collection still awaiting backfill, if any.
    async fn next_catch_up_collection(&self) -> Result<Option<CollectionRecord>, SyncError>;

    async fn get_by_creator(
        &self,
        creator_address: &str,
    ) -> Result<Option<CollectionRecord>, SyncError>;

    /// Registers a new collection; the record's `id` field is ignored.
    /// Returns false when the creator address is already tracked.
    async fn insert_collection(&self, record: &CollectionRecord) -> Result<bool, SyncError>;

    async fn get_listing(
        &self,
        token_data_id_hash: &str,
    ) -> Result<Option<ListingRecord>, SyncError>;

    async fn activity_exists(
        &self,
        transaction_version: u64,
        token_data_id_hash: &str,
    ) -> Result<bool, SyncError>;

    /// Active listings for a collection, cheapest first.
    async fn listings_by_collection_price_asc(
        &self,
        collection_id: i64,
    ) -> Result<Vec<ListingRecord>, SyncError>;

    /// Active listings whose seller is the given wallet.
    async fn listings_by_seller(
        &self,
        seller_address: &str,
    ) -> Result<Vec<ListingRecord>, SyncError>;

    /// Newest activities for a collection, newest first.
    async fn recent_activities(
        &self,
        collection_id: i64,
        limit: usize,
    ) -> Result<Vec<ActivityRecord>, SyncError>;

    /// Caught-up active collections eligible for a stats refresh, newest
    /// first.
    async fn collections_for_stats(
        &self,
        limit: usize,
    ) -> Result<Vec<CollectionRecord>, SyncError>;

    /// Every active collection, newest first. Owner refreshes use this; a
    /// collection mid-backfill still has owners worth counting.
    async fn active_collections(&self, limit: usize)
        -> Result<Vec<CollectionRecord>, SyncError>;

    async fn commit_collection_batch(&self, batch: CollectionBatch) -> Result<(), SyncError>;

    async fn commit_stats(
        &self,
        updates: Vec<(i64, CollectionStats, EthStats)>,
    ) -> Result<(), SyncError>;

    /// Overwrites owner counts inside the stored stats; zero counts are
    /// the indexer telling us nothing, so they are skipped upstream.
    async fn commit_owner_counts(&self, updates: Vec<(i64, u64)>) -> Result<(), SyncError>;

    async fn get_cursor(&self, job: &str) -> Result<Option<i64>, SyncError>;

    async fn set_cursor(&self, job: &str, start_after: Option<i64>) -> Result<(), SyncError>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS collections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    lowercase_name TEXT NOT NULL,
    slug TEXT NOT NULL UNIQUE,
    chain TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    verified_creator_address TEXT NOT NULL UNIQUE,
    caught_up_txn INTEGER NOT NULL DEFAULT 0,
    last_transaction_version INTEGER,
    last_updated_listings_at INTEGER,
    created_at INTEGER NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    image_url TEXT,
    gallery TEXT NOT NULL DEFAULT '[]',
    stats TEXT NOT NULL,
    stats_eth TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS listings (
    token_data_id_hash TEXT PRIMARY KEY,
    collection_id INTEGER NOT NULL,
    collection_name TEXT NOT NULL,
    slug TEXT NOT NULL,
    verified_creator_address TEXT NOT NULL,
    token_name TEXT NOT NULL,
    seller_address TEXT,
    price REAL NOT NULL,
    marketplace TEXT NOT NULL,
    event_type TEXT NOT NULL DEFAULT '',
    image_url TEXT,
    transaction_version INTEGER NOT NULL,
    listed_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_listings_collection_price
    ON listings(collection_id, price);

CREATE TABLE IF NOT EXISTS activities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    collection_id INTEGER NOT NULL,
    collection_name TEXT NOT NULL,
    slug TEXT NOT NULL,
    verified_creator_address TEXT NOT NULL,
    token_data_id_hash TEXT NOT NULL,
    token_name TEXT NOT NULL,
    transaction_version INTEGER NOT NULL,
    event_type TEXT NOT NULL,
    price REAL NOT NULL,
    marketplace TEXT NOT NULL,
    from_address TEXT,
    to_address TEXT,
    image_url TEXT,
    timestamp INTEGER NOT NULL,
    UNIQUE(transaction_version, token_data_id_hash)
);
CREATE INDEX IF NOT EXISTS idx_activities_collection_time
    ON activities(collection_id, timestamp DESC);

CREATE TABLE IF NOT EXISTS sync_cursors (
    job TEXT PRIMARY KEY,
    start_after INTEGER
);
";

/// SQLite implementation; a shared connection behind a mutex, WAL mode.
pub struct SqliteCatalogStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCatalogStore {
    pub fn open(db_path: &str) -> Result<Self, SyncError> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;
        log::info!("Catalog store ready at {}", db_path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SyncError> {
        self.conn
            .lock()
            .map_err(|_| SyncError::Commit("catalog store mutex poisoned".to_string()))
    }
}

const COLLECTION_COLUMNS: &str = "id, name, lowercase_name, slug, chain, active, \
    verified_creator_address, caught_up_txn, last_transaction_version, \
    last_updated_listings_at, created_at, description, image_url, gallery, \
    stats, stats_eth";

fn row_to_collection(row: &rusqlite::Row<'_>) -> rusqlite::Result<CollectionRecord> {
    let gallery_json: String = row.get(13)?;
    let stats_json: String = row.get(14)?;
    let stats_eth_json: String = row.get(15)?;
    Ok(CollectionRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        lowercase_name: row.get(2)?,
        slug: row.get(3)?,
        chain: row.get(4)?,
        active: row.get(5)?,
        verified_creator_address: row.get(6)?,
        caught_up_txn: row.get(7)?,
        last_transaction_version: row.get::<_, Option<i64>>(8)?.map(|v| v as u64),
        last_updated_listings_at: row.get(9)?,
        created_at: row.get(10)?,
        description: row.get(11)?,
        image_url: row.get(12)?,
        gallery: serde_json::from_str(&gallery_json).unwrap_or_default(),
        stats: serde_json::from_str(&stats_json).unwrap_or_default(),
        stats_eth: serde_json::from_str(&stats_eth_json).unwrap_or_default(),
    })
}

const LISTING_COLUMNS: &str = "token_data_id_hash, collection_id, collection_name, slug, \
    verified_creator_address, token_name, seller_address, price, marketplace, \
    event_type, image_url, transaction_version, listed_at";

fn row_to_listing(row: &rusqlite::Row<'_>) -> rusqlite::Result<ListingRecord> {
    Ok(ListingRecord {
        token_data_id_hash: row.get(0)?,
        collection_id: row.get(1)?,
        collection_name: row.get(2)?,
        slug: row.get(3)?,
        verified_creator_address: row.get(4)?,
        token_name: row.get(5)?,
        seller_address: row.get(6)?,
        price: row.get(7)?,
        marketplace: row.get(8)?,
        event_type: row.get(9)?,
        image_url: row.get(10)?,
        transaction_version: row.get::<_, i64>(11)? as u64,
        listed_at: row.get(12)?,
    })
}

const ACTIVITY_COLUMNS: &str = "collection_id, collection_name, slug, \
    verified_creator_address, token_data_id_hash, token_name, \
    transaction_version, event_type, price, marketplace, from_address, \
    to_address, image_url, timestamp";

fn row_to_activity(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActivityRecord> {
    Ok(ActivityRecord {
        collection_id: row.get(0)?,
        collection_name: row.get(1)?,
        slug: row.get(2)?,
        verified_creator_address: row.get(3)?,
        token_data_id_hash: row.get(4)?,
        token_name: row.get(5)?,
        transaction_version: row.get::<_, i64>(6)? as u64,
        event_type: row.get(7)?,
        price: row.get(8)?,
        marketplace: row.get(9)?,
        from_address: row.get(10)?,
        to_address: row.get(11)?,
        image_url: row.get(12)?,
        timestamp: row.get(13)?,
    })
}

fn stats_json(stats: &CollectionStats) -> Result<String, SyncError> {
    serde_json::to_string(stats).map_err(|e| SyncError::Decode(e.to_string()))
}

#[async_trait]
impl CatalogStore for SqliteCatalogStore {
    async fn steady_page(
        &self,
        start_after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<CollectionRecord>, SyncError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {COLLECTION_COLUMNS} FROM collections \
             WHERE active = 1 AND chain = ?1 AND id < ?2 \
             ORDER BY id DESC LIMIT ?3"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![CHAIN, start_after.unwrap_or(i64::MAX), limit as i64],
            row_to_collection,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn next_catch_up_collection(&self) -> Result<Option<CollectionRecord>, SyncError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {COLLECTION_COLUMNS} FROM collections \
             WHERE active = 1 AND chain = ?1 AND caught_up_txn = 0 \
             ORDER BY created_at ASC LIMIT 1"
        );
        let record = conn
            .query_row(&sql, params![CHAIN], row_to_collection)
            .optional()?;
        Ok(record)
    }

    async fn get_by_creator(
        &self,
        creator_address: &str,
    ) -> Result<Option<CollectionRecord>, SyncError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {COLLECTION_COLUMNS} FROM collections \
             WHERE verified_creator_address = ?1"
        );
        let record = conn
            .query_row(&sql, params![creator_address], row_to_collection)
            .optional()?;
        Ok(record)
    }

    async fn insert_collection(&self, record: &CollectionRecord) -> Result<bool, SyncError> {
        let conn = self.lock()?;
        let gallery = serde_json::to_string(&record.gallery)
            .map_err(|e| SyncError::Decode(e.to_string()))?;
        let stats = stats_json(&record.stats)?;
        let stats_eth = serde_json::to_string(&record.stats_eth)
            .map_err(|e| SyncError::Decode(e.to_string()))?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO collections \
             (name, lowercase_name, slug, chain, active, verified_creator_address, \
              caught_up_txn, last_transaction_version, last_updated_listings_at, \
              created_at, description, image_url, gallery, stats, stats_eth) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                record.name,
                record.lowercase_name,
                record.slug,
                record.chain,
                record.active,
                record.verified_creator_address,
                record.caught_up_txn,
                record.last_transaction_version.map(|v| v as i64),
                record.last_updated_listings_at,
                record.created_at,
                record.description,
                record.image_url,
                gallery,
                stats,
                stats_eth,
            ],
        )?;
        Ok(inserted > 0)
    }

    async fn get_listing(
        &self,
        token_data_id_hash: &str,
    ) -> Result<Option<ListingRecord>, SyncError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE token_data_id_hash = ?1"
        );
        let record = conn
            .query_row(&sql, params![token_data_id_hash], row_to_listing)
            .optional()?;
        Ok(record)
    }

    async fn activity_exists(
        &self,
        transaction_version: u64,
        token_data_id_hash: &str,
    ) -> Result<bool, SyncError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM activities \
             WHERE transaction_version = ?1 AND token_data_id_hash = ?2",
            params![transaction_version as i64, token_data_id_hash],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    async fn listings_by_collection_price_asc(
        &self,
        collection_id: i64,
    ) -> Result<Vec<ListingRecord>, SyncError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {LISTING_COLUMNS} FROM listings \
             WHERE collection_id = ?1 ORDER BY price ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![collection_id], row_to_listing)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn listings_by_seller(
        &self,
        seller_address: &str,
    ) -> Result<Vec<ListingRecord>, SyncError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {LISTING_COLUMNS} FROM listings WHERE seller_address = ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![seller_address], row_to_listing)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn recent_activities(
        &self,
        collection_id: i64,
        limit: usize,
    ) -> Result<Vec<ActivityRecord>, SyncError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activities \
             WHERE collection_id = ?1 ORDER BY timestamp DESC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![collection_id, limit as i64], row_to_activity)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn collections_for_stats(
        &self,
        limit: usize,
    ) -> Result<Vec<CollectionRecord>, SyncError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {COLLECTION_COLUMNS} FROM collections \
             WHERE active = 1 AND chain = ?1 AND caught_up_txn = 1 \
             ORDER BY id DESC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![CHAIN, limit as i64], row_to_collection)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn active_collections(
        &self,
        limit: usize,
    ) -> Result<Vec<CollectionRecord>, SyncError> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {COLLECTION_COLUMNS} FROM collections \
             WHERE active = 1 AND chain = ?1 ORDER BY id DESC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![CHAIN, limit as i64], row_to_collection)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    async fn commit_collection_batch(&self, batch: CollectionBatch) -> Result<(), SyncError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        for hash in &batch.delete_listings {
            tx.execute(
                "DELETE FROM listings WHERE token_data_id_hash = ?1",
                params![hash],
            )?;
        }

        for listing in &batch.upsert_listings {
            tx.execute(
                "INSERT INTO listings \
                 (token_data_id_hash, collection_id, collection_name, slug, \
                  verified_creator_address, token_name, seller_address, price, \
                  marketplace, event_type, image_url, transaction_version, listed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13) \
                 ON CONFLICT(token_data_id_hash) DO UPDATE SET \
                    price = excluded.price, \
                    marketplace = excluded.marketplace, \
                    event_type = excluded.event_type, \
                    seller_address = excluded.seller_address, \
                    transaction_version = excluded.transaction_version, \
                    listed_at = excluded.listed_at",
                params![
                    listing.token_data_id_hash,
                    listing.collection_id,
                    listing.collection_name,
                    listing.slug,
                    listing.verified_creator_address,
                    listing.token_name,
                    listing.seller_address,
                    listing.price,
                    listing.marketplace,
                    listing.event_type,
                    listing.image_url,
                    listing.transaction_version as i64,
                    listing.listed_at,
                ],
            )?;
        }

        for activity in &batch.insert_activities {
            tx.execute(
                "INSERT OR IGNORE INTO activities \
                 (collection_id, collection_name, slug, verified_creator_address, \
                  token_data_id_hash, token_name, transaction_version, event_type, \
                  price, marketplace, from_address, to_address, image_url, timestamp) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    activity.collection_id,
                    activity.collection_name,
                    activity.slug,
                    activity.verified_creator_address,
                    activity.token_data_id_hash,
                    activity.token_name,
                    activity.transaction_version as i64,
                    activity.event_type,
                    activity.price,
                    activity.marketplace,
                    activity.from_address,
                    activity.to_address,
                    activity.image_url,
                    activity.timestamp,
                ],
            )?;
        }

        // The watermark never moves backwards and caught_up never flips back
        // to false, whatever the batch claims.
        tx.execute(
            "UPDATE collections SET \
                last_transaction_version = CASE \
                    WHEN ?2 IS NULL THEN last_transaction_version \
                    WHEN last_transaction_version IS NULL THEN ?2 \
                    WHEN last_transaction_version < ?2 THEN ?2 \
                    ELSE last_transaction_version END, \
                caught_up_txn = caught_up_txn OR ?3, \
                last_updated_listings_at = ?4 \
             WHERE id = ?1",
            params![
                batch.collection_id,
                batch.new_watermark.map(|v| v as i64),
                batch.mark_caught_up,
                batch.touched_at,
            ],
        )?;

        tx.commit()?;
        log::debug!(
            "Committed batch for collection {}: {} upserts, {} deletes, {} activities",
            batch.collection_id,
            batch.upsert_listings.len(),
            batch.delete_listings.len(),
            batch.insert_activities.len()
        );
        Ok(())
    }

    async fn commit_stats(
        &self,
        updates: Vec<(i64, CollectionStats, EthStats)>,
    ) -> Result<(), SyncError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for (id, stats, stats_eth) in &updates {
            let stats = stats_json(stats)?;
            let stats_eth = serde_json::to_string(stats_eth)
                .map_err(|e| SyncError::Decode(e.to_string()))?;
            tx.execute(
                "UPDATE collections SET stats = ?2, stats_eth = ?3 WHERE id = ?1",
                params![id, stats, stats_eth],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn commit_owner_counts(&self, updates: Vec<(i64, u64)>) -> Result<(), SyncError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for (id, owners) in &updates {
            let current: Option<String> = tx
                .query_row(
                    "SELECT stats FROM collections WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(raw) = current else { continue };
            let mut stats: CollectionStats = serde_json::from_str(&raw).unwrap_or_default();
            stats.num_owners = *owners;
            tx.execute(
                "UPDATE collections SET stats = ?2 WHERE id = ?1",
                params![id, stats_json(&stats)?],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn get_cursor(&self, job: &str) -> Result<Option<i64>, SyncError> {
        let conn = self.lock()?;
        let cursor: Option<Option<i64>> = conn
            .query_row(
                "SELECT start_after FROM sync_cursors WHERE job = ?1",
                params![job],
                |row| row.get(0),
            )
            .optional()?;
        Ok(cursor.flatten())
    }

    async fn set_cursor(&self, job: &str, start_after: Option<i64>) -> Result<(), SyncError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_cursors (job, start_after) VALUES (?1, ?2) \
             ON CONFLICT(job) DO UPDATE SET start_after = excluded.start_after",
            params![job, start_after],
        )?;
        Ok(())
    }
}
