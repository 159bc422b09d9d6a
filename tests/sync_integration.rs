//! End-to-end sync flows against a real SQLite store and a scripted event
//! source.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use aptflow::config::{CHAIN, SUPPORTED_MARKETPLACES};
use aptflow::error::SyncError;
use aptflow::events::{EventKind, MarketplaceEventNode, TokenEvent, DEPOSIT_TAG, WITHDRAW_TAG};
use aptflow::indexer::{CollectionMetadata, EventSource, WalletNftNode};
use aptflow::store::{
    ActivityRecord, CatalogStore, CollectionBatch, CollectionRecord, CollectionStats, EthStats,
    ListingRecord, SqliteCatalogStore,
};
use aptflow::sync::SyncEngine;
use aptflow::wallet::{wallet_portfolio, ListStatus};

/// Scripted feed: token events served in version order, marketplace events
/// keyed by transaction version (served for the first marketplace only).
#[derive(Default)]
struct ScriptedSource {
    token_events: Vec<TokenEvent>,
    marketplace_events: HashMap<u64, Vec<MarketplaceEventNode>>,
    wallet_nfts: Vec<WalletNftNode>,
}

impl ScriptedSource {
    fn add_token_event(&mut self, token: &str, version: u64, tag: &str) {
        self.token_events.push(TokenEvent {
            name: format!("NFT {}", token),
            creator_address: "0xcreator".to_string(),
            from_address: Some("0xseller".to_string()),
            to_address: Some("0xbuyer".to_string()),
            token_data_id_hash: token.to_string(),
            transaction_version: version,
            kind: EventKind::from_tag(tag),
            timestamp: 1_700_000_000 + version as i64,
        });
    }

    fn add_wallet_nft(&mut self, token: &str, creator: &str, collection: &str, uri: &str, amount: u64) {
        let node: WalletNftNode = serde_json::from_value(json!({
            "amount": amount,
            "current_token_data": {
                "token_name": format!("NFT {}", token),
                "token_uri": uri,
                "token_data_id": token,
                "current_collection": {
                    "collection_name": collection,
                    "creator_address": creator,
                },
            },
        }))
        .unwrap();
        self.wallet_nfts.push(node);
    }

    fn add_marketplace_event(&mut self, version: u64, tag: &str, octas: u64) {
        let node: MarketplaceEventNode = serde_json::from_value(json!({
            "type": tag,
            "data": { "price": octas },
            "transaction_version": version,
        }))
        .unwrap();
        self.marketplace_events.entry(version).or_default().push(node);
    }
}

#[async_trait]
impl EventSource for ScriptedSource {
    async fn fetch_token_events(
        &self,
        _creator_address: &str,
        after_version: u64,
        page_size: usize,
    ) -> Result<Vec<TokenEvent>, SyncError> {
        let mut page: Vec<TokenEvent> = self
            .token_events
            .iter()
            .filter(|e| e.transaction_version > after_version)
            .cloned()
            .collect();
        page.sort_by_key(|e| e.transaction_version);
        page.truncate(page_size);
        Ok(page)
    }

    async fn fetch_marketplace_events_at(
        &self,
        marketplace_address: &str,
        version: u64,
    ) -> Result<Vec<MarketplaceEventNode>, SyncError> {
        if marketplace_address != SUPPORTED_MARKETPLACES[0].contract_address {
            return Ok(Vec::new());
        }
        Ok(self
            .marketplace_events
            .get(&version)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_marketplace_events_before(
        &self,
        _marketplace_address: &str,
        _before_version: Option<u64>,
    ) -> Result<Vec<MarketplaceEventNode>, SyncError> {
        Ok(Vec::new())
    }

    async fn fetch_collection_metadata(
        &self,
        _creator_address: &str,
    ) -> Result<Option<CollectionMetadata>, SyncError> {
        Ok(None)
    }

    async fn fetch_unique_owners(&self, _creator_address: &str) -> Result<Option<u64>, SyncError> {
        Ok(None)
    }

    async fn fetch_token_metadata_uri(
        &self,
        _token_data_id_hash: &str,
    ) -> Result<Option<String>, SyncError> {
        Ok(None)
    }

    async fn fetch_wallet_nfts(
        &self,
        _owner_address: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<WalletNftNode>, SyncError> {
        Ok(self
            .wallet_nfts
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

fn make_store() -> (Arc<SqliteCatalogStore>, TempDir) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("catalog.db");
    let store = SqliteCatalogStore::open(path.to_str().unwrap()).unwrap();
    (Arc::new(store), dir)
}

fn make_collection(watermark: Option<u64>) -> CollectionRecord {
    CollectionRecord {
        id: 0,
        name: "Test Apes".to_string(),
        lowercase_name: "test apes".to_string(),
        slug: "test_apes_aptos".to_string(),
        chain: CHAIN.to_string(),
        active: true,
        verified_creator_address: "0xcreator".to_string(),
        caught_up_txn: false,
        last_transaction_version: watermark,
        last_updated_listings_at: None,
        created_at: 1_700_000_000,
        description: String::new(),
        image_url: None,
        gallery: Vec::new(),
        stats: CollectionStats::default(),
        stats_eth: EthStats::default(),
    }
}

fn engine(source: ScriptedSource, store: Arc<SqliteCatalogStore>) -> SyncEngine {
    SyncEngine::new(Arc::new(source), store, reqwest::Client::new())
}

const LIST_TAG: &str = "0xm::events::ListEvent";
const BUY_TAG: &str = "0xm::events::BuyEvent";

#[tokio::test]
async fn test_catch_up_backfills_and_flips_caught_up() {
    let (store, _dir) = make_store();
    store
        .insert_collection(&make_collection(Some(1_000)))
        .await
        .unwrap();

    let mut source = ScriptedSource::default();
    // 140 withdraws: a full first page of 100, then a short page of 40.
    for i in 0..140u64 {
        source.add_token_event(&format!("t{}", i), 1_001 + i, WITHDRAW_TAG);
    }
    // Only three of them carry a marketplace listing price.
    for v in [1_001, 1_050, 1_140] {
        source.add_marketplace_event(v, LIST_TAG, 200_000_000);
    }

    engine(source, store.clone()).run_catch_up().await.unwrap();

    let collection = store.get_by_creator("0xcreator").await.unwrap().unwrap();
    assert!(collection.caught_up_txn, "140 events is under the threshold");
    assert_eq!(collection.last_transaction_version, Some(1_140));

    let listings = store
        .listings_by_collection_price_asc(collection.id)
        .await
        .unwrap();
    assert_eq!(listings.len(), 3);
    assert_eq!(listings[0].price, 2.0);
    assert_eq!(listings[0].marketplace, "topaz");
}

#[tokio::test]
async fn test_catch_up_with_no_backlog_is_a_noop() {
    let (store, _dir) = make_store();
    let source = ScriptedSource::default();
    let ran = engine(source, store).run_catch_up().await.unwrap();
    assert!(!ran);
}

#[tokio::test]
async fn test_steady_sale_deletes_listing_and_records_activity() {
    let (store, _dir) = make_store();
    store
        .insert_collection(&make_collection(Some(2_000)))
        .await
        .unwrap();
    let id = store.get_by_creator("0xcreator").await.unwrap().unwrap().id;
    store
        .commit_collection_batch(CollectionBatch {
            collection_id: id,
            mark_caught_up: true,
            ..Default::default()
        })
        .await
        .unwrap();

    // A withdraw-then-deposit pair for t1; topaz reports the deposit as a
    // 7 APT buy.
    let mut source = ScriptedSource::default();
    source.add_token_event("t1", 2_001, WITHDRAW_TAG);
    source.add_marketplace_event(2_001, LIST_TAG, 500_000_000);
    source.add_token_event("t1", 2_002, DEPOSIT_TAG);
    source.add_marketplace_event(2_002, BUY_TAG, 700_000_000);

    let engine = engine(source, store.clone());
    let cursor = engine.run_steady(None).await.unwrap();
    assert!(cursor.is_none(), "single short page wraps the cursor");

    // The deposit superseded the withdraw in dedup, so no listing survives.
    let listings = store.listings_by_collection_price_asc(id).await.unwrap();
    assert!(listings.is_empty());

    assert!(store.activity_exists(2_002, "t1").await.unwrap());
    let activities = store.recent_activities(id, 10).await.unwrap();
    assert_eq!(activities.len(), 1);
    assert_eq!(activities[0].price, 7.0);
    assert_eq!(activities[0].marketplace, "topaz");

    let collection = store.get_by_creator("0xcreator").await.unwrap().unwrap();
    assert_eq!(collection.last_transaction_version, Some(2_002));

    // Replaying the same run changes nothing.
    engine.run_steady(None).await.unwrap();
    let activities = store.recent_activities(id, 10).await.unwrap();
    assert_eq!(activities.len(), 1);
}

#[tokio::test]
async fn test_steady_skips_collections_awaiting_backfill() {
    let (store, _dir) = make_store();
    store
        .insert_collection(&make_collection(Some(3_000)))
        .await
        .unwrap();
    let id = store.get_by_creator("0xcreator").await.unwrap().unwrap().id;

    let mut source = ScriptedSource::default();
    source.add_token_event("t1", 3_001, WITHDRAW_TAG);
    source.add_marketplace_event(3_001, LIST_TAG, 100_000_000);

    engine(source, store.clone()).run_steady(None).await.unwrap();

    // Not caught up, so steady left it alone: no listings, watermark unmoved.
    let listings = store.listings_by_collection_price_asc(id).await.unwrap();
    assert!(listings.is_empty());
    let collection = store.get_by_creator("0xcreator").await.unwrap().unwrap();
    assert_eq!(collection.last_transaction_version, Some(3_000));
}

/// Store wrapper whose batch commits always fail, as if the disk vanished.
struct FailingCommitStore {
    inner: Arc<SqliteCatalogStore>,
}

#[async_trait]
impl CatalogStore for FailingCommitStore {
    async fn steady_page(
        &self,
        start_after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<CollectionRecord>, SyncError> {
        self.inner.steady_page(start_after, limit).await
    }

    async fn next_catch_up_collection(&self) -> Result<Option<CollectionRecord>, SyncError> {
        self.inner.next_catch_up_collection().await
    }

    async fn get_by_creator(
        &self,
        creator_address: &str,
    ) -> Result<Option<CollectionRecord>, SyncError> {
        self.inner.get_by_creator(creator_address).await
    }

    async fn insert_collection(&self, record: &CollectionRecord) -> Result<bool, SyncError> {
        self.inner.insert_collection(record).await
    }

    async fn get_listing(
        &self,
        token_data_id_hash: &str,
    ) -> Result<Option<ListingRecord>, SyncError> {
        self.inner.get_listing(token_data_id_hash).await
    }

    async fn activity_exists(
        &self,
        transaction_version: u64,
        token_data_id_hash: &str,
    ) -> Result<bool, SyncError> {
        self.inner
            .activity_exists(transaction_version, token_data_id_hash)
            .await
    }

    async fn listings_by_collection_price_asc(
        &self,
        collection_id: i64,
    ) -> Result<Vec<ListingRecord>, SyncError> {
        self.inner.listings_by_collection_price_asc(collection_id).await
    }

    async fn listings_by_seller(
        &self,
        seller_address: &str,
    ) -> Result<Vec<ListingRecord>, SyncError> {
        self.inner.listings_by_seller(seller_address).await
    }

    async fn recent_activities(
        &self,
        collection_id: i64,
        limit: usize,
    ) -> Result<Vec<ActivityRecord>, SyncError> {
        self.inner.recent_activities(collection_id, limit).await
    }

    async fn collections_for_stats(
        &self,
        limit: usize,
    ) -> Result<Vec<CollectionRecord>, SyncError> {
        self.inner.collections_for_stats(limit).await
    }

    async fn active_collections(
        &self,
        limit: usize,
    ) -> Result<Vec<CollectionRecord>, SyncError> {
        self.inner.active_collections(limit).await
    }

    async fn commit_collection_batch(&self, _batch: CollectionBatch) -> Result<(), SyncError> {
        Err(SyncError::Commit("database is read-only".to_string()))
    }

    async fn commit_stats(
        &self,
        updates: Vec<(i64, CollectionStats, EthStats)>,
    ) -> Result<(), SyncError> {
        self.inner.commit_stats(updates).await
    }

    async fn commit_owner_counts(&self, updates: Vec<(i64, u64)>) -> Result<(), SyncError> {
        self.inner.commit_owner_counts(updates).await
    }

    async fn get_cursor(&self, job: &str) -> Result<Option<i64>, SyncError> {
        self.inner.get_cursor(job).await
    }

    async fn set_cursor(&self, job: &str, start_after: Option<i64>) -> Result<(), SyncError> {
        self.inner.set_cursor(job, start_after).await
    }
}

#[tokio::test]
async fn test_steady_surfaces_commit_failure() {
    let (store, _dir) = make_store();
    store
        .insert_collection(&make_collection(Some(5_000)))
        .await
        .unwrap();
    let id = store.get_by_creator("0xcreator").await.unwrap().unwrap().id;
    store
        .commit_collection_batch(CollectionBatch {
            collection_id: id,
            mark_caught_up: true,
            ..Default::default()
        })
        .await
        .unwrap();

    let mut source = ScriptedSource::default();
    source.add_token_event("t1", 5_001, WITHDRAW_TAG);
    source.add_marketplace_event(5_001, LIST_TAG, 100_000_000);

    let failing = Arc::new(FailingCommitStore {
        inner: store.clone(),
    });
    let engine = SyncEngine::new(Arc::new(source), failing, reqwest::Client::new());

    // A commit failure is the job's terminal error, not a skipped collection.
    let result = engine.run_steady(None).await;
    assert!(matches!(result, Err(SyncError::Commit(_))));

    // Nothing was persisted and the watermark did not move.
    let collection = store.get_by_creator("0xcreator").await.unwrap().unwrap();
    assert_eq!(collection.last_transaction_version, Some(5_000));
    assert!(store
        .listings_by_collection_price_asc(id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_wallet_portfolio_merges_listings_and_holdings() {
    let (store, _dir) = make_store();
    store
        .insert_collection(&make_collection(Some(6_000)))
        .await
        .unwrap();
    let id = store.get_by_creator("0xcreator").await.unwrap().unwrap().id;

    // One of the wallet's tokens is listed (escrowed) rather than held.
    store
        .commit_collection_batch(CollectionBatch {
            collection_id: id,
            upsert_listings: vec![ListingRecord {
                token_data_id_hash: "t_listed".to_string(),
                collection_id: id,
                collection_name: "Test Apes".to_string(),
                slug: "test_apes_aptos".to_string(),
                verified_creator_address: "0xcreator".to_string(),
                token_name: "NFT t_listed".to_string(),
                seller_address: Some("0xholder".to_string()),
                price: 4.0,
                marketplace: "topaz".to_string(),
                event_type: "0xm::events::ListEvent".to_string(),
                image_url: Some("https://cdn/listed.png".to_string()),
                transaction_version: 6_001,
                listed_at: 1_700_000_000,
            }],
            ..Default::default()
        })
        .await
        .unwrap();

    let mut source = ScriptedSource::default();
    // Two held tokens from the tracked collection, one from an untracked
    // one, and a stale zero-amount row.
    source.add_wallet_nft("t_a", "0xcreator", "Test Apes", "https://cdn/a.png", 1);
    source.add_wallet_nft("t_b", "0xcreator", "Test Apes", "https://cdn/b.png", 1);
    source.add_wallet_nft("t_c", "0xother", "Wild Birds", "https://cdn/c.png", 1);
    source.add_wallet_nft("t_gone", "0xcreator", "Test Apes", "https://cdn/g.png", 0);

    let portfolio = wallet_portfolio(
        Arc::new(source),
        store.clone(),
        &reqwest::Client::new(),
        "0xholder",
    )
    .await
    .unwrap();

    // One listed plus three held; the zero-amount row is dropped.
    assert_eq!(portfolio.gallery.len(), 4);
    let listed: Vec<_> = portfolio
        .gallery
        .iter()
        .filter(|g| g.status == ListStatus::Listed)
        .collect();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].mint_address, "t_listed");

    assert_eq!(portfolio.collections.len(), 2);
    let apes = portfolio
        .collections
        .iter()
        .find(|c| c.slug == "test_apes_aptos")
        .unwrap();
    // The listed token and the two held ones all count as owned.
    assert_eq!(apes.owned_asset_count, 3);
    let birds = portfolio
        .collections
        .iter()
        .find(|c| c.slug == "wild_birds_aptos")
        .unwrap();
    assert_eq!(birds.owned_asset_count, 1);
    assert_eq!(
        birds.image_url.as_deref(),
        Some("https://cdn/c.png"),
        "direct image URIs pass through without a metadata fetch"
    );
}

#[tokio::test]
async fn test_unpriced_transfer_leaves_no_trace() {
    let (store, _dir) = make_store();
    store
        .insert_collection(&make_collection(Some(4_000)))
        .await
        .unwrap();
    let id = store.get_by_creator("0xcreator").await.unwrap().unwrap().id;
    store
        .commit_collection_batch(CollectionBatch {
            collection_id: id,
            mark_caught_up: true,
            ..Default::default()
        })
        .await
        .unwrap();

    // A wallet-to-wallet transfer: no marketplace event at either version.
    let mut source = ScriptedSource::default();
    source.add_token_event("t1", 4_001, WITHDRAW_TAG);
    source.add_token_event("t2", 4_002, DEPOSIT_TAG);

    engine(source, store.clone()).run_steady(None).await.unwrap();

    let listings = store.listings_by_collection_price_asc(id).await.unwrap();
    assert!(listings.is_empty());
    let activities = store.recent_activities(id, 10).await.unwrap();
    assert!(activities.is_empty());

    // The watermark still advances past the noise.
    let collection = store.get_by_creator("0xcreator").await.unwrap().unwrap();
    assert_eq!(collection.last_transaction_version, Some(4_002));
}
