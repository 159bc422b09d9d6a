//! Wholesale stats aggregation.
//!
//! Stats are derived entirely from stored listings and activities and
//! replaced as a unit per collection. A refresh never mutates a single
//! field in place; it recomputes the whole block so readers can never see
//! a half-updated mix of old and new numbers.

use std::sync::Arc;

use chrono::Utc;

use crate::config::{ACTIVITY_SCAN_LIMIT, STATS_COLLECTION_LIMIT};
use crate::enrich::{fetch_conversion_rates, ConversionRates};
use crate::error::SyncError;
use crate::indexer::EventSource;
use crate::store::{ActivityRecord, CatalogStore, CollectionStats, EthStats, ListingRecord};

const DAY_SECS: i64 = 86_400;

/// Computes a collection's stats block from its current listings and most
/// recent activities (newest first).
///
/// `total_supply` and `num_owners` are carried over from the previous block:
/// they come from dedicated refreshes, not from the trade data scanned here.
pub fn compute_stats(
    listings: &[ListingRecord],
    activities: &[ActivityRecord],
    previous: &CollectionStats,
    rates: &ConversionRates,
    now: i64,
) -> (CollectionStats, EthStats) {
    let floor_price = listings.iter().map(|l| l.price).reduce(f64::min);
    let listed_count = listings.len() as u64;

    let day_start = now - DAY_SECS;
    let recent: Vec<&ActivityRecord> = activities
        .iter()
        .filter(|a| a.timestamp >= day_start)
        .collect();
    let one_day_volume = round2(recent.iter().map(|a| a.price).sum());
    let one_day_sales = recent.len() as u64;
    let one_day_average_price = if one_day_sales > 0 {
        round2(one_day_volume / one_day_sales as f64)
    } else {
        0.0
    };
    // The headline average tracks the trailing day, not the whole scan.
    let average_price = one_day_average_price;

    let market_cap = floor_price.unwrap_or(0.0) * previous.total_supply as f64;
    let usd_floor_price = match (floor_price, rates.usd) {
        (Some(floor), Some(usd)) => round2(floor * usd),
        _ => 0.0,
    };

    let eth = rates.eth.unwrap_or(0.0);
    let stats_eth = EthStats {
        floor_price: floor_price.unwrap_or(0.0) * eth,
        market_cap: market_cap * eth,
        one_day_volume: one_day_volume * eth,
    };

    let stats = CollectionStats {
        floor_price,
        usd_floor_price,
        one_day_volume,
        one_day_sales,
        one_day_average_price,
        average_price,
        listed_count,
        market_cap,
        total_supply: previous.total_supply,
        num_owners: previous.num_owners,
    };
    (stats, stats_eth)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Recomputes stats for every active collection and commits them in one
/// transaction.
pub async fn refresh_stats(
    store: Arc<dyn CatalogStore>,
    http: &reqwest::Client,
    rates_url: &str,
) -> Result<usize, SyncError> {
    let rates = fetch_conversion_rates(http, rates_url).await;
    if rates.usd.is_none() {
        log::warn!("No USD rate available; fiat floors will read zero this run");
    }

    let collections = store.collections_for_stats(STATS_COLLECTION_LIMIT).await?;
    let now = Utc::now().timestamp();
    let mut updates = Vec::with_capacity(collections.len());

    for collection in &collections {
        let listings = store.listings_by_collection_price_asc(collection.id).await?;
        let activities = store
            .recent_activities(collection.id, ACTIVITY_SCAN_LIMIT)
            .await?;
        let (stats, stats_eth) =
            compute_stats(&listings, &activities, &collection.stats, &rates, now);
        updates.push((collection.id, stats, stats_eth));
    }

    let count = updates.len();
    store.commit_stats(updates).await?;
    log::info!("Refreshed stats for {} collections", count);
    Ok(count)
}

/// Refreshes distinct-owner counts. A missing or zero count means the
/// indexer had nothing to say; the stored value is left alone.
pub async fn refresh_owner_counts(
    source: Arc<dyn EventSource>,
    store: Arc<dyn CatalogStore>,
) -> Result<usize, SyncError> {
    let collections = store.active_collections(STATS_COLLECTION_LIMIT).await?;
    let mut updates = Vec::new();

    for collection in &collections {
        match source
            .fetch_unique_owners(&collection.verified_creator_address)
            .await
        {
            Ok(Some(owners)) if owners > 0 => updates.push((collection.id, owners)),
            Ok(_) => {}
            Err(err) => {
                log::warn!("Owner count fetch failed for {}: {}", collection.name, err);
            }
        }
    }

    let count = updates.len();
    store.commit_owner_counts(updates).await?;
    log::info!("Updated owner counts for {} collections", count);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(price: f64) -> ListingRecord {
        ListingRecord {
            token_data_id_hash: format!("t{}", price),
            collection_id: 1,
            collection_name: "Apes".to_string(),
            slug: "apes_aptos".to_string(),
            verified_creator_address: "0xc1".to_string(),
            token_name: "NFT".to_string(),
            seller_address: None,
            price,
            marketplace: "topaz".to_string(),
            event_type: "0xm::events::ListEvent".to_string(),
            image_url: None,
            transaction_version: 1,
            listed_at: 0,
        }
    }

    fn activity(price: f64, timestamp: i64) -> ActivityRecord {
        ActivityRecord {
            collection_id: 1,
            collection_name: "Apes".to_string(),
            slug: "apes_aptos".to_string(),
            verified_creator_address: "0xc1".to_string(),
            token_data_id_hash: "t1".to_string(),
            token_name: "NFT".to_string(),
            transaction_version: 1,
            event_type: "0xm::events::BuyEvent".to_string(),
            price,
            marketplace: "topaz".to_string(),
            from_address: None,
            to_address: None,
            image_url: None,
            timestamp,
        }
    }

    fn rates() -> ConversionRates {
        ConversionRates {
            usd: Some(10.0),
            eth: Some(0.004),
        }
    }

    #[test]
    fn test_floor_volume_and_market_cap() {
        let now = 1_700_000_000;
        let previous = CollectionStats {
            total_supply: 1000,
            num_owners: 250,
            ..Default::default()
        };
        let listings = vec![listing(2.0), listing(5.0)];
        let activities = vec![
            activity(3.0, now - 100),
            activity(7.0, now - 200),
            activity(100.0, now - 2 * DAY_SECS), // outside the window
        ];

        let (stats, eth) = compute_stats(&listings, &activities, &previous, &rates(), now);
        assert_eq!(stats.floor_price, Some(2.0));
        assert_eq!(stats.listed_count, 2);
        assert_eq!(stats.one_day_volume, 10.0);
        assert_eq!(stats.one_day_sales, 2);
        assert_eq!(stats.one_day_average_price, 5.0);
        assert_eq!(stats.average_price, 5.0);
        assert_eq!(stats.market_cap, 2000.0);
        assert_eq!(stats.usd_floor_price, 20.0);
        assert_eq!(stats.total_supply, 1000);
        assert_eq!(stats.num_owners, 250);
        assert!((eth.floor_price - 0.008).abs() < 1e-9);
        assert!((eth.one_day_volume - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_no_listings_means_no_floor() {
        let (stats, eth) = compute_stats(
            &[],
            &[],
            &CollectionStats::default(),
            &rates(),
            1_700_000_000,
        );
        assert!(stats.floor_price.is_none());
        assert_eq!(stats.usd_floor_price, 0.0);
        assert_eq!(stats.market_cap, 0.0);
        assert_eq!(stats.one_day_sales, 0);
        assert_eq!(stats.one_day_average_price, 0.0);
        assert_eq!(eth.floor_price, 0.0);
    }

    #[test]
    fn test_missing_rates_zero_fiat_projections() {
        let now = 1_700_000_000;
        let listings = vec![listing(4.0)];
        let (stats, eth) = compute_stats(
            &listings,
            &[activity(4.0, now - 10)],
            &CollectionStats::default(),
            &ConversionRates::default(),
            now,
        );
        assert_eq!(stats.floor_price, Some(4.0));
        assert_eq!(stats.usd_floor_price, 0.0);
        assert_eq!(eth.floor_price, 0.0);
        assert_eq!(eth.one_day_volume, 0.0);
    }

    #[test]
    fn test_floor_is_minimum_regardless_of_order() {
        let previous = CollectionStats {
            total_supply: 100,
            ..Default::default()
        };
        let listings = vec![listing(5.0), listing(3.0), listing(8.0)];
        let (stats, _) = compute_stats(&listings, &[], &previous, &rates(), 1_700_000_000);
        assert_eq!(stats.floor_price, Some(3.0));
        assert_eq!(stats.listed_count, 3);
        assert_eq!(stats.market_cap, 300.0);
    }

    #[test]
    fn test_day_average_rounds_to_cents() {
        let now = 1_700_000_000;
        let activities = vec![
            activity(1.0, now - 10),
            activity(1.1, now - 20),
            activity(1.1, now - 30),
        ];
        let (stats, _) = compute_stats(
            &[],
            &activities,
            &CollectionStats::default(),
            &rates(),
            now,
        );
        assert_eq!(stats.one_day_average_price, 1.07);
        assert_eq!(stats.average_price, stats.one_day_average_price);
    }

    #[test]
    fn test_usd_floor_rounds_to_cents() {
        let listings = vec![listing(1.2345)];
        let (stats, _) = compute_stats(
            &listings,
            &[],
            &CollectionStats::default(),
            &rates(),
            1_700_000_000,
        );
        assert_eq!(stats.usd_floor_price, 12.35);
    }
}
