//! Collection discovery: admits the highest-volume untracked collections.
//!
//! Scans recent marketplace sale events, sums volume per creator address,
//! and seeds catalog records for the top few creators not yet tracked. New
//! records start active but not caught up, with zeroed stats; backfill picks
//! them up on its next run.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::config::{
    CHAIN, DISCOVERY_TOP_COUNT, GALLERY_SIZE, OCTAS_PER_APT, SUPPORTED_MARKETPLACES,
};
use crate::enrich::{fetch_image_from_uri, rewrite_ipfs};
use crate::error::SyncError;
use crate::indexer::EventSource;
use crate::store::{CatalogStore, CollectionRecord, CollectionStats, EthStats};

/// A creator seen selling during the scan window.
#[derive(Debug, Clone, PartialEq)]
pub struct SaleCandidate {
    pub collection_name: String,
    pub volume: f64,
}

/// Scans every supported marketplace backwards and admits up to
/// [`DISCOVERY_TOP_COUNT`] new collections. Returns how many were inserted.
pub async fn discover_collections(
    source: Arc<dyn EventSource>,
    store: Arc<dyn CatalogStore>,
    http: &reqwest::Client,
) -> Result<usize, SyncError> {
    let mut volumes: HashMap<String, SaleCandidate> = HashMap::new();

    for marketplace in SUPPORTED_MARKETPLACES {
        let mut before_version: Option<u64> = None;
        for _ in 0..marketplace.volume_pages {
            let page = match source
                .fetch_marketplace_events_before(marketplace.contract_address, before_version)
                .await
            {
                Ok(page) => page,
                Err(err) => {
                    log::warn!("Volume scan failed on {}: {}", marketplace.name, err);
                    break;
                }
            };
            if page.is_empty() {
                break;
            }
            before_version = page.iter().filter_map(|e| e.transaction_version).min();

            for event in &page {
                if !event.kind().is_sale() {
                    continue;
                }
                let Some(octas) = event.price_octas(marketplace.price_field) else {
                    continue;
                };
                let Some(identity) = event.token_identity() else {
                    continue;
                };
                let entry = volumes
                    .entry(identity.creator_address)
                    .or_insert_with(|| SaleCandidate {
                        collection_name: identity.collection_name,
                        volume: 0.0,
                    });
                entry.volume += octas / OCTAS_PER_APT;
            }

            if before_version.is_none() {
                break;
            }
        }
    }

    let ranked = top_candidates(volumes, DISCOVERY_TOP_COUNT);
    log::info!("Discovery ranked {} candidate creators", ranked.len());

    let mut inserted = 0;
    for (creator, candidate) in ranked {
        if store.get_by_creator(&creator).await?.is_some() {
            continue;
        }
        match seed_collection(source.as_ref(), http, &creator, &candidate).await {
            Ok(Some(record)) => {
                if store.insert_collection(&record).await? {
                    log::info!(
                        "Discovered {} ({creator}), volume {:.2} APT",
                        record.name,
                        candidate.volume
                    );
                    inserted += 1;
                }
            }
            Ok(None) => {
                log::debug!("Skipping {creator}: no usable collection metadata");
            }
            Err(err) => {
                log::warn!("Could not seed collection for {creator}: {}", err);
            }
        }
    }
    Ok(inserted)
}

/// Top `n` creators by summed sale volume, highest first.
pub fn top_candidates(
    volumes: HashMap<String, SaleCandidate>,
    n: usize,
) -> Vec<(String, SaleCandidate)> {
    let mut ranked: Vec<_> = volumes.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.volume
            .partial_cmp(&a.1.volume)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(n);
    ranked
}

async fn seed_collection(
    source: &dyn EventSource,
    http: &reqwest::Client,
    creator: &str,
    candidate: &SaleCandidate,
) -> Result<Option<CollectionRecord>, SyncError> {
    let Some(metadata) = source.fetch_collection_metadata(creator).await? else {
        return Ok(None);
    };
    if metadata.supply == 0 {
        // Unlimited-supply or malformed collections have no meaningful
        // market cap and pollute rankings.
        return Ok(None);
    }

    let mut gallery = Vec::new();
    for uri in metadata.token_metadata_uris.iter().take(GALLERY_SIZE) {
        match fetch_image_from_uri(http, uri).await {
            Some(image) => gallery.push(image),
            None => gallery.push(rewrite_ipfs(uri)),
        }
    }

    // The headline image comes from the collection-level metadata document;
    // gallery images are the per-token fallback.
    let fetched = if metadata.collection_metadata_uri.is_empty() {
        None
    } else {
        fetch_image_from_uri(http, &metadata.collection_metadata_uri).await
    };
    let image_url = collection_image(fetched, &metadata.collection_metadata_uri, &gallery);

    let name = candidate.collection_name.clone();
    let stats = CollectionStats {
        total_supply: metadata.supply,
        ..Default::default()
    };

    Ok(Some(CollectionRecord {
        id: 0,
        lowercase_name: name.to_lowercase(),
        slug: make_slug(&name),
        name,
        chain: CHAIN.to_string(),
        active: true,
        verified_creator_address: creator.to_string(),
        caught_up_txn: false,
        last_transaction_version: None,
        last_updated_listings_at: None,
        created_at: Utc::now().timestamp(),
        description: metadata.description,
        image_url,
        gallery,
        stats,
        stats_eth: EthStats::default(),
    }))
}

fn collection_image(
    fetched: Option<String>,
    collection_uri: &str,
    gallery: &[String],
) -> Option<String> {
    if fetched.is_some() {
        return fetched;
    }
    if !collection_uri.is_empty() {
        return Some(rewrite_ipfs(collection_uri));
    }
    gallery.first().cloned()
}

pub(crate) fn make_slug(name: &str) -> String {
    format!("{}_aptos", name.to_lowercase().replace(' ', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, volume: f64) -> SaleCandidate {
        SaleCandidate {
            collection_name: name.to_string(),
            volume,
        }
    }

    #[test]
    fn test_top_candidates_ranked_by_volume() {
        let mut volumes = HashMap::new();
        volumes.insert("0xa".to_string(), candidate("A", 10.0));
        volumes.insert("0xb".to_string(), candidate("B", 50.0));
        volumes.insert("0xc".to_string(), candidate("C", 30.0));

        let ranked = top_candidates(volumes, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0, "0xb");
        assert_eq!(ranked[1].0, "0xc");
    }

    #[test]
    fn test_top_candidates_fewer_than_n() {
        let mut volumes = HashMap::new();
        volumes.insert("0xa".to_string(), candidate("A", 1.0));
        let ranked = top_candidates(volumes, 5);
        assert_eq!(ranked.len(), 1);
    }

    #[test]
    fn test_collection_image_prefers_collection_metadata() {
        let gallery = vec!["https://cdn/1.png".to_string()];

        // Fetched image wins outright.
        assert_eq!(
            collection_image(Some("https://cdn/logo.png".to_string()), "ipfs://col", &gallery),
            Some("https://cdn/logo.png".to_string())
        );
        // Unfetchable collection document falls back to its rewritten URI.
        assert_eq!(
            collection_image(None, "ipfs://col", &gallery),
            Some("https://ipfs.io/ipfs/col".to_string())
        );
        // No collection URI at all falls back to the gallery.
        assert_eq!(
            collection_image(None, "", &gallery),
            Some("https://cdn/1.png".to_string())
        );
        assert_eq!(collection_image(None, "", &[]), None);
    }

    #[test]
    fn test_make_slug() {
        assert_eq!(make_slug("Aptos Monkeys"), "aptos_monkeys_aptos");
        assert_eq!(make_slug("BIRDS"), "birds_aptos");
    }
}
