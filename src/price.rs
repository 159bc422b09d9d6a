//! Price Resolver.
//!
//! For one (transaction version, token) pair, queries every supported
//! marketplace in priority order and deterministically resolves a canonical
//! price, marketplace and event type. Called once per listing/sale
//! candidate, so it short-circuits on the first genuine fill.

use crate::config::{Marketplace, OCTAS_PER_APT, SUPPORTED_MARKETPLACES};
use crate::events::EventKind;
use crate::indexer::EventSource;

/// Resolution outcome. `price` is `None` when no marketplace yielded a
/// priced event at the version; callers must treat that as "unresolved",
/// never as zero (zero is a legal resolved price).
#[derive(Debug, Clone)]
pub struct ResolvedPrice {
    pub price: Option<f64>,
    pub marketplace: String,
    pub event_type: String,
}

impl ResolvedPrice {
    pub fn unresolved() -> Self {
        Self {
            price: None,
            marketplace: String::new(),
            event_type: String::new(),
        }
    }

    pub fn kind(&self) -> EventKind {
        EventKind::from_tag(&self.event_type)
    }
}

/// Resolve the canonical price for an event across the default marketplace
/// registry.
pub async fn resolve_price(
    source: &dyn EventSource,
    version: u64,
    token_name: &str,
) -> ResolvedPrice {
    resolve_price_in(source, SUPPORTED_MARKETPLACES, version, token_name).await
}

/// Resolve against an explicit marketplace priority list.
///
/// A priced cancel/delist event is remembered as a fallback and scanning
/// continues; a priced non-cancel event returns immediately. The fallback
/// is only returned after every marketplace has been given the chance to
/// produce a genuine fill, so a fill on a lower-priority marketplace beats
/// a higher-priority marketplace's cancellation at the same version.
pub async fn resolve_price_in(
    source: &dyn EventSource,
    marketplaces: &[Marketplace],
    version: u64,
    token_name: &str,
) -> ResolvedPrice {
    let mut fallback: Option<ResolvedPrice> = None;

    for marketplace in marketplaces {
        let events = match source
            .fetch_marketplace_events_at(marketplace.contract_address, version)
            .await
        {
            Ok(events) => events,
            Err(err) => {
                log::warn!(
                    "Price query failed for {} at v{} on {}: {}",
                    token_name,
                    version,
                    marketplace.name,
                    err
                );
                // Abort the scan; a half-queried registry must not pick a
                // lower-priority fill over an unseen higher-priority one.
                return fallback.unwrap_or_else(ResolvedPrice::unresolved);
            }
        };

        for event in &events {
            let Some(octas) = event.price_octas(marketplace.price_field) else {
                continue;
            };
            let resolved = ResolvedPrice {
                price: Some(octas / OCTAS_PER_APT),
                marketplace: marketplace.name.to_string(),
                event_type: event.event_type.clone(),
            };
            if event.kind().is_cancel() {
                // Remember the delist but keep looking for a genuine fill.
                if fallback.is_none() {
                    fallback = Some(resolved);
                }
            } else {
                return resolved;
            }
        }
    }

    match fallback {
        Some(delist) => {
            log::debug!(
                "{} v{}: only delist data found on {}",
                token_name,
                version,
                delist.marketplace
            );
            delist
        }
        None => {
            log::debug!("No marketplace price found for {} at v{}", token_name, version);
            ResolvedPrice::unresolved()
        }
    }
}
