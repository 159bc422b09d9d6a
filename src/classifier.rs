//! Event Classifier & Deduplicator.
//!
//! Reduces a raw event batch to one canonical withdraw event per token
//! (single-slot listing state) while keeping every deposit event (sales are
//! an append-only log). The asymmetry is intentional: a token can hold only
//! one active listing, but each historical sale must survive as its own
//! activity record.

use std::collections::HashMap;

use crate::events::{EventKind, TokenEvent};

/// Output of a classification pass over one fetched batch.
#[derive(Debug, Default)]
pub struct Classified {
    /// Withdraw-kind survivors of per-token dedup: tentative listings.
    pub listing_candidates: Vec<TokenEvent>,
    /// The full undeduplicated deposit-kind subset: tentative sales or
    /// delistings.
    pub sale_candidates: Vec<TokenEvent>,
}

/// Classify a raw batch.
///
/// Dedup keeps, per token hash, the withdraw/deposit event with the highest
/// transaction version; on equal versions the first-seen event wins (the
/// feed claims version uniqueness, so ties only arise from duplicated
/// deliveries of the same event).
pub fn classify(events: &[TokenEvent]) -> Classified {
    let mut latest_by_token: HashMap<&str, &TokenEvent> = HashMap::new();

    for event in events {
        if event.kind != EventKind::Withdraw && event.kind != EventKind::Deposit {
            continue;
        }
        match latest_by_token.get(event.token_data_id_hash.as_str()) {
            Some(existing) if existing.transaction_version >= event.transaction_version => {}
            _ => {
                latest_by_token.insert(event.token_data_id_hash.as_str(), event);
            }
        }
    }

    let mut listing_candidates: Vec<TokenEvent> = latest_by_token
        .values()
        .filter(|e| e.kind == EventKind::Withdraw)
        .map(|e| (*e).clone())
        .collect();
    // Deterministic processing order for logging and tests.
    listing_candidates.sort_by_key(|e| e.transaction_version);

    let sale_candidates = events
        .iter()
        .filter(|e| e.kind == EventKind::Deposit)
        .cloned()
        .collect();

    Classified {
        listing_candidates,
        sale_candidates,
    }
}
