//! Typed on-chain event payloads and the ingestion decode step.
//!
//! The indexer feed is free-form JSON; everything downstream works on the
//! decoded types in this module. Event type tags are resolved into the
//! closed [`EventKind`] variant exactly once, at decode time.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Token-transfer tag for a listing-intent event.
pub const WITHDRAW_TAG: &str = "0x3::token::WithdrawEvent";
/// Token-transfer tag for a sale-or-delist-intent event.
pub const DEPOSIT_TAG: &str = "0x3::token::DepositEvent";

/// Marketplace event suffixes that represent a completed sale.
const SALE_SUFFIXES: &[&str] = &[
    "BuyEvent",
    "ListingFilledEvent",
    "AcceptCollectionBidEvent",
    "FillCollectionBidEvent",
    "CollectionOfferFilledEvent",
    "BuyListingEvent",
    "SellEvent",
];

/// Marketplace event suffixes that represent a delisting/cancellation.
const CANCEL_SUFFIXES: &[&str] = &["DelistEvent", "ListingCanceledEvent"];

/// Classification of a raw event type tag, resolved once at ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Token left a wallet: tentative listing.
    Withdraw,
    /// Token entered a wallet: tentative sale or delisting.
    Deposit,
    /// Marketplace fill (genuine sale).
    Fill,
    /// Marketplace delist/cancellation.
    Cancel,
    /// Anything else; the raw tag is kept for logging.
    Unknown(String),
}

impl EventKind {
    pub fn from_tag(tag: &str) -> Self {
        if tag == WITHDRAW_TAG {
            return EventKind::Withdraw;
        }
        if tag == DEPOSIT_TAG {
            return EventKind::Deposit;
        }
        if SALE_SUFFIXES.iter().any(|s| tag.contains(s)) {
            return EventKind::Fill;
        }
        if CANCEL_SUFFIXES.iter().any(|s| tag.contains(s)) {
            return EventKind::Cancel;
        }
        EventKind::Unknown(tag.to_string())
    }

    pub fn is_sale(&self) -> bool {
        matches!(self, EventKind::Fill)
    }

    pub fn is_cancel(&self) -> bool {
        matches!(self, EventKind::Cancel)
    }
}

/// Wire shape of a token activity node from the indexer.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenEventNode {
    pub name: String,
    #[serde(default)]
    pub creator_address: String,
    #[serde(default)]
    pub from_address: Option<String>,
    #[serde(default)]
    pub to_address: Option<String>,
    pub token_data_id_hash: String,
    #[serde(default, deserialize_with = "de_opt_u64")]
    pub transaction_version: Option<u64>,
    pub transfer_type: String,
    #[serde(default)]
    pub transaction_timestamp: String,
}

/// A decoded token transfer event, version guaranteed present.
#[derive(Debug, Clone)]
pub struct TokenEvent {
    pub name: String,
    pub creator_address: String,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub token_data_id_hash: String,
    pub transaction_version: u64,
    pub kind: EventKind,
    /// Unix seconds; 0 when the indexer timestamp was unparsable.
    pub timestamp: i64,
}

/// Decode a raw page into typed events. Nodes without a parsable transaction
/// version cannot key activity records and are dropped with a warning.
pub fn decode_token_events(nodes: Vec<TokenEventNode>) -> Vec<TokenEvent> {
    let mut events = Vec::with_capacity(nodes.len());
    for node in nodes {
        let version = match node.transaction_version {
            Some(v) => v,
            None => {
                log::warn!(
                    "Dropping token event without transaction version: {} ({})",
                    node.name,
                    node.token_data_id_hash
                );
                continue;
            }
        };

        events.push(TokenEvent {
            kind: EventKind::from_tag(&node.transfer_type),
            name: node.name,
            creator_address: node.creator_address,
            from_address: node.from_address,
            to_address: node.to_address,
            token_data_id_hash: node.token_data_id_hash,
            transaction_version: version,
            timestamp: parse_chain_timestamp(&node.transaction_timestamp).unwrap_or(0),
        });
    }
    events
}

/// Wire shape of a marketplace event (price queries and volume scans).
#[derive(Debug, Clone, Deserialize)]
pub struct MarketplaceEventNode {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, deserialize_with = "de_opt_u64")]
    pub transaction_version: Option<u64>,
}

impl MarketplaceEventNode {
    pub fn kind(&self) -> EventKind {
        EventKind::from_tag(&self.event_type)
    }

    /// Raw price in octas under the marketplace-specific field, if present
    /// and numeric. Accepts both JSON numbers and numeric strings.
    pub fn price_octas(&self, price_field: &str) -> Option<f64> {
        match self.data.get(price_field)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Creator address, collection name and token name, read from either of
    /// the two payload shapes the marketplaces emit.
    pub fn token_identity(&self) -> Option<TokenIdentity> {
        if let Some(meta) = self.data.get("token_metadata") {
            return Some(TokenIdentity {
                creator_address: str_field(meta, "creator_address")?,
                collection_name: str_field(meta, "collection_name")?,
                token_name: str_field(meta, "token_name").unwrap_or_default(),
            });
        }
        let id = self.data.get("token_id")?.get("token_data_id")?;
        Some(TokenIdentity {
            creator_address: str_field(id, "creator")?,
            collection_name: str_field(id, "collection")?,
            token_name: str_field(id, "name").unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct TokenIdentity {
    pub creator_address: String,
    pub collection_name: String,
    pub token_name: String,
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key)?.as_str().map(|s| s.to_string())
}

/// The indexer emits naive UTC timestamps like `2023-08-01T01:02:03.456`.
pub fn parse_chain_timestamp(raw: &str) -> Option<i64> {
    if raw.is_empty() {
        return None;
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

/// Accepts bigint versions serialized as either numbers or strings.
fn de_opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse::<u64>().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_kind_lookup() {
        assert_eq!(EventKind::from_tag(WITHDRAW_TAG), EventKind::Withdraw);
        assert_eq!(EventKind::from_tag(DEPOSIT_TAG), EventKind::Deposit);
        assert_eq!(
            EventKind::from_tag("0xabc::marketplace::BuyListingEvent"),
            EventKind::Fill
        );
        assert_eq!(
            EventKind::from_tag("0xabc::marketplace::ListingCanceledEvent"),
            EventKind::Cancel
        );
        assert_eq!(
            EventKind::from_tag("0x1::coin::DepositEvent"),
            EventKind::Unknown("0x1::coin::DepositEvent".to_string())
        );
    }

    #[test]
    fn test_decode_drops_versionless_nodes() {
        let nodes = vec![
            TokenEventNode {
                name: "Ape #1".to_string(),
                creator_address: "0xc".to_string(),
                from_address: Some("0xa".to_string()),
                to_address: None,
                token_data_id_hash: "hash1".to_string(),
                transaction_version: Some(100),
                transfer_type: WITHDRAW_TAG.to_string(),
                transaction_timestamp: "2023-08-01T01:02:03".to_string(),
            },
            TokenEventNode {
                name: "Ape #2".to_string(),
                creator_address: "0xc".to_string(),
                from_address: None,
                to_address: None,
                token_data_id_hash: "hash2".to_string(),
                transaction_version: None,
                transfer_type: DEPOSIT_TAG.to_string(),
                transaction_timestamp: String::new(),
            },
        ];

        let events = decode_token_events(nodes);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].transaction_version, 100);
        assert_eq!(events[0].kind, EventKind::Withdraw);
        assert!(events[0].timestamp > 0);
    }

    #[test]
    fn test_price_octas_accepts_number_and_string() {
        let node: MarketplaceEventNode = serde_json::from_value(json!({
            "type": "0xm::events::BuyEvent",
            "data": { "price": "150000000" },
            "transaction_version": "42"
        }))
        .unwrap();
        assert_eq!(node.price_octas("price"), Some(150_000_000.0));
        assert_eq!(node.transaction_version, Some(42));

        let node: MarketplaceEventNode = serde_json::from_value(json!({
            "type": "0xm::events::BuyEvent",
            "data": { "price": 75000000 }
        }))
        .unwrap();
        assert_eq!(node.price_octas("price"), Some(75_000_000.0));
        assert_eq!(node.price_octas("amount"), None);
    }

    #[test]
    fn test_token_identity_both_shapes() {
        let meta: MarketplaceEventNode = serde_json::from_value(json!({
            "type": "0xm::events::BuyEvent",
            "data": { "token_metadata": {
                "creator_address": "0xc1",
                "collection_name": "Apes",
                "token_name": "Ape #9"
            }}
        }))
        .unwrap();
        let id = meta.token_identity().unwrap();
        assert_eq!(id.creator_address, "0xc1");
        assert_eq!(id.token_name, "Ape #9");

        let token_id: MarketplaceEventNode = serde_json::from_value(json!({
            "type": "0xm::events::SellEvent",
            "data": { "token_id": { "token_data_id": {
                "creator": "0xc2",
                "collection": "Birds",
                "name": "Bird #3"
            }}}
        }))
        .unwrap();
        let id = token_id.token_identity().unwrap();
        assert_eq!(id.creator_address, "0xc2");
        assert_eq!(id.collection_name, "Birds");
    }

    #[test]
    fn test_parse_chain_timestamp() {
        assert!(parse_chain_timestamp("2023-08-01T01:02:03").is_some());
        assert!(parse_chain_timestamp("2023-08-01T01:02:03.123456").is_some());
        assert!(parse_chain_timestamp("not a time").is_none());
        assert!(parse_chain_timestamp("").is_none());
    }
}
