//! Event Source Adapter: typed fetch operations against the Aptos indexer
//! GraphQL API.
//!
//! The adapter never retries event queries; a failed page surfaces as a
//! transport error and the caller skips the collection for the run. Retries
//! exist only for best-effort metadata fetches and are driven by an explicit
//! [`RetryPolicy`], not embedded control flow.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::RetryPolicy;
use crate::error::SyncError;
use crate::events::{decode_token_events, MarketplaceEventNode, TokenEvent, TokenEventNode};

/// Collection-level metadata used to seed newly discovered collections.
#[derive(Debug, Clone)]
pub struct CollectionMetadata {
    pub supply: u64,
    pub description: String,
    pub collection_metadata_uri: String,
    /// Per-token metadata URIs, used to build the gallery.
    pub token_metadata_uris: Vec<String>,
}

/// One NFT currently held by a wallet, from the ownership view.
#[derive(Debug, Clone, Deserialize)]
pub struct WalletNftNode {
    #[serde(default)]
    pub amount: u64,
    #[serde(default)]
    pub current_token_data: Option<WalletTokenData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletTokenData {
    #[serde(default)]
    pub token_name: String,
    #[serde(default)]
    pub token_uri: String,
    #[serde(default)]
    pub token_data_id: String,
    #[serde(default)]
    pub current_collection: Option<WalletTokenCollection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletTokenCollection {
    #[serde(default)]
    pub collection_name: String,
    #[serde(default)]
    pub creator_address: String,
}

/// Read-only boundary to the indexed event feed.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Token transfer events for a creator address strictly after
    /// `after_version`, ordered by timestamp ascending, at most `page_size`.
    async fn fetch_token_events(
        &self,
        creator_address: &str,
        after_version: u64,
        page_size: usize,
    ) -> Result<Vec<TokenEvent>, SyncError>;

    /// All events a marketplace contract emitted at an exact transaction
    /// version. Used by price resolution.
    async fn fetch_marketplace_events_at(
        &self,
        marketplace_address: &str,
        version: u64,
    ) -> Result<Vec<MarketplaceEventNode>, SyncError>;

    /// Latest page of a marketplace's events, paginating backwards by
    /// version. `None` starts from the newest. Used by discovery.
    async fn fetch_marketplace_events_before(
        &self,
        marketplace_address: &str,
        before_version: Option<u64>,
    ) -> Result<Vec<MarketplaceEventNode>, SyncError>;

    /// Collection supply/description/metadata URIs for a creator address.
    async fn fetch_collection_metadata(
        &self,
        creator_address: &str,
    ) -> Result<Option<CollectionMetadata>, SyncError>;

    /// Distinct owner count for a collection.
    async fn fetch_unique_owners(&self, creator_address: &str) -> Result<Option<u64>, SyncError>;

    /// Metadata URI of a single token, for image lookup.
    async fn fetch_token_metadata_uri(
        &self,
        token_data_id_hash: &str,
    ) -> Result<Option<String>, SyncError>;

    /// One page of NFTs currently held by a wallet, `limit` rows starting
    /// at `offset`.
    async fn fetch_wallet_nfts(
        &self,
        owner_address: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<WalletNftNode>, SyncError>;
}

/// GraphQL client for the Aptos indexer.
pub struct IndexerClient {
    http: reqwest::Client,
    url: String,
    metadata_retry: RetryPolicy,
}

impl IndexerClient {
    pub fn new(
        url: String,
        timeout_secs: u64,
        metadata_retry: RetryPolicy,
    ) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            http,
            url,
            metadata_retry,
        })
    }

    async fn post_query<T: DeserializeOwned>(&self, query: String) -> Result<T, SyncError> {
        let body = json!({
            "query": query,
            "operationName": "MyQuery",
            "variables": {},
        });

        let response = self.http.post(&self.url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(SyncError::Transport(format!(
                "indexer returned {}",
                response.status()
            )));
        }

        let envelope: GraphQlResponse<T> = response
            .json()
            .await
            .map_err(|e| SyncError::Decode(e.to_string()))?;

        if let Some(errors) = envelope.errors {
            return Err(SyncError::Transport(format!(
                "indexer query errors: {}",
                errors
            )));
        }

        envelope
            .data
            .ok_or_else(|| SyncError::Decode("indexer response missing data".to_string()))
    }
}

#[async_trait]
impl EventSource for IndexerClient {
    async fn fetch_token_events(
        &self,
        creator_address: &str,
        after_version: u64,
        page_size: usize,
    ) -> Result<Vec<TokenEvent>, SyncError> {
        let query = format!(
            r#"query MyQuery {{
  token_activities_aggregate(
    order_by: {{transaction_timestamp: asc}}
    where: {{creator_address: {{_eq: "{creator_address}"}}, _and: {{transaction_version: {{_gt: "{after_version}"}}}}}}
    limit: {page_size}
  ) {{
    nodes {{
      creator_address
      from_address
      to_address
      token_data_id_hash
      transaction_version
      transfer_type
      transaction_timestamp
      name
    }}
  }}
}}"#
        );

        let data: TokenActivitiesData = self.post_query(query).await?;
        Ok(decode_token_events(data.token_activities_aggregate.nodes))
    }

    async fn fetch_marketplace_events_at(
        &self,
        marketplace_address: &str,
        version: u64,
    ) -> Result<Vec<MarketplaceEventNode>, SyncError> {
        let query = format!(
            r#"query MyQuery {{
  events(
    where: {{account_address: {{_eq: "{marketplace_address}"}}, transaction_version: {{_eq: "{version}"}}}}
  ) {{
    data
    type
  }}
}}"#
        );

        let data: EventsData = self.post_query(query).await?;
        Ok(data.events)
    }

    async fn fetch_marketplace_events_before(
        &self,
        marketplace_address: &str,
        before_version: Option<u64>,
    ) -> Result<Vec<MarketplaceEventNode>, SyncError> {
        let version_clause = match before_version {
            Some(v) => format!(r#", _and: {{transaction_version: {{_lt: "{v}"}}}}"#),
            None => String::new(),
        };
        let query = format!(
            r#"query MyQuery {{
  events(
    where: {{account_address: {{_eq: "{marketplace_address}"}}{version_clause}}}
    order_by: {{transaction_version: desc}}
    limit: 100
  ) {{
    data
    type
    transaction_version
  }}
}}"#
        );

        let data: EventsData = self.post_query(query).await?;
        Ok(data.events)
    }

    async fn fetch_collection_metadata(
        &self,
        creator_address: &str,
    ) -> Result<Option<CollectionMetadata>, SyncError> {
        let query = format!(
            r#"query MyQuery {{
  current_token_datas(
    where: {{creator_address: {{_eq: "{creator_address}"}}}}
    limit: 9
  ) {{
    current_collection_data {{
      description
      supply
      metadata_uri
    }}
    metadata_uri
    token_data_id_hash
  }}
}}"#
        );

        let mut backoff = Backoff::new(self.metadata_retry);
        loop {
            match self.post_query::<CurrentTokenDatasData>(query.clone()).await {
                Ok(data) => {
                    let Some(first) = data.current_token_datas.first() else {
                        return Ok(None);
                    };
                    let collection = &first.current_collection_data;
                    return Ok(Some(CollectionMetadata {
                        supply: collection.supply.unwrap_or(0),
                        description: collection.description.clone().unwrap_or_default(),
                        collection_metadata_uri: collection.metadata_uri.clone().unwrap_or_default(),
                        token_metadata_uris: data
                            .current_token_datas
                            .iter()
                            .filter_map(|t| t.metadata_uri.clone())
                            .collect(),
                    }));
                }
                Err(err) => {
                    if !backoff.wait().await {
                        return Err(err);
                    }
                    log::warn!(
                        "Retrying collection metadata fetch for {}: {}",
                        creator_address,
                        err
                    );
                }
            }
        }
    }

    async fn fetch_unique_owners(&self, creator_address: &str) -> Result<Option<u64>, SyncError> {
        let query = format!(
            r#"query MyQuery {{
  current_collection_ownership_v2_view_aggregate(
    where: {{creator_address: {{_eq: "{creator_address}"}}}}
  ) {{
    aggregate {{
      count(distinct: true)
    }}
  }}
}}"#
        );

        let data: OwnershipAggregateData = self.post_query(query).await?;
        Ok(data
            .current_collection_ownership_v2_view_aggregate
            .aggregate
            .map(|a| a.count))
    }

    async fn fetch_token_metadata_uri(
        &self,
        token_data_id_hash: &str,
    ) -> Result<Option<String>, SyncError> {
        let query = format!(
            r#"query MyQuery {{
  token_datas(
    where: {{token_data_id_hash: {{_eq: "{token_data_id_hash}"}}}}
  ) {{
    metadata_uri
  }}
}}"#
        );

        let data: TokenDatasData = self.post_query(query).await?;
        Ok(data.token_datas.into_iter().next().map(|t| t.metadata_uri))
    }

    async fn fetch_wallet_nfts(
        &self,
        owner_address: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<WalletNftNode>, SyncError> {
        let query = format!(
            r#"query MyQuery {{
  current_token_ownerships_v2(
    where: {{owner_address: {{_eq: "{owner_address}"}}}}
    limit: {limit}
    offset: {offset}
  ) {{
    amount
    current_token_data {{
      token_name
      token_uri
      token_data_id
      current_collection {{
        collection_name
        creator_address
      }}
    }}
  }}
}}"#
        );

        let data: WalletNftsData = self.post_query(query).await?;
        Ok(data.current_token_ownerships_v2)
    }
}

/// Exponential backoff over an explicit policy; `wait` returns false once
/// the attempts are exhausted.
struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
}

impl Backoff {
    fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    async fn wait(&mut self) -> bool {
        if self.attempt >= self.policy.max_retries {
            return false;
        }
        let delay = std::cmp::min(
            self.policy.initial_delay_secs * 2_u64.pow(self.attempt),
            self.policy.max_delay_secs,
        );
        sleep(Duration::from_secs(delay)).await;
        self.attempt += 1;
        true
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    errors: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TokenActivitiesData {
    token_activities_aggregate: TokenActivitiesAggregate,
}

#[derive(Debug, Deserialize)]
struct TokenActivitiesAggregate {
    nodes: Vec<TokenEventNode>,
}

#[derive(Debug, Deserialize)]
struct EventsData {
    events: Vec<MarketplaceEventNode>,
}

#[derive(Debug, Deserialize)]
struct CurrentTokenDatasData {
    current_token_datas: Vec<CurrentTokenData>,
}

#[derive(Debug, Deserialize)]
struct CurrentTokenData {
    current_collection_data: CurrentCollectionData,
    #[serde(default)]
    metadata_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CurrentCollectionData {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    supply: Option<u64>,
    #[serde(default)]
    metadata_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OwnershipAggregateData {
    current_collection_ownership_v2_view_aggregate: OwnershipAggregate,
}

#[derive(Debug, Deserialize)]
struct OwnershipAggregate {
    aggregate: Option<OwnershipCount>,
}

#[derive(Debug, Deserialize)]
struct OwnershipCount {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct TokenDatasData {
    token_datas: Vec<TokenDataUri>,
}

#[derive(Debug, Deserialize)]
struct WalletNftsData {
    current_token_ownerships_v2: Vec<WalletNftNode>,
}

#[derive(Debug, Deserialize)]
struct TokenDataUri {
    metadata_uri: String,
}
