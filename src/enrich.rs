//! Best-effort metadata enrichment: token images and fiat conversion rates.
//!
//! Nothing here may fail a sync run. Every helper degrades to `None` (or a
//! rate-less [`ConversionRates`]) and logs, because a missing image or a
//! stale rate is cosmetic while a dropped listing is not.

use serde::Deserialize;
use serde_json::Value;

use crate::indexer::EventSource;

/// Public IPFS gateways reject raw `ipfs://` URIs.
pub fn rewrite_ipfs(uri: &str) -> String {
    match uri.strip_prefix("ipfs://") {
        Some(path) => format!("https://ipfs.io/ipfs/{}", path),
        None => uri.to_string(),
    }
}

/// Fetches a token metadata JSON document and pulls its `image` field.
pub async fn fetch_image_from_uri(http: &reqwest::Client, metadata_uri: &str) -> Option<String> {
    let url = rewrite_ipfs(metadata_uri);
    let response = match http.get(&url).send().await {
        Ok(r) => r,
        Err(err) => {
            log::debug!("Metadata fetch failed for {}: {}", url, err);
            return None;
        }
    };
    if !response.status().is_success() {
        log::debug!("Metadata fetch for {} returned {}", url, response.status());
        return None;
    }
    let doc: Value = match response.json().await {
        Ok(v) => v,
        Err(err) => {
            log::debug!("Metadata at {} is not JSON: {}", url, err);
            return None;
        }
    };
    doc.get("image")
        .and_then(|v| v.as_str())
        .map(|s| rewrite_ipfs(s))
}

/// Resolves a token hash to its image URL via the indexer and the token's
/// metadata document. Both hops are best effort.
pub async fn fetch_nft_image(
    source: &dyn EventSource,
    http: &reqwest::Client,
    token_data_id_hash: &str,
) -> Option<String> {
    let metadata_uri = match source.fetch_token_metadata_uri(token_data_id_hash).await {
        Ok(Some(uri)) if !uri.is_empty() => uri,
        Ok(_) => return None,
        Err(err) => {
            log::debug!("Token metadata URI lookup failed for {}: {}", token_data_id_hash, err);
            return None;
        }
    };
    fetch_image_from_uri(http, &metadata_uri).await
}

/// APT conversion rates for stats denomination. `None` fields mean the rate
/// provider was unreachable; stats fall back to zero for those projections.
#[derive(Debug, Clone, Default)]
pub struct ConversionRates {
    pub usd: Option<f64>,
    pub eth: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RatesResponse {
    aptos: Option<RateEntry>,
}

#[derive(Debug, Deserialize)]
struct RateEntry {
    usd: Option<f64>,
    eth: Option<f64>,
}

pub async fn fetch_conversion_rates(http: &reqwest::Client, rates_url: &str) -> ConversionRates {
    let url = format!("{}/simple/price?ids=aptos&vs_currencies=usd,eth", rates_url);
    let response = match http.get(&url).send().await {
        Ok(r) => r,
        Err(err) => {
            log::warn!("Rate fetch failed: {}", err);
            return ConversionRates::default();
        }
    };
    if !response.status().is_success() {
        log::warn!("Rate provider returned {}", response.status());
        return ConversionRates::default();
    }
    match response.json::<RatesResponse>().await {
        Ok(rates) => {
            let entry = rates.aptos.unwrap_or(RateEntry {
                usd: None,
                eth: None,
            });
            ConversionRates {
                usd: entry.usd,
                eth: entry.eth,
            }
        }
        Err(err) => {
            log::warn!("Rate response decode failed: {}", err);
            ConversionRates::default()
        }
    }
}
