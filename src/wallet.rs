//! Wallet portfolio query.
//!
//! Pages a wallet's on-chain NFT holdings from the indexer, merges them with
//! the wallet's stored listings (a listed token sits in escrow, not in the
//! wallet), and rolls the result up into per-collection counts plus a flat
//! gallery. A library-level read; nothing here writes to the catalog.

use std::sync::Arc;

use crate::config::{CHAIN, WALLET_FETCH_RETRIES, WALLET_PAGE_SIZE};
use crate::discovery::make_slug;
use crate::enrich::{fetch_image_from_uri, rewrite_ipfs};
use crate::error::SyncError;
use crate::indexer::{EventSource, WalletNftNode};
use crate::store::CatalogStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListStatus {
    Listed,
    Unlisted,
}

/// One NFT in the wallet, listed or held.
#[derive(Debug, Clone)]
pub struct WalletGalleryItem {
    pub slug: String,
    pub name: String,
    pub image_url: Option<String>,
    pub mint_address: String,
    pub status: ListStatus,
}

/// Per-collection rollup of the wallet's holdings.
#[derive(Debug, Clone, PartialEq)]
pub struct WalletCollection {
    pub slug: String,
    pub name: String,
    pub image_url: Option<String>,
    pub owned_asset_count: u64,
    pub chain: String,
}

#[derive(Debug, Default)]
pub struct WalletPortfolio {
    pub collections: Vec<WalletCollection>,
    pub gallery: Vec<WalletGalleryItem>,
}

struct PortfolioItem {
    slug: String,
    collection_name: String,
    token_name: String,
    image_url: Option<String>,
    mint_address: String,
    status: ListStatus,
}

/// Builds the full portfolio for one wallet address.
pub async fn wallet_portfolio(
    source: Arc<dyn EventSource>,
    store: Arc<dyn CatalogStore>,
    http: &reqwest::Client,
    wallet: &str,
) -> Result<WalletPortfolio, SyncError> {
    let on_chain = fetch_all_wallet_nfts(source.as_ref(), wallet).await?;
    let listed = store.listings_by_seller(wallet).await?;
    log::info!(
        "Wallet {}: {} on-chain NFTs, {} listed",
        wallet,
        on_chain.len(),
        listed.len()
    );

    let mut items = Vec::with_capacity(on_chain.len() + listed.len());
    for listing in listed {
        items.push(PortfolioItem {
            slug: listing.slug,
            collection_name: listing.collection_name,
            token_name: listing.token_name,
            image_url: listing.image_url,
            mint_address: listing.token_data_id_hash,
            status: ListStatus::Listed,
        });
    }

    for nft in on_chain {
        let Some(token) = nft.current_token_data else {
            continue;
        };
        if nft.amount == 0 {
            log::debug!("{} has amount 0, no longer held", token.token_name);
            continue;
        }
        let (collection_name, creator_address) = match &token.current_collection {
            Some(c) => (c.collection_name.clone(), c.creator_address.clone()),
            None => (String::new(), String::new()),
        };
        // Tracked collections contribute their canonical slug; anything else
        // gets a derived one so the rollup still groups correctly.
        let slug = match store.get_by_creator(&creator_address).await? {
            Some(collection) => collection.slug,
            None => make_slug(&collection_name),
        };
        let image_url = resolve_token_image(http, &token.token_uri).await;
        items.push(PortfolioItem {
            slug,
            collection_name,
            token_name: token.token_name,
            image_url,
            mint_address: token.token_data_id,
            status: ListStatus::Unlisted,
        });
    }

    Ok(build_portfolio(items))
}

/// Pages through every NFT the wallet holds; a page is retried a few times
/// before the whole query fails.
async fn fetch_all_wallet_nfts(
    source: &dyn EventSource,
    wallet: &str,
) -> Result<Vec<WalletNftNode>, SyncError> {
    let mut all = Vec::new();
    let mut offset = 0usize;
    let mut retries = WALLET_FETCH_RETRIES;

    loop {
        match source.fetch_wallet_nfts(wallet, offset, WALLET_PAGE_SIZE).await {
            Ok(page) => {
                let fetched = page.len();
                offset += fetched;
                all.extend(page);
                if fetched < WALLET_PAGE_SIZE {
                    break;
                }
            }
            Err(err) => {
                retries -= 1;
                if retries == 0 {
                    return Err(err);
                }
                log::warn!(
                    "Retrying wallet NFT page at offset {} for {}: {}",
                    offset,
                    wallet,
                    err
                );
            }
        }
    }
    Ok(all)
}

/// Direct image URIs skip the metadata-document hop.
async fn resolve_token_image(http: &reqwest::Client, token_uri: &str) -> Option<String> {
    if token_uri.is_empty() {
        return None;
    }
    let uri = rewrite_ipfs(token_uri);
    if has_image_extension(&uri) {
        return Some(uri);
    }
    fetch_image_from_uri(http, &uri).await
}

fn has_image_extension(uri: &str) -> bool {
    [".png", ".gif", ".jpg", ".jpeg"]
        .iter()
        .any(|ext| uri.contains(ext))
}

fn build_portfolio(items: Vec<PortfolioItem>) -> WalletPortfolio {
    let mut portfolio = WalletPortfolio::default();

    for item in items {
        let name = if item.token_name.is_empty() {
            item.collection_name.clone()
        } else {
            item.token_name.clone()
        };
        portfolio.gallery.push(WalletGalleryItem {
            slug: item.slug.clone(),
            name,
            image_url: item.image_url.clone(),
            mint_address: item.mint_address,
            status: item.status,
        });

        match portfolio
            .collections
            .iter_mut()
            .find(|c| c.slug == item.slug)
        {
            Some(existing) => existing.owned_asset_count += 1,
            None => portfolio.collections.push(WalletCollection {
                slug: item.slug,
                name: item.collection_name,
                image_url: item.image_url,
                owned_asset_count: 1,
                chain: CHAIN.to_string(),
            }),
        }
    }
    portfolio
}
