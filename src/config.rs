//! Runtime configuration and the supported-marketplace registry.

use std::env;

use crate::error::SyncError;

/// On-chain price divisor: 10^8 octas per APT.
pub const OCTAS_PER_APT: f64 = 100_000_000.0;

/// Chain tag stamped on every catalog record.
pub const CHAIN: &str = "aptos";

/// Genesis watermark for brand-new collections with no saved version.
pub const DEFAULT_START_VERSION: u64 = 250_000_000;

/// Events fetched per page during steady-state sync.
pub const STEADY_PAGE_SIZE: usize = 65;

/// Events fetched per page while catching a new collection up.
pub const CATCH_UP_PAGE_SIZE: usize = 100;

/// Maximum pages fetched per catch-up run.
pub const CATCH_UP_MAX_PAGES: usize = 2;

/// A catch-up run that sees fewer events than this has exhausted the
/// collection's history.
pub const CATCH_UP_DONE_THRESHOLD: usize = 200;

/// Collections pulled per catalog page during steady-state sync.
pub const COLLECTIONS_PER_PAGE: usize = 10;

/// Catalog pages walked per steady-state run.
pub const STEADY_PAGES_PER_RUN: usize = 2;

/// Most-recent activities scanned when computing 24h stats.
pub const ACTIVITY_SCAN_LIMIT: usize = 200;

/// Collections refreshed per stats run.
pub const STATS_COLLECTION_LIMIT: usize = 500;

/// New collections admitted per discovery run.
pub const DISCOVERY_TOP_COUNT: usize = 5;

/// Gallery images seeded on a newly discovered collection.
pub const GALLERY_SIZE: usize = 9;

/// NFTs fetched per page when walking a wallet's holdings.
pub const WALLET_PAGE_SIZE: usize = 50;

/// Attempts per wallet page before the portfolio query gives up.
pub const WALLET_FETCH_RETRIES: u32 = 3;

/// An NFT marketplace whose events carry prices we can resolve.
///
/// `price_field` is the marketplace-specific key inside the event payload;
/// `volume_pages` is how many backward pages discovery scans for it.
pub struct Marketplace {
    pub name: &'static str,
    pub contract_address: &'static str,
    pub price_field: &'static str,
    pub volume_pages: usize,
}

/// Fixed priority order: price resolution queries these in sequence and the
/// first genuine hit wins.
pub const SUPPORTED_MARKETPLACES: &[Marketplace] = &[
    Marketplace {
        name: "topaz",
        contract_address: "0x2c7bccf7b31baf770fdbcc768d9e9cb3d87805e255355df5db32ac9a669010a2",
        price_field: "price",
        volume_pages: 10,
    },
    Marketplace {
        name: "wapal",
        contract_address: "0x80d0084f99070c5cdb4b01b695f2a8b44017e41abf4a78c2487d3b52b5a4ae37",
        price_field: "price",
        volume_pages: 1,
    },
    Marketplace {
        name: "bluemove",
        contract_address: "0xd1fd99c1944b84d1670a2536417e997864ad12303d19eac725891691b04d614e",
        price_field: "amount",
        volume_pages: 1,
    },
    Marketplace {
        name: "mercato",
        contract_address: "0x7ccf0e6e871977c354c331aa0fccdffb562d9fceb27e3d7f61f8e12e470358e9",
        price_field: "price",
        volume_pages: 1,
    },
];

/// Retry settings for best-effort metadata fetches. Event queries never
/// retry inside the adapter; a failed page aborts the collection for the run.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay_secs: 0,
            max_delay_secs: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub indexer_url: String,
    pub rates_url: String,
    pub db_path: String,
    pub http_timeout_secs: u64,
    pub metadata_retry: RetryPolicy,
    pub sync_interval_secs: u64,
    pub catch_up_interval_secs: u64,
    pub stats_interval_secs: u64,
    pub owners_interval_secs: u64,
    pub discovery_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, SyncError> {
        let indexer_url = env::var("APTOS_INDEXER_URL")
            .unwrap_or_else(|_| "https://indexer.mainnet.aptoslabs.com/v1/graphql".to_string());

        if !indexer_url.starts_with("http://") && !indexer_url.starts_with("https://") {
            return Err(SyncError::Config(
                "APTOS_INDEXER_URL must start with http:// or https://".to_string(),
            ));
        }

        let rates_url = env::var("RATES_URL")
            .unwrap_or_else(|_| "https://api.coingecko.com/api/v3".to_string());

        let db_path = env::var("APTFLOW_DB_PATH").unwrap_or_else(|_| "aptflow.db".to_string());

        let http_timeout_secs = env::var("HTTP_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<u64>()
            .unwrap_or(10);

        let metadata_retry = RetryPolicy {
            max_retries: env::var("METADATA_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse::<u32>()
                .unwrap_or(3),
            initial_delay_secs: env::var("METADATA_RETRY_DELAY_SECS")
                .unwrap_or_else(|_| "1".to_string())
                .parse::<u64>()
                .unwrap_or(1),
            max_delay_secs: env::var("METADATA_RETRY_MAX_DELAY_SECS")
                .unwrap_or_else(|_| "8".to_string())
                .parse::<u64>()
                .unwrap_or(8),
        };

        let sync_interval_secs = interval_from_env("SYNC_INTERVAL_SECS", 600);
        let catch_up_interval_secs = interval_from_env("CATCH_UP_INTERVAL_SECS", 600);
        let stats_interval_secs = interval_from_env("STATS_INTERVAL_SECS", 600);
        let owners_interval_secs = interval_from_env("OWNERS_INTERVAL_SECS", 7200);
        let discovery_interval_secs = interval_from_env("DISCOVERY_INTERVAL_SECS", 86400);

        Ok(Self {
            indexer_url,
            rates_url,
            db_path,
            http_timeout_secs,
            metadata_retry,
            sync_interval_secs,
            catch_up_interval_secs,
            stats_interval_secs,
            owners_interval_secs,
            discovery_interval_secs,
        })
    }
}

fn interval_from_env(var: &str, default: u64) -> u64 {
    env::var(var)
        .unwrap_or_else(|_| default.to_string())
        .parse::<u64>()
        .unwrap_or(default)
}
