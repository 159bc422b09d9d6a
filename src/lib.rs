//! Aptos NFT marketplace reconciliation engine
//!
//! Ingests already-indexed on-chain token events, reconciles them against a
//! persisted catalog of tracked collections, and maintains derived state:
//! active listings, sales activity history and rolled-up collection stats
//! (floor price, 24h volume, owner counts).
//!
//! The crate is the single writer for its catalog database. Each top-level
//! job in [`jobs`] is independently schedulable and safe to re-run after a
//! failure: progress is checkpointed through per-collection watermarks and
//! idempotent upserts.

pub mod classifier;
pub mod config;
pub mod discovery;
pub mod enrich;
pub mod error;
pub mod events;
pub mod indexer;
pub mod jobs;
pub mod price;
pub mod stats;
pub mod store;
pub mod sync;
pub mod wallet;
