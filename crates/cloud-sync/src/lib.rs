//! Cloud sync for Solarsync.
//!
//! Holds the Supabase client (upsert RPC, incremental pull, time authority
//! and blob storage) and the engine that drives push, pull and the
//! clock-integrity gate against a [`LocalSyncStore`](solarsync_core::sync::LocalSyncStore).

mod client;
mod config;
mod engine;
mod error;
mod types;

pub use client::SupabaseSyncClient;
pub use config::{
    CloudSyncConfig, DEFAULT_BLOB_BUCKET, DEFAULT_PULL_PAGE_SIZE, DEFAULT_TIMEOUT_SECS,
};
pub use engine::*;
pub use error::{CloudSyncError, Result};
pub use types::*;
