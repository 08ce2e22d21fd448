//! Remote endpoint configuration.

use std::time::Duration;

use crate::error::{CloudSyncError, Result};

/// Default timeout for remote calls.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Storage bucket receiving offloaded blobs.
pub const DEFAULT_BLOB_BUCKET: &str = "SSC";
/// Rows requested per pull page. Matches PostgREST's default `max-rows`.
pub const DEFAULT_PULL_PAGE_SIZE: usize = 1000;

const ENV_URL: &str = "SUPABASE_URL";
const ENV_KEY: &str = "SUPABASE_KEY";
const ENV_BUCKET: &str = "SOLARSYNC_BLOB_BUCKET";
const ENV_TIMEOUT: &str = "SOLARSYNC_HTTP_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudSyncConfig {
    pub base_url: String,
    /// Anon/publishable key. Sent as `apikey` and used as the bearer when no
    /// session token is set.
    pub api_key: String,
    pub bucket: String,
    pub timeout: Duration,
    pub pull_page_size: usize,
}

impl CloudSyncConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            bucket: DEFAULT_BLOB_BUCKET.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            pull_page_size: DEFAULT_PULL_PAGE_SIZE,
        }
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_pull_page_size(mut self, size: usize) -> Self {
        self.pull_page_size = size.max(1);
        self
    }

    /// Reads `SUPABASE_URL`, `SUPABASE_KEY` and the optional
    /// `SOLARSYNC_BLOB_BUCKET` / `SOLARSYNC_HTTP_TIMEOUT_SECS` overrides.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or_else(|| CloudSyncError::config(format!("{} is not set", key)))
        };

        let mut config = Self::new(required(ENV_URL)?, required(ENV_KEY)?);
        if let Some(bucket) = lookup(ENV_BUCKET).filter(|value| !value.trim().is_empty()) {
            config = config.with_bucket(bucket.trim());
        }
        if let Some(raw) = lookup(ENV_TIMEOUT) {
            let secs = raw.trim().parse::<u64>().map_err(|_| {
                CloudSyncError::config(format!("{} must be a number of seconds, got '{}'", ENV_TIMEOUT, raw))
            })?;
            config = config.with_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }

    pub fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn upload_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path)
    }

    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base_url, bucket, path)
    }
}
