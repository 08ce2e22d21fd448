//! Supabase client for the sync RPCs, incremental pulls and blob storage.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use serde_json::Value;

use solarsync_core::sync::{format_timestamp, parse_timestamp, BlobUploader, SyncTransport, WirePayload};
use solarsync_core::SyncError;

use crate::config::CloudSyncConfig;
use crate::error::{CloudSyncError, Result};
use crate::types::*;

const MAX_LOG_BODY_CHARS: usize = 512;
const UPSERT_RPC: &str = "rpc/sync_apply_and_pull";
const SERVER_TIME_RPC: &str = "rpc/get_server_utc";
const BLOB_CACHE_CONTROL: &str = "3600";

/// Authenticated handle on the remote store.
///
/// Every request carries the anon key as `apikey`. The bearer is the acting
/// session's JWT when one is set, otherwise the anon key itself.
#[derive(Debug)]
pub struct SupabaseSyncClient {
    client: reqwest::Client,
    config: CloudSyncConfig,
    access_token: RwLock<Option<String>>,
}

impl SupabaseSyncClient {
    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("[Supabase] Response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[Supabase] Response error ({}): {}", status, preview);
    }

    pub fn new(config: CloudSyncConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            config,
            access_token: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &CloudSyncConfig {
        &self.config
    }

    fn bearer(&self) -> String {
        let token = match self.access_token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        token.unwrap_or_else(|| self.config.api_key.clone())
    }

    fn headers(&self, content_type: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let content_type = HeaderValue::from_str(content_type)
            .map_err(|_| CloudSyncError::invalid_request("Invalid content type"))?;
        headers.insert(CONTENT_TYPE, content_type);

        let api_key = HeaderValue::from_str(&self.config.api_key)
            .map_err(|_| CloudSyncError::auth("Invalid API key format"))?;
        headers.insert("apikey", api_key);

        let auth_value = HeaderValue::from_str(&format!("Bearer {}", self.bearer()))
            .map_err(|_| CloudSyncError::auth("Invalid access token format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        Ok(headers)
    }

    fn error_message(body: &str) -> String {
        // Storage errors carry an `error` tag; PostgREST errors never do.
        if let Some(message) = serde_json::from_str::<StorageErrorResponse>(body)
            .ok()
            .filter(|error| error.error.is_some())
            .and_then(|error| error.describe())
        {
            return message;
        }
        if let Ok(error) = serde_json::from_str::<PostgrestErrorResponse>(body) {
            return error.describe();
        }
        format!("Request failed: {}", body)
    }

    /// Reads the body, turning a non-success status into [`CloudSyncError::Api`].
    async fn read_body(response: reqwest::Response) -> Result<String> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            return Err(CloudSyncError::api(status.as_u16(), Self::error_message(&body)));
        }
        Ok(body)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = Self::read_body(response).await?;
        serde_json::from_str(&body).map_err(|e| {
            error!(
                "[Supabase] Failed to deserialize response. Body: {}, Error: {}",
                body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>(),
                e
            );
            CloudSyncError::api(status.as_u16(), format!("Failed to parse response: {}", e))
        })
    }

    fn check_collection(collection: &str) -> Result<()> {
        let valid = !collection.is_empty()
            && collection
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_');
        if valid {
            Ok(())
        } else {
            Err(CloudSyncError::invalid_request(format!(
                "Invalid collection name '{}'",
                collection
            )))
        }
    }

    fn encode_object_path(path: &str) -> Result<String> {
        let segments = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>();
        if segments.is_empty() || segments.iter().any(|s| *s == "." || *s == "..") {
            return Err(CloudSyncError::invalid_request(format!(
                "Invalid object path '{}'",
                path
            )));
        }
        Ok(segments
            .iter()
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/"))
    }

    /// Upserts a batch through the apply RPC and returns the records the
    /// remote side reports as applied.
    ///
    /// POST /rest/v1/rpc/sync_apply_and_pull
    pub async fn apply_batch(
        &self,
        collection: &str,
        records: &[WirePayload],
    ) -> Result<Vec<WirePayload>> {
        Self::check_collection(collection)?;
        let url = self.config.rest_url(UPSERT_RPC);
        debug!("[Supabase] Upserting {} records into {}", records.len(), collection);

        let response = self
            .client
            .post(&url)
            .headers(self.headers("application/json")?)
            .json(&UpsertRequest {
                p_table_name: collection,
                p_records: records,
            })
            .send()
            .await?;

        let applied: Value = Self::parse_response(response).await?;
        match applied {
            Value::Null => Ok(Vec::new()),
            Value::Array(items) => Ok(items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect()),
            // A bare object is an error report, even under a 2xx status.
            Value::Object(map) => {
                let body = Value::Object(map).to_string();
                error!("[Supabase] Upsert into {} answered with an error: {}", collection, body);
                Err(CloudSyncError::api(200, Self::error_message(&body)))
            }
            other => Err(CloudSyncError::api(
                200,
                format!("Unexpected upsert response: {}", other),
            )),
        }
    }

    /// Records of `collection` updated strictly after `since`, oldest first.
    ///
    /// GET /rest/v1/{collection}?updated_at=gt.{since}&order=updated_at.asc,id.asc
    ///
    /// The server silently caps each response at its `max-rows`, so pages are
    /// requested until one comes back empty.
    pub async fn fetch_changes(
        &self,
        collection: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<WirePayload>> {
        Self::check_collection(collection)?;
        let base = format!(
            "{}?select=*&updated_at=gt.{}&order=updated_at.asc,id.asc",
            self.config.rest_url(collection),
            urlencoding::encode(&format_timestamp(since))
        );

        let mut records = Vec::new();
        loop {
            let url = format!(
                "{}&limit={}&offset={}",
                base,
                self.config.pull_page_size,
                records.len()
            );
            debug!("[Supabase] Pull URL: {}", url);

            let response = self
                .client
                .get(&url)
                .headers(self.headers("application/json")?)
                .send()
                .await?;
            let page: Vec<WirePayload> = Self::parse_response(response).await?;
            if page.is_empty() {
                break;
            }
            records.extend(page);
        }
        Ok(records)
    }

    /// POST /rest/v1/rpc/get_server_utc
    pub async fn fetch_server_time(&self) -> Result<DateTime<Utc>> {
        let url = self.config.rest_url(SERVER_TIME_RPC);
        let response = self
            .client
            .post(&url)
            .headers(self.headers("application/json")?)
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let time: ServerTimeResponse = Self::parse_response(response).await?;
        parse_timestamp(time.as_str()).ok_or_else(|| {
            CloudSyncError::api(200, format!("Unreadable server time '{}'", time.as_str()))
        })
    }

    /// Uploads (upserting) an object and returns its public URL.
    ///
    /// POST /storage/v1/object/{bucket}/{path}
    pub async fn upload_object(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String> {
        let object_path = Self::encode_object_path(path)?;
        let url = self.config.upload_url(bucket, &object_path);
        debug!(
            "[Supabase] Uploading {} bytes to {}/{}",
            bytes.len(),
            bucket,
            object_path
        );

        let mut headers = self.headers(content_type)?;
        headers.insert("x-upsert", HeaderValue::from_static("true"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static(BLOB_CACHE_CONTROL));

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .body(bytes)
            .send()
            .await?;

        let body = Self::read_body(response).await?;
        if let Ok(ack) = serde_json::from_str::<UploadResponse>(&body) {
            debug!("[Supabase] Stored object {:?}", ack.key);
        }
        Ok(self.config.public_url(bucket, &object_path))
    }
}

#[async_trait]
impl SyncTransport for SupabaseSyncClient {
    fn set_access_token(&self, token: Option<String>) {
        let token = token.filter(|value| !value.trim().is_empty());
        match self.access_token.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }

    async fn upsert_batch(
        &self,
        collection: &str,
        records: Vec<WirePayload>,
    ) -> std::result::Result<Vec<WirePayload>, SyncError> {
        self.apply_batch(collection, &records)
            .await
            .map_err(SyncError::from)
    }

    async fn pull_changes(
        &self,
        collection: &str,
        since: DateTime<Utc>,
    ) -> std::result::Result<Vec<WirePayload>, SyncError> {
        self.fetch_changes(collection, since)
            .await
            .map_err(SyncError::from)
    }

    async fn server_time(&self) -> std::result::Result<DateTime<Utc>, SyncError> {
        self.fetch_server_time()
            .await
            .map_err(|e| SyncError::ClockAuthorityUnavailable(e.to_string()))
    }
}

#[async_trait]
impl BlobUploader for SupabaseSyncClient {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> std::result::Result<String, SyncError> {
        self.upload_object(bucket, path, bytes, content_type)
            .await
            .map_err(CloudSyncError::into_blob_error)
    }
}
