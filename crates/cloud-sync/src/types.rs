//! Wire types for the Supabase REST and storage APIs.

use serde::{Deserialize, Serialize};
use solarsync_core::sync::WirePayload;

/// Body of the `sync_apply_and_pull` RPC.
#[derive(Debug, Serialize)]
pub struct UpsertRequest<'a> {
    pub p_table_name: &'a str,
    pub p_records: &'a [WirePayload],
}

/// PostgREST error object.
#[derive(Debug, Clone, Deserialize)]
pub struct PostgrestErrorResponse {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl PostgrestErrorResponse {
    pub fn describe(&self) -> String {
        let mut text = match &self.code {
            Some(code) => format!("{}: {}", code, self.message),
            None => self.message.clone(),
        };
        if let Some(details) = self.details.as_deref().filter(|d| !d.is_empty()) {
            text.push_str(&format!(" ({})", details));
        }
        if let Some(hint) = self.hint.as_deref().filter(|h| !h.is_empty()) {
            text.push_str(&format!(" hint: {}", hint));
        }
        text
    }
}

/// Storage API error object.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageErrorResponse {
    #[serde(default)]
    pub status_code: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl StorageErrorResponse {
    pub fn describe(&self) -> Option<String> {
        match (&self.error, &self.message) {
            (Some(error), Some(message)) => Some(format!("{}: {}", error, message)),
            (None, Some(message)) => Some(message.clone()),
            (Some(error), None) => Some(error.clone()),
            (None, None) => None,
        }
    }
}

/// `get_server_utc` answers with a bare timestamp string; some deployments
/// wrap it in an object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ServerTimeResponse {
    Plain(String),
    Wrapped {
        #[serde(alias = "get_server_utc", alias = "now")]
        server_utc: String,
    },
}

impl ServerTimeResponse {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Plain(value) => value,
            Self::Wrapped { server_utc } => server_utc,
        }
    }
}

/// Storage upload acknowledgment. Only the key is of interest.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UploadResponse {
    #[serde(default)]
    pub key: Option<String>,
}
