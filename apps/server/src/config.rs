//! Process configuration, read once at startup.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use solarsync_cloud_sync::CloudSyncConfig;

const ENV_DB_PATH: &str = "SOLARSYNC_DB_PATH";
const ENV_LISTEN_ADDR: &str = "SOLARSYNC_LISTEN_ADDR";

const DEFAULT_DB_PATH: &str = "./db/local_data.db";
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:5000";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub db_path: String,
    pub cloud: CloudSyncConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let setting = |key: &str, default: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let raw_addr = setting(ENV_LISTEN_ADDR, DEFAULT_LISTEN_ADDR);
        let listen_addr = raw_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("{} is not a socket address: '{}'", ENV_LISTEN_ADDR, raw_addr))?;
        let cloud = CloudSyncConfig::from_lookup(&lookup)?;

        Ok(Self {
            listen_addr,
            db_path: setting(ENV_DB_PATH, DEFAULT_DB_PATH),
            cloud,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_remote_is_set() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://x.supabase.co/"),
            ("SUPABASE_KEY", "anon"),
        ]))
        .unwrap();

        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:5000");
        assert_eq!(config.db_path, "./db/local_data.db");
        assert_eq!(config.cloud.base_url, "https://x.supabase.co");
        assert_eq!(config.cloud.bucket, "SSC");
    }

    #[test]
    fn rejects_bad_listen_address() {
        let err = ServerConfig::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://x.supabase.co"),
            ("SUPABASE_KEY", "anon"),
            ("SOLARSYNC_LISTEN_ADDR", "localhost"),
        ]))
        .unwrap_err();

        assert!(err.to_string().contains("SOLARSYNC_LISTEN_ADDR"));
    }

    #[test]
    fn missing_remote_settings_fail() {
        let err = ServerConfig::from_lookup(lookup(&[("SOLARSYNC_DB_PATH", "/tmp/x.db")]))
            .unwrap_err();
        assert!(err.to_string().contains("SUPABASE_URL"));
    }
}
