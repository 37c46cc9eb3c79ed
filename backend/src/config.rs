//! Runtime configuration read from `GEOMERGE_*` environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::fetch::{retry::DEFAULT_MAX_DELAY, HostAllowList, RetryPolicy, DEFAULT_ALLOWED_HOSTS};
use crate::projection::Envelope;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_DESCRIPTIONS_DIR: &str = "data";
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub descriptions_dir: PathBuf,
    /// Zero disables the response cache.
    pub cache_ttl: Duration,
    pub allowed_hosts: Vec<String>,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub envelope: Envelope,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            descriptions_dir: PathBuf::from(DEFAULT_DESCRIPTIONS_DIR),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            allowed_hosts: DEFAULT_ALLOWED_HOSTS.iter().map(|h| h.to_string()).collect(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            envelope: Envelope::default(),
        }
    }
}

impl AppConfig {
    /// Load `.env` (if any) and read the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(value) = get("GEOMERGE_PORT") {
            config.port = parse_value("GEOMERGE_PORT", &value)?;
        }
        if let Some(value) = get("GEOMERGE_DESCRIPTIONS_DIR") {
            config.descriptions_dir = PathBuf::from(value);
        }
        if let Some(value) = get("GEOMERGE_CACHE_TTL_SECS") {
            config.cache_ttl = Duration::from_secs(parse_value("GEOMERGE_CACHE_TTL_SECS", &value)?);
        }
        if let Some(value) = get("GEOMERGE_ALLOWED_HOSTS") {
            config.allowed_hosts = value
                .split(',')
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect();
        }
        if let Some(value) = get("GEOMERGE_REQUEST_TIMEOUT_SECS") {
            config.request_timeout =
                Duration::from_secs(parse_value("GEOMERGE_REQUEST_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = get("GEOMERGE_MAX_RETRIES") {
            config.retry.max_retries = parse_value("GEOMERGE_MAX_RETRIES", &value)?;
        }
        if let Some(value) = get("GEOMERGE_RETRY_DELAY_MS") {
            let millis: u64 = parse_value("GEOMERGE_RETRY_DELAY_MS", &value)?;
            config.retry.initial_delay = Duration::from_millis(millis);
            config.retry.max_delay = DEFAULT_MAX_DELAY.max(config.retry.initial_delay);
        }
        if let Some(value) = get("GEOMERGE_ENVELOPE") {
            config.envelope = value.parse().map_err(|message| ConfigError::InvalidValue {
                key: "GEOMERGE_ENVELOPE".to_string(),
                message,
            })?;
        }

        Ok(config)
    }

    pub fn allow_list(&self) -> HostAllowList {
        HostAllowList::new(self.allowed_hosts.iter().cloned())
    }
}

fn parse_value<T>(key: &str, value: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{}': {}", value, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> ConfigResult<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.descriptions_dir, PathBuf::from("data"));
        assert_eq!(config.cache_ttl, Duration::from_secs(3600));
        assert_eq!(config.retry.max_retries, 3);
        assert!(config.allow_list().is_allowed("hsi-sh.de"));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("GEOMERGE_PORT", "8080"),
            ("GEOMERGE_CACHE_TTL_SECS", "0"),
            ("GEOMERGE_ALLOWED_HOSTS", "a.example, b.example"),
            ("GEOMERGE_RETRY_DELAY_MS", "250"),
            ("GEOMERGE_ENVELOPE", "0,40,20,60"),
        ])
        .unwrap();

        assert_eq!(config.port, 8080);
        assert!(config.cache_ttl.is_zero());
        assert_eq!(config.allowed_hosts, vec!["a.example", "b.example"]);
        assert!(!config.allow_list().is_allowed("hsi-sh.de"));
        assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
        assert!(config.envelope.contains(10.0, 50.0));
    }

    #[test]
    fn test_invalid_value() {
        let err = config_from(&[("GEOMERGE_MAX_RETRIES", "many")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "GEOMERGE_MAX_RETRIES"
        ));

        assert!(config_from(&[("GEOMERGE_ENVELOPE", "1,2,3")]).is_err());
    }
}
