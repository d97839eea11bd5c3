//! Configuration management for the linking service

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use thiserror::Error;

use crate::annotations::Creator;
use crate::cache::CacheConfig;
use crate::save::ReconcileConfig;
use crate::store::AnnoRepoConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub cache: CacheSettings,
    pub providers: ProviderConfig,
    pub reconcile: ReconcileSettings,
    /// Canvas loaded at startup, if any
    pub default_canvas: Option<String>,
    pub creator: Option<CreatorConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    AnnoRepo,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub base_url: String,
    pub container: String,
    /// Missing token means read-only
    pub token: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    pub ttl_secs: i64,
    pub batch_delay_ms: u64,
    pub max_canvases: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub nominatim_url: String,
    pub gavoc_url: String,
    pub globalise_url: String,
    pub neru_dataset_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileSettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatorConfig {
    pub id: String,
    pub label: String,
}

impl Default for Config {
    fn default() -> Self {
        let store = AnnoRepoConfig::default();
        let cache = CacheConfig::default();
        let reconcile = ReconcileConfig::default();
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            store: StoreConfig {
                backend: StoreBackend::AnnoRepo,
                base_url: store.base_url,
                container: store.container,
                token: None,
                timeout_secs: store.timeout_secs,
            },
            cache: CacheSettings {
                ttl_secs: cache.ttl_secs,
                batch_delay_ms: cache.batch_delay_ms,
                max_canvases: crate::loader::DEFAULT_MAX_CANVASES,
            },
            providers: ProviderConfig {
                nominatim_url: "https://nominatim.openstreetmap.org".to_string(),
                gavoc_url: "https://necessaryreunions.org".to_string(),
                globalise_url: "https://necessaryreunions.org".to_string(),
                neru_dataset_url: "https://necessaryreunions.org/neru-place-dataset.json".to_string(),
                timeout_secs: crate::geotag::DEFAULT_PROVIDER_TIMEOUT_SECS,
            },
            reconcile: ReconcileSettings {
                max_attempts: reconcile.max_attempts,
                initial_delay_ms: reconcile.initial_delay_ms,
                max_delay_ms: reconcile.max_delay_ms,
            },
            default_canvas: None,
            creator: None,
        }
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        _ => Ok(default),
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let backend = match env::var("STORE_BACKEND").unwrap_or_else(|_| "annorepo".to_string()).as_str() {
            "memory" => StoreBackend::Memory,
            "annorepo" | "" => StoreBackend::AnnoRepo,
            other => {
                return Err(ConfigError::Invalid {
                    name: "STORE_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let creator = match (optional_var("LINKING_CREATOR_ID"), optional_var("LINKING_CREATOR_LABEL")) {
            (Some(id), label) => Some(CreatorConfig {
                label: label.unwrap_or_else(|| id.clone()),
                id,
            }),
            _ => None,
        };

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", defaults.server.port)?,
            },
            store: StoreConfig {
                backend,
                base_url: env::var("ANNOREPO_BASE_URL").unwrap_or(defaults.store.base_url),
                container: env::var("ANNOREPO_CONTAINER").unwrap_or(defaults.store.container),
                token: optional_var("ANNOREPO_TOKEN"),
                timeout_secs: parse_var("ANNOREPO_TIMEOUT_SECS", defaults.store.timeout_secs)?,
            },
            cache: CacheSettings {
                ttl_secs: parse_var("LINKING_CACHE_TTL_SECS", defaults.cache.ttl_secs)?,
                batch_delay_ms: parse_var("LINKING_BATCH_DELAY_MS", defaults.cache.batch_delay_ms)?,
                max_canvases: parse_var("LINKING_MAX_CANVASES", defaults.cache.max_canvases)?,
            },
            providers: ProviderConfig {
                nominatim_url: env::var("NOMINATIM_URL").unwrap_or(defaults.providers.nominatim_url),
                gavoc_url: env::var("GAVOC_URL").unwrap_or(defaults.providers.gavoc_url),
                globalise_url: env::var("GLOBALISE_URL").unwrap_or(defaults.providers.globalise_url),
                neru_dataset_url: env::var("NERU_DATASET_URL").unwrap_or(defaults.providers.neru_dataset_url),
                timeout_secs: parse_var("GEOTAG_TIMEOUT_SECS", defaults.providers.timeout_secs)?,
            },
            reconcile: ReconcileSettings {
                max_attempts: parse_var("RECONCILE_MAX_ATTEMPTS", defaults.reconcile.max_attempts)?,
                initial_delay_ms: parse_var("RECONCILE_INITIAL_DELAY_MS", defaults.reconcile.initial_delay_ms)?,
                max_delay_ms: parse_var("RECONCILE_MAX_DELAY_MS", defaults.reconcile.max_delay_ms)?,
            },
            default_canvas: optional_var("DEFAULT_CANVAS"),
            creator,
        })
    }

    pub fn annorepo(&self) -> AnnoRepoConfig {
        AnnoRepoConfig {
            base_url: self.store.base_url.clone(),
            container: self.store.container.clone(),
            token: self.store.token.clone(),
            timeout_secs: self.store.timeout_secs,
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            ttl_secs: self.cache.ttl_secs,
            batch_delay_ms: self.cache.batch_delay_ms,
        }
    }

    pub fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            max_attempts: self.reconcile.max_attempts,
            initial_delay_ms: self.reconcile.initial_delay_ms,
            max_delay_ms: self.reconcile.max_delay_ms,
            ..ReconcileConfig::default()
        }
    }

    pub fn default_creator(&self) -> Option<Creator> {
        self.creator
            .as_ref()
            .map(|c| Creator::person(c.id.clone(), c.label.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_library_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.store.container, "necessary-reunions");
        assert_eq!(config.cache_config().ttl_secs, 300);
        assert_eq!(config.reconcile_config().max_attempts, 10);
        assert!(config.annorepo().token.is_none());
        assert!(config.default_creator().is_none());
    }
}
