//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files, and
//! every section defaults so a minimal file (or none at all) is valid.

use serde::{Deserialize, Serialize};

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration for the front server.
    pub listener: ListenerConfig,

    /// Registration lookup retry behavior.
    pub registry: RegistryConfig,

    /// Serving-side exchange limits.
    pub serving: ServingConfig,

    /// Static-asset cache policy.
    pub cache: CacheConfig,

    /// Bootstrap-script injection.
    pub inject: InjectConfig,

    /// Upstream origin for pass-through traffic.
    pub upstream: UpstreamConfig,
}

/// Front-server listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g. "127.0.0.1:8080").
    pub bind_address: String,

    /// Whole-request timeout in seconds, applied by the front server.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            request_timeout_secs: 120,
        }
    }
}

/// Bounded retry window for registration lookups. A request arriving just
/// before its application announces itself waits out this window; the total
/// budget with defaults is roughly a quarter second.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Maximum lookup attempts; the cap is hard.
    pub lookup_attempts: u32,

    /// Base backoff delay in milliseconds.
    pub lookup_base_delay_ms: u64,

    /// Backoff cap in milliseconds.
    pub lookup_max_delay_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            lookup_attempts: 5,
            lookup_base_delay_ms: 50,
            lookup_max_delay_ms: 400,
        }
    }
}

/// Serving-side exchange limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServingConfig {
    /// Idle timeout in seconds for every channel await inside an exchange;
    /// an abandoned exchange reclaims its endpoint after this long.
    pub idle_timeout_secs: u64,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 300,
        }
    }
}

/// Static-asset cache policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch; off by default.
    pub enabled: bool,

    /// Path prefixes eligible for caching.
    pub prefixes: Vec<String>,

    /// Largest body the cache will buffer, in bytes.
    pub max_entry_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prefixes: vec!["/assets/".to_string()],
            max_entry_bytes: 8 * 1024 * 1024,
        }
    }
}

/// Bootstrap-script injection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InjectConfig {
    /// Path the script is served from; also the `src` spliced into
    /// application root documents.
    pub script_path: String,
}

impl Default for InjectConfig {
    fn default() -> Self {
        Self {
            script_path: "/sandproxy-bootstrap.js".to_string(),
        }
    }
}

/// Upstream origin for pass-through (non-application) traffic.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base origin, e.g. "http://127.0.0.1:9000".
    pub origin: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            origin: "http://127.0.0.1:9000".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_preserve_the_quarter_second_lookup_budget() {
        let config = ProxyConfig::default();
        assert_eq!(config.registry.lookup_attempts, 5);
        assert_eq!(config.registry.lookup_base_delay_ms, 50);
        assert!(!config.cache.enabled);
    }

    #[test]
    fn minimal_toml_round_trips() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "0.0.0.0:9090"

            [cache]
            enabled = true
            prefixes = ["/static/"]
            "#,
        )
        .unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:9090");
        assert!(config.cache.enabled);
        assert_eq!(config.cache.prefixes, vec!["/static/".to_string()]);
        // Untouched sections keep their defaults.
        assert_eq!(config.serving.idle_timeout_secs, 300);
        assert_eq!(config.inject.script_path, "/sandproxy-bootstrap.js");
    }
}
