//! Semantic configuration checks, run after deserialization.

use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single failed semantic check.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("registry.lookup_attempts must be at least 1")]
    NoLookupAttempts,

    #[error("registry.lookup_max_delay_ms must be >= lookup_base_delay_ms")]
    BackoffCapBelowBase,

    #[error("serving.idle_timeout_secs must be greater than zero")]
    ZeroIdleTimeout,

    #[error("inject.script_path must start with '/'")]
    RelativeScriptPath,

    #[error("cache prefix '{0}' must start with '/'")]
    RelativeCachePrefix(String),
}

/// Validate a parsed configuration, collecting every violation.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.registry.lookup_attempts == 0 {
        errors.push(ValidationError::NoLookupAttempts);
    }
    if config.registry.lookup_max_delay_ms < config.registry.lookup_base_delay_ms {
        errors.push(ValidationError::BackoffCapBelowBase);
    }
    if config.serving.idle_timeout_secs == 0 {
        errors.push(ValidationError::ZeroIdleTimeout);
    }
    if !config.inject.script_path.starts_with('/') {
        errors.push(ValidationError::RelativeScriptPath);
    }
    for prefix in &config.cache.prefixes {
        if !prefix.starts_with('/') {
            errors.push(ValidationError::RelativeCachePrefix(prefix.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_violation() {
        let mut config = ProxyConfig::default();
        config.registry.lookup_attempts = 0;
        config.serving.idle_timeout_secs = 0;
        config.inject.script_path = "bootstrap.js".to_string();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::NoLookupAttempts));
        assert!(errors.contains(&ValidationError::ZeroIdleTimeout));
        assert!(errors.contains(&ValidationError::RelativeScriptPath));
    }
}
