//! Startup configuration checks.
//!
//! Every rule is checked and all violations are reported together, so a
//! misconfigured deployment can be fixed in one pass.

use super::error::{ConfigResult, ConfigurationError};
use super::{AppConfig, SessionBackend};

/// Validates an [`AppConfig`] before any connection is attempted.
///
/// | Setting | Rule |
/// |---------|------|
/// | `session.signing_key` | present and non-empty |
/// | `redis.url` | present when sessions, discovery or broadcast use Redis |
/// | TTL, intervals, timeouts | greater than zero |
/// | `retry.max_attempts` | at least 1 |
/// | `broadcast.queue_capacity` | at least 1 |
#[derive(Debug)]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire application configuration.
    pub fn validate(config: &AppConfig) -> ConfigResult<()> {
        let mut errors = Vec::new();

        errors.extend(Self::validate_session(config).err());
        errors.extend(Self::validate_redis(config).err());
        errors.extend(Self::validate_durations(config));
        errors.extend(Self::validate_queues(config));

        // Flatten nested reports so numbering stays readable.
        let errors = errors
            .into_iter()
            .flat_map(|e| match e {
                ConfigurationError::Multiple(inner) => inner,
                other => vec![other],
            })
            .collect();

        ConfigurationError::collect(errors).map_or(Ok(()), Err)
    }

    /// The signing key must be present and non-empty.
    pub fn validate_session(config: &AppConfig) -> ConfigResult<()> {
        match config.session.signing_key.as_deref() {
            Some(key) if !key.is_empty() => Ok(()),
            _ => Err(ConfigurationError::missing_required(
                "session.signing_key",
                "Signing and verifying session tokens",
                "SESSION_KEY",
            )),
        }
    }

    /// Redis must be configured when any enabled feature depends on it.
    pub fn validate_redis(config: &AppConfig) -> ConfigResult<()> {
        let has_url = config.redis.url.as_deref().is_some_and(|u| !u.is_empty());
        if has_url || !config.needs_redis() {
            return Ok(());
        }

        let mut users = Vec::new();
        if config.session.backend == SessionBackend::Redis {
            users.push("session storage");
        }
        if config.discovery.enabled {
            users.push("service discovery");
        }
        if config.broadcast.enabled {
            users.push("event broadcast");
        }

        Err(ConfigurationError::missing_required(
            "redis.url",
            users.join(", "),
            "REDIS_URL (e.g., redis://localhost:6379), or set GATEWAY__SESSION__BACKEND=memory \
            and disable discovery and broadcast for local development",
        ))
    }

    fn validate_durations(config: &AppConfig) -> Vec<ConfigurationError> {
        let checks = [
            ("session.ttl_secs", config.session.ttl_secs),
            ("server.timeout_secs", config.server.timeout_secs),
            ("proxy.timeout_secs", config.proxy.timeout_secs),
            (
                "discovery.sweep_interval_secs",
                config.discovery.sweep_interval_secs,
            ),
            ("broadcast.poll_timeout_ms", config.broadcast.poll_timeout_ms),
        ];

        checks
            .into_iter()
            .filter(|(_, value)| *value == 0)
            .map(|(name, _)| {
                ConfigurationError::invalid(
                    format!("{name} must be greater than zero"),
                    format!("Set {name} to a positive value or remove it to use the default"),
                )
            })
            .collect()
    }

    fn validate_queues(config: &AppConfig) -> Vec<ConfigurationError> {
        let mut errors = Vec::new();
        if config.retry.max_attempts == 0 {
            errors.push(ConfigurationError::invalid(
                "retry.max_attempts must be at least 1",
                "Set GATEWAY__RETRY__MAX_ATTEMPTS to 1 or more",
            ));
        }
        if config.broadcast.queue_capacity == 0 {
            errors.push(ConfigurationError::invalid(
                "broadcast.queue_capacity must be at least 1",
                "Set GATEWAY__BROADCAST__QUEUE_CAPACITY to 1 or more",
            ));
        }
        errors
    }
}
