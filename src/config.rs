//! Server configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). The resulting [`ServerConfig`] is
//! shared immutably for the lifetime of the server.

use std::time::Duration;

use crate::error::ServerError;
use crate::wire::WireFormat;

/// Default port inspectors connect to.
pub const DEFAULT_PORT: u16 = 8912;

/// Default sampling period.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Default bound on a single delivery to one client.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Top-level server configuration.
///
/// Loaded once at startup via [`ServerConfig::from_env`], or built directly
/// with [`ServerConfig::default`] and struct update syntax in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host part of the listen address. A literal containing `:` selects
    /// IPv6; anything else (including the empty string) selects IPv4.
    pub listen_host: String,

    /// Port to listen on. `0` asks the OS for an ephemeral port.
    pub listen_port: u16,

    /// Sampling period. Must be strictly positive.
    pub interval: Duration,

    /// Serialization format for snapshot frames.
    pub wire_format: WireFormat,

    /// Upper bound on writing one frame to one client.
    pub send_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_host: String::new(),
            listen_port: DEFAULT_PORT,
            interval: DEFAULT_INTERVAL,
            wire_format: WireFormat::default(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when a variable is not set or does not parse.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] if `PROFILER_WIRE_FORMAT` names an
    /// unknown format, or if the resulting values fail [`Self::validate`].
    pub fn from_env() -> Result<Self, ServerError> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let wire_format = match std::env::var("PROFILER_WIRE_FORMAT") {
            Ok(raw) => raw.parse().map_err(ServerError::Config)?,
            Err(_) => defaults.wire_format,
        };

        let config = Self {
            listen_host: std::env::var("PROFILER_LISTEN_HOST").unwrap_or(defaults.listen_host),
            listen_port: parse_env("PROFILER_LISTEN_PORT", defaults.listen_port),
            interval: parse_env_millis("PROFILER_INTERVAL_MS", defaults.interval),
            wire_format,
            send_timeout: parse_env_millis("PROFILER_SEND_TIMEOUT_MS", defaults.send_timeout),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the rest of the server relies on.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] for a zero interval or zero send
    /// timeout.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.interval.is_zero() {
            return Err(ServerError::Config(
                "sampling interval must be positive".to_string(),
            ));
        }
        if self.send_timeout.is_zero() {
            return Err(ServerError::Config(
                "send timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Sampling interval in whole milliseconds, as advertised to clients.
    #[must_use]
    pub fn interval_ms(&self) -> u64 {
        saturating_millis(self.interval)
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
#[must_use]
pub fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable holding milliseconds.
fn parse_env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
