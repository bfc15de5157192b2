//! GTID subsystem configuration
//!
//! Environment Variables:
//! - `ROODB_SERVER_UUID` - Source identity of this server (random when unset)
//! - `ROODB_GTID_MODE` - `ON` (default) or `OFF`
//! - `ROODB_GTID_EXECUTED` - GTID set text seeding the executed set
//! - `ROODB_GTID_PURGED` - GTID set text seeding the purged set
//! - `ROODB_GTID_WAIT_POLL_MS` - Re-check interval for ownership waits
//! - `ROODB_GTID_WAIT_TIMEOUT_MS` - Give up waiting for a GTID after this long (0 = never)

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::gtid::{GtidError, GtidResult, Sid};

/// Default interval between re-checks of the kill/abort flags while waiting
pub const DEFAULT_WAIT_POLL_MS: u64 = 100;

/// Whether transactions carry GTIDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum GtidMode {
    /// Transactions are anonymous; explicit GTIDs are rejected
    Off,
    /// Every transaction gets a GTID; anonymous transactions are rejected
    #[default]
    On,
}

impl FromStr for GtidMode {
    type Err = GtidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ON" | "1" => Ok(Self::On),
            "OFF" | "0" => Ok(Self::Off),
            other => Err(GtidError::Config(format!("invalid GTID mode '{}'", other))),
        }
    }
}

impl fmt::Display for GtidMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => f.write_str("ON"),
            Self::Off => f.write_str("OFF"),
        }
    }
}

/// Configuration for `GtidState`
#[derive(Debug, Clone)]
pub struct GtidConfig {
    /// Source identity of this server; generated at startup when `None`
    pub server_uuid: Option<Sid>,

    /// GTID mode
    pub gtid_mode: GtidMode,

    /// Executed GTIDs to load at startup
    pub gtid_executed: Option<String>,

    /// Purged GTIDs to load at startup (also counted as executed)
    pub gtid_purged: Option<String>,

    /// How often a parked ownership wait re-checks kill/abort flags
    pub wait_poll_interval: Duration,

    /// Abort an ownership wait after this duration
    /// Default: disabled (Duration::ZERO)
    pub ownership_wait_timeout: Duration,
}

impl Default for GtidConfig {
    fn default() -> Self {
        Self {
            server_uuid: None,
            gtid_mode: GtidMode::On,
            gtid_executed: None,
            gtid_purged: None,
            wait_poll_interval: Duration::from_millis(DEFAULT_WAIT_POLL_MS),
            ownership_wait_timeout: Duration::ZERO, // disabled
        }
    }
}

impl GtidConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Read configuration from environment variables
    pub fn from_env() -> GtidResult<Self> {
        let mut config = Self::default();

        if let Ok(uuid) = env::var("ROODB_SERVER_UUID") {
            config.server_uuid = Some(
                uuid.parse()
                    .map_err(|e| GtidError::Config(format!("ROODB_SERVER_UUID: {}", e)))?,
            );
        }
        if let Ok(mode) = env::var("ROODB_GTID_MODE") {
            config.gtid_mode = mode.parse()?;
        }
        config.gtid_executed = env::var("ROODB_GTID_EXECUTED").ok();
        config.gtid_purged = env::var("ROODB_GTID_PURGED").ok();
        if let Ok(ms) = env::var("ROODB_GTID_WAIT_POLL_MS") {
            config.wait_poll_interval = Duration::from_millis(parse_millis("ROODB_GTID_WAIT_POLL_MS", &ms)?);
        }
        if let Ok(ms) = env::var("ROODB_GTID_WAIT_TIMEOUT_MS") {
            config.ownership_wait_timeout =
                Duration::from_millis(parse_millis("ROODB_GTID_WAIT_TIMEOUT_MS", &ms)?);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants between fields
    pub fn validate(&self) -> GtidResult<()> {
        if self.wait_poll_interval.is_zero() {
            return Err(GtidError::Config(
                "wait poll interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the server UUID
    pub fn with_server_uuid(mut self, sid: Sid) -> Self {
        self.server_uuid = Some(sid);
        self
    }

    /// Set the GTID mode
    pub fn with_gtid_mode(mut self, mode: GtidMode) -> Self {
        self.gtid_mode = mode;
        self
    }

    /// Seed the executed set
    pub fn with_gtid_executed(mut self, text: impl Into<String>) -> Self {
        self.gtid_executed = Some(text.into());
        self
    }

    /// Seed the purged set
    pub fn with_gtid_purged(mut self, text: impl Into<String>) -> Self {
        self.gtid_purged = Some(text.into());
        self
    }

    /// Set the wait poll interval
    pub fn with_wait_poll_interval(mut self, interval: Duration) -> Self {
        self.wait_poll_interval = interval;
        self
    }

    /// Set the ownership wait timeout
    pub fn with_ownership_wait_timeout(mut self, timeout: Duration) -> Self {
        self.ownership_wait_timeout = timeout;
        self
    }

    /// Check if the ownership wait timeout is enabled
    pub fn has_wait_timeout(&self) -> bool {
        !self.ownership_wait_timeout.is_zero()
    }
}

fn parse_millis(var: &str, value: &str) -> GtidResult<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| GtidError::Config(format!("{}: expected milliseconds, got '{}'", var, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GtidConfig::default();
        assert_eq!(config.gtid_mode, GtidMode::On);
        assert!(!config.has_wait_timeout());
        assert_eq!(config.wait_poll_interval, Duration::from_millis(DEFAULT_WAIT_POLL_MS));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let sid = Sid::generate();
        let config = GtidConfig::new()
            .with_server_uuid(sid)
            .with_gtid_mode(GtidMode::Off)
            .with_gtid_purged("")
            .with_ownership_wait_timeout(Duration::from_secs(2));
        assert_eq!(config.server_uuid, Some(sid));
        assert_eq!(config.gtid_mode, GtidMode::Off);
        assert!(config.has_wait_timeout());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("on".parse::<GtidMode>().unwrap(), GtidMode::On);
        assert_eq!(" OFF ".parse::<GtidMode>().unwrap(), GtidMode::Off);
        assert!(matches!("maybe".parse::<GtidMode>(), Err(GtidError::Config(_))));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let config = GtidConfig::new().with_wait_poll_interval(Duration::ZERO);
        assert!(matches!(config.validate(), Err(GtidError::Config(_))));
    }

    #[test]
    fn test_parse_millis() {
        assert_eq!(parse_millis("X", " 250 ").unwrap(), 250);
        assert!(parse_millis("X", "soon").is_err());
    }
}
