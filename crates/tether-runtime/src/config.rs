//! Runtime configuration

use std::collections::HashSet;
use std::time::Duration;

use tether_core::{TetherError, TetherResult};

pub const ENV_ROOTS: &str = "TETHER_ROOTS";
pub const ENV_ACK_TIMEOUT: &str = "TETHER_ACK_TIMEOUT";
pub const ENV_TICK_INTERVAL: &str = "TETHER_TICK_INTERVAL";
pub const ENV_GUARD_KEY: &str = "TETHER_GUARD_KEY";
pub const ENV_MAX_SETTLED: &str = "TETHER_MAX_SETTLED";

/// Sync runtime configuration
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeConfig {
    /// Root names known at construction time
    pub roots: Vec<String>,
    /// Time an emitted event may wait for its echo before the connection is
    /// considered lost
    pub ack_timeout: Duration,
    /// Bracketed key of an append that only forces list creation
    pub guard_key: String,
    /// Timer polling cadence of the dispatcher
    pub tick_interval: Duration,
    /// Settled journal records kept for rollback
    pub max_settled_records: usize,
    /// Inbound channel capacity for stream transports
    pub inbound_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            roots: vec!["settings".to_string(), "state".to_string(), "database".to_string()],
            ack_timeout: Duration::from_millis(1000),
            guard_key: "_init".to_string(),
            tick_interval: Duration::from_millis(50),
            max_settled_records: 1024,
            inbound_buffer: 1024,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overlaid with `TETHER_*` environment variables
    pub fn from_env() -> TetherResult<Self> {
        Self::default().overlay(|name| std::env::var(name).ok())
    }

    /// Overlay values produced by `lookup`, keyed by environment variable name
    pub fn overlay<F>(mut self, lookup: F) -> TetherResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(roots) = lookup(ENV_ROOTS) {
            self.roots = roots
                .split(',')
                .map(str::trim)
                .filter(|root| !root.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(timeout) = lookup(ENV_ACK_TIMEOUT) {
            self.ack_timeout = parse_duration(ENV_ACK_TIMEOUT, &timeout)?;
        }
        if let Some(interval) = lookup(ENV_TICK_INTERVAL) {
            self.tick_interval = parse_duration(ENV_TICK_INTERVAL, &interval)?;
        }
        if let Some(guard_key) = lookup(ENV_GUARD_KEY) {
            self.guard_key = guard_key;
        }
        if let Some(max) = lookup(ENV_MAX_SETTLED) {
            self.max_settled_records = max
                .trim()
                .parse()
                .map_err(|e| TetherError::InvalidConfig(format!("{}: {}", ENV_MAX_SETTLED, e)))?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> TetherResult<()> {
        if self.roots.is_empty() {
            return Err(TetherError::InvalidConfig("at least one root is required".to_string()));
        }
        let mut seen = HashSet::new();
        for root in &self.roots {
            if root.is_empty() || !root.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(TetherError::InvalidConfig(format!("invalid root name {:?}", root)));
            }
            if !seen.insert(root.as_str()) {
                return Err(TetherError::InvalidConfig(format!("duplicate root {:?}", root)));
            }
        }
        if self.ack_timeout.is_zero() {
            return Err(TetherError::InvalidConfig("ack_timeout must be positive".to_string()));
        }
        if self.tick_interval.is_zero() {
            return Err(TetherError::InvalidConfig("tick_interval must be positive".to_string()));
        }
        if self.guard_key.is_empty() || self.guard_key.contains(['[', ']']) {
            return Err(TetherError::InvalidConfig(format!("invalid guard key {:?}", self.guard_key)));
        }
        if self.inbound_buffer == 0 {
            return Err(TetherError::InvalidConfig("inbound_buffer must be positive".to_string()));
        }
        Ok(())
    }
}

fn parse_duration(name: &str, text: &str) -> TetherResult<Duration> {
    humantime::parse_duration(text.trim()).map_err(|e| TetherError::InvalidConfig(format!("{}: {}", name, e)))
}
