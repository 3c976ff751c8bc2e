//! TOML config file loading and validation for the device connection,
//! reconnect policy, sync pacing and scheduler defaults.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::protocol::DEFAULT_PLANT_COUNT;
use crate::sync::DEFAULT_PACING;
use crate::transport::ReconnectPolicy;

/// Plant counts the device firmware supports.
const PLANT_COUNT_RANGE: std::ops::RangeInclusive<u8> = 1..=8;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceSection,
    pub transport: TransportSection,
    pub sync: SyncSection,
    pub scheduler: SchedulerSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    pub host: String,
    pub path: String,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            host: "192.168.4.1".into(),
            path: "/ws".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    pub base_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for TransportSection {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_attempts: policy.max_attempts,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub pacing_ms: u64,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            pacing_ms: DEFAULT_PACING.as_millis() as u64,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// Used until the device reports its own plant count.
    pub default_plant_count: u8,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            default_plant_count: DEFAULT_PLANT_COUNT,
        }
    }
}

// ---------------------------------------------------------------------------
// Derived values
// ---------------------------------------------------------------------------

impl Config {
    /// WebSocket endpoint of the device.
    pub fn url(&self) -> String {
        format!("ws://{}{}", self.device.host, self.device.path)
    }

    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.transport.base_delay_ms),
            max_attempts: self.transport.max_attempts,
        }
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.sync.pacing_ms)
    }

    /// Apply environment overrides on top of the file values.
    fn apply_env(&mut self, host: Option<String>) {
        if let Some(host) = host.filter(|h| !h.trim().is_empty()) {
            self.device.host = host;
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate every section. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        // ── Device ──────────────────────────────────────────
        if self.device.host.trim().is_empty() {
            errors.push("device.host is empty".into());
        }
        if !self.device.path.starts_with('/') {
            errors.push(format!(
                "device.path '{}' must start with '/'",
                self.device.path
            ));
        }

        // ── Transport ───────────────────────────────────────
        if self.transport.base_delay_ms == 0 {
            errors.push("transport.base_delay_ms must be positive".into());
        }
        if self.transport.max_attempts == 0 {
            errors.push("transport.max_attempts must be positive".into());
        }

        // ── Sync ────────────────────────────────────────────
        if self.sync.pacing_ms == 0 {
            errors.push("sync.pacing_ms must be positive".into());
        }

        // ── Scheduler ───────────────────────────────────────
        if !PLANT_COUNT_RANGE.contains(&self.scheduler.default_plant_count) {
            errors.push(format!(
                "scheduler.default_plant_count {} out of range [{}, {}]",
                self.scheduler.default_plant_count,
                PLANT_COUNT_RANGE.start(),
                PLANT_COUNT_RANGE.end()
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file. A missing file yields the
/// defaults; `DEVICE_HOST` overrides the configured host.
pub fn load(path: &str) -> Result<Config> {
    let mut config = if Path::new(path).exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?
    } else {
        tracing::info!(path, "no config file, using defaults");
        Config::default()
    };

    config.apply_env(std::env::var("DEVICE_HOST").ok());
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
