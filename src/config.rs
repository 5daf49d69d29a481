//! Vault configuration: the root secret and the rotation settings.
//!
//! Loaded once at startup, either programmatically, from `PASSMAN_*`
//! environment variables or from a JSON document. A bad root secret fails
//! here, never at first use.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Duration;
use passman_crypto::RootSecret;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{Result, VaultError};

pub const ENV_ROOT_SECRET: &str = "PASSMAN_ROOT_SECRET";
pub const ENV_ROTATION_POLICY: &str = "PASSMAN_ROTATION_POLICY";
pub const ENV_ROTATION_INTERVAL_DAYS: &str = "PASSMAN_ROTATION_INTERVAL_DAYS";

pub const DEFAULT_ROTATION_INTERVAL_DAYS: i64 = 90;

/// What happens to existing records when a group's epoch advances.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    /// Re-encrypt every record of the group during the rotation call.
    Eager,
    /// Keep old envelopes readable at their epoch and upgrade them on read.
    #[default]
    Lazy,
}

impl std::str::FromStr for RotationPolicy {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eager" => Ok(Self::Eager),
            "lazy" => Ok(Self::Lazy),
            other => Err(VaultError::Configuration(format!(
                "unknown rotation policy: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub root_secret: RootSecret,
    pub rotation_policy: RotationPolicy,
    /// Age after which `rotate_if_due` advances a group's epoch.
    pub rotation_interval: Duration,
}

/// On-disk JSON shape.
#[derive(Deserialize)]
struct RawConfig {
    root_secret: String,
    #[serde(default)]
    rotation_policy: RotationPolicy,
    #[serde(default)]
    rotation_interval_days: Option<i64>,
}

impl VaultConfig {
    /// Config with the default policy (lazy) and interval (90 days).
    pub fn new(root_secret: RootSecret) -> Self {
        Self {
            root_secret,
            rotation_policy: RotationPolicy::default(),
            rotation_interval: Duration::days(DEFAULT_ROTATION_INTERVAL_DAYS),
        }
    }

    pub fn with_rotation_policy(mut self, policy: RotationPolicy) -> Self {
        self.rotation_policy = policy;
        self
    }

    pub fn with_rotation_interval(mut self, interval: Duration) -> Self {
        self.rotation_interval = interval;
        self
    }

    /// Load from `PASSMAN_ROOT_SECRET` (standard base64, required),
    /// `PASSMAN_ROTATION_POLICY` and `PASSMAN_ROTATION_INTERVAL_DAYS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let encoded = Zeroizing::new(lookup(ENV_ROOT_SECRET).ok_or_else(|| {
            VaultError::Configuration(format!("{} is not set", ENV_ROOT_SECRET))
        })?);
        let mut config = Self::new(decode_root_secret(&encoded)?);

        if let Some(policy) = lookup(ENV_ROTATION_POLICY) {
            config.rotation_policy = policy.parse()?;
        }
        if let Some(days) = lookup(ENV_ROTATION_INTERVAL_DAYS) {
            let days = days.trim().parse::<i64>().map_err(|_| {
                VaultError::Configuration(format!(
                    "invalid number in {}: {}",
                    ENV_ROTATION_INTERVAL_DAYS, days
                ))
            })?;
            config.rotation_interval = interval_from_days(days)?;
        }
        Ok(config)
    }

    /// Parse `{ "root_secret": "<base64>", "rotation_policy": "eager"|"lazy",
    /// "rotation_interval_days": 90 }`. Only `root_secret` is required.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(json)
            .map_err(|e| VaultError::Configuration(format!("invalid config JSON: {}", e)))?;
        let encoded = Zeroizing::new(raw.root_secret);
        let mut config = Self::new(decode_root_secret(&encoded)?);
        config.rotation_policy = raw.rotation_policy;
        if let Some(days) = raw.rotation_interval_days {
            config.rotation_interval = interval_from_days(days)?;
        }
        Ok(config)
    }
}

fn decode_root_secret(encoded: &str) -> Result<RootSecret> {
    let bytes = Zeroizing::new(
        STANDARD
            .decode(encoded.trim())
            .map_err(|_| VaultError::Configuration("root secret is not valid base64".to_string()))?,
    );
    Ok(RootSecret::new(bytes.as_slice())?)
}

fn interval_from_days(days: i64) -> Result<Duration> {
    if days <= 0 {
        return Err(VaultError::Configuration(format!(
            "rotation interval must be a positive number of days, got {}",
            days
        )));
    }
    Duration::try_days(days).ok_or_else(|| {
        VaultError::Configuration(format!("rotation interval too large: {} days", days))
    })
}
