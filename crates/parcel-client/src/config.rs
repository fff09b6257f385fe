// Client-side defaults and environment/YAML configuration.
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::consumer::WaitPolicy;

/// Wall-clock limit for one delivery when nothing overrides it (15 minutes).
pub const DEFAULT_DELIVERY_TIMEOUT_MS: u64 = 15 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    // Untyped sends are JSON-encoded and tagged instead of using the
    // structured default.
    pub json_messages_by_default: bool,
    // Resolve a delivery when the handler finishes instead of waiting for all
    // of its background work.
    pub no_wait_for_wait_until: bool,
    pub delivery_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            json_messages_by_default: false,
            no_wait_for_wait_until: false,
            delivery_timeout_ms: DEFAULT_DELIVERY_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
struct ClientConfigOverride {
    json_messages_by_default: Option<bool>,
    no_wait_for_wait_until: Option<bool>,
    delivery_timeout_ms: Option<u64>,
}

impl ClientConfig {
    pub fn from_env_or_yaml(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::from_env();
        let override_path = config_path
            .map(|value| value.to_string())
            .or_else(|| std::env::var("PARCEL_CLIENT_CONFIG").ok());
        let contents = match override_path.as_deref() {
            Some(path) => match fs::read_to_string(path) {
                Ok(contents) => Some(contents),
                Err(err) => {
                    return Err(err).with_context(|| format!("read client config: {path}"));
                }
            },
            None => None,
        };
        if let Some(contents) = contents {
            let override_cfg: ClientConfigOverride =
                serde_yaml::from_str(&contents).context("parse client config yaml")?;
            override_cfg.apply(&mut config);
        }
        config.validate()?;
        Ok(config)
    }

    fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(value) = read_bool_env("PARCEL_QUEUES_JSON_MESSAGES") {
            config.json_messages_by_default = value;
        }
        if let Some(value) = read_bool_env("PARCEL_QUEUE_NO_WAIT_FOR_WAIT_UNTIL") {
            config.no_wait_for_wait_until = value;
        }
        if let Some(value) = read_u64_env("PARCEL_QUEUE_DELIVERY_TIMEOUT_MS") {
            config.delivery_timeout_ms = value;
        }
        config
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.delivery_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "delivery_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        if self.no_wait_for_wait_until {
            WaitPolicy::HandlerOnly
        } else {
            WaitPolicy::DrainBackground
        }
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

impl ClientConfigOverride {
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(value) = self.json_messages_by_default {
            config.json_messages_by_default = value;
        }
        if let Some(value) = self.no_wait_for_wait_until {
            config.no_wait_for_wait_until = value;
        }
        if let Some(value) = self.delivery_timeout_ms
            && value > 0
        {
            config.delivery_timeout_ms = value;
        }
    }
}

fn read_u64_env(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
}

fn read_bool_env(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
}
