//! Link settings and configuration management
//!
//! Serializable to/from JSON, with validation of the debounce ordering
//! invariant: the more urgent the pending send, the longer the grace period.

use crate::link::state::SendState;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Grace periods applied after the link drops, keyed by send state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebounceConfig {
    /// Nothing was queued for this contact
    pub nothing_to_send_ms: u64,
    /// Waiting for the user to confirm
    pub need_confirmation_ms: u64,
    /// A send was in flight
    pub sending_ms: u64,
    /// The send already finished
    pub send_complete_ms: u64,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            nothing_to_send_ms: 0,
            need_confirmation_ms: 3000,
            sending_ms: 5000,
            send_complete_ms: 250,
        }
    }
}

impl DebounceConfig {
    /// Grace period to arm when the link drops in `state`
    pub fn for_state(&self, state: SendState) -> Duration {
        let ms = match state {
            SendState::NothingToSend => self.nothing_to_send_ms,
            SendState::NeedConfirmation => self.need_confirmation_ms,
            SendState::Sending => self.sending_ms,
            SendState::SendComplete => self.send_complete_ms,
        };
        Duration::from_millis(ms)
    }

    /// Sending > NeedConfirmation > SendComplete >= NothingToSend
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.sending_ms <= self.need_confirmation_ms {
            return Err(SettingsError::ConfigError(
                "sending_ms must exceed need_confirmation_ms".to_string(),
            ));
        }
        if self.need_confirmation_ms <= self.send_complete_ms {
            return Err(SettingsError::ConfigError(
                "need_confirmation_ms must exceed send_complete_ms".to_string(),
            ));
        }
        if self.send_complete_ms < self.nothing_to_send_ms {
            return Err(SettingsError::ConfigError(
                "send_complete_ms cannot be below nothing_to_send_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Link-layer parameters handed to protocol clients when they connect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkParams {
    /// Maximum information unit, in bytes
    pub miu: u16,
    /// Receive window size, in units
    pub rw: u8,
}

impl Default for LinkParams {
    fn default() -> Self {
        Self { miu: 128, rw: 1 }
    }
}

/// Complete link manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Debounce durations per send state
    pub debounce: DebounceConfig,

    /// Connect right away if the first unit arrives within this budget
    pub fast_connect_budget_ms: u64,

    /// Parameters passed to every client the negotiator opens
    pub link: LinkParams,

    /// Whether locator shares can be offered at all
    pub handover_supported: bool,

    /// Applications that never get a default payload (launchers, system UI)
    pub default_payload_excluded: Vec<String>,

    /// Store page advertised in the default payload; `{app}` is substituted
    pub store_uri_template: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            debounce: DebounceConfig::default(),
            fast_connect_budget_ms: 200,
            link: LinkParams::default(),
            handover_supported: true,
            default_payload_excluded: vec![
                "com.android.launcher".to_string(),
                "com.android.systemui".to_string(),
                "com.android.nfc".to_string(),
            ],
            store_uri_template:
                "http://play.google.com/store/apps/details?id={app}&feature=beam".to_string(),
        }
    }
}

impl LinkConfig {
    /// Create new settings with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.debounce.validate()?;

        if self.link.miu < 128 {
            return Err(SettingsError::ConfigError(
                "link.miu cannot be below 128".to_string(),
            ));
        }

        if self.link.rw == 0 || self.link.rw > 15 {
            return Err(SettingsError::ConfigError(
                "link.rw must be within 1..=15".to_string(),
            ));
        }

        if !self.store_uri_template.contains("{app}") {
            return Err(SettingsError::ConfigError(
                "store_uri_template must contain {app}".to_string(),
            ));
        }

        Ok(())
    }

    /// Fast-connect budget as a duration
    pub fn fast_connect_budget(&self) -> Duration {
        Duration::from_millis(self.fast_connect_budget_ms)
    }

    /// Load settings from JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_string(&content)
    }

    /// Save settings to JSON file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), SettingsError> {
        let json = self.to_json_string()?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Convert to pretty JSON string
    pub fn to_json_string(&self) -> Result<String, SettingsError> {
        self.validate()?;
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Create from JSON string
    pub fn from_json_string(json: &str) -> Result<Self, SettingsError> {
        let settings: LinkConfig = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }
}
