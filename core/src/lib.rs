// ContactLink Core: proximity contact sharing
//
// Drives one short-range contact at a time: bring the link up, offer the
// share, push it through whichever protocol the peer speaks, and debounce
// flaky links so a brief dropout does not cost the user their share.

pub mod link;
pub mod message;
pub mod payload;
pub mod protocol;
pub mod settings;
pub mod store;

use thiserror::Error;

pub use link::{
    ChannelListener, LinkListener, LinkManager, LinkNotification, LinkServices, LinkSnapshot,
    LinkState, OutboundIntent, RetryHint, SendOutcome, SendState,
};
pub use message::{Message, Record, RecordKind};
pub use payload::{AppId, ForegroundApps, PayloadCallback, ShareData, StaticForeground};
pub use protocol::{ClientFactory, ProtocolError, ProtocolKind, ProtocolServers, TransferHandoff};
pub use settings::{DebounceConfig, LinkConfig, LinkParams, SettingsError};
pub use store::{MemoryPreferences, PreferenceError, PreferenceStore, SledPreferences};

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Link manager is not running")]
    NotRunning,
    #[error("Invalid configuration: {0}")]
    Config(#[from] SettingsError),
    #[error("Preference store error: {0}")]
    Preferences(#[from] PreferenceError),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins over `default_level`. Safe to call more than once; only
/// the first call installs anything.
pub fn init_tracing(default_level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .try_init();
}
