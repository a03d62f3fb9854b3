//! Payload source: decides what the current contact pushes
//!
//! The foreground application may register a callback that builds the share
//! on demand. Without a usable registration, a default message advertising
//! the foreground application is produced instead.

use crate::link::intent::{IntentFlags, OutboundIntent};
use crate::message::{Message, Record};
use crate::settings::LinkConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Identity of an application (package name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppId(pub String);

impl AppId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What an application wants to share when a peer comes into range
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShareData {
    pub message: Option<Message>,
    pub uris: Vec<String>,
    pub flags: IntentFlags,
}

/// Callback registered by an application to produce its share
pub trait PayloadCallback: Send + Sync {
    /// Build the share for this contact; `None` opts out of sharing
    fn create_share(&self) -> Option<ShareData>;

    /// The share produced by this callback reached the peer
    fn on_push_complete(&self) {}
}

/// Answers which applications are currently in the foreground
pub trait ForegroundApps: Send + Sync {
    /// Foreground applications, most recent first
    fn foreground_apps(&self) -> Vec<AppId>;
}

struct Registration {
    owner: AppId,
    callback: Arc<dyn PayloadCallback>,
}

/// Produces the [`OutboundIntent`] for a contact
pub struct PayloadSource {
    registration: Option<Registration>,
    foreground: Arc<dyn ForegroundApps>,
    excluded: Vec<String>,
    store_uri_template: String,
}

impl PayloadSource {
    pub fn new(config: &LinkConfig, foreground: Arc<dyn ForegroundApps>) -> Self {
        Self {
            registration: None,
            foreground,
            excluded: config.default_payload_excluded.clone(),
            store_uri_template: config.store_uri_template.clone(),
        }
    }

    /// Register or replace the payload callback
    pub fn register(&mut self, owner: AppId, callback: Arc<dyn PayloadCallback>) {
        if let Some(previous) = &self.registration {
            debug!("Replacing payload callback of {} with {}", previous.owner, owner);
        }
        self.registration = Some(Registration { owner, callback });
    }

    /// Drop the current registration
    pub fn clear(&mut self) {
        if let Some(previous) = self.registration.take() {
            debug!("Cleared payload callback of {}", previous.owner);
        }
    }

    pub fn registered_owner(&self) -> Option<&AppId> {
        self.registration.as_ref().map(|r| &r.owner)
    }

    /// Query the registered callback or fall back to the default payload
    pub fn prepare(&self) -> Option<OutboundIntent> {
        let foreground = self.foreground.foreground_apps();

        if let Some(registration) = &self.registration {
            if foreground.contains(&registration.owner) {
                let share = registration.callback.create_share()?;
                debug!(
                    "Callback of {} produced message={} uris={}",
                    registration.owner,
                    share.message.is_some(),
                    share.uris.len()
                );
                return Some(OutboundIntent::new(share.message, share.uris, share.flags));
            }
            debug!(
                "Payload callback owner {} is not in the foreground, ignoring",
                registration.owner
            );
        }

        let app = foreground.first()?;
        if self.excluded.iter().any(|e| e == app.as_str()) {
            debug!("No default payload for {}", app);
            return None;
        }

        info!("Using default payload for {}", app);
        Some(OutboundIntent::message(self.default_message(app)))
    }

    /// Notify the registered callback that its share was delivered
    pub fn notify_push_complete(&self) {
        if let Some(registration) = &self.registration {
            registration.callback.on_push_complete();
        }
    }

    fn default_message(&self, app: &AppId) -> Message {
        let uri = self.store_uri_template.replace("{app}", app.as_str());
        Message::new(vec![Record::uri(&uri), Record::app_id(app.as_str())])
    }
}

/// Fixed foreground list, for tests and simulations
#[derive(Debug, Clone, Default)]
pub struct StaticForeground {
    apps: Arc<parking_lot::RwLock<Vec<AppId>>>,
}

impl StaticForeground {
    pub fn new(apps: Vec<AppId>) -> Self {
        Self {
            apps: Arc::new(parking_lot::RwLock::new(apps)),
        }
    }

    pub fn set(&self, apps: Vec<AppId>) {
        *self.apps.write() = apps;
    }
}

impl ForegroundApps for StaticForeground {
    fn foreground_apps(&self) -> Vec<AppId> {
        self.apps.read().clone()
    }
}
