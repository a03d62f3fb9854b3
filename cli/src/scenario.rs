// Scripted contact scenarios run against an in-process simulated peer

use anyhow::{Context, Result};
use clap::ValueEnum;
use contactlink_core::link::{IntentFlags, LinkManager, LinkServices, LinkSnapshot};
use contactlink_core::payload::{PayloadCallback, ShareData};
use contactlink_core::protocol::{SimBehavior, SimPeer};
use contactlink_core::{
    AppId, ChannelListener, LinkConfig, LinkNotification, Message, PreferenceStore, Record,
    RetryHint, SendState, StaticForeground,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Callback share sent without confirmation over simple-push
    NoConfirm,
    /// Excluded foreground app, contact drops right away
    NothingToSend,
    /// Link drops mid-send and returns inside the grace period
    Dropout,
    /// Peer ignores negotiation for a locator share
    Unsupported,
    /// Locator share negotiated and handed off
    Handover,
    /// Peer only speaks the legacy push protocol
    LegacyOnly,
    /// Peer refuses every protocol
    Unreachable,
}

impl Scenario {
    pub fn all() -> &'static [Scenario] {
        &[
            Scenario::NoConfirm,
            Scenario::NothingToSend,
            Scenario::Dropout,
            Scenario::Unsupported,
            Scenario::Handover,
            Scenario::LegacyOnly,
            Scenario::Unreachable,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::NoConfirm => "no-confirm",
            Scenario::NothingToSend => "nothing-to-send",
            Scenario::Dropout => "dropout",
            Scenario::Unsupported => "unsupported",
            Scenario::Handover => "handover",
            Scenario::LegacyOnly => "legacy-only",
            Scenario::Unreachable => "unreachable",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Scenario::NoConfirm => "callback share sent without confirmation over simple-push",
            Scenario::NothingToSend => "excluded foreground app, contact drops right away",
            Scenario::Dropout => "link drops mid-send and returns inside the grace period",
            Scenario::Unsupported => "peer ignores negotiation for a locator share",
            Scenario::Handover => "locator share negotiated and handed off",
            Scenario::LegacyOnly => "peer only speaks the legacy push protocol",
            Scenario::Unreachable => "peer refuses every protocol",
        }
    }

    fn behavior(&self) -> SimBehavior {
        match self {
            Scenario::NoConfirm => SimBehavior {
                negotiation: false,
                ..SimBehavior::default()
            },
            Scenario::Dropout => SimBehavior {
                send_delay: Duration::from_millis(500),
                ..SimBehavior::default()
            },
            Scenario::Unsupported => SimBehavior {
                answers_negotiation: false,
                ..SimBehavior::default()
            },
            Scenario::LegacyOnly => SimBehavior::legacy_only(),
            Scenario::Unreachable => SimBehavior::unreachable(),
            Scenario::NothingToSend | Scenario::Handover => SimBehavior::default(),
        }
    }

    /// Share registered by the foreground app, if any
    fn share(&self) -> Option<ShareData> {
        match self {
            Scenario::NoConfirm => Some(ShareData {
                message: Some(contact_card()),
                uris: Vec::new(),
                flags: IntentFlags {
                    no_confirmation: true,
                },
            }),
            Scenario::Unsupported | Scenario::Handover => Some(ShareData {
                message: None,
                uris: vec!["content://media/photos/42".to_string()],
                flags: IntentFlags::default(),
            }),
            _ => None,
        }
    }

    fn foreground(&self, configured: &str) -> String {
        match self {
            Scenario::NothingToSend => "com.android.launcher".to_string(),
            _ => configured.to_string(),
        }
    }

    fn steps(&self) -> Vec<Step> {
        use Step::*;
        match self {
            Scenario::NoConfirm => vec![Activate, Wait(300)],
            Scenario::NothingToSend => vec![Activate, Deactivate, Wait(200)],
            Scenario::Dropout => vec![
                Activate,
                FirstUnit,
                Wait(50),
                Confirm,
                Wait(200),
                Deactivate,
                Wait(1000),
                Activate,
                Wait(800),
            ],
            Scenario::Unsupported
            | Scenario::Handover
            | Scenario::LegacyOnly
            | Scenario::Unreachable => vec![Activate, FirstUnit, Confirm, Wait(300)],
        }
    }

    /// Notifications a correct link manager produces for this scenario
    pub fn expected(&self) -> Vec<LinkNotification> {
        use LinkNotification::*;
        match self {
            Scenario::NoConfirm => vec![InRange, SendComplete],
            Scenario::NothingToSend => vec![InRange, OutOfRange],
            Scenario::Dropout => vec![
                InRange,
                ConfirmationRequested,
                Debounce(RetryHint::LinkDropped),
                ResumeSend,
                SendComplete,
            ],
            Scenario::Unsupported => vec![InRange, ConfirmationRequested, ProtocolUnsupported],
            Scenario::Handover | Scenario::LegacyOnly => {
                vec![InRange, ConfirmationRequested, SendComplete]
            }
            Scenario::Unreachable => vec![InRange, ConfirmationRequested],
        }
    }

    /// Send state left behind once the scenario script has run
    pub fn expected_send_state(&self) -> SendState {
        match self {
            Scenario::NoConfirm | Scenario::Dropout | Scenario::Handover | Scenario::LegacyOnly => {
                SendState::SendComplete
            }
            Scenario::NothingToSend | Scenario::Unsupported | Scenario::Unreachable => {
                SendState::NothingToSend
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Activate,
    FirstUnit,
    Confirm,
    Deactivate,
    Wait(u64),
}

struct ScriptedShare(ShareData);

impl PayloadCallback for ScriptedShare {
    fn create_share(&self) -> Option<ShareData> {
        Some(self.0.clone())
    }
}

fn contact_card() -> Message {
    Message::new(vec![
        Record::mime(
            "text/vcard",
            b"BEGIN:VCARD\nVERSION:3.0\nFN:Sim Peer\nEND:VCARD".to_vec(),
        ),
        Record::app_id("com.example.contacts"),
    ])
}

/// What happened during a scenario run
pub struct ScenarioRun {
    pub notifications: Vec<LinkNotification>,
    pub snapshot: LinkSnapshot,
    pub delivered: usize,
    pub handoffs: usize,
}

impl ScenarioRun {
    pub fn matches(&self, scenario: Scenario) -> bool {
        self.notifications == scenario.expected()
            && self.snapshot.send_state == scenario.expected_send_state()
    }
}

/// Drive one scenario to completion
pub async fn run<F>(
    scenario: Scenario,
    config: &LinkConfig,
    foreground_app: &str,
    preferences: Option<Arc<dyn PreferenceStore>>,
    mut on_notification: F,
) -> Result<ScenarioRun>
where
    F: FnMut(&LinkNotification),
{
    let peer = SimPeer::new(scenario.behavior());
    let app = AppId::new(scenario.foreground(foreground_app));
    let foreground = StaticForeground::new(vec![app.clone()]);
    let (listener, mut rx) = ChannelListener::new();

    let mut services = LinkServices::new(peer.factory(), Arc::new(listener), Arc::new(foreground))
        .with_handoff(peer.handoff());
    if let Some(preferences) = preferences {
        services = services.with_preferences(preferences);
    }

    let manager = LinkManager::start(config.clone(), services)
        .context("Failed to start link manager")?;
    manager.enable(true, true)?;
    if let Some(share) = scenario.share() {
        manager.set_payload_callback(app, Arc::new(ScriptedShare(share)))?;
    }

    let mut notifications = Vec::new();
    for step in scenario.steps() {
        match step {
            Step::Activate => manager.notify_link_active()?,
            Step::FirstUnit => manager.notify_link_first_unit()?,
            Step::Confirm => manager.confirm_send()?,
            Step::Deactivate => manager.notify_link_inactive()?,
            Step::Wait(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
        }
        drain(&mut rx, &mut notifications, &mut on_notification);
    }

    let snapshot = manager.snapshot();
    manager.shutdown()?;
    drain(&mut rx, &mut notifications, &mut on_notification);

    Ok(ScenarioRun {
        notifications,
        snapshot,
        delivered: peer.received().len(),
        handoffs: peer.handoffs().len(),
    })
}

fn drain<F>(
    rx: &mut mpsc::UnboundedReceiver<LinkNotification>,
    into: &mut Vec<LinkNotification>,
    on_notification: &mut F,
) where
    F: FnMut(&LinkNotification),
{
    while let Ok(notification) = rx.try_recv() {
        on_notification(&notification);
        into.push(notification);
    }
}
