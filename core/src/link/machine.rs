//! Link lifecycle state machine
//!
//! Pure and synchronous: every transition updates the state and returns the
//! [`Effect`]s the event loop must carry out (spawn a cascade, arm a timer,
//! notify the presentation layer). Transitions are total over
//! `(LinkState, SendState, event)`; combinations that make no sense for the
//! current state are no-ops, because duplicate and out-of-order hardware
//! notifications are expected.

use crate::link::intent::OutboundIntent;
use crate::link::state::{LinkNotification, LinkState, RetryHint, SendOutcome, SendState};
use crate::settings::{DebounceConfig, LinkConfig};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Work the event loop performs after a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Notify(LinkNotification),
    /// Replace any connect task with a fresh connect cascade
    StartConnect,
    /// Replace any send task with a fresh send cascade
    StartSend,
    CancelSend,
    /// Replace the debounce timer with one firing after the duration
    ArmDebounce(Duration),
    CancelDebounce,
    /// Cancel any connect task and close the connected clients
    ReleaseClients,
    /// Tell the payload callback its share was delivered
    PushComplete,
    /// Persist that a share has succeeded at least once on this device
    PersistFirstShare,
}

/// What the connect cascade should try, captured at launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPlan {
    pub locators_pending: bool,
    pub message_pending: bool,
}

/// Counters exposed through diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStats {
    pub contacts: u64,
    pub sends_completed: u64,
    pub sends_unsupported: u64,
    pub sends_failed: u64,
    /// Contacts that ended while a send was still in flight
    pub sends_dropped: u64,
    pub receives: u64,
    pub last_send_ms: Option<u64>,
}

/// State owned by the link core
#[derive(Debug)]
pub struct LinkMachine {
    link_state: LinkState,
    send_state: SendState,
    intent: Option<OutboundIntent>,
    link_started_at: Option<Instant>,
    connect_delayed: bool,
    clients_connected: bool,
    debounce_armed: bool,
    send_enabled: bool,
    receive_enabled: bool,
    first_share_done: bool,
    debounce: DebounceConfig,
    fast_connect_budget: Duration,
    handover_supported: bool,
    stats: LinkStats,
}

impl LinkMachine {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            link_state: LinkState::Down,
            send_state: SendState::NothingToSend,
            intent: None,
            link_started_at: None,
            connect_delayed: false,
            clients_connected: false,
            debounce_armed: false,
            send_enabled: false,
            receive_enabled: false,
            first_share_done: false,
            debounce: config.debounce.clone(),
            fast_connect_budget: config.fast_connect_budget(),
            handover_supported: config.handover_supported,
            stats: LinkStats::default(),
        }
    }

    pub fn link_state(&self) -> LinkState {
        self.link_state
    }

    pub fn send_state(&self) -> SendState {
        self.send_state
    }

    pub fn intent(&self) -> Option<&OutboundIntent> {
        self.intent.as_ref()
    }

    pub fn clients_connected(&self) -> bool {
        self.clients_connected
    }

    pub fn connect_delayed(&self) -> bool {
        self.connect_delayed
    }

    pub fn debounce_armed(&self) -> bool {
        self.debounce_armed
    }

    pub fn send_enabled(&self) -> bool {
        self.send_enabled
    }

    pub fn receive_enabled(&self) -> bool {
        self.receive_enabled
    }

    pub fn first_share_done(&self) -> bool {
        self.first_share_done
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Restore the persisted one-shot flag at startup
    pub fn set_first_share_done(&mut self, done: bool) {
        self.first_share_done = done;
    }

    /// Record the enable flags. Returns the previous receive flag.
    pub fn set_enabled(&mut self, send_enabled: bool, receive_enabled: bool) -> bool {
        let was_receiving = self.receive_enabled;
        self.send_enabled = send_enabled;
        self.receive_enabled = receive_enabled;
        was_receiving
    }

    /// Whether a send cascade may be launched right now
    pub fn can_launch_send(&self) -> bool {
        self.link_state == LinkState::Up && self.send_state == SendState::Sending
    }

    /// Copy of the intent for a send cascade, `None` unless one may launch
    pub fn send_snapshot(&self) -> Option<OutboundIntent> {
        if !self.can_launch_send() {
            return None;
        }
        let mut intent = self.intent.clone()?;
        if !self.handover_supported {
            intent.uris.clear();
        }
        Some(intent)
    }

    /// What the connect cascade should attempt for the current intent
    pub fn connect_plan(&self) -> ConnectPlan {
        match &self.intent {
            Some(intent) => ConnectPlan {
                locators_pending: intent.has_locators() && self.handover_supported,
                message_pending: intent.has_message(),
            },
            None => ConnectPlan {
                locators_pending: false,
                message_pending: false,
            },
        }
    }

    /// A physical contact started
    pub fn on_link_activated<F>(&mut self, now: Instant, prepare: F) -> Vec<Effect>
    where
        F: FnOnce() -> Option<OutboundIntent>,
    {
        let mut effects = Vec::new();

        match self.link_state {
            LinkState::Down => {
                self.link_state = LinkState::WaitingFirstUnit;
                self.send_state = SendState::NothingToSend;
                self.connect_delayed = false;
                self.clients_connected = false;
                self.link_started_at = Some(now);
                self.stats.contacts += 1;
                info!("Link activated");
                effects.push(Effect::Notify(LinkNotification::InRange));

                let handover_supported = self.handover_supported;
                self.intent = if self.send_enabled {
                    prepare().filter(|intent| intent.is_sendable(handover_supported))
                } else {
                    None
                };

                let no_confirmation = match &self.intent {
                    Some(intent) => {
                        debug!(
                            contact = %intent.id,
                            "Prepared intent: message={} uris={}",
                            intent.has_message(),
                            intent.uris.len()
                        );
                        Some(intent.flags.no_confirmation)
                    }
                    None => None,
                };

                match no_confirmation {
                    Some(true) => {
                        self.send_state = SendState::Sending;
                        effects.extend(self.on_send_confirmed(false));
                    }
                    Some(false) => {
                        self.send_state = SendState::NeedConfirmation;
                        effects.push(Effect::Notify(LinkNotification::ConfirmationRequested));
                    }
                    None => {}
                }
            }
            LinkState::Debounce => {
                self.debounce_armed = false;
                effects.push(Effect::CancelDebounce);

                match self.send_state {
                    SendState::Sending => {
                        info!("Link back within debounce, resuming send");
                        self.link_state = LinkState::Up;
                        effects.push(Effect::Notify(LinkNotification::ResumeSend));
                        effects.push(Effect::StartConnect);
                    }
                    SendState::SendComplete => {
                        // Contact already served; do not offer it again.
                        self.link_state = LinkState::WaitingFirstUnit;
                        self.send_state = SendState::NothingToSend;
                    }
                    SendState::NothingToSend | SendState::NeedConfirmation => {
                        self.link_state = LinkState::WaitingFirstUnit;
                    }
                }
            }
            LinkState::WaitingFirstUnit | LinkState::Up => {
                debug!("Duplicate link activation in {}", self.link_state);
            }
        }

        effects
    }

    /// The first protocol data unit was observed on the link
    pub fn on_first_unit_received(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.link_state != LinkState::WaitingFirstUnit {
            return effects;
        }

        self.link_state = LinkState::Up;

        match self.send_state {
            SendState::NothingToSend | SendState::SendComplete => {}
            SendState::NeedConfirmation | SendState::Sending => {
                let elapsed = self
                    .link_started_at
                    .map(|started| now.saturating_duration_since(started))
                    .unwrap_or_default();

                if elapsed < self.fast_connect_budget || self.send_state == SendState::Sending {
                    effects.push(Effect::StartConnect);
                } else {
                    // Slow peer stacks misbehave when connected this late;
                    // wait for the user instead.
                    debug!("First unit after {:?}, delaying connect", elapsed);
                    self.connect_delayed = true;
                }
            }
        }

        effects
    }

    /// The user (or a no-confirmation intent) asked to send
    pub fn on_send_confirmed(&mut self, require_confirmation: bool) -> Vec<Effect> {
        let mut effects = Vec::new();

        if self.link_state == LinkState::Down {
            return effects;
        }
        if require_confirmation && self.send_state != SendState::NeedConfirmation {
            return effects;
        }

        self.send_state = SendState::Sending;

        match self.link_state {
            LinkState::WaitingFirstUnit => {
                self.link_state = LinkState::Up;
                effects.push(Effect::StartConnect);
            }
            LinkState::Up => {
                if self.clients_connected {
                    effects.push(Effect::StartSend);
                } else if self.connect_delayed {
                    self.connect_delayed = false;
                    effects.push(Effect::StartConnect);
                }
            }
            LinkState::Debounce => {
                self.debounce_armed = true;
                effects.push(Effect::ArmDebounce(self.debounce.for_state(SendState::Sending)));
                effects.push(Effect::Notify(LinkNotification::Debounce(RetryHint::TryAgain)));
            }
            LinkState::Down => {}
        }

        effects
    }

    /// The peer radio went out of range
    pub fn on_link_deactivated(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();

        match self.link_state {
            LinkState::WaitingFirstUnit | LinkState::Up => {
                let timeout = self.debounce.for_state(self.send_state);
                info!("Link deactivated, debounce {:?} in {}", timeout, self.send_state);

                self.link_state = LinkState::Debounce;
                self.debounce_armed = true;
                effects.push(Effect::ArmDebounce(timeout));

                if self.send_state == SendState::Sending {
                    effects.push(Effect::Notify(LinkNotification::Debounce(
                        RetryHint::LinkDropped,
                    )));
                }

                self.clients_connected = false;
                self.connect_delayed = false;
                effects.push(Effect::CancelSend);
                effects.push(Effect::ReleaseClients);
            }
            LinkState::Down | LinkState::Debounce => {
                debug!("Duplicate link deactivation in {}", self.link_state);
            }
        }

        effects
    }

    /// The debounce grace period elapsed without the link coming back
    pub fn on_debounce_timeout(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.link_state != LinkState::Debounce {
            return effects;
        }

        if self.send_state == SendState::Sending {
            warn!("Link lost before the share completed");
            self.stats.sends_dropped += 1;
        }

        self.finalize_down();
        effects.push(Effect::Notify(LinkNotification::OutOfRange));
        effects
    }

    /// Result of a connect cascade. Returns whether the clients were accepted;
    /// rejected clients must be closed by the caller.
    pub fn on_connect_outcome(&mut self, connected: bool) -> (bool, Vec<Effect>) {
        let mut effects = Vec::new();

        if self.link_state != LinkState::Up {
            debug!("Connect outcome in {}, discarding", self.link_state);
            return (false, effects);
        }
        if !connected {
            match self.send_state {
                SendState::Sending => {
                    warn!("No protocol client connected, giving up on the share");
                    self.send_state = SendState::NothingToSend;
                    self.stats.sends_failed += 1;
                }
                SendState::NeedConfirmation => {
                    // Retry once the user confirms.
                    debug!("No protocol client connected ahead of confirmation");
                    self.connect_delayed = true;
                }
                SendState::NothingToSend | SendState::SendComplete => {
                    debug!("No protocol client connected");
                }
            }
            return (false, effects);
        }

        self.clients_connected = true;
        if self.send_state == SendState::Sending {
            effects.push(Effect::StartSend);
        }

        (true, effects)
    }

    /// Result of a send cascade
    pub fn on_send_outcome(&mut self, outcome: SendOutcome, elapsed: Duration) -> Vec<Effect> {
        let mut effects = Vec::new();

        if self.link_state == LinkState::Down || self.send_state != SendState::Sending {
            debug!(
                "Send outcome {:?} in {}/{}, discarding",
                outcome, self.link_state, self.send_state
            );
            return effects;
        }

        self.stats.last_send_ms = Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));

        match outcome {
            SendOutcome::Success => {
                info!("Share completed in {:?}", elapsed);
                self.send_state = SendState::SendComplete;
                self.stats.sends_completed += 1;

                if self.debounce_armed {
                    if self.link_state == LinkState::Debounce {
                        effects.push(Effect::ArmDebounce(
                            self.debounce.for_state(SendState::SendComplete),
                        ));
                    } else {
                        self.debounce_armed = false;
                        effects.push(Effect::CancelDebounce);
                    }
                }

                effects.push(Effect::Notify(LinkNotification::SendComplete));
                effects.push(Effect::PushComplete);

                if !self.first_share_done {
                    self.first_share_done = true;
                    effects.push(Effect::PersistFirstShare);
                }
            }
            SendOutcome::Unsupported => {
                info!("Peer does not support any offered exchange protocol");
                self.send_state = SendState::NothingToSend;
                self.stats.sends_unsupported += 1;
                effects.push(Effect::Notify(LinkNotification::ProtocolUnsupported));
            }
            SendOutcome::Failed => {
                warn!("Every send candidate failed after {:?}", elapsed);
                self.send_state = SendState::NothingToSend;
                self.stats.sends_failed += 1;
            }
        }

        effects
    }

    /// Something was received from the peer
    pub fn on_receive_outcome(&mut self, play_feedback: bool) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.link_state == LinkState::Down {
            return effects;
        }

        if self.send_state == SendState::Sending {
            effects.push(Effect::CancelSend);
        }
        self.send_state = SendState::NothingToSend;
        self.stats.receives += 1;
        effects.push(Effect::Notify(LinkNotification::ReceiveComplete { play_feedback }));
        effects
    }

    /// Force the link down, e.g. when the radio is switched off
    pub fn reset(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.link_state == LinkState::Down {
            return effects;
        }

        info!("Resetting link from {}", self.link_state);
        effects.push(Effect::CancelDebounce);
        effects.push(Effect::CancelSend);
        effects.push(Effect::ReleaseClients);
        self.finalize_down();
        effects.push(Effect::Notify(LinkNotification::OutOfRange));
        effects
    }

    fn finalize_down(&mut self) {
        self.link_state = LinkState::Down;
        self.send_state = SendState::NothingToSend;
        self.intent = None;
        self.link_started_at = None;
        self.connect_delayed = false;
        self.clients_connected = false;
        self.debounce_armed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, Record};

    fn machine() -> LinkMachine {
        let mut m = LinkMachine::new(&LinkConfig::default());
        m.set_enabled(true, true);
        m
    }

    fn message_intent() -> Option<OutboundIntent> {
        Some(OutboundIntent::message(Message::single(Record::uri(
            "https://example.com",
        ))))
    }

    fn notifications(effects: &[Effect]) -> Vec<LinkNotification> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Notify(n) => Some(*n),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_activation_without_payload() {
        let mut m = machine();
        let effects = m.on_link_activated(Instant::now(), || None);

        assert_eq!(m.link_state(), LinkState::WaitingFirstUnit);
        assert_eq!(m.send_state(), SendState::NothingToSend);
        assert_eq!(effects, vec![Effect::Notify(LinkNotification::InRange)]);
    }

    #[test]
    fn test_activation_with_payload_requests_confirmation() {
        let mut m = machine();
        let effects = m.on_link_activated(Instant::now(), message_intent);

        assert_eq!(m.send_state(), SendState::NeedConfirmation);
        assert_eq!(
            notifications(&effects),
            vec![
                LinkNotification::InRange,
                LinkNotification::ConfirmationRequested
            ]
        );
    }

    #[test]
    fn test_activation_no_confirmation_connects() {
        let mut m = machine();
        let effects = m.on_link_activated(Instant::now(), || {
            message_intent().map(|i| i.without_confirmation())
        });

        assert_eq!(m.link_state(), LinkState::Up);
        assert_eq!(m.send_state(), SendState::Sending);
        assert!(effects.contains(&Effect::StartConnect));
        assert!(!notifications(&effects).contains(&LinkNotification::ConfirmationRequested));
    }

    #[test]
    fn test_send_disabled_skips_payload_query() {
        let mut m = machine();
        m.set_enabled(false, true);
        let effects = m.on_link_activated(Instant::now(), || panic!("must not be queried"));

        assert_eq!(m.send_state(), SendState::NothingToSend);
        assert_eq!(effects, vec![Effect::Notify(LinkNotification::InRange)]);
    }

    #[test]
    fn test_locators_ignored_without_handover_support() {
        let mut config = LinkConfig::default();
        config.handover_supported = false;
        let mut m = LinkMachine::new(&config);
        m.set_enabled(true, true);

        m.on_link_activated(Instant::now(), || {
            Some(OutboundIntent::uris(vec!["content://a".to_string()]))
        });
        assert_eq!(m.send_state(), SendState::NothingToSend);
        assert!(m.intent().is_none());
    }

    #[test]
    fn test_duplicate_activation_is_noop() {
        let mut m = machine();
        let now = Instant::now();
        m.on_link_activated(now, message_intent);
        let effects = m.on_link_activated(now, || panic!("must not be queried"));

        assert!(effects.is_empty());
        assert_eq!(m.link_state(), LinkState::WaitingFirstUnit);
        assert_eq!(m.send_state(), SendState::NeedConfirmation);
        assert_eq!(m.stats().contacts, 1);
    }

    #[test]
    fn test_first_unit_fast_connects() {
        let mut m = machine();
        let start = Instant::now();
        m.on_link_activated(start, message_intent);
        let effects = m.on_first_unit_received(start + Duration::from_millis(50));

        assert_eq!(m.link_state(), LinkState::Up);
        assert_eq!(effects, vec![Effect::StartConnect]);
        assert!(!m.connect_delayed());
    }

    #[test]
    fn test_first_unit_slow_delays_connect() {
        let mut m = machine();
        let start = Instant::now();
        m.on_link_activated(start, message_intent);
        let effects = m.on_first_unit_received(start + Duration::from_millis(400));

        assert!(effects.is_empty());
        assert!(m.connect_delayed());

        let effects = m.on_send_confirmed(true);
        assert_eq!(effects, vec![Effect::StartConnect]);
        assert!(!m.connect_delayed());
        assert_eq!(m.send_state(), SendState::Sending);
    }

    #[test]
    fn test_first_unit_with_nothing_to_send() {
        let mut m = machine();
        let start = Instant::now();
        m.on_link_activated(start, || None);
        let effects = m.on_first_unit_received(start);

        assert_eq!(m.link_state(), LinkState::Up);
        assert!(effects.is_empty());
    }

    #[test]
    fn test_first_unit_ignored_outside_waiting() {
        let mut m = machine();
        assert!(m.on_first_unit_received(Instant::now()).is_empty());
        assert_eq!(m.link_state(), LinkState::Down);
    }

    #[test]
    fn test_confirm_while_waiting_promotes_to_up() {
        let mut m = machine();
        m.on_link_activated(Instant::now(), message_intent);
        let effects = m.on_send_confirmed(true);

        assert_eq!(m.link_state(), LinkState::Up);
        assert_eq!(effects, vec![Effect::StartConnect]);
    }

    #[test]
    fn test_confirm_with_connected_clients_sends() {
        let mut m = machine();
        let now = Instant::now();
        m.on_link_activated(now, message_intent);
        m.on_first_unit_received(now);
        let (accepted, effects) = m.on_connect_outcome(true);
        assert!(accepted);
        assert!(effects.is_empty());

        let effects = m.on_send_confirmed(true);
        assert_eq!(effects, vec![Effect::StartSend]);
        assert!(m.can_launch_send());
    }

    #[test]
    fn test_confirm_ignored_when_not_needed() {
        let mut m = machine();
        m.on_link_activated(Instant::now(), || None);
        assert!(m.on_send_confirmed(true).is_empty());
        assert_eq!(m.send_state(), SendState::NothingToSend);
    }

    #[test]
    fn test_confirm_ignored_when_down() {
        let mut m = machine();
        assert!(m.on_send_confirmed(false).is_empty());
        assert_eq!(m.send_state(), SendState::NothingToSend);
    }

    #[test]
    fn test_confirm_during_debounce_rearms_timer() {
        let mut m = machine();
        m.on_link_activated(Instant::now(), message_intent);
        m.on_link_deactivated();
        let effects = m.on_send_confirmed(true);

        assert_eq!(m.link_state(), LinkState::Debounce);
        assert_eq!(
            effects,
            vec![
                Effect::ArmDebounce(Duration::from_millis(5000)),
                Effect::Notify(LinkNotification::Debounce(RetryHint::TryAgain)),
            ]
        );
    }

    #[test]
    fn test_deactivation_debounce_durations() {
        let cases: Vec<(Option<OutboundIntent>, bool, u64)> = vec![
            (None, false, 0),
            (message_intent(), false, 3000),
            (message_intent(), true, 5000),
        ];

        for (intent, confirm, expected_ms) in cases {
            let mut m = machine();
            m.on_link_activated(Instant::now(), move || intent);
            if confirm {
                m.on_send_confirmed(true);
            }
            let effects = m.on_link_deactivated();
            assert_eq!(effects[0], Effect::ArmDebounce(Duration::from_millis(expected_ms)));
            assert_eq!(m.link_state(), LinkState::Debounce);
        }
    }

    #[test]
    fn test_deactivation_while_sending_notifies() {
        let mut m = machine();
        m.on_link_activated(Instant::now(), message_intent);
        m.on_send_confirmed(true);
        let effects = m.on_link_deactivated();

        assert_eq!(
            notifications(&effects),
            vec![LinkNotification::Debounce(RetryHint::LinkDropped)]
        );
        assert!(effects.contains(&Effect::CancelSend));
        assert!(effects.contains(&Effect::ReleaseClients));
    }

    #[test]
    fn test_duplicate_deactivation_is_noop() {
        let mut m = machine();
        m.on_link_activated(Instant::now(), message_intent);
        m.on_link_deactivated();
        assert!(m.on_link_deactivated().is_empty());

        let mut down = machine();
        assert!(down.on_link_deactivated().is_empty());
    }

    #[test]
    fn test_debounce_timeout_goes_down() {
        let mut m = machine();
        m.on_link_activated(Instant::now(), message_intent);
        m.on_send_confirmed(true);
        m.on_link_deactivated();
        let effects = m.on_debounce_timeout();

        assert_eq!(m.link_state(), LinkState::Down);
        assert_eq!(m.send_state(), SendState::NothingToSend);
        assert!(m.intent().is_none());
        assert_eq!(m.stats().sends_dropped, 1);
        assert_eq!(effects, vec![Effect::Notify(LinkNotification::OutOfRange)]);
    }

    #[test]
    fn test_debounce_timeout_ignored_outside_debounce() {
        let mut m = machine();
        m.on_link_activated(Instant::now(), message_intent);
        assert!(m.on_debounce_timeout().is_empty());
        assert_eq!(m.link_state(), LinkState::WaitingFirstUnit);
    }

    #[test]
    fn test_reactivation_resumes_sending() {
        let mut m = machine();
        m.on_link_activated(Instant::now(), message_intent);
        m.on_send_confirmed(true);
        m.on_link_deactivated();
        let effects = m.on_link_activated(Instant::now(), || panic!("must not be queried"));

        assert_eq!(m.link_state(), LinkState::Up);
        assert_eq!(m.send_state(), SendState::Sending);
        assert_eq!(
            effects,
            vec![
                Effect::CancelDebounce,
                Effect::Notify(LinkNotification::ResumeSend),
                Effect::StartConnect
            ]
        );

        let (accepted, effects) = m.on_connect_outcome(true);
        assert!(accepted);
        assert_eq!(effects, vec![Effect::StartSend]);
    }

    #[test]
    fn test_first_connect_does_not_claim_resume() {
        let mut m = machine();
        m.on_link_activated(Instant::now(), message_intent);
        m.on_send_confirmed(true);
        let (_, effects) = m.on_connect_outcome(true);
        assert_eq!(effects, vec![Effect::StartSend]);
    }

    #[test]
    fn test_reactivation_keeps_confirmation_pending() {
        let mut m = machine();
        m.on_link_activated(Instant::now(), message_intent);
        m.on_link_deactivated();
        m.on_link_activated(Instant::now(), || panic!("must not be queried"));

        assert_eq!(m.link_state(), LinkState::WaitingFirstUnit);
        assert_eq!(m.send_state(), SendState::NeedConfirmation);
    }

    #[test]
    fn test_connect_outcome_rejected_outside_up() {
        let mut m = machine();
        m.on_link_activated(Instant::now(), message_intent);
        m.on_send_confirmed(true);
        m.on_link_deactivated();

        let (accepted, effects) = m.on_connect_outcome(true);
        assert!(!accepted);
        assert!(effects.is_empty());
        assert!(!m.clients_connected());
    }

    #[test]
    fn test_send_success_completes() {
        let mut m = machine();
        m.on_link_activated(Instant::now(), message_intent);
        m.on_send_confirmed(true);
        m.on_connect_outcome(true);
        let effects = m.on_send_outcome(SendOutcome::Success, Duration::from_millis(120));

        assert_eq!(m.send_state(), SendState::SendComplete);
        assert_eq!(
            effects,
            vec![
                Effect::Notify(LinkNotification::SendComplete),
                Effect::PushComplete,
                Effect::PersistFirstShare,
            ]
        );
        assert_eq!(m.stats().last_send_ms, Some(120));
        assert!(m.first_share_done());
    }

    #[test]
    fn test_first_share_persisted_once() {
        let mut m = machine();
        m.set_first_share_done(true);
        m.on_link_activated(Instant::now(), message_intent);
        m.on_send_confirmed(true);
        let effects = m.on_send_outcome(SendOutcome::Success, Duration::ZERO);
        assert!(!effects.contains(&Effect::PersistFirstShare));
    }

    #[test]
    fn test_send_unsupported() {
        let mut m = machine();
        m.on_link_activated(Instant::now(), message_intent);
        m.on_send_confirmed(true);
        let effects = m.on_send_outcome(SendOutcome::Unsupported, Duration::ZERO);

        assert_eq!(m.send_state(), SendState::NothingToSend);
        assert_eq!(
            effects,
            vec![Effect::Notify(LinkNotification::ProtocolUnsupported)]
        );
    }

    #[test]
    fn test_send_failed_counts() {
        let mut m = machine();
        m.on_link_activated(Instant::now(), message_intent);
        m.on_send_confirmed(true);
        let effects = m.on_send_outcome(SendOutcome::Failed, Duration::ZERO);

        assert!(effects.is_empty());
        assert_eq!(m.send_state(), SendState::NothingToSend);
        assert_eq!(m.stats().sends_failed, 1);
    }

    #[test]
    fn test_stale_send_outcome_dropped() {
        let mut m = machine();
        m.on_link_activated(Instant::now(), message_intent);
        let effects = m.on_send_outcome(SendOutcome::Success, Duration::ZERO);
        assert!(effects.is_empty());
        assert_eq!(m.send_state(), SendState::NeedConfirmation);
    }

    #[test]
    fn test_send_success_in_debounce_shortens_grace() {
        let mut m = machine();
        m.on_link_activated(Instant::now(), message_intent);
        m.on_send_confirmed(true);
        m.on_link_deactivated();
        let effects = m.on_send_outcome(SendOutcome::Success, Duration::ZERO);

        assert_eq!(effects[0], Effect::ArmDebounce(Duration::from_millis(250)));
        assert_eq!(m.send_state(), SendState::SendComplete);
    }

    #[test]
    fn test_after_complete_reactivation_does_not_reprompt() {
        let mut m = machine();
        let now = Instant::now();
        m.on_link_activated(now, message_intent);
        m.on_send_confirmed(true);
        m.on_connect_outcome(true);
        m.on_send_outcome(SendOutcome::Success, Duration::ZERO);

        let effects = m.on_link_deactivated();
        assert_eq!(effects[0], Effect::ArmDebounce(Duration::from_millis(250)));

        let effects = m.on_link_activated(now, || panic!("must not be queried"));
        assert_eq!(effects, vec![Effect::CancelDebounce]);
        let effects = m.on_first_unit_received(now);
        assert!(effects.is_empty());
        assert_eq!(m.link_state(), LinkState::Up);
        assert_eq!(m.send_state(), SendState::NothingToSend);
    }

    #[test]
    fn test_receive_cancels_send() {
        let mut m = machine();
        m.on_link_activated(Instant::now(), message_intent);
        m.on_send_confirmed(true);
        let effects = m.on_receive_outcome(true);

        assert_eq!(
            effects,
            vec![
                Effect::CancelSend,
                Effect::Notify(LinkNotification::ReceiveComplete {
                    play_feedback: true
                }),
            ]
        );
        assert_eq!(m.send_state(), SendState::NothingToSend);
        assert_eq!(m.stats().receives, 1);
    }

    #[test]
    fn test_receive_ignored_when_down() {
        let mut m = machine();
        assert!(m.on_receive_outcome(false).is_empty());
    }

    #[test]
    fn test_reset_forces_down() {
        let mut m = machine();
        m.on_link_activated(Instant::now(), message_intent);
        m.on_send_confirmed(true);
        let effects = m.reset();

        assert_eq!(m.link_state(), LinkState::Down);
        assert!(effects.contains(&Effect::ReleaseClients));
        assert_eq!(
            notifications(&effects),
            vec![LinkNotification::OutOfRange]
        );
        assert!(m.reset().is_empty());
    }

    #[test]
    fn test_connect_plan() {
        let mut m = machine();
        m.on_link_activated(Instant::now(), || {
            Some(OutboundIntent::new(
                Some(Message::single(Record::uri("https://a"))),
                vec!["content://b".to_string()],
                Default::default(),
            ))
        });
        let plan = m.connect_plan();
        assert!(plan.locators_pending);
        assert!(plan.message_pending);
    }

    #[test]
    fn test_exhausted_connect_abandons_send() {
        let mut m = machine();
        let now = Instant::now();
        m.on_link_activated(now, message_intent);
        m.on_first_unit_received(now);
        m.on_send_confirmed(true);

        let (accepted, effects) = m.on_connect_outcome(false);
        assert!(!accepted);
        assert!(effects.is_empty());
        assert_eq!(m.link_state(), LinkState::Up);
        assert_eq!(m.send_state(), SendState::NothingToSend);
        assert_eq!(m.stats().sends_failed, 1);

        // Losing the link now is an ordinary dropout, not a lost send.
        let effects = m.on_link_deactivated();
        assert_eq!(effects[0], Effect::ArmDebounce(Duration::ZERO));
        assert!(notifications(&effects).is_empty());
        m.on_debounce_timeout();
        assert_eq!(m.stats().sends_dropped, 0);
    }

    #[test]
    fn test_failed_early_connect_retried_on_confirm() {
        let mut m = machine();
        let now = Instant::now();
        m.on_link_activated(now, message_intent);
        assert_eq!(m.on_first_unit_received(now), vec![Effect::StartConnect]);

        m.on_connect_outcome(false);
        assert_eq!(m.send_state(), SendState::NeedConfirmation);
        assert_eq!(m.stats().sends_failed, 0);

        assert_eq!(m.on_send_confirmed(true), vec![Effect::StartConnect]);
        assert_eq!(m.send_state(), SendState::Sending);
    }

    #[test]
    fn test_failed_resume_connect_abandons_send() {
        let mut m = machine();
        m.on_link_activated(Instant::now(), message_intent);
        m.on_send_confirmed(true);
        m.on_link_deactivated();
        m.on_link_activated(Instant::now(), || None);

        m.on_connect_outcome(false);
        assert_eq!(m.send_state(), SendState::NothingToSend);
        assert_eq!(m.stats().sends_failed, 1);
    }

    #[test]
    fn test_send_duration_saturates() {
        let mut m = machine();
        m.on_link_activated(Instant::now(), message_intent);
        m.on_send_confirmed(true);
        m.on_send_outcome(SendOutcome::Success, Duration::MAX);
        assert_eq!(m.stats().last_send_ms, Some(u64::MAX));
    }
}
