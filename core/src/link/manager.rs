// Link manager: public handle plus the single-consumer event loop

use crate::link::events::{LinkEvent, LinkListener};
use crate::link::machine::{Effect, LinkMachine, LinkStats};
use crate::link::state::{LinkState, SendState};
use crate::link::task::TaskSlot;
use crate::message::Message;
use crate::payload::{AppId, ForegroundApps, PayloadCallback, PayloadSource};
use crate::protocol::client::{
    ClientFactory, ConnectedClients, ProtocolKind, ProtocolServers, TransferHandoff,
};
use crate::protocol::negotiator::{connect_cascade, release_clients, send_cascade};
use crate::settings::{LinkConfig, LinkParams};
use crate::store::{MemoryPreferences, PreferenceStore, FIRST_SHARE_KEY};
use crate::LinkError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Collaborators the link manager drives
#[derive(Clone)]
pub struct LinkServices {
    pub clients: Arc<dyn ClientFactory>,
    pub listener: Arc<dyn LinkListener>,
    pub foreground: Arc<dyn ForegroundApps>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub servers: Option<Arc<dyn ProtocolServers>>,
    pub handoff: Option<Arc<dyn TransferHandoff>>,
}

impl LinkServices {
    /// Services with in-memory preferences, no servers and no handoff
    pub fn new(
        clients: Arc<dyn ClientFactory>,
        listener: Arc<dyn LinkListener>,
        foreground: Arc<dyn ForegroundApps>,
    ) -> Self {
        Self {
            clients,
            listener,
            foreground,
            preferences: Arc::new(MemoryPreferences::new()),
            servers: None,
            handoff: None,
        }
    }

    pub fn with_preferences(mut self, preferences: Arc<dyn PreferenceStore>) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn with_servers(mut self, servers: Arc<dyn ProtocolServers>) -> Self {
        self.servers = Some(servers);
        self
    }

    pub fn with_handoff(mut self, handoff: Arc<dyn TransferHandoff>) -> Self {
        self.handoff = Some(handoff);
        self
    }
}

/// Point-in-time view of the link, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSnapshot {
    pub link_state: LinkState,
    pub send_state: SendState,
    pub intent_id: Option<Uuid>,
    pub has_message: bool,
    pub uri_count: usize,
    pub connect_delayed: bool,
    pub clients: Vec<ProtocolKind>,
    pub debounce_armed: bool,
    pub send_enabled: bool,
    pub receive_enabled: bool,
    pub first_share_done: bool,
    pub payload_owner: Option<AppId>,
    pub stats: LinkStats,
}

impl LinkSnapshot {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// State shared between the handle and the event loop
struct LinkCore {
    machine: LinkMachine,
    clients: ConnectedClients,
    payload_owner: Option<AppId>,
}

impl LinkCore {
    fn snapshot(&self) -> LinkSnapshot {
        let intent = self.machine.intent();
        LinkSnapshot {
            link_state: self.machine.link_state(),
            send_state: self.machine.send_state(),
            intent_id: intent.map(|i| i.id),
            has_message: intent.map(|i| i.has_message()).unwrap_or(false),
            uri_count: intent.map(|i| i.uris.len()).unwrap_or(0),
            connect_delayed: self.machine.connect_delayed(),
            clients: self.clients.kinds(),
            debounce_armed: self.machine.debounce_armed(),
            send_enabled: self.machine.send_enabled(),
            receive_enabled: self.machine.receive_enabled(),
            first_share_done: self.machine.first_share_done(),
            payload_owner: self.payload_owner.clone(),
            stats: self.machine.stats().clone(),
        }
    }
}

/// Handle to a running link manager.
///
/// Every call only enqueues an event; transitions happen one at a time on
/// the event loop in arrival order. Cloning the handle is cheap.
#[derive(Clone)]
pub struct LinkManager {
    event_tx: mpsc::UnboundedSender<LinkEvent>,
    core: Arc<Mutex<LinkCore>>,
}

impl LinkManager {
    /// Validate the configuration and spawn the event loop.
    ///
    /// Must be called from within a tokio runtime. Sending and receiving
    /// start disabled; call [`LinkManager::enable`] to begin.
    pub fn start(config: LinkConfig, services: LinkServices) -> Result<Self, LinkError> {
        config.validate()?;

        let first_share_done = services
            .preferences
            .get_bool(FIRST_SHARE_KEY)?
            .unwrap_or(false);

        let mut machine = LinkMachine::new(&config);
        machine.set_first_share_done(first_share_done);

        let core = Arc::new(Mutex::new(LinkCore {
            machine,
            clients: ConnectedClients::default(),
            payload_owner: None,
        }));

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let event_loop = EventLoop {
            core: core.clone(),
            event_tx: event_tx.downgrade(),
            event_rx,
            payload: PayloadSource::new(&config, services.foreground.clone()),
            params: config.link,
            services,
            connect: TaskSlot::new("connect"),
            send: TaskSlot::new("send"),
            debounce: TaskSlot::new("debounce"),
        };
        tokio::spawn(event_loop.run());

        info!(
            "Link manager started (first share done: {})",
            first_share_done
        );
        Ok(Self { event_tx, core })
    }

    fn post(&self, event: LinkEvent) -> Result<(), LinkError> {
        debug!("Posting {}", event.name());
        self.event_tx
            .send(event)
            .map_err(|_| LinkError::NotRunning)
    }

    /// The hardware reports a link with a peer
    pub fn notify_link_active(&self) -> Result<(), LinkError> {
        self.post(LinkEvent::LinkActivated)
    }

    /// The first protocol data unit of the contact arrived
    pub fn notify_link_first_unit(&self) -> Result<(), LinkError> {
        self.post(LinkEvent::FirstUnitReceived)
    }

    /// The hardware reports the link gone
    pub fn notify_link_inactive(&self) -> Result<(), LinkError> {
        self.post(LinkEvent::LinkDeactivated)
    }

    /// A message arrived from the peer through one of the servers
    pub fn notify_received(&self, message: &Message) -> Result<(), LinkError> {
        debug!(
            "Received {} records ({} bytes)",
            message.records.len(),
            message.payload_len()
        );
        self.post(LinkEvent::ReceiveOutcome {
            play_feedback: true,
        })
    }

    /// The peer asked to negotiate a transfer; the transfer itself reports
    /// its own progress, so no feedback is played here
    pub fn notify_negotiation_request_received(&self) -> Result<(), LinkError> {
        self.post(LinkEvent::ReceiveOutcome {
            play_feedback: false,
        })
    }

    /// The user confirmed the pending share
    pub fn confirm_send(&self) -> Result<(), LinkError> {
        self.post(LinkEvent::SendConfirmed {
            require_confirmation: true,
        })
    }

    pub fn set_payload_callback(
        &self,
        owner: AppId,
        callback: Arc<dyn PayloadCallback>,
    ) -> Result<(), LinkError> {
        self.post(LinkEvent::SetPayloadCallback { owner, callback })
    }

    pub fn clear_payload_callback(&self) -> Result<(), LinkError> {
        self.post(LinkEvent::ClearPayloadCallback)
    }

    pub fn enable(&self, send_enabled: bool, receive_enabled: bool) -> Result<(), LinkError> {
        self.post(LinkEvent::Enable {
            send_enabled,
            receive_enabled,
        })
    }

    /// Disable both directions and force the link down
    pub fn disable(&self) -> Result<(), LinkError> {
        self.post(LinkEvent::Disable)
    }

    /// The foreground user changed; registrations of the old user go away
    pub fn on_user_switched(&self) -> Result<(), LinkError> {
        self.post(LinkEvent::UserSwitched)
    }

    /// Stop the event loop. Later calls on any handle fail with
    /// [`LinkError::NotRunning`].
    pub fn shutdown(&self) -> Result<(), LinkError> {
        self.post(LinkEvent::Shutdown)
    }

    pub fn link_state(&self) -> LinkState {
        self.core.lock().machine.link_state()
    }

    pub fn send_state(&self) -> SendState {
        self.core.lock().machine.send_state()
    }

    pub fn is_link_active(&self) -> bool {
        self.link_state() != LinkState::Down
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        self.core.lock().snapshot()
    }

    pub fn is_running(&self) -> bool {
        !self.event_tx.is_closed()
    }
}

struct EventLoop {
    core: Arc<Mutex<LinkCore>>,
    /// Weak so dropping every handle ends the loop
    event_tx: mpsc::WeakUnboundedSender<LinkEvent>,
    event_rx: mpsc::UnboundedReceiver<LinkEvent>,
    payload: PayloadSource,
    params: LinkParams,
    services: LinkServices,
    connect: TaskSlot,
    send: TaskSlot,
    debounce: TaskSlot,
}

impl EventLoop {
    async fn run(mut self) {
        info!("Link event loop running");
        while let Some(event) = self.event_rx.recv().await {
            debug!("Handling {:?}", event);
            if let LinkEvent::Shutdown = event {
                self.shutdown();
                break;
            }
            self.handle(event);
        }
        self.event_rx.close();
        info!("Link event loop stopped");
    }

    fn handle(&mut self, event: LinkEvent) {
        let effects = match event {
            LinkEvent::LinkActivated => {
                let now = tokio::time::Instant::now().into_std();
                // The callback may read the snapshot, so query it unlocked.
                // Only this loop mutates the machine, so the check stays valid.
                let wants_payload = {
                    let core = self.core.lock();
                    core.machine.link_state() == LinkState::Down && core.machine.send_enabled()
                };
                let prepared = if wants_payload {
                    self.payload.prepare()
                } else {
                    None
                };
                self.core
                    .lock()
                    .machine
                    .on_link_activated(now, move || prepared)
            }
            LinkEvent::FirstUnitReceived => {
                let now = tokio::time::Instant::now().into_std();
                self.core.lock().machine.on_first_unit_received(now)
            }
            LinkEvent::LinkDeactivated => self.core.lock().machine.on_link_deactivated(),
            LinkEvent::SendConfirmed {
                require_confirmation,
            } => self
                .core
                .lock()
                .machine
                .on_send_confirmed(require_confirmation),
            LinkEvent::ConnectOutcome {
                generation,
                clients,
            } => {
                if !self.connect.complete(generation) {
                    release_clients(clients);
                    return;
                }
                let connected = !clients.is_empty();
                let mut core = self.core.lock();
                let (accepted, effects) = core.machine.on_connect_outcome(connected);
                if accepted {
                    core.clients = clients;
                } else {
                    drop(core);
                    release_clients(clients);
                }
                effects
            }
            LinkEvent::SendOutcome { generation, report } => {
                if !self.send.complete(generation) {
                    return;
                }
                if let Some(kind) = report.delivered_by {
                    debug!("Share delivered over {}", kind);
                }
                self.core
                    .lock()
                    .machine
                    .on_send_outcome(report.outcome, report.elapsed)
            }
            LinkEvent::ReceiveOutcome { play_feedback } => {
                self.core.lock().machine.on_receive_outcome(play_feedback)
            }
            LinkEvent::DebounceTimeout { generation } => {
                if !self.debounce.complete(generation) {
                    return;
                }
                self.core.lock().machine.on_debounce_timeout()
            }
            LinkEvent::SetPayloadCallback { owner, callback } => {
                self.core.lock().payload_owner = Some(owner.clone());
                self.payload.register(owner, callback);
                Vec::new()
            }
            LinkEvent::ClearPayloadCallback | LinkEvent::UserSwitched => {
                self.core.lock().payload_owner = None;
                self.payload.clear();
                Vec::new()
            }
            LinkEvent::Enable {
                send_enabled,
                receive_enabled,
            } => {
                let was_receiving = self
                    .core
                    .lock()
                    .machine
                    .set_enabled(send_enabled, receive_enabled);
                self.update_servers(was_receiving, receive_enabled);
                Vec::new()
            }
            LinkEvent::Disable => {
                let mut core = self.core.lock();
                let was_receiving = core.machine.set_enabled(false, false);
                let effects = core.machine.reset();
                drop(core);
                self.update_servers(was_receiving, false);
                effects
            }
            LinkEvent::Shutdown => Vec::new(),
        };
        self.apply(effects);
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Notify(notification) => {
                    debug!("Notifying {:?}", notification);
                    self.services.listener.on_notification(notification);
                }
                Effect::StartConnect => self.start_connect(),
                Effect::StartSend => self.start_send(),
                Effect::CancelSend => {
                    self.send.cancel();
                }
                Effect::ArmDebounce(delay) => self.arm_debounce(delay),
                Effect::CancelDebounce => {
                    self.debounce.cancel();
                }
                Effect::ReleaseClients => {
                    self.connect.cancel();
                    let clients = std::mem::take(&mut self.core.lock().clients);
                    release_clients(clients);
                }
                Effect::PushComplete => self.payload.notify_push_complete(),
                Effect::PersistFirstShare => {
                    let preferences = &self.services.preferences;
                    if let Err(e) = preferences
                        .set_bool(FIRST_SHARE_KEY, true)
                        .and_then(|_| preferences.flush())
                    {
                        warn!("Failed to persist first share flag: {}", e);
                    }
                }
            }
        }
    }

    fn start_connect(&mut self) {
        let Some(tx) = self.event_tx.upgrade() else {
            return;
        };
        let (plan, superseded) = {
            let mut core = self.core.lock();
            (
                core.machine.connect_plan(),
                std::mem::take(&mut core.clients),
            )
        };
        release_clients(superseded);

        let factory = self.services.clients.clone();
        let params = self.params;
        self.connect.replace(move |token| async move {
            let clients = connect_cascade(factory, params, plan).await;
            if !token.is_current() {
                release_clients(clients);
                return;
            }
            let event = LinkEvent::ConnectOutcome {
                generation: token.value(),
                clients,
            };
            if let Err(mpsc::error::SendError(LinkEvent::ConnectOutcome { clients, .. })) =
                tx.send(event)
            {
                release_clients(clients);
            }
        });
    }

    fn start_send(&mut self) {
        let Some(tx) = self.event_tx.upgrade() else {
            return;
        };
        let snapshot = {
            let core = self.core.lock();
            core.machine
                .send_snapshot()
                .map(|intent| (intent, core.clients.clone()))
        };
        let Some((intent, clients)) = snapshot else {
            debug!("Nothing to send on this contact");
            return;
        };

        let handoff = self.services.handoff.clone();
        self.send.replace(move |token| async move {
            let report = send_cascade(intent, clients, handoff).await;
            if token.is_current() {
                let _ = tx.send(LinkEvent::SendOutcome {
                    generation: token.value(),
                    report,
                });
            }
        });
    }

    fn arm_debounce(&mut self, delay: std::time::Duration) {
        let Some(tx) = self.event_tx.upgrade() else {
            return;
        };
        self.debounce.replace(move |token| async move {
            tokio::time::sleep(delay).await;
            if token.is_current() {
                let _ = tx.send(LinkEvent::DebounceTimeout {
                    generation: token.value(),
                });
            }
        });
    }

    fn update_servers(&self, was_receiving: bool, receiving: bool) {
        let Some(servers) = &self.services.servers else {
            return;
        };
        if !was_receiving && receiving {
            match servers.start() {
                Ok(()) => info!("Protocol servers started"),
                Err(e) => warn!("Failed to start protocol servers: {}", e),
            }
        } else if was_receiving && !receiving {
            servers.stop();
            info!("Protocol servers stopped");
        }
    }

    fn shutdown(&mut self) {
        let (was_receiving, effects) = {
            let mut core = self.core.lock();
            let was_receiving = core.machine.set_enabled(false, false);
            (was_receiving, core.machine.reset())
        };
        self.apply(effects);
        self.update_servers(was_receiving, false);
        self.connect.cancel();
        self.send.cancel();
        self.debounce.cancel();
    }
}
