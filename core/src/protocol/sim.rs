//! Scripted in-memory peer
//!
//! Stands in for a real radio peer in tests and in the CLI simulator. The
//! behavior can be changed between operations to model a peer that stops
//! answering mid-contact.

use crate::message::Message;
use crate::protocol::client::{
    ClientFactory, LegacyPushClient, NegotiationClient, NegotiationRequest, NegotiationResponse,
    ProtocolError, ProtocolKind, ProtocolServers, SimplePushClient, TransferHandoff,
};
use crate::settings::LinkParams;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How the simulated peer responds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimBehavior {
    /// Accepts negotiation connections
    pub negotiation: bool,
    /// Accepts simple-push connections
    pub simple_push: bool,
    /// Accepts legacy-push connections
    pub legacy_push: bool,
    /// Answers negotiation requests (on either transport)
    pub answers_negotiation: bool,
    /// Simple-push deliveries succeed
    pub simple_push_delivers: bool,
    /// Legacy-push deliveries succeed
    pub legacy_push_delivers: bool,
    /// Delay before each connect completes
    pub connect_delay: Duration,
    /// Delay before each push or negotiation completes
    pub send_delay: Duration,
}

impl Default for SimBehavior {
    fn default() -> Self {
        Self {
            negotiation: true,
            simple_push: true,
            legacy_push: true,
            answers_negotiation: true,
            simple_push_delivers: true,
            legacy_push_delivers: true,
            connect_delay: Duration::ZERO,
            send_delay: Duration::ZERO,
        }
    }
}

impl SimBehavior {
    /// A peer that refuses every protocol
    pub fn unreachable() -> Self {
        Self {
            negotiation: false,
            simple_push: false,
            legacy_push: false,
            ..Self::default()
        }
    }

    /// A peer that only speaks the legacy protocol
    pub fn legacy_only() -> Self {
        Self {
            negotiation: false,
            simple_push: false,
            ..Self::default()
        }
    }
}

#[derive(Default)]
struct SimState {
    behavior: RwLock<SimBehavior>,
    received: Mutex<Vec<Message>>,
    handoffs: Mutex<Vec<Vec<String>>>,
    connects: Mutex<Vec<ProtocolKind>>,
    open: AtomicUsize,
}

impl SimState {
    fn behavior(&self) -> SimBehavior {
        self.behavior.read().clone()
    }

    async fn connect(&self, kind: ProtocolKind) -> Result<(), ProtocolError> {
        let behavior = self.behavior();
        if !behavior.connect_delay.is_zero() {
            tokio::time::sleep(behavior.connect_delay).await;
        }
        let accepted = match kind {
            ProtocolKind::Negotiation => behavior.negotiation,
            ProtocolKind::SimplePush => behavior.simple_push,
            ProtocolKind::LegacyPush => behavior.legacy_push,
        };
        if !accepted {
            return Err(ProtocolError::ConnectRefused(kind));
        }
        self.connects.lock().push(kind);
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send_delay(&self) {
        let delay = self.behavior().send_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn response(&self) -> NegotiationResponse {
        NegotiationResponse {
            carrier: "bluetooth".to_string(),
            carrier_data: vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06],
        }
    }
}

/// A simulated peer and the clients that talk to it
#[derive(Clone)]
pub struct SimPeer {
    state: Arc<SimState>,
}

impl SimPeer {
    pub fn new(behavior: SimBehavior) -> Self {
        let state = SimState {
            behavior: RwLock::new(behavior),
            ..SimState::default()
        };
        Self {
            state: Arc::new(state),
        }
    }

    pub fn set_behavior(&self, behavior: SimBehavior) {
        *self.state.behavior.write() = behavior;
    }

    pub fn factory(&self) -> Arc<dyn ClientFactory> {
        Arc::new(SimFactory {
            state: self.state.clone(),
        })
    }

    pub fn handoff(&self) -> Arc<dyn TransferHandoff> {
        Arc::new(SimHandoff {
            state: self.state.clone(),
        })
    }

    /// Messages delivered by either push protocol
    pub fn received(&self) -> Vec<Message> {
        self.state.received.lock().clone()
    }

    /// Locator sets handed off after a successful negotiation
    pub fn handoffs(&self) -> Vec<Vec<String>> {
        self.state.handoffs.lock().clone()
    }

    /// Successful connects, in order
    pub fn connects(&self) -> Vec<ProtocolKind> {
        self.state.connects.lock().clone()
    }

    /// Clients connected and not yet closed
    pub fn open_clients(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }
}

struct SimFactory {
    state: Arc<SimState>,
}

impl ClientFactory for SimFactory {
    fn negotiation(&self, _params: LinkParams) -> Arc<dyn NegotiationClient> {
        Arc::new(SimClient::new(self.state.clone(), ProtocolKind::Negotiation))
    }

    fn simple_push(&self, _params: LinkParams) -> Arc<dyn SimplePushClient> {
        Arc::new(SimClient::new(self.state.clone(), ProtocolKind::SimplePush))
    }

    fn legacy_push(&self, _params: LinkParams) -> Arc<dyn LegacyPushClient> {
        Arc::new(SimClient::new(self.state.clone(), ProtocolKind::LegacyPush))
    }
}

struct SimClient {
    state: Arc<SimState>,
    kind: ProtocolKind,
    connected: AtomicBool,
}

impl SimClient {
    fn new(state: Arc<SimState>, kind: ProtocolKind) -> Self {
        Self {
            state,
            kind,
            connected: AtomicBool::new(false),
        }
    }

    async fn connect_inner(&self) -> Result<(), ProtocolError> {
        self.state.connect(self.kind).await?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn ensure_connected(&self) -> Result<(), ProtocolError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProtocolError::NotConnected)
        }
    }

    async fn push_inner(&self, message: &Message, delivers: bool) -> Result<(), ProtocolError> {
        self.ensure_connected()?;
        self.state.send_delay().await;
        if !delivers {
            return Err(ProtocolError::Io(format!("{} push interrupted", self.kind)));
        }
        self.state.received.lock().push(message.clone());
        Ok(())
    }

    fn close_inner(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.state.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl NegotiationClient for SimClient {
    async fn connect(&self) -> Result<(), ProtocolError> {
        self.connect_inner().await
    }

    async fn negotiate(
        &self,
        _request: &NegotiationRequest,
    ) -> Result<Option<NegotiationResponse>, ProtocolError> {
        self.ensure_connected()?;
        self.state.send_delay().await;
        if !self.state.behavior().answers_negotiation {
            return Ok(None);
        }
        Ok(Some(self.state.response()))
    }

    async fn close(&self) {
        self.close_inner();
    }
}

#[async_trait]
impl SimplePushClient for SimClient {
    async fn connect(&self) -> Result<(), ProtocolError> {
        self.connect_inner().await
    }

    async fn push(&self, message: &Message) -> Result<(), ProtocolError> {
        let delivers = self.state.behavior().simple_push_delivers;
        self.push_inner(message, delivers).await
    }

    async fn exchange(&self, request: &Message) -> Result<Option<Message>, ProtocolError> {
        self.ensure_connected()?;
        NegotiationRequest::from_message(request)?;
        self.state.send_delay().await;
        if !self.state.behavior().answers_negotiation {
            return Ok(None);
        }
        self.state.response().to_message().map(Some)
    }

    async fn close(&self) {
        self.close_inner();
    }
}

#[async_trait]
impl LegacyPushClient for SimClient {
    async fn connect(&self) -> Result<(), ProtocolError> {
        self.connect_inner().await
    }

    async fn push(&self, message: &Message) -> Result<(), ProtocolError> {
        let delivers = self.state.behavior().legacy_push_delivers;
        self.push_inner(message, delivers).await
    }

    async fn close(&self) {
        self.close_inner();
    }
}

struct SimHandoff {
    state: Arc<SimState>,
}

impl TransferHandoff for SimHandoff {
    fn begin_transfer(&self, _response: &NegotiationResponse, uris: &[String]) {
        self.state.handoffs.lock().push(uris.to_vec());
    }
}

/// Protocol servers that only record whether they run
#[derive(Default)]
pub struct SimServers {
    running: AtomicBool,
    starts: AtomicUsize,
}

impl SimServers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl ProtocolServers for SimServers {
    fn start(&self) -> Result<(), ProtocolError> {
        self.running.store(true, Ordering::SeqCst);
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Record;

    #[tokio::test]
    async fn test_refused_connect() {
        let peer = SimPeer::new(SimBehavior::unreachable());
        let client = peer.factory().simple_push(LinkParams::default());
        assert_eq!(
            client.connect().await,
            Err(ProtocolError::ConnectRefused(ProtocolKind::SimplePush))
        );
        assert_eq!(peer.open_clients(), 0);
    }

    #[tokio::test]
    async fn test_push_requires_connect() {
        let peer = SimPeer::new(SimBehavior::default());
        let client = peer.factory().legacy_push(LinkParams::default());
        let message = Message::single(Record::uri("https://a"));
        assert_eq!(
            client.push(&message).await,
            Err(ProtocolError::NotConnected)
        );

        client.connect().await.unwrap();
        client.push(&message).await.unwrap();
        assert_eq!(peer.received(), vec![message]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let peer = SimPeer::new(SimBehavior::default());
        let client = peer.factory().negotiation(LinkParams::default());
        client.connect().await.unwrap();
        assert_eq!(peer.open_clients(), 1);

        client.close().await;
        client.close().await;
        assert_eq!(peer.open_clients(), 0);
    }

    #[test]
    fn test_servers_record_state() {
        let servers = SimServers::new();
        servers.start().unwrap();
        assert!(servers.is_running());
        servers.stop();
        assert!(!servers.is_running());
        assert_eq!(servers.starts(), 1);
    }
}
