//! Protocol client abstractions
//!
//! The link core only sequences these clients and owns their lifetimes; the
//! wire formats live in the implementations.

use crate::message::{Message, Record, RecordKind};
use crate::settings::LinkParams;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Record type used when a negotiation request travels over simple-push
pub const NEGOTIATION_REQUEST_TYPE: &str = "contactlink:hr";
/// Record type of the matching response
pub const NEGOTIATION_RESPONSE_TYPE: &str = "contactlink:hs";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Connection refused by peer service {0}")]
    ConnectRefused(ProtocolKind),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Client is not connected")]
    NotConnected,
    #[error("Operation timed out")]
    Timeout,
    #[error("Peer rejected the request")]
    Rejected,
    #[error("Malformed payload: {0}")]
    Malformed(String),
}

/// The three exchange protocols the negotiator knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolKind {
    /// Request/response agreement on a transfer mechanism for locators
    Negotiation,
    /// Direct single-message delivery with request/response support
    SimplePush,
    /// Older direct delivery, push only
    LegacyPush,
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolKind::Negotiation => write!(f, "Negotiation"),
            ProtocolKind::SimplePush => write!(f, "SimplePush"),
            ProtocolKind::LegacyPush => write!(f, "LegacyPush"),
        }
    }
}

/// Request to agree on a transfer mechanism for a set of locators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationRequest {
    pub uris: Vec<String>,
}

impl NegotiationRequest {
    pub fn for_uris(uris: &[String]) -> Self {
        Self {
            uris: uris.to_vec(),
        }
    }

    /// Encode as a message, for peers reached over simple-push
    pub fn to_message(&self) -> Result<Message, ProtocolError> {
        let payload =
            serde_json::to_vec(self).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        Ok(Message::single(Record::new(
            RecordKind::External,
            NEGOTIATION_REQUEST_TYPE,
            payload,
        )))
    }

    pub fn from_message(message: &Message) -> Result<Self, ProtocolError> {
        let record = find_record(message, NEGOTIATION_REQUEST_TYPE)?;
        serde_json::from_slice(&record.payload).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// The peer's answer: which carrier to use and how to reach it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationResponse {
    pub carrier: String,
    pub carrier_data: Vec<u8>,
}

impl NegotiationResponse {
    pub fn to_message(&self) -> Result<Message, ProtocolError> {
        let payload =
            serde_json::to_vec(self).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        Ok(Message::single(Record::new(
            RecordKind::External,
            NEGOTIATION_RESPONSE_TYPE,
            payload,
        )))
    }

    pub fn from_message(message: &Message) -> Result<Self, ProtocolError> {
        let record = find_record(message, NEGOTIATION_RESPONSE_TYPE)?;
        serde_json::from_slice(&record.payload).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

fn find_record<'a>(message: &'a Message, type_name: &str) -> Result<&'a Record, ProtocolError> {
    message
        .records
        .iter()
        .find(|r| r.kind == RecordKind::External && r.type_name == type_name)
        .ok_or_else(|| ProtocolError::Malformed(format!("missing {} record", type_name)))
}

/// Content-negotiation client
#[async_trait]
pub trait NegotiationClient: Send + Sync {
    async fn connect(&self) -> Result<(), ProtocolError>;
    /// `Ok(None)` means the peer did not answer
    async fn negotiate(
        &self,
        request: &NegotiationRequest,
    ) -> Result<Option<NegotiationResponse>, ProtocolError>;
    async fn close(&self);
}

/// Simple-push client
#[async_trait]
pub trait SimplePushClient: Send + Sync {
    async fn connect(&self) -> Result<(), ProtocolError>;
    async fn push(&self, message: &Message) -> Result<(), ProtocolError>;
    /// Request/response exchange; `Ok(None)` means the peer did not answer
    async fn exchange(&self, request: &Message) -> Result<Option<Message>, ProtocolError>;
    async fn close(&self);
}

/// Legacy-push client
#[async_trait]
pub trait LegacyPushClient: Send + Sync {
    async fn connect(&self) -> Result<(), ProtocolError>;
    async fn push(&self, message: &Message) -> Result<(), ProtocolError>;
    async fn close(&self);
}

/// Builds fresh, unconnected clients for each connect attempt
pub trait ClientFactory: Send + Sync {
    fn negotiation(&self, params: LinkParams) -> Arc<dyn NegotiationClient>;
    fn simple_push(&self, params: LinkParams) -> Arc<dyn SimplePushClient>;
    fn legacy_push(&self, params: LinkParams) -> Arc<dyn LegacyPushClient>;
}

/// Hands a successful negotiation over to the transfer machinery
pub trait TransferHandoff: Send + Sync {
    fn begin_transfer(&self, response: &NegotiationResponse, uris: &[String]);
}

/// Inbound protocol servers, started while receiving is enabled
pub trait ProtocolServers: Send + Sync {
    fn start(&self) -> Result<(), ProtocolError>;
    fn stop(&self);
}

/// Clients opened by a successful connect cascade
#[derive(Clone, Default)]
pub struct ConnectedClients {
    pub negotiation: Option<Arc<dyn NegotiationClient>>,
    pub simple_push: Option<Arc<dyn SimplePushClient>>,
    pub legacy_push: Option<Arc<dyn LegacyPushClient>>,
}

impl ConnectedClients {
    pub fn is_empty(&self) -> bool {
        self.negotiation.is_none() && self.simple_push.is_none() && self.legacy_push.is_none()
    }

    /// Which protocols are connected
    pub fn kinds(&self) -> Vec<ProtocolKind> {
        let mut kinds = Vec::new();
        if self.negotiation.is_some() {
            kinds.push(ProtocolKind::Negotiation);
        }
        if self.simple_push.is_some() {
            kinds.push(ProtocolKind::SimplePush);
        }
        if self.legacy_push.is_some() {
            kinds.push(ProtocolKind::LegacyPush);
        }
        kinds
    }

    /// Close every client and leave the set empty
    pub async fn close_all(&mut self) {
        if let Some(client) = self.negotiation.take() {
            client.close().await;
        }
        if let Some(client) = self.simple_push.take() {
            client.close().await;
        }
        if let Some(client) = self.legacy_push.take() {
            client.close().await;
        }
    }
}

impl fmt::Debug for ConnectedClients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectedClients")
            .field("kinds", &self.kinds())
            .finish()
    }
}
