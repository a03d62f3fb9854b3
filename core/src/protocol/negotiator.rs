//! Protocol negotiator: connect and send cascades
//!
//! Both cascades run on background tasks with a snapshot taken under the
//! state lock; they never touch shared state. A failure on one candidate
//! falls through to the next one, only exhaustion is reported as failure.

use crate::link::intent::OutboundIntent;
use crate::link::machine::ConnectPlan;
use crate::link::state::SendOutcome;
use crate::protocol::client::{
    ClientFactory, ConnectedClients, LegacyPushClient, NegotiationClient, NegotiationRequest,
    NegotiationResponse, ProtocolError, ProtocolKind, SimplePushClient, TransferHandoff,
};
use crate::settings::LinkParams;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Clients opened by an in-flight connect cascade.
///
/// If the cascade is aborted before handing them over, dropping the guard
/// closes whatever was opened so nothing leaks.
struct OpenedClients {
    clients: Option<ConnectedClients>,
}

impl OpenedClients {
    fn new() -> Self {
        Self {
            clients: Some(ConnectedClients::default()),
        }
    }

    fn get_mut(&mut self) -> &mut ConnectedClients {
        self.clients.get_or_insert_with(ConnectedClients::default)
    }

    fn into_inner(mut self) -> ConnectedClients {
        self.clients.take().unwrap_or_default()
    }
}

impl Drop for OpenedClients {
    fn drop(&mut self) {
        if let Some(clients) = self.clients.take() {
            release_clients(clients);
        }
    }
}

/// Close clients on a background task
pub fn release_clients(mut clients: ConnectedClients) {
    if clients.is_empty() {
        return;
    }
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            debug!("Releasing clients {:?}", clients.kinds());
            handle.spawn(async move {
                clients.close_all().await;
            });
        }
        Err(_) => warn!("No runtime to close clients {:?}", clients.kinds()),
    }
}

/// Open the clients the plan calls for
pub async fn connect_cascade(
    factory: Arc<dyn ClientFactory>,
    params: LinkParams,
    plan: ConnectPlan,
) -> ConnectedClients {
    let mut opened = OpenedClients::new();
    let mut negotiation_connected = false;

    if plan.locators_pending {
        let client = factory.negotiation(params);
        match client.connect().await {
            Ok(()) => {
                debug!("Negotiation client connected");
                opened.get_mut().negotiation = Some(client);
                negotiation_connected = true;
            }
            Err(e) => debug!("Negotiation client connect failed: {}", e),
        }
    }

    if plan.message_pending || (plan.locators_pending && !negotiation_connected) {
        let client = factory.simple_push(params);
        match client.connect().await {
            Ok(()) => {
                debug!("Simple-push client connected");
                opened.get_mut().simple_push = Some(client);
            }
            Err(e) => {
                debug!("Simple-push client connect failed: {}, trying legacy", e);
                let legacy = factory.legacy_push(params);
                match legacy.connect().await {
                    Ok(()) => {
                        debug!("Legacy-push client connected");
                        opened.get_mut().legacy_push = Some(legacy);
                    }
                    Err(e) => debug!("Legacy-push client connect failed: {}", e),
                }
            }
        }
    }

    let clients = opened.into_inner();
    info!("Connect cascade finished with {:?}", clients.kinds());
    clients
}

/// What a send cascade achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReport {
    pub outcome: SendOutcome,
    pub elapsed: Duration,
    pub delivered_by: Option<ProtocolKind>,
}

/// Deliver the intent through the connected clients
pub async fn send_cascade(
    intent: OutboundIntent,
    clients: ConnectedClients,
    handoff: Option<Arc<dyn TransferHandoff>>,
) -> SendReport {
    let started = Instant::now();
    let finish = |outcome, delivered_by| SendReport {
        outcome,
        elapsed: started.elapsed(),
        delivered_by,
    };

    let mut unsupported = false;

    if intent.has_locators() {
        let request = NegotiationRequest::for_uris(&intent.uris);
        match negotiate(&request, &clients).await {
            Negotiation::Agreed(response, kind) => {
                info!(contact = %intent.id, "Negotiated {} over {}", response.carrier, kind);
                if let Some(handoff) = &handoff {
                    handoff.begin_transfer(&response, &intent.uris);
                }
                return finish(SendOutcome::Success, Some(kind));
            }
            Negotiation::Unanswered => {
                debug!(contact = %intent.id, "No negotiation response");
                unsupported = true;
            }
            Negotiation::Failed => warn!(contact = %intent.id, "Negotiation failed"),
        }
    }

    if let Some(message) = &intent.message {
        if let Some(client) = &clients.simple_push {
            match client.push(message).await {
                Ok(()) => return finish(SendOutcome::Success, Some(ProtocolKind::SimplePush)),
                Err(e) => debug!(contact = %intent.id, "Simple-push failed: {}", e),
            }
        }
        if let Some(client) = &clients.legacy_push {
            match client.push(message).await {
                Ok(()) => return finish(SendOutcome::Success, Some(ProtocolKind::LegacyPush)),
                Err(e) => debug!(contact = %intent.id, "Legacy-push failed: {}", e),
            }
        }
        return finish(SendOutcome::Failed, None);
    }

    if unsupported {
        finish(SendOutcome::Unsupported, None)
    } else {
        finish(SendOutcome::Failed, None)
    }
}

/// Result of offering the locators to the peer
enum Negotiation {
    Agreed(NegotiationResponse, ProtocolKind),
    /// At least one carrier reached the peer but nothing was agreed
    Unanswered,
    Failed,
}

async fn negotiate(request: &NegotiationRequest, clients: &ConnectedClients) -> Negotiation {
    let mut unanswered = false;

    if let Some(client) = &clients.negotiation {
        match client.negotiate(request).await {
            Ok(Some(response)) => return Negotiation::Agreed(response, ProtocolKind::Negotiation),
            Ok(None) => unanswered = true,
            Err(e) => warn!("Negotiation client failed: {}", e),
        }
    }

    // Older peers only answer negotiation requests over simple-push.
    if let Some(client) = &clients.simple_push {
        match exchange(client.as_ref(), request).await {
            Ok(Some(response)) => return Negotiation::Agreed(response, ProtocolKind::SimplePush),
            Ok(None) => unanswered = true,
            Err(e) => warn!("Negotiation over simple-push failed: {}", e),
        }
    }

    if unanswered {
        Negotiation::Unanswered
    } else {
        Negotiation::Failed
    }
}

async fn exchange(
    client: &dyn SimplePushClient,
    request: &NegotiationRequest,
) -> Result<Option<NegotiationResponse>, ProtocolError> {
    let reply = client.exchange(&request.to_message()?).await?;
    match reply {
        Some(message) => match NegotiationResponse::from_message(&message) {
            Ok(response) => Ok(Some(response)),
            Err(e) => {
                debug!("Ignoring unusable negotiation reply: {}", e);
                Ok(None)
            }
        },
        None => Ok(None),
    }
}
