// Events consumed by the link event loop, and the outbound listener seam

use crate::link::state::LinkNotification;
use crate::payload::{AppId, PayloadCallback};
use crate::protocol::client::ConnectedClients;
use crate::protocol::negotiator::SendReport;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Everything that can change link state, in arrival order
pub enum LinkEvent {
    /// The hardware reported a link with a peer
    LinkActivated,
    /// First protocol data unit seen since activation
    FirstUnitReceived,
    /// The hardware reported the link gone
    LinkDeactivated,
    /// Send was confirmed
    SendConfirmed { require_confirmation: bool },
    /// A connect cascade finished
    ConnectOutcome {
        generation: u64,
        clients: ConnectedClients,
    },
    /// A send cascade finished
    SendOutcome { generation: u64, report: SendReport },
    /// Something arrived from the peer
    ReceiveOutcome { play_feedback: bool },
    /// A debounce timer fired
    DebounceTimeout { generation: u64 },
    SetPayloadCallback {
        owner: AppId,
        callback: Arc<dyn PayloadCallback>,
    },
    ClearPayloadCallback,
    Enable {
        send_enabled: bool,
        receive_enabled: bool,
    },
    Disable,
    UserSwitched,
    Shutdown,
}

impl LinkEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LinkEvent::LinkActivated => "LinkActivated",
            LinkEvent::FirstUnitReceived => "FirstUnitReceived",
            LinkEvent::LinkDeactivated => "LinkDeactivated",
            LinkEvent::SendConfirmed { .. } => "SendConfirmed",
            LinkEvent::ConnectOutcome { .. } => "ConnectOutcome",
            LinkEvent::SendOutcome { .. } => "SendOutcome",
            LinkEvent::ReceiveOutcome { .. } => "ReceiveOutcome",
            LinkEvent::DebounceTimeout { .. } => "DebounceTimeout",
            LinkEvent::SetPayloadCallback { .. } => "SetPayloadCallback",
            LinkEvent::ClearPayloadCallback => "ClearPayloadCallback",
            LinkEvent::Enable { .. } => "Enable",
            LinkEvent::Disable => "Disable",
            LinkEvent::UserSwitched => "UserSwitched",
            LinkEvent::Shutdown => "Shutdown",
        }
    }
}

impl fmt::Debug for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEvent::SendConfirmed {
                require_confirmation,
            } => f
                .debug_struct("SendConfirmed")
                .field("require_confirmation", require_confirmation)
                .finish(),
            LinkEvent::ConnectOutcome {
                generation,
                clients,
            } => f
                .debug_struct("ConnectOutcome")
                .field("generation", generation)
                .field("clients", clients)
                .finish(),
            LinkEvent::SendOutcome { generation, report } => f
                .debug_struct("SendOutcome")
                .field("generation", generation)
                .field("report", report)
                .finish(),
            LinkEvent::ReceiveOutcome { play_feedback } => f
                .debug_struct("ReceiveOutcome")
                .field("play_feedback", play_feedback)
                .finish(),
            LinkEvent::DebounceTimeout { generation } => f
                .debug_struct("DebounceTimeout")
                .field("generation", generation)
                .finish(),
            LinkEvent::SetPayloadCallback { owner, .. } => f
                .debug_struct("SetPayloadCallback")
                .field("owner", owner)
                .finish(),
            LinkEvent::Enable {
                send_enabled,
                receive_enabled,
            } => f
                .debug_struct("Enable")
                .field("send_enabled", send_enabled)
                .field("receive_enabled", receive_enabled)
                .finish(),
            other => f.write_str(other.name()),
        }
    }
}

/// Presentation layer: receives one call per user-visible transition
pub trait LinkListener: Send + Sync {
    fn on_notification(&self, notification: LinkNotification);
}

/// Forwards notifications into an unbounded channel
pub struct ChannelListener {
    tx: mpsc::UnboundedSender<LinkNotification>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LinkNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl LinkListener for ChannelListener {
    fn on_notification(&self, notification: LinkNotification) {
        let _ = self.tx.send(notification);
    }
}

/// Writes notifications to the log
#[derive(Debug, Default)]
pub struct LogListener;

impl LinkListener for LogListener {
    fn on_notification(&self, notification: LinkNotification) {
        info!("Link notification: {:?}", notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::state::RetryHint;

    #[test]
    fn test_channel_listener_forwards_in_order() {
        let (listener, mut rx) = ChannelListener::new();
        listener.on_notification(LinkNotification::InRange);
        listener.on_notification(LinkNotification::Debounce(RetryHint::TryAgain));

        assert_eq!(rx.try_recv().unwrap(), LinkNotification::InRange);
        assert_eq!(
            rx.try_recv().unwrap(),
            LinkNotification::Debounce(RetryHint::TryAgain)
        );
    }

    #[test]
    fn test_channel_listener_survives_dropped_receiver() {
        let (listener, rx) = ChannelListener::new();
        drop(rx);
        listener.on_notification(LinkNotification::OutOfRange);
        LogListener.on_notification(LinkNotification::OutOfRange);
    }

    #[test]
    fn test_event_debug_names() {
        let event = LinkEvent::SendConfirmed {
            require_confirmation: true,
        };
        assert_eq!(event.name(), "SendConfirmed");
        assert!(format!("{:?}", event).contains("require_confirmation"));
        assert_eq!(format!("{:?}", LinkEvent::Shutdown), "Shutdown");
    }
}
