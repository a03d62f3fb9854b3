// Link and send state enums, plus the outbound notifications they drive

use serde::{Deserialize, Serialize};
use std::fmt;

/// Presence of the radio link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkState {
    /// No peer in range
    Down,
    /// Link activated, no protocol data unit seen yet
    WaitingFirstUnit,
    /// Link activated and the first unit has been observed
    Up,
    /// Link lost, still behaving as linked until the grace period ends
    Debounce,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Down => write!(f, "Down"),
            LinkState::WaitingFirstUnit => write!(f, "WaitingFirstUnit"),
            LinkState::Up => write!(f, "Up"),
            LinkState::Debounce => write!(f, "Debounce"),
        }
    }
}

/// Readiness of outbound content for the current contact.
///
/// Only meaningful while the link is not [`LinkState::Down`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SendState {
    NothingToSend,
    NeedConfirmation,
    Sending,
    SendComplete,
}

impl fmt::Display for SendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendState::NothingToSend => write!(f, "NothingToSend"),
            SendState::NeedConfirmation => write!(f, "NeedConfirmation"),
            SendState::Sending => write!(f, "Sending"),
            SendState::SendComplete => write!(f, "SendComplete"),
        }
    }
}

/// Why a debounce notification was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryHint {
    /// The link dropped while a send was in flight
    LinkDropped,
    /// The user confirmed after the link dropped; bring the devices back together
    TryAgain,
}

/// User-visible outcomes forwarded to the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkNotification {
    InRange,
    ConfirmationRequested,
    SendComplete,
    Debounce(RetryHint),
    ResumeSend,
    ProtocolUnsupported,
    ReceiveComplete { play_feedback: bool },
    OutOfRange,
}

/// Final result of a send cascade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendOutcome {
    /// The intent was delivered by some candidate
    Success,
    /// A peer answered but does not speak any exchange protocol we offered
    Unsupported,
    /// Every candidate failed with an I/O error
    Failed,
}
