// Protocol module: client seams, negotiator cascades and a simulated peer

pub mod client;
pub mod negotiator;
pub mod sim;

pub use client::{
    ClientFactory, ConnectedClients, LegacyPushClient, NegotiationClient, NegotiationRequest,
    NegotiationResponse, ProtocolError, ProtocolKind, ProtocolServers, SimplePushClient,
    TransferHandoff,
};
pub use negotiator::{connect_cascade, release_clients, send_cascade, SendReport};
pub use sim::{SimBehavior, SimPeer, SimServers};
