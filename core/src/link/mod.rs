// Link module: contact lifecycle state machine and its event loop

pub mod events;
pub mod intent;
pub mod machine;
pub mod manager;
pub mod state;
pub mod task;

pub use events::{ChannelListener, LinkEvent, LinkListener, LogListener};
pub use intent::{IntentFlags, OutboundIntent};
pub use machine::{ConnectPlan, Effect, LinkMachine, LinkStats};
pub use manager::{LinkManager, LinkServices, LinkSnapshot};
pub use state::{LinkNotification, LinkState, RetryHint, SendOutcome, SendState};
pub use task::{Generation, TaskSlot};
