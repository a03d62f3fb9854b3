// Message module: records and messages exchanged over a contact

pub mod types;

pub use types::{Message, Record, RecordKind};
