// Message types: what travels across a contact

use serde::{Deserialize, Serialize};

/// What a record carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    /// A resource locator (web link, content URI)
    Uri,
    /// Typed media payload, `type_name` holds the media type
    Mime,
    /// Identity of the application that should handle the message
    AppId,
    /// Application-defined external type
    External,
    /// Record with no payload
    Empty,
}

/// A single record inside a [`Message`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub kind: RecordKind,
    /// Type name, interpretation depends on `kind`
    pub type_name: String,
    /// Raw payload bytes
    pub payload: Vec<u8>,
}

impl Record {
    /// Create a record from parts
    pub fn new(kind: RecordKind, type_name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            kind,
            type_name: type_name.into(),
            payload,
        }
    }

    /// Create a URI record
    pub fn uri(uri: &str) -> Self {
        Self::new(RecordKind::Uri, "U", uri.as_bytes().to_vec())
    }

    /// Create a media-typed record
    pub fn mime(mime_type: &str, payload: Vec<u8>) -> Self {
        Self::new(RecordKind::Mime, mime_type, payload)
    }

    /// Create an application identity record
    pub fn app_id(app: &str) -> Self {
        Self::new(RecordKind::AppId, "android.com:pkg", app.as_bytes().to_vec())
    }

    /// Payload as UTF-8 text, if it is valid UTF-8
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// An ordered collection of records, exchanged as one unit.
///
/// The link core never looks inside a message except when building the
/// default payload; the protocol clients own the wire representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub records: Vec<Record>,
}

impl Message {
    /// Create a message from records
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// A message holding a single record
    pub fn single(record: Record) -> Self {
        Self {
            records: vec![record],
        }
    }

    /// Whether the message has no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sum of all record payload sizes
    pub fn payload_len(&self) -> usize {
        self.records.iter().map(|r| r.payload.len()).sum()
    }

    /// First record of the given kind
    pub fn first_of(&self, kind: RecordKind) -> Option<&Record> {
        self.records.iter().find(|r| r.kind == kind)
    }
}
