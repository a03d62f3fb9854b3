// Store module: persisted preferences

pub mod preferences;

pub use preferences::{
    MemoryPreferences, PreferenceError, PreferenceStore, SledPreferences, FIRST_SHARE_KEY,
};
