/// Settings persistence for the chat client.
pub mod state;

pub use state::{ChatSettings, SettingsError, SettingsStore};
