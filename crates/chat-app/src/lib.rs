#![deny(unsafe_code)]

/// Chat session domain: context, lifecycle and the streaming controller.
pub mod chat;
/// Rendering adapters driven by session updates.
pub mod presentation;
/// Settings persistence.
pub mod settings;
