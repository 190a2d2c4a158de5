//! Persistent configuration and layout

pub mod layout;
pub mod settings;
