//! Data models

pub mod event;
pub mod operation;
