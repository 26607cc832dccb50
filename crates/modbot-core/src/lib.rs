//! Core domain + application logic for the AI group moderation bot.
//!
//! This crate is intentionally framework-agnostic. Telegram / MongoDB / Redis /
//! Gemini live behind ports (traits) implemented in adapter crates.

pub mod admin_cache;
pub mod appeals;
pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod messaging;
pub mod moderation;
pub mod ports;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;

pub use errors::{Error, Result};
