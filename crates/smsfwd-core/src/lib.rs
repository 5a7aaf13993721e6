//! Core domain + application logic for the SMS → Telegram relay.
//!
//! This crate is intentionally framework-agnostic. Telegram and the SMS inbox
//! HTTP API live behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod conversation;
pub mod domain;
pub mod errors;
pub mod filter;
pub mod formatting;
pub mod forwarder;
pub mod logging;
pub mod messaging;
pub mod scheduler;
pub mod security;
pub mod source;
pub mod store;

pub use errors::{Error, Result};
