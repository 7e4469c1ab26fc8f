//! order-relay: multi-tenant storefront order pipeline
//!
//! Orders arrive by webhook or poll, wait out a configurable delay, get
//! validated, and are exported in batches to a fulfillment endpoint. Every
//! step leaves an audit trail the operator API can read back.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod pipeline;
pub mod platform;
pub mod state;
pub mod tasks;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
