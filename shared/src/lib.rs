//! Shared types for order-relay
//!
//! Error codes, the API error body, and the order pipeline data
//! model, used by the relay service and by anything reading its API.

pub mod error;
pub mod models;
pub mod util;
