//! Data models
//!
//! Shared between the relay service and API consumers.
//! All IDs are `i64` snowflakes except tenant ids, which are opaque strings
//! assigned by the provisioning system.

pub mod audit;
pub mod export_log;
pub mod order;
pub mod order_exception;
pub mod tenant;

// Re-exports
pub use audit::*;
pub use export_log::*;
pub use order::*;
pub use order_exception::*;
pub use tenant::*;
