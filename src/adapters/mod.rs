//! Adapters Layer
//!
//! Inbound adapters drive the application (the admin HTTP API); outbound
//! adapters implement the domain ports (hosting API, status source,
//! backend directory).

pub mod inbound;
pub mod outbound;
