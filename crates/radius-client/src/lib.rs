//! NPS login client
//!
//! Authenticates administrator credentials against Microsoft NPS using
//! RADIUS with MS-CHAPv2, built on top of the `radius-proto` protocol
//! implementation.
//!
//! # Features
//!
//! - Async UDP transport with retransmission and cancellation
//! - Primary/secondary failover
//! - Mutual authentication through MS-CHAP2-Success
//! - Authorization group extraction from Access-Accept attributes
//! - JSON configuration and JSON-lines audit log
//!
//! # Example
//!
//! ```rust,no_run
//! use radius_client::{Config, PlaintextSecrets, authenticate_with_failover};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("nps-auth.json")?;
//!
//!     let outcome =
//!         authenticate_with_failover(&config, Arc::new(PlaintextSecrets), "alice", "password").await;
//!
//!     if outcome.result.success {
//!         println!("groups: {:?}", outcome.result.groups);
//!     } else {
//!         println!("{}: {}", outcome.result.code, outcome.result.message);
//!     }
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod client;
pub mod config;
pub mod failover;
pub mod groups;
pub mod result;
pub mod secret;
pub mod transport;

pub use audit::{AuditEntry, AuditEventType, AuditLogger};
pub use client::RadiusClient;
pub use config::{Config, ConfigError, ServerEntry, ServerRole, ServerSettings};
pub use failover::{FailoverCoordinator, authenticate_with_failover};
pub use groups::extract_groups;
pub use result::{AttributeValue, AuthCode, AuthResult, FailoverResult, ResponseAttributes};
pub use secret::{PlaintextSecrets, SecretDecryptor, SecretError};
pub use transport::{
    CancelHandle, CancelToken, DatagramSocket, SocketFactory, TokioSocketFactory, Transport,
    TransportError, cancellation,
};
