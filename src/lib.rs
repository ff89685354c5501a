//! Administrative login against Microsoft NPS over RADIUS with MS-CHAPv2
//!
//! Umbrella crate over the workspace:
//!
//! - [`proto`]: packet codec, Microsoft vendor attributes and MS-CHAPv2
//! - [`client`]: UDP transport, failover, group extraction and configuration

pub use radius_client as client;
pub use radius_proto as proto;

pub use radius_client::{
    AuthCode, AuthResult, CancelToken, Config, FailoverCoordinator, FailoverResult, PlaintextSecrets,
    SecretDecryptor, ServerRole, authenticate_with_failover,
};
