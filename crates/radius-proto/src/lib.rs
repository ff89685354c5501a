//! RADIUS Protocol Implementation for MS-CHAPv2 clients
//!
//! The wire side of logging in to Microsoft NPS: RFC 2865 packets, the
//! Microsoft vendor dictionary of RFC 2548, Message-Authenticator (RFC 2869)
//! and the MS-CHAPv2 response calculation of RFC 2759.
//!
//! # Features
//!
//! - Packet encoding and decoding, attribute order preserved
//! - Vendor-Specific sub-attribute codec with the Microsoft subset
//! - Request/Response Authenticator calculation and verification
//! - Message-Authenticator signing and verification
//! - MS-CHAPv2 NT-Response, authenticator response and MS-CHAP-Error parsing
//!
//! # Example
//!
//! ```rust
//! use radius_proto::{Packet, Code, Attribute, AttributeType};
//! use radius_proto::auth::{generate_identifier, generate_request_authenticator};
//! use radius_proto::mschapv2::MschapV2Request;
//!
//! // Create an Access-Request packet
//! let req_auth = generate_request_authenticator();
//! let mut packet = Packet::new(Code::AccessRequest, generate_identifier(), req_auth);
//!
//! packet.add_attribute(
//!     Attribute::string(AttributeType::UserName as u8, "alice").unwrap()
//! );
//!
//! // MS-CHAP-Challenge and MS-CHAP2-Response
//! let mschap = MschapV2Request::new("alice", "password");
//! for attr in mschap.attributes().unwrap() {
//!     packet.add_attribute(attr);
//! }
//!
//! radius_proto::message_auth::sign_request(&mut packet, b"secret").unwrap();
//! let bytes = packet.encode().unwrap();
//! assert_eq!(bytes.len(), packet.length());
//! ```

pub mod attributes;
pub mod auth;
pub mod crypto;
pub mod message_auth;
pub mod mschapv2;
pub mod packet;

pub use attributes::{
    Attribute, AttributeType, MICROSOFT_VENDOR_ID, MicrosoftAttribute, NAS_PORT_TYPE_ETHERNET,
    SERVICE_TYPE_FRAMED, VendorAttribute, VendorError,
};
pub use auth::{
    calculate_response_authenticator, generate_identifier, generate_request_authenticator,
    verify_response_authenticator,
};
pub use message_auth::{MessageAuthStatus, calculate_message_authenticator};
pub use mschapv2::{ChapFailure, Mschap2Response, MschapError, MschapV2Request};
pub use packet::{Code, Packet, PacketError};
