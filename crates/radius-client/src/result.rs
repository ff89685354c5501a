//! Outcome types returned to the login path
//!
//! Failures are values here, never errors: the caller shows `message` to the
//! user and logs `code`.

use crate::config::ServerRole;
use radius_proto::{AttributeType, Packet, VendorAttribute};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable outcome of an authentication attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthCode {
    AccessAccept,
    /// Authoritative negative answer; never fails over
    AccessReject,
    /// Multi-round exchanges are not supported
    AccessChallenge,
    /// Reply with a code other than Accept, Reject or Challenge
    UnexpectedResponse,
    ConnectionError,
    Timeout,
    EncodeError,
    DecodeError,
    SocketError,
    /// Secret could not be decrypted or the server entry is unusable
    ConfigError,
    Cancelled,
}

impl AuthCode {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthCode::AccessAccept => "ACCESS_ACCEPT",
            AuthCode::AccessReject => "ACCESS_REJECT",
            AuthCode::AccessChallenge => "ACCESS_CHALLENGE",
            AuthCode::UnexpectedResponse => "UNEXPECTED_RESPONSE",
            AuthCode::ConnectionError => "CONNECTION_ERROR",
            AuthCode::Timeout => "TIMEOUT",
            AuthCode::EncodeError => "ENCODE_ERROR",
            AuthCode::DecodeError => "DECODE_ERROR",
            AuthCode::SocketError => "SOCKET_ERROR",
            AuthCode::ConfigError => "CONFIG_ERROR",
            AuthCode::Cancelled => "CANCELLED",
        }
    }

    /// Success and reject end the login; anything else may fail over
    pub fn is_authoritative(self) -> bool {
        matches!(self, AuthCode::AccessAccept | AuthCode::AccessReject)
    }
}

impl fmt::Display for AuthCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// Printable UTF-8
    Text(String),
    Binary(Vec<u8>),
}

impl AttributeValue {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) if is_printable(text) => AttributeValue::Text(text.to_string()),
            _ => AttributeValue::Binary(bytes.to_vec()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(text) => Some(text),
            AttributeValue::Binary(_) => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Text(text) => f.write_str(text),
            AttributeValue::Binary(bytes) => write!(f, "0x{}", hex::encode(bytes)),
        }
    }
}

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn is_printable(text: &str) -> bool {
    !text.is_empty() && !text.chars().any(char::is_control)
}

/// Where an attribute came from in the reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeSource {
    Standard(u8),
    Vendor { vendor_id: u32, vendor_type: u8 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseAttribute {
    pub name: String,
    pub source: AttributeSource,
    pub value: AttributeValue,
}

/// Reply attributes in packet order, vendor attributes flattened into their
/// sub-attributes
///
/// Serializes as a map from attribute name to the list of its values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseAttributes {
    entries: Vec<ResponseAttribute>,
}

impl ResponseAttributes {
    pub fn from_packet(packet: &Packet) -> Self {
        let mut entries = Vec::with_capacity(packet.attributes.len());
        for attr in &packet.attributes {
            match AttributeType::from_u8(attr.attr_type) {
                Some(AttributeType::MessageAuthenticator) => {}
                Some(AttributeType::VendorSpecific) => {
                    match VendorAttribute::decode_all(&attr.value) {
                        Ok(vsas) => entries.extend(vsas.into_iter().map(|vsa| ResponseAttribute {
                            name: vsa.name(),
                            source: AttributeSource::Vendor {
                                vendor_id: vsa.vendor_id,
                                vendor_type: vsa.vendor_type,
                            },
                            value: AttributeValue::from_bytes(&vsa.value),
                        })),
                        Err(_) => entries.push(ResponseAttribute {
                            name: AttributeType::VendorSpecific.name().to_string(),
                            source: AttributeSource::Standard(attr.attr_type),
                            value: AttributeValue::Binary(attr.value.clone()),
                        }),
                    }
                }
                known => entries.push(ResponseAttribute {
                    name: known
                        .map(|t| t.name().to_string())
                        .unwrap_or_else(|| format!("Attr-{}", attr.attr_type)),
                    source: AttributeSource::Standard(attr.attr_type),
                    value: AttributeValue::from_bytes(&attr.value),
                }),
            }
        }
        ResponseAttributes { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResponseAttribute> {
        self.entries.iter()
    }

    /// Values of every standard attribute of this type, in packet order
    pub fn standard(&self, attr_type: AttributeType) -> impl Iterator<Item = &AttributeValue> {
        self.entries.iter().filter_map(move |e| match e.source {
            AttributeSource::Standard(t) if t == attr_type.as_u8() => Some(&e.value),
            _ => None,
        })
    }

    /// Values by attribute name
    pub fn get(&self, name: &str) -> Vec<&AttributeValue> {
        self.entries
            .iter()
            .filter(|e| e.name == name)
            .map(|e| &e.value)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for ResponseAttributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut names: Vec<&str> = Vec::new();
        for entry in &self.entries {
            if !names.contains(&entry.name.as_str()) {
                names.push(&entry.name);
            }
        }

        let mut map = serializer.serialize_map(Some(names.len()))?;
        for name in names {
            map.serialize_entry(name, &self.get(name))?;
        }
        map.end()
    }
}

/// Outcome of one authentication attempt against one server
#[derive(Debug, Clone, Serialize)]
pub struct AuthResult {
    pub success: bool,
    /// Shown to the user verbatim
    pub message: String,
    pub code: AuthCode,
    /// Present only when a reply was decoded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<ResponseAttributes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
}

impl AuthResult {
    pub fn accepted(message: impl Into<String>, attributes: ResponseAttributes, groups: Vec<String>) -> Self {
        AuthResult {
            success: true,
            message: message.into(),
            code: AuthCode::AccessAccept,
            attributes: Some(attributes),
            groups: Some(groups),
        }
    }

    /// Failure after a reply was decoded
    pub fn rejected(code: AuthCode, message: impl Into<String>, attributes: ResponseAttributes) -> Self {
        AuthResult {
            success: false,
            message: message.into(),
            code,
            attributes: Some(attributes),
            groups: None,
        }
    }

    /// Failure with no decoded reply
    pub fn failure(code: AuthCode, message: impl Into<String>) -> Self {
        AuthResult {
            success: false,
            message: message.into(),
            code,
            attributes: None,
            groups: None,
        }
    }
}

/// Outcome of a login with failover
#[derive(Debug, Clone, Serialize)]
pub struct FailoverResult {
    pub result: AuthResult,
    pub used_server: ServerRole,
}
