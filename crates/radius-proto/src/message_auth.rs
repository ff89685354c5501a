//! Message-Authenticator Support (RFC 2869, RFC 3579)
//!
//! HMAC-MD5 keyed with the shared secret, computed over the whole packet with
//! the attribute's own 16 bytes zeroed. For a reply the Authenticator field
//! holds the Request Authenticator during the calculation, not the Response
//! Authenticator the server puts on the wire.
//!
//! NPS can be configured to drop Access-Requests that lack the attribute, so
//! the client adds it by default.

use crate::attributes::{Attribute, AttributeType};
use crate::auth::signed_bytes;
use crate::packet::{Packet, PacketError};
use hmac::{Hmac, Mac};
use md5_digest::Md5;

type HmacMd5 = Hmac<Md5>;

pub const MESSAGE_AUTHENTICATOR_LENGTH: usize = 16;

/// Outcome of checking a reply's Message-Authenticator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageAuthStatus {
    /// The reply carried no Message-Authenticator
    Absent,
    Valid,
    Invalid,
}

fn new_mac(secret: &[u8]) -> HmacMd5 {
    HmacMd5::new_from_slice(secret).expect("HMAC can take key of any size")
}

/// Calculate Message-Authenticator over packet bytes whose
/// Message-Authenticator value is already zeroed
pub fn calculate_message_authenticator(packet_bytes: &[u8], secret: &[u8]) -> [u8; 16] {
    let mut mac = new_mac(secret);
    mac.update(packet_bytes);
    let bytes = mac.finalize().into_bytes();

    let mut output = [0u8; 16];
    output.copy_from_slice(&bytes);
    output
}

/// Append a Message-Authenticator to an Access-Request and fill it in
///
/// Must be the last change made to the packet; any attribute added later
/// invalidates the HMAC.
pub fn sign_request(packet: &mut Packet, secret: &[u8]) -> Result<(), PacketError> {
    packet.add_attribute(Attribute::new(
        AttributeType::MessageAuthenticator as u8,
        vec![0u8; MESSAGE_AUTHENTICATOR_LENGTH],
    )?);
    let encoded = packet.encode()?;
    let value = calculate_message_authenticator(&encoded, secret);

    if let Some(attr) = packet
        .attributes
        .iter_mut()
        .rev()
        .find(|a| a.attr_type == AttributeType::MessageAuthenticator as u8)
    {
        attr.value = value.to_vec();
    }
    Ok(())
}

/// Byte offset of the first Message-Authenticator value in an encoded packet
fn find_value_offset(signed: &[u8]) -> Result<Option<usize>, PacketError> {
    let mut offset = Packet::MIN_PACKET_SIZE;
    while offset < signed.len() {
        let attr = Attribute::decode(&signed[offset..])?;
        if attr.attr_type == AttributeType::MessageAuthenticator as u8 {
            if attr.value.len() != MESSAGE_AUTHENTICATOR_LENGTH {
                return Err(PacketError::AttributeError(format!(
                    "Message-Authenticator must be 16 bytes, got {}",
                    attr.value.len()
                )));
            }
            return Ok(Some(offset + Attribute::HEADER_LENGTH));
        }
        offset += attr.encoded_length();
    }
    Ok(None)
}

/// Verify the Message-Authenticator of a received reply, if it has one
pub fn verify_reply(
    data: &[u8],
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> Result<MessageAuthStatus, PacketError> {
    let signed = signed_bytes(data).ok_or(PacketError::InvalidLength(data.len()))?;
    let Some(offset) = find_value_offset(signed)? else {
        return Ok(MessageAuthStatus::Absent);
    };

    let mut copy = signed.to_vec();
    copy[Packet::AUTHENTICATOR_OFFSET..Packet::MIN_PACKET_SIZE].copy_from_slice(request_authenticator);
    copy[offset..offset + MESSAGE_AUTHENTICATOR_LENGTH].fill(0);

    let mut mac = new_mac(secret);
    mac.update(&copy);
    // verify_slice compares in constant time
    match mac.verify_slice(&signed[offset..offset + MESSAGE_AUTHENTICATOR_LENGTH]) {
        Ok(()) => Ok(MessageAuthStatus::Valid),
        Err(_) => Ok(MessageAuthStatus::Invalid),
    }
}

/// Verify the Message-Authenticator of an Access-Request
pub fn verify_request(data: &[u8], secret: &[u8]) -> Result<MessageAuthStatus, PacketError> {
    let signed = signed_bytes(data).ok_or(PacketError::InvalidLength(data.len()))?;
    let mut request_authenticator = [0u8; 16];
    request_authenticator.copy_from_slice(&signed[Packet::AUTHENTICATOR_OFFSET..Packet::MIN_PACKET_SIZE]);
    verify_reply(signed, &request_authenticator, secret)
}

/// Fill in the Message-Authenticator of a reply that is about to be signed
/// with its Response Authenticator
///
/// `packet.authenticator` is ignored. Servers (and test doubles) call this
/// before computing the Response Authenticator.
pub fn sign_reply(
    packet: &mut Packet,
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> Result<(), PacketError> {
    packet.authenticator = *request_authenticator;
    sign_request(packet, secret)
}
