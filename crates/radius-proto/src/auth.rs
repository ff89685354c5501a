use crate::packet::{Packet, PacketError};
use rand::Rng;

/// Generate a random Request Authenticator (16 bytes) per RFC 2865 Section 3
pub fn generate_request_authenticator() -> [u8; 16] {
    let mut rng = rand::rng();
    let mut authenticator = [0u8; 16];
    rng.fill(&mut authenticator);
    authenticator
}

/// Pick a random packet Identifier
pub fn generate_identifier() -> u8 {
    rand::rng().random()
}

/// Calculate Response Authenticator per RFC 2865 Section 3
///
/// Response Authenticator = MD5(Code + ID + Length + Request Authenticator + Attributes + Secret)
///
/// This is used for Access-Accept, Access-Reject, and Access-Challenge packets.
pub fn calculate_response_authenticator(
    packet: &Packet,
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> Result<[u8; 16], PacketError> {
    let encoded = packet.encode()?;
    Ok(response_authenticator_over(&encoded, request_authenticator, secret))
}

/// Verify the Response Authenticator of a received datagram
///
/// Works on the bytes as received so that the check covers exactly what the
/// server signed. Anything past the Length field is padding and excluded.
pub fn verify_response_authenticator(
    data: &[u8],
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> bool {
    let Some(signed) = signed_bytes(data) else {
        return false;
    };
    let received = &signed[Packet::AUTHENTICATOR_OFFSET..Packet::MIN_PACKET_SIZE];
    response_authenticator_over(signed, request_authenticator, secret) == received
}

/// The datagram truncated to its Length field, if that field is sane
pub(crate) fn signed_bytes(data: &[u8]) -> Option<&[u8]> {
    if data.len() < Packet::MIN_PACKET_SIZE {
        return None;
    }
    let length = u16::from_be_bytes([data[2], data[3]]) as usize;
    if length < Packet::MIN_PACKET_SIZE || length > data.len() {
        return None;
    }
    Some(&data[..length])
}

fn response_authenticator_over(
    encoded: &[u8],
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> [u8; 16] {
    let mut context = md5::Context::new();
    context.consume(&encoded[..Packet::AUTHENTICATOR_OFFSET]);
    context.consume(request_authenticator);
    context.consume(&encoded[Packet::MIN_PACKET_SIZE..]);
    context.consume(secret);
    context.compute().0
}
