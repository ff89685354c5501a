use super::Code;
use crate::attributes::{Attribute, AttributeType, VendorAttribute};
use std::io::{self, Cursor, Read, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PacketError {
    #[error("Invalid packet length: {0}")]
    InvalidLength(usize),
    #[error("Invalid packet code: {0}")]
    InvalidCode(u8),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Attribute error: {0}")]
    AttributeError(String),
    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),
}

/// RADIUS Packet structure as defined in RFC 2865 Section 3
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     Code      |  Identifier   |            Length             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// |                         Authenticator                         |
/// |                                                               |
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Attributes ...
/// +-+-+-+-+-+-+-+-+-+-+-+-+-
/// ```
///
/// Attributes keep the order they were added in. Some NAS-facing servers are
/// sensitive to it, so the encoder never reorders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub code: Code,
    /// Matches a reply to its request
    pub identifier: u8,
    /// Request Authenticator for requests, Response Authenticator for replies
    pub authenticator: [u8; 16],
    pub attributes: Vec<Attribute>,
}

impl Packet {
    /// Header size: code + identifier + length + authenticator
    pub const MIN_PACKET_SIZE: usize = 20;
    /// RFC 2865 upper bound
    pub const MAX_PACKET_SIZE: usize = 4096;
    /// Byte offset of the authenticator field
    pub const AUTHENTICATOR_OFFSET: usize = 4;

    pub fn new(code: Code, identifier: u8, authenticator: [u8; 16]) -> Self {
        Packet {
            code,
            identifier,
            authenticator,
            attributes: Vec::new(),
        }
    }

    pub fn add_attribute(&mut self, attribute: Attribute) {
        self.attributes.push(attribute);
    }

    /// Encode packet to bytes
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let total_length = self.length();
        if total_length > Self::MAX_PACKET_SIZE {
            return Err(PacketError::PacketTooLarge(total_length));
        }

        let mut buffer = Vec::with_capacity(total_length);
        buffer.write_all(&[self.code.as_u8(), self.identifier])?;
        buffer.write_all(&(total_length as u16).to_be_bytes())?;
        buffer.write_all(&self.authenticator)?;

        for attr in &self.attributes {
            attr.encode_into(&mut buffer)?;
        }

        Ok(buffer)
    }

    /// Decode packet from bytes
    ///
    /// Bytes past the Length field are treated as padding and ignored
    /// (RFC 2865 Section 3).
    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < Self::MIN_PACKET_SIZE {
            return Err(PacketError::InvalidLength(data.len()));
        }

        let mut cursor = Cursor::new(data);

        let mut header = [0u8; 4];
        cursor.read_exact(&mut header)?;
        let code = Code::from_u8(header[0]).ok_or(PacketError::InvalidCode(header[0]))?;
        let identifier = header[1];
        let length = u16::from_be_bytes([header[2], header[3]]) as usize;

        if !(Self::MIN_PACKET_SIZE..=Self::MAX_PACKET_SIZE).contains(&length) {
            return Err(PacketError::InvalidLength(length));
        }
        if data.len() < length {
            return Err(PacketError::InvalidLength(data.len()));
        }

        let mut authenticator = [0u8; 16];
        cursor.read_exact(&mut authenticator)?;

        let mut attributes = Vec::new();
        let mut remaining = &data[Self::MIN_PACKET_SIZE..length];
        while !remaining.is_empty() {
            let attr = Attribute::decode(remaining)?;
            remaining = &remaining[attr.encoded_length()..];
            attributes.push(attr);
        }

        Ok(Packet {
            code,
            identifier,
            authenticator,
            attributes,
        })
    }

    /// Read the identifier byte of a datagram without decoding it
    pub fn peek_identifier(data: &[u8]) -> Option<u8> {
        data.get(1).copied()
    }

    /// Get the length of the encoded packet
    pub fn length(&self) -> usize {
        Self::MIN_PACKET_SIZE
            + self
                .attributes
                .iter()
                .map(Attribute::encoded_length)
                .sum::<usize>()
    }

    /// Find first attribute by type
    pub fn find_attribute(&self, attr_type: u8) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.attr_type == attr_type)
    }

    /// Find all attributes by type
    pub fn find_all_attributes(&self, attr_type: u8) -> Vec<&Attribute> {
        self.attributes
            .iter()
            .filter(|a| a.attr_type == attr_type)
            .collect()
    }

    /// Decode every Vendor-Specific attribute into its sub-attributes
    ///
    /// Malformed vendor payloads are skipped rather than failing the packet;
    /// the packet-level authenticator already covers their bytes.
    pub fn vendor_attributes(&self) -> Vec<VendorAttribute> {
        self.find_all_attributes(AttributeType::VendorSpecific as u8)
            .into_iter()
            .filter_map(|attr| VendorAttribute::decode_all(&attr.value).ok())
            .flatten()
            .collect()
    }

    /// Find the first vendor sub-attribute with the given vendor id and type
    pub fn find_vendor_attribute(&self, vendor_id: u32, vendor_type: u8) -> Option<VendorAttribute> {
        self.vendor_attributes()
            .into_iter()
            .find(|vsa| vsa.vendor_id == vendor_id && vsa.vendor_type == vendor_type)
    }
}
