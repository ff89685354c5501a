//! Vendor-Specific attributes (RFC 2865 Section 5.26)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     Type      |  Length       |            Vendor-Id
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//!      Vendor-Id (cont)           | Vendor type   | Vendor length |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    Attribute-Specific...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! A single Vendor-Specific attribute may carry several sub-attributes of
//! the same vendor back to back. Microsoft's dictionary (RFC 2548) is the
//! only one the login path needs.

use super::{Attribute, AttributeType};
use crate::packet::PacketError;
use thiserror::Error;

/// IANA enterprise number for Microsoft
pub const MICROSOFT_VENDOR_ID: u32 = 311;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VendorError {
    #[error("Vendor-Specific payload too short: {0} bytes")]
    TooShort(usize),
    #[error("Invalid vendor sub-attribute length {length} at offset {offset}")]
    InvalidLength { offset: usize, length: usize },
    #[error("Vendor sub-attribute value too long: {0} bytes")]
    ValueTooLong(usize),
}

/// Microsoft vendor attribute types (RFC 2548)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MicrosoftAttribute {
    /// MS-CHAP-Response (1)
    ChapResponse = 1,
    /// MS-CHAP-Error (2)
    ChapError = 2,
    /// MS-CHAP-Challenge (11)
    ChapChallenge = 11,
    /// MS-MPPE-Send-Key (16)
    MppeSendKey = 16,
    /// MS-MPPE-Recv-Key (17)
    MppeRecvKey = 17,
    /// MS-CHAP2-Response (25)
    Chap2Response = 25,
    /// MS-CHAP2-Success (26)
    Chap2Success = 26,
}

impl MicrosoftAttribute {
    /// True when a vendor sub-attribute belongs to the MS-CHAP/MPPE exchange
    pub fn is_protocol_material(vendor_id: u32, vendor_type: u8) -> bool {
        vendor_id == MICROSOFT_VENDOR_ID && Self::from_u8(vendor_type).is_some()
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(MicrosoftAttribute::ChapResponse),
            2 => Some(MicrosoftAttribute::ChapError),
            11 => Some(MicrosoftAttribute::ChapChallenge),
            16 => Some(MicrosoftAttribute::MppeSendKey),
            17 => Some(MicrosoftAttribute::MppeRecvKey),
            25 => Some(MicrosoftAttribute::Chap2Response),
            26 => Some(MicrosoftAttribute::Chap2Success),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            MicrosoftAttribute::ChapResponse => "MS-CHAP-Response",
            MicrosoftAttribute::ChapError => "MS-CHAP-Error",
            MicrosoftAttribute::ChapChallenge => "MS-CHAP-Challenge",
            MicrosoftAttribute::MppeSendKey => "MS-MPPE-Send-Key",
            MicrosoftAttribute::MppeRecvKey => "MS-MPPE-Recv-Key",
            MicrosoftAttribute::Chap2Response => "MS-CHAP2-Response",
            MicrosoftAttribute::Chap2Success => "MS-CHAP2-Success",
        }
    }
}

/// One vendor sub-attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorAttribute {
    pub vendor_id: u32,
    pub vendor_type: u8,
    pub value: Vec<u8>,
}

impl VendorAttribute {
    /// vendor type + vendor length octets
    const SUB_HEADER_LENGTH: usize = 2;
    /// Room left for the value once the outer header, vendor id and
    /// sub-header are accounted for
    pub const MAX_VALUE_LENGTH: usize = Attribute::MAX_VALUE_LENGTH - 4 - Self::SUB_HEADER_LENGTH;

    pub fn new(vendor_id: u32, vendor_type: u8, value: Vec<u8>) -> Result<Self, VendorError> {
        if value.len() > Self::MAX_VALUE_LENGTH {
            return Err(VendorError::ValueTooLong(value.len()));
        }
        Ok(VendorAttribute {
            vendor_id,
            vendor_type,
            value,
        })
    }

    /// Microsoft sub-attribute shorthand
    pub fn microsoft(kind: MicrosoftAttribute, value: Vec<u8>) -> Result<Self, VendorError> {
        Self::new(MICROSOFT_VENDOR_ID, kind.as_u8(), value)
    }

    /// Wrap in a Vendor-Specific (26) attribute
    pub fn to_attribute(&self) -> Result<Attribute, PacketError> {
        let mut payload = Vec::with_capacity(4 + Self::SUB_HEADER_LENGTH + self.value.len());
        payload.extend_from_slice(&self.vendor_id.to_be_bytes());
        payload.push(self.vendor_type);
        payload.push((Self::SUB_HEADER_LENGTH + self.value.len()) as u8);
        payload.extend_from_slice(&self.value);
        Attribute::new(AttributeType::VendorSpecific as u8, payload)
    }

    /// Split the value of a Vendor-Specific attribute into sub-attributes
    pub fn decode_all(payload: &[u8]) -> Result<Vec<Self>, VendorError> {
        if payload.len() < 4 + Self::SUB_HEADER_LENGTH {
            return Err(VendorError::TooShort(payload.len()));
        }

        let vendor_id = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
        let mut offset = 4;
        let mut out = Vec::new();

        while offset < payload.len() {
            let rest = &payload[offset..];
            if rest.len() < Self::SUB_HEADER_LENGTH {
                return Err(VendorError::InvalidLength {
                    offset,
                    length: rest.len(),
                });
            }
            let length = rest[1] as usize;
            if length < Self::SUB_HEADER_LENGTH || length > rest.len() {
                return Err(VendorError::InvalidLength { offset, length });
            }
            out.push(VendorAttribute {
                vendor_id,
                vendor_type: rest[0],
                value: rest[Self::SUB_HEADER_LENGTH..length].to_vec(),
            });
            offset += length;
        }

        Ok(out)
    }

    /// Dictionary name when known, `Vendor-<id>-Attr-<type>` otherwise
    pub fn name(&self) -> String {
        if self.vendor_id == MICROSOFT_VENDOR_ID
            && let Some(kind) = MicrosoftAttribute::from_u8(self.vendor_type)
        {
            return kind.name().to_string();
        }
        format!("Vendor-{}-Attr-{}", self.vendor_id, self.vendor_type)
    }
}
