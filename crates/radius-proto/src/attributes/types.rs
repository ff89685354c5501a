/// RADIUS attribute types used by an MS-CHAPv2 login client
///
/// This is deliberately the subset of the RFC 2865/2869 dictionary that an
/// Access-Request to NPS carries or that an Access-Accept may return for
/// authorization mapping. Anything else is kept as a raw type number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AttributeType {
    /// User-Name (1) - RFC 2865
    UserName = 1,
    /// Service-Type (6) - RFC 2865
    ServiceType = 6,
    /// Filter-Id (11) - RFC 2865
    FilterId = 11,
    /// Reply-Message (18) - RFC 2865
    ReplyMessage = 18,
    /// State (24) - RFC 2865
    State = 24,
    /// Class (25) - RFC 2865
    Class = 25,
    /// Vendor-Specific (26) - RFC 2865
    VendorSpecific = 26,
    /// Session-Timeout (27) - RFC 2865
    SessionTimeout = 27,
    /// Idle-Timeout (28) - RFC 2865
    IdleTimeout = 28,
    /// NAS-Identifier (32) - RFC 2865
    NasIdentifier = 32,
    /// Proxy-State (33) - RFC 2865
    ProxyState = 33,
    /// NAS-Port-Type (61) - RFC 2865
    NasPortType = 61,
    /// EAP-Message (79) - RFC 3579
    EapMessage = 79,
    /// Message-Authenticator (80) - RFC 2869
    MessageAuthenticator = 80,
}

/// Service-Type value "Framed" (RFC 2865 Section 5.6)
pub const SERVICE_TYPE_FRAMED: u32 = 2;

/// NAS-Port-Type value "Ethernet" (RFC 2865 Section 5.41)
pub const NAS_PORT_TYPE_ETHERNET: u32 = 15;

impl AttributeType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(AttributeType::UserName),
            6 => Some(AttributeType::ServiceType),
            11 => Some(AttributeType::FilterId),
            18 => Some(AttributeType::ReplyMessage),
            24 => Some(AttributeType::State),
            25 => Some(AttributeType::Class),
            26 => Some(AttributeType::VendorSpecific),
            27 => Some(AttributeType::SessionTimeout),
            28 => Some(AttributeType::IdleTimeout),
            32 => Some(AttributeType::NasIdentifier),
            33 => Some(AttributeType::ProxyState),
            61 => Some(AttributeType::NasPortType),
            79 => Some(AttributeType::EapMessage),
            80 => Some(AttributeType::MessageAuthenticator),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Dictionary name, as FreeRADIUS and NPS logs print it
    pub fn name(self) -> &'static str {
        match self {
            AttributeType::UserName => "User-Name",
            AttributeType::ServiceType => "Service-Type",
            AttributeType::FilterId => "Filter-Id",
            AttributeType::ReplyMessage => "Reply-Message",
            AttributeType::State => "State",
            AttributeType::Class => "Class",
            AttributeType::VendorSpecific => "Vendor-Specific",
            AttributeType::SessionTimeout => "Session-Timeout",
            AttributeType::IdleTimeout => "Idle-Timeout",
            AttributeType::NasIdentifier => "NAS-Identifier",
            AttributeType::ProxyState => "Proxy-State",
            AttributeType::NasPortType => "NAS-Port-Type",
            AttributeType::EapMessage => "EAP-Message",
            AttributeType::MessageAuthenticator => "Message-Authenticator",
        }
    }
}
