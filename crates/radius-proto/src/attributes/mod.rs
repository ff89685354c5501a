//! RADIUS attributes: the generic TLV, the standard dictionary subset used on
//! the login path, and Vendor-Specific sub-attributes.

mod attribute;
mod types;
pub mod vendor;

pub use attribute::Attribute;
pub use types::{AttributeType, NAS_PORT_TYPE_ETHERNET, SERVICE_TYPE_FRAMED};
pub use vendor::{MicrosoftAttribute, VendorAttribute, VendorError, MICROSOFT_VENDOR_ID};
