//! Authorization group extraction from Access-Accept attributes
//!
//! NPS policies hand group membership back in several places depending on
//! how the network policy is written. All of them contribute, scanned in
//! this order:
//!
//! 1. Filter-Id, verbatim
//! 2. Class, reduced to its `CN=` component when it looks like an LDAP DN
//! 3. printable vendor-specific string values, except MS-CHAP/MPPE material
//! 4. Reply-Message, only when it starts with `Group:`
//!
//! Duplicates are dropped, keeping the first occurrence.

use crate::result::{AttributeSource, ResponseAttributes};
use radius_proto::{AttributeType, MicrosoftAttribute};

const REPLY_MESSAGE_PREFIX: &str = "Group:";

pub fn extract_groups(attributes: &ResponseAttributes) -> Vec<String> {
    let mut groups = Vec::new();
    let mut push = |candidate: &str| {
        let candidate = candidate.trim();
        if !candidate.is_empty() && !groups.iter().any(|g| g == candidate) {
            groups.push(candidate.to_string());
        }
    };

    for value in attributes.standard(AttributeType::FilterId) {
        if let Some(text) = value.as_text() {
            push(text);
        }
    }

    for value in attributes.standard(AttributeType::Class) {
        if let Some(text) = value.as_text() {
            push(common_name(text).unwrap_or(text));
        }
    }

    for entry in attributes.iter() {
        let AttributeSource::Vendor {
            vendor_id,
            vendor_type,
        } = entry.source
        else {
            continue;
        };
        if MicrosoftAttribute::is_protocol_material(vendor_id, vendor_type) {
            continue;
        }
        if let Some(text) = entry.value.as_text() {
            push(text);
        }
    }

    for value in attributes.standard(AttributeType::ReplyMessage) {
        if let Some(group) = value
            .as_text()
            .and_then(|text| text.strip_prefix(REPLY_MESSAGE_PREFIX))
        {
            push(group);
        }
    }

    groups
}

/// `CN=` value of a DN such as `CN=NetAdmins,OU=Groups,DC=corp,DC=example`
///
/// Returns None when the text is not DN-shaped or has no CN component.
fn common_name(text: &str) -> Option<&str> {
    if !text.contains('=') {
        return None;
    }
    text.split(',').find_map(|rdn| {
        let (key, value) = rdn.split_once('=')?;
        key.trim().eq_ignore_ascii_case("CN").then(|| value.trim())
    })
}
