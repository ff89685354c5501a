//! MS-CHAPv2 over RADIUS (RFC 2759, RFC 2548)
//!
//! The client side of the exchange: derive the NT-Response for a fresh pair
//! of challenges, pack it into the 50-byte MS-CHAP2-Response, and check the
//! server's MS-CHAP2-Success or explain its MS-CHAP-Error.
//!
//! # Example
//!
//! ```rust
//! use radius_proto::mschapv2::MschapV2Request;
//!
//! let request = MschapV2Request::new("alice", "s3cret!");
//! let attributes = request.attributes().unwrap();
//! assert_eq!(attributes.len(), 2);
//! ```

use crate::attributes::{Attribute, MicrosoftAttribute, VendorAttribute};
use crate::crypto::{challenge_hash, challenge_response, hash_nt_hash, nt_hash};
use crate::packet::PacketError;
use md4::Digest;
use rand::Rng;
use sha1::Sha1;
use thiserror::Error;

pub const CHALLENGE_LENGTH: usize = 16;
pub const NT_RESPONSE_LENGTH: usize = 24;
pub const MSCHAP2_RESPONSE_LENGTH: usize = 50;

const MAGIC_SERVER_SIGNING: &[u8; 39] = b"Magic server to client signing constant";
const MAGIC_PAD: &[u8; 41] = b"Pad to make it do more than one iteration";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MschapError {
    #[error("Invalid {attribute} length: {length} bytes")]
    InvalidLength { attribute: &'static str, length: usize },
    #[error("Malformed {attribute}: {reason}")]
    Malformed { attribute: &'static str, reason: String },
    #[error("MS-CHAP ident mismatch: sent {sent}, received {received}")]
    IdentMismatch { sent: u8, received: u8 },
    #[error("MS-CHAP2-Success authenticator response does not match")]
    AuthenticatorMismatch,
}

/// Generate a 16-byte challenge from the thread-local CSPRNG
pub fn generate_challenge() -> [u8; CHALLENGE_LENGTH] {
    let mut challenge = [0u8; CHALLENGE_LENGTH];
    rand::rng().fill(&mut challenge);
    challenge
}

/// GenerateNTResponse (RFC 2759 Section 8.1)
pub fn generate_nt_response(
    auth_challenge: &[u8; CHALLENGE_LENGTH],
    peer_challenge: &[u8; CHALLENGE_LENGTH],
    username: &str,
    password: &str,
) -> [u8; NT_RESPONSE_LENGTH] {
    let challenge = challenge_hash(peer_challenge, auth_challenge, username);
    challenge_response(&challenge, &nt_hash(password))
}

/// GenerateAuthenticatorResponse (RFC 2759 Section 8.7)
///
/// Returns the 42-character `S=<40 uppercase hex>` string the server must
/// echo in MS-CHAP2-Success if it really knows the password.
pub fn generate_authenticator_response(
    password: &str,
    nt_response: &[u8; NT_RESPONSE_LENGTH],
    peer_challenge: &[u8; CHALLENGE_LENGTH],
    auth_challenge: &[u8; CHALLENGE_LENGTH],
    username: &str,
) -> String {
    let password_hash_hash = hash_nt_hash(&nt_hash(password));

    let mut hasher = Sha1::new();
    hasher.update(password_hash_hash);
    hasher.update(nt_response);
    hasher.update(MAGIC_SERVER_SIGNING);
    let digest = hasher.finalize();

    let challenge = challenge_hash(peer_challenge, auth_challenge, username);
    let mut hasher = Sha1::new();
    hasher.update(digest);
    hasher.update(challenge);
    hasher.update(MAGIC_PAD);
    let digest = hasher.finalize();

    format!("S={}", hex::encode_upper(digest))
}

/// MS-CHAP2-Response attribute value (RFC 2548 Section 2.3.2)
///
/// ```text
/// byte 0       Ident
/// byte 1       Flags (0)
/// bytes 2..18  Peer-Challenge
/// bytes 18..26 Reserved (0)
/// bytes 26..50 NT-Response
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mschap2Response {
    pub ident: u8,
    pub flags: u8,
    pub peer_challenge: [u8; CHALLENGE_LENGTH],
    pub nt_response: [u8; NT_RESPONSE_LENGTH],
}

impl Mschap2Response {
    pub fn to_bytes(&self) -> [u8; MSCHAP2_RESPONSE_LENGTH] {
        build_mschap2_response(self.ident, &self.peer_challenge, &self.nt_response, self.flags)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MschapError> {
        if bytes.len() != MSCHAP2_RESPONSE_LENGTH {
            return Err(MschapError::InvalidLength {
                attribute: "MS-CHAP2-Response",
                length: bytes.len(),
            });
        }
        let mut peer_challenge = [0u8; CHALLENGE_LENGTH];
        peer_challenge.copy_from_slice(&bytes[2..18]);
        let mut nt_response = [0u8; NT_RESPONSE_LENGTH];
        nt_response.copy_from_slice(&bytes[26..50]);

        Ok(Mschap2Response {
            ident: bytes[0],
            flags: bytes[1],
            peer_challenge,
            nt_response,
        })
    }
}

/// Assemble the fixed 50-byte MS-CHAP2-Response payload
pub fn build_mschap2_response(
    ident: u8,
    peer_challenge: &[u8; CHALLENGE_LENGTH],
    nt_response: &[u8; NT_RESPONSE_LENGTH],
    flags: u8,
) -> [u8; MSCHAP2_RESPONSE_LENGTH] {
    let mut out = [0u8; MSCHAP2_RESPONSE_LENGTH];
    out[0] = ident;
    out[1] = flags;
    out[2..18].copy_from_slice(peer_challenge);
    out[26..50].copy_from_slice(nt_response);
    out
}

/// Everything one MS-CHAPv2 authentication attempt needs to remember
///
/// Built once per logical attempt. Retransmissions of the same Access-Request
/// reuse it unchanged; a new attempt builds a new one.
#[derive(Clone)]
pub struct MschapV2Request {
    pub username: String,
    pub auth_challenge: [u8; CHALLENGE_LENGTH],
    pub response: Mschap2Response,
}

impl MschapV2Request {
    /// Fresh random challenges and ident
    pub fn new(username: &str, password: &str) -> Self {
        Self::with_challenges(
            username,
            password,
            generate_challenge(),
            generate_challenge(),
            rand::random(),
        )
    }

    /// Deterministic construction from caller-supplied challenges
    pub fn with_challenges(
        username: &str,
        password: &str,
        auth_challenge: [u8; CHALLENGE_LENGTH],
        peer_challenge: [u8; CHALLENGE_LENGTH],
        ident: u8,
    ) -> Self {
        let nt_response = generate_nt_response(&auth_challenge, &peer_challenge, username, password);
        MschapV2Request {
            username: username.to_string(),
            auth_challenge,
            response: Mschap2Response {
                ident,
                flags: 0,
                peer_challenge,
                nt_response,
            },
        }
    }

    /// MS-CHAP-Challenge followed by MS-CHAP2-Response, as Vendor-Specific
    /// attributes in the order NPS expects them
    pub fn attributes(&self) -> Result<Vec<Attribute>, PacketError> {
        let challenge =
            VendorAttribute::microsoft(MicrosoftAttribute::ChapChallenge, self.auth_challenge.to_vec())
                .map_err(|e| PacketError::AttributeError(e.to_string()))?;
        let response = VendorAttribute::microsoft(
            MicrosoftAttribute::Chap2Response,
            self.response.to_bytes().to_vec(),
        )
        .map_err(|e| PacketError::AttributeError(e.to_string()))?;

        Ok(vec![challenge.to_attribute()?, response.to_attribute()?])
    }

    /// Expected `S=` string for this attempt
    pub fn expected_authenticator_response(&self, password: &str) -> String {
        generate_authenticator_response(
            password,
            &self.response.nt_response,
            &self.response.peer_challenge,
            &self.auth_challenge,
            &self.username,
        )
    }

    /// Check an MS-CHAP2-Success value: Ident, then `S=<40 hex>`, optionally
    /// followed by ` M=<message>`
    pub fn verify_success(&self, password: &str, value: &[u8]) -> Result<(), MschapError> {
        let (&ident, text) = value.split_first().ok_or(MschapError::InvalidLength {
            attribute: "MS-CHAP2-Success",
            length: 0,
        })?;
        if ident != self.response.ident {
            return Err(MschapError::IdentMismatch {
                sent: self.response.ident,
                received: ident,
            });
        }

        let text = std::str::from_utf8(text).map_err(|e| MschapError::Malformed {
            attribute: "MS-CHAP2-Success",
            reason: e.to_string(),
        })?;
        let received = text.split_whitespace().next().unwrap_or_default();
        if received.len() != 42 || !received.starts_with("S=") {
            return Err(MschapError::Malformed {
                attribute: "MS-CHAP2-Success",
                reason: format!("unexpected authenticator response {received:?}"),
            });
        }

        if received.eq_ignore_ascii_case(&self.expected_authenticator_response(password)) {
            Ok(())
        } else {
            Err(MschapError::AuthenticatorMismatch)
        }
    }
}

impl std::fmt::Debug for MschapV2Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MschapV2Request")
            .field("username", &self.username)
            .field("ident", &self.response.ident)
            .finish_non_exhaustive()
    }
}

/// Parsed MS-CHAP-Error (RFC 2759 Section 6)
///
/// Wire form: Ident, then `E=eeeeeeeeee R=r C=cccc... V=vvvvvvvvvv M=<msg>`.
/// Only `E=` is mandatory; the rest is parsed when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapFailure {
    pub ident: u8,
    pub error_code: u32,
    pub retry_allowed: bool,
    pub challenge: Option<[u8; CHALLENGE_LENGTH]>,
    pub version: Option<u32>,
    pub message: Option<String>,
}

impl ChapFailure {
    pub const ERROR_RESTRICTED_LOGON_HOURS: u32 = 646;
    pub const ERROR_ACCT_DISABLED: u32 = 647;
    pub const ERROR_PASSWD_EXPIRED: u32 = 648;
    pub const ERROR_NO_DIALIN_PERMISSION: u32 = 649;
    pub const ERROR_AUTHENTICATION_FAILURE: u32 = 691;
    pub const ERROR_CHANGING_PASSWORD: u32 = 709;

    pub fn parse(value: &[u8]) -> Result<Self, MschapError> {
        let malformed = |reason: String| MschapError::Malformed {
            attribute: "MS-CHAP-Error",
            reason,
        };

        let (&ident, text) = value.split_first().ok_or(MschapError::InvalidLength {
            attribute: "MS-CHAP-Error",
            length: 0,
        })?;
        let text = String::from_utf8_lossy(text);

        // M= runs to the end of the string and may contain spaces
        let (fields, message) = match text.find("M=") {
            Some(pos) => (&text[..pos], Some(text[pos + 2..].trim().to_string())),
            None => (&text[..], None),
        };

        let mut error_code = None;
        let mut retry_allowed = false;
        let mut challenge = None;
        let mut version = None;

        for field in fields.split_whitespace() {
            let Some((key, val)) = field.split_once('=') else {
                continue;
            };
            match key {
                "E" => {
                    error_code = Some(
                        val.parse::<u32>()
                            .map_err(|e| malformed(format!("E={val}: {e}")))?,
                    )
                }
                "R" => retry_allowed = val == "1",
                "C" => {
                    challenge = hex::decode(val)
                        .ok()
                        .and_then(|bytes| <[u8; CHALLENGE_LENGTH]>::try_from(bytes).ok())
                }
                "V" => version = val.parse().ok(),
                _ => {}
            }
        }

        Ok(ChapFailure {
            ident,
            error_code: error_code.ok_or_else(|| malformed("missing E= field".to_string()))?,
            retry_allowed,
            challenge,
            version,
            message: message.filter(|m| !m.is_empty()),
        })
    }

    /// Operator-facing explanation of the error number
    pub fn description(&self) -> &'static str {
        match self.error_code {
            Self::ERROR_RESTRICTED_LOGON_HOURS => "Logon is not permitted at this time",
            Self::ERROR_ACCT_DISABLED => "The account is disabled",
            Self::ERROR_PASSWD_EXPIRED => "The password has expired",
            Self::ERROR_NO_DIALIN_PERMISSION => "The account does not have remote access permission",
            Self::ERROR_AUTHENTICATION_FAILURE => "Invalid username or password",
            Self::ERROR_CHANGING_PASSWORD => "The password must be changed before logging in",
            _ => "Authentication was rejected",
        }
    }
}
