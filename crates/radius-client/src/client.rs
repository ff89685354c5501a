//! One MS-CHAPv2 authentication against one NPS server

use crate::config::ServerSettings;
use crate::groups::extract_groups;
use crate::result::{AuthCode, AuthResult, ResponseAttributes};
use crate::transport::{CancelToken, Exchange, Transport, TransportError};
use radius_proto::auth::{generate_identifier, generate_request_authenticator, verify_response_authenticator};
use radius_proto::message_auth::{self, MessageAuthStatus};
use radius_proto::mschapv2::{ChapFailure, MschapV2Request};
use radius_proto::{
    Attribute, AttributeType, Code, MICROSOFT_VENDOR_ID, MicrosoftAttribute, NAS_PORT_TYPE_ETHERNET, Packet,
    PacketError, SERVICE_TYPE_FRAMED,
};
use std::time::Instant;
use tracing::{debug, info, warn};

/// A built Access-Request and what is needed to check its reply
pub struct PreparedRequest {
    pub packet: Packet,
    pub encoded: Vec<u8>,
    pub mschap: MschapV2Request,
}

impl PreparedRequest {
    pub fn identifier(&self) -> u8 {
        self.packet.identifier
    }

    pub fn request_authenticator(&self) -> &[u8; 16] {
        &self.packet.authenticator
    }
}

/// Build the Access-Request for one attempt
///
/// Attribute order is fixed: User-Name, NAS-Identifier, NAS-Port-Type,
/// Service-Type, MS-CHAP-Challenge, MS-CHAP2-Response, then
/// Message-Authenticator when enabled.
pub fn build_access_request(
    settings: &ServerSettings,
    username: &str,
    mschap: MschapV2Request,
) -> Result<PreparedRequest, PacketError> {
    let mut packet = Packet::new(
        Code::AccessRequest,
        generate_identifier(),
        generate_request_authenticator(),
    );

    packet.add_attribute(Attribute::string(AttributeType::UserName as u8, username)?);
    packet.add_attribute(Attribute::string(
        AttributeType::NasIdentifier as u8,
        settings.nas_identifier.as_str(),
    )?);
    packet.add_attribute(Attribute::integer(
        AttributeType::NasPortType as u8,
        NAS_PORT_TYPE_ETHERNET,
    )?);
    packet.add_attribute(Attribute::integer(
        AttributeType::ServiceType as u8,
        SERVICE_TYPE_FRAMED,
    )?);
    for attr in mschap.attributes()? {
        packet.add_attribute(attr);
    }

    if settings.message_authenticator {
        message_auth::sign_request(&mut packet, &settings.secret)?;
    }

    let encoded = packet.encode()?;
    Ok(PreparedRequest {
        packet,
        encoded,
        mschap,
    })
}

/// Turn a datagram that matched the request identifier into a result
///
/// Checks run in order: Response Authenticator, reply code,
/// decoding, Message-Authenticator, then per-code handling.
pub fn interpret_reply(
    settings: &ServerSettings,
    request: &PreparedRequest,
    password: &str,
    data: &[u8],
) -> AuthResult {
    if !verify_response_authenticator(data, request.request_authenticator(), &settings.secret) {
        warn!(server = %settings.target(), identifier = request.identifier(), "Response authenticator mismatch");
        return AuthResult::failure(
            AuthCode::DecodeError,
            "Invalid response authenticator from NPS server (check the shared secret)",
        );
    }

    match Code::from_u8(data[0]) {
        Some(code) if code.is_response() => {}
        _ => {
            warn!(server = %settings.target(), code = data[0], "Unexpected reply code");
            return AuthResult::failure(
                AuthCode::UnexpectedResponse,
                format!("Unexpected RADIUS response code {}", data[0]),
            );
        }
    }

    let reply = match Packet::decode(data) {
        Ok(reply) => reply,
        Err(e) => {
            warn!(server = %settings.target(), error = %e, "Failed to decode reply");
            return AuthResult::failure(AuthCode::DecodeError, format!("Malformed RADIUS response: {}", e));
        }
    };

    match message_auth::verify_reply(data, request.request_authenticator(), &settings.secret) {
        Ok(MessageAuthStatus::Valid) | Ok(MessageAuthStatus::Absent) => {}
        Ok(MessageAuthStatus::Invalid) => {
            warn!(server = %settings.target(), "Message-Authenticator mismatch");
            return AuthResult::failure(AuthCode::DecodeError, "Invalid Message-Authenticator in NPS response");
        }
        Err(e) => {
            return AuthResult::failure(AuthCode::DecodeError, format!("Malformed RADIUS response: {}", e));
        }
    }

    let attributes = ResponseAttributes::from_packet(&reply);
    let reply_message = reply_message(&reply);

    match reply.code {
        Code::AccessAccept => {
            if let Err(message) = check_mschap2_success(settings, request, password, &reply) {
                warn!(server = %settings.target(), reason = %message, "MS-CHAP2-Success verification failed");
                return AuthResult::failure(AuthCode::DecodeError, message);
            }
            let groups = extract_groups(&attributes);
            AuthResult::accepted(
                reply_message.unwrap_or_else(|| "Authentication successful".to_string()),
                attributes,
                groups,
            )
        }
        Code::AccessReject => {
            let failure = reply
                .find_vendor_attribute(MICROSOFT_VENDOR_ID, MicrosoftAttribute::ChapError.as_u8())
                .and_then(|vsa| ChapFailure::parse(&vsa.value).ok());
            if let Some(ref failure) = failure {
                debug!(error_code = failure.error_code, retry = failure.retry_allowed, "MS-CHAP-Error");
            }

            let message = reply_message
                .or_else(|| failure.as_ref().map(|f| f.description().to_string()))
                .unwrap_or_else(|| "Access rejected".to_string());
            AuthResult::rejected(AuthCode::AccessReject, message, attributes)
        }
        Code::AccessChallenge => AuthResult::rejected(
            AuthCode::AccessChallenge,
            reply_message.unwrap_or_else(|| "Access-Challenge is not supported".to_string()),
            attributes,
        ),
        Code::AccessRequest => {
            AuthResult::failure(AuthCode::UnexpectedResponse, "Unexpected RADIUS response code 1")
        }
    }
}

/// Reply-Message attributes joined, as RFC 2865 allows splitting one text
fn reply_message(reply: &Packet) -> Option<String> {
    let parts: Vec<String> = reply
        .find_all_attributes(AttributeType::ReplyMessage as u8)
        .into_iter()
        .filter_map(|attr| attr.as_string().ok())
        .collect();
    let joined = parts.concat();
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn check_mschap2_success(
    settings: &ServerSettings,
    request: &PreparedRequest,
    password: &str,
    reply: &Packet,
) -> Result<(), String> {
    if !settings.verify_mschap2_success {
        return Ok(());
    }
    match reply.find_vendor_attribute(MICROSOFT_VENDOR_ID, MicrosoftAttribute::Chap2Success.as_u8()) {
        Some(vsa) => request
            .mschap
            .verify_success(password, &vsa.value)
            .map_err(|e| format!("NPS server failed mutual authentication: {}", e)),
        None if settings.require_mschap2_success => {
            Err("NPS server did not return MS-CHAP2-Success".to_string())
        }
        None => Ok(()),
    }
}

/// Runs single-server authentications
#[derive(Clone, Default)]
pub struct RadiusClient {
    transport: Transport,
}

impl RadiusClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transport(transport: Transport) -> Self {
        RadiusClient { transport }
    }

    /// Authenticate once against one server, with its full retry budget
    ///
    /// Fresh challenges and identifier are generated here and reused for
    /// every retransmission of this call.
    pub async fn authenticate(
        &self,
        settings: &ServerSettings,
        username: &str,
        password: &str,
        cancel: &CancelToken,
    ) -> AuthResult {
        let started = Instant::now();
        let mschap = MschapV2Request::new(username, password);

        let request = match build_access_request(settings, username, mschap) {
            Ok(request) => request,
            Err(e) => {
                warn!(server = %settings.target(), error = %e, "Failed to build Access-Request");
                return AuthResult::failure(AuthCode::EncodeError, format!("Failed to build RADIUS request: {}", e));
            }
        };

        let exchange = Exchange {
            host: &settings.host,
            port: settings.port,
            identifier: request.identifier(),
            timeout: settings.timeout,
            retries: settings.retries,
        };

        let result = match self.transport.exchange(&exchange, &request.encoded, cancel).await {
            Ok(reply) => {
                debug!(server = %reply.from, attempt = reply.attempt, bytes = reply.data.len(), "Received reply");
                interpret_reply(settings, &request, password, &reply.data)
            }
            Err(e) => AuthResult::failure(e.code(), transport_message(&e)),
        };

        info!(
            server = %settings.target(),
            username,
            code = %result.code,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "RADIUS authentication finished"
        );
        result
    }
}

fn transport_message(error: &TransportError) -> String {
    match error {
        TransportError::Timeout { .. } => "No response from NPS server".to_string(),
        TransportError::Send { .. } => format!("Could not reach NPS server: {}", error),
        TransportError::Bind(_) | TransportError::Socket(_) => format!("Network error: {}", error),
        TransportError::Cancelled => "Authentication cancelled".to_string(),
    }
}
