//! Primary/secondary failover
//!
//! The primary is always tried first. An accept or a reject from it is
//! final. Any other outcome moves on to the secondary, when one is
//! configured, with its own secret and its own full retry budget. The two
//! attempts never overlap.

use crate::audit::{AuditEntry, AuditEventType, AuditLogger};
use crate::client::RadiusClient;
use crate::config::{Config, ServerRole};
use crate::result::{AuthCode, AuthResult, FailoverResult};
use crate::secret::SecretDecryptor;
use crate::transport::CancelToken;
use std::sync::Arc;
use tracing::{info, warn};

pub struct FailoverCoordinator {
    client: RadiusClient,
    decryptor: Arc<dyn SecretDecryptor>,
    audit: Arc<AuditLogger>,
}

impl FailoverCoordinator {
    pub fn new(decryptor: Arc<dyn SecretDecryptor>) -> Self {
        FailoverCoordinator {
            client: RadiusClient::new(),
            decryptor,
            audit: Arc::new(AuditLogger::disabled()),
        }
    }

    pub fn with_client(mut self, client: RadiusClient) -> Self {
        self.client = client;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = audit;
        self
    }

    pub async fn authenticate(&self, config: &Config, username: &str, password: &str) -> FailoverResult {
        self.authenticate_with_cancel(config, username, password, &CancelToken::never())
            .await
    }

    pub async fn authenticate_with_cancel(
        &self,
        config: &Config,
        username: &str,
        password: &str,
        cancel: &CancelToken,
    ) -> FailoverResult {
        let primary = self
            .attempt(config, ServerRole::Primary, username, password, cancel)
            .await;

        let outcome = if primary.code.is_authoritative()
            || primary.code == AuthCode::Cancelled
            || config.secondary.is_none()
        {
            FailoverResult {
                result: primary,
                used_server: ServerRole::Primary,
            }
        } else {
            warn!(
                username,
                code = %primary.code,
                reason = %primary.message,
                "Primary NPS server gave no authoritative answer, trying secondary"
            );
            self.audit
                .log(
                    AuditEntry::new(AuditEventType::Failover)
                        .with_username(username)
                        .with_server(format!("{}:{}", config.primary.host, config.primary.port))
                        .with_code(primary.code)
                        .with_details(primary.message.clone()),
                )
                .await;

            FailoverResult {
                result: self
                    .attempt(config, ServerRole::Secondary, username, password, cancel)
                    .await,
                used_server: ServerRole::Secondary,
            }
        };

        self.record(config, username, &outcome).await;
        outcome
    }

    async fn attempt(
        &self,
        config: &Config,
        role: ServerRole,
        username: &str,
        password: &str,
        cancel: &CancelToken,
    ) -> AuthResult {
        let settings = match config.settings_for(role, self.decryptor.as_ref()) {
            Ok(Some(settings)) => settings,
            Ok(None) => {
                return AuthResult::failure(
                    AuthCode::ConfigError,
                    format!("No {} NPS server configured", role),
                );
            }
            Err(e) => {
                warn!(server = %role, error = %e, "Unusable shared secret");
                return AuthResult::failure(
                    AuthCode::ConfigError,
                    format!("NPS {} server is misconfigured: {}", role, e),
                );
            }
        };

        info!(server = %settings.target(), role = %role, username, "Authenticating against NPS");
        self.client
            .authenticate(&settings, username, password, cancel)
            .await
    }

    async fn record(&self, config: &Config, username: &str, outcome: &FailoverResult) {
        if !self.audit.is_enabled() {
            return;
        }
        let event = if outcome.result.success {
            AuditEventType::AuthSuccess
        } else {
            AuditEventType::AuthFailure
        };
        let mut entry = AuditEntry::new(event)
            .with_username(username)
            .with_used_server(outcome.used_server)
            .with_code(outcome.result.code)
            .with_details(outcome.result.message.clone());
        if let Some(server) = config.server(outcome.used_server) {
            entry = entry.with_server(format!("{}:{}", server.host, server.port));
        }
        if let Some(ref groups) = outcome.result.groups {
            entry = entry.with_groups(groups.clone());
        }
        self.audit.log(entry).await;
    }
}

/// One-shot login with failover
pub async fn authenticate_with_failover(
    config: &Config,
    decryptor: Arc<dyn SecretDecryptor>,
    username: &str,
    password: &str,
) -> FailoverResult {
    FailoverCoordinator::new(decryptor)
        .authenticate(config, username, password)
        .await
}
