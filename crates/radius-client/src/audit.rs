//! Audit logging for administrative login attempts
//!
//! One JSON object per line, appended to a file. Every login produces a
//! success or failure entry; failovers get their own entry so an outage of
//! the primary NPS shows up in the trail even when the login succeeds.

use crate::config::ServerRole;
use crate::result::AuthCode;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::error;

/// Audit event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    AuthSuccess,
    AuthFailure,
    /// Primary gave no authoritative answer, secondary is being tried
    Failover,
}

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unix epoch seconds
    pub timestamp: u64,
    /// ISO 8601 formatted timestamp
    pub timestamp_iso: String,
    pub event_type: AuditEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// `host:port` of the server involved
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_server: Option<ServerRole>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<AuthCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub client_version: String,
}

impl AuditEntry {
    pub fn new(event_type: AuditEventType) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        let timestamp = now.as_secs();
        let timestamp_iso = chrono::DateTime::from_timestamp(timestamp as i64, 0)
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            .unwrap_or_else(|| "unknown".to_string());

        AuditEntry {
            timestamp,
            timestamp_iso,
            event_type,
            username: None,
            server: None,
            used_server: None,
            code: None,
            groups: None,
            details: None,
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn with_used_server(mut self, role: ServerRole) -> Self {
        self.used_server = Some(role);
        self
    }

    pub fn with_code(mut self, code: AuthCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = Some(groups);
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

pub struct AuditLogger {
    file_path: Option<String>,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl AuditLogger {
    pub fn new(file_path: Option<String>) -> std::io::Result<Self> {
        let file = if let Some(ref path) = file_path {
            let f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Some(Arc::new(Mutex::new(f)))
        } else {
            None
        };

        Ok(AuditLogger { file_path, file })
    }

    /// Logger that drops every entry
    pub fn disabled() -> Self {
        AuditLogger {
            file_path: None,
            file: None,
        }
    }

    pub async fn log(&self, entry: AuditEntry) {
        if let Some(ref file) = self.file {
            match serde_json::to_string(&entry) {
                Ok(json) => {
                    let mut f = file.lock().await;
                    if let Err(e) = writeln!(f, "{}", json) {
                        error!("Failed to write audit log: {}", e);
                    }
                }
                Err(e) => {
                    error!("Failed to serialize audit entry: {}", e);
                }
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.file.is_some()
    }

    pub fn file_path(&self) -> Option<&str> {
        self.file_path.as_deref()
    }
}
