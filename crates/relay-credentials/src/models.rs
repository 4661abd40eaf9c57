use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Environment variable checked first for a workspace key.
pub const API_KEY_ENV: &str = "RELAY_API_KEY";

/// File name of the credential cache (`relaycast.json`).
pub const CACHE_FILE_NAME: &str = "relaycast.json";

/// Workspace credentials as cached in `relaycast.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    /// Workspace identifier.
    pub workspace_id: String,

    /// API key for the workspace.
    pub api_key: String,

    /// Agent id registered for this process, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    /// Agent name registered for this process, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,

    /// Last time the cache entry was written.
    pub updated_at: DateTime<Utc>,
}

impl Credentials {
    /// Create credentials for a workspace/key pair.
    pub fn new(workspace_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            api_key: api_key.into(),
            agent_id: None,
            agent_name: None,
            updated_at: Utc::now(),
        }
    }
}

/// Error type for credential provisioning.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// No source produced a usable key and creation failed.
    #[error("Workspace provisioning failed: {0}")]
    ProvisioningFailed(String),

    /// HTTP request failed.
    #[error("Workspace API request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Cache file I/O error.
    #[error("Credential cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cache file was unreadable.
    #[error("Credential cache parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CredentialError>;
