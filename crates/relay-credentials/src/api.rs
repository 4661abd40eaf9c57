use crate::models::{CredentialError, Credentials, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Remote workspace control-plane operations the provisioner needs.
#[async_trait]
pub trait WorkspaceApi: Send + Sync {
    /// Validate an API key with a lightweight authenticated GET.
    ///
    /// Returns the workspace id the key belongs to, or `None` when the
    /// server rejects the key. Transport failures are errors.
    async fn validate_key(&self, api_key: &str) -> Result<Option<String>>;

    /// Create a fresh workspace and return its credentials.
    async fn create_workspace(&self, name: &str) -> Result<Credentials>;
}

/// HTTP implementation of [`WorkspaceApi`].
pub struct HttpWorkspaceApi {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct WorkspaceResponse {
    workspace_id: String,
    #[serde(default)]
    api_key: Option<String>,
}

impl HttpWorkspaceApi {
    /// Create a client against a control-plane base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl WorkspaceApi for HttpWorkspaceApi {
    async fn validate_key(&self, api_key: &str) -> Result<Option<String>> {
        let url = format!("{}/v1/workspace", self.base_url);
        let response = self.client.get(&url).bearer_auth(api_key).send().await?;

        if response.status().is_success() {
            let body: WorkspaceResponse = response.json().await?;
            Ok(Some(body.workspace_id))
        } else if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            Ok(None)
        } else {
            Err(CredentialError::ProvisioningFailed(format!(
                "key validation returned {}",
                response.status()
            )))
        }
    }

    async fn create_workspace(&self, name: &str) -> Result<Credentials> {
        let url = format!("{}/v1/workspaces", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CredentialError::ProvisioningFailed(format!(
                "workspace create returned {}",
                response.status()
            )));
        }

        let body: WorkspaceResponse = response.json().await?;
        let api_key = body.api_key.ok_or_else(|| {
            CredentialError::ProvisioningFailed("workspace create returned no api_key".to_string())
        })?;

        Ok(Credentials::new(body.workspace_id, api_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_validate_key_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/workspace")
            .match_header("authorization", "Bearer rk-good")
            .with_status(200)
            .with_body(r#"{"workspace_id":"ws-42"}"#)
            .create_async()
            .await;

        let api = HttpWorkspaceApi::new(server.url());
        let ws = api.validate_key("rk-good").await.unwrap();

        assert_eq!(ws.as_deref(), Some("ws-42"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_validate_key_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/workspace")
            .with_status(401)
            .create_async()
            .await;

        let api = HttpWorkspaceApi::new(server.url());
        assert!(api.validate_key("rk-bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_workspace() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/workspaces")
            .with_status(200)
            .with_body(r#"{"workspace_id":"ws-new","api_key":"rk-new"}"#)
            .create_async()
            .await;

        let api = HttpWorkspaceApi::new(server.url());
        let creds = api.create_workspace("relay-abc123").await.unwrap();

        assert_eq!(creds.workspace_id, "ws-new");
        assert_eq!(creds.api_key, "rk-new");
    }

    #[tokio::test]
    async fn test_create_workspace_server_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/workspaces")
            .with_status(500)
            .create_async()
            .await;

        let api = HttpWorkspaceApi::new(server.url());
        assert!(api.create_workspace("relay-x").await.is_err());
    }
}
