//! Workspace API key provisioning for the Relay workflow orchestrator.
//!
//! The provisioner resolves credentials from the environment, a
//! project-local cache, a global cache, or by creating a workspace on the
//! control plane. Sources are pluggable so tests can run fully offline.

pub mod api;
pub mod models;
pub mod provisioner;

pub use api::{HttpWorkspaceApi, WorkspaceApi};
pub use models::{CredentialError, Credentials, Result, API_KEY_ENV, CACHE_FILE_NAME};
pub use provisioner::{generate_workspace_name, write_cache, CredentialProvisioner};
