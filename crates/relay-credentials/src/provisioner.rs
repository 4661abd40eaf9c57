use crate::api::WorkspaceApi;
use crate::models::{Credentials, Result, API_KEY_ENV};
use rand::{distributions::Alphanumeric, Rng};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Ensures a workspace API key is available before a run starts.
///
/// Resolution order: `RELAY_API_KEY` env, project-local cache, global
/// cache, remote workspace creation. Cached keys that fail validation are
/// discarded. Newly created keys are written to the project-local cache
/// with mode 0600 (parent directory 0700).
pub struct CredentialProvisioner {
    api: Arc<dyn WorkspaceApi>,
    project_cache: PathBuf,
    global_cache: Option<PathBuf>,
}

impl CredentialProvisioner {
    /// Create a provisioner writing its cache at `project_cache`.
    pub fn new(api: Arc<dyn WorkspaceApi>, project_cache: impl Into<PathBuf>) -> Self {
        Self {
            api,
            project_cache: project_cache.into(),
            global_cache: None,
        }
    }

    /// Also consult a global cache file, read-only.
    pub fn with_global_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_cache = Some(path.into());
        self
    }

    /// Resolve credentials, creating a workspace if nothing else works.
    pub async fn ensure(&self) -> Result<Credentials> {
        let env_key = std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty());
        self.ensure_with(env_key).await
    }

    /// Same as [`ensure`](Self::ensure) with the environment key injected,
    /// for callers and tests that manage the environment themselves.
    pub async fn ensure_with(&self, env_key: Option<String>) -> Result<Credentials> {
        if let Some(key) = env_key {
            match self.api.validate_key(&key).await? {
                Some(workspace_id) => {
                    debug!("Using workspace key from {}", API_KEY_ENV);
                    return Ok(Credentials::new(workspace_id, key));
                }
                None => warn!("{} is set but the key failed validation", API_KEY_ENV),
            }
        }

        let caches = [
            Some(self.project_cache.clone()),
            self.global_cache.clone(),
        ];
        for path in caches.iter().flatten() {
            let Some(cached) = read_cache(path) else {
                continue;
            };
            match self.api.validate_key(&cached.api_key).await? {
                Some(_) => {
                    debug!(cache = %path.display(), "Using cached workspace key");
                    return Ok(cached);
                }
                None => {
                    warn!(cache = %path.display(), "Discarding cached key that failed validation");
                }
            }
        }

        let name = generate_workspace_name();
        info!(workspace = %name, "Creating workspace");
        let creds = self.api.create_workspace(&name).await?;
        write_cache(&self.project_cache, &creds)?;
        Ok(creds)
    }
}

/// Generate a unique workspace name, `relay-` plus ten random
/// alphanumerics.
pub fn generate_workspace_name() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    format!("relay-{}", suffix.to_lowercase())
}

fn read_cache(path: &Path) -> Option<Credentials> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(creds) => Some(creds),
        Err(e) => {
            warn!(cache = %path.display(), error = %e, "Ignoring unreadable credential cache");
            None
        }
    }
}

/// Write the cache file with owner-only permissions.
pub fn write_cache(path: &Path, creds: &Credentials) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))?;
        }
    }

    let json = serde_json::to_string_pretty(creds)?;
    fs::write(path, json)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CredentialError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    /// Pure in-memory control plane for tests.
    struct FakeApi {
        valid_keys: Mutex<Vec<(String, String)>>,
        created: Mutex<Vec<String>>,
        fail_create: bool,
    }

    impl FakeApi {
        fn new(valid: &[(&str, &str)]) -> Self {
            Self {
                valid_keys: Mutex::new(
                    valid
                        .iter()
                        .map(|(k, w)| (k.to_string(), w.to_string()))
                        .collect(),
                ),
                created: Mutex::new(Vec::new()),
                fail_create: false,
            }
        }
    }

    #[async_trait]
    impl WorkspaceApi for FakeApi {
        async fn validate_key(&self, api_key: &str) -> Result<Option<String>> {
            Ok(self
                .valid_keys
                .lock()
                .iter()
                .find(|(k, _)| k == api_key)
                .map(|(_, w)| w.clone()))
        }

        async fn create_workspace(&self, name: &str) -> Result<Credentials> {
            if self.fail_create {
                return Err(CredentialError::ProvisioningFailed("boom".to_string()));
            }
            self.created.lock().push(name.to_string());
            let creds = Credentials::new(format!("ws-{}", name), format!("rk-{}", name));
            self.valid_keys
                .lock()
                .push((creds.api_key.clone(), creds.workspace_id.clone()));
            Ok(creds)
        }
    }

    fn provisioner(api: FakeApi, dir: &TempDir) -> CredentialProvisioner {
        CredentialProvisioner::new(Arc::new(api), dir.path().join("relaycast.json"))
    }

    #[tokio::test]
    async fn test_env_key_wins_when_valid() {
        let dir = TempDir::new().unwrap();
        let p = provisioner(FakeApi::new(&[("rk-env", "ws-env")]), &dir);

        let creds = p.ensure_with(Some("rk-env".to_string())).await.unwrap();
        assert_eq!(creds.workspace_id, "ws-env");
        assert_eq!(creds.api_key, "rk-env");
    }

    #[tokio::test]
    async fn test_invalid_env_key_falls_through_to_cache() {
        let dir = TempDir::new().unwrap();
        let cache_path = dir.path().join("relaycast.json");
        write_cache(&cache_path, &Credentials::new("ws-cache", "rk-cache")).unwrap();

        let p = CredentialProvisioner::new(
            Arc::new(FakeApi::new(&[("rk-cache", "ws-cache")])),
            &cache_path,
        );

        let creds = p.ensure_with(Some("rk-stale".to_string())).await.unwrap();
        assert_eq!(creds.workspace_id, "ws-cache");
    }

    #[tokio::test]
    async fn test_invalid_cached_key_is_discarded_and_workspace_created() {
        let dir = TempDir::new().unwrap();
        let cache_path = dir.path().join("relaycast.json");
        write_cache(&cache_path, &Credentials::new("ws-old", "rk-dead")).unwrap();

        let p = CredentialProvisioner::new(Arc::new(FakeApi::new(&[])), &cache_path);
        let creds = p.ensure_with(None).await.unwrap();

        // A new workspace was created and the cache replaced.
        assert!(creds.workspace_id.starts_with("ws-relay-"));
        let on_disk: Credentials =
            serde_json::from_str(&fs::read_to_string(&cache_path).unwrap()).unwrap();
        assert_eq!(on_disk.api_key, creds.api_key);
    }

    #[tokio::test]
    async fn test_global_cache_consulted_after_project() {
        let dir = TempDir::new().unwrap();
        let global_path = dir.path().join("global").join("relaycast.json");
        write_cache(&global_path, &Credentials::new("ws-global", "rk-global")).unwrap();

        let p = CredentialProvisioner::new(
            Arc::new(FakeApi::new(&[("rk-global", "ws-global")])),
            dir.path().join("project").join("relaycast.json"),
        )
        .with_global_cache(&global_path);

        let creds = p.ensure_with(None).await.unwrap();
        assert_eq!(creds.workspace_id, "ws-global");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cache_written_with_owner_only_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let cache_path = dir.path().join("data").join("relaycast.json");

        let p = CredentialProvisioner::new(Arc::new(FakeApi::new(&[])), &cache_path);
        p.ensure_with(None).await.unwrap();

        let mode = fs::metadata(&cache_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        let dir_mode = fs::metadata(cache_path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn test_generated_names_are_unique() {
        let a = generate_workspace_name();
        let b = generate_workspace_name();
        assert!(a.starts_with("relay-"));
        assert_ne!(a, b);
    }
}
