use crate::domain::LocalIdentity;
use crate::infrastructure::error::{P2PError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Where the local peer identity lives between runs
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn load(&self) -> Result<Option<LocalIdentity>>;

    async fn save(&self, identity: &LocalIdentity) -> Result<()>;

    /// Load the stored identity, generating and persisting a fresh one if absent
    async fn load_or_create(&self) -> Result<LocalIdentity> {
        if let Some(identity) = self.load().await? {
            debug!("Loaded identity {}", identity.peer_id);
            return Ok(identity);
        }
        let identity = LocalIdentity::generate();
        self.save(&identity).await?;
        info!("🆔 Generated new identity {}", identity.peer_id);
        Ok(identity)
    }
}

/// JSON file backed identity store
#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/omniverse/identity.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("omniverse").join("identity.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl IdentityStore for FileIdentityStore {
    async fn load(&self) -> Result<Option<LocalIdentity>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => serde_json::from_str(&contents).map(Some).map_err(|e| {
                P2PError::Identity(format!("{} is corrupt: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, identity: &LocalIdentity) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_string_pretty(identity)?;
        tokio::fs::write(&self.path, contents).await?;
        Ok(())
    }
}

/// Identity kept in memory only, for tests and throwaway sessions
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    identity: Mutex<Option<LocalIdentity>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(identity: LocalIdentity) -> Self {
        Self {
            identity: Mutex::new(Some(identity)),
        }
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn load(&self) -> Result<Option<LocalIdentity>> {
        self.identity
            .lock()
            .map(|guard| guard.clone())
            .map_err(|e| P2PError::Identity(e.to_string()))
    }

    async fn save(&self, identity: &LocalIdentity) -> Result<()> {
        let mut guard = self
            .identity
            .lock()
            .map_err(|e| P2PError::Identity(e.to_string()))?;
        *guard = Some(identity.clone());
        Ok(())
    }
}
