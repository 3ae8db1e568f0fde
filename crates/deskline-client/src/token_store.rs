//! Persistent storage for the token pair.
//!
//! The store is pure data access: it never decodes or validates tokens.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::credential::TokenPair;
use crate::error::{Error, Result};

// ============================================================================
// TokenStore Trait
// ============================================================================

/// Storage for the access and refresh tokens.
///
/// Implementations persist the pair under the fixed keys `access_token` and
/// `refresh_token`.
#[async_trait]
pub trait TokenStore: Send + Sync + std::fmt::Debug {
    /// Persist the token pair, replacing whatever was stored.
    async fn save(&self, tokens: &TokenPair) -> Result<()>;

    /// Read the stored pair, if any.
    async fn read(&self) -> Result<Option<TokenPair>>;

    /// Remove stored tokens. Clearing an empty store is a no-op.
    async fn clear(&self) -> Result<()>;
}

/// Token store shared between the gateway and the session manager.
pub type SharedTokenStore = Arc<dyn TokenStore>;

// ============================================================================
// FileTokenStore
// ============================================================================

/// JSON file token store.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    cached: RwLock<Option<TokenPair>>,
}

impl FileTokenStore {
    /// Create a store backed by `path`. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cached: RwLock::new(None),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_file(&self, json: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::OpenOptionsExt;

            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&self.path)?;
            file.write_all(json.as_bytes())
        }

        #[cfg(not(unix))]
        {
            std::fs::write(&self.path, json)
        }
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn save(&self, tokens: &TokenPair) -> Result<()> {
        let json = serde_json::to_string_pretty(tokens)?;

        // Holding the write lock serializes concurrent saves.
        let mut cache = self.cached.write().await;
        self.write_file(&json).map_err(|e| {
            Error::Storage(format!(
                "failed to write token file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        *cache = Some(tokens.clone());

        tracing::debug!(path = %self.path.display(), "tokens saved");
        Ok(())
    }

    async fn read(&self) -> Result<Option<TokenPair>> {
        {
            let cache = self.cached.read().await;
            if cache.is_some() {
                return Ok(cache.clone());
            }
        }

        let mut cache = self.cached.write().await;
        if cache.is_some() {
            return Ok(cache.clone());
        }
        if !self.path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::Storage(format!("failed to read token file: {}", e)))?;
        let tokens: TokenPair = serde_json::from_str(&content)
            .map_err(|e| Error::Storage(format!("failed to parse token file: {}", e)))?;

        *cache = Some(tokens.clone());
        Ok(Some(tokens))
    }

    async fn clear(&self) -> Result<()> {
        let mut cache = self.cached.write().await;
        *cache = None;

        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "tokens cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!(
                "failed to delete token file: {}",
                e
            ))),
        }
    }
}

// ============================================================================
// MemoryTokenStore
// ============================================================================

/// Process-local token store for tests and ephemeral clients.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<Option<TokenPair>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: TokenPair) -> Self {
        Self {
            tokens: RwLock::new(Some(tokens)),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn save(&self, tokens: &TokenPair) -> Result<()> {
        *self.tokens.write().await = Some(tokens.clone());
        Ok(())
    }

    async fn read(&self) -> Result<Option<TokenPair>> {
        Ok(self.tokens.read().await.clone())
    }

    async fn clear(&self) -> Result<()> {
        *self.tokens.write().await = None;
        Ok(())
    }
}

/// Create a shared file-backed token store.
pub fn file_token_store(path: impl Into<PathBuf>) -> SharedTokenStore {
    Arc::new(FileTokenStore::new(path))
}

/// Create a shared in-memory token store.
pub fn memory_token_store() -> SharedTokenStore {
    Arc::new(MemoryTokenStore::new())
}
