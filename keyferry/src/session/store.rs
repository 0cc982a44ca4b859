//! Session persistence.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use super::{Provider, Session};

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Keyed persistence of one session per provider.
///
/// Saves must be atomic: a crash mid-write leaves the previous session or
/// none, never a truncated file.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the saved session. Missing or unreadable data yields `None`.
    async fn load(&self, provider: Provider) -> Option<Session>;

    async fn save(&self, provider: Provider, session: &Session) -> Result<(), SessionStoreError>;

    async fn invalidate(&self, provider: Provider) -> Result<(), SessionStoreError>;
}

/// One JSON file per provider under a state directory.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, provider: Provider) -> PathBuf {
        let name = match provider {
            Provider::KeySource => "humble.session.json",
            Provider::TargetPlatform => "steam.session.json",
        };
        self.dir.join(name)
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self, provider: Provider) -> Option<Session> {
        let path = self.path_for(provider);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read saved session");
                return None;
            }
        };

        match serde_json::from_str::<Session>(&raw) {
            Ok(session) if session.provider() == provider => {
                debug!(provider = provider.as_str(), "Loaded saved session");
                Some(session)
            }
            Ok(_) => {
                warn!(path = %path.display(), "Saved session belongs to another provider, ignoring");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Saved session is corrupt, ignoring");
                None
            }
        }
    }

    async fn save(&self, provider: Provider, session: &Session) -> Result<(), SessionStoreError> {
        let payload = serde_json::to_vec_pretty(session)?;
        let dir = self.dir.clone();
        let path = self.path_for(provider);

        tokio::task::spawn_blocking(move || write_atomically(&dir, &path, &payload))
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))??;

        debug!(provider = provider.as_str(), "Saved session");
        Ok(())
    }

    async fn invalidate(&self, provider: Provider) -> Result<(), SessionStoreError> {
        match tokio::fs::remove_file(self.path_for(provider)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn write_atomically(dir: &Path, path: &Path, payload: &[u8]) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(payload)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Provider, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(self, session: Session) -> Self {
        self.sessions.lock().insert(session.provider(), session);
        self
    }

    pub fn contains(&self, provider: Provider) -> bool {
        self.sessions.lock().contains_key(&provider)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, provider: Provider) -> Option<Session> {
        self.sessions.lock().get(&provider).cloned()
    }

    async fn save(&self, provider: Provider, session: &Session) -> Result<(), SessionStoreError> {
        self.sessions.lock().insert(provider, session.clone());
        Ok(())
    }

    async fn invalidate(&self, provider: Provider) -> Result<(), SessionStoreError> {
        self.sessions.lock().remove(&provider);
        Ok(())
    }
}
