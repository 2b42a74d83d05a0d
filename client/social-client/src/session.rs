/// Authenticated session and its persisted credentials
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult};
use crate::models::{User, UserId};

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: UserId,
    #[serde(default)]
    pub user: Option<User>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("user", &self.user)
            .finish()
    }
}

/// Where credentials survive restarts
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> ClientResult<Option<Session>>;
    fn save(&self, session: &Session) -> ClientResult<()>;
    fn clear(&self) -> ClientResult<()>;
}

/// JSON file on disk
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> ClientResult<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| ClientError::Session(format!("read {}: {}", self.path.display(), e)))?;
        let session = serde_json::from_str(&raw)
            .map_err(|e| ClientError::Session(format!("parse {}: {}", self.path.display(), e)))?;
        Ok(Some(session))
    }

    fn save(&self, session: &Session) -> ClientResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ClientError::Session(format!("create {}: {}", parent.display(), e)))?;
        }
        let raw = serde_json::to_string_pretty(session)?;
        std::fs::write(&self.path, raw)
            .map_err(|e| ClientError::Session(format!("write {}: {}", self.path.display(), e)))
    }

    fn clear(&self) -> ClientResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ClientError::Session(format!(
                "remove {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

/// Process-local credentials (tests, ephemeral clients)
#[derive(Default)]
pub struct MemoryCredentialStore {
    saved: Mutex<Option<Session>>,
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> ClientResult<Option<Session>> {
        Ok(self.saved.lock().clone())
    }

    fn save(&self, session: &Session) -> ClientResult<()> {
        *self.saved.lock() = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> ClientResult<()> {
        *self.saved.lock() = None;
        Ok(())
    }
}

/// Shared handle to the current session
#[derive(Clone)]
pub struct SessionHandle {
    current: Arc<RwLock<Option<Session>>>,
    credentials: Arc<dyn CredentialStore>,
}

impl SessionHandle {
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            current: Arc::new(RwLock::new(None)),
            credentials,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCredentialStore::default()))
    }

    /// Restore persisted credentials. Returns whether a session was found.
    pub fn init(&self) -> ClientResult<bool> {
        match self.credentials.load() {
            Ok(Some(session)) => {
                info!(user_id = %session.user_id, "Session restored");
                *self.current.write() = Some(session);
                Ok(true)
            }
            Ok(None) => {
                debug!("No persisted session");
                Ok(false)
            }
            Err(e) => {
                warn!(error = %e, "Discarding unreadable credentials");
                self.credentials.clear()?;
                Ok(false)
            }
        }
    }

    /// Start a session and persist it
    pub fn begin(&self, session: Session) -> ClientResult<()> {
        self.credentials.save(&session)?;
        info!(user_id = %session.user_id, "Session started");
        *self.current.write() = Some(session);
        Ok(())
    }

    /// End the session in memory and on disk
    pub fn teardown(&self) -> ClientResult<()> {
        self.current.write().take();
        self.credentials.clear()?;
        info!("Session ended");
        Ok(())
    }

    pub fn token(&self) -> Option<String> {
        self.current.read().as_ref().map(|s| s.token.clone())
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.current.read().as_ref().map(|s| s.user_id)
    }

    pub fn current(&self) -> Option<Session> {
        self.current.read().clone()
    }

    pub fn user(&self) -> Option<User> {
        self.current.read().as_ref().and_then(|s| s.user.clone())
    }

    /// Refresh the cached user record and persist it
    pub fn set_user(&self, user: User) -> ClientResult<()> {
        let updated = {
            let mut current = self.current.write();
            match current.as_mut() {
                Some(session) if session.user_id == user.id => {
                    session.user = Some(user);
                    Some(session.clone())
                }
                _ => None,
            }
        };
        match updated {
            Some(session) => self.credentials.save(&session),
            None => Ok(()),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.current.read().is_some()
    }
}
