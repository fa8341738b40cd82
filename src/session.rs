// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Session tracking and idle timeout.
//!
//! The session record is a local convenience cache, not authoritative state:
//! it remembers who is signed in and when they were last active, so a
//! restarted panel can resume the session if it has not been idle longer than
//! the configured timeout.
//!
//! [`SessionGuard`] implements [`AuthContext`]: while the session is active it
//! exposes the signed-in actor, after expiry it reports
//! [`Principal::Anonymous`] and every data operation is rejected.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::access::{Actor, AuthContext, Principal};
use crate::config::CrmDataConfig;
use crate::document::now_millis;

/// File name of the persisted session record
pub const SESSION_FILE: &str = "crm_session.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    /// Epoch millis
    pub started_at: i64,
    /// Epoch millis
    pub last_activity: i64,
    pub actor: Actor,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Corrupt session record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Where the session record lives between restarts.
#[async_trait]
pub trait SessionPersistence: Send + Sync {
    async fn load(&self) -> Result<Option<SessionRecord>, SessionError>;
    async fn save(&self, record: &SessionRecord) -> Result<(), SessionError>;
    async fn clear(&self) -> Result<(), SessionError>;
}

/// JSON file persistence (`crm_session.json`)
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// Store the record as [`SESSION_FILE`] inside `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(SESSION_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SessionPersistence for FileSessionStore {
    async fn load(&self) -> Result<Option<SessionRecord>, SessionError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Write-then-rename so a crash never leaves a half-written record
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(record)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), SessionError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process persistence for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    record: Mutex<Option<SessionRecord>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionPersistence for MemorySessionStore {
    async fn load(&self) -> Result<Option<SessionRecord>, SessionError> {
        Ok(self.record.lock().clone())
    }

    async fn save(&self, record: &SessionRecord) -> Result<(), SessionError> {
        *self.record.lock() = Some(record.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), SessionError> {
        *self.record.lock() = None;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Active { remaining: Duration },
    Expired,
    SignedOut,
}

/// Owns the current session and enforces the idle timeout.
pub struct SessionGuard {
    persistence: Arc<dyn SessionPersistence>,
    timeout: Duration,
    current: RwLock<Option<SessionRecord>>,
}

impl SessionGuard {
    pub fn new(persistence: Arc<dyn SessionPersistence>, timeout: Duration) -> Self {
        Self {
            persistence,
            timeout,
            current: RwLock::new(None),
        }
    }

    /// Guard using the configured idle timeout (`session_timeout_ms`).
    pub fn from_config(persistence: Arc<dyn SessionPersistence>, config: &CrmDataConfig) -> Self {
        Self::new(persistence, config.session_timeout())
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resume a persisted session if it is still within the idle timeout.
    /// An expired or unreadable record is discarded.
    pub async fn restore(&self) -> Result<SessionStatus, SessionError> {
        let record = match self.persistence.load().await {
            Ok(record) => record,
            Err(SessionError::Corrupt(e)) => {
                warn!(error = %e, "Discarding unreadable session record");
                self.persistence.clear().await?;
                None
            }
            Err(e) => return Err(e),
        };
        let Some(record) = record else {
            return Ok(SessionStatus::SignedOut);
        };

        *self.current.write() = Some(record);
        let status = self.status();
        if status == SessionStatus::Expired {
            info!("Persisted session expired, signing out");
            self.end().await?;
            return Ok(SessionStatus::Expired);
        }
        info!("Session restored");
        Ok(status)
    }

    /// Begin a session for `actor`, replacing any previous one.
    pub async fn start(&self, actor: Actor) -> Result<SessionRecord, SessionError> {
        let now = now_millis();
        let record = SessionRecord {
            session_id: uuid::Uuid::new_v4().to_string(),
            started_at: now,
            last_activity: now,
            actor,
        };
        self.persistence.save(&record).await?;
        info!(session_id = %record.session_id, uid = %record.actor.uid, "Session started");
        *self.current.write() = Some(record.clone());
        Ok(record)
    }

    /// Mark activity now and persist it. Returns false if there is no
    /// active session (an expired one is ended).
    pub async fn touch(&self) -> Result<bool, SessionError> {
        match self.status() {
            SessionStatus::Active { .. } => {}
            SessionStatus::Expired => {
                self.end().await?;
                return Ok(false);
            }
            SessionStatus::SignedOut => return Ok(false),
        }
        self.record_activity();
        let record = self.current.read().clone();
        if let Some(record) = record {
            self.persistence.save(&record).await?;
        }
        Ok(true)
    }

    /// Sign out and forget the persisted record.
    pub async fn end(&self) -> Result<(), SessionError> {
        let ended = self.current.write().take();
        self.persistence.clear().await?;
        if let Some(record) = ended {
            info!(session_id = %record.session_id, "Session ended");
        }
        Ok(())
    }

    #[must_use]
    pub fn current(&self) -> Option<SessionRecord> {
        self.current.read().clone()
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status_at(now_millis())
    }

    /// Status as of `now` (epoch millis)
    #[must_use]
    pub fn status_at(&self, now: i64) -> SessionStatus {
        let guard = self.current.read();
        let Some(record) = guard.as_ref() else {
            return SessionStatus::SignedOut;
        };
        let idle = Duration::from_millis(now.saturating_sub(record.last_activity).max(0) as u64);
        if idle >= self.timeout {
            SessionStatus::Expired
        } else {
            SessionStatus::Active {
                remaining: self.timeout - idle,
            }
        }
    }
}

impl AuthContext for SessionGuard {
    fn principal(&self) -> Principal {
        if !matches!(self.status(), SessionStatus::Active { .. }) {
            return Principal::Anonymous;
        }
        match self.current.read().as_ref() {
            Some(record) => Principal::Actor(record.actor.clone()),
            None => Principal::Anonymous,
        }
    }

    fn record_activity(&self) {
        if let Some(record) = self.current.write().as_mut() {
            record.last_activity = now_millis();
        }
    }
}
