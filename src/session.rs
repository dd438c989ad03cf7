//! Anonymous session registry.
//!
//! Holds editor contents and conversation history for callers without an
//! account, keyed by 128 random bits rendered as 32 hex characters (no
//! version or variant bits are reserved).
//!
//! # Locking
//!
//! The registry map sits behind one `RwLock`; every session has its own
//! `Mutex`. Lock order is always registry then session, and single-session
//! operations release the registry lock before touching the session.
//!
//! # Expiry
//!
//! A session is alive while `now - last_activity < ttl`. At exactly `ttl`
//! it is expired. [`SessionRegistry::spawn_sweeper`] removes expired
//! sessions on a fixed interval until its token is cancelled.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use strudel_rag_core::models::ChatMessage;

use crate::config::SessionConfig;
use crate::error::SessionError;

/// State kept for one anonymous caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: String,
    pub editor_state: String,
    pub conversation_history: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::from_bytes(rand::random()).simple().to_string(),
            editor_state: String::new(),
            conversation_history: Vec::new(),
            created_at: now,
            last_activity: now,
        }
    }

    pub fn is_alive_at(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_activity) < ttl
    }
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    ttl: chrono::Duration,
}

impl SessionRegistry {
    pub fn new(ttl: chrono::Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(chrono::Duration::hours(config.ttl_hours as i64))
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    pub async fn create(&self) -> Session {
        self.create_at(Utc::now()).await
    }

    pub async fn create_at(&self, now: DateTime<Utc>) -> Session {
        let session = Session::new(now);
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), Arc::new(Mutex::new(session.clone())));
        debug!(session_id = %session.id, "session created");
        session
    }

    async fn handle(&self, id: &str) -> Result<Arc<Mutex<Session>>, SessionError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Snapshot of a live session.
    pub async fn get(&self, id: &str) -> Result<Session, SessionError> {
        self.get_at(id, Utc::now()).await
    }

    pub async fn get_at(&self, id: &str, now: DateTime<Utc>) -> Result<Session, SessionError> {
        let handle = self.handle(id).await?;
        let session = handle.lock().await;
        if !session.is_alive_at(now, self.ttl) {
            return Err(SessionError::Expired(id.to_string()));
        }
        Ok(session.clone())
    }

    /// Replace history and editor contents, refreshing `last_activity`.
    pub async fn update(
        &self,
        id: &str,
        conversation_history: Vec<ChatMessage>,
        editor_state: String,
    ) -> Result<(), SessionError> {
        self.with_live_session(id, Utc::now(), |session| {
            session.conversation_history = conversation_history;
            session.editor_state = editor_state;
        })
        .await
    }

    /// Append a completed turn. `code` replaces the editor contents when the
    /// assistant answered with code.
    pub async fn record_turn(
        &self,
        id: &str,
        user_query: &str,
        assistant_content: &str,
        code: Option<&str>,
    ) -> Result<(), SessionError> {
        self.with_live_session(id, Utc::now(), |session| {
            session
                .conversation_history
                .push(ChatMessage::user(user_query));
            session
                .conversation_history
                .push(ChatMessage::assistant(assistant_content));
            if let Some(code) = code {
                session.editor_state = code.to_string();
            }
        })
        .await
    }

    pub async fn touch(&self, id: &str) -> Result<(), SessionError> {
        self.touch_at(id, Utc::now()).await
    }

    pub async fn touch_at(&self, id: &str, now: DateTime<Utc>) -> Result<(), SessionError> {
        self.with_live_session(id, now, |_| {}).await
    }

    async fn with_live_session(
        &self,
        id: &str,
        now: DateTime<Utc>,
        apply: impl FnOnce(&mut Session),
    ) -> Result<(), SessionError> {
        let handle = self.handle(id).await?;
        let mut session = handle.lock().await;
        if !session.is_alive_at(now, self.ttl) {
            return Err(SessionError::Expired(id.to_string()));
        }
        apply(&mut session);
        session.last_activity = now;
        Ok(())
    }

    /// Returns `true` when a session was removed.
    pub async fn delete(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    /// Sessions currently held, including expired ones not yet swept.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn sweep(&self) -> usize {
        self.sweep_at(Utc::now()).await
    }

    /// Remove every session expired at `now`; returns how many were removed.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let mut expired = Vec::new();
        for (id, handle) in sessions.iter() {
            if !handle.lock().await.is_alive_at(now, self.ttl) {
                expired.push(id.clone());
            }
        }
        for id in &expired {
            sessions.remove(id);
        }
        expired.len()
    }

    /// Sweep every `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.sweep().await;
                        if removed > 0 {
                            info!(count = removed, "expired sessions swept");
                        }
                    }
                }
            }
            debug!("session sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(ChronoDuration::hours(24))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let reg = registry();
        let session = reg.create().await;
        assert_eq!(session.id.len(), 32);
        assert!(session.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(reg.get(&session.id).await.unwrap(), session);
        assert_eq!(reg.count().await, 1);
    }

    #[tokio::test]
    async fn test_ids_use_all_128_bits() {
        let reg = registry();
        let mut version_nibbles = std::collections::HashSet::new();
        for _ in 0..64 {
            let id = reg.create().await.id;
            version_nibbles.insert(id.as_bytes()[12]);
        }
        // A v4 uuid would pin this nibble to '4'.
        assert!(version_nibbles.len() > 1);
        assert_eq!(reg.count().await, 64);
    }

    #[tokio::test]
    async fn test_missing_session() {
        let reg = registry();
        assert_eq!(
            reg.get("nope").await.unwrap_err(),
            SessionError::NotFound("nope".into())
        );
    }

    #[tokio::test]
    async fn test_expiry_boundary_is_strict() {
        let reg = registry();
        let t0 = Utc::now();
        let session = reg.create_at(t0).await;

        let just_before = t0 + ChronoDuration::hours(24) - ChronoDuration::seconds(1);
        assert!(reg.get_at(&session.id, just_before).await.is_ok());

        let exactly = t0 + ChronoDuration::hours(24);
        assert_eq!(
            reg.get_at(&session.id, exactly).await.unwrap_err(),
            SessionError::Expired(session.id.clone())
        );
    }

    #[tokio::test]
    async fn test_touch_extends_life() {
        let reg = registry();
        let t0 = Utc::now();
        let session = reg.create_at(t0).await;
        reg.touch_at(&session.id, t0 + ChronoDuration::hours(20))
            .await
            .unwrap();
        assert!(reg
            .get_at(&session.id, t0 + ChronoDuration::hours(30))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_record_turn_appends_history_and_code() {
        let reg = registry();
        let session = reg.create().await;
        reg.record_turn(&session.id, "add a kick", "s(\"bd*4\")", Some("s(\"bd*4\")"))
            .await
            .unwrap();
        reg.record_turn(&session.id, "what is bd?", "A bass drum sample.", None)
            .await
            .unwrap();

        let s = reg.get(&session.id).await.unwrap();
        assert_eq!(s.conversation_history.len(), 4);
        assert_eq!(s.conversation_history[0], ChatMessage::user("add a kick"));
        assert_eq!(s.editor_state, "s(\"bd*4\")");
    }

    #[tokio::test]
    async fn test_update_replaces_state() {
        let reg = registry();
        let session = reg.create().await;
        reg.update(&session.id, vec![ChatMessage::user("hi")], "setcpm(60)".into())
            .await
            .unwrap();
        let s = reg.get(&session.id).await.unwrap();
        assert_eq!(s.editor_state, "setcpm(60)");
        assert_eq!(s.conversation_history.len(), 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let reg = registry();
        let session = reg.create().await;
        assert!(reg.delete(&session.id).await);
        assert!(!reg.delete(&session.id).await);
        assert_eq!(reg.count().await, 0);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let reg = registry();
        let t0 = Utc::now();
        let old = reg.create_at(t0 - ChronoDuration::hours(25)).await;
        let fresh = reg.create_at(t0).await;

        assert_eq!(reg.sweep_at(t0).await, 1);
        assert_eq!(reg.sweep_at(t0).await, 0);
        assert_eq!(reg.count().await, 1);
        assert!(reg.get_at(&fresh.id, t0).await.is_ok());
        assert!(matches!(
            reg.get_at(&old.id, t0).await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let reg = Arc::new(registry());
        let cancel = CancellationToken::new();
        let handle = reg
            .clone()
            .spawn_sweeper(Duration::from_millis(10), cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
