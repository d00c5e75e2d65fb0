//! Session lifecycle.
//!
//! A session is issued at login and invalidated at logout.  Operations
//! never read ambient "current user" state; the server authenticates the
//! bearer token here and passes the resolved [`UserId`] to the engine
//! explicitly.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use parley_shared::UserId;

/// An authenticated session.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub token: Uuid,
    pub user: UserId,
    pub issued_at: DateTime<Utc>,
}

/// In-memory session registry.
pub struct SessionManager {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Issue a fresh session for a user.
    pub async fn issue(&self, user: UserId) -> Session {
        let session = Session {
            token: Uuid::new_v4(),
            user,
            issued_at: Utc::now(),
        };
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.token, session.clone());
        tracing::debug!(user = %session.user, "session issued");
        session
    }

    /// Resolve a token to its user.
    pub async fn authenticate(&self, token: &Uuid) -> Option<UserId> {
        let sessions = self.sessions.read().await;
        sessions.get(token).map(|s| s.user.clone())
    }

    /// Invalidate a session.  Idempotent; returns `true` if it existed.
    pub async fn revoke(&self, token: &Uuid) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions.remove(token).is_some()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
