//! In-memory users and login sessions.
//!
//! Unknown usernames are registered on first login; known usernames must present the same
//! password. Sessions slide forward on every successful lookup and expire after the TTL.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use dashmap::{DashMap, mapref::entry::Entry};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::domain::{error::DomainError, identity::Identity};

/// Resolves the caller's identity from an opaque session token.
pub trait IdentityProvider: Send + Sync {
    fn current_identity(&self, token: &str) -> Option<Identity>;
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("invalid username or password")]
    InvalidCredentials,
}

#[derive(Debug, Clone)]
pub struct SessionGrant {
    pub token: String,
    pub identity: Identity,
}

#[derive(Debug)]
struct UserRecord {
    id: u64,
    password_digest: Vec<u8>,
}

#[derive(Debug)]
struct SessionRecord {
    identity: Identity,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct SessionService {
    users: DashMap<String, UserRecord>,
    sessions: DashMap<String, SessionRecord>,
    next_user_id: AtomicU64,
    ttl: Duration,
}

impl SessionService {
    pub fn new(ttl: Duration) -> Self {
        Self {
            users: DashMap::new(),
            sessions: DashMap::new(),
            next_user_id: AtomicU64::new(1),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn login(&self, username: &str, password: &str) -> Result<SessionGrant, SessionError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(DomainError::BlankCredentials.into());
        }

        let digest = Self::hash_password(username, password);
        let user_id = match self.users.entry(username.to_string()) {
            Entry::Occupied(entry) => {
                let record = entry.get();
                if record.password_digest.ct_eq(&digest).unwrap_u8() == 0 {
                    return Err(SessionError::InvalidCredentials);
                }
                record.id
            }
            Entry::Vacant(entry) => {
                let id = self.next_user_id.fetch_add(1, Ordering::Relaxed);
                entry.insert(UserRecord {
                    id,
                    password_digest: digest,
                });
                info!(
                    target = "application::sessions",
                    op = "sessions::login",
                    user_id = id,
                    "registered new user"
                );
                id
            }
        };

        let identity = Identity::new(user_id, username);
        let token = Self::generate_token();
        self.sessions.insert(
            token.clone(),
            SessionRecord {
                identity: identity.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );

        Ok(SessionGrant { token, identity })
    }

    pub fn logout(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// Drop every expired session, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, record| record.expires_at > now);
        before.saturating_sub(self.sessions.len())
    }

    fn hash_password(username: &str, password: &str) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(username.as_bytes());
        hasher.update([0u8]);
        hasher.update(password.as_bytes());
        hasher.finalize().to_vec()
    }

    fn generate_token() -> String {
        format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
    }
}

impl IdentityProvider for SessionService {
    fn current_identity(&self, token: &str) -> Option<Identity> {
        let now = Instant::now();
        if let Some(mut record) = self.sessions.get_mut(token) {
            if record.expires_at > now {
                record.expires_at = now + self.ttl;
                return Some(record.identity.clone());
            }
        } else {
            return None;
        }

        self.sessions.remove(token);
        None
    }
}
