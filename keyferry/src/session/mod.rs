//! Provider sessions.
//!
//! A [`Session`] is an opaque credential blob. Whether it still works is only
//! learned when a remote call is rejected; nothing here trusts a clock.

mod store;

pub use store::{FileSessionStore, MemorySessionStore, SessionStore, SessionStoreError};

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two services the engine talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Where keys come from (Humble Bundle).
    KeySource,
    /// Where keys are activated (Steam).
    TargetPlatform,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::KeySource => "key_source",
            Provider::TargetPlatform => "target_platform",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::KeySource => "Humble Bundle",
            Provider::TargetPlatform => "Steam",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Lazily discovered validity of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    ValidUnused,
    ValidInUse,
    Expired,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::ValidUnused,
            1 => SessionState::ValidInUse,
            _ => SessionState::Expired,
        }
    }
}

/// Opaque credential bundle for one provider.
#[derive(Serialize, Deserialize)]
pub struct Session {
    provider: Provider,
    token: String,
    /// Informational only.
    #[serde(default)]
    expiry_hint: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    #[serde(skip)]
    state: AtomicU8,
}

impl Session {
    pub fn new(provider: Provider, token: impl Into<String>) -> Self {
        Self {
            provider,
            token: token.into(),
            expiry_hint: None,
            created_at: Utc::now(),
            state: AtomicU8::new(0),
        }
    }

    pub fn with_expiry_hint(mut self, hint: DateTime<Utc>) -> Self {
        self.expiry_hint = Some(hint);
        self
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// The opaque token, as handed out by the provider.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expiry_hint(&self) -> Option<DateTime<Utc>> {
        self.expiry_hint
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Note that the session has been used successfully.
    ///
    /// Never resurrects an expired session.
    pub fn mark_in_use(&self) {
        let _ = self
            .state
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Record that the provider rejected this session.
    pub fn mark_expired(&self) {
        self.state.store(2, Ordering::Release);
    }

    pub fn is_expired(&self) -> bool {
        self.state() == SessionState::Expired
    }
}

impl Clone for Session {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider,
            token: self.token.clone(),
            expiry_hint: self.expiry_hint,
            created_at: self.created_at,
            state: AtomicU8::new(self.state.load(Ordering::Acquire)),
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("provider", &self.provider)
            .field("token", &"<redacted>")
            .field("expiry_hint", &self.expiry_hint)
            .field("created_at", &self.created_at)
            .field("state", &self.state())
            .finish()
    }
}
