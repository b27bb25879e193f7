//! Sessions: an account address delegating message signing to a session key.
//!
//! A session names the address, the session public key, the topic and a
//! validity window, and carries an authorization signed by the address's
//! account key. Actions signed by the session key act for the address while
//! the session is valid.

use crate::error::SessionError;
use arbor_core::{verify_ed25519, Ed25519Signer, Signer};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Address prefix for Ed25519 accounts.
pub const ED25519_ADDRESS_PREFIX: &str = "ed25519:";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Session {
    pub address: String,
    /// Public key of the session key that signs messages.
    pub public_key: Vec<u8>,
    pub topic: String,
    /// Start of validity, milliseconds since the epoch.
    pub timestamp: u64,
    /// Validity in milliseconds; `None` never expires.
    pub duration: Option<u64>,
    /// Account signature over [`Session::authorization_bytes`].
    pub authorization: Vec<u8>,
}

impl Session {
    /// Canonical bytes signed by the account key.
    pub fn authorization_bytes(&self) -> Vec<u8> {
        let duration = self.duration.map_or_else(|| "forever".to_string(), |d| d.to_string());
        format!(
            "arbor session\ntopic: {}\naddress: {}\nkey: {}\nissued: {}\nduration: {}",
            self.topic,
            self.address,
            hex::encode(&self.public_key),
            self.timestamp,
            duration
        )
        .into_bytes()
    }

    pub fn is_valid_at(&self, timestamp: u64) -> bool {
        timestamp >= self.timestamp
            && self
                .duration
                .map_or(true, |duration| timestamp < self.timestamp.saturating_add(duration))
    }

    pub fn expires_at(&self) -> Option<u64> {
        self.duration.map(|duration| self.timestamp.saturating_add(duration))
    }
}

/// Verifies sessions for one family of addresses.
pub trait SessionSigner: Send + Sync {
    /// Whether this signer handles `address`.
    fn matches(&self, address: &str) -> bool;

    /// Check the session's authorization for `topic`.
    fn verify_session(&self, topic: &str, session: &Session) -> Result<(), SessionError>;
}

/// Verifies `ed25519:<hex public key>` addresses.
#[derive(Clone, Copy, Debug, Default)]
pub struct Ed25519SessionVerifier;

impl SessionSigner for Ed25519SessionVerifier {
    fn matches(&self, address: &str) -> bool {
        address.starts_with(ED25519_ADDRESS_PREFIX)
    }

    fn verify_session(&self, topic: &str, session: &Session) -> Result<(), SessionError> {
        if session.topic != topic {
            return Err(SessionError::TopicMismatch {
                expected: topic.to_string(),
                found: session.topic.clone(),
            });
        }
        let account = address_key(&session.address)?;
        verify_ed25519(&account, &session.authorization_bytes(), &session.authorization)?;
        Ok(())
    }
}

/// Decode the account key of an `ed25519:` address.
pub fn address_key(address: &str) -> Result<Vec<u8>, SessionError> {
    let encoded = address
        .strip_prefix(ED25519_ADDRESS_PREFIX)
        .ok_or_else(|| SessionError::UnsupportedAddress(address.to_string()))?;
    hex::decode(encoded).map_err(|_| SessionError::MalformedAddress(address.to_string()))
}

/// Sessions known to one party, with expiry by session duration.
#[derive(Debug, Default)]
pub struct SessionCache {
    sessions: Mutex<HashMap<(String, String), Vec<Session>>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Session) {
        let mut sessions = self.sessions.lock();
        let slot = sessions
            .entry((session.topic.clone(), session.address.clone()))
            .or_default();
        if !slot.contains(&session) {
            slot.push(session);
        }
    }

    /// A session for `address` on `topic` with key `public_key`, valid at
    /// `timestamp`.
    pub fn get(&self, topic: &str, address: &str, public_key: &[u8], timestamp: u64) -> Option<Session> {
        let sessions = self.sessions.lock();
        sessions
            .get(&(topic.to_string(), address.to_string()))?
            .iter()
            .find(|session| session.public_key == public_key && session.is_valid_at(timestamp))
            .cloned()
    }

    /// Drop sessions expired at `now`; returns how many were removed.
    pub fn prune(&self, now: u64) -> usize {
        let mut sessions = self.sessions.lock();
        let mut removed = 0;
        sessions.retain(|_, slot| {
            let before = slot.len();
            slot.retain(|session| session.expires_at().map_or(true, |end| end > now));
            removed += before - slot.len();
            !slot.is_empty()
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An Ed25519 account that signs through a delegated session key.
pub struct Ed25519SessionSigner {
    account: Ed25519Signer,
    session_key: Ed25519Signer,
    duration: Option<u64>,
    cache: std::sync::Arc<SessionCache>,
}

impl Ed25519SessionSigner {
    /// A signer with a fresh session key. Created sessions are kept in `cache`.
    pub fn new(account: Ed25519Signer, duration: Option<u64>, cache: std::sync::Arc<SessionCache>) -> Self {
        Ed25519SessionSigner {
            account,
            session_key: Ed25519Signer::generate(),
            duration,
            cache,
        }
    }

    pub fn address(&self) -> String {
        format!("{}{}", ED25519_ADDRESS_PREFIX, hex::encode(self.account.public_key()))
    }

    /// The key that signs log messages.
    pub fn message_signer(&self) -> &Ed25519Signer {
        &self.session_key
    }

    /// A session valid at `now`, reusing a cached one if possible. The
    /// second element is `true` if the session was just created and still
    /// has to be published.
    pub fn get_session(&self, topic: &str, now: u64) -> (Session, bool) {
        let address = self.address();
        let public_key = self.session_key.public_key();
        if let Some(session) = self.cache.get(topic, &address, &public_key, now) {
            return (session, false);
        }

        let mut session = Session {
            address,
            public_key,
            topic: topic.to_string(),
            timestamp: now,
            duration: self.duration,
            authorization: Vec::new(),
        };
        session.authorization = self.account.sign_bytes(&session.authorization_bytes());
        self.cache.insert(session.clone());
        (session, true)
    }
}

impl SessionSigner for Ed25519SessionSigner {
    fn matches(&self, address: &str) -> bool {
        Ed25519SessionVerifier.matches(address)
    }

    fn verify_session(&self, topic: &str, session: &Session) -> Result<(), SessionError> {
        Ed25519SessionVerifier.verify_session(topic, session)
    }
}

impl std::fmt::Debug for Ed25519SessionSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ed25519SessionSigner")
            .field("address", &self.address())
            .field("duration", &self.duration)
            .finish()
    }
}
