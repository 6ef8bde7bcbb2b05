//! Client session store.
//!
//! At most one session is active. It is persisted under a single durable
//! key, replaced wholesale on sign-in and removed on sign-out. Observers
//! get the current state as soon as they register, then every transition.

use crate::error::{Result, StoreError};
use crate::storage::{decode, encode, StorageBackend, StoredEntry};
use crate::types::{SnapshotEncoding, Timestamp};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Backend key holding the session.
pub const SESSION_KEY: &str = "session";

/// Current session schema version.
pub const SESSION_SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Who is signed in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub user_metadata: UserMetadata,
}

impl Identity {
    /// A new identity with a freshly generated user id.
    pub fn new(email: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.into(),
            user_metadata: UserMetadata {
                full_name: Some(full_name.into()),
                avatar_url: None,
            },
        }
    }
}

/// The active session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub user: Identity,
    pub created_at: Timestamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
}

/// A session transition (or the initial state on registration).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionChange {
    pub event: AuthEvent,
    pub session: Option<Session>,
}

impl SessionChange {
    fn from_state(session: Option<Session>) -> Self {
        let event = if session.is_some() {
            AuthEvent::SignedIn
        } else {
            AuthEvent::SignedOut
        };
        Self { event, session }
    }
}

/// Unique identifier for a session observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(pub u64);

/// Receiving end of a session observer.
pub struct SessionWatch {
    pub id: ObserverId,
    pub receiver: Receiver<SessionChange>,
}

impl SessionWatch {
    /// Receive the next change (blocking).
    pub fn recv(&self) -> std::result::Result<SessionChange, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a change (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<SessionChange, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Everything currently buffered, without blocking.
    pub fn drain(&self) -> Vec<SessionChange> {
        self.receiver.try_iter().collect()
    }
}

/// On-disk shape of the session entry.
#[derive(Serialize, Deserialize)]
struct PersistedSession {
    schema_version: u32,
    session: Session,
}

struct SessionState {
    current: Option<Session>,
    observers: Vec<(ObserverId, Sender<SessionChange>)>,
    next_id: u64,
}

/// Persisted single-session state machine with observer fan-out.
pub struct SessionStore {
    backend: Arc<dyn StorageBackend>,
    encoding: SnapshotEncoding,
    /// State and observers share one lock so registration and transitions
    /// are totally ordered.
    state: Mutex<SessionState>,
}

impl SessionStore {
    /// Load the persisted session, if any.
    pub fn load(backend: Arc<dyn StorageBackend>, encoding: SnapshotEncoding) -> Result<Self> {
        let current = match backend.load(SESSION_KEY)? {
            Some(entry) => {
                let persisted: PersistedSession = decode(&entry)?;
                if persisted.schema_version != SESSION_SCHEMA_VERSION {
                    return Err(StoreError::UnsupportedVersion {
                        key: SESSION_KEY.to_string(),
                        found: persisted.schema_version,
                        supported: SESSION_SCHEMA_VERSION,
                    });
                }
                Some(persisted.session)
            }
            None => None,
        };

        Ok(Self {
            backend,
            encoding,
            state: Mutex::new(SessionState {
                current,
                observers: Vec::new(),
                next_id: 1,
            }),
        })
    }

    /// Start a new session for `identity`, replacing any existing one.
    pub fn sign_in(&self, identity: Identity) -> Result<Session> {
        let session = Session {
            access_token: uuid::Uuid::new_v4().simple().to_string(),
            user: identity,
            created_at: Timestamp::now(),
        };

        let mut state = self.state.lock();

        let persisted = PersistedSession {
            schema_version: SESSION_SCHEMA_VERSION,
            session: session.clone(),
        };
        let entry = StoredEntry {
            encoding: self.encoding,
            payload: encode(self.encoding, &persisted)?,
        };
        self.backend.save(SESSION_KEY, &entry)?;

        state.current = Some(session.clone());
        info!(user = %session.user.id, "Signed in");
        Self::notify(&mut state, SessionChange::from_state(Some(session.clone())));

        Ok(session)
    }

    /// End the current session. Observers are notified even when no session
    /// was active.
    pub fn sign_out(&self) -> Result<()> {
        let mut state = self.state.lock();

        self.backend.remove(SESSION_KEY)?;
        state.current = None;
        info!("Signed out");
        Self::notify(&mut state, SessionChange::from_state(None));

        Ok(())
    }

    /// The current session, without side effects.
    pub fn current_session(&self) -> Option<Session> {
        self.state.lock().current.clone()
    }

    /// Register an observer. The current state is delivered before this
    /// returns.
    pub fn on_session_change(&self) -> SessionWatch {
        let mut state = self.state.lock();

        let id = ObserverId(state.next_id);
        state.next_id += 1;

        let (sender, receiver) = unbounded();
        // Cannot fail: we hold the receiver.
        let _ = sender.send(SessionChange::from_state(state.current.clone()));
        state.observers.push((id, sender));

        SessionWatch { id, receiver }
    }

    /// Stop delivering to an observer. Returns false if the id was unknown.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut state = self.state.lock();
        let before = state.observers.len();
        state.observers.retain(|(observer, _)| *observer != id);
        state.observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.state.lock().observers.len()
    }

    /// Deliver in registration order, dropping observers whose receiver is gone.
    fn notify(state: &mut SessionState, change: SessionChange) {
        state
            .observers
            .retain(|(_, sender)| sender.send(change.clone()).is_ok());
    }
}
