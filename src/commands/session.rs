use crate::api::{ApiError, QueryBackend};
use crate::db::models::{decode_conversation, encode_conversation, Message};
use crate::db::{conversation_key, session_key, Store, SELECTED_CLIENT_KEY};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    Loading,
    Active,
    Cleared,
}

/// Error attached to a user turn whose round-trip failed. The message itself is left as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnError {
    pub message_id: String,
    pub error: String,
}

/// The conversation of the currently selected client.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub client_id: Option<String>,
    pub session_id: Option<String>,
    pub messages: Vec<Message>,
    pub state: SessionState,
    pub failed_turns: Vec<TurnError>,
}

impl Session {
    fn empty(client_id: Option<&str>) -> Self {
        Self {
            client_id: client_id.map(str::to_string),
            session_id: None,
            messages: Vec::new(),
            state: SessionState::NoSession,
            failed_turns: Vec::new(),
        }
    }

    fn belongs_to(&self, client_id: &str) -> bool {
        self.client_id.as_deref() == Some(client_id)
    }
}

/// Keeps the selected client's session in step with the local store and the API.
///
/// The store holds `session_<client>` -> session id and
/// `conversation_<session>` -> messages. Both entries are written and removed
/// together so a session id never points at a missing conversation.
pub struct SessionCoordinator {
    store: Arc<dyn Store>,
    backend: Arc<dyn QueryBackend>,
    current: Mutex<Session>,
}

impl SessionCoordinator {
    pub fn new(store: Arc<dyn Store>, backend: Arc<dyn QueryBackend>) -> Self {
        Self {
            store,
            backend,
            current: Mutex::new(Session::empty(None)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> Session {
        self.lock().clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn client_id(&self) -> Option<String> {
        self.lock().client_id.clone()
    }

    pub fn session_id(&self) -> Option<String> {
        self.lock().session_id.clone()
    }

    /// Client remembered from the previous run, if any.
    pub fn persisted_client(&self) -> Option<String> {
        self.store.get(SELECTED_CLIENT_KEY)
    }

    fn cached_conversation(&self, session_id: &str) -> Vec<Message> {
        let Some(raw) = self.store.get(&conversation_key(session_id)) else {
            return Vec::new();
        };
        decode_conversation(&raw).unwrap_or_else(|e| {
            tracing::warn!(session_id, error = %e, "discarding unreadable cached conversation");
            Vec::new()
        })
    }

    fn persist(&self, session: &Session) {
        let (Some(client_id), Some(session_id)) = (&session.client_id, &session.session_id) else {
            return;
        };
        match encode_conversation(&session.messages) {
            Ok(raw) => self.store.set_many(&[
                (session_key(client_id), session_id.clone()),
                (conversation_key(session_id), raw),
            ]),
            Err(e) => tracing::warn!(%session_id, error = %e, "could not encode conversation"),
        }
    }

    /// Switch to `client_id`, resuming its cached session if the API still knows it.
    pub async fn select_client(&self, client_id: &str) -> SessionState {
        self.store.set(SELECTED_CLIENT_KEY, client_id);
        let cached_id = self.store.get(&session_key(client_id));

        {
            let mut current = self.lock();
            *current = Session::empty(Some(client_id));
            if let Some(session_id) = &cached_id {
                current.session_id = Some(session_id.clone());
                current.messages = self.cached_conversation(session_id);
                current.state = SessionState::Loading;
            }
        }

        let Some(session_id) = cached_id else {
            tracing::info!(client_id, "no cached session");
            return SessionState::NoSession;
        };

        let result = self.backend.fetch_session(&session_id).await;

        let mut current = self.lock();
        if !current.belongs_to(client_id)
            || current.session_id.as_deref() != Some(session_id.as_str())
            || current.state != SessionState::Loading
        {
            tracing::debug!(client_id, %session_id, "ignoring late session load");
            return current.state;
        }

        match result {
            Ok(snapshot) => {
                current.messages = snapshot.messages();
                current.state = SessionState::Active;
                self.persist(&current);
                tracing::info!(
                    client_id,
                    %session_id,
                    messages = current.messages.len(),
                    "session resumed"
                );
            }
            Err(ApiError::SessionNotFound { .. }) => {
                self.forget(&mut current, client_id, &session_id);
                tracing::info!(client_id, %session_id, "cached session expired, starting fresh");
            }
            Err(e) => {
                current.state = SessionState::Active;
                tracing::warn!(
                    client_id,
                    %session_id,
                    error = %e,
                    "could not refresh session, using cached conversation"
                );
            }
        }
        current.state
    }

    fn forget(&self, current: &mut Session, client_id: &str, session_id: &str) {
        self.store
            .remove_many(&[session_key(client_id), conversation_key(session_id)]);
        *current = Session::empty(Some(client_id));
    }

    /// The server no longer knows `session_id`: drop it and start over as if
    /// the client never had a session. Ignored if the session is not current.
    pub fn expire_session(&self, client_id: &str, session_id: &str) {
        let mut current = self.lock();
        if !current.belongs_to(client_id) || current.session_id.as_deref() != Some(session_id) {
            return;
        }
        self.forget(&mut current, client_id, session_id);
        tracing::info!(client_id, session_id, "session expired on the server, starting fresh");
    }

    /// Re-select the client from the previous run.
    pub async fn restore(&self) -> Option<SessionState> {
        let client_id = self.persisted_client()?;
        Some(self.select_client(&client_id).await)
    }

    /// First phase of a turn: record the user's text locally. Always succeeds.
    pub fn append_user(&self, content: &str) -> Message {
        let message = Message::user(content);
        let mut current = self.lock();
        current.messages.push(message.clone());
        self.persist(&current);
        message
    }

    /// Second phase of a turn: adopt the session id the API assigned and append its reply.
    ///
    /// Results for a client that is no longer selected are dropped.
    pub fn commit_turn(&self, client_id: &str, session_id: Option<&str>, messages: Vec<Message>) {
        let mut current = self.lock();
        if !current.belongs_to(client_id) {
            tracing::debug!(client_id, "dropping reply for a client that is no longer selected");
            return;
        }

        let mut stale_id = None;
        if let Some(new_id) = session_id {
            if current.session_id.as_deref() != Some(new_id) {
                stale_id = current.session_id.replace(new_id.to_string());
                tracing::info!(client_id, session_id = new_id, "session assigned");
            }
        }
        current.messages.extend(messages);
        if current.session_id.is_some() {
            current.state = SessionState::Active;
        }
        self.persist(&current);

        if let Some(old_id) = stale_id {
            self.store.remove(&conversation_key(&old_id));
        }
    }

    pub fn mark_failed(&self, client_id: &str, message_id: &str, error: String) {
        let mut current = self.lock();
        if current.belongs_to(client_id) {
            current.failed_turns.push(TurnError {
                message_id: message_id.to_string(),
                error,
            });
        }
    }

    /// Forget the current conversation locally, then ask the API to delete it.
    ///
    /// Local state is gone whatever the remote outcome.
    pub async fn clear(&self) {
        let session_id = {
            let mut current = self.lock();
            let session_id = current.session_id.take();
            let mut keys = Vec::new();
            if let Some(client_id) = &current.client_id {
                keys.push(session_key(client_id));
            }
            if let Some(session_id) = &session_id {
                keys.push(conversation_key(session_id));
            }
            self.store.remove_many(&keys);

            let client_id = current.client_id.take();
            *current = Session::empty(client_id.as_deref());
            current.state = SessionState::Cleared;
            session_id
        };

        if let Some(session_id) = session_id {
            match self.backend.delete_session(&session_id).await {
                Ok(()) => tracing::info!(%session_id, "session deleted"),
                Err(ApiError::SessionNotFound { .. }) => {
                    tracing::debug!(%session_id, "session already gone on the server")
                }
                Err(e) => tracing::warn!(%session_id, error = %e, "remote session delete failed"),
            }
        }

        let mut current = self.lock();
        if current.state == SessionState::Cleared {
            current.state = SessionState::NoSession;
        }
    }
}
