use super::session::{SessionCoordinator, SessionState};
use super::{ChatError, ValidationError};
use crate::api::types::wire_history;
use crate::api::{ClarificationRequest, QueryBackend, QueryOutcome, QueryRequest};
use crate::config::Config;
use crate::db::models::{Message, MessageMetadata};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy)]
pub struct QueryLimits {
    pub max_query_length: usize,
    pub max_history_sent: usize,
}

impl From<&Config> for QueryLimits {
    fn from(config: &Config) -> Self {
        Self {
            max_query_length: config.max_query_length,
            max_history_sent: config.max_history_sent,
        }
    }
}

/// A question the API asked back, waiting for the user's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingClarification {
    pub prompt: String,
    pub original_query: String,
    pub session_id: Option<String>,
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Answered(Message),
    NeedsClarification(PendingClarification),
}

/// Holds the busy flag for the duration of one round-trip.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, ValidationError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(flag))
            .map_err(|_| ValidationError::Busy)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives query -> (clarification ->) answer round-trips for the selected client.
///
/// Nothing here retries: a failed round-trip leaves the user's message in
/// history and waits for the user to try again.
pub struct QueryOrchestrator {
    coordinator: Arc<SessionCoordinator>,
    backend: Arc<dyn QueryBackend>,
    limits: QueryLimits,
    busy: AtomicBool,
    pending: Mutex<Option<PendingClarification>>,
}

impl QueryOrchestrator {
    pub fn new(
        coordinator: Arc<SessionCoordinator>,
        backend: Arc<dyn QueryBackend>,
        limits: QueryLimits,
    ) -> Self {
        Self {
            coordinator,
            backend,
            limits,
            busy: AtomicBool::new(false),
            pending: Mutex::new(None),
        }
    }

    pub fn coordinator(&self) -> &SessionCoordinator {
        &self.coordinator
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn pending_slot(&self) -> MutexGuard<'_, Option<PendingClarification>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn pending_clarification(&self) -> Option<PendingClarification> {
        self.pending_slot().clone()
    }

    pub fn cancel_clarification(&self) {
        self.pending_slot().take();
    }

    fn check_length(&self, text: &str) -> Result<(), ValidationError> {
        let actual = text.chars().count();
        if actual > self.limits.max_query_length {
            return Err(ValidationError::QueryTooLong {
                actual,
                max: self.limits.max_query_length,
            });
        }
        Ok(())
    }

    fn selected_client(&self) -> Result<String, ChatError> {
        let client_id = self
            .coordinator
            .client_id()
            .ok_or(ValidationError::NoClientSelected)?;
        if self.coordinator.state() == SessionState::Loading {
            return Err(ValidationError::Busy.into());
        }
        Ok(client_id)
    }

    /// Send a new query. The user's message is in history before this awaits anything.
    ///
    /// The text is stored and sent as typed; only the checks look at it trimmed.
    pub async fn submit(&self, query: &str) -> Result<SubmitOutcome, ChatError> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyQuery.into());
        }
        self.check_length(trimmed)?;
        let _busy = BusyGuard::acquire(&self.busy)?;
        let client_id = self.selected_client()?;

        self.cancel_clarification();
        let prior = self.coordinator.messages();
        let session_id = self.coordinator.session_id();
        let user_message = self.coordinator.append_user(query);

        let request = QueryRequest {
            query: query.to_string(),
            client_id: client_id.clone(),
            session_id,
            conversation_history: wire_history(&prior, self.limits.max_history_sent),
        };
        tracing::debug!(client_id = %client_id, history = request.conversation_history.len(), "submitting query");

        match self.backend.submit_query(request).await {
            Ok(outcome) => Ok(self.settle(&client_id, None, outcome)),
            Err(e) => {
                tracing::warn!(client_id = %client_id, error = %e, "query failed");
                self.coordinator
                    .mark_failed(&client_id, &user_message.id, e.to_string());
                Err(e.into())
            }
        }
    }

    /// Answer the pending clarification. On failure the prompt stays pending,
    /// unless the session has expired on the server: then the prompt and the
    /// session are dropped and the next query starts fresh.
    pub async fn clarify(&self, clarification: &str) -> Result<SubmitOutcome, ChatError> {
        let trimmed = clarification.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyClarification.into());
        }
        self.check_length(trimmed)?;
        let _busy = BusyGuard::acquire(&self.busy)?;
        let client_id = self.selected_client()?;

        let pending = self
            .pending_clarification()
            .filter(|pending| pending.client_id == client_id)
            .ok_or(ValidationError::NoPendingClarification)?;
        let session_id = pending
            .session_id
            .clone()
            .or_else(|| self.coordinator.session_id())
            .ok_or(ChatError::NoSession)?;

        let user_message = self.coordinator.append_user(clarification);
        let request = ClarificationRequest {
            session_id: session_id.clone(),
            clarification: clarification.to_string(),
            original_query: pending.original_query.clone(),
        };

        match self.backend.submit_clarification(request).await {
            Ok(outcome) => Ok(self.settle(&client_id, Some(&pending), outcome)),
            Err(e) if e.is_not_found() => {
                tracing::warn!(client_id = %client_id, %session_id, error = %e, "session expired during clarification");
                self.cancel_clarification();
                self.coordinator.expire_session(&client_id, &session_id);
                Err(e.into())
            }
            Err(e) => {
                tracing::warn!(client_id = %client_id, error = %e, "clarification failed");
                self.coordinator
                    .mark_failed(&client_id, &user_message.id, e.to_string());
                Err(e.into())
            }
        }
    }

    fn settle(
        &self,
        client_id: &str,
        previous: Option<&PendingClarification>,
        outcome: QueryOutcome,
    ) -> SubmitOutcome {
        match outcome {
            QueryOutcome::Answer(answer) => {
                let metadata =
                    (answer.metadata != MessageMetadata::default()).then_some(answer.metadata);
                let reply = Message::assistant(answer.content, metadata);
                self.coordinator.commit_turn(
                    client_id,
                    answer.session_id.as_deref(),
                    vec![reply.clone()],
                );
                self.cancel_clarification();
                SubmitOutcome::Answered(reply)
            }
            QueryOutcome::Clarification(prompt) => {
                self.coordinator
                    .commit_turn(client_id, prompt.session_id.as_deref(), Vec::new());
                // A repeated request keeps the query the user originally asked.
                let original_query = previous
                    .map(|p| p.original_query.clone())
                    .unwrap_or(prompt.original_query);
                let pending = PendingClarification {
                    prompt: prompt.prompt,
                    original_query,
                    session_id: prompt.session_id.or_else(|| self.coordinator.session_id()),
                    client_id: client_id.to_string(),
                };
                *self.pending_slot() = Some(pending.clone());
                SubmitOutcome::NeedsClarification(pending)
            }
        }
    }

    /// Drop the conversation locally and remotely, including any pending clarification.
    pub async fn clear(&self) {
        self.cancel_clarification();
        self.coordinator.clear().await;
    }
}
