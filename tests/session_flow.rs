use async_trait::async_trait;
use portfolio_intel_lib::api::types::WireMessage;
use portfolio_intel_lib::api::{
    Answer, ApiClient, ApiError, ClarificationPrompt, ClarificationRequest, Portfolio,
    QueryBackend, QueryOutcome, QueryRequest, SessionSnapshot,
};
use portfolio_intel_lib::commands::chat::{QueryLimits, QueryOrchestrator, SubmitOutcome};
use portfolio_intel_lib::commands::session::{SessionCoordinator, SessionState};
use portfolio_intel_lib::commands::{ChatError, ValidationError};
use portfolio_intel_lib::config::Config;
use portfolio_intel_lib::db::models::{decode_conversation, encode_conversation, Message, MessageMetadata, Role};
use portfolio_intel_lib::db::{conversation_key, session_key, Database, MemoryStore, Store};
use portfolio_intel_lib::state::AppState;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct FakeBackend {
    query_replies: Mutex<VecDeque<Result<QueryOutcome, ApiError>>>,
    clarify_replies: Mutex<VecDeque<Result<QueryOutcome, ApiError>>>,
    sessions: Mutex<HashMap<String, Vec<WireMessage>>>,
    fetch_error: Mutex<Option<ApiError>>,
    delete_error: Mutex<Option<ApiError>>,
    queries: Mutex<Vec<QueryRequest>>,
    clarifications: Mutex<Vec<ClarificationRequest>>,
    deleted: Mutex<Vec<String>>,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
    fetch_gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl FakeBackend {
    fn replying(replies: Vec<Result<QueryOutcome, ApiError>>) -> Self {
        Self {
            query_replies: Mutex::new(replies.into()),
            ..Default::default()
        }
    }

    fn queries(&self) -> Vec<QueryRequest> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryBackend for FakeBackend {
    async fn submit_query(&self, request: QueryRequest) -> Result<QueryOutcome, ApiError> {
        self.queries.lock().unwrap().push(request);
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        let reply = self.query_replies.lock().unwrap().pop_front();
        reply.expect("unexpected query")
    }

    async fn submit_clarification(
        &self,
        request: ClarificationRequest,
    ) -> Result<QueryOutcome, ApiError> {
        self.clarifications.lock().unwrap().push(request);
        let reply = self.clarify_replies.lock().unwrap().pop_front();
        reply.expect("unexpected clarification")
    }

    async fn fetch_session(&self, session_id: &str) -> Result<SessionSnapshot, ApiError> {
        if let Some((entered, release)) = &self.fetch_gate {
            entered.notify_one();
            release.notified().await;
        }
        if let Some(history) = self.sessions.lock().unwrap().get(session_id) {
            return Ok(SessionSnapshot {
                session_id: session_id.to_string(),
                client_id: None,
                conversation_history: history.clone(),
            });
        }
        let err = self.fetch_error.lock().unwrap().clone();
        Err(err.unwrap_or(ApiError::SessionNotFound {
            session_id: session_id.to_string(),
        }))
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), ApiError> {
        self.deleted.lock().unwrap().push(session_id.to_string());
        match self.delete_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn fetch_portfolio(&self, client_id: &str) -> Result<Portfolio, ApiError> {
        Err(ApiError::PortfolioUnavailable {
            message: format!("no data for {}", client_id),
        })
    }
}

fn answer(content: &str, session_id: Option<&str>) -> Result<QueryOutcome, ApiError> {
    Ok(QueryOutcome::Answer(Answer {
        content: content.to_string(),
        session_id: session_id.map(str::to_string),
        metadata: MessageMetadata::default(),
    }))
}

fn limits() -> QueryLimits {
    QueryLimits {
        max_query_length: 200,
        max_history_sent: 10,
    }
}

fn setup(
    store: Arc<dyn Store>,
    backend: FakeBackend,
) -> (Arc<FakeBackend>, Arc<QueryOrchestrator>) {
    let backend = Arc::new(backend);
    let coordinator = Arc::new(SessionCoordinator::new(store, backend.clone()));
    let orchestrator = Arc::new(QueryOrchestrator::new(coordinator, backend.clone(), limits()));
    (backend, orchestrator)
}

#[tokio::test]
async fn first_query_creates_and_persists_session() {
    let store = Arc::new(MemoryStore::new());
    let (backend, orchestrator) = setup(
        store.clone(),
        FakeBackend::replying(vec![answer("You own 6 holdings...", Some("sess-abc"))]),
    );
    let coordinator = orchestrator.coordinator();

    assert_eq!(coordinator.select_client("CLT-001").await, SessionState::NoSession);
    let outcome = orchestrator.submit("What stocks do I own?").await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Answered(ref m) if m.role == Role::Assistant));

    let sent = backend.queries();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].session_id, None);
    assert_eq!(sent[0].client_id, "CLT-001");
    assert!(sent[0].conversation_history.is_empty());

    let history = coordinator.messages();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "What stocks do I own?");
    assert_eq!(history[1].content, "You own 6 holdings...");
    assert_eq!(coordinator.state(), SessionState::Active);

    assert_eq!(store.get(&session_key("CLT-001")).as_deref(), Some("sess-abc"));
    let cached = decode_conversation(&store.get(&conversation_key("sess-abc")).unwrap()).unwrap();
    assert_eq!(cached, history);
}

#[tokio::test]
async fn user_message_is_recorded_before_the_reply_and_busy_blocks_resubmission() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let backend = FakeBackend {
        gate: Some((entered.clone(), release.clone())),
        ..FakeBackend::replying(vec![answer("done", Some("sess-1"))])
    };
    let (_backend, orchestrator) = setup(Arc::new(MemoryStore::new()), backend);
    orchestrator.coordinator().select_client("CLT-001").await;

    let in_flight = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.submit("How did BND do?").await })
    };
    entered.notified().await;

    let history = orchestrator.coordinator().messages();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "How did BND do?");
    assert!(orchestrator.is_busy());
    assert_eq!(
        orchestrator.submit("another one").await,
        Err(ChatError::Validation(ValidationError::Busy))
    );

    release.notify_one();
    in_flight.await.unwrap().unwrap();
    assert!(!orchestrator.is_busy());
    assert_eq!(orchestrator.coordinator().messages().len(), 2);
}

#[tokio::test]
async fn clarification_round_trip() {
    let backend = FakeBackend::replying(vec![Ok(QueryOutcome::Clarification(
        ClarificationPrompt {
            prompt: "Which account?".into(),
            original_query: "How is my account doing?".into(),
            session_id: Some("sess-abc".into()),
        },
    ))]);
    backend
        .clarify_replies
        .lock()
        .unwrap()
        .push_back(answer("Your retirement account is up 4%.", Some("sess-abc")));
    let store = Arc::new(MemoryStore::new());
    let (backend, orchestrator) = setup(store.clone(), backend);
    let coordinator = orchestrator.coordinator();
    coordinator.select_client("CLT-001").await;

    let outcome = orchestrator.submit("How is my account doing?").await.unwrap();
    let SubmitOutcome::NeedsClarification(pending) = outcome else {
        panic!("expected a clarification request");
    };
    assert_eq!(pending.prompt, "Which account?");
    assert_eq!(pending.original_query, "How is my account doing?");
    assert_eq!(coordinator.messages().len(), 1);
    assert_eq!(orchestrator.pending_clarification(), Some(pending));
    assert_eq!(store.get(&session_key("CLT-001")).as_deref(), Some("sess-abc"));

    let outcome = orchestrator.clarify("my retirement account").await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Answered(_)));

    let history = coordinator.messages();
    assert_eq!(history.len(), 3);
    assert_eq!(history[1].role, Role::User);
    assert_eq!(history[1].content, "my retirement account");
    assert_eq!(history[2].role, Role::Assistant);
    assert_eq!(orchestrator.pending_clarification(), None);

    let sent = backend.clarifications.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].session_id, "sess-abc");
    assert_eq!(sent[0].original_query, "How is my account doing?");
    assert_eq!(sent[0].clarification, "my retirement account");
}

#[tokio::test]
async fn clarify_without_pending_prompt_is_rejected() {
    let (_backend, orchestrator) = setup(Arc::new(MemoryStore::new()), FakeBackend::default());
    orchestrator.coordinator().select_client("CLT-001").await;
    assert_eq!(
        orchestrator.clarify("the IRA").await,
        Err(ChatError::Validation(ValidationError::NoPendingClarification))
    );
    assert!(orchestrator.coordinator().messages().is_empty());
}

#[tokio::test]
async fn failed_query_keeps_user_message_and_releases_busy() {
    let (_backend, orchestrator) = setup(
        Arc::new(MemoryStore::new()),
        FakeBackend::replying(vec![
            Err(ApiError::QueryFailed {
                message: "Request timed out after 90 seconds".into(),
                not_found: false,
            }),
            answer("Here you go", Some("sess-2")),
        ]),
    );
    let coordinator = orchestrator.coordinator();
    coordinator.select_client("CLT-003").await;

    let err = orchestrator.submit("Summarize my risk").await.unwrap_err();
    assert!(err.to_string().contains("timed out"));
    assert!(!orchestrator.is_busy());

    let session = coordinator.snapshot();
    assert_eq!(session.messages.len(), 1);
    assert_eq!(session.failed_turns.len(), 1);
    assert_eq!(session.failed_turns[0].message_id, session.messages[0].id);

    // Retrying is a new user action.
    orchestrator.submit("Summarize my risk").await.unwrap();
    assert_eq!(coordinator.messages().len(), 3);
}

#[tokio::test]
async fn successful_round_trips_only_append() {
    let (backend, orchestrator) = setup(
        Arc::new(MemoryStore::new()),
        FakeBackend::replying(vec![
            answer("a1", Some("sess-9")),
            answer("a2", Some("sess-9")),
            answer("a3", Some("sess-9")),
        ]),
    );
    let coordinator = orchestrator.coordinator();
    coordinator.select_client("CLT-002").await;

    let mut previous: Vec<Message> = Vec::new();
    for query in ["q1", "q2", "q3"] {
        orchestrator.submit(query).await.unwrap();
        let history = coordinator.messages();
        assert!(history.len() > previous.len());
        assert_eq!(&history[..previous.len()], previous.as_slice());
        previous = history;
    }
    assert_eq!(previous.len(), 6);

    let sent = backend.queries();
    assert_eq!(sent[2].session_id.as_deref(), Some("sess-9"));
    assert_eq!(sent[2].conversation_history.len(), 4);
}

#[tokio::test]
async fn local_validation_never_reaches_the_network() {
    let (backend, orchestrator) = setup(Arc::new(MemoryStore::new()), FakeBackend::default());

    assert_eq!(
        orchestrator.submit("   ").await,
        Err(ChatError::Validation(ValidationError::EmptyQuery))
    );
    assert_eq!(
        orchestrator.submit("hello").await,
        Err(ChatError::Validation(ValidationError::NoClientSelected))
    );
    orchestrator.coordinator().select_client("CLT-001").await;
    assert!(matches!(
        orchestrator.submit(&"x".repeat(201)).await,
        Err(ChatError::Validation(ValidationError::QueryTooLong { actual: 201, max: 200 }))
    ));

    assert!(backend.queries().is_empty());
    assert!(orchestrator.coordinator().messages().is_empty());
}

#[tokio::test]
async fn clear_purges_local_state_even_when_remote_delete_fails() {
    let backend = FakeBackend::replying(vec![answer("hi", Some("sess-abc"))]);
    *backend.delete_error.lock().unwrap() = Some(ApiError::RequestFailed {
        message: "Cannot connect".into(),
    });
    let store = Arc::new(MemoryStore::new());
    let (backend, orchestrator) = setup(store.clone(), backend);
    let coordinator = orchestrator.coordinator();
    coordinator.select_client("CLT-001").await;
    orchestrator.submit("hello").await.unwrap();

    orchestrator.clear().await;

    assert_eq!(backend.deleted.lock().unwrap().as_slice(), ["sess-abc".to_string()]);
    assert_eq!(store.get(&session_key("CLT-001")), None);
    assert_eq!(store.get(&conversation_key("sess-abc")), None);
    assert!(coordinator.messages().is_empty());
    assert_eq!(coordinator.session_id(), None);
    assert_eq!(coordinator.state(), SessionState::NoSession);
    assert_eq!(coordinator.client_id().as_deref(), Some("CLT-001"));
}

#[tokio::test]
async fn expired_cached_session_self_heals() {
    let store = Arc::new(MemoryStore::new());
    let stale = vec![Message::user("old question")];
    store.set_many(&[
        (session_key("CLT-001"), "sess-dead".to_string()),
        (conversation_key("sess-dead"), encode_conversation(&stale).unwrap()),
    ]);
    let (_backend, orchestrator) = setup(store.clone(), FakeBackend::default());
    let coordinator = orchestrator.coordinator();

    assert_eq!(coordinator.select_client("CLT-001").await, SessionState::NoSession);
    assert_eq!(store.get(&session_key("CLT-001")), None);
    assert_eq!(store.get(&conversation_key("sess-dead")), None);
    let healed = coordinator.snapshot();

    // Same as a client that never had a session.
    let (_other, fresh) = setup(Arc::new(MemoryStore::new()), FakeBackend::default());
    fresh.coordinator().select_client("CLT-001").await;
    assert_eq!(healed, fresh.coordinator().snapshot());

    // And selecting again changes nothing.
    assert_eq!(coordinator.select_client("CLT-001").await, SessionState::NoSession);
    assert_eq!(coordinator.snapshot(), healed);
}

#[tokio::test]
async fn server_history_overrides_cache_on_resume() {
    let store = Arc::new(MemoryStore::new());
    store.set_many(&[
        (session_key("CLT-004"), "sess-live".to_string()),
        (
            conversation_key("sess-live"),
            encode_conversation(&[Message::user("local only")]).unwrap(),
        ),
    ]);
    let backend = FakeBackend::default();
    backend.sessions.lock().unwrap().insert(
        "sess-live".into(),
        vec![
            WireMessage {
                role: "user".into(),
                content: "What is my tech exposure?".into(),
                timestamp: None,
            },
            WireMessage {
                role: "assistant".into(),
                content: "About 62% of cost basis.".into(),
                timestamp: None,
            },
        ],
    );
    let (_backend, orchestrator) = setup(store.clone(), backend);
    let coordinator = orchestrator.coordinator();

    assert_eq!(coordinator.select_client("CLT-004").await, SessionState::Active);
    let history = coordinator.messages();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, "About 62% of cost basis.");

    let cached = decode_conversation(&store.get(&conversation_key("sess-live")).unwrap()).unwrap();
    assert_eq!(cached, history);
}

#[tokio::test]
async fn unreachable_service_keeps_cached_conversation() {
    let store = Arc::new(MemoryStore::new());
    let cached = vec![Message::user("q"), Message::assistant("a", None)];
    store.set_many(&[
        (session_key("CLT-005"), "sess-5".to_string()),
        (conversation_key("sess-5"), encode_conversation(&cached).unwrap()),
    ]);
    let backend = FakeBackend::default();
    *backend.fetch_error.lock().unwrap() = Some(ApiError::RequestFailed {
        message: "Cannot connect".into(),
    });
    let (_backend, orchestrator) = setup(store.clone(), backend);

    assert_eq!(orchestrator.coordinator().select_client("CLT-005").await, SessionState::Active);
    assert_eq!(orchestrator.coordinator().messages(), cached);
    assert_eq!(store.get(&session_key("CLT-005")).as_deref(), Some("sess-5"));
}

#[tokio::test]
async fn new_session_id_rekeys_persisted_mapping() {
    let store = Arc::new(MemoryStore::new());
    let backend = FakeBackend::replying(vec![answer("fresh start", Some("sess-new"))]);
    backend.sessions.lock().unwrap().insert("sess-old".into(), Vec::new());
    store.set_many(&[
        (session_key("CLT-001"), "sess-old".to_string()),
        (conversation_key("sess-old"), "[]".to_string()),
    ]);
    let (_backend, orchestrator) = setup(store.clone(), backend);
    orchestrator.coordinator().select_client("CLT-001").await;

    orchestrator.submit("hello again").await.unwrap();

    assert_eq!(store.get(&session_key("CLT-001")).as_deref(), Some("sess-new"));
    assert_eq!(store.get(&conversation_key("sess-old")), None);
    let cached = decode_conversation(&store.get(&conversation_key("sess-new")).unwrap()).unwrap();
    assert_eq!(cached.len(), 2);
}

#[tokio::test]
async fn conversation_survives_restart_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let written = {
        let store: Arc<dyn Store> = Arc::new(Database::new(dir.path()).unwrap());
        let (_backend, orchestrator) = setup(
            store,
            FakeBackend::replying(vec![
                answer("one", Some("sess-disk")),
                answer("two", Some("sess-disk")),
            ]),
        );
        orchestrator.coordinator().select_client("CLT-002").await;
        orchestrator.submit("first").await.unwrap();
        orchestrator.submit("second").await.unwrap();
        orchestrator.coordinator().messages()
    };

    let store: Arc<dyn Store> = Arc::new(Database::new(dir.path()).unwrap());
    let backend = FakeBackend::default();
    *backend.fetch_error.lock().unwrap() = Some(ApiError::RequestFailed {
        message: "offline".into(),
    });
    let (_backend, orchestrator) = setup(store, backend);

    assert_eq!(orchestrator.coordinator().restore().await, Some(SessionState::Active));
    assert_eq!(orchestrator.coordinator().client_id().as_deref(), Some("CLT-002"));
    assert_eq!(orchestrator.coordinator().messages(), written);
}

#[tokio::test]
async fn app_state_rejects_unconfigured_clients() {
    let config = Config::default();
    let api = Arc::new(ApiClient::with_timeout("http://127.0.0.1:9", Duration::from_secs(1)).unwrap());
    let state = AppState::with_parts(
        config,
        Arc::new(MemoryStore::new()),
        api,
        Arc::new(FakeBackend::default()),
    );

    assert_eq!(
        state.select_client("CLT-999").await,
        Err(ChatError::Validation(ValidationError::UnknownClient("CLT-999".into())))
    );
    assert_eq!(state.select_client("CLT-001").await, Ok(SessionState::NoSession));
    assert_eq!(state.restore().await, Some(SessionState::NoSession));
}

fn clarification(prompt: &str, original_query: &str, session_id: &str) -> Result<QueryOutcome, ApiError> {
    Ok(QueryOutcome::Clarification(ClarificationPrompt {
        prompt: prompt.to_string(),
        original_query: original_query.to_string(),
        session_id: Some(session_id.to_string()),
    }))
}

#[tokio::test]
async fn expired_session_during_clarification_starts_fresh() {
    let backend = FakeBackend::replying(vec![
        clarification("Which account?", "How is my account doing?", "sess-x"),
        answer("Your accounts are up 3%.", Some("sess-y")),
    ]);
    backend.clarify_replies.lock().unwrap().push_back(Err(ApiError::QueryFailed {
        message: "Session not found: sess-x".into(),
        not_found: true,
    }));
    let store = Arc::new(MemoryStore::new());
    let (backend, orchestrator) = setup(store.clone(), backend);
    let coordinator = orchestrator.coordinator();
    coordinator.select_client("CLT-001").await;
    orchestrator.submit("How is my account doing?").await.unwrap();
    assert_eq!(store.get(&session_key("CLT-001")).as_deref(), Some("sess-x"));

    let err = orchestrator.clarify("the IRA").await.unwrap_err();
    assert!(err.to_string().contains("Session not found"));

    assert_eq!(orchestrator.pending_clarification(), None);
    assert_eq!(store.get(&session_key("CLT-001")), None);
    assert_eq!(store.get(&conversation_key("sess-x")), None);
    assert_eq!(coordinator.session_id(), None);
    assert_eq!(coordinator.state(), SessionState::NoSession);
    assert!(coordinator.messages().is_empty());

    // The next line is a plain query without the dead session id.
    assert_eq!(
        orchestrator.clarify("the IRA").await,
        Err(ChatError::Validation(ValidationError::NoPendingClarification))
    );
    orchestrator.submit("How are my accounts doing?").await.unwrap();
    assert_eq!(backend.queries()[1].session_id, None);
    assert_eq!(store.get(&session_key("CLT-001")).as_deref(), Some("sess-y"));
    assert_eq!(coordinator.messages().len(), 2);
}

#[tokio::test]
async fn failed_clarification_stays_pending() {
    let backend = FakeBackend::replying(vec![clarification(
        "Which account?",
        "How is my account doing?",
        "sess-abc",
    )]);
    {
        let mut replies = backend.clarify_replies.lock().unwrap();
        replies.push_back(Err(ApiError::QueryFailed {
            message: "Request timed out after 90 seconds".into(),
            not_found: false,
        }));
        replies.push_back(answer("Your IRA is up 4%.", Some("sess-abc")));
    }
    let (_backend, orchestrator) = setup(Arc::new(MemoryStore::new()), backend);
    let coordinator = orchestrator.coordinator();
    coordinator.select_client("CLT-001").await;
    orchestrator.submit("How is my account doing?").await.unwrap();
    let pending = orchestrator.pending_clarification();

    assert!(orchestrator.clarify("the IRA").await.is_err());
    assert!(!orchestrator.is_busy());
    assert_eq!(orchestrator.pending_clarification(), pending);
    let session = coordinator.snapshot();
    assert_eq!(session.messages.len(), 2);
    assert_eq!(session.failed_turns.len(), 1);
    assert_eq!(session.failed_turns[0].message_id, session.messages[1].id);
    assert_eq!(session.session_id.as_deref(), Some("sess-abc"));

    orchestrator.clarify("the IRA").await.unwrap();
    assert_eq!(orchestrator.pending_clarification(), None);
    assert_eq!(coordinator.messages().len(), 4);
}

#[tokio::test]
async fn clear_treats_missing_remote_session_as_deleted() {
    let backend = FakeBackend::replying(vec![answer("hi", Some("sess-abc"))]);
    *backend.delete_error.lock().unwrap() = Some(ApiError::SessionNotFound {
        session_id: "sess-abc".into(),
    });
    let store = Arc::new(MemoryStore::new());
    let (backend, orchestrator) = setup(store.clone(), backend);
    let coordinator = orchestrator.coordinator();
    coordinator.select_client("CLT-001").await;
    orchestrator.submit("hello").await.unwrap();

    orchestrator.clear().await;

    assert_eq!(backend.deleted.lock().unwrap().len(), 1);
    assert_eq!(store.get(&session_key("CLT-001")), None);
    assert_eq!(store.get(&conversation_key("sess-abc")), None);
    assert!(coordinator.messages().is_empty());
    assert_eq!(coordinator.state(), SessionState::NoSession);
}

#[tokio::test]
async fn reply_for_previous_client_is_dropped() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let backend = FakeBackend {
        gate: Some((entered.clone(), release.clone())),
        ..FakeBackend::replying(vec![answer("CLT-001 owns VTI", Some("sess-1"))])
    };
    let store = Arc::new(MemoryStore::new());
    let (_backend, orchestrator) = setup(store.clone(), backend);
    orchestrator.coordinator().select_client("CLT-001").await;

    let in_flight = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.submit("What do I own?").await })
    };
    entered.notified().await;
    orchestrator.coordinator().select_client("CLT-002").await;
    release.notify_one();
    in_flight.await.unwrap().unwrap();

    let coordinator = orchestrator.coordinator();
    assert_eq!(coordinator.client_id().as_deref(), Some("CLT-002"));
    assert!(coordinator.messages().is_empty());
    assert_eq!(coordinator.session_id(), None);
    assert_eq!(store.get(&session_key("CLT-001")), None);
    assert_eq!(store.get(&session_key("CLT-002")), None);
    assert_eq!(store.get(&conversation_key("sess-1")), None);
}

#[tokio::test]
async fn late_session_load_is_ignored_after_switching_client() {
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let cached = vec![Message::user("cached question")];
    let store = Arc::new(MemoryStore::new());
    store.set_many(&[
        (session_key("CLT-001"), "sess-1".to_string()),
        (conversation_key("sess-1"), encode_conversation(&cached).unwrap()),
    ]);
    let backend = FakeBackend {
        fetch_gate: Some((entered.clone(), release.clone())),
        ..FakeBackend::default()
    };
    backend.sessions.lock().unwrap().insert(
        "sess-1".into(),
        vec![WireMessage {
            role: "assistant".into(),
            content: "from the server".into(),
            timestamp: None,
        }],
    );
    let (_backend, orchestrator) = setup(store.clone(), backend);

    let loading = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.coordinator().select_client("CLT-001").await })
    };
    entered.notified().await;
    assert_eq!(orchestrator.coordinator().state(), SessionState::Loading);

    assert_eq!(
        orchestrator.coordinator().select_client("CLT-002").await,
        SessionState::NoSession
    );
    release.notify_one();
    assert_eq!(loading.await.unwrap(), SessionState::NoSession);

    let coordinator = orchestrator.coordinator();
    assert_eq!(coordinator.client_id().as_deref(), Some("CLT-002"));
    assert!(coordinator.messages().is_empty());
    let stored = decode_conversation(&store.get(&conversation_key("sess-1")).unwrap()).unwrap();
    assert_eq!(stored, cached);
}

#[tokio::test]
async fn query_text_is_kept_as_typed() {
    let backend = FakeBackend::replying(vec![clarification(
        "Which account?",
        "  How is my account doing?\t",
        "sess-abc",
    )]);
    let (backend, orchestrator) = setup(Arc::new(MemoryStore::new()), backend);
    orchestrator.coordinator().select_client("CLT-001").await;

    let outcome = orchestrator.submit("  How is my account doing?\t").await.unwrap();

    assert_eq!(backend.queries()[0].query, "  How is my account doing?\t");
    assert_eq!(
        orchestrator.coordinator().messages()[0].content,
        "  How is my account doing?\t"
    );
    let SubmitOutcome::NeedsClarification(pending) = outcome else {
        panic!("expected a clarification request");
    };
    assert_eq!(pending.original_query, "  How is my account doing?\t");
}
