//! End-to-end runs of the session state machine against scripted
//! collaborators.

use assistant_service::backend::{
    EventStream, GenerationBackend, GenerationEvent, GenerationRequest, GenerationResponse, Usage,
};
use assistant_service::quota::{IdentityResolver, QuotaLedger, UserInfo};
use assistant_service::session::thread::{load_thread, store_thread, StoredThread};
use assistant_service::store::{KeyValueStore, MemoryStore};
use assistant_service::transcript::{FunctionCall, Transcript};
use assistant_service::verifier::Verifier;
use assistant_service::widgets::{DefaultWidgetRenderer, WidgetContext};
use assistant_service::{
    tools, CloseStatus, DeviceTransport, ServerMessage, Session, SessionError, SessionParams, SessionServices,
    SessionSettings,
};
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Backend {
    streams: Mutex<VecDeque<Vec<GenerationEvent>>>,
    verdict: Mutex<Option<String>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl Backend {
    fn new(streams: Vec<Vec<GenerationEvent>>, verdict: &str) -> Arc<Self> {
        Arc::new(Self {
            streams: Mutex::new(streams.into()),
            verdict: Mutex::new(Some(verdict.to_string())),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Chat requests only; the verifier's request carries a response schema.
    fn chat_requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.response_schema.is_none())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl GenerationBackend for Backend {
    async fn stream(&self, request: GenerationRequest) -> anyhow::Result<EventStream> {
        self.requests.lock().unwrap().push(request);
        let events = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("backend ran out of streams"))?;
        Ok(Box::pin(futures_util::stream::iter(events.into_iter().map(Ok))))
    }

    async fn generate(&self, request: GenerationRequest) -> anyhow::Result<GenerationResponse> {
        self.requests.lock().unwrap().push(request);
        let text = self.verdict.lock().unwrap().take().unwrap_or_else(|| "[]".to_string());
        Ok(GenerationResponse {
            text,
            usage: Usage::default(),
        })
    }
}

struct Identity(Option<UserInfo>);

#[async_trait]
impl IdentityResolver for Identity {
    async fn resolve(&self, _token: &str) -> anyhow::Result<UserInfo> {
        self.0.clone().ok_or_else(|| anyhow::anyhow!("error from user id service: bad token"))
    }
}

#[derive(Default)]
struct Device {
    sent: Mutex<Vec<String>>,
    replies: Mutex<VecDeque<String>>,
    closed: Mutex<Option<(CloseStatus, String)>>,
}

impl Device {
    fn answering(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            ..Self::default()
        }
    }

    fn frames(&self) -> Vec<ServerMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|f| ServerMessage::decode(f).unwrap())
            .collect()
    }

    fn closed(&self) -> (CloseStatus, String) {
        self.closed.lock().unwrap().clone().unwrap()
    }
}

#[async_trait]
impl DeviceTransport for Device {
    async fn send(&self, message: ServerMessage) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(message.encode());
        Ok(())
    }

    async fn receive(&self) -> anyhow::Result<String> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("connection closed"))
    }

    async fn close(&self, status: CloseStatus, reason: &str) -> anyhow::Result<()> {
        *self.closed.lock().unwrap() = Some((status, reason.to_string()));
        Ok(())
    }
}

const CAP: i64 = 1_000_000;
const USER: i64 = 42;

fn subscriber() -> Identity {
    Identity(Some(UserInfo {
        user_id: USER,
        has_subscription: true,
    }))
}

fn services(backend: Arc<Backend>, identity: Identity, store: Arc<MemoryStore>) -> SessionServices {
    SessionServices {
        store,
        identity: Arc::new(identity),
        backend: backend.clone(),
        registry: Arc::new(tools::registry_with_action_timeout(Duration::from_secs(2))),
        renderer: Arc::new(DefaultWidgetRenderer),
        verifier: Arc::new(Verifier::new(backend, "lite", Duration::from_secs(2))),
        settings: SessionSettings {
            word_delay: Duration::ZERO,
            monthly_quota_credits: CAP,
            ..SessionSettings::default()
        },
    }
}

fn params(prompt: &str) -> SessionParams {
    SessionParams {
        prompt: prompt.to_string(),
        token: "token".to_string(),
        actions: vec!["set_alarm".to_string()],
        ..SessionParams::default()
    }
}

fn text(s: &str) -> GenerationEvent {
    GenerationEvent::Text(s.to_string())
}

fn call(name: &str, args: serde_json::Value) -> GenerationEvent {
    GenerationEvent::FunctionCall(FunctionCall {
        name: name.to_string(),
        args,
    })
}

#[tokio::test]
async fn test_alarm_round_trip_produces_expected_frames() {
    let store = Arc::new(MemoryStore::new());
    let backend = Backend::new(
        vec![
            vec![
                call("set_alarm", json!({"time": "2030-01-01T07:00:00Z", "is_timer": false})),
                GenerationEvent::Usage(Usage {
                    input_tokens: 10,
                    output_tokens: 2,
                }),
            ],
            vec![text("Alarm set for 7am.")],
        ],
        r#"[{"topic": "alarm", "action": "setting"}]"#,
    );
    let device = Device::answering(&[r#"{"status": "ok"}"#]);

    let thread_id = Session::new(services(backend.clone(), subscriber(), store.clone()), params("wake me at 7"))
        .run(&device)
        .await
        .unwrap();

    let frames = device.frames();
    assert_eq!(frames[0], ServerMessage::Thought("Setting an alarm".to_string()));
    match &frames[1] {
        ServerMessage::ActionRequest(request) => {
            assert_eq!(request["action"], "set_alarm");
            assert_eq!(request["time"], "2030-01-01T07:00:00Z");
        }
        other => panic!("expected an action request, got {:?}", other),
    }
    let words: Vec<ServerMessage> = ["Alarm ", "set ", "for ", "7am."]
        .iter()
        .map(|w| ServerMessage::Content(w.to_string()))
        .collect();
    assert_eq!(&frames[2..6], words.as_slice());
    assert_eq!(frames[6], ServerMessage::Done);
    assert_eq!(frames[7], ServerMessage::ThreadId(thread_id.clone()));
    assert_eq!(frames.len(), 8);
    assert_eq!(device.closed(), (CloseStatus::Normal, String::new()));

    // 10 input tokens at 4 credits plus 2 output tokens at 16.
    let ledger = QuotaLedger::with_cap(store.clone(), USER, CAP);
    assert_eq!(ledger.get_quota().await.unwrap().0, 72);

    let stored = load_thread(store.as_ref(), &thread_id).await.unwrap().unwrap();
    // Only text turns are kept.
    let roles: Vec<&str> = stored.messages.iter().map(|m| m.role.as_str()).collect();
    assert_eq!(roles, vec!["user", "model"]);
    assert_eq!(stored.messages[1].content, "Alarm set for 7am.");
}

#[tokio::test]
async fn test_unbacked_claim_sends_warning_before_done() {
    let store = Arc::new(MemoryStore::new());
    let backend = Backend::new(
        vec![vec![text("I've set a timer for 5 minutes.")]],
        r#"[{"topic": "timer", "action": "setting"}]"#,
    );
    let device = Device::default();

    Session::new(services(backend, subscriber(), store), params("timer for five minutes"))
        .run(&device)
        .await
        .unwrap();

    let frames = device.frames();
    let warning = frames
        .iter()
        .position(|f| *f == ServerMessage::Warning("Bobby did not, in fact, set a timer.".to_string()))
        .expect("warning frame");
    assert_eq!(frames[warning + 1], ServerMessage::Done);
}

#[tokio::test]
async fn test_tools_are_withheld_after_iteration_cap() {
    let store = Arc::new(MemoryStore::new());
    let mut streams: Vec<Vec<GenerationEvent>> = (0..11)
        .map(|_| vec![call("calculate", json!({"expression": "1+1"}))])
        .collect();
    streams[10].insert(0, text("Two."));
    let backend = Backend::new(streams, "[]");
    let device = Device::default();

    Session::new(services(backend.clone(), subscriber(), store), params("one plus one, forever"))
        .run(&device)
        .await
        .unwrap();

    let requests = backend.chat_requests();
    assert_eq!(requests.len(), 11);
    assert!(requests[..10].iter().all(|r| r.tools.is_some()));
    assert!(requests[10].tools.is_none());
    assert_eq!(device.closed().0, CloseStatus::Normal);
}

#[tokio::test]
async fn test_rejected_token_closes_unauthorized() {
    let backend = Backend::new(vec![], "[]");
    let device = Device::default();

    let err = Session::new(
        services(backend.clone(), Identity(None), Arc::new(MemoryStore::new())),
        params("hi"),
    )
    .run(&device)
    .await
    .unwrap_err();

    assert!(matches!(err, SessionError::Unauthorized(_)));
    assert_eq!(
        device.closed(),
        (CloseStatus::Unauthorized, "get user info failed".to_string())
    );
    assert!(backend.chat_requests().is_empty());
    assert!(device.frames().is_empty());
}

#[tokio::test]
async fn test_missing_subscription_is_a_policy_violation() {
    let identity = Identity(Some(UserInfo {
        user_id: USER,
        has_subscription: false,
    }));
    let device = Device::default();

    let err = Session::new(
        services(Backend::new(vec![], "[]"), identity, Arc::new(MemoryStore::new())),
        params("hi"),
    )
    .run(&device)
    .await
    .unwrap_err();

    assert!(matches!(err, SessionError::NoSubscription { user_id: USER }));
    assert_eq!(device.closed().0, CloseStatus::PolicyViolation);
}

#[tokio::test]
async fn test_exhausted_quota_is_a_policy_violation() {
    let store = Arc::new(MemoryStore::new());
    QuotaLedger::with_cap(store.clone(), USER, CAP)
        .charge_credits(CAP)
        .await
        .unwrap();
    let backend = Backend::new(vec![vec![text("unused")]], "[]");
    let device = Device::default();

    let err = Session::new(services(backend.clone(), subscriber(), store), params("hi"))
        .run(&device)
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::QuotaExceeded { used: CAP, .. }));
    assert_eq!(
        device.closed(),
        (
            CloseStatus::PolicyViolation,
            "You have exceeded your quota for this month.".to_string()
        )
    );
    assert!(backend.chat_requests().is_empty());
}

#[tokio::test]
async fn test_unknown_thread_fails_restore() {
    let backend = Backend::new(vec![vec![text("unused")]], "[]");
    let device = Device::default();
    let mut params = params("and then?");
    params.thread_id = Some("no-such-thread".to_string());

    let err = Session::new(services(backend.clone(), subscriber(), Arc::new(MemoryStore::new())), params)
        .run(&device)
        .await
        .unwrap_err();

    assert!(matches!(err, SessionError::Restore { .. }));
    assert_eq!(
        device.closed(),
        (CloseStatus::InternalError, "Error restoring thread.".to_string())
    );
    assert!(backend.chat_requests().is_empty());
}

#[tokio::test]
async fn test_restored_thread_precedes_new_prompt() {
    let store = Arc::new(MemoryStore::new());
    let mut earlier = Transcript::new();
    earlier.push_user("my name is Sam");
    earlier.push_model_text("Nice to meet you, Sam.");
    let previous = StoredThread::new("previous", &earlier, &WidgetContext::default());
    store_thread(store.as_ref(), &previous, Duration::from_secs(600))
        .await
        .unwrap();

    let backend = Backend::new(vec![vec![text("Your name is Sam.")]], "[]");
    let device = Device::default();
    let mut params = params("what's my name?");
    params.thread_id = Some("previous".to_string());

    let thread_id = Session::new(services(backend.clone(), subscriber(), store.clone()), params)
        .run(&device)
        .await
        .unwrap();

    let turns = &backend.chat_requests()[0].turns;
    assert_eq!(turns.len(), 3);
    assert_eq!(turns[0].role(), "user");
    assert_eq!(turns[2].role(), "user");

    assert_ne!(thread_id, "previous");
    let stored = load_thread(store.as_ref(), &thread_id).await.unwrap().unwrap();
    assert_eq!(stored.messages.len(), 4);
    assert!(store.get("thread:previous").await.unwrap().is_some());
}
