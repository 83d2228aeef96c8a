//! End-to-end session behavior against a scripted transport.
//!
//! The mock transport plays back a script of connect outcomes and lets
//! tests inject server events, so reconnection and reconciliation run
//! exactly as they would against a live socket, under a paused clock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use pawcare_chat::{
    ChatError, ChatEvent, ChatSession, ConnectionState, ConversationContext, HistoryProvider,
    ParticipantKind, ReconnectConfig, Transport, TransportEvent,
};
use pawcare_shared::{
    ApiError, ChatMessage, ClientCommand, MessagePayload, Participant, ServerEvent,
};

struct MockTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    outcomes: Mutex<VecDeque<Result<bool, ChatError>>>,
    connects: AtomicU32,
    connected: AtomicBool,
    sent: Mutex<Vec<ClientCommand>>,
}

impl MockTransport {
    fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Arc<Self> {
        Arc::new(Self {
            events,
            outcomes: Mutex::new(VecDeque::new()),
            connects: AtomicU32::new(0),
            connected: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Queue connect outcomes; once the script runs out, connects succeed.
    fn script(&self, outcomes: impl IntoIterator<Item = Result<bool, ChatError>>) {
        self.outcomes.lock().extend(outcomes);
    }

    fn push_event(&self, event: ServerEvent) {
        let _ = self.events.send(TransportEvent::Event(event));
    }

    fn drop_connection(&self, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Closed {
            reason: reason.to_string(),
        });
    }

    fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    fn sent_commands(&self) -> Vec<ClientCommand> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _token: &str) -> Result<bool, ChatError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let outcome = self.outcomes.lock().pop_front().unwrap_or(Ok(true));
        self.connected
            .store(matches!(outcome, Ok(true)), Ordering::SeqCst);
        outcome
    }

    async fn send(&self, command: ClientCommand) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().push(command);
        true
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

struct FixedHistory {
    pages: Mutex<VecDeque<Vec<ChatMessage>>>,
    fetches: AtomicU32,
}

impl FixedHistory {
    fn new(pages: Vec<Vec<ChatMessage>>) -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(pages.into()),
            fetches: AtomicU32::new(0),
        })
    }

    fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HistoryProvider for FixedHistory {
    async fn fetch_conversation(
        &self,
        _context: &ConversationContext,
        _token: &str,
    ) -> Result<Vec<ChatMessage>, ApiError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.pages.lock().pop_front().unwrap_or_default())
    }
}

fn harness(
    history_pages: Vec<Vec<ChatMessage>>,
) -> (ChatSession, Arc<MockTransport>, Arc<FixedHistory>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let transport = MockTransport::new(event_tx);
    let history = FixedHistory::new(history_pages);
    let transport_dyn: Arc<dyn Transport> = transport.clone();
    let history_dyn: Arc<dyn HistoryProvider> = history.clone();
    let session = ChatSession::with_transport(
        transport_dyn,
        event_rx,
        history_dyn,
        ReconnectConfig::default(),
    );
    (session, transport, history)
}

fn ctx() -> ConversationContext {
    ConversationContext::new("prov-7", ParticipantKind::Provider)
}

fn token() -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;
    format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#),
        URL_SAFE_NO_PAD.encode(r#"{"sub":"maria","role":"user"}"#),
        URL_SAFE_NO_PAD.encode("sig")
    )
}

fn history_message(id: &str, body: &str) -> ChatMessage {
    ChatMessage {
        id: id.to_string(),
        sender_id: "maria".to_string(),
        sender_kind: ParticipantKind::User,
        recipient_id: "prov-7".to_string(),
        recipient_kind: ParticipantKind::Provider,
        body: body.to_string(),
        sent_at: Utc::now(),
        read_at: None,
        is_optimistic: false,
    }
}

fn inbound_from_peer(id: &str, peer_id: &str, body: &str) -> ServerEvent {
    ServerEvent::MessageNew {
        message: MessagePayload {
            id: id.to_string(),
            sender: Participant {
                id: peer_id.to_string(),
                kind: ParticipantKind::Provider,
            },
            recipient: Participant {
                id: "maria".to_string(),
                kind: ParticipantKind::User,
            },
            body: body.to_string(),
            sent_at: Utc::now(),
            read_at: None,
        },
    }
}

/// Poll until `cond` holds; the paused clock auto-advances through any
/// pending retry timers on the way.
async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..2000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn wait_for_state(
    rx: &mut tokio::sync::watch::Receiver<ConnectionState>,
    pred: impl Fn(&ConnectionState) -> bool,
) {
    loop {
        let reached = {
            let state = rx.borrow_and_update();
            pred(&*state)
        };
        if reached {
            return;
        }
        rx.changed().await.expect("state watch closed");
    }
}

#[tokio::test(start_paused = true)]
async fn connect_fetches_history_and_seeds_the_log() {
    let page = vec![
        history_message("srv-1", "Hi, is Luna ok?"),
        history_message("srv-2", "She is doing great"),
    ];
    let (session, transport, history) = harness(vec![page]);

    let ok = session.connect(ctx(), &token()).await.unwrap();
    assert!(ok);
    assert!(session.state().is_connected());
    assert_eq!(transport.connect_count(), 1);

    wait_for("history seed", || session.messages().len() == 2).await;
    assert_eq!(history.fetch_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn second_connect_for_same_context_is_a_noop() {
    let (session, transport, _) = harness(vec![]);

    assert!(session.connect(ctx(), &token()).await.unwrap());
    assert!(session.connect(ctx(), &token()).await.unwrap());

    // Still exactly one underlying transport session.
    assert_eq!(transport.connect_count(), 1);
    assert!(session.state().is_connected());
}

#[tokio::test(start_paused = true)]
async fn connecting_to_a_new_context_replaces_the_old_one() {
    let (session, transport, history) = harness(vec![vec![], vec![]]);

    session.connect(ctx(), &token()).await.unwrap();
    transport.push_event(inbound_from_peer("srv-1", "prov-7", "hello"));
    wait_for("first conversation message", || session.messages().len() == 1).await;

    let other = ConversationContext::new("prov-9", ParticipantKind::Provider);
    session.connect(other.clone(), &token()).await.unwrap();

    assert_eq!(transport.connect_count(), 2);
    assert_eq!(session.context(), Some(other));
    // No cross-context leakage: the log starts empty.
    assert!(session.messages().is_empty());
    wait_for("second history fetch", || history.fetch_count() == 2).await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_idempotent() {
    let (session, _, _) = harness(vec![]);
    session.connect(ctx(), &token()).await.unwrap();

    session.disconnect().await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
    session.disconnect().await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn retries_three_times_with_doubling_delays_then_fails() {
    let (session, transport, _) = harness(vec![]);
    transport.script([Ok(false), Ok(false), Ok(false), Ok(false)]);

    let delays = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(Mutex::new(Vec::new()));
    let delays_sink = delays.clone();
    let errors_sink = errors.clone();
    let _sub = session.events().subscribe(move |event| match event {
        ChatEvent::Reconnecting { delay, .. } => delays_sink.lock().push(*delay),
        ChatEvent::ConnectionError(e) => errors_sink.lock().push(e.clone()),
        _ => {}
    });

    let ok = session.connect(ctx(), &token()).await.unwrap();
    assert!(!ok);

    let mut state_rx = session.state_watch();
    wait_for_state(&mut state_rx, |s| s.is_failed()).await;

    assert_eq!(transport.connect_count(), 4);
    assert_eq!(
        *delays.lock(),
        vec![
            Duration::from_millis(1000),
            Duration::from_millis(2000),
            Duration::from_millis(4000),
        ]
    );
    assert!(errors.lock().contains(&ChatError::ReconnectExhausted));

    // Terminal: no further automatic attempts, however long we wait.
    tokio::time::advance(Duration::from_secs(60)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(transport.connect_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn auth_rejection_fails_without_retry() {
    let (session, transport, _) = harness(vec![]);
    transport.script([Err(ChatError::Auth("token expired".to_string()))]);

    let result = session.connect(ctx(), &token()).await;
    assert!(matches!(result, Err(ChatError::Auth(_))));
    assert!(session.state().is_failed());

    tokio::time::advance(Duration::from_secs(60)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(transport.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_send_adds_nothing_and_history_carries_the_echo() {
    // Initial connect fails; the first retry succeeds and history then
    // returns the server's copy of the message the user tried to send.
    let (session, transport, _) = harness(vec![vec![history_message("srv-9", "Hola")]]);
    transport.script([Ok(false), Ok(true)]);

    let ok = session.connect(ctx(), &token()).await.unwrap();
    assert!(!ok);

    // Sent while disconnected: reported as failed, no optimistic bubble.
    let sent = session
        .send_message("prov-7", ParticipantKind::Provider, "Hola")
        .await
        .unwrap();
    assert!(!sent);
    assert!(session.messages().is_empty());

    let mut state_rx = session.state_watch();
    wait_for_state(&mut state_rx, |s| s.is_connected()).await;

    wait_for("history seed after reconnect", || {
        session.messages().len() == 1
    })
    .await;
    let messages = session.messages();
    assert_eq!(messages[0].id, "srv-9");
    assert!(!messages[0].is_optimistic);
}

#[tokio::test(start_paused = true)]
async fn optimistic_send_collapses_with_ack_and_echo() {
    let (session, transport, _) = harness(vec![]);
    session.connect(ctx(), &token()).await.unwrap();

    let sent = session
        .send_message("prov-7", ParticipantKind::Provider, "See you at 5")
        .await
        .unwrap();
    assert!(sent);

    let provisional = {
        let messages = session.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_optimistic);
        messages[0].id.clone()
    };
    assert!(provisional.starts_with("local-"));

    // The transmitted command carries the provisional id as its nonce.
    let nonce = match &transport.sent_commands()[0] {
        ClientCommand::MessageCreate { nonce, .. } => nonce.clone(),
        other => panic!("unexpected command: {:?}", other),
    };
    assert_eq!(nonce, provisional);

    transport.push_event(ServerEvent::Ack {
        nonce,
        message_id: "srv-1".to_string(),
    });
    wait_for("ack rebind", || session.messages()[0].id == "srv-1").await;
    assert!(!session.messages()[0].is_optimistic);

    // The echo of the confirmed message replaces, never appends.
    transport.push_event(ServerEvent::MessageNew {
        message: MessagePayload {
            id: "srv-1".to_string(),
            sender: Participant {
                id: "maria".to_string(),
                kind: ParticipantKind::User,
            },
            recipient: Participant {
                id: "prov-7".to_string(),
                kind: ParticipantKind::Provider,
            },
            body: "See you at 5".to_string(),
            sent_at: Utc::now(),
            read_at: Some(Utc::now()),
        },
    });
    wait_for("echo applied", || {
        session.messages()[0].read_at.is_some()
    })
    .await;
    assert_eq!(session.messages().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn inbound_from_another_conversation_is_dropped() {
    let (session, transport, _) = harness(vec![]);
    session.connect(ctx(), &token()).await.unwrap();

    transport.push_event(inbound_from_peer("srv-1", "prov-9", "wrong window"));
    transport.push_event(inbound_from_peer("srv-2", "prov-7", "right window"));

    wait_for("peer message", || session.messages().len() == 1).await;
    assert_eq!(session.messages()[0].id, "srv-2");
}

#[tokio::test(start_paused = true)]
async fn dropped_connection_reconnects_and_resumes_delivery() {
    let (session, transport, _) = harness(vec![]);
    session.connect(ctx(), &token()).await.unwrap();

    transport.push_event(inbound_from_peer("srv-1", "prov-7", "before the drop"));
    wait_for("first message", || session.messages().len() == 1).await;

    transport.drop_connection("tunnel");
    wait_for("reconnect attempt", || transport.connect_count() == 2).await;
    let mut state_rx = session.state_watch();
    wait_for_state(&mut state_rx, |s| s.is_connected()).await;

    // Already-applied messages were not reordered or lost.
    assert_eq!(session.messages()[0].id, "srv-1");

    transport.push_event(inbound_from_peer("srv-2", "prov-7", "after the drop"));
    wait_for("resumed delivery", || session.messages().len() == 2).await;
}

#[tokio::test(start_paused = true)]
async fn reset_reconnects_immediately_after_failure() {
    let (session, transport, _) = harness(vec![vec![history_message("srv-1", "hello")]]);
    transport.script([Ok(false), Ok(false), Ok(false), Ok(false)]);

    session.connect(ctx(), &token()).await.unwrap();
    let mut state_rx = session.state_watch();
    wait_for_state(&mut state_rx, |s| s.is_failed()).await;
    assert_eq!(transport.connect_count(), 4);

    // Script exhausted: the manual retry connects on the first try.
    let ok = session.reset().await.unwrap();
    assert!(ok);
    assert!(session.state().is_connected());
    assert_eq!(transport.connect_count(), 5);
    wait_for("history after reset", || session.messages().len() == 1).await;
}

#[tokio::test(start_paused = true)]
async fn validation_failures_are_synchronous() {
    let (session, transport, _) = harness(vec![]);

    // Bad token shapes never reach the network.
    assert!(matches!(
        session.connect(ctx(), "").await,
        Err(ChatError::Auth(_))
    ));
    assert!(matches!(
        session.connect(ctx(), "junk").await,
        Err(ChatError::Auth(_))
    ));
    let bad_recipient = ConversationContext::new("Not Valid", ParticipantKind::Provider);
    assert!(matches!(
        session.connect(bad_recipient, &token()).await,
        Err(ChatError::Validation(_))
    ));
    assert_eq!(transport.connect_count(), 0);

    session.connect(ctx(), &token()).await.unwrap();
    assert!(matches!(
        session
            .send_message("prov-7", ParticipantKind::Provider, "   ")
            .await,
        Err(ChatError::Validation(_))
    ));
    assert!(matches!(
        session
            .send_message("someone else", ParticipantKind::User, "hi")
            .await,
        Err(ChatError::Validation(_))
    ));
    assert!(transport.sent_commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn read_state_flows_both_ways() {
    let (session, transport, _) = harness(vec![]);
    session.connect(ctx(), &token()).await.unwrap();

    transport.push_event(inbound_from_peer("srv-1", "prov-7", "hello"));
    wait_for("inbound message", || session.messages().len() == 1).await;

    // Local mark: sets read_at and notifies the server.
    session.mark_read("srv-1").await;
    assert!(session.messages()[0].read_at.is_some());
    assert!(transport
        .sent_commands()
        .iter()
        .any(|c| matches!(c, ClientCommand::MessageRead { message_id } if message_id == "srv-1")));

    // Unknown ids are a silent no-op.
    session.mark_read("missing").await;

    // Server-side receipt for an own optimistic send.
    session
        .send_message("prov-7", ParticipantKind::Provider, "read me")
        .await
        .unwrap();
    let own_id = session.messages()[1].id.clone();
    transport.push_event(ServerEvent::MessageRead {
        message_id: own_id.clone(),
        read_at: Utc::now(),
    });
    wait_for("read receipt", || {
        session
            .messages()
            .iter()
            .any(|m| m.id == own_id && m.read_at.is_some())
    })
    .await;
}
