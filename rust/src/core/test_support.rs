// In-memory chat server and helpers for driving an `AppCore` in unit tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flume::Receiver;
use tempfile::TempDir;

use super::*;
use crate::state::{ChatMessage, ConversationSummary};

pub(crate) struct FakeApi {
    me: String,
    conversations: Mutex<Vec<WireConversation>>,
    messages: Mutex<HashMap<String, Vec<WireMessage>>>,
    calls: Mutex<Vec<String>>,
    fail_sends: AtomicBool,
    next_id: AtomicU64,
}

impl FakeApi {
    pub fn new(me: &str) -> Arc<Self> {
        Arc::new(Self {
            me: me.to_string(),
            conversations: Mutex::new(Vec::new()),
            messages: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls").clone()
    }

    pub fn messages(&self, conversation_id: &str) -> Vec<WireMessage> {
        self.messages
            .lock()
            .expect("messages")
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Adds a message to the server side and returns its id.
    pub fn push_server_message(
        &self,
        conversation_id: &str,
        author: &str,
        content: &str,
        created_at_ms: i64,
    ) -> String {
        let id = format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let wire = WireMessage {
            id: id.clone(),
            content: content.to_string(),
            message_type: "text".to_string(),
            media_url: None,
            media_duration: None,
            created_at: DateTime::<Utc>::from_timestamp_millis(created_at_ms).unwrap_or_default(),
            author: wire_user(author),
            reply_to: None,
            reactions: Vec::new(),
            client_message_id: None,
        };
        self.messages
            .lock()
            .expect("messages")
            .entry(conversation_id.to_string())
            .or_default()
            .push(wire);
        id
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls").push(call);
    }
}

fn wire_user(id: &str) -> WireUser {
    WireUser {
        id: id.to_string(),
        name: Some(id.to_uppercase()),
        avatar: None,
    }
}

#[async_trait]
impl ChatApi for FakeApi {
    async fn list_conversations(&self) -> Result<Vec<WireConversation>, ApiError> {
        self.record("list_conversations".into());
        Ok(self.conversations.lock().expect("conversations").clone())
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<WireMessage>, ApiError> {
        self.record(format!("list_messages {conversation_id}"));
        Ok(self.messages(conversation_id))
    }

    async fn create_message(
        &self,
        conversation_id: &str,
        body: &NewMessageBody,
    ) -> Result<WireMessage, ApiError> {
        self.record(format!("create {conversation_id}"));
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ApiError::Network("offline".into()));
        }
        let wire = WireMessage {
            id: format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            content: body.content.clone(),
            message_type: body.message_type.clone(),
            media_url: body.media_url.clone(),
            media_duration: body.media_duration.map(f64::from),
            created_at: Utc::now(),
            author: wire_user(&self.me),
            reply_to: body.reply_to_message_id.clone().map(|id| WireReply {
                id,
                content: String::new(),
                author_name: None,
            }),
            reactions: Vec::new(),
            client_message_id: body.client_message_id.clone(),
        };
        self.messages
            .lock()
            .expect("messages")
            .entry(conversation_id.to_string())
            .or_default()
            .push(wire.clone());
        Ok(wire)
    }

    async fn react(&self, message_id: &str, body: &ReactBody) -> Result<(), ApiError> {
        self.record(format!("react {message_id} {} {:?}", body.emoji, body.action));
        Ok(())
    }

    async fn join(&self, conversation_id: &str) -> Result<(), ApiError> {
        self.record(format!("join {conversation_id}"));
        Ok(())
    }

    async fn leave(&self, conversation_id: &str) -> Result<(), ApiError> {
        self.record(format!("leave {conversation_id}"));
        Ok(())
    }

    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<(), ApiError> {
        self.record(format!("delete {conversation_id} {message_id}"));
        Ok(())
    }

    async fn upload_media(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        filename: &str,
    ) -> Result<String, ApiError> {
        self.record(format!("upload {filename} {mime_type} {}", bytes.len()));
        Ok(format!("https://cdn.test/{filename}"))
    }
}

pub(crate) fn make_core(
    dir: &TempDir,
    api: Option<Arc<FakeApi>>,
) -> (AppCore, Receiver<CoreMsg>, Receiver<AppUpdate>) {
    // Long poll period and toast lifetime: tests drive ticks themselves.
    std::fs::write(
        dir.path().join(config::CONFIG_FILE_NAME),
        r#"{"poll_interval_ms": 3600000, "toast_dismiss_ms": 3600000}"#,
    )
    .expect("write config");
    let (update_tx, update_rx) = flume::unbounded();
    let (core_tx, core_rx) = flume::unbounded();
    let shared_state = Arc::new(RwLock::new(AppState::empty()));
    let chat_api: SharedChatApi = Arc::new(RwLock::new(
        api.map(|a| a as Arc<dyn ChatApi>),
    ));
    let core = AppCore::new(
        update_tx,
        core_tx,
        dir.path().to_string_lossy().into_owned(),
        shared_state,
        chat_api,
    );
    (core, core_rx, update_rx)
}

pub(crate) fn sign_in(core: &mut AppCore) {
    core.handle_message(CoreMsg::Action(AppAction::StartSession {
        user_id: "me".into(),
        display_name: "Me".into(),
        avatar_url: None,
        auth_token: None,
    }));
}

pub(crate) fn load_conversations(core: &mut AppCore, entries: &[(&str, bool)]) {
    let list = entries
        .iter()
        .map(|(id, is_member)| ConversationSummary {
            conversation_id: id.to_string(),
            name: id.to_uppercase(),
            description: String::new(),
            is_member: *is_member,
            members: Vec::new(),
            last_message_preview: None,
            last_message_at_ms: None,
            unread_count: 0,
        })
        .collect();
    core.handle_message(internal(InternalEvent::ConversationsFetched { result: Ok(list) }));
}

pub(crate) fn seed_messages(core: &mut AppCore, conversation_id: &str, messages: Vec<ChatMessage>) {
    let store = core.stores.entry(conversation_id.to_string()).or_default();
    for m in messages {
        store.insert_optimistic(m);
    }
    core.publish_store(conversation_id, true);
}

pub(crate) fn server_message(id: &str, author: &str, content: &str, created_at_ms: i64) -> ServerMessage {
    ServerMessage {
        message: store::test_util::message(id, author, content, created_at_ms),
        client_message_id: None,
    }
}

pub(crate) fn open(conversation_id: &str) -> CoreMsg {
    CoreMsg::Action(AppAction::OpenConversation {
        conversation_id: conversation_id.into(),
    })
}

pub(crate) fn internal(event: InternalEvent) -> CoreMsg {
    CoreMsg::Internal(Box::new(event))
}

/// Feed background results back into the core until `done` accepts one.
/// Conversation list refreshes are dropped: unit tests set the list directly.
pub(crate) fn pump_until(
    core: &mut AppCore,
    core_rx: &Receiver<CoreMsg>,
    mut done: impl FnMut(&InternalEvent) -> bool,
) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let msg = core_rx
            .recv_timeout(remaining)
            .expect("timed out waiting for core event");
        let CoreMsg::Internal(event) = msg else {
            core.handle_message(msg);
            continue;
        };
        if matches!(*event, InternalEvent::ConversationsFetched { .. }) {
            continue;
        }
        let finished = done(&event);
        core.handle_message(CoreMsg::Internal(event));
        if finished {
            return;
        }
    }
}

pub(crate) fn wait_until(what: &str, timeout: Duration, mut f: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("{what}: timeout");
}
