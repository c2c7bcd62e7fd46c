#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use edu_chat_core::{
    ApiError, AppState, AppUpdate, ChatApi, NewMessageBody, ReactBody, ReactionAction,
    UpdateListener, WireConversation, WireMessage, WireReaction, WireReply, WireUser,
};

pub fn wait_until(what: &str, timeout: Duration, mut f: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    panic!("{what}: condition not met within {timeout:?}");
}

/// Fast timings so the sync loop turns over several times per test.
pub fn write_config(data_dir: &str) {
    let path = std::path::Path::new(data_dir).join("edu_chat_config.json");
    let v = serde_json::json!({
        "poll_interval_ms": 250,
        "send_follow_up_delays_ms": [50, 150],
        "reaction_follow_up_delays_ms": [50, 150, 300],
        "toast_dismiss_ms": 60_000,
    });
    std::fs::write(path, serde_json::to_vec(&v).unwrap()).unwrap();
}

#[derive(Clone, Default)]
pub struct Collector {
    pub updates: Arc<Mutex<Vec<AppUpdate>>>,
}

impl UpdateListener for Collector {
    fn on_update(&self, update: AppUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

impl Collector {
    pub fn states(&self) -> Vec<AppState> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .map(|u| match u {
                AppUpdate::FullState(s) => s.clone(),
            })
            .collect()
    }
}

struct Conversation {
    name: String,
    members: Vec<String>,
    messages: Vec<WireMessage>,
}

#[derive(Default)]
struct ServerState {
    conversations: Vec<(String, Conversation)>,
}

/// In-memory group chat server shared by any number of clients.
#[derive(Clone, Default)]
pub struct FakeChatServer {
    state: Arc<Mutex<ServerState>>,
    next_id: Arc<AtomicU64>,
    fail_sends: Arc<AtomicBool>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeChatServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_conversation(&self, id: &str, name: &str, members: &[&str]) {
        self.state.lock().unwrap().conversations.push((
            id.to_string(),
            Conversation {
                name: name.to_string(),
                members: members.iter().map(|m| m.to_string()).collect(),
                messages: Vec::new(),
            },
        ));
    }

    pub fn client(&self, user_id: &str) -> Arc<dyn ChatApi> {
        Arc::new(FakeClient {
            server: self.clone(),
            user_id: user_id.to_string(),
        })
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn post_as(&self, user_id: &str, conversation_id: &str, content: &str) -> String {
        let body = NewMessageBody {
            content: content.to_string(),
            message_type: "text".into(),
            media_url: None,
            media_duration: None,
            reply_to_message_id: None,
            client_message_id: None,
        };
        self.create(user_id, conversation_id, &body).unwrap().id
    }

    pub fn messages(&self, conversation_id: &str) -> Vec<WireMessage> {
        let state = self.state.lock().unwrap();
        state
            .conversations
            .iter()
            .find(|(id, _)| id == conversation_id)
            .map(|(_, c)| c.messages.clone())
            .unwrap_or_default()
    }

    pub fn reactions(&self, message_id: &str) -> Vec<WireReaction> {
        let state = self.state.lock().unwrap();
        state
            .conversations
            .iter()
            .flat_map(|(_, c)| c.messages.iter())
            .find(|m| m.id == message_id)
            .map(|m| m.reactions.clone())
            .unwrap_or_default()
    }

    /// Number of message-list fetches seen for `conversation_id`.
    pub fn fetch_count(&self, conversation_id: &str) -> usize {
        let needle = format!("list_messages {conversation_id}");
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| **c == needle)
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn with_conversation<T>(
        &self,
        conversation_id: &str,
        f: impl FnOnce(&mut Conversation) -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let mut state = self.state.lock().unwrap();
        match state
            .conversations
            .iter_mut()
            .find(|(id, _)| id == conversation_id)
        {
            Some((_, c)) => f(c),
            None => Err(ApiError::Status {
                status: 404,
                body: "no such conversation".into(),
            }),
        }
    }

    fn create(
        &self,
        user_id: &str,
        conversation_id: &str,
        body: &NewMessageBody,
    ) -> Result<WireMessage, ApiError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 503,
                body: "try again later".into(),
            });
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.with_conversation(conversation_id, |c| {
            if !c.members.iter().any(|m| m == user_id) {
                return Err(ApiError::Status {
                    status: 403,
                    body: "not a member".into(),
                });
            }
            let wire = WireMessage {
                id: id.to_string(),
                content: body.content.clone(),
                message_type: body.message_type.clone(),
                media_url: body.media_url.clone(),
                media_duration: body.media_duration.map(f64::from),
                created_at: Utc::now(),
                author: user(user_id),
                reply_to: body.reply_to_message_id.clone().map(|id| WireReply {
                    id,
                    content: String::new(),
                    author_name: None,
                }),
                reactions: Vec::new(),
                client_message_id: body.client_message_id.clone(),
            };
            c.messages.push(wire.clone());
            Ok(wire)
        })
    }
}

fn user(id: &str) -> WireUser {
    WireUser {
        id: id.to_string(),
        name: Some(id.to_uppercase()),
        avatar: None,
    }
}

struct FakeClient {
    server: FakeChatServer,
    user_id: String,
}

#[async_trait]
impl ChatApi for FakeClient {
    async fn list_conversations(&self) -> Result<Vec<WireConversation>, ApiError> {
        self.server.record("list_conversations".into());
        let state = self.server.state.lock().unwrap();
        Ok(state
            .conversations
            .iter()
            .map(|(id, c)| WireConversation {
                id: id.clone(),
                name: c.name.clone(),
                description: None,
                is_member: c.members.iter().any(|m| *m == self.user_id),
                members: c.members.iter().map(|m| user(m)).collect(),
                last_message: None,
                unread_count: 0,
            })
            .collect())
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<WireMessage>, ApiError> {
        self.server
            .record(format!("list_messages {conversation_id}"));
        self.server
            .with_conversation(conversation_id, |c| Ok(c.messages.clone()))
    }

    async fn create_message(
        &self,
        conversation_id: &str,
        body: &NewMessageBody,
    ) -> Result<WireMessage, ApiError> {
        self.server.record(format!("create {conversation_id}"));
        self.server.create(&self.user_id, conversation_id, body)
    }

    async fn react(&self, message_id: &str, body: &ReactBody) -> Result<(), ApiError> {
        self.server
            .record(format!("react {message_id} {} {:?}", body.emoji, body.action));
        let mut state = self.server.state.lock().unwrap();
        let msg = state
            .conversations
            .iter_mut()
            .flat_map(|(_, c)| c.messages.iter_mut())
            .find(|m| m.id == message_id)
            .ok_or(ApiError::Status {
                status: 404,
                body: "no such message".into(),
            })?;
        // One reaction per user on the server too.
        for r in msg.reactions.iter_mut() {
            r.user_ids.retain(|u| *u != self.user_id);
        }
        if body.action == ReactionAction::Add {
            match msg.reactions.iter_mut().find(|r| r.emoji == body.emoji) {
                Some(r) => r.user_ids.push(self.user_id.clone()),
                None => msg.reactions.push(WireReaction {
                    emoji: body.emoji.clone(),
                    user_ids: vec![self.user_id.clone()],
                }),
            }
        }
        msg.reactions.retain(|r| !r.user_ids.is_empty());
        Ok(())
    }

    async fn join(&self, conversation_id: &str) -> Result<(), ApiError> {
        self.server.record(format!("join {conversation_id}"));
        let me = self.user_id.clone();
        self.server.with_conversation(conversation_id, |c| {
            if !c.members.contains(&me) {
                c.members.push(me);
            }
            Ok(())
        })
    }

    async fn leave(&self, conversation_id: &str) -> Result<(), ApiError> {
        self.server.record(format!("leave {conversation_id}"));
        let me = self.user_id.clone();
        self.server.with_conversation(conversation_id, |c| {
            c.members.retain(|m| *m != me);
            Ok(())
        })
    }

    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<(), ApiError> {
        self.server
            .record(format!("delete {conversation_id} {message_id}"));
        self.server.with_conversation(conversation_id, |c| {
            c.messages.retain(|m| m.id != message_id);
            Ok(())
        })
    }

    async fn upload_media(
        &self,
        bytes: Vec<u8>,
        _mime_type: &str,
        filename: &str,
    ) -> Result<String, ApiError> {
        self.server
            .record(format!("upload {filename} {}", bytes.len()));
        Ok(format!("https://cdn.test/{filename}"))
    }
}
