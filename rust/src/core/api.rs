// HTTP chat endpoints: wire types, the `ChatApi` seam, and the reqwest implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};

use crate::state::{ChatMessage, ChatUser, ConversationSummary, MessageKind, ReactionGroup, ReplySnapshot};

const ERROR_BODY_MAX_CHARS: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no chat server configured")]
    NotConfigured,
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("network error: {0}")]
    Network(String),
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid media payload: {0}")]
    InvalidMedia(String),
}

impl ApiError {
    /// Short user-facing text for toasts and failed-message markers.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::NotConfigured => "Chat server is not configured".into(),
            ApiError::Transport(_) | ApiError::Network(_) => "Network error, check your connection".into(),
            ApiError::Status { status: 403, .. } => "You are not allowed to do that".into(),
            ApiError::Status { status, .. } => format!("Server error ({status})"),
            ApiError::Decode(_) => "Unexpected server response".into(),
            ApiError::InvalidMedia(msg) => format!("Invalid media: {msg}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessageBody {
    pub content: String,
    pub message_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_duration: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_message_id: Option<String>,
    /// Temporary id of the optimistic copy; echoed back so polls can match it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReactBody {
    pub emoji: String,
    pub action: ReactionAction,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireUser {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default, alias = "displayName")]
    pub name: Option<String>,
    #[serde(default, alias = "avatarUrl", alias = "image")]
    pub avatar: Option<String>,
}

impl WireUser {
    fn into_user(self) -> ChatUser {
        let display_name = self
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "Unknown".to_string());
        ChatUser {
            id: self.id,
            display_name,
            avatar_url: self.avatar.filter(|a| !a.trim().is_empty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireReply {
    #[serde(deserialize_with = "id_string", alias = "messageId")]
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub author_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireReaction {
    pub emoji: String,
    #[serde(default, deserialize_with = "id_strings")]
    pub user_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_message_type")]
    pub message_type: String,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub media_duration: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub author: WireUser,
    #[serde(default)]
    pub reply_to: Option<WireReply>,
    #[serde(default)]
    pub reactions: Vec<WireReaction>,
    #[serde(default)]
    pub client_message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireLastMessage {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireConversation {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_member: bool,
    #[serde(default)]
    pub members: Vec<WireUser>,
    #[serde(default)]
    pub last_message: Option<WireLastMessage>,
    #[serde(default)]
    pub unread_count: u32,
}

impl WireConversation {
    pub fn into_summary(self) -> ConversationSummary {
        ConversationSummary {
            conversation_id: self.id,
            name: self.name,
            description: self.description.unwrap_or_default(),
            is_member: self.is_member,
            members: self.members.into_iter().map(WireUser::into_user).collect(),
            last_message_preview: self.last_message.as_ref().map(|m| m.content.clone()),
            last_message_at_ms: self
                .last_message
                .and_then(|m| m.created_at)
                .map(|t| t.timestamp_millis()),
            unread_count: self.unread_count,
        }
    }
}

/// A message as reported by the server, converted to the view model.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerMessage {
    pub message: ChatMessage,
    /// Temporary id the sender attached at send time, when the server echoes it.
    pub client_message_id: Option<String>,
}

impl ServerMessage {
    pub fn from_wire(wire: WireMessage, my_user_id: &str) -> Self {
        let author = wire.author.into_user();
        let is_mine = author.id == my_user_id;
        let reply_target = wire.reply_to.map(|r| ReplySnapshot {
            message_id: r.id,
            content: r.content,
            author_name: r.author_name.unwrap_or_default(),
        });
        let mut reactions: Vec<ReactionGroup> = Vec::new();
        for r in wire.reactions {
            if r.user_ids.is_empty() {
                continue;
            }
            match reactions.iter_mut().find(|g| g.emoji == r.emoji) {
                Some(group) => {
                    for u in r.user_ids {
                        if !group.user_ids.contains(&u) {
                            group.user_ids.push(u);
                        }
                    }
                }
                None => reactions.push(ReactionGroup {
                    emoji: r.emoji,
                    user_ids: r.user_ids,
                }),
            }
        }
        let media_duration_secs = wire
            .media_duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|d| d.round() as u32);
        Self {
            message: ChatMessage {
                id: wire.id,
                content: wire.content,
                kind: MessageKind::from_wire(&wire.message_type),
                media_ref: wire.media_url.filter(|u| !u.is_empty()),
                media_duration_secs,
                created_at_ms: wire.created_at.timestamp_millis(),
                status: None,
                author,
                is_mine,
                reply_target,
                reactions,
            },
            client_message_id: wire.client_message_id.filter(|id| !id.is_empty()),
        }
    }
}

fn default_message_type() -> String {
    "text".to_string()
}

fn id_value_to_string<E: de::Error>(v: serde_json::Value) -> Result<String, E> {
    match v {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(E::custom(format!("expected string or number id, got {other}"))),
    }
}

fn id_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    id_value_to_string(serde_json::Value::deserialize(d)?)
}

fn id_strings<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    Vec::<serde_json::Value>::deserialize(d)?
        .into_iter()
        .map(id_value_to_string)
        .collect()
}

/// List endpoints answer either with a bare array or an object wrapping it.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Bare(Vec<T>),
    Wrapped {
        #[serde(alias = "messages", alias = "conversations", alias = "data")]
        items: Vec<T>,
    },
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Listing::Bare(v) => v,
            Listing::Wrapped { items } => items,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Bare(T),
    Wrapped {
        #[serde(alias = "message", alias = "data")]
        item: T,
    },
}

impl<T> Envelope<T> {
    fn into_inner(self) -> T {
        match self {
            Envelope::Bare(v) => v,
            Envelope::Wrapped { item } => item,
        }
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(alias = "mediaUrl")]
    url: String,
}

#[async_trait]
pub trait ChatApi: Send + Sync + 'static {
    async fn list_conversations(&self) -> Result<Vec<WireConversation>, ApiError>;
    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<WireMessage>, ApiError>;
    async fn create_message(
        &self,
        conversation_id: &str,
        body: &NewMessageBody,
    ) -> Result<WireMessage, ApiError>;
    async fn react(&self, message_id: &str, body: &ReactBody) -> Result<(), ApiError>;
    async fn join(&self, conversation_id: &str) -> Result<(), ApiError>;
    async fn leave(&self, conversation_id: &str) -> Result<(), ApiError>;
    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<(), ApiError>;
    /// Returns the stable URL of the stored file.
    async fn upload_media(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        filename: &str,
    ) -> Result<String, ApiError>;
}

/// Test hook slot: when set, sessions talk to this instead of `HttpChatApi`.
pub type SharedChatApi = std::sync::Arc<std::sync::RwLock<Option<std::sync::Arc<dyn ChatApi>>>>;

pub struct HttpChatApi {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpChatApi {
    pub fn new(client: reqwest::Client, base_url: String, auth_token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: auth_token.filter(|t| !t.is_empty()),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let rb = self.client.request(method, format!("{}{}", self.base_url, path));
        match &self.auth_token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    async fn send_checked(rb: reqwest::RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let resp = rb.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body: String = resp
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(ERROR_BODY_MAX_CHARS)
            .collect();
        Err(ApiError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn send_json<T: DeserializeOwned>(rb: reqwest::RequestBuilder) -> Result<T, ApiError> {
        let bytes = Self::send_checked(rb).await?.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn list_conversations(&self) -> Result<Vec<WireConversation>, ApiError> {
        let rb = self.request(reqwest::Method::GET, "/conversations");
        Ok(Self::send_json::<Listing<WireConversation>>(rb)
            .await?
            .into_vec())
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<WireMessage>, ApiError> {
        let rb = self.request(
            reqwest::Method::GET,
            &format!("/conversations/{conversation_id}/messages"),
        );
        Ok(Self::send_json::<Listing<WireMessage>>(rb).await?.into_vec())
    }

    async fn create_message(
        &self,
        conversation_id: &str,
        body: &NewMessageBody,
    ) -> Result<WireMessage, ApiError> {
        let rb = self
            .request(
                reqwest::Method::POST,
                &format!("/conversations/{conversation_id}/messages"),
            )
            .json(body);
        Ok(Self::send_json::<Envelope<WireMessage>>(rb)
            .await?
            .into_inner())
    }

    async fn react(&self, message_id: &str, body: &ReactBody) -> Result<(), ApiError> {
        let rb = self
            .request(reqwest::Method::POST, &format!("/messages/{message_id}/react"))
            .json(body);
        Self::send_checked(rb).await.map(|_| ())
    }

    async fn join(&self, conversation_id: &str) -> Result<(), ApiError> {
        let rb = self.request(
            reqwest::Method::POST,
            &format!("/conversations/{conversation_id}/join"),
        );
        Self::send_checked(rb).await.map(|_| ())
    }

    async fn leave(&self, conversation_id: &str) -> Result<(), ApiError> {
        let rb = self.request(
            reqwest::Method::POST,
            &format!("/conversations/{conversation_id}/leave"),
        );
        Self::send_checked(rb).await.map(|_| ())
    }

    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<(), ApiError> {
        let rb = self.request(
            reqwest::Method::DELETE,
            &format!("/conversations/{conversation_id}/messages/{message_id}"),
        );
        Self::send_checked(rb).await.map(|_| ())
    }

    async fn upload_media(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        filename: &str,
    ) -> Result<String, ApiError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime_type)?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let rb = self.request(reqwest::Method::POST, "/uploads").multipart(form);
        Ok(Self::send_json::<UploadResponse>(rb).await?.url)
    }
}
