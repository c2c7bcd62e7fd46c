#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct AppState {
    pub rev: u64,
    pub session: SessionState,
    pub busy: BusyState,
    pub conversations: Vec<ConversationSummary>,
    pub current_conversation: Option<ConversationViewState>,
    pub toast: Option<String>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            session: SessionState::SignedOut,
            busy: BusyState::idle(),
            conversations: vec![],
            current_conversation: None,
            toast: None,
        }
    }
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq)]
pub enum SessionState {
    SignedOut,
    SignedIn { user: ChatUser },
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct BusyState {
    pub loading_conversations: bool,
    /// Conversation whose join/leave request is in flight.
    pub membership_change: Option<String>,
}

impl BusyState {
    pub fn idle() -> Self {
        Self {
            loading_conversations: false,
            membership_change: None,
        }
    }
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChatUser {
    pub id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub name: String,
    pub description: String,
    pub is_member: bool,
    pub members: Vec<ChatUser>,
    pub last_message_preview: Option<String>,
    pub last_message_at_ms: Option<i64>,
    pub unread_count: u32,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct ConversationViewState {
    pub conversation_id: String,
    pub name: String,
    pub description: String,
    pub is_member: bool,
    pub members: Vec<ChatUser>,
    /// Ascending by `created_at_ms`.
    pub messages: Vec<ChatMessage>,
    pub reply_target: Option<ReplySnapshot>,
    pub scroll: ScrollDirective,
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Text,
    Image,
    Voice,
    Sticker,
}

impl MessageKind {
    pub fn as_wire(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Voice => "voice",
            MessageKind::Sticker => "sticker",
        }
    }

    /// Unknown wire values render as text rather than dropping the message.
    pub fn from_wire(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "image" => MessageKind::Image,
            "voice" | "audio" => MessageKind::Voice,
            "sticker" => MessageKind::Sticker,
            _ => MessageKind::Text,
        }
    }
}

#[derive(uniffi::Enum, Clone, Debug, PartialEq, Eq)]
pub enum MessageDeliveryState {
    Pending,
    Sent,
    Failed { reason: String },
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct ReplySnapshot {
    pub message_id: String,
    pub content: String,
    pub author_name: String,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq, Eq)]
pub struct ReactionGroup {
    pub emoji: String,
    pub user_ids: Vec<String>,
}

#[derive(uniffi::Record, Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
    pub kind: MessageKind,
    pub media_ref: Option<String>,
    pub media_duration_secs: Option<u32>,
    pub created_at_ms: i64,
    /// Only tracked for the local user's messages.
    pub status: Option<MessageDeliveryState>,
    pub author: ChatUser,
    pub is_mine: bool,
    pub reply_target: Option<ReplySnapshot>,
    pub reactions: Vec<ReactionGroup>,
}

impl ChatMessage {
    pub fn is_unconfirmed(&self) -> bool {
        matches!(
            self.status,
            Some(MessageDeliveryState::Pending) | Some(MessageDeliveryState::Failed { .. })
        )
    }

    /// Emoji currently held by `user_id` on this message, if any.
    pub fn reaction_of(&self, user_id: &str) -> Option<&str> {
        self.reactions
            .iter()
            .find(|r| r.user_ids.iter().any(|u| u == user_id))
            .map(|r| r.emoji.as_str())
    }

    pub fn reply_snapshot(&self) -> ReplySnapshot {
        ReplySnapshot {
            message_id: self.id.clone(),
            content: self.content.clone(),
            author_name: self.author.display_name.clone(),
        }
    }
}

#[derive(uniffi::Record, Clone, Copy, Debug, PartialEq)]
pub struct ScrollMetrics {
    pub offset_px: f64,
    pub viewport_px: f64,
    pub content_px: f64,
}

impl ScrollMetrics {
    pub fn max_offset(&self) -> f64 {
        (self.content_px - self.viewport_px).max(0.0)
    }

    pub fn distance_from_bottom(&self) -> f64 {
        (self.max_offset() - self.offset_px).max(0.0)
    }
}

/// Scroll instruction attached to each message list snapshot. The UI applies
/// `action` once per new `token`, after rendering the messages.
#[derive(uniffi::Record, Clone, Copy, Debug, PartialEq)]
pub struct ScrollDirective {
    pub token: u64,
    pub action: ScrollAction,
}

#[derive(uniffi::Enum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrollAction {
    StayPut,
    ToBottom { smooth: bool },
}

impl ScrollAction {
    /// Offset the pane should end up at once the new content is laid out.
    pub fn apply(&self, rendered: ScrollMetrics) -> f64 {
        match self {
            ScrollAction::StayPut => rendered.offset_px,
            ScrollAction::ToBottom { .. } => rendered.max_offset(),
        }
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
