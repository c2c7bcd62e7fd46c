use crate::state::{MessageKind, ScrollMetrics};

#[derive(uniffi::Enum, Debug, Clone)]
pub enum AppAction {
    // Session
    StartSession {
        user_id: String,
        display_name: String,
        avatar_url: Option<String>,
        auth_token: Option<String>,
    },
    EndSession,

    // Conversations
    RefreshConversations,
    OpenConversation {
        conversation_id: String,
    },
    CloseConversation,
    JoinConversation {
        conversation_id: String,
    },
    LeaveConversation {
        conversation_id: String,
    },

    // Messages
    SendMessage {
        conversation_id: String,
        content: String,
        kind: MessageKind,
        media_ref: Option<String>,
        media_duration_secs: Option<u32>,
        reply_to_message_id: Option<String>,
    },
    SendImage {
        conversation_id: String,
        data_base64: String,
        mime_type: String,
        filename: String,
        caption: String,
        reply_to_message_id: Option<String>,
    },
    SendVoiceNote {
        conversation_id: String,
        data_base64: String,
        mime_type: String,
        duration_secs: u32,
        reply_to_message_id: Option<String>,
    },
    RetryMessage {
        conversation_id: String,
        message_id: String,
    },
    DiscardMessage {
        conversation_id: String,
        message_id: String,
    },
    ReactToMessage {
        conversation_id: String,
        message_id: String,
        emoji: String,
    },
    DeleteMessage {
        conversation_id: String,
        message_id: String,
    },
    SetReplyTarget {
        message_id: String,
    },
    ClearReplyTarget,

    // View
    ScrollChanged {
        metrics: ScrollMetrics,
    },

    // UI
    ClearToast,
}

impl AppAction {
    /// Log-safe action tag (never includes tokens or message bodies).
    pub fn tag(&self) -> &'static str {
        match self {
            // Session
            AppAction::StartSession { .. } => "StartSession",
            AppAction::EndSession => "EndSession",

            // Conversations
            AppAction::RefreshConversations => "RefreshConversations",
            AppAction::OpenConversation { .. } => "OpenConversation",
            AppAction::CloseConversation => "CloseConversation",
            AppAction::JoinConversation { .. } => "JoinConversation",
            AppAction::LeaveConversation { .. } => "LeaveConversation",

            // Messages
            AppAction::SendMessage { .. } => "SendMessage",
            AppAction::SendImage { .. } => "SendImage",
            AppAction::SendVoiceNote { .. } => "SendVoiceNote",
            AppAction::RetryMessage { .. } => "RetryMessage",
            AppAction::DiscardMessage { .. } => "DiscardMessage",
            AppAction::ReactToMessage { .. } => "ReactToMessage",
            AppAction::DeleteMessage { .. } => "DeleteMessage",
            AppAction::SetReplyTarget { .. } => "SetReplyTarget",
            AppAction::ClearReplyTarget => "ClearReplyTarget",

            // View
            AppAction::ScrollChanged { .. } => "ScrollChanged",

            // UI
            AppAction::ClearToast => "ClearToast",
        }
    }

    /// High-frequency actions that should not be logged at info level.
    pub(crate) fn is_noisy(&self) -> bool {
        matches!(self, AppAction::ScrollChanged { .. })
    }
}
