use crate::core::{ApiError, ServerMessage};
use crate::state::{AppState, ConversationSummary};
use crate::AppAction;

#[derive(uniffi::Enum, Clone, Debug)]
#[allow(clippy::large_enum_variant)] // uniffi enums cannot use Box<T> indirection
pub enum AppUpdate {
    /// Primary update stream: always send a full state snapshot.
    FullState(AppState),
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
    Shutdown,
}

#[derive(Debug)]
pub enum InternalEvent {
    // Conversation list
    ConversationsFetched {
        result: Result<Vec<ConversationSummary>, ApiError>,
    },
    MembershipChanged {
        conversation_id: String,
        joined: bool,
        result: Result<(), ApiError>,
    },

    // Sync loop. `token` identifies the active conversation that scheduled the work;
    // anything carrying a stale token is dropped.
    PollTick {
        conversation_id: String,
        token: u64,
    },
    FollowUpSync {
        conversation_id: String,
        token: u64,
    },
    MessagesFetched {
        conversation_id: String,
        token: u64,
        near_bottom: bool,
        result: Result<Vec<ServerMessage>, ApiError>,
    },

    // Async results. `session` is the generation of the session that made the
    // request; results from an ended session are dropped.
    SendMessageResult {
        session: u64,
        conversation_id: String,
        temp_id: String,
        result: Result<ServerMessage, ApiError>,
    },
    ReactionResult {
        session: u64,
        conversation_id: String,
        message_id: String,
        emoji: String,
        result: Result<(), ApiError>,
    },
    MessageDeleted {
        session: u64,
        conversation_id: String,
        message_id: String,
        result: Result<(), ApiError>,
    },

    Toast(String),
    ToastAutoDismiss {
        token: u64,
    },
}
