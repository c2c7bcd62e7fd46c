mod api;
mod config;
mod media;
mod optimistic;
mod poller;
mod reconcile;
mod scroll;
mod session;
mod store;

#[cfg(test)]
mod test_support;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use flume::Sender;

use crate::actions::AppAction;
use crate::state::{AppState, ChatUser, ScrollDirective};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};

pub use api::{
    ApiError, ChatApi, HttpChatApi, NewMessageBody, ReactBody, ReactionAction, ServerMessage,
    SharedChatApi, WireConversation, WireLastMessage, WireMessage, WireReaction, WireReply,
    WireUser,
};
pub use media::{voice_playback, VoicePlayback};

use optimistic::OutgoingDraft;
use poller::ActiveConversation;
use scroll::ScrollGuard;
use store::MessageStore;

/// Prefix of locally generated ids for messages the server has not created yet.
pub(crate) const TEMP_ID_PREFIX: &str = "temp-";

struct Session {
    user: ChatUser,
    api: Arc<dyn ChatApi>,
    generation: u64,
    // Reaction requests go out one at a time, in the order the user made them.
    reactions: Sender<optimistic::ReactionJob>,
}

pub struct AppCore {
    pub state: AppState,
    rev: u64,
    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,
    chat_api_override: SharedChatApi,
    config: config::AppConfig,
    runtime: tokio::runtime::Runtime,
    http_client: reqwest::Client,
    session: Option<Session>,
    active: Option<ActiveConversation>,
    next_active_token: u64,
    next_session_generation: u64,
    // Per conversation, so unconfirmed work survives switching away and back.
    stores: HashMap<String, MessageStore>,
    pending_uploads: HashMap<String, optimistic::PendingUpload>,
    last_outgoing_ms: i64,
    scroll_guard: ScrollGuard,
    scroll_token: u64,
    toast_dismiss_token: u64,
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<AppState>>,
        chat_api_override: SharedChatApi,
    ) -> Self {
        let config = config::load_app_config(&data_dir);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .worker_threads(2)
            .build()
            .expect("tokio runtime");
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("edu_chat_core/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "http client builder failed; using defaults");
                reqwest::Client::new()
            });
        let scroll_guard = ScrollGuard::new(config.near_bottom_threshold_px());

        tracing::info!(
            data_dir = %data_dir,
            api_configured = config.api_base_url().is_some(),
            poll_interval_ms = config.poll_interval().as_millis() as u64,
            "core init"
        );

        let this = Self {
            state: AppState::empty(),
            rev: 0,
            update_sender,
            core_sender,
            shared_state,
            chat_api_override,
            config,
            runtime,
            http_client,
            session: None,
            active: None,
            next_active_token: 0,
            next_session_generation: 0,
            stores: HashMap::new(),
            pending_uploads: HashMap::new(),
            last_outgoing_ms: 0,
            scroll_guard,
            scroll_token: 0,
            toast_dismiss_token: 0,
        };

        // Ensure ChatApp.state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        this
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(action) => self.handle_action(action),
            CoreMsg::Internal(event) => self.handle_internal(*event),
            // The actor loop exits before this reaches us.
            CoreMsg::Shutdown => {}
        }
    }

    fn is_logged_in(&self) -> bool {
        self.session.is_some()
    }

    /// True when `generation` belongs to the session that is signed in now.
    fn is_current_session(&self, generation: u64) -> bool {
        self.session.as_ref().is_some_and(|s| s.generation == generation)
    }

    fn my_user_id(&self) -> Option<String> {
        self.session.as_ref().map(|s| s.user.id.clone())
    }

    fn is_current(&self, conversation_id: &str) -> bool {
        self.state
            .current_conversation
            .as_ref()
            .is_some_and(|v| v.conversation_id == conversation_id)
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    /// Copy the conversation's store into the view if it is the one on screen.
    /// Emits only when the visible message list actually changed.
    fn publish_store(&mut self, conversation_id: &str, auto_scroll: bool) {
        let Some(view) = self
            .state
            .current_conversation
            .as_mut()
            .filter(|v| v.conversation_id == conversation_id)
        else {
            return;
        };
        let messages = self
            .stores
            .get(conversation_id)
            .map(|s| s.messages().to_vec())
            .unwrap_or_default();
        if view.messages == messages {
            return;
        }
        view.messages = messages;
        self.scroll_token += 1;
        view.scroll = ScrollDirective {
            token: self.scroll_token,
            action: ScrollGuard::action_for(auto_scroll),
        };
        self.emit_state();
    }

    fn toast(&mut self, msg: impl Into<String>) {
        self.state.toast = Some(msg.into());
        self.toast_dismiss_token = self.toast_dismiss_token.saturating_add(1);
        self.schedule_toast_auto_dismiss(self.toast_dismiss_token);
        self.emit_state();
    }

    fn schedule_toast_auto_dismiss(&self, token: u64) {
        let tx = self.core_sender.clone();
        let delay = self.config.toast_dismiss();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::ToastAutoDismiss { token },
            )));
        });
    }

    fn handle_toast_auto_dismiss(&mut self, token: u64) {
        if token != self.toast_dismiss_token {
            return;
        }
        if self.state.toast.is_some() {
            self.state.toast = None;
            self.emit_state();
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        if action.is_noisy() {
            tracing::trace!(action = action.tag(), "dispatch");
        } else {
            tracing::info!(action = action.tag(), "dispatch");
        }

        match action {
            // Session
            AppAction::StartSession {
                user_id,
                display_name,
                avatar_url,
                auth_token,
            } => {
                let user = ChatUser {
                    id: user_id,
                    display_name,
                    avatar_url,
                };
                if let Err(e) = self.start_session(user, auth_token) {
                    tracing::error!(err = %format!("{e:#}"), "start_session failed");
                    self.toast(format!("Sign-in failed: {e:#}"));
                }
            }
            AppAction::EndSession => {
                self.stop_session();
                self.emit_state();
            }

            // Conversations
            AppAction::RefreshConversations => self.refresh_conversations(),
            AppAction::OpenConversation { conversation_id } => {
                self.open_conversation(conversation_id)
            }
            AppAction::CloseConversation => {
                self.close_conversation();
                self.emit_state();
            }
            AppAction::JoinConversation { conversation_id } => {
                self.change_membership(conversation_id, true)
            }
            AppAction::LeaveConversation { conversation_id } => {
                self.change_membership(conversation_id, false)
            }

            // Messages
            AppAction::SendMessage {
                conversation_id,
                content,
                kind,
                media_ref,
                media_duration_secs,
                reply_to_message_id,
            } => self.send_message(
                conversation_id,
                OutgoingDraft {
                    content,
                    kind,
                    media_ref,
                    media_duration_secs,
                    reply_to_message_id,
                    upload: None,
                },
            ),
            AppAction::SendImage {
                conversation_id,
                data_base64,
                mime_type,
                filename,
                caption,
                reply_to_message_id,
            } => self.send_image(
                conversation_id,
                &data_base64,
                mime_type,
                filename,
                caption,
                reply_to_message_id,
            ),
            AppAction::SendVoiceNote {
                conversation_id,
                data_base64,
                mime_type,
                duration_secs,
                reply_to_message_id,
            } => self.send_voice_note(
                conversation_id,
                &data_base64,
                &mime_type,
                duration_secs,
                reply_to_message_id,
            ),
            AppAction::RetryMessage {
                conversation_id,
                message_id,
            } => self.retry_message(conversation_id, message_id),
            AppAction::DiscardMessage {
                conversation_id,
                message_id,
            } => self.discard_message(&conversation_id, &message_id),
            AppAction::ReactToMessage {
                conversation_id,
                message_id,
                emoji,
            } => self.react_to_message(conversation_id, message_id, emoji),
            AppAction::DeleteMessage {
                conversation_id,
                message_id,
            } => self.delete_message(conversation_id, message_id),
            AppAction::SetReplyTarget { message_id } => self.set_reply_target(&message_id),
            AppAction::ClearReplyTarget => self.clear_reply_target(),

            // View
            AppAction::ScrollChanged { metrics } => {
                if self.state.current_conversation.is_some() {
                    self.scroll_guard.observe(metrics);
                }
            }

            // UI
            AppAction::ClearToast => {
                if self.state.toast.take().is_some() {
                    self.emit_state();
                }
            }
        }
    }

    fn handle_internal(&mut self, event: InternalEvent) {
        match event {
            InternalEvent::ConversationsFetched { result } => {
                self.handle_conversations_fetched(result)
            }
            InternalEvent::MembershipChanged {
                conversation_id,
                joined,
                result,
            } => self.handle_membership_changed(conversation_id, joined, result),
            InternalEvent::PollTick {
                conversation_id,
                token,
            }
            | InternalEvent::FollowUpSync {
                conversation_id,
                token,
            } => self.begin_sync(conversation_id, token),
            InternalEvent::MessagesFetched {
                conversation_id,
                token,
                near_bottom,
                result,
            } => self.handle_messages_fetched(conversation_id, token, near_bottom, result),
            InternalEvent::SendMessageResult {
                session,
                conversation_id,
                temp_id,
                result,
            } => {
                if !self.is_current_session(session) {
                    tracing::debug!(%conversation_id, %temp_id, "send result from an ended session");
                    return;
                }
                self.handle_send_result(conversation_id, temp_id, result)
            }
            InternalEvent::ReactionResult {
                session,
                conversation_id,
                message_id,
                emoji,
                result,
            } => {
                if !self.is_current_session(session) {
                    tracing::debug!(%message_id, %emoji, "reaction result from an ended session");
                    return;
                }
                self.handle_reaction_result(conversation_id, message_id, emoji, result)
            }
            InternalEvent::MessageDeleted {
                session,
                conversation_id,
                message_id,
                result,
            } => {
                if !self.is_current_session(session) {
                    tracing::debug!(%conversation_id, %message_id, "delete result from an ended session");
                    return;
                }
                self.handle_message_deleted(conversation_id, message_id, result)
            }
            InternalEvent::Toast(msg) => self.toast(msg),
            InternalEvent::ToastAutoDismiss { token } => self.handle_toast_auto_dismiss(token),
        }
    }
}
