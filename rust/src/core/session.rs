// Session lifecycle, conversation list and membership.

use anyhow::{anyhow, Context};

use super::*;
use crate::state::{BusyState, ConversationSummary, ConversationViewState, ScrollAction, SessionState};

impl AppCore {
    pub(super) fn start_session(
        &mut self,
        user: ChatUser,
        auth_token: Option<String>,
    ) -> anyhow::Result<()> {
        // Tear down any existing session first.
        self.stop_session();

        if user.id.trim().is_empty() {
            return Err(anyhow!("user id is empty"));
        }

        let api: Arc<dyn ChatApi> = match self.chat_api_override() {
            Some(api) => api,
            None => {
                let base_url = self
                    .config
                    .api_base_url()
                    .ok_or(ApiError::NotConfigured)
                    .with_context(|| {
                        format!(
                            "set api_base_url in {} or EDU_CHAT_API_URL",
                            config::CONFIG_FILE_NAME
                        )
                    })?;
                Arc::new(HttpChatApi::new(
                    self.http_client.clone(),
                    base_url,
                    auth_token,
                ))
            }
        };

        tracing::info!(user_id = %user.id, "start_session");
        self.state.session = SessionState::SignedIn { user: user.clone() };
        self.next_session_generation += 1;
        let generation = self.next_session_generation;
        let reactions = optimistic::spawn_reaction_worker(
            &self.runtime,
            api.clone(),
            generation,
            self.core_sender.clone(),
        );
        self.session = Some(Session {
            user,
            api,
            generation,
            reactions,
        });
        self.emit_state();
        self.refresh_conversations();
        Ok(())
    }

    pub(super) fn stop_session(&mut self) {
        if let Some(sess) = self.session.take() {
            tracing::info!(user_id = %sess.user.id, "stop_session");
        }
        self.close_conversation();
        self.stores.clear();
        self.pending_uploads.clear();
        self.state.session = SessionState::SignedOut;
        self.state.conversations.clear();
        self.state.busy = BusyState::idle();
    }

    fn chat_api_override(&self) -> Option<Arc<dyn ChatApi>> {
        match self.chat_api_override.read() {
            Ok(slot) => slot.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub(super) fn refresh_conversations(&mut self) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let api = sess.api.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = api
                .list_conversations()
                .await
                .map(|list| list.into_iter().map(|c| c.into_summary()).collect());
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::ConversationsFetched { result },
            )));
        });
        if !self.state.busy.loading_conversations {
            self.state.busy.loading_conversations = true;
            self.emit_state();
        }
    }

    pub(super) fn handle_conversations_fetched(
        &mut self,
        result: Result<Vec<ConversationSummary>, ApiError>,
    ) {
        if !self.is_logged_in() {
            return;
        }
        self.state.busy.loading_conversations = false;
        let mut conversations = match result {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(%e, "list conversations failed");
                self.toast(format!("Couldn't load groups: {}", e.user_message()));
                return;
            }
        };
        tracing::debug!(count = conversations.len(), "conversations fetched");

        // The open conversation has been read up to now.
        let current = self
            .state
            .current_conversation
            .as_ref()
            .map(|v| v.conversation_id.clone());
        if let Some(current) = current.as_deref() {
            if let Some(c) = conversations
                .iter_mut()
                .find(|c| c.conversation_id == current)
            {
                c.unread_count = 0;
            }
        }
        self.state.conversations = conversations;

        if let Some(current) = current {
            match self.summary(&current).cloned() {
                Some(summary) => self.sync_view_with_summary(&summary),
                None => {
                    tracing::info!(conversation_id = %current, "open conversation disappeared");
                    self.close_conversation();
                }
            }
        }
        self.emit_state();
    }

    fn summary(&self, conversation_id: &str) -> Option<&ConversationSummary> {
        self.state
            .conversations
            .iter()
            .find(|c| c.conversation_id == conversation_id)
    }

    /// Keep the open view's metadata and poller in line with the list entry.
    fn sync_view_with_summary(&mut self, summary: &ConversationSummary) {
        let Some(view) = self.state.current_conversation.as_mut() else {
            return;
        };
        if view.conversation_id != summary.conversation_id {
            return;
        }
        view.name = summary.name.clone();
        view.description = summary.description.clone();
        view.members = summary.members.clone();
        let was_member = view.is_member;
        view.is_member = summary.is_member;

        let polling = self
            .active
            .as_ref()
            .is_some_and(|a| a.conversation_id() == summary.conversation_id);
        if summary.is_member && !polling {
            self.start_polling(&summary.conversation_id);
        } else if !summary.is_member && (polling || was_member) {
            self.stop_polling();
        }
    }

    pub(super) fn open_conversation(&mut self, conversation_id: String) {
        if !self.is_logged_in() {
            self.toast("Please sign in first");
            return;
        }
        if self.is_current(&conversation_id) {
            return;
        }
        let Some(summary) = self.summary(&conversation_id).cloned() else {
            self.toast("Conversation not found");
            return;
        };

        self.close_conversation();
        self.scroll_token += 1;
        let messages = self
            .stores
            .entry(conversation_id.clone())
            .or_default()
            .messages()
            .to_vec();
        self.state.current_conversation = Some(ConversationViewState {
            conversation_id: conversation_id.clone(),
            name: summary.name,
            description: summary.description,
            is_member: summary.is_member,
            members: summary.members,
            messages,
            reply_target: None,
            scroll: ScrollDirective {
                token: self.scroll_token,
                action: ScrollAction::ToBottom { smooth: false },
            },
        });
        if let Some(c) = self
            .state
            .conversations
            .iter_mut()
            .find(|c| c.conversation_id == conversation_id)
        {
            c.unread_count = 0;
        }
        if summary.is_member {
            self.start_polling(&conversation_id);
        } else {
            tracing::info!(%conversation_id, "not a member; read-only preview without sync");
        }
        self.emit_state();
    }

    /// Leaves the conversation view; callers emit.
    pub(super) fn close_conversation(&mut self) {
        self.stop_polling();
        self.scroll_guard.reset();
        self.state.current_conversation = None;
    }

    pub(super) fn change_membership(&mut self, conversation_id: String, join: bool) {
        let Some(sess) = self.session.as_ref() else {
            self.toast("Please sign in first");
            return;
        };
        if self.state.busy.membership_change.is_some() {
            tracing::debug!(%conversation_id, "membership change already in flight");
            return;
        }
        let api = sess.api.clone();
        let tx = self.core_sender.clone();
        let cid = conversation_id.clone();
        self.runtime.spawn(async move {
            let result = if join {
                api.join(&cid).await
            } else {
                api.leave(&cid).await
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::MembershipChanged {
                conversation_id: cid,
                joined: join,
                result,
            })));
        });
        self.state.busy.membership_change = Some(conversation_id);
        self.emit_state();
    }

    pub(super) fn handle_membership_changed(
        &mut self,
        conversation_id: String,
        joined: bool,
        result: Result<(), ApiError>,
    ) {
        self.state.busy.membership_change = None;
        if !self.is_logged_in() {
            return;
        }
        if let Err(e) = result {
            tracing::warn!(%e, %conversation_id, joined, "membership change failed");
            let verb = if joined { "join" } else { "leave" };
            self.toast(format!("Couldn't {verb} group: {}", e.user_message()));
            return;
        }

        tracing::info!(%conversation_id, joined, "membership changed");
        let mut updated = None;
        if let Some(c) = self
            .state
            .conversations
            .iter_mut()
            .find(|c| c.conversation_id == conversation_id)
        {
            c.is_member = joined;
            updated = Some(c.clone());
        }
        if let Some(summary) = updated {
            self.sync_view_with_summary(&summary);
        }
        self.emit_state();
        // Member lists changed on the server.
        self.refresh_conversations();
    }
}
