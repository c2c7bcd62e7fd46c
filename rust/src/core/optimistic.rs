// Local-first sends and reactions: mutate the store, emit, then talk to the server.

use super::*;
use crate::state::{ChatMessage, MessageDeliveryState, MessageKind, ReplySnapshot, now_millis};

/// Raw bytes held until the upload succeeds, so a retry can resend them.
#[derive(Debug, Clone)]
pub(super) struct PendingUpload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub filename: String,
}

pub(super) struct OutgoingDraft {
    pub content: String,
    pub kind: MessageKind,
    pub media_ref: Option<String>,
    pub media_duration_secs: Option<u32>,
    pub reply_to_message_id: Option<String>,
    pub upload: Option<PendingUpload>,
}

pub(super) struct ReactionJob {
    conversation_id: String,
    message_id: String,
    body: ReactBody,
}

/// Drains reaction requests sequentially so the server sees them in the order
/// they were made. Ends when the session (and with it the sender) goes away.
pub(super) fn spawn_reaction_worker(
    runtime: &tokio::runtime::Runtime,
    api: Arc<dyn ChatApi>,
    session: u64,
    core_sender: Sender<CoreMsg>,
) -> Sender<ReactionJob> {
    let (tx, rx) = flume::unbounded::<ReactionJob>();
    runtime.spawn(async move {
        while let Ok(job) = rx.recv_async().await {
            let result = api.react(&job.message_id, &job.body).await;
            let _ = core_sender.send(CoreMsg::Internal(Box::new(InternalEvent::ReactionResult {
                session,
                conversation_id: job.conversation_id,
                message_id: job.message_id,
                emoji: job.body.emoji,
                result,
            })));
        }
    });
    tx
}

fn request_body(message: &ChatMessage, awaiting_upload: bool) -> NewMessageBody {
    NewMessageBody {
        content: message.content.clone(),
        message_type: message.kind.as_wire().to_string(),
        // The local preview is never sent; the upload URL replaces it.
        media_url: if awaiting_upload {
            None
        } else {
            message.media_ref.clone()
        },
        media_duration: message.media_duration_secs,
        reply_to_message_id: message.reply_target.as_ref().map(|r| r.message_id.clone()),
        client_message_id: Some(message.id.clone()),
    }
}

impl AppCore {
    /// Posting needs a session and membership of the target conversation.
    fn can_post(&mut self, conversation_id: &str) -> bool {
        if !self.is_logged_in() {
            self.toast("Please sign in first");
            return false;
        }
        let is_member = self
            .state
            .conversations
            .iter()
            .find(|c| c.conversation_id == conversation_id)
            .map(|c| c.is_member);
        match is_member {
            Some(true) => true,
            Some(false) => {
                self.toast("Join this group to take part");
                false
            }
            None => {
                self.toast("Conversation not found");
                false
            }
        }
    }

    /// Strictly increasing so back-to-back sends keep their order.
    fn next_outgoing_ms(&mut self) -> i64 {
        let ts = now_millis().max(self.last_outgoing_ms + 1);
        self.last_outgoing_ms = ts;
        ts
    }

    fn resolve_reply_target(
        &self,
        conversation_id: &str,
        reply_to_message_id: Option<&str>,
    ) -> Option<ReplySnapshot> {
        if let Some(id) = reply_to_message_id {
            let target = self
                .stores
                .get(conversation_id)
                .and_then(|s| s.get(id))
                .filter(|m| !m.is_unconfirmed())
                .map(ChatMessage::reply_snapshot);
            if target.is_none() {
                tracing::debug!(%conversation_id, message_id = %id, "reply target not found; sending without it");
            }
            return target;
        }
        self.state
            .current_conversation
            .as_ref()
            .filter(|v| v.conversation_id == conversation_id)
            .and_then(|v| v.reply_target.clone())
    }

    pub(super) fn send_message(&mut self, conversation_id: String, draft: OutgoingDraft) {
        if !self.can_post(&conversation_id) {
            return;
        }
        let Some(author) = self.session.as_ref().map(|s| s.user.clone()) else {
            return;
        };
        let content = draft.content.trim().to_string();
        if content.is_empty() && draft.media_ref.is_none() {
            tracing::debug!(%conversation_id, "ignoring empty message");
            return;
        }

        let reply_target =
            self.resolve_reply_target(&conversation_id, draft.reply_to_message_id.as_deref());
        let temp_id = format!("{TEMP_ID_PREFIX}{}", uuid::Uuid::new_v4());
        let message = ChatMessage {
            id: temp_id.clone(),
            content,
            kind: draft.kind,
            media_ref: draft.media_ref,
            media_duration_secs: draft.media_duration_secs,
            created_at_ms: self.next_outgoing_ms(),
            status: Some(MessageDeliveryState::Pending),
            author,
            is_mine: true,
            reply_target,
            reactions: Vec::new(),
        };
        let body = request_body(&message, draft.upload.is_some());
        tracing::info!(
            %conversation_id,
            %temp_id,
            kind = body.message_type.as_str(),
            "send (optimistic)"
        );

        self.stores
            .entry(conversation_id.clone())
            .or_default()
            .insert_optimistic(message);
        if let Some(upload) = draft.upload.clone() {
            self.pending_uploads.insert(temp_id.clone(), upload);
        }
        if let Some(view) = self
            .state
            .current_conversation
            .as_mut()
            .filter(|v| v.conversation_id == conversation_id)
        {
            view.reply_target = None;
        }
        self.publish_store(&conversation_id, self.scroll_guard.should_auto_scroll());
        self.spawn_send(conversation_id, temp_id, body, draft.upload);
    }

    pub(super) fn send_image(
        &mut self,
        conversation_id: String,
        data_base64: &str,
        mime_type: String,
        filename: String,
        caption: String,
        reply_to_message_id: Option<String>,
    ) {
        let image = match media::decode_image(data_base64, &mime_type) {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(%e, %conversation_id, "image rejected");
                self.toast(e.user_message());
                return;
            }
        };
        self.send_message(
            conversation_id,
            OutgoingDraft {
                content: caption,
                kind: MessageKind::Image,
                media_ref: Some(image.preview_ref),
                media_duration_secs: None,
                reply_to_message_id,
                upload: Some(PendingUpload {
                    bytes: image.bytes,
                    mime_type,
                    filename,
                }),
            },
        );
    }

    pub(super) fn send_voice_note(
        &mut self,
        conversation_id: String,
        data_base64: &str,
        mime_type: &str,
        duration_secs: u32,
        reply_to_message_id: Option<String>,
    ) {
        let media_ref = match media::embed_voice_note(data_base64, mime_type) {
            Ok(media_ref) => media_ref,
            Err(e) => {
                tracing::warn!(%e, %conversation_id, "voice note rejected");
                self.toast(e.user_message());
                return;
            }
        };
        self.send_message(
            conversation_id,
            OutgoingDraft {
                content: String::new(),
                kind: MessageKind::Voice,
                media_ref: Some(media_ref),
                media_duration_secs: Some(duration_secs),
                reply_to_message_id,
                upload: None,
            },
        );
    }

    fn spawn_send(
        &mut self,
        conversation_id: String,
        temp_id: String,
        body: NewMessageBody,
        upload: Option<PendingUpload>,
    ) {
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let api = sess.api.clone();
        let me = sess.user.id.clone();
        let session = sess.generation;
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = async {
                let mut body = body;
                if let Some(upload) = upload {
                    let url = api
                        .upload_media(upload.bytes, &upload.mime_type, &upload.filename)
                        .await?;
                    body.media_url = Some(url);
                }
                let wire = api.create_message(&conversation_id, &body).await?;
                Ok::<_, ApiError>(ServerMessage::from_wire(wire, &me))
            }
            .await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::SendMessageResult {
                    session,
                    conversation_id,
                    temp_id,
                    result,
                },
            )));
        });
    }

    pub(super) fn handle_send_result(
        &mut self,
        conversation_id: String,
        temp_id: String,
        result: Result<ServerMessage, ApiError>,
    ) {
        let Some(store) = self.stores.get_mut(&conversation_id) else {
            tracing::debug!(%conversation_id, %temp_id, "send result after session teardown");
            return;
        };
        match result {
            Ok(server) => {
                tracing::info!(
                    %conversation_id,
                    %temp_id,
                    message_id = %server.message.id,
                    "send confirmed"
                );
                store.confirm_send(&temp_id, server.message, now_millis());
                self.pending_uploads.remove(&temp_id);
                self.publish_store(&conversation_id, self.scroll_guard.should_auto_scroll());
                self.schedule_follow_up_syncs(&conversation_id, self.config.send_follow_up_delays());
            }
            Err(e) => {
                tracing::warn!(%e, %conversation_id, %temp_id, "send failed");
                if store.mark_failed(&temp_id, e.user_message()) {
                    self.publish_store(&conversation_id, self.scroll_guard.should_auto_scroll());
                }
            }
        }
    }

    /// Resend a failed message under its original temporary id.
    pub(super) fn retry_message(&mut self, conversation_id: String, message_id: String) {
        if !self.can_post(&conversation_id) {
            return;
        }
        let Some(message) = self
            .stores
            .get_mut(&conversation_id)
            .and_then(|s| s.mark_retrying(&message_id))
        else {
            tracing::debug!(%conversation_id, %message_id, "nothing to retry");
            return;
        };
        let upload = self.pending_uploads.get(&message_id).cloned();
        let body = request_body(&message, upload.is_some());
        tracing::info!(%conversation_id, %message_id, "retry send");
        self.publish_store(&conversation_id, self.scroll_guard.should_auto_scroll());
        self.spawn_send(conversation_id, message_id, body, upload);
    }

    pub(super) fn discard_message(&mut self, conversation_id: &str, message_id: &str) {
        let removed = self
            .stores
            .get_mut(conversation_id)
            .is_some_and(|s| s.discard_unconfirmed(message_id));
        if !removed {
            tracing::debug!(%conversation_id, %message_id, "discard ignored");
            return;
        }
        self.pending_uploads.remove(message_id);
        self.publish_store(conversation_id, self.scroll_guard.should_auto_scroll());
    }

    pub(super) fn react_to_message(
        &mut self,
        conversation_id: String,
        message_id: String,
        emoji: String,
    ) {
        if !self.can_post(&conversation_id) {
            return;
        }
        let emoji = emoji.trim().to_string();
        if emoji.is_empty() {
            return;
        }
        let Some(me) = self.my_user_id() else {
            return;
        };
        let unconfirmed = self
            .stores
            .get(&conversation_id)
            .and_then(|s| s.get(&message_id))
            .map(ChatMessage::is_unconfirmed);
        match unconfirmed {
            None => {
                tracing::debug!(%conversation_id, %message_id, "reaction on unknown message");
                return;
            }
            Some(true) => {
                tracing::debug!(%conversation_id, %message_id, "reaction on unsent message rejected");
                return;
            }
            Some(false) => {}
        }

        let expires_at_ms = now_millis() + self.config.reaction_overlay_ttl_ms();
        let Some(action) = self
            .stores
            .get_mut(&conversation_id)
            .and_then(|s| s.apply_reaction(&message_id, &me, &emoji, expires_at_ms))
        else {
            return;
        };
        tracing::info!(%conversation_id, %message_id, %emoji, ?action, "react (optimistic)");
        self.publish_store(&conversation_id, self.scroll_guard.should_auto_scroll());

        if let Some(sess) = self.session.as_ref() {
            let job = ReactionJob {
                conversation_id: conversation_id.clone(),
                message_id,
                body: ReactBody { emoji, action },
            };
            if sess.reactions.send(job).is_err() {
                tracing::warn!(%conversation_id, "reaction worker gone; relying on next sync");
            }
        }
        // Whatever the request outcome, the next syncs settle the overlay.
        self.schedule_follow_up_syncs(&conversation_id, self.config.reaction_follow_up_delays());
    }

    /// A rejected reaction stops overriding server state, so the next sync
    /// shows what the server holds.
    pub(super) fn handle_reaction_result(
        &mut self,
        conversation_id: String,
        message_id: String,
        emoji: String,
        result: Result<(), ApiError>,
    ) {
        let e = match result {
            Ok(()) => {
                tracing::debug!(%conversation_id, %message_id, %emoji, "reaction accepted");
                return;
            }
            Err(e) => e,
        };
        tracing::warn!(%e, %conversation_id, %message_id, %emoji, "reaction request failed");
        let Some(me) = self.my_user_id() else {
            return;
        };
        if let Some(store) = self.stores.get_mut(&conversation_id) {
            store.forget_pending_reaction(&message_id, &me, &emoji);
        }
    }

    pub(super) fn delete_message(&mut self, conversation_id: String, message_id: String) {
        let Some((api, session)) = self.session.as_ref().map(|s| (s.api.clone(), s.generation))
        else {
            self.toast("Please sign in first");
            return;
        };
        let unconfirmed = self
            .stores
            .get(&conversation_id)
            .and_then(|s| s.get(&message_id))
            .map(ChatMessage::is_unconfirmed);
        if unconfirmed == Some(true) {
            self.discard_message(&conversation_id, &message_id);
            return;
        }

        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = api.delete_message(&conversation_id, &message_id).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::MessageDeleted {
                session,
                conversation_id,
                message_id,
                result,
            })));
        });
    }

    pub(super) fn handle_message_deleted(
        &mut self,
        conversation_id: String,
        message_id: String,
        result: Result<(), ApiError>,
    ) {
        match result {
            Ok(()) => {
                tracing::info!(%conversation_id, %message_id, "message deleted");
                let removed = self
                    .stores
                    .get_mut(&conversation_id)
                    .is_some_and(|s| s.remove(&message_id));
                if removed {
                    self.publish_store(&conversation_id, self.scroll_guard.should_auto_scroll());
                }
            }
            Err(e) => {
                tracing::warn!(%e, %conversation_id, %message_id, "delete failed");
                self.toast(format!("Couldn't delete message: {}", e.user_message()));
            }
        }
    }

    pub(super) fn set_reply_target(&mut self, message_id: &str) {
        let Some(view) = self.state.current_conversation.as_mut() else {
            return;
        };
        let target = self
            .stores
            .get(&view.conversation_id)
            .and_then(|s| s.get(message_id))
            .filter(|m| !m.is_unconfirmed())
            .map(ChatMessage::reply_snapshot);
        if target.is_none() {
            tracing::debug!(%message_id, "reply target unavailable");
            return;
        }
        view.reply_target = target;
        self.emit_state();
    }

    pub(super) fn clear_reply_target(&mut self) {
        let cleared = self
            .state
            .current_conversation
            .as_mut()
            .is_some_and(|v| v.reply_target.take().is_some());
        if cleared {
            self.emit_state();
        }
    }
}
