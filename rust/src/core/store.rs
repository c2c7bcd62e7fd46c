// Message store for the open conversation + the overlay of unconfirmed reaction edits.

use std::collections::HashMap;

use super::api::{ReactionAction, ServerMessage};
use super::reconcile::{merge_reactions, reconcile, ReconcileContext};
use crate::state::{ChatMessage, MessageDeliveryState, ReactionGroup};

/// A reaction the local user added that the server has not echoed back yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingReaction {
    pub emoji: String,
    pub user_id: String,
    pub expires_at_ms: i64,
}

pub(crate) type PendingReactions = HashMap<String, Vec<PendingReaction>>; // message_id -> edits

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct MessageStore {
    messages: Vec<ChatMessage>,
    pending_reactions: PendingReactions,
}

impl MessageStore {
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn insert_optimistic(&mut self, msg: ChatMessage) {
        self.messages.retain(|m| m.id != msg.id);
        self.messages.push(msg);
        sort_messages(&mut self.messages);
    }

    /// Swap the optimistic copy `temp_id` for the server-created message.
    pub fn confirm_send(&mut self, temp_id: &str, mut confirmed: ChatMessage, now_ms: i64) {
        confirmed.status = Some(MessageDeliveryState::Sent);
        confirmed.reactions = merge_reactions(
            &confirmed.reactions,
            &pending_groups(&self.pending_reactions, &confirmed.id, now_ms),
        );

        let temp_pos = self.messages.iter().position(|m| m.id == temp_id);
        let existing_pos = self
            .messages
            .iter()
            .position(|m| m.id == confirmed.id && m.id != temp_id);

        match (temp_pos, existing_pos) {
            // A poll already brought the server copy in; keep that one.
            (Some(tp), Some(ep)) => {
                self.messages[ep].status = Some(MessageDeliveryState::Sent);
                self.messages.remove(tp);
            }
            (None, Some(ep)) => {
                self.messages[ep].status = Some(MessageDeliveryState::Sent);
            }
            (Some(tp), None) => {
                self.messages[tp] = confirmed;
            }
            (None, None) => {
                // The optimistic copy was discarded while the request was in flight.
                // The server has it now, so it comes back as sent.
                tracing::debug!(%temp_id, message_id = %confirmed.id, "discarded message was delivered");
                self.messages.push(confirmed);
            }
        }
        sort_messages(&mut self.messages);
    }

    /// Returns false when the message is no longer in the store.
    pub fn mark_failed(&mut self, temp_id: &str, reason: String) -> bool {
        match self.messages.iter_mut().find(|m| m.id == temp_id) {
            Some(m) if m.is_unconfirmed() => {
                m.status = Some(MessageDeliveryState::Failed { reason });
                true
            }
            _ => false,
        }
    }

    /// Flip a failed message back to pending for a resend.
    pub fn mark_retrying(&mut self, id: &str) -> Option<ChatMessage> {
        let m = self.messages.iter_mut().find(|m| m.id == id)?;
        if !matches!(m.status, Some(MessageDeliveryState::Failed { .. })) {
            return None;
        }
        m.status = Some(MessageDeliveryState::Pending);
        Some(m.clone())
    }

    /// Explicit user removal; only unconfirmed messages can be discarded.
    pub fn discard_unconfirmed(&mut self, id: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| !(m.id == id && m.is_unconfirmed()));
        before != self.messages.len()
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != id);
        self.pending_reactions.remove(id);
        before != self.messages.len()
    }

    /// Optimistically toggle `user_id`'s reaction on a message and return the
    /// action to send to the server. `None` if the message is unknown.
    pub fn apply_reaction(
        &mut self,
        message_id: &str,
        user_id: &str,
        emoji: &str,
        expires_at_ms: i64,
    ) -> Option<ReactionAction> {
        let msg = self.messages.iter_mut().find(|m| m.id == message_id)?;
        let toggled_off = msg.reaction_of(user_id) == Some(emoji);

        remove_user(&mut msg.reactions, user_id);
        let edits = self
            .pending_reactions
            .entry(message_id.to_string())
            .or_default();
        edits.retain(|p| p.user_id != user_id);

        if toggled_off {
            if edits.is_empty() {
                self.pending_reactions.remove(message_id);
            }
            return Some(ReactionAction::Remove);
        }

        add_user(&mut msg.reactions, emoji, user_id);
        edits.push(PendingReaction {
            emoji: emoji.to_string(),
            user_id: user_id.to_string(),
            expires_at_ms,
        });
        Some(ReactionAction::Add)
    }

    /// Drop the unconfirmed edit `user_id` made with `emoji`. The visible list
    /// is left alone; the next reconcile takes the server's reactions.
    pub fn forget_pending_reaction(&mut self, message_id: &str, user_id: &str, emoji: &str) -> bool {
        let Some(edits) = self.pending_reactions.get_mut(message_id) else {
            return false;
        };
        let before = edits.len();
        edits.retain(|p| !(p.user_id == user_id && p.emoji == emoji));
        let removed = before != edits.len();
        if edits.is_empty() {
            self.pending_reactions.remove(message_id);
        }
        removed
    }

    /// Next store snapshot after a fetch; `self` is left untouched.
    pub fn reconciled(&self, fetched: Vec<ServerMessage>, ctx: &ReconcileContext<'_>) -> Self {
        let (messages, pending_reactions) =
            reconcile(&self.messages, &self.pending_reactions, fetched, ctx);
        Self {
            messages,
            pending_reactions,
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_reactions(&self) -> &PendingReactions {
        &self.pending_reactions
    }
}

/// Stable: equal timestamps keep their arrival order.
pub(crate) fn sort_messages(messages: &mut [ChatMessage]) {
    messages.sort_by_key(|m| m.created_at_ms);
}

/// Live (unexpired) edits for one message, grouped by emoji.
pub(crate) fn pending_groups(
    pending: &PendingReactions,
    message_id: &str,
    now_ms: i64,
) -> Vec<ReactionGroup> {
    let mut groups: Vec<ReactionGroup> = Vec::new();
    let Some(edits) = pending.get(message_id) else {
        return groups;
    };
    for p in edits.iter().filter(|p| p.expires_at_ms > now_ms) {
        add_user(&mut groups, &p.emoji, &p.user_id);
    }
    groups
}

fn remove_user(groups: &mut Vec<ReactionGroup>, user_id: &str) {
    for g in groups.iter_mut() {
        g.user_ids.retain(|u| u != user_id);
    }
    groups.retain(|g| !g.user_ids.is_empty());
}

fn add_user(groups: &mut Vec<ReactionGroup>, emoji: &str, user_id: &str) {
    match groups.iter_mut().find(|g| g.emoji == emoji) {
        Some(g) => {
            if !g.user_ids.iter().any(|u| u == user_id) {
                g.user_ids.push(user_id.to_string());
            }
        }
        None => groups.push(ReactionGroup {
            emoji: emoji.to_string(),
            user_ids: vec![user_id.to_string()],
        }),
    }
}
