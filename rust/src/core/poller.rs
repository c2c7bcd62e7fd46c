// Periodic sync of the open conversation plus the one-shot follow-up syncs
// scheduled after sends and reactions.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::reconcile::ReconcileContext;
use super::*;
use crate::state::now_millis;

/// Background work bound to the open conversation. Dropping it aborts the
/// poll loop and every pending follow-up timer.
pub(super) struct ActiveConversation {
    conversation_id: String,
    token: u64,
    poll_task: Option<JoinHandle<()>>,
    timers: Vec<JoinHandle<()>>,
}

impl ActiveConversation {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    #[cfg(test)]
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    fn matches(&self, conversation_id: &str, token: u64) -> bool {
        self.token == token && self.conversation_id == conversation_id
    }
}

impl Drop for ActiveConversation {
    fn drop(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }
}

impl AppCore {
    pub(super) fn start_polling(&mut self, conversation_id: &str) {
        self.stop_polling();
        self.next_active_token = self.next_active_token.wrapping_add(1);
        let token = self.next_active_token;
        let period = self.config.poll_interval();

        let tx = self.core_sender.clone();
        let cid = conversation_id.to_string();
        let poll_task = self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                // First tick completes immediately.
                ticker.tick().await;
                let tick = InternalEvent::PollTick {
                    conversation_id: cid.clone(),
                    token,
                };
                if tx.send(CoreMsg::Internal(Box::new(tick))).is_err() {
                    break;
                }
            }
        });

        tracing::info!(
            %conversation_id,
            token,
            period_ms = period.as_millis() as u64,
            "poller started"
        );
        self.active = Some(ActiveConversation {
            conversation_id: conversation_id.to_string(),
            token,
            poll_task: Some(poll_task),
            timers: Vec::new(),
        });
    }

    pub(super) fn stop_polling(&mut self) {
        if let Some(active) = self.active.take() {
            tracing::info!(
                conversation_id = %active.conversation_id,
                token = active.token,
                "poller stopped"
            );
        }
    }

    fn is_active(&self, conversation_id: &str, token: u64) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.matches(conversation_id, token))
    }

    /// One-shot syncs so a confirmed change shows up before the next tick.
    pub(super) fn schedule_follow_up_syncs(&mut self, conversation_id: &str, delays: Vec<Duration>) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.conversation_id != conversation_id {
            return;
        }
        active.timers.retain(|t| !t.is_finished());
        for delay in delays {
            let tx = self.core_sender.clone();
            let follow_up = InternalEvent::FollowUpSync {
                conversation_id: active.conversation_id.clone(),
                token: active.token,
            };
            let timer = self.runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(CoreMsg::Internal(Box::new(follow_up)));
            });
            active.timers.push(timer);
        }
    }

    /// Snapshot the scroll guard, then fetch. The snapshot rides along with
    /// the result so the merge uses the position from before new content.
    pub(super) fn begin_sync(&mut self, conversation_id: String, token: u64) {
        if !self.is_active(&conversation_id, token) {
            tracing::trace!(%conversation_id, token, "stale sync trigger");
            return;
        }
        let Some(sess) = self.session.as_ref() else {
            return;
        };
        let near_bottom = self.scroll_guard.snapshot();
        let api = sess.api.clone();
        let me = sess.user.id.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let result = api.list_messages(&conversation_id).await.map(|list| {
                list.into_iter()
                    .map(|wire| ServerMessage::from_wire(wire, &me))
                    .collect()
            });
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::MessagesFetched {
                conversation_id,
                token,
                near_bottom,
                result,
            })));
        });
    }

    pub(super) fn handle_messages_fetched(
        &mut self,
        conversation_id: String,
        token: u64,
        near_bottom: bool,
        result: Result<Vec<ServerMessage>, ApiError>,
    ) {
        if !self.is_active(&conversation_id, token) {
            tracing::debug!(%conversation_id, token, "dropping fetch for inactive conversation");
            return;
        }
        let fetched = match result {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::warn!(%e, %conversation_id, "message sync failed; retrying next tick");
                return;
            }
        };
        let Some(me) = self.my_user_id() else {
            return;
        };

        let ctx = ReconcileContext {
            my_user_id: &me,
            now_ms: now_millis(),
            echo_match_window_ms: self.config.echo_match_window_ms(),
        };
        let store = self.stores.entry(conversation_id.clone()).or_default();
        let next = store.reconciled(fetched, &ctx);
        if next == *store {
            return;
        }
        tracing::debug!(%conversation_id, messages = next.len(), "sync applied");
        *store = next;
        self.publish_store(&conversation_id, near_bottom);
    }
}
