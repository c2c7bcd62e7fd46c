//! Merging a freshly fetched server message list into local state.
//!
//! Server data is authoritative for confirmed content and reactions, but a pass
//! must never erase local work the server has not echoed back yet: pending and
//! failed sends survive until their echo is matched, and reaction edits made in
//! the last few seconds are layered over whatever the server reported.

use std::collections::{HashMap, HashSet};

use super::api::ServerMessage;
use super::store::{pending_groups, sort_messages, PendingReactions};
use crate::state::{ChatMessage, MessageDeliveryState, ReactionGroup};

#[derive(Debug, Clone, Copy)]
pub(crate) struct ReconcileContext<'a> {
    pub my_user_id: &'a str,
    pub now_ms: i64,
    /// How far apart an optimistic copy and a content-matched echo may be.
    pub echo_match_window_ms: i64,
}

/// Union of server and local reaction sets, one emoji per user.
///
/// Seeded from `server`; every user in `local` is moved onto their local emoji
/// (a user holding a local edit is dropped from the other emojis). Emojis left
/// with no users are removed.
pub(crate) fn merge_reactions(
    server: &[ReactionGroup],
    local: &[ReactionGroup],
) -> Vec<ReactionGroup> {
    let mut merged: Vec<ReactionGroup> = server.to_vec();
    for l in local {
        for user in &l.user_ids {
            for g in merged.iter_mut().filter(|g| g.emoji != l.emoji) {
                g.user_ids.retain(|u| u != user);
            }
        }
        let group = match merged.iter().position(|g| g.emoji == l.emoji) {
            Some(i) => &mut merged[i],
            None => {
                merged.push(ReactionGroup {
                    emoji: l.emoji.clone(),
                    user_ids: vec![],
                });
                let last = merged.len() - 1;
                &mut merged[last]
            }
        };
        for user in &l.user_ids {
            if !group.user_ids.contains(user) {
                group.user_ids.push(user.clone());
            }
        }
    }
    merged.retain(|g| !g.user_ids.is_empty());
    merged
}

pub(crate) fn reconcile(
    previous: &[ChatMessage],
    pending_reactions: &PendingReactions,
    fetched: Vec<ServerMessage>,
    ctx: &ReconcileContext<'_>,
) -> (Vec<ChatMessage>, PendingReactions) {
    let unconfirmed: Vec<&ChatMessage> = previous.iter().filter(|m| m.is_unconfirmed()).collect();
    let temp_ids: HashSet<&str> = unconfirmed.iter().map(|m| m.id.as_str()).collect();
    let known_ids: HashSet<&str> = previous.iter().map(|m| m.id.as_str()).collect();

    // Server entries colliding with a temporary id, and duplicate ids within the
    // response, are dropped.
    let mut seen: HashSet<String> = HashSet::new();
    let fetched: Vec<ServerMessage> = fetched
        .into_iter()
        .filter(|s| !temp_ids.contains(s.message.id.as_str()))
        .filter(|s| seen.insert(s.message.id.clone()))
        .collect();

    let replaced = match_echoes(&unconfirmed, &fetched, &known_ids, ctx);

    let server_reactions: HashMap<&str, &[ReactionGroup]> = fetched
        .iter()
        .map(|s| (s.message.id.as_str(), s.message.reactions.as_slice()))
        .collect();
    let next_pending: PendingReactions = pending_reactions
        .iter()
        .filter_map(|(id, edits)| {
            let server = *server_reactions.get(id.as_str())?;
            let live: Vec<_> = edits
                .iter()
                .filter(|p| p.expires_at_ms > ctx.now_ms)
                .filter(|p| !server_has(server, &p.emoji, &p.user_id))
                .cloned()
                .collect();
            (!live.is_empty()).then(|| (id.clone(), live))
        })
        .collect();

    let mut next: Vec<ChatMessage> = unconfirmed
        .into_iter()
        .filter(|m| !replaced.contains(m.id.as_str()))
        .cloned()
        .collect();

    for s in fetched {
        let mut m = s.message;
        m.is_mine = m.author.id == ctx.my_user_id;
        m.status = m.is_mine.then_some(MessageDeliveryState::Sent);
        let local = pending_groups(&next_pending, &m.id, ctx.now_ms);
        if !local.is_empty() {
            m.reactions = merge_reactions(&m.reactions, &local);
        }
        next.push(m);
    }

    sort_messages(&mut next);
    (next, next_pending)
}

/// Temporary ids whose server echo is present in `fetched`.
///
/// An echo is matched by the client message id the server hands back, or failing
/// that by author, kind and content within the echo window. Only server messages
/// new to this store qualify, and each can stand in for one optimistic copy.
fn match_echoes<'a>(
    unconfirmed: &[&'a ChatMessage],
    fetched: &[ServerMessage],
    known_ids: &HashSet<&str>,
    ctx: &ReconcileContext<'_>,
) -> HashSet<&'a str> {
    let mut claimed = vec![false; fetched.len()];
    let mut replaced: HashSet<&'a str> = HashSet::new();

    for u in unconfirmed {
        let hit = fetched.iter().enumerate().position(|(i, s)| {
            !claimed[i]
                && !known_ids.contains(s.message.id.as_str())
                && s.client_message_id.as_deref() == Some(u.id.as_str())
        });
        if let Some(i) = hit {
            claimed[i] = true;
            replaced.insert(u.id.as_str());
        }
    }

    for u in unconfirmed {
        if replaced.contains(u.id.as_str()) {
            continue;
        }
        let hit = fetched.iter().enumerate().position(|(i, s)| {
            !claimed[i]
                && !known_ids.contains(s.message.id.as_str())
                && s.client_message_id.is_none()
                && s.message.author.id == ctx.my_user_id
                && s.message.kind == u.kind
                && s.message.content == u.content
                && (s.message.created_at_ms - u.created_at_ms).abs() <= ctx.echo_match_window_ms
        });
        if let Some(i) = hit {
            claimed[i] = true;
            replaced.insert(u.id.as_str());
        }
    }

    replaced
}

fn server_has(server: &[ReactionGroup], emoji: &str, user_id: &str) -> bool {
    server
        .iter()
        .any(|g| g.emoji == emoji && g.user_ids.iter().any(|u| u == user_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::test_util::{message, pending};
    use crate::core::store::{MessageStore, PendingReaction};

    const ME: &str = "me";
    const WINDOW: i64 = 120_000;

    fn ctx(now_ms: i64) -> ReconcileContext<'static> {
        ReconcileContext {
            my_user_id: ME,
            now_ms,
            echo_match_window_ms: WINDOW,
        }
    }

    fn server(m: ChatMessage) -> ServerMessage {
        ServerMessage {
            message: m,
            client_message_id: None,
        }
    }

    fn group(emoji: &str, users: &[&str]) -> ReactionGroup {
        ReactionGroup {
            emoji: emoji.to_string(),
            user_ids: users.iter().map(|u| u.to_string()).collect(),
        }
    }

    fn with_reactions(mut m: ChatMessage, reactions: Vec<ReactionGroup>) -> ChatMessage {
        m.reactions = reactions;
        m
    }

    fn ids(messages: &[ChatMessage]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    fn run(
        previous: &[ChatMessage],
        pending: &PendingReactions,
        fetched: Vec<ServerMessage>,
        now_ms: i64,
    ) -> (Vec<ChatMessage>, PendingReactions) {
        reconcile(previous, pending, fetched, &ctx(now_ms))
    }

    #[test]
    fn merge_unions_server_and_local_sets() {
        let merged = merge_reactions(&[group("👍", &["userA"])], &[group("❤️", &["userB"])]);
        assert_eq!(merged, vec![group("👍", &["userA"]), group("❤️", &["userB"])]);
    }

    #[test]
    fn merge_appends_local_user_to_existing_emoji() {
        let merged = merge_reactions(&[group("👍", &["a"])], &[group("👍", &["b", "a"])]);
        assert_eq!(merged, vec![group("👍", &["a", "b"])]);
    }

    #[test]
    fn merge_moves_local_user_off_stale_emoji() {
        let merged = merge_reactions(&[group("👍", &["me", "a"])], &[group("❤️", &["me"])]);
        assert_eq!(merged, vec![group("👍", &["a"]), group("❤️", &["me"])]);

        let merged = merge_reactions(&[group("👍", &["me"])], &[group("❤️", &["me"])]);
        assert_eq!(merged, vec![group("❤️", &["me"])], "emptied emoji is dropped");
    }

    #[test]
    fn merge_without_local_edits_is_identity() {
        let snapshot = vec![group("👍", &["a", "b"]), group("🎉", &["c"])];
        assert_eq!(merge_reactions(&snapshot, &[]), snapshot);
    }

    #[test]
    fn result_is_sorted_by_created_at() {
        let previous = vec![pending("temp-1", ME, "draft", 25)];
        let fetched = vec![
            server(message("3", "ann", "c", 30)),
            server(message("1", "bo", "a", 10)),
            server(message("2", "ann", "b", 20)),
        ];
        let (next, _) = run(&previous, &PendingReactions::new(), fetched, 0);
        assert_eq!(ids(&next), vec!["1", "2", "temp-1", "3"]);
        assert!(next.windows(2).all(|w| w[0].created_at_ms <= w[1].created_at_ms));
    }

    #[test]
    fn unconfirmed_messages_survive_repeated_passes() {
        let mut failed = pending("temp-2", ME, "lost", 40);
        failed.status = Some(MessageDeliveryState::Failed {
            reason: "offline".into(),
        });
        let mut store = vec![pending("temp-1", ME, "waiting", 30), failed];
        let mut pending_reactions = PendingReactions::new();

        for round in 0..5 {
            let fetched = vec![
                server(message("1", "ann", "hi", 10)),
                server(message(&format!("x{round}"), "bo", "noise", 20 + round)),
            ];
            let (next, p) = run(&store, &pending_reactions, fetched, 0);
            store = next;
            pending_reactions = p;
            assert!(store.iter().any(|m| m.id == "temp-1"));
            assert!(store.iter().any(|m| m.id == "temp-2"));
        }
        assert!(matches!(
            store.iter().find(|m| m.id == "temp-2").and_then(|m| m.status.clone()),
            Some(MessageDeliveryState::Failed { .. })
        ));
    }

    #[test]
    fn own_echo_replaces_pending_copy() {
        let previous = vec![pending("temp-1", ME, "hello", 1_000)];
        let fetched = vec![server(message("42", ME, "hello", 1_300))];
        let (next, _) = run(&previous, &PendingReactions::new(), fetched, 0);

        assert_eq!(ids(&next), vec!["42"]);
        assert_eq!(next[0].status, Some(MessageDeliveryState::Sent));
        assert!(next[0].is_mine);
    }

    #[test]
    fn client_message_id_echo_matches_despite_edited_content() {
        let previous = vec![pending("temp-1", ME, "  hello ", 1_000)];
        let fetched = vec![ServerMessage {
            message: message("42", ME, "hello", 900_000),
            client_message_id: Some("temp-1".into()),
        }];
        let (next, _) = run(&previous, &PendingReactions::new(), fetched, 0);
        assert_eq!(ids(&next), vec!["42"]);
    }

    #[test]
    fn echo_outside_window_does_not_match() {
        let previous = vec![pending("temp-1", ME, "hello", 0)];
        let fetched = vec![server(message("42", ME, "hello", WINDOW + 1))];
        let (next, _) = run(&previous, &PendingReactions::new(), fetched, 0);
        assert_eq!(ids(&next), vec!["temp-1", "42"]);
    }

    #[test]
    fn known_server_message_does_not_swallow_a_repeat_send() {
        let mut confirmed = message("42", ME, "ok", 1_000);
        confirmed.status = Some(MessageDeliveryState::Sent);
        let previous = vec![confirmed.clone(), pending("temp-2", ME, "ok", 2_000)];
        let fetched = vec![server(message("42", ME, "ok", 1_000))];
        let (next, _) = run(&previous, &PendingReactions::new(), fetched, 0);
        assert_eq!(ids(&next), vec!["42", "temp-2"]);
    }

    #[test]
    fn other_users_identical_text_is_not_an_echo() {
        let previous = vec![pending("temp-1", ME, "hello", 1_000)];
        let fetched = vec![server(message("7", "ann", "hello", 1_100))];
        let (next, _) = run(&previous, &PendingReactions::new(), fetched, 0);
        assert_eq!(ids(&next), vec!["temp-1", "7"]);
        assert_eq!(next[1].status, None);
        assert!(!next[1].is_mine);
    }

    #[test]
    fn one_echo_matches_one_pending_copy() {
        let previous = vec![
            pending("temp-1", ME, "ok", 1_000),
            pending("temp-2", ME, "ok", 1_001),
        ];
        let fetched = vec![server(message("42", ME, "ok", 1_100))];
        let (next, _) = run(&previous, &PendingReactions::new(), fetched, 0);
        assert_eq!(ids(&next), vec!["temp-2", "42"]);
    }

    #[test]
    fn server_entry_colliding_with_temp_id_is_dropped() {
        let previous = vec![pending("temp-1", ME, "hello", 1_000)];
        let fetched = vec![
            server(message("temp-1", ME, "hello", 1_000)),
            server(message("1", "ann", "hi", 500)),
        ];
        let (next, _) = run(&previous, &PendingReactions::new(), fetched, 0);
        assert_eq!(ids(&next), vec!["1", "temp-1"]);
        assert_eq!(next[1].status, Some(MessageDeliveryState::Pending));
    }

    #[test]
    fn same_snapshot_twice_gives_same_reactions() {
        let previous = vec![message("m", "ann", "hi", 10)];
        let snapshot = vec![server(with_reactions(
            message("m", "ann", "hi", 10),
            vec![group("👍", &["a", "b"]), group("😂", &["c"])],
        ))];
        let (first, p1) = run(&previous, &PendingReactions::new(), snapshot.clone(), 0);
        let (second, _) = run(&first, &p1, snapshot, 0);
        assert_eq!(first[0].reactions, second[0].reactions);
        assert_eq!(first, second);
    }

    #[test]
    fn local_reaction_survives_a_snapshot_that_predates_it() {
        let mut store = MessageStore::default();
        store.insert_optimistic(with_reactions(
            message("m", "ann", "hi", 10),
            vec![group("👍", &["userA"])],
        ));
        store.apply_reaction("m", "userB", "❤️", 5_000);

        let stale = vec![server(with_reactions(
            message("m", "ann", "hi", 10),
            vec![group("👍", &["userA"])],
        ))];
        let next = store.reconciled(stale, &ctx(1_000));
        assert_eq!(
            next.get("m").expect("m").reactions,
            vec![group("👍", &["userA"]), group("❤️", &["userB"])]
        );
        assert_eq!(next.pending_reactions()["m"].len(), 1);
    }

    #[test]
    fn confirmed_edit_leaves_the_overlay() {
        let mut pending_reactions = PendingReactions::new();
        pending_reactions.insert(
            "m".into(),
            vec![PendingReaction {
                emoji: "❤️".into(),
                user_id: ME.into(),
                expires_at_ms: 10_000,
            }],
        );
        let previous = vec![with_reactions(
            message("m", "ann", "hi", 10),
            vec![group("❤️", &[ME])],
        )];
        let fetched = vec![server(with_reactions(
            message("m", "ann", "hi", 10),
            vec![group("❤️", &[ME])],
        ))];
        let (next, p) = run(&previous, &pending_reactions, fetched, 0);
        assert!(p.is_empty());
        assert_eq!(next[0].reactions, vec![group("❤️", &[ME])]);
    }

    #[test]
    fn expired_edit_yields_to_server_truth() {
        let mut pending_reactions = PendingReactions::new();
        pending_reactions.insert(
            "m".into(),
            vec![PendingReaction {
                emoji: "❤️".into(),
                user_id: ME.into(),
                expires_at_ms: 100,
            }],
        );
        let previous = vec![with_reactions(
            message("m", "ann", "hi", 10),
            vec![group("❤️", &[ME])],
        )];
        let fetched = vec![server(message("m", "ann", "hi", 10))];
        let (next, p) = run(&previous, &pending_reactions, fetched, 200);
        assert!(p.is_empty());
        assert!(next[0].reactions.is_empty());
    }

    #[test]
    fn stale_snapshot_can_resurrect_a_removed_reaction_until_next_poll() {
        let mut store = MessageStore::default();
        store.insert_optimistic(with_reactions(
            message("m", "ann", "hi", 10),
            vec![group("👍", &[ME])],
        ));
        store.apply_reaction("m", ME, "👍", 10_000);
        assert!(store.get("m").expect("m").reactions.is_empty());

        // Response to a fetch issued before the removal.
        let stale = vec![server(with_reactions(
            message("m", "ann", "hi", 10),
            vec![group("👍", &[ME])],
        ))];
        let store = store.reconciled(stale, &ctx(0));
        assert_eq!(store.get("m").expect("m").reaction_of(ME), Some("👍"));

        let fresh = vec![server(message("m", "ann", "hi", 10))];
        let store = store.reconciled(fresh, &ctx(0));
        assert_eq!(store.get("m").expect("m").reaction_of(ME), None);
    }

    #[test]
    fn messages_missing_from_the_fetch_are_dropped_with_their_edits() {
        let mut store = MessageStore::default();
        store.insert_optimistic(message("gone", "ann", "deleted by a moderator", 10));
        store.apply_reaction("gone", ME, "👍", 10_000);
        let next = store.reconciled(vec![server(message("1", "bo", "hi", 20))], &ctx(0));
        assert_eq!(ids(next.messages()), vec!["1"]);
        assert!(next.pending_reactions().is_empty());
    }
}
