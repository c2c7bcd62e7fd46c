use std::collections::HashSet;
use std::time::{Duration, Instant};

use edu_chat_core::{ChatApi, HttpChatApi, NewMessageBody, ServerMessage};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let usage = "usage: chat_probe <api_base_url> [conversation_id] [--token T] [--user ID] [--send TEXT] [--watch SECS]";
    let mut args = std::env::args().skip(1);
    let base_url = args.next().ok_or_else(|| anyhow::anyhow!(usage))?;

    let mut conversation_id: Option<String> = None;
    let mut token: Option<String> = None;
    let mut user = String::from("probe");
    let mut send: Option<String> = None;
    let mut watch = Duration::from_secs(0);
    while let Some(a) = args.next() {
        match a.as_str() {
            "--token" => {
                token = Some(
                    args.next()
                        .ok_or_else(|| anyhow::anyhow!("--token requires a value"))?,
                );
            }
            "--user" => {
                user = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--user requires a value"))?;
            }
            "--send" => {
                send = Some(
                    args.next()
                        .ok_or_else(|| anyhow::anyhow!("--send requires text"))?,
                );
            }
            "--watch" => {
                let n = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--watch requires seconds"))?;
                watch = Duration::from_secs(n.parse()?);
            }
            other if !other.starts_with("--") && conversation_id.is_none() => {
                conversation_id = Some(other.to_string());
            }
            other => return Err(anyhow::anyhow!("unknown arg: {other}")),
        }
    }

    let api = HttpChatApi::new(
        reqwest::Client::new(),
        base_url.trim_end_matches('/').to_string(),
        token,
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let started = Instant::now();
        let conversations = api.list_conversations().await?;
        println!(
            "conversations: {} ({} ms)",
            conversations.len(),
            started.elapsed().as_millis()
        );
        for c in &conversations {
            println!(
                "  {} {:?} member={} unread={}",
                c.id, c.name, c.is_member, c.unread_count
            );
        }

        let Some(conversation_id) = conversation_id else {
            return Ok(());
        };

        let mut seen: HashSet<String> = HashSet::new();
        print_new(&api, &conversation_id, &user, &mut seen).await?;

        if let Some(text) = send {
            let client_id = format!("temp-{}", uuid::Uuid::new_v4());
            let body = NewMessageBody {
                content: text,
                message_type: "text".into(),
                media_url: None,
                media_duration: None,
                reply_to_message_id: None,
                client_message_id: Some(client_id.clone()),
            };
            let sent_at = Instant::now();
            let created = api.create_message(&conversation_id, &body).await?;
            println!(
                "sent id={} echo_client_id={} ({} ms)",
                created.id,
                created.client_message_id.as_deref() == Some(client_id.as_str()),
                sent_at.elapsed().as_millis()
            );
        }

        let deadline = Instant::now() + watch;
        while Instant::now() < deadline {
            tokio::time::sleep(Duration::from_secs(3)).await;
            if let Err(e) = print_new(&api, &conversation_id, &user, &mut seen).await {
                tracing::warn!(%e, "poll failed");
            }
        }
        Ok::<(), anyhow::Error>(())
    })?;

    Ok(())
}

async fn print_new(
    api: &HttpChatApi,
    conversation_id: &str,
    me: &str,
    seen: &mut HashSet<String>,
) -> anyhow::Result<()> {
    let started = Instant::now();
    let messages = api.list_messages(conversation_id).await?;
    let mut fresh = 0usize;
    for wire in messages {
        let m = ServerMessage::from_wire(wire, me).message;
        if !seen.insert(m.id.clone()) {
            continue;
        }
        fresh += 1;
        let reactions: Vec<String> = m
            .reactions
            .iter()
            .map(|r| format!("{}x{}", r.emoji, r.user_ids.len()))
            .collect();
        println!(
            "  [{}] {} ({:?}) {}: {} {}",
            m.created_at_ms,
            m.id,
            m.kind,
            m.author.display_name,
            m.content,
            reactions.join(" ")
        );
    }
    println!(
        "poll: {fresh} new, {} total ({} ms)",
        seen.len(),
        started.elapsed().as_millis()
    );
    Ok(())
}
