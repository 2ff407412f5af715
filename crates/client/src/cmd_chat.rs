//! `dispatchlink chat trip|order <id>`: hold one conversation from the terminal.

use std::sync::Arc;

use dispatchlink::{
    ClientConfig, ConversationController, ConversationEvent, IdentityProvider, RealtimeClient,
    SurfaceState,
};
use dispatchlink_protocol::{ChatMessage, ConversationKey};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

#[derive(Debug, PartialEq, Eq)]
enum ChatInput {
    Send(String),
    Minimize,
    Open,
    Close,
    Quit,
    Ignore,
}

fn parse_input(line: &str) -> ChatInput {
    let trimmed = line.trim();
    match trimmed {
        "" => ChatInput::Ignore,
        "/min" | "/minimize" => ChatInput::Minimize,
        "/open" => ChatInput::Open,
        "/close" => ChatInput::Close,
        "/quit" | "/exit" => ChatInput::Quit,
        _ => ChatInput::Send(trimmed.to_string()),
    }
}

pub async fn run(
    config: &ClientConfig,
    identity: Arc<dyn IdentityProvider>,
    key: ConversationKey,
) -> anyhow::Result<()> {
    let client = RealtimeClient::start(config, identity);

    // The conversation stays usable over REST even without the push channel.
    if let Err(e) = client.connect().await {
        warn!(
            component = "cli",
            event = "cli.connect.failed",
            error = %e,
            "Push connection unavailable"
        );
        println!("  Push connection unavailable ({e}); history refreshes on your own actions only.");
    }

    let conversation = client.open_conversation(key, SurfaceState::OpenExpanded);
    let mut events = conversation.subscribe();
    println!("  Conversation {key}. Type to send; /min /open /close /quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => show_event(&conversation, event),
                Err(RecvError::Lagged(_)) => show_history(&conversation.snapshot().messages),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_input(&line) {
                    ChatInput::Send(content) => {
                        if let Err(e) = conversation.send(content).await {
                            println!("  Send failed: {e}");
                        }
                    }
                    ChatInput::Minimize => {
                        conversation.minimize().await;
                    }
                    ChatInput::Open => {
                        conversation.open().await;
                    }
                    ChatInput::Close => {
                        conversation.close().await;
                    }
                    ChatInput::Quit => break,
                    ChatInput::Ignore => {}
                }
            }
        }
    }

    conversation.unmount();
    client.shutdown().await;
    Ok(())
}

fn show_event(conversation: &ConversationController, event: ConversationEvent) {
    let snapshot = conversation.snapshot();
    match event {
        ConversationEvent::MessagesReplaced { .. } => {
            if snapshot.surface.is_expanded() {
                show_history(&snapshot.messages);
            }
        }
        ConversationEvent::UnreadChanged { .. } => {
            if let Some(badge) = snapshot.surface.badge() {
                println!("  [{badge} unread]");
            }
        }
        ConversationEvent::SurfaceChanged { state } => println!("  ({})", surface_label(state)),
        ConversationEvent::FetchFailed { error } => println!("  Could not load history: {error}"),
    }
}

fn show_history(messages: &[ChatMessage]) {
    println!("{}", render_history(messages));
}

fn render_history(messages: &[ChatMessage]) -> String {
    if messages.is_empty() {
        return "  -- no messages yet --".to_string();
    }
    let mut out = String::from("  -- history --");
    for m in messages {
        out.push_str(&format!(
            "\n  {} {} ({}): {}",
            m.created_at, m.sender_username, m.sender_role, m.content
        ));
    }
    out
}

fn surface_label(state: SurfaceState) -> &'static str {
    match state {
        SurfaceState::Closed => "closed",
        SurfaceState::OpenExpanded => "open",
        SurfaceState::OpenMinimized => "minimized",
    }
}
