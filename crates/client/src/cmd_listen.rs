//! `dispatchlink listen`: follow the notification feed.

use std::sync::Arc;

use dispatchlink::{ClientConfig, ConnectionState, IdentityProvider, RealtimeClient};
use dispatchlink_protocol::{Notification, Severity};
use tracing::{info, warn};

pub async fn run(config: &ClientConfig, identity: Arc<dyn IdentityProvider>) -> anyhow::Result<()> {
    let client = RealtimeClient::start(config, identity);
    let center = client.notification_center(config.notification_capacity);
    client.bus().add_listener(|notification| {
        println!("{}", format_line(notification));
        Ok(())
    });

    println!("  Connecting to {} ...", config.ws_url);
    let mut state_rx = client.watch_state();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            client.shutdown().await;
            return Ok(());
        }
        result = connect_with_retry(&client, config) => result,
    }
    println!("  Connected. Waiting for notifications (Ctrl-C to quit).");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *state_rx.borrow_and_update();
                match state {
                    ConnectionState::Disconnected => println!("  Connection lost, retrying ..."),
                    ConnectionState::Connected => println!("  Reconnected."),
                    ConnectionState::Connecting => {}
                }
            }
        }
    }

    info!(
        component = "cli",
        event = "cli.listen.stopped",
        received = center.len(),
        unread = center.unread_count(),
        "Listen stopped"
    );
    println!();
    println!("  {} notification(s) received this session.", center.len());
    client.shutdown().await;
    Ok(())
}

/// Keep trying until the first connection is up; afterwards the manager reconnects on its own.
async fn connect_with_retry(client: &RealtimeClient, config: &ClientConfig) {
    loop {
        match client.connect().await {
            Ok(()) => return,
            Err(e) => {
                warn!(
                    component = "cli",
                    event = "cli.connect.failed",
                    error = %e,
                    "Initial connect failed"
                );
                println!(
                    "  Connect failed: {e}. Retrying in {}s ...",
                    config.reconnect_delay.as_secs()
                );
                tokio::time::sleep(config.reconnect_delay).await;
            }
        }
    }
}

fn format_line(notification: &Notification) -> String {
    let mut line = format!(
        "[{}] {:<10} {:<7} {}",
        notification.timestamp,
        notification.notification_type.as_str(),
        severity_label(notification.severity),
        notification.title
    );
    if !notification.message.is_empty() {
        line.push_str(" - ");
        line.push_str(&notification.message);
    }
    if let Some(key) = notification.conversation() {
        line.push_str(&format!(" ({key})"));
    }
    line
}

fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "info",
        Severity::Success => "success",
        Severity::Warning => "warning",
        Severity::Error => "error",
    }
}
