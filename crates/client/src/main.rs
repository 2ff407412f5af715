//! Dispatchlink CLI
//!
//! Terminal front-end for the realtime client: follow the notification feed
//! or hold a trip/order conversation.

mod cmd_chat;
mod cmd_listen;
mod cmd_status;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dispatchlink::{ClientConfig, DataDir, FileConfig, Identity, Overrides, SessionIdentity};
use dispatchlink_protocol::ConversationKey;

#[derive(Parser)]
#[command(name = "dispatchlink")]
#[command(version)]
#[command(about = "Realtime notifications and conversations for the logistics console", long_about = None)]
struct Cli {
    /// Data directory (config.toml, logs)
    #[arg(long, global = true, env = "DISPATCHLINK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Push endpoint, e.g. ws://localhost:8080/ws
    #[arg(long, global = true, env = "DISPATCHLINK_WS_URL")]
    ws_url: Option<String>,

    /// REST base URL for conversation history
    #[arg(long, global = true, env = "DISPATCHLINK_API_URL")]
    api_url: Option<String>,

    /// Console role of the signed-in user (DISPATCHER or ADMIN)
    #[arg(long, global = true, env = "DISPATCHLINK_ROLE", default_value = "DISPATCHER")]
    role: String,

    /// Bearer token for the push handshake and REST calls
    #[arg(long, global = true, env = "DISPATCHLINK_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect and print every notification as it arrives
    Listen,

    /// Open a conversation; type to send, /min /open /close /quit to drive the window
    Chat {
        #[command(subcommand)]
        target: ChatTarget,
    },

    /// Show resolved configuration and data paths
    Status,
}

#[derive(Subcommand)]
enum ChatTarget {
    /// Conversation attached to a trip
    Trip { id: i64 },
    /// Conversation attached to an order
    Order { id: i64 },
}

impl ChatTarget {
    fn key(&self) -> ConversationKey {
        match self {
            ChatTarget::Trip { id } => ConversationKey::trip(*id),
            ChatTarget::Order { id } => ConversationKey::order(*id),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let file_config = FileConfig::load(&data_dir.config_path())?;
    let config = ClientConfig::resolve(
        file_config,
        Overrides {
            ws_url: cli.ws_url.clone(),
            api_url: cli.api_url.clone(),
        },
    );

    if let Command::Status = cli.command {
        return cmd_status::run(&data_dir, &config, &cli.role, cli.token.is_some());
    }

    data_dir.ensure()?;
    let _logging = logging::init_logging(&data_dir.log_dir())?;

    let identity = Arc::new(SessionIdentity::new(Some(Identity::new(
        cli.role.clone(),
        cli.token.clone(),
    ))));

    match &cli.command {
        Command::Listen => cmd_listen::run(&config, identity).await,
        Command::Chat { target } => cmd_chat::run(&config, identity, target.key()).await,
        Command::Status => Ok(()),
    }
}
