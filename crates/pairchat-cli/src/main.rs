//! Pairchat CLI
//!
//! Thin wrapper around pairchat-core for command-line usage.
//!
//! ## Usage
//!
//! ```bash
//! # Run a scripted two-user exchange over an in-memory store
//! pairchat demo
//!
//! # Same, with custom display names and messages
//! pairchat demo --first-name Ana --second-name Bela \
//!     --first-message "oi" --second-message "tudo bem?"
//!
//! # Filter a JSON message log (array on stdin) to one conversation,
//! # printed newest first
//! cat log.json | pairchat filter u1 u2
//! ```

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tokio::time::timeout;

use pairchat_core::{
    Conversation, ConversationPair, MemoryStore, Session, SessionEvent, StoreKey, StoreRecord,
    User, UserId,
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Pairchat - two-party DM synchronization core
#[derive(Parser)]
#[command(name = "pairchat")]
#[command(version = "0.1.0")]
#[command(about = "Pairchat - two-party DM synchronization core")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted two-user exchange over a shared in-memory store
    Demo {
        /// Display name of the first user
        #[arg(long, default_value = "Alice")]
        first_name: String,

        /// Display name of the second user
        #[arg(long, default_value = "Bob")]
        second_name: String,

        /// Message sent by the first user
        #[arg(long, default_value = "hi")]
        first_message: String,

        /// Message sent by the second user
        #[arg(long, default_value = "yo")]
        second_message: String,
    },

    /// Filter a JSON message log (array on stdin) to one conversation
    Filter {
        /// First uid of the pair
        a: String,
        /// Second uid of the pair
        b: String,
    },
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();
}

/// Wait until the session's directory reaches `count` users
async fn wait_for_directory(
    events: &mut broadcast::Receiver<SessionEvent>,
    count: usize,
) -> Result<()> {
    timeout(EVENT_TIMEOUT, async {
        loop {
            match events.recv().await? {
                SessionEvent::DirectoryChanged { user_count } if user_count >= count => {
                    return anyhow::Ok(())
                }
                SessionEvent::SyncError { context, message } => {
                    anyhow::bail!("{} sync failed: {}", context, message)
                }
                _ => {}
            }
        }
    })
    .await
    .context("timed out waiting for directory")?
}

/// Wait until the session's conversation view reaches `count` messages
async fn wait_for_conversation(
    events: &mut broadcast::Receiver<SessionEvent>,
    count: usize,
) -> Result<()> {
    timeout(EVENT_TIMEOUT, async {
        loop {
            match events.recv().await? {
                SessionEvent::ConversationChanged { message_count, .. }
                    if message_count >= count =>
                {
                    return anyhow::Ok(())
                }
                SessionEvent::SyncError { context, message } => {
                    anyhow::bail!("{} sync failed: {}", context, message)
                }
                _ => {}
            }
        }
    })
    .await
    .context("timed out waiting for conversation")?
}

async fn run_demo(
    first_name: String,
    second_name: String,
    first_message: String,
    second_message: String,
) -> Result<()> {
    tracing::info!(%first_name, %second_name, "Starting demo exchange");

    let store = Arc::new(MemoryStore::new());

    let mut first = Session::new(store.clone());
    let mut second = Session::new(store);
    let mut first_events = first.subscribe_events();
    let mut second_events = second.subscribe_events();

    first.sign_in(User::new("u1", &first_name, "first@example.com"))?;
    second.sign_in(User::new("u2", &second_name, "second@example.com"))?;

    wait_for_directory(&mut first_events, 1).await?;
    wait_for_directory(&mut second_events, 1).await?;

    println!("Directory as seen by {}:", first_name);
    for user in first.directory() {
        println!("  {} <{}> ({})", user.display_name, user.email, user.uid);
    }

    first.select_peer("u2".into())?;
    second.select_peer("u1".into())?;

    first.send_message(&first_message)?;
    wait_for_conversation(&mut second_events, 1).await?;

    second.send_message(&second_message)?;
    wait_for_conversation(&mut first_events, 2).await?;
    wait_for_conversation(&mut second_events, 2).await?;

    println!("\nConversation (newest first):");
    for msg in first.conversation_newest_first() {
        let name = if msg.from_uid.as_str() == "u1" {
            &first_name
        } else {
            &second_name
        };
        println!("  {}: {}", name, msg.body);
    }

    first.sign_out();
    second.sign_out();
    Ok(())
}

fn run_filter(a: String, b: String) -> Result<()> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("failed to read stdin")?;

    let values: Vec<serde_json::Value> =
        serde_json::from_str(&input).context("stdin is not a JSON array")?;

    // Array position stands in for the store append key
    let snapshot: Vec<StoreRecord> = values
        .into_iter()
        .enumerate()
        .map(|(i, value)| StoreRecord {
            key: StoreKey::new(format!("{:08}", i)),
            value,
        })
        .collect();

    let pair = ConversationPair::new(UserId::new(a), UserId::new(b));
    let view = Conversation::rebuild(pair, &snapshot);

    for msg in view.newest_first() {
        println!("{} -> {}: {}", msg.from_uid, msg.to_uid, msg.body);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    match cli.command {
        Commands::Demo {
            first_name,
            second_name,
            first_message,
            second_message,
        } => run_demo(first_name, second_name, first_message, second_message).await,
        Commands::Filter { a, b } => run_filter(a, b),
    }
}
