//! # murmur
//!
//! Terminal front end for the murmur messaging engine.  Every participant
//! points at the same SQLite file; conversations and messages written by one
//! process show up live in the others.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use murmur_client::{ChatSession, ClientConfig, Conversation, Timeline, TimelineEntry};
use murmur_shared::types::{UserId, UserProfile};
use murmur_store::SqliteStore;

/// End-to-end encrypted two-party chat over a shared store
#[derive(Parser, Debug)]
#[command(name = "murmur")]
#[command(version)]
struct Args {
    /// Your user id
    #[arg(short, long)]
    user: String,

    /// Your display name
    #[arg(long)]
    name: Option<String>,

    /// Your email address
    #[arg(long)]
    email: Option<String>,

    /// Database file (overrides MURMUR_DB_PATH)
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print your conversations once
    List,
    /// Print your conversations whenever they change
    Watch,
    /// Chat with a peer; each line on stdin is sent, `/sort` flips the order
    Chat {
        /// Peer user id
        peer: String,

        /// Peer display name, used when the conversation is created
        #[arg(long)]
        peer_name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    murmur_client::init_tracing();

    let mut config = ClientConfig::from_env();
    if let Some(path) = args.db.clone() {
        config.database_path = Some(path);
    }

    let store = match &config.database_path {
        Some(path) => SqliteStore::open(path, config.store_options())
            .with_context(|| format!("opening database at {}", path.display()))?,
        None => SqliteStore::open_default(config.store_options()).context("opening default database")?,
    };
    info!(user = %args.user, "Starting murmur v{}", env!("CARGO_PKG_VERSION"));

    let mut me = UserProfile::new(args.user.as_str());
    if let Some(name) = args.name {
        me = me.with_display_name(name);
    }
    if let Some(email) = args.email {
        me = me.with_email(email);
    }
    let session = ChatSession::new(Arc::new(store), me, &config);

    match args.command {
        Command::List => list(&session).await,
        Command::Watch => watch(&session).await,
        Command::Chat { peer, peer_name } => {
            let mut profile = UserProfile::new(peer);
            if let Some(name) = peer_name {
                profile = profile.with_display_name(name);
            }
            chat(&session, profile).await
        }
    }
}

async fn list(session: &ChatSession<SqliteStore>) -> anyhow::Result<()> {
    let mut live = session.live_conversations();
    if let Some(snapshot) = live.next().await {
        print_conversations(&session.me().id, &snapshot?);
    }
    Ok(())
}

async fn watch(session: &ChatSession<SqliteStore>) -> anyhow::Result<()> {
    let mut live = session.live_conversations();
    loop {
        tokio::select! {
            snapshot = live.next() => match snapshot {
                Some(snapshot) => print_conversations(&session.me().id, &snapshot?),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

async fn chat(session: &ChatSession<SqliteStore>, peer: UserProfile) -> anyhow::Result<()> {
    let mut feed = session.start_conversation_with(&peer).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            timeline = feed.next() => match timeline {
                Some(Ok(timeline)) => print_timeline(session, &timeline),
                Some(Err(e)) if e.is_missing_index() => {
                    return Err(e).context("message index missing; the database schema needs repair");
                }
                Some(Err(e)) => eprintln!("! {e}"),
                None => break,
            },
            line = lines.next_line() => match line? {
                Some(line) if line.trim() == "/sort" => {
                    let direction = session.toggle_sort();
                    println!("-- sorting {direction}");
                }
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    if let Err(e) = session.send(&line).await {
                        eprintln!("! send failed: {e}");
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.close();
    Ok(())
}

fn print_conversations(me: &UserId, conversations: &[Conversation]) {
    if conversations.is_empty() {
        println!("(no conversations)");
        return;
    }
    for conversation in conversations {
        let when = conversation
            .last_message_at
            .map(|ts| ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        let badge = if conversation.has_unread() {
            format!(" [{}]", conversation.unread_count)
        } else {
            String::new()
        };
        println!(
            "{:<24}{badge} {:<16} {}",
            conversation.title(me),
            when,
            conversation.preview().unwrap_or("Start a new conversation")
        );
    }
}

fn print_timeline(session: &ChatSession<SqliteStore>, timeline: &Timeline) {
    let today = Local::now().date_naive();
    let me = &session.me().id;
    let names = session.current_conversation().map(|c| c.profiles).unwrap_or_default();

    println!("==== {} ====", timeline.direction);
    for day in &timeline.days {
        println!("-- {} --", day.label(today));
        for entry in &day.entries {
            let who = if entry.sender() == me {
                "You"
            } else {
                names.get(entry.sender()).map(UserProfile::label).unwrap_or("Unknown User")
            };
            println!("{:>8} {who}: {}", time_of(entry), entry.text());
        }
    }
}

fn time_of(entry: &TimelineEntry) -> String {
    match entry.timestamp() {
        Some(ts) => ts.with_timezone(&Local).format("%H:%M").to_string(),
        None => "sending".to_string(),
    }
}
