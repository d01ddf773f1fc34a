//! VeilChat command-line interface.
//!
//! A thin terminal client over the core engine: manage the local identity,
//! send gift-wrapped private messages, chat into geohash channels and listen
//! on relays. Identity is generated automatically on first run.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// VeilChat - private messaging over Nostr relays
#[derive(Parser)]
#[command(name = "veilchat")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Data directory path
    #[arg(short, long, default_value = "~/.veilchat")]
    data_dir: String,

    /// Relay URLs (repeatable)
    #[arg(short, long = "relay")]
    relays: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the local identity, creating one on first run
    Identity,

    /// Export the identity for backup
    Export {
        /// Output file path
        output: String,
    },

    /// Import an identity from an nsec string or an export file
    Import {
        /// Path to an export file, or a literal nsec1... string
        input: String,
    },

    /// Send a gift-wrapped private message
    Send {
        /// Recipient pubkey (hex or npub)
        recipient: String,

        /// Message text
        message: String,
    },

    /// Post an ephemeral note into a geohash channel
    Geo {
        /// Geohash of the channel
        geohash: String,

        /// Message text
        message: String,

        /// Nickname to attach
        #[arg(short, long)]
        nickname: Option<String>,
    },

    /// Listen for incoming private messages
    Listen,

    /// Destroy the local identity (WARNING: irreversible!)
    Wipe {
        /// Confirm the wipe
        #[arg(long)]
        confirm: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let ctx = commands::Context::new(&cli.data_dir, cli.relays)?;

    match cli.command {
        Commands::Identity => commands::identity(ctx).await,
        Commands::Export { output } => commands::export(ctx, &output).await,
        Commands::Import { input } => commands::import(ctx, &input).await,
        Commands::Send { recipient, message } => commands::send(ctx, &recipient, &message).await,
        Commands::Geo {
            geohash,
            message,
            nickname,
        } => commands::geo(ctx, &geohash, &message, nickname.as_deref()).await,
        Commands::Listen => commands::listen(ctx).await,
        Commands::Wipe { confirm } => commands::wipe(ctx, confirm).await,
    }
}
