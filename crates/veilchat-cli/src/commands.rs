//! Command implementations for the VeilChat CLI.

use anyhow::{anyhow, bail, Context as _, Result};
use hkdf::Hkdf;
use sha2::Sha256;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use veilchat_core::identity::{decode_npub, Keystore};
use veilchat_core::nostr::{
    build_geohash_note, create_private_message, decrypt_private_message, kind, Event,
};
use veilchat_core::relay::{Filter, RelayPool, RelayStatus};

/// Default public relays used when none are given on the command line.
const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.primal.net",
];

/// Salt for deriving the keystore file key from device identity.
const DEVICE_KEY_SALT: &[u8] = b"veilchat-device-key-v1";

/// Resolved CLI context: data directory, relay set, keystore path and key.
pub struct Context {
    data_dir: PathBuf,
    relays: Vec<String>,
    file_key: [u8; 32],
}

impl Context {
    /// Build the context, expanding `~` and deriving the device file key.
    pub fn new(data_dir: &str, relays: Vec<String>) -> Result<Self> {
        let data_dir = expand_home(data_dir)?;
        let relays = if relays.is_empty() {
            DEFAULT_RELAYS.iter().map(|url| url.to_string()).collect()
        } else {
            relays
        };
        let file_key = derive_device_key(&data_dir)?;
        Ok(Self {
            data_dir,
            relays,
            file_key,
        })
    }

    async fn open_keystore(&self) -> Result<Keystore> {
        let path = self.data_dir.join("keystore.bin");
        Keystore::open(path, self.file_key)
            .await
            .context("opening keystore")
    }

    async fn connected_pool(&self) -> Result<RelayPool> {
        let pool = RelayPool::new(self.relays.clone());
        pool.connect().await;

        // Give the dials a moment; publishing needs at least one open relay.
        for _ in 0..50 {
            if pool.is_connected().await {
                return Ok(pool);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        bail!("could not connect to any relay")
    }
}

/// Show (or create) the local identity.
pub async fn identity(ctx: Context) -> Result<()> {
    let mut keystore = ctx.open_keystore().await?;
    let nostr = keystore.nostr_identity().await?;
    let noise = keystore.noise_static().await?;

    println!("nostr pubkey: {}", nostr.public_key_hex());
    if let Some(npub) = keystore.npub()? {
        println!("npub:         {npub}");
    }
    println!("noise static: {}", hex::encode(noise.public_key().as_bytes()));
    Ok(())
}

/// Export the identity to a backup file.
pub async fn export(ctx: Context, output: &str) -> Result<()> {
    let keystore = ctx.open_keystore().await?;
    if !keystore.has_nostr_identity() {
        bail!("no identity to export - run `veilchat identity` first");
    }

    let envelope = keystore.export_nostr_identity()?;
    tokio::fs::write(output, envelope)
        .await
        .with_context(|| format!("writing {output}"))?;
    println!("identity exported to {output}");
    println!("anyone with this file controls your identity - store it safely");
    Ok(())
}

/// Import an identity from a file or literal nsec string.
pub async fn import(ctx: Context, input: &str) -> Result<()> {
    let material = if input.trim().starts_with("nsec1") {
        input.trim().to_string()
    } else {
        tokio::fs::read_to_string(input)
            .await
            .with_context(|| format!("reading {input}"))?
    };

    let mut keystore = ctx.open_keystore().await?;
    let imported = keystore.import_nostr_identity(&material).await?;
    println!("imported identity {}", imported.public_key_hex());
    Ok(())
}

/// Send a gift-wrapped private message.
pub async fn send(ctx: Context, recipient: &str, message: &str) -> Result<()> {
    let recipient_hex = resolve_pubkey(recipient)?;

    let mut keystore = ctx.open_keystore().await?;
    let sender = keystore.nostr_identity().await?;

    let wrap = create_private_message(message, &recipient_hex, &sender)?;

    let pool = ctx.connected_pool().await?;
    let dispatched = pool.publish(&wrap).await?;
    // Leave the sockets a moment to flush before teardown.
    tokio::time::sleep(Duration::from_millis(500)).await;
    pool.disconnect().await;

    println!("sent to {dispatched} relay(s)");
    Ok(())
}

/// Post an ephemeral note into a geohash channel.
pub async fn geo(
    ctx: Context,
    geohash: &str,
    message: &str,
    nickname: Option<&str>,
) -> Result<()> {
    let mut keystore = ctx.open_keystore().await?;
    let keys = keystore.nostr_identity().await?;

    let event = build_geohash_note(message, geohash, nickname, false, &keys)?;

    let pool = ctx.connected_pool().await?;
    let dispatched = pool.publish(&event).await?;
    tokio::time::sleep(Duration::from_millis(500)).await;
    pool.disconnect().await;

    println!("posted to #{geohash} via {dispatched} relay(s)");
    Ok(())
}

/// Listen for incoming gift-wrapped messages until interrupted.
pub async fn listen(ctx: Context) -> Result<()> {
    let mut keystore = ctx.open_keystore().await?;
    let identity = keystore.nostr_identity().await?;
    let identity = std::sync::Arc::new(identity);

    let pool = RelayPool::new(ctx.relays.clone());
    pool.set_status_callback(Box::new(|url, status| {
        if status == RelayStatus::Connected {
            info!(relay = %url, "connected");
        }
    }))
    .await;
    pool.connect().await;

    let recipient = std::sync::Arc::clone(&identity);
    let filter = Filter::new()
        .kinds(vec![kind::GIFT_WRAP])
        .pubkey_tag(identity.public_key_hex());
    pool.subscribe(
        vec![filter],
        Box::new(move |event: Event| match decrypt_private_message(&event, &recipient) {
            Ok(message) => {
                println!(
                    "[{}] {}: {}",
                    message.timestamp, message.sender_pubkey, message.content
                );
            }
            Err(e) => info!(error = %e, "dropping undecryptable gift wrap"),
        }),
        None,
    )
    .await?;

    println!("listening as {} (ctrl-c to stop)", identity.public_key_hex());
    tokio::signal::ctrl_c().await?;
    pool.disconnect().await;
    Ok(())
}

/// Destroy the local identity.
pub async fn wipe(ctx: Context, confirm: bool) -> Result<()> {
    if !confirm {
        bail!("refusing to wipe without --confirm");
    }
    let keystore = ctx.open_keystore().await?;
    keystore.wipe().await?;
    println!("identity destroyed");
    Ok(())
}

/// Accept a recipient as 64-char hex or npub.
fn resolve_pubkey(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.starts_with("npub1") {
        let bytes = decode_npub(trimmed)?;
        Ok(hex::encode(bytes))
    } else if trimmed.len() == 64 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(trimmed.to_lowercase())
    } else {
        Err(anyhow!("recipient must be a 64-char hex pubkey or npub1..."))
    }
}

/// Derive the keystore file key from machine identity and the data dir, so
/// each installation seals its keystore differently without prompting.
fn derive_device_key(data_dir: &Path) -> Result<[u8; 32]> {
    let machine_id = std::fs::read_to_string("/etc/machine-id")
        .or_else(|_| std::fs::read_to_string("/var/lib/dbus/machine-id"))
        .unwrap_or_else(|_| std::env::var("HOSTNAME").unwrap_or_else(|_| "veilchat".into()));

    let hkdf = Hkdf::<Sha256>::new(Some(DEVICE_KEY_SALT), machine_id.trim().as_bytes());
    let mut key = [0u8; 32];
    hkdf.expand(data_dir.to_string_lossy().as_bytes(), &mut key)
        .map_err(|_| anyhow!("key derivation failed"))?;
    Ok(key)
}

fn expand_home(path: &str) -> Result<PathBuf> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = std::env::var("HOME").context("HOME not set")?;
        Ok(PathBuf::from(home).join(rest))
    } else if path == "~" {
        let home = std::env::var("HOME").context("HOME not set")?;
        Ok(PathBuf::from(home))
    } else {
        Ok(PathBuf::from(path))
    }
}
