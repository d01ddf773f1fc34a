//! Identity keystore.
//!
//! Two long-lived key slots share one encrypted file:
//!
//! - `noise_static`: the X25519 static keypair used in Noise handshakes.
//! - `nostr_identity`: the secp256k1 keypair behind the Nostr pubkey.
//!
//! Keys are created lazily on first access and persist until an explicit
//! [`Keystore::wipe`]. The file is sealed with ChaCha20-Poly1305 under a
//! 32-byte key the caller supplies; where that key comes from (OS keyring, a
//! derived device key, a passphrase KDF) is the application's policy.

mod encoding;

pub use encoding::{
    decode_npub, decode_nsec, encode_npub, encode_nsec, IdentityExport, EXPORT_VERSION,
};

use crate::crypto::{random_bytes, StaticKeypair};
use crate::error::{Error, Result};
use crate::logging::RedactedBytes;
use crate::nostr::{unix_now, NostrKeypair};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zeroize::Zeroizing;

const FILE_NONCE_SIZE: usize = 12;
const FILE_TAG_SIZE: usize = 16;

/// One persisted key slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredKey {
    /// Secret scalar, lowercase hex.
    secret: String,
    /// Public key, lowercase hex.
    public: String,
    /// Creation time, unix seconds.
    created_at: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeystoreData {
    noise_static: Option<StoredKey>,
    nostr_identity: Option<StoredKey>,
}

/// Encrypted-at-rest store for the node's long-term keys.
pub struct Keystore {
    path: PathBuf,
    file_key: Zeroizing<[u8; 32]>,
    data: KeystoreData,
}

impl Keystore {
    /// Open a keystore file, creating an empty store when the file does not
    /// exist yet.
    pub async fn open(path: impl Into<PathBuf>, file_key: [u8; 32]) -> Result<Self> {
        let path = path.into();
        let file_key = Zeroizing::new(file_key);

        let data = if tokio::fs::try_exists(&path).await? {
            let sealed = tokio::fs::read(&path).await?;
            let plaintext = unseal(&file_key, &sealed)?;
            serde_json::from_slice(&plaintext)?
        } else {
            KeystoreData::default()
        };

        Ok(Self {
            path,
            file_key,
            data,
        })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The Noise static keypair, generated and persisted on first use.
    pub async fn noise_static(&mut self) -> Result<StaticKeypair> {
        if let Some(stored) = &self.data.noise_static {
            let secret = decode_secret_hex(&stored.secret)?;
            return Ok(StaticKeypair::from_secret_bytes(*secret));
        }

        let keypair = StaticKeypair::generate();
        self.data.noise_static = Some(StoredKey {
            secret: hex::encode(keypair.secret_bytes()),
            public: hex::encode(keypair.public_key().as_bytes()),
            created_at: unix_now(),
        });
        self.save().await?;
        info!("generated new noise static keypair");
        Ok(keypair)
    }

    /// The Nostr identity keypair, generated and persisted on first use.
    pub async fn nostr_identity(&mut self) -> Result<NostrKeypair> {
        if let Some(stored) = &self.data.nostr_identity {
            let secret = decode_secret_hex(&stored.secret)?;
            return Ok(NostrKeypair::from_secret_bytes(&secret)?);
        }

        let keypair = NostrKeypair::generate();
        self.data.nostr_identity = Some(StoredKey {
            secret: hex::encode(keypair.secret_bytes()),
            public: keypair.public_key_hex().to_string(),
            created_at: unix_now(),
        });
        self.save().await?;
        info!(pubkey = %keypair.public_key_hex(), "generated new nostr identity");
        Ok(keypair)
    }

    /// Whether a Nostr identity already exists.
    pub fn has_nostr_identity(&self) -> bool {
        self.data.nostr_identity.is_some()
    }

    /// Replace the Nostr identity from an `nsec1…` string or an export
    /// envelope produced by [`Keystore::export_nostr_identity`].
    pub async fn import_nostr_identity(&mut self, input: &str) -> Result<NostrKeypair> {
        let trimmed = input.trim();
        let (secret, created_at) = if trimmed.starts_with('{') {
            let export: IdentityExport = serde_json::from_str(trimmed)?;
            if export.version != EXPORT_VERSION {
                return Err(Error::Encoding(format!(
                    "unsupported export version {}",
                    export.version
                )));
            }
            (decode_nsec(&export.nsec)?, export.created_at)
        } else {
            (decode_nsec(trimmed)?, unix_now())
        };

        let keypair = NostrKeypair::from_secret_bytes(&secret)?;
        self.data.nostr_identity = Some(StoredKey {
            secret: hex::encode(*secret),
            public: keypair.public_key_hex().to_string(),
            created_at,
        });
        self.save().await?;
        info!(pubkey = %keypair.public_key_hex(), "imported nostr identity");
        Ok(keypair)
    }

    /// Export the Nostr identity as a JSON envelope.
    pub fn export_nostr_identity(&self) -> Result<String> {
        let stored = self
            .data
            .nostr_identity
            .as_ref()
            .ok_or_else(|| Error::Keystore("no nostr identity to export".into()))?;
        let secret = decode_secret_hex(&stored.secret)?;

        let export = IdentityExport {
            version: EXPORT_VERSION,
            nsec: encode_nsec(&secret)?,
            created_at: stored.created_at,
            exported_at: unix_now(),
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }

    /// The `npub1…` form of the Nostr identity, if one exists.
    pub fn npub(&self) -> Result<Option<String>> {
        match &self.data.nostr_identity {
            Some(stored) => {
                let public: [u8; 32] = hex::decode(&stored.public)
                    .map_err(|e| Error::Encoding(e.to_string()))?
                    .try_into()
                    .map_err(|_| Error::Encoding("stored public key must be 32 bytes".into()))?;
                Ok(Some(encode_npub(&public)?))
            }
            None => Ok(None),
        }
    }

    /// Destroy both key slots and delete the backing file.
    pub async fn wipe(mut self) -> Result<()> {
        self.data = KeystoreData::default();
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!("keystore wiped");
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let plaintext = Zeroizing::new(serde_json::to_vec(&self.data)?);
        let sealed = seal(&self.file_key, &plaintext)?;
        debug!(path = %self.path.display(), sealed = %RedactedBytes(&sealed), "keystore saved");
        tokio::fs::write(&self.path, sealed).await?;
        Ok(())
    }
}

impl std::fmt::Debug for Keystore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keystore")
            .field("path", &self.path)
            .field("noise_static", &self.data.noise_static.is_some())
            .field("nostr_identity", &self.data.nostr_identity.is_some())
            .finish()
    }
}

/// Seal bytes for the file: `nonce || ciphertext || tag`.
fn seal(file_key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(file_key));
    let nonce: [u8; FILE_NONCE_SIZE] = random_bytes();

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| Error::Keystore("sealing failed".into()))?;

    let mut out = Vec::with_capacity(FILE_NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Reverse of [`seal`].
fn unseal(file_key: &[u8; 32], sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if sealed.len() < FILE_NONCE_SIZE + FILE_TAG_SIZE {
        return Err(Error::Keystore("keystore file truncated".into()));
    }
    let (nonce, ciphertext) = sealed.split_at(FILE_NONCE_SIZE);

    let cipher = ChaCha20Poly1305::new(Key::from_slice(file_key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::Keystore("keystore decryption failed (wrong key?)".into()))?;
    Ok(Zeroizing::new(plaintext))
}

fn decode_secret_hex(secret_hex: &str) -> Result<Zeroizing<[u8; 32]>> {
    let bytes = Zeroizing::new(
        hex::decode(secret_hex).map_err(|e| Error::InvalidKey(e.to_string()))?,
    );
    let mut secret = Zeroizing::new([0u8; 32]);
    if bytes.len() != 32 {
        return Err(Error::InvalidKey("stored secret must be 32 bytes".into()));
    }
    secret.copy_from_slice(&bytes);
    Ok(secret)
}
