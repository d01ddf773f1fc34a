//! Bech32 encodings for Nostr identities (`npub…` / `nsec…`) and the JSON
//! export envelope.

use crate::error::{Error, Result};
use bech32::{Bech32, Hrp};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

const NPUB_HRP: &str = "npub";
const NSEC_HRP: &str = "nsec";

/// Current identity export format version.
pub const EXPORT_VERSION: u32 = 1;

/// JSON envelope for an exported identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityExport {
    /// Export format version.
    pub version: u32,
    /// The bech32-encoded secret key.
    pub nsec: String,
    /// When the identity was created (unix seconds).
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    /// When this export was produced (unix seconds).
    #[serde(rename = "exportedAt")]
    pub exported_at: i64,
}

/// Encode a 32-byte x-only public key as `npub1…`.
pub fn encode_npub(pubkey: &[u8; 32]) -> Result<String> {
    encode(NPUB_HRP, pubkey)
}

/// Decode an `npub1…` string to the 32-byte public key.
pub fn decode_npub(npub: &str) -> Result<[u8; 32]> {
    decode(NPUB_HRP, npub)
}

/// Encode a 32-byte secret scalar as `nsec1…`.
pub fn encode_nsec(secret: &[u8; 32]) -> Result<String> {
    encode(NSEC_HRP, secret)
}

/// Decode an `nsec1…` string to the 32-byte secret scalar.
pub fn decode_nsec(nsec: &str) -> Result<Zeroizing<[u8; 32]>> {
    decode(NSEC_HRP, nsec).map(Zeroizing::new)
}

fn encode(hrp: &str, data: &[u8; 32]) -> Result<String> {
    let hrp = Hrp::parse(hrp).map_err(|e| Error::Encoding(e.to_string()))?;
    bech32::encode::<Bech32>(hrp, data).map_err(|e| Error::Encoding(e.to_string()))
}

fn decode(expected_hrp: &str, encoded: &str) -> Result<[u8; 32]> {
    let (hrp, data) = bech32::decode(encoded.trim()).map_err(|e| Error::Encoding(e.to_string()))?;
    if hrp.to_lowercase() != expected_hrp {
        return Err(Error::Encoding(format!(
            "expected '{}' prefix, got '{}'",
            expected_hrp,
            hrp.to_lowercase()
        )));
    }
    data.try_into()
        .map_err(|_| Error::Encoding("payload must be 32 bytes".into()))
}
