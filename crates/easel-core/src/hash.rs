//! Asset identifiers derived from published image bytes

use crate::error::EaselError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::{self, Write as _};
use std::str::FromStr;

/// Scheme prefix of every asset id
const ASSET_ID_PREFIX: &str = "sha256:";

/// SHA-256 digest of an asset's bytes.
///
/// Published assets are addressed by this digest, so uploading the same
/// image twice yields the same asset id. The textual form (`Display`,
/// `FromStr`, serde) is the asset id itself: `sha256:<64 hex digits>`.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Digest `bytes`
    pub fn of(bytes: &[u8]) -> Self {
        Self(Sha256::digest(bytes).into())
    }

    /// Lowercase hex digest without the scheme prefix
    pub fn to_hex(&self) -> String {
        self.0.iter().fold(String::with_capacity(64), |mut out, b| {
            let _ = write!(out, "{:02x}", b);
            out
        })
    }

    /// Two-character directory shard used by the local asset store
    pub fn shard(&self) -> String {
        format!("{:02x}", self.0[0])
    }

    /// Full asset id, e.g. `sha256:9f86d0...`
    pub fn asset_id(&self) -> String {
        format!("{}{}", ASSET_ID_PREFIX, self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = EaselError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || EaselError::InvalidAssetId(s.to_string());
        let hex = s.strip_prefix(ASSET_ID_PREFIX).ok_or_else(invalid)?;
        if hex.len() != 64 || !hex.is_ascii() {
            return Err(invalid());
        }

        let mut digest = [0u8; 32];
        for (byte, pair) in digest.iter_mut().zip(hex.as_bytes().chunks_exact(2)) {
            let pair = std::str::from_utf8(pair).map_err(|_| invalid())?;
            *byte = u8::from_str_radix(pair, 16).map_err(|_| invalid())?;
        }
        Ok(Self(digest))
    }
}

impl TryFrom<String> for ContentHash {
    type Error = EaselError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.asset_id()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({}..)", &self.to_hex()[..12])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.asset_id())
    }
}
