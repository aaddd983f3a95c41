//! 32-byte identifiers and domain-separated BLAKE2b-256 hashing.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

type Blake2b256 = Blake2b<U32>;

/// A 32-byte digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash(pub [u8; 32]);

/// Transaction identifier.
pub type TxId = Hash;
/// Identifier of one transaction output.
pub type OutputId = Hash;
/// Block header hash.
pub type BlockHash = Hash;

impl Hash {
    pub const ZERO: Hash = Hash([0u8; 32]);

    /// BLAKE2b-256 of `tag` followed by each part in order.
    pub fn tagged(tag: &[u8], parts: &[&[u8]]) -> Hash {
        let mut hasher = Blake2b256::new();
        hasher.update((tag.len() as u32).to_le_bytes());
        hasher.update(tag);
        for part in parts {
            hasher.update(part);
        }
        Hash(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Hash> {
        let bytes = hex::decode(s).ok()?;
        Some(Hash(bytes.try_into().ok()?))
    }

    /// Short form used in log fields.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.short())
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).ok_or_else(|| serde::de::Error::custom("expected 32-byte hex hash"))
    }
}

/// Asset identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(pub [u8; 32]);

impl AssetId {
    /// The native asset, all `0xff`.
    pub const NATIVE: AssetId = AssetId([0xff; 32]);

    /// Derive the id of an issued asset.
    pub fn issued(issuance_program: &[u8], definition: &[u8]) -> AssetId {
        let definition_hash = Hash::tagged(b"asset-definition", &[definition]);
        AssetId(Hash::tagged(b"asset", &[issuance_program, &definition_hash.0]).0)
    }

    pub fn is_native(&self) -> bool {
        *self == AssetId::NATIVE
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_native() {
            f.write_str("CG")
        } else {
            f.write_str(&hex::encode(self.0))
        }
    }
}

impl fmt::Debug for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetId({})", self)
    }
}

/// Binary merkle root over `leaves`.
///
/// An odd node at any level is carried up unchanged. The root of no leaves
/// is [`Hash::ZERO`].
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return Hash::ZERO;
    }
    let mut level: Vec<Hash> = leaves
        .iter()
        .map(|leaf| Hash::tagged(b"merkle-leaf", &[&leaf.0]))
        .collect();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => Hash::tagged(b"merkle-node", &[&left.0, &right.0]),
                [single] => *single,
                _ => Hash::ZERO,
            })
            .collect();
    }
    level[0]
}
