//! Content addressing for images and objects.
//!
//! Every hash in this crate is a 64-character lowercase hex SHA-256 digest (spec §3).
//! `ObjectHash` is the single type used for image hashes, object ids, and Splitfile
//! layer hashes — the three all share the same identity scheme.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex length of a SHA-256 digest.
pub const HEX_LEN: usize = 64;

/// A content address: the SHA-256 digest of some canonical byte sequence.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ObjectHash([u8; 32]);

impl ObjectHash {
    /// The implicit root image: parent of a freshly initialized repository (spec §3).
    pub const ROOT: ObjectHash = ObjectHash([0u8; 32]);

    /// Hash raw bytes directly.
    pub fn compute(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        ObjectHash(bytes)
    }

    /// Hash the concatenation of several byte slices, each treated as one input to a
    /// single SHA-256 run (used for object ids: `hash(schema_sorted || rows_sorted_by_pk)`
    /// and `hash(parent_id || sorted_change_rows)`, spec §4.3).
    pub fn compute_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        ObjectHash(bytes)
    }

    /// Combine existing hashes (and arbitrary strings) the way the Splitfile executor
    /// derives layer hashes: `sha256(hex(a) + hex(b) + ... )` — concatenating *hex
    /// strings*, not raw digest bytes. This mirrors `_combine_hashes` in the original
    /// `sgfile.py` so `target_hash` derivations match the system this was distilled
    /// from rather than an invented scheme.
    pub fn combine(parts: &[&str]) -> Self {
        let joined = parts.concat();
        Self::compute(joined.as_bytes())
    }

    pub fn is_root(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// True if `prefix` (lowercase hex, any length 4..=64) is a prefix of this hash.
    pub fn starts_with_hex(&self, prefix: &str) -> bool {
        self.to_hex().starts_with(prefix)
    }
}

impl fmt::Display for ObjectHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHash({}…)", &self.to_hex()[..12])
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid object hash `{0}`: expected {HEX_LEN} lowercase hex characters")]
pub struct InvalidHash(String);

impl FromStr for ObjectHash {
    type Err = InvalidHash;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HEX_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(InvalidHash(s.to_string()));
        }
        let bytes = hex::decode(s).map_err(|_| InvalidHash(s.to_string()))?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(ObjectHash(arr))
    }
}

impl TryFrom<String> for ObjectHash {
    type Error = InvalidHash;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ObjectHash> for String {
    fn from(h: ObjectHash) -> Self {
        h.to_hex()
    }
}

/// Minimum length of a hash prefix accepted by `resolve_image` (spec §4.4).
pub const MIN_PREFIX_LEN: usize = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse_roundtrip() {
        let h = ObjectHash::compute(b"hello world");
        let hex = h.to_string();
        assert_eq!(hex.len(), HEX_LEN);
        let parsed: ObjectHash = hex.parse().unwrap();
        assert_eq!(h, parsed);
    }

    #[test]
    fn root_is_all_zero_and_64_chars() {
        assert_eq!(ObjectHash::ROOT.to_hex(), "0".repeat(64));
        assert!(ObjectHash::ROOT.is_root());
    }

    #[test]
    fn same_inputs_produce_same_hash() {
        let a = ObjectHash::compute_parts(&[b"parent", b"changes"]);
        let b = ObjectHash::compute_parts(&[b"parent", b"changes"]);
        assert_eq!(a, b);
    }

    #[test]
    fn combine_hashes_hex_strings_not_bytes() {
        let a = ObjectHash::compute(b"a");
        let b = ObjectHash::compute(b"b");
        let combined = ObjectHash::combine(&[&a.to_hex(), &b.to_hex()]);
        let expected = ObjectHash::compute(format!("{}{}", a.to_hex(), b.to_hex()).as_bytes());
        assert_eq!(combined, expected);
    }

    #[test]
    fn rejects_bad_length_and_non_hex() {
        assert!("deadbeef".parse::<ObjectHash>().is_err());
        assert!(("z".repeat(64)).parse::<ObjectHash>().is_err());
    }

    #[test]
    fn prefix_matching() {
        let h = ObjectHash::compute(b"fruits");
        let hex = h.to_hex();
        assert!(h.starts_with_hex(&hex[..8]));
    }
}
