//! Deletion vector resolution (spec §4.8). A deletion vector is a roaring
//! treemap of row indices within a data file that are logically deleted.
//!
//! The 32-bit container format (array / bitset / run, cookie-discriminated)
//! is exactly the wire format the `roaring` crate's
//! `RoaringBitmap::deserialize_from` implements, so each bucket's 32-bit
//! bitmap is decoded with that crate rather than hand-rolled — this engine
//! depends on `roaring` for precisely this.

use std::io::Read;

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use crate::error::{DeltaResult, Error};
use crate::store::ObjectStoreAdapter;

/// `{storageType, pathOrInlineDv, offset?, sizeInBytes, cardinality}` (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionVectorDescriptor {
    #[serde(rename = "storageType")]
    pub storage_type: String,
    #[serde(rename = "pathOrInlineDv")]
    pub path_or_inline_dv: String,
    #[serde(default)]
    pub offset: Option<i32>,
    #[serde(rename = "sizeInBytes")]
    pub size_in_bytes: i32,
    pub cardinality: i64,
}

/// The three storage kinds a descriptor may carry (spec §3, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Inline,
    Uuid,
    Path,
}

impl DeletionVectorDescriptor {
    pub fn storage_kind(&self) -> DeltaResult<StorageKind> {
        match self.storage_type.as_str() {
            "i" => Ok(StorageKind::Inline),
            "u" => Ok(StorageKind::Uuid),
            "p" => Ok(StorageKind::Path),
            other => Err(Error::malformed(format!(
                "unknown deletion vector storageType `{other}`"
            ))),
        }
    }

    /// The sidecar filename for `u`-kind descriptors: `deletion_vector_<uuid>.bin`.
    /// The UUID is Z85-decoded from the last 20 characters of
    /// `pathOrInlineDv`; any preceding characters are an opaque prefix.
    pub fn sidecar_filename(&self) -> DeltaResult<String> {
        let s = &self.path_or_inline_dv;
        if s.len() < 20 {
            return Err(Error::malformed(
                "deletion vector pathOrInlineDv too short to contain a uuid suffix",
            ));
        }
        let uuid_part = &s[s.len() - 20..];
        let bytes = z85::decode(uuid_part)
            .map_err(|e| Error::malformed(format!("invalid z85 uuid in deletion vector: {e:?}")))?;
        let uuid = uuid::Uuid::from_slice(&bytes)
            .map_err(|e| Error::malformed(format!("invalid uuid bytes in deletion vector: {e}")))?;
        Ok(format!("deletion_vector_{uuid}.bin"))
    }

    /// Resolve this descriptor to the set of deleted row indices.
    pub async fn resolve(
        &self,
        table_root: &str,
        store: &dyn ObjectStoreAdapter,
    ) -> DeltaResult<std::collections::HashSet<u64>> {
        match self.storage_kind()? {
            StorageKind::Inline => {
                let bytes = z85::decode(&self.path_or_inline_dv).map_err(|e| {
                    Error::malformed(format!("invalid z85 inline deletion vector: {e:?}"))
                })?;
                parse_treemap(&bytes)
            }
            StorageKind::Uuid => {
                let filename = self.sidecar_filename()?;
                let path = format!("{}/{}", table_root.trim_end_matches('/'), filename);
                let bytes = store.read(&path).await?;
                self.parse_sidecar(&bytes)
            }
            StorageKind::Path => {
                let bytes = store.read(&self.path_or_inline_dv).await?;
                self.parse_sidecar(&bytes)
            }
        }
    }

    /// Non-inline sidecar layout: `[offset bytes ignored][4-byte size
    /// LE][4-byte checksum][serialized treemap]`. `offset` comes from the
    /// descriptor; the loader skips `offset + 8` bytes before the treemap.
    fn parse_sidecar(&self, bytes: &[u8]) -> DeltaResult<std::collections::HashSet<u64>> {
        let offset = self.offset.unwrap_or(0).max(0) as usize;
        let start = offset
            .checked_add(8)
            .ok_or_else(|| Error::malformed("deletion vector offset overflow"))?;
        if start > bytes.len() {
            return Err(Error::malformed(
                "deletion vector sidecar truncated before treemap payload",
            ));
        }
        parse_treemap(&bytes[start..])
    }
}

/// Treemap: `u64 numBuckets` (LE) followed by `numBuckets` entries of `(u32
/// highBits LE, 32-bit roaring bitmap)`. Full row index = `(highBits<<32) |
/// lowBits`. Malformed or truncated input yields an empty set rather than
/// aborting (spec §4.8); this function returns `MalformedData` only when the
/// leading length header itself cannot be read, and otherwise decodes
/// whatever whole buckets are present.
fn parse_treemap(bytes: &[u8]) -> DeltaResult<std::collections::HashSet<u64>> {
    let mut cursor = std::io::Cursor::new(bytes);
    let mut header = [0u8; 8];
    if cursor.read_exact(&mut header).is_err() {
        return Ok(std::collections::HashSet::new());
    }
    let num_buckets = u64::from_le_bytes(header);

    let mut result = std::collections::HashSet::new();
    for _ in 0..num_buckets {
        let mut high_bytes = [0u8; 4];
        if cursor.read_exact(&mut high_bytes).is_err() {
            break;
        }
        let high_bits = u32::from_le_bytes(high_bytes) as u64;
        let bitmap = match RoaringBitmap::deserialize_from(&mut cursor) {
            Ok(b) => b,
            Err(_) => break,
        };
        for low in bitmap.iter() {
            result.insert((high_bits << 32) | (low as u64));
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_treemap(buckets: &[(u32, Vec<u32>)]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(buckets.len() as u64).to_le_bytes());
        for (high, lows) in buckets {
            out.extend_from_slice(&high.to_le_bytes());
            let mut bitmap = RoaringBitmap::new();
            for low in lows {
                bitmap.insert(*low);
            }
            bitmap.serialize_into(&mut out).unwrap();
        }
        out
    }

    #[test]
    fn parses_single_bucket_treemap() {
        let bytes = encode_treemap(&[(0, vec![2, 5])]);
        let set = parse_treemap(&bytes).unwrap();
        assert_eq!(set, std::collections::HashSet::from([2, 5]));
    }

    #[test]
    fn combines_high_bits_across_buckets() {
        let bytes = encode_treemap(&[(0, vec![1]), (1, vec![2])]);
        let set = parse_treemap(&bytes).unwrap();
        assert!(set.contains(&1));
        assert!(set.contains(&((1u64 << 32) | 2)));
    }

    #[test]
    fn truncated_input_yields_empty_set_not_error() {
        let set = parse_treemap(&[1, 2, 3]).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn unknown_storage_type_is_rejected() {
        let dv = DeletionVectorDescriptor {
            storage_type: "x".to_string(),
            path_or_inline_dv: String::new(),
            offset: None,
            size_in_bytes: 0,
            cardinality: 0,
        };
        assert!(dv.storage_kind().is_err());
    }
}
