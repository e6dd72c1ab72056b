//! Diff layers: path-keyed change sets between two block states.
//!
//! A layer holds, for every touched path, either the node bytes at the
//! target state or `None` for "no value existed". Absent entries only
//! appear in reverse layers; forward application of a content-addressed
//! tree never deletes.

use thiserror::Error;

use crate::trie::TriePath;

/// Diff codec failures. Stored layers that fail to decode indicate
/// corrupted history.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DiffCodecError {
    #[error("diff encoding truncated")]
    Truncated,
    #[error("diff path length {0} out of range")]
    PathLength(usize),
}

/// A set of path changes sufficient to move durable state between
/// `from_block` and `to_block`, in either time direction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffLayer {
    /// State the layer applies on top of.
    pub from_block: u64,
    /// State reached after application.
    pub to_block: u64,
    /// Path to node-bytes-or-absent, in application order.
    pub entries: Vec<(TriePath, Option<Vec<u8>>)>,
}

impl DiffLayer {
    /// Creates an empty layer between two blocks.
    pub fn new(from_block: u64, to_block: u64) -> Self {
        Self {
            from_block,
            to_block,
            entries: Vec::new(),
        }
    }

    /// True if applying this layer moves state forward in time.
    pub fn is_forward(&self) -> bool {
        self.from_block < self.to_block
    }

    /// True if applying this layer moves state backward in time.
    pub fn is_reverse(&self) -> bool {
        self.from_block > self.to_block
    }

    /// Number of path entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the layer changes nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encodes the layer for durable storage.
    ///
    /// Layout: from/to block numbers, entry count, then per entry a
    /// length-prefixed path and a presence-tagged value.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(20 + self.entries.len() * 48);
        out.extend_from_slice(&self.from_block.to_le_bytes());
        out.extend_from_slice(&self.to_block.to_le_bytes());
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for (path, value) in &self.entries {
            out.push(path.len() as u8);
            out.extend_from_slice(path.as_bytes());
            match value {
                Some(v) => {
                    out.push(1);
                    out.extend_from_slice(&(v.len() as u32).to_le_bytes());
                    out.extend_from_slice(v);
                }
                None => out.push(0),
            }
        }
        out
    }

    /// Decodes a layer previously written with [`encode`](Self::encode).
    pub fn decode(data: &[u8]) -> Result<Self, DiffCodecError> {
        let mut pos = 0usize;
        let take = |pos: &mut usize, len: usize| -> Result<&[u8], DiffCodecError> {
            let end = pos.checked_add(len).ok_or(DiffCodecError::Truncated)?;
            let slice = data.get(*pos..end).ok_or(DiffCodecError::Truncated)?;
            *pos = end;
            Ok(slice)
        };

        let from_block = u64::from_le_bytes(take(&mut pos, 8)?.try_into().unwrap_or_default());
        let to_block = u64::from_le_bytes(take(&mut pos, 8)?.try_into().unwrap_or_default());
        let count = u32::from_le_bytes(take(&mut pos, 4)?.try_into().unwrap_or_default()) as usize;

        // the count is untrusted input; let the loop grow past this
        let mut entries = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let path_len = take(&mut pos, 1)?[0] as usize;
            if path_len > crate::trie::LEAF_PATH_LEN {
                return Err(DiffCodecError::PathLength(path_len));
            }
            let path = TriePath::from_bytes(take(&mut pos, path_len)?);
            let present = take(&mut pos, 1)?[0] == 1;
            let value = if present {
                let len =
                    u32::from_le_bytes(take(&mut pos, 4)?.try_into().unwrap_or_default()) as usize;
                Some(take(&mut pos, len)?.to_vec())
            } else {
                None
            };
            entries.push((path, value));
        }

        Ok(Self {
            from_block,
            to_block,
            entries,
        })
    }
}
