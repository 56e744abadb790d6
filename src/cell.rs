//! The four cell variants stored inside a B-Tree node.
//!
//! A cell is decoded into an owned value — in particular, a table-leaf cell's payload bytes are
//! copied out of the page at decode time rather than borrowed, so a `Cell` never carries a
//! lifetime back to the node it came from.

use crate::error::{err, Error};
use crate::node::NodeType;
use crate::varint;

/// Fixed 4-byte marker present in both index-node cell variants.
const INDEX_CELL_MAGIC: [u8; 4] = [0x0B, 0x03, 0x04, 0x04];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    TableInternal { child: u32, key: u32 },
    TableLeaf { key: u32, payload: Vec<u8> },
    IndexInternal { child: u32, idx_key: u32, pk: u32 },
    IndexLeaf { idx_key: u32, pk: u32 },
}

impl Cell {
    /// The key used for ordering within a node (the index key, for index variants).
    pub fn key(&self) -> u32 {
        match self {
            Cell::TableInternal { key, .. } => *key,
            Cell::TableLeaf { key, .. } => *key,
            Cell::IndexInternal { idx_key, .. } => *idx_key,
            Cell::IndexLeaf { idx_key, .. } => *idx_key,
        }
    }

    /// The full ordering key: index-key with the primary key as tiebreak. Table cells have no
    /// tiebreak component (table keys are already unique row ids), so their second element is
    /// always 0. Comparisons that decide cell order or duplicate-key rejection must use this,
    /// not `key()` alone — two index cells sharing an `idx_key` but differing `pk` are distinct
    /// entries in a non-unique secondary index, not a duplicate.
    pub fn order_key(&self) -> (u32, u32) {
        match self {
            Cell::TableInternal { key, .. } => (*key, 0),
            Cell::TableLeaf { key, .. } => (*key, 0),
            Cell::IndexInternal { idx_key, pk, .. } => (*idx_key, *pk),
            Cell::IndexLeaf { idx_key, pk } => (*idx_key, *pk),
        }
    }

    /// The child page pointer, for the two internal variants; `None` for leaf cells.
    pub fn child(&self) -> Option<u32> {
        match self {
            Cell::TableInternal { child, .. } => Some(*child),
            Cell::IndexInternal { child, .. } => Some(*child),
            Cell::TableLeaf { .. } | Cell::IndexLeaf { .. } => None,
        }
    }

    /// The number of bytes this cell occupies once encoded.
    pub fn encoded_len(&self) -> usize {
        match self {
            Cell::TableInternal { key, .. } => 4 + varint_len(*key),
            Cell::TableLeaf { key, payload } => {
                varint_len(payload.len() as u32) + varint_len(*key) + payload.len()
            }
            Cell::IndexInternal { .. } => 4 + INDEX_CELL_MAGIC.len() + 4 + 4,
            Cell::IndexLeaf { .. } => INDEX_CELL_MAGIC.len() + 4 + 4,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Cell::TableInternal { child, key } => {
                out.extend_from_slice(&child.to_be_bytes());
                varint::encode(*key, out);
            }
            Cell::TableLeaf { key, payload } => {
                varint::encode(payload.len() as u32, out);
                varint::encode(*key, out);
                out.extend_from_slice(payload);
            }
            Cell::IndexInternal { child, idx_key, pk } => {
                out.extend_from_slice(&child.to_be_bytes());
                out.extend_from_slice(&INDEX_CELL_MAGIC);
                out.extend_from_slice(&idx_key.to_be_bytes());
                out.extend_from_slice(&pk.to_be_bytes());
            }
            Cell::IndexLeaf { idx_key, pk } => {
                out.extend_from_slice(&INDEX_CELL_MAGIC);
                out.extend_from_slice(&idx_key.to_be_bytes());
                out.extend_from_slice(&pk.to_be_bytes());
            }
        }
    }

    /// Decodes a cell of `node_type` starting at the front of `bytes`. `bytes` may (and usually
    /// will) extend past the end of the cell; only the prefix the variant needs is consumed.
    pub fn decode(node_type: NodeType, bytes: &[u8]) -> Result<Cell, Error> {
        match node_type {
            NodeType::TableInternal => {
                let child = varint::get4(bytes, 0);
                let (key, _) = varint::decode(&bytes[4..])?;
                Ok(Cell::TableInternal { child, key })
            }
            NodeType::TableLeaf => {
                let (size, consumed_size) = varint::decode(bytes)?;
                let (key, consumed_key) = varint::decode(&bytes[consumed_size..])?;
                let start = consumed_size + consumed_key;
                let end = start + size as usize;
                let payload = bytes
                    .get(start..end)
                    .ok_or_else(|| err!(CorruptHeader, "table-leaf payload runs past page end"))?
                    .to_vec();
                Ok(Cell::TableLeaf { key, payload })
            }
            NodeType::IndexInternal => {
                let child = varint::get4(bytes, 0);
                let idx_key = varint::get4(bytes, 4 + INDEX_CELL_MAGIC.len());
                let pk = varint::get4(bytes, 4 + INDEX_CELL_MAGIC.len() + 4);
                Ok(Cell::IndexInternal { child, idx_key, pk })
            }
            NodeType::IndexLeaf => {
                let idx_key = varint::get4(bytes, INDEX_CELL_MAGIC.len());
                let pk = varint::get4(bytes, INDEX_CELL_MAGIC.len() + 4);
                Ok(Cell::IndexLeaf { idx_key, pk })
            }
        }
    }
}

fn varint_len(value: u32) -> usize {
    let mut buf = Vec::new();
    varint::encode(value, &mut buf)
}
