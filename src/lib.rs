//! Compact, immutable maps from Unicode code points to integer property
//! values.
//!
//! Build a mapping incrementally with [`CodePointTrieBuilder`], then
//! freeze it into a [`CodePointTrie`]: a densely packed two-level index
//! plus data array in which equal blocks are deduplicated and adjacent
//! blocks overlap. The frozen form serializes to a single little-endian
//! buffer and reads back with [`CodePointTrie::from_bytes`].
//!
//! ```
//! use cptrie::{CodePointTrie, ValueWidth};
//!
//! let mut builder = CodePointTrie::builder(0, u32::MAX);
//! builder.set_range(0x370, 0x3FF, 14, true).unwrap(); // Greek and Coptic
//! let trie = builder.freeze(ValueWidth::Bits16).unwrap();
//! assert_eq!(trie.get(0x3B1), 14); // U+03B1 GREEK SMALL LETTER ALPHA
//! assert_eq!(trie.get(0x41), 0);
//! ```
#![forbid(unsafe_code)]

pub mod builder;
pub mod layout;
pub mod serialized;
pub mod trie;

mod compact;

pub use builder::{BuildError, CodePointTrieBuilder};
pub use serialized::FormatError;
pub use trie::{CodePointRange, CodePointTrie, ValueWidth};

use thiserror::Error;

/// Any error this crate can surface.
#[derive(Debug, Error)]
pub enum TrieError {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Format(#[from] FormatError),
}
