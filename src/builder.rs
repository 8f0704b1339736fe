//! Mutable code-point trie under construction.
//!
//! The builder keeps one metadata entry per aligned block of
//! [`DATA_BLOCK_LENGTH`](crate::layout::DATA_BLOCK_LENGTH) code points: a
//! state byte and a 32-bit slot whose meaning depends on the state. Blocks
//! start out `ALL_SAME` (the slot holds the uniform value) and are lazily
//! materialized into the data array (`MIXED`, the slot holds the data
//! offset) on the first write that breaks uniformity. The other two states
//! only appear while freezing.

use crate::{
    compact,
    layout::{
        DATA_BLOCK_LENGTH, DATA_MASK, INITIAL_DATA_LENGTH, I_LIMIT, MAX_CODE_POINT,
        MAX_DATA_LENGTH, MEDIUM_DATA_LENGTH, SHIFT_2,
    },
    trie::{CodePointRange, CodePointTrie, ValueWidth},
};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    #[error("code point 0x{0:X} is past the end of the Unicode code space")]
    CodePointOutOfRange(u32),
    #[error("range start U+{start:04X} is past range end U+{end:04X}")]
    InvertedRange { start: u32, end: u32 },
    #[error("build-time data array would exceed {MAX_DATA_LENGTH} values")]
    DataCapacityExhausted,
    #[error("compacted offsets do not fit the 16-bit index encoding")]
    IndexValueOverflow,
}

// Block states. The low two bits are the state proper; `SUPP_DATA` is an
// orthogonal marker set while freezing when a BMP block's data is also
// referenced from a supplementary block.
pub(crate) const ALL_SAME: u8 = 0;
pub(crate) const MIXED: u8 = 1;
pub(crate) const SAME_AS: u8 = 2;
pub(crate) const MOVED: u8 = 3;
pub(crate) const TYPE_MASK: u8 = 3;
pub(crate) const SUPP_DATA: u8 = 0x10;

/// Builder for a [`CodePointTrie`].
///
/// Populate it with [`set`](Self::set) and [`set_range`](Self::set_range),
/// then call [`freeze`](Self::freeze) to compact it into the immutable
/// form. Freezing consumes the builder; once a trie exists there is no way
/// to mutate it.
pub struct CodePointTrieBuilder {
    pub(crate) initial_value: u32,
    pub(crate) error_value: u32,
    pub(crate) high_value: u32,
    pub(crate) high_start: u32,
    pub(crate) flags: Vec<u8>,
    pub(crate) index: Vec<u32>,
    pub(crate) data: Vec<u32>,
    pub(crate) data_capacity: usize,
}

impl CodePointTrieBuilder {
    /// Opens an empty builder. Every code point maps to `initial_value`;
    /// out-of-range lookups return `error_value`.
    pub fn new(initial_value: u32, error_value: u32) -> Self {
        Self {
            initial_value,
            error_value,
            high_value: initial_value,
            high_start: 0,
            flags: vec![ALL_SAME; I_LIMIT],
            index: vec![0; I_LIMIT],
            data: Vec::with_capacity(INITIAL_DATA_LENGTH),
            data_capacity: INITIAL_DATA_LENGTH,
        }
    }

    /// The value returned for code points that were never set.
    #[inline]
    pub fn initial_value(&self) -> u32 {
        self.initial_value
    }

    /// The value returned for inputs outside the Unicode code space.
    #[inline]
    pub fn error_value(&self) -> u32 {
        self.error_value
    }

    /// Returns the value currently mapped for `c`.
    pub fn get(&self, c: u32) -> u32 {
        if c > MAX_CODE_POINT {
            return self.error_value;
        }
        if c >= self.high_start {
            return self.high_value;
        }
        let i = (c >> SHIFT_2) as usize;
        if self.flags[i] == ALL_SAME {
            self.index[i]
        } else {
            self.data[self.index[i] as usize + (c & DATA_MASK) as usize]
        }
    }

    /// Maps `c` to `value`.
    pub fn set(&mut self, c: u32, value: u32) -> Result<(), BuildError> {
        if c > MAX_CODE_POINT {
            return Err(BuildError::CodePointOutOfRange(c));
        }
        self.ensure_high_start(c);
        let block = self.data_block(c)?;
        self.data[block + (c & DATA_MASK) as usize] = value;
        Ok(())
    }

    /// Maps every code point in `start..=end` to `value`.
    ///
    /// With `overwrite` false, only slots still holding the initial value
    /// are changed, so repeated non-overwriting fills are idempotent.
    pub fn set_range(
        &mut self,
        start: u32,
        end: u32,
        value: u32,
        overwrite: bool,
    ) -> Result<(), BuildError> {
        if start > MAX_CODE_POINT || end > MAX_CODE_POINT {
            return Err(BuildError::CodePointOutOfRange(start.max(end)));
        }
        if start > end {
            return Err(BuildError::InvertedRange { start, end });
        }
        if !overwrite && value == self.initial_value {
            return Ok(());
        }
        self.ensure_high_start(end);

        let mut start = start;
        let mut limit = end + 1;
        if start & DATA_MASK != 0 {
            // Partial block up to the next block boundary.
            let block = self.data_block(start)?;
            let next_start = (start + DATA_MASK) & !DATA_MASK;
            if next_start <= limit {
                self.fill_block(block, start & DATA_MASK, DATA_BLOCK_LENGTH, value, overwrite);
                start = next_start;
            } else {
                self.fill_block(block, start & DATA_MASK, limit & DATA_MASK, value, overwrite);
                return Ok(());
            }
        }

        // Values in the last, partial block.
        let rest = limit & DATA_MASK;
        limit &= !DATA_MASK;

        while start < limit {
            let i = (start >> SHIFT_2) as usize;
            if self.flags[i] == ALL_SAME {
                if overwrite || self.index[i] == self.initial_value {
                    self.index[i] = value;
                }
            } else {
                let block = self.index[i] as usize;
                self.fill_block(block, 0, DATA_BLOCK_LENGTH, value, overwrite);
            }
            start += DATA_BLOCK_LENGTH;
        }

        if rest > 0 {
            let block = self.data_block(start)?;
            self.fill_block(block, 0, rest, value, overwrite);
        }
        Ok(())
    }

    /// Returns the longest run `start..=end` over which every code point
    /// maps to the same value, together with that value. `None` if `start`
    /// is outside the Unicode code space.
    pub fn get_range(&self, start: u32) -> Option<CodePointRange> {
        self.get_range_with(start, |v| v)
    }

    /// Like [`get_range`](Self::get_range), but runs are formed over
    /// `map(value)`. Slots still holding the initial value are collapsed to
    /// `map(initial_value)` without invoking `map` per slot.
    pub fn get_range_with<F>(&self, start: u32, map: F) -> Option<CodePointRange>
    where
        F: Fn(u32) -> u32,
    {
        if start > MAX_CODE_POINT {
            return None;
        }
        if start >= self.high_start {
            return Some(CodePointRange {
                end: MAX_CODE_POINT,
                value: map(self.high_value),
            });
        }
        let null_value = map(self.initial_value);
        let mapped = |v: u32| if v == self.initial_value { null_value } else { map(v) };

        let mut c = start;
        let mut i = (c >> SHIFT_2) as usize;
        let mut value = 0;
        let mut have_value = false;
        loop {
            if self.flags[i] == ALL_SAME {
                let v2 = mapped(self.index[i]);
                if have_value {
                    if v2 != value {
                        return Some(CodePointRange { end: c - 1, value });
                    }
                } else {
                    value = v2;
                    have_value = true;
                }
                c = (c + DATA_BLOCK_LENGTH) & !DATA_MASK;
            } else {
                let mut di = self.index[i] as usize + (c & DATA_MASK) as usize;
                let v2 = mapped(self.data[di]);
                if have_value {
                    if v2 != value {
                        return Some(CodePointRange { end: c - 1, value });
                    }
                } else {
                    value = v2;
                    have_value = true;
                }
                loop {
                    c += 1;
                    if c & DATA_MASK == 0 {
                        break;
                    }
                    di += 1;
                    if mapped(self.data[di]) != value {
                        return Some(CodePointRange { end: c - 1, value });
                    }
                }
            }
            i += 1;
            if c >= self.high_start {
                break;
            }
        }
        if mapped(self.high_value) != value {
            Some(CodePointRange { end: c - 1, value })
        } else {
            Some(CodePointRange {
                end: MAX_CODE_POINT,
                value,
            })
        }
    }

    /// Compacts the builder into an immutable [`CodePointTrie`] holding
    /// values of the given width, consuming the builder.
    ///
    /// With [`ValueWidth::Bits16`], every stored value (including the
    /// initial and high values, but not the error value) is masked to 16
    /// bits first.
    pub fn freeze(self, width: ValueWidth) -> Result<CodePointTrie, BuildError> {
        compact::freeze(self, width)
    }

    /// Extends the explicitly covered range so that it contains `c`,
    /// initializing any new blocks as all-initial-value.
    fn ensure_high_start(&mut self, c: u32) {
        if c >= self.high_start {
            // Round up to a full block.
            let limit = (c + DATA_BLOCK_LENGTH) & !DATA_MASK;
            let mut i = (self.high_start >> SHIFT_2) as usize;
            let i_limit = (limit >> SHIFT_2) as usize;
            while i < i_limit {
                self.flags[i] = ALL_SAME;
                self.index[i] = self.initial_value;
                i += 1;
            }
            self.high_start = limit;
        }
    }

    /// Returns the data offset of the materialized block containing `c`,
    /// converting the block from `ALL_SAME` to `MIXED` if needed.
    fn data_block(&mut self, c: u32) -> Result<usize, BuildError> {
        let i = (c >> SHIFT_2) as usize;
        if self.flags[i] == MIXED {
            return Ok(self.index[i] as usize);
        }
        let block = self.alloc_data_block(self.index[i])?;
        self.flags[i] = MIXED;
        self.index[i] = block as u32;
        Ok(block)
    }

    /// Appends one block to the data array, filled with `value`, growing
    /// the array along the 16K -> 128K -> 0x110000 ladder.
    fn alloc_data_block(&mut self, value: u32) -> Result<usize, BuildError> {
        let new_block = self.data.len();
        let new_top = new_block + DATA_BLOCK_LENGTH as usize;
        if new_top > self.data_capacity {
            let capacity = if self.data_capacity < MEDIUM_DATA_LENGTH {
                MEDIUM_DATA_LENGTH
            } else if self.data_capacity < MAX_DATA_LENGTH {
                MAX_DATA_LENGTH
            } else {
                // One block per aligned run of code points; more than
                // MAX_DATA_LENGTH values cannot be reached.
                return Err(BuildError::DataCapacityExhausted);
            };
            self.data.reserve_exact(capacity - new_block);
            self.data_capacity = capacity;
        }
        self.data.resize(new_top, value);
        Ok(new_block)
    }

    fn fill_block(&mut self, block: usize, from: u32, to: u32, value: u32, overwrite: bool) {
        let slots = &mut self.data[block + from as usize..block + to as usize];
        if overwrite {
            slots.fill(value);
        } else {
            for slot in slots.iter_mut() {
                if *slot == self.initial_value {
                    *slot = value;
                }
            }
        }
    }
}

impl Clone for CodePointTrieBuilder {
    fn clone(&self) -> Self {
        // Preserve the growth-ladder capacity so the clone allocates the
        // way the original would have.
        let mut data = Vec::with_capacity(self.data_capacity);
        data.extend_from_slice(&self.data);
        Self {
            initial_value: self.initial_value,
            error_value: self.error_value,
            high_value: self.high_value,
            high_start: self.high_start,
            flags: self.flags.clone(),
            index: self.index.clone(),
            data,
            data_capacity: self.data_capacity,
        }
    }
}
