//! The freeze pipeline: turns a mutable builder into the packed index +
//! data image.
//!
//! Compaction runs in layers:
//!
//! - whole-block deduplication first, so blocks shared between BMP and
//!   supplementary code points are found before alignment rules could
//!   prevent the sharing;
//! - the data write-out copies the ASCII values verbatim, then writes BMP
//!   blocks at granularity 1 and supplementary blocks at the data
//!   granularity, overlapping each new block with the tail of what was
//!   already written;
//! - the supplementary part of the index is compacted the same way (16-bit
//!   entries need no alignment) and the index-1 table is built over it.
//!
//! No attempt is made to find an optimal write order; the passes are
//! deterministic so that equal inputs serialize to identical bytes.

use crate::{
    builder::{
        BuildError, CodePointTrieBuilder, ALL_SAME, MIXED, MOVED, SAME_AS, SUPP_DATA, TYPE_MASK,
    },
    layout::{
        ASCII_I_LIMIT, ASCII_LIMIT, BMP_INDEX_LENGTH, BMP_I_LIMIT, BMP_LIMIT,
        CP_PER_INDEX_1_ENTRY, DATA_BLOCK_LENGTH, DATA_GRANULARITY, INDEX_2_BLOCK_LENGTH,
        INDEX_SHIFT, MAX_CODE_POINT, MAX_INDEX_1_LENGTH, NO_DATA_NULL_OFFSET,
        NO_INDEX2_NULL_OFFSET, OMITTED_BMP_INDEX_1_LENGTH, SHIFT_1, SHIFT_1_2, SHIFT_2,
        UNICODE_LIMIT,
    },
    trie::{CodePointTrie, TrieData, ValueWidth},
};
use log::debug;
use smallvec::SmallVec;

const BLOCK_LEN: usize = DATA_BLOCK_LENGTH as usize;
const I2_BLOCK_LEN: usize = INDEX_2_BLOCK_LENGTH as usize;
const GRANULARITY: usize = DATA_GRANULARITY as usize;

pub(crate) fn freeze(
    mut b: CodePointTrieBuilder,
    width: ValueWidth,
) -> Result<CodePointTrie, BuildError> {
    // The builder always stores 32-bit values; narrow widths are masked
    // before compaction so that dedup sees the final bit patterns.
    if width == ValueWidth::Bits16 {
        mask_values(&mut b, 0xFFFF);
    }

    // Find the high range and round its start up to an index-1 boundary,
    // materializing the padding as all-same blocks.
    let mut high_value = b.get(MAX_CODE_POINT);
    let mut high_start = find_high_start(&b, high_value);
    if high_start & (CP_PER_INDEX_1_ENTRY - 1) != 0 {
        let mut i = (high_start >> SHIFT_2) as usize;
        loop {
            b.flags[i] = ALL_SAME;
            b.index[i] = high_value;
            i += 1;
            high_start += DATA_BLOCK_LENGTH;
            if high_start & (CP_PER_INDEX_1_ENTRY - 1) == 0 {
                break;
            }
        }
    }
    if high_start == UNICODE_LIMIT {
        high_value = b.initial_value;
    }
    b.high_value = high_value;
    b.high_start = high_start;
    debug!("high range starts at U+{high_start:06X} with value 0x{high_value:X}");

    // Indexes and data values are always stored for the whole BMP; pin the
    // compaction limit to the supplementary range.
    let supp_high_start = if high_start <= BMP_LIMIT {
        for i in (high_start >> SHIFT_2) as usize..BMP_I_LIMIT {
            b.flags[i] = ALL_SAME;
            b.index[i] = high_value;
        }
        BMP_LIMIT
    } else {
        high_start
    };

    // Snapshot ASCII before dedup rewrites the block metadata.
    let ascii: Vec<u32> = (0..ASCII_LIMIT).map(|c| b.get(c)).collect();

    let (data_bound, data_null_index) = compact_whole_data_blocks(&mut b, supp_high_start);
    let (new_data, data_null_offset) = compact_data(
        &mut b,
        &ascii,
        supp_high_start,
        data_bound + ASCII_LIMIT as usize,
        data_null_index,
    );
    let data_length = new_data.len();

    let mut index1 = [0u16; MAX_INDEX_1_LENGTH];
    let (index_length, index2_null_offset) =
        compact_index2(&mut b, supp_high_start, data_null_offset, &mut index1);

    let data_move = match width {
        ValueWidth::Bits16 => index_length as u32,
        ValueWidth::Bits32 => 0,
    };

    // All shifted supplementary indexes must stay within 16 bits...
    if (data_move + data_length as u32) >> INDEX_SHIFT > 0xFFFF {
        return Err(BuildError::IndexValueOverflow);
    }
    // ...and so must every unshifted BMP index entry.
    for i in 0..BMP_INDEX_LENGTH as usize {
        if data_move + b.index[i] > 0xFFFF {
            return Err(BuildError::IndexValueOverflow);
        }
    }

    // Emit the 16-bit index: linear BMP entries unshifted, then the
    // index-1 table, then supplementary index-2 entries right-shifted.
    let index1_length = if high_start > BMP_LIMIT {
        ((high_start - BMP_LIMIT) >> SHIFT_1) as usize
    } else {
        0
    };
    let mut index: Vec<u16> = Vec::with_capacity(index_length);
    for i in 0..BMP_INDEX_LENGTH as usize {
        index.push((data_move + b.index[i]) as u16);
    }
    if high_start > BMP_LIMIT {
        index.extend_from_slice(&index1[..index1_length]);
        let i_limit = index_length - index1_length;
        for i in BMP_I_LIMIT..i_limit {
            index.push(((data_move + b.index[i]) >> INDEX_SHIFT) as u16);
        }
    }
    debug_assert_eq!(index.len(), index_length);

    let serialized_null_offset = if data_null_offset != NO_DATA_NULL_OFFSET {
        data_null_offset + data_move
    } else {
        NO_DATA_NULL_OFFSET
    };

    let data = match width {
        ValueWidth::Bits16 => TrieData::Bits16(new_data.iter().map(|&v| v as u16).collect()),
        ValueWidth::Bits32 => TrieData::Bits32(new_data),
    };

    Ok(CodePointTrie {
        index,
        data,
        high_start,
        high_value,
        error_value: b.error_value,
        initial_value: b.initial_value,
        data_null_offset: serialized_null_offset,
        index2_null_offset,
        data_move,
    })
}

/// Masks every stored value. The error value is left alone: it is not part
/// of the data array, and an error value outside the normal range can be
/// useful.
fn mask_values(b: &mut CodePointTrieBuilder, mask: u32) {
    b.initial_value &= mask;
    b.high_value &= mask;
    let i_limit = (b.high_start >> SHIFT_2) as usize;
    for i in 0..i_limit {
        if b.flags[i] == ALL_SAME {
            b.index[i] &= mask;
        }
    }
    for v in &mut b.data {
        *v &= mask;
    }
}

/// Finds the start of the trailing range of code points that all map to
/// `high_value`, scanning blocks backward.
fn find_high_start(b: &CodePointTrieBuilder, high_value: u32) -> u32 {
    let mut i = (b.high_start >> SHIFT_2) as usize;
    while i > 0 {
        i -= 1;
        let matches = if b.flags[i] == ALL_SAME {
            b.index[i] == high_value
        } else {
            let start = b.index[i] as usize;
            all_values_equal(&b.data[start..start + BLOCK_LEN], high_value)
        };
        if !matches {
            return ((i + 1) as u32) << SHIFT_2;
        }
    }
    0
}

#[inline]
fn all_values_equal(p: &[u32], value: u32) -> bool {
    p.iter().all(|&v| v == value)
}

/// Searches `p` for a block equal to `other`, probing starts at multiples
/// of `granularity`.
fn find_same_block(p: &[u32], other: &[u32], granularity: usize) -> Option<usize> {
    let block_len = other.len();
    if p.len() < block_len {
        return None;
    }
    let last = p.len() - block_len;
    let mut block = 0;
    while block <= last {
        if p[block..block + block_len] == *other {
            return Some(block);
        }
        block += granularity;
    }
    None
}

/// Searches `p` for `block_len` consecutive copies of `value`, probing
/// starts at multiples of `granularity`.
fn find_all_same_block(p: &[u32], value: u32, block_len: usize, granularity: usize) -> Option<usize> {
    if p.len() < block_len {
        return None;
    }
    let last = p.len() - block_len;
    let mut block = 0;
    while block <= last {
        if p[block] == value {
            let mut i = 1;
            loop {
                if i == block_len {
                    return Some(block);
                }
                if p[block + i] != value {
                    // Skip past the mismatch, keeping the probe aligned.
                    block += i & !(granularity - 1);
                    break;
                }
                i += 1;
            }
        }
        block += granularity;
    }
    None
}

/// Largest prefix of `other` (a multiple of `granularity`) that equals the
/// tail of `p`.
fn overlap_len(p: &[u32], other: &[u32], granularity: usize) -> usize {
    let mut overlap = other.len() - granularity;
    debug_assert!(overlap <= p.len());
    while overlap > 0 && p[p.len() - overlap..] != other[..overlap] {
        overlap -= granularity;
    }
    overlap
}

/// Length of the trailing run of `value` in `p`, capped below one whole
/// block and truncated to a multiple of `granularity`.
fn all_same_overlap_len(p: &[u32], value: u32, block_len: usize, granularity: usize) -> usize {
    let min = p.len().saturating_sub(block_len - granularity);
    let mut i = p.len();
    while i > min && p[i - 1] == value {
        i -= 1;
    }
    (p.len() - i) & !(granularity - 1)
}

const ALL_SAME_CAPACITY: usize = 32;

/// Fixed-size cache of all-same blocks seen so far, keyed by value, with
/// reference counts. Eviction replaces the least-referenced entry; ties go
/// to the earliest entry in both directions so that the choice of null
/// block is reproducible.
struct AllSameBlocks {
    entries: SmallVec<[AllSameEntry; ALL_SAME_CAPACITY]>,
    most_recent: Option<usize>,
}

struct AllSameEntry {
    block: usize,
    value: u32,
    ref_count: u32,
}

enum CacheLookup {
    /// The value is already cached; the payload is its first block.
    Existing(usize),
    NewUnique,
    Overflow,
}

impl AllSameBlocks {
    fn new() -> Self {
        Self {
            entries: SmallVec::new(),
            most_recent: None,
        }
    }

    fn find_or_add(&mut self, block: usize, value: u32) -> CacheLookup {
        if let Some(m) = self.most_recent {
            if self.entries[m].value == value {
                self.entries[m].ref_count += 1;
                return CacheLookup::Existing(self.entries[m].block);
            }
        }
        for (i, e) in self.entries.iter_mut().enumerate() {
            if e.value == value {
                self.most_recent = Some(i);
                e.ref_count += 1;
                return CacheLookup::Existing(e.block);
            }
        }
        if self.entries.len() == ALL_SAME_CAPACITY {
            return CacheLookup::Overflow;
        }
        self.most_recent = Some(self.entries.len());
        self.entries.push(AllSameEntry {
            block,
            value,
            ref_count: 1,
        });
        CacheLookup::NewUnique
    }

    /// After an overflow, replaces the entry with the lowest reference
    /// count.
    fn add(&mut self, block: usize, value: u32) {
        debug_assert_eq!(self.entries.len(), ALL_SAME_CAPACITY);
        let least = self
            .entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.ref_count)
            .map(|(i, _)| i)
            .expect("cache is full");
        self.most_recent = Some(least);
        self.entries[least] = AllSameEntry {
            block,
            value,
            ref_count: 1,
        };
    }

    fn most_used(&self) -> Option<usize> {
        let mut best: Option<(usize, u32)> = None;
        for e in &self.entries {
            if best.is_none_or(|(_, count)| e.ref_count > count) {
                best = Some((e.block, e.ref_count));
            }
        }
        best.map(|(block, _)| block)
    }
}

/// Demotes uniform mixed blocks, links duplicate blocks with
/// back-references, and returns an upper bound for the compacted data
/// length plus the block that should become the null data block.
fn compact_whole_data_blocks(
    b: &mut CodePointTrieBuilder,
    supp_high_start: u32,
) -> (usize, Option<usize>) {
    let mut all_same = AllSameBlocks::new();
    let mut overflowed = false;
    let mut new_data_length = 0;
    let i_limit = (supp_high_start >> SHIFT_2) as usize;
    for i in 0..i_limit {
        if b.flags[i] == MIXED {
            let start = b.index[i] as usize;
            let value = b.data[start];
            if all_values_equal(&b.data[start + 1..start + BLOCK_LEN], value) {
                // Not really mixed after all.
                b.flags[i] = ALL_SAME;
                b.index[i] = value;
                // Fall through to the all-same handling.
            } else {
                // Another whole mixed block with the same data?
                let mut found = None;
                for j in 0..i {
                    if b.flags[j] & TYPE_MASK == MIXED {
                        let other = b.index[j] as usize;
                        if b.data[start..start + BLOCK_LEN] == b.data[other..other + BLOCK_LEN] {
                            found = Some(j);
                            break;
                        }
                    }
                }
                match found {
                    Some(j) => {
                        if i >= BMP_I_LIMIT {
                            b.flags[j] |= SUPP_DATA;
                        }
                        b.flags[i] = SAME_AS;
                        b.index[i] = j as u32;
                    }
                    None => new_data_length += BLOCK_LEN,
                }
                continue;
            }
        } else {
            debug_assert_eq!(b.flags[i], ALL_SAME);
        }

        let value = b.index[i];
        let other = match all_same.find_or_add(i, value) {
            CacheLookup::Existing(other) => Some(other),
            CacheLookup::NewUnique => None,
            CacheLookup::Overflow => {
                if !overflowed {
                    debug!("all-same block cache overflow");
                    overflowed = true;
                }
                // Slow scan for an earlier block with this value.
                let mut found = None;
                for j in 0..i {
                    if b.flags[j] & TYPE_MASK == ALL_SAME && b.index[j] == value {
                        found = Some(j);
                        break;
                    }
                }
                all_same.add(found.unwrap_or(i), value);
                found
            }
        };
        match other {
            Some(j) => {
                if i >= BMP_I_LIMIT {
                    b.flags[j] |= SUPP_DATA;
                }
                b.flags[i] = SAME_AS;
                b.index[i] = j as u32;
            }
            None => new_data_length += BLOCK_LEN,
        }
    }
    (new_data_length, all_same.most_used())
}

/// Writes the compacted data array: ASCII verbatim, then BMP-only blocks
/// at granularity 1, then every block a supplementary code point uses at
/// the data granularity. Returns the array and the null data offset.
fn compact_data(
    b: &mut CodePointTrieBuilder,
    ascii: &[u32],
    supp_high_start: u32,
    capacity: usize,
    data_null_index: Option<usize>,
) -> (Vec<u32>, u32) {
    let mut new_data: Vec<u32> = Vec::with_capacity(capacity);
    new_data.extend_from_slice(ascii);

    if let Some(ni) = data_null_index {
        if b.index[ni] != b.initial_value {
            debug!(
                "initial value 0x{:X} is not the most common value 0x{:X}",
                b.initial_value, b.index[ni]
            );
        }
    }

    let mut count_same = 0usize;
    let mut sum_overlaps = 0usize;

    // The ASCII blocks stay where the linear copy put them.
    for i in 0..ASCII_I_LIMIT {
        b.flags[i] = MOVED;
        b.index[i] = (i * BLOCK_LEN) as u32;
    }

    let mut granularity = 1;
    let mut i = ASCII_I_LIMIT;
    let mut i_limit = BMP_I_LIMIT;
    loop {
        if i == i_limit {
            if granularity > 1 {
                break;
            }
            // Supplementary data blocks need the bigger granularity for
            // shifted indexes. Padding here also makes the final data
            // length a multiple of the shifted granularity. Repeating the
            // last value maximizes overlap across the padding.
            while new_data.len() & (GRANULARITY - 1) != 0 {
                let last = *new_data.last().expect("ASCII values were just written");
                new_data.push(last);
            }
            granularity = GRANULARITY;
            i = ASCII_I_LIMIT;
            i_limit = (supp_high_start >> SHIFT_2) as usize;
            continue;
        }
        let mut flags = b.flags[i];
        if granularity > 1 {
            // Second pass: pick up the blocks deferred for carrying
            // supplementary data.
            flags &= TYPE_MASK;
        }
        if flags == ALL_SAME {
            let value = b.index[i];
            match find_all_same_block(&new_data, value, BLOCK_LEN, granularity) {
                Some(n) => {
                    count_same += 1;
                    b.index[i] = n as u32;
                }
                None => {
                    let n = all_same_overlap_len(&new_data, value, BLOCK_LEN, granularity);
                    sum_overlaps += n;
                    b.index[i] = (new_data.len() - n) as u32;
                    for _ in n..BLOCK_LEN {
                        new_data.push(value);
                    }
                }
            }
            b.flags[i] = MOVED;
        } else if flags == MIXED {
            let start = b.index[i] as usize;
            let mut block = [0u32; BLOCK_LEN];
            block.copy_from_slice(&b.data[start..start + BLOCK_LEN]);
            match find_same_block(&new_data, &block, granularity) {
                Some(n) => {
                    count_same += 1;
                    b.index[i] = n as u32;
                }
                None => {
                    let n = overlap_len(&new_data, &block, granularity);
                    sum_overlaps += n;
                    b.index[i] = (new_data.len() - n) as u32;
                    new_data.extend_from_slice(&block[n..]);
                }
            }
            b.flags[i] = MOVED;
        }
        i += 1;
    }
    debug_assert!(new_data.len() <= capacity);

    // Back-references point at blocks that have all been moved by now;
    // resolve them in one forward sweep.
    let i_limit = (supp_high_start >> SHIFT_2) as usize;
    for i in ASCII_I_LIMIT..i_limit {
        if b.flags[i] == SAME_AS {
            let j = b.index[i] as usize;
            debug_assert_eq!(b.flags[j], MOVED);
            b.flags[i] = MOVED;
            b.index[i] = b.index[j];
        } else {
            debug_assert_eq!(b.flags[i], MOVED);
        }
    }

    let data_null_offset = match data_null_index {
        Some(ni) => b.index[ni],
        None => NO_DATA_NULL_OFFSET,
    };

    debug!(
        "data compaction: {} -> {} values, {} deduplicated blocks, {} overlapped values",
        b.data.len(),
        new_data.len(),
        count_same,
        sum_overlaps
    );
    (new_data, data_null_offset)
}

/// Compacts the supplementary part of the index and records the final
/// index-2 block starts (offset past the index-1 table that will sit
/// between the BMP and supplementary parts) into `index1`. Returns the
/// total index length and the null index-2 offset.
fn compact_index2(
    b: &mut CodePointTrieBuilder,
    supp_high_start: u32,
    data_null_offset: u32,
    index1: &mut [u16; MAX_INDEX_1_LENGTH],
) -> (usize, u16) {
    // The BMP index is linear; index-1 exists only for supplementary
    // code points.
    if supp_high_start <= BMP_LIMIT {
        return (BMP_I_LIMIT, NO_INDEX2_NULL_OFFSET);
    }

    let i_limit = (supp_high_start >> SHIFT_2) as usize;
    let offset = ((supp_high_start - BMP_LIMIT) >> SHIFT_1) as usize;
    let mut new_start = BMP_I_LIMIT;
    let mut null_offset: Option<usize> = None;

    let mut start = BMP_I_LIMIT;
    while start < i_limit {
        let mut block = [0u32; I2_BLOCK_LEN];
        block.copy_from_slice(&b.index[start..start + I2_BLOCK_LEN]);

        let i2;
        let is_null_block = all_values_equal(&block, data_null_offset);
        if is_null_block && null_offset.is_some() {
            i2 = null_offset.expect("checked above");
        } else {
            if let Some(n) = find_same_block(&b.index[..BMP_I_LIMIT], &block, 1) {
                // Reuses a run of the BMP index.
                i2 = n;
            } else if let Some(n) =
                find_same_block(&b.index[BMP_I_LIMIT..new_start], &block, 1)
            {
                i2 = BMP_I_LIMIT + offset + n;
            } else {
                let n = if new_start == BMP_I_LIMIT {
                    // No overlap across the BMP boundary: index shifting
                    // differs there and the index-1 table will be
                    // inserted in between.
                    0
                } else {
                    overlap_len(&b.index[BMP_I_LIMIT..new_start], &block, 1)
                };
                i2 = offset + (new_start - n);
                if n > 0 || new_start != start {
                    let mut n = n;
                    while n < I2_BLOCK_LEN {
                        b.index[new_start] = b.index[start + n];
                        new_start += 1;
                        n += 1;
                    }
                } else {
                    new_start += I2_BLOCK_LEN;
                }
            }
            if is_null_block && null_offset.is_none() {
                null_offset = Some(i2);
            }
        }
        index1[(start >> SHIFT_1_2) - OMITTED_BMP_INDEX_1_LENGTH as usize] = i2 as u16;
        start += I2_BLOCK_LEN;
    }

    let index2_null_offset = match null_offset {
        Some(n) => n as u16,
        None => NO_INDEX2_NULL_OFFSET,
    };

    // The index length must be granularity-aligned so that the data move
    // of a 16-bit trie stays down-shiftable, and 2-aligned for 32-bit
    // data. The padding bit pattern cannot occur in real index data.
    let mut length = new_start + offset;
    while length & ((GRANULARITY - 1) | 1) != 0 {
        b.index[new_start] = 0xFFFF << INDEX_SHIFT;
        new_start += 1;
        length += 1;
    }

    debug!(
        "index compaction: {} -> {} entries",
        i_limit + offset,
        length
    );
    (length, index2_null_offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_block_search_honors_granularity() {
        let haystack = [5, 5, 7, 7, 7, 7, 5, 5];
        assert_eq!(find_same_block(&haystack, &[7, 7, 7, 7], 1), Some(2));
        assert_eq!(find_same_block(&haystack, &[7, 7, 7, 7], 4), None);
        assert_eq!(find_same_block(&haystack, &[5, 5], 2), Some(0));
        assert_eq!(find_same_block(&haystack, &[9, 9], 1), None);
    }

    #[test]
    fn all_same_search_skips_past_mismatches() {
        let haystack = [3, 3, 3, 0, 3, 3, 3, 3];
        assert_eq!(find_all_same_block(&haystack, 3, 4, 1), Some(4));
        assert_eq!(find_all_same_block(&haystack, 3, 4, 4), Some(4));
        assert_eq!(find_all_same_block(&haystack, 0, 4, 1), None);
    }

    #[test]
    fn overlap_is_truncated_to_granularity() {
        let written = [1, 2, 3, 4, 9, 9, 9];
        // The last three values match the block's first three.
        assert_eq!(overlap_len(&written, &[9, 9, 9, 8], 1), 3);
        assert_eq!(overlap_len(&written, &[9, 9, 9, 8], 2), 2);
        assert_eq!(all_same_overlap_len(&written, 9, 4, 1), 3);
        assert_eq!(all_same_overlap_len(&written, 9, 4, 2), 2);
        assert_eq!(all_same_overlap_len(&written, 7, 4, 1), 0);
    }

    #[test]
    fn all_same_cache_evicts_least_referenced() {
        let mut cache = AllSameBlocks::new();
        for i in 0..ALL_SAME_CAPACITY {
            assert!(matches!(
                cache.find_or_add(i, i as u32),
                CacheLookup::NewUnique
            ));
        }
        // Reference value 0 a few more times so it clearly dominates.
        for _ in 0..3 {
            assert!(matches!(cache.find_or_add(99, 0), CacheLookup::Existing(0)));
        }
        assert!(matches!(
            cache.find_or_add(40, 1234),
            CacheLookup::Overflow
        ));
        // Everything except value 0 is tied at one reference; the earliest
        // entry (value 1) is evicted.
        cache.add(40, 1234);
        assert!(matches!(cache.find_or_add(50, 1), CacheLookup::Overflow));
        assert!(matches!(
            cache.find_or_add(50, 1234),
            CacheLookup::Existing(40)
        ));
        assert!(matches!(cache.find_or_add(51, 2), CacheLookup::Existing(2)));
        assert_eq!(cache.most_used(), Some(0));
    }
}
