#[cfg(test)]
mod unit_tests {

    use crate::{BuildError, CodePointRange, CodePointTrie};

    #[test]
    fn fresh_builder_maps_everything_to_the_initial_value() {
        let b = CodePointTrie::builder(0, 0xBAD);
        assert_eq!(b.get(0), 0);
        assert_eq!(b.get(0x41), 0);
        assert_eq!(b.get(0x10FFFF), 0);
        assert_eq!(b.get(0x110000), 0xBAD);
        assert_eq!(b.get(u32::MAX), 0xBAD);
    }

    #[test]
    fn set_materializes_only_the_touched_block() {
        let mut b = CodePointTrie::builder(1, 0);
        b.set(0x41, 7).unwrap();
        assert_eq!(b.get(0x41), 7);
        assert_eq!(b.get(0x40), 1);
        assert_eq!(b.get(0x42), 1);
        // Only the block containing 0x41 needed data slots.
        assert_eq!(b.data.len(), 0x40);
        assert_eq!(b.get(0x80), 1);
    }

    #[test]
    fn out_of_range_writes_are_rejected() {
        let mut b = CodePointTrie::builder(0, 0);
        assert_eq!(
            b.set(0x110000, 1),
            Err(BuildError::CodePointOutOfRange(0x110000))
        );
        assert_eq!(
            b.set_range(5, 4, 1, true),
            Err(BuildError::InvertedRange { start: 5, end: 4 })
        );
        assert_eq!(
            b.set_range(0x10FFFF, 0x110000, 1, true),
            Err(BuildError::CodePointOutOfRange(0x110000))
        );
        // Nothing was written.
        assert_eq!(b.get(4), 0);
        assert_eq!(b.get(5), 0);
    }

    #[test]
    fn range_fill_spans_partial_and_whole_blocks() {
        let mut b = CodePointTrie::builder(9, 0);
        b.set_range(0x23, 0xE1, 5, true).unwrap();
        for c in 0x23..=0xE1 {
            assert_eq!(b.get(c), 5, "U+{c:04X}");
        }
        assert_eq!(b.get(0x22), 9);
        assert_eq!(b.get(0xE2), 9);
    }

    #[test]
    fn whole_block_fills_stay_unmaterialized() {
        let mut b = CodePointTrie::builder(0, 0);
        b.set_range(0x40, 0xFF, 3, true).unwrap();
        assert!(b.data.is_empty());
        assert_eq!(b.get(0x40), 3);
        assert_eq!(b.get(0xFF), 3);
    }

    #[test]
    fn non_overwriting_fill_only_replaces_initial_slots() {
        let mut b = CodePointTrie::builder(0, 0);
        b.set(0x105, 7).unwrap();
        b.set_range(0x100, 0x10F, 3, false).unwrap();
        assert_eq!(b.get(0x105), 7);
        assert_eq!(b.get(0x104), 3);
        assert_eq!(b.get(0x10F), 3);
        assert_eq!(b.get(0x110), 0);
        // Repeating the fill changes nothing.
        b.set_range(0x100, 0x10F, 3, false).unwrap();
        assert_eq!(b.get(0x105), 7);
        assert_eq!(b.get(0x104), 3);
    }

    #[test]
    fn non_overwriting_fill_of_the_initial_value_is_a_no_op() {
        let mut b = CodePointTrie::builder(9, 0);
        b.set_range(0x10, 0x20, 9, false).unwrap();
        assert!(b.data.is_empty());
        assert_eq!(b.get(0x18), 9);
    }

    #[test]
    fn ranges_report_maximal_runs() {
        let mut b = CodePointTrie::builder(0, 0);
        b.set(0x41, 7).unwrap();
        b.set(0x42, 7).unwrap();
        assert_eq!(
            b.get_range(0x41),
            Some(CodePointRange { end: 0x42, value: 7 })
        );
        assert_eq!(
            b.get_range(0),
            Some(CodePointRange { end: 0x40, value: 0 })
        );
        assert_eq!(
            b.get_range(0x43),
            Some(CodePointRange {
                end: 0x10FFFF,
                value: 0
            })
        );
        assert_eq!(b.get_range(0x110000), None);
    }

    #[test]
    fn range_mapping_collapses_initial_slots() {
        let mut b = CodePointTrie::builder(1, 0);
        b.set(0x20, 5).unwrap();
        // Halve every value; untouched slots collapse to the mapped
        // initial value.
        assert_eq!(
            b.get_range_with(0, |v| v >> 1),
            Some(CodePointRange { end: 0x1F, value: 0 })
        );
        assert_eq!(
            b.get_range_with(0x20, |v| v >> 1),
            Some(CodePointRange { end: 0x20, value: 2 })
        );
        assert_eq!(
            b.get_range_with(0x21, |v| v >> 1),
            Some(CodePointRange {
                end: 0x10FFFF,
                value: 0
            })
        );
    }

    #[test]
    fn clones_are_independent() {
        let mut a = CodePointTrie::builder(0, 0);
        a.set_range(0x100, 0x1FF, 8, true).unwrap();
        let mut b = a.clone();
        b.set(0x100, 9).unwrap();
        assert_eq!(a.get(0x100), 8);
        assert_eq!(b.get(0x100), 9);
        assert_eq!(b.get(0x101), 8);
    }

    #[test]
    fn data_array_grows_past_the_initial_capacity() {
        let mut b = CodePointTrie::builder(0, 0);
        // 300 materialized blocks outgrow the initial 16K data values.
        for i in 0..300u32 {
            b.set(i * 0x40, i + 1).unwrap();
        }
        assert!(b.data.len() > crate::layout::INITIAL_DATA_LENGTH);
        for i in 0..300u32 {
            assert_eq!(b.get(i * 0x40), i + 1);
            assert_eq!(b.get(i * 0x40 + 1), 0);
        }
    }

    #[test]
    fn accessors_echo_the_open_values() {
        let b = CodePointTrie::builder(3, 0xFFFF_FFFF);
        assert_eq!(b.initial_value(), 3);
        assert_eq!(b.error_value(), 0xFFFF_FFFF);
    }
}
