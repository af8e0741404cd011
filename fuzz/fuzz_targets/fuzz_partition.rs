//! Fuzz the range partitioner: exact coverage, balance within one, and the
//! output cap must hold for arbitrary inputs.

#![no_main]

use flux2d::{partition_range, PartitionedRange};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: (u32, u32, u32, u32)| {
    let (begin, len, target, min_size) = input;
    let begin = begin % 1_000_000;
    let end = begin.saturating_add(len % 1_000_000);

    let mut out = PartitionedRange::default();
    partition_range(begin, end, target, min_size, &mut out);

    if end <= begin {
        assert_eq!(out.count, 0);
        return;
    }

    // Exact, ordered coverage.
    let mut cursor = begin;
    let mut min = u32::MAX;
    let mut max = 0;
    for i in 0..out.count as usize {
        assert_eq!(out.ranges[i].begin, cursor);
        assert!(out.ranges[i].end > out.ranges[i].begin);
        let size = out.ranges[i].end - out.ranges[i].begin;
        min = min.min(size);
        max = max.max(size);
        cursor = out.ranges[i].end;
    }
    assert_eq!(cursor, end);

    // Balance within one.
    assert!(max - min <= 1);

    // Minimum size unless the whole input is smaller.
    if min_size > 0 && end - begin >= min_size {
        assert!(min >= min_size);
    }
});
