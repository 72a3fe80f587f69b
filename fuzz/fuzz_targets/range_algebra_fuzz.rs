//! Fuzz test for the range algebra
//!
//! Decodes arbitrary bytes into a window, a set of cached ranges and a pair of
//! exclusivity offsets, then checks that gap computation never panics and
//! that every gap it returns is a valid range inside the window.
//!
//! Run with: cargo +nightly fuzz run range_algebra_fuzz -- -max_total_time=60

#![no_main]

use chrono::{DateTime, TimeDelta};
use libfuzzer_sys::fuzz_target;
use tidemark_core::algebra::{clamp_to_window, missing, squash};
use tidemark_core::{SortDirection, TemporalRange, Timestamp};

/// 2021-01-01T00:00:00Z.
const BASE_SECS: i64 = 1_609_459_200;

fn minute(byte_pair: &[u8]) -> Option<Timestamp> {
    let raw = u16::from_be_bytes([*byte_pair.first()?, *byte_pair.get(1)?]);
    DateTime::from_timestamp(BASE_SECS + i64::from(raw) * 60, 0)
}

fn offset(byte: Option<&u8>) -> Option<TimeDelta> {
    byte.filter(|b| **b != 0).map(|b| TimeDelta::seconds(i64::from(*b)))
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 6 {
        return;
    }
    let (header, body) = data.split_at(6);
    let (Some(a), Some(b)) = (minute(&header[0..2]), minute(&header[2..4])) else {
        return;
    };
    let (from, to) = (a.min(b), a.max(b));
    let from_offset = offset(header.get(4));
    let to_offset = offset(header.get(5));

    let mut ranges: Vec<TemporalRange<Timestamp>> = body
        .chunks_exact(4)
        .filter_map(|chunk| {
            let x = minute(&chunk[0..2])?;
            let y = minute(&chunk[2..4])?;
            Some(TemporalRange::new(x.min(y), x.max(y)))
        })
        .collect();
    SortDirection::Ascending.sort_ranges(&mut ranges);

    let merged = squash(&ranges);
    for pair in merged.windows(2) {
        assert!(pair[0].to() < pair[1].from(), "squash left overlap");
    }

    let valid = clamp_to_window(&merged, from, to).expect("window is ordered");
    for range in &valid {
        assert!(range.from() >= from && range.to() <= to, "clamp escaped window");
    }

    let gaps = missing(from, to, &valid, from_offset, to_offset).expect("inputs are valid");
    for gap in &gaps {
        assert!(gap.is_valid(), "inverted gap {}", gap);
        assert!(gap.from() >= from && gap.to() <= to, "gap {} escapes window", gap);
    }
});
