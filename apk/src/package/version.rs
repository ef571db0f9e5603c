// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Version ordering for package selection.
//!
//! Versions are compared segment-wise after splitting on `.` and `-`.
//! Numeric prefixes compare numerically, a bare numeric segment orders
//! after the same number with a suffix (`1.2 > 1.2rc1`), and a purely
//! numeric segment orders after a purely textual one. Missing segments
//! count as zero, so `1.0` and `1.0.0` are equal.

use std::cmp::Ordering;

pub fn compare(a: &str, b: &str) -> Ordering {
    let a_parts: Vec<&str> = a.split(['.', '-']).collect();
    let b_parts: Vec<&str> = b.split(['.', '-']).collect();

    for at in 0..a_parts.len().max(b_parts.len()) {
        let a_segment = a_parts.get(at).copied().unwrap_or("0");
        let b_segment = b_parts.get(at).copied().unwrap_or("0");

        let ordering = compare_segment(a_segment, b_segment);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    Ordering::Equal
}

fn compare_segment(a: &str, b: &str) -> Ordering {
    let (a_num, a_suffix) = split_numeric(a);
    let (b_num, b_suffix) = split_numeric(b);

    match (a_num, b_num) {
        (Some(a_num), Some(b_num)) => a_num
            .cmp(&b_num)
            .then_with(|| compare_suffix(a_suffix, b_suffix)),
        // numeric releases supersede lettered pre-releases
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a_suffix.cmp(b_suffix),
    }
}

/// `"12rc4"` → `(Some(12), "rc4")`
fn split_numeric(segment: &str) -> (Option<u64>, &str) {
    let end = segment
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map_or(segment.len(), |(at, _)| at);

    (segment[..end].parse().ok(), &segment[end..])
}

fn compare_suffix(a: &str, b: &str) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => Ordering::Equal,
        // "3" > "3alpha"
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.cmp(b),
    }
}
