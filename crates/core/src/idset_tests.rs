// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    empty = { "", "" },
    single = { "5", "5" },
    range = { "0-3", "0-3" },
    mixed = { "0-3,8", "0-3,8" },
    unsorted = { "8,0-3", "0-3,8" },
    folds_adjacent = { "0,1,2,3", "0-3" },
    merges_overlap = { "0-4,2-6", "0-6" },
)]
fn decode_encode(input: &str, expected: &str) {
    assert_eq!(Idset::decode(input).unwrap().encode(), expected);
}

#[test]
fn unfolded_encoding() {
    let set = Idset::decode("0-3,8").unwrap();
    assert_eq!(set.encode_unfolded(), "0,1,2,3,8");
}

#[parameterized(
    negative = { "-1" },
    alpha = { "a-b" },
    reversed = { "5-2" },
    trailing_comma = { "1," },
    empty_part = { "1,,2" },
)]
fn decode_rejects(input: &str) {
    assert!(Idset::decode(input).is_err());
}

#[test]
fn error_names_the_bad_range() {
    let err = Idset::decode("1-3,a-b").unwrap_err();
    assert_eq!(err.to_string(), "error parsing range \"a-b\"");
}

#[test]
fn add_and_subtract() {
    let mut set = Idset::decode("0-7").unwrap();
    set.decode_subtract("2-3").unwrap();
    assert_eq!(set.encode(), "0-1,4-7");
    set.decode_add("2").unwrap();
    assert_eq!(set.encode(), "0-2,4-7");
}

#[test]
fn membership_and_counts() {
    let set = Idset::decode("1,5-6").unwrap();
    assert!(set.contains(5));
    assert!(!set.contains(4));
    assert_eq!(set.count(), 3);
    assert_eq!(set.first(), Some(1));
    assert_eq!(set.iter().collect::<Vec<_>>(), vec![1, 5, 6]);
}

#[test]
fn subset_checks() {
    let all = Idset::decode("0-15").unwrap();
    let some = Idset::decode("3,9").unwrap();
    assert!(some.is_subset(&all));
    assert!(!all.is_subset(&some));
    assert!(Idset::new().is_subset(&some));
}
