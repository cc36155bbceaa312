// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn drain_and_undrain() {
    let mut ds = Drainset::new();
    ds.drain(3, 1.0, "bad disk", 0).unwrap();
    assert!(ds.contains(3));
    assert_eq!(ds.ranks().encode(), "3");
    ds.undrain(3);
    assert!(!ds.contains(3));
    assert!(ds.is_empty());
}

#[test]
fn overwrite_zero_rejects_reasoned_entry() {
    let mut ds = Drainset::new();
    ds.drain(1, 1.0, "first", 0).unwrap();
    assert_eq!(ds.drain(1, 2.0, "second", 0), Err(Errnum::Exist));
}

#[test]
fn overwrite_zero_accepts_over_reasonless_entry() {
    let mut ds = Drainset::new();
    ds.drain(1, 1.0, "", 0).unwrap();
    // prior entry has no reason: the new drain wins silently
    ds.drain(1, 2.0, "now with reason", 0).unwrap();
    let json = ds.to_json();
    assert_eq!(json.pointer("/1/reason").and_then(Value::as_str), Some("now with reason"));
}

#[test]
fn overwrite_one_replaces() {
    let mut ds = Drainset::new();
    ds.drain(1, 1.0, "first", 0).unwrap();
    ds.drain(1, 2.0, "second", 1).unwrap();
    let json = ds.to_json();
    assert_eq!(json.pointer("/1/reason").and_then(Value::as_str), Some("second"));
    assert_eq!(json.pointer("/1/timestamp").and_then(Value::as_f64), Some(2.0));
}

#[test]
fn overwrite_two_appends_reason() {
    let mut ds = Drainset::new();
    ds.drain(1, 1.0, "first", 0).unwrap();
    ds.drain(1, 2.0, "second", 2).unwrap();
    let json = ds.to_json();
    assert_eq!(json.pointer("/1/reason").and_then(Value::as_str), Some("first, second"));
}

#[test]
fn invalid_overwrite_rejected() {
    let mut ds = Drainset::new();
    assert_eq!(ds.drain(1, 1.0, "x", 3), Err(Errnum::Inval));
    assert_eq!(ds.drain(1, 1.0, "x", -1), Err(Errnum::Inval));
}

#[test]
fn json_groups_identical_entries() {
    let mut ds = Drainset::new();
    ds.drain(0, 5.0, "maintenance", 0).unwrap();
    ds.drain(1, 5.0, "maintenance", 0).unwrap();
    ds.drain(4, 6.0, "other", 0).unwrap();
    let json = ds.to_json();
    assert!(json.get("0-1").is_some());
    assert!(json.get("4").is_some());
}

#[test]
fn json_roundtrip() {
    let mut ds = Drainset::new();
    ds.drain(0, 5.0, "a", 0).unwrap();
    ds.drain(2, 6.0, "b", 0).unwrap();
    ds.drain(3, 6.0, "b", 0).unwrap();
    let back = Drainset::from_json(&ds.to_json()).unwrap();
    assert_eq!(back, ds);
}

#[test]
fn from_json_rejects_malformed() {
    assert!(Drainset::from_json(&serde_json::json!([1, 2])).is_err());
    assert!(Drainset::from_json(&serde_json::json!({"not-an-idset!": {"timestamp": 1.0}})).is_err());
    assert!(Drainset::from_json(&serde_json::json!({"1": {}})).is_err());
}
