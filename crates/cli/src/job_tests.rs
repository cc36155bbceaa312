// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    numeric = { "9", 9 },
    short_name = { "TERM", 15 },
    sig_prefix = { "SIGKILL", 9 },
    cont = { "CONT", 18 },
)]
fn signal_parsing(input: &str, expected: i32) {
    assert_eq!(parse_signal(input).unwrap(), expected);
}

#[test]
fn unknown_signal_rejected() {
    assert!(parse_signal("SIGBOGUS").is_err());
}

#[parameterized(
    success = { Some(0), 0 },
    exit_three = { Some(3 << 8), 3 },
    sigterm = { Some(15), 128 + 15 },
    never_ran = { None, 1 },
)]
fn exit_code_mapping(status: Option<i32>, expected: i32) {
    assert_eq!(status_to_exit_code(status), expected);
}

#[test]
fn generated_jobid_has_empty_sequence() {
    let id = generate_jobid();
    assert_eq!(id.seq(), 0);
    assert!(id.timestamp_ms() > 0);
    // round-trips like any FLUID
    assert_eq!(Jobid::parse(&id.encode(JobidForm::F58)).unwrap(), id);
}

#[test]
fn taskmap_query_helpers() {
    // the command-level query paths share these accessors
    let map = Taskmap::decode("[[0,4,4,1]]").unwrap();
    assert_eq!(map.nodeid(5).unwrap(), 1);
    assert_eq!(map.taskids(1).encode(), "4-7");
    assert_eq!(map.ntasks(1), 4);
}
