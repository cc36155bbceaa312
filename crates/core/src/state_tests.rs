// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    new = { JobState::New, "NEW", "new", "N" },
    depend = { JobState::Depend, "DEPEND", "depend", "D" },
    priority = { JobState::Priority, "PRIORITY", "priority", "P" },
    sched = { JobState::Sched, "SCHED", "sched", "S" },
    run = { JobState::Run, "RUN", "run", "R" },
    cleanup = { JobState::Cleanup, "CLEANUP", "cleanup", "C" },
    inactive = { JobState::Inactive, "INACTIVE", "inactive", "I" },
)]
fn string_table(state: JobState, full: &str, lower: &str, short: &str) {
    assert_eq!(state.as_str(StateForm::Full), full);
    assert_eq!(state.as_str(StateForm::Lower), lower);
    assert_eq!(state.as_str(StateForm::Short), short);
    assert_eq!(state.as_str(StateForm::ShortLower), short.to_lowercase());
    assert_eq!(full.parse::<JobState>().unwrap(), state);
    assert_eq!(lower.parse::<JobState>().unwrap(), state);
    assert_eq!(short.parse::<JobState>().unwrap(), state);
}

#[test]
fn masks_partition_states() {
    assert_eq!(JobState::ACTIVE, !0u32 >> 25 & !JobState::Inactive.mask());
    assert_eq!(JobState::PENDING, JobState::Depend.mask() | JobState::Priority.mask() | JobState::Sched.mask());
    assert_eq!(JobState::RUNNING, JobState::Run.mask() | JobState::Cleanup.mask());
    assert!(JobState::Run.is_active());
    assert!(!JobState::Inactive.is_active());
}

#[test]
fn parse_rejects_unknown() {
    assert!("LIMBO".parse::<JobState>().is_err());
    assert!("".parse::<JobState>().is_err());
}

#[test]
fn parse_is_case_tolerant_for_full_names() {
    assert_eq!("Run".parse::<JobState>().unwrap(), JobState::Run);
    assert_eq!("cleanup".parse::<JobState>().unwrap(), JobState::Cleanup);
}
