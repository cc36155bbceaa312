// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job states and their string table.
//!
//! States are powers of two so callers can build masks; the convenience
//! unions `ACTIVE`, `PENDING` and `RUNNING` are predefined.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u32)]
pub enum JobState {
    New = 1,
    Depend = 2,
    Priority = 4,
    Sched = 8,
    Run = 16,
    Cleanup = 32,
    Inactive = 64,
}

/// Requested spelling for [`JobState::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateForm {
    #[default]
    Full,
    Lower,
    Short,
    ShortLower,
}

struct StateEntry {
    state: JobState,
    full: &'static str,
    lower: &'static str,
    short: &'static str,
    short_lower: &'static str,
}

const STATES: [StateEntry; 7] = [
    StateEntry { state: JobState::New, full: "NEW", lower: "new", short: "N", short_lower: "n" },
    StateEntry {
        state: JobState::Depend,
        full: "DEPEND",
        lower: "depend",
        short: "D",
        short_lower: "d",
    },
    StateEntry {
        state: JobState::Priority,
        full: "PRIORITY",
        lower: "priority",
        short: "P",
        short_lower: "p",
    },
    StateEntry {
        state: JobState::Sched,
        full: "SCHED",
        lower: "sched",
        short: "S",
        short_lower: "s",
    },
    StateEntry { state: JobState::Run, full: "RUN", lower: "run", short: "R", short_lower: "r" },
    StateEntry {
        state: JobState::Cleanup,
        full: "CLEANUP",
        lower: "cleanup",
        short: "C",
        short_lower: "c",
    },
    StateEntry {
        state: JobState::Inactive,
        full: "INACTIVE",
        lower: "inactive",
        short: "I",
        short_lower: "i",
    },
];

impl JobState {
    /// Mask of every state except INACTIVE.
    pub const ACTIVE: u32 = 1 | 2 | 4 | 8 | 16 | 32;
    /// DEPEND | PRIORITY | SCHED
    pub const PENDING: u32 = 2 | 4 | 8;
    /// RUN | CLEANUP
    pub const RUNNING: u32 = 16 | 32;

    pub fn mask(self) -> u32 {
        self as u32
    }

    pub fn is_active(self) -> bool {
        self.mask() & Self::ACTIVE != 0
    }

    pub fn as_str(self, form: StateForm) -> &'static str {
        let entry = STATES
            .iter()
            .find(|e| e.state == self)
            .unwrap_or(&STATES[0]);
        match form {
            StateForm::Full => entry.full,
            StateForm::Lower => entry.lower,
            StateForm::Short => entry.short,
            StateForm::ShortLower => entry.short_lower,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str(StateForm::Full))
    }
}

impl FromStr for JobState {
    type Err = crate::Errnum;

    /// Accepts any spelling from the string table, case-insensitively for
    /// the full forms.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for e in &STATES {
            if s == e.full
                || s == e.lower
                || s == e.short
                || s == e.short_lower
                || s.eq_ignore_ascii_case(e.full)
            {
                return Ok(e.state);
            }
        }
        Err(crate::Errnum::Inval)
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
