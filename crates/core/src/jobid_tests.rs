// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[test]
fn encodes_all_forms() {
    let id = Jobid(0x1234000000000000);
    assert_eq!(id.encode(JobidForm::Dec), "1311673391471656960");
    assert_eq!(id.encode(JobidForm::Hex), "0x1234000000000000");
    assert_eq!(id.encode(JobidForm::DotHex), "1234.0000.0000.0000");
    assert_eq!(id.encode(JobidForm::Kvs), "job.1234.0000.0000.0000");
    assert_eq!(id.encode(JobidForm::F58), "\u{0192}43bQEngqbnw");
}

#[parameterized(
    dec = { JobidForm::Dec },
    hex = { JobidForm::Hex },
    dothex = { JobidForm::DotHex },
    kvs = { JobidForm::Kvs },
    words = { JobidForm::Words },
    f58 = { JobidForm::F58 },
)]
fn forms_roundtrip(form: JobidForm) {
    for raw in [0u64, 1, 42, 0x123400000000, 0x1234000000000000, u64::MAX] {
        let id = Jobid(raw);
        let s = id.encode(form);
        assert_eq!(Jobid::parse(&s), Ok(id), "form {form:?} input {s:?}");
    }
}

#[test]
fn parse_autodetects() {
    let id = Jobid(0x123400000000);
    assert_eq!(Jobid::parse("20014547599360"), Ok(id));
    assert_eq!(Jobid::parse("0x123400000000"), Ok(id));
    assert_eq!(Jobid::parse("0000.1234.0000.0000"), Ok(id));
    assert_eq!(Jobid::parse("job.0000.1234.0000.0000"), Ok(id));
    assert_eq!(Jobid::parse("\u{0192}A4kQ31vX"), Ok(id));
    // ASCII fallback prefix
    assert_eq!(Jobid::parse("fA4kQ31vX"), Ok(id));
}

#[test]
fn words_has_at_least_three_words() {
    let s = Jobid(1).encode(JobidForm::Words);
    assert_eq!(s.split('-').count(), 3);
    let s = Jobid(0).encode(JobidForm::Words);
    assert_eq!(s.split('-').count(), 3);
    assert_eq!(Jobid::parse(&s), Ok(Jobid(0)));
}

#[test]
fn words_grows_with_magnitude() {
    let s = Jobid(u64::MAX).encode(JobidForm::Words);
    assert_eq!(s.split('-').count(), 8);
}

#[test]
fn timestamp_and_seq_split() {
    let id = Jobid((78_181_826_560 << 24) | 0x000042);
    assert_eq!(id.timestamp_ms(), 78_181_826_560);
    assert_eq!(id.seq(), 0x42);
}

#[test]
fn parse_rejects_garbage() {
    assert!(Jobid::parse("").is_err());
    assert!(Jobid::parse("zznothex").is_err());
    assert!(Jobid::parse("1234.0000").is_err());
    assert!(Jobid::parse("job.zz.zz.zz.zz").is_err());
    assert!(Jobid::parse("not-a-word-list").is_err());
    assert!(Jobid::parse("\u{0192}").is_err());
    // 0 and O are not in the base58 alphabet
    assert!(Jobid::parse("\u{0192}0O").is_err());
}

#[test]
fn kvs_paths() {
    let id = Jobid(0x123400000000);
    assert_eq!(id.kvs_key("eventlog"), "job.0000.1234.0000.0000.eventlog");
    assert_eq!(id.kvs_key("guest.exec.eventlog"), "job.0000.1234.0000.0000.guest.exec.eventlog");
    assert_eq!(id.guest_namespace(), "job-20014547599360-guest");
}

#[test]
fn display_is_f58() {
    assert_eq!(Jobid(0x123400000000).to_string(), "\u{0192}A4kQ31vX");
}

#[test]
fn form_parses_from_str() {
    assert_eq!("dothex".parse::<JobidForm>(), Ok(JobidForm::DotHex));
    assert!("nope".parse::<JobidForm>().is_err());
}

#[test]
fn serde_is_transparent_u64() {
    let id = Jobid(42);
    assert_eq!(serde_json::to_string(&id).unwrap(), "42");
    assert_eq!(serde_json::from_str::<Jobid>("42").unwrap(), id);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn any_id_roundtrips_every_form(raw in any::<u64>()) {
            for form in [
                JobidForm::Dec,
                JobidForm::Hex,
                JobidForm::DotHex,
                JobidForm::Kvs,
                JobidForm::Words,
                JobidForm::F58,
            ] {
                let id = Jobid(raw);
                prop_assert_eq!(Jobid::parse(&id.encode(form)), Ok(id));
            }
        }
    }
}
