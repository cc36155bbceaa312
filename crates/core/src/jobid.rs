// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! FLUID job identifiers.
//!
//! A jobid is a 64-bit value `{timestamp_ms:40, seq:24}`. It has several
//! textual forms, all of which round-trip: decimal, hex, dotted-hex, the
//! KVS directory form, a mnemonic word form and F58 (base58 with a
//! leading "ƒ"). `parse` autodetects the form.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const B58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const F58_PREFIX: &str = "\u{0192}"; // ƒ

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum JobidError {
    #[error("cannot decode jobid: {0:?}")]
    Decode(String),

    #[error("unknown jobid encoding: {0:?}")]
    UnknownForm(String),
}

/// Output encodings for a jobid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobidForm {
    Dec,
    Hex,
    DotHex,
    Kvs,
    Words,
    F58,
}

impl FromStr for JobidForm {
    type Err = JobidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dec" => Ok(JobidForm::Dec),
            "hex" => Ok(JobidForm::Hex),
            "dothex" => Ok(JobidForm::DotHex),
            "kvs" => Ok(JobidForm::Kvs),
            "words" => Ok(JobidForm::Words),
            "f58" => Ok(JobidForm::F58),
            other => Err(JobidError::UnknownForm(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Jobid(pub u64);

impl Jobid {
    /// Milliseconds-since-epoch portion (upper 40 bits).
    pub fn timestamp_ms(self) -> u64 {
        self.0 >> 24
    }

    /// Generator sequence portion (lower 24 bits).
    pub fn seq(self) -> u32 {
        (self.0 & 0xff_ffff) as u32
    }

    pub fn encode(self, form: JobidForm) -> String {
        match form {
            JobidForm::Dec => self.0.to_string(),
            JobidForm::Hex => format!("0x{:x}", self.0),
            JobidForm::DotHex => self.dothex(),
            JobidForm::Kvs => format!("job.{}", self.dothex()),
            JobidForm::Words => self.words(),
            JobidForm::F58 => format!("{}{}", F58_PREFIX, b58_encode(self.0)),
        }
    }

    fn dothex(self) -> String {
        format!(
            "{:04x}.{:04x}.{:04x}.{:04x}",
            (self.0 >> 48) & 0xffff,
            (self.0 >> 32) & 0xffff,
            (self.0 >> 16) & 0xffff,
            self.0 & 0xffff,
        )
    }

    fn words(self) -> String {
        let bytes = self.0.to_be_bytes();
        // Trim leading zero bytes but keep at least three words.
        let start = bytes.iter().position(|&b| b != 0).unwrap_or(7).min(5);
        bytes[start..]
            .iter()
            .map(|&b| WORDS[b as usize])
            .collect::<Vec<_>>()
            .join("-")
    }

    /// KVS key of a per-job value, e.g. `job.<dothex>.eventlog`.
    pub fn kvs_key(self, path: &str) -> String {
        format!("{}.{}", self.encode(JobidForm::Kvs), path)
    }

    /// Name of the job's guest KVS namespace.
    pub fn guest_namespace(self) -> String {
        format!("job-{}-guest", self.0)
    }

    /// Parse any encoding, autodetected.
    pub fn parse(s: &str) -> Result<Self, JobidError> {
        let bad = || JobidError::Decode(s.to_string());
        if let Some(rest) = s.strip_prefix(F58_PREFIX) {
            return b58_decode(rest).ok_or_else(bad).map(Jobid);
        }
        if let Some(rest) = s.strip_prefix("job.") {
            return parse_dothex(rest).ok_or_else(bad).map(Jobid);
        }
        if let Some(rest) = s.strip_prefix("0x") {
            return u64::from_str_radix(rest, 16).ok().map(Jobid).ok_or_else(bad);
        }
        if s.contains('.') {
            return parse_dothex(s).ok_or_else(bad).map(Jobid);
        }
        if s.contains('-') {
            return parse_words(s).ok_or_else(bad).map(Jobid);
        }
        if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            return s.parse::<u64>().ok().map(Jobid).ok_or_else(bad);
        }
        // Bare "f" prefix is accepted where "ƒ" is awkward to type.
        if let Some(rest) = s.strip_prefix('f') {
            return b58_decode(rest).ok_or_else(bad).map(Jobid);
        }
        Err(bad())
    }
}

impl fmt::Display for Jobid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode(JobidForm::F58))
    }
}

impl From<u64> for Jobid {
    fn from(v: u64) -> Self {
        Jobid(v)
    }
}

impl FromStr for Jobid {
    type Err = JobidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Jobid::parse(s)
    }
}

fn parse_dothex(s: &str) -> Option<u64> {
    let parts: Vec<&str> = s.split('.').collect();
    if parts.len() != 4 {
        return None;
    }
    let mut v: u64 = 0;
    for part in parts {
        if part.is_empty() || part.len() > 4 {
            return None;
        }
        v = (v << 16) | u64::from_str_radix(part, 16).ok()?;
    }
    Some(v)
}

fn parse_words(s: &str) -> Option<u64> {
    let mut v: u64 = 0;
    let mut count = 0;
    for word in s.split('-') {
        let idx = WORDS.iter().position(|&w| w == word)?;
        v = v.checked_shl(8).filter(|_| count < 8)?;
        v |= idx as u64;
        count += 1;
    }
    if count < 3 {
        return None;
    }
    Some(v)
}

fn b58_encode(mut v: u64) -> String {
    if v == 0 {
        return "1".to_string();
    }
    let mut out = Vec::new();
    while v > 0 {
        out.push(B58_ALPHABET[(v % 58) as usize]);
        v /= 58;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn b58_decode(s: &str) -> Option<u64> {
    if s.is_empty() {
        return None;
    }
    let mut v: u64 = 0;
    for c in s.bytes() {
        let digit = B58_ALPHABET.iter().position(|&b| b == c)? as u64;
        v = v.checked_mul(58)?.checked_add(digit)?;
    }
    Some(v)
}

/// Mnemonic word list: one word per byte value, big-endian, leading zero
/// bytes trimmed to a minimum of three words.
#[rustfmt::skip]
const WORDS: [&str; 256] = [
    "ace", "acid", "acorn", "actor", "alarm", "album", "alley", "amber",
    "angle", "ankle", "apple", "apron", "arch", "arena", "arrow", "atlas",
    "attic", "axis", "bacon", "badge", "bagel", "baker", "bamboo", "banjo",
    "barn", "basil", "basin", "beach", "bead", "beacon", "bear", "beet",
    "bell", "belt", "bench", "berry", "bird", "bison", "blade", "blaze",
    "blimp", "bloom", "board", "boat", "bolt", "bone", "book", "boot",
    "brain", "brass", "bread", "brick", "bride", "brook", "broom", "brush",
    "bucket", "bugle", "bunny", "butter", "cabin", "cable", "cactus", "cake",
    "camel", "candle", "canoe", "canyon", "card", "cargo", "carrot", "castle",
    "cedar", "cello", "chair", "chalk", "cheese", "cherry", "chess", "chief",
    "chill", "cider", "cigar", "cinema", "circle", "citrus", "clam", "claw",
    "clay", "cliff", "clock", "cloud", "clover", "coach", "coast", "cobra",
    "cocoa", "coffee", "comet", "compass", "copper", "coral", "corn", "cotton",
    "cougar", "cradle", "crane", "crater", "crayon", "cream", "creek", "crow",
    "crown", "cube", "cumin", "cycle", "daisy", "dancer", "deer", "delta",
    "denim", "depot", "desert", "diesel", "dingo", "dinner", "dolphin", "donkey",
    "donut", "dove", "dragon", "drum", "duck", "eagle", "earth", "easel",
    "echo", "eel", "elbow", "elder", "ember", "emerald", "engine", "envoy",
    "ferry", "fiddle", "field", "finch", "fjord", "flame", "flask", "fleet",
    "flint", "flute", "fog", "forest", "fossil", "fox", "frog", "frost",
    "galaxy", "garden", "garlic", "gecko", "gem", "ginger", "glacier", "glove",
    "goat", "goose", "gorge", "grain", "grape", "gravel", "grove", "guitar",
    "hammer", "harbor", "harp", "hawk", "hazel", "heron", "hill", "honey",
    "hoof", "hornet", "horse", "hotel", "house", "hummus", "ice", "igloo",
    "iron", "island", "ivory", "jacket", "jaguar", "jasmine", "jeep", "jelly",
    "jewel", "judge", "juice", "jungle", "kayak", "kettle", "king", "kiwi",
    "knife", "koala", "lagoon", "lake", "lamp", "lantern", "laser", "laurel",
    "lava", "lemon", "lentil", "lily", "lime", "lion", "lizard", "llama",
    "lobster", "locket", "lotus", "lunar", "lynx", "magnet", "mango", "maple",
    "marble", "mason", "meadow", "melon", "mesa", "metal", "meteor", "mint",
    "mirror", "monk", "moon", "moose", "moss", "motor", "mule", "mural",
    "myrtle", "nectar", "nickel", "night", "noodle", "north", "nutmeg", "oasis",
];

#[cfg(test)]
#[path = "jobid_tests.rs"]
mod tests;
