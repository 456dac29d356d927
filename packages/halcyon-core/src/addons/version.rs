//! Add-on version parsing and ordering.
//!
//! Versions follow the `[epoch:]upstream[-revision]` form with
//! Debian-style ordering: epochs compare numerically, then upstream and
//! revision each compare by alternating non-digit and digit runs. Digit
//! runs compare as numbers (leading zeros ignored), non-digit runs
//! compare bytewise except that `~` sorts before everything, including
//! the end of the string. That makes `1.0~beta` a pre-release of `1.0`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors from version string parsing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VersionError {
    /// The input was empty or all whitespace.
    #[error("empty version string")]
    Empty,

    /// The epoch before ':' was not a number.
    #[error("invalid epoch in version {0:?}")]
    InvalidEpoch(String),

    /// Nothing remained for the upstream component.
    #[error("missing upstream component in version {0:?}")]
    MissingUpstream(String),
}

/// A parsed add-on version.
///
/// Equality is semantic, not structural: `1.02` and `1.2` compare equal.
#[derive(Debug, Clone)]
pub struct AddonVersion {
    epoch: u32,
    upstream: String,
    revision: String,
}

impl AddonVersion {
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }
}

impl FromStr for AddonVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VersionError::Empty);
        }

        let (epoch, rest) = match s.split_once(':') {
            Some((epoch, rest)) => {
                let epoch = epoch
                    .parse::<u32>()
                    .map_err(|_| VersionError::InvalidEpoch(s.to_string()))?;
                (epoch, rest)
            }
            None => (0, s),
        };

        // The revision starts at the last hyphen, so upstream versions may
        // themselves contain hyphens
        let (upstream, revision) = match rest.rsplit_once('-') {
            Some((upstream, revision)) => (upstream, revision),
            None => (rest, ""),
        };

        if upstream.is_empty() {
            return Err(VersionError::MissingUpstream(s.to_string()));
        }

        Ok(Self {
            epoch,
            upstream: upstream.to_string(),
            revision: revision.to_string(),
        })
    }
}

impl fmt::Display for AddonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}:", self.epoch)?;
        }
        f.write_str(&self.upstream)?;
        if !self.revision.is_empty() {
            write!(f, "-{}", self.revision)?;
        }
        Ok(())
    }
}

impl Ord for AddonVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| verrevcmp(&self.upstream, &other.upstream))
            .then_with(|| verrevcmp(&self.revision, &other.revision))
    }
}

impl PartialOrd for AddonVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for AddonVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for AddonVersion {}

impl Serialize for AddonVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AddonVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Sort weight of a byte within a non-digit run.
///
/// End of string weighs 0 and `~` weighs less than that, so `1.0~x`
/// sorts before `1.0`. Digits weigh 0 too: a part that moves on to its
/// digit run sorts with end-of-string against remaining non-digits.
fn order(c: Option<u8>) -> i32 {
    match c {
        None => 0,
        Some(b'~') => -1,
        Some(c) if c.is_ascii_digit() => 0,
        Some(c) => i32::from(c),
    }
}

/// Compares one version component by alternating non-digit/digit runs.
fn verrevcmp(a: &str, b: &str) -> Ordering {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let (mut i, mut j) = (0, 0);

    while i < a.len() || j < b.len() {
        // Non-digit run, byte by byte
        while (i < a.len() && !a[i].is_ascii_digit()) || (j < b.len() && !b[j].is_ascii_digit()) {
            let oa = order(a.get(i).copied());
            let ob = order(b.get(j).copied());
            if oa != ob {
                return oa.cmp(&ob);
            }
            i += 1;
            j += 1;
        }

        // Digit run: skip leading zeros, then the longer run wins and
        // equal-length runs decide on the first differing digit
        while i < a.len() && a[i] == b'0' {
            i += 1;
        }
        while j < b.len() && b[j] == b'0' {
            j += 1;
        }

        let mut first_diff = Ordering::Equal;
        while i < a.len() && a[i].is_ascii_digit() && j < b.len() && b[j].is_ascii_digit() {
            if first_diff == Ordering::Equal {
                first_diff = a[i].cmp(&b[j]);
            }
            i += 1;
            j += 1;
        }
        if i < a.len() && a[i].is_ascii_digit() {
            return Ordering::Greater;
        }
        if j < b.len() && b[j].is_ascii_digit() {
            return Ordering::Less;
        }
        if first_diff != Ordering::Equal {
            return first_diff;
        }
    }

    Ordering::Equal
}
