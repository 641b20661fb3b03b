// SPDX-License-Identifier: MPL-2.0

//! Version parsing and comparison.
//!
//! A version is the triple `epoch:upstream-revision`. Comparison orders
//! epoch numerically, then upstream and revision using the alternating
//! digit/non-digit algorithm described in the control-stanza grammar.

use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

/// A fully parsed, totally-ordered package version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub epoch: u64,
    pub upstream: String,
    pub revision: String,
}

impl fmt::Display for Version {
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

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| verrevcmp(&self.upstream, &other.upstream))
            .then_with(|| verrevcmp(&self.revision, &other.revision))
    }
}

/// A parse issue. The last three variants are warning-level: accepted
/// (collected) by [`parse_lax`], rejected as hard errors by [`parse`].
/// Every other variant is a structural failure, fatal in both modes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("version string is empty")]
    EmptyVersion,
    #[error("version contains embedded whitespace")]
    EmbeddedSpaces,
    #[error("epoch is empty")]
    EmptyEpoch,
    #[error("epoch is not numeric")]
    NonNumericEpoch,
    #[error("epoch is negative")]
    NegativeEpoch,
    #[error("epoch value is too large")]
    EpochTooLarge,
    #[error("nothing follows epoch colon")]
    EmptyAfterEpochColon,
    #[error("revision is empty after separator")]
    EmptyRevision,
    #[error("upstream version does not start with a digit")]
    UpstreamDoesNotStartWithDigit,
    #[error("invalid character {0:?} in upstream version")]
    InvalidCharInVersion(char),
    #[error("invalid character {0:?} in revision")]
    InvalidCharInRevision(char),
}

/// Alias kept for callers that only care about the warning-level subset.
pub type Warning = Error;

fn is_valid_upstream_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+' | '~' | ':')
}

fn is_valid_revision_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '~')
}

/// Parse a version string under the strict rules: any warning-level
/// violation is promoted to a hard failure and reported as a structural
/// error via the first offending character.
pub fn parse(input: &str) -> Result<Version, Error> {
    let (version, warnings) = parse_inner(input)?;
    if let Some(first) = warnings.into_iter().next() {
        return Err(first);
    }
    Ok(version)
}

/// Parse a version string under lax rules: the three warning-level
/// checks are collected rather than rejected. Structural errors
/// (empty version, malformed epoch, empty revision after `-`) are
/// always fatal, per Open Question 1 in `DESIGN.md`.
pub fn parse_lax(input: &str) -> Result<(Version, Vec<Warning>), Error> {
    parse_inner(input)
}

fn parse_inner(input: &str) -> Result<(Version, Vec<Warning>), Error> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::EmptyVersion);
    }
    if trimmed.chars().any(|c| c.is_whitespace()) {
        return Err(Error::EmbeddedSpaces);
    }

    let (epoch, rest) = match trimmed.split_once(':') {
        Some((epoch_str, rest)) => {
            if epoch_str.is_empty() {
                return Err(Error::EmptyEpoch);
            }
            if epoch_str.starts_with('-') {
                return Err(Error::NegativeEpoch);
            }
            if !epoch_str.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::NonNumericEpoch);
            }
            let epoch: u64 = epoch_str.parse().map_err(|_| Error::EpochTooLarge)?;
            if rest.is_empty() {
                return Err(Error::EmptyAfterEpochColon);
            }
            (epoch, rest)
        }
        None => (0, trimmed),
    };

    let (upstream, revision) = match rest.rfind('-') {
        Some(idx) => {
            let revision = &rest[idx + 1..];
            if revision.is_empty() {
                return Err(Error::EmptyRevision);
            }
            (&rest[..idx], revision)
        }
        None => (rest, ""),
    };

    if upstream.is_empty() {
        return Err(Error::EmptyVersion);
    }

    let mut warnings = Vec::new();

    if !upstream.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        warnings.push(Warning::UpstreamDoesNotStartWithDigit);
    }
    for c in upstream.chars() {
        if !is_valid_upstream_char(c) {
            warnings.push(Warning::InvalidCharInVersion(c));
        }
    }
    for c in revision.chars() {
        if !is_valid_revision_char(c) {
            warnings.push(Warning::InvalidCharInRevision(c));
        }
    }

    Ok((
        Version {
            epoch,
            upstream: upstream.to_string(),
            revision: revision.to_string(),
        },
        warnings,
    ))
}

/// `order()` from the classic verrevcmp algorithm: letters sort before
/// all other non-digit bytes, `~` sorts before the end of string, and
/// digits/end-of-string are equivalent "segment boundary" markers.
fn char_order(c: Option<u8>) -> i32 {
    match c {
        None => 0,
        Some(b'~') => -1,
        Some(c) if c.is_ascii_digit() => 0,
        Some(c) if c.is_ascii_alphabetic() => c as i32,
        Some(c) => c as i32 + 256,
    }
}

/// Compare two upstream or revision strings using the alternating
/// non-digit/digit segment algorithm (§4.1).
fn verrevcmp(a: &str, b: &str) -> Ordering {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let mut ai = 0usize;
    let mut bi = 0usize;

    loop {
        if ai >= a.len() && bi >= b.len() {
            return Ordering::Equal;
        }

        loop {
            let a_not_digit = ai < a.len() && !a[ai].is_ascii_digit();
            let b_not_digit = bi < b.len() && !b[bi].is_ascii_digit();
            if !a_not_digit && !b_not_digit {
                break;
            }
            let ac = char_order(if ai < a.len() { Some(a[ai]) } else { None });
            let bc = char_order(if bi < b.len() { Some(b[bi]) } else { None });
            if ac != bc {
                return ac.cmp(&bc);
            }
            ai += 1;
            bi += 1;
        }

        while ai < a.len() && a[ai] == b'0' {
            ai += 1;
        }
        while bi < b.len() && b[bi] == b'0' {
            bi += 1;
        }

        let mut first_diff: i32 = 0;
        while ai < a.len() && bi < b.len() && a[ai].is_ascii_digit() && b[bi].is_ascii_digit() {
            if first_diff == 0 {
                first_diff = a[ai] as i32 - b[bi] as i32;
            }
            ai += 1;
            bi += 1;
        }

        if ai < a.len() && a[ai].is_ascii_digit() {
            return Ordering::Greater;
        }
        if bi < b.len() && b[bi].is_ascii_digit() {
            return Ordering::Less;
        }
        if first_diff != 0 {
            return first_diff.cmp(&0);
        }
    }
}

/// Parse and compare two version strings directly; convenience wrapper
/// for dependency-atom evaluation in `depkg-depend`.
pub fn compare(a: &Version, b: &Version) -> Ordering {
    a.cmp(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        parse(s).unwrap()
    }

    #[test]
    fn equal_versions() {
        assert_eq!(v("1.0").cmp(&v("1.0")), Ordering::Equal);
    }

    #[test]
    fn simple_upgrade() {
        assert!(v("1.0") < v("2.0"));
    }

    #[test]
    fn tilde_sorts_before_release() {
        assert!(v("1.0~beta1") < v("1.0"));
    }

    #[test]
    fn revision_compare() {
        assert!(v("1.0-1") < v("1.0-2"));
    }

    #[test]
    fn epoch_dominates() {
        assert!(v("1:0") > v("2"));
    }

    #[test]
    fn letters_compare_lexically() {
        assert!(v("1.0a") < v("1.0b"));
    }

    #[test]
    fn longer_upstream_is_greater_when_prefix_matches() {
        assert!(v("1.0") < v("1.0.1"));
    }

    #[test]
    fn round_trip_display() {
        for s in ["1.0", "1:0", "1.0-2", "2:1.2.3-4~rc1"] {
            let parsed = v(s);
            assert_eq!(parse(&parsed.to_string()).unwrap(), parsed);
        }
    }

    #[test]
    fn rejects_empty_version() {
        assert_eq!(parse(""), Err(Error::EmptyVersion));
        assert_eq!(parse("1:"), Err(Error::EmptyAfterEpochColon));
    }

    #[test]
    fn rejects_embedded_spaces() {
        assert_eq!(parse("1.0 beta"), Err(Error::EmbeddedSpaces));
    }

    #[test]
    fn rejects_empty_revision_after_dash() {
        assert_eq!(parse("1.0-"), Err(Error::EmptyRevision));
    }

    #[test]
    fn rejects_negative_or_nonnumeric_epoch() {
        assert_eq!(parse("-1:1.0"), Err(Error::NegativeEpoch));
        assert_eq!(parse("x:1.0"), Err(Error::NonNumericEpoch));
    }

    #[test]
    fn lax_mode_collects_warnings() {
        let (version, warnings) = parse_lax("abc-1").unwrap();
        assert_eq!(version.upstream, "abc");
        assert_eq!(warnings, vec![Warning::UpstreamDoesNotStartWithDigit]);
    }

    #[test]
    fn strict_mode_rejects_non_digit_leading_upstream() {
        assert!(parse("abc-1").is_err());
    }

    #[test]
    fn empty_upstream_rejected_even_in_lax_mode() {
        assert_eq!(parse_lax(":1"), Err(Error::EmptyEpoch));
        assert_eq!(parse_lax("1:-1"), Err(Error::EmptyVersion));
    }
}
