//! Version ordering: semver precedence with a publish-time tiebreak.
//!
//! The catalogue marks a freshly published version as latest only when this
//! comparison says it strictly supersedes the current latest. Build metadata
//! never participates in precedence; versions that do not parse as semver
//! fall back to a numeric-aware lexicographic comparison so `1.10` still
//! sorts above `1.9`.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use semver::Version;

/// Compare a candidate version against the current latest.
///
/// Returns `Greater` iff the candidate strictly supersedes: first by version
/// precedence, then (on a version tie) by later publish time.
pub fn compare_versions(
    new_version: &str,
    old_version: &str,
    published_new: DateTime<Utc>,
    published_old: DateTime<Utc>,
) -> Ordering {
    compare_precedence(new_version, old_version)
        .then_with(|| published_new.cmp(&published_old))
}

/// Version precedence alone, without the publish-time tiebreak.
pub fn compare_precedence(a: &str, b: &str) -> Ordering {
    match (Version::parse(a.trim()), Version::parse(b.trim())) {
        (Ok(va), Ok(vb)) => va.cmp_precedence(&vb),
        _ => natural_cmp(a.trim(), b.trim()),
    }
}

/// Numeric-aware lexicographic comparison: runs of digits compare as
/// numbers, everything else byte-wise.
fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ai = a.as_bytes().iter().peekable();
    let mut bi = b.as_bytes().iter().peekable();

    loop {
        match (ai.peek().copied(), bi.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(&ca), Some(&cb)) => {
                if ca.is_ascii_digit() && cb.is_ascii_digit() {
                    let na = take_number(&mut ai);
                    let nb = take_number(&mut bi);
                    match na.cmp(&nb) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
                match ca.cmp(&cb) {
                    Ordering::Equal => {
                        ai.next();
                        bi.next();
                    }
                    other => return other,
                }
            }
        }
    }
}

fn take_number<'a, I: Iterator<Item = &'a u8>>(it: &mut std::iter::Peekable<I>) -> u64 {
    let mut n: u64 = 0;
    while let Some(&&c) = it.peek() {
        if !c.is_ascii_digit() {
            break;
        }
        n = n.saturating_mul(10).saturating_add(u64::from(c - b'0'));
        it.next();
    }
    n
}
