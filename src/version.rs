// src/version.rs

//! Package version parsing and ordering
//!
//! A package version is `[epoch:]upstream[-release]` in its canonical form
//! (the one written into `.PKGINFO` and `%VERSION%`) and
//! `[epoch^]upstream[-release]` in its filename form (the one used for store
//! directory names). Each component is compared with the rpmvercmp
//! algorithm, so consumers that pre-sort entries agree with us on "newest".

use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// Parsed package version
///
/// Equality is defined by [`Ord`], not structurally: `1.0-1` and `1.0` are
/// equal because the release is skipped when either side lacks one.
#[derive(Debug, Clone)]
pub struct PackageVersion {
    pub epoch: u64,
    pub upstream: String,
    pub release: String,
}

impl PackageVersion {
    pub fn new(epoch: u64, upstream: impl Into<String>, release: impl Into<String>) -> Self {
        Self {
            epoch,
            upstream: upstream.into(),
            release: release.into(),
        }
    }

    /// Parse a version string in either encoding
    ///
    /// The epoch is the leading run of digits when it is immediately followed
    /// by `:` or `^`; whichever of the two delimiters comes right after the
    /// digits wins, so `1:2^3` has epoch 1 and upstream `2^3`. The release is
    /// the text after the last `-`. Anything that does not fit (a
    /// non-numeric or overflowing epoch) is kept whole as the upstream part
    /// with epoch 0, which keeps comparison total.
    pub fn parse(raw: &str) -> Self {
        let (epoch, rest) = split_epoch(raw);
        let (upstream, release) = match rest.rfind('-') {
            Some(pos) => (&rest[..pos], &rest[pos + 1..]),
            None => (rest, ""),
        };

        Self::new(epoch, upstream, release)
    }

    /// Canonical encoding: `epoch:upstream-release`, epoch omitted when 0
    pub fn canonical(&self) -> String {
        self.encode(':')
    }

    /// Filename encoding: `epoch^upstream-release`, epoch omitted when 0
    pub fn filename(&self) -> String {
        self.encode('^')
    }

    fn encode(&self, epoch_delimiter: char) -> String {
        let mut out = String::new();
        if self.epoch != 0 {
            out.push_str(&self.epoch.to_string());
            out.push(epoch_delimiter);
        }
        out.push_str(&self.upstream);
        if !self.release.is_empty() {
            out.push('-');
            out.push_str(&self.release);
        }
        out
    }
}

fn split_epoch(raw: &str) -> (u64, &str) {
    let digits = raw.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return (0, raw);
    }

    match raw.as_bytes().get(digits) {
        Some(b':') | Some(b'^') => match raw[..digits].parse::<u64>() {
            Ok(epoch) => (epoch, &raw[digits + 1..]),
            Err(_) => (0, raw),
        },
        _ => (0, raw),
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl Serialize for PackageVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| rpmvercmp(&self.upstream, &other.upstream))
            .then_with(|| {
                if self.release.is_empty() || other.release.is_empty() {
                    Ordering::Equal
                } else {
                    rpmvercmp(&self.release, &other.release)
                }
            })
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for PackageVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PackageVersion {}

/// Compare two raw version strings
///
/// An empty version sorts before any non-empty one.
pub fn vercmp(a: &str, b: &str) -> Ordering {
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        (false, false) => {}
    }
    if a == b {
        return Ordering::Equal;
    }

    PackageVersion::parse(a).cmp(&PackageVersion::parse(b))
}

/// The rpmvercmp segment comparison
///
/// Strings are split into alternating runs of digits and letters; any other
/// byte is a separator. Digit runs compare numerically, letter runs
/// lexically, a digit run beats a letter run, and when one side runs out
/// first the other one is newer. `~` sorts before everything including the
/// end of the string, `^` sorts after the end of the string but before any
/// further segment.
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let mut one = a.as_bytes();
    let mut two = b.as_bytes();

    loop {
        one = skip_separators(one);
        two = skip_separators(two);

        if one.first() == Some(&b'~') || two.first() == Some(&b'~') {
            if one.first() != Some(&b'~') {
                return Ordering::Greater;
            }
            if two.first() != Some(&b'~') {
                return Ordering::Less;
            }
            one = &one[1..];
            two = &two[1..];
            continue;
        }

        if one.first() == Some(&b'^') || two.first() == Some(&b'^') {
            if one.is_empty() {
                return Ordering::Less;
            }
            if two.is_empty() {
                return Ordering::Greater;
            }
            if one[0] != b'^' {
                return Ordering::Greater;
            }
            if two[0] != b'^' {
                return Ordering::Less;
            }
            one = &one[1..];
            two = &two[1..];
            continue;
        }

        if one.is_empty() || two.is_empty() {
            break;
        }

        let numeric = one[0].is_ascii_digit();
        let (seg_one, rest_one) = take_segment(one, numeric);
        let (seg_two, rest_two) = take_segment(two, numeric);

        // Segment types differ
        if seg_two.is_empty() {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let ord = if numeric {
            compare_numeric(seg_one, seg_two)
        } else {
            seg_one.cmp(seg_two)
        };
        if ord != Ordering::Equal {
            return ord;
        }

        one = rest_one;
        two = rest_two;
    }

    match (one.is_empty(), two.is_empty()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, _) => Ordering::Greater,
    }
}

fn skip_separators(s: &[u8]) -> &[u8] {
    let skip = s
        .iter()
        .take_while(|&&c| !c.is_ascii_alphanumeric() && c != b'~' && c != b'^')
        .count();
    &s[skip..]
}

fn take_segment(s: &[u8], numeric: bool) -> (&[u8], &[u8]) {
    let len = if numeric {
        s.iter().take_while(|c| c.is_ascii_digit()).count()
    } else {
        s.iter().take_while(|c| c.is_ascii_alphabetic()).count()
    };
    s.split_at(len)
}

fn compare_numeric(a: &[u8], b: &[u8]) -> Ordering {
    let a = trim_leading_zeros(a);
    let b = trim_leading_zeros(b);
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn trim_leading_zeros(s: &[u8]) -> &[u8] {
    let zeros = s.iter().take_while(|&&c| c == b'0').count();
    &s[zeros..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering::*;

    #[test]
    fn test_parse_canonical() {
        let v = PackageVersion::parse("2:1.4.0-3");
        assert_eq!(v.epoch, 2);
        assert_eq!(v.upstream, "1.4.0");
        assert_eq!(v.release, "3");
    }

    #[test]
    fn test_parse_filename_encoding() {
        let v = PackageVersion::parse("2^1.4.0-3");
        assert_eq!(v.epoch, 2);
        assert_eq!(v.upstream, "1.4.0");
        assert_eq!(v.release, "3");
    }

    #[test]
    fn test_parse_without_epoch_or_release() {
        let v = PackageVersion::parse("1.4.0");
        assert_eq!(v.epoch, 0);
        assert_eq!(v.upstream, "1.4.0");
        assert_eq!(v.release, "");
    }

    #[test]
    fn test_parse_release_is_after_last_dash() {
        let v = PackageVersion::parse("1.0-rc-2");
        assert_eq!(v.upstream, "1.0-rc");
        assert_eq!(v.release, "2");
    }

    #[test]
    fn test_parse_delimiter_precedence() {
        // The delimiter right after the digit run is the epoch delimiter
        let v = PackageVersion::parse("1:2^3-1");
        assert_eq!(v.epoch, 1);
        assert_eq!(v.upstream, "2^3");

        let v = PackageVersion::parse("1^2:3-1");
        assert_eq!(v.epoch, 1);
        assert_eq!(v.upstream, "2:3");
    }

    #[test]
    fn test_parse_malformed_epoch() {
        let v = PackageVersion::parse("abc:1.0-1");
        assert_eq!(v.epoch, 0);
        assert_eq!(v.upstream, "abc:1.0");
        assert_eq!(v.release, "1");

        let v = PackageVersion::parse("99999999999999999999999:1.0");
        assert_eq!(v.epoch, 0);
        assert_eq!(v.upstream, "99999999999999999999999:1.0");
    }

    #[test]
    fn test_encodings() {
        let v = PackageVersion::new(1, "2.0", "3");
        assert_eq!(v.canonical(), "1:2.0-3");
        assert_eq!(v.filename(), "1^2.0-3");
        assert_eq!(v.to_string(), "1:2.0-3");

        let v = PackageVersion::new(0, "2.0", "3");
        assert_eq!(v.canonical(), "2.0-3");
        assert_eq!(v.filename(), "2.0-3");

        let v = PackageVersion::new(0, "2.0", "");
        assert_eq!(v.canonical(), "2.0");
    }

    #[test]
    fn test_epoch_dominates() {
        assert_eq!(vercmp("1:1.0-1", "5.0-1"), Greater);
        assert_eq!(vercmp("5.0-1", "1^1.0-1"), Less);
        assert_eq!(vercmp("1:1.0-1", "1^1.0-1"), Equal);
    }

    #[test]
    fn test_empty_versions() {
        assert_eq!(vercmp("", ""), Equal);
        assert_eq!(vercmp("", "0"), Less);
        assert_eq!(vercmp("0", ""), Greater);
    }

    #[test]
    fn test_release_skipped_when_absent() {
        assert_eq!(vercmp("1.0-1", "1.0"), Equal);
        assert_eq!(vercmp("1.0", "1.0-7"), Equal);
        assert_eq!(vercmp("1.0-2", "1.0-10"), Less);
    }

    #[test]
    fn test_rpmvercmp_table() {
        let cases = [
            ("1.0", "1.0", Equal),
            ("1.0", "2.0", Less),
            ("2.0", "10.0", Less),
            ("1.0", "1.0.1", Less),
            ("1.0.1", "1.0", Greater),
            ("1.002", "1.2", Equal),
            ("1.0a", "1.0", Greater),
            ("1.0a", "1.0b", Less),
            ("1.0a", "1.0.1", Less),
            ("1.0a", "1.0.a", Equal),
            ("1.5rc1", "1.5rc2", Less),
            ("1.5rc1", "1.5dev0", Greater),
            ("abc", "abd", Less),
            ("5.5p1", "5.5p10", Less),
            ("10xyz", "10.1xyz", Less),
            ("xyz10", "xyz10.1", Less),
            ("1.0~rc1", "1.0", Less),
            ("1.0~rc1", "1.0~rc2", Less),
            ("1.0~rc1~git1", "1.0~rc1", Less),
            ("1.0^", "1.0", Greater),
            ("1.0^git1", "1.0", Greater),
            ("1.0^git1", "1.0.1", Less),
            ("1.0^git1", "1.0^git2", Less),
            ("1.0^git1", "1.0~rc1", Greater),
        ];

        for (a, b, expected) in cases {
            assert_eq!(rpmvercmp(a, b), expected, "rpmvercmp({a}, {b})");
            assert_eq!(rpmvercmp(b, a), expected.reverse(), "rpmvercmp({b}, {a})");
        }
    }

    #[test]
    fn test_ordering_is_transitive() {
        let versions = [
            "", "0.9", "1.0", "1.0-1", "1.0-2", "1.0.1-1", "1.0a-1", "1.0~rc1-1", "1.0^git1-1",
            "1:0.1-1", "2^0.1", "abc:1.0", "10", "1.10", "1.9",
        ];

        for a in versions {
            for b in versions {
                for c in versions {
                    if vercmp(a, b) == Greater && vercmp(b, c) == Greater {
                        assert_eq!(vercmp(a, c), Greater, "{a} > {b} > {c}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_package_version_ord() {
        let mut versions: Vec<PackageVersion> = ["1.1-1", "1.0-1", "1:0.5-1", "1.2-1"]
            .iter()
            .map(|s| PackageVersion::parse(s))
            .collect();
        versions.sort();
        let sorted: Vec<String> = versions.iter().map(|v| v.canonical()).collect();
        assert_eq!(sorted, vec!["1.0-1", "1.1-1", "1.2-1", "1:0.5-1"]);
    }
}
