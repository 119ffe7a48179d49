//! Python to Debian version conversion.
//!
//! Python versions are parsed into a tagged structure (release, pre, post,
//! dev, local label) instead of being rewritten with string surgery, and the
//! converted strings are checked against the real dpkg comparison algorithm.
//!
//! The central invariant: for any two Python versions `v1 < v2` under
//! PEP 440 ordering, the converted strings satisfy `t(v1) < t(v2)` under
//! dpkg ordering. Pre-release and dev tags are joined with `~`, which dpkg
//! sorts before the end of the string, and post-release tags with `+`,
//! which sorts after it; a bare `a1`/`post1` suffix would sort in the wrong
//! place entirely.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{ConversionError, Result};

/// Debian revision appended to every converted version. Repackagings of the
/// same upstream version bump this counter.
pub const DEFAULT_REVISION: &str = "1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreTag {
    Alpha,
    Beta,
    Rc,
}

impl PreTag {
    fn debian(self) -> &'static str {
        match self {
            PreTag::Alpha => "a",
            PreTag::Beta => "b",
            PreTag::Rc => "rc",
        }
    }
}

/// A parsed Python package version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PythonVersion {
    pub epoch: u64,
    pub release: Vec<u64>,
    pub pre: Option<(PreTag, u64)>,
    pub post: Option<u64>,
    pub dev: Option<u64>,
    pub local: Option<String>,
}

fn unparsable(raw: &str, reason: impl Into<String>) -> ConversionError {
    ConversionError::UnparsableVersion {
        version: raw.to_string(),
        reason: reason.into(),
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn done(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn eat(&mut self, byte: u8) -> bool {
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_separator(&mut self) -> Option<u8> {
        match self.peek() {
            Some(sep @ (b'.' | b'_' | b'-')) => {
                self.pos += 1;
                Some(sep)
            }
            _ => None,
        }
    }

    fn take_number(&mut self) -> Option<u64> {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if self.pos == start {
            return None;
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()?
            .parse()
            .ok()
    }

    fn take_word(&mut self) -> &'a str {
        let start = self.pos;
        while matches!(self.peek(), Some(b'a'..=b'z')) {
            self.pos += 1;
        }
        std::str::from_utf8(&self.bytes[start..self.pos]).unwrap_or("")
    }
}

impl PythonVersion {
    /// Parse a PEP 440 style version string.
    pub fn parse(raw: &str) -> Result<Self> {
        let lowered = raw.trim().to_ascii_lowercase();
        let stripped = lowered.strip_prefix('v').unwrap_or(&lowered);
        let (public, local) = match stripped.split_once('+') {
            Some((public, label)) => (public, Some(label.to_string())),
            None => (stripped, None),
        };
        if let Some(label) = &local {
            let valid = !label.is_empty()
                && label
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
            if !valid {
                return Err(unparsable(raw, "invalid local version label"));
            }
        }
        if public.is_empty() {
            return Err(unparsable(raw, "empty version"));
        }

        let mut cursor = Cursor::new(public);

        let mut epoch = 0;
        let mark = cursor.pos;
        if let Some(number) = cursor.take_number() {
            if cursor.eat(b'!') {
                epoch = number;
            } else {
                cursor.pos = mark;
            }
        }

        let mut release = Vec::new();
        match cursor.take_number() {
            Some(number) => release.push(number),
            None => return Err(unparsable(raw, "expected a numeric release segment")),
        }
        loop {
            let mark = cursor.pos;
            if !cursor.eat(b'.') {
                break;
            }
            match cursor.take_number() {
                Some(number) => release.push(number),
                None => {
                    cursor.pos = mark;
                    break;
                }
            }
        }

        let mut pre: Option<(PreTag, u64)> = None;
        let mut post: Option<u64> = None;
        let mut dev: Option<u64> = None;
        while !cursor.done() {
            let sep = cursor.eat_separator();
            let word = cursor.take_word();
            if word.is_empty() {
                // Implicit post release, e.g. "1.0-1".
                if sep == Some(b'-') && post.is_none() && dev.is_none() {
                    if let Some(number) = cursor.take_number() {
                        post = Some(number);
                        continue;
                    }
                }
                return Err(unparsable(raw, "trailing characters after version"));
            }
            let number = {
                let mark = cursor.pos;
                cursor.eat_separator();
                match cursor.take_number() {
                    Some(number) => number,
                    None => {
                        cursor.pos = mark;
                        0
                    }
                }
            };
            match word {
                "a" | "alpha" => assign_pre(raw, &mut pre, &post, &dev, (PreTag::Alpha, number))?,
                "b" | "beta" => assign_pre(raw, &mut pre, &post, &dev, (PreTag::Beta, number))?,
                "c" | "rc" | "pre" | "preview" => {
                    assign_pre(raw, &mut pre, &post, &dev, (PreTag::Rc, number))?;
                }
                "post" | "rev" | "r" => {
                    if post.is_some() || dev.is_some() {
                        return Err(unparsable(raw, "post-release segment out of order"));
                    }
                    post = Some(number);
                }
                "dev" => {
                    if dev.is_some() {
                        return Err(unparsable(raw, "duplicate dev-release segment"));
                    }
                    dev = Some(number);
                }
                other => {
                    return Err(unparsable(raw, format!("unrecognized segment {other:?}")));
                }
            }
        }

        Ok(Self {
            epoch,
            release,
            pre,
            post,
            dev,
            local,
        })
    }

    /// Serialize the upstream part of the Debian version (everything before
    /// the revision).
    fn debian_upstream(&self) -> String {
        let mut out = String::new();
        if self.epoch > 0 {
            out.push_str(&self.epoch.to_string());
            out.push(':');
        }
        let mut release = trimmed_release(&self.release).to_vec();
        // Pad a bare major version; `1` and `1.0` must encode identically.
        if release.len() == 1 {
            release.push(0);
        }
        let rendered: Vec<String> = release.iter().map(u64::to_string).collect();
        out.push_str(&rendered.join("."));
        if let Some((tag, number)) = self.pre {
            out.push('~');
            out.push_str(tag.debian());
            out.push_str(&number.to_string());
        }
        if let Some(number) = self.post {
            out.push_str("+post");
            out.push_str(&number.to_string());
        }
        if let Some(number) = self.dev {
            // A bare dev release has to sort before any pre-release of the
            // same version, hence the doubled tilde.
            if self.pre.is_some() || self.post.is_some() {
                out.push_str("~dev");
            } else {
                out.push_str("~~dev");
            }
            out.push_str(&number.to_string());
        }
        out
    }
}

impl fmt::Display for PythonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}!", self.epoch)?;
        }
        let rendered: Vec<String> = self.release.iter().map(u64::to_string).collect();
        write!(f, "{}", rendered.join("."))?;
        if let Some((tag, number)) = self.pre {
            write!(f, "{}{number}", tag.debian())?;
        }
        if let Some(number) = self.post {
            write!(f, ".post{number}")?;
        }
        if let Some(number) = self.dev {
            write!(f, ".dev{number}")?;
        }
        if let Some(label) = &self.local {
            write!(f, "+{label}")?;
        }
        Ok(())
    }
}

/// Strip trailing zero components from a release segment. Never goes below
/// two components so the result stays visually distinguishable from a bare
/// major version.
fn trimmed_release(release: &[u64]) -> &[u64] {
    let mut end = release.len();
    while end > 2 && release[end - 1] == 0 {
        end -= 1;
    }
    &release[..end]
}

/// Sanitize a local version label for use inside a Debian revision:
/// lowercase, with runs of characters outside `[a-z0-9]` collapsed to a
/// single dot. A dash would shift the revision split and is never kept.
fn sanitize_local(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut pending_sep = false;
    for ch in label.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('.');
            }
            pending_sep = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Convert a Python version to a Debian version with the default revision.
pub fn transform_version(raw: &str) -> Result<String> {
    transform_version_with_revision(raw, DEFAULT_REVISION)
}

/// A Debian version string that sorts below every converted variant of
/// `raw`, its pre- and dev-releases included, for use as an exclusive lower
/// cut. `1.2` yields `1.2~~`, which sits below `1.2~a1-1` and `1.2~~dev1-1`
/// but above anything from the `1.1` series.
pub(crate) fn version_floor(raw: &str) -> Result<String> {
    let parsed = PythonVersion::parse(raw)?;
    Ok(format!("{}~~", parsed.debian_upstream()))
}

/// Convert a Python version to a Debian version with an explicit revision
/// counter.
///
/// The revision is appended before the local version label is restored, so
/// a version like `1.2.3+abc` becomes `1.2.3-1+abc0`. That ordering looks
/// surprising but is kept deliberately: downstream consumers match on the
/// exact string shape, and the label ends up inside the Debian revision
/// where it cannot disturb upstream-version comparison. The trailing digit
/// is enforced because dpkg and apt reject an all-letter revision.
pub fn transform_version_with_revision(raw: &str, revision: &str) -> Result<String> {
    let parsed = PythonVersion::parse(raw)?;
    let mut out = parsed.debian_upstream();
    out.push('-');
    out.push_str(revision);
    if let Some(label) = &parsed.local {
        let label = sanitize_local(label);
        if !label.is_empty() {
            out.push('+');
            out.push_str(&label);
        }
    }
    if !out.ends_with(|c: char| c.is_ascii_digit()) {
        out.push('0');
    }
    Ok(out)
}

/// Compare two Debian version strings using the dpkg algorithm:
/// `[epoch:]upstream[-revision]`, alternating non-digit and digit spans,
/// with `~` sorting before everything including the end of the string.
pub fn compare_debian_versions(a: &str, b: &str) -> Ordering {
    let (a_epoch, a_upstream, a_revision) = split_debian(a);
    let (b_epoch, b_upstream, b_revision) = split_debian(b);
    a_epoch
        .cmp(&b_epoch)
        .then_with(|| compare_debian_part(a_upstream, b_upstream))
        .then_with(|| compare_debian_part(a_revision, b_revision))
}

fn split_debian(version: &str) -> (u64, &str, &str) {
    let (epoch, rest) = match version.split_once(':') {
        Some((epoch, rest))
            if !epoch.is_empty() && epoch.bytes().all(|b| b.is_ascii_digit()) =>
        {
            (epoch.parse().unwrap_or(0), rest)
        }
        _ => (0, version),
    };
    match rest.rsplit_once('-') {
        Some((upstream, revision)) => (epoch, upstream, revision),
        None => (epoch, rest, "0"),
    }
}

fn compare_debian_part(a: &str, b: &str) -> Ordering {
    let mut a = a.as_bytes();
    let mut b = b.as_bytes();
    loop {
        let a_span = non_digit_span(a);
        let b_span = non_digit_span(b);
        let ord = compare_non_digits(&a[..a_span], &b[..b_span]);
        if ord != Ordering::Equal {
            return ord;
        }
        a = &a[a_span..];
        b = &b[b_span..];
        if a.is_empty() && b.is_empty() {
            return Ordering::Equal;
        }

        let a_span = digit_span(a);
        let b_span = digit_span(b);
        let ord = compare_numeric(&a[..a_span], &b[..b_span]);
        if ord != Ordering::Equal {
            return ord;
        }
        a = &a[a_span..];
        b = &b[b_span..];
        if a.is_empty() && b.is_empty() {
            return Ordering::Equal;
        }
    }
}

fn non_digit_span(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .position(|b| b.is_ascii_digit())
        .unwrap_or(bytes.len())
}

fn digit_span(bytes: &[u8]) -> usize {
    bytes
        .iter()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(bytes.len())
}

fn char_order(byte: u8) -> i32 {
    if byte == b'~' {
        -1
    } else if byte.is_ascii_alphabetic() {
        i32::from(byte)
    } else {
        i32::from(byte) + 256
    }
}

fn compare_non_digits(a: &[u8], b: &[u8]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let a_order = a.get(i).map_or(0, |&byte| char_order(byte));
        let b_order = b.get(i).map_or(0, |&byte| char_order(byte));
        match a_order.cmp(&b_order) {
            Ordering::Equal => {}
            ord => return ord,
        }
    }
    Ordering::Equal
}

fn compare_numeric(a: &[u8], b: &[u8]) -> Ordering {
    let a = strip_leading_zeros(a);
    let b = strip_leading_zeros(b);
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|&b| b != b'0')
        .unwrap_or(bytes.len());
    &bytes[start..]
}

fn assign_pre(
    raw: &str,
    pre: &mut Option<(PreTag, u64)>,
    post: &Option<u64>,
    dev: &Option<u64>,
    value: (PreTag, u64),
) -> Result<()> {
    if pre.is_some() || post.is_some() || dev.is_some() {
        return Err(unparsable(raw, "pre-release segment out of order"));
    }
    *pre = Some(value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_release_gets_a_revision() -> anyhow::Result<()> {
        assert_eq!(transform_version("1.2.3")?, "1.2.3-1");
        Ok(())
    }

    #[test]
    fn trailing_zeros_are_stripped_to_two_components() -> anyhow::Result<()> {
        assert_eq!(transform_version("1.0.0")?, "1.0-1");
        assert_eq!(transform_version("1.0")?, "1.0-1");
        assert_eq!(transform_version("1")?, "1.0-1");
        assert_eq!(transform_version("1.0.1")?, "1.0.1-1");
        Ok(())
    }

    #[test]
    fn pre_releases_use_tilde() -> anyhow::Result<()> {
        assert_eq!(transform_version("1.0a1")?, "1.0~a1-1");
        assert_eq!(transform_version("1.0b2")?, "1.0~b2-1");
        assert_eq!(transform_version("1.0rc1")?, "1.0~rc1-1");
        // The 'c' spelling normalizes to 'rc'.
        assert_eq!(transform_version("1.0c1")?, "1.0~rc1-1");
        Ok(())
    }

    #[test]
    fn post_and_dev_releases() -> anyhow::Result<()> {
        assert_eq!(transform_version("1.0.post1")?, "1.0+post1-1");
        assert_eq!(transform_version("1.0.dev3")?, "1.0~~dev3-1");
        assert_eq!(transform_version("1.0a1.dev1")?, "1.0~a1~dev1-1");
        assert_eq!(transform_version("1.0.post1.dev2")?, "1.0+post1~dev2-1");
        Ok(())
    }

    #[test]
    fn epoch_is_preserved() -> anyhow::Result<()> {
        assert_eq!(transform_version("2!1.0")?, "2:1.0-1");
        Ok(())
    }

    #[test]
    fn local_label_lands_after_the_revision() -> anyhow::Result<()> {
        assert_eq!(transform_version("1.2.3+abc1")?, "1.2.3-1+abc1");
        // A letter-final label gets a digit appended so dpkg accepts the
        // revision.
        assert_eq!(transform_version("1.2.3+gitabc")?, "1.2.3-1+gitabc0");
        // Separators inside the label become dots, never dashes.
        assert_eq!(transform_version("1.0+ubuntu-1")?, "1.0-1+ubuntu.1");
        Ok(())
    }

    #[test]
    fn custom_revision_counter() -> anyhow::Result<()> {
        assert_eq!(transform_version_with_revision("1.2.3", "2")?, "1.2.3-2");
        Ok(())
    }

    #[test]
    fn implicit_post_release_spelling() -> anyhow::Result<()> {
        assert_eq!(transform_version("1.0-1")?, "1.0+post1-1");
        assert_eq!(transform_version("1.0.rev2")?, "1.0+post2-1");
        Ok(())
    }

    #[test]
    fn garbage_is_rejected() {
        for raw in ["", "dev", "not-a-version", "1.0.huh1", "1.0++x", "+abc"] {
            let err = PythonVersion::parse(raw).unwrap_err();
            assert!(
                matches!(err, ConversionError::UnparsableVersion { .. }),
                "expected UnparsableVersion for {raw:?}"
            );
        }
    }

    #[test]
    fn debian_comparison_basics() {
        assert_eq!(compare_debian_versions("1.0-1", "1.0-1"), Ordering::Equal);
        assert_eq!(compare_debian_versions("1.0-1", "1.0-2"), Ordering::Less);
        assert_eq!(compare_debian_versions("2.0-1", "10.0-1"), Ordering::Less);
        assert_eq!(compare_debian_versions("1.0~a1-1", "1.0-1"), Ordering::Less);
        assert_eq!(
            compare_debian_versions("1.0+post1-1", "1.0-1"),
            Ordering::Greater
        );
        assert_eq!(compare_debian_versions("1:0.1-1", "2.0-1"), Ordering::Greater);
        assert_eq!(compare_debian_versions("1.0", "1.0-0"), Ordering::Equal);
    }

    /// The core ordering property: PEP 440 order maps into dpkg order. The
    /// corpus is listed in ascending PEP 440 order, so the list position is
    /// the expected comparison result for every pair.
    #[test]
    fn transformation_preserves_ordering() -> anyhow::Result<()> {
        let corpus = [
            "0.5",
            "1.0.dev1",
            "1.0.dev2",
            "1.0a1.dev1",
            "1.0a1",
            "1.0a2",
            "1.0b1",
            "1.0rc1",
            "1.0c2",
            "1.0",
            "1.0+local",
            "1.0.post1.dev1",
            "1.0.post1",
            "1.0.post2",
            "1.0.1",
            "1.1",
            "1.2.3a1",
            "1.2.3",
            "2.0",
            "2.0.0.1",
            "10.0",
            "2!0.1",
        ];
        for (i, left) in corpus.iter().enumerate() {
            for (j, right) in corpus.iter().enumerate() {
                let target_left = transform_version(left)?;
                let target_right = transform_version(right)?;
                let actual = compare_debian_versions(&target_left, &target_right);
                assert_eq!(
                    i.cmp(&j),
                    actual,
                    "{left} vs {right} became {target_left} vs {target_right}"
                );
            }
        }
        Ok(())
    }

    #[test]
    fn equal_python_versions_stay_equal() -> anyhow::Result<()> {
        assert_eq!(
            compare_debian_versions(&transform_version("1.0")?, &transform_version("1.0.0")?),
            Ordering::Equal
        );
        Ok(())
    }
}
