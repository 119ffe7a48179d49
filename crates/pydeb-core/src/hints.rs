//! Packaging hints shipped inside Python distributions.
//!
//! Some upstreams bundle a `stdeb.cfg` describing the Debian control
//! fields their package needs (typically system library dependencies pip
//! cannot know about). Those hints are honored: a `[DEFAULT]` section
//! applies to any package, a section named after the package applies to it
//! alone, with the named section winning.

use std::fs;

use anyhow::{Context, Result};
use camino::Utf8Path;
use walkdir::WalkDir;

use pydeb_domain::{merge_layers, normalize_name, ControlDocument};

/// Scan a staging tree for `stdeb.cfg` files relevant to `source_name` and
/// merge their fields.
pub fn collect_hints(staging: &Utf8Path, source_name: &str) -> Result<ControlDocument> {
    let mut hints = ControlDocument::new();
    for entry in WalkDir::new(staging.as_std_path())
        .into_iter()
        .filter_map(std::result::Result::ok)
    {
        if !entry.file_type().is_file() || entry.file_name() != "stdeb.cfg" {
            continue;
        }
        let text = fs::read_to_string(entry.path())
            .with_context(|| format!("cannot read {}", entry.path().display()))?;
        let parsed = parse_stdeb_cfg(&text, source_name);
        if !parsed.is_empty() {
            tracing::info!(path = %entry.path().display(), "found packaging hints");
            merge_layers(&mut hints, &parsed);
        }
    }
    Ok(hints)
}

/// Parse one `stdeb.cfg`. The format is INI: `[section]` headers, `key =
/// value` or `key: value` entries, indented continuation lines. Unknown
/// sections are ignored; malformed lines are skipped rather than failing
/// the conversion over a cosmetic file.
fn parse_stdeb_cfg(text: &str, source_name: &str) -> ControlDocument {
    let wanted = normalize_name(source_name);
    let mut defaults = ControlDocument::new();
    let mut named = ControlDocument::new();
    let mut section: Option<String> = None;
    let mut current_field: Option<String> = None;
    for line in text.lines() {
        let trimmed = line.trim_end();
        if trimmed.trim_start().starts_with(['#', ';']) || trimmed.trim().is_empty() {
            continue;
        }
        if let Some(header) = trimmed
            .trim()
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
        {
            section = Some(header.trim().to_string());
            current_field = None;
            continue;
        }
        let Some(section_name) = &section else {
            continue;
        };
        let target = if section_name.eq_ignore_ascii_case("DEFAULT") {
            &mut defaults
        } else if normalize_name(section_name) == wanted {
            &mut named
        } else {
            continue;
        };
        if line.starts_with([' ', '\t']) {
            if let Some(field) = &current_field {
                if let Some(existing) = target.get(field) {
                    let value = format!("{existing}\n{}", trimmed.trim_start());
                    target.set(field, value);
                }
            }
            continue;
        }
        let Some((key, value)) = trimmed.split_once(['=', ':']) else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        target.set(key, value.trim().to_string());
        current_field = Some(key.to_string());
    }
    merge_layers(&mut defaults, &named);
    defaults
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
; packaging hints
[DEFAULT]
Depends3: libmysqlclient-dev

[MySQL-python]
Depends3 = libmysqlclient21
Section: python
"#;

    #[test]
    fn named_section_overlays_defaults() {
        let hints = parse_stdeb_cfg(SAMPLE, "mysql_python");
        assert_eq!(hints.get("Section"), Some("python"));
        // Depends3 is not a relationship field name, so the named section
        // replaces the default outright.
        assert_eq!(hints.get("Depends3"), Some("libmysqlclient21"));
    }

    #[test]
    fn unrelated_sections_are_ignored() {
        let hints = parse_stdeb_cfg(SAMPLE, "other-package");
        assert_eq!(hints.get("Depends3"), Some("libmysqlclient-dev"));
        assert_eq!(hints.get("Section"), None);
    }

    #[test]
    fn scan_finds_nested_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = Utf8Path::from_path(dir.path()).expect("utf-8 temp path");
        let nested = root.join("usr/lib/python3.12/site-packages/foo");
        fs::create_dir_all(&nested)?;
        fs::write(nested.join("stdeb.cfg"), "[foo]\nDepends = libfoo1\n")?;
        let hints = collect_hints(root, "foo")?;
        assert_eq!(hints.get("Depends"), Some("libfoo1"));
        Ok(())
    }
}
