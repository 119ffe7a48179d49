//! Debian control file handling: an ordered field map with the merge
//! semantics the conversion pipeline layers on top of it.

use indexmap::IndexMap;

use crate::error::{ConversionError, Result};

/// Control fields whose values are comma-separated relationship lists.
/// Merging these means taking the union of entries; every other field is
/// replaced wholesale.
pub const RELATIONSHIP_FIELDS: &[&str] = &[
    "Breaks",
    "Conflicts",
    "Depends",
    "Enhances",
    "Pre-Depends",
    "Provides",
    "Recommends",
    "Replaces",
    "Suggests",
];

/// An ordered set of control fields. Field names are case-insensitive and
/// stored in canonical capitalization; insertion order is preserved so the
/// rendered file is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlDocument {
    fields: IndexMap<String, String>,
}

/// Canonical capitalization: each dash-separated word starts uppercase, the
/// rest lowercase. This matches the spelling dpkg tools emit for every field
/// this engine touches.
fn canonical_field_name(raw: &str) -> String {
    raw.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

impl ControlDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .get(&canonical_field_name(field))
            .map(String::as_str)
    }

    pub fn set(&mut self, field: &str, value: impl Into<String>) {
        self.fields
            .insert(canonical_field_name(field), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<String> {
        self.fields.shift_remove(&canonical_field_name(field))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Parse a single control paragraph. Continuation lines (leading space
    /// or tab) extend the previous field; a lone `.` marks a blank line in
    /// a multi-line value.
    pub fn parse(text: &str) -> Result<Self> {
        let mut document = Self::new();
        let mut current: Option<String> = None;
        for line in text.lines() {
            if line.trim().is_empty() {
                // Paragraph separator; everything we handle is a single
                // paragraph, so stop at the first one.
                if !document.is_empty() {
                    break;
                }
                continue;
            }
            if line.starts_with(' ') || line.starts_with('\t') {
                let Some(field) = &current else {
                    return Err(ConversionError::MalformedControlField {
                        field: String::new(),
                        reason: format!("continuation line before any field: {line:?}"),
                    });
                };
                let value = document.fields.get_mut(field).unwrap_or_else(|| {
                    unreachable!("current field always present in the map")
                });
                value.push('\n');
                let continuation = line.trim_start();
                if continuation != "." {
                    value.push_str(continuation);
                }
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                return Err(ConversionError::MalformedControlField {
                    field: line.to_string(),
                    reason: "line is not a field".to_string(),
                });
            };
            let name = canonical_field_name(name.trim());
            document.fields.insert(name.clone(), value.trim().to_string());
            current = Some(name);
        }
        Ok(document)
    }

    /// Render the paragraph. Embedded newlines in values become
    /// continuation lines; blank lines inside a value become ` .`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.fields {
            out.push_str(name);
            out.push(':');
            for (index, line) in value.split('\n').enumerate() {
                if index > 0 {
                    out.push_str("\n ");
                    if line.is_empty() {
                        out.push('.');
                    } else {
                        out.push_str(line);
                    }
                } else {
                    out.push(' ');
                    out.push_str(line);
                }
            }
            out.push('\n');
        }
        out
    }
}

/// Split a relationship field value into its entries. Commas never occur
/// inside an entry, so a flat split suffices.
pub fn parse_relationship_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn is_relationship_field(field: &str) -> bool {
    RELATIONSHIP_FIELDS.contains(&field)
}

/// Merge an overlay into a base document. Relationship fields take the
/// union of entries (base order first, new entries appended); all other
/// fields are replaced by the overlay value.
pub fn merge_layers(base: &mut ControlDocument, overlay: &ControlDocument) {
    for (field, value) in overlay.iter() {
        if is_relationship_field(field) {
            let mut entries = base
                .get(field)
                .map(parse_relationship_list)
                .unwrap_or_default();
            for entry in parse_relationship_list(value) {
                if !entries.contains(&entry) {
                    entries.push(entry);
                }
            }
            base.set(field, entries.join(", "));
        } else {
            base.set(field, value);
        }
    }
}
