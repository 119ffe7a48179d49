//! Python to Debian package name conversion.
//!
//! Debian package names are lowercase with dash separators, so PyPI names
//! like `MySQL-python` or `simple_json` need normalizing before the
//! configured prefix is applied. Extras have no Debian equivalent; they are
//! encoded into the package name so that `foo[ssl]` and `foo[cli]` become
//! distinct Debian packages.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{ConversionError, Result};

/// Name conversion options threaded through every call; there is no hidden
/// global state.
#[derive(Debug, Clone)]
pub struct NamingConfig {
    /// Prefix applied to converted names, joined with a dash.
    pub prefix: String,
    /// Per-package overrides, keyed by normalized Python name. The override
    /// value is used verbatim and bypasses prefixing and extras encoding.
    pub rename: HashMap<String, String>,
    /// Normalized Python names exempt from the prefix.
    pub no_prefix: HashSet<String>,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            prefix: "python3".to_string(),
            rename: HashMap::new(),
            no_prefix: HashSet::new(),
        }
    }
}

/// Normalize a Python package name: lowercase, with runs of characters that
/// are not alphanumeric collapsed to a single dash.
///
/// ```
/// use pydeb_domain::normalize_name;
/// assert_eq!(normalize_name("MySQL-python"), "mysql-python");
/// assert_eq!(normalize_name("simple_json"), "simple-json");
/// ```
pub fn normalize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('-');
            }
            pending_sep = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Convert a Python package name (plus selected extras) to a Debian package
/// name under the given configuration.
///
/// The mapping is deterministic: the same `(source_name, extras)` pair under
/// the same configuration always yields the same result. Callers cache the
/// result per run; this function does no caching of its own.
pub fn map_name(
    source_name: &str,
    extras: &BTreeSet<String>,
    config: &NamingConfig,
) -> Result<String> {
    let normalized = normalize_name(source_name);
    if normalized.is_empty() {
        return Err(ConversionError::InvalidName {
            name: source_name.to_string(),
        });
    }
    if let Some(target) = config.rename.get(&normalized) {
        return Ok(target.clone());
    }
    let combined = if config.no_prefix.contains(&normalized) {
        normalized
    } else {
        normalize_name(&format!("{} {}", config.prefix, normalized))
    };
    // Compact adjacent repeated words so `python` + `python-mcrypt` becomes
    // `python-mcrypt` instead of `python-python-mcrypt`.
    let mut words: Vec<&str> = combined.split('-').collect();
    words.dedup();
    let mut name = words.join("-");
    // Normalization can collapse distinct spellings, so dedup again after.
    let encoded: BTreeSet<String> = extras
        .iter()
        .map(|extra| normalize_name(extra))
        .filter(|extra| !extra.is_empty())
        .collect();
    for extra in encoded {
        name.push('-');
        name.push_str(&extra);
    }
    Ok(name)
}

/// The name a package with extras additionally provides: the converted name
/// without the extras encoding, so a dependency on the plain package is
/// satisfied by the extra-bearing one. `None` when there are no extras.
pub fn provides_name(
    source_name: &str,
    extras: &BTreeSet<String>,
    config: &NamingConfig,
) -> Result<Option<String>> {
    if extras.is_empty() {
        return Ok(None);
    }
    map_name(source_name, &BTreeSet::new(), config).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extras(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn applies_default_prefix() -> anyhow::Result<()> {
        let config = NamingConfig::default();
        assert_eq!(map_name("foo", &BTreeSet::new(), &config)?, "python3-foo");
        Ok(())
    }

    #[test]
    fn normalizes_case_and_separators() -> anyhow::Result<()> {
        let config = NamingConfig::default();
        assert_eq!(
            map_name("MySQL_python", &BTreeSet::new(), &config)?,
            "python3-mysql-python"
        );
        Ok(())
    }

    #[test]
    fn compacts_repeated_words() -> anyhow::Result<()> {
        let config = NamingConfig {
            prefix: "python".to_string(),
            ..NamingConfig::default()
        };
        assert_eq!(
            map_name("python-mcrypt", &BTreeSet::new(), &config)?,
            "python-mcrypt"
        );
        Ok(())
    }

    #[test]
    fn encodes_extras_sorted_and_deduplicated() -> anyhow::Result<()> {
        let config = NamingConfig::default();
        assert_eq!(
            map_name("raven", &extras(&["Flask", "flask"]), &config)?,
            "python3-raven-flask"
        );
        assert_eq!(
            map_name("raven", &extras(&["zope", "flask"]), &config)?,
            "python3-raven-flask-zope"
        );
        Ok(())
    }

    #[test]
    fn distinct_extras_map_to_distinct_names() -> anyhow::Result<()> {
        let config = NamingConfig::default();
        let one = map_name("foo", &extras(&["extra1"]), &config)?;
        let two = map_name("foo", &extras(&["extra2"]), &config)?;
        assert_ne!(one, two);
        assert_eq!(
            provides_name("foo", &extras(&["extra1"]), &config)?,
            Some("python3-foo".to_string())
        );
        assert_eq!(
            provides_name("foo", &extras(&["extra2"]), &config)?,
            Some("python3-foo".to_string())
        );
        Ok(())
    }

    #[test]
    fn rename_override_bypasses_prefix_and_extras() -> anyhow::Result<()> {
        let mut config = NamingConfig::default();
        config
            .rename
            .insert("foo-bar".to_string(), "custom-name".to_string());
        assert_eq!(
            map_name("Foo_Bar", &extras(&["ssl"]), &config)?,
            "custom-name"
        );
        Ok(())
    }

    #[test]
    fn no_prefix_set_omits_prefix() -> anyhow::Result<()> {
        let mut config = NamingConfig::default();
        config.no_prefix.insert("foo".to_string());
        assert_eq!(map_name("foo", &BTreeSet::new(), &config)?, "foo");
        Ok(())
    }

    #[test]
    fn mapping_is_deterministic() -> anyhow::Result<()> {
        let config = NamingConfig::default();
        let selected = extras(&["a", "b"]);
        let first = map_name("Some_Package", &selected, &config)?;
        let second = map_name("Some_Package", &selected, &config)?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn empty_name_is_rejected() {
        let config = NamingConfig::default();
        let err = map_name("--", &BTreeSet::new(), &config).unwrap_err();
        assert!(matches!(err, ConversionError::InvalidName { .. }));
    }
}
