//! Configuration layering for the converter.
//!
//! Four layers, later ones winning: built-in defaults, a TOML configuration
//! file, `PYDEB_*` environment variables, and command-line options. The
//! resolved [`ConverterConfig`] is immutable for the duration of a run.

use std::collections::HashMap;
use std::env;
use std::fs;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use pydeb_domain::{normalize_name, ControlDocument, NamingConfig};

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub(crate) fn flag_is_enabled(&self, key: &str) -> bool {
        match self.var(key) {
            Some(value) => {
                let lowered = value.to_ascii_lowercase();
                lowered == "1" || lowered == "true" || lowered == "yes"
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// Options collected from the command line.
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    pub config: Option<Utf8PathBuf>,
    pub repository: Option<Utf8PathBuf>,
    pub name_prefix: Option<String>,
    pub no_name_prefix: Vec<String>,
    pub rename: Vec<(String, String)>,
    pub use_system_package: Vec<(String, String)>,
    pub install_prefix: Option<Utf8PathBuf>,
    pub python: Option<String>,
    pub report_dependencies: Option<Utf8PathBuf>,
    pub inject_dependencies: Option<Utf8PathBuf>,
    pub keep_going: bool,
    pub auto_confirm: bool,
    pub post_build: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    general: GeneralSection,
    #[serde(default)]
    rename: HashMap<String, String>,
    #[serde(default)]
    replacements: HashMap<String, String>,
    #[serde(default)]
    fields: HashMap<String, HashMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct GeneralSection {
    repository: Option<String>,
    name_prefix: Option<String>,
    #[serde(default)]
    no_name_prefix: Vec<String>,
    install_prefix: Option<String>,
    python: Option<String>,
    auto_confirm: Option<bool>,
    post_build: Option<String>,
    lintian: Option<bool>,
}

impl ConfigFile {
    pub fn parse(text: &str) -> Result<Self> {
        toml_edit::de::from_str(text).context("invalid configuration file")
    }

    pub fn load(path: &Utf8Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read configuration file {path}"))?;
        Self::parse(&text).with_context(|| format!("in configuration file {path}"))
    }
}

/// Control field overrides for one package: merged fields follow the usual
/// relationship-union semantics, replaced fields win outright.
#[derive(Debug, Clone, Default)]
pub struct FieldOverrides {
    pub merge: ControlDocument,
    pub replace: ControlDocument,
}

/// The fully resolved configuration of a conversion run.
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    /// Directory produced archives land in, and the dedup scan root.
    pub repository: Utf8PathBuf,
    pub naming: NamingConfig,
    /// Requirements satisfied by existing system packages, keyed by
    /// normalized Python name.
    pub replacements: HashMap<String, String>,
    pub install_prefix: Utf8PathBuf,
    pub python: Option<String>,
    pub auto_confirm: bool,
    pub keep_going: bool,
    pub post_build: Option<String>,
    pub report_dependencies: Option<Utf8PathBuf>,
    pub inject_dependencies: Option<Utf8PathBuf>,
    /// Keyed by normalized Python package name.
    pub field_overrides: HashMap<String, FieldOverrides>,
    pub lintian: bool,
}

impl ConverterConfig {
    pub fn resolve(options: &ConvertOptions) -> Result<Self> {
        let snapshot = EnvSnapshot::capture();
        let path = options
            .config
            .clone()
            .or_else(|| snapshot.var("PYDEB_CONFIG").map(Utf8PathBuf::from));
        let file = match path {
            Some(path) => ConfigFile::load(&path)?,
            None => ConfigFile::default(),
        };
        Self::from_parts(options, &snapshot, &file)
    }

    pub(crate) fn from_parts(
        options: &ConvertOptions,
        snapshot: &EnvSnapshot,
        file: &ConfigFile,
    ) -> Result<Self> {
        let repository = options
            .repository
            .clone()
            .or_else(|| snapshot.var("PYDEB_REPOSITORY").map(Utf8PathBuf::from))
            .or_else(|| file.general.repository.clone().map(Utf8PathBuf::from))
            .unwrap_or_else(|| Utf8PathBuf::from("/tmp"));

        let prefix = options
            .name_prefix
            .clone()
            .or_else(|| snapshot.var("PYDEB_NAME_PREFIX").map(ToString::to_string))
            .or_else(|| file.general.name_prefix.clone())
            .unwrap_or_else(|| "python3".to_string());

        let mut naming = NamingConfig {
            prefix,
            ..NamingConfig::default()
        };
        for (source, target) in file
            .rename
            .iter()
            .map(|(s, t)| (s.clone(), t.clone()))
            .chain(pairs_from_env(snapshot, "PYDEB_RENAME"))
            .chain(options.rename.iter().cloned())
        {
            naming.rename.insert(normalize_name(&source), target);
        }
        for name in file
            .general
            .no_name_prefix
            .iter()
            .cloned()
            .chain(list_from_env(snapshot, "PYDEB_NO_NAME_PREFIX"))
            .chain(options.no_name_prefix.iter().cloned())
        {
            naming.no_prefix.insert(normalize_name(&name));
        }

        let mut replacements = HashMap::new();
        for (source, target) in file
            .replacements
            .iter()
            .map(|(s, t)| (s.clone(), t.clone()))
            .chain(pairs_from_env(snapshot, "PYDEB_USE_SYSTEM_PACKAGE"))
            .chain(options.use_system_package.iter().cloned())
        {
            replacements.insert(normalize_name(&source), target);
        }

        let install_prefix = options
            .install_prefix
            .clone()
            .or_else(|| snapshot.var("PYDEB_INSTALL_PREFIX").map(Utf8PathBuf::from))
            .or_else(|| file.general.install_prefix.clone().map(Utf8PathBuf::from))
            .unwrap_or_else(|| Utf8PathBuf::from("/usr"));

        let python = options
            .python
            .clone()
            .or_else(|| snapshot.var("PYDEB_PYTHON").map(ToString::to_string))
            .or_else(|| file.general.python.clone());

        let auto_confirm = options.auto_confirm
            || snapshot.flag_is_enabled("PYDEB_AUTO_CONFIRM")
            || file.general.auto_confirm.unwrap_or(false);

        let post_build = options
            .post_build
            .clone()
            .or_else(|| snapshot.var("PYDEB_POST_BUILD").map(ToString::to_string))
            .or_else(|| file.general.post_build.clone());

        let mut field_overrides = HashMap::new();
        for (package, fields) in &file.fields {
            let entry: &mut FieldOverrides = field_overrides
                .entry(normalize_name(package))
                .or_default();
            for (field, value) in fields {
                match field.strip_suffix('!') {
                    Some(field) => entry.replace.set(field, value.clone()),
                    None => entry.merge.set(field, value.clone()),
                }
            }
        }

        Ok(Self {
            repository,
            naming,
            replacements,
            install_prefix,
            python,
            auto_confirm,
            keep_going: options.keep_going,
            post_build,
            report_dependencies: options.report_dependencies.clone(),
            inject_dependencies: options.inject_dependencies.clone(),
            field_overrides,
            lintian: file.general.lintian.unwrap_or(true),
        })
    }
}

/// List-valued environment variables hold whitespace-separated `FROM,TO`
/// pairs; malformed entries are dropped with a warning rather than failing
/// the run over one bad shell export.
fn pairs_from_env(snapshot: &EnvSnapshot, key: &str) -> Vec<(String, String)> {
    let Some(raw) = snapshot.var(key) else {
        return Vec::new();
    };
    raw.split_whitespace()
        .filter_map(|entry| match entry.split_once(',') {
            Some((from, to)) if !from.is_empty() && !to.is_empty() => {
                Some((from.to_string(), to.to_string()))
            }
            _ => {
                tracing::warn!(%key, entry, "ignoring malformed pair");
                None
            }
        })
        .collect()
}

fn list_from_env(snapshot: &EnvSnapshot, key: &str) -> Vec<String> {
    snapshot
        .var(key)
        .map(|raw| {
            raw.split([',', ' '])
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[general]
repository = "/srv/packages"
name-prefix = "python3"
no-name-prefix = ["some-tool"]
install-prefix = "/usr"
auto-confirm = true

[rename]
"six" = "python3-six-custom"

[replacements]
"pkg-resources" = "python3-pkg-resources"

[fields."coloredlogs"]
"Depends" = "python3-humanfriendly"
"Section!" = "utils"
"#;

    #[test]
    fn defaults_apply_without_any_layer() -> Result<()> {
        let options = ConvertOptions::default();
        let snapshot = EnvSnapshot::testing(&[]);
        let config = ConverterConfig::from_parts(&options, &snapshot, &ConfigFile::default())?;
        assert_eq!(config.repository, Utf8PathBuf::from("/tmp"));
        assert_eq!(config.naming.prefix, "python3");
        assert_eq!(config.install_prefix, Utf8PathBuf::from("/usr"));
        assert!(!config.auto_confirm);
        assert!(config.lintian);
        Ok(())
    }

    #[test]
    fn file_layer_is_read() -> Result<()> {
        let options = ConvertOptions::default();
        let snapshot = EnvSnapshot::testing(&[]);
        let file = ConfigFile::parse(SAMPLE)?;
        let config = ConverterConfig::from_parts(&options, &snapshot, &file)?;
        assert_eq!(config.repository, Utf8PathBuf::from("/srv/packages"));
        assert!(config.auto_confirm);
        assert_eq!(
            config.naming.rename.get("six"),
            Some(&"python3-six-custom".to_string())
        );
        assert!(config.naming.no_prefix.contains("some-tool"));
        assert_eq!(
            config.replacements.get("pkg-resources"),
            Some(&"python3-pkg-resources".to_string())
        );
        let overrides = config.field_overrides.get("coloredlogs").unwrap();
        assert_eq!(overrides.merge.get("Depends"), Some("python3-humanfriendly"));
        assert_eq!(overrides.replace.get("Section"), Some("utils"));
        Ok(())
    }

    #[test]
    fn environment_overrides_file() -> Result<()> {
        let options = ConvertOptions::default();
        let snapshot = EnvSnapshot::testing(&[
            ("PYDEB_REPOSITORY", "/var/cache/pydeb"),
            ("PYDEB_NAME_PREFIX", "python3.12"),
        ]);
        let file = ConfigFile::parse(SAMPLE)?;
        let config = ConverterConfig::from_parts(&options, &snapshot, &file)?;
        assert_eq!(config.repository, Utf8PathBuf::from("/var/cache/pydeb"));
        assert_eq!(config.naming.prefix, "python3.12");
        Ok(())
    }

    #[test]
    fn command_line_overrides_everything() -> Result<()> {
        let options = ConvertOptions {
            repository: Some(Utf8PathBuf::from("/home/user/pkgs")),
            rename: vec![("six".to_string(), "cli-wins".to_string())],
            ..ConvertOptions::default()
        };
        let snapshot = EnvSnapshot::testing(&[("PYDEB_REPOSITORY", "/var/cache/pydeb")]);
        let file = ConfigFile::parse(SAMPLE)?;
        let config = ConverterConfig::from_parts(&options, &snapshot, &file)?;
        assert_eq!(config.repository, Utf8PathBuf::from("/home/user/pkgs"));
        assert_eq!(config.naming.rename.get("six"), Some(&"cli-wins".to_string()));
        Ok(())
    }

    #[test]
    fn list_valued_environment_variables_parse() -> Result<()> {
        let options = ConvertOptions::default();
        let snapshot = EnvSnapshot::testing(&[
            ("PYDEB_RENAME", "six,python3-six-env broken"),
            ("PYDEB_NO_NAME_PREFIX", "foo, bar"),
            ("PYDEB_USE_SYSTEM_PACKAGE", "lxml,python3-lxml"),
        ]);
        let config = ConverterConfig::from_parts(&options, &snapshot, &ConfigFile::default())?;
        assert_eq!(
            config.naming.rename.get("six"),
            Some(&"python3-six-env".to_string())
        );
        assert!(config.naming.no_prefix.contains("foo"));
        assert!(config.naming.no_prefix.contains("bar"));
        assert_eq!(
            config.replacements.get("lxml"),
            Some(&"python3-lxml".to_string())
        );
        Ok(())
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(ConfigFile::parse("[general]\nrepo = \"/tmp\"\n").is_err());
    }
}
