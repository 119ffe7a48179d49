//! Parsed Python requirements and the interpreter facts needed to evaluate
//! their environment markers.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use pep440_rs::VersionSpecifiers;
use pep508_rs::{MarkerEnvironment, Requirement as PepRequirement, StringVersion, VersionOrUrl};
use serde::Deserialize;

use crate::error::{ConversionError, Result};
use crate::name::normalize_name;

/// Facts about the Python interpreter that conversion targets, as reported
/// by the interpreter itself.
#[derive(Debug, Clone, Deserialize)]
pub struct InterpreterFacts {
    pub implementation_name: String,
    pub implementation_version: String,
    pub os_name: String,
    pub platform_machine: String,
    pub platform_python_implementation: String,
    pub platform_release: String,
    pub platform_system: String,
    pub platform_version: String,
    pub python_full_version: String,
    pub python_version: String,
    pub sys_platform: String,
}

impl InterpreterFacts {
    /// Build a PEP 508 marker environment from the reported facts.
    pub fn marker_environment(&self) -> Result<MarkerEnvironment> {
        let string_version = |raw: &str| {
            StringVersion::from_str(raw).map_err(|err| ConversionError::UnparsableVersion {
                version: raw.to_string(),
                reason: err.to_string(),
            })
        };
        Ok(MarkerEnvironment {
            implementation_name: self.implementation_name.clone(),
            implementation_version: string_version(&self.implementation_version)?,
            os_name: self.os_name.clone(),
            platform_machine: self.platform_machine.clone(),
            platform_python_implementation: self.platform_python_implementation.clone(),
            platform_release: self.platform_release.clone(),
            platform_system: self.platform_system.clone(),
            platform_version: self.platform_version.clone(),
            python_full_version: string_version(&self.python_full_version)?,
            python_version: string_version(&self.python_version)?,
            sys_platform: self.sys_platform.clone(),
        })
    }

    /// The `X.Y` series of the target interpreter, used for the interpreter
    /// dependency of every converted package.
    pub fn version_series(&self) -> &str {
        &self.python_version
    }
}

/// A single Python requirement as found in package metadata, with markers
/// and extras retained.
#[derive(Debug, Clone)]
pub struct Requirement {
    raw: String,
    parsed: PepRequirement,
}

impl Requirement {
    /// Parse a PEP 508 requirement string.
    ///
    /// One legacy spelling is tolerated: a comparison against the bare
    /// pseudo-version `dev` (as in `pytz > dev`) is dropped, leaving an
    /// unversioned requirement, because such constraints are satisfied by
    /// every real release.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        match PepRequirement::from_str(trimmed) {
            Ok(parsed) => Ok(Self {
                raw: trimmed.to_string(),
                parsed,
            }),
            Err(err) => {
                if let Some(head) = strip_dev_specifier(trimmed) {
                    if let Ok(parsed) = PepRequirement::from_str(head) {
                        tracing::debug!(requirement = trimmed, "dropped 'dev' pseudo-version");
                        return Ok(Self {
                            raw: trimmed.to_string(),
                            parsed,
                        });
                    }
                }
                Err(ConversionError::UnsatisfiableRequirement {
                    requirement: trimmed.to_string(),
                    reason: format!("unparsable requirement: {err}"),
                })
            }
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn name(&self) -> String {
        self.parsed.name.to_string()
    }

    pub fn normalized_name(&self) -> String {
        normalize_name(&self.parsed.name.to_string())
    }

    /// The extras the requirement selects, normalized and sorted.
    pub fn extras(&self) -> BTreeSet<String> {
        self.parsed
            .extras
            .iter()
            .map(|extra| normalize_name(&extra.to_string()))
            .collect()
    }

    /// Version constraints on the requirement, when it carries any. URL
    /// requirements have none.
    pub fn specifiers(&self) -> Option<&VersionSpecifiers> {
        match &self.parsed.version_or_url {
            Some(VersionOrUrl::VersionSpecifier(specifiers)) => Some(specifiers),
            _ => None,
        }
    }

    pub fn is_url(&self) -> bool {
        matches!(&self.parsed.version_or_url, Some(VersionOrUrl::Url(_)))
    }

    /// Whether the requirement applies in the given environment, with the
    /// given extras active on the depending package.
    pub fn applies(&self, env: &MarkerEnvironment, parent_extras: &BTreeSet<String>) -> bool {
        // ExtraName values are only constructible through parsing, so the
        // active extras are routed through a synthetic requirement.
        if parent_extras.is_empty() {
            return self.parsed.evaluate_markers(env, &[]);
        }
        let synthetic = format!(
            "x[{}]",
            parent_extras.iter().cloned().collect::<Vec<_>>().join(",")
        );
        match PepRequirement::from_str(&synthetic) {
            Ok(parsed) => self.parsed.evaluate_markers(env, &parsed.extras),
            Err(_) => self.parsed.evaluate_markers(env, &[]),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// If the requirement ends in a comparison against the bare word `dev`,
/// return everything before the comparison.
fn strip_dev_specifier(raw: &str) -> Option<&str> {
    let split = raw.find(|c| "<>=!~".contains(c))?;
    let (head, tail) = raw.split_at(split);
    let remainder = tail.trim_matches(|c: char| c.is_whitespace() || "<>=!~".contains(c));
    if remainder.eq_ignore_ascii_case("dev") {
        Some(head.trim())
    } else {
        None
    }
}
