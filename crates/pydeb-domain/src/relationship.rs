//! Translation of Python version constraints into Debian package
//! relationships.
//!
//! Every version inside a produced relationship goes through the same
//! transformation as produced package versions, revision included, so an
//! `=` constraint matches the package this engine builds for that version.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use pep440_rs::Operator;

use crate::error::{ConversionError, Result};
use crate::name::{map_name, NamingConfig};
use crate::requirement::Requirement;
use crate::version::{compare_debian_versions, transform_version, version_floor, PythonVersion};

/// Debian relationship operators. `<` and `>` are not produced; dpkg treats
/// them as their inclusive forms and lintian flags them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelOp {
    StrictlyEarlier,
    EarlierOrEqual,
    Exactly,
    LaterOrEqual,
    StrictlyLater,
}

impl fmt::Display for RelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RelOp::StrictlyEarlier => "<<",
            RelOp::EarlierOrEqual => "<=",
            RelOp::Exactly => "=",
            RelOp::LaterOrEqual => ">=",
            RelOp::StrictlyLater => ">>",
        })
    }
}

/// A relationship with a single target package, optionally versioned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub package: String,
    pub constraint: Option<(RelOp, String)>,
}

impl Relationship {
    pub fn unversioned(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            constraint: None,
        }
    }

    pub fn versioned(package: impl Into<String>, op: RelOp, version: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            constraint: Some((op, version.into())),
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            Some((op, version)) => write!(f, "{} ({op} {version})", self.package),
            None => f.write_str(&self.package),
        }
    }
}

/// One entry in a relationship field: alternatives joined with `|`.
/// Exclusions (`!=`) are the only constraints that produce more than one
/// alternative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub alternatives: Vec<Relationship>,
}

impl Dependency {
    pub fn single(relationship: Relationship) -> Self {
        Self {
            alternatives: vec![relationship],
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, alternative) in self.alternatives.iter().enumerate() {
            if index > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{alternative}")?;
        }
        Ok(())
    }
}

/// Options for constraint translation.
#[derive(Debug, Clone, Default)]
pub struct TranslationConfig {
    pub naming: NamingConfig,
    /// Requirements satisfied by an existing system package instead of a
    /// conversion, keyed by normalized Python name. The replacement is
    /// referenced unversioned: it is assumed to satisfy the functional
    /// need, so carrying the Python version constraint over would be
    /// meaningless against an unrelated version scheme.
    pub replacements: HashMap<String, String>,
}

/// Translate one Python requirement into zero or more Debian dependencies.
///
/// Markers must already have been evaluated; this function only looks at the
/// name, extras and version constraints. A requirement without constraints
/// (including URL requirements, whose pinning happened at resolution time)
/// becomes a single unversioned dependency.
pub fn translate_requirement(
    requirement: &Requirement,
    config: &TranslationConfig,
) -> Result<Vec<Dependency>> {
    if let Some(replacement) = config.replacements.get(&requirement.normalized_name()) {
        return Ok(vec![Dependency::single(Relationship::unversioned(
            replacement.clone(),
        ))]);
    }
    let package = map_name(&requirement.name(), &requirement.extras(), &config.naming)?;
    let Some(specifiers) = requirement.specifiers() else {
        return Ok(vec![Dependency::single(Relationship::unversioned(package))]);
    };
    let mut dependencies = Vec::new();
    for specifier in specifiers.iter() {
        let version = specifier.version().to_string();
        match specifier.operator() {
            Operator::Equal | Operator::ExactEqual => {
                dependencies.push(Dependency::single(Relationship::versioned(
                    package.clone(),
                    RelOp::Exactly,
                    transform_version(&version)?,
                )));
            }
            Operator::EqualStar => {
                // ==1.2.* is the half-open range [1.2, 1.3).
                dependencies.push(Dependency::single(Relationship::versioned(
                    package.clone(),
                    RelOp::LaterOrEqual,
                    transform_version(&version)?,
                )));
                dependencies.push(Dependency::single(Relationship::versioned(
                    package.clone(),
                    RelOp::StrictlyEarlier,
                    bumped_version(&version, BumpPosition::Last)?,
                )));
            }
            Operator::NotEqual => {
                let excluded = transform_version(&version)?;
                dependencies.push(Dependency {
                    alternatives: vec![
                        Relationship::versioned(
                            package.clone(),
                            RelOp::StrictlyEarlier,
                            excluded.clone(),
                        ),
                        Relationship::versioned(package.clone(), RelOp::StrictlyLater, excluded),
                    ],
                });
            }
            Operator::NotEqualStar => {
                // !=1.2.* also excludes pre- and dev-releases of 1.2, so
                // the lower cut must sit below their `~` encodings.
                dependencies.push(Dependency {
                    alternatives: vec![
                        Relationship::versioned(
                            package.clone(),
                            RelOp::StrictlyEarlier,
                            version_floor(&version)?,
                        ),
                        Relationship::versioned(
                            package.clone(),
                            RelOp::LaterOrEqual,
                            bumped_version(&version, BumpPosition::Last)?,
                        ),
                    ],
                });
            }
            Operator::TildeEqual => {
                // ~=1.4.5 means >=1.4.5, <1.5.
                dependencies.push(Dependency::single(Relationship::versioned(
                    package.clone(),
                    RelOp::LaterOrEqual,
                    transform_version(&version)?,
                )));
                dependencies.push(Dependency::single(Relationship::versioned(
                    package.clone(),
                    RelOp::StrictlyEarlier,
                    bumped_version(&version, BumpPosition::SecondToLast)?,
                )));
            }
            Operator::LessThan => {
                dependencies.push(Dependency::single(Relationship::versioned(
                    package.clone(),
                    RelOp::StrictlyEarlier,
                    transform_version(&version)?,
                )));
            }
            Operator::LessThanEqual => {
                dependencies.push(Dependency::single(Relationship::versioned(
                    package.clone(),
                    RelOp::EarlierOrEqual,
                    transform_version(&version)?,
                )));
            }
            Operator::GreaterThan => {
                dependencies.push(Dependency::single(Relationship::versioned(
                    package.clone(),
                    RelOp::StrictlyLater,
                    transform_version(&version)?,
                )));
            }
            Operator::GreaterThanEqual => {
                dependencies.push(Dependency::single(Relationship::versioned(
                    package.clone(),
                    RelOp::LaterOrEqual,
                    transform_version(&version)?,
                )));
            }
        }
    }
    if dependencies.is_empty() {
        dependencies.push(Dependency::single(Relationship::unversioned(package)));
    }
    Ok(dependencies)
}

enum BumpPosition {
    Last,
    SecondToLast,
}

/// Compute the exclusive upper bound for a range operator by bumping one
/// release component and dropping everything after it.
fn bumped_version(raw: &str, position: BumpPosition) -> Result<String> {
    let parsed = PythonVersion::parse(raw)?;
    let mut release = parsed.release.clone();
    if matches!(position, BumpPosition::SecondToLast) {
        if release.len() < 2 {
            return Err(ConversionError::UnparsableVersion {
                version: raw.to_string(),
                reason: "compatible-release constraint needs two release segments".to_string(),
            });
        }
        release.pop();
    }
    if let Some(last) = release.last_mut() {
        *last += 1;
    }
    let bumped = PythonVersion {
        epoch: parsed.epoch,
        release,
        pre: None,
        post: None,
        dev: None,
        local: None,
    };
    transform_version(&bumped.to_string())
}

/// Merge translated dependencies into a minimal consistent set.
///
/// Identical entries collapse, the tightest lower and upper bound per
/// package win, and an exact pin supersedes compatible bounds. Two exact
/// pins on different versions of the same package are unsatisfiable and
/// reported as a conflict rather than guessed at.
pub fn combine_dependencies(dependencies: Vec<Dependency>) -> Result<Vec<Dependency>> {
    #[derive(Default)]
    struct Bounds {
        exact: Option<String>,
        lower: Option<(RelOp, String)>,
        upper: Option<(RelOp, String)>,
        bare: bool,
    }

    let mut grouped: BTreeMap<String, Bounds> = BTreeMap::new();
    let mut passthrough: Vec<Dependency> = Vec::new();

    for dependency in dependencies {
        if dependency.alternatives.len() != 1 {
            if !passthrough.contains(&dependency) {
                passthrough.push(dependency);
            }
            continue;
        }
        let relationship = &dependency.alternatives[0];
        let bounds = grouped.entry(relationship.package.clone()).or_default();
        match &relationship.constraint {
            None => bounds.bare = true,
            Some((RelOp::Exactly, version)) => match &bounds.exact {
                Some(existing) if existing != version => {
                    return Err(ConversionError::ConflictingRelationship {
                        package: relationship.package.clone(),
                        existing: format!("= {existing}"),
                        incoming: format!("= {version}"),
                    });
                }
                _ => bounds.exact = Some(version.clone()),
            },
            Some((op @ (RelOp::LaterOrEqual | RelOp::StrictlyLater), version)) => {
                bounds.lower = Some(tighter_lower(bounds.lower.take(), (*op, version.clone())));
            }
            Some((op @ (RelOp::EarlierOrEqual | RelOp::StrictlyEarlier), version)) => {
                bounds.upper = Some(tighter_upper(bounds.upper.take(), (*op, version.clone())));
            }
        }
    }

    let mut combined = Vec::new();
    for (package, bounds) in grouped {
        if let Some(version) = bounds.exact {
            if let Some((op, bound)) = &bounds.lower {
                if !satisfies_lower(&version, *op, bound) {
                    return Err(ConversionError::ConflictingRelationship {
                        package,
                        existing: format!("{op} {bound}"),
                        incoming: format!("= {version}"),
                    });
                }
            }
            if let Some((op, bound)) = &bounds.upper {
                if !satisfies_upper(&version, *op, bound) {
                    return Err(ConversionError::ConflictingRelationship {
                        package,
                        existing: format!("{op} {bound}"),
                        incoming: format!("= {version}"),
                    });
                }
            }
            combined.push(Dependency::single(Relationship::versioned(
                package,
                RelOp::Exactly,
                version,
            )));
            continue;
        }
        if let (Some((lower_op, lower)), Some((upper_op, upper))) = (&bounds.lower, &bounds.upper) {
            let empty = match compare_debian_versions(lower, upper) {
                Ordering::Greater => true,
                Ordering::Equal => {
                    !(*lower_op == RelOp::LaterOrEqual && *upper_op == RelOp::EarlierOrEqual)
                }
                Ordering::Less => false,
            };
            if empty {
                return Err(ConversionError::ConflictingRelationship {
                    package,
                    existing: format!("{lower_op} {lower}"),
                    incoming: format!("{upper_op} {upper}"),
                });
            }
        }
        let mut emitted = false;
        if let Some((op, version)) = bounds.lower {
            combined.push(Dependency::single(Relationship::versioned(
                package.clone(),
                op,
                version,
            )));
            emitted = true;
        }
        if let Some((op, version)) = bounds.upper {
            combined.push(Dependency::single(Relationship::versioned(
                package.clone(),
                op,
                version,
            )));
            emitted = true;
        }
        if bounds.bare && !emitted {
            combined.push(Dependency::single(Relationship::unversioned(package)));
        }
    }
    combined.extend(passthrough);
    Ok(combined)
}

fn tighter_lower(existing: Option<(RelOp, String)>, incoming: (RelOp, String)) -> (RelOp, String) {
    match existing {
        None => incoming,
        Some(existing) => match compare_debian_versions(&existing.1, &incoming.1) {
            Ordering::Less => incoming,
            Ordering::Greater => existing,
            Ordering::Equal => {
                if incoming.0 == RelOp::StrictlyLater {
                    incoming
                } else {
                    existing
                }
            }
        },
    }
}

fn tighter_upper(existing: Option<(RelOp, String)>, incoming: (RelOp, String)) -> (RelOp, String) {
    match existing {
        None => incoming,
        Some(existing) => match compare_debian_versions(&existing.1, &incoming.1) {
            Ordering::Greater => incoming,
            Ordering::Less => existing,
            Ordering::Equal => {
                if incoming.0 == RelOp::StrictlyEarlier {
                    incoming
                } else {
                    existing
                }
            }
        },
    }
}

fn satisfies_lower(version: &str, op: RelOp, bound: &str) -> bool {
    match compare_debian_versions(version, bound) {
        Ordering::Greater => true,
        Ordering::Equal => op == RelOp::LaterOrEqual,
        Ordering::Less => false,
    }
}

fn satisfies_upper(version: &str, op: RelOp, bound: &str) -> bool {
    match compare_debian_versions(version, bound) {
        Ordering::Less => true,
        Ordering::Equal => op == RelOp::EarlierOrEqual,
        Ordering::Greater => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translate(raw: &str) -> Result<Vec<String>> {
        let requirement = Requirement::parse(raw)?;
        let config = TranslationConfig::default();
        Ok(translate_requirement(&requirement, &config)?
            .into_iter()
            .map(|dep| dep.to_string())
            .collect())
    }

    #[test]
    fn unversioned_requirement() -> anyhow::Result<()> {
        assert_eq!(translate("requests")?, vec!["python3-requests"]);
        Ok(())
    }

    #[test]
    fn comparison_operators_map_directly() -> anyhow::Result<()> {
        assert_eq!(translate("foo == 1.2.3")?, vec!["python3-foo (= 1.2.3-1)"]);
        assert_eq!(translate("foo >= 1.0")?, vec!["python3-foo (>= 1.0-1)"]);
        assert_eq!(translate("foo > 1.0")?, vec!["python3-foo (>> 1.0-1)"]);
        assert_eq!(translate("foo <= 2.0")?, vec!["python3-foo (<= 2.0-1)"]);
        assert_eq!(translate("foo < 2.0")?, vec!["python3-foo (<< 2.0-1)"]);
        Ok(())
    }

    #[test]
    fn exclusion_becomes_alternatives() -> anyhow::Result<()> {
        assert_eq!(
            translate("foo != 1.5")?,
            vec!["python3-foo (<< 1.5-1) | python3-foo (>> 1.5-1)"]
        );
        Ok(())
    }

    #[test]
    fn wildcard_exclusion_covers_pre_releases() -> anyhow::Result<()> {
        // 1.2a1 encodes as 1.2~a1-1; the lower cut has to exclude it too.
        assert_eq!(
            translate("foo != 1.2.*")?,
            vec!["python3-foo (<< 1.2~~) | python3-foo (>= 1.3-1)"]
        );
        assert_eq!(
            compare_debian_versions(&transform_version("1.2a1")?, "1.2~~"),
            Ordering::Greater
        );
        assert_eq!(
            compare_debian_versions(&transform_version("1.1.9")?, "1.2~~"),
            Ordering::Less
        );
        Ok(())
    }

    #[test]
    fn compatible_release_becomes_a_range() -> anyhow::Result<()> {
        assert_eq!(
            translate("foo ~= 1.4.5")?,
            vec!["python3-foo (>= 1.4.5-1)", "python3-foo (<< 1.5-1)"]
        );
        Ok(())
    }

    #[test]
    fn wildcard_equality_becomes_a_range() -> anyhow::Result<()> {
        assert_eq!(
            translate("foo == 1.2.*")?,
            vec!["python3-foo (>= 1.2-1)", "python3-foo (<< 1.3-1)"]
        );
        Ok(())
    }

    #[test]
    fn system_replacements_drop_version_constraints() -> anyhow::Result<()> {
        let requirement = Requirement::parse("Foo >= 1.0")?;
        let config = TranslationConfig {
            replacements: [("foo".to_string(), "system-foo".to_string())]
                .into_iter()
                .collect(),
            ..TranslationConfig::default()
        };
        let translated: Vec<String> = translate_requirement(&requirement, &config)?
            .into_iter()
            .map(|dep| dep.to_string())
            .collect();
        assert_eq!(translated, vec!["system-foo"]);
        Ok(())
    }

    #[test]
    fn extras_flow_into_the_package_name() -> anyhow::Result<()> {
        assert_eq!(
            translate("raven[flask] >= 5.0")?,
            vec!["python3-raven-flask (>= 5.0-1)"]
        );
        Ok(())
    }

    #[test]
    fn combine_keeps_tightest_bounds() -> anyhow::Result<()> {
        let deps = vec![
            Dependency::single(Relationship::versioned("a", RelOp::LaterOrEqual, "1.0-1")),
            Dependency::single(Relationship::versioned("a", RelOp::LaterOrEqual, "1.2-1")),
            Dependency::single(Relationship::versioned("a", RelOp::StrictlyEarlier, "3.0-1")),
            Dependency::single(Relationship::versioned("a", RelOp::StrictlyEarlier, "2.0-1")),
            Dependency::single(Relationship::unversioned("a")),
        ];
        let combined: Vec<String> = combine_dependencies(deps)?
            .into_iter()
            .map(|dep| dep.to_string())
            .collect();
        assert_eq!(combined, vec!["a (>= 1.2-1)", "a (<< 2.0-1)"]);
        Ok(())
    }

    #[test]
    fn exact_pin_supersedes_compatible_bounds() -> anyhow::Result<()> {
        let deps = vec![
            Dependency::single(Relationship::versioned("a", RelOp::LaterOrEqual, "1.0-1")),
            Dependency::single(Relationship::versioned("a", RelOp::Exactly, "1.5-1")),
        ];
        let combined: Vec<String> = combine_dependencies(deps)?
            .into_iter()
            .map(|dep| dep.to_string())
            .collect();
        assert_eq!(combined, vec!["a (= 1.5-1)"]);
        Ok(())
    }

    #[test]
    fn conflicting_exact_pins_are_an_error() {
        let deps = vec![
            Dependency::single(Relationship::versioned("a", RelOp::Exactly, "1.0-1")),
            Dependency::single(Relationship::versioned("a", RelOp::Exactly, "2.0-1")),
        ];
        let err = combine_dependencies(deps).unwrap_err();
        assert!(matches!(
            err,
            ConversionError::ConflictingRelationship { .. }
        ));
    }

    #[test]
    fn disjoint_bounds_are_an_error() {
        let deps = vec![
            Dependency::single(Relationship::versioned("a", RelOp::LaterOrEqual, "2.0-1")),
            Dependency::single(Relationship::versioned("a", RelOp::StrictlyEarlier, "1.0-1")),
        ];
        let err = combine_dependencies(deps).unwrap_err();
        assert!(matches!(
            err,
            ConversionError::ConflictingRelationship { .. }
        ));
    }

    #[test]
    fn equal_bounds_need_inclusive_operators() -> anyhow::Result<()> {
        let closed = vec![
            Dependency::single(Relationship::versioned("a", RelOp::LaterOrEqual, "1.0-1")),
            Dependency::single(Relationship::versioned("a", RelOp::EarlierOrEqual, "1.0-1")),
        ];
        let combined: Vec<String> = combine_dependencies(closed)?
            .into_iter()
            .map(|dep| dep.to_string())
            .collect();
        assert_eq!(combined, vec!["a (>= 1.0-1)", "a (<= 1.0-1)"]);

        let open = vec![
            Dependency::single(Relationship::versioned("a", RelOp::LaterOrEqual, "1.0-1")),
            Dependency::single(Relationship::versioned("a", RelOp::StrictlyEarlier, "1.0-1")),
        ];
        let err = combine_dependencies(open).unwrap_err();
        assert!(matches!(
            err,
            ConversionError::ConflictingRelationship { .. }
        ));
        Ok(())
    }

    #[test]
    fn exact_pin_outside_bounds_is_an_error() {
        let deps = vec![
            Dependency::single(Relationship::versioned("a", RelOp::StrictlyEarlier, "1.0-1")),
            Dependency::single(Relationship::versioned("a", RelOp::Exactly, "1.5-1")),
        ];
        let err = combine_dependencies(deps).unwrap_err();
        assert!(matches!(
            err,
            ConversionError::ConflictingRelationship { .. }
        ));
    }
}
