//! Package acquisition backends.
//!
//! A backend resolves a requirement set into concrete package versions with
//! metadata, and installs a single package into a staging directory. The
//! production backend shells out to pip; tests substitute an in-memory one.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use pydeb_domain::{normalize_name, ConversionError};

use crate::process::{run_command, run_command_streaming, RunOutput};

/// One resolved package, with the metadata the conversion needs.
#[derive(Debug, Clone)]
pub struct SourcePackage {
    pub name: String,
    pub version: String,
    /// Normalized extras selected on this package, from the requirement
    /// that pulled it in.
    pub extras: BTreeSet<String>,
    /// Raw requirement strings from the package metadata.
    pub requires: Vec<String>,
    /// Whether the package was named on the command line, as opposed to
    /// pulled in as a dependency.
    pub is_direct: bool,
    pub summary: Option<String>,
    pub homepage: Option<String>,
    pub maintainer: Option<String>,
    pub maintainer_email: Option<String>,
    pub author: Option<String>,
    pub author_email: Option<String>,
}

pub trait Backend {
    /// Resolve a pip argument list into the full closure of packages to
    /// convert, without installing anything.
    fn resolve(&self, pip_args: &[String]) -> Result<Vec<SourcePackage>>;

    /// Install one resolved package into the staging directory, rooted so
    /// the staged tree mirrors the filesystem the archive will unpack onto.
    fn build(&self, package: &SourcePackage, staging: &Utf8Path) -> Result<()>;

    /// Discard whatever scratch state the backend accumulated over the
    /// run. Called once when the run ends, whether it succeeded or not.
    fn cleanup(&self) -> Result<()>;
}

/// The pip-backed implementation used in production.
#[derive(Debug, Clone)]
pub struct PipBackend {
    python: String,
    install_prefix: Utf8PathBuf,
}

impl PipBackend {
    pub fn new(python: impl Into<String>, install_prefix: impl Into<Utf8PathBuf>) -> Self {
        Self {
            python: python.into(),
            install_prefix: install_prefix.into(),
        }
    }
}

impl Backend for PipBackend {
    fn resolve(&self, pip_args: &[String]) -> Result<Vec<SourcePackage>> {
        let scratch = tempfile::tempdir().context("cannot create scratch directory")?;
        let report_path = scratch.path().join("report.json");
        let mut args: Vec<String> = [
            "-m",
            "pip",
            "install",
            "--dry-run",
            "--ignore-installed",
            "--quiet",
            "--report",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        args.push(report_path.display().to_string());
        args.extend(pip_args.iter().cloned());

        tracing::debug!(python = %self.python, ?pip_args, "resolving requirement set");
        let output = run_command(&self.python, &args, &[], Path::new("."))?;
        if output.code != 0 {
            return Err(classify_resolve_failure(pip_args, &output));
        }
        let text =
            fs::read_to_string(&report_path).context("pip produced no resolution report")?;
        parse_report(&text)
    }

    fn build(&self, package: &SourcePackage, staging: &Utf8Path) -> Result<()> {
        let relative = self
            .install_prefix
            .strip_prefix("/")
            .unwrap_or(&self.install_prefix);
        let prefix = staging.join(relative);
        let spec = format!("{}=={}", package.name, package.version);
        let args: Vec<String> = [
            "-m",
            "pip",
            "install",
            "--no-deps",
            "--ignore-installed",
            "--prefix",
            prefix.as_str(),
            &spec,
        ]
        .iter()
        .map(ToString::to_string)
        .collect();

        tracing::info!(package = %spec, "installing into staging directory");
        let output = run_command_streaming(&self.python, &args, &[], Path::new("."))?;
        if output.code != 0 {
            return Err(ConversionError::BuildFailure {
                package: package.name.clone(),
                reason: format!(
                    "pip install exited with {}: {}",
                    output.code,
                    last_line(&output.stderr)
                ),
            }
            .into());
        }
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        // Resolution reports and staging trees live in per-call temporary
        // directories that are removed on drop; pip's own cache is shared
        // user state and is left alone.
        Ok(())
    }
}

fn classify_resolve_failure(pip_args: &[String], output: &RunOutput) -> anyhow::Error {
    let requirement = pip_args.join(" ");
    let detail = last_line(&output.stderr);
    let lowered = output.stderr.to_ascii_lowercase();
    if lowered.contains("no matching distribution")
        || lowered.contains("could not find a version")
    {
        return ConversionError::UnsatisfiableRequirement {
            requirement,
            reason: detail,
        }
        .into();
    }
    if lowered.contains("network is unreachable")
        || lowered.contains("temporary failure in name resolution")
        || lowered.contains("proxyerror")
    {
        return ConversionError::UnsatisfiableRequirement {
            requirement,
            reason: format!("package index unreachable: {detail}"),
        }
        .into();
    }
    anyhow::anyhow!("pip resolution exited with {}: {detail}", output.code)
}

fn last_line(text: &str) -> String {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("no diagnostic output")
        .to_string()
}

#[derive(Debug, Deserialize)]
struct PipReport {
    #[serde(default)]
    install: Vec<PipReportItem>,
}

#[derive(Debug, Deserialize)]
struct PipReportItem {
    #[serde(default)]
    requested: bool,
    #[serde(default)]
    requested_extras: Vec<String>,
    metadata: PipMetadata,
}

#[derive(Debug, Deserialize)]
struct PipMetadata {
    name: String,
    version: String,
    #[serde(default)]
    requires_dist: Vec<String>,
    summary: Option<String>,
    author: Option<String>,
    author_email: Option<String>,
    maintainer: Option<String>,
    maintainer_email: Option<String>,
    home_page: Option<String>,
}

fn parse_report(text: &str) -> Result<Vec<SourcePackage>> {
    let report: PipReport =
        serde_json::from_str(text).context("unreadable pip resolution report")?;
    Ok(report
        .install
        .into_iter()
        .map(|item| SourcePackage {
            name: item.metadata.name,
            version: item.metadata.version,
            extras: item
                .requested_extras
                .iter()
                .map(|extra| normalize_name(extra))
                .collect(),
            requires: item.metadata.requires_dist,
            is_direct: item.requested,
            summary: item.metadata.summary,
            homepage: item.metadata.home_page,
            maintainer: item.metadata.maintainer,
            maintainer_email: item.metadata.maintainer_email,
            author: item.metadata.author,
            author_email: item.metadata.author_email,
        })
        .collect())
}
