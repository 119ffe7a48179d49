//! The conversion pipeline.
//!
//! One run resolves the requirement set once, then walks the resolved
//! packages in order: translate the metadata, install into a staging tree,
//! merge control fields, pack the archive, record the result. Failures are
//! fatal by default; with `keep_going` the run records them and moves on.

use std::collections::{BTreeSet, HashMap};
use std::env;
use std::fs;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use pep508_rs::MarkerEnvironment;
use time::macros::format_description;
use time::OffsetDateTime;

use pydeb_domain::{
    combine_dependencies, map_name, provides_name, transform_version, translate_requirement,
    ConversionError, ControlDocument, Dependency, InterpreterFacts, Relationship, Requirement,
    TranslationConfig,
};

use crate::backend::{Backend, PipBackend, SourcePackage};
use crate::config::{ConvertOptions, ConverterConfig};
use crate::hints::collect_hints;
use crate::interpreter::{detect_interpreter, query_interpreter};
use crate::outcome::{outcome_for_error, CommandStatus};
use crate::packer::{detect_architecture, ArtifactPacker, DebPacker, PackageBuild};
use crate::process::run_command;
use crate::report::{
    inject_dependencies, write_dependency_report, ConversionReport, ConversionResult,
    FailedRequirement, PipelineStage,
};

/// Resolve configuration, detect the interpreter and run a conversion.
pub fn convert(options: &ConvertOptions, pip_args: &[String]) -> Result<ConversionReport> {
    let config = ConverterConfig::resolve(options)?;
    let python = detect_interpreter(config.python.as_deref())?;
    let facts = query_interpreter(&python)?;
    let backend = PipBackend::new(python.clone(), config.install_prefix.clone());
    let packer = DebPacker::new(config.repository.clone(), config.lintian);
    let converter = Converter::new(&config, &backend, &packer, python, facts);
    converter.run(pip_args)
}

/// Drives one conversion run. Backend and packer are traits so the
/// pipeline can run against fakes.
pub struct Converter<'a> {
    config: &'a ConverterConfig,
    backend: &'a dyn Backend,
    packer: &'a dyn ArtifactPacker,
    python: String,
    facts: InterpreterFacts,
}

struct StageError {
    stage: PipelineStage,
    source: anyhow::Error,
}

trait StageContext<T> {
    fn at_stage(self, stage: PipelineStage) -> std::result::Result<T, StageError>;
}

impl<T> StageContext<T> for Result<T> {
    fn at_stage(self, stage: PipelineStage) -> std::result::Result<T, StageError> {
        self.map_err(|source| StageError { stage, source })
    }
}

impl<'a> Converter<'a> {
    pub fn new(
        config: &'a ConverterConfig,
        backend: &'a dyn Backend,
        packer: &'a dyn ArtifactPacker,
        python: impl Into<String>,
        facts: InterpreterFacts,
    ) -> Self {
        Self {
            config,
            backend,
            packer,
            python: python.into(),
            facts,
        }
    }

    pub fn run(&self, pip_args: &[String]) -> Result<ConversionReport> {
        let mut report = ConversionReport::default();

        let mut packages = match self.backend.resolve(pip_args) {
            Ok(packages) => packages,
            Err(error) => {
                record_failure(&mut report, pip_args.join(" "), PipelineStage::Resolving, &error);
                return Ok(report);
            }
        };
        tracing::info!(count = packages.len(), "resolved requirement set");

        let marker_env = self.facts.marker_environment()?;
        Self::propagate_extras(&mut packages, &marker_env);
        // One Debian name+version per run; colliding sources are an error,
        // not a silent overwrite.
        let mut claimed: HashMap<String, (String, String)> = HashMap::new();

        for package in &packages {
            let label = format!("{} {}", package.name, package.version);
            match self.convert_one(package, &marker_env, &mut claimed) {
                Ok(Some(result)) => report.results.push(result),
                Ok(None) => {}
                Err(error) => {
                    record_failure(&mut report, label, error.stage, &error.source);
                    if !self.config.keep_going {
                        // Finished archives stay on disk but are demoted:
                        // an aborted run has no completed result set.
                        report.retained = std::mem::take(&mut report.results);
                        break;
                    }
                }
            }
        }

        if let Err(error) = self.backend.cleanup() {
            tracing::warn!("backend cleanup failed: {error:#}");
        }

        if report.is_success() {
            if let Some(path) = &self.config.report_dependencies {
                write_dependency_report(path, &report)?;
            }
            if let Some(path) = &self.config.inject_dependencies {
                inject_dependencies(path, &report)?;
            }
        } else if self.config.report_dependencies.is_some()
            || self.config.inject_dependencies.is_some()
        {
            tracing::warn!("run failed, skipping dependency report");
        }

        Ok(report)
    }

    fn convert_one(
        &self,
        package: &SourcePackage,
        marker_env: &MarkerEnvironment,
        claimed: &mut HashMap<String, (String, String)>,
    ) -> std::result::Result<Option<ConversionResult>, StageError> {
        if let Some(replacement) = self
            .config
            .replacements
            .get(&pydeb_domain::normalize_name(&package.name))
        {
            tracing::info!(
                package = %package.name,
                %replacement,
                "satisfied by a system package, not converting"
            );
            return Ok(None);
        }

        let deb_name = map_name(&package.name, &package.extras, &self.config.naming)
            .map_err(anyhow::Error::new)
            .at_stage(PipelineStage::Translating)?;
        let deb_version = transform_version(&package.version)
            .map_err(anyhow::Error::new)
            .at_stage(PipelineStage::Translating)?;
        let source = format!("{} {}", package.name, package.version);

        if let Some((existing_version, existing_source)) = claimed.get(&deb_name) {
            if existing_source == &source && existing_version == &deb_version {
                tracing::debug!(package = %deb_name, "already converted in this run");
                return Ok(None);
            }
            if self.config.auto_confirm {
                tracing::warn!(
                    package = %deb_name,
                    first = %existing_source,
                    second = %source,
                    "name collision, keeping the first conversion"
                );
                return Ok(None);
            }
            return Err(StageError {
                stage: PipelineStage::Translating,
                source: ConversionError::ArtifactConflict {
                    name: deb_name,
                    version: deb_version,
                    first: existing_source.clone(),
                    second: source,
                }
                .into(),
            });
        }
        claimed.insert(deb_name.clone(), (deb_version.clone(), source));

        if let Some(archive) = self.find_existing_archive(&deb_name, &deb_version) {
            tracing::info!(package = %deb_name, %archive, "archive already present, skipping build");
            return Ok(Some(ConversionResult {
                source: package.name.clone(),
                package: deb_name,
                version: deb_version,
                archive,
                is_direct: package.is_direct,
            }));
        }

        let dependencies = self
            .translate_dependencies(package, marker_env)
            .at_stage(PipelineStage::Translating)?;

        let staging_dir = tempfile::Builder::new()
            .prefix("pydeb-")
            .tempdir()
            .context("cannot create staging directory")
            .at_stage(PipelineStage::Building)?;
        let staging = Utf8Path::from_path(staging_dir.path())
            .context("staging directory path is not valid UTF-8")
            .at_stage(PipelineStage::Building)?
            .to_owned();

        self.backend
            .build(package, &staging)
            .at_stage(PipelineStage::Building)?;
        let modules_dir = self
            .normalize_layout(&staging)
            .at_stage(PipelineStage::Building)?;

        let control = self
            .assemble_control(package, &deb_name, &deb_version, &staging, dependencies)
            .at_stage(PipelineStage::Merging)?;

        let build = PackageBuild {
            staging,
            control,
            python: self.python.clone(),
            modules_dir,
        };
        let archive = self.packer.pack(&build).at_stage(PipelineStage::Packing)?;
        tracing::info!(package = %deb_name, %archive, "converted");

        self.run_post_build(&deb_name, &deb_version, &archive)
            .at_stage(PipelineStage::Recording)?;

        Ok(Some(ConversionResult {
            source: package.name.clone(),
            package: deb_name,
            version: deb_version,
            archive,
            is_direct: package.is_direct,
        }))
    }

    /// Extras selected on a requirement flow onto the resolved package that
    /// satisfies it. The resolver reports requested extras for direct
    /// requirements only, while dependency translation encodes extras into
    /// the target package name; without this pass the Depends line would
    /// name a variant that never gets built.
    fn propagate_extras(packages: &mut [SourcePackage], marker_env: &MarkerEnvironment) {
        loop {
            let mut additions: Vec<(String, BTreeSet<String>)> = Vec::new();
            for package in &*packages {
                for raw in &package.requires {
                    let Ok(requirement) = Requirement::parse(raw) else {
                        // Reported as a translation failure later.
                        continue;
                    };
                    let extras = requirement.extras();
                    if extras.is_empty() || !requirement.applies(marker_env, &package.extras) {
                        continue;
                    }
                    additions.push((requirement.normalized_name(), extras));
                }
            }
            let mut changed = false;
            for (target, extras) in additions {
                if let Some(dependency) = packages
                    .iter_mut()
                    .find(|p| pydeb_domain::normalize_name(&p.name) == target)
                {
                    for extra in extras {
                        if dependency.extras.insert(extra) {
                            changed = true;
                        }
                    }
                }
            }
            // Extras can activate further extra-guarded requirements, so
            // iterate until the set stops growing.
            if !changed {
                break;
            }
        }
    }

    fn translate_dependencies(
        &self,
        package: &SourcePackage,
        marker_env: &MarkerEnvironment,
    ) -> Result<Vec<Dependency>> {
        let translation = TranslationConfig {
            naming: self.config.naming.clone(),
            replacements: self.config.replacements.clone(),
        };
        let mut dependencies = vec![Dependency::single(Relationship::unversioned(format!(
            "python{}",
            self.facts.version_series()
        )))];
        for raw in &package.requires {
            let requirement = Requirement::parse(raw)?;
            if !requirement.applies(marker_env, &package.extras) {
                tracing::debug!(requirement = raw, "skipped by environment markers");
                continue;
            }
            dependencies.extend(translate_requirement(&requirement, &translation)?);
        }
        Ok(combine_dependencies(dependencies)?)
    }

    /// Move installed modules to the path Debian's interpreter actually
    /// scans: under `/usr`, that is `dist-packages`, not pip's
    /// `site-packages`. Returns the absolute module directory on the
    /// target system, when the package ships one.
    fn normalize_layout(&self, staging: &Utf8Path) -> Result<Option<Utf8PathBuf>> {
        let relative = self
            .config
            .install_prefix
            .strip_prefix("/")
            .unwrap_or(&self.config.install_prefix);
        let lib = staging
            .join(relative)
            .join(format!("lib/python{}", self.facts.version_series()));
        let site = lib.join("site-packages");
        let dist = lib.join("dist-packages");
        let debianize = self.config.install_prefix == "/usr";
        if site.exists() && debianize {
            fs::rename(&site, &dist).with_context(|| format!("cannot rename {site}"))?;
        }
        let (staged, leaf) = if debianize {
            (dist, "dist-packages")
        } else {
            (site, "site-packages")
        };
        if staged.exists() {
            Ok(Some(self.config.install_prefix.join(format!(
                "lib/python{}/{leaf}",
                self.facts.version_series()
            ))))
        } else {
            Ok(None)
        }
    }

    fn assemble_control(
        &self,
        package: &SourcePackage,
        deb_name: &str,
        deb_version: &str,
        staging: &Utf8Path,
        dependencies: Vec<Dependency>,
    ) -> Result<ControlDocument> {
        let mut control = ControlDocument::new();
        control.set("Package", deb_name);
        control.set("Version", deb_version);
        control.set("Architecture", detect_architecture(staging)?);
        control.set("Maintainer", maintainer_for(package));
        control.set("Section", "python");
        control.set("Priority", "optional");
        if let Some(homepage) = package.homepage.as_deref().filter(|h| !h.trim().is_empty()) {
            control.set("Homepage", homepage.trim());
        }
        control.set("Description", description_for(package));
        let depends: Vec<String> = dependencies
            .iter()
            .map(ToString::to_string)
            .collect();
        control.set("Depends", depends.join(", "));
        if let Some(provides) =
            provides_name(&package.name, &package.extras, &self.config.naming)?
        {
            control.set("Provides", provides);
        }

        let hints = collect_hints(staging, &package.name)?;
        pydeb_domain::merge_layers(&mut control, &hints);
        if let Some(overrides) = self
            .config
            .field_overrides
            .get(&pydeb_domain::normalize_name(&package.name))
        {
            pydeb_domain::merge_layers(&mut control, &overrides.merge);
            for (field, value) in overrides.replace.iter() {
                control.set(field, value);
            }
        }
        Ok(control)
    }

    fn find_existing_archive(&self, deb_name: &str, deb_version: &str) -> Option<Utf8PathBuf> {
        let prefix = format!("{deb_name}_{}_", deb_version.replace(':', "%3a"));
        let entries = fs::read_dir(self.config.repository.as_std_path()).ok()?;
        for entry in entries.filter_map(std::result::Result::ok) {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.starts_with(&prefix) && file_name.ends_with(".deb") {
                return Some(self.config.repository.join(file_name));
            }
        }
        None
    }

    fn run_post_build(&self, deb_name: &str, deb_version: &str, archive: &Utf8Path) -> Result<()> {
        let Some(command) = &self.config.post_build else {
            return Ok(());
        };
        tracing::info!(package = %deb_name, "running post-build command");
        let output = run_command(
            "/bin/sh",
            &["-c".to_string(), command.clone()],
            &[
                ("PYDEB_PACKAGE".to_string(), deb_name.to_string()),
                ("PYDEB_VERSION".to_string(), deb_version.to_string()),
                ("PYDEB_ARCHIVE".to_string(), archive.to_string()),
            ],
            std::path::Path::new("."),
        )?;
        if output.code != 0 {
            anyhow::bail!(
                "post-build command exited with {}: {}",
                output.code,
                output.stderr.trim()
            );
        }
        Ok(())
    }
}

fn record_failure(
    report: &mut ConversionReport,
    requirement: String,
    stage: PipelineStage,
    error: &anyhow::Error,
) {
    tracing::error!(%requirement, ?stage, "conversion failed: {error:#}");
    let is_user_error = outcome_for_error(error).status == CommandStatus::UserError;
    report.failures.push(FailedRequirement {
        requirement,
        stage,
        error: format!("{error:#}"),
        is_user_error,
    });
}

fn maintainer_for(package: &SourcePackage) -> String {
    let from_env = env::var("DEBFULLNAME")
        .ok()
        .filter(|name| !name.trim().is_empty());
    if let Some(name) = from_env {
        return match env::var("DEBEMAIL").ok().filter(|mail| !mail.trim().is_empty()) {
            Some(mail) => format!("{} <{}>", name.trim(), mail.trim()),
            None => name.trim().to_string(),
        };
    }
    with_address(&package.maintainer, &package.maintainer_email)
        .or_else(|| with_address(&package.author, &package.author_email))
        .unwrap_or_else(|| "Unknown".to_string())
}

fn with_address(person: &Option<String>, mail: &Option<String>) -> Option<String> {
    let person = person.as_deref().map(str::trim).filter(|p| !p.is_empty())?;
    match mail.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        Some(mail) if !person.contains('<') => Some(format!("{person} <{mail}>")),
        _ => Some(person.to_string()),
    }
}

fn description_for(package: &SourcePackage) -> String {
    let summary = package
        .summary
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map_or_else(
            || format!("Python package {}", package.name),
            ToString::to_string,
        );
    let date = OffsetDateTime::now_utc()
        .format(&format_description!("[year]-[month]-[day]"))
        .unwrap_or_default();
    format!(
        "{summary}\n\nConverted from the Python package {} {} on {date}.",
        package.name, package.version
    )
}
