//! Turning a staged tree plus control fields into a `.deb` archive.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use walkdir::WalkDir;
use which::which;

use pydeb_domain::{ConversionError, ControlDocument};

use crate::process::run_command;

const POSTINST_TEMPLATE: &str = include_str!("templates/postinst.sh");
const PRERM_TEMPLATE: &str = include_str!("templates/prerm.sh");

/// Everything the packer needs to produce one archive.
#[derive(Debug, Clone)]
pub struct PackageBuild {
    /// Staging directory whose layout mirrors the target filesystem.
    pub staging: Utf8PathBuf,
    pub control: ControlDocument,
    /// Interpreter the maintainer scripts invoke.
    pub python: String,
    /// Absolute path of the installed module directory on the target
    /// system, when the package ships one.
    pub modules_dir: Option<Utf8PathBuf>,
}

/// Produces an archive from a finished build. A trait so the pipeline can
/// be tested without dpkg on the machine.
pub trait ArtifactPacker {
    fn pack(&self, build: &PackageBuild) -> Result<Utf8PathBuf>;
}

/// The dpkg-deb backed packer used in production.
#[derive(Debug, Clone)]
pub struct DebPacker {
    repository: Utf8PathBuf,
    lintian: bool,
}

impl DebPacker {
    pub fn new(repository: impl Into<Utf8PathBuf>, lintian: bool) -> Self {
        Self {
            repository: repository.into(),
            lintian,
        }
    }
}

impl ArtifactPacker for DebPacker {
    fn pack(&self, build: &PackageBuild) -> Result<Utf8PathBuf> {
        let name = required_field(&build.control, "Package")?;
        let version = required_field(&build.control, "Version")?;
        let architecture = required_field(&build.control, "Architecture")?;

        let debian_dir = build.staging.join("DEBIAN");
        fs::create_dir_all(&debian_dir)
            .with_context(|| format!("cannot create {debian_dir}"))?;
        fs::write(debian_dir.join("control"), build.control.render())
            .context("cannot write control file")?;
        if let Some(modules_dir) = &build.modules_dir {
            write_maintainer_script(
                &debian_dir.join("postinst"),
                POSTINST_TEMPLATE,
                &build.python,
                modules_dir,
            )?;
            write_maintainer_script(
                &debian_dir.join("prerm"),
                PRERM_TEMPLATE,
                &build.python,
                modules_dir,
            )?;
        }

        fs::create_dir_all(&self.repository)
            .with_context(|| format!("cannot create repository directory {}", self.repository))?;
        let archive = self.repository.join(archive_file_name(name, version, architecture));
        let output = run_command(
            "dpkg-deb",
            &[
                "--build".to_string(),
                "--root-owner-group".to_string(),
                build.staging.to_string(),
                archive.to_string(),
            ],
            &[],
            Path::new("."),
        )?;
        if output.code != 0 {
            return Err(ConversionError::BuildFailure {
                package: name.to_string(),
                reason: format!(
                    "dpkg-deb exited with {}: {}",
                    output.code,
                    output.stderr.trim()
                ),
            }
            .into());
        }

        if self.lintian {
            run_lintian(&archive);
        }
        Ok(archive)
    }
}

fn required_field<'a>(control: &'a ControlDocument, field: &str) -> Result<&'a str> {
    control.get(field).ok_or_else(|| {
        ConversionError::MalformedControlField {
            field: field.to_string(),
            reason: "missing from generated control fields".to_string(),
        }
        .into()
    })
}

/// `1:2.0-1` needs its colon escaped in a file name; dpkg's own convention
/// is URL encoding.
pub fn archive_file_name(name: &str, version: &str, architecture: &str) -> String {
    format!("{name}_{}_{architecture}.deb", version.replace(':', "%3a"))
}

fn write_maintainer_script(
    path: &Utf8Path,
    template: &str,
    python: &str,
    modules_dir: &Utf8Path,
) -> Result<()> {
    let script = template
        .replace("@PYTHON@", python)
        .replace("@MODULES_DIR@", modules_dir.as_str());
    fs::write(path, script).with_context(|| format!("cannot write {path}"))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("cannot mark {path} executable"))?;
    }
    Ok(())
}

/// Architecture of a staged tree: `all` unless it ships native code, in
/// which case the build host's architecture.
pub fn detect_architecture(staging: &Utf8Path) -> Result<String> {
    let has_native_code = WalkDir::new(staging.as_std_path())
        .into_iter()
        .filter_map(std::result::Result::ok)
        .any(|entry| {
            entry.file_type().is_file()
                && entry
                    .path()
                    .extension()
                    .is_some_and(|extension| extension == "so")
        });
    if !has_native_code {
        return Ok("all".to_string());
    }
    let output = run_command(
        "dpkg",
        &["--print-architecture".to_string()],
        &[],
        Path::new("."),
    )?;
    if output.code != 0 {
        anyhow::bail!(
            "dpkg --print-architecture exited with {}: {}",
            output.code,
            output.stderr.trim()
        );
    }
    Ok(output.stdout.trim().to_string())
}

/// Lintian findings are surfaced as warnings, never failures: converted
/// packages trip policy checks (no changelog, no copyright) by
/// construction, and the operator decides what matters.
fn run_lintian(archive: &Utf8Path) {
    if which("lintian").is_err() {
        tracing::debug!("lintian not installed, skipping archive checks");
        return;
    }
    match run_command(
        "lintian",
        &[
            "--no-tag-display-limit".to_string(),
            archive.to_string(),
        ],
        &[],
        Path::new("."),
    ) {
        Ok(output) => {
            for line in output.stdout.lines().filter(|line| !line.trim().is_empty()) {
                tracing::warn!(archive = %archive, "{line}");
            }
        }
        Err(error) => tracing::warn!(archive = %archive, "lintian did not run: {error:#}"),
    }
}
