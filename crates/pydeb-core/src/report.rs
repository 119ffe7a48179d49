//! Run results: per-package outcomes, the machine-readable summary, and
//! the dependency report consumed by packaging for a larger application.

use std::fs;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use pydeb_domain::{merge_layers, ControlDocument};

/// One successfully converted package.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionResult {
    /// Python distribution name as resolved.
    pub source: String,
    /// Debian package name.
    pub package: String,
    /// Debian version, revision included.
    pub version: String,
    pub archive: Utf8PathBuf,
    /// Whether the package was requested on the command line.
    pub is_direct: bool,
}

/// Where in the pipeline a requirement failed.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStage {
    Resolving,
    Translating,
    Building,
    Merging,
    Packing,
    Recording,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedRequirement {
    pub requirement: String,
    pub stage: PipelineStage,
    pub error: String,
    /// Whether the failure traces back to the operator's input rather than
    /// the toolchain.
    pub is_user_error: bool,
}

/// The complete outcome of one conversion run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionReport {
    pub results: Vec<ConversionResult>,
    pub failures: Vec<FailedRequirement>,
    /// Archives built before an aborting failure. They stay on disk for
    /// inspection and reuse but are not part of the completed result set.
    pub retained: Vec<ConversionResult>,
}

impl ConversionReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// The `Depends` line pinning every directly requested package to the
    /// exact version that was converted.
    pub fn direct_depends_line(&self) -> String {
        let entries: Vec<String> = self
            .results
            .iter()
            .filter(|result| result.is_direct)
            .map(|result| format!("{} (= {})", result.package, result.version))
            .collect();
        entries.join(", ")
    }
}

/// Write the direct-dependency line to a file, one line, newline
/// terminated.
pub fn write_dependency_report(path: &Utf8Path, report: &ConversionReport) -> Result<()> {
    let line = report.direct_depends_line();
    fs::write(path, format!("{line}\n"))
        .with_context(|| format!("cannot write dependency report to {path}"))?;
    tracing::info!(%path, "wrote dependency report");
    Ok(())
}

/// Merge the direct-dependency line into the `Depends` field of an existing
/// control file, preserving its other fields.
pub fn inject_dependencies(path: &Utf8Path, report: &ConversionReport) -> Result<()> {
    let text =
        fs::read_to_string(path).with_context(|| format!("cannot read control file {path}"))?;
    let mut control = ControlDocument::parse(&text)?;
    let mut overlay = ControlDocument::new();
    overlay.set("Depends", report.direct_depends_line());
    merge_layers(&mut control, &overlay);
    fs::write(path, control.render())
        .with_context(|| format!("cannot write control file {path}"))?;
    tracing::info!(%path, "injected dependencies into control file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> ConversionReport {
        ConversionReport {
            results: vec![
                ConversionResult {
                    source: "requests".to_string(),
                    package: "python3-requests".to_string(),
                    version: "2.32.3-1".to_string(),
                    archive: Utf8PathBuf::from("/tmp/python3-requests_2.32.3-1_all.deb"),
                    is_direct: true,
                },
                ConversionResult {
                    source: "idna".to_string(),
                    package: "python3-idna".to_string(),
                    version: "3.7-1".to_string(),
                    archive: Utf8PathBuf::from("/tmp/python3-idna_3.7-1_all.deb"),
                    is_direct: false,
                },
            ],
            failures: Vec::new(),
            retained: Vec::new(),
        }
    }

    #[test]
    fn direct_line_only_covers_requested_packages() {
        assert_eq!(
            report().direct_depends_line(),
            "python3-requests (= 2.32.3-1)"
        );
    }

    #[test]
    fn injection_merges_into_existing_depends() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = Utf8Path::from_path(dir.path())
            .expect("utf-8 temp path")
            .join("control");
        fs::write(
            &path,
            "Package: my-application\nDepends: libc6 (>= 2.36)\n",
        )?;
        inject_dependencies(&path, &report())?;
        let text = fs::read_to_string(&path)?;
        assert_eq!(
            text,
            "Package: my-application\nDepends: libc6 (>= 2.36), python3-requests (= 2.32.3-1)\n"
        );
        Ok(())
    }

    #[test]
    fn dependency_report_is_newline_terminated() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = Utf8Path::from_path(dir.path())
            .expect("utf-8 temp path")
            .join("depends.txt");
        write_dependency_report(&path, &report())?;
        assert_eq!(
            fs::read_to_string(&path)?,
            "python3-requests (= 2.32.3-1)\n"
        );
        Ok(())
    }
}
