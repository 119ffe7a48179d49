//! Target interpreter discovery and interrogation.
//!
//! Conversion targets one concrete interpreter: its version decides the
//! interpreter dependency of every produced package and its marker facts
//! decide which requirements apply at all. The interpreter reports its own
//! facts; nothing is inferred from the host.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::from_str;
use which::which;

use pydeb_domain::InterpreterFacts;

use crate::process::run_command;

const FACTS_SCRIPT: &str = r#"import json, os, platform, sys
impl_name = getattr(sys.implementation, "name", "cpython")
impl_version = platform.python_version()
python_full = platform.python_version()
python_short = f"{sys.version_info[0]}.{sys.version_info[1]}"
data = {
    "implementation_name": impl_name,
    "implementation_version": impl_version,
    "os_name": os.name,
    "platform_machine": platform.machine(),
    "platform_python_implementation": platform.python_implementation(),
    "platform_release": platform.release(),
    "platform_system": platform.system(),
    "platform_version": platform.version(),
    "python_full_version": python_full,
    "python_version": python_short,
    "sys_platform": sys.platform,
}
print(json.dumps(data))
"#;

/// Locate the interpreter to convert for. An explicit path wins; otherwise
/// `python3` then `python` on `PATH`.
///
/// # Errors
///
/// Returns an error when no interpreter can be found or the detected path is
/// not valid UTF-8.
pub fn detect_interpreter(explicit: Option<&str>) -> Result<String> {
    if let Some(explicit) = explicit {
        return Ok(explicit.to_string());
    }

    for candidate in ["python3", "python"] {
        if let Ok(path) = which(candidate) {
            return path
                .into_os_string()
                .into_string()
                .map_err(|_| anyhow::anyhow!("interpreter path is not valid UTF-8"));
        }
    }

    bail!("no python interpreter found on PATH; pass --python");
}

/// Ask the interpreter for its marker facts.
pub fn query_interpreter(python: &str) -> Result<InterpreterFacts> {
    let output = run_command(
        python,
        &["-c".to_string(), FACTS_SCRIPT.to_string()],
        &[],
        Path::new("."),
    )?;
    if output.code != 0 {
        bail!(
            "{python} exited with {} while reporting environment facts: {}",
            output.code,
            output.stderr.trim()
        );
    }
    from_str(output.stdout.trim())
        .with_context(|| format!("unreadable environment facts from {python}"))
}
