#![deny(clippy::all, warnings)]

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use tracing::{debug, warn};

/// Overrides default interpreter detection when set.
pub const PYTHON_ENV_VAR: &str = "TOOLWRAP_PYTHON";

/// Name of the per-group version pin file.
pub const PYTHON_VERSION_FILENAME: &str = "python_version.txt";

const LAUNCHER: &str = "py";

/// Lookups the version resolver performs against the host.
///
/// Every method is read-only; implementations must never install or modify
/// anything.
pub trait ExecutableProbe {
    fn which(&self, name: &str) -> Option<PathBuf>;

    /// Ask a launcher such as `py` which interpreter it would start for `version`.
    fn query_launcher(&self, launcher: &Path, version: &str) -> Option<PathBuf>;

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Probes the process `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SearchPath;

impl ExecutableProbe for SearchPath {
    fn which(&self, name: &str) -> Option<PathBuf> {
        which::which(name).ok()
    }

    fn query_launcher(&self, launcher: &Path, version: &str) -> Option<PathBuf> {
        let output = Command::new(launcher)
            .arg(format!("-{version}"))
            .args(["-c", "import sys; print(sys.executable)"])
            .stdin(Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let printed = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if printed.is_empty() {
            None
        } else {
            Some(PathBuf::from(printed))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterpreterRequest {
    /// Requested by a group's `python_version.txt`.
    Pinned(String),
    /// Requested through the global `--python-version` flag.
    Fallback(String),
    /// Whatever `python3`/`python` (or `TOOLWRAP_PYTHON`) points at.
    Default,
}

impl fmt::Display for InterpreterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pinned(version) => write!(f, "pinned {version}"),
            Self::Fallback(version) => write!(f, "fallback {version}"),
            Self::Default => f.write_str("default interpreter"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInterpreter {
    pub path: PathBuf,
    pub request: InterpreterRequest,
}

impl ResolvedInterpreter {
    #[must_use]
    pub fn new(path: PathBuf, request: InterpreterRequest) -> Self {
        Self { path, request }
    }
}

/// Executable names probed for a version token, in probe order.
#[must_use]
pub fn candidate_names(version: &str) -> Vec<String> {
    let version = version.trim();
    if version.is_empty() {
        return Vec::new();
    }
    let prefixed = version.starts_with("python");
    let mut names = vec![format!("python{version}")];
    if version.contains('.') && !prefixed {
        let major_minor = version.split('.').take(2).collect::<Vec<_>>().join(".");
        names.push(format!("python{major_minor}"));
    }
    if !prefixed {
        names.push(version.to_string());
    }
    let mut unique = Vec::with_capacity(names.len());
    for name in names {
        if !unique.contains(&name) {
            unique.push(name);
        }
    }
    unique
}

/// Find an interpreter for `version` on the process search path.
#[must_use]
pub fn find_python_executable(version: Option<&str>) -> Option<PathBuf> {
    find_python_executable_with(&SearchPath, version)
}

pub fn find_python_executable_with(
    probe: &dyn ExecutableProbe,
    version: Option<&str>,
) -> Option<PathBuf> {
    let version = version.map(str::trim).filter(|v| !v.is_empty())?;

    for name in candidate_names(version) {
        if let Some(path) = probe.which(&name) {
            debug!(version, candidate = %name, path = %path.display(), "found python executable");
            return Some(path);
        }
    }

    if !version.starts_with("python") {
        if let Some(launcher) = probe.which(LAUNCHER) {
            if let Some(path) = probe.query_launcher(&launcher, version) {
                if probe.exists(&path) {
                    debug!(version, path = %path.display(), "python executable reported by py launcher");
                    return Some(path);
                }
            }
        }
    }

    warn!("could not find a python executable for version '{version}' on PATH");
    None
}

/// The interpreter used when neither a pin nor a fallback version resolves.
///
/// # Errors
///
/// Returns an error when no interpreter is configured or on `PATH`.
pub fn detect_default_interpreter() -> Result<PathBuf> {
    let explicit = env::var(PYTHON_ENV_VAR).ok();
    detect_default_interpreter_with(&SearchPath, explicit.as_deref())
}

pub fn detect_default_interpreter_with(
    probe: &dyn ExecutableProbe,
    explicit: Option<&str>,
) -> Result<PathBuf> {
    if let Some(explicit) = explicit.map(str::trim).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(explicit));
    }

    for candidate in ["python3", "python"] {
        if let Some(path) = probe.which(candidate) {
            return Ok(path);
        }
    }

    bail!("no python interpreter found; set {PYTHON_ENV_VAR}")
}

/// Read a version pin file. Missing files and blank content both mean "not specified".
///
/// # Errors
///
/// Returns an error when the file exists but cannot be read.
pub fn read_version_pin(path: &Path) -> Result<Option<String>> {
    if !path.is_file() {
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let token = contents.trim();
    if token.is_empty() {
        Ok(None)
    } else {
        Ok(Some(token.to_string()))
    }
}
