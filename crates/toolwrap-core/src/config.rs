use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use toolwrap_python::PYTHON_ENV_VAR;

pub const LOG_FILENAME: &str = "bootstrap_envs.log";
pub const DEFAULT_BIN_DIR: &str = "bin";
pub const VENV_DIRNAME: &str = ".venv";

/// What to do with imports that no requirement declares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingAction {
    #[default]
    None,
    Suggest,
    Append,
}

impl MissingAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Suggest => "suggest",
            Self::Append => "append",
        }
    }

    #[must_use]
    pub fn scans_imports(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for MissingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    #[must_use]
    pub fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    #[must_use]
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
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

/// Options as the user typed them; paths are not yet resolved.
#[derive(Debug, Clone, Default)]
pub struct BootstrapOptions {
    pub source: PathBuf,
    pub bin: Option<PathBuf>,
    pub venv_root: Option<PathBuf>,
    pub python_version: Option<String>,
    pub missing: MissingAction,
    pub recreate_all: bool,
    pub dry_run: bool,
    pub include_groups: Option<Vec<String>>,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    pub source_root: PathBuf,
    pub bin_dir: PathBuf,
    pub venv_root: PathBuf,
    pub fallback_version: Option<String>,
    pub missing: MissingAction,
    pub recreate_all: bool,
    pub dry_run: bool,
    pub include_groups: Option<Vec<String>>,
    /// Interpreter forced through `TOOLWRAP_PYTHON`.
    pub python_override: Option<PathBuf>,
}

impl BootstrapConfig {
    /// Resolve `options` against `cwd`.
    ///
    /// `--bin` and `--venv-root` are relative to the source root, and the
    /// environment root defaults to `<bin>/.venv`.
    #[must_use]
    pub fn from_options(options: BootstrapOptions, env: &EnvSnapshot, cwd: &Path) -> Self {
        let source_root = resolve_path(&options.source, cwd);
        let bin_dir = resolve_path(
            options
                .bin
                .as_deref()
                .unwrap_or_else(|| Path::new(DEFAULT_BIN_DIR)),
            &source_root,
        );
        let venv_root = match options.venv_root.as_deref() {
            Some(path) => resolve_path(path, &source_root),
            None => resolve_path(Path::new(VENV_DIRNAME), &bin_dir),
        };
        let include_groups = options.include_groups.map(|names| {
            names
                .iter()
                .flat_map(|name| name.split(','))
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(String::from)
                .collect::<Vec<_>>()
        });
        Self {
            source_root,
            bin_dir,
            venv_root,
            fallback_version: options
                .python_version
                .map(|version| version.trim().to_string())
                .filter(|version| !version.is_empty()),
            missing: options.missing,
            recreate_all: options.recreate_all,
            dry_run: options.dry_run,
            include_groups,
            python_override: env
                .var(PYTHON_ENV_VAR)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from),
        }
    }

    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.venv_root.join(LOG_FILENAME)
    }

    #[must_use]
    pub fn env_dir(&self, group: &str) -> PathBuf {
        self.venv_root.join(group)
    }
}

/// Expand `~`, anchor relative paths at `base`, then canonicalize when the
/// path exists and normalize lexically when it does not.
fn resolve_path(path: &Path, base: &Path) -> PathBuf {
    let expanded = expand_home(path);
    let joined = if expanded.is_absolute() {
        expanded
    } else {
        base.join(expanded)
    };
    fs::canonicalize(&joined).unwrap_or_else(|_| normalize(&joined))
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs_next::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}
