use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use tracing::{info, warn};

use crate::requirements::REQUIREMENTS_FILENAME;

pub const VERSION_PIN_FILENAME: &str = "python_version.txt";

/// A directory of scripts that share one environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub dir: PathBuf,
    /// `*.py` files directly inside `dir`, sorted.
    pub scripts: Vec<PathBuf>,
    pub version_file: PathBuf,
    pub requirements: PathBuf,
}

impl Group {
    /// Load the group rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error when `dir` cannot be listed.
    pub fn load(dir: &Path) -> Result<Self> {
        let name = dir
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut scripts = Vec::new();
        for entry in fs::read_dir(dir).with_context(|| format!("reading dir {}", dir.display()))? {
            let path = entry?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "py") {
                scripts.push(path);
            }
        }
        scripts.sort();
        Ok(Self {
            scripts,
            ..Self::without_scripts(name, dir)
        })
    }

    /// Like [`Group::load`], but a directory that cannot be listed becomes a
    /// group with no scripts, which the run later skips.
    #[must_use]
    pub fn load_or_empty(dir: &Path) -> Self {
        Self::load(dir).unwrap_or_else(|err| {
            warn!("cannot list {}: {err:#}; treating it as a group without scripts", dir.display());
            let name = dir
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            Self::without_scripts(name, dir)
        })
    }

    fn without_scripts(name: String, dir: &Path) -> Self {
        Self {
            name,
            dir: dir.to_path_buf(),
            scripts: Vec::new(),
            version_file: dir.join(VERSION_PIN_FILENAME),
            requirements: dir.join(REQUIREMENTS_FILENAME),
        }
    }

    /// Wrapper name for each script (its file stem), paired with the script.
    pub fn wrapper_targets(&self) -> impl Iterator<Item = (String, &Path)> {
        self.scripts.iter().filter_map(|script| {
            script
                .file_stem()
                .map(|stem| (stem.to_string_lossy().to_string(), script.as_path()))
        })
    }
}

/// Non-hidden subdirectories of `source`, sorted by name.
///
/// Directories listed in `exclude` (the wrapper and environment output
/// directories when they live inside the source tree) are never groups.
///
/// Unreadable entries and subdirectories are warned about, never fatal.
///
/// # Errors
///
/// Returns an error when `source` itself cannot be listed.
pub fn discover_groups(source: &Path, exclude: &[PathBuf]) -> Result<Vec<Group>> {
    let excluded: Vec<PathBuf> = exclude
        .iter()
        .map(|path| fs::canonicalize(path).unwrap_or_else(|_| path.clone()))
        .collect();
    let mut dirs = Vec::new();
    for entry in fs::read_dir(source).with_context(|| format!("reading dir {}", source.display()))? {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(err) => {
                warn!("skipping unreadable entry in {}: {err}", source.display());
                continue;
            }
        };
        if !path.is_dir() {
            continue;
        }
        let hidden = path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with('.'));
        if hidden {
            continue;
        }
        let canonical = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if excluded.contains(&canonical) {
            continue;
        }
        dirs.push(path);
    }
    dirs.sort();
    Ok(dirs.iter().map(|dir| Group::load_or_empty(dir)).collect())
}

/// Restrict `groups` to `allow`, warning about names that do not exist.
#[must_use]
pub fn select_groups(groups: Vec<Group>, allow: Option<&[String]>, source: &Path) -> Vec<Group> {
    let Some(allow) = allow else {
        info!("processing all subdirectories in source");
        return groups;
    };
    let mut wanted: Vec<&str> = allow
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .collect();
    wanted.sort_unstable();
    wanted.dedup();
    info!("processing specified groups: {}", wanted.join(", "));
    for name in &wanted {
        if !groups.iter().any(|group| group.name == *name) {
            warn!("specified group '{name}' not found in {}", source.display());
        }
    }
    groups
        .into_iter()
        .filter(|group| wanted.contains(&group.name.as_str()))
        .collect()
}

/// Wrapper names produced by more than one group, with the groups involved.
#[must_use]
pub fn detect_wrapper_collisions(groups: &[Group]) -> IndexMap<String, Vec<String>> {
    let mut owners: IndexMap<String, Vec<String>> = IndexMap::new();
    for group in groups {
        for (wrapper, _) in group.wrapper_targets() {
            owners.entry(wrapper).or_default().push(group.name.clone());
        }
    }
    owners.retain(|_, groups| groups.len() > 1);
    owners
}
