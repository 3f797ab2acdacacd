//! Requirement file parsing.
//!
//! Only package names are extracted: versions, extras, markers and hashes are
//! left to pip. `-r` includes are followed relative to the including file,
//! and a visited set of canonical paths keeps circular includes finite.

use std::collections::{BTreeSet, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

pub const REQUIREMENTS_FILENAME: &str = "requirements.txt";

pub const APPEND_MARKER: &str = "# --- Auto-appended by toolwrap ---";

const VCS_PREFIXES: &[&str] = &["git+", "hg+", "svn+", "bzr+"];

/// Lowercased package names declared by `path` and everything it includes.
///
/// A missing file yields an empty set.
pub fn parse_requirements(path: &Path) -> BTreeSet<String> {
    let mut visited = HashSet::new();
    let mut names = BTreeSet::new();
    collect_requirements(path, &mut visited, &mut names);
    names
}

fn collect_requirements(
    path: &Path,
    visited: &mut HashSet<PathBuf>,
    names: &mut BTreeSet<String>,
) {
    if !path.is_file() {
        debug!(path = %path.display(), "requirements file not found");
        return;
    }
    let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(canonical.clone()) {
        debug!(path = %canonical.display(), "requirements file already visited");
        return;
    }
    let contents = match fs::read_to_string(&canonical) {
        Ok(contents) => contents,
        Err(err) => {
            warn!("error reading {}: {err}", canonical.display());
            return;
        }
    };
    let base_dir = canonical.parent().unwrap_or_else(|| Path::new("."));

    for line in logical_lines(&contents) {
        match classify_line(&line) {
            RequirementLine::Include(target) => {
                let include = if Path::new(target).is_absolute() {
                    PathBuf::from(target)
                } else {
                    base_dir.join(target)
                };
                collect_requirements(&include, visited, names);
            }
            RequirementLine::Package(name) => {
                names.insert(name.to_lowercase());
            }
            RequirementLine::Option => {
                debug!(line = %line, "ignoring pip option line");
            }
            RequirementLine::LocalPath => {
                debug!(line = %line, "ignoring local path requirement");
            }
            RequirementLine::Unparseable => {
                warn!(
                    "could not parse package from line '{line}' in {}",
                    canonical.display()
                );
            }
        }
    }
}

/// Joins `\` continuations and drops blank lines, comment lines and inline comments.
fn logical_lines(contents: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut pending = String::new();
    for raw in contents.lines() {
        let mut line = raw.trim();
        if pending.is_empty() && (line.is_empty() || line.starts_with('#')) {
            continue;
        }
        if let Some(idx) = line.find(" #").or_else(|| line.find("\t#")) {
            line = line[..idx].trim_end();
        }
        let continues = line.ends_with('\\');
        let line = line.strip_suffix('\\').unwrap_or(line).trim_end();
        if !pending.is_empty() && !line.is_empty() {
            pending.push(' ');
        }
        pending.push_str(line);
        if continues {
            continue;
        }
        let complete = std::mem::take(&mut pending);
        if !complete.trim().is_empty() {
            lines.push(complete.trim().to_string());
        }
    }
    if !pending.trim().is_empty() {
        lines.push(pending.trim().to_string());
    }
    lines
}

#[derive(Debug, PartialEq, Eq)]
enum RequirementLine<'a> {
    Include(&'a str),
    Package(&'a str),
    Option,
    LocalPath,
    Unparseable,
}

fn classify_line(line: &str) -> RequirementLine<'_> {
    if let Some(target) = include_target(line) {
        return if target.is_empty() {
            RequirementLine::Unparseable
        } else {
            RequirementLine::Include(target)
        };
    }

    let mut spec = line;
    if let Some(rest) = spec
        .strip_prefix("-e ")
        .or_else(|| spec.strip_prefix("--editable "))
        .or_else(|| spec.strip_prefix("--editable="))
    {
        spec = rest.trim();
    }

    if is_url(spec) {
        return egg_name(spec).map_or(RequirementLine::Unparseable, RequirementLine::Package);
    }

    if spec.starts_with('-') {
        return RequirementLine::Option;
    }

    if spec.starts_with(['.', '/', '~']) {
        return RequirementLine::LocalPath;
    }

    let end = spec
        .find(|ch: char| !(ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-')))
        .unwrap_or(spec.len());
    let name = &spec[..end];
    if name.is_empty() || name.chars().all(|ch| ch == '.') {
        RequirementLine::Unparseable
    } else {
        RequirementLine::Package(name)
    }
}

fn is_url(spec: &str) -> bool {
    VCS_PREFIXES.iter().any(|prefix| spec.starts_with(prefix))
        || spec.split_once("://").is_some_and(|(scheme, _)| {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || ch == '+')
        })
}

fn include_target(line: &str) -> Option<&str> {
    let rest = line
        .strip_prefix("--requirement")
        .or_else(|| line.strip_prefix("-r"))?;
    // `-rfoo.txt` is an include; `--requirementsfoo` is not.
    if line.starts_with("--requirement")
        && !rest.is_empty()
        && !rest.starts_with([' ', '=', '\t'])
    {
        return None;
    }
    Some(rest.trim_start_matches([' ', '=', '\t']).trim())
}

fn egg_name(spec: &str) -> Option<&str> {
    let (_, fragment) = spec.split_once("#egg=")?;
    let egg = fragment.split('&').next().unwrap_or("").trim();
    let end = egg
        .find(|ch: char| !(ch.is_ascii_alphanumeric() || matches!(ch, '_' | '.' | '-')))
        .unwrap_or(egg.len());
    let name = &egg[..end];
    (!name.is_empty()).then_some(name)
}

/// Append `names` to the requirement file at `path`, creating it when absent.
///
/// # Errors
///
/// Returns an error when the file or its parent directory cannot be written.
pub fn append_requirements(path: &Path, names: &BTreeSet<String>) -> Result<()> {
    if names.is_empty() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut block = format!("\n{APPEND_MARKER}\n");
    for name in names {
        block.push_str(name);
        block.push('\n');
    }
    file.write_all(block.as_bytes())
        .with_context(|| format!("appending to {}", path.display()))?;
    Ok(())
}
