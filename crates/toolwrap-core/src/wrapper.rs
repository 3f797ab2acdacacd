use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use toolwrap_domain::Group;
use tracing::{debug, error, info, warn};

use crate::environment::EnvironmentRecord;
use crate::summary::ProvisioningOutcome;

/// Exit code of a wrapper whose environment lost its activation script.
pub const EXIT_MISSING_ACTIVATION: i32 = 2;
/// Exit code of a wrapper whose target script was moved or deleted.
pub const EXIT_MISSING_TARGET: i32 = 3;

pub(crate) fn shell_escape(value: &str) -> String {
    let mut escaped = String::from("'");
    for ch in value.chars() {
        if ch == '\'' {
            escaped.push_str("'\\''");
        } else {
            escaped.push(ch);
        }
    }
    escaped.push('\'');
    escaped
}

fn absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Bash launcher that activates `env` and execs `script` with the caller's arguments.
#[must_use]
pub fn wrapper_script(env: &EnvironmentRecord, script: &Path) -> String {
    let root = absolute(&env.root);
    let venv = shell_escape(&root.display().to_string());
    let target = shell_escape(&absolute(script).display().to_string());
    let activate = shell_escape(&root.join(env.activate_relative()).display().to_string());

    let mut body = String::new();
    body.push_str("#!/usr/bin/env bash\n");
    body.push_str("# Wrapper generated by toolwrap for:\n");
    body.push_str(&format!("# Target Script: {target}\n\n"));
    body.push_str("set -e\n\n");
    body.push_str(&format!("VENV_PATH={venv}\n"));
    body.push_str(&format!("SCRIPT_PATH={target}\n"));
    body.push_str(&format!("ACTIVATE_SCRIPT={activate}\n\n"));
    body.push_str("if [ ! -f \"$ACTIVATE_SCRIPT\" ]; then\n");
    body.push_str("    echo \"Error: Activation script not found at $ACTIVATE_SCRIPT\" >&2\n");
    body.push_str(&format!("    exit {EXIT_MISSING_ACTIVATION}\n"));
    body.push_str("fi\n");
    body.push_str("if [ ! -f \"$SCRIPT_PATH\" ]; then\n");
    body.push_str("    echo \"Error: Target script not found at $SCRIPT_PATH\" >&2\n");
    body.push_str(&format!("    exit {EXIT_MISSING_TARGET}\n"));
    body.push_str("fi\n\n");
    body.push_str(". \"$ACTIVATE_SCRIPT\"\n");
    body.push_str("exec python \"$SCRIPT_PATH\" \"$@\"\n");
    body
}

/// Write an executable wrapper, removing any partial file on failure.
///
/// # Errors
///
/// Returns an error when the file cannot be written or made executable.
pub fn write_wrapper(path: &Path, contents: &str) -> Result<()> {
    let result = write_executable(path, contents);
    if result.is_err() && path.exists() {
        if let Err(err) = fs::remove_file(path) {
            debug!(path = %path.display(), %err, "could not remove partial wrapper");
        }
    }
    result
}

fn write_executable(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("writing {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("setting permissions on {}", path.display()))?;
    }
    Ok(())
}

/// Generates wrappers for a run, keeping wrapper names unique across groups.
#[derive(Debug)]
pub struct WrapperWriter {
    bin_dir: PathBuf,
    dry_run: bool,
    blocked: HashSet<String>,
    claimed: HashMap<String, String>,
}

impl WrapperWriter {
    /// `collisions` are skipped in every group.
    #[must_use]
    pub fn new(bin_dir: &Path, dry_run: bool, collisions: &IndexMap<String, Vec<String>>) -> Self {
        Self {
            bin_dir: bin_dir.to_path_buf(),
            dry_run,
            blocked: collisions.keys().cloned().collect(),
            claimed: HashMap::new(),
        }
    }

    pub fn generate(
        &mut self,
        group: &Group,
        env: &EnvironmentRecord,
        outcome: &mut ProvisioningOutcome,
    ) {
        info!("generating wrappers for group '{}'", group.name);
        for (name, script) in group.wrapper_targets() {
            if self.blocked.contains(&name) {
                warn!(
                    "wrapper '{name}' collides across groups; skipping it for group '{}'",
                    group.name
                );
                continue;
            }
            if let Some(owner) = self.claimed.get(&name) {
                warn!(
                    "wrapper '{name}' already generated for group '{owner}'; skipping it for group '{}'",
                    group.name
                );
                continue;
            }
            let path = self.bin_dir.join(&name);
            let contents = wrapper_script(env, script);
            if self.dry_run {
                info!("would write wrapper {}:\n{contents}", path.display());
            } else if let Err(err) = write_wrapper(&path, &contents) {
                error!("failed to create wrapper {}: {err:#}", path.display());
                outcome.record_failure(format!("wrapper '{name}' could not be written"));
                continue;
            } else {
                debug!(path = %path.display(), "wrapper written");
            }
            self.claimed.insert(name, group.name.clone());
            outcome.wrappers.push(path);
        }
    }
}
