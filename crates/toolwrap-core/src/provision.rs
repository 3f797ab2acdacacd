//! Per-group provisioning decisions.
//!
//! Each group walks a small state machine: the environment directory is
//! inspected, optionally removed for recreation, created when absent, and
//! checked for completeness. Declared requirements are then reconciled with
//! the imports the group's scripts use, and the installer runs.

use std::fs;
use std::path::Path;

use toolwrap_domain::{
    append_requirements, find_third_party_imports, import_to_distribution, parse_requirements,
    DependencySet, Group, StandardLibraryClassifier,
};
use toolwrap_python::{
    find_python_executable_with, read_version_pin, InterpreterRequest, ResolvedInterpreter,
    PYTHON_VERSION_FILENAME,
};
use tracing::{debug, error, info, warn};

use crate::config::{BootstrapConfig, MissingAction};
use crate::effects::Effects;
use crate::environment::{EnvironmentRecord, EnvironmentState};
use crate::error::BootstrapError;
use crate::process::render_command;
use crate::summary::{EnvironmentAction, ProvisioningOutcome};

/// Run-wide inputs shared by every group.
pub struct ProvisionContext<'a> {
    pub config: &'a BootstrapConfig,
    pub effects: &'a dyn Effects,
    /// Present only when missing-import detection is enabled.
    pub classifier: Option<&'a StandardLibraryClassifier>,
    /// Used when a group has no usable version pin.
    pub fallback: Option<&'a ResolvedInterpreter>,
}

impl ProvisionContext<'_> {
    #[must_use]
    pub fn dry_run(&self) -> bool {
        self.config.dry_run
    }
}

pub struct ProvisionedGroup {
    pub outcome: ProvisioningOutcome,
    pub environment: EnvironmentRecord,
}

/// Bring `group`'s environment to a usable state and install its requirements.
///
/// # Errors
///
/// Returns [`BootstrapError::IncompleteEnvironment`] when an environment
/// directory exists without its interpreter or installer outside dry-run.
/// Every other problem is recorded on the returned outcome.
pub fn provision_group(
    ctx: &ProvisionContext<'_>,
    group: &Group,
) -> Result<ProvisionedGroup, BootstrapError> {
    let root = ctx.config.env_dir(&group.name);
    let mut record = EnvironmentRecord::inspect(&root);
    let mut removed = false;
    let mut interpreter = None;
    let mut failure = String::new();

    let mut state = EnvironmentState::NotEvaluated;
    let action = loop {
        state = match state {
            EnvironmentState::NotEvaluated => {
                if ctx.config.recreate_all && record.exists {
                    match remove_environment(ctx, &root) {
                        Ok(()) => {
                            removed = true;
                            EnvironmentState::EnvironmentAbsent
                        }
                        Err(reason) => {
                            failure = reason;
                            EnvironmentState::Failed
                        }
                    }
                } else {
                    if record.exists {
                        info!("reusing existing environment at {}", root.display());
                    }
                    record.state()
                }
            }
            EnvironmentState::EnvironmentAbsent => match select_interpreter(ctx, group) {
                None => {
                    error!(
                        "no python interpreter available to create the environment for group '{}'",
                        group.name
                    );
                    failure = "no python interpreter available".to_string();
                    EnvironmentState::Failed
                }
                Some(chosen) => {
                    info!(
                        "creating environment for group '{}' at {} using {} ({})",
                        group.name,
                        root.display(),
                        chosen.path.display(),
                        chosen.request
                    );
                    if create_environment(ctx, &chosen.path, &root) {
                        record = EnvironmentRecord::inspect(&root);
                        interpreter = Some(chosen.path);
                        if ctx.dry_run() || record.complete {
                            EnvironmentState::EnvironmentPresentComplete
                        } else {
                            EnvironmentState::EnvironmentPresentIncomplete
                        }
                    } else {
                        error!("failed to create environment for group '{}'", group.name);
                        failure = "environment creation failed".to_string();
                        EnvironmentState::Failed
                    }
                }
            },
            EnvironmentState::EnvironmentPresentIncomplete => {
                if !ctx.dry_run() {
                    let err = BootstrapError::IncompleteEnvironment {
                        group: group.name.clone(),
                        root: root.clone(),
                    };
                    error!("{err}");
                    return Err(err);
                }
                warn!(
                    "environment at {} is missing python or pip; continuing in dry-run",
                    root.display()
                );
                EnvironmentState::EnvironmentPresentComplete
            }
            EnvironmentState::EnvironmentPresentComplete => {
                break match (interpreter.is_some(), removed) {
                    (false, _) => EnvironmentAction::Reused,
                    (true, true) => EnvironmentAction::Recreated,
                    (true, false) => EnvironmentAction::Created,
                };
            }
            EnvironmentState::Failed => {
                return Ok(ProvisionedGroup {
                    outcome: ProvisioningOutcome::failed(&group.name, failure),
                    environment: record,
                });
            }
        };
    };

    let mut outcome = ProvisioningOutcome::new(&group.name, action);
    outcome.interpreter = interpreter;

    let declared = reconcile_requirements(ctx, group, &mut outcome);
    debug!(group = %group.name, declared = %declared.display_list(), "declared packages");

    if install_dependencies(ctx, &record, &group.requirements) {
        outcome.installed = true;
    } else {
        error!("dependency installation failed for group '{}'", group.name);
        outcome.record_failure("dependency installation failed");
    }

    Ok(ProvisionedGroup {
        outcome,
        environment: record,
    })
}

/// Pin, then fallback, then default interpreter.
pub fn select_interpreter(
    ctx: &ProvisionContext<'_>,
    group: &Group,
) -> Option<ResolvedInterpreter> {
    match read_version_pin(&group.version_file) {
        Ok(Some(version)) => {
            info!("found {PYTHON_VERSION_FILENAME}: requesting '{version}'");
            if let Some(path) =
                find_python_executable_with(ctx.effects.executables(), Some(&version))
            {
                info!("using requested python: {}", path.display());
                return Some(ResolvedInterpreter::new(
                    path,
                    InterpreterRequest::Pinned(version),
                ));
            }
            warn!(
                "requested python '{version}' for group '{}' not found; using fallback",
                group.name
            );
        }
        Ok(None) => {
            debug!(group = %group.name, "no version pin; using fallback python");
        }
        Err(err) => {
            warn!("error reading {PYTHON_VERSION_FILENAME}: {err:#}; using fallback python");
        }
    }
    ctx.fallback.cloned()
}

fn remove_environment(ctx: &ProvisionContext<'_>, root: &Path) -> Result<(), String> {
    info!("recreate-all: removing existing environment at {}", root.display());
    if ctx.dry_run() {
        info!("would remove {}", root.display());
        return Ok(());
    }
    fs::remove_dir_all(root).map_err(|err| {
        error!("failed to remove environment at {}: {err}", root.display());
        format!("failed to remove environment: {err}")
    })
}

fn create_environment(ctx: &ProvisionContext<'_>, python: &Path, root: &Path) -> bool {
    let args = vec![
        "-m".to_string(),
        "venv".to_string(),
        root.display().to_string(),
    ];
    run_step(ctx, python, &args)
}

/// Declared packages after any missing imports have been handled.
fn reconcile_requirements(
    ctx: &ProvisionContext<'_>,
    group: &Group,
    outcome: &mut ProvisioningOutcome,
) -> DependencySet {
    let mut declared = DependencySet::declared(&parse_requirements(&group.requirements));
    if group.requirements.is_file() {
        debug!(
            "found {} with packages: {}",
            group.requirements.display(),
            declared.display_list()
        );
    } else {
        info!("no requirements file for group '{}'", group.name);
    }

    let Some(classifier) = ctx.classifier.filter(|_| ctx.config.missing.scans_imports()) else {
        return declared;
    };
    debug!("scanning python files for third-party imports");
    let imports = find_third_party_imports(&group.scripts, classifier);
    let detected = DependencySet::detected(imports.iter().map(|module| import_to_distribution(module)));
    debug!("detected imports: {}", detected.display_list());

    let missing = detected.difference(&declared);
    if missing.is_empty() {
        info!("no missing third-party imports detected");
        return declared;
    }
    let listed = missing.iter().cloned().collect::<Vec<_>>().join(", ");
    match ctx.config.missing {
        MissingAction::Suggest => {
            warn!("[SUGGEST] group '{}' missing packages: {listed}", group.name);
            outcome.suggested = missing;
        }
        MissingAction::Append => {
            info!(
                "[APPEND] appending missing packages to {}: {listed}",
                group.requirements.display()
            );
            if ctx.dry_run() {
                info!("would append to {}", group.requirements.display());
            } else {
                match append_requirements(&group.requirements, &missing) {
                    Ok(()) => {
                        declared.merge(&missing);
                        outcome.appended = missing;
                    }
                    Err(err) => {
                        error!(
                            "failed to append to {}: {err:#}",
                            group.requirements.display()
                        );
                        outcome.record_failure("could not append missing requirements");
                    }
                }
            }
        }
        MissingAction::None => {}
    }
    declared
}

/// Upgrade pip, then install from `requirements` when it exists.
fn install_dependencies(
    ctx: &ProvisionContext<'_>,
    record: &EnvironmentRecord,
    requirements: &Path,
) -> bool {
    let pip = record.pip();
    info!("upgrading pip in environment {}", record.root.display());
    let upgrade = ["install", "--upgrade", "pip"].map(String::from);
    if !run_step(ctx, &pip, &upgrade) {
        error!("failed to upgrade pip in environment {}", record.root.display());
        return false;
    }
    if !requirements.is_file() {
        info!(
            "{} not found; skipping dependency installation",
            requirements.display()
        );
        return true;
    }
    info!("installing dependencies from {}", requirements.display());
    let install = vec![
        "install".to_string(),
        "-r".to_string(),
        requirements.display().to_string(),
    ];
    run_step(ctx, &pip, &install)
}

fn run_step(ctx: &ProvisionContext<'_>, program: &Path, args: &[String]) -> bool {
    let rendered = render_command(program, args);
    if ctx.dry_run() {
        info!("would run: {rendered}");
        return true;
    }
    debug!("running command: {rendered}");
    match ctx
        .effects
        .commands()
        .run(program, args, &ctx.config.source_root)
    {
        Ok(output) if output.success() => {
            debug!("command succeeded: {}", output.stdout.trim());
            true
        }
        Ok(output) => {
            error!("command failed with exit code {}: {rendered}", output.code);
            if !output.stderr.trim().is_empty() {
                error!("stderr:\n{}", output.stderr.trim());
            }
            if !output.stdout.trim().is_empty() {
                error!("stdout:\n{}", output.stdout.trim());
            }
            false
        }
        Err(err) => {
            error!("failed to run {rendered}: {err:#}");
            false
        }
    }
}
