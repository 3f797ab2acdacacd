use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Serialize;
use tracing::info;

use crate::error::BootstrapError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentAction {
    Created,
    Reused,
    Recreated,
    Failed,
}

/// What happened to one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisioningOutcome {
    pub group: String,
    pub action: EnvironmentAction,
    pub interpreter: Option<PathBuf>,
    pub installed: bool,
    pub suggested: BTreeSet<String>,
    pub appended: BTreeSet<String>,
    pub wrappers: Vec<PathBuf>,
    pub failures: Vec<String>,
}

impl ProvisioningOutcome {
    #[must_use]
    pub fn new(group: &str, action: EnvironmentAction) -> Self {
        Self {
            group: group.to_string(),
            action,
            interpreter: None,
            installed: false,
            suggested: BTreeSet::new(),
            appended: BTreeSet::new(),
            wrappers: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// An outcome for a group whose environment could not be provided.
    #[must_use]
    pub fn failed(group: &str, reason: impl Into<String>) -> Self {
        let mut outcome = Self::new(group, EnvironmentAction::Failed);
        outcome.failures.push(reason.into());
        outcome
    }

    pub fn record_failure(&mut self, reason: impl Into<String>) {
        self.failures.push(reason.into());
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.action == EnvironmentAction::Failed || !self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub dry_run: bool,
    pub log_file: PathBuf,
    pub outcomes: Vec<ProvisioningOutcome>,
    /// Groups without any `*.py` file.
    pub skipped: Vec<String>,
    /// Wrapper names claimed by more than one group.
    pub collisions: IndexMap<String, Vec<String>>,
    /// Environment directories removed because no group owns them.
    pub pruned: Vec<PathBuf>,
}

impl RunSummary {
    #[must_use]
    pub fn new(dry_run: bool, log_file: PathBuf) -> Self {
        Self {
            dry_run,
            log_file,
            ..Self::default()
        }
    }

    pub fn push(&mut self, outcome: ProvisioningOutcome) {
        self.outcomes.push(outcome);
    }

    #[must_use]
    pub fn failed_groups(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.is_failed())
            .map(|outcome| outcome.group.clone())
            .collect()
    }

    /// Fail-at-end: any failed group turns the whole run into an error.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::GroupsFailed`] naming every failed group.
    pub fn ensure_success(&self) -> Result<(), BootstrapError> {
        let groups = self.failed_groups();
        if groups.is_empty() {
            Ok(())
        } else {
            Err(BootstrapError::GroupsFailed { groups })
        }
    }

    fn groups_with(&self, action: EnvironmentAction) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.action == action)
            .map(|outcome| outcome.group.as_str())
            .collect()
    }

    /// Emit the end-of-run report through the log.
    pub fn log_report(&self) {
        info!("--- bootstrap summary ---");
        if self.dry_run {
            info!("dry-run mode active; no changes were made");
        }
        let processed: Vec<&str> = self.outcomes.iter().map(|o| o.group.as_str()).collect();
        info!(
            "processed groups ({}): {}",
            processed.len(),
            list_or_none(&processed)
        );
        for (label, action) in [
            ("new environments created", EnvironmentAction::Created),
            ("environments recreated", EnvironmentAction::Recreated),
            ("existing environments reused", EnvironmentAction::Reused),
        ] {
            let groups = self.groups_with(action);
            if !groups.is_empty() {
                info!("{label}: {}", groups.join(", "));
            }
        }
        if !self.skipped.is_empty() {
            info!("skipped groups without scripts: {}", self.skipped.join(", "));
        }
        if !self.pruned.is_empty() {
            info!(
                "stale environments removed: {}",
                self.pruned
                    .iter()
                    .map(|path| display_path(path))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        let installed: Vec<&str> = self
            .outcomes
            .iter()
            .filter(|o| o.installed)
            .map(|o| o.group.as_str())
            .collect();
        if !installed.is_empty() {
            info!("dependencies installed for: {}", installed.join(", "));
        }
        self.log_package_lines("suggested missing dependencies:", |o| &o.suggested);
        self.log_package_lines("appended missing dependencies for:", |o| &o.appended);

        let wrappers: Vec<String> = self
            .outcomes
            .iter()
            .flat_map(|o| o.wrappers.iter())
            .map(|path| display_path(path))
            .collect();
        if wrappers.is_empty() {
            info!("no wrappers generated");
        } else {
            info!("generated wrappers ({}):", wrappers.len());
            for wrapper in &wrappers {
                info!("  - {wrapper}");
            }
        }
        info!("log file located at: {}", self.log_file.display());
    }

    fn log_package_lines<F>(&self, heading: &str, select: F)
    where
        F: Fn(&ProvisioningOutcome) -> &BTreeSet<String>,
    {
        let lines: Vec<String> = self
            .outcomes
            .iter()
            .filter(|o| !select(o).is_empty())
            .map(|o| {
                let names: Vec<&str> = select(o).iter().map(String::as_str).collect();
                format!("{}: {}", o.group, names.join(", "))
            })
            .collect();
        if lines.is_empty() {
            return;
        }
        info!("{heading}");
        for line in lines {
            info!("  - {line}");
        }
    }
}

fn list_or_none(items: &[&str]) -> String {
    if items.is_empty() {
        "None".to_string()
    } else {
        items.join(", ")
    }
}

/// `~/...` for paths under the home directory.
#[must_use]
pub fn display_path(path: &Path) -> String {
    dirs_next::home_dir()
        .and_then(|home| path.strip_prefix(home).ok().map(Path::to_path_buf))
        .map_or_else(
            || path.display().to_string(),
            |rel| format!("~/{}", rel.display()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_failed_group_fails_the_run() {
        let mut summary = RunSummary::new(false, PathBuf::from("/tmp/log"));
        summary.push(ProvisioningOutcome::new("ok", EnvironmentAction::Created));
        assert!(summary.ensure_success().is_ok());

        let mut partial = ProvisioningOutcome::new("net", EnvironmentAction::Reused);
        partial.record_failure("dependency installation failed");
        summary.push(partial);
        summary.push(ProvisioningOutcome::failed("media", "environment creation failed"));

        match summary.ensure_success() {
            Err(BootstrapError::GroupsFailed { groups }) => {
                assert_eq!(groups, vec!["net".to_string(), "media".to_string()]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn summary_serializes_actions_in_snake_case() -> anyhow::Result<()> {
        let mut summary = RunSummary::new(true, PathBuf::from("/tmp/log"));
        let mut outcome = ProvisioningOutcome::new("media", EnvironmentAction::Recreated);
        outcome.suggested.insert("pillow".to_string());
        summary.push(outcome);
        let value = serde_json::to_value(&summary)?;
        assert_eq!(value["dry_run"], true);
        assert_eq!(value["outcomes"][0]["action"], "recreated");
        assert_eq!(value["outcomes"][0]["suggested"][0], "pillow");
        Ok(())
    }

    #[test]
    fn home_relative_display() {
        let Some(home) = dirs_next::home_dir() else {
            return;
        };
        assert_eq!(display_path(&home.join("bin").join("tool")), "~/bin/tool");
        let outside = Path::new("/toolwrap-outside-home/tool");
        if !outside.starts_with(&home) {
            assert_eq!(display_path(outside), "/toolwrap-outside-home/tool");
        }
    }
}
