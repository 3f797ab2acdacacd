use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use toolwrap_domain::{InterpreterLocator, StandardLibraryClassifier};
use toolwrap_python::{ExecutableProbe, SearchPath};
use tracing::{debug, warn};

use crate::process::{run_command, RunOutput};

pub trait CommandRunner {
    fn run(&self, program: &Path, args: &[String], cwd: &Path) -> Result<RunOutput>;
}

/// Everything a bootstrap run does to the host besides plain file I/O.
pub trait Effects {
    fn commands(&self) -> &dyn CommandRunner;
    fn executables(&self) -> &dyn ExecutableProbe;
    /// Classifier for import scanning, probing `python` when one is known.
    fn stdlib_classifier(&self, python: Option<&Path>) -> StandardLibraryClassifier;
}

pub struct SystemEffects {
    commands: Arc<SystemCommandRunner>,
    executables: Arc<SearchPath>,
}

impl SystemEffects {
    #[must_use]
    pub fn new() -> Self {
        Self {
            commands: Arc::new(SystemCommandRunner),
            executables: Arc::new(SearchPath),
        }
    }
}

impl Default for SystemEffects {
    fn default() -> Self {
        Self::new()
    }
}

impl Effects for SystemEffects {
    fn commands(&self) -> &dyn CommandRunner {
        self.commands.as_ref()
    }

    fn executables(&self) -> &dyn ExecutableProbe {
        self.executables.as_ref()
    }

    fn stdlib_classifier(&self, python: Option<&Path>) -> StandardLibraryClassifier {
        let Some(python) = python else {
            return StandardLibraryClassifier::registry_only();
        };
        match InterpreterLocator::probe(python) {
            Ok(locator) => {
                debug!(python = %python.display(), "stdlib origin heuristic enabled");
                StandardLibraryClassifier::with_locator(locator)
            }
            Err(err) => {
                warn!(
                    "could not probe {} for stdlib paths, using built-in registry only: {err:#}",
                    python.display()
                );
                StandardLibraryClassifier::registry_only()
            }
        }
    }
}

struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &Path, args: &[String], cwd: &Path) -> Result<RunOutput> {
        run_command(program, args, cwd)
    }
}

