use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use toolwrap_domain::{detect_wrapper_collisions, discover_groups, select_groups};
use toolwrap_python::{
    detect_default_interpreter_with, find_python_executable_with, InterpreterRequest,
    ResolvedInterpreter,
};
use tracing::{debug, error, info, warn};

use crate::config::BootstrapConfig;
use crate::effects::Effects;
use crate::error::BootstrapError;
use crate::provision::{provision_group, ProvisionContext, ProvisionedGroup};
use crate::summary::{EnvironmentAction, RunSummary};
use crate::wrapper::WrapperWriter;

/// Provision every selected group under `config.source_root`.
///
/// Group failures are collected in the returned summary; call
/// [`RunSummary::ensure_success`] to turn them into an error.
///
/// # Errors
///
/// Returns an error for a missing source, unusable output directories, an
/// empty group selection, or an incomplete environment.
pub fn run_bootstrap(
    config: &BootstrapConfig,
    effects: &dyn Effects,
) -> Result<RunSummary, BootstrapError> {
    info!("--- starting bootstrap ---");
    info!(
        "source: {}, bin: {}, environment root: {}",
        config.source_root.display(),
        config.bin_dir.display(),
        config.venv_root.display()
    );
    info!("missing requirements action: {}", config.missing);
    info!(
        "recreate all: {}, dry run: {}",
        config.recreate_all, config.dry_run
    );

    if !config.source_root.is_dir() {
        let err = BootstrapError::SourceNotFound(config.source_root.clone());
        error!("{err}");
        return Err(err);
    }
    for dir in [&config.bin_dir, &config.venv_root] {
        ensure_dir(dir, config.dry_run).inspect_err(|err| error!("{err}"))?;
    }

    let exclude = [config.bin_dir.clone(), config.venv_root.clone()];
    let discovered = discover_groups(&config.source_root, &exclude).map_err(|err| {
        BootstrapError::GroupScan {
            path: config.source_root.clone(),
            reason: format!("{err:#}"),
        }
    })?;
    let known: HashSet<String> = discovered.iter().map(|group| group.name.clone()).collect();
    let groups = select_groups(
        discovered,
        config.include_groups.as_deref(),
        &config.source_root,
    );
    if groups.is_empty() {
        error!("{}", BootstrapError::NoGroups);
        return Err(BootstrapError::NoGroups);
    }

    let collisions = detect_wrapper_collisions(&groups);
    if !collisions.is_empty() {
        let names: Vec<&str> = collisions.keys().map(String::as_str).collect();
        warn!(
            "duplicate wrapper names detected: {}; these wrappers will not be generated for any group, rename the conflicting scripts",
            names.join(", ")
        );
        for (name, owners) in &collisions {
            warn!("wrapper '{name}' is provided by groups: {}", owners.join(", "));
        }
    }

    let fallback = resolve_fallback(config, effects);
    let classifier = config
        .missing
        .scans_imports()
        .then(|| effects.stdlib_classifier(fallback.as_ref().map(|f| f.path.as_path())));

    let mut summary = RunSummary::new(config.dry_run, config.log_file());
    summary.collisions.clone_from(&collisions);
    if config.recreate_all && config.include_groups.is_none() {
        summary.pruned = prune_stale_environments(config, &known);
    }

    let ctx = ProvisionContext {
        config,
        effects,
        classifier: classifier.as_ref(),
        fallback: fallback.as_ref(),
    };
    let mut wrappers = WrapperWriter::new(&config.bin_dir, config.dry_run, &collisions);
    for group in &groups {
        info!("--- processing group: {} ---", group.name);
        if group.scripts.is_empty() {
            warn!(
                "no python files found in {}; skipping group",
                group.dir.display()
            );
            summary.skipped.push(group.name.clone());
            continue;
        }
        let ProvisionedGroup {
            mut outcome,
            environment,
        } = provision_group(&ctx, group)?;
        if outcome.action != EnvironmentAction::Failed {
            wrappers.generate(group, &environment, &mut outcome);
        }
        info!("--- finished processing group: {} ---", group.name);
        summary.push(outcome);
    }
    Ok(summary)
}

fn ensure_dir(path: &Path, dry_run: bool) -> Result<(), BootstrapError> {
    if path.is_dir() {
        return Ok(());
    }
    if path.exists() {
        return Err(BootstrapError::NotADirectory(path.to_path_buf()));
    }
    if dry_run {
        info!("would create directory {}", path.display());
        return Ok(());
    }
    debug!("creating directory {}", path.display());
    fs::create_dir_all(path).map_err(|source| BootstrapError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

/// The `--python-version` interpreter, else the default one.
fn resolve_fallback(config: &BootstrapConfig, effects: &dyn Effects) -> Option<ResolvedInterpreter> {
    if let Some(version) = &config.fallback_version {
        if let Some(path) = find_python_executable_with(effects.executables(), Some(version)) {
            info!("using fallback python {version} ({})", path.display());
            return Some(ResolvedInterpreter::new(
                path,
                InterpreterRequest::Fallback(version.clone()),
            ));
        }
        warn!("fallback python '{version}' not found; using the default interpreter");
    }
    let explicit = config
        .python_override
        .as_deref()
        .map(|path| path.to_string_lossy().into_owned());
    match detect_default_interpreter_with(effects.executables(), explicit.as_deref()) {
        Ok(path) => {
            info!("using default python: {}", path.display());
            Some(ResolvedInterpreter::new(path, InterpreterRequest::Default))
        }
        Err(err) => {
            warn!("{err:#}");
            None
        }
    }
}

/// Remove environment directories that belong to no discovered group.
fn prune_stale_environments(config: &BootstrapConfig, known: &HashSet<String>) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(&config.venv_root) else {
        return Vec::new();
    };
    let mut stale: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter(|path| {
            path.file_name()
                .is_some_and(|name| !known.contains(name.to_string_lossy().as_ref()))
        })
        .collect();
    stale.sort();

    let mut pruned = Vec::new();
    for path in stale {
        info!("recreate-all: removing stale environment {}", path.display());
        if config.dry_run {
            info!("would remove {}", path.display());
        } else if let Err(err) = fs::remove_dir_all(&path) {
            warn!("failed to remove stale environment {}: {err}", path.display());
            continue;
        }
        pruned.push(path);
    }
    pruned
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    use anyhow::Result;
    use tempfile::{tempdir, TempDir};
    use toolwrap_domain::requirements::APPEND_MARKER;
    use toolwrap_domain::StandardLibraryClassifier;
    use toolwrap_python::ExecutableProbe;

    use crate::config::{BootstrapOptions, EnvSnapshot, MissingAction};
    use crate::effects::CommandRunner;
    use crate::process::RunOutput;

    #[derive(Default)]
    struct FakeEffects {
        executables: HashMap<String, PathBuf>,
        runs: RefCell<Vec<(PathBuf, Vec<String>)>>,
        /// `pip install -r` fails for requirement files under this group.
        failing_group: Option<String>,
    }

    impl FakeEffects {
        fn with_pythons(names: &[(&str, &str)]) -> Self {
            Self {
                executables: names
                    .iter()
                    .map(|(name, path)| ((*name).to_string(), PathBuf::from(path)))
                    .collect(),
                ..Self::default()
            }
        }

        fn runs(&self) -> Vec<(PathBuf, Vec<String>)> {
            self.runs.borrow().clone()
        }

        fn venv_runs(&self) -> usize {
            self.runs()
                .iter()
                .filter(|(_, args)| args.first().map(String::as_str) == Some("-m"))
                .count()
        }
    }

    impl ExecutableProbe for FakeEffects {
        fn which(&self, name: &str) -> Option<PathBuf> {
            self.executables.get(name).cloned()
        }

        fn query_launcher(&self, _launcher: &Path, _version: &str) -> Option<PathBuf> {
            None
        }
    }

    impl CommandRunner for FakeEffects {
        fn run(&self, program: &Path, args: &[String], _cwd: &Path) -> Result<RunOutput> {
            self.runs
                .borrow_mut()
                .push((program.to_path_buf(), args.to_vec()));
            if args.first().map(String::as_str) == Some("-m") {
                let bin = PathBuf::from(&args[2]).join("bin");
                fs::create_dir_all(&bin)?;
                fs::write(bin.join("python"), "")?;
                fs::write(bin.join("pip"), "")?;
                fs::write(bin.join("activate"), "")?;
            }
            if let (Some(group), Some(target)) = (&self.failing_group, args.get(2)) {
                if args[1] == "-r" && requirements_of(Path::new(target), group) {
                    return Ok(RunOutput {
                        code: 1,
                        stdout: String::new(),
                        stderr: "ERROR: No matching distribution found".to_string(),
                    });
                }
            }
            Ok(RunOutput::default())
        }
    }

    fn requirements_of(path: &Path, group: &str) -> bool {
        path.parent()
            .and_then(Path::file_name)
            .is_some_and(|name| name == group)
    }

    impl Effects for FakeEffects {
        fn commands(&self) -> &dyn CommandRunner {
            self
        }

        fn executables(&self) -> &dyn ExecutableProbe {
            self
        }

        fn stdlib_classifier(&self, _python: Option<&Path>) -> StandardLibraryClassifier {
            StandardLibraryClassifier::registry_only()
        }
    }

    struct Workspace {
        _tmp: TempDir,
        source: PathBuf,
    }

    impl Workspace {
        fn new() -> Result<Self> {
            let tmp = tempdir()?;
            let source = fs::canonicalize(tmp.path())?.join("tools");
            fs::create_dir_all(&source)?;
            Ok(Self { _tmp: tmp, source })
        }

        fn group(&self, name: &str, files: &[(&str, &str)]) -> Result<PathBuf> {
            let dir = self.source.join(name);
            fs::create_dir_all(&dir)?;
            for (file, contents) in files {
                fs::write(dir.join(file), contents)?;
            }
            Ok(dir)
        }

        fn config(&self, options: BootstrapOptions) -> BootstrapConfig {
            BootstrapConfig::from_options(
                BootstrapOptions {
                    source: self.source.clone(),
                    ..options
                },
                &EnvSnapshot::testing(&[]),
                &self.source,
            )
        }
    }

    fn pythons() -> FakeEffects {
        FakeEffects::with_pythons(&[
            ("python3", "/fake/bin/python3"),
            ("python3.11", "/fake/bin/python3.11"),
        ])
    }

    #[test]
    fn first_run_creates_and_second_run_reuses() -> Result<()> {
        let ws = Workspace::new()?;
        ws.group(
            "media",
            &[("resize.py", "import PIL\n"), ("requirements.txt", "pillow\n")],
        )?;
        let config = ws.config(BootstrapOptions::default());
        let effects = pythons();

        let first = run_bootstrap(&config, &effects)?;
        first.ensure_success()?;
        assert_eq!(first.outcomes.len(), 1);
        let outcome = &first.outcomes[0];
        assert_eq!(outcome.action, EnvironmentAction::Created);
        assert_eq!(outcome.interpreter, Some(PathBuf::from("/fake/bin/python3")));
        assert!(outcome.installed);
        let wrapper = config.bin_dir.join("resize");
        assert_eq!(outcome.wrappers, vec![wrapper.clone()]);
        assert!(wrapper.is_file());

        let env_root = config.env_dir("media");
        let runs = effects.runs();
        assert_eq!(runs.len(), 3);
        assert_eq!(
            runs[0].1,
            vec!["-m".to_string(), "venv".to_string(), env_root.display().to_string()]
        );
        assert_eq!(runs[1].0, env_root.join("bin").join("pip"));
        assert_eq!(runs[1].1, ["install", "--upgrade", "pip"].map(String::from));
        assert_eq!(runs[2].1[..2], ["install".to_string(), "-r".to_string()]);

        let second = run_bootstrap(&config, &effects)?;
        second.ensure_success()?;
        assert_eq!(second.outcomes[0].action, EnvironmentAction::Reused);
        assert_eq!(effects.venv_runs(), 1);
        assert_eq!(effects.runs().len(), 5);
        Ok(())
    }

    #[test]
    fn dry_run_touches_nothing() -> Result<()> {
        let ws = Workspace::new()?;
        let dir = ws.group(
            "net",
            &[
                ("fetch.py", "import requests\nimport json\n"),
                ("requirements.txt", "rich\n"),
            ],
        )?;
        let config = ws.config(BootstrapOptions {
            dry_run: true,
            missing: MissingAction::Append,
            ..BootstrapOptions::default()
        });
        let effects = pythons();

        let summary = run_bootstrap(&config, &effects)?;
        summary.ensure_success()?;
        assert!(summary.dry_run);
        assert!(effects.runs().is_empty());
        assert!(!config.bin_dir.exists());
        assert!(!config.venv_root.exists());
        assert_eq!(fs::read_to_string(dir.join("requirements.txt"))?, "rich\n");
        let outcome = &summary.outcomes[0];
        assert_eq!(outcome.action, EnvironmentAction::Created);
        assert!(outcome.appended.is_empty());
        assert_eq!(outcome.wrappers, vec![config.bin_dir.join("fetch")]);
        Ok(())
    }

    #[test]
    fn unresolvable_pin_falls_back() -> Result<()> {
        let ws = Workspace::new()?;
        ws.group(
            "legacy",
            &[("old.py", "print('x')\n"), ("python_version.txt", "2.7\n")],
        )?;
        let config = ws.config(BootstrapOptions {
            python_version: Some("3.11".to_string()),
            ..BootstrapOptions::default()
        });
        let effects = pythons();
        let summary = run_bootstrap(&config, &effects)?;
        assert_eq!(
            summary.outcomes[0].interpreter,
            Some(PathBuf::from("/fake/bin/python3.11"))
        );
        assert_eq!(effects.runs()[0].0, PathBuf::from("/fake/bin/python3.11"));
        Ok(())
    }

    #[test]
    fn resolvable_pin_wins_over_fallback() -> Result<()> {
        let ws = Workspace::new()?;
        ws.group(
            "pinned",
            &[("tool.py", ""), ("python_version.txt", "3.11")],
        )?;
        let config = ws.config(BootstrapOptions::default());
        let effects = pythons();
        let summary = run_bootstrap(&config, &effects)?;
        assert_eq!(
            summary.outcomes[0].interpreter,
            Some(PathBuf::from("/fake/bin/python3.11"))
        );
        Ok(())
    }

    #[test]
    fn incomplete_environment_aborts_the_run() -> Result<()> {
        let ws = Workspace::new()?;
        ws.group("media", &[("resize.py", "")])?;
        let config = ws.config(BootstrapOptions::default());
        fs::create_dir_all(config.env_dir("media"))?;
        let err = run_bootstrap(&config, &pythons())
            .err()
            .ok_or_else(|| anyhow::anyhow!("expected failure"))?;
        assert!(matches!(err, BootstrapError::IncompleteEnvironment { ref group, .. } if group == "media"));
        Ok(())
    }

    #[test]
    fn installer_failure_marks_group_and_continues() -> Result<()> {
        let ws = Workspace::new()?;
        ws.group("a", &[("alpha.py", ""), ("requirements.txt", "nonexistent-pkg\n")])?;
        ws.group("b", &[("beta.py", ""), ("requirements.txt", "rich\n")])?;
        let config = ws.config(BootstrapOptions::default());
        let effects = FakeEffects {
            failing_group: Some("a".to_string()),
            ..pythons()
        };
        let summary = run_bootstrap(&config, &effects)?;
        assert_eq!(summary.failed_groups(), vec!["a".to_string()]);
        let b = &summary.outcomes[1];
        assert!(b.installed);
        assert!(config.bin_dir.join("beta").is_file());
        assert!(config.bin_dir.join("alpha").is_file());
        assert!(matches!(
            summary.ensure_success(),
            Err(BootstrapError::GroupsFailed { .. })
        ));
        Ok(())
    }

    #[test]
    fn suggest_records_and_append_writes() -> Result<()> {
        let ws = Workspace::new()?;
        let dir = ws.group(
            "img",
            &[
                ("thumb.py", "import yaml\nfrom PIL import Image\nimport os\n"),
                ("requirements.txt", "pyyaml\n"),
            ],
        )?;

        let suggest = ws.config(BootstrapOptions {
            missing: MissingAction::Suggest,
            ..BootstrapOptions::default()
        });
        let effects = pythons();
        let summary = run_bootstrap(&suggest, &effects)?;
        assert_eq!(
            summary.outcomes[0].suggested.iter().collect::<Vec<_>>(),
            ["pillow"]
        );
        assert_eq!(fs::read_to_string(dir.join("requirements.txt"))?, "pyyaml\n");

        let rerun = run_bootstrap(&suggest, &effects)?;
        assert_eq!(rerun.outcomes[0].action, EnvironmentAction::Reused);
        assert_eq!(rerun.outcomes[0].suggested, summary.outcomes[0].suggested);
        assert_eq!(fs::read_to_string(dir.join("requirements.txt"))?, "pyyaml\n");

        let append = ws.config(BootstrapOptions {
            missing: MissingAction::Append,
            ..BootstrapOptions::default()
        });
        let summary = run_bootstrap(&append, &pythons())?;
        assert_eq!(
            summary.outcomes[0].appended.iter().collect::<Vec<_>>(),
            ["pillow"]
        );
        let written = fs::read_to_string(dir.join("requirements.txt"))?;
        assert!(written.contains(APPEND_MARKER));
        assert!(written.trim_end().ends_with("pillow"));

        let again = run_bootstrap(&append, &pythons())?;
        assert!(again.outcomes[0].appended.is_empty());
        Ok(())
    }

    #[test]
    fn colliding_wrappers_are_skipped_everywhere() -> Result<()> {
        let ws = Workspace::new()?;
        ws.group("g1", &[("dup.py", ""), ("one.py", "")])?;
        ws.group("g2", &[("dup.py", "")])?;
        let config = ws.config(BootstrapOptions::default());
        let summary = run_bootstrap(&config, &pythons())?;
        assert_eq!(
            summary.collisions.get("dup"),
            Some(&vec!["g1".to_string(), "g2".to_string()])
        );
        assert!(!config.bin_dir.join("dup").exists());
        assert!(config.bin_dir.join("one").is_file());
        Ok(())
    }

    #[test]
    fn recreate_all_prunes_stale_environments() -> Result<()> {
        let ws = Workspace::new()?;
        ws.group("g1", &[("script.py", "")])?;
        let config = ws.config(BootstrapOptions {
            recreate_all: true,
            ..BootstrapOptions::default()
        });
        let stale = config.venv_root.join("old");
        fs::create_dir_all(&stale)?;
        let effects = pythons();
        run_bootstrap(&config, &effects)?.ensure_success()?;
        let summary = run_bootstrap(&config, &effects)?;
        assert!(!stale.exists());
        assert_eq!(summary.outcomes[0].action, EnvironmentAction::Recreated);
        assert_eq!(effects.venv_runs(), 2);
        Ok(())
    }

    #[test]
    fn recreate_all_with_allow_list_leaves_other_environments() -> Result<()> {
        let ws = Workspace::new()?;
        ws.group("g1", &[("s1.py", "")])?;
        ws.group("g2", &[("s2.py", "")])?;
        let config = ws.config(BootstrapOptions {
            recreate_all: true,
            include_groups: Some(vec!["g1".to_string()]),
            ..BootstrapOptions::default()
        });
        for name in ["g1", "g2", "untouched"] {
            fs::create_dir_all(config.env_dir(name))?;
        }
        let summary = run_bootstrap(&config, &pythons())?;
        assert_eq!(summary.outcomes.len(), 1);
        assert_eq!(summary.outcomes[0].action, EnvironmentAction::Recreated);
        assert!(config.env_dir("g1").join("bin").join("pip").is_file());
        assert!(config.env_dir("g2").is_dir());
        assert!(config.env_dir("untouched").is_dir());
        Ok(())
    }

    #[test]
    fn missing_source_and_empty_selection_are_fatal() -> Result<()> {
        let ws = Workspace::new()?;
        let missing = BootstrapConfig::from_options(
            BootstrapOptions {
                source: ws.source.join("nope"),
                ..BootstrapOptions::default()
            },
            &EnvSnapshot::testing(&[]),
            &ws.source,
        );
        assert!(matches!(
            run_bootstrap(&missing, &pythons()),
            Err(BootstrapError::SourceNotFound(_))
        ));

        let empty = ws.config(BootstrapOptions::default());
        assert!(matches!(
            run_bootstrap(&empty, &pythons()),
            Err(BootstrapError::NoGroups)
        ));
        Ok(())
    }

    #[test]
    fn groups_without_scripts_are_skipped() -> Result<()> {
        let ws = Workspace::new()?;
        ws.group("docs", &[("README.md", "")])?;
        ws.group("cli", &[("main.py", "")])?;
        let summary = run_bootstrap(&ws.config(BootstrapOptions::default()), &pythons())?;
        assert_eq!(summary.skipped, vec!["docs".to_string()]);
        assert_eq!(summary.outcomes.len(), 1);
        Ok(())
    }
}
