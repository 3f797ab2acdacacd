use std::path::{Path, PathBuf};

/// Where a virtual environment keeps its executables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvLayout {
    pub scripts_dir: &'static str,
    pub python: &'static str,
    pub pip: &'static str,
}

impl EnvLayout {
    pub const UNIX: Self = Self {
        scripts_dir: "bin",
        python: "python",
        pip: "pip",
    };

    pub const WINDOWS: Self = Self {
        scripts_dir: "Scripts",
        python: "python.exe",
        pip: "pip.exe",
    };

    #[must_use]
    pub fn host() -> Self {
        if cfg!(windows) {
            Self::WINDOWS
        } else {
            Self::UNIX
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentState {
    NotEvaluated,
    EnvironmentAbsent,
    EnvironmentPresentIncomplete,
    EnvironmentPresentComplete,
    Failed,
}

/// On-disk view of one group's environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentRecord {
    pub root: PathBuf,
    pub exists: bool,
    /// Interpreter and installer are both present.
    pub complete: bool,
    layout: EnvLayout,
}

impl EnvironmentRecord {
    #[must_use]
    pub fn inspect(root: &Path) -> Self {
        Self::inspect_with(root, EnvLayout::host())
    }

    #[must_use]
    pub fn inspect_with(root: &Path, layout: EnvLayout) -> Self {
        let mut record = Self {
            root: root.to_path_buf(),
            exists: false,
            complete: false,
            layout,
        };
        record.exists = root.is_dir();
        record.complete = record.exists && record.python().is_file() && record.pip().is_file();
        record
    }

    #[must_use]
    pub fn state(&self) -> EnvironmentState {
        match (self.exists, self.complete) {
            (false, _) => EnvironmentState::EnvironmentAbsent,
            (true, false) => EnvironmentState::EnvironmentPresentIncomplete,
            (true, true) => EnvironmentState::EnvironmentPresentComplete,
        }
    }

    #[must_use]
    pub fn scripts_dir(&self) -> PathBuf {
        self.root.join(self.layout.scripts_dir)
    }

    #[must_use]
    pub fn python(&self) -> PathBuf {
        self.scripts_dir().join(self.layout.python)
    }

    #[must_use]
    pub fn pip(&self) -> PathBuf {
        self.scripts_dir().join(self.layout.pip)
    }

    #[must_use]
    pub fn activate_script(&self) -> PathBuf {
        self.root.join(self.activate_relative())
    }

    /// Activation script relative to the environment root.
    #[must_use]
    pub fn activate_relative(&self) -> PathBuf {
        Path::new(self.layout.scripts_dir).join("activate")
    }
}
