use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};
use toolwrap_core::{BootstrapOptions, MissingAction};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Bootstrap per-group Python environments and launchers for a directory of scripts"
)]
#[allow(clippy::struct_excessive_bools)]
pub struct ToolwrapCli {
    #[arg(
        long,
        default_value = ".",
        help = "Root directory containing tool groups (subfolders)"
    )]
    pub source: PathBuf,
    #[arg(
        long,
        help = "Directory for generated wrappers, relative to --source [default: bin]"
    )]
    pub bin: Option<PathBuf>,
    #[arg(
        long,
        help = "Directory holding the environments, relative to --source [default: <bin>/.venv]"
    )]
    pub venv_root: Option<PathBuf>,
    #[arg(
        long,
        value_name = "VERSION",
        help = "Fallback Python version (e.g. 3.11) for groups without python_version.txt"
    )]
    pub python_version: Option<String>,
    #[arg(
        long,
        value_enum,
        default_value_t = MissingRequirements::None,
        help = "What to do with third-party imports missing from requirements.txt"
    )]
    pub missing_requirements: MissingRequirements,
    #[arg(long, help = "Remove and recreate all environments")]
    pub recreate_all: bool,
    #[arg(long, help = "Simulate actions without making changes")]
    pub dry_run: bool,
    #[arg(
        long,
        value_delimiter = ',',
        value_name = "GROUPS",
        help = "Comma-separated group folder names to process (default: all)"
    )]
    pub include_groups: Option<Vec<String>>,
    #[arg(short, long, action = ArgAction::Count, help = "Increase console logging (-vv reaches trace)")]
    pub verbose: u8,
    #[arg(long, help = "Print the run summary as JSON on stdout")]
    pub json: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingRequirements {
    None,
    Suggest,
    Append,
}

impl From<MissingRequirements> for MissingAction {
    fn from(value: MissingRequirements) -> Self {
        match value {
            MissingRequirements::None => Self::None,
            MissingRequirements::Suggest => Self::Suggest,
            MissingRequirements::Append => Self::Append,
        }
    }
}

impl ToolwrapCli {
    pub fn options(&self) -> BootstrapOptions {
        BootstrapOptions {
            source: self.source.clone(),
            bin: self.bin.clone(),
            venv_root: self.venv_root.clone(),
            python_version: self.python_version.clone(),
            missing: self.missing_requirements.into(),
            recreate_all: self.recreate_all,
            dry_run: self.dry_run,
            include_groups: self.include_groups.clone(),
        }
    }
}
