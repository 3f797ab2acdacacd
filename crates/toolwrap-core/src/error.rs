use std::path::PathBuf;

/// Conditions that stop a bootstrap run.
///
/// Per-group problems are not errors: they are recorded on the group's
/// outcome and surface at the end as [`BootstrapError::GroupsFailed`].
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("source directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),
    #[error("path exists but is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
    #[error("failed to create directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to list groups in {}: {reason}", .path.display())]
    GroupScan { path: PathBuf, reason: String },
    #[error("no valid group folders found")]
    NoGroups,
    #[error(
        "environment at {} appears incomplete (missing python or pip) for group '{group}'",
        .root.display()
    )]
    IncompleteEnvironment { group: String, root: PathBuf },
    #[error("bootstrap completed with errors in: {}", .groups.join(", "))]
    GroupsFailed { groups: Vec<String> },
}
