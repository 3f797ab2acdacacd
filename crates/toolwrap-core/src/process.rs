use std::{
    io::Read,
    path::Path,
    process::{Command, Stdio},
    thread,
};

use anyhow::{Context, Result};

use crate::wrapper::shell_escape;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Execute a program and capture stdout/stderr in full.
///
/// # Errors
///
/// Returns an error when the program cannot be spawned or the I/O streams cannot
/// be read entirely.
pub fn run_command(program: &Path, args: &[String], cwd: &Path) -> Result<RunOutput> {
    let display = program.display().to_string();
    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to start {display}"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("stdout missing for {display}"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow::anyhow!("stderr missing for {display}"))?;
    // Drained on separate threads so a chatty stderr cannot block stdout.
    let stdout_handle = thread::spawn(move || read_lossy(stdout));
    let stderr_handle = thread::spawn(move || read_lossy(stderr));

    let status = child
        .wait()
        .with_context(|| format!("failed to wait for {display}"))?;
    let stdout = stdout_handle
        .join()
        .map_err(|_| anyhow::anyhow!("stdout thread panicked"))??;
    let stderr = stderr_handle
        .join()
        .map_err(|_| anyhow::anyhow!("stderr thread panicked"))??;
    Ok(RunOutput {
        code: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

fn read_lossy<R: Read>(mut reader: R) -> Result<String> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Shell-style rendering of a command line for logs.
#[must_use]
pub fn render_command(program: &Path, args: &[String]) -> String {
    std::iter::once(program.display().to_string())
        .chain(args.iter().cloned())
        .map(|part| {
            if !part.is_empty()
                && part
                    .chars()
                    .all(|ch| ch.is_ascii_alphanumeric() || "-_./=:@+,%".contains(ch))
            {
                part
            } else {
                shell_escape(&part)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
