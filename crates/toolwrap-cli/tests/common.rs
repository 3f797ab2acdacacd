#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A scratch source tree: `<tmp>/tools/<group>/*`.
pub fn prepare_source(prefix: &str) -> (TempDir, PathBuf) {
    let temp = tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .expect("tempdir");
    let root = fs::canonicalize(temp.path()).expect("canonical tempdir");
    let source = root.join("tools");
    fs::create_dir_all(&source).expect("create source");
    (temp, source)
}

pub fn write_group(source: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
    let dir = source.join(name);
    fs::create_dir_all(&dir).expect("create group");
    for (file, contents) in files {
        fs::write(dir.join(file), contents).expect("write group file");
    }
    dir
}

/// A stand-in interpreter whose `-m venv DIR` lays out `DIR/bin` with a
/// `pip` that exits with `pip_exit`.
#[cfg(unix)]
pub fn fake_python(dir: &Path, pip_exit: i32) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    fs::create_dir_all(dir).expect("create fake python dir");
    let python = dir.join("python3");
    let script = format!(
        r#"#!/bin/sh
if [ "$1" = "-m" ] && [ "$2" = "venv" ]; then
    mkdir -p "$3/bin"
    printf '#!/bin/sh\nexit {pip_exit}\n' > "$3/bin/pip"
    chmod 755 "$3/bin/pip"
    cp "$0" "$3/bin/python"
    : > "$3/bin/activate"
    exit 0
fi
exit 0
"#
    );
    fs::write(&python, script).expect("write fake python");
    fs::set_permissions(&python, fs::Permissions::from_mode(0o755)).expect("chmod fake python");
    python
}

pub fn parse_json(stdout: &[u8]) -> serde_json::Value {
    serde_json::from_slice(stdout).expect("json output")
}
