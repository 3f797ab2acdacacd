//! Standard-library classification for import roots.
//!
//! Classification runs a chain of strategies. The two embedded registries are
//! authoritative and only ever answer "yes"; anything they do not know about
//! falls through to the optional [`OriginHeuristic`], which asks a real
//! interpreter where the module lives. The heuristic treats any resolved
//! origin outside `site-packages`/`dist-packages` as standard library, so it
//! can misclassify vendored code or namespace packages. It is a last resort.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

/// Modules compiled into the interpreter (`sys.builtin_module_names`).
const BUILTIN_MODULES: &[&str] = &[
    "_abc", "_ast", "_codecs", "_collections", "_functools", "_imp", "_io", "_locale",
    "_operator", "_signal", "_sre", "_stat", "_string", "_symtable", "_thread", "_tokenize",
    "_tracemalloc", "_typing", "_warnings", "_weakref", "atexit", "builtins", "errno",
    "faulthandler", "gc", "itertools", "marshal", "posix", "pwd", "sys", "time", "xxsubtype",
];

/// Top-level names shipped with CPython (`sys.stdlib_module_names`), kept as a
/// union across the 3.x releases so pins to older interpreters classify the
/// same way.
const STDLIB_MODULES: &[&str] = &[
    "__future__", "_aix_support", "_asyncio", "_bisect", "_blake2", "_bz2", "_codecs_cn",
    "_codecs_hk", "_codecs_iso2022", "_codecs_jp", "_codecs_kr", "_codecs_tw",
    "_collections_abc", "_compat_pickle", "_compression", "_contextvars", "_crypt", "_csv",
    "_ctypes", "_curses", "_curses_panel", "_datetime", "_dbm", "_decimal", "_elementtree",
    "_frozen_importlib", "_frozen_importlib_external", "_gdbm", "_hashlib", "_heapq", "_json",
    "_lsprof", "_lzma", "_markupbase", "_md5", "_msi", "_multibytecodec", "_multiprocessing",
    "_opcode", "_osx_support", "_overlapped", "_pickle", "_posixshmem", "_posixsubprocess",
    "_py_abc", "_pydatetime", "_pydecimal", "_pyio", "_pylong", "_queue", "_random",
    "_scproxy", "_sha1", "_sha2", "_sha256", "_sha3", "_sha512", "_sitebuiltins", "_socket",
    "_sqlite3", "_ssl", "_statistics", "_strptime", "_struct", "_threading_local", "_tkinter",
    "_uuid", "_weakrefset", "_winapi", "_wmi", "_zoneinfo", "abc", "aifc", "antigravity",
    "argparse", "array", "ast", "asynchat", "asyncio", "asyncore", "audioop", "base64", "bdb",
    "binascii", "binhex", "bisect", "bz2", "cProfile", "calendar", "cgi", "cgitb", "chunk",
    "cmath", "cmd", "code", "codecs", "codeop", "collections", "colorsys", "compileall",
    "concurrent", "configparser", "contextlib", "contextvars", "copy", "copyreg", "crypt",
    "csv", "ctypes", "curses", "dataclasses", "datetime", "dbm", "decimal", "difflib", "dis",
    "distutils", "doctest", "email", "encodings", "ensurepip", "enum", "fcntl", "filecmp",
    "fileinput", "fnmatch", "formatter", "fractions", "ftplib", "functools", "genericpath",
    "getopt", "getpass", "gettext", "glob", "graphlib", "grp", "gzip", "hashlib", "heapq",
    "hmac", "html", "http", "idlelib", "imaplib", "imghdr", "imp", "importlib", "inspect", "io",
    "ipaddress", "json", "keyword", "lib2to3", "linecache", "locale", "logging", "lzma",
    "mailbox", "mailcap", "math", "mimetypes", "mmap", "modulefinder", "msilib", "msvcrt",
    "multiprocessing", "netrc", "nis", "nntplib", "nt", "ntpath", "nturl2path", "numbers",
    "opcode", "operator", "optparse", "os", "ossaudiodev", "parser", "pathlib", "pdb", "pickle",
    "pickletools", "pipes", "pkgutil", "platform", "plistlib", "poplib", "posixpath", "pprint",
    "profile", "pstats", "pty", "py_compile", "pyclbr", "pydoc", "pydoc_data", "pyexpat",
    "queue", "quopri", "random", "re", "readline", "reprlib", "resource", "rlcompleter",
    "runpy", "sched", "secrets", "select", "selectors", "shelve", "shlex", "shutil", "signal",
    "site", "smtpd", "smtplib", "sndhdr", "socket", "socketserver", "spwd", "sqlite3",
    "sre_compile", "sre_constants", "sre_parse", "ssl", "stat", "statistics", "string",
    "stringprep", "struct", "subprocess", "sunau", "symbol", "symtable", "sysconfig", "syslog",
    "tabnanny", "tarfile", "telnetlib", "tempfile", "termios", "textwrap", "this", "threading",
    "timeit", "tkinter", "token", "tokenize", "tomllib", "trace", "traceback", "tracemalloc",
    "tty", "turtle", "turtledemo", "types", "typing", "unicodedata", "unittest", "urllib", "uu",
    "uuid", "venv", "warnings", "wave", "weakref", "webbrowser", "winreg", "winsound",
    "wsgiref", "xdrlib", "xml", "xmlrpc", "xxlimited", "xxlimited_35", "zipapp", "zipfile",
    "zipimport", "zlib", "zoneinfo",
];

const THIRD_PARTY_MARKERS: &[&str] = &["site-packages", "dist-packages"];

/// One step in the classification chain. `None` defers to the next strategy.
pub trait StdlibStrategy {
    fn lookup(&self, module: &str) -> Option<bool>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinRegistry;

impl StdlibStrategy for BuiltinRegistry {
    fn lookup(&self, module: &str) -> Option<bool> {
        BUILTIN_MODULES.contains(&module).then_some(true)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DistributionRegistry;

impl StdlibStrategy for DistributionRegistry {
    fn lookup(&self, module: &str) -> Option<bool> {
        STDLIB_MODULES.contains(&module).then_some(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleOrigin {
    BuiltIn,
    Frozen,
    File(PathBuf),
}

/// Finds where an interpreter would import a module from.
pub trait ModuleLocator {
    /// `Ok(None)` means the module cannot be found at all.
    fn locate(&self, module: &str) -> Result<Option<ModuleOrigin>>;

    /// Directories the interpreter reports as its standard library.
    fn stdlib_dirs(&self) -> &[PathBuf];
}

/// Classifies by module origin. See the module docs for its limits.
pub struct OriginHeuristic<L> {
    locator: L,
    memo: RefCell<HashMap<String, bool>>,
}

impl<L: ModuleLocator> OriginHeuristic<L> {
    pub fn new(locator: L) -> Self {
        Self {
            locator,
            memo: RefCell::new(HashMap::new()),
        }
    }

    fn classify(&self, module: &str) -> bool {
        match self.locator.locate(module) {
            Ok(None) => false,
            Ok(Some(ModuleOrigin::BuiltIn | ModuleOrigin::Frozen)) => true,
            Ok(Some(ModuleOrigin::File(origin))) => {
                // site-packages sits inside the stdlib dir on POSIX layouts.
                let lowered = origin.to_string_lossy().to_ascii_lowercase();
                if THIRD_PARTY_MARKERS
                    .iter()
                    .any(|marker| lowered.contains(marker))
                {
                    return false;
                }
                if self
                    .locator
                    .stdlib_dirs()
                    .iter()
                    .any(|dir| origin.starts_with(dir))
                {
                    return true;
                }
                debug!(
                    module,
                    origin = %origin.display(),
                    "origin outside site/dist-packages; assuming stdlib"
                );
                true
            }
            Err(err) => {
                warn!("could not determine whether '{module}' is stdlib: {err:#}; assuming non-stdlib");
                false
            }
        }
    }
}

impl<L: ModuleLocator> StdlibStrategy for OriginHeuristic<L> {
    fn lookup(&self, module: &str) -> Option<bool> {
        if let Some(known) = self.memo.borrow().get(module) {
            return Some(*known);
        }
        let verdict = self.classify(module);
        self.memo.borrow_mut().insert(module.to_string(), verdict);
        Some(verdict)
    }
}

pub struct StandardLibraryClassifier {
    strategies: Vec<Box<dyn StdlibStrategy>>,
}

impl StandardLibraryClassifier {
    /// Registries only; unknown names are third-party.
    #[must_use]
    pub fn registry_only() -> Self {
        let mut strategies: Vec<Box<dyn StdlibStrategy>> = Vec::with_capacity(3);
        strategies.push(Box::new(BuiltinRegistry));
        strategies.push(Box::new(DistributionRegistry));
        Self { strategies }
    }

    /// Registries followed by the origin heuristic backed by `locator`.
    #[must_use]
    pub fn with_locator<L: ModuleLocator + 'static>(locator: L) -> Self {
        let mut classifier = Self::registry_only();
        classifier
            .strategies
            .push(Box::new(OriginHeuristic::new(locator)));
        classifier
    }

    #[must_use]
    pub fn is_standard_library(&self, name: &str) -> bool {
        let root = name.split('.').next().unwrap_or(name).trim();
        if root.is_empty() {
            return false;
        }
        self.strategies
            .iter()
            .find_map(|strategy| strategy.lookup(root))
            .unwrap_or(false)
    }
}

impl Default for StandardLibraryClassifier {
    fn default() -> Self {
        Self::registry_only()
    }
}

const PATHS_SCRIPT: &str = r#"import json, os, sysconfig
paths = [sysconfig.get_path("stdlib"), sysconfig.get_path("platstdlib")]
print(json.dumps(sorted({os.path.realpath(p) for p in paths if p})))
"#;

const FIND_SPEC_SCRIPT: &str = r#"import importlib.util, os, sys
try:
    spec = importlib.util.find_spec(sys.argv[1])
except ModuleNotFoundError:
    spec = None
if spec is None or spec.origin is None:
    print("")
elif spec.origin in ("built-in", "frozen"):
    print(spec.origin)
else:
    print(os.path.realpath(spec.origin))
"#;

/// Locates modules by asking a Python interpreter. Every call is a read-only probe.
#[derive(Debug, Clone)]
pub struct InterpreterLocator {
    python: PathBuf,
    stdlib_dirs: Vec<PathBuf>,
}

impl InterpreterLocator {
    /// Probe `python` for its standard-library directories.
    ///
    /// # Errors
    ///
    /// Returns an error when the interpreter cannot be run or reports garbage.
    pub fn probe(python: &Path) -> Result<Self> {
        let output = Command::new(python)
            .args(["-c", PATHS_SCRIPT])
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to probe stdlib paths via {}", python.display()))?;
        if !output.status.success() {
            bail!(
                "stdlib path probe failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        let stdlib_dirs: Vec<PathBuf> =
            serde_json::from_slice::<StdlibPaths>(&output.stdout)
                .context("invalid stdlib path payload")?
                .0;
        Ok(Self {
            python: python.to_path_buf(),
            stdlib_dirs,
        })
    }
}

#[derive(Deserialize)]
struct StdlibPaths(Vec<PathBuf>);

impl ModuleLocator for InterpreterLocator {
    fn locate(&self, module: &str) -> Result<Option<ModuleOrigin>> {
        let output = Command::new(&self.python)
            .args(["-c", FIND_SPEC_SCRIPT, module])
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to run {}", self.python.display()))?;
        if !output.status.success() {
            bail!("{}", String::from_utf8_lossy(&output.stderr).trim());
        }
        let origin = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(match origin.as_str() {
            "" => None,
            "built-in" => Some(ModuleOrigin::BuiltIn),
            "frozen" => Some(ModuleOrigin::Frozen),
            _ => Some(ModuleOrigin::File(PathBuf::from(origin))),
        })
    }

    fn stdlib_dirs(&self) -> &[PathBuf] {
        &self.stdlib_dirs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::rc::Rc;

    struct FakeLocator {
        origins: HashMap<&'static str, ModuleOrigin>,
        failing: Vec<&'static str>,
        stdlib_dirs: Vec<PathBuf>,
        calls: Rc<RefCell<usize>>,
    }

    impl FakeLocator {
        fn new() -> Self {
            Self {
                origins: HashMap::new(),
                failing: Vec::new(),
                stdlib_dirs: vec![PathBuf::from("/usr/lib/python3.12")],
                calls: Rc::new(RefCell::new(0)),
            }
        }
    }

    impl ModuleLocator for FakeLocator {
        fn locate(&self, module: &str) -> Result<Option<ModuleOrigin>> {
            *self.calls.borrow_mut() += 1;
            if self.failing.contains(&module) {
                return Err(anyhow!("boom"));
            }
            Ok(self.origins.get(module).cloned())
        }

        fn stdlib_dirs(&self) -> &[PathBuf] {
            &self.stdlib_dirs
        }
    }

    #[test]
    fn registries_recognise_builtin_and_distribution_modules() {
        let classifier = StandardLibraryClassifier::registry_only();
        assert!(classifier.is_standard_library("sys"));
        assert!(classifier.is_standard_library("json"));
        assert!(classifier.is_standard_library("importlib"));
        assert!(classifier.is_standard_library("os.path"));
        assert!(!classifier.is_standard_library("requests"));
        assert!(!classifier.is_standard_library(""));
    }

    #[test]
    fn heuristic_uses_origin_markers() {
        let mut locator = FakeLocator::new();
        locator.origins.insert("_vendored", ModuleOrigin::Frozen);
        locator.origins.insert(
            "numpy",
            ModuleOrigin::File(PathBuf::from(
                "/home/u/.venv/lib/python3.12/site-packages/numpy/__init__.py",
            )),
        );
        locator.origins.insert(
            "apt_pkg",
            ModuleOrigin::File(PathBuf::from("/usr/lib/python3/dist-packages/apt_pkg.so")),
        );
        locator.origins.insert(
            "oddball",
            ModuleOrigin::File(PathBuf::from("/usr/lib/python3.12/oddball.py")),
        );
        locator.origins.insert(
            "platform_extra",
            ModuleOrigin::File(PathBuf::from("/opt/vendor/platform_extra.py")),
        );
        let classifier = StandardLibraryClassifier::with_locator(locator);

        assert!(classifier.is_standard_library("_vendored"));
        assert!(!classifier.is_standard_library("numpy"));
        assert!(!classifier.is_standard_library("apt_pkg"));
        assert!(classifier.is_standard_library("oddball"));
        assert!(classifier.is_standard_library("platform_extra"));
        assert!(!classifier.is_standard_library("not_installed_anywhere"));
    }

    #[test]
    fn site_packages_inside_stdlib_dir_is_third_party() {
        let mut locator = FakeLocator::new();
        locator.origins.insert(
            "requests",
            ModuleOrigin::File(PathBuf::from(
                "/usr/lib/python3.12/site-packages/requests/__init__.py",
            )),
        );
        locator.origins.insert(
            "apt",
            ModuleOrigin::File(PathBuf::from(
                "/usr/lib/python3.12/dist-packages/apt/__init__.py",
            )),
        );
        let classifier = StandardLibraryClassifier::with_locator(locator);
        assert!(!classifier.is_standard_library("requests"));
        assert!(!classifier.is_standard_library("apt"));
    }

    #[test]
    fn scan_with_interpreter_origins_keeps_installed_packages() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let script = dir.path().join("tool.py");
        std::fs::write(
            &script,
            "import json\nfrom importlib import metadata\nimport requests\n",
        )?;
        let mut locator = FakeLocator::new();
        locator.origins.insert(
            "requests",
            ModuleOrigin::File(PathBuf::from(
                "/usr/lib/python3.12/site-packages/requests/__init__.py",
            )),
        );
        let classifier = StandardLibraryClassifier::with_locator(locator);
        let imports = crate::imports::find_third_party_imports(&[script], &classifier);
        assert_eq!(
            imports.into_iter().collect::<Vec<_>>(),
            vec!["requests".to_string()]
        );
        Ok(())
    }

    #[test]
    fn locator_errors_classify_as_third_party() {
        let mut locator = FakeLocator::new();
        locator.failing.push("broken");
        let classifier = StandardLibraryClassifier::with_locator(locator);
        assert!(!classifier.is_standard_library("broken"));
    }

    #[test]
    fn heuristic_is_consulted_once_per_name() {
        let locator = FakeLocator::new();
        let calls = Rc::clone(&locator.calls);
        let classifier = StandardLibraryClassifier::with_locator(locator);
        assert!(!classifier.is_standard_library("requests"));
        assert!(!classifier.is_standard_library("requests.adapters"));
        assert!(classifier.is_standard_library("json"));
        assert_eq!(*calls.borrow(), 1);
    }
}
