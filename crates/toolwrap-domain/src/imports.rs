use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rustpython_parser::{ast, Parse};
use tracing::{debug, warn};

use crate::stdlib::StandardLibraryClassifier;

/// Import roots used by `files` that are not part of the standard library.
///
/// Files that cannot be read or parsed are skipped with a warning, so the
/// result may be partial.
pub fn find_third_party_imports<P: AsRef<Path>>(
    files: &[P],
    classifier: &StandardLibraryClassifier,
) -> BTreeSet<String> {
    let mut imports = BTreeSet::new();
    for file in files {
        let file = file.as_ref();
        debug!(path = %file.display(), "scanning for imports");
        let roots = match scan_file(file) {
            Ok(roots) => roots,
            Err(err) => {
                warn!("skipping import scan for {}: {err:#}", file.display());
                continue;
            }
        };
        imports.extend(
            roots
                .into_iter()
                .filter(|root| !classifier.is_standard_library(root)),
        );
    }
    debug!(?imports, "third-party imports");
    imports
}

fn scan_file(path: &Path) -> Result<BTreeSet<String>> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let source = String::from_utf8_lossy(&bytes);
    import_roots(&source, &path.display().to_string())
}

/// Top-level module names of every absolute import in `source`, at any depth.
///
/// # Errors
///
/// Returns an error when `source` is not valid Python.
pub fn import_roots(source: &str, source_path: &str) -> Result<BTreeSet<String>> {
    let suite = ast::Suite::parse(source, source_path)
        .map_err(|err| anyhow::anyhow!("syntax error: {err}"))?;
    let mut roots = BTreeSet::new();
    collect_body(&suite, &mut roots);
    Ok(roots)
}

fn collect_body(body: &[ast::Stmt], roots: &mut BTreeSet<String>) {
    for stmt in body {
        collect_stmt(stmt, roots);
    }
}

fn collect_stmt(stmt: &ast::Stmt, roots: &mut BTreeSet<String>) {
    match stmt {
        ast::Stmt::Import(ast::StmtImport { names, .. }) => {
            for alias in names {
                push_root(alias.name.as_str(), roots);
            }
        }
        ast::Stmt::ImportFrom(ast::StmtImportFrom { module, level, .. }) => {
            let relative = level.as_ref().map_or(0, ast::Int::to_u32) > 0;
            if let (false, Some(module)) = (relative, module) {
                push_root(module.as_str(), roots);
            }
        }
        ast::Stmt::FunctionDef(ast::StmtFunctionDef { body, .. })
        | ast::Stmt::AsyncFunctionDef(ast::StmtAsyncFunctionDef { body, .. })
        | ast::Stmt::ClassDef(ast::StmtClassDef { body, .. })
        | ast::Stmt::With(ast::StmtWith { body, .. })
        | ast::Stmt::AsyncWith(ast::StmtAsyncWith { body, .. }) => collect_body(body, roots),
        ast::Stmt::For(ast::StmtFor { body, orelse, .. })
        | ast::Stmt::AsyncFor(ast::StmtAsyncFor { body, orelse, .. })
        | ast::Stmt::While(ast::StmtWhile { body, orelse, .. })
        | ast::Stmt::If(ast::StmtIf { body, orelse, .. }) => {
            collect_body(body, roots);
            collect_body(orelse, roots);
        }
        ast::Stmt::Try(ast::StmtTry {
            body,
            handlers,
            orelse,
            finalbody,
            ..
        })
        | ast::Stmt::TryStar(ast::StmtTryStar {
            body,
            handlers,
            orelse,
            finalbody,
            ..
        }) => {
            collect_body(body, roots);
            for handler in handlers {
                let ast::ExceptHandler::ExceptHandler(handler) = handler;
                collect_body(&handler.body, roots);
            }
            collect_body(orelse, roots);
            collect_body(finalbody, roots);
        }
        ast::Stmt::Match(ast::StmtMatch { cases, .. }) => {
            for case in cases {
                collect_body(&case.body, roots);
            }
        }
        _ => {}
    }
}

fn push_root(dotted: &str, roots: &mut BTreeSet<String>) {
    let root = dotted.split('.').next().unwrap_or(dotted);
    if !root.is_empty() {
        roots.insert(root.to_string());
    }
}

/// Distribution name that usually provides import root `module`, lowercased.
#[must_use]
pub fn import_to_distribution(module: &str) -> String {
    let module = module.split('.').next().unwrap_or(module);
    match module {
        "yaml" => "pyyaml".to_string(),
        "cv2" => "opencv-python".to_string(),
        "PIL" | "pil" => "pillow".to_string(),
        "sklearn" => "scikit-learn".to_string(),
        "bs4" => "beautifulsoup4".to_string(),
        "dateutil" => "python-dateutil".to_string(),
        "dotenv" => "python-dotenv".to_string(),
        other => other.to_lowercase(),
    }
}
