#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod dependencies;
pub mod group;
pub mod imports;
pub mod requirements;
pub mod stdlib;

pub use dependencies::{DependencySet, Provenance};
pub use group::{detect_wrapper_collisions, discover_groups, select_groups, Group};
pub use imports::{find_third_party_imports, import_roots, import_to_distribution};
pub use requirements::{append_requirements, parse_requirements, APPEND_MARKER};
pub use stdlib::{
    InterpreterLocator, ModuleLocator, ModuleOrigin, StandardLibraryClassifier, StdlibStrategy,
};
