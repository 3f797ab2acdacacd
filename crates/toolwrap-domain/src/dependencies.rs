use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Declared,
    Detected,
}

/// Lowercased package names with where they came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySet {
    provenance: Provenance,
    names: BTreeSet<String>,
}

impl DependencySet {
    pub fn declared<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(Provenance::Declared, names)
    }

    pub fn detected<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(Provenance::Detected, names)
    }

    fn new<I, S>(provenance: Provenance, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            provenance,
            names: names
                .into_iter()
                .map(|name| name.as_ref().trim().to_lowercase())
                .filter(|name| !name.is_empty())
                .collect(),
        }
    }

    #[must_use]
    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    #[must_use]
    pub fn names(&self) -> &BTreeSet<String> {
        &self.names
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.to_lowercase())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Names in `self` that `other` does not contain.
    #[must_use]
    pub fn difference(&self, other: &DependencySet) -> BTreeSet<String> {
        self.names.difference(&other.names).cloned().collect()
    }

    pub fn merge<'a, I>(&mut self, names: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        self.names
            .extend(names.into_iter().map(|name| name.to_lowercase()));
    }

    #[must_use]
    pub fn display_list(&self) -> String {
        if self.names.is_empty() {
            "None".to_string()
        } else {
            self.names.iter().cloned().collect::<Vec<_>>().join(", ")
        }
    }
}
