//! Module catalog: which modules exist and which category each belongs to.
//!
//! The catalog is declared statically and can be extended from a TOML
//! manifest:
//!
//! ```toml
//! [modules]
//! rescore = "scoring"
//! ```

use crate::error::{ModuleError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Broad stage family.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleCategory {
    Topology,
    Sampling,
    Refinement,
    Scoring,
    Analysis,
}

impl ModuleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleCategory::Topology => "topology",
            ModuleCategory::Sampling => "sampling",
            ModuleCategory::Refinement => "refinement",
            ModuleCategory::Scoring => "scoring",
            ModuleCategory::Analysis => "analysis",
        }
    }
}

impl fmt::Display for ModuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const BUILTIN_MODULES: &[(&str, ModuleCategory)] = &[
    ("topoaa", ModuleCategory::Topology),
    ("rigidbody", ModuleCategory::Sampling),
    ("lightdock", ModuleCategory::Sampling),
    ("flexref", ModuleCategory::Refinement),
    ("mdref", ModuleCategory::Refinement),
    ("emref", ModuleCategory::Refinement),
    ("emscoring", ModuleCategory::Scoring),
    ("mdscoring", ModuleCategory::Scoring),
    ("clustfcc", ModuleCategory::Analysis),
    ("seletop", ModuleCategory::Analysis),
    ("caprieval", ModuleCategory::Analysis),
];

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    modules: BTreeMap<String, ModuleCategory>,
}

/// Mapping from module name to category.
#[derive(Debug, Clone)]
pub struct ModuleCatalog {
    entries: BTreeMap<String, ModuleCategory>,
}

impl Default for ModuleCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModuleCatalog {
    /// Catalog of the modules known to dockflow.
    pub fn builtin() -> Self {
        let entries = BUILTIN_MODULES
            .iter()
            .map(|(name, category)| (name.to_string(), category.clone()))
            .collect();
        Self { entries }
    }

    /// Add or replace entries from a TOML manifest string.
    pub fn extend_from_manifest(&mut self, manifest: &str) -> Result<()> {
        let manifest: Manifest = toml::from_str(manifest)
            .map_err(|e| ModuleError::Config(format!("module manifest: {}", e)))?;
        self.entries.extend(manifest.modules);
        Ok(())
    }

    /// Add or replace entries from a TOML manifest file.
    pub fn extend_from_file(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path)?;
        self.extend_from_manifest(&text)
    }

    pub fn category(&self, module: &str) -> Option<&ModuleCategory> {
        self.entries.get(module)
    }

    pub fn contains(&self, module: &str) -> bool {
        self.entries.contains_key(module)
    }

    /// Modules sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ModuleCategory)> {
        self.entries.iter().map(|(name, category)| (name.as_str(), category))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
