//! dockflow stages
//!
//! Concrete [`Module`] implementations and the factory the pipeline driver
//! builds them with.

pub mod clustfcc;

pub use clustfcc::Clustfcc;

use dockflow_core::{Module, ModuleError, ModuleFactory, Params, Result};
use std::path::Path;

/// Names of the stages this crate implements.
pub const IMPLEMENTED: &[&str] = &[clustfcc::NAME];

/// Builds the stages implemented in this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinModules;

impl BuiltinModules {
    pub fn new() -> Self {
        Self
    }

    /// Unflattened default schema of `module`.
    pub fn default_schema(&self, module: &str) -> Result<Params> {
        match module {
            clustfcc::NAME => clustfcc::default_schema(),
            other => Err(not_implemented(other)),
        }
    }
}

fn not_implemented(module: &str) -> ModuleError {
    ModuleError::Config(format!(
        "module {:?} is not implemented; available modules: {}",
        module,
        IMPLEMENTED.join(", ")
    ))
}

impl ModuleFactory for BuiltinModules {
    fn build(&self, module: &str, order: usize, path: &Path) -> Result<Box<dyn Module>> {
        match module {
            clustfcc::NAME => Ok(Box::new(Clustfcc::new(order, path)?)),
            other => Err(not_implemented(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_module_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = match BuiltinModules::new().build("emref", 1, dir.path()) {
            Ok(_) => panic!("emref is not implemented"),
            Err(e) => e,
        };
        assert!(matches!(err, ModuleError::Config(_)));
        assert!(err.to_string().contains("clustfcc"));
    }

    #[test]
    fn test_builds_clustfcc() {
        let dir = tempfile::tempdir().unwrap();
        let module = BuiltinModules::new()
            .build("clustfcc", 1, &dir.path().join("01_clustfcc"))
            .unwrap();
        assert_eq!(module.name(), "clustfcc");
        assert!(BuiltinModules::new().default_schema("clustfcc").is_ok());
    }
}
