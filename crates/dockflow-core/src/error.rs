//! Error taxonomy for module construction and execution.

use std::path::PathBuf;

/// Errors produced while resolving, preparing or running a module.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// The default configuration file does not exist.
    #[error("Default configuration file not found: {path:?}")]
    ConfigNotFound { path: PathBuf },

    /// The configuration could not be parsed or has the wrong shape.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A parameter is missing or has the wrong type.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// A third-party executable needed by the module is missing.
    #[error("[{module}] installation check failed: {message}")]
    Installation { module: String, message: String },

    /// The module cannot produce valid output; the pipeline must stop.
    #[error("[{module}] {message}")]
    Fatal { module: String, message: String },

    /// The execution engine could not be created or failed to run.
    #[error("engine error: {0}")]
    Engine(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ModuleError {
    /// Whether a stage gave up through `finish_with_error`, as opposed to
    /// failing on configuration, installation or IO.
    pub fn is_fatal_stage_exit(&self) -> bool {
        matches!(self, ModuleError::Fatal { .. })
    }
}

/// Result type for module operations.
pub type Result<T> = std::result::Result<T, ModuleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_not_found_names_path() {
        let err = ModuleError::ConfigNotFound {
            path: PathBuf::from("/nope/defaults.yaml"),
        };
        let msg = err.to_string();
        assert!(msg.contains("Default configuration file not found"));
        assert!(msg.contains("/nope/defaults.yaml"));
    }

    #[test]
    fn test_fatal_error_is_tagged_with_module() {
        let err = ModuleError::Fatal {
            module: "clustfcc".to_string(),
            message: "Several files were not generated".to_string(),
        };
        assert_eq!(err.to_string(), "[clustfcc] Several files were not generated");
        assert!(err.is_fatal_stage_exit());
    }

    #[test]
    fn test_installation_error_display() {
        let err = ModuleError::Installation {
            module: "clustfcc".to_string(),
            message: "Required /opt/fcc/contact_fcc file does not exist.".to_string(),
        };
        assert!(err.to_string().contains("installation check failed"));
        assert!(!err.is_fatal_stage_exit());
    }
}
