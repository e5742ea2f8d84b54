//! Module lifecycle shared by every stage.
//!
//! A stage owns a [`ModuleContext`] and implements [`Module`]. The provided
//! [`Module::run`] drives the common part of the lifecycle:
//!
//! `Constructed -> ParametersResolved -> (EnvironmentStaged) -> Running ->
//! Finished | Failed`
//!
//! and hands over to [`Module::run_stage`] for the stage-specific work.

use crate::error::{ModuleError, Result};
use crate::io::{ModuleIo, MODULE_IO_FILE};
use crate::params::{deep_merge, read_config, Params, ParamsExt};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, error, info, warn, Level};

/// General parameters that apply to every module.
pub const GENERAL_PARAMETERS: &[&str] = &[
    "concat",
    "mode",
    "ncores",
    "queue",
    "queue_limit",
    "relative_envvars",
    "self_contained",
];

/// Default queue limit when a module runs in `hpc` mode.
pub const DEFAULT_QUEUE_LIMIT: u64 = 100;

/// File written in the stage folder when the stage is made self-contained.
pub const ENVVARS_FILE: &str = "envvars";

/// Where the initial parameters of a module come from.
#[derive(Debug, Clone)]
pub enum InitialParams {
    /// Already flat parameters.
    Map(Params),
    /// YAML default schema to flatten.
    Config(PathBuf),
}

/// Lifecycle state of one module instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Constructed,
    ParametersResolved,
    EnvironmentStaged,
    Running,
    Finished,
    Failed,
}

/// Shared folders a module needs next to its own output when it is made
/// portable.
#[derive(Debug, Clone)]
pub struct SupportFiles {
    /// Folder with the module's recipes; copied inside the stage folder.
    pub module_dir: PathBuf,
    /// Shared topology/parameter folder; copied once next to the stage folders.
    pub toppar_dir: PathBuf,
}

/// State every module carries: identity, folder, parameters and the registry
/// of the previous stage.
#[derive(Debug)]
pub struct ModuleContext {
    name: String,
    order: usize,
    path: PathBuf,
    params: Params,
    previous_io: ModuleIo,
    support: Option<SupportFiles>,
    state: ModuleState,
}

fn stage_folder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9]{2}").expect("stage folder pattern is valid"))
}

/// Folder name of the stage at `order`, e.g. `01_clustfcc`.
pub fn step_folder_name(order: usize, module: &str) -> String {
    format!("{:02}_{}", order, module)
}

impl ModuleContext {
    /// Resolve parameters and load the previous stage's registry.
    pub fn new(
        name: impl Into<String>,
        order: usize,
        path: impl Into<PathBuf>,
        initial: InitialParams,
    ) -> Result<Self> {
        let params = match initial {
            InitialParams::Map(params) => params,
            InitialParams::Config(config) => read_config(&config)?,
        };

        let mut context = Self {
            name: name.into(),
            order,
            path: path.into(),
            params,
            previous_io: ModuleIo::new(),
            support: None,
            state: ModuleState::Constructed,
        };
        context.previous_io = context.load_previous_io()?;
        Ok(context)
    }

    /// Declare the support folders staged when `self_contained` is set.
    pub fn with_support_files(mut self, support: SupportFiles) -> Self {
        self.support = Some(support);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut Params {
        &mut self.params
    }

    pub fn previous_io(&self) -> &ModuleIo {
        &self.previous_io
    }

    pub fn support(&self) -> Option<&SupportFiles> {
        self.support.as_ref()
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: ModuleState) {
        debug!(module = %self.name, from = ?self.state, to = ?state, "module state change");
        self.state = state;
    }

    /// Folder of the stage that ran before this one.
    ///
    /// Sibling folders starting with two digits are sorted and the one at
    /// `order - 1` is taken. Falls back to this stage's own folder.
    pub fn previous_path(&self) -> PathBuf {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut stages: Vec<PathBuf> = match std::fs::read_dir(&parent) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().is_dir())
                .filter(|entry| stage_folder_pattern().is_match(&entry.file_name().to_string_lossy()))
                .map(|entry| entry.path())
                .collect(),
            Err(_) => Vec::new(),
        };
        stages.sort();

        self.order
            .checked_sub(1)
            .and_then(|index| stages.get(index).cloned())
            .unwrap_or_else(|| self.path.clone())
    }

    fn load_previous_io(&self) -> Result<ModuleIo> {
        if self.order == 0 {
            return Ok(ModuleIo::new());
        }

        let previous = self.previous_path().join(MODULE_IO_FILE);
        if previous.is_file() {
            debug!(module = %self.name, path = %previous.display(), "loading previous registry");
            ModuleIo::load(&previous)
        } else {
            Ok(ModuleIo::new())
        }
    }

    /// Deep-merge run-specific parameters into the current ones.
    pub fn update_params(&mut self, overrides: &Params) {
        self.params = deep_merge(&self.params, overrides);
    }

    /// Fill the general parameters that were not set by defaults or overrides.
    pub fn apply_standard_defaults(&mut self) {
        self.params.set_default("ncores", Value::Null);
        self.params.set_default("mode", json!("local"));
        self.params.set_default("concat", json!(1));
        self.params.set_default("queue", Value::Null);
        self.params.set_default("queue_limit", json!(DEFAULT_QUEUE_LIMIT));
        self.params.set_default("relative_envvars", json!(true));
        self.params.set_default("self_contained", json!(false));
    }

    /// Copy support folders into the run and write the `envvars` file.
    ///
    /// No-op for modules without [`SupportFiles`].
    pub fn stage_environment(&mut self) -> Result<()> {
        let Some(support) = self.support.clone() else {
            return Ok(());
        };

        let module_copy = self.path.join(folder_name(&support.module_dir)?);
        copy_dir_recursive(&support.module_dir, &module_copy)?;

        let run_dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let toppar_copy = run_dir.join("toppar");
        if !toppar_copy.exists() {
            copy_dir_recursive(&support.toppar_dir, &toppar_copy)?;
        }

        self.support = Some(SupportFiles {
            module_dir: module_copy,
            toppar_dir: toppar_copy,
        });
        self.save_envvars(ENVVARS_FILE)?;
        self.set_state(ModuleState::EnvironmentStaged);
        Ok(())
    }

    /// `MODULE`, `MODDIR` and `TOPPAR` for the current support folders.
    pub fn default_envvars(&self) -> Vec<(&'static str, PathBuf)> {
        let mut vars = Vec::new();
        if let Some(support) = &self.support {
            vars.push(("MODULE", support.module_dir.clone()));
        }
        vars.push(("MODDIR", self.path.clone()));
        if let Some(support) = &self.support {
            vars.push(("TOPPAR", support.toppar_dir.clone()));
        }
        vars
    }

    /// Write a bash script exporting the module environment.
    ///
    /// With `relative_envvars` the paths are resolved from the script's own
    /// folder, so the stage folder can be moved and the file still sourced.
    pub fn save_envvars(&self, filename: &str) -> Result<PathBuf> {
        let relative = match self.params.get("relative_envvars") {
            None | Some(Value::Null) => true,
            Some(_) => self.params.bool_param("relative_envvars")?,
        };

        let mut lines = vec![
            "#!/bin/bash".to_string(),
            "# source this file from within the module folder for debugging,".to_string(),
            format!("# for example from within '{}'", step_folder_name(self.order, &self.name)),
        ];

        if relative {
            lines.push(
                r#"SCRIPT_DIR=$( cd -- "$( dirname -- "${BASH_SOURCE[0]}" )" &> /dev/null && pwd )"#
                    .to_string(),
            );
            if let Some(support) = &self.support {
                lines.push(format!(
                    "export MODULE=${{SCRIPT_DIR}}/{}",
                    folder_name(&support.module_dir)?.to_string_lossy()
                ));
            }
            lines.push("export MODDIR=${SCRIPT_DIR}".to_string());
            if self.support.is_some() {
                lines.push("export TOPPAR=${SCRIPT_DIR}/../toppar".to_string());
            }
        } else {
            for (var, path) in self.default_envvars() {
                lines.push(format!("export {}={}", var, path.display()));
            }
        }

        let target = self.path.join(filename);
        std::fs::write(&target, lines.join("\n") + "\n")?;
        Ok(target)
    }

    /// Log `message` at error severity and build the fatal error that stops
    /// the pipeline. Callers return it immediately.
    pub fn finish_with_error(&mut self, message: impl Into<String>) -> ModuleError {
        let mut message = message.into();
        if message.is_empty() {
            message = "Module has failed".to_string();
        }
        error!(module = %self.name, "{}", message);
        self.set_state(ModuleState::Failed);
        ModuleError::Fatal {
            module: self.name.clone(),
            message,
        }
    }

    /// Log a message tagged with the module name.
    pub fn log(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => error!(module = %self.name, "{}", message),
            Level::WARN => warn!(module = %self.name, "{}", message),
            Level::INFO => info!(module = %self.name, "{}", message),
            _ => debug!(module = %self.name, "{}", message),
        }
    }

    fn self_contained(&self) -> Result<bool> {
        match self.params.get("self_contained") {
            None | Some(Value::Null) => Ok(false),
            Some(_) => self.params.bool_param("self_contained"),
        }
    }
}

fn folder_name(path: &Path) -> Result<&std::ffi::OsStr> {
    path.file_name().ok_or_else(|| {
        ModuleError::Config(format!("support folder {} has no name", path.display()))
    })
}

fn copy_dir_recursive(from: &Path, to: &Path) -> Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let source = entry.path();
        let target = to.join(entry.file_name());
        if source.is_dir() {
            copy_dir_recursive(&source, &target)?;
        } else {
            std::fs::copy(&source, &target)?;
        }
    }
    Ok(())
}

/// Fail unless `path` exists and is executable.
pub fn confirm_executable(module: &str, path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path).map_err(|_| ModuleError::Installation {
        module: module.to_string(),
        message: format!("Required {} file does not exist.", path.display()),
    })?;

    if !is_executable(&metadata) {
        return Err(ModuleError::Installation {
            module: module.to_string(),
            message: format!("Required {} file is not executable", path.display()),
        });
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.is_file() && metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    metadata.is_file()
}

/// A pipeline stage.
#[async_trait]
pub trait Module: Send {
    fn context(&self) -> &ModuleContext;

    fn context_mut(&mut self) -> &mut ModuleContext;

    /// Check the third-party software the stage needs. Runs before any job
    /// is scheduled.
    fn confirm_installation(&self) -> Result<()>;

    /// Stage-specific work.
    async fn run_stage(&mut self) -> Result<()>;

    fn name(&self) -> &str {
        self.context().name()
    }

    /// Execute the module with run-specific parameter overrides.
    async fn run(&mut self, overrides: &Params) -> Result<()> {
        let context = self.context_mut();
        info!(module = %context.name(), "Running [{}] module", context.name());

        context.update_params(overrides);
        context.apply_standard_defaults();
        context.set_state(ModuleState::ParametersResolved);

        if context.self_contained()? {
            context.stage_environment()?;
        }

        context.set_state(ModuleState::Running);
        match self.run_stage().await {
            Ok(()) => {
                let context = self.context_mut();
                context.set_state(ModuleState::Finished);
                info!(module = %context.name(), "Module [{}] finished.", context.name());
                Ok(())
            }
            Err(e) => {
                self.context_mut().set_state(ModuleState::Failed);
                Err(e)
            }
        }
    }
}
