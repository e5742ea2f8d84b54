//! dockflow core library
//!
//! Building blocks shared by every stage of a docking workflow:
//! - parameter schemas, flattening and override merging
//! - the `io.json` hand-off registry between stages
//! - the module lifecycle (`Module`, `ModuleContext`)
//! - the sequential pipeline driver and the module catalog

pub mod catalog;
pub mod cfg_text;
pub mod error;
pub mod io;
pub mod module;
pub mod params;
pub mod pipeline;
pub mod telemetry;

pub use catalog::{ModuleCatalog, ModuleCategory};
pub use cfg_text::schema_to_cfg_text;
pub use error::{ModuleError, Result};
pub use io::{Artifact, IoTag, ModuleIo, MODULE_IO_FILE};
pub use module::{
    confirm_executable, step_folder_name, InitialParams, Module, ModuleContext, ModuleState,
    SupportFiles, GENERAL_PARAMETERS,
};
pub use params::{
    deep_merge, flatten_schema, parse_schema, read_config, read_schema, Params, ParamsExt,
};
pub use pipeline::{ModuleFactory, Pipeline, PipelineResult, StageReport, StageSpec, Workflow};
pub use telemetry::{init_tracing, LogFormat};

/// dockflow version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
