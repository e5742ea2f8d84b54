//! dockflow - staged docking workflows
//!
//! The `dockflow` command runs workflow files and inspects modules.
//!
//! ## Commands
//!
//! - `run`: Execute a workflow file stage by stage
//! - `check`: Confirm the third-party software a module needs
//! - `cfg`: Print the annotated default configuration of a module
//! - `modules`: List the module catalog

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dockflow_core::params::params_from_value;
use dockflow_core::{
    schema_to_cfg_text, ModuleCatalog, ModuleFactory, Params, Pipeline, StageSpec, Workflow,
};
use dockflow_modules::{BuiltinModules, IMPLEMENTED};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "dockflow")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Staged docking workflow runner", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow file
    Run {
        /// Workflow file (TOML)
        workflow: PathBuf,
    },

    /// Confirm a module's third-party software is installed
    Check {
        /// Module name
        module: String,
    },

    /// Print the default configuration of a module
    Cfg {
        /// Module name
        module: String,
    },

    /// List known modules and their category
    Modules {
        /// Extra catalog entries (TOML `[modules]` table)
        #[arg(long, env = "DOCKFLOW_CATALOG")]
        manifest: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    dockflow_core::init_tracing(dockflow_core::LogFormat::from_json_flag(cli.json), level);

    match cli.command {
        Commands::Run { workflow } => cmd_run(&workflow).await,
        Commands::Check { module } => cmd_check(&module),
        Commands::Cfg { module } => cmd_cfg(&module),
        Commands::Modules { manifest } => cmd_modules(manifest.as_deref()),
    }
}

/// Keys of a workflow file that are not general parameters.
const WORKFLOW_KEYS: &[&str] = &["run_dir", "start_order", "stage"];

/// Parse a workflow file.
///
/// ```toml
/// run_dir = "run1"
/// ncores = 4
///
/// [[stage]]
/// module = "clustfcc"
/// threshold = 2
/// ```
///
/// A relative `run_dir` is taken relative to `base_dir`.
fn parse_workflow(text: &str, base_dir: &Path) -> Result<Workflow> {
    let table: toml::Table = toml::from_str(text).context("Invalid workflow file")?;
    let document = serde_json::to_value(&table)?;
    let mut document = params_from_value(document)?;

    let run_dir = match document.remove("run_dir") {
        Some(Value::String(dir)) => base_dir.join(dir),
        Some(other) => bail!("`run_dir` must be a string, got {}", other),
        None => bail!("Workflow file has no `run_dir`"),
    };

    let start_order = match document.remove("start_order") {
        None => 0,
        Some(value) => value
            .as_u64()
            .map(|n| n as usize)
            .context("`start_order` must be a non-negative integer")?,
    };

    let stages = match document.remove("stage") {
        Some(Value::Array(tables)) => tables
            .into_iter()
            .enumerate()
            .map(|(index, table)| parse_stage(index, table))
            .collect::<Result<Vec<_>>>()?,
        Some(_) => bail!("`stage` must be an array of tables ([[stage]])"),
        None => Vec::new(),
    };
    if stages.is_empty() {
        bail!("Workflow file declares no [[stage]]");
    }

    let general: Params = document
        .into_iter()
        .filter(|(key, _)| !WORKFLOW_KEYS.contains(&key.as_str()))
        .collect();

    Ok(Workflow {
        run_dir,
        start_order,
        general,
        stages,
    })
}

fn parse_stage(index: usize, table: Value) -> Result<StageSpec> {
    let mut overrides = params_from_value(table)
        .with_context(|| format!("[[stage]] #{} must be a table", index + 1))?;
    let module = match overrides.remove("module") {
        Some(Value::String(module)) => module,
        _ => bail!("[[stage]] #{} has no `module` name", index + 1),
    };
    Ok(StageSpec { module, overrides })
}

async fn cmd_run(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workflow file: {:?}", path))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let workflow = parse_workflow(&text, base_dir)?;

    let catalog = ModuleCatalog::builtin();
    for stage in &workflow.stages {
        if !catalog.contains(&stage.module) {
            bail!("Unknown module {:?}", stage.module);
        }
    }

    info!(workflow = %path.display(), "Loaded workflow");
    let result = Pipeline::run(&BuiltinModules::new(), &workflow)
        .await
        .context("Workflow failed")?;

    println!("Workflow finished in {} ms", result.duration_ms);
    for stage in &result.stages {
        println!(
            "  {}  {:>8} ms",
            stage.folder.display(),
            stage.duration_ms
        );
    }
    Ok(())
}

fn cmd_check(module: &str) -> Result<()> {
    let built = BuiltinModules::new()
        .build(module, 0, Path::new("."))
        .with_context(|| format!("Cannot build module {:?}", module))?;
    built
        .confirm_installation()
        .with_context(|| format!("Module {:?} is not ready", module))?;
    println!("{}: ok", module);
    Ok(())
}

fn cmd_cfg(module: &str) -> Result<()> {
    let schema = BuiltinModules::new().default_schema(module)?;
    print!("{}", schema_to_cfg_text(&schema, module));
    Ok(())
}

fn cmd_modules(manifest: Option<&Path>) -> Result<()> {
    let mut catalog = ModuleCatalog::builtin();
    if let Some(manifest) = manifest {
        catalog
            .extend_from_file(manifest)
            .with_context(|| format!("Failed to load catalog manifest: {:?}", manifest))?;
    }

    for (name, category) in catalog.iter() {
        let marker = if IMPLEMENTED.contains(&name) { "*" } else { " " };
        println!("{} {:<12} {}", marker, name, category);
    }
    println!();
    println!("* implemented in this build");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_workflow() {
        let text = r#"
run_dir = "run1"
ncores = 4
mode = "local"

[[stage]]
module = "clustfcc"
threshold = 2
fraction_cutoff = 0.5
"#;
        let workflow = parse_workflow(text, Path::new("/data")).unwrap();
        assert_eq!(workflow.run_dir, PathBuf::from("/data/run1"));
        assert_eq!(workflow.start_order, 0);
        assert_eq!(workflow.general.get("ncores"), Some(&json!(4)));
        assert_eq!(workflow.general.get("mode"), Some(&json!("local")));
        assert_eq!(workflow.stages.len(), 1);

        let stage = &workflow.stages[0];
        assert_eq!(stage.module, "clustfcc");
        assert_eq!(stage.overrides.get("threshold"), Some(&json!(2)));
        assert!(!stage.overrides.contains_key("module"));
    }

    #[test]
    fn test_parse_workflow_start_order() {
        let text = "run_dir = \"/abs/run\"\nstart_order = 1\n[[stage]]\nmodule = \"clustfcc\"\n";
        let workflow = parse_workflow(text, Path::new("/data")).unwrap();
        assert_eq!(workflow.run_dir, PathBuf::from("/abs/run"));
        assert_eq!(workflow.start_order, 1);
        assert!(workflow.general.is_empty());
    }

    #[test]
    fn test_parse_workflow_requires_stages() {
        let err = parse_workflow("run_dir = \"run\"\n", Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("[[stage]]"));
    }

    #[test]
    fn test_stage_without_module_is_rejected() {
        let text = "run_dir = \"run\"\n[[stage]]\nthreshold = 2\n";
        let err = parse_workflow(text, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("module"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_reports_failing_stage() {
        let dir = tempfile::tempdir().unwrap();
        let workflow = dir.path().join("workflow.toml");
        std::fs::write(
            &workflow,
            "run_dir = \"run\"\nstart_order = 1\n[[stage]]\nmodule = \"clustfcc\"\nfcc_path = \"/nonexistent\"\n",
        )
        .unwrap();

        // the contact program is missing: the installation check stops the run
        let err = cmd_run(&workflow).await.unwrap_err();
        assert!(format!("{:#}", err).contains("does not exist"));
    }
}
