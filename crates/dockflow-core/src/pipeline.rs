//! Sequential pipeline driver.

use crate::error::Result;
use crate::module::{step_folder_name, Module, GENERAL_PARAMETERS};
use crate::params::{deep_merge, Params};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info};

/// One stage of a workflow: the module to run and its overrides.
#[derive(Debug, Clone)]
pub struct StageSpec {
    pub module: String,
    pub overrides: Params,
}

/// Ordered stages plus the run-wide general parameters.
#[derive(Debug, Clone)]
pub struct Workflow {
    /// Folder holding the `NN_<module>` stage folders.
    pub run_dir: PathBuf,

    /// Order index of the first stage. Non-zero to continue from stage
    /// folders already present in `run_dir`.
    pub start_order: usize,

    /// General parameters applied to every stage; stage overrides win.
    pub general: Params,

    pub stages: Vec<StageSpec>,
}

/// Builds concrete modules by name.
pub trait ModuleFactory: Send + Sync {
    fn build(&self, module: &str, order: usize, path: &Path) -> Result<Box<dyn Module>>;
}

/// Outcome of one stage.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub module: String,
    pub order: usize,
    pub folder: PathBuf,
    pub duration_ms: u64,
}

/// Result of a complete pipeline execution.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub started_at: DateTime<Utc>,
    pub stages: Vec<StageReport>,
    pub duration_ms: u64,
}

/// Runs stages strictly one after the other.
pub struct Pipeline;

impl Pipeline {
    /// Execute every stage of `workflow` in order.
    ///
    /// A stage only starts once the previous one has returned, so its
    /// registry file is complete. The first error aborts the run and is
    /// returned as is; later stages are not attempted.
    pub async fn run(factory: &dyn ModuleFactory, workflow: &Workflow) -> Result<PipelineResult> {
        let started_at = Utc::now();
        let start = Instant::now();
        std::fs::create_dir_all(&workflow.run_dir)?;

        let general = general_parameters(&workflow.general);
        info!(
            run_dir = %workflow.run_dir.display(),
            stages = workflow.stages.len(),
            "Starting pipeline"
        );

        let mut reports = Vec::with_capacity(workflow.stages.len());
        for (index, stage) in workflow.stages.iter().enumerate() {
            let order = workflow.start_order + index;
            let folder = workflow.run_dir.join(step_folder_name(order, &stage.module));
            std::fs::create_dir_all(&folder)?;

            let stage_start = Instant::now();
            let outcome = Self::run_stage(factory, stage, order, &folder, &general).await;
            if let Err(e) = outcome {
                error!(module = %stage.module, order, error = %e, "Pipeline aborted");
                return Err(e);
            }

            reports.push(StageReport {
                module: stage.module.clone(),
                order,
                folder,
                duration_ms: stage_start.elapsed().as_millis() as u64,
            });
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(duration_ms, "Pipeline completed successfully");

        Ok(PipelineResult {
            started_at,
            stages: reports,
            duration_ms,
        })
    }

    async fn run_stage(
        factory: &dyn ModuleFactory,
        stage: &StageSpec,
        order: usize,
        folder: &Path,
        general: &Params,
    ) -> Result<()> {
        let mut module = factory.build(&stage.module, order, folder)?;
        let overrides = deep_merge(general, &stage.overrides);

        // the check sees the configured tool paths
        module.context_mut().update_params(&overrides);
        module.confirm_installation()?;

        module.run(&overrides).await
    }
}

/// Keep only the parameters that apply to every module.
pub fn general_parameters(params: &Params) -> Params {
    params
        .iter()
        .filter(|(name, _)| GENERAL_PARAMETERS.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}
