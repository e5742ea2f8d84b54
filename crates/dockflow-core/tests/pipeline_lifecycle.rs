//! Lifecycle and sequential driver tests with in-test modules.

use async_trait::async_trait;
use dockflow_core::params::params_from_value;
use dockflow_core::{
    Artifact, IoTag, Module, ModuleContext, ModuleError, ModuleFactory, ModuleIo, ModuleState,
    InitialParams, Params, ParamsExt, Pipeline, StageSpec, Workflow, MODULE_IO_FILE,
};
use serde_json::json;
use std::path::Path;

/// Produces `count` models, or forwards the previous ones with a score offset.
struct Producer {
    context: ModuleContext,
}

#[async_trait]
impl Module for Producer {
    fn context(&self) -> &ModuleContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut ModuleContext {
        &mut self.context
    }

    fn confirm_installation(&self) -> dockflow_core::Result<()> {
        Ok(())
    }

    async fn run_stage(&mut self) -> dockflow_core::Result<()> {
        let mut models = self.context.previous_io().retrieve_models();
        if models.is_empty() {
            let count = self.context.params().usize_param("count")?;
            models = (1..=count)
                .map(|i| Artifact::new(format!("model_{}.pdb", i), self.context.path(), i as f64))
                .collect();
        } else {
            let offset = self.context.params().f64_param("offset")?;
            for model in &mut models {
                model.score += offset;
            }
        }

        let mut io = ModuleIo::new();
        io.add(models, IoTag::Output);
        io.save(self.context.path())?;
        Ok(())
    }
}

/// Always fails through `finish_with_error`.
struct Broken {
    context: ModuleContext,
}

#[async_trait]
impl Module for Broken {
    fn context(&self) -> &ModuleContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut ModuleContext {
        &mut self.context
    }

    fn confirm_installation(&self) -> dockflow_core::Result<()> {
        Ok(())
    }

    async fn run_stage(&mut self) -> dockflow_core::Result<()> {
        Err(self.context.finish_with_error("cannot continue"))
    }
}

/// Installation check always fails.
struct Uninstalled {
    context: ModuleContext,
}

#[async_trait]
impl Module for Uninstalled {
    fn context(&self) -> &ModuleContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut ModuleContext {
        &mut self.context
    }

    fn confirm_installation(&self) -> dockflow_core::Result<()> {
        Err(ModuleError::Installation {
            module: "uninstalled".to_string(),
            message: "Required /opt/tool file does not exist.".to_string(),
        })
    }

    async fn run_stage(&mut self) -> dockflow_core::Result<()> {
        panic!("must never run");
    }
}

struct TestFactory;

impl ModuleFactory for TestFactory {
    fn build(&self, module: &str, order: usize, path: &Path) -> dockflow_core::Result<Box<dyn Module>> {
        let defaults = params_from_value(json!({"count": 3, "offset": 0.5})).unwrap();
        let context = ModuleContext::new(module, order, path, InitialParams::Map(defaults))?;
        match module {
            "producer" => Ok(Box::new(Producer { context })),
            "broken" => Ok(Box::new(Broken { context })),
            "uninstalled" => Ok(Box::new(Uninstalled { context })),
            other => Err(ModuleError::Config(format!("unknown module {}", other))),
        }
    }
}

fn stage(module: &str, overrides: serde_json::Value) -> StageSpec {
    StageSpec {
        module: module.to_string(),
        overrides: params_from_value(overrides).unwrap(),
    }
}

#[tokio::test]
async fn test_run_resolves_params_and_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let folder = dir.path().join("00_producer");
    std::fs::create_dir_all(&folder).unwrap();

    let mut module = TestFactory.build("producer", 0, &folder).unwrap();
    let overrides = params_from_value(json!({"count": 5, "ncores": 2})).unwrap();
    module.run(&overrides).await.unwrap();

    assert_eq!(module.context().state(), ModuleState::Finished);
    assert_eq!(module.context().params().get("ncores"), Some(&json!(2)));
    assert_eq!(module.context().params().get("mode"), Some(&json!("local")));

    let io = ModuleIo::load(&folder.join(MODULE_IO_FILE)).unwrap();
    assert_eq!(io.retrieve_models().len(), 5);
}

#[tokio::test]
async fn test_pipeline_hands_registry_to_next_stage() {
    let dir = tempfile::tempdir().unwrap();
    let workflow = Workflow {
        run_dir: dir.path().join("run1"),
        start_order: 0,
        general: params_from_value(json!({"ncores": 1, "run_dir": "ignored"})).unwrap(),
        stages: vec![stage("producer", json!({"count": 4})), stage("producer", json!({"offset": 10.0}))],
    };

    let result = Pipeline::run(&TestFactory, &workflow).await.unwrap();
    assert_eq!(result.stages.len(), 2);
    assert_eq!(result.stages[1].folder, dir.path().join("run1/01_producer"));

    let io = ModuleIo::load(&dir.path().join("run1/01_producer").join(MODULE_IO_FILE)).unwrap();
    let scores: Vec<f64> = io.retrieve_models().iter().map(|m| m.score).collect();
    assert_eq!(scores, vec![11.0, 12.0, 13.0, 14.0]);
}

#[tokio::test]
async fn test_fatal_stage_stops_downstream_stages() {
    let dir = tempfile::tempdir().unwrap();
    let workflow = Workflow {
        run_dir: dir.path().join("run1"),
        start_order: 0,
        general: Params::new(),
        stages: vec![
            stage("producer", json!({})),
            stage("broken", json!({})),
            stage("producer", json!({})),
        ],
    };

    let err = Pipeline::run(&TestFactory, &workflow).await.unwrap_err();
    assert!(matches!(err, ModuleError::Fatal { .. }));
    assert_eq!(err.to_string(), "[broken] cannot continue");
    assert!(!dir.path().join("run1/01_broken").join(MODULE_IO_FILE).exists());
    assert!(!dir.path().join("run1/02_producer").exists());
}

#[tokio::test]
async fn test_installation_failure_aborts_before_running() {
    let dir = tempfile::tempdir().unwrap();
    let workflow = Workflow {
        run_dir: dir.path().join("run1"),
        start_order: 3,
        general: Params::new(),
        stages: vec![stage("uninstalled", json!({}))],
    };

    let err = Pipeline::run(&TestFactory, &workflow).await.unwrap_err();
    assert!(matches!(err, ModuleError::Installation { .. }));
    assert!(dir.path().join("run1/03_uninstalled").is_dir());
}
