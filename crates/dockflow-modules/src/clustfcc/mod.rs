//! FCC clustering stage.
//!
//! Computes the residue contacts of every model of the previous stage, groups
//! models sharing enough contacts and ranks the resulting clusters by the mean
//! score of their best members.
//!
//! Stage folder content after a successful run:
//!
//! - `<model>.con`: contacts of each model
//! - `fcc.matrix`: pairwise similarity
//! - `cluster.out`, `clustfcc.txt`: cluster listing and human summary
//! - `io.json`: clustered models in rank order, then the unclustered ones

pub mod fcc;

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dockflow_core::cfg_text::py_repr;
use dockflow_core::{
    confirm_executable, flatten_schema, parse_schema, Artifact, InitialParams, IoTag, Module,
    ModuleContext, ModuleIo, Params, ParamsExt, Result, MODULE_IO_FILE,
};
use dockflow_sched::{get_engine, swap_extension, Job};
use tracing::{info, warn};

use self::fcc::Cluster;

/// Module name, also the suffix of its stage folder.
pub const NAME: &str = "clustfcc";

/// Default parameter schema.
pub const DEFAULTS: &str = include_str!("defaults.yaml");

/// Environment variable naming the folder of the FCC programs.
pub const FCC_PATH_ENV: &str = "FCC_PATH";

pub const MATRIX_FILE: &str = "fcc.matrix";
pub const CLUSTER_FILE: &str = "cluster.out";
pub const SUMMARY_FILE: &str = "clustfcc.txt";

/// Number of best-scored members averaged to rank a cluster.
pub const TOP_N: usize = 4;

const RULE: &str = "-----------------------------------------------";

/// Default schema, unflattened.
pub fn default_schema() -> Result<Params> {
    parse_schema(DEFAULTS, "clustfcc/defaults.yaml")
}

/// Full path of the contact program.
///
/// `fcc_path` when set, else `$FCC_PATH`, else the current folder.
pub fn contact_executable(params: &Params) -> Result<PathBuf> {
    let executable = params.str_param("executable")?;
    let folder = match params.opt_str_param("fcc_path")? {
        Some(folder) if !folder.is_empty() => PathBuf::from(folder),
        _ => match std::env::var_os(FCC_PATH_ENV) {
            Some(folder) if !folder.is_empty() => PathBuf::from(folder),
            _ => PathBuf::from("."),
        },
    };
    Ok(folder.join(executable))
}

/// A cluster with its position in the ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCluster {
    pub id: usize,
    /// 1-based, best first.
    pub rank: usize,
    /// Mean of the best `min(TOP_N, n)` scores.
    pub top_score: f64,
    /// Zero-based model indexes, best score first.
    pub members: Vec<usize>,
}

/// Rank clusters by the mean of their best scores, ascending.
///
/// Members are ordered by ascending score; equal scores, and clusters with
/// equal means, keep their incoming order.
pub fn rank_clusters(clusters: &[Cluster], scores: &[f64]) -> Vec<RankedCluster> {
    let mut ranked: Vec<RankedCluster> = clusters
        .iter()
        .map(|cluster| {
            let mut members: Vec<usize> = cluster
                .members
                .iter()
                .filter_map(|id| id.checked_sub(1))
                .filter(|index| *index < scores.len())
                .collect();
            members.sort_by(|a, b| scores[*a].total_cmp(&scores[*b]));

            let top: Vec<f64> = members.iter().take(TOP_N).map(|i| scores[*i]).collect();
            let top_score = if top.is_empty() {
                f64::INFINITY
            } else {
                top.iter().sum::<f64>() / top.len() as f64
            };

            RankedCluster {
                id: cluster.id,
                rank: 0,
                top_score,
                members,
            }
        })
        .collect();

    ranked.sort_by(|a, b| a.top_score.total_cmp(&b.top_score));
    for (position, cluster) in ranked.iter_mut().enumerate() {
        cluster.rank = position + 1;
    }
    ranked
}

/// Registry order: clustered models by cluster rank then member rank,
/// followed by the unclustered ones in their original order.
pub fn annotate_models(models: &[Artifact], ranked: &[RankedCluster]) -> Vec<Artifact> {
    let mut clustered = vec![false; models.len()];
    let mut output = Vec::with_capacity(models.len());

    for cluster in ranked {
        for (position, index) in cluster.members.iter().enumerate() {
            let mut model = models[*index].clone();
            model.clt_id = Some(cluster.id);
            model.clt_rank = Some(cluster.rank);
            model.clt_model_rank = Some(position + 1);
            clustered[*index] = true;
            output.push(model);
        }
    }

    for (model, done) in models.iter().zip(clustered) {
        if !done {
            let mut model = model.clone();
            model.clear_cluster();
            output.push(model);
        }
    }
    output
}

/// Clustering parameters echoed in the summary.
#[derive(Debug, Clone)]
struct SummaryParams {
    contact_distance_cutoff: String,
    fraction_cutoff: String,
    threshold: String,
    strictness: String,
}

impl SummaryParams {
    fn from_params(params: &Params) -> Self {
        let show = |name: &str| params.get(name).map(py_repr).unwrap_or_default();
        Self {
            contact_distance_cutoff: show("contact_distance_cutoff"),
            fraction_cutoff: show("fraction_cutoff"),
            threshold: show("threshold"),
            strictness: show("strictness"),
        }
    }
}

fn render_summary(params: &SummaryParams, ranked: &[RankedCluster], models: &[Artifact]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "### clustfcc output ###");
    let _ = writeln!(out);
    let _ = writeln!(out, "Clustering parameters ");
    let _ = writeln!(out, "> contact_distance_cutoff={}A", params.contact_distance_cutoff);
    let _ = writeln!(out, "> fraction_cutoff={}", params.fraction_cutoff);
    let _ = writeln!(out, "> threshold={}", params.threshold);
    let _ = writeln!(out, "> strictness={}", params.strictness);
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out);
    let _ = writeln!(out, "Total # of clusters: {}", ranked.len());

    for cluster in ranked {
        let _ = writeln!(out);
        let _ = writeln!(out, "{}", RULE);
        let _ = writeln!(
            out,
            "Cluster {} (#{}, n={}, top{}_avg_score = {:.2})",
            cluster.rank,
            cluster.id,
            cluster.members.len(),
            TOP_N,
            cluster.top_score
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "clt_rank\tmodel_name\tscore");
        for (position, index) in cluster.members.iter().enumerate() {
            let model = &models[*index];
            let _ = writeln!(out, "{}\t{}\t{:.2}", position + 1, model.file_name, model.score);
        }
    }
    let _ = writeln!(out, "{}", RULE);
    out
}

/// The FCC clustering stage.
pub struct Clustfcc {
    context: ModuleContext,
}

impl Clustfcc {
    /// Stage at `path` with the shipped defaults.
    pub fn new(order: usize, path: impl Into<PathBuf>) -> Result<Self> {
        let defaults = flatten_schema(&default_schema()?);
        Self::with_params(order, path, InitialParams::Map(defaults))
    }

    pub fn with_params(
        order: usize,
        path: impl Into<PathBuf>,
        initial: InitialParams,
    ) -> Result<Self> {
        Ok(Self {
            context: ModuleContext::new(NAME, order, path, initial)?,
        })
    }

    fn contact_jobs(&self, models: &[Artifact]) -> Result<Vec<Job>> {
        let params = self.context.params();
        let executable = contact_executable(params)?;
        let cutoff = params.require("contact_distance_cutoff")?;
        let cutoff = match cutoff {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        let stage = self.context.path();
        Ok(models
            .iter()
            .map(|model| {
                Job::new(
                    stage.join(&model.rel_path),
                    swap_extension(&stage.join(&model.file_name), "con"),
                    &executable,
                    vec![cutoff.clone()],
                )
                .input_first()
            })
            .collect())
    }

    fn save_registry(&self, models: &[Artifact], output: Vec<Artifact>) -> Result<PathBuf> {
        let mut io = ModuleIo::new();
        io.add(models.iter().cloned(), IoTag::Input);
        io.add(output, IoTag::Output);
        io.save(self.context.path())
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[async_trait]
impl Module for Clustfcc {
    fn context(&self) -> &ModuleContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut ModuleContext {
        &mut self.context
    }

    fn confirm_installation(&self) -> Result<()> {
        let executable = contact_executable(self.context.params())?;
        confirm_executable(NAME, &executable)
    }

    async fn run_stage(&mut self) -> Result<()> {
        let stage = self.context.path().to_path_buf();
        std::fs::create_dir_all(&stage)?;
        // a registry left by an earlier run must not outlive a failing one
        match std::fs::remove_file(stage.join(MODULE_IO_FILE)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }

        let models = self.context.previous_io().retrieve_models();
        if models.is_empty() {
            warn!(module = NAME, "No models to cluster, no clusters were found");
            self.save_registry(&models, Vec::new())?;
            return Ok(());
        }

        info!(module = NAME, models = models.len(), "Calculating contacts");
        let jobs = self.contact_jobs(&models)?;
        let mode = self.context.params().opt_str_param("mode")?.unwrap_or("local");
        let engine = get_engine(mode, self.context.params())?;
        let report = engine.run(&jobs).await?;

        let missing: Vec<String> = report.missing().map(|o| file_name_of(&o.input)).collect();
        if !missing.is_empty() {
            for name in &missing {
                warn!(module = NAME, model = %name, "Contact was not calculated for {}", name);
            }
            return Err(self.context.finish_with_error(format!(
                "Several files were not generated: {:?}",
                missing
            )));
        }

        info!(module = NAME, "Calculating the FCC matrix");
        let contact_files: Vec<&Path> = report.outcomes.iter().map(|o| o.output.as_path()).collect();
        let contacts = fcc::parse_contact_files(&contact_files)?;
        let matrix = fcc::calculate_pairwise_matrix(&contacts);
        let matrix_file = stage.join(MATRIX_FILE);
        fcc::write_matrix(&matrix_file, &matrix)?;

        info!(module = NAME, "Clustering...");
        let params = self.context.params();
        let pool = fcc::read_matrix_file(
            &matrix_file,
            params.f64_param("fraction_cutoff")?,
            params.f64_param("strictness")?,
        )?;
        let (clusters, _) = fcc::cluster_elements(pool, params.usize_param("threshold")?);

        let output = if clusters.is_empty() {
            warn!(module = NAME, "No clusters were found");
            models.clone()
        } else {
            info!(module = NAME, "Saving output to {}", CLUSTER_FILE);
            std::fs::write(stage.join(CLUSTER_FILE), fcc::format_clusters(&clusters))?;

            let scores: Vec<f64> = models.iter().map(|m| m.score).collect();
            let ranked = rank_clusters(&clusters, &scores);

            info!(module = NAME, "Saving detailed output to {}", SUMMARY_FILE);
            let summary = render_summary(&SummaryParams::from_params(params), &ranked, &models);
            std::fs::write(stage.join(SUMMARY_FILE), summary)?;

            let clustered: usize = ranked.iter().map(|c| c.members.len()).sum();
            info!(
                module = NAME,
                clusters = ranked.len(),
                unclustered = models.len() - clustered,
                "Clustering finished"
            );
            annotate_models(&models, &ranked)
        };

        self.save_registry(&models, output)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cluster(id: usize, members: &[usize]) -> Cluster {
        Cluster {
            id,
            center: members[0],
            members: members.to_vec(),
        }
    }

    fn models(scores: &[f64]) -> Vec<Artifact> {
        scores
            .iter()
            .enumerate()
            .map(|(i, s)| Artifact::new(format!("model_{}.pdb", i + 1), "/run/00_topoaa", *s))
            .collect()
    }

    #[test]
    fn test_defaults_flatten() {
        let defaults = flatten_schema(&default_schema().unwrap());
        assert_eq!(defaults.get("executable"), Some(&json!("contact_fcc")));
        assert_eq!(defaults.get("contact_distance_cutoff"), Some(&json!(5.0)));
        assert_eq!(defaults.get("fraction_cutoff"), Some(&json!(0.6)));
        assert_eq!(defaults.get("threshold"), Some(&json!(4)));
        assert_eq!(defaults.get("strictness"), Some(&json!(0.75)));
    }

    #[test]
    fn test_contact_executable_prefers_parameter() {
        let params: Params = serde_json::from_value(json!({
            "executable": "contact_fcc",
            "fcc_path": "/opt/fcc/bin",
        }))
        .unwrap();
        assert_eq!(
            contact_executable(&params).unwrap(),
            PathBuf::from("/opt/fcc/bin/contact_fcc")
        );
    }

    #[test]
    fn test_rank_uses_mean_of_best_four() {
        // cluster 1: best four 1,2,3,10 -> 4.0; cluster 2: 2.5, 3.5 -> 3.0
        let scores = [10.0, 1.0, 2.0, 3.0, 50.0, 2.5, 3.5];
        let clusters = vec![cluster(1, &[1, 2, 3, 4, 5]), cluster(2, &[6, 7])];

        let ranked = rank_clusters(&clusters, &scores);
        assert_eq!(ranked[0].id, 2);
        assert_eq!(ranked[0].rank, 1);
        assert!((ranked[0].top_score - 3.0).abs() < 1e-9);
        assert_eq!(ranked[1].id, 1);
        assert!((ranked[1].top_score - 4.0).abs() < 1e-9);
        assert_eq!(ranked[1].members, vec![1, 2, 3, 0, 4]);
    }

    #[test]
    fn test_rank_ties_keep_cluster_order() {
        let scores = [1.0, 1.0, 1.0, 1.0];
        let clusters = vec![cluster(1, &[1, 2]), cluster(2, &[3, 4])];
        let ranked = rank_clusters(&clusters, &scores);
        let ids: Vec<_> = ranked.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(ranked[0].members, vec![0, 1]);
    }

    #[test]
    fn test_annotate_orders_clustered_then_unclustered() {
        let models = models(&[5.0, 1.0, 3.0, 4.0, 2.0]);
        let clusters = vec![cluster(1, &[1, 3]), cluster(2, &[2, 5])];
        let ranked = rank_clusters(&clusters, &models.iter().map(|m| m.score).collect::<Vec<_>>());

        let output = annotate_models(&models, &ranked);
        let names: Vec<_> = output.iter().map(|m| m.file_name.as_str()).collect();
        assert_eq!(
            names,
            ["model_2.pdb", "model_5.pdb", "model_3.pdb", "model_1.pdb", "model_4.pdb"]
        );
        assert_eq!(output[0].clt_id, Some(2));
        assert_eq!(output[0].clt_rank, Some(1));
        assert_eq!(output[1].clt_model_rank, Some(2));
        assert_eq!(output[2].clt_rank, Some(2));
        assert!(!output[4].is_clustered());
    }

    #[test]
    fn test_summary_layout() {
        let models = models(&[1.0, 2.0]);
        let ranked = rank_clusters(&[cluster(1, &[2, 1])], &[1.0, 2.0]);
        let params: Params = serde_json::from_value(json!({
            "contact_distance_cutoff": 5.0,
            "fraction_cutoff": 0.6,
            "threshold": 2,
            "strictness": 0.75,
        }))
        .unwrap();

        let text = render_summary(&SummaryParams::from_params(&params), &ranked, &models);
        assert!(text.starts_with("### clustfcc output ###\n"));
        assert!(text.contains("> contact_distance_cutoff=5.0A\n"));
        assert!(text.contains("> threshold=2\n"));
        assert!(text.contains("Total # of clusters: 1\n"));
        assert!(text.contains("Cluster 1 (#1, n=2, top4_avg_score = 1.50)\n"));
        assert!(text.contains("1\tmodel_1.pdb\t1.00\n2\tmodel_2.pdb\t2.00\n"));
    }
}
