//! Stage hand-off registry.
//!
//! Every stage folder holds one `io.json` listing the artifacts the stage
//! consumed and produced. Stage N reads stage N-1's file and overwrites its
//! own; artifact order is preserved on both sides.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// File name of the registry inside a stage folder.
pub const MODULE_IO_FILE: &str = "io.json";

/// A candidate structure handed between stages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    /// Bare file name, also used as the display name.
    pub file_name: String,

    /// Folder the file lives in.
    pub path: PathBuf,

    /// Path of the file relative to the consuming stage folder.
    pub rel_path: PathBuf,

    /// Lower is better.
    pub score: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restr_fname: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topology: Vec<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clt_id: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clt_rank: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clt_model_rank: Option<usize>,
}

impl Artifact {
    /// Artifact living in `path`, referenced from a sibling stage folder.
    pub fn new(file_name: impl Into<String>, path: impl Into<PathBuf>, score: f64) -> Self {
        let file_name = file_name.into();
        let path = path.into();
        let rel_path = match path.file_name() {
            Some(folder) => Path::new("..").join(folder).join(&file_name),
            None => PathBuf::from(&file_name),
        };
        Self {
            file_name,
            path,
            rel_path,
            score,
            md5: None,
            restr_fname: None,
            topology: Vec::new(),
            clt_id: None,
            clt_rank: None,
            clt_model_rank: None,
        }
    }

    /// Whether a clustering stage assigned this artifact to a cluster.
    pub fn is_clustered(&self) -> bool {
        self.clt_id.is_some()
    }

    /// Drop cluster attributes assigned by an earlier stage.
    pub fn clear_cluster(&mut self) {
        self.clt_id = None;
        self.clt_rank = None;
        self.clt_model_rank = None;
    }
}

/// Which side of the registry an `add` targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoTag {
    Input,
    Output,
}

/// Persisted registry of one stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModuleIo {
    #[serde(default)]
    pub input: Vec<Artifact>,
    #[serde(default)]
    pub output: Vec<Artifact>,
}

impl ModuleIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append artifacts to one side of the registry.
    pub fn add(&mut self, artifacts: impl IntoIterator<Item = Artifact>, tag: IoTag) {
        match tag {
            IoTag::Input => self.input.extend(artifacts),
            IoTag::Output => self.output.extend(artifacts),
        }
    }

    /// Models produced by the stage, in registry order.
    pub fn retrieve_models(&self) -> Vec<Artifact> {
        self.output.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty() && self.output.is_empty()
    }

    /// Write `<dir>/io.json`, replacing any previous file atomically.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let target = dir.join(MODULE_IO_FILE);
        let content = serde_json::to_string_pretty(self)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(&target).map_err(|e| e.error)?;
        Ok(target)
    }

    /// Load a registry file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models(n: usize) -> Vec<Artifact> {
        (1..=n)
            .map(|i| Artifact::new(format!("rigidbody_{}.pdb", i), "/run/01_rigidbody", i as f64))
            .collect()
    }

    #[test]
    fn test_new_artifact_rel_path_points_to_sibling_stage() {
        let artifact = Artifact::new("model_1.pdb", "/run/01_rigidbody", -12.5);
        assert_eq!(artifact.rel_path, PathBuf::from("../01_rigidbody/model_1.pdb"));
        assert!(!artifact.is_clustered());
    }

    #[test]
    fn test_add_respects_tag_and_order() {
        let mut io = ModuleIo::new();
        assert!(io.is_empty());
        io.add(models(3), IoTag::Output);
        io.add(models(1), IoTag::Input);

        let names: Vec<_> = io.retrieve_models().into_iter().map(|m| m.file_name).collect();
        assert_eq!(names, ["rigidbody_1.pdb", "rigidbody_2.pdb", "rigidbody_3.pdb"]);
        assert_eq!(io.input.len(), 1);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut io = ModuleIo::new();
        let mut clustered = models(4);
        clustered[1].clt_id = Some(2);
        clustered[1].clt_rank = Some(1);
        clustered[1].clt_model_rank = Some(1);
        io.add(clustered, IoTag::Output);

        let path = io.save(dir.path()).unwrap();
        assert_eq!(path, dir.path().join(MODULE_IO_FILE));

        let loaded = ModuleIo::load(&path).unwrap();
        assert_eq!(loaded, io);
        let second = &loaded.retrieve_models()[1];
        assert_eq!(second.rel_path, PathBuf::from("../01_rigidbody/rigidbody_2.pdb"));
        assert_eq!(second.score, 2.0);
        assert_eq!(second.clt_rank, Some(1));
    }

    #[test]
    fn test_save_overwrites_previous_registry() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = ModuleIo::new();
        first.add(models(5), IoTag::Output);
        first.save(dir.path()).unwrap();

        let mut second = ModuleIo::new();
        second.add(models(2), IoTag::Output);
        let path = second.save(dir.path()).unwrap();

        assert_eq!(ModuleIo::load(&path).unwrap().output.len(), 2);
    }

    #[test]
    fn test_unclustered_fields_are_not_serialized() {
        let artifact = Artifact::new("m.pdb", "/run/01_x", 1.0);
        let raw = serde_json::to_value(&artifact).unwrap();
        let obj = raw.as_object().unwrap();
        assert!(obj.contains_key("rel_path"));
        assert!(!obj.contains_key("clt_id"));
        assert!(!obj.contains_key("clt_rank"));
    }
}
