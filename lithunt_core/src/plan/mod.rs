//! The plan: the single shared object flowing through the pipeline.
//!
//! A stage takes a plan by value and returns a new one; the instance loop
//! persists a snapshot between stages. The plan is a tree, which keeps the
//! JSON (de)serialisation straightforward.

pub mod metadata;
pub mod stage;

pub use metadata::{Metadata, PLAN_VERSION};
pub use stage::{Stage, StageRecord};

use crate::corpus::Corpus;
use crate::HashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("bad plan version: found {found}, tool wants {want}")]
    VersionMismatch { found: u32, want: u32 },
    #[error("stage {0} already completed in this plan")]
    DuplicateStage(Stage),
    #[error("prerequisite stage {0} missing from plan")]
    MissingStage(Stage),
    #[error("failed to read or write plan file: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad plan file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The machine a plan targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Machine {
    pub id: String,
    /// Probed core count, forwarded to the fuzzer's thread cap.
    pub cores: u32,
}

/// Which backend family lifts and simulates the litmus tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BackendSpec {
    /// Resolver style string, e.g. `litmus` or `herd`.
    pub style: String,
    /// Override for the backend command name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    /// Extra arguments prepended to every backend invocation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// One compiler configuration in the machine's compiler set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compiler {
    /// Command to invoke.
    pub cmd: String,
    /// Fixed arguments, typically the optimisation level.
    #[serde(default)]
    pub args: Vec<String>,
    /// Target architecture; selects the recipe to interpret.
    pub arch: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub metadata: Metadata,
    pub machine: Machine,
    pub backend: BackendSpec,
    pub compilers: HashMap<String, Compiler>,
    pub corpus: Corpus,
}

impl Plan {
    /// Sanity checks run at every stage entry.
    pub fn check(&self) -> Result<(), PlanError> {
        self.metadata.check_version()
    }

    /// Compiler IDs in sorted order, for deterministic fan-out.
    pub fn compiler_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.compilers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Distinct target architectures across the compiler set, sorted.
    pub fn arches(&self) -> Vec<String> {
        let mut arches: Vec<String> = self.compilers.values().map(|c| c.arch.clone()).collect();
        arches.sort();
        arches.dedup();
        arches
    }

    /// Expected number of (subject × compiler) jobs.
    pub fn num_compile_jobs(&self) -> usize {
        self.corpus.len() * self.compilers.len()
    }

    pub fn dump<W: Write>(&self, w: W) -> Result<(), PlanError> {
        serde_json::to_writer_pretty(w, self)?;
        Ok(())
    }

    /// Writes a snapshot to `path`: create, write, close, first error wins.
    pub fn dump_file(&self, path: &Path) -> Result<(), PlanError> {
        let f = File::create(path)?;
        let mut w = BufWriter::new(f);
        self.dump(&mut w)?;
        w.flush()?;
        Ok(())
    }

    pub fn load<R: Read>(r: R) -> Result<Plan, PlanError> {
        let plan: Plan = serde_json::from_reader(r)?;
        plan.check()?;
        Ok(plan)
    }

    pub fn load_file(path: &Path) -> Result<Plan, PlanError> {
        let f = File::open(path)?;
        Plan::load(BufReader::new(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subject::Subject;
    use std::path::PathBuf;

    fn small_plan() -> Plan {
        let mut corpus = Corpus::new();
        corpus
            .add(
                "SB".to_string(),
                Subject::with_source(PathBuf::from("SB.litmus")),
            )
            .unwrap();
        let mut compilers = HashMap::default();
        compilers.insert(
            "gcc".to_string(),
            Compiler {
                cmd: "gcc".to_string(),
                args: vec!["-O2".to_string()],
                arch: "x86_64".to_string(),
            },
        );
        Plan {
            metadata: Metadata::new(Some(7)),
            machine: Machine {
                id: "localhost".to_string(),
                cores: 4,
            },
            backend: BackendSpec {
                style: "litmus".to_string(),
                cmd: None,
                args: Vec::new(),
            },
            compilers,
            corpus,
        }
    }

    #[test]
    fn json_round_trip() {
        let p = small_plan();
        let mut buf = Vec::new();
        p.dump(&mut buf).unwrap();
        let back = Plan::load(&buf[..]).unwrap();
        assert_eq!(p, back);
    }

    #[test]
    fn load_rejects_other_versions() {
        let mut p = small_plan();
        p.metadata.version = 19990101;
        let mut buf = Vec::new();
        p.dump(&mut buf).unwrap();
        assert!(matches!(
            Plan::load(&buf[..]),
            Err(PlanError::VersionMismatch { found: 19990101, .. })
        ));
    }

    #[test]
    fn dump_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.plan.json");
        let p = small_plan();
        p.dump_file(&path).unwrap();
        let back = Plan::load_file(&path).unwrap();
        assert_eq!(p, back);
    }

    #[test]
    fn arches_deduped_and_sorted() {
        let mut p = small_plan();
        p.compilers.insert(
            "gcc-o3".to_string(),
            Compiler {
                cmd: "gcc".to_string(),
                args: vec!["-O3".to_string()],
                arch: "x86_64".to_string(),
            },
        );
        p.compilers.insert(
            "cc-arm".to_string(),
            Compiler {
                cmd: "cc".to_string(),
                args: Vec::new(),
                arch: "aarch64".to_string(),
            },
        );
        assert_eq!(p.arches(), vec!["aarch64", "x86_64"]);
        assert_eq!(p.num_compile_jobs(), 3);
    }
}
