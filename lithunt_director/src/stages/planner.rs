//! The plan stage: enumerates compilers, probes the machine, and seeds the
//! corpus from the input file list.

use crate::config::MachineFile;
use anyhow::Context;
use chrono::Utc;
use lithunt_core::cancel::CancelToken;
use lithunt_core::corpus::{Corpus, CorpusError};
use lithunt_core::plan::{Machine, Metadata, Plan, Stage};
use lithunt_core::subject::Subject;
use lithunt_core::HashMap;
use std::path::{Path, PathBuf};

pub struct Planner {
    pub machine_id: String,
    pub inputs: Vec<PathBuf>,
    pub machine: MachineFile,
    pub compiler_filter: Option<glob::Pattern>,
    /// Corpus cap applied at seeding time; zero means unlimited.
    pub corpus_size: usize,
    pub seed: Option<u64>,
}

impl Planner {
    pub fn run(&self, cancel: &CancelToken) -> anyhow::Result<Plan> {
        cancel.check()?;
        let start = Utc::now();

        let compilers = self.enumerate_compilers()?;
        let machine = self.probe_machine();
        let metadata = Metadata::new(self.seed);

        let corpus = self.seed_corpus()?;
        let mut rng = metadata.rng();
        let corpus = corpus
            .sample(&mut rng, self.corpus_size)
            .context("sampling seed corpus")?;
        log::info!(
            "planned: {} subjects, {} compilers on {}",
            corpus.len(),
            compilers.len(),
            machine.id
        );

        let mut plan = Plan {
            metadata,
            machine,
            backend: self.machine.backend_spec(),
            compilers,
            corpus,
        };
        plan.metadata.record_stage(Stage::Plan, start, Utc::now())?;
        Ok(plan)
    }

    fn enumerate_compilers(&self) -> anyhow::Result<HashMap<String, lithunt_core::plan::Compiler>> {
        let mut out = HashMap::default();
        for (id, compiler) in self.machine.compiler_set() {
            if let Some(filter) = &self.compiler_filter {
                if !filter.matches(&id) {
                    continue;
                }
            }
            out.insert(id, compiler);
        }
        if out.is_empty() {
            anyhow::bail!(
                "no compilers available on machine {} (filter: {:?})",
                self.machine_id,
                self.compiler_filter.as_ref().map(glob::Pattern::as_str)
            );
        }
        Ok(out)
    }

    fn probe_machine(&self) -> Machine {
        let cores = self.machine.cores.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1)
        });
        Machine {
            id: self.machine_id.clone(),
            cores,
        }
    }

    fn seed_corpus(&self) -> anyhow::Result<Corpus> {
        if self.inputs.is_empty() {
            return Err(CorpusError::None.into());
        }
        let mut corpus = Corpus::new();
        for path in &self.inputs {
            let name = subject_name(path)
                .with_context(|| format!("bad input file name: {}", path.display()))?;
            corpus
                .add(name, Subject::with_source(path.clone()))
                .context("seeding corpus")?;
        }
        Ok(corpus)
    }
}

/// Derives a subject name from an input path: the file stem.
fn subject_name(path: &Path) -> Option<String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
}
