//! The fuzz stage: mutates every subject `subject_cycles` times through the
//! external fuzzer, then samples the result down to the corpus cap.

use crate::config::QuantitySet;
use crate::pathset::ScratchPathset;
use anyhow::Context;
use chrono::Utc;
use lithunt_core::builder::{par_build, BuildObserver, Manifest, Request};
use lithunt_core::cancel::CancelToken;
use lithunt_core::corpus::{Corpus, CorpusError};
use lithunt_core::plan::{Plan, Stage};
use lithunt_core::subject::{FuzzRecord, Subject};
use lithunt_core::{HashMap, RngType};
use litmus_wrapper::fuzzer::{FuzzJob, FuzzParams, Fuzzer};
use rand::{Rng, SeedableRng};
use std::fmt;
use std::sync::Arc;

/// A subject/cycle pair; its rendering names the fuzzed subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectCycle<'a> {
    pub name: &'a str,
    pub cycle: usize,
}

impl fmt::Display for SubjectCycle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.name, self.cycle)
    }
}

pub struct FuzzStage {
    pub driver: Fuzzer,
    pub params: FuzzParams,
    pub paths: ScratchPathset,
    pub quantities: QuantitySet,
    pub observers: Vec<Arc<dyn BuildObserver>>,
}

impl FuzzStage {
    pub fn run(&self, cancel: &CancelToken, plan: Plan) -> anyhow::Result<Plan> {
        let start = Utc::now();
        plan.check()?;
        plan.metadata.require_stage(Stage::Plan)?;
        self.check_count(&plan.corpus)?;

        let conf = litmus_wrapper::fuzzer::make_fuzz_conf_file(
            &self.paths.dir_fuzz,
            &self.params,
            Some(plan.machine.cores),
        )
        .context("writing fuzzer config")?;

        let mut rng = plan.metadata.rng();
        let seeds = corpus_seeds(&mut rng, &plan.corpus);

        let cycles = self.quantities.subject_cycles;
        let nreqs = plan.corpus.len() * cycles;
        let jobs = plan.corpus.named();
        log::info!("fuzzing {} inputs, {} cycles each", plan.corpus.len(), cycles);

        let fuzzed: Corpus = par_build::<anyhow::Error, _>(
            cancel,
            self.quantities.nworkers,
            &Corpus::new(),
            jobs,
            Manifest::new("fuzz", nreqs),
            &self.observers,
            |tx, job| {
                let seed = seeds.get(&job.name).copied().unwrap_or_default();
                let mut subrng = RngType::seed_from_u64(seed);
                for cycle in 0..cycles {
                    let sc = SubjectCycle {
                        name: &job.name,
                        cycle,
                    };
                    let cycled = sc.to_string();
                    let out = self.paths.fuzz_litmus(&cycled);
                    let trace = self.paths.fuzz_trace(&cycled);
                    self.driver
                        .fuzz_one(
                            tx.cancel_token(),
                            &FuzzJob {
                                seed: subrng.gen(),
                                input: job.subject.best_litmus(),
                                output: &out,
                                trace: Some(&trace),
                                config: &conf,
                            },
                        )
                        .with_context(|| format!("fuzzing {}", cycled))?;

                    let fuzzed = Subject {
                        source: job.subject.source.clone(),
                        fuzz: Some(FuzzRecord {
                            litmus: out,
                            trace: Some(trace),
                        }),
                        ..Subject::default()
                    };
                    tx.send(Request::add(cycled, fuzzed))?;
                }
                Ok(())
            },
        )?;

        // Sample the fuzzed corpus down with a fresh draw from the stage RNG.
        log::info!("sampling fuzzed corpus of {}", fuzzed.len());
        let sampled = fuzzed
            .sample(&mut rng, self.quantities.corpus_size)
            .context("sampling fuzzed corpus")?;

        let mut plan = plan;
        plan.corpus = sampled;
        plan.metadata.record_stage(Stage::Fuzz, start, Utc::now())?;
        Ok(plan)
    }

    /// Rejects plans whose projected fuzz output cannot reach the corpus
    /// cap.
    fn check_count(&self, corpus: &Corpus) -> anyhow::Result<()> {
        if corpus.is_empty() {
            return Err(CorpusError::None.into());
        }
        let projected = corpus.len() * self.quantities.subject_cycles;
        let want = self.quantities.corpus_size;
        if want > 0 && projected < want {
            return Err(CorpusError::Small {
                got: projected,
                want,
            }
            .into());
        }
        Ok(())
    }
}

fn corpus_seeds(rng: &mut RngType, corpus: &Corpus) -> HashMap<String, u64> {
    // Names are sorted, so the seed assignment is reproducible.
    corpus
        .names()
        .into_iter()
        .map(|n| (n, rng.gen()))
        .collect()
}
