//! The lift stage: asks the backend to turn each subject's best litmus file
//! into a recipe per target architecture.

use crate::config::QuantitySet;
use crate::pathset::ScratchPathset;
use anyhow::Context;
use chrono::Utc;
use lithunt_core::builder::{par_build, BuildObserver, Manifest, Request};
use lithunt_core::cancel::CancelToken;
use lithunt_core::plan::{Plan, Stage};
use litmus_wrapper::backend::{Backend, LiftJob, LiftTarget, CAN_LIFT_LITMUS, CAN_PRODUCE_EXE};
use litmus_wrapper::run::CmdRunner;
use std::sync::Arc;

pub struct LiftStage {
    pub backend: Arc<dyn Backend>,
    pub runner: CmdRunner,
    pub paths: ScratchPathset,
    pub quantities: QuantitySet,
    pub observers: Vec<Arc<dyn BuildObserver>>,
}

impl LiftStage {
    pub fn run(&self, cancel: &CancelToken, plan: Plan) -> anyhow::Result<Plan> {
        let start = Utc::now();
        plan.check()?;
        plan.metadata.require_stage(Stage::Fuzz)?;

        if !self.backend.has_capability(CAN_LIFT_LITMUS) {
            anyhow::bail!("backend cannot lift litmus tests");
        }
        let target = if self.backend.has_capability(CAN_PRODUCE_EXE) {
            LiftTarget::ExeRecipe
        } else {
            LiftTarget::Standalone
        };

        let arches = plan.arches();
        if arches.is_empty() {
            anyhow::bail!("no target architectures in compiler set");
        }

        let nreqs = plan.corpus.len() * arches.len();
        let jobs = plan.corpus.named();
        log::info!("lifting {} subjects for {:?}", plan.corpus.len(), arches);

        let lifted = par_build::<anyhow::Error, _>(
            cancel,
            self.quantities.nworkers,
            &plan.corpus,
            jobs,
            Manifest::new("lift", nreqs),
            &self.observers,
            |tx, job| {
                // Arches go serially within a subject; parallelising here
                // once exhausted the open-file limit.
                for arch in &arches {
                    let dir = self.paths.lift_dir(arch, &job.name);
                    std::fs::create_dir_all(&dir)
                        .with_context(|| format!("creating lift dir {}", dir.display()))?;
                    let recipe = self
                        .backend
                        .lift(
                            tx.cancel_token(),
                            &LiftJob {
                                arch: arch.clone(),
                                input: job.subject.best_litmus().to_path_buf(),
                                out_dir: dir,
                                target,
                            },
                            &self.runner,
                        )
                        .with_context(|| {
                            format!("lifting {} for arch {}", job.name, arch)
                        })?;
                    tx.send(Request::lift(&job.name, arch.clone(), recipe))?;
                }
                Ok(())
            },
        )?;

        let mut plan = plan;
        plan.corpus = lifted;
        plan.metadata.record_stage(Stage::Lift, start, Utc::now())?;
        Ok(plan)
    }
}
