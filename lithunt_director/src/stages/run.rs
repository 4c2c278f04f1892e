//! The run stage: executes each compiled binary under the run timeout and
//! classifies the parsed observations.

use crate::config::QuantitySet;
use anyhow::Context;
use chrono::Utc;
use lithunt_core::builder::{par_build, BuildObserver, Manifest, Request};
use lithunt_core::cancel::CancelToken;
use lithunt_core::plan::{Plan, Stage};
use lithunt_core::status::Status;
use lithunt_core::subject::{Named, ProcResult, RunResult};
use litmus_wrapper::backend::Backend;
use litmus_wrapper::run::{CmdRunner, RunInfo, Runner};
use std::sync::Arc;
use std::time::Duration;

pub struct RunStage {
    pub backend: Arc<dyn Backend>,
    pub runner: CmdRunner,
    pub quantities: QuantitySet,
    /// Subjects matching this pattern are recorded Filtered, not run.
    pub subject_filter: Option<glob::Pattern>,
    pub observers: Vec<Arc<dyn BuildObserver>>,
}

impl RunStage {
    pub fn run(&self, cancel: &CancelToken, plan: Plan) -> anyhow::Result<Plan> {
        let start = Utc::now();
        plan.check()?;
        plan.metadata.require_stage(Stage::Compile)?;

        let compiler_ids = plan.compiler_ids();
        let nreqs = plan.num_compile_jobs();
        let jobs = plan.corpus.named();
        log::info!("running {} subjects", plan.corpus.len());

        let ran = par_build::<anyhow::Error, _>(
            cancel,
            self.quantities.nworkers,
            &plan.corpus,
            jobs,
            Manifest::new("run", nreqs),
            &self.observers,
            |tx, job| {
                for cid in &compiler_ids {
                    let res = self
                        .run_one(tx.cancel_token(), job, cid)
                        .with_context(|| format!("running {} ({})", job.name, cid))?;
                    tx.send(Request::run(&job.name, cid.clone(), res))?;
                }
                Ok(())
            },
        )?;

        let mut plan = plan;
        plan.corpus = ran;
        plan.metadata.record_stage(Stage::Run, start, Utc::now())?;
        Ok(plan)
    }

    fn run_one(
        &self,
        cancel: &CancelToken,
        job: &Named,
        cid: &str,
    ) -> anyhow::Result<RunResult> {
        if let Some(filter) = &self.subject_filter {
            if filter.matches(&job.name) {
                return Ok(filtered_result());
            }
        }

        let compile = job
            .subject
            .compiles
            .get(cid)
            .with_context(|| format!("no compile result for {}", cid))?;
        // Nothing runnable came out of compilation; the compile status
        // already tells the story.
        if compile.result.status != Status::Ok {
            return Ok(filtered_result());
        }
        let bin = compile
            .bin
            .as_ref()
            .with_context(|| format!("compile Ok but no binary for {}", cid))?;

        let out = self
            .runner
            .run(cancel, &RunInfo::new(bin.display().to_string()))?;
        let duration = out.duration;

        let (status, obs) = if out.timed_out {
            (Status::RunTimeout, None)
        } else if out.code != Some(0) {
            (Status::RunFail, None)
        } else {
            match self.backend.parse_obs(&mut out.stdout.as_slice()) {
                Ok(obs) => (obs.status(), Some(obs)),
                Err(e) => {
                    log::warn!("unparseable observation from {}: {}", job.name, e);
                    (Status::RunFail, None)
                }
            }
        };
        Ok(RunResult {
            result: ProcResult { status, duration },
            obs,
        })
    }
}

fn filtered_result() -> RunResult {
    RunResult {
        result: ProcResult {
            status: Status::Filtered,
            duration: Duration::ZERO,
        },
        obs: None,
    }
}
