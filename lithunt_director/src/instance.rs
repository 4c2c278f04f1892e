//! The machine-instance loop: run passes forever, tolerate transient
//! failures, stop on cancellation or a failure streak.

use crate::observer::ObserverSet;
use crate::pathset::Pathset;
use crate::stages::StageSet;
use anyhow::Context;
use chrono::Utc;
use lithunt_core::cancel::{CancelToken, Cancelled};
use lithunt_core::plan::{Plan, Stage};

/// How many consecutive failed passes the instance tolerates before it
/// gives up. Transient faults (a crashing compiler, a flaky simulator)
/// should not stop a campaign; a machine that fails every pass should.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;

pub struct Instance {
    pub machine_id: String,
    pub paths: Pathset,
    pub stages: StageSet,
    pub observers: ObserverSet,
}

impl Instance {
    /// Runs the testing loop until cancellation or a failure streak.
    pub fn run(&self, cancel: &CancelToken) -> anyhow::Result<()> {
        log::info!("[{}] preparing scratch directories", self.machine_id);
        self.paths
            .scratch
            .prepare()
            .context("preparing scratch directories")?;

        log::info!("[{}] starting loop", self.machine_id);
        self.main_loop(cancel)
    }

    fn main_loop(&self, cancel: &CancelToken) -> anyhow::Result<()> {
        let mut iter: u64 = 0;
        let mut nerrors: u32 = 0;
        loop {
            match self.pass(cancel, iter) {
                Ok(()) => nerrors = 0,
                Err(e) => {
                    if is_cancelled(&e) {
                        return Err(e);
                    }
                    nerrors += 1;
                    if nerrors > MAX_CONSECUTIVE_ERRORS {
                        return Err(e.context("too many consecutive errors"));
                    }
                    log::error!("[{}] pass {} failed: {:#}", self.machine_id, iter, e);
                }
            }
            cancel.check()?;
            iter += 1;
        }
    }

    /// One full traversal of the stage order, threading the plan through
    /// and snapshotting it after every stage.
    fn pass(&self, cancel: &CancelToken, iter: u64) -> anyhow::Result<()> {
        // The previous pass's scratch is cleared here, never by the pass
        // that wrote it, so a failed pass stays inspectable.
        self.paths
            .scratch
            .cleanup()
            .context("cleaning scratch directories")?;

        let now = Utc::now();
        for o in &self.observers.instance {
            o.on_iteration(iter, now);
        }

        let mut plan: Option<Plan> = None;
        for stage in Stage::ALL {
            let next = self
                .stages
                .dispatch(cancel, stage, plan.take())
                .with_context(|| format!("in {} stage", stage))?;
            next.dump_file(&self.paths.scratch.plan_file(stage))
                .with_context(|| format!("when dumping after {} stage", stage))?;
            plan = Some(next);
        }
        Ok(())
    }
}

/// Whether this error chain bottoms out in a cancellation.
pub fn is_cancelled(e: &anyhow::Error) -> bool {
    e.chain()
        .any(|cause| cause.downcast_ref::<Cancelled>().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendTable, CompilerTable, MachineFile, QuantitySet};
    use crate::save::{Save, SavePolicy};
    use crate::stages::{analyse, compile, fuzz, lift, planner, run};
    use litmus_wrapper::backend;
    use litmus_wrapper::fuzzer::{FuzzParams, Fuzzer};
    use litmus_wrapper::run::{CmdRunner, RunInfo};
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::Arc;

    #[test]
    fn cancellation_detected_through_context() {
        let base: anyhow::Error = Cancelled.into();
        let wrapped = base.context("in fuzz stage").context("pass 3 failed");
        assert!(is_cancelled(&wrapped));
        assert!(!is_cancelled(&anyhow::anyhow!("compiler exploded")));
    }

    fn machine_file() -> MachineFile {
        let mut compilers = BTreeMap::new();
        compilers.insert(
            "cc0".to_string(),
            CompilerTable {
                cmd: "cc".to_string(),
                args: Vec::new(),
                arch: "x86_64".to_string(),
            },
        );
        MachineFile {
            cores: Some(2),
            backend: BackendTable {
                style: "litmus".to_string(),
                cmd: None,
                args: Vec::new(),
            },
            compilers,
        }
    }

    /// A fully wired instance whose plan stage sees no input files, so
    /// every pass fails fast.
    fn empty_input_instance(tmp: &Path) -> Instance {
        let machine = machine_file();
        let backend: Arc<dyn backend::Backend> =
            Arc::from(backend::resolve(&machine.backend_spec()).unwrap());
        let paths = Pathset::new(tmp, "testbox");
        let q = QuantitySet {
            nworkers: 1,
            ..QuantitySet::default()
        };
        let stages = StageSet {
            planner: planner::Planner {
                machine_id: "testbox".to_string(),
                inputs: Vec::new(),
                machine,
                compiler_filter: None,
                corpus_size: 0,
                seed: Some(1),
            },
            fuzz: fuzz::FuzzStage {
                driver: Fuzzer::new(RunInfo::new("false"), Box::new(CmdRunner::default())),
                params: FuzzParams::new(),
                paths: paths.scratch.clone(),
                quantities: q.clone(),
                observers: Vec::new(),
            },
            lift: lift::LiftStage {
                backend: backend.clone(),
                runner: CmdRunner::default(),
                paths: paths.scratch.clone(),
                quantities: q.clone(),
                observers: Vec::new(),
            },
            compile: compile::CompileStage {
                driver: compile::make_driver(&q),
                paths: paths.scratch.clone(),
                quantities: q.clone(),
                subject_filter: None,
                observers: Vec::new(),
            },
            run: run::RunStage {
                backend,
                runner: CmdRunner::default(),
                quantities: q.clone(),
                subject_filter: None,
                observers: Vec::new(),
            },
            analyse: analyse::AnalyseStage {
                quantities: q,
                observers: Vec::new(),
            },
            save: Save {
                paths: paths.saved.clone(),
                policy: SavePolicy::BadOnly,
            },
        };
        Instance {
            machine_id: "testbox".to_string(),
            paths,
            stages,
            observers: ObserverSet::default(),
        }
    }

    #[test]
    fn failure_streak_terminates_the_loop() {
        let tmp = tempfile::tempdir().unwrap();
        let inst = empty_input_instance(tmp.path());
        // Empty input list: the plan stage errors every pass until the
        // consecutive-error cap trips.
        let err = inst.run(&CancelToken::new()).unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("too many consecutive errors"), "got: {}", msg);
        assert!(msg.contains("no subjects in corpus"), "got: {}", msg);
    }

    #[test]
    fn pre_cancelled_instance_stops_with_cancellation() {
        let tmp = tempfile::tempdir().unwrap();
        let inst = empty_input_instance(tmp.path());
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = inst.run(&cancel).unwrap_err();
        assert!(is_cancelled(&err));
    }
}
