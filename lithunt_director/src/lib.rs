//! lithunt: a concurrency-bug hunter for C11 litmus tests.
//!
//! One machine instance loops forever over a seven-stage pipeline
//! (plan, fuzz, lift, compile, run, analyse, save), mutating a litmus
//! corpus through an external fuzzer, lifting the mutants into compilable
//! harnesses, running them under a set of compilers, and archiving
//! anything interesting.

pub mod config;
pub mod instance;
pub mod observer;
pub mod pathset;
pub mod save;
pub mod stages;

use crate::config::{Config, MachineFile};
use crate::instance::Instance;
use crate::observer::ObserverSet;
use crate::pathset::Pathset;
use crate::save::{Save, SavePolicy};
use crate::stages::{analyse, compile, fuzz, lift, planner, run, StageSet};
use anyhow::Context;
use lithunt_core::cancel::CancelToken;
use litmus_wrapper::backend::{self, Backend};
use litmus_wrapper::fuzzer::Fuzzer;
use litmus_wrapper::run::{CmdRunner, RunInfo};
use std::sync::Arc;

/// Builds and runs one machine instance from a checked config.
pub fn boot(mut config: Config) -> anyhow::Result<()> {
    config.check().context("config error")?;
    config.fixup();

    let machine = MachineFile::load(&config.machine_file)?;
    let backend_spec = machine.backend_spec();
    let backend: Arc<dyn Backend> =
        Arc::from(backend::resolve(&backend_spec).context("resolving backend")?);

    let paths = Pathset::new(&config.out_dir, &config.machine_id);
    let observers = ObserverSet::logging();
    let q = &config.quantities;

    let compiler_filter = config
        .compiler_filter
        .as_deref()
        .map(glob::Pattern::new)
        .transpose()?;
    let subject_filter = config
        .subject_filter
        .as_deref()
        .map(glob::Pattern::new)
        .transpose()?;

    let stages = StageSet {
        planner: planner::Planner {
            machine_id: config.machine_id.clone(),
            inputs: config.inputs.clone(),
            machine,
            compiler_filter,
            corpus_size: q.corpus_size,
            seed: config.seed,
        },
        fuzz: fuzz::FuzzStage {
            driver: Fuzzer::new(
                RunInfo::new(&config.fuzzer_bin),
                Box::new(CmdRunner::new(Some(q.fuzz_timeout), q.grace)),
            ),
            params: config.fuzz_params.clone(),
            paths: paths.scratch.clone(),
            quantities: q.clone(),
            observers: observers.build.clone(),
        },
        lift: lift::LiftStage {
            backend: backend.clone(),
            runner: CmdRunner::new(Some(q.lift_timeout), q.grace),
            paths: paths.scratch.clone(),
            quantities: q.clone(),
            observers: observers.build.clone(),
        },
        compile: compile::CompileStage {
            driver: compile::make_driver(q),
            paths: paths.scratch.clone(),
            quantities: q.clone(),
            subject_filter: subject_filter.clone(),
            observers: observers.build.clone(),
        },
        run: run::RunStage {
            backend,
            runner: CmdRunner::new(Some(q.run_timeout), q.grace),
            quantities: q.clone(),
            subject_filter,
            observers: observers.build.clone(),
        },
        analyse: analyse::AnalyseStage {
            quantities: q.clone(),
            observers: observers.instance.clone(),
        },
        save: Save {
            paths: paths.saved.clone(),
            policy: if config.save_flagged {
                SavePolicy::FlaggedAndBad
            } else {
                SavePolicy::BadOnly
            },
        },
    };

    let cancel = CancelToken::new();
    setup_signal_handler(cancel.clone());

    let inst = Instance {
        machine_id: config.machine_id.clone(),
        paths,
        stages,
        observers,
    };
    match inst.run(&cancel) {
        Err(e) if instance::is_cancelled(&e) => {
            log::info!("cancelled; shutting down cleanly");
            Ok(())
        }
        other => other,
    }
}

/// Translates TERM-ish signals into the instance's cancellation token. The
/// loop finishes its current stage and stops at the next pass boundary.
fn setup_signal_handler(cancel: CancelToken) {
    use signal_hook::consts::TERM_SIGNALS;
    use signal_hook::iterator::Signals;

    std::thread::spawn(move || {
        let mut signals = match Signals::new(TERM_SIGNALS) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("failed to install signal handler: {}", e);
                return;
            }
        };
        if let Some(sig) = signals.forever().next() {
            log::info!("signal {} received, stopping after this stage", sig);
            cancel.cancel();
        }
    });
}
