//! The compile stage: drives the recipe interpreter for every
//! (subject × compiler) pair and classifies the outcomes.

use crate::config::QuantitySet;
use crate::pathset::ScratchPathset;
use anyhow::Context;
use chrono::Utc;
use lithunt_core::builder::{par_build, BuildObserver, Manifest, Request};
use lithunt_core::cancel::CancelToken;
use lithunt_core::plan::{Compiler, Plan, Stage};
use lithunt_core::recipe::OutputKind;
use lithunt_core::status::Status;
use lithunt_core::subject::{CompileResult, Named, ProcResult};
use litmus_wrapper::compiler::interpreter::{Interpreter, InterpreterError};
use litmus_wrapper::compiler::CompilerRunner;
use litmus_wrapper::run::CmdRunner;
use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct CompileStage {
    pub driver: CompilerRunner<CmdRunner>,
    pub paths: ScratchPathset,
    pub quantities: QuantitySet,
    /// Subjects matching this pattern are recorded Filtered, not compiled.
    pub subject_filter: Option<glob::Pattern>,
    pub observers: Vec<Arc<dyn BuildObserver>>,
}

impl CompileStage {
    pub fn run(&self, cancel: &CancelToken, plan: Plan) -> anyhow::Result<Plan> {
        let start = Utc::now();
        plan.check()?;
        plan.metadata.require_stage(Stage::Lift)?;

        let compiler_ids = plan.compiler_ids();
        let nreqs = plan.num_compile_jobs();
        let jobs = plan.corpus.named();
        log::info!(
            "compiling {} subjects under {} compilers",
            plan.corpus.len(),
            compiler_ids.len()
        );

        let compiled = par_build::<anyhow::Error, _>(
            cancel,
            self.quantities.nworkers,
            &plan.corpus,
            jobs,
            Manifest::new("compile", nreqs),
            &self.observers,
            |tx, job| {
                for cid in &compiler_ids {
                    let compiler = plan
                        .compilers
                        .get(cid)
                        .with_context(|| format!("unknown compiler {}", cid))?;
                    let res = self
                        .compile_one(tx.cancel_token(), job, cid, compiler)
                        .with_context(|| format!("compiling {} with {}", job.name, cid))?;
                    tx.send(Request::compile(&job.name, cid.clone(), res))?;
                }
                Ok(())
            },
        )?;

        let mut plan = plan;
        plan.corpus = compiled;
        plan.metadata.record_stage(Stage::Compile, start, Utc::now())?;
        Ok(plan)
    }

    fn compile_one(
        &self,
        cancel: &CancelToken,
        job: &Named,
        cid: &str,
        compiler: &Compiler,
    ) -> anyhow::Result<CompileResult> {
        let dir = self.paths.run_dir(cid, &job.name);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating run dir {}", dir.display()))?;
        let log_path = self.paths.compile_log(cid, &job.name);
        let mut log_file = File::create(&log_path)
            .with_context(|| format!("creating {}", log_path.display()))?;

        if let Some(filter) = &self.subject_filter {
            if filter.matches(&job.name) {
                writeln!(log_file, "filtered out by policy")?;
                return Ok(filtered_result(log_path));
            }
        }

        let Some(recipe) = job.subject.recipes.get(&compiler.arch) else {
            anyhow::bail!("no recipe for arch {}", compiler.arch);
        };
        if recipe.output != OutputKind::Executable {
            writeln!(log_file, "recipe does not produce an executable")?;
            return Ok(filtered_result(log_path));
        }

        let bin = self.paths.bin_path(cid, &job.name);
        let started = Instant::now();
        let mut interp = Interpreter::new(&self.driver, Some(compiler), recipe, bin.clone())?;
        let outcome = interp.interpret(cancel, &mut log_file);
        let duration = started.elapsed();

        let status = match outcome {
            Ok(()) => Status::Ok,
            Err(InterpreterError::Compile(e)) => match e.status() {
                Some(status) => status,
                None => return Err(e.into()),
            },
            Err(e) => return Err(e.into()),
        };
        Ok(CompileResult {
            result: ProcResult { status, duration },
            bin: (status == Status::Ok).then_some(bin),
            log: log_path,
        })
    }
}

fn filtered_result(log: std::path::PathBuf) -> CompileResult {
    CompileResult {
        result: ProcResult {
            status: Status::Filtered,
            duration: Duration::ZERO,
        },
        bin: None,
        log,
    }
}

/// A compile driver over the stage's compile timeout.
pub fn make_driver(q: &QuantitySet) -> CompilerRunner<CmdRunner> {
    CompilerRunner::new(CmdRunner::new(Some(q.compile_timeout), q.grace))
}
