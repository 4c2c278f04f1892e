//! Compiler invocation: single compile jobs and the recipe interpreter
//! that sequences them.

pub mod interpreter;

use crate::run::{RunError, RunInfo, Runner};
use lithunt_core::cancel::CancelToken;
use lithunt_core::plan::Compiler;
use lithunt_core::status::Status;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Whether a single compile produces an object or an executable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileKind {
    Object,
    Executable,
}

/// One compiler invocation.
#[derive(Debug)]
pub struct CompileJob<'a> {
    pub compiler: &'a Compiler,
    pub kind: CompileKind,
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("compiler '{cmd}' exited with code {code}")]
    Exit { cmd: String, code: i32 },
    #[error("compiler '{cmd}' killed by a signal")]
    Signalled { cmd: String },
    #[error("compiler '{cmd}' timed out after {timeout:?}")]
    Timeout { cmd: String, timeout: Duration },
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CompileError {
    /// The status this failure classifies into, if it is a classified
    /// outcome rather than an environmental fault.
    pub fn status(&self) -> Option<Status> {
        match self {
            CompileError::Exit { .. } | CompileError::Signalled { .. } => {
                Some(Status::CompileFail)
            }
            CompileError::Timeout { .. } => Some(Status::CompileTimeout),
            CompileError::Run(_) | CompileError::Io(_) => None,
        }
    }
}

/// The interface the interpreter drives; mocked in tests, backed by a real
/// compiler subprocess in production.
pub trait CompileDriver: Send + Sync {
    /// Runs one compile job, appending compiler output to `log`.
    fn run_compiler(
        &self,
        cancel: &CancelToken,
        job: &CompileJob,
        log: &mut dyn Write,
    ) -> Result<(), CompileError>;
}

/// Production driver: `<cmd> <args…> [-c] <inputs…> -o <output>`.
pub struct CompilerRunner<R> {
    runner: R,
}

impl<R: Runner> CompilerRunner<R> {
    pub fn new(runner: R) -> Self {
        CompilerRunner { runner }
    }
}

impl<R: Runner> CompileDriver for CompilerRunner<R> {
    fn run_compiler(
        &self,
        cancel: &CancelToken,
        job: &CompileJob,
        log: &mut dyn Write,
    ) -> Result<(), CompileError> {
        let mut ri = RunInfo::new(&job.compiler.cmd).args(job.compiler.args.iter().cloned());
        if job.kind == CompileKind::Object {
            ri = ri.arg("-c");
        }
        for input in &job.inputs {
            ri = ri.arg(input.display().to_string());
        }
        ri = ri.arg("-o").arg(job.output.display().to_string());

        let out = self.runner.run(cancel, &ri)?;
        log.write_all(&out.stdout)?;
        log.write_all(&out.stderr)?;

        if out.timed_out {
            return Err(CompileError::Timeout {
                cmd: ri.cmd,
                timeout: out.duration,
            });
        }
        match out.code {
            Some(0) => Ok(()),
            Some(code) => Err(CompileError::Exit { cmd: ri.cmd, code }),
            None => Err(CompileError::Signalled { cmd: ri.cmd }),
        }
    }
}
