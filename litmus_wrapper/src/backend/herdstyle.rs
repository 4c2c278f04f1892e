//! Herd-style backends.
//!
//! Herd is the de facto standard of the concurrency-exploration tool
//! family, so several tools share its flow: an external binary driven by
//! command-line flags, consuming a litmus test and writing loosely
//! standardised observations to stdout. Some members (litmus7) can also
//! lift a test into C sources compilable into an executable harness.

use super::{
    parser, Backend, BackendError, Capability, LiftJob, LiftTarget, CAN_LIFT_LITMUS,
    CAN_PRODUCE_EXE, CAN_RUN_STANDALONE,
};
use crate::run::{RunInfo, Runner};
use lithunt_core::cancel::CancelToken;
use lithunt_core::obs::Obs;
use lithunt_core::plan::BackendSpec;
use lithunt_core::recipe::Recipe;
use std::fs;
use std::io::BufRead;
use std::path::Path;

/// Name of the file standalone runs leave in the output directory.
pub const STANDALONE_OUT: &str = "output.txt";

/// Which member of the herd family this backend drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flavor {
    /// litmus7: lifts C litmus tests to compilable harnesses.
    Litmus,
    /// herd7: simulation only.
    Herd,
}

pub struct HerdStyleBackend {
    caps: Capability,
    arches: Vec<String>,
    run_info: RunInfo,
    flavor: Flavor,
}

fn apply_spec(mut base: RunInfo, spec: &BackendSpec) -> RunInfo {
    let over = RunInfo {
        cmd: spec.cmd.clone().unwrap_or_default(),
        args: spec.args.clone(),
    };
    base.override_with(&over);
    base
}

impl HerdStyleBackend {
    pub fn litmus(spec: &BackendSpec) -> Self {
        HerdStyleBackend {
            caps: CAN_LIFT_LITMUS | CAN_RUN_STANDALONE | CAN_PRODUCE_EXE,
            arches: default_arches(),
            run_info: apply_spec(RunInfo::new("litmus7"), spec),
            flavor: Flavor::Litmus,
        }
    }

    pub fn herd(spec: &BackendSpec) -> Self {
        HerdStyleBackend {
            caps: CAN_LIFT_LITMUS | CAN_RUN_STANDALONE,
            arches: default_arches(),
            run_info: apply_spec(RunInfo::new("herd7"), spec),
            flavor: Flavor::Herd,
        }
    }

    fn check_job(&self, job: &LiftJob) -> Result<(), BackendError> {
        if !self.arches.iter().any(|a| *a == job.arch) {
            return Err(BackendError::BadArch(job.arch.clone()));
        }
        match job.target {
            LiftTarget::Standalone if !self.has_capability(CAN_RUN_STANDALONE) => Err(
                BackendError::NotSupported("standalone runs".to_string()),
            ),
            LiftTarget::ExeRecipe if !self.has_capability(CAN_PRODUCE_EXE) => Err(
                BackendError::NotSupported("producing executables".to_string()),
            ),
            _ => Ok(()),
        }
    }

    fn lift_exe(
        &self,
        cancel: &CancelToken,
        job: &LiftJob,
        runner: &dyn Runner,
    ) -> Result<Recipe, BackendError> {
        let carch = lookup_carch(&job.arch)?;
        let ri = self
            .run_info
            .clone()
            .args(["-carch", carch])
            .args(["-c11", "true"])
            .arg("-o")
            .arg(job.out_dir.display().to_string())
            .arg(job.input.display().to_string());
        runner.run_ok(cancel, &ri)?;

        let files = harness_files(&job.out_dir)?;
        Ok(Recipe::all_c_to_exe(job.out_dir.clone(), files))
    }

    fn lift_standalone(
        &self,
        cancel: &CancelToken,
        job: &LiftJob,
        runner: &dyn Runner,
    ) -> Result<Recipe, BackendError> {
        let ri = match self.flavor {
            Flavor::Litmus => {
                let carch = lookup_carch(&job.arch)?;
                self.run_info
                    .clone()
                    .args(["-carch", carch])
                    .args(["-c11", "true"])
                    .arg(job.input.display().to_string())
            }
            Flavor::Herd => self.run_info.clone().arg(job.input.display().to_string()),
        };
        let out = runner.run_ok(cancel, &ri)?;
        fs::write(job.out_dir.join(STANDALONE_OUT), &out.stdout)?;
        Ok(Recipe::standalone(
            job.out_dir.clone(),
            vec![STANDALONE_OUT.to_string()],
        ))
    }
}

impl Backend for HerdStyleBackend {
    fn capabilities(&self) -> Capability {
        self.caps
    }

    fn arches(&self) -> &[String] {
        &self.arches
    }

    fn lift(
        &self,
        cancel: &CancelToken,
        job: &LiftJob,
        runner: &dyn Runner,
    ) -> Result<Recipe, BackendError> {
        self.check_job(job)?;
        match job.target {
            LiftTarget::ExeRecipe => self.lift_exe(cancel, job, runner),
            LiftTarget::Standalone => self.lift_standalone(cancel, job, runner),
        }
    }

    fn parse_obs(&self, r: &mut dyn BufRead) -> Result<Obs, BackendError> {
        Ok(parser::parse(r)?)
    }
}

fn default_arches() -> Vec<String> {
    ["c", "x86", "x86_64", "arm", "aarch64", "ppc"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Maps our architecture IDs onto litmus7 `-carch` names.
fn lookup_carch(arch: &str) -> Result<&'static str, BackendError> {
    match arch {
        "c" => Ok("C"),
        "x86" => Ok("X86"),
        "x86_64" => Ok("X86_64"),
        "arm" => Ok("ARM"),
        "aarch64" => Ok("AArch64"),
        "ppc" => Ok("PPC"),
        other => Err(BackendError::BadArch(other.to_string())),
    }
}

/// Lists the files litmus left in the lift directory, sorted for recipe
/// stability.
fn harness_files(dir: &Path) -> Result<Vec<String>, BackendError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{ExecOutput, RunError};
    use lithunt_core::recipe::{Instruction, OutputKind, POP_ALL};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct StdoutRunner {
        calls: Arc<Mutex<Vec<RunInfo>>>,
        stdout: &'static [u8],
    }

    impl Runner for StdoutRunner {
        fn run(&self, _cancel: &CancelToken, ri: &RunInfo) -> Result<ExecOutput, RunError> {
            self.calls.lock().unwrap().push(ri.clone());
            Ok(ExecOutput {
                code: Some(0),
                timed_out: false,
                stdout: self.stdout.to_vec(),
                stderr: Vec::new(),
                duration: Duration::ZERO,
            })
        }
    }

    fn spec() -> BackendSpec {
        BackendSpec {
            style: "litmus".to_string(),
            cmd: None,
            args: Vec::new(),
        }
    }

    #[test]
    fn exe_lift_builds_recipe_from_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("harness.c"), "int main(){}").unwrap();
        std::fs::write(dir.path().join("utils.h"), "").unwrap();

        let calls = Arc::new(Mutex::new(Vec::new()));
        let runner = StdoutRunner {
            calls: calls.clone(),
            stdout: b"",
        };
        let b = HerdStyleBackend::litmus(&spec());
        let recipe = b
            .lift(
                &CancelToken::new(),
                &LiftJob {
                    arch: "x86_64".to_string(),
                    input: "SB_0.litmus".into(),
                    out_dir: dir.path().to_path_buf(),
                    target: LiftTarget::ExeRecipe,
                },
                &runner,
            )
            .unwrap();

        assert_eq!(recipe.output, OutputKind::Executable);
        assert_eq!(recipe.files, vec!["harness.c", "utils.h"]);
        assert_eq!(recipe.instructions.last(), Some(&Instruction::CompileExe(POP_ALL)));

        let argv = &calls.lock().unwrap()[0];
        assert_eq!(argv.cmd, "litmus7");
        assert_eq!(argv.args[..4], ["-carch", "X86_64", "-c11", "true"]);
        assert_eq!(argv.args.last().unwrap(), "SB_0.litmus");
    }

    #[test]
    fn standalone_lift_writes_stdout_file() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let runner = StdoutRunner {
            calls,
            stdout: b"state: { x=1 }\nSat\n",
        };
        let b = HerdStyleBackend::herd(&spec());
        let recipe = b
            .lift(
                &CancelToken::new(),
                &LiftJob {
                    arch: "c".to_string(),
                    input: "SB.litmus".into(),
                    out_dir: dir.path().to_path_buf(),
                    target: LiftTarget::Standalone,
                },
                &runner,
            )
            .unwrap();

        assert_eq!(recipe.output, OutputKind::Nothing);
        assert_eq!(recipe.files, vec![STANDALONE_OUT]);
        let body = std::fs::read_to_string(dir.path().join(STANDALONE_OUT)).unwrap();
        assert!(body.contains("Sat"));
    }

    #[test]
    fn herd_refuses_exe_lifts() {
        let b = HerdStyleBackend::herd(&spec());
        let err = b
            .lift(
                &CancelToken::new(),
                &LiftJob {
                    arch: "c".to_string(),
                    input: "SB.litmus".into(),
                    out_dir: "out".into(),
                    target: LiftTarget::ExeRecipe,
                },
                &StdoutRunner {
                    calls: Arc::new(Mutex::new(Vec::new())),
                    stdout: b"",
                },
            )
            .unwrap_err();
        assert!(matches!(err, BackendError::NotSupported(_)));
    }

    #[test]
    fn unknown_arch_is_rejected() {
        let b = HerdStyleBackend::litmus(&spec());
        let err = b
            .lift(
                &CancelToken::new(),
                &LiftJob {
                    arch: "riscv".to_string(),
                    input: "SB.litmus".into(),
                    out_dir: "out".into(),
                    target: LiftTarget::ExeRecipe,
                },
                &StdoutRunner {
                    calls: Arc::new(Mutex::new(Vec::new())),
                    stdout: b"",
                },
            )
            .unwrap_err();
        assert!(matches!(err, BackendError::BadArch(a) if a == "riscv"));
    }
}
