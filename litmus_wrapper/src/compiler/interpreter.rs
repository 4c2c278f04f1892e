//! The recipe interpreter: a stack machine over file paths.
//!
//! State is an input pool, a file stack, an object counter, and a program
//! counter. Interpretation resumes from the saved program counter if the
//! same interpreter is driven again after a failure, so a restarted driver
//! re-runs only the failing instruction onwards.

use super::{CompileDriver, CompileError, CompileJob, CompileKind};
use lithunt_core::cancel::{CancelToken, Cancelled};
use lithunt_core::filekind;
use lithunt_core::plan::Compiler;
use lithunt_core::recipe::{self, Instruction, OutputKind, Recipe, POP_ALL};
use lithunt_core::HashMap;
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error("compiler config missing")]
    CompilerConfigMissing,
    #[error("file not available: {0}")]
    FileUnavailable(String),
    #[error("bad opcode at pc {pc}: {inst}")]
    BadOp { pc: usize, inst: String },
    #[error("object file count overflow")]
    ObjOverflow,
    #[error("operation cancelled")]
    Cancelled(#[from] Cancelled),
    #[error(transparent)]
    Compile(#[from] CompileError),
}

pub struct Interpreter<'a> {
    driver: &'a dyn CompileDriver,
    compiler: &'a Compiler,
    recipe: &'a Recipe,
    /// Where a terminal `CompileExe` puts the binary.
    out_path: PathBuf,
    pc: usize,
    nobjs: u64,
    max_objs: u64,
    /// Each input file name, mapped to whether it is still unconsumed.
    in_pool: HashMap<String, bool>,
    /// Absolute paths, bottom first.
    file_stack: Vec<PathBuf>,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        driver: &'a dyn CompileDriver,
        compiler: Option<&'a Compiler>,
        recipe: &'a Recipe,
        out_path: PathBuf,
    ) -> Result<Self, InterpreterError> {
        let compiler = compiler.ok_or(InterpreterError::CompilerConfigMissing)?;
        let in_pool = recipe.files.iter().map(|f| (f.clone(), true)).collect();
        Ok(Interpreter {
            driver,
            compiler,
            recipe,
            out_path,
            pc: 0,
            nobjs: 0,
            max_objs: u64::MAX,
            in_pool,
            file_stack: Vec::with_capacity(recipe.files.len()),
        })
    }

    pub fn with_max_objs(mut self, max: u64) -> Self {
        self.max_objs = max;
        self
    }

    /// Objects created so far.
    pub fn nobjs(&self) -> u64 {
        self.nobjs
    }

    /// Runs the recipe to completion, resuming from the saved program
    /// counter.
    pub fn interpret(
        &mut self,
        cancel: &CancelToken,
        log: &mut dyn Write,
    ) -> Result<(), InterpreterError> {
        while self.pc < self.recipe.instructions.len() {
            cancel.check()?;
            let inst = self.recipe.instructions[self.pc].clone();
            self.process(&inst, cancel, log)?;
            self.pc += 1;
        }
        Ok(())
    }

    fn process(
        &mut self,
        inst: &Instruction,
        cancel: &CancelToken,
        log: &mut dyn Write,
    ) -> Result<(), InterpreterError> {
        match inst {
            Instruction::Nop => Ok(()),
            Instruction::PushInput(file) => self.push_input(file),
            Instruction::PushInputs(kind) => {
                self.push_inputs(*kind);
                Ok(())
            }
            Instruction::CompileObj(npops) => {
                if self.recipe.output == OutputKind::Nothing {
                    return Err(self.bad_op(inst));
                }
                self.compile_obj(cancel, log, *npops)
            }
            Instruction::CompileExe(npops) => {
                if self.recipe.output != OutputKind::Executable {
                    return Err(self.bad_op(inst));
                }
                self.compile(cancel, log, CompileKind::Executable, self.out_path.clone(), *npops)
            }
        }
    }

    fn bad_op(&self, inst: &Instruction) -> InterpreterError {
        InterpreterError::BadOp {
            pc: self.pc,
            inst: inst.to_string(),
        }
    }

    fn push_input(&mut self, file: &str) -> Result<(), InterpreterError> {
        match self.in_pool.get_mut(file) {
            Some(avail @ true) => {
                *avail = false;
                self.file_stack.push(self.recipe.in_dir(file));
                Ok(())
            }
            _ => Err(InterpreterError::FileUnavailable(file.to_string())),
        }
    }

    /// Pushes every still-available pool file of a matching kind, in recipe
    /// order.
    fn push_inputs(&mut self, kind: filekind::Kind) {
        for file in &self.recipe.files {
            let guessed = filekind::guess_from_path(std::path::Path::new(file));
            if !filekind::matches(guessed, kind) {
                continue;
            }
            if let Some(avail @ true) = self.in_pool.get_mut(file) {
                *avail = false;
                self.file_stack.push(self.recipe.in_dir(file));
            }
        }
    }

    fn compile_obj(
        &mut self,
        cancel: &CancelToken,
        log: &mut dyn Write,
        npops: usize,
    ) -> Result<(), InterpreterError> {
        if self.nobjs == self.max_objs {
            return Err(InterpreterError::ObjOverflow);
        }
        let out = recipe::obj_path(&self.recipe.dir, self.nobjs);
        self.compile(cancel, log, CompileKind::Object, out.clone(), npops)?;
        self.nobjs += 1;
        self.file_stack.push(out);
        Ok(())
    }

    /// Runs one compile over the top `npops` stack entries. The stack only
    /// commits once the driver succeeds, so a restarted interpretation
    /// re-runs the failing instruction with the same inputs.
    fn compile(
        &mut self,
        cancel: &CancelToken,
        log: &mut dyn Write,
        kind: CompileKind,
        output: PathBuf,
        npops: usize,
    ) -> Result<(), InterpreterError> {
        let count = self.pop_count(npops);
        let inputs = self.file_stack[self.file_stack.len() - count..].to_vec();
        let job = CompileJob {
            compiler: self.compiler,
            kind,
            inputs,
            output,
        };
        self.driver.run_compiler(cancel, &job, log)?;
        self.file_stack.truncate(self.file_stack.len() - count);
        Ok(())
    }

    fn pop_count(&self, npops: usize) -> usize {
        if npops == POP_ALL || npops >= self.file_stack.len() {
            self.file_stack.len()
        } else {
            npops
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct SeenJob {
        kind: CompileKind,
        inputs: Vec<PathBuf>,
        output: PathBuf,
    }

    /// Records jobs; optionally fails the first `fail_first` calls.
    struct MockDriver {
        jobs: Mutex<Vec<SeenJob>>,
        fail_first: Mutex<u32>,
    }

    impl MockDriver {
        fn new() -> Self {
            MockDriver {
                jobs: Mutex::new(Vec::new()),
                fail_first: Mutex::new(0),
            }
        }

        fn failing(n: u32) -> Self {
            MockDriver {
                jobs: Mutex::new(Vec::new()),
                fail_first: Mutex::new(n),
            }
        }
    }

    impl CompileDriver for MockDriver {
        fn run_compiler(
            &self,
            _cancel: &CancelToken,
            job: &CompileJob,
            _log: &mut dyn Write,
        ) -> Result<(), CompileError> {
            let mut remaining = self.fail_first.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CompileError::Exit {
                    cmd: job.compiler.cmd.clone(),
                    code: 1,
                });
            }
            self.jobs.lock().unwrap().push(SeenJob {
                kind: job.kind,
                inputs: job.inputs.clone(),
                output: job.output.clone(),
            });
            Ok(())
        }
    }

    fn gcc() -> Compiler {
        Compiler {
            cmd: "gcc".to_string(),
            args: Vec::new(),
            arch: "x86_64".to_string(),
        }
    }

    fn obj_then_exe_recipe() -> Recipe {
        Recipe {
            dir: PathBuf::from("/lift"),
            files: vec!["a.c".to_string(), "b.c".to_string(), "hdr.h".to_string()],
            output: OutputKind::Executable,
            instructions: vec![
                Instruction::PushInputs(filekind::C_SRC),
                Instruction::CompileObj(POP_ALL),
                Instruction::PushInput("hdr.h".to_string()),
                Instruction::CompileExe(POP_ALL),
            ],
        }
    }

    #[test]
    fn objects_then_exe() {
        let driver = MockDriver::new();
        let compiler = gcc();
        let recipe = obj_then_exe_recipe();
        let mut it =
            Interpreter::new(&driver, Some(&compiler), &recipe, PathBuf::from("/run/a.out"))
                .unwrap();
        let mut log = Vec::new();
        it.interpret(&CancelToken::new(), &mut log).unwrap();

        let jobs = driver.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].kind, CompileKind::Object);
        assert_eq!(
            jobs[0].inputs,
            vec![PathBuf::from("/lift/a.c"), PathBuf::from("/lift/b.c")]
        );
        assert_eq!(jobs[0].output, PathBuf::from("/lift/obj_0.o"));
        assert_eq!(jobs[1].kind, CompileKind::Executable);
        assert_eq!(
            jobs[1].inputs,
            vec![PathBuf::from("/lift/obj_0.o"), PathBuf::from("/lift/hdr.h")]
        );
        assert_eq!(jobs[1].output, PathBuf::from("/run/a.out"));
        assert_eq!(it.nobjs(), 1);
    }

    #[test]
    fn push_consumes_inputs_once() {
        let driver = MockDriver::new();
        let compiler = gcc();
        let recipe = Recipe {
            dir: PathBuf::from("/lift"),
            files: vec!["a.c".to_string()],
            output: OutputKind::Executable,
            instructions: vec![
                Instruction::PushInput("a.c".to_string()),
                Instruction::PushInput("a.c".to_string()),
            ],
        };
        let mut it =
            Interpreter::new(&driver, Some(&compiler), &recipe, PathBuf::from("a.out")).unwrap();
        let err = it.interpret(&CancelToken::new(), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, InterpreterError::FileUnavailable(f) if f == "a.c"));
    }

    #[test]
    fn unknown_input_unavailable() {
        let driver = MockDriver::new();
        let compiler = gcc();
        let recipe = Recipe {
            dir: PathBuf::from("/lift"),
            files: vec![],
            output: OutputKind::Executable,
            instructions: vec![Instruction::PushInput("nope.c".to_string())],
        };
        let mut it =
            Interpreter::new(&driver, Some(&compiler), &recipe, PathBuf::from("a.out")).unwrap();
        assert!(matches!(
            it.interpret(&CancelToken::new(), &mut Vec::new()),
            Err(InterpreterError::FileUnavailable(_))
        ));
    }

    #[test]
    fn obj_overflow() {
        let driver = MockDriver::new();
        let compiler = gcc();
        let recipe = Recipe {
            dir: PathBuf::from("/lift"),
            files: vec!["a.c".to_string()],
            output: OutputKind::Executable,
            instructions: vec![
                Instruction::PushInputs(filekind::C_SRC),
                Instruction::CompileObj(POP_ALL),
                Instruction::CompileObj(POP_ALL),
            ],
        };
        let mut it = Interpreter::new(&driver, Some(&compiler), &recipe, PathBuf::from("a.out"))
            .unwrap()
            .with_max_objs(1);
        assert!(matches!(
            it.interpret(&CancelToken::new(), &mut Vec::new()),
            Err(InterpreterError::ObjOverflow)
        ));
    }

    #[test]
    fn exe_in_non_exe_recipe_is_bad_op() {
        let driver = MockDriver::new();
        let compiler = gcc();
        let recipe = Recipe {
            dir: PathBuf::from("/lift"),
            files: vec!["out.txt".to_string()],
            output: OutputKind::Nothing,
            instructions: vec![Instruction::CompileExe(POP_ALL)],
        };
        let mut it =
            Interpreter::new(&driver, Some(&compiler), &recipe, PathBuf::from("a.out")).unwrap();
        assert!(matches!(
            it.interpret(&CancelToken::new(), &mut Vec::new()),
            Err(InterpreterError::BadOp { pc: 0, .. })
        ));
    }

    #[test]
    fn missing_compiler_config() {
        let driver = MockDriver::new();
        let recipe = obj_then_exe_recipe();
        assert!(matches!(
            Interpreter::new(&driver, None, &recipe, PathBuf::from("a.out")),
            Err(InterpreterError::CompilerConfigMissing)
        ));
    }

    #[test]
    fn resumes_from_saved_pc() {
        let driver = MockDriver::failing(1);
        let compiler = gcc();
        let recipe = obj_then_exe_recipe();
        let mut it =
            Interpreter::new(&driver, Some(&compiler), &recipe, PathBuf::from("a.out")).unwrap();

        // First run dies at the object compile.
        assert!(it.interpret(&CancelToken::new(), &mut Vec::new()).is_err());
        assert_eq!(it.nobjs(), 0);

        // Second run picks up at the same instruction, with the same
        // inputs, and finishes.
        it.interpret(&CancelToken::new(), &mut Vec::new()).unwrap();
        let jobs = driver.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(
            jobs[0].inputs,
            vec![PathBuf::from("/lift/a.c"), PathBuf::from("/lift/b.c")]
        );
        assert_eq!(it.nobjs(), 1);
    }

    #[test]
    fn cancellation_stops_interpretation() {
        let driver = MockDriver::new();
        let compiler = gcc();
        let recipe = obj_then_exe_recipe();
        let mut it =
            Interpreter::new(&driver, Some(&compiler), &recipe, PathBuf::from("a.out")).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            it.interpret(&cancel, &mut Vec::new()),
            Err(InterpreterError::Cancelled(_))
        ));
    }
}
