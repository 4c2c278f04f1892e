//! Recipes: declarative plans for turning lifted harness files into
//! compile and link graphs, interpreted by a stack machine.

use crate::filekind::{self, Kind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Value for a pop count that asks the instruction to pop every applicable
/// file off the stack.
pub const POP_ALL: usize = 0;

/// A single stack-machine instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "arg", rename_all = "snake_case")]
pub enum Instruction {
    Nop,
    /// Push one named input from the pool onto the file stack.
    PushInput(String),
    /// Push every available pool file whose kind matches.
    PushInputs(Kind),
    /// Pop `n` files (all if [`POP_ALL`]) and compile them into a fresh
    /// object, which is pushed back onto the stack.
    CompileObj(usize),
    /// Pop `n` files (all if [`POP_ALL`]) and compile them into the
    /// recipe's declared output binary. Nothing is pushed.
    CompileExe(usize),
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Nop => write!(f, "nop"),
            Instruction::PushInput(file) => write!(f, "push_input {:?}", file),
            Instruction::PushInputs(kind) => write!(f, "push_inputs {:#x}", kind),
            Instruction::CompileObj(n) => write!(f, "compile_obj {}", npop_string(*n)),
            Instruction::CompileExe(n) => write!(f, "compile_exe {}", npop_string(*n)),
        }
    }
}

fn npop_string(npops: usize) -> String {
    if npops == POP_ALL {
        "ALL".to_string()
    } else {
        npops.to_string()
    }
}

/// What a recipe ultimately produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Nothing runnable; the backend ran standalone and left observations.
    #[default]
    Nothing,
    Object,
    Executable,
}

/// The declarative plan for producing a harness from lifted files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Recipe {
    /// Directory containing every input file.
    pub dir: PathBuf,
    /// Input file names, relative to `dir`, in lift order.
    pub files: Vec<String>,
    /// What interpreting the recipe yields.
    pub output: OutputKind,
    /// The instruction sequence.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instructions: Vec<Instruction>,
}

impl Recipe {
    /// A recipe whose backend already ran standalone: the files are kept for
    /// archival, but there is nothing to compile.
    pub fn standalone(dir: PathBuf, files: Vec<String>) -> Self {
        Recipe {
            dir,
            files,
            output: OutputKind::Nothing,
            instructions: Vec::new(),
        }
    }

    /// The common C-harness shape: push every C source, compile all of them
    /// into the output executable in one step.
    pub fn all_c_to_exe(dir: PathBuf, files: Vec<String>) -> Self {
        Recipe {
            dir,
            files,
            output: OutputKind::Executable,
            instructions: vec![
                Instruction::PushInputs(filekind::C_SRC),
                Instruction::CompileExe(POP_ALL),
            ],
        }
    }

    /// Absolute paths of every input file.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| self.dir.join(f)).collect()
    }

    pub fn in_dir(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }
}

/// Absolute path of the `k`-th intermediate object in `dir`.
pub fn obj_path(dir: &Path, k: u64) -> PathBuf {
    dir.join(format!("obj_{}.o", k))
}
