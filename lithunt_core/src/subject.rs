//! Subjects: one litmus test and every artefact derived from it.

use crate::obs::Obs;
use crate::recipe::Recipe;
use crate::status::Status;
use crate::HashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubjectError {
    #[error("subject already has a fuzz record")]
    DuplicateFuzz,
    #[error("subject already has a recipe for arch {0}")]
    DuplicateRecipe(String),
    #[error("subject already has a compile result for compiler {0}")]
    DuplicateCompile(String),
    #[error("subject already has a run result for compiler {0}")]
    DuplicateRun(String),
}

/// Paths produced by one fuzzing cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuzzRecord {
    /// The mutated litmus file.
    pub litmus: PathBuf,
    /// The mutation trace, if the fuzzer emitted one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<PathBuf>,
}

/// Timing and classification of one external process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProcResult {
    pub status: Status,
    #[serde(default)]
    pub duration: Duration,
}

/// The outcome of compiling one subject with one compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileResult {
    #[serde(flatten)]
    pub result: ProcResult,
    /// The produced binary, when compilation succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin: Option<PathBuf>,
    /// Captured compiler output.
    pub log: PathBuf,
}

/// The outcome of running one subject's binary for one compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    #[serde(flatten)]
    pub result: ProcResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub obs: Option<Obs>,
}

/// A named unit of work within a corpus: the original litmus source plus
/// everything the pipeline derives from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Subject {
    /// Path of the original litmus test.
    pub source: PathBuf,
    /// Fuzzer outputs, present once the subject came out of a fuzz cycle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuzz: Option<FuzzRecord>,
    /// Per-architecture lifted recipes.
    #[serde(default)]
    pub recipes: HashMap<String, Recipe>,
    /// Per-compiler compile results.
    #[serde(default)]
    pub compiles: HashMap<String, CompileResult>,
    /// Per-compiler run results.
    #[serde(default)]
    pub runs: HashMap<String, RunResult>,
}

impl Subject {
    pub fn with_source(source: PathBuf) -> Self {
        Subject {
            source,
            ..Subject::default()
        }
    }

    /// The best litmus file to lift: the fuzzed one if present, otherwise
    /// the original.
    pub fn best_litmus(&self) -> &Path {
        match &self.fuzz {
            Some(f) => &f.litmus,
            None => &self.source,
        }
    }

    pub fn add_fuzz(&mut self, rec: FuzzRecord) -> Result<(), SubjectError> {
        if self.fuzz.is_some() {
            return Err(SubjectError::DuplicateFuzz);
        }
        self.fuzz = Some(rec);
        Ok(())
    }

    pub fn add_recipe(&mut self, arch: String, recipe: Recipe) -> Result<(), SubjectError> {
        if self.recipes.contains_key(&arch) {
            return Err(SubjectError::DuplicateRecipe(arch));
        }
        self.recipes.insert(arch, recipe);
        Ok(())
    }

    pub fn add_compile(&mut self, compiler: String, res: CompileResult) -> Result<(), SubjectError> {
        if self.compiles.contains_key(&compiler) {
            return Err(SubjectError::DuplicateCompile(compiler));
        }
        self.compiles.insert(compiler, res);
        Ok(())
    }

    pub fn add_run(&mut self, compiler: String, res: RunResult) -> Result<(), SubjectError> {
        if self.runs.contains_key(&compiler) {
            return Err(SubjectError::DuplicateRun(compiler));
        }
        self.runs.insert(compiler, res);
        Ok(())
    }

    /// Folds every compile and run result into the subject's terminal
    /// status. A subject with no results yet is `Ok`.
    pub fn worst_status(&self) -> Status {
        self.compiles
            .values()
            .map(|c| c.result.status)
            .chain(self.runs.values().map(|r| r.result.status))
            .max()
            .unwrap_or(Status::Ok)
    }
}

/// A subject paired with its corpus name, handed to per-subject worker jobs.
#[derive(Debug, Clone, PartialEq)]
pub struct Named {
    pub name: String,
    pub subject: Subject,
}

impl Named {
    pub fn new(name: impl Into<String>, subject: Subject) -> Self {
        Named {
            name: name.into(),
            subject,
        }
    }
}
