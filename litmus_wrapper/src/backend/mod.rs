//! Backends: the external tools that turn litmus tests into observations
//! or compilable harnesses.
//!
//! Backends are described by a capability bitset rather than an inheritance
//! tree; the resolver maps a style string to a concrete backend declaring
//! its capabilities and supported architectures, and callers check
//! capabilities before issuing jobs.

pub mod herdstyle;
pub mod parser;

pub use herdstyle::HerdStyleBackend;

use crate::run::{RunError, Runner};
use iota::iota;
use lithunt_core::cancel::CancelToken;
use lithunt_core::obs::Obs;
use lithunt_core::plan::BackendSpec;
use lithunt_core::recipe::Recipe;
use std::io::BufRead;
use std::path::PathBuf;
use thiserror::Error;

/// Capability bitset for a backend.
pub type Capability = u8;

iota! {
    pub const CAN_LIFT_LITMUS: Capability = 1 << (iota);  // can consume litmus tests at all
    , CAN_RUN_STANDALONE                                  // runs the test itself, observations on stdout
    , CAN_PRODUCE_EXE                                     // emits recipes that compile to executables
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("unknown backend style: {0}")]
    UnknownStyle(String),
    #[error("backend does not support {0}")]
    NotSupported(String),
    #[error("unsupported architecture: {0}")]
    BadArch(String),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error(transparent)]
    Parse(#[from] parser::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// What a lift job should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiftTarget {
    /// Run the backend itself and leave observations in the output dir.
    Standalone,
    /// Produce a recipe that compiles to an executable.
    ExeRecipe,
}

/// One lifting request.
#[derive(Debug, Clone)]
pub struct LiftJob {
    pub arch: String,
    pub input: PathBuf,
    pub out_dir: PathBuf,
    pub target: LiftTarget,
}

/// The abstract backend interface.
pub trait Backend: Send + Sync {
    fn capabilities(&self) -> Capability;

    fn arches(&self) -> &[String];

    fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities() & cap == cap
    }

    /// Lifts a litmus test per `job`, returning the recipe describing the
    /// files it left in `job.out_dir`.
    fn lift(
        &self,
        cancel: &CancelToken,
        job: &LiftJob,
        runner: &dyn Runner,
    ) -> Result<Recipe, BackendError>;

    /// Parses the observation a harness or standalone run wrote to stdout.
    fn parse_obs(&self, r: &mut dyn BufRead) -> Result<Obs, BackendError>;
}

/// Maps a backend spec's style string onto a concrete backend.
pub fn resolve(spec: &BackendSpec) -> Result<Box<dyn Backend>, BackendError> {
    match spec.style.as_str() {
        "litmus" => Ok(Box::new(HerdStyleBackend::litmus(spec))),
        "herd" => Ok(Box::new(HerdStyleBackend::herd(spec))),
        style => Err(BackendError::UnknownStyle(style.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(style: &str) -> BackendSpec {
        BackendSpec {
            style: style.to_string(),
            cmd: None,
            args: Vec::new(),
        }
    }

    #[test]
    fn unknown_style_is_an_error() {
        assert!(matches!(
            resolve(&spec("rmem")),
            Err(BackendError::UnknownStyle(s)) if s == "rmem"
        ));
    }

    #[test]
    fn litmus_capabilities() {
        let b = resolve(&spec("litmus")).unwrap();
        assert!(b.has_capability(CAN_LIFT_LITMUS));
        assert!(b.has_capability(CAN_RUN_STANDALONE));
        assert!(b.has_capability(CAN_PRODUCE_EXE));
        assert!(b.arches().contains(&"x86_64".to_string()));
    }

    #[test]
    fn herd_cannot_produce_exe() {
        let b = resolve(&spec("herd")).unwrap();
        assert!(b.has_capability(CAN_LIFT_LITMUS | CAN_RUN_STANDALONE));
        assert!(!b.has_capability(CAN_PRODUCE_EXE));
    }
}
