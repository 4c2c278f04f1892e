//! Terminal statuses for compile and run results.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The classified outcome of a subject under one compiler.
///
/// The declaration order doubles as the severity order used when folding a
/// subject's many results into one terminal status: a run timeout outranks a
/// run failure, which outranks any compile problem, and so on down to
/// `Filtered`, which loses to everything.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Status {
    /// The subject was excluded from testing by policy before anything ran.
    Filtered,
    /// Everything ran and the postcondition held.
    #[default]
    Ok,
    /// Everything ran but the observation violated the postcondition.
    Flagged,
    /// The compiler exited non-zero.
    CompileFail,
    /// The compiler exceeded its timeout.
    CompileTimeout,
    /// The compiled binary exited non-zero.
    RunFail,
    /// The compiled binary exceeded its timeout.
    RunTimeout,
}

impl Status {
    /// Every status, in severity order.
    pub const ALL: [Status; 7] = [
        Status::Filtered,
        Status::Ok,
        Status::Flagged,
        Status::CompileFail,
        Status::CompileTimeout,
        Status::RunFail,
        Status::RunTimeout,
    ];

    /// The least status that indicates an outright failure of the toolchain
    /// or the test binary, as opposed to an interesting observation.
    pub const FIRST_BAD: Status = Status::CompileFail;

    pub fn name(self) -> &'static str {
        match self {
            Status::Filtered => "Filtered",
            Status::Ok => "Ok",
            Status::Flagged => "Flagged",
            Status::CompileFail => "CompileFail",
            Status::CompileTimeout => "CompileTimeout",
            Status::RunFail => "RunFail",
            Status::RunTimeout => "RunTimeout",
        }
    }

    /// Whether this status marks a toolchain/runtime failure.
    pub fn is_bad(self) -> bool {
        self >= Status::FIRST_BAD
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
