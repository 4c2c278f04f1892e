//! Observations collected from backend simulators and test binaries.

use crate::status::Status;
use iota::iota;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Flag bits summarising an observation.
pub type ObsFlags = u8;

iota! {
    pub const FLAG_SAT: ObsFlags = 1 << (iota);      // postcondition satisfied
    , FLAG_UNSAT                                     // postcondition not satisfied
    , FLAG_UNDEF                                     // tool reported undefined behaviour
    , FLAG_EXIST                                     // postcondition is existential
}

/// One final state: a mapping from variable to value.
///
/// Kept sorted so that observation output is stable for reporting.
pub type State = BTreeMap<String, String>;

/// An observation over one execution of a subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obs {
    #[serde(default)]
    pub flags: ObsFlags,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub states: Vec<State>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub witnesses: Vec<State>,
}

impl Obs {
    pub fn sat(&self) -> bool {
        self.flags & FLAG_SAT != 0
    }

    pub fn unsat(&self) -> bool {
        self.flags & FLAG_UNSAT != 0
    }

    pub fn undef(&self) -> bool {
        self.flags & FLAG_UNDEF != 0
    }

    pub fn exist(&self) -> bool {
        self.flags & FLAG_EXIST != 0
    }

    /// Classifies this observation against its postcondition.
    ///
    /// For a universal postcondition, satisfaction is the boring outcome.
    /// For an existential one the polarity flips: a satisfied existential
    /// means the weak behaviour was witnessed.
    pub fn status(&self) -> Status {
        if self.undef() {
            return Status::Flagged;
        }
        let interesting = if self.exist() { self.sat() } else { self.unsat() };
        let conclusive = self.sat() || self.unsat();
        if !conclusive || interesting {
            Status::Flagged
        } else {
            Status::Ok
        }
    }
}
