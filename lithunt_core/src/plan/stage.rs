//! Pipeline stages and their completion records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One link of the machine pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Plan,
    Fuzz,
    Lift,
    Compile,
    Run,
    Analyse,
    Save,
}

impl Stage {
    /// Every stage, in pipeline order.
    pub const ALL: [Stage; 7] = [
        Stage::Plan,
        Stage::Fuzz,
        Stage::Lift,
        Stage::Compile,
        Stage::Run,
        Stage::Analyse,
        Stage::Save,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Plan => "plan",
            Stage::Fuzz => "fuzz",
            Stage::Lift => "lift",
            Stage::Compile => "compile",
            Stage::Run => "run",
            Stage::Analyse => "analyse",
            Stage::Save => "save",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Timing record for one completed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl StageRecord {
    pub fn duration(&self) -> Duration {
        (self.end - self.start).to_std().unwrap_or_default()
    }
}
