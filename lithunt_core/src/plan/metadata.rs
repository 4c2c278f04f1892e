//! Plan metadata: creation time, seed, schema version and completed stages.

use super::stage::{Stage, StageRecord};
use super::PlanError;
use crate::RngType;
use chrono::{DateTime, Utc};
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// The plan schema version this build reads and writes (YYYYMMDD).
/// Plans of any other version are rejected, not migrated.
pub const PLAN_VERSION: u32 = 20260802;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// When the plan was created; also names save buckets.
    pub created: DateTime<Utc>,
    /// Fixed seed driving every randomised decision in the pass.
    pub seed: u64,
    /// Schema version tag.
    pub version: u32,
    /// Records of completed stages, in completion order.
    #[serde(default)]
    pub stages: Vec<StageRecord>,
}

impl Metadata {
    /// Creates metadata stamped now. Without an explicit seed, the creation
    /// time seeds the RNG.
    pub fn new(seed: Option<u64>) -> Self {
        let created = Utc::now();
        let seed = seed.unwrap_or_else(|| created.timestamp_nanos_opt().unwrap_or(0) as u64);
        Metadata {
            created,
            seed,
            version: PLAN_VERSION,
            stages: Vec::new(),
        }
    }

    pub fn check_version(&self) -> Result<(), PlanError> {
        if self.version != PLAN_VERSION {
            return Err(PlanError::VersionMismatch {
                found: self.version,
                want: PLAN_VERSION,
            });
        }
        Ok(())
    }

    /// A fresh RNG over this metadata's seed.
    pub fn rng(&self) -> RngType {
        RngType::seed_from_u64(self.seed)
    }

    pub fn stage_record(&self, stage: Stage) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    /// Appends a completion record; a stage may complete at most once per
    /// pass.
    pub fn record_stage(
        &mut self,
        stage: Stage,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(), PlanError> {
        if self.stage_record(stage).is_some() {
            return Err(PlanError::DuplicateStage(stage));
        }
        self.stages.push(StageRecord { stage, start, end });
        Ok(())
    }

    /// Fails unless `stage` has already completed; stages call this on their
    /// prerequisites.
    pub fn require_stage(&self, stage: Stage) -> Result<(), PlanError> {
        if self.stage_record(stage).is_none() {
            return Err(PlanError::MissingStage(stage));
        }
        Ok(())
    }
}
