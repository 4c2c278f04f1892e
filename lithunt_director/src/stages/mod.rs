//! The pipeline stages and their dispatch table.

pub mod analyse;
pub mod compile;
pub mod fuzz;
pub mod lift;
pub mod planner;
pub mod run;

use crate::save::Save;
use lithunt_core::cancel::CancelToken;
use lithunt_core::plan::{Plan, Stage};

/// Every stage of one machine instance, fully configured.
pub struct StageSet {
    pub planner: planner::Planner,
    pub fuzz: fuzz::FuzzStage,
    pub lift: lift::LiftStage,
    pub compile: compile::CompileStage,
    pub run: run::RunStage,
    pub analyse: analyse::AnalyseStage,
    pub save: Save,
}

impl StageSet {
    /// Runs one stage against the plan flowing through the pass. Only the
    /// plan stage accepts an absent input plan.
    pub fn dispatch(
        &self,
        cancel: &CancelToken,
        stage: Stage,
        plan: Option<Plan>,
    ) -> anyhow::Result<Plan> {
        match stage {
            Stage::Plan => self.planner.run(cancel),
            Stage::Fuzz => self.fuzz.run(cancel, need(plan, stage)?),
            Stage::Lift => self.lift.run(cancel, need(plan, stage)?),
            Stage::Compile => self.compile.run(cancel, need(plan, stage)?),
            Stage::Run => self.run.run(cancel, need(plan, stage)?),
            Stage::Analyse => self.analyse.run(cancel, need(plan, stage)?),
            Stage::Save => self.save.run(cancel, need(plan, stage)?),
        }
    }
}

fn need(plan: Option<Plan>, stage: Stage) -> anyhow::Result<Plan> {
    plan.ok_or_else(|| anyhow::anyhow!("no plan flowing into {} stage", stage))
}
