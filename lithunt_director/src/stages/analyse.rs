//! The analyse stage: classifies the pass and notifies observers. The plan
//! flows through unchanged apart from the stage record.

use crate::config::QuantitySet;
use crate::observer::InstanceObserver;
use chrono::Utc;
use lithunt_core::analysis;
use lithunt_core::cancel::CancelToken;
use lithunt_core::plan::{Plan, Stage};
use std::sync::Arc;

pub struct AnalyseStage {
    pub quantities: QuantitySet,
    pub observers: Vec<Arc<dyn InstanceObserver>>,
}

impl AnalyseStage {
    pub fn run(&self, cancel: &CancelToken, plan: Plan) -> anyhow::Result<Plan> {
        let start = Utc::now();
        plan.check()?;
        plan.metadata.require_stage(Stage::Run)?;

        let an = analysis::analyse(cancel, &plan, self.quantities.nworkers)?;
        for o in &self.observers {
            o.on_analysis(&an);
        }

        let mut plan = plan;
        plan.metadata.record_stage(Stage::Analyse, start, Utc::now())?;
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testutil;
    use lithunt_core::analysis::Analysis;
    use std::path::Path;
    use std::sync::Mutex;

    struct CaptureObserver {
        seen: Mutex<Vec<usize>>,
    }

    impl InstanceObserver for CaptureObserver {
        fn on_analysis(&self, analysis: &Analysis) {
            let total = lithunt_core::status::Status::ALL
                .iter()
                .map(|s| analysis.bucket_len(*s))
                .sum();
            self.seen.lock().unwrap().push(total);
        }
    }

    #[test]
    fn analyse_requires_run_and_notifies() {
        let tmp = tempfile::tempdir().unwrap();
        let mut plan = testutil::compiled_plan(tmp.path(), &["SB", "MP"], Path::new("/bin/true"));
        let now = Utc::now();
        plan.metadata.record_stage(Stage::Run, now, now).unwrap();

        let obs = Arc::new(CaptureObserver {
            seen: Mutex::new(Vec::new()),
        });
        let stage = AnalyseStage {
            quantities: QuantitySet::default(),
            observers: vec![obs.clone()],
        };
        let out = stage.run(&CancelToken::new(), plan).unwrap();
        assert!(out.metadata.require_stage(Stage::Analyse).is_ok());
        assert_eq!(*obs.seen.lock().unwrap(), vec![2]);
    }

    #[test]
    fn missing_run_stage_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let plan = testutil::compiled_plan(tmp.path(), &["SB"], Path::new("/bin/true"));
        let stage = AnalyseStage {
            quantities: QuantitySet::default(),
            observers: Vec::new(),
        };
        assert!(stage.run(&CancelToken::new(), plan).is_err());
    }
}
