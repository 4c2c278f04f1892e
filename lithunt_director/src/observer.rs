//! Observers for instance and builder progress.

use chrono::{DateTime, Utc};
use lithunt_core::analysis::Analysis;
use lithunt_core::builder::{BuildObserver, Manifest, Request};
use lithunt_core::status::Status;
use std::sync::Arc;

/// Observes instance-level events.
pub trait InstanceObserver: Send + Sync {
    fn on_iteration(&self, _iter: u64, _at: DateTime<Utc>) {}
    fn on_analysis(&self, _analysis: &Analysis) {}
}

/// The observer sets a machine instance carries.
#[derive(Clone, Default)]
pub struct ObserverSet {
    pub instance: Vec<Arc<dyn InstanceObserver>>,
    pub build: Vec<Arc<dyn BuildObserver>>,
}

impl ObserverSet {
    /// The default set: everything goes to the log.
    pub fn logging() -> Self {
        let log = Arc::new(LogObserver);
        ObserverSet {
            instance: vec![log.clone()],
            build: vec![log],
        }
    }
}

/// Routes observations to the `log` facade.
pub struct LogObserver;

impl InstanceObserver for LogObserver {
    fn on_iteration(&self, iter: u64, at: DateTime<Utc>) {
        log::info!("iteration {} starting at {}", iter, at.format("%H:%M:%S"));
    }

    fn on_analysis(&self, analysis: &Analysis) {
        let mut parts = Vec::new();
        for status in Status::ALL {
            let n = analysis.bucket_len(status);
            if n > 0 {
                parts.push(format!("{}: {}", status, n));
            }
        }
        log::info!("analysis: {}", parts.join(", "));
    }
}

impl BuildObserver for LogObserver {
    fn on_build_start(&self, manifest: &Manifest) {
        log::info!("{}: {} requests expected", manifest.name, manifest.nreqs);
    }

    fn on_build_step(&self, done: usize, req: &Request) {
        log::debug!("build step {}: {} {}", done, req.kind(), req.name);
    }

    fn on_build_end(&self, name: &str) {
        log::info!("{}: done", name);
    }
}
