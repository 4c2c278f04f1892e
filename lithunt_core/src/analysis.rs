//! Analysis of a completed pass: status buckets, timing aggregation, and
//! the flag bitset that drives saving.

use crate::cancel::{CancelToken, Cancelled};
use crate::corpus::Corpus;
use crate::plan::{Plan, Stage};
use crate::status::Status;
use crate::HashMap;
use iota::iota;
use std::thread;
use std::time::Duration;

/// Bitset mirroring which non-Ok buckets are non-empty.
pub type AnalysisFlags = u8;

iota! {
    pub const FLAG_FILTERED: AnalysisFlags = 1 << (iota);
    , FLAG_FLAGGED
    , FLAG_COMPILE_FAIL
    , FLAG_COMPILE_TIMEOUT
    , FLAG_RUN_FAIL
    , FLAG_RUN_TIMEOUT
}

fn status_flag(status: Status) -> AnalysisFlags {
    match status {
        Status::Ok => 0,
        Status::Filtered => FLAG_FILTERED,
        Status::Flagged => FLAG_FLAGGED,
        Status::CompileFail => FLAG_COMPILE_FAIL,
        Status::CompileTimeout => FLAG_COMPILE_TIMEOUT,
        Status::RunFail => FLAG_RUN_FAIL,
        Status::RunTimeout => FLAG_RUN_TIMEOUT,
    }
}

/// Aggregate timing for one compiler across a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeStats {
    pub count: usize,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl TimeStats {
    pub fn record(&mut self, d: Duration) {
        if self.count == 0 || d < self.min {
            self.min = d;
        }
        if d > self.max {
            self.max = d;
        }
        self.count += 1;
        self.total += d;
    }

    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / self.count as u32
        }
    }
}

/// The product of one pass's analyse stage.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    /// Every subject, keyed by its terminal status. Bucket union equals the
    /// corpus.
    pub buckets: HashMap<Status, Corpus>,
    /// Per-compiler compile timing.
    pub compile_times: HashMap<String, TimeStats>,
    /// Per-compiler run timing.
    pub run_times: HashMap<String, TimeStats>,
    /// Wall-clock durations of the pass's completed stages.
    pub stage_times: Vec<(Stage, Duration)>,
    /// One bit per non-empty non-Ok bucket.
    pub flags: AnalysisFlags,
}

impl Analysis {
    pub fn bucket(&self, status: Status) -> Option<&Corpus> {
        self.buckets.get(&status)
    }

    pub fn bucket_len(&self, status: Status) -> usize {
        self.buckets.get(&status).map_or(0, Corpus::len)
    }

    /// Whether any bucket at or above [`Status::FIRST_BAD`] is populated.
    pub fn has_bad(&self) -> bool {
        self.flags & (FLAG_COMPILE_FAIL | FLAG_COMPILE_TIMEOUT | FLAG_RUN_FAIL | FLAG_RUN_TIMEOUT)
            != 0
    }
}

/// Buckets a corpus by terminal subject status.
///
/// Exposed separately so the save stage, which communicates with analyse
/// only through the plan, can rebuild the buckets cheaply.
pub fn bucket_statuses(corpus: &Corpus) -> HashMap<Status, Corpus> {
    let mut buckets: HashMap<Status, Corpus> = HashMap::default();
    for (name, subject) in corpus.iter() {
        let bucket = buckets.entry(subject.worst_status()).or_default();
        // Names are unique in the source corpus, so re-adding cannot fail.
        let _ = bucket.add(name.clone(), subject.clone());
    }
    buckets
}

/// Analyses `plan`, classifying subjects on up to `nworkers` threads.
pub fn analyse(
    cancel: &CancelToken,
    plan: &Plan,
    nworkers: usize,
) -> Result<Analysis, Cancelled> {
    cancel.check()?;
    let names = plan.corpus.names();
    let statuses = classify_parallel(plan, &names, nworkers.max(1));

    let mut an = Analysis::default();
    for (name, status) in names.iter().zip(statuses) {
        if let Some(subject) = plan.corpus.get(name) {
            an.flags |= status_flag(status);
            let _ = an
                .buckets
                .entry(status)
                .or_default()
                .add(name.clone(), subject.clone());
        }
    }

    for (_, subject) in plan.corpus.iter() {
        for (cid, c) in subject.compiles.iter() {
            an.compile_times
                .entry(cid.clone())
                .or_default()
                .record(c.result.duration);
        }
        for (cid, r) in subject.runs.iter() {
            an.run_times
                .entry(cid.clone())
                .or_default()
                .record(r.result.duration);
        }
    }

    an.stage_times = plan
        .metadata
        .stages
        .iter()
        .map(|r| (r.stage, r.duration()))
        .collect();

    Ok(an)
}

fn classify_parallel(plan: &Plan, names: &[String], nworkers: usize) -> Vec<Status> {
    let chunk = names.len().div_ceil(nworkers.max(1)).max(1);
    thread::scope(|s| {
        let handles: Vec<_> = names
            .chunks(chunk)
            .map(|part| {
                s.spawn(move || {
                    part.iter()
                        .map(|n| plan.corpus.get(n).map_or(Status::Ok, |s| s.worst_status()))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap_or_default())
            .collect()
    })
}
