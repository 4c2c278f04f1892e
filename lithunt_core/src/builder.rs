//! The builder: a fan-out/fan-in engine that applies parallel-worker
//! requests to a working corpus.
//!
//! Worker tasks pull distinct subjects off a shared queue and stream typed
//! requests into a bounded channel; a single applier owns the working corpus
//! and applies exactly the manifest's request count, serially. Intra-worker
//! request order survives the channel; cross-worker order is unspecified.

use crate::cancel::{CancelToken, Cancelled};
use crate::corpus::{Corpus, CorpusError};
use crate::recipe::Recipe;
use crate::subject::{CompileResult, Named, RunResult, Subject, SubjectError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::Arc;
use std::thread;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Corpus(#[from] CorpusError),
    #[error("in request for subject {name}: {source}")]
    Subject {
        name: String,
        #[source]
        source: SubjectError,
    },
    #[error("request names unknown subject: {0}")]
    UnknownSubject(String),
    #[error("builder finished early: applied {got} of {want} requests")]
    Incomplete { got: usize, want: usize },
    #[error("request channel closed")]
    ChannelClosed,
    #[error("operation cancelled")]
    Cancelled(#[from] Cancelled),
    #[error("builder worker panicked")]
    WorkerPanic,
}

/// Names a build and commits to its exact request count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub name: String,
    pub nreqs: usize,
}

impl Manifest {
    pub fn new(name: impl Into<String>, nreqs: usize) -> Self {
        Manifest {
            name: name.into(),
            nreqs,
        }
    }
}

/// A corpus mutation, tagged with the subject it concerns.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub name: String,
    pub op: RequestOp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestOp {
    /// Insert a new subject; the name must be fresh.
    Add(Subject),
    /// Attach a compile result under the given compiler ID.
    Compile(String, CompileResult),
    /// Attach a lifted recipe under the given architecture.
    Lift(String, Recipe),
    /// Attach a run result under the given compiler ID.
    Run(String, RunResult),
}

impl Request {
    pub fn add(name: impl Into<String>, subject: Subject) -> Self {
        Request {
            name: name.into(),
            op: RequestOp::Add(subject),
        }
    }

    pub fn compile(name: impl Into<String>, compiler: impl Into<String>, res: CompileResult) -> Self {
        Request {
            name: name.into(),
            op: RequestOp::Compile(compiler.into(), res),
        }
    }

    pub fn lift(name: impl Into<String>, arch: impl Into<String>, recipe: Recipe) -> Self {
        Request {
            name: name.into(),
            op: RequestOp::Lift(arch.into(), recipe),
        }
    }

    pub fn run(name: impl Into<String>, compiler: impl Into<String>, res: RunResult) -> Self {
        Request {
            name: name.into(),
            op: RequestOp::Run(compiler.into(), res),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.op {
            RequestOp::Add(_) => "add",
            RequestOp::Compile(..) => "compile",
            RequestOp::Lift(..) => "lift",
            RequestOp::Run(..) => "run",
        }
    }
}

/// Observes builder progress.
pub trait BuildObserver: Send + Sync {
    fn on_build_start(&self, _manifest: &Manifest) {}
    fn on_build_step(&self, _done: usize, _req: &Request) {}
    fn on_build_end(&self, _name: &str) {}
}

/// Handed to worker jobs: the sending end of the request channel plus the
/// build-local cancellation token.
pub struct RequestSender {
    tx: SyncSender<Request>,
    cancel: CancelToken,
}

impl RequestSender {
    /// The token subprocess drivers should poll while this build runs.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Sends one request to the applier, blocking while the channel is full.
    pub fn send(&self, req: Request) -> Result<(), BuildError> {
        self.cancel.check()?;
        self.tx.send(req).map_err(|_| BuildError::ChannelClosed)
    }
}

/// Runs a parallel build over `jobs` against a deep copy of `init`.
///
/// `f` is called once per job, in unspecified cross-worker order, and must
/// account for its share of `manifest.nreqs` requests. Returns the new
/// corpus once exactly `nreqs` requests have applied, or the first error.
pub fn par_build<E, F>(
    cancel: &CancelToken,
    nworkers: usize,
    init: &Corpus,
    jobs: Vec<Named>,
    manifest: Manifest,
    observers: &[Arc<dyn BuildObserver>],
    f: F,
) -> Result<Corpus, E>
where
    E: From<BuildError> + Send,
    F: Fn(&RequestSender, &Named) -> Result<(), E> + Sync,
{
    for o in observers {
        o.on_build_start(&manifest);
    }

    let nworkers = nworkers.max(1).min(jobs.len().max(1));
    let build_cancel = cancel.child();
    let mut corpus = init.clone();
    let cursor = AtomicUsize::new(0);
    let fref = &f;
    let jobs = &jobs;

    let build_result: Result<(), E> = thread::scope(|s| {
        let (tx, rx) = mpsc::sync_channel(nworkers);
        let mut handles = Vec::with_capacity(nworkers);
        for _ in 0..nworkers {
            let sender = RequestSender {
                tx: tx.clone(),
                cancel: build_cancel.clone(),
            };
            let cursor = &cursor;
            let build_cancel = &build_cancel;
            handles.push(s.spawn(move || -> Result<(), E> {
                loop {
                    let i = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(job) = jobs.get(i) else {
                        return Ok(());
                    };
                    if let Err(e) = build_cancel.check() {
                        return Err(BuildError::from(e).into());
                    }
                    if let Err(e) = fref(&sender, job) {
                        // Stop the siblings; the first error still wins.
                        build_cancel.cancel();
                        return Err(e);
                    }
                }
            }));
        }
        drop(tx);

        let mut applier_err: Option<BuildError> = None;
        let mut done = 0usize;
        while done < manifest.nreqs {
            let req = match rx.recv() {
                Ok(req) => req,
                Err(_) => break, // every sender gone
            };
            if let Err(e) = apply(&mut corpus, &req) {
                build_cancel.cancel();
                applier_err = Some(e);
                break;
            }
            done += 1;
            for o in observers {
                o.on_build_step(done, &req);
            }
        }
        drop(rx); // unblocks any worker still sending

        let mut worker_err: Option<E> = None;
        for h in handles {
            match h.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if worker_err.is_none() {
                        worker_err = Some(e);
                    }
                }
                Err(_) => {
                    if worker_err.is_none() {
                        worker_err = Some(BuildError::WorkerPanic.into());
                    }
                }
            }
        }

        if let Some(e) = applier_err {
            return Err(e.into());
        }
        if let Some(e) = worker_err {
            return Err(e);
        }
        if done < manifest.nreqs {
            let err = match build_cancel.check() {
                Err(c) => BuildError::from(c),
                Ok(()) => BuildError::Incomplete {
                    got: done,
                    want: manifest.nreqs,
                },
            };
            return Err(err.into());
        }
        Ok(())
    });
    build_result?;

    for o in observers {
        o.on_build_end(&manifest.name);
    }
    Ok(corpus)
}

fn apply(corpus: &mut Corpus, req: &Request) -> Result<(), BuildError> {
    let name = &req.name;
    let subject_of = |e: SubjectError| BuildError::Subject {
        name: name.clone(),
        source: e,
    };
    match &req.op {
        RequestOp::Add(subject) => corpus.add(name.clone(), subject.clone())?,
        RequestOp::Compile(compiler, res) => corpus
            .get_mut(name)
            .ok_or_else(|| BuildError::UnknownSubject(name.clone()))?
            .add_compile(compiler.clone(), res.clone())
            .map_err(subject_of)?,
        RequestOp::Lift(arch, recipe) => corpus
            .get_mut(name)
            .ok_or_else(|| BuildError::UnknownSubject(name.clone()))?
            .add_recipe(arch.clone(), recipe.clone())
            .map_err(subject_of)?,
        RequestOp::Run(compiler, res) => corpus
            .get_mut(name)
            .ok_or_else(|| BuildError::UnknownSubject(name.clone()))?
            .add_run(compiler.clone(), res.clone())
            .map_err(subject_of)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::Status;
    use crate::subject::ProcResult;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::time::Duration;

    fn corpus_of(names: &[&str]) -> Corpus {
        let mut c = Corpus::new();
        for n in names {
            c.add(
                n.to_string(),
                Subject::with_source(PathBuf::from(format!("{}.litmus", n))),
            )
            .unwrap();
        }
        c
    }

    fn run_ok() -> RunResult {
        RunResult {
            result: ProcResult {
                status: Status::Ok,
                duration: Duration::from_millis(5),
            },
            obs: None,
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        events: Mutex<Vec<String>>,
    }

    impl BuildObserver for CountingObserver {
        fn on_build_start(&self, m: &Manifest) {
            self.events
                .lock()
                .unwrap()
                .push(format!("start {} {}", m.name, m.nreqs));
        }
        fn on_build_step(&self, done: usize, req: &Request) {
            self.events
                .lock()
                .unwrap()
                .push(format!("step {} {} {}", done, req.kind(), req.name));
        }
        fn on_build_end(&self, name: &str) {
            self.events.lock().unwrap().push(format!("end {}", name));
        }
    }

    #[test]
    fn fans_out_adds_and_applies_all() {
        let init = Corpus::new();
        let jobs = corpus_of(&["a", "b", "c"]).named();
        let cancel = CancelToken::new();
        let obs = Arc::new(CountingObserver::default());
        let observers: Vec<Arc<dyn BuildObserver>> = vec![obs.clone()];

        let out: Corpus = par_build::<BuildError, _>(
            &cancel,
            2,
            &init,
            jobs,
            Manifest::new("fuzz", 6),
            &observers,
            |tx, job| {
                for cycle in 0..2 {
                    tx.send(Request::add(
                        format!("{}_{}", job.name, cycle),
                        job.subject.clone(),
                    ))?;
                }
                Ok(())
            },
        )
        .unwrap();

        assert_eq!(out.len(), 6);
        assert!(out.contains("a_0") && out.contains("c_1"));
        let events = obs.events.lock().unwrap();
        assert_eq!(events.first().unwrap(), "start fuzz 6");
        assert_eq!(events.last().unwrap(), "end fuzz");
        assert_eq!(events.len(), 8);
    }

    #[test]
    fn duplicate_add_fails_the_build() {
        let init = Corpus::new();
        let jobs = corpus_of(&["a", "b"]).named();
        let cancel = CancelToken::new();

        let res = par_build::<BuildError, _>(
            &cancel,
            2,
            &init,
            jobs,
            Manifest::new("fuzz", 4),
            &[],
            |tx, job| {
                // Every worker claims the same cycled name.
                tx.send(Request::add("dup_0", job.subject.clone()))?;
                tx.send(Request::add("dup_0", job.subject.clone()))?;
                Ok(())
            },
        );
        match res {
            Err(BuildError::Corpus(CorpusError::Duplicate(name))) => assert_eq!(name, "dup_0"),
            other => panic!("expected duplicate error, got {:?}", other.map(|c| c.len())),
        }
        assert!(!cancel.is_cancelled(), "instance token must survive");
    }

    #[test]
    fn attach_requests_modify_existing_subjects() {
        let init = corpus_of(&["a", "b"]);
        let jobs = init.named();
        let cancel = CancelToken::new();

        let out: Corpus = par_build::<BuildError, _>(
            &cancel,
            4,
            &init,
            jobs,
            Manifest::new("run", 2),
            &[],
            |tx, job| {
                tx.send(Request::run(job.name.clone(), "gcc", run_ok()))?;
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.get("a").unwrap().runs.contains_key("gcc"));
        assert!(out.get("b").unwrap().runs.contains_key("gcc"));
    }

    #[test]
    fn unknown_subject_is_an_error() {
        let init = Corpus::new();
        let jobs = corpus_of(&["a"]).named();
        let cancel = CancelToken::new();

        let res = par_build::<BuildError, _>(
            &cancel,
            1,
            &init,
            jobs,
            Manifest::new("run", 1),
            &[],
            |tx, job| {
                tx.send(Request::run(job.name.clone(), "gcc", run_ok()))?;
                Ok(())
            },
        );
        assert!(matches!(res, Err(BuildError::UnknownSubject(n)) if n == "a"));
    }

    #[test]
    fn worker_error_cancels_siblings_and_wins() {
        let init = Corpus::new();
        let jobs = corpus_of(&["a", "b", "c", "d", "e", "f", "g", "h"]).named();
        let cancel = CancelToken::new();

        let res = par_build::<BuildError, _>(
            &cancel,
            2,
            &init,
            jobs,
            Manifest::new("fuzz", 8),
            &[],
            |tx, job| {
                if job.name == "a" {
                    return Err(BuildError::WorkerPanic);
                }
                tx.send(Request::add(job.name.clone(), job.subject.clone()))?;
                Ok(())
            },
        );
        assert!(res.is_err());
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn short_request_count_reports_incomplete() {
        let init = Corpus::new();
        let jobs = corpus_of(&["a"]).named();
        let cancel = CancelToken::new();

        let res = par_build::<BuildError, _>(
            &cancel,
            1,
            &init,
            jobs,
            Manifest::new("fuzz", 5),
            &[],
            |tx, job| {
                tx.send(Request::add(job.name.clone(), job.subject.clone()))?;
                Ok(())
            },
        );
        assert!(matches!(
            res,
            Err(BuildError::Incomplete { got: 1, want: 5 })
        ));
    }

    #[test]
    fn cancelled_token_stops_the_build() {
        let init = Corpus::new();
        let jobs = corpus_of(&["a", "b"]).named();
        let cancel = CancelToken::new();
        cancel.cancel();

        let res = par_build::<BuildError, _>(
            &cancel,
            2,
            &init,
            jobs,
            Manifest::new("fuzz", 2),
            &[],
            |tx, job| {
                tx.send(Request::add(job.name.clone(), job.subject.clone()))?;
                Ok(())
            },
        );
        assert!(matches!(res, Err(BuildError::Cancelled(_))));
    }
}
