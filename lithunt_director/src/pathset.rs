//! Pre-computed path sets for a machine instance.
//!
//! Everything ephemeral lands under `<out>/scratch/<machine>`, everything
//! worth keeping under `<out>/saved/<machine>`.

use chrono::{DateTime, Utc};
use lithunt_core::plan::Stage;
use lithunt_core::status::Status;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const SEG_SAVED: &str = "saved";
const SEG_SCRATCH: &str = "scratch";
const SEG_FUZZ: &str = "fuzz";
const SEG_LIFT: &str = "lift";
const SEG_RUN: &str = "run";

pub const FILE_BIN: &str = "a.out";
pub const FILE_COMPILE_LOG: &str = "compile.log";

#[derive(Debug, Clone)]
pub struct Pathset {
    pub saved: SavedPathset,
    pub scratch: ScratchPathset,
}

impl Pathset {
    pub fn new(root: &Path, machine_id: &str) -> Self {
        Pathset {
            saved: SavedPathset::new(root.join(SEG_SAVED).join(machine_id)),
            scratch: ScratchPathset::new(root.join(SEG_SCRATCH).join(machine_id)),
        }
    }
}

/// Scratch tree: per-stage working directories plus plan snapshots.
#[derive(Debug, Clone)]
pub struct ScratchPathset {
    root: PathBuf,
    pub dir_fuzz: PathBuf,
    pub dir_lift: PathBuf,
    pub dir_run: PathBuf,
}

impl ScratchPathset {
    pub fn new(root: PathBuf) -> Self {
        ScratchPathset {
            dir_fuzz: root.join(SEG_FUZZ),
            dir_lift: root.join(SEG_LIFT),
            dir_run: root.join(SEG_RUN),
            root,
        }
    }

    fn dirs(&self) -> [&Path; 3] {
        [&self.dir_fuzz, &self.dir_lift, &self.dir_run]
    }

    pub fn prepare(&self) -> io::Result<()> {
        for d in self.dirs() {
            fs::create_dir_all(d)?;
        }
        Ok(())
    }

    /// Clears out the previous pass's artefacts. Runs at the top of each
    /// pass; the pass that made the mess is never the one cleaning it up,
    /// so a crashed pass leaves its state inspectable.
    pub fn cleanup(&self) -> io::Result<()> {
        for d in self.dirs() {
            if d.exists() {
                fs::remove_dir_all(d)?;
            }
            fs::create_dir_all(d)?;
        }
        Ok(())
    }

    /// Where the plan snapshot for `stage` goes.
    pub fn plan_file(&self, stage: Stage) -> PathBuf {
        self.root.join(format!("plan.{}.json", stage))
    }

    pub fn fuzz_litmus(&self, cycled_name: &str) -> PathBuf {
        self.dir_fuzz.join(format!("{}.litmus", cycled_name))
    }

    pub fn fuzz_trace(&self, cycled_name: &str) -> PathBuf {
        self.dir_fuzz.join(format!("{}.trace", cycled_name))
    }

    pub fn lift_dir(&self, arch: &str, subject: &str) -> PathBuf {
        self.dir_lift.join(arch).join(subject)
    }

    pub fn run_dir(&self, compiler: &str, subject: &str) -> PathBuf {
        self.dir_run.join(compiler).join(subject)
    }

    pub fn bin_path(&self, compiler: &str, subject: &str) -> PathBuf {
        self.run_dir(compiler, subject).join(FILE_BIN)
    }

    pub fn compile_log(&self, compiler: &str, subject: &str) -> PathBuf {
        self.run_dir(compiler, subject).join(FILE_COMPILE_LOG)
    }
}

/// Saved tree: one directory per (status, plan creation time) bucket.
#[derive(Debug, Clone)]
pub struct SavedPathset {
    root: PathBuf,
}

impl SavedPathset {
    pub fn new(root: PathBuf) -> Self {
        SavedPathset { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn prepare(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root)
    }

    pub fn bucket_dir(&self, status: Status, created: &DateTime<Utc>) -> PathBuf {
        self.root
            .join(status.to_string())
            .join(created.format("%Y%m%d_%H%M%S").to_string())
    }

    pub fn plan_file(&self, status: Status, created: &DateTime<Utc>) -> PathBuf {
        self.bucket_dir(status, created).join("plan.json")
    }

    pub fn tarball(&self, subject: &str, status: Status, created: &DateTime<Utc>) -> PathBuf {
        self.bucket_dir(status, created)
            .join(format!("{}.tar.gz", subject))
    }
}
