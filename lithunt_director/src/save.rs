//! The save stage: archives interesting subjects for later inspection.
//!
//! For each bucket the policy selects, the stage writes the pass's plan and
//! one gzip-compressed tarball per subject, with member names normalised so
//! archives look the same regardless of scratch layout.

use crate::pathset::SavedPathset;
use anyhow::Context;
use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use lithunt_core::analysis;
use lithunt_core::cancel::CancelToken;
use lithunt_core::normaliser::Normaliser;
use lithunt_core::plan::{Plan, Stage};
use lithunt_core::status::Status;
use lithunt_core::subject::Named;
use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

/// Which statuses are worth archiving.
///
/// `BadOnly` keeps only toolchain and runtime failures; `FlaggedAndBad`
/// also archives postcondition violations, which some campaigns treat as
/// the whole point and others as routine noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SavePolicy {
    #[default]
    BadOnly,
    FlaggedAndBad,
}

impl SavePolicy {
    pub fn should_save(self, status: Status) -> bool {
        match self {
            SavePolicy::BadOnly => status.is_bad(),
            SavePolicy::FlaggedAndBad => status.is_bad() || status == Status::Flagged,
        }
    }
}

pub struct Save {
    pub paths: SavedPathset,
    pub policy: SavePolicy,
}

impl Save {
    pub fn run(&self, cancel: &CancelToken, plan: Plan) -> anyhow::Result<Plan> {
        let start = Utc::now();
        plan.check()?;
        plan.metadata.require_stage(Stage::Analyse)?;

        // Stages communicate only via the plan, so the buckets are rebuilt
        // here rather than smuggled over from the analyser.
        let buckets = analysis::bucket_statuses(&plan.corpus);
        for status in Status::ALL {
            if !self.policy.should_save(status) {
                continue;
            }
            let Some(bucket) = buckets.get(&status) else {
                continue;
            };
            if bucket.is_empty() {
                continue;
            }
            self.save_bucket(cancel, status, bucket.named(), &plan)
                .with_context(|| format!("saving {} bucket", status))?;
        }

        let mut plan = plan;
        plan.metadata.record_stage(Stage::Save, start, Utc::now())?;
        Ok(plan)
    }

    fn save_bucket(
        &self,
        cancel: &CancelToken,
        status: Status,
        subjects: Vec<Named>,
        plan: &Plan,
    ) -> anyhow::Result<()> {
        let created = &plan.metadata.created;
        let dir = self.paths.bucket_dir(status, created);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating {}", dir.display()))?;

        plan.dump_file(&self.paths.plan_file(status, created))
            .context("writing bucket plan")?;

        for named in subjects {
            cancel.check()?;
            let tarpath = self.paths.tarball(&named.name, status, created);
            log::info!("archiving {} (to {})", named.name, tarpath.display());
            archive_subject(cancel, &named, &tarpath)
                .with_context(|| format!("tarring subject {}", named.name))?;
        }
        Ok(())
    }
}

/// Writes one subject's artefacts as `<subject>.tar.gz`.
///
/// Close order matters: the tar stream must finish before the gzip stream,
/// which must finish before the file; the first error along the way wins.
fn archive_subject(cancel: &CancelToken, named: &Named, tarpath: &Path) -> anyhow::Result<()> {
    let mut norm = Normaliser::new("");
    norm.subject(&named.subject)?;

    let file = File::create(tarpath)
        .with_context(|| format!("create {}", tarpath.display()))?;
    let gz = GzEncoder::new(file, Compression::default());
    let mut tar = tar::Builder::new(gz);

    for (npath, origin) in norm.mappings() {
        cancel.check()?;
        match tar.append_path_with_name(&origin.original, npath) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // A vanished original is worth a note, not a failed pass.
                log::warn!(
                    "file missing when archiving: {}",
                    origin.original.display()
                );
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("archiving {}", origin.original.display()))
            }
        }
    }

    let gz = tar.into_inner().context("closing tar stream")?;
    gz.finish().context("closing gzip stream")?;
    Ok(())
}
