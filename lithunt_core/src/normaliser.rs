//! Path normalisation for archiving subjects.
//!
//! Archives use predictable member names regardless of where the scratch
//! tree put the originals; the mapping is kept normalised-name-first so
//! collisions are caught when two originals would land on the same entry.

use crate::filekind::{self, Kind, Location};
use crate::subject::Subject;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormaliseError {
    #[error("path already mapped by normaliser: {0}")]
    Collision(String),
}

pub const FILE_ORIG_LITMUS: &str = "orig.litmus";
pub const FILE_FUZZ_LITMUS: &str = "fuzz.litmus";
pub const FILE_FUZZ_TRACE: &str = "fuzz.trace";
pub const FILE_BIN: &str = "bin";
pub const FILE_COMPILE_LOG: &str = "compile.log";
pub const DIR_COMPILES: &str = "compiles";
pub const DIR_RECIPES: &str = "recipes";

/// Where a normalised archive entry came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub original: PathBuf,
    pub kind: Kind,
    pub loc: Location,
}

/// Mapping from normalised archive path to origin record. Ordered, so
/// archive members come out in a stable order.
pub type NormMap = BTreeMap<String, Origin>;

/// Normalises a single subject's file paths.
pub struct Normaliser {
    root: String,
    mappings: NormMap,
}

impl Normaliser {
    /// Creates a normaliser; `root` prefixes every normalised name and may
    /// be empty for archive-local names.
    pub fn new(root: impl Into<String>) -> Self {
        Normaliser {
            root: root.into(),
            mappings: NormMap::new(),
        }
    }

    pub fn mappings(&self) -> &NormMap {
        &self.mappings
    }

    pub fn into_mappings(self) -> NormMap {
        self.mappings
    }

    /// Maps every file of `subject`, returning a copy whose paths are the
    /// normalised ones.
    pub fn subject(&mut self, subject: &Subject) -> Result<Subject, NormaliseError> {
        let mut out = subject.clone();

        out.source = self.add(
            &subject.source,
            self.join(&[FILE_ORIG_LITMUS]),
            filekind::LITMUS,
            Location::OrigLitmus,
        )?;

        if let Some(fuzz) = out.fuzz.as_mut() {
            fuzz.litmus = self.add(
                &fuzz.litmus.clone(),
                self.join(&[FILE_FUZZ_LITMUS]),
                filekind::LITMUS,
                Location::FuzzLitmus,
            )?;
            if let Some(trace) = fuzz.trace.clone() {
                fuzz.trace = Some(self.add(
                    &trace,
                    self.join(&[FILE_FUZZ_TRACE]),
                    filekind::TRACE,
                    Location::FuzzTrace,
                )?);
            }
        }

        let mut cids: Vec<String> = out.compiles.keys().cloned().collect();
        cids.sort();
        for cid in cids {
            if let Some(c) = out.compiles.get_mut(&cid) {
                if let Some(bin) = c.bin.clone() {
                    c.bin = Some(self.add(
                        &bin,
                        self.join(&[DIR_COMPILES, &cid, FILE_BIN]),
                        filekind::BIN,
                        Location::CompileBin,
                    )?);
                }
                c.log = self.add(
                    &c.log.clone(),
                    self.join(&[DIR_COMPILES, &cid, FILE_COMPILE_LOG]),
                    filekind::LOG,
                    Location::CompileLog,
                )?;
            }
        }

        let mut arches: Vec<String> = out.recipes.keys().cloned().collect();
        arches.sort();
        for arch in arches {
            if let Some(recipe) = out.recipes.get_mut(&arch) {
                let old_dir = recipe.dir.clone();
                for file in recipe.files.clone() {
                    self.add(
                        &old_dir.join(&file),
                        self.join(&[DIR_RECIPES, &arch, &file]),
                        filekind::guess_from_path(Path::new(&file)),
                        Location::Harness,
                    )?;
                }
                recipe.dir = PathBuf::from(self.join(&[DIR_RECIPES, &arch]));
            }
        }

        // Run results carry no paths, so there is nothing to normalise.
        Ok(out)
    }

    fn join(&self, segs: &[&str]) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(segs.len() + 1);
        if !self.root.is_empty() {
            parts.push(&self.root);
        }
        parts.extend_from_slice(segs);
        parts.join("/")
    }

    fn add(
        &mut self,
        original: &Path,
        normalised: String,
        kind: Kind,
        loc: Location,
    ) -> Result<PathBuf, NormaliseError> {
        if self.mappings.contains_key(&normalised) {
            return Err(NormaliseError::Collision(normalised));
        }
        self.mappings.insert(
            normalised.clone(),
            Origin {
                original: original.to_path_buf(),
                kind,
                loc,
            },
        );
        Ok(PathBuf::from(normalised))
    }
}
