//! The corpus: a unique-keyed collection of subjects flowing through the
//! pipeline.

use crate::subject::{Named, Subject};
use crate::{HashMap, RngType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CorpusError {
    #[error("no subjects in corpus")]
    None,
    #[error("corpus too small: got {got}, want {want}")]
    Small { got: usize, want: usize },
    #[error("duplicate subject name: {0}")]
    Duplicate(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Corpus {
    subjects: HashMap<String, Subject>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Subject> {
        self.subjects.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Subject> {
        self.subjects.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.subjects.contains_key(name)
    }

    /// Inserts a new subject; duplicate names are an error.
    pub fn add(&mut self, name: String, subject: Subject) -> Result<(), CorpusError> {
        if self.subjects.contains_key(&name) {
            return Err(CorpusError::Duplicate(name));
        }
        self.subjects.insert(name, subject);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Subject)> {
        self.subjects.iter()
    }

    /// Subject names in sorted order; iteration order of the underlying map
    /// is arbitrary, so reporting and work queues go through this.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.subjects.keys().cloned().collect();
        names.sort();
        names
    }

    /// Name/subject pairs in sorted name order, for handing to worker jobs.
    pub fn named(&self) -> Vec<Named> {
        let mut named: Vec<Named> = self
            .subjects
            .iter()
            .map(|(n, s)| Named::new(n.clone(), s.clone()))
            .collect();
        named.sort_by(|a, b| a.name.cmp(&b.name));
        named
    }

    /// Samples the corpus down to `size` subjects using `rng`.
    ///
    /// A size of zero means no limit; a corpus at or under the limit is
    /// returned whole. Errors with [`CorpusError::None`] on an empty corpus.
    pub fn sample(&self, rng: &mut RngType, size: usize) -> Result<Corpus, CorpusError> {
        if self.is_empty() {
            return Err(CorpusError::None);
        }
        if size == 0 || self.len() <= size {
            return Ok(self.clone());
        }
        let names = self.names();
        let chosen = rand::seq::index::sample(rng, names.len(), size);
        let mut out = Corpus::new();
        for i in chosen.iter() {
            let name = &names[i];
            if let Some(s) = self.subjects.get(name) {
                out.add(name.clone(), s.clone())?;
            }
        }
        Ok(out)
    }
}

impl FromIterator<(String, Subject)> for Corpus {
    fn from_iter<T: IntoIterator<Item = (String, Subject)>>(iter: T) -> Self {
        Corpus {
            subjects: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::path::PathBuf;

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

    #[test]
    fn add_rejects_duplicates() {
        let mut c = corpus_of(&["SB"]);
        assert_eq!(
            c.add("SB".to_string(), Subject::default()),
            Err(CorpusError::Duplicate("SB".to_string()))
        );
    }

    #[test]
    fn sample_empty_is_error() {
        let mut rng = RngType::seed_from_u64(0);
        assert_eq!(Corpus::new().sample(&mut rng, 3), Err(CorpusError::None));
    }

    #[test]
    fn sample_no_limit_copies() {
        let c = corpus_of(&["a", "b", "c"]);
        let mut rng = RngType::seed_from_u64(0);
        assert_eq!(c.sample(&mut rng, 0).unwrap(), c);
        assert_eq!(c.sample(&mut rng, 10).unwrap(), c);
    }

    #[test]
    fn sample_limits_and_keeps_keys_unique() {
        let c = corpus_of(&["a", "b", "c", "d", "e"]);
        let mut rng = RngType::seed_from_u64(42);
        let s = c.sample(&mut rng, 2).unwrap();
        assert_eq!(s.len(), 2);
        for name in s.names() {
            assert!(c.contains(&name));
        }
    }

    #[test]
    fn named_is_sorted() {
        let c = corpus_of(&["z", "a", "m"]);
        let named: Vec<String> = c.named().into_iter().map(|n| n.name).collect();
        assert_eq!(named, vec!["a", "m", "z"]);
    }
}
