//! Core data model and algorithms of lithunt

use ahash::{AHashMap, AHashSet};

pub mod analysis;
pub mod builder;
pub mod cancel;
pub mod corpus;
pub mod filekind;
pub mod normaliser;
pub mod obs;
pub mod plan;
pub mod recipe;
pub mod status;
pub mod subject;

pub type HashMap<K, V> = AHashMap<K, V>;
pub type HashSet<V> = AHashSet<V>;
pub type RngType = rand::rngs::SmallRng;
