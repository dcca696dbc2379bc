//! Collection aliases used throughout the crate. Hashed maps use the Fx
//! hasher; keys are small integer ids.

pub use std::collections::{BTreeMap, BTreeSet, VecDeque};

pub type HashMap<K, V> = rustc_hash::FxHashMap<K, V>;
pub type HashSet<K> = rustc_hash::FxHashSet<K>;
