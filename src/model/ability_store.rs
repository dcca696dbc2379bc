use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};

use crate::layout_engine::WindowLimits;

/// Identifies the component a session belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AbilityKey {
    pub bundle: String,
    pub module: String,
    pub ability: String,
}

impl AbilityKey {
    pub fn new(bundle: impl Into<String>, module: impl Into<String>, ability: impl Into<String>) -> Self {
        AbilityKey {
            bundle: bundle.into(),
            module: module.into(),
            ability: ability.into(),
        }
    }
}

impl fmt::Display for AbilityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.bundle, self.module, self.ability)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AbilityRecord {
    pub aspect_ratio: Option<f64>,
    pub limits: Option<WindowLimits>,
}

/// Remembers the last constraints applied to each ability so that new
/// sessions of it start with them.
#[derive(Clone, Default, Debug)]
pub struct AbilityStore(Arc<DashMap<AbilityKey, AbilityRecord>>);

impl AbilityStore {
    pub fn new() -> Self { Self::default() }

    pub fn get(&self, key: &AbilityKey) -> Option<AbilityRecord> { self.0.get(key).map(|e| *e) }

    pub fn aspect_ratio(&self, key: &AbilityKey) -> Option<f64> {
        self.get(key).and_then(|r| r.aspect_ratio)
    }

    pub fn set_aspect_ratio(&self, key: &AbilityKey, ratio: f64) {
        match self.0.entry(key.clone()) {
            Entry::Occupied(mut entry) => entry.get_mut().aspect_ratio = Some(ratio),
            Entry::Vacant(entry) => {
                entry.insert(AbilityRecord { aspect_ratio: Some(ratio), limits: None });
            }
        }
    }

    pub fn set_limits(&self, key: &AbilityKey, limits: WindowLimits) {
        match self.0.entry(key.clone()) {
            Entry::Occupied(mut entry) => entry.get_mut().limits = Some(limits),
            Entry::Vacant(entry) => {
                entry.insert(AbilityRecord { aspect_ratio: None, limits: Some(limits) });
            }
        }
    }

    pub fn remove(&self, key: &AbilityKey) -> Option<AbilityRecord> {
        self.0.remove(key).map(|(_, record)| record)
    }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}
