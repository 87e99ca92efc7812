//! Observers: hooks fired on structural mutations
//!
//! For every `(event kind, data type)` pair the registry keeps a list of
//! hooks, walked in registration order with the affected entity. Hooks run
//! against the world directly; re-entrant structural changes are bounded by
//! the world's recursion guard, and commands they defer are flushed within
//! the same commit cycle.

use std::sync::Arc;

use ahash::AHashMap;

use crate::entity::Entity;
use crate::types::DataTypeId;
use crate::world::World;

/// Structural event kinds observers can hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObserverKind {
    Add,
    Remove,
    Relate,
    Unrelate,
}

impl ObserverKind {
    pub fn label(self) -> &'static str {
        match self {
            ObserverKind::Add => "add",
            ObserverKind::Remove => "remove",
            ObserverKind::Relate => "relate",
            ObserverKind::Unrelate => "unrelate",
        }
    }
}

/// Handle of a registered observer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(pub usize);

pub(crate) struct ObserverEntry {
    pub name: String,
    pub callback: Box<dyn Fn(&mut World, Entity) + Send + Sync>,
}

/// Registry of observers keyed by event kind and data type
#[derive(Default)]
pub struct ObserverRegistry {
    entries: Vec<Arc<ObserverEntry>>,
    by_key: AHashMap<(ObserverKind, DataTypeId), Vec<usize>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(
        &mut self,
        kind: ObserverKind,
        data_type: DataTypeId,
        name: impl Into<String>,
        callback: Box<dyn Fn(&mut World, Entity) + Send + Sync>,
    ) -> ObserverId {
        let id = self.entries.len();
        self.entries.push(Arc::new(ObserverEntry {
            name: name.into(),
            callback,
        }));
        self.by_key.entry((kind, data_type)).or_default().push(id);
        ObserverId(id)
    }

    /// Hooks for `(kind, data_type)` in registration order
    ///
    /// Returns clones so the registry is not borrowed while hooks run; a
    /// hook may register further observers.
    pub(crate) fn matching(
        &self,
        kind: ObserverKind,
        data_type: DataTypeId,
    ) -> Vec<Arc<ObserverEntry>> {
        match self.by_key.get(&(kind, data_type)) {
            Some(ids) => ids.iter().map(|&id| self.entries[id].clone()).collect(),
            None => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn name(&self, id: ObserverId) -> Option<&str> {
        self.entries.get(id.0).map(|e| e.name.as_str())
    }
}
