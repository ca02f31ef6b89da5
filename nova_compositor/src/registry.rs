//! The set of outputs currently known to the compositor.

use std::collections::btree_map::{self, BTreeMap};

use crate::backend::OutputId;
use crate::error::OutputError;
use crate::output::OutputEntity;

/// Active outputs indexed by identity.
///
/// Iteration order is ascending [`OutputId`], which for the bundled backends
/// is discovery order.
#[derive(Debug, Default)]
pub struct OutputRegistry {
    outputs: BTreeMap<OutputId, OutputEntity>,
}

impl OutputRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `entity`. An identity can be registered only once; on conflict
    /// the entity is dropped, which unsubscribes its listeners.
    pub fn insert(&mut self, entity: OutputEntity) -> Result<(), OutputError> {
        match self.outputs.entry(entity.id()) {
            btree_map::Entry::Occupied(entry) => Err(OutputError::AlreadyRegistered(*entry.key())),
            btree_map::Entry::Vacant(entry) => {
                entry.insert(entity);
                Ok(())
            }
        }
    }

    /// Removes and returns the entity for `id`. Removing a non-member is a
    /// no-op.
    pub fn remove(&mut self, id: OutputId) -> Option<OutputEntity> {
        self.outputs.remove(&id)
    }

    pub fn get(&self, id: OutputId) -> Option<&OutputEntity> {
        self.outputs.get(&id)
    }

    pub fn get_mut(&mut self, id: OutputId) -> Option<&mut OutputEntity> {
        self.outputs.get_mut(&id)
    }

    pub fn contains(&self, id: OutputId) -> bool {
        self.outputs.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Lazily walks the current members. Each call starts a fresh traversal.
    pub fn iter(&self) -> impl Iterator<Item = &OutputEntity> + '_ {
        self.outputs.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = OutputId> + '_ {
        self.outputs.keys().copied()
    }

    /// Removes every member, in identity order.
    pub fn drain(&mut self) -> impl Iterator<Item = OutputEntity> {
        std::mem::take(&mut self.outputs).into_values()
    }
}
