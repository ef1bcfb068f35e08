//! Name-keyed handle registry with reference counts and two-phase reclamation
//!
//! Handles are stored in generational slots so a stale id held by a caller can
//! never reach a handle that later reused the slot. Reclamation is split in two:
//! [`Registry::mark_unused`] collects every settled, unreferenced entry, and
//! [`Registry::sweep`] removes what was marked.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Generational handle id; `K` tags which registry issued it
pub struct HandleId<K> {
    index: u32,
    generation: u32,
    _kind: PhantomData<fn() -> K>,
}

impl<K> HandleId<K> {
    fn new(index: usize, generation: u32) -> Self {
        Self {
            index: index as u32,
            generation,
            _kind: PhantomData,
        }
    }

    fn slot(self) -> usize {
        self.index as usize
    }
}

impl<K> Clone for HandleId<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for HandleId<K> {}

impl<K> PartialEq for HandleId<K> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<K> Eq for HandleId<K> {}

impl<K> Hash for HandleId<K> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<K> fmt::Debug for HandleId<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

/// Anything the registry can decide to reclaim
pub(crate) trait Settle {
    /// Finished loading, successfully or not
    fn is_settled(&self) -> bool;
}

struct Entry<H> {
    name: String,
    refs: u32,
    handle: H,
}

struct Slot<H> {
    generation: u32,
    entry: Option<Entry<H>>,
}

pub(crate) struct Registry<K, H> {
    slots: Vec<Slot<H>>,
    free: Vec<usize>,
    names: HashMap<String, usize>,
    marked: Vec<HandleId<K>>,
}

impl<K, H: Settle> Registry<K, H> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            names: HashMap::new(),
            marked: Vec::new(),
        }
    }

    pub fn find(&self, name: &str) -> Option<HandleId<K>> {
        self.names
            .get(name)
            .map(|&index| HandleId::new(index, self.slots[index].generation))
    }

    /// Register `handle` under `name` with a refcount of zero
    pub fn insert(&mut self, name: String, handle: H) -> HandleId<K> {
        let entry = Entry {
            name: name.clone(),
            refs: 0,
            handle,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index].entry = Some(entry);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                self.slots.len() - 1
            }
        };
        self.names.insert(name, index);
        HandleId::new(index, self.slots[index].generation)
    }

    fn entry(&self, id: HandleId<K>) -> Option<&Entry<H>> {
        self.slots
            .get(id.slot())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn entry_mut(&mut self, id: HandleId<K>) -> Option<&mut Entry<H>> {
        self.slots
            .get_mut(id.slot())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
    }

    pub fn get(&self, id: HandleId<K>) -> Option<&H> {
        self.entry(id).map(|e| &e.handle)
    }

    pub fn get_mut(&mut self, id: HandleId<K>) -> Option<&mut H> {
        self.entry_mut(id).map(|e| &mut e.handle)
    }

    pub fn name(&self, id: HandleId<K>) -> Option<&str> {
        self.entry(id).map(|e| e.name.as_str())
    }

    pub fn refs(&self, id: HandleId<K>) -> u32 {
        self.entry(id).map(|e| e.refs).unwrap_or(0)
    }

    pub fn retain(&mut self, id: HandleId<K>) -> bool {
        match self.entry_mut(id) {
            Some(entry) => {
                entry.refs += 1;
                true
            }
            None => false,
        }
    }

    /// Drop one reference; returns the remaining count (`None` for a stale id)
    pub fn release(&mut self, id: HandleId<K>) -> Option<u32> {
        self.entry_mut(id).map(|entry| {
            entry.refs = entry.refs.saturating_sub(1);
            entry.refs
        })
    }

    pub fn ids(&self) -> Vec<HandleId<K>> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.entry.is_some())
            .map(|(index, slot)| HandleId::new(index, slot.generation))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// First phase: remember every settled entry nobody references
    pub fn mark_unused(&mut self) -> usize {
        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(entry) = &slot.entry {
                if entry.refs == 0 && entry.handle.is_settled() {
                    self.marked.push(HandleId::new(index, slot.generation));
                }
            }
        }
        self.marked.len()
    }

    /// Second phase: remove marked entries that are still unused
    pub fn sweep(&mut self) -> Vec<(String, H)> {
        let marked = std::mem::take(&mut self.marked);
        let mut reclaimed = Vec::with_capacity(marked.len());
        for id in marked {
            let still_unused = self
                .entry(id)
                .is_some_and(|e| e.refs == 0 && e.handle.is_settled());
            if !still_unused {
                continue;
            }
            let slot = &mut self.slots[id.slot()];
            if let Some(entry) = slot.entry.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.names.remove(&entry.name);
                self.free.push(id.slot());
                reclaimed.push((entry.name, entry.handle));
            }
        }
        reclaimed
    }
}
