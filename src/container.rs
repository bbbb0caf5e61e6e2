//! Per-state index of news ids owned by a container entity.
//!
//! A [`NewsContainer`] keeps one id list per [`NewsState`]. Each list is a
//! `Vec`, so its logical size and its capacity are tracked separately and
//! growth is geometric; [`NewsContainer::compact`] gives unused capacity back.
//! A combined id → state index makes membership checks O(1) and enforces that
//! an id lives in at most one state slot.

use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use crate::model::{NewsState, StateSet};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContainerError {
    /// The id is already stored under this state.
    #[error("news {id} is already stored under state {state}")]
    DuplicateId { id: i64, state: NewsState },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsContainer {
    slots: [Vec<i64>; NewsState::COUNT],
    index: HashMap<i64, NewsState>,
    sorted: bool,
}

impl NewsContainer {
    /// Creates an empty container. Sorted containers keep every slot in
    /// ascending id order.
    pub fn new(sorted: bool) -> Self {
        Self {
            slots: Default::default(),
            index: HashMap::new(),
            sorted,
        }
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Adds `id` under `state`.
    ///
    /// An id already stored under another state is moved; one already stored
    /// under the same state is rejected.
    pub fn add_news(&mut self, id: i64, state: NewsState) -> Result<(), ContainerError> {
        match self.index.get(&id) {
            Some(current) if *current == state => {
                return Err(ContainerError::DuplicateId { id, state });
            }
            Some(current) => {
                let current = *current;
                self.remove_from_slot(id, current);
            }
            None => {}
        }

        let slot = &mut self.slots[state.index()];
        if self.sorted {
            match slot.binary_search(&id) {
                Ok(_) => return Err(ContainerError::DuplicateId { id, state }),
                Err(pos) => slot.insert(pos, id),
            }
        } else {
            slot.push(id);
        }
        self.index.insert(id, state);
        Ok(())
    }

    /// Moves `id` to `state`; returns `false` if the id is not stored.
    pub fn update_state(&mut self, id: i64, state: NewsState) -> bool {
        match self.index.get(&id).copied() {
            Some(current) if current == state => true,
            Some(_) => self.add_news(id, state).is_ok(),
            None => false,
        }
    }

    /// Removes `id` from whichever slot holds it; returns whether it was stored.
    pub fn remove_news(&mut self, id: i64) -> bool {
        match self.index.remove(&id) {
            Some(state) => {
                self.remove_from_slot(id, state);
                true
            }
            None => false,
        }
    }

    fn remove_from_slot(&mut self, id: i64, state: NewsState) {
        let slot = &mut self.slots[state.index()];
        let pos = if self.sorted {
            slot.binary_search(&id).ok()
        } else {
            slot.iter().position(|candidate| *candidate == id)
        };
        if let Some(pos) = pos {
            slot.remove(pos);
        }
        self.index.remove(&id);
    }

    pub fn remove_all(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
        self.index.clear();
    }

    pub fn contains_news(&self, id: i64) -> bool {
        self.index.contains_key(&id)
    }

    pub fn state_of(&self, id: i64) -> Option<NewsState> {
        self.index.get(&id).copied()
    }

    pub fn news_count(&self, states: StateSet) -> usize {
        states.iter().map(|s| self.slots[s.index()].len()).sum()
    }

    /// Ids stored under any of `states`, grouped by state in state order.
    pub fn news(&self, states: StateSet) -> Vec<i64> {
        states
            .iter()
            .flat_map(|s| self.slots[s.index()].iter().copied())
            .collect()
    }

    /// Ids in every state except HIDDEN and DELETED.
    pub fn visible_news(&self) -> Vec<i64> {
        self.news(StateSet::visible())
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Shrinks every slot's backing storage to its size.
    pub fn compact(&mut self) {
        for slot in &mut self.slots {
            slot.shrink_to_fit();
        }
        self.index.shrink_to_fit();
    }

    /// Total capacity reserved across slots.
    pub fn capacity(&self) -> usize {
        self.slots.iter().map(Vec::capacity).sum()
    }

    /// Non-empty slots keyed by state, for persistence.
    pub fn to_slots(&self) -> BTreeMap<NewsState, Vec<i64>> {
        NewsState::ALL
            .into_iter()
            .filter(|s| !self.slots[s.index()].is_empty())
            .map(|s| (s, self.slots[s.index()].clone()))
            .collect()
    }

    /// Rebuilds a container from persisted slots.
    ///
    /// Ids repeated across slots keep their last occurrence.
    pub fn from_slots(sorted: bool, slots: &BTreeMap<NewsState, Vec<i64>>) -> Self {
        let mut container = Self::new(sorted);
        for (state, ids) in slots {
            for id in ids {
                if let Err(e) = container.add_news(*id, *state) {
                    tracing::warn!(error = %e, "Dropping duplicate id while loading container");
                }
            }
        }
        container
    }
}

impl Default for NewsContainer {
    fn default() -> Self {
        Self::new(false)
    }
}
