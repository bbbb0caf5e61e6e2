use std::sync::Arc;

use crate::model::{Attachment, Category, Guid, News, Person, Source};

/// One entity touched by a merge.
#[derive(Debug, Clone)]
pub enum Merged {
    News(Arc<News>),
    Attachment(Attachment),
    Category(Category),
    Person(Person),
    Guid(Guid),
    Source(Source),
}

/// Outcome of a single merge operation.
///
/// Transient: never persisted. A merge is a structural change when anything
/// was added or removed, or when the owner flags one explicitly (a state
/// transition, a changed scalar, a changed property).
#[derive(Debug, Clone, Default)]
pub struct MergeResult {
    added: Vec<Merged>,
    removed: Vec<Merged>,
    updated: Vec<Merged>,
    structural_change: bool,
}

impl MergeResult {
    pub fn add_added(&mut self, entity: Merged) {
        self.added.push(entity);
        self.structural_change = true;
    }

    pub fn add_removed(&mut self, entity: Merged) {
        self.removed.push(entity);
        self.structural_change = true;
    }

    pub fn add_updated(&mut self, entity: Merged) {
        self.updated.push(entity);
    }

    pub fn set_structural_change(&mut self) {
        self.structural_change = true;
    }

    /// Folds another result into this one.
    pub fn add_all(&mut self, other: MergeResult) {
        self.structural_change |= other.structural_change;
        self.added.extend(other.added);
        self.removed.extend(other.removed);
        self.updated.extend(other.updated);
    }

    pub fn added(&self) -> &[Merged] {
        &self.added
    }

    pub fn removed(&self) -> &[Merged] {
        &self.removed
    }

    pub fn updated(&self) -> &[Merged] {
        &self.updated
    }

    pub fn is_structural_change(&self) -> bool {
        self.structural_change
    }

    /// True when the merge changed nothing at all.
    pub fn is_empty(&self) -> bool {
        !self.structural_change
            && self.added.is_empty()
            && self.removed.is_empty()
            && self.updated.is_empty()
    }

    /// Whether the owner must be saved and reported as updated.
    pub fn is_updated(&self) -> bool {
        !self.is_empty()
    }
}

/// A merge result that also carries a value produced by the merge.
///
/// [`crate::model::Feed::merge`] returns the news items that changed, so a
/// caller can persist exactly those instead of every item of the feed.
#[derive(Debug, Clone)]
pub struct ComplexMergeResult<T> {
    pub value: T,
    pub result: MergeResult,
}

impl<T> ComplexMergeResult<T> {
    pub fn new(value: T, result: MergeResult) -> Self {
        Self { value, result }
    }

    pub fn is_structural_change(&self) -> bool {
        self.result.is_structural_change()
    }
}
