//! Reconciliation of freshly parsed entities with their persisted counterparts.
//!
//! Entities implement [`Mergeable`]; lists and optional relations are merged
//! through [`merge_list`] and [`merge_optional`], which record what was added,
//! removed and updated in a [`MergeResult`]. The news and feed merges built on
//! top of these live next to their types ([`crate::model::News::merge`],
//! [`crate::model::Feed::merge`]).

mod result;

pub use result::{ComplexMergeResult, MergeResult, Merged};

/// An entity that can absorb the field values of a fresher copy of itself.
pub trait Mergeable: Clone {
    /// Whether `other` describes the same entity, used to pair list entries.
    fn is_identical(&self, other: &Self) -> bool;

    /// Copies `other`'s field values into `self`; returns whether anything changed.
    fn merge_from(&mut self, other: &Self) -> bool;
}

/// What to do with persisted entries that have no counterpart in the incoming list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unmatched {
    /// Drop them and report them as removed.
    Remove,
    /// Keep them; the relation is append-only.
    Retain,
}

/// Merges `incoming` into `existing`.
///
/// Matched entries are merged in place, unmatched incoming entries are appended
/// and reported as added, and unmatched persisted entries are handled per
/// `unmatched`. `wrap` turns an entry into the [`Merged`] variant recorded in
/// the result.
pub fn merge_list<T: Mergeable>(
    existing: &mut Vec<T>,
    incoming: &[T],
    unmatched: Unmatched,
    wrap: impl Fn(T) -> Merged,
) -> MergeResult {
    let mut result = MergeResult::default();

    if unmatched == Unmatched::Remove {
        let mut kept = Vec::with_capacity(existing.len());
        for entry in existing.drain(..) {
            if incoming.iter().any(|i| entry.is_identical(i)) {
                kept.push(entry);
            } else {
                result.add_removed(wrap(entry));
            }
        }
        *existing = kept;
    }

    for item in incoming {
        match existing.iter_mut().find(|e| e.is_identical(item)) {
            Some(entry) => {
                if entry.merge_from(item) {
                    result.add_updated(wrap(entry.clone()));
                }
            }
            None => {
                existing.push(item.clone());
                result.add_added(wrap(item.clone()));
            }
        }
    }

    result
}

/// Merges an optional single relation such as an author or a GUID.
pub fn merge_optional<T: Mergeable>(
    existing: &mut Option<T>,
    incoming: Option<&T>,
    wrap: impl Fn(T) -> Merged,
) -> MergeResult {
    let mut result = MergeResult::default();
    match (existing.as_mut(), incoming) {
        (Some(current), Some(item)) => {
            if current.merge_from(item) {
                result.add_updated(wrap(current.clone()));
            }
        }
        (None, Some(item)) => {
            *existing = Some(item.clone());
            result.add_added(wrap(item.clone()));
        }
        (Some(_), None) => {
            if let Some(old) = existing.take() {
                result.add_removed(wrap(old));
            }
        }
        (None, None) => {}
    }
    result
}

/// Assigns `incoming` to `field` when they differ; returns whether it did.
pub fn merge_scalar<T: PartialEq + Clone>(field: &mut T, incoming: &T) -> bool {
    if field != incoming {
        field.clone_from(incoming);
        return true;
    }
    false
}
