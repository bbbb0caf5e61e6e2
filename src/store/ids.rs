use std::sync::atomic::{AtomicI64, Ordering};

/// Source of new entity ids.
pub trait IdGenerator: Send + Sync {
    /// Returns an id greater than every id returned before.
    fn next_id(&self) -> i64;
}

/// Monotonic in-process counter.
#[derive(Debug)]
pub struct SequenceIdGenerator {
    last: AtomicI64,
}

impl SequenceIdGenerator {
    /// A generator whose first id is `last + 1`.
    pub fn starting_after(last: i64) -> Self {
        Self {
            last: AtomicI64::new(last),
        }
    }

    /// Moves the counter forward so the next id is above `last`.
    pub fn advance_past(&self, last: i64) {
        self.last.fetch_max(last, Ordering::SeqCst);
    }
}

impl Default for SequenceIdGenerator {
    fn default() -> Self {
        Self::starting_after(0)
    }
}

impl IdGenerator for SequenceIdGenerator {
    fn next_id(&self) -> i64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }
}
