//! Per-entity reader/writer locking.
//!
//! [`Locked`] pairs a value with an [`EntityLock`]. Ordinary reads and writes
//! take the lock for a single accessor call. Bulk cascade saves take the
//! *special* read lock instead: it is held across a whole batch by one thread,
//! and that thread is recorded so a later writer request from the same thread
//! fails immediately instead of deadlocking against itself.
//!
//! Acquisition never times out.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, ThreadId};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LockError {
    /// The calling thread holds the special read lock on this entity.
    #[error("writer lock requested by a thread that holds the special read lock")]
    SpecialReadHeld,
}

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    writer: bool,
    writers_waiting: usize,
    /// Special read lock holders and their hold counts.
    special: HashMap<ThreadId, usize>,
}

impl LockState {
    fn held_special_by(&self, id: ThreadId) -> bool {
        self.special.contains_key(&id)
    }
}

/// Reader/writer lock with writer preference and a thread-recording read mode.
#[derive(Debug, Default)]
pub struct EntityLock {
    state: Mutex<LockState>,
    changed: Condvar,
}

impl EntityLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acquire_read(&self) {
        let me = thread::current().id();
        let mut state = self.state();
        // Re-entrant for the special holder, otherwise queued writers go first.
        while state.writer || (state.writers_waiting > 0 && !state.held_special_by(me)) {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.readers += 1;
    }

    fn release_read(&self) {
        let mut state = self.state();
        state.readers = state.readers.saturating_sub(1);
        if state.readers == 0 {
            self.changed.notify_all();
        }
    }

    fn acquire_special_read(&self) {
        self.acquire_read();
        let me = thread::current().id();
        *self.state().special.entry(me).or_insert(0) += 1;
    }

    fn release_special_read(&self) {
        let me = thread::current().id();
        {
            let mut state = self.state();
            if let Some(count) = state.special.get_mut(&me) {
                *count -= 1;
                if *count == 0 {
                    state.special.remove(&me);
                }
            }
        }
        self.release_read();
    }

    fn acquire_write(&self) -> Result<(), LockError> {
        let me = thread::current().id();
        let mut state = self.state();
        if state.held_special_by(me) {
            return Err(LockError::SpecialReadHeld);
        }
        state.writers_waiting += 1;
        while state.writer || state.readers > 0 {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.writers_waiting -= 1;
        state.writer = true;
        Ok(())
    }

    fn release_write(&self) {
        let mut state = self.state();
        state.writer = false;
        self.changed.notify_all();
    }

    /// Whether the calling thread currently holds the special read lock.
    pub fn is_special_read_held(&self) -> bool {
        self.state().held_special_by(thread::current().id())
    }
}

struct ReadToken<'a>(&'a EntityLock);

impl Drop for ReadToken<'_> {
    fn drop(&mut self) {
        self.0.release_read();
    }
}

struct WriteToken<'a>(&'a EntityLock);

impl Drop for WriteToken<'_> {
    fn drop(&mut self) {
        self.0.release_write();
    }
}

/// A value guarded by an [`EntityLock`].
#[derive(Debug, Default)]
pub struct Locked<T> {
    lock: EntityLock,
    value: RwLock<T>,
}

impl<T> Locked<T> {
    pub fn new(value: T) -> Self {
        Self {
            lock: EntityLock::new(),
            value: RwLock::new(value),
        }
    }

    pub fn read(&self) -> ReadGuard<'_, T> {
        self.lock.acquire_read();
        let token = ReadToken(&self.lock);
        // Inner guard is declared first so it drops before the logical lock.
        ReadGuard {
            value: self.value.read().unwrap_or_else(PoisonError::into_inner),
            _token: token,
        }
    }

    /// Takes the writer lock.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread holds the special read lock on this value.
    /// That is a programming error: waiting would deadlock the thread on itself.
    pub fn write(&self) -> WriteGuard<'_, T> {
        match self.try_write() {
            Ok(guard) => guard,
            Err(e) => panic!("{e}"),
        }
    }

    /// Takes the writer lock, refusing instead of panicking when the calling
    /// thread holds the special read lock.
    pub fn try_write(&self) -> Result<WriteGuard<'_, T>, LockError> {
        self.lock.acquire_write()?;
        let token = WriteToken(&self.lock);
        Ok(WriteGuard {
            value: self.value.write().unwrap_or_else(PoisonError::into_inner),
            _token: token,
        })
    }

    /// Takes the special read lock for the calling thread.
    ///
    /// While the returned guard lives, ordinary reads from this thread proceed
    /// even if writers are queued, and writer requests from this thread fail.
    pub fn special_read(&self) -> SpecialReadGuard<'_> {
        self.lock.acquire_special_read();
        SpecialReadGuard { lock: &self.lock }
    }

    pub fn is_special_read_held(&self) -> bool {
        self.lock.is_special_read_held()
    }
}

pub struct ReadGuard<'a, T> {
    value: RwLockReadGuard<'a, T>,
    _token: ReadToken<'a>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

pub struct WriteGuard<'a, T> {
    value: RwLockWriteGuard<'a, T>,
    _token: WriteToken<'a>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

/// Holds the special read lock until dropped.
///
/// The guard must be dropped on the thread that created it.
#[must_use = "the special read lock is released as soon as the guard is dropped"]
pub struct SpecialReadGuard<'a> {
    lock: &'a EntityLock,
}

impl Drop for SpecialReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.release_special_read();
    }
}
