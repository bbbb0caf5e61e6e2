//! Domain events derived from store lifecycle callbacks.
//!
//! A transaction reports every low-level step it takes as a [`Lifecycle`]
//! callback. The transaction's [`EventTable`] turns the created/updated/deleted
//! callbacks into at most one pending event per entity. When the transaction
//! commits, the table is drained into typed [`ModelEvent`]s and handed to the
//! [`ListenerRegistry`].

mod listener;
mod table;

pub use listener::{ListenerRegistry, ModelListener};
pub use table::EventTable;

use crate::model::{
    Attachment, BookMark, Category, EntityKey, EntityKind, Folder, Label, Person, SearchCondition,
};
use crate::store::{FeedRecord, NewsBinRecord, NewsRecord, Record, SearchMarkRecord};

/// Low-level callbacks raised while a transaction touches the store.
#[derive(Debug, Clone)]
pub enum Lifecycle {
    /// An id is about to be assigned to a new entity.
    Creating(EntityKey),
    /// A record was written for the first time.
    Created { record: Record, root: bool },
    /// An existing record was overwritten.
    Updated {
        previous: Record,
        current: Record,
        root: bool,
    },
    /// A record is about to be deleted; its dependents go first.
    Deleting(EntityKey),
    /// A record was deleted.
    Deleted { record: Record, root: bool },
    /// A record was loaded from the store.
    Activated(EntityKey),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Persisted,
    Updated,
    Removed,
}

/// Change to one entity, with the snapshot before the transaction (if it
/// existed) and the snapshot after it.
///
/// For removals `current` is the last stored snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityEvent<T> {
    pub kind: EventKind,
    pub previous: Option<T>,
    pub current: T,
    /// False when the change was cascaded from another entity.
    pub root: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    News(EntityEvent<NewsRecord>),
    Feed(EntityEvent<FeedRecord>),
    Attachment(EntityEvent<Attachment>),
    Category(EntityEvent<Category>),
    Person(EntityEvent<Person>),
    BookMark(EntityEvent<BookMark>),
    SearchMark(EntityEvent<SearchMarkRecord>),
    NewsBin(EntityEvent<NewsBinRecord>),
    Folder(EntityEvent<Folder>),
    Label(EntityEvent<Label>),
    SearchCondition(EntityEvent<SearchCondition>),
}

/// Evaluates `$body` with `$e` bound to the inner [`EntityEvent`].
macro_rules! with_event {
    ($event:expr, $e:ident => $body:expr) => {
        match $event {
            ModelEvent::News($e) => $body,
            ModelEvent::Feed($e) => $body,
            ModelEvent::Attachment($e) => $body,
            ModelEvent::Category($e) => $body,
            ModelEvent::Person($e) => $body,
            ModelEvent::BookMark($e) => $body,
            ModelEvent::SearchMark($e) => $body,
            ModelEvent::NewsBin($e) => $body,
            ModelEvent::Folder($e) => $body,
            ModelEvent::Label($e) => $body,
            ModelEvent::SearchCondition($e) => $body,
        }
    };
}

impl ModelEvent {
    /// Builds the typed event for `current`.
    ///
    /// A `previous` snapshot of a different kind is ignored.
    pub fn build(kind: EventKind, previous: Option<Record>, current: Record, root: bool) -> Self {
        macro_rules! typed {
            ($variant:ident, $current:expr) => {
                ModelEvent::$variant(EntityEvent {
                    kind,
                    previous: match previous {
                        Some(Record::$variant(p)) => Some(p),
                        _ => None,
                    },
                    current: $current,
                    root,
                })
            };
        }

        match current {
            Record::News(c) => typed!(News, c),
            Record::Feed(c) => typed!(Feed, c),
            Record::Attachment(c) => typed!(Attachment, c),
            Record::Category(c) => typed!(Category, c),
            Record::Person(c) => typed!(Person, c),
            Record::BookMark(c) => typed!(BookMark, c),
            Record::SearchMark(c) => typed!(SearchMark, c),
            Record::NewsBin(c) => typed!(NewsBin, c),
            Record::Folder(c) => typed!(Folder, c),
            Record::Label(c) => typed!(Label, c),
            Record::SearchCondition(c) => typed!(SearchCondition, c),
        }
    }

    pub fn entity_kind(&self) -> EntityKind {
        match self {
            ModelEvent::News(_) => EntityKind::News,
            ModelEvent::Feed(_) => EntityKind::Feed,
            ModelEvent::Attachment(_) => EntityKind::Attachment,
            ModelEvent::Category(_) => EntityKind::Category,
            ModelEvent::Person(_) => EntityKind::Person,
            ModelEvent::BookMark(_) => EntityKind::BookMark,
            ModelEvent::SearchMark(_) => EntityKind::SearchMark,
            ModelEvent::NewsBin(_) => EntityKind::NewsBin,
            ModelEvent::Folder(_) => EntityKind::Folder,
            ModelEvent::Label(_) => EntityKind::Label,
            ModelEvent::SearchCondition(_) => EntityKind::SearchCondition,
        }
    }

    pub fn kind(&self) -> EventKind {
        with_event!(self, e => e.kind)
    }

    pub fn is_root(&self) -> bool {
        with_event!(self, e => e.root)
    }

    pub fn id(&self) -> Option<i64> {
        match self {
            ModelEvent::News(e) => Some(e.current.id),
            ModelEvent::Feed(e) => Some(e.current.id),
            ModelEvent::SearchMark(e) => Some(e.current.id),
            ModelEvent::NewsBin(e) => Some(e.current.id),
            ModelEvent::Attachment(e) => e.current.id.get(),
            ModelEvent::Category(e) => e.current.id.get(),
            ModelEvent::Person(e) => e.current.id.get(),
            ModelEvent::BookMark(e) => e.current.id.get(),
            ModelEvent::Folder(e) => e.current.id.get(),
            ModelEvent::Label(e) => e.current.id.get(),
            ModelEvent::SearchCondition(e) => e.current.id.get(),
        }
    }

    pub fn key(&self) -> Option<EntityKey> {
        self.id().map(|id| EntityKey::new(self.entity_kind(), id))
    }
}
