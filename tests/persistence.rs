//! Integration tests for the persistence core: transactions, cascades,
//! event delivery and the SQLite engine.
//!
//! Each test builds its own store, either in memory or as a private SQLite
//! database, and drives it only through the public API.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use feedstore::events::{EventKind, ModelEvent, ModelListener};
use feedstore::feed::parse_feed;
use feedstore::model::{
    Attachment, BookMark, Category, EntityKey, EntityKind, Feed, Folder, Label, NewsBin,
    NewsState, SearchCondition, SearchMark, SearchProvider, SearchSpecifier, StateSet,
};
use feedstore::persist::{PersistenceContext, PersistenceError};
use feedstore::store::{
    MemoryStore, ObjectStore, SqliteStore, StoreError, StoredObject, WriteOp,
};
use pretty_assertions::assert_eq;
use url::Url;

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

fn memory_context() -> (Arc<MemoryStore>, PersistenceContext) {
    let store = Arc::new(MemoryStore::new());
    let context = PersistenceContext::new(store.clone());
    context.startup().unwrap();
    (store, context)
}

fn feed_with_news(link: &str, count: usize) -> Feed {
    let mut feed = Feed::new(url(link));
    for i in 0..count {
        let news = feed.create_news(Utc::now());
        news.set_title(Some(format!("item {i}")));
        news.set_link(Some(url(&format!("{link}/{i}"))));
        news.add_attachment(Attachment::new(url(&format!("{link}/{i}.mp3"))));
        news.add_category(Category::new("a"));
        news.add_category(Category::new("b"));
    }
    feed
}

/// Collects every batch it receives.
fn recorder() -> (Arc<Mutex<Vec<Vec<ModelEvent>>>>, Arc<dyn ModelListener>) {
    let batches = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&batches);
    let listener: Arc<dyn ModelListener> = Arc::new(move |events: &[ModelEvent]| {
        sink.lock().unwrap().push(events.to_vec());
    });
    (batches, listener)
}

fn count(events: &[ModelEvent], entity: EntityKind, kind: EventKind) -> usize {
    events
        .iter()
        .filter(|e| e.entity_kind() == entity && e.kind() == kind)
        .count()
}

// ============================================================================
// Cascade Tests
// ============================================================================

#[test]
fn test_delete_feed_removes_everything_in_one_batch() {
    let (store, context) = memory_context();
    let feed = feed_with_news("http://a.example/rss", 3);

    let mut tx = context.begin().unwrap();
    tx.save_feed(&feed).unwrap();
    tx.commit().unwrap();
    assert_eq!(store.count(EntityKind::News), 3);

    let (batches, listener) = recorder();
    context.add_catch_all_listener(listener);

    let mut tx = context.begin().unwrap();
    assert!(tx.delete_feed_by_link(&feed.link).unwrap());
    tx.commit().unwrap();

    let batches = batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    let events = &batches[0];
    assert_eq!(count(events, EntityKind::News, EventKind::Removed), 3);
    assert_eq!(count(events, EntityKind::Attachment, EventKind::Removed), 3);
    assert_eq!(count(events, EntityKind::Category, EventKind::Removed), 6);
    assert_eq!(count(events, EntityKind::Feed, EventKind::Removed), 1);
    assert_eq!(events.len(), 13);
    assert!(store.is_empty());
}

#[test]
fn test_delete_unknown_feed_link_is_a_no_op() {
    let (_, context) = memory_context();
    let mut tx = context.begin().unwrap();
    assert!(!tx.delete_feed_by_link(&url("http://nowhere.example/")).unwrap());
    assert_eq!(tx.pending_writes(), 0);
}

#[test]
fn test_deleting_last_bookmark_deletes_its_feed() {
    let (store, context) = memory_context();
    let feed = feed_with_news("http://a.example/rss", 1);
    let folder = Folder::new("root", None);

    let mut tx = context.begin().unwrap();
    tx.save_feed(&feed).unwrap();
    let folder_id = tx.save_folder(&folder).unwrap();
    let first = BookMark::new("A", feed.link.clone(), Some(folder_id));
    let second = BookMark::new("A again", feed.link.clone(), Some(folder_id));
    let first_id = tx.save_bookmark(&first).unwrap();
    let second_id = tx.save_bookmark(&second).unwrap();
    tx.commit().unwrap();

    let mut tx = context.begin().unwrap();
    tx.delete(EntityKey::new(EntityKind::BookMark, first_id)).unwrap();
    tx.commit().unwrap();
    assert_eq!(store.count(EntityKind::Feed), 1);

    let mut tx = context.begin().unwrap();
    tx.delete(EntityKey::new(EntityKind::BookMark, second_id)).unwrap();
    let events = tx.commit().unwrap();
    assert_eq!(count(&events, EntityKind::Feed, EventKind::Removed), 1);
    assert_eq!(store.count(EntityKind::Feed), 0);
    assert_eq!(store.count(EntityKind::News), 0);
    assert_eq!(store.count(EntityKind::Folder), 1);
}

#[test]
fn test_deleting_folder_removes_nested_children() {
    let (store, context) = memory_context();
    let feed = feed_with_news("http://a.example/rss", 1);
    let root = Folder::new("root", None);

    let mut tx = context.begin().unwrap();
    tx.save_feed(&feed).unwrap();
    let root_id = tx.save_folder(&root).unwrap();
    let child = Folder::new("child", Some(root_id));
    let child_id = tx.save_folder(&child).unwrap();
    tx.save_bookmark(&BookMark::new("A", feed.link.clone(), Some(child_id)))
        .unwrap();
    tx.save_news_bin(&NewsBin::new("bin", Some(root_id), true))
        .unwrap();
    tx.commit().unwrap();

    let mut tx = context.begin().unwrap();
    tx.delete(EntityKey::new(EntityKind::Folder, root_id)).unwrap();
    let events = tx.commit().unwrap();

    assert_eq!(count(&events, EntityKind::Folder, EventKind::Removed), 2);
    assert_eq!(count(&events, EntityKind::BookMark, EventKind::Removed), 1);
    assert_eq!(count(&events, EntityKind::NewsBin, EventKind::Removed), 1);
    assert!(store.is_empty());
}

#[test]
fn test_deleting_label_strips_it_from_news() {
    let (_, context) = memory_context();
    let feed = feed_with_news("http://a.example/rss", 1);
    let label = Label::new("important", "255,0,0");

    let mut tx = context.begin().unwrap();
    let label_id = tx.save_label(&label).unwrap();
    feed.news[0].add_label(label_id);
    tx.save_feed(&feed).unwrap();
    tx.commit().unwrap();

    let mut tx = context.begin().unwrap();
    tx.delete(EntityKey::new(EntityKind::Label, label_id)).unwrap();
    let events = tx.commit().unwrap();
    assert_eq!(count(&events, EntityKind::News, EventKind::Updated), 1);

    let mut tx = context.begin().unwrap();
    let news = tx.load_news(feed.news[0].id().unwrap()).unwrap().unwrap();
    assert!(news.labels().is_empty());
    assert!(tx.labels().unwrap().is_empty());
}

// ============================================================================
// Event Tests
// ============================================================================

#[test]
fn test_repeated_updates_collapse_into_one_event() {
    let (_, context) = memory_context();
    let feed = feed_with_news("http://a.example/rss", 1);
    let mut tx = context.begin().unwrap();
    tx.save_feed(&feed).unwrap();
    tx.commit().unwrap();

    let (batches, listener) = recorder();
    context.add_listener(EntityKind::News, listener);

    let news = &feed.news[0];
    let mut tx = context.begin().unwrap();
    for i in 0..5 {
        news.set_title(Some(format!("revision {i}")));
        tx.save_and_cascade_news(news, true).unwrap();
    }
    tx.commit().unwrap();

    let batches = batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 1);
    match &batches[0][0] {
        ModelEvent::News(event) => {
            assert_eq!(event.kind, EventKind::Updated);
            assert_eq!(
                event.previous.as_ref().and_then(|p| p.title.as_deref()),
                Some("item 0")
            );
            assert_eq!(event.current.title.as_deref(), Some("revision 4"));
            assert!(event.root);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn test_kind_listener_only_sees_its_kind() {
    let (_, context) = memory_context();
    let (labels, listener) = recorder();
    context.add_listener(EntityKind::Label, listener);

    let mut tx = context.begin().unwrap();
    tx.save_feed(&feed_with_news("http://a.example/rss", 2)).unwrap();
    tx.save_label(&Label::new("x", "0,0,0")).unwrap();
    tx.commit().unwrap();

    let labels = labels.lock().unwrap();
    assert_eq!(labels.len(), 1);
    assert!(labels[0]
        .iter()
        .all(|e| e.entity_kind() == EntityKind::Label));
}

#[test]
fn test_removed_listener_receives_nothing() {
    let (_, context) = memory_context();
    let (batches, listener) = recorder();
    context.add_catch_all_listener(Arc::clone(&listener));
    assert!(context.remove_listener(&listener));

    let mut tx = context.begin().unwrap();
    tx.save_label(&Label::new("x", "0,0,0")).unwrap();
    tx.commit().unwrap();
    assert!(batches.lock().unwrap().is_empty());
}

#[test]
fn test_rolled_back_transaction_dispatches_nothing() {
    let (store, context) = memory_context();
    let (batches, listener) = recorder();
    context.add_catch_all_listener(listener);

    let mut tx = context.begin().unwrap();
    tx.save_feed(&feed_with_news("http://a.example/rss", 2)).unwrap();
    assert!(tx.pending_events() > 0);
    tx.rollback();

    assert!(batches.lock().unwrap().is_empty());
    assert!(store.is_empty());
}

/// Accepts reads but refuses every write batch.
#[derive(Default)]
struct ReadOnlyStore {
    inner: MemoryStore,
}

impl ObjectStore for ReadOnlyStore {
    fn load(&self, key: EntityKey) -> Result<Option<StoredObject>, StoreError> {
        self.inner.load(key)
    }

    fn find_by_link(&self, kind: EntityKind, link_text: &str) -> Result<Vec<EntityKey>, StoreError> {
        self.inner.find_by_link(kind, link_text)
    }

    fn list(&self, kind: EntityKind) -> Result<Vec<StoredObject>, StoreError> {
        self.inner.list(kind)
    }

    fn apply(&self, _batch: &[WriteOp]) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("read-only".into()))
    }

    fn max_id(&self) -> Result<i64, StoreError> {
        self.inner.max_id()
    }
}

#[test]
fn test_failed_commit_dispatches_no_events() {
    let context = PersistenceContext::new(Arc::new(ReadOnlyStore::default()));
    context.startup().unwrap();
    let (batches, listener) = recorder();
    context.add_catch_all_listener(listener);

    let mut tx = context.begin().unwrap();
    tx.save_feed(&feed_with_news("http://a.example/rss", 1)).unwrap();
    let result = tx.commit();

    assert!(matches!(
        result,
        Err(PersistenceError::Store(StoreError::Unavailable(_)))
    ));
    assert!(batches.lock().unwrap().is_empty());
}

#[test]
fn test_begin_before_startup_fails() {
    let context = PersistenceContext::new(Arc::new(MemoryStore::new()));
    assert!(matches!(context.begin(), Err(PersistenceError::NotStarted)));
}

// ============================================================================
// Uniqueness Tests
// ============================================================================

#[test]
fn test_second_feed_with_same_link_is_rejected() {
    let (store, context) = memory_context();
    let mut tx = context.begin().unwrap();
    let id = tx.save_feed(&Feed::new(url("http://a.example/rss"))).unwrap();
    tx.commit().unwrap();

    let mut tx = context.begin().unwrap();
    match tx.save_feed(&Feed::new(url("http://a.example/rss"))) {
        Err(PersistenceError::UniqueConstraint { link, existing_id }) => {
            assert_eq!(link, "http://a.example/rss");
            assert_eq!(existing_id, id);
        }
        other => panic!("expected a uniqueness fault, got {other:?}"),
    }
    drop(tx);
    assert_eq!(store.count(EntityKind::Feed), 1);
}

#[test]
fn test_same_link_rejected_within_one_transaction() {
    let (_, context) = memory_context();
    let mut tx = context.begin().unwrap();
    tx.save_feed(&Feed::new(url("http://a.example/rss"))).unwrap();
    assert!(tx.save_feed(&Feed::new(url("http://a.example/rss"))).is_err());
}

// ============================================================================
// Bin and Search Tests
// ============================================================================

#[test]
fn test_bin_copies_survive_feed_deletion() {
    let (store, context) = memory_context();
    let feed = feed_with_news("http://a.example/rss", 2);
    let bin = NewsBin::new("keep", None, true);

    let mut tx = context.begin().unwrap();
    tx.save_feed(&feed).unwrap();
    let copy = tx.copy_to_bin(&bin, &feed.news[0]).unwrap();
    tx.commit().unwrap();

    assert_ne!(copy.id(), feed.news[0].id());
    assert!(bin.contains_news(copy.id().unwrap()));

    let mut tx = context.begin().unwrap();
    tx.delete_feed_by_link(&feed.link).unwrap();
    tx.commit().unwrap();

    assert_eq!(store.count(EntityKind::News), 1);
    let mut tx = context.begin().unwrap();
    let stored = tx.load_news_bin(bin.id().unwrap()).unwrap().unwrap();
    assert_eq!(stored.news_count(StateSet::all()), 1);
    let kept = tx.load_news(copy.id().unwrap()).unwrap().unwrap();
    assert_eq!(kept.title().as_deref(), Some("item 0"));
    assert_eq!(kept.attachments().len(), 1);
}

#[test]
fn test_remove_from_bin_deletes_the_copy() {
    let (store, context) = memory_context();
    let feed = feed_with_news("http://a.example/rss", 1);
    let bin = NewsBin::new("keep", None, false);

    let mut tx = context.begin().unwrap();
    tx.save_feed(&feed).unwrap();
    let copy = tx.copy_to_bin(&bin, &feed.news[0]).unwrap();
    tx.commit().unwrap();
    assert_eq!(store.count(EntityKind::News), 2);

    let mut tx = context.begin().unwrap();
    assert!(tx.remove_from_bin(&bin, copy.id().unwrap()).unwrap());
    assert!(!tx.remove_from_bin(&bin, copy.id().unwrap()).unwrap());
    tx.commit().unwrap();

    assert_eq!(store.count(EntityKind::News), 1);
    assert!(!bin.contains_news(copy.id().unwrap()));
}

struct FixedSearch(Vec<(i64, NewsState)>);

impl SearchProvider for FixedSearch {
    fn search(&self, _conditions: &[SearchCondition], _match_all: bool) -> Vec<(i64, NewsState)> {
        self.0.clone()
    }
}

#[test]
fn test_loaded_search_mark_computes_results_lazily() {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(FixedSearch(vec![
        (1, NewsState::Read),
        (2, NewsState::Updated),
        (3, NewsState::New),
        (4, NewsState::Hidden),
    ]));
    let context = PersistenceContext::new(store).with_search_provider(provider);
    context.startup().unwrap();

    let mut search = SearchMark::new("rust", None, true);
    search
        .conditions
        .push(SearchCondition::new("title", SearchSpecifier::Contains, "rust"));

    let mut tx = context.begin().unwrap();
    let id = tx.save_search_mark(&search).unwrap();
    tx.commit().unwrap();

    let mut tx = context.begin().unwrap();
    let loaded = tx.load_search_mark(id).unwrap().unwrap();
    assert_eq!(loaded.conditions.len(), 1);
    assert!(loaded.has_result_provider());

    let results = loaded.results();
    assert_eq!(results.read, [1]);
    assert_eq!(results.unread, [2]);
    assert_eq!(results.new, [3]);
    assert_eq!(loaded.result_count(StateSet::all()), 3);
}

// ============================================================================
// SQLite End-to-End Tests
// ============================================================================

const RSS_V1: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example</title>
    <link>http://example.com/</link>
    <description>Example feed</description>
    <item><title>First</title><link>http://example.com/1</link><guid>item-1</guid></item>
    <item><title>Second</title><link>http://example.com/2</link><guid>item-2</guid></item>
  </channel>
</rss>"#;

const RSS_V2: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Example</title>
    <link>http://example.com/</link>
    <description>Example feed</description>
    <item><title>First, corrected</title><link>http://example.com/1</link><guid>item-1</guid></item>
    <item><title>Second</title><link>http://example.com/2</link><guid>item-2</guid></item>
    <item><title>Third</title><link>http://example.com/3</link><guid>item-3</guid></item>
  </channel>
</rss>"#;

#[test]
fn test_sqlite_import_then_merge_refresh() {
    let store = Arc::new(SqliteStore::open(":memory:").unwrap());
    let context = PersistenceContext::new(store);
    context.startup().unwrap();
    let link = url("http://example.com/rss");

    let parsed = parse_feed(&link, RSS_V1.as_bytes(), Utc::now()).unwrap();
    let mut tx = context.begin().unwrap();
    let feed_id = tx.save_feed(&parsed).unwrap();
    tx.commit().unwrap();

    // The user reads the first item.
    let mut tx = context.begin().unwrap();
    let stored = tx.load_feed(feed_id, 1).unwrap().unwrap();
    stored.news[0].set_state(NewsState::Read);
    tx.save_and_cascade_news(&stored.news[0], true).unwrap();
    tx.commit().unwrap();

    let refreshed = parse_feed(&link, RSS_V2.as_bytes(), Utc::now()).unwrap();
    let mut tx = context.begin().unwrap();
    let mut stored = tx.load_feed_by_link(&link, 1).unwrap().unwrap();
    let merged = stored.merge(&refreshed);
    assert_eq!(merged.result.added().len(), 1);
    assert_eq!(merged.result.updated().len(), 1);
    assert_eq!(tx.save_feed(&stored).unwrap(), feed_id);
    let events = tx.commit().unwrap();

    assert_eq!(count(&events, EntityKind::News, EventKind::Persisted), 1);
    assert_eq!(count(&events, EntityKind::News, EventKind::Updated), 1);
    assert_eq!(count(&events, EntityKind::Feed, EventKind::Updated), 1);

    let mut tx = context.begin().unwrap();
    let reloaded = tx.load_feed(feed_id, 1).unwrap().unwrap();
    assert_eq!(reloaded.news.len(), 3);
    let first = &reloaded.news[0];
    assert_eq!(first.title().as_deref(), Some("First, corrected"));
    assert_eq!(first.state(), NewsState::Updated);
    assert_eq!(tx.count(EntityKind::News).unwrap(), 3);
}

#[test]
fn test_sqlite_shallow_load_has_no_news() {
    let store = Arc::new(SqliteStore::open(":memory:").unwrap());
    let context = PersistenceContext::new(store);
    context.startup().unwrap();
    let link = url("http://example.com/rss");

    let mut tx = context.begin().unwrap();
    let feed_id = tx
        .save_feed(&parse_feed(&link, RSS_V1.as_bytes(), Utc::now()).unwrap())
        .unwrap();
    tx.commit().unwrap();

    let mut tx = context.begin().unwrap();
    let shallow = tx.load_feed(feed_id, 0).unwrap().unwrap();
    assert!(shallow.news.is_empty());
    assert_eq!(shallow.title.as_deref(), Some("Example"));

    // Saving the shallow copy must not drop the stored news.
    tx.save_feed(&shallow).unwrap();
    tx.commit().unwrap();
    let mut tx = context.begin().unwrap();
    assert_eq!(tx.load_feed(feed_id, 1).unwrap().unwrap().news.len(), 2);
}

#[test]
fn test_sqlite_ids_continue_after_reopen() {
    let dir = std::env::temp_dir().join(format!("feedstore_reopen_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("store.db");
    let path = path.to_str().unwrap();

    let first_id = {
        let context = PersistenceContext::new(Arc::new(SqliteStore::open(path).unwrap()));
        context.startup().unwrap();
        let mut tx = context.begin().unwrap();
        let id = tx.save_feed(&feed_with_news("http://a.example/rss", 2)).unwrap();
        tx.commit().unwrap();
        context.shutdown().unwrap();
        id
    };

    let context = PersistenceContext::new(Arc::new(SqliteStore::open(path).unwrap()));
    context.startup().unwrap();
    let mut tx = context.begin().unwrap();
    let second_id = tx.save_feed(&feed_with_news("http://b.example/rss", 1)).unwrap();
    tx.commit().unwrap();

    assert!(second_id > first_id);
    let tx = context.begin().unwrap();
    assert_eq!(tx.feeds().unwrap().len(), 2);
    assert_eq!(tx.count(EntityKind::News).unwrap(), 3);
    drop(tx);
    context.shutdown().unwrap();
    std::fs::remove_dir_all(&dir).ok();
}
