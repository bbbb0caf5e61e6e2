//! Cascading saves and deletes.
//!
//! Saving an entity saves every entity it owns first; deleting one deletes its
//! dependents first. Parent folders, feeds and bins that reference a deleted
//! entity are updated unless they are being deleted in the same cascade.

use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

use super::{PersistenceError, Transaction};
use crate::events::Lifecycle;
use crate::model::{
    Attachment, BookMark, Category, EntityId, EntityKey, EntityKind, Feed, Folder, FolderChild,
    Label, News, NewsBin, NewsData, Person, SearchCondition, SearchMark,
};
use crate::store::{FeedRecord, NewsBinRecord, NewsRecord, Record, SearchMarkRecord};

impl Transaction<'_> {
    // ========================================================================
    // Saving
    // ========================================================================

    /// Saves a feed with its news items, categories and author.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::UniqueConstraint`] if another feed is stored
    /// under the same link. Nothing is written in that case.
    pub fn save_feed(&mut self, feed: &Feed) -> Result<i64, PersistenceError> {
        self.guarded(|tx| tx.store_feed(feed))
    }

    fn store_feed(&mut self, feed: &Feed) -> Result<i64, PersistenceError> {
        let link = feed.link.to_string();
        if let Some(existing) = self
            .keys_by_link(EntityKind::Feed, &link)?
            .into_iter()
            .find(|key| Some(key.id) != feed.id())
        {
            tracing::warn!(feed = %link, existing_id = existing.id, "Rejecting duplicate feed link");
            return Err(PersistenceError::UniqueConstraint {
                link,
                existing_id: existing.id,
            });
        }

        self.save_and_cascade_all_news(&feed.news, false)?;
        for category in &feed.categories {
            self.save_category(category)?;
        }
        if let Some(author) = &feed.author {
            self.save_person(author)?;
        }

        let id = self.assign_id(EntityKind::Feed, feed.entity_id());
        let mut record = FeedRecord::from_feed(id, feed);
        if let Some(previous) = self.load_feed_record(id)? {
            // News leave a feed only by being deleted, which updates the record.
            let current: HashSet<i64> = record.news_ids.iter().copied().collect();
            let mut news_ids: Vec<i64> = previous
                .news_ids
                .iter()
                .copied()
                .filter(|id| !current.contains(id))
                .collect();
            news_ids.append(&mut record.news_ids);
            record.news_ids = news_ids;

            self.remove_orphans(EntityKind::Category, &previous.category_ids, &record.category_ids)?;
            self.remove_orphans(
                EntityKind::Person,
                previous.author_id.as_slice(),
                record.author_id.as_slice(),
            )?;
        }
        self.write(Record::Feed(record), true)?;
        tracing::debug!(feed = %feed.link, id, news = feed.news.len(), "Saved feed");
        Ok(id)
    }

    /// Saves one news item with its author, attachments and categories.
    pub fn save_and_cascade_news(&mut self, news: &News, root: bool) -> Result<i64, PersistenceError> {
        self.guarded(|tx| {
            let _lock = news.special_read();
            tx.save_news_locked(news, root)
        })
    }

    /// Saves a batch of news items.
    ///
    /// The special read lock of every item is taken before the first write and
    /// held until the batch is done, so no item changes while its snapshot and
    /// its sub-entities are being written.
    pub fn save_and_cascade_all_news(
        &mut self,
        news: &[Arc<News>],
        root: bool,
    ) -> Result<(), PersistenceError> {
        self.guarded(|tx| {
            let _locks: Vec<_> = news.iter().map(|item| item.special_read()).collect();
            for item in news {
                tx.save_news_locked(item, root)?;
            }
            Ok(())
        })
    }

    fn save_news_locked(&mut self, news: &News, root: bool) -> Result<i64, PersistenceError> {
        let data = news.read();
        if let Some(author) = &data.author {
            self.save_person(author)?;
        }
        for attachment in &data.attachments {
            self.save_attachment(attachment)?;
        }
        for category in &data.categories {
            self.save_category(category)?;
        }
        let id = self.assign_id(EntityKind::News, news.entity_id());
        let record = NewsRecord::from_data(id, &data);
        drop(data);

        if let Some(previous) = self.load_news_record(id)? {
            self.remove_orphans(
                EntityKind::Person,
                previous.author_id.as_slice(),
                record.author_id.as_slice(),
            )?;
            self.remove_orphans(
                EntityKind::Attachment,
                &previous.attachment_ids,
                &record.attachment_ids,
            )?;
            self.remove_orphans(EntityKind::Category, &previous.category_ids, &record.category_ids)?;
        }
        self.write(Record::News(record), root)?;
        Ok(id)
    }

    fn save_person(&mut self, person: &Person) -> Result<i64, PersistenceError> {
        let id = self.assign_id(EntityKind::Person, &person.id);
        self.write(Record::Person(person.clone()), false)?;
        Ok(id)
    }

    fn save_category(&mut self, category: &Category) -> Result<i64, PersistenceError> {
        let id = self.assign_id(EntityKind::Category, &category.id);
        self.write(Record::Category(category.clone()), false)?;
        Ok(id)
    }

    fn save_attachment(&mut self, attachment: &Attachment) -> Result<i64, PersistenceError> {
        let id = self.assign_id(EntityKind::Attachment, &attachment.id);
        self.write(Record::Attachment(attachment.clone()), false)?;
        Ok(id)
    }

    pub fn save_news_bin(&mut self, bin: &NewsBin) -> Result<i64, PersistenceError> {
        self.guarded(|tx| {
            let id = tx.assign_id(EntityKind::NewsBin, bin.entity_id());
            let previous_parent = tx.load_news_bin_record(id)?.and_then(|r| r.parent_id);
            tx.write(Record::NewsBin(NewsBinRecord::from_bin(id, bin)), true)?;
            tx.move_child(FolderChild::NewsBin(id), previous_parent, bin.parent_id)?;
            Ok(id)
        })
    }

    /// Copies `news` into `bin` and saves both.
    ///
    /// Bins hold their own copies, with their own sub-entities, so deleting
    /// the original leaves the bin intact.
    pub fn copy_to_bin(&mut self, bin: &NewsBin, news: &News) -> Result<Arc<News>, PersistenceError> {
        let copy = Arc::new(News::from_data(EntityId::new(), detached_copy(&news.snapshot())));
        self.guarded(|tx| {
            tx.save_and_cascade_news(&copy, false)?;
            bin.add_news(&copy)?;
            tx.save_news_bin(bin)
        })?;
        Ok(copy)
    }

    /// Removes a news copy from `bin` and deletes it.
    pub fn remove_from_bin(&mut self, bin: &NewsBin, news_id: i64) -> Result<bool, PersistenceError> {
        if !bin.remove_news(news_id) {
            return Ok(false);
        }
        self.guarded(|tx| {
            tx.save_news_bin(bin)?;
            tx.erase(EntityKey::new(EntityKind::News, news_id), false)
        })?;
        Ok(true)
    }

    /// Saves a saved search with its conditions.
    ///
    /// Installs the context's search provider so results are computed on
    /// first access.
    pub fn save_search_mark(&mut self, search: &SearchMark) -> Result<i64, PersistenceError> {
        self.guarded(|tx| tx.store_search_mark(search))
    }

    fn store_search_mark(&mut self, search: &SearchMark) -> Result<i64, PersistenceError> {
        for condition in &search.conditions {
            let condition_id = self.assign_id(EntityKind::SearchCondition, &condition.id);
            tracing::trace!(condition_id, "Saving search condition");
            self.write(Record::SearchCondition(condition.clone()), false)?;
        }

        let id = self.assign_id(EntityKind::SearchMark, search.entity_id());
        if let Some(provider) = self.ctx.search_provider() {
            if search.install_result_provider(Arc::clone(provider)) {
                tracing::debug!(search = %search.name, "Installed search result provider");
            }
        }

        let record = SearchMarkRecord::from_search_mark(id, search);
        let previous = self.load_search_mark_record(id)?;
        if let Some(previous) = &previous {
            self.remove_orphans(
                EntityKind::SearchCondition,
                &previous.condition_ids,
                &record.condition_ids,
            )?;
        }
        self.write(Record::SearchMark(record), true)?;
        self.move_child(
            FolderChild::SearchMark(id),
            previous.and_then(|p| p.parent_id),
            search.parent_id,
        )?;
        Ok(id)
    }

    /// Saves a folder and links it into its parent.
    ///
    /// Children that were linked into the stored folder by saving them are
    /// kept even if `folder` does not list them.
    pub fn save_folder(&mut self, folder: &Folder) -> Result<i64, PersistenceError> {
        self.guarded(|tx| tx.store_folder(folder))
    }

    fn store_folder(&mut self, folder: &Folder) -> Result<i64, PersistenceError> {
        let id = self.assign_id(EntityKind::Folder, &folder.id);
        let mut record = folder.clone();
        let previous = self.load_folder(id)?;
        if let Some(previous) = &previous {
            for child in &previous.children {
                if !record.children.contains(child) && self.read_record(child.key())?.is_some() {
                    record.children.push(*child);
                }
            }
        }
        self.write(Record::Folder(record), true)?;
        self.move_child(
            FolderChild::Folder(id),
            previous.and_then(|p| p.parent_id),
            folder.parent_id,
        )?;
        Ok(id)
    }

    pub fn save_bookmark(&mut self, mark: &BookMark) -> Result<i64, PersistenceError> {
        self.guarded(|tx| {
            let id = tx.assign_id(EntityKind::BookMark, &mark.id);
            let previous_parent = tx.load_bookmark(id)?.and_then(|m| m.parent_id);
            tx.write(Record::BookMark(mark.clone()), true)?;
            tx.move_child(FolderChild::BookMark(id), previous_parent, mark.parent_id)?;
            Ok(id)
        })
    }

    pub fn save_label(&mut self, label: &Label) -> Result<i64, PersistenceError> {
        self.guarded(|tx| {
            let id = tx.assign_id(EntityKind::Label, &label.id);
            tx.write(Record::Label(label.clone()), true)?;
            Ok(id)
        })
    }

    pub fn save_search_condition(&mut self, condition: &SearchCondition) -> Result<i64, PersistenceError> {
        self.guarded(|tx| {
            let id = tx.assign_id(EntityKind::SearchCondition, &condition.id);
            tx.write(Record::SearchCondition(condition.clone()), true)?;
            Ok(id)
        })
    }

    // ========================================================================
    // Deleting
    // ========================================================================

    /// Deletes the entity and everything that depends on it.
    ///
    /// Returns `false` if nothing is stored under `key`. On error nothing of
    /// the cascade stays buffered.
    pub fn delete(&mut self, key: EntityKey) -> Result<bool, PersistenceError> {
        self.guarded(|tx| tx.erase(key, true))
    }

    pub fn delete_feed_by_link(&mut self, link: &Url) -> Result<bool, PersistenceError> {
        self.guarded(|tx| {
            let mut deleted = false;
            for key in tx.keys_by_link(EntityKind::Feed, link.as_str())? {
                deleted |= tx.erase(key, true)?;
            }
            Ok(deleted)
        })
    }

    fn erase(&mut self, key: EntityKey, root: bool) -> Result<bool, PersistenceError> {
        if self.deleting.contains(&key) {
            return Ok(false);
        }
        let Some(record) = self.read_record(key)? else {
            return Ok(false);
        };
        self.deleting.insert(key);
        self.events.handle(Lifecycle::Deleting(key));
        self.cascade_delete(key, &record)?;
        self.remove(record, root)?;
        Ok(true)
    }

    fn erase_all(&mut self, kind: EntityKind, ids: &[i64]) -> Result<(), PersistenceError> {
        for &id in ids {
            self.erase(EntityKey::new(kind, id), false)?;
        }
        Ok(())
    }

    /// Deletes the sub-entities in `previous` that are no longer in `current`.
    fn remove_orphans(
        &mut self,
        kind: EntityKind,
        previous: &[i64],
        current: &[i64],
    ) -> Result<(), PersistenceError> {
        for id in previous.iter().filter(|id| !current.contains(*id)) {
            tracing::trace!(%kind, id, "Deleting orphan");
            self.erase(EntityKey::new(kind, *id), false)?;
        }
        Ok(())
    }

    fn cascade_delete(&mut self, key: EntityKey, record: &Record) -> Result<(), PersistenceError> {
        match record {
            Record::News(news) => {
                self.erase_all(EntityKind::Person, news.author_id.as_slice())?;
                self.erase_all(EntityKind::Attachment, &news.attachment_ids)?;
                self.erase_all(EntityKind::Category, &news.category_ids)?;
                for feed_key in self.keys_by_link(EntityKind::Feed, news.feed_link.as_str())? {
                    self.unlink_news_from_feed(feed_key, news.id)?;
                }
                self.unlink_news_from_bins(news.id)?;
            }
            Record::Feed(feed) => {
                self.erase_all(EntityKind::News, &feed.news_ids)?;
                self.erase_all(EntityKind::Category, &feed.category_ids)?;
                self.erase_all(EntityKind::Person, feed.author_id.as_slice())?;
            }
            Record::Folder(folder) => {
                for child in &folder.children {
                    self.erase(child.key(), false)?;
                }
                self.detach_from_parent(key, folder.parent_id)?;
            }
            Record::BookMark(mark) => {
                self.detach_from_parent(key, mark.parent_id)?;
                let link = mark.feed_link.as_str();
                let shared = self
                    .keys_by_link(EntityKind::BookMark, link)?
                    .into_iter()
                    .any(|other| other != key && !self.deleting.contains(&other));
                if !shared {
                    for feed_key in self.keys_by_link(EntityKind::Feed, link)? {
                        self.erase(feed_key, false)?;
                    }
                }
            }
            Record::NewsBin(bin) => {
                let news_ids: Vec<i64> = bin.news_ids().collect();
                self.erase_all(EntityKind::News, &news_ids)?;
                self.detach_from_parent(key, bin.parent_id)?;
            }
            Record::SearchMark(search) => {
                self.erase_all(EntityKind::SearchCondition, &search.condition_ids)?;
                self.detach_from_parent(key, search.parent_id)?;
            }
            Record::Label(_) => self.unlink_label(key.id)?,
            Record::Attachment(_)
            | Record::Category(_)
            | Record::Person(_)
            | Record::SearchCondition(_) => {}
        }
        Ok(())
    }

    // ========================================================================
    // Parent pointers
    // ========================================================================

    /// Moves `child` from its previous parent folder to `parent`.
    fn move_child(
        &mut self,
        child: FolderChild,
        previous_parent: Option<i64>,
        parent: Option<i64>,
    ) -> Result<(), PersistenceError> {
        if previous_parent != parent {
            self.detach_from_parent(child.key(), previous_parent)?;
        }
        if let Some(parent) = parent {
            self.edit_folder(parent, |folder| folder.add_child(child))?;
        }
        Ok(())
    }

    fn detach_from_parent(&mut self, key: EntityKey, parent: Option<i64>) -> Result<(), PersistenceError> {
        if let Some(parent) = parent {
            self.edit_folder(parent, |folder| {
                folder.remove_child(key);
            })?;
        }
        Ok(())
    }

    fn edit_folder(&mut self, id: i64, edit: impl FnOnce(&mut Folder)) -> Result<(), PersistenceError> {
        let key = EntityKey::new(EntityKind::Folder, id);
        if self.deleting.contains(&key) {
            return Ok(());
        }
        let Some(Record::Folder(mut folder)) = self.read_record(key)? else {
            tracing::warn!(folder_id = id, "Parent folder not found");
            return Ok(());
        };
        edit(&mut folder);
        self.write(Record::Folder(folder), false)?;
        Ok(())
    }

    fn unlink_news_from_feed(&mut self, feed_key: EntityKey, news_id: i64) -> Result<(), PersistenceError> {
        if self.deleting.contains(&feed_key) {
            return Ok(());
        }
        let Some(Record::Feed(mut feed)) = self.read_record(feed_key)? else {
            return Ok(());
        };
        let before = feed.news_ids.len();
        feed.news_ids.retain(|id| *id != news_id);
        if feed.news_ids.len() != before {
            self.write(Record::Feed(feed), false)?;
        }
        Ok(())
    }

    fn unlink_news_from_bins(&mut self, news_id: i64) -> Result<(), PersistenceError> {
        for record in self.records(EntityKind::NewsBin)? {
            let Record::NewsBin(mut bin) = record else { continue };
            if self.deleting.contains(&EntityKey::new(EntityKind::NewsBin, bin.id)) {
                continue;
            }
            let mut changed = false;
            for ids in bin.news.values_mut() {
                let before = ids.len();
                ids.retain(|id| *id != news_id);
                changed |= ids.len() != before;
            }
            if changed {
                self.write(Record::NewsBin(bin), false)?;
            }
        }
        Ok(())
    }

    fn unlink_label(&mut self, label_id: i64) -> Result<(), PersistenceError> {
        for record in self.records(EntityKind::News)? {
            let Record::News(mut news) = record else { continue };
            if news.labels.remove(&label_id) {
                self.write(Record::News(news), false)?;
            }
        }
        Ok(())
    }
}

/// Item data with fresh sub-entity ids, for storing an independent copy.
fn detached_copy(data: &NewsData) -> NewsData {
    let mut copy = data.clone();
    if let Some(author) = copy.author.as_mut() {
        author.id = EntityId::new();
    }
    for attachment in &mut copy.attachments {
        attachment.id = EntityId::new();
    }
    for category in &mut copy.categories {
        category.id = EntityId::new();
    }
    copy
}

#[cfg(test)]
mod tests {
    use super::super::PersistenceContext;
    use super::*;
    use crate::events::{EventKind, ModelEvent};
    use crate::model::NewsState;
    use crate::store::{MemoryStore, ObjectStore, StoreError, StoredObject, WriteOp};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn context() -> (Arc<MemoryStore>, PersistenceContext) {
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

    fn removed_count(events: &[ModelEvent], kind: EntityKind) -> usize {
        events
            .iter()
            .filter(|e| e.entity_kind() == kind && e.kind() == EventKind::Removed)
            .count()
    }

    #[test]
    fn test_save_feed_assigns_ids_everywhere() {
        let (store, context) = context();
        let feed = feed_with_news("http://a.example/rss", 2);

        let mut tx = context.begin().unwrap();
        tx.save_feed(&feed).unwrap();
        let events = tx.commit().unwrap();

        assert!(feed.id().is_some());
        assert!(feed.news.iter().all(|n| n.id().is_some()));
        assert_eq!(store.count(EntityKind::News), 2);
        assert_eq!(store.count(EntityKind::Attachment), 2);
        assert_eq!(store.count(EntityKind::Category), 4);
        assert!(events.iter().all(|e| e.kind() == EventKind::Persisted));
        let root: Vec<_> = events.iter().filter(|e| e.is_root()).collect();
        assert_eq!(root.len(), 1);
        assert_eq!(root[0].entity_kind(), EntityKind::Feed);
    }

    #[test]
    fn test_duplicate_feed_link_is_rejected() {
        let (store, context) = context();
        let mut tx = context.begin().unwrap();
        tx.save_feed(&Feed::new(url("http://a.example/rss"))).unwrap();
        tx.commit().unwrap();

        let mut tx = context.begin().unwrap();
        let result = tx.save_feed(&feed_with_news("http://a.example/rss", 1));
        assert!(matches!(
            result,
            Err(PersistenceError::UniqueConstraint { ref link, .. }) if link == "http://a.example/rss"
        ));
        assert_eq!(tx.pending_writes(), 0);
        drop(tx);
        assert_eq!(store.count(EntityKind::Feed), 1);
    }

    #[test]
    fn test_resaving_same_feed_is_allowed() {
        let (_, context) = context();
        let feed = feed_with_news("http://a.example/rss", 1);
        let mut tx = context.begin().unwrap();
        tx.save_feed(&feed).unwrap();
        tx.save_feed(&feed).unwrap();
        let events = tx.commit().unwrap();
        assert_eq!(events.len(), 5);
    }

    #[test]
    fn test_special_read_locks_released_after_batch() {
        let (_, context) = context();
        let feed = feed_with_news("http://a.example/rss", 3);
        let mut tx = context.begin().unwrap();
        tx.save_and_cascade_all_news(&feed.news, true).unwrap();
        assert!(feed.news.iter().all(|n| !n.is_special_read_held()));
        feed.news[0].set_state(NewsState::Read);
    }

    #[test]
    fn test_delete_feed_cascades_in_one_batch() {
        let (store, context) = context();
        let feed = feed_with_news("http://a.example/rss", 3);
        let mut tx = context.begin().unwrap();
        tx.save_feed(&feed).unwrap();
        tx.commit().unwrap();

        let mut tx = context.begin().unwrap();
        assert!(tx.delete_feed_by_link(&feed.link).unwrap());
        let events = tx.commit().unwrap();

        assert_eq!(removed_count(&events, EntityKind::News), 3);
        assert_eq!(removed_count(&events, EntityKind::Attachment), 3);
        assert_eq!(removed_count(&events, EntityKind::Category), 6);
        assert_eq!(removed_count(&events, EntityKind::Feed), 1);
        assert_eq!(events.len(), 13);
        assert!(store.is_empty());
    }

    #[test]
    fn test_deleting_news_unlinks_it_from_feed() {
        let (_, context) = context();
        let feed = feed_with_news("http://a.example/rss", 2);
        let mut tx = context.begin().unwrap();
        let feed_id = tx.save_feed(&feed).unwrap();
        tx.commit().unwrap();

        let news_id = feed.news[0].id().unwrap();
        let mut tx = context.begin().unwrap();
        tx.delete(EntityKey::new(EntityKind::News, news_id)).unwrap();
        let events = tx.commit().unwrap();

        let updated: Vec<_> = events
            .iter()
            .filter(|e| e.kind() == EventKind::Updated)
            .collect();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].entity_kind(), EntityKind::Feed);

        let mut tx = context.begin().unwrap();
        let record = tx.load_feed_record(feed_id).unwrap().unwrap();
        assert_eq!(record.news_ids, [feed.news[1].id().unwrap()]);
    }

    #[test]
    fn test_feed_saved_without_news_keeps_stored_news() {
        let (_, context) = context();
        let feed = feed_with_news("http://a.example/rss", 2);
        let mut tx = context.begin().unwrap();
        let id = tx.save_feed(&feed).unwrap();
        tx.commit().unwrap();

        let mut tx = context.begin().unwrap();
        let mut shallow = tx.load_feed(id, 0).unwrap().unwrap();
        assert!(shallow.news.is_empty());
        shallow.title = Some("renamed".into());
        tx.save_feed(&shallow).unwrap();
        tx.commit().unwrap();

        let mut tx = context.begin().unwrap();
        let full = tx.load_feed(id, 1).unwrap().unwrap();
        assert_eq!(full.title.as_deref(), Some("renamed"));
        assert_eq!(full.news.len(), 2);
    }

    #[test]
    fn test_removed_category_is_deleted_on_save() {
        let (store, context) = context();
        let mut feed = Feed::new(url("http://a.example/rss"));
        feed.categories.push(Category::new("tech"));
        feed.categories.push(Category::new("news"));
        let mut tx = context.begin().unwrap();
        tx.save_feed(&feed).unwrap();
        tx.commit().unwrap();

        feed.categories.pop();
        let mut tx = context.begin().unwrap();
        tx.save_feed(&feed).unwrap();
        let events = tx.commit().unwrap();
        assert_eq!(removed_count(&events, EntityKind::Category), 1);
        assert_eq!(store.count(EntityKind::Category), 1);
    }

    #[test]
    fn test_folder_delete_cascades_to_children() {
        let (store, context) = context();
        let mut tx = context.begin().unwrap();

        let root = Folder::new("root", None);
        let root_id = tx.save_folder(&root).unwrap();
        let child = Folder::new("child", Some(root_id));
        let child_id = tx.save_folder(&child).unwrap();
        let mark = BookMark::new("a", url("http://a.example/rss"), Some(child_id));
        tx.save_bookmark(&mark).unwrap();
        tx.save_feed(&Feed::new(url("http://a.example/rss"))).unwrap();
        tx.commit().unwrap();

        let mut tx = context.begin().unwrap();
        let stored_root = tx.load_folder(root_id).unwrap().unwrap();
        assert_eq!(stored_root.children, [FolderChild::Folder(child_id)]);

        tx.delete(EntityKey::new(EntityKind::Folder, root_id)).unwrap();
        let events = tx.commit().unwrap();

        // The feed goes with its last bookmark
        assert_eq!(removed_count(&events, EntityKind::Feed), 1);
        assert_eq!(removed_count(&events, EntityKind::Folder), 2);
        assert!(events.iter().all(|e| e.kind() == EventKind::Removed));
        assert!(store.is_empty());
    }

    #[test]
    fn test_feed_shared_by_bookmarks_survives_one_delete() {
        let (store, context) = context();
        let link = url("http://a.example/rss");
        let first = BookMark::new("a", link.clone(), None);
        let second = BookMark::new("b", link.clone(), None);
        let mut tx = context.begin().unwrap();
        let first_id = tx.save_bookmark(&first).unwrap();
        tx.save_bookmark(&second).unwrap();
        tx.save_feed(&Feed::new(link)).unwrap();
        tx.commit().unwrap();

        let mut tx = context.begin().unwrap();
        tx.delete(EntityKey::new(EntityKind::BookMark, first_id)).unwrap();
        tx.commit().unwrap();
        assert_eq!(store.count(EntityKind::Feed), 1);
    }

    #[test]
    fn test_moving_bookmark_updates_both_parents() {
        let (_, context) = context();
        let mut tx = context.begin().unwrap();
        let a = tx.save_folder(&Folder::new("a", None)).unwrap();
        let b = tx.save_folder(&Folder::new("b", None)).unwrap();
        let mut mark = BookMark::new("m", url("http://a.example/rss"), Some(a));
        let mark_id = tx.save_bookmark(&mark).unwrap();
        mark.parent_id = Some(b);
        tx.save_bookmark(&mark).unwrap();

        assert!(tx.load_folder(a).unwrap().unwrap().children.is_empty());
        assert_eq!(
            tx.load_folder(b).unwrap().unwrap().children,
            [FolderChild::BookMark(mark_id)]
        );
    }

    #[test]
    fn test_bin_copy_is_independent_of_original() {
        let (store, context) = context();
        let feed = feed_with_news("http://a.example/rss", 1);
        let bin = NewsBin::new("later", None, false);
        let mut tx = context.begin().unwrap();
        tx.save_feed(&feed).unwrap();
        tx.save_news_bin(&bin).unwrap();
        let copy = tx.copy_to_bin(&bin, &feed.news[0]).unwrap();
        tx.commit().unwrap();

        assert_ne!(copy.id(), feed.news[0].id());
        assert!(bin.contains_news(copy.id().unwrap()));
        assert_eq!(store.count(EntityKind::News), 2);
        assert_eq!(store.count(EntityKind::Attachment), 2);

        let mut tx = context.begin().unwrap();
        tx.delete_feed_by_link(&feed.link).unwrap();
        tx.commit().unwrap();
        assert_eq!(store.count(EntityKind::News), 1);

        let mut tx = context.begin().unwrap();
        let id = bin.id().unwrap();
        tx.delete(EntityKey::new(EntityKind::NewsBin, id)).unwrap();
        tx.commit().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_deleting_bin_news_unlinks_it() {
        let (_, context) = context();
        let feed = feed_with_news("http://a.example/rss", 1);
        let bin = NewsBin::new("later", None, true);
        let mut tx = context.begin().unwrap();
        tx.save_feed(&feed).unwrap();
        let copy = tx.copy_to_bin(&bin, &feed.news[0]).unwrap();
        let copy_id = copy.id().unwrap();
        tx.delete(EntityKey::new(EntityKind::News, copy_id)).unwrap();

        let stored = tx.load_news_bin(bin.id().unwrap()).unwrap().unwrap();
        assert!(!stored.contains_news(copy_id));
    }

    #[test]
    fn test_deleting_label_removes_it_from_news() {
        let (_, context) = context();
        let feed = feed_with_news("http://a.example/rss", 1);
        let label = Label::new("important", "255,0,0");
        let mut tx = context.begin().unwrap();
        let label_id = tx.save_label(&label).unwrap();
        feed.news[0].add_label(label_id);
        tx.save_feed(&feed).unwrap();
        tx.commit().unwrap();

        let mut tx = context.begin().unwrap();
        tx.delete(EntityKey::new(EntityKind::Label, label_id)).unwrap();
        let news = tx.load_news(feed.news[0].id().unwrap()).unwrap().unwrap();
        assert!(news.labels().is_empty());
    }

    #[test]
    fn test_search_mark_conditions_follow_the_mark() {
        let (store, context) = context();
        let mut search = SearchMark::new("unread", None, true);
        search.conditions.push(SearchCondition::new(
            "state",
            crate::model::SearchSpecifier::Is,
            "UNREAD",
        ));
        let mut tx = context.begin().unwrap();
        let id = tx.save_search_mark(&search).unwrap();
        tx.commit().unwrap();
        assert_eq!(store.count(EntityKind::SearchCondition), 1);

        let mut tx = context.begin().unwrap();
        let loaded = tx.load_search_mark(id).unwrap().unwrap();
        assert_eq!(loaded.conditions.len(), 1);
        tx.delete(EntityKey::new(EntityKind::SearchMark, id)).unwrap();
        tx.commit().unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_delete_missing_entity_is_noop() {
        let (_, context) = context();
        let mut tx = context.begin().unwrap();
        assert!(!tx.delete(EntityKey::new(EntityKind::Feed, 99)).unwrap());
        assert!(tx.commit().unwrap().is_empty());
    }

    #[test]
    fn test_entity_resaved_after_delete_can_be_deleted_again() {
        let (store, context) = context();
        let label = Label::new("later", "0,0,255");
        let mut tx = context.begin().unwrap();
        let id = tx.save_label(&label).unwrap();
        tx.commit().unwrap();

        let key = EntityKey::new(EntityKind::Label, id);
        let mut tx = context.begin().unwrap();
        assert!(tx.delete(key).unwrap());
        tx.save_label(&label).unwrap();
        assert!(tx.delete(key).unwrap());
        let events = tx.commit().unwrap();

        assert_eq!(removed_count(&events, EntityKind::Label), 1);
        assert_eq!(events.len(), 1);
        assert_eq!(store.count(EntityKind::Label), 0);
    }

    #[test]
    fn test_failed_cascade_leaves_nothing_to_commit() {
        let (store, context) = context();
        let feed = feed_with_news("http://a.example/rss", 2);
        let mut tx = context.begin().unwrap();
        let feed_id = tx.save_feed(&feed).unwrap();
        tx.commit().unwrap();

        let broken = EntityKey::new(EntityKind::News, feed.news[1].id().unwrap());
        store
            .apply(&[WriteOp::Put(StoredObject {
                key: broken,
                link_text: None,
                body: "{".into(),
            })])
            .unwrap();

        let mut tx = context.begin().unwrap();
        let result = tx.delete(EntityKey::new(EntityKind::Feed, feed_id));
        assert!(matches!(
            result,
            Err(PersistenceError::Store(StoreError::Corrupt { key, .. })) if key == broken
        ));
        assert_eq!(tx.pending_writes(), 0);
        assert_eq!(tx.pending_events(), 0);

        // The transaction stays usable after the failed operation.
        let label_id = tx.save_label(&Label::new("x", "0,0,0")).unwrap();
        let events = tx.commit().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id(), Some(label_id));

        let mut tx = context.begin().unwrap();
        let record = tx.load_feed_record(feed_id).unwrap().unwrap();
        let ids: Vec<i64> = feed.news.iter().filter_map(|n| n.id()).collect();
        assert_eq!(record.news_ids, ids);
        assert_eq!(store.count(EntityKind::News), 2);
        assert_eq!(store.count(EntityKind::Attachment), 2);
        assert_eq!(store.count(EntityKind::Category), 4);
    }
}
