//! Activation: rebuilding live entities from stored records.

use std::sync::Arc;
use url::Url;

use super::{PersistenceError, Transaction};
use crate::model::{
    Attachment, BookMark, Category, EntityId, EntityKey, EntityKind, Feed, Folder, Label, News,
    NewsBin, Person, SearchCondition, SearchMark,
};
use crate::store::{FeedRecord, NewsBinRecord, NewsRecord, Record, SearchMarkRecord};

/// Loads one record of a fixed kind by id.
macro_rules! load_record {
    ($(#[$meta:meta])* $vis:vis fn $name:ident => $variant:ident, $ty:ty) => {
        $(#[$meta])*
        $vis fn $name(&mut self, id: i64) -> Result<Option<$ty>, PersistenceError> {
            match self.activate(EntityKey::new(EntityKind::$variant, id))? {
                Some(Record::$variant(record)) => Ok(Some(record)),
                _ => Ok(None),
            }
        }
    };
}

impl Transaction<'_> {
    load_record!(pub fn load_person => Person, Person);
    load_record!(pub fn load_category => Category, Category);
    load_record!(pub fn load_attachment => Attachment, Attachment);
    load_record!(pub fn load_bookmark => BookMark, BookMark);
    load_record!(pub fn load_folder => Folder, Folder);
    load_record!(pub fn load_label => Label, Label);
    load_record!(pub fn load_search_condition => SearchCondition, SearchCondition);
    load_record!(
        /// The stored snapshot of a feed, without activating anything it references.
        pub fn load_feed_record => Feed, FeedRecord
    );
    load_record!(pub(super) fn load_news_record => News, NewsRecord);
    load_record!(pub(super) fn load_news_bin_record => NewsBin, NewsBinRecord);
    load_record!(pub(super) fn load_search_mark_record => SearchMark, SearchMarkRecord);

    /// Loads each id in turn. Dangling references are skipped.
    fn load_each<T>(
        &mut self,
        ids: &[i64],
        load: fn(&mut Self, i64) -> Result<Option<T>, PersistenceError>,
    ) -> Result<Vec<T>, PersistenceError> {
        let mut loaded = Vec::with_capacity(ids.len());
        for &id in ids {
            match load(self, id)? {
                Some(value) => loaded.push(value),
                None => tracing::warn!(id, "Skipping dangling reference"),
            }
        }
        Ok(loaded)
    }

    /// Loads a news item with its author, attachments and categories.
    pub fn load_news(&mut self, id: i64) -> Result<Option<News>, PersistenceError> {
        let Some(record) = self.load_news_record(id)? else {
            return Ok(None);
        };
        let author = match record.author_id {
            Some(author_id) => self.load_person(author_id)?,
            None => None,
        };
        let attachments = self.load_each(&record.attachment_ids, Self::load_attachment)?;
        let categories = self.load_each(&record.category_ids, Self::load_category)?;
        let data = record.into_data(author, attachments, categories);
        Ok(Some(News::from_data(EntityId::with(id), data)))
    }

    /// Loads a feed with its author and categories.
    ///
    /// `depth` bounds how far references are followed: at 0 the news items are
    /// left out, from 1 on they are loaded completely. Saving a feed loaded
    /// without its news keeps the stored news list.
    pub fn load_feed(&mut self, id: i64, depth: u32) -> Result<Option<Feed>, PersistenceError> {
        let Some(mut record) = self.load_feed_record(id)? else {
            return Ok(None);
        };
        let news_ids = std::mem::take(&mut record.news_ids);
        let author = match record.author_id {
            Some(author_id) => self.load_person(author_id)?,
            None => None,
        };
        let categories = self.load_each(&record.category_ids, Self::load_category)?;
        let mut feed = record.into_feed(author, categories);

        if depth > 0 {
            for news in self.load_each(&news_ids, Self::load_news)? {
                feed.add_news(Arc::new(news));
            }
        }
        tracing::debug!(feed = %feed.link, id, depth, news = feed.news.len(), "Loaded feed");
        Ok(Some(feed))
    }

    pub fn load_feed_by_link(&mut self, link: &Url, depth: u32) -> Result<Option<Feed>, PersistenceError> {
        match self.keys_by_link(EntityKind::Feed, link.as_str())?.first() {
            Some(key) => self.load_feed(key.id, depth),
            None => Ok(None),
        }
    }

    pub fn load_news_bin(&mut self, id: i64) -> Result<Option<NewsBin>, PersistenceError> {
        Ok(self.load_news_bin_record(id)?.map(NewsBinRecord::into_bin))
    }

    /// Loads a saved search with its conditions. Results are computed on first
    /// access if the context has a search provider.
    pub fn load_search_mark(&mut self, id: i64) -> Result<Option<SearchMark>, PersistenceError> {
        let Some(record) = self.load_search_mark_record(id)? else {
            return Ok(None);
        };
        let conditions = self.load_each(&record.condition_ids, Self::load_search_condition)?;
        let search = record.into_search_mark(conditions);
        if let Some(provider) = self.ctx.search_provider() {
            search.install_result_provider(Arc::clone(provider));
        }
        Ok(Some(search))
    }

    /// Stored snapshots of every feed, ordered by id.
    pub fn feeds(&self) -> Result<Vec<FeedRecord>, PersistenceError> {
        Ok(self
            .records(EntityKind::Feed)?
            .into_iter()
            .filter_map(|record| match record {
                Record::Feed(feed) => Some(feed),
                _ => None,
            })
            .collect())
    }

    pub fn bookmarks(&self) -> Result<Vec<BookMark>, PersistenceError> {
        Ok(self
            .records(EntityKind::BookMark)?
            .into_iter()
            .filter_map(|record| match record {
                Record::BookMark(mark) => Some(mark),
                _ => None,
            })
            .collect())
    }

    pub fn labels(&self) -> Result<Vec<Label>, PersistenceError> {
        Ok(self
            .records(EntityKind::Label)?
            .into_iter()
            .filter_map(|record| match record {
                Record::Label(label) => Some(label),
                _ => None,
            })
            .collect())
    }

    /// Number of stored entities of `kind`, including this transaction's writes.
    pub fn count(&self, kind: EntityKind) -> Result<usize, PersistenceError> {
        Ok(self.records(kind)?.len())
    }
}
