use chrono::{DateTime, Utc};
use std::sync::Arc;
use url::Url;

use super::entity::EntityId;
use super::news::News;
use super::values::{Category, Image, Person};
use crate::merge::{
    merge_list, merge_optional, merge_scalar, ComplexMergeResult, MergeResult, Merged, Unmatched,
};

/// A subscribed RSS/Atom feed and the news items it produced.
///
/// The link is the feed's identity: no two persisted feeds share one.
#[derive(Debug, Clone)]
pub struct Feed {
    id: EntityId,
    pub link: Url,
    pub title: Option<String>,
    pub description: Option<String>,
    pub homepage: Option<Url>,
    pub language: Option<String>,
    pub copyright: Option<String>,
    pub image: Option<Image>,
    pub author: Option<Person>,
    pub categories: Vec<Category>,
    pub last_modified: Option<DateTime<Utc>>,
    pub news: Vec<Arc<News>>,
}

impl Feed {
    pub fn new(link: Url) -> Self {
        Self::with_id(EntityId::new(), link)
    }

    pub fn with_id(id: EntityId, link: Url) -> Self {
        Self {
            id,
            link,
            title: None,
            description: None,
            homepage: None,
            language: None,
            copyright: None,
            image: None,
            author: None,
            categories: Vec::new(),
            last_modified: None,
            news: Vec::new(),
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id.get()
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.id
    }

    /// Creates a news item belonging to this feed and appends it.
    pub fn create_news(&mut self, receive_date: DateTime<Utc>) -> Arc<News> {
        let news = Arc::new(News::new(self.link.clone(), receive_date));
        self.news.push(Arc::clone(&news));
        news
    }

    pub fn add_news(&mut self, news: Arc<News>) {
        self.news.push(news);
    }

    /// Returns the stored item that is equivalent to `candidate`, if any.
    pub fn find_equivalent(&self, candidate: &News) -> Option<&Arc<News>> {
        self.news.iter().find(|n| n.is_equivalent(candidate))
    }

    /// Merges a freshly parsed copy of this feed into it.
    ///
    /// Items equivalent to a stored item are merged into that item; the rest are
    /// appended. Stored items missing from `incoming` stay, since feeds only
    /// publish their most recent entries. The returned value lists every item
    /// that was added or changed and therefore needs saving.
    pub fn merge(&mut self, incoming: &Feed) -> ComplexMergeResult<Vec<Arc<News>>> {
        let mut result = MergeResult::default();
        let mut dirty = Vec::new();

        let mut updated = false;
        updated |= merge_scalar(&mut self.title, &incoming.title);
        updated |= merge_scalar(&mut self.description, &incoming.description);
        updated |= merge_scalar(&mut self.homepage, &incoming.homepage);
        updated |= merge_scalar(&mut self.language, &incoming.language);
        updated |= merge_scalar(&mut self.copyright, &incoming.copyright);
        updated |= merge_scalar(&mut self.image, &incoming.image);
        updated |= merge_scalar(&mut self.last_modified, &incoming.last_modified);
        if updated {
            result.set_structural_change();
        }

        result.add_all(merge_optional(
            &mut self.author,
            incoming.author.as_ref(),
            Merged::Person,
        ));
        result.add_all(merge_list(
            &mut self.categories,
            &incoming.categories,
            Unmatched::Remove,
            Merged::Category,
        ));

        for item in &incoming.news {
            match self.find_equivalent(item).cloned() {
                Some(stored) => {
                    if stored.merge(item).is_updated() {
                        result.add_updated(Merged::News(Arc::clone(&stored)));
                        dirty.push(stored);
                    }
                }
                None => {
                    if item.feed_link() != self.link {
                        tracing::warn!(
                            feed = %self.link,
                            item_feed = %item.feed_link(),
                            "Skipping merged item that belongs to another feed"
                        );
                        continue;
                    }
                    self.news.push(Arc::clone(item));
                    result.add_added(Merged::News(Arc::clone(item)));
                    dirty.push(Arc::clone(item));
                }
            }
        }

        tracing::debug!(
            feed = %self.link,
            changed = dirty.len(),
            structural = result.is_structural_change(),
            "Merged feed"
        );
        ComplexMergeResult::new(dirty, result)
    }
}
