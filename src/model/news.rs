use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use url::Url;

use super::entity::EntityId;
use super::lock::{Locked, ReadGuard, SpecialReadGuard};
use super::state::NewsState;
use super::values::{Attachment, Category, Guid, Person, Source};
use super::ModelError;
use crate::merge::{merge_list, merge_optional, merge_scalar, MergeResult, Merged, Unmatched};

/// Field values of a news item.
///
/// Obtained as a copy through [`News::snapshot`] or borrowed through
/// [`News::read`]; mutated only through the setters on [`News`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewsData {
    pub feed_link: Url,
    /// Set once the item has been moved to another feed.
    pub reparented: bool,
    pub title: Option<String>,
    pub link: Option<Url>,
    pub base_uri: Option<Url>,
    pub comments: Option<String>,
    pub in_reply_to: Option<String>,
    pub description: Option<String>,
    pub author: Option<Person>,
    pub publish_date: Option<DateTime<Utc>>,
    pub modified_date: Option<DateTime<Utc>>,
    pub receive_date: DateTime<Utc>,
    pub state: NewsState,
    pub flagged: bool,
    pub rating: i32,
    pub guid: Option<Guid>,
    pub source: Option<Source>,
    pub labels: BTreeSet<i64>,
    pub attachments: Vec<Attachment>,
    pub categories: Vec<Category>,
    pub properties: BTreeMap<String, String>,
}

impl NewsData {
    pub fn new(feed_link: Url, receive_date: DateTime<Utc>) -> Self {
        Self {
            feed_link,
            reparented: false,
            title: None,
            link: None,
            base_uri: None,
            comments: None,
            in_reply_to: None,
            description: None,
            author: None,
            publish_date: None,
            modified_date: None,
            receive_date,
            state: NewsState::New,
            flagged: false,
            rating: 0,
            guid: None,
            source: None,
            labels: BTreeSet::new(),
            attachments: Vec::new(),
            categories: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    /// State after merging in `incoming`.
    ///
    /// A state reported by the feed wins over the blank NEW default. Otherwise a
    /// title change on an item the user has already seen marks it UPDATED.
    pub fn merged_state(&self, incoming: &NewsData) -> NewsState {
        if incoming.state != self.state && incoming.state != NewsState::New {
            incoming.state
        } else if matches!(self.state, NewsState::Read | NewsState::Unread)
            && incoming.title != self.title
        {
            NewsState::Updated
        } else {
            self.state
        }
    }

    /// Merges the field values of `incoming` into `self`.
    pub fn merge(&mut self, incoming: &NewsData) -> MergeResult {
        let mut result = MergeResult::default();

        let state = self.merged_state(incoming);
        if state != self.state {
            self.state = state;
            result.set_structural_change();
        }

        result.add_all(merge_list(
            &mut self.attachments,
            &incoming.attachments,
            Unmatched::Retain,
            Merged::Attachment,
        ));
        result.add_all(merge_list(
            &mut self.categories,
            &incoming.categories,
            Unmatched::Remove,
            Merged::Category,
        ));
        result.add_all(merge_optional(
            &mut self.author,
            incoming.author.as_ref(),
            Merged::Person,
        ));
        result.add_all(merge_optional(
            &mut self.guid,
            incoming.guid.as_ref(),
            Merged::Guid,
        ));
        result.add_all(merge_optional(
            &mut self.source,
            incoming.source.as_ref(),
            Merged::Source,
        ));

        let mut updated = false;
        updated |= merge_scalar(&mut self.base_uri, &incoming.base_uri);
        updated |= merge_scalar(&mut self.comments, &incoming.comments);
        updated |= merge_scalar(&mut self.description, &incoming.description);
        updated |= merge_scalar(&mut self.link, &incoming.link);
        updated |= merge_scalar(&mut self.modified_date, &incoming.modified_date);
        updated |= merge_scalar(&mut self.publish_date, &incoming.publish_date);
        updated |= merge_scalar(&mut self.title, &incoming.title);
        updated |= merge_scalar(&mut self.in_reply_to, &incoming.in_reply_to);
        updated |= self.merge_properties(&incoming.properties);
        if updated {
            result.set_structural_change();
        }

        result
    }

    /// Incoming properties are added or overwritten; others are kept.
    fn merge_properties(&mut self, incoming: &BTreeMap<String, String>) -> bool {
        let mut changed = false;
        for (key, value) in incoming {
            if self.properties.get(key) != Some(value) {
                self.properties.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        changed
    }
}

/// Fields that decide whether two items are the same logical entry.
struct EquivalenceKey {
    guid: Option<String>,
    link: Option<Url>,
    feed_link: Url,
    title: Option<String>,
}

impl EquivalenceKey {
    fn of(data: &NewsData) -> Self {
        Self {
            guid: data.guid.as_ref().map(|g| g.value.clone()),
            link: data.link.clone(),
            feed_link: data.feed_link.clone(),
            title: data.title.clone(),
        }
    }

    fn matches(&self, other: &EquivalenceKey) -> bool {
        if self.guid.is_some() || other.guid.is_some() {
            return self.guid == other.guid;
        }
        if let (Some(a), Some(b)) = (&self.link, &other.link) {
            return a == b;
        }
        self.feed_link == other.feed_link && self.title == other.title
    }
}

/// A single feed entry.
///
/// Shared between threads behind an `Arc`. Every accessor takes the item's
/// read lock for the duration of the call and every mutator its write lock.
pub struct News {
    id: EntityId,
    data: Locked<NewsData>,
}

impl News {
    pub fn new(feed_link: Url, receive_date: DateTime<Utc>) -> Self {
        Self::from_data(EntityId::new(), NewsData::new(feed_link, receive_date))
    }

    pub fn from_data(id: EntityId, data: NewsData) -> Self {
        Self {
            id,
            data: Locked::new(data),
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id.get()
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.id
    }

    /// Borrows the field values under the read lock.
    pub fn read(&self) -> ReadGuard<'_, NewsData> {
        self.data.read()
    }

    /// Copies the field values under the read lock.
    pub fn snapshot(&self) -> NewsData {
        self.data.read().clone()
    }

    /// Holds the special read lock until the guard is dropped.
    ///
    /// While held, any mutator called on this item from the same thread panics.
    pub fn special_read(&self) -> SpecialReadGuard<'_> {
        self.data.special_read()
    }

    pub fn is_special_read_held(&self) -> bool {
        self.data.is_special_read_held()
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn feed_link(&self) -> Url {
        self.data.read().feed_link.clone()
    }

    pub fn title(&self) -> Option<String> {
        self.data.read().title.clone()
    }

    pub fn link(&self) -> Option<Url> {
        self.data.read().link.clone()
    }

    pub fn description(&self) -> Option<String> {
        self.data.read().description.clone()
    }

    pub fn author(&self) -> Option<Person> {
        self.data.read().author.clone()
    }

    pub fn state(&self) -> NewsState {
        self.data.read().state
    }

    pub fn is_visible(&self) -> bool {
        self.state().is_visible()
    }

    pub fn is_flagged(&self) -> bool {
        self.data.read().flagged
    }

    pub fn rating(&self) -> i32 {
        self.data.read().rating
    }

    pub fn guid(&self) -> Option<Guid> {
        self.data.read().guid.clone()
    }

    pub fn source(&self) -> Option<Source> {
        self.data.read().source.clone()
    }

    pub fn publish_date(&self) -> Option<DateTime<Utc>> {
        self.data.read().publish_date
    }

    pub fn modified_date(&self) -> Option<DateTime<Utc>> {
        self.data.read().modified_date
    }

    pub fn receive_date(&self) -> DateTime<Utc> {
        self.data.read().receive_date
    }

    pub fn attachments(&self) -> Vec<Attachment> {
        self.data.read().attachments.clone()
    }

    pub fn categories(&self) -> Vec<Category> {
        self.data.read().categories.clone()
    }

    pub fn labels(&self) -> BTreeSet<i64> {
        self.data.read().labels.clone()
    }

    pub fn property(&self, key: &str) -> Option<String> {
        self.data.read().properties.get(key).cloned()
    }

    // ========================================================================
    // Mutators
    // ========================================================================

    pub fn set_title(&self, title: Option<String>) {
        self.data.write().title = title;
    }

    pub fn set_link(&self, link: Option<Url>) {
        self.data.write().link = link;
    }

    pub fn set_base_uri(&self, base_uri: Option<Url>) {
        self.data.write().base_uri = base_uri;
    }

    pub fn set_comments(&self, comments: Option<String>) {
        self.data.write().comments = comments;
    }

    pub fn set_in_reply_to(&self, in_reply_to: Option<String>) {
        self.data.write().in_reply_to = in_reply_to;
    }

    pub fn set_description(&self, description: Option<String>) {
        self.data.write().description = description;
    }

    pub fn set_author(&self, author: Option<Person>) {
        self.data.write().author = author;
    }

    pub fn set_state(&self, state: NewsState) {
        self.data.write().state = state;
    }

    pub fn set_flagged(&self, flagged: bool) {
        self.data.write().flagged = flagged;
    }

    pub fn set_rating(&self, rating: i32) {
        self.data.write().rating = rating;
    }

    pub fn set_guid(&self, guid: Option<Guid>) {
        self.data.write().guid = guid;
    }

    pub fn set_source(&self, source: Option<Source>) {
        self.data.write().source = source;
    }

    pub fn set_publish_date(&self, date: Option<DateTime<Utc>>) {
        self.data.write().publish_date = date;
    }

    pub fn set_modified_date(&self, date: Option<DateTime<Utc>>) {
        self.data.write().modified_date = date;
    }

    pub fn add_attachment(&self, attachment: Attachment) {
        self.data.write().attachments.push(attachment);
    }

    /// Removes the attachment with the given link; returns whether one was found.
    pub fn remove_attachment(&self, link: &Url) -> bool {
        let mut data = self.data.write();
        let before = data.attachments.len();
        data.attachments.retain(|a| &a.link != link);
        data.attachments.len() != before
    }

    pub fn add_category(&self, category: Category) {
        self.data.write().categories.push(category);
    }

    pub fn add_label(&self, label_id: i64) -> bool {
        self.data.write().labels.insert(label_id)
    }

    pub fn remove_label(&self, label_id: i64) -> bool {
        self.data.write().labels.remove(&label_id)
    }

    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        self.data.write().properties.insert(key.into(), value.into());
    }

    pub fn remove_property(&self, key: &str) -> Option<String> {
        self.data.write().properties.remove(key)
    }

    /// Moves the item to another feed. Allowed once per item.
    pub fn reparent(&self, feed_link: Url) -> Result<(), ModelError> {
        let mut data = self.data.write();
        if data.reparented {
            return Err(ModelError::AlreadyReparented {
                news_id: self.id.get(),
            });
        }
        data.feed_link = feed_link;
        data.reparented = true;
        Ok(())
    }

    // ========================================================================
    // Equivalence and merge
    // ========================================================================

    /// Whether `other` is the same logical entry seen in a different fetch.
    ///
    /// A GUID on either side decides alone: both must carry one and the values
    /// must match. Without GUIDs, links decide when both items have one, and
    /// otherwise the feed link and title must both match.
    pub fn is_equivalent(&self, other: &News) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        let theirs = EquivalenceKey::of(&other.data.read());
        let ours = EquivalenceKey::of(&self.data.read());
        ours.matches(&theirs)
    }

    /// Merges a freshly fetched copy of this item into it.
    ///
    /// `incoming` is copied under its own read lock first; the rest of the merge
    /// runs under this item's write lock, so concurrent readers see either the
    /// old or the fully merged values.
    pub fn merge(&self, incoming: &News) -> MergeResult {
        if std::ptr::eq(self, incoming) {
            return MergeResult::default();
        }
        let incoming = incoming.snapshot();
        let mut data = self.data.write();
        let result = data.merge(&incoming);
        tracing::debug!(
            news_id = ?self.id.get(),
            state = %data.state,
            structural = result.is_structural_change(),
            "Merged news item"
        );
        result
    }
}

impl fmt::Debug for News {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data.read();
        f.debug_struct("News")
            .field("id", &self.id)
            .field("title", &data.title)
            .field("link", &data.link.as_ref().map(Url::as_str))
            .field("state", &data.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn received() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    fn item(title: &str) -> News {
        let news = News::new(url("http://feed.example/rss"), received());
        news.set_title(Some(title.to_string()));
        news
    }

    #[test]
    fn test_new_item_starts_as_new() {
        let news = item("a");
        assert_eq!(news.state(), NewsState::New);
        assert_eq!(news.id(), None);
        assert_eq!(news.receive_date(), received());
        assert!(news.is_visible());
    }

    #[test]
    fn test_guid_on_one_side_only_is_not_equivalent() {
        let a = item("same");
        a.set_guid(Some(Guid::new("g1", false)));
        a.set_link(Some(url("http://x/1")));
        let b = item("same");
        b.set_link(Some(url("http://x/1")));

        assert!(!a.is_equivalent(&b));
        assert!(!b.is_equivalent(&a));
    }

    #[test]
    fn test_equal_guids_win_over_different_links() {
        let a = item("one");
        a.set_guid(Some(Guid::new("g1", false)));
        a.set_link(Some(url("http://x/1")));
        let b = item("two");
        b.set_guid(Some(Guid::new("g1", false)));
        b.set_link(Some(url("http://x/2")));
        assert!(a.is_equivalent(&b));
    }

    #[test]
    fn test_links_compared_when_no_guids() {
        let a = item("one");
        a.set_link(Some(url("http://x/1")));
        let b = item("two");
        b.set_link(Some(url("http://x/1")));
        assert!(a.is_equivalent(&b));

        b.set_link(Some(url("http://x/2")));
        assert!(!a.is_equivalent(&b));
    }

    #[test]
    fn test_title_and_feed_compared_without_guid_or_link() {
        let a = item("same");
        let b = item("same");
        assert!(a.is_equivalent(&b));

        let c = News::new(url("http://other.example/rss"), received());
        c.set_title(Some("same".into()));
        assert!(!a.is_equivalent(&c));

        // A link on one side only falls through to feed and title.
        b.set_link(Some(url("http://x/9")));
        assert!(a.is_equivalent(&b));
    }

    #[test]
    fn test_reparent_only_once() {
        let news = item("a");
        news.reparent(url("http://moved.example/rss")).unwrap();
        assert_eq!(news.feed_link(), url("http://moved.example/rss"));
        assert!(matches!(
            news.reparent(url("http://again.example/rss")),
            Err(ModelError::AlreadyReparented { .. })
        ));
        assert_eq!(news.feed_link(), url("http://moved.example/rss"));
    }

    #[test]
    fn test_merge_with_identical_copy_is_noop() {
        let persisted = item("a");
        persisted.set_state(NewsState::Read);
        persisted.add_category(Category::new("rust"));
        let incoming = News::from_data(EntityId::new(), persisted.snapshot());

        let result = persisted.merge(&incoming);
        assert!(!result.is_updated());
        assert_eq!(persisted.state(), NewsState::Read);
    }

    #[test]
    fn test_merge_with_itself_is_noop() {
        let news = item("a");
        assert!(!news.merge(&news).is_updated());
    }

    #[test]
    fn test_incoming_state_adopted_unless_new() {
        let persisted = item("a");
        persisted.set_state(NewsState::Unread);
        let incoming = item("a");
        incoming.set_state(NewsState::Read);

        assert!(persisted.merge(&incoming).is_structural_change());
        assert_eq!(persisted.state(), NewsState::Read);

        let blank = item("a");
        assert!(!persisted.merge(&blank).is_updated());
        assert_eq!(persisted.state(), NewsState::Read);
    }

    #[test]
    fn test_title_change_on_seen_item_marks_updated() {
        let persisted = item("old");
        persisted.set_state(NewsState::Read);
        let incoming = item("new");

        let result = persisted.merge(&incoming);
        assert!(result.is_updated());
        assert_eq!(persisted.state(), NewsState::Updated);
        assert_eq!(persisted.title().as_deref(), Some("new"));
    }

    #[test]
    fn test_title_change_on_new_item_keeps_state() {
        let persisted = item("old");
        let incoming = item("new");
        persisted.merge(&incoming);
        assert_eq!(persisted.state(), NewsState::New);
    }

    #[test]
    fn test_attachment_merge_is_additive() {
        let persisted = item("a");
        persisted.add_attachment(Attachment::new(url("http://m.example/1.mp3")));
        persisted.add_attachment(Attachment::new(url("http://m.example/2.mp3")));

        let subset = item("a");
        subset.add_attachment(Attachment::new(url("http://m.example/1.mp3")));
        assert!(!persisted.merge(&subset).is_updated());
        assert_eq!(persisted.attachments().len(), 2);

        let superset = item("a");
        for path in ["1", "2", "3"] {
            superset.add_attachment(Attachment::new(url(&format!("http://m.example/{path}.mp3"))));
        }
        let result = persisted.merge(&superset);
        assert_eq!(result.added().len(), 1);
        let links: Vec<_> = persisted
            .attachments()
            .into_iter()
            .map(|a| a.link.to_string())
            .collect();
        assert_eq!(
            links,
            [
                "http://m.example/1.mp3",
                "http://m.example/2.mp3",
                "http://m.example/3.mp3"
            ]
        );
    }

    #[test]
    fn test_property_change_is_reported() {
        let persisted = item("a");
        persisted.set_property("lang", "en");
        let incoming = item("a");
        incoming.set_property("lang", "de");
        assert!(persisted.merge(&incoming).is_structural_change());
        assert_eq!(persisted.property("lang").as_deref(), Some("de"));
    }

    #[test]
    fn test_user_fields_survive_merge() {
        let persisted = item("a");
        persisted.set_flagged(true);
        persisted.set_rating(4);
        persisted.add_label(7);
        let incoming = item("a");
        assert!(!persisted.merge(&incoming).is_updated());
        assert!(persisted.is_flagged());
        assert_eq!(persisted.rating(), 4);
        assert!(persisted.labels().contains(&7));
    }

    #[test]
    #[should_panic(expected = "special read lock")]
    fn test_mutator_panics_under_own_special_read_lock() {
        let news = item("a");
        let _guard = news.special_read();
        news.set_title(Some("b".into()));
    }
}
