//! Persisted layout of every entity kind.
//!
//! A [`Record`] is a flat, serialisable snapshot of one entity: references to
//! other persisted entities are stored as ids. Records double as the
//! previous/current snapshots carried by model events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use url::Url;

use crate::container::NewsContainer;
use crate::model::{
    Attachment, BookMark, Category, EntityId, EntityKey, EntityKind, Feed, Folder, Guid, Image,
    Label, NewsBin, NewsData, NewsState, Person, SearchCondition, SearchMark, Source,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsRecord {
    pub id: i64,
    pub feed_link: Url,
    #[serde(default)]
    pub reparented: bool,
    pub title: Option<String>,
    pub link: Option<Url>,
    pub base_uri: Option<Url>,
    pub comments: Option<String>,
    pub in_reply_to: Option<String>,
    pub description: Option<String>,
    pub author_id: Option<i64>,
    pub publish_date: Option<DateTime<Utc>>,
    pub modified_date: Option<DateTime<Utc>>,
    pub receive_date: DateTime<Utc>,
    pub state: NewsState,
    pub flagged: bool,
    pub rating: i32,
    pub guid: Option<Guid>,
    pub source: Option<Source>,
    #[serde(default)]
    pub labels: BTreeSet<i64>,
    #[serde(default)]
    pub attachment_ids: Vec<i64>,
    #[serde(default)]
    pub category_ids: Vec<i64>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl NewsRecord {
    /// Snapshot of `data`. Sub-entities without an id are left out, so ids
    /// must be assigned before the snapshot is taken.
    pub fn from_data(id: i64, data: &NewsData) -> Self {
        Self {
            id,
            feed_link: data.feed_link.clone(),
            reparented: data.reparented,
            title: data.title.clone(),
            link: data.link.clone(),
            base_uri: data.base_uri.clone(),
            comments: data.comments.clone(),
            in_reply_to: data.in_reply_to.clone(),
            description: data.description.clone(),
            author_id: data.author.as_ref().and_then(|a| a.id.get()),
            publish_date: data.publish_date,
            modified_date: data.modified_date,
            receive_date: data.receive_date,
            state: data.state,
            flagged: data.flagged,
            rating: data.rating,
            guid: data.guid.clone(),
            source: data.source.clone(),
            labels: data.labels.clone(),
            attachment_ids: data.attachments.iter().filter_map(|a| a.id.get()).collect(),
            category_ids: data.categories.iter().filter_map(|c| c.id.get()).collect(),
            properties: data.properties.clone(),
        }
    }

    /// Rebuilds item data from this record and its activated sub-entities.
    pub fn into_data(
        self,
        author: Option<Person>,
        attachments: Vec<Attachment>,
        categories: Vec<Category>,
    ) -> NewsData {
        let mut data = NewsData::new(self.feed_link, self.receive_date);
        data.reparented = self.reparented;
        data.title = self.title;
        data.link = self.link;
        data.base_uri = self.base_uri;
        data.comments = self.comments;
        data.in_reply_to = self.in_reply_to;
        data.description = self.description;
        data.author = author;
        data.publish_date = self.publish_date;
        data.modified_date = self.modified_date;
        data.state = self.state;
        data.flagged = self.flagged;
        data.rating = self.rating;
        data.guid = self.guid;
        data.source = self.source;
        data.labels = self.labels;
        data.attachments = attachments;
        data.categories = categories;
        data.properties = self.properties;
        data
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedRecord {
    pub id: i64,
    pub link: Url,
    pub title: Option<String>,
    pub description: Option<String>,
    pub homepage: Option<Url>,
    pub language: Option<String>,
    pub copyright: Option<String>,
    pub image: Option<Image>,
    pub author_id: Option<i64>,
    #[serde(default)]
    pub category_ids: Vec<i64>,
    #[serde(default)]
    pub news_ids: Vec<i64>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl FeedRecord {
    pub fn from_feed(id: i64, feed: &Feed) -> Self {
        Self {
            id,
            link: feed.link.clone(),
            title: feed.title.clone(),
            description: feed.description.clone(),
            homepage: feed.homepage.clone(),
            language: feed.language.clone(),
            copyright: feed.copyright.clone(),
            image: feed.image.clone(),
            author_id: feed.author.as_ref().and_then(|a| a.id.get()),
            category_ids: feed.categories.iter().filter_map(|c| c.id.get()).collect(),
            news_ids: feed.news.iter().filter_map(|n| n.id()).collect(),
            last_modified: feed.last_modified,
        }
    }

    /// Rebuilds a feed without its news items.
    pub fn into_feed(self, author: Option<Person>, categories: Vec<Category>) -> Feed {
        let mut feed = Feed::with_id(EntityId::with(self.id), self.link);
        feed.title = self.title;
        feed.description = self.description;
        feed.homepage = self.homepage;
        feed.language = self.language;
        feed.copyright = self.copyright;
        feed.image = self.image;
        feed.author = author;
        feed.categories = categories;
        feed.last_modified = self.last_modified;
        feed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsBinRecord {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
    pub sorted: bool,
    #[serde(default)]
    pub news: BTreeMap<NewsState, Vec<i64>>,
}

impl NewsBinRecord {
    pub fn from_bin(id: i64, bin: &NewsBin) -> Self {
        let container = bin.container_snapshot();
        Self {
            id,
            name: bin.name.clone(),
            parent_id: bin.parent_id,
            sorted: container.is_sorted(),
            news: container.to_slots(),
        }
    }

    pub fn news_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.news.values().flatten().copied()
    }

    pub fn into_bin(self) -> NewsBin {
        let container = NewsContainer::from_slots(self.sorted, &self.news);
        NewsBin::with_container(EntityId::with(self.id), self.name, self.parent_id, container)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMarkRecord {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
    pub match_all_conditions: bool,
    #[serde(default)]
    pub condition_ids: Vec<i64>,
}

impl SearchMarkRecord {
    pub fn from_search_mark(id: i64, search: &SearchMark) -> Self {
        Self {
            id,
            name: search.name.clone(),
            parent_id: search.parent_id,
            match_all_conditions: search.match_all_conditions,
            condition_ids: search.conditions.iter().filter_map(|c| c.id.get()).collect(),
        }
    }

    pub fn into_search_mark(self, conditions: Vec<SearchCondition>) -> SearchMark {
        let mut search = SearchMark::with_id(
            EntityId::with(self.id),
            self.name,
            self.parent_id,
            self.match_all_conditions,
        );
        search.conditions = conditions;
        search
    }
}

/// Snapshot of any persisted entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    News(NewsRecord),
    Feed(FeedRecord),
    Attachment(Attachment),
    Category(Category),
    Person(Person),
    BookMark(BookMark),
    SearchMark(SearchMarkRecord),
    NewsBin(NewsBinRecord),
    Folder(Folder),
    Label(Label),
    SearchCondition(SearchCondition),
}

impl Record {
    pub fn kind(&self) -> EntityKind {
        match self {
            Record::News(_) => EntityKind::News,
            Record::Feed(_) => EntityKind::Feed,
            Record::Attachment(_) => EntityKind::Attachment,
            Record::Category(_) => EntityKind::Category,
            Record::Person(_) => EntityKind::Person,
            Record::BookMark(_) => EntityKind::BookMark,
            Record::SearchMark(_) => EntityKind::SearchMark,
            Record::NewsBin(_) => EntityKind::NewsBin,
            Record::Folder(_) => EntityKind::Folder,
            Record::Label(_) => EntityKind::Label,
            Record::SearchCondition(_) => EntityKind::SearchCondition,
        }
    }

    pub fn id(&self) -> Option<i64> {
        match self {
            Record::News(r) => Some(r.id),
            Record::Feed(r) => Some(r.id),
            Record::SearchMark(r) => Some(r.id),
            Record::NewsBin(r) => Some(r.id),
            Record::Attachment(r) => r.id.get(),
            Record::Category(r) => r.id.get(),
            Record::Person(r) => r.id.get(),
            Record::BookMark(r) => r.id.get(),
            Record::Folder(r) => r.id.get(),
            Record::Label(r) => r.id.get(),
            Record::SearchCondition(r) => r.id.get(),
        }
    }

    pub fn key(&self) -> Option<EntityKey> {
        self.id().map(|id| EntityKey::new(self.kind(), id))
    }

    /// Value of the indexed link column.
    pub fn link_text(&self) -> Option<String> {
        match self {
            Record::Feed(r) => Some(r.link.to_string()),
            Record::News(r) => r.link.as_ref().map(Url::to_string),
            Record::BookMark(r) => Some(r.feed_link.to_string()),
            Record::Attachment(r) => Some(r.link.to_string()),
            Record::Category(_)
            | Record::Person(_)
            | Record::SearchMark(_)
            | Record::NewsBin(_)
            | Record::Folder(_)
            | Record::Label(_)
            | Record::SearchCondition(_) => None,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        match self {
            Record::News(r) => serde_json::to_string(r),
            Record::Feed(r) => serde_json::to_string(r),
            Record::Attachment(r) => serde_json::to_string(r),
            Record::Category(r) => serde_json::to_string(r),
            Record::Person(r) => serde_json::to_string(r),
            Record::BookMark(r) => serde_json::to_string(r),
            Record::SearchMark(r) => serde_json::to_string(r),
            Record::NewsBin(r) => serde_json::to_string(r),
            Record::Folder(r) => serde_json::to_string(r),
            Record::Label(r) => serde_json::to_string(r),
            Record::SearchCondition(r) => serde_json::to_string(r),
        }
    }

    pub fn decode(kind: EntityKind, body: &str) -> Result<Self, serde_json::Error> {
        Ok(match kind {
            EntityKind::News => Record::News(serde_json::from_str(body)?),
            EntityKind::Feed => Record::Feed(serde_json::from_str(body)?),
            EntityKind::Attachment => Record::Attachment(serde_json::from_str(body)?),
            EntityKind::Category => Record::Category(serde_json::from_str(body)?),
            EntityKind::Person => Record::Person(serde_json::from_str(body)?),
            EntityKind::BookMark => Record::BookMark(serde_json::from_str(body)?),
            EntityKind::SearchMark => Record::SearchMark(serde_json::from_str(body)?),
            EntityKind::NewsBin => Record::NewsBin(serde_json::from_str(body)?),
            EntityKind::Folder => Record::Folder(serde_json::from_str(body)?),
            EntityKind::Label => Record::Label(serde_json::from_str(body)?),
            EntityKind::SearchCondition => Record::SearchCondition(serde_json::from_str(body)?),
        })
    }

    /// Ids are part of record equality even though entity value equality
    /// ignores them.
    pub fn same_snapshot(&self, other: &Record) -> bool {
        self.key() == other.key() && self == other
    }
}
