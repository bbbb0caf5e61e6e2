use serde::{Deserialize, Serialize};
use url::Url;

use super::entity::{EntityId, EntityKey, EntityKind};

/// A reference from a folder to one of its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum FolderChild {
    Folder(i64),
    BookMark(i64),
    NewsBin(i64),
    SearchMark(i64),
}

impl FolderChild {
    pub fn key(self) -> EntityKey {
        match self {
            FolderChild::Folder(id) => EntityKey::new(EntityKind::Folder, id),
            FolderChild::BookMark(id) => EntityKey::new(EntityKind::BookMark, id),
            FolderChild::NewsBin(id) => EntityKey::new(EntityKind::NewsBin, id),
            FolderChild::SearchMark(id) => EntityKey::new(EntityKind::SearchMark, id),
        }
    }
}

/// A node of the subscription tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: EntityId,
    pub name: String,
    pub parent_id: Option<i64>,
    pub children: Vec<FolderChild>,
}

impl Folder {
    pub fn new(name: impl Into<String>, parent_id: Option<i64>) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            parent_id,
            children: Vec::new(),
        }
    }

    pub fn add_child(&mut self, child: FolderChild) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    pub fn remove_child(&mut self, key: EntityKey) -> bool {
        let before = self.children.len();
        self.children.retain(|c| c.key() != key);
        self.children.len() != before
    }
}

/// A subscription entry pointing at a feed by link.
///
/// Several bookmarks may reference the same feed; the feed is deleted with the
/// last of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMark {
    pub id: EntityId,
    pub name: String,
    pub feed_link: Url,
    pub parent_id: Option<i64>,
}

impl BookMark {
    pub fn new(name: impl Into<String>, feed_link: Url, parent_id: Option<i64>) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            feed_link,
            parent_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: EntityId,
    pub name: String,
    /// RGB triple such as `"177,39,52"`.
    pub color: String,
    pub order: i32,
}

impl Label {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            color: color.into(),
            order: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSpecifier {
    Is,
    IsNot,
    Contains,
    ContainsNot,
    Before,
    After,
}

/// One clause of a saved search, evaluated by the external search engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCondition {
    pub id: EntityId,
    pub field: String,
    pub specifier: SearchSpecifier,
    pub value: String,
}

impl SearchCondition {
    pub fn new(field: impl Into<String>, specifier: SearchSpecifier, value: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            field: field.into(),
            specifier,
            value: value.into(),
        }
    }
}
