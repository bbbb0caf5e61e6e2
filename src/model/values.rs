//! Small value entities owned by news items and feeds.
//!
//! [`Guid`], [`Source`] and [`Image`] are embedded in their owner's record.
//! [`Person`], [`Category`] and [`Attachment`] are persisted on their own and
//! carry an [`EntityId`].

use serde::{Deserialize, Serialize};
use url::Url;

use super::entity::EntityId;
use crate::merge::Mergeable;

/// Globally unique identifier of a feed entry as published by the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guid {
    pub value: String,
    /// Whether `value` is itself a permanent link to the entry.
    pub permalink: bool,
}

impl Guid {
    pub fn new(value: impl Into<String>, permalink: bool) -> Self {
        Self {
            value: value.into(),
            permalink,
        }
    }
}

impl Mergeable for Guid {
    fn is_identical(&self, other: &Self) -> bool {
        self.value == other.value
    }

    fn merge_from(&mut self, other: &Self) -> bool {
        let changed = self != other;
        if changed {
            self.value.clone_from(&other.value);
            self.permalink = other.permalink;
        }
        changed
    }
}

/// The channel a news item was originally published in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub name: Option<String>,
    pub link: Option<Url>,
}

impl Source {
    pub fn new(name: Option<String>, link: Option<Url>) -> Self {
        Self { name, link }
    }

    /// Copies name and link from `other`, returning whether either changed.
    pub fn merge(&mut self, other: &Source) -> bool {
        let mut updated = false;
        if self.name != other.name {
            self.name.clone_from(&other.name);
            updated = true;
        }
        if self.link != other.link {
            self.link.clone_from(&other.link);
            updated = true;
        }
        updated
    }
}

impl Mergeable for Source {
    fn is_identical(&self, other: &Self) -> bool {
        self == other
    }

    fn merge_from(&mut self, other: &Self) -> bool {
        self.merge(other)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: EntityId,
    pub name: Option<String>,
    pub uri: Option<Url>,
    pub email: Option<String>,
}

impl Person {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            name: Some(name.into()),
            uri: None,
            email: None,
        }
    }
}

impl Mergeable for Person {
    fn is_identical(&self, other: &Self) -> bool {
        self.name == other.name && self.email == other.email
    }

    fn merge_from(&mut self, other: &Self) -> bool {
        let mut updated = false;
        if self.name != other.name {
            self.name.clone_from(&other.name);
            updated = true;
        }
        if self.uri != other.uri {
            self.uri.clone_from(&other.uri);
            updated = true;
        }
        if self.email != other.email {
            self.email.clone_from(&other.email);
            updated = true;
        }
        updated
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: EntityId,
    pub name: String,
    pub domain: Option<String>,
}

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            domain: None,
        }
    }
}

impl Mergeable for Category {
    /// Categories are matched by name.
    fn is_identical(&self, other: &Self) -> bool {
        self.name == other.name
    }

    fn merge_from(&mut self, other: &Self) -> bool {
        if self.domain != other.domain {
            self.domain.clone_from(&other.domain);
            return true;
        }
        false
    }
}

/// An enclosure such as a podcast episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: EntityId,
    pub link: Url,
    pub mime_type: Option<String>,
    pub length: Option<u64>,
}

impl Attachment {
    pub fn new(link: Url) -> Self {
        Self {
            id: EntityId::new(),
            link,
            mime_type: None,
            length: None,
        }
    }
}

impl Mergeable for Attachment {
    /// Attachments are matched by link.
    fn is_identical(&self, other: &Self) -> bool {
        self.link == other.link
    }

    fn merge_from(&mut self, other: &Self) -> bool {
        let mut updated = false;
        if self.mime_type != other.mime_type {
            self.mime_type.clone_from(&other.mime_type);
            updated = true;
        }
        if self.length != other.length {
            self.length = other.length;
            updated = true;
        }
        updated
    }
}

/// Feed logo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub url: Url,
    pub title: Option<String>,
    pub link: Option<Url>,
}
