//! Entity model: news items, feeds, containers and their value types.

mod bins;
mod entity;
mod feed;
mod folder;
pub mod lock;
mod news;
mod state;
mod values;

use thiserror::Error;

use crate::container::ContainerError;

pub use bins::{NewsBin, SearchMark, SearchProvider, SearchResults};
pub use entity::{EntityId, EntityKey, EntityKind};
pub use feed::Feed;
pub use folder::{BookMark, Folder, FolderChild, Label, SearchCondition, SearchSpecifier};
pub use news::{News, NewsData};
pub use state::{NewsState, StateSet};
pub use values::{Attachment, Category, Guid, Image, Person, Source};

#[derive(Debug, Error)]
pub enum ModelError {
    /// A news item may change feeds only once.
    #[error("news {news_id:?} was already moved to another feed")]
    AlreadyReparented { news_id: Option<i64> },

    /// The operation needs an entity that has an id.
    #[error("{0} has not been saved yet")]
    Unsaved(&'static str),

    #[error(transparent)]
    Container(#[from] ContainerError),
}
