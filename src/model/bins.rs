//! Container entities: news bins and saved searches.
//!
//! Both guard their id index with a plain mutex. Container updates are short
//! index-array edits, so readers and writers are not told apart.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use super::entity::EntityId;
use super::folder::SearchCondition;
use super::news::News;
use super::state::{NewsState, StateSet};
use super::ModelError;
use crate::container::NewsContainer;

/// A user-managed collection of news items, such as "Read later".
pub struct NewsBin {
    id: EntityId,
    pub name: String,
    pub parent_id: Option<i64>,
    container: Mutex<NewsContainer>,
}

impl NewsBin {
    pub fn new(name: impl Into<String>, parent_id: Option<i64>, sorted: bool) -> Self {
        Self::with_container(EntityId::new(), name, parent_id, NewsContainer::new(sorted))
    }

    pub fn with_container(
        id: EntityId,
        name: impl Into<String>,
        parent_id: Option<i64>,
        container: NewsContainer,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            parent_id,
            container: Mutex::new(container),
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id.get()
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.id
    }

    fn container(&self) -> MutexGuard<'_, NewsContainer> {
        self.container.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Indexes a saved news item under its current state.
    pub fn add_news(&self, news: &News) -> Result<(), ModelError> {
        let id = news.id().ok_or(ModelError::Unsaved("news"))?;
        let state = news.state();
        self.container().add_news(id, state)?;
        Ok(())
    }

    pub fn remove_news(&self, id: i64) -> bool {
        self.container().remove_news(id)
    }

    pub fn update_state(&self, id: i64, state: NewsState) -> bool {
        self.container().update_state(id, state)
    }

    pub fn contains_news(&self, id: i64) -> bool {
        self.container().contains_news(id)
    }

    pub fn news_count(&self, states: StateSet) -> usize {
        self.container().news_count(states)
    }

    pub fn news(&self, states: StateSet) -> Vec<i64> {
        self.container().news(states)
    }

    pub fn visible_news(&self) -> Vec<i64> {
        self.container().visible_news()
    }

    pub fn compact(&self) {
        self.container().compact();
    }

    /// Copy of the index, for persistence.
    pub fn container_snapshot(&self) -> NewsContainer {
        self.container().clone()
    }
}

impl fmt::Debug for NewsBin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewsBin")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("news", &self.container().news_count(StateSet::all()))
            .finish()
    }
}

/// The external full-text search engine that evaluates saved searches.
pub trait SearchProvider: Send + Sync {
    /// Ids and current states of the items matching `conditions`.
    fn search(&self, conditions: &[SearchCondition], match_all: bool) -> Vec<(i64, NewsState)>;
}

/// Result buckets of the most recent evaluation of a saved search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResults {
    pub read: Vec<i64>,
    /// UNREAD and UPDATED items.
    pub unread: Vec<i64>,
    pub new: Vec<i64>,
}

impl SearchResults {
    fn from_hits(hits: &[(i64, NewsState)]) -> Self {
        let mut results = Self::default();
        for (id, state) in hits {
            match state {
                NewsState::Read => results.read.push(*id),
                NewsState::Unread | NewsState::Updated => results.unread.push(*id),
                NewsState::New => results.new.push(*id),
                NewsState::Hidden | NewsState::Deleted => {}
            }
        }
        results
    }

    pub fn count(&self, states: StateSet) -> usize {
        let mut count = 0;
        if states.contains(NewsState::Read) {
            count += self.read.len();
        }
        if states.contains(NewsState::Unread) || states.contains(NewsState::Updated) {
            count += self.unread.len();
        }
        if states.contains(NewsState::New) {
            count += self.new.len();
        }
        count
    }

    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.unread.is_empty() && self.new.is_empty()
    }
}

/// A saved search whose results are computed lazily by a [`SearchProvider`].
pub struct SearchMark {
    id: EntityId,
    pub name: String,
    pub parent_id: Option<i64>,
    pub match_all_conditions: bool,
    pub conditions: Vec<SearchCondition>,
    results: Mutex<SearchResults>,
    computed: AtomicBool,
    provider: OnceLock<Arc<dyn SearchProvider>>,
}

impl SearchMark {
    pub fn new(name: impl Into<String>, parent_id: Option<i64>, match_all_conditions: bool) -> Self {
        Self::with_id(EntityId::new(), name, parent_id, match_all_conditions)
    }

    pub fn with_id(
        id: EntityId,
        name: impl Into<String>,
        parent_id: Option<i64>,
        match_all_conditions: bool,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            parent_id,
            match_all_conditions,
            conditions: Vec::new(),
            results: Mutex::new(SearchResults::default()),
            computed: AtomicBool::new(false),
            provider: OnceLock::new(),
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id.get()
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.id
    }

    fn buckets(&self) -> MutexGuard<'_, SearchResults> {
        self.results.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs the provider used to compute results on first access.
    /// Returns `false` if one was already installed.
    pub fn install_result_provider(&self, provider: Arc<dyn SearchProvider>) -> bool {
        self.provider.set(provider).is_ok()
    }

    pub fn has_result_provider(&self) -> bool {
        self.provider.get().is_some()
    }

    /// Replaces all three buckets with `hits`.
    ///
    /// Returns whether any bucket changed, so callers can skip refreshing
    /// views of an unchanged search.
    pub fn set_result(&self, hits: &[(i64, NewsState)]) -> bool {
        let fresh = SearchResults::from_hits(hits);
        let mut buckets = self.buckets();
        self.computed.store(true, Ordering::SeqCst);
        if *buckets == fresh {
            return false;
        }
        *buckets = fresh;
        true
    }

    /// Current results, computing them through the installed provider if this
    /// search has not been evaluated yet.
    pub fn results(&self) -> SearchResults {
        if !self.computed.load(Ordering::SeqCst) {
            if let Some(provider) = self.provider.get() {
                let hits = provider.search(&self.conditions, self.match_all_conditions);
                tracing::debug!(search = %self.name, hits = hits.len(), "Computed search results");
                self.set_result(&hits);
            }
        }
        self.buckets().clone()
    }

    pub fn result_count(&self, states: StateSet) -> usize {
        self.results().count(states)
    }

    /// Forces the next [`SearchMark::results`] call to re-run the search.
    pub fn invalidate(&self) {
        self.computed.store(false, Ordering::SeqCst);
    }
}

impl fmt::Debug for SearchMark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchMark")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("conditions", &self.conditions)
            .field("computed", &self.computed.load(Ordering::SeqCst))
            .finish()
    }
}
