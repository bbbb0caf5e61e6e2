use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a news item.
///
/// Items are never destroyed in memory: deletion is expressed as a transition
/// to [`NewsState::Hidden`] or [`NewsState::Deleted`] and the store decides
/// when the row is physically removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NewsState {
    New,
    Unread,
    Read,
    Updated,
    Hidden,
    Deleted,
}

impl NewsState {
    /// Number of states; used to size per-state slot arrays.
    pub const COUNT: usize = 6;

    pub const ALL: [NewsState; Self::COUNT] = [
        NewsState::New,
        NewsState::Unread,
        NewsState::Read,
        NewsState::Updated,
        NewsState::Hidden,
        NewsState::Deleted,
    ];

    /// Stable slot index for this state.
    pub fn index(self) -> usize {
        match self {
            NewsState::New => 0,
            NewsState::Unread => 1,
            NewsState::Read => 2,
            NewsState::Updated => 3,
            NewsState::Hidden => 4,
            NewsState::Deleted => 5,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Whether an item in this state is shown to the user.
    pub fn is_visible(self) -> bool {
        !matches!(self, NewsState::Hidden | NewsState::Deleted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NewsState::New => "NEW",
            NewsState::Unread => "UNREAD",
            NewsState::Read => "READ",
            NewsState::Updated => "UPDATED",
            NewsState::Hidden => "HIDDEN",
            NewsState::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for NewsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A small set of [`NewsState`] values backed by a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StateSet(u8);

impl StateSet {
    pub const fn empty() -> Self {
        StateSet(0)
    }

    pub const fn all() -> Self {
        StateSet(0b11_1111)
    }

    /// Every state except HIDDEN and DELETED.
    pub const fn visible() -> Self {
        StateSet(0b00_1111)
    }

    /// UNREAD, UPDATED and NEW.
    pub const fn unread() -> Self {
        StateSet(0b00_1011)
    }

    pub fn of(states: &[NewsState]) -> Self {
        states.iter().fold(Self::empty(), |set, s| set.with(*s))
    }

    pub fn with(self, state: NewsState) -> Self {
        StateSet(self.0 | (1 << state.index()))
    }

    pub fn contains(self, state: NewsState) -> bool {
        self.0 & (1 << state.index()) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = NewsState> {
        NewsState::ALL.into_iter().filter(move |s| self.contains(*s))
    }
}

impl FromIterator<NewsState> for StateSet {
    fn from_iter<I: IntoIterator<Item = NewsState>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), |set, s| set.with(s))
    }
}
