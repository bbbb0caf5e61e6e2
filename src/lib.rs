//! News item persistence and change-tracking core for an RSS aggregator.
//!
//! - [`model`]: feeds, news items and the entities around them, with the
//!   per-item reader/writer lock
//! - [`container`]: per-state index of news ids used by bins and searches
//! - [`merge`]: reconciling freshly parsed items with stored ones
//! - [`store`]: the object-store contract and its in-memory and SQLite engines
//! - [`persist`]: transactions with cascading saves and deletes
//! - [`events`]: typed model events delivered to listeners after commit
//! - [`feed`]: RSS/Atom parsing into transient feeds

pub mod config;
pub mod container;
pub mod events;
pub mod feed;
pub mod merge;
pub mod model;
pub mod persist;
pub mod store;
