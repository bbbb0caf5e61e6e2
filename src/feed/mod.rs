//! RSS/Atom parsing into transient feeds.
//!
//! [`parse_feed`] turns raw feed bytes into a [`crate::model::Feed`] whose news
//! items have no ids yet. Merge it into the stored feed with
//! [`crate::model::Feed::merge`] and save the result to record a refresh.

mod parser;

pub use parser::{parse_feed, ParseError};
