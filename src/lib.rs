//! feedscope: parsing for RSS 2.0, RSS 1.0 (RDF) and Atom 0.3/1.0 feeds.
//!
//! Parsing never fails outright. [`parse`] always returns a
//! [`FeedDocument`](feed::FeedDocument); malformed or unrecognised input
//! leaves it without items and with an error describing why.

pub mod config;
pub mod feed;
pub mod util;

use feed::FeedDocument;

/// Parses `raw` with `sanitizer` applied to every string the feed exposes.
///
/// Shorthand for [`FeedDocument::parse`].
pub fn parse<S>(raw: impl AsRef<[u8]>, sanitizer: S) -> FeedDocument
where
    S: Fn(&str) -> String + Send + Sync + 'static,
{
    FeedDocument::parse(raw, sanitizer)
}
