//! Feed dialect detection.

use std::fmt;

use serde::Serialize;

use super::error::FeedError;
use super::query::XPath;
use super::xml::NodeId;

/// Candidate roots for every supported dialect, matched in document order.
///
/// `rdf:rdf` never matches a conforming document (XML names are case
/// sensitive) but is kept alongside `rdf:RDF` for parity with other readers.
const ROOT_QUERY: &str = "(//atom03:feed|//atom:feed|//channel|//rdf:rdf|//rdf:RDF)";

/// The syndication dialect of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedType {
    /// RSS 1.0 (RDF Site Summary).
    Rdf,
    /// RSS 0.9x / 2.0.
    Rss,
    /// Atom 0.3 or 1.0.
    Atom,
}

impl fmt::Display for FeedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FeedType::Rdf => "RDF",
            FeedType::Rss => "RSS",
            FeedType::Atom => "Atom",
        })
    }
}

/// Classifies a matched root by its tag name as written in the document.
///
/// Prefixes are part of the comparison: a root spelled `<a:feed>` or a
/// default-namespaced `<RDF>` is not recognised even though the root query
/// found it.
fn classify(tag_name: &str) -> Option<FeedType> {
    match tag_name.to_lowercase().as_str() {
        "rdf:rdf" => Some(FeedType::Rdf),
        "channel" => Some(FeedType::Rss),
        "feed" | "atom:feed" => Some(FeedType::Atom),
        _ => None,
    }
}

/// Finds the feed root and determines the document's dialect.
///
/// Returns the dialect and the node that matched.
pub fn detect(xpath: &XPath<'_>) -> Result<(FeedType, NodeId), FeedError> {
    let root = xpath
        .query(ROOT_QUERY)?
        .into_iter()
        .next()
        .ok_or(FeedError::UnsupportedDialect)?;

    let tag_name = xpath
        .document()
        .element(root)
        .map(|e| e.name.as_str())
        .unwrap_or_default();

    match classify(tag_name) {
        Some(feed_type) => {
            tracing::debug!(%feed_type, root = tag_name, "Detected feed dialect");
            Ok((feed_type, root))
        }
        None => {
            tracing::warn!(root = tag_name, "Feed root matched but its tag name is not recognised");
            Err(FeedError::UnsupportedDialect)
        }
    }
}
