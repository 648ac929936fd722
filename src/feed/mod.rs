//! Dialect-aware feed parsing.
//!
//! Raw bytes go through four stages:
//!
//! - **Loading** ([`xml`]): byte cleanup and a namespace-resolved DOM, with
//!   every fatal error recorded as a [`Diagnostic`]
//! - **Querying** ([`query`]): a small XPath subset over that DOM, with a
//!   fixed prefix registry
//! - **Detection and extraction** ([`detect`], [`extract`]): RSS 2.0, RSS 1.0
//!   (RDF) or Atom, and the feed title, link and item nodes for that dialect
//! - **Access** ([`parser`], [`item`]): the [`FeedDocument`] facade and
//!   per-item [`FeedItem`] views
//!
//! # Example
//!
//! ```
//! use feedscope::feed::FeedDocument;
//!
//! let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom">
//!   <title>Example</title>
//!   <link rel="self" href="https://example.com/atom.xml"/>
//!   <entry><title>First</title></entry>
//! </feed>"#;
//!
//! let feed = FeedDocument::parse(xml, |s: &str| s.to_string());
//! assert_eq!(feed.title(), Some("Example"));
//! assert_eq!(feed.links_by_relation(Some("self")), vec!["https://example.com/atom.xml"]);
//! assert_eq!(feed.items()[0].title().as_deref(), Some("First"));
//! ```

pub mod detect;
mod error;
pub mod extract;
mod item;
mod parser;
pub mod query;
pub mod xml;

pub use detect::FeedType;
pub use error::FeedError;
pub use extract::{detect_and_extract, Extraction, FeedMetadata};
pub use item::{Enclosure, FeedItem};
pub use parser::{FeedDocument, LinkEntry, Sanitizer};
pub use query::{NamespaceRegistry, QueryError, XPath};
pub use xml::{Diagnostic, Diagnostics, Document, NodeId};
