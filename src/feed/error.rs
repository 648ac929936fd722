use thiserror::Error;

use super::query::QueryError;
use super::xml::Diagnostic;

/// Errors that stop a document from yielding feed data.
///
/// None of these abort a parse: [`FeedDocument`](super::FeedDocument) always
/// comes back, carrying the error alongside whatever could be extracted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// The input is not well-formed XML.
    #[error("{0}")]
    MalformedXml(Diagnostic),

    /// The document has no RSS, RDF or Atom root.
    #[error("Unknown/unsupported feed type")]
    UnsupportedDialect,

    /// An extraction query failed to compile.
    #[error("feed query failed: {0}")]
    Query(#[from] QueryError),
}
