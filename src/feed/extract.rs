//! Feed-level field extraction for each dialect.
//!
//! Each dialect has its own query chain for the feed title, the feed link and
//! the item nodes. Chains are tried in order and the first expression that
//! selects a node wins, even if that node turns out to be empty.

use super::detect::{detect, FeedType};
use super::error::FeedError;
use super::query::{NamespaceRegistry, QueryError, XPath};
use super::xml::{Document, NodeId};

const ATOM_TITLE: &[&str] = &["//atom:feed/atom:title", "//atom03:feed/atom03:title"];

/// Rel-less links beat `rel="alternate"`; Atom 1.0 beats Atom 0.3.
const ATOM_LINK: &[&str] = &[
    "//atom:feed/atom:link[not(@rel)]",
    "//atom:feed/atom:link[@rel='alternate']",
    "//atom03:feed/atom03:link[not(@rel)]",
    "//atom03:feed/atom03:link[@rel='alternate']",
];

const ATOM_ENTRIES: &[&str] = &["//atom:entry", "//atom03:entry"];

const RSS_TITLE: &str = "//channel/title";
const RSS_LINK: &str = "//channel/link";
const RSS_ITEMS: &str = "//channel/item";

const RDF_TITLE: &str = "//rssfake:channel/rssfake:title";
const RDF_LINK: &str = "//rssfake:channel/rssfake:link";
/// RSS 1.0 items are siblings of the channel, not children.
const RDF_ITEMS: &str = "//rssfake:item";

/// Feed-level metadata, trimmed. Blank values are `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedMetadata {
    pub title: Option<String>,
    pub link: Option<String>,
}

/// Everything detection and extraction learned about a document.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub feed_type: FeedType,
    /// Registry the item adapters must query with (RDF adds `rssfake`).
    pub namespaces: NamespaceRegistry,
    pub metadata: FeedMetadata,
    /// Item/entry nodes in document order.
    pub items: Vec<NodeId>,
}

/// Detects the dialect of `doc` and extracts its feed title, link and items.
pub fn detect_and_extract(doc: &Document) -> Result<Extraction, FeedError> {
    let standard = NamespaceRegistry::standard();
    let (feed_type, _root) = detect(&XPath::new(doc, &standard))?;

    let namespaces = match feed_type {
        FeedType::Rdf => standard.with_rss_core(),
        FeedType::Rss | FeedType::Atom => standard,
    };
    let xpath = XPath::new(doc, &namespaces);

    let (metadata, items) = match feed_type {
        FeedType::Atom => extract_atom(&xpath)?,
        FeedType::Rss => extract_rss(&xpath)?,
        FeedType::Rdf => extract_rdf(&xpath)?,
    };

    tracing::debug!(
        %feed_type,
        title = ?metadata.title,
        link = ?metadata.link,
        items = items.len(),
        "Extracted feed metadata"
    );

    Ok(Extraction {
        feed_type,
        namespaces,
        metadata,
        items,
    })
}

fn extract_atom(xpath: &XPath<'_>) -> Result<(FeedMetadata, Vec<NodeId>), QueryError> {
    let doc = xpath.document();

    let title = first_of(xpath, ATOM_TITLE)?.map(|node| doc.text_content(node));

    // Atom links carry their target in @href, never in element text.
    let link = first_of(xpath, ATOM_LINK)?
        .and_then(|node| doc.element(node))
        .and_then(|element| element.attribute("href"))
        .map(str::to_string);

    let mut items = Vec::new();
    for expr in ATOM_ENTRIES {
        items = xpath.query(expr)?;
        if !items.is_empty() {
            break;
        }
    }

    Ok((metadata(title, link), items))
}

fn extract_rss(xpath: &XPath<'_>) -> Result<(FeedMetadata, Vec<NodeId>), QueryError> {
    let doc = xpath.document();

    let title = first_of(xpath, &[RSS_TITLE])?.map(|node| doc.text_content(node));

    let link = first_of(xpath, &[RSS_LINK])?.and_then(|node| {
        let href = doc
            .element(node)
            .and_then(|element| element.attribute("href"))
            .filter(|href| !href.is_empty());
        match href {
            Some(href) => Some(href.to_string()),
            None => Some(doc.text_content(node)).filter(|text| !text.is_empty()),
        }
    });

    let items = xpath.query(RSS_ITEMS)?;
    Ok((metadata(title, link), items))
}

fn extract_rdf(xpath: &XPath<'_>) -> Result<(FeedMetadata, Vec<NodeId>), QueryError> {
    let doc = xpath.document();

    let title = first_of(xpath, &[RDF_TITLE])?.map(|node| doc.text_content(node));
    let link = first_of(xpath, &[RDF_LINK])?.map(|node| doc.text_content(node));

    let items = xpath.query(RDF_ITEMS)?;
    Ok((metadata(title, link), items))
}

/// First node selected by the first expression in `chain` that selects any.
fn first_of(xpath: &XPath<'_>, chain: &[&str]) -> Result<Option<NodeId>, QueryError> {
    for expr in chain {
        if let Some(node) = xpath.select_first(expr, NodeId::DOCUMENT)? {
            return Ok(Some(node));
        }
    }
    Ok(None)
}

fn metadata(title: Option<String>, link: Option<String>) -> FeedMetadata {
    FeedMetadata {
        title: trimmed(title),
        link: trimmed(link),
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
