use serde::Serialize;

use super::detect::FeedType;
use super::error::FeedError;
use super::extract::detect_and_extract;
use super::item::FeedItem;
use super::query::{NamespaceRegistry, XPath};
use super::xml::{self, Diagnostics, Document, Loaded, NodeId};
use crate::util::strip_control_chars;

/// Caller-supplied cleanup applied to every string a feed exposes.
pub type Sanitizer = dyn Fn(&str) -> String + Send + Sync;

/// A link advertised by the feed itself (Atom `<link>`, or `<atom:link>`
/// embedded in RSS).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkEntry {
    pub href: String,
    pub rel: Option<String>,
}

/// A parsed syndication feed.
///
/// Construction never fails: malformed or unrecognised input produces a
/// document with no items and an error available from
/// [`primary_error`](Self::primary_error). Everything is computed once in
/// [`parse`](Self::parse) and read-only afterwards.
pub struct FeedDocument {
    tree: Option<Document>,
    namespaces: NamespaceRegistry,
    feed_type: Option<FeedType>,
    title: Option<String>,
    link: Option<String>,
    item_nodes: Vec<NodeId>,
    diagnostics: Diagnostics,
    error: Option<FeedError>,
    sanitizer: Box<Sanitizer>,
}

impl std::fmt::Debug for FeedDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedDocument")
            .field("feed_type", &self.feed_type)
            .field("title", &self.title)
            .field("link", &self.link)
            .field("items", &self.item_nodes.len())
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl FeedDocument {
    /// Parses raw feed bytes.
    ///
    /// The input is decoded from its declared charset and stripped of the
    /// control characters XML forbids before parsing. The `sanitizer`
    /// runs over the feed title and link, over everything item accessors
    /// return, and over enumerated link targets.
    ///
    /// # Examples
    ///
    /// ```
    /// use feedscope::feed::{FeedDocument, FeedType};
    ///
    /// let xml = r#"<rss version="2.0"><channel>
    ///     <title> Example </title>
    ///     <link>https://example.com/</link>
    ///     <item><title>Hello</title></item>
    /// </channel></rss>"#;
    ///
    /// let feed = FeedDocument::parse(xml, |s: &str| s.to_string());
    /// assert_eq!(feed.feed_type(), Some(FeedType::Rss));
    /// assert_eq!(feed.title(), Some("Example"));
    /// assert_eq!(feed.items().len(), 1);
    /// assert!(feed.primary_error().is_none());
    /// ```
    pub fn parse<S>(raw: impl AsRef<[u8]>, sanitizer: S) -> Self
    where
        S: Fn(&str) -> String + Send + Sync + 'static,
    {
        let Loaded {
            document,
            diagnostics,
        } = xml::load(raw.as_ref());

        let mut feed = Self {
            tree: None,
            namespaces: NamespaceRegistry::standard(),
            feed_type: None,
            title: None,
            link: None,
            item_nodes: Vec::new(),
            error: diagnostics.first().cloned().map(FeedError::MalformedXml),
            diagnostics,
            sanitizer: Box::new(sanitizer),
        };

        let Some(tree) = document else {
            return feed;
        };

        match detect_and_extract(&tree) {
            Ok(extraction) => {
                feed.feed_type = Some(extraction.feed_type);
                feed.namespaces = extraction.namespaces;
                feed.title = extraction.metadata.title.map(|t| (feed.sanitizer)(&t));
                feed.link = extraction.metadata.link.map(|l| (feed.sanitizer)(&l));
                feed.item_nodes = extraction.items;
            }
            Err(err) => {
                match &err {
                    FeedError::UnsupportedDialect => {
                        tracing::warn!(error = %err, "Document is not a recognised feed")
                    }
                    _ => tracing::error!(error = %err, "Feed extraction failed"),
                }
                // A fatal parse error, when present, stays the reported one.
                if feed.error.is_none() {
                    feed.error = Some(err);
                }
            }
        }

        feed.tree = Some(tree);
        feed
    }

    /// The detected dialect, or `None` when detection failed or never ran.
    pub fn feed_type(&self) -> Option<FeedType> {
        self.feed_type
    }

    /// Feed title, trimmed and sanitized.
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// Feed (site) link, trimmed and sanitized.
    pub fn link(&self) -> Option<&str> {
        self.link.as_deref()
    }

    /// Items/entries in document order.
    pub fn items(&self) -> Vec<FeedItem<'_>> {
        let (Some(tree), Some(feed_type)) = (&self.tree, self.feed_type) else {
            return Vec::new();
        };
        let xpath = XPath::new(tree, &self.namespaces);
        self.item_nodes
            .iter()
            .map(|&node| FeedItem::new(feed_type, node, xpath, &*self.sanitizer))
            .collect()
    }

    /// Every feed-level link with an `href`, in document order.
    ///
    /// Atom feeds report `<link>` children of the feed element. RSS feeds
    /// report every `<atom:link>` in the document, which is where they
    /// advertise `self` and hub URLs. RDF feeds have none.
    pub fn links(&self) -> Vec<LinkEntry> {
        let expr = match self.feed_type {
            Some(FeedType::Atom) => "//atom:feed/atom:link",
            Some(FeedType::Rss) => "//atom:link",
            Some(FeedType::Rdf) | None => return Vec::new(),
        };
        let Some(tree) = &self.tree else {
            return Vec::new();
        };

        let nodes = match XPath::new(tree, &self.namespaces).query(expr) {
            Ok(nodes) => nodes,
            Err(err) => {
                tracing::error!(error = %err, "Link query failed");
                return Vec::new();
            }
        };

        nodes
            .into_iter()
            .filter_map(|node| tree.element(node))
            .filter_map(|element| {
                let href = element.attribute("href")?;
                Some(LinkEntry {
                    href: (self.sanitizer)(href.trim()),
                    rel: element.attribute("rel").map(str::to_string),
                })
            })
            .collect()
    }

    /// Targets of the links whose `rel` equals `rel` exactly.
    ///
    /// `None` or an empty relation returns every link.
    pub fn links_by_relation(&self, rel: Option<&str>) -> Vec<String> {
        let wanted = rel.filter(|r| !r.is_empty());
        self.links()
            .into_iter()
            .filter(|link| wanted.is_none() || link.rel.as_deref() == wanted)
            .map(|link| link.href)
            .collect()
    }

    /// The error that kept this document from parsing cleanly, if any.
    pub fn error(&self) -> Option<&FeedError> {
        self.error.as_ref()
    }

    /// The error as display-safe text.
    ///
    /// The first fatal parse error wins over a detection error. Diagnostic
    /// messages can echo raw input, so control characters and terminal
    /// escapes are stripped before the text is returned.
    pub fn primary_error(&self) -> Option<String> {
        self.error
            .as_ref()
            .map(|err| strip_control_chars(&err.to_string()).into_owned())
    }

    /// Every fatal parse error, formatted, in the order they were raised.
    ///
    /// Unlike [`primary_error`](Self::primary_error) these are not
    /// normalized; sanitize them before writing them to a terminal.
    pub fn all_errors(&self) -> Vec<String> {
        self.diagnostics.iter().map(|d| d.to_string()).collect()
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }
}
