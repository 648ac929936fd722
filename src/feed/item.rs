//! Per-item accessors over a parsed feed.
//!
//! A [`FeedItem`] is a view onto one `<item>` or `<entry>` node. It copies
//! nothing up front; each accessor queries the shared document when called.
//! RSS 1.0 items use the RSS field mapping with the RSS 1.0 namespace
//! (`rssfake`) on the core elements.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::detect::FeedType;
use super::parser::Sanitizer;
use super::query::{ns, XPath};
use super::xml::NodeId;

const ATOM_ID: &[&str] = &["atom:id", "atom03:id"];
const ATOM_TITLE: &[&str] = &["atom:title", "atom03:title"];
const ATOM_LINK: &[&str] = &[
    "atom:link[not(@rel)]",
    "atom:link[@rel='alternate']",
    "atom03:link[not(@rel)]",
    "atom03:link[@rel='alternate']",
];
const ATOM_CONTENT: &[&str] = &["atom:content", "atom03:content"];
const ATOM_SUMMARY: &[&str] = &["atom:summary", "atom03:summary"];
const ATOM_DATES: &[&str] = &[
    "atom:published",
    "atom:updated",
    "atom03:issued",
    "atom03:modified",
    "atom03:created",
];
const ATOM_AUTHOR: &[&str] = &["atom:author/atom:name", "atom03:author/atom03:name", "dc:creator"];

/// A media file attached to an item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Enclosure {
    pub url: String,
    pub content_type: Option<String>,
    /// Size in bytes, when the feed states one.
    pub length: Option<u64>,
}

/// One item/entry of a parsed feed.
///
/// Borrows the [`FeedDocument`](super::FeedDocument) it came from; the
/// document must outlive every item taken from it.
#[derive(Clone, Copy)]
pub struct FeedItem<'d> {
    feed_type: FeedType,
    node: NodeId,
    xpath: XPath<'d>,
    sanitizer: &'d Sanitizer,
}

impl std::fmt::Debug for FeedItem<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedItem")
            .field("feed_type", &self.feed_type)
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

impl<'d> FeedItem<'d> {
    pub(crate) fn new(
        feed_type: FeedType,
        node: NodeId,
        xpath: XPath<'d>,
        sanitizer: &'d Sanitizer,
    ) -> Self {
        Self {
            feed_type,
            node,
            xpath,
            sanitizer,
        }
    }

    /// The `<item>`/`<entry>` element this view is bound to.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn feed_type(&self) -> FeedType {
        self.feed_type
    }

    /// A stable identifier for the item.
    ///
    /// Uses the feed's own id (`atom:id`, `guid`, or `rdf:about`). When the
    /// feed has none, derives a SHA-256 digest of link, title and publication
    /// time so the same item keeps the same id across fetches.
    pub fn id(&self) -> String {
        let explicit = match self.feed_type {
            FeedType::Atom => self.first_text(ATOM_ID),
            FeedType::Rss => self.first_text(&["guid"]),
            FeedType::Rdf => self
                .xpath
                .document()
                .element(self.node)
                .and_then(|e| e.attribute_ns(Some(ns::RDF), "about"))
                .and_then(non_blank),
        };
        if let Some(id) = explicit {
            return self.clean(&id);
        }

        let input = format!(
            "{}|{}|{}",
            self.link().unwrap_or_default(),
            self.title().unwrap_or_default(),
            self.published()
                .map(|p| p.timestamp().to_string())
                .unwrap_or_default()
        );
        format!("{:x}", Sha256::digest(input.as_bytes()))
    }

    pub fn title(&self) -> Option<String> {
        let title = match self.feed_type {
            FeedType::Atom => self.first_text(ATOM_TITLE),
            FeedType::Rss | FeedType::Rdf => self.first_text(&[&*self.rss("title")]),
        };
        title.map(|t| self.clean(&t))
    }

    /// The item's permalink.
    pub fn link(&self) -> Option<String> {
        let link = match self.feed_type {
            FeedType::Atom => ATOM_LINK
                .iter()
                .find_map(|expr| self.first_attribute(expr, "href")),
            FeedType::Rss => self
                .first_text(&["link"])
                .or_else(|| self.first_text(&["guid[not(@isPermaLink='false')]"])),
            FeedType::Rdf => self.first_text(&[&*self.rss("link")]),
        };
        link.map(|l| self.clean(&l))
    }

    /// Full content, falling back to the summary.
    ///
    /// Atom `type="xhtml"` content is returned as markup.
    pub fn content(&self) -> Option<String> {
        let content = match self.feed_type {
            FeedType::Atom => self.first_node(ATOM_CONTENT).and_then(|node| {
                let doc = self.xpath.document();
                let is_xhtml = doc
                    .element(node)
                    .and_then(|e| e.attribute("type"))
                    .is_some_and(|t| t.eq_ignore_ascii_case("xhtml"));
                let raw = if is_xhtml {
                    doc.inner_xml(node)
                } else {
                    doc.text_content(node)
                };
                non_blank(&raw)
            }),
            FeedType::Rss | FeedType::Rdf => self.first_text(&["content:encoded"]),
        };
        match content {
            Some(c) => Some(self.clean(&c)),
            None => self.summary(),
        }
    }

    pub fn summary(&self) -> Option<String> {
        let summary = match self.feed_type {
            FeedType::Atom => self.first_text(ATOM_SUMMARY),
            FeedType::Rss | FeedType::Rdf => self.first_text(&[&*self.rss("description")]),
        };
        summary.map(|s| self.clean(&s))
    }

    /// Publication time; Atom falls back to the update time.
    pub fn published(&self) -> Option<DateTime<Utc>> {
        let chain: &[&str] = match self.feed_type {
            FeedType::Atom => ATOM_DATES,
            FeedType::Rss => &["pubDate", "dc:date"],
            FeedType::Rdf => &["dc:date"],
        };
        chain
            .iter()
            .filter_map(|expr| self.text_of(self.first_node(&[*expr])?))
            .find_map(|raw| parse_date(&raw))
    }

    pub fn author(&self) -> Option<String> {
        let author = match self.feed_type {
            FeedType::Atom => self.first_text(ATOM_AUTHOR),
            FeedType::Rss => self.first_text(&["author", "dc:creator"]),
            FeedType::Rdf => self.first_text(&["dc:creator"]),
        };
        author.map(|a| self.clean(&a))
    }

    /// URL of the item's comment page or comment feed.
    pub fn comments_url(&self) -> Option<String> {
        let url = match self.feed_type {
            FeedType::Atom => self.first_attribute("atom:link[@rel='replies']", "href"),
            FeedType::Rss => self.first_text(&["comments"]),
            FeedType::Rdf => None,
        };
        url.map(|u| self.clean(&u))
    }

    pub fn comments_count(&self) -> Option<u32> {
        let chain: &[&str] = match self.feed_type {
            FeedType::Atom => &["thread:total", "slash:comments"],
            FeedType::Rss | FeedType::Rdf => &["slash:comments"],
        };
        self.first_text(chain)?.parse().ok()
    }

    /// Category labels in document order, without duplicates.
    pub fn categories(&self) -> Vec<String> {
        let doc = self.xpath.document();
        let mut labels: Vec<String> = Vec::new();

        let mut push = |raw: Option<String>| {
            if let Some(label) = raw.as_deref().and_then(non_blank) {
                let label = self.clean(&label);
                if !labels.contains(&label) {
                    labels.push(label);
                }
            }
        };

        match self.feed_type {
            FeedType::Atom => {
                for node in self.nodes("atom:category") {
                    let element = doc.element(node);
                    let term = element
                        .and_then(|e| e.attribute("term"))
                        .filter(|t| !t.trim().is_empty())
                        .or_else(|| element.and_then(|e| e.attribute("label")));
                    push(term.map(str::to_string));
                }
                for node in self.nodes("dc:subject") {
                    push(Some(doc.text_content(node)));
                }
            }
            FeedType::Rss | FeedType::Rdf => {
                for node in self.nodes("category|dc:subject") {
                    push(Some(doc.text_content(node)));
                }
            }
        }

        labels
    }

    /// Attached media: RSS `<enclosure>`, Atom `rel="enclosure"` links, and
    /// Media RSS `<media:content>`.
    pub fn enclosures(&self) -> Vec<Enclosure> {
        let doc = self.xpath.document();
        let (expr, url_attr, length_attr) = match self.feed_type {
            FeedType::Atom => ("atom:link[@rel='enclosure']", "href", "length"),
            FeedType::Rss | FeedType::Rdf => ("enclosure", "url", "length"),
        };

        let native = self
            .nodes(expr)
            .into_iter()
            .map(|node| (node, url_attr, length_attr));
        let media = self
            .nodes("media:content|media:group/media:content")
            .into_iter()
            .map(|node| (node, "url", "fileSize"));

        let mut out: Vec<Enclosure> = Vec::new();
        for (node, url_attr, length_attr) in native.chain(media) {
            let Some(element) = doc.element(node) else {
                continue;
            };
            let Some(url) = element.attribute(url_attr).and_then(non_blank) else {
                continue;
            };
            let url = self.clean(&url);
            if out.iter().any(|e| e.url == url) {
                continue;
            }
            out.push(Enclosure {
                url,
                content_type: element
                    .attribute("type")
                    .and_then(non_blank)
                    .map(|t| self.clean(&t)),
                length: element
                    .attribute(length_attr)
                    .and_then(|l| l.trim().parse().ok()),
            });
        }
        out
    }

    /// Core RSS element name for this item's dialect.
    fn rss(&self, local: &'static str) -> Cow<'static, str> {
        match self.feed_type {
            FeedType::Rdf => Cow::Owned(format!("rssfake:{}", local)),
            FeedType::Rss | FeedType::Atom => Cow::Borrowed(local),
        }
    }

    fn nodes(&self, expr: &str) -> Vec<NodeId> {
        match self.xpath.select(expr, self.node) {
            Ok(nodes) => nodes,
            Err(err) => {
                tracing::error!(error = %err, "Item field query failed");
                Vec::new()
            }
        }
    }

    fn first_node(&self, chain: &[&str]) -> Option<NodeId> {
        chain
            .iter()
            .find_map(|expr| match self.xpath.select_first(expr, self.node) {
                Ok(node) => node,
                Err(err) => {
                    tracing::error!(error = %err, "Item field query failed");
                    None
                }
            })
    }

    /// Trimmed text of the first node in `chain` with non-blank text.
    fn first_text(&self, chain: &[&str]) -> Option<String> {
        chain
            .iter()
            .flat_map(|expr| self.nodes(expr))
            .find_map(|node| self.text_of(node))
    }

    fn first_attribute(&self, expr: &str, name: &str) -> Option<String> {
        let doc = self.xpath.document();
        self.nodes(expr)
            .into_iter()
            .find_map(|node| doc.element(node)?.attribute(name).and_then(non_blank))
    }

    fn text_of(&self, node: NodeId) -> Option<String> {
        non_blank(&self.xpath.document().text_content(node))
    }

    fn clean(&self, value: &str) -> String {
        (self.sanitizer)(value)
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Parses RFC 3339 (Atom, Dublin Core) or RFC 2822 (RSS) timestamps.
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::FeedDocument;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn parse(xml: &str) -> FeedDocument {
        FeedDocument::parse(xml.as_bytes(), |s: &str| s.to_string())
    }

    const RSS: &str = r#"<rss version="2.0"
        xmlns:dc="http://purl.org/dc/elements/1.1/"
        xmlns:content="http://purl.org/rss/1.0/modules/content/"
        xmlns:slash="http://purl.org/rss/1.0/modules/slash/"
        xmlns:media="http://search.yahoo.com/mrss/">
      <channel>
        <title>Blog</title>
        <item>
          <title> First post </title>
          <link>https://example.com/1</link>
          <guid isPermaLink="false">post-1</guid>
          <description>Short</description>
          <content:encoded><![CDATA[<p>Long</p>]]></content:encoded>
          <pubDate>Tue, 10 Jun 2003 04:00:00 GMT</pubDate>
          <dc:creator>Jane</dc:creator>
          <comments>https://example.com/1#comments</comments>
          <slash:comments>12</slash:comments>
          <category>rust</category>
          <category>xml</category>
          <dc:subject>rust</dc:subject>
          <enclosure url="https://example.com/a.mp3" type="audio/mpeg" length="1024"/>
          <media:content url="https://example.com/v.mp4" type="video/mp4" fileSize="2048"/>
        </item>
        <item>
          <guid>https://example.com/2</guid>
          <description>Only a description</description>
        </item>
      </channel>
    </rss>"#;

    #[test]
    fn test_rss_item_fields() {
        let doc = parse(RSS);
        let items = doc.items();
        let item = &items[0];

        assert_eq!(item.id(), "post-1");
        assert_eq!(item.title().as_deref(), Some("First post"));
        assert_eq!(item.link().as_deref(), Some("https://example.com/1"));
        assert_eq!(item.content().as_deref(), Some("<p>Long</p>"));
        assert_eq!(item.summary().as_deref(), Some("Short"));
        assert_eq!(
            item.published(),
            Some(Utc.with_ymd_and_hms(2003, 6, 10, 4, 0, 0).unwrap())
        );
        assert_eq!(item.author().as_deref(), Some("Jane"));
        assert_eq!(item.comments_url().as_deref(), Some("https://example.com/1#comments"));
        assert_eq!(item.comments_count(), Some(12));
        assert_eq!(item.categories(), vec!["rust", "xml"]);
        assert_eq!(
            item.enclosures(),
            vec![
                Enclosure {
                    url: "https://example.com/a.mp3".into(),
                    content_type: Some("audio/mpeg".into()),
                    length: Some(1024),
                },
                Enclosure {
                    url: "https://example.com/v.mp4".into(),
                    content_type: Some("video/mp4".into()),
                    length: Some(2048),
                },
            ]
        );
    }

    #[test]
    fn test_rss_item_fallbacks() {
        let doc = parse(RSS);
        let item = &doc.items()[1];

        // permalink guid doubles as link
        assert_eq!(item.link().as_deref(), Some("https://example.com/2"));
        // no content:encoded, so content falls back to description
        assert_eq!(item.content().as_deref(), Some("Only a description"));
        assert_eq!(item.title(), None);
        assert_eq!(item.published(), None);
        assert!(item.categories().is_empty());
    }

    #[test]
    fn test_non_permalink_guid_is_not_a_link() {
        let doc = parse(r#"<rss><channel><item><guid isPermaLink="false">abc</guid></item></channel></rss>"#);
        assert_eq!(doc.items()[0].link(), None);
    }

    #[test]
    fn test_generated_id_is_stable() {
        let xml = r#"<rss><channel><item><title>T</title><link>https://e.com/x</link></item></channel></rss>"#;
        let first = parse(xml).items()[0].id();
        let second = parse(xml).items()[0].id();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_atom_entry_fields() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom" xmlns:thr="http://purl.org/syndication/thread/1.0">
          <entry>
            <id>urn:uuid:1</id>
            <title>Entry</title>
            <link rel="self" href="https://example.com/self"/>
            <link rel="alternate" href="https://example.com/entry"/>
            <link rel="replies" href="https://example.com/entry/comments"/>
            <link rel="enclosure" href="https://example.com/e.ogg" type="audio/ogg" length="99"/>
            <updated>2024-01-02T03:04:05Z</updated>
            <author><name>Ann</name></author>
            <category term="news"/>
            <category term="" label="Fallback"/>
            <summary>Sum</summary>
            <content type="xhtml"><div xmlns="http://www.w3.org/1999/xhtml"><p>Hi</p></div></content>
            <thr:total>3</thr:total>
          </entry>
        </feed>"#;
        let doc = parse(xml);
        let items = doc.items();
        let entry = &items[0];

        assert_eq!(entry.id(), "urn:uuid:1");
        assert_eq!(entry.title().as_deref(), Some("Entry"));
        assert_eq!(entry.link().as_deref(), Some("https://example.com/entry"));
        assert_eq!(
            entry.published(),
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap())
        );
        assert_eq!(entry.author().as_deref(), Some("Ann"));
        assert_eq!(entry.categories(), vec!["news", "Fallback"]);
        assert_eq!(entry.summary().as_deref(), Some("Sum"));
        assert_eq!(
            entry.content().as_deref(),
            Some(r#"<div xmlns="http://www.w3.org/1999/xhtml"><p>Hi</p></div>"#)
        );
        assert_eq!(
            entry.comments_url().as_deref(),
            Some("https://example.com/entry/comments")
        );
        assert_eq!(entry.comments_count(), Some(3));
        assert_eq!(entry.enclosures().len(), 1);
        assert_eq!(entry.enclosures()[0].length, Some(99));
    }

    #[test]
    fn test_atom03_entry_fields() {
        let xml = r#"<feed version="0.3" xmlns="http://purl.org/atom/ns#">
          <entry>
            <id>tag:x,2004:1</id>
            <title>Old</title>
            <link rel="alternate" type="text/html" href="https://example.com/old"/>
            <issued>2004-05-06T07:08:09+02:00</issued>
            <author><name>Bob</name></author>
            <content type="text/html" mode="escaped">&lt;b&gt;x&lt;/b&gt;</content>
          </entry>
        </feed>"#;
        let doc = parse(xml);
        let entry = &doc.items()[0];
        assert_eq!(entry.id(), "tag:x,2004:1");
        assert_eq!(entry.link().as_deref(), Some("https://example.com/old"));
        assert_eq!(
            entry.published(),
            Some(Utc.with_ymd_and_hms(2004, 5, 6, 5, 8, 9).unwrap())
        );
        assert_eq!(entry.author().as_deref(), Some("Bob"));
        assert_eq!(entry.content().as_deref(), Some("<b>x</b>"));
    }

    #[test]
    fn test_rdf_item_fields() {
        let xml = r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
                        xmlns="http://purl.org/rss/1.0/"
                        xmlns:dc="http://purl.org/dc/elements/1.1/">
          <channel rdf:about="https://example.com/"><title>C</title></channel>
          <item rdf:about="https://example.com/r1">
            <title>R1</title>
            <link>https://example.com/r1</link>
            <description>D</description>
            <dc:date>2005-01-01T00:00:00Z</dc:date>
            <dc:creator>Cy</dc:creator>
            <dc:subject>topic</dc:subject>
          </item>
        </rdf:RDF>"#;
        let doc = parse(xml);
        let item = &doc.items()[0];
        assert_eq!(item.feed_type(), FeedType::Rdf);
        assert_eq!(item.id(), "https://example.com/r1");
        assert_eq!(item.title().as_deref(), Some("R1"));
        assert_eq!(item.link().as_deref(), Some("https://example.com/r1"));
        assert_eq!(item.summary().as_deref(), Some("D"));
        assert_eq!(item.author().as_deref(), Some("Cy"));
        assert_eq!(item.categories(), vec!["topic"]);
        assert_eq!(
            item.published(),
            Some(Utc.with_ymd_and_hms(2005, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_sanitizer_applies_to_item_text() {
        let xml = r#"<rss><channel><item><title>hello</title></item></channel></rss>"#;
        let doc = FeedDocument::parse(xml.as_bytes(), |s: &str| s.to_uppercase());
        assert_eq!(doc.items()[0].title().as_deref(), Some("HELLO"));
    }

    #[test]
    fn test_parse_date_formats() {
        assert!(parse_date("2024-01-02T03:04:05+01:00").is_some());
        assert!(parse_date("Mon, 01 Jan 2024 00:00:00 +0000").is_some());
        assert!(parse_date("yesterday").is_none());
    }
}
