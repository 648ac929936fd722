//! XML loading into a navigable, namespace-resolved tree.
//!
//! The loader drives `quick-xml`'s [`NsReader`] and builds an arena of nodes
//! indexed by [`NodeId`]. Ids are handed out in pre-order, so comparing two ids
//! compares their document order.
//!
//! Input is decoded to UTF-8 first. The charset comes from a byte order mark,
//! the UTF-16 signature of `<?`, or the `encoding` of the XML declaration, in
//! that order, and defaults to UTF-8.
//!
//! Well-formedness failures are collected as fatal [`Diagnostic`]s instead of
//! being raised. Problems that do not compromise the tree (undeclared named
//! entities, unbound prefixes) are dropped and the raw text is kept.

use std::borrow::Cow;
use std::fmt;

use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};
use quick_xml::errors::{Error as XmlError, IllFormedError};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;
use serde::Serialize;

use crate::util::{sanitize_xml_text, strip_invalid_xml_chars};

/// SEC-003: Maximum element nesting depth accepted by the loader.
const MAX_DEPTH: usize = 256;

/// Diagnostic codes, numbered after libxml2's `xmlParserErrors` so feeds
/// produce the same codes other aggregators log for them.
pub mod codes {
    pub const INTERNAL: u32 = 1;
    pub const DOCUMENT_EMPTY: u32 = 4;
    pub const DOCUMENT_END: u32 = 5;
    pub const INVALID_CHARREF: u32 = 8;
    pub const INVALID_CHAR: u32 = 9;
    pub const ENTITYREF_SEMICOL_MISSING: u32 = 23;
    pub const UNSUPPORTED_ENCODING: u32 = 32;
    pub const ATTRIBUTE_WITHOUT_VALUE: u32 = 41;
    pub const RESERVED_XML_NAME: u32 = 64;
    pub const NAME_REQUIRED: u32 = 68;
    pub const GT_REQUIRED: u32 = 73;
    pub const TAG_NAME_MISMATCH: u32 = 76;
    pub const TAG_NOT_FINISHED: u32 = 77;
}

/// Index of a node inside a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    /// The document node every tree starts with.
    pub const DOCUMENT: NodeId = NodeId(0);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Qualified name as written, e.g. `rdf:about`.
    pub name: String,
    pub local_name: String,
    /// Resolved namespace URI. Unprefixed attributes have none.
    pub namespace: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Qualified tag name as written, e.g. `rdf:RDF` or `feed`.
    pub name: String,
    pub local_name: String,
    pub namespace: Option<String>,
    pub attributes: Vec<Attribute>,
}

impl Element {
    /// Value of an unqualified attribute.
    pub fn attribute(&self, local_name: &str) -> Option<&str> {
        self.attribute_ns(None, local_name)
    }

    /// Value of the attribute with the given namespace and local name.
    pub fn attribute_ns(&self, namespace: Option<&str>, local_name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.local_name == local_name && a.namespace.as_deref() == namespace)
            .map(|a| a.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
    Document,
    Element(Element),
    /// Character data, including CDATA sections.
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub data: NodeData,
}

/// A parsed XML document.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Document {
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match self.node(id).map(|n| &n.data) {
            Some(NodeData::Element(element)) => Some(element),
            _ => None,
        }
    }

    pub fn root_element(&self) -> Option<NodeId> {
        self.children(NodeId::DOCUMENT)
            .iter()
            .copied()
            .find(|&id| self.element(id).is_some())
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// All descendants of `id` in document order, excluding `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// Concatenated character data of the node and all its descendants.
    pub fn text_content(&self, id: NodeId) -> String {
        if let Some(NodeData::Text(text)) = self.node(id).map(|n| &n.data) {
            return text.clone();
        }
        self.descendants(id)
            .into_iter()
            .filter_map(|d| match self.node(d).map(|n| &n.data) {
                Some(NodeData::Text(text)) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Re-serializes the children of `id` as markup.
    ///
    /// Used for Atom `type="xhtml"` content, whose payload is child elements
    /// rather than text.
    pub fn inner_xml(&self, id: NodeId) -> String {
        let mut out = String::new();
        for &child in self.children(id) {
            self.write_node(child, &mut out);
        }
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        match self.node(id).map(|n| &n.data) {
            Some(NodeData::Text(text)) => out.push_str(&escape(text.as_str())),
            Some(NodeData::Element(element)) => {
                out.push('<');
                out.push_str(&element.name);
                for attr in &element.attributes {
                    out.push(' ');
                    out.push_str(&attr.name);
                    out.push_str("=\"");
                    out.push_str(&escape(attr.value.as_str()));
                    out.push('"');
                }
                let children = self.children(id);
                if children.is_empty() {
                    out.push_str("/>");
                    return;
                }
                out.push('>');
                for &child in children {
                    self.write_node(child, out);
                }
                out.push_str("</");
                out.push_str(&element.name);
                out.push('>');
            }
            Some(NodeData::Document) | None => {}
        }
    }
}

/// A fatal well-formedness error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub code: u32,
    /// 1-based line of the offending input.
    pub line: usize,
    /// 1-based column (in bytes) of the offending input.
    pub column: usize,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "XML error {} at line {} (column {}): {}",
            self.code, self.line, self.column, self.message
        )
    }
}

/// Fatal diagnostics collected while loading one document, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    errors: Vec<Diagnostic>,
}

impl Diagnostics {
    /// The first fatal error, reported as the document's primary error.
    pub fn first(&self) -> Option<&Diagnostic> {
        self.errors.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.errors.iter()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Result of [`load`]: a tree when the input was well-formed, plus every
/// fatal diagnostic raised along the way.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub document: Option<Document>,
    pub diagnostics: Diagnostics,
}

/// Parses raw feed bytes into a [`Document`].
///
/// The input is decoded to UTF-8 and stripped of the control characters
/// XML 1.0 forbids before parsing. Every call owns its own diagnostic
/// collector, so concurrent loads on different threads never see each
/// other's errors.
///
/// No tree is returned when a fatal error occurred: a document that is not
/// well-formed has no reliable structure to extract feed fields from.
pub fn load(input: &[u8]) -> Loaded {
    let text = match decode(input) {
        Ok(text) => text,
        Err(diagnostic) => {
            let mut loader = Loader::new(&[]);
            loader.record(diagnostic);
            return loader.finish();
        }
    };

    let mut loader = Loader::new(text.as_bytes());
    loader.run(&text);
    loader.finish()
}

/// Decodes `input` to UTF-8 text without forbidden control characters.
fn decode(input: &[u8]) -> Result<Cow<'_, str>, Diagnostic> {
    let (encoding, bom_len) = sniff_encoding(input)?;
    let body = &input[bom_len..];

    if encoding == UTF_8 {
        return match strip_invalid_xml_chars(body) {
            Cow::Borrowed(bytes) => std::str::from_utf8(bytes)
                .map(Cow::Borrowed)
                .map_err(|e| invalid_utf8(bytes, e.valid_up_to())),
            Cow::Owned(bytes) => String::from_utf8(bytes).map(Cow::Owned).map_err(|e| {
                let valid_up_to = e.utf8_error().valid_up_to();
                invalid_utf8(e.as_bytes(), valid_up_to)
            }),
        };
    }

    tracing::debug!(encoding = encoding.name(), "Transcoding feed to UTF-8");
    match encoding.decode_without_bom_handling_and_without_replacement(body) {
        Some(text) => Ok(Cow::Owned(sanitize_xml_text(&text).into_owned())),
        None => Err(diagnostic_at(
            body,
            codes::INVALID_CHAR,
            0,
            format!("Input is not proper {}", encoding.name()),
        )),
    }
}

/// Picks the input charset and the length of its byte order mark.
fn sniff_encoding(input: &[u8]) -> Result<(&'static Encoding, usize), Diagnostic> {
    if let Some(found) = Encoding::for_bom(input) {
        return Ok(found);
    }
    // "<?" without a BOM
    if input.starts_with(b"<\0?\0") {
        return Ok((UTF_16LE, 0));
    }
    if input.starts_with(b"\0<\0?") {
        return Ok((UTF_16BE, 0));
    }

    let Some(label) = declared_encoding(input) else {
        return Ok((UTF_8, 0));
    };
    match Encoding::for_label(label) {
        Some(encoding) if encoding.is_ascii_compatible() => Ok((encoding, 0)),
        // A UTF-16 label on single-byte input contradicts the bytes; trust the bytes.
        Some(_) => Ok((UTF_8, 0)),
        None => Err(diagnostic_at(
            input,
            codes::UNSUPPORTED_ENCODING,
            0,
            format!("Unsupported encoding {}", String::from_utf8_lossy(label)),
        )),
    }
}

/// The `encoding` pseudo-attribute of a leading XML declaration.
fn declared_encoding(input: &[u8]) -> Option<&[u8]> {
    let decl = input.strip_prefix(b"<?xml")?;
    let decl = &decl[..decl.windows(2).position(|w| w == b"?>")?];
    let at = decl.windows(8).position(|w| w == b"encoding")?;
    let value = decl[at + 8..]
        .trim_ascii_start()
        .strip_prefix(b"=")?
        .trim_ascii_start();
    let (&quote, value) = value.split_first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let end = value.iter().position(|&b| b == quote)?;
    Some(&value[..end])
}

fn invalid_utf8(bytes: &[u8], valid_up_to: usize) -> Diagnostic {
    let bad: Vec<String> = bytes[valid_up_to..]
        .iter()
        .take(4)
        .map(|b| format!("0x{:02X}", b))
        .collect();
    diagnostic_at(
        bytes,
        codes::INVALID_CHAR,
        valid_up_to,
        format!(
            "Input is not proper UTF-8, indicate encoding ! Bytes: {}",
            bad.join(" ")
        ),
    )
}

struct Loader<'i> {
    input: &'i [u8],
    doc: Document,
    open: Vec<NodeId>,
    root_closed: bool,
    diagnostics: Diagnostics,
}

impl<'i> Loader<'i> {
    fn new(input: &'i [u8]) -> Self {
        Self {
            input,
            doc: Document {
                nodes: vec![Node {
                    parent: None,
                    children: Vec::new(),
                    data: NodeData::Document,
                }],
            },
            open: Vec::new(),
            root_closed: false,
            diagnostics: Diagnostics::default(),
        }
    }

    fn run(&mut self, text: &str) {
        // SEC-002: quick-xml never expands <!ENTITY> declarations, so DOCTYPE
        // payloads cannot inject content or reach the filesystem.
        let mut reader = NsReader::from_str(text);
        let mut buf = Vec::new();

        loop {
            let start = reader.buffer_position() as usize;
            let outcome = reader
                .read_resolved_event_into(&mut buf)
                .map(|(ns, event)| (namespace_uri(&ns), event));

            let position = reader.buffer_position() as usize;
            let keep_going = match outcome {
                Ok((ns, Event::Start(tag))) => self.start(&reader, ns, &tag, position, false),
                Ok((ns, Event::Empty(tag))) => self.start(&reader, ns, &tag, position, true),
                Ok((_, Event::End(_))) => {
                    self.open.pop();
                    if self.open.is_empty() {
                        self.root_closed = true;
                    }
                    true
                }
                Ok((_, Event::Text(text))) => {
                    let raw = String::from_utf8_lossy(&text).into_owned();
                    match check_references(&raw) {
                        Err(bad) if !self.open.is_empty() => {
                            self.fatal(bad.code, start + bad.offset, bad.message);
                            false
                        }
                        _ => {
                            // Undeclared named entities such as &nbsp; are not fatal; keep the raw text.
                            let value = text.unescape().map(|v| v.into_owned()).unwrap_or(raw);
                            self.text(value, position)
                        }
                    }
                }
                Ok((_, Event::CData(data))) => {
                    let value = String::from_utf8_lossy(&data).into_owned();
                    self.text(value, position)
                }
                Ok((_, Event::Decl(_))) if start != 0 => {
                    self.fatal(
                        codes::RESERVED_XML_NAME,
                        start,
                        "XML declaration allowed only at the start of the document".into(),
                    );
                    false
                }
                Ok((_, Event::Eof)) => break,
                Ok(_) => true,
                Err(err) => {
                    let offset = reader.error_position() as usize;
                    let (code, message) = describe(&err);
                    self.fatal(code, offset, message);
                    false
                }
            };

            if !keep_going {
                break;
            }
            buf.clear();
        }

        if let Some(&innermost) = self.open.last() {
            let name = self
                .doc
                .element(innermost)
                .map(|e| e.name.clone())
                .unwrap_or_default();
            self.fatal(
                codes::TAG_NOT_FINISHED,
                self.input.len(),
                format!("Premature end of data in tag {}", name),
            );
        } else if self.diagnostics.is_empty() && self.doc.root_element().is_none() {
            self.fatal(codes::DOCUMENT_EMPTY, self.input.len(), "Document is empty".into());
        }
    }

    fn start(
        &mut self,
        reader: &NsReader<&[u8]>,
        namespace: Option<String>,
        start: &BytesStart<'_>,
        position: usize,
        empty: bool,
    ) -> bool {
        if self.root_closed {
            self.fatal(
                codes::DOCUMENT_END,
                position,
                "Extra content at the end of the document".into(),
            );
            return false;
        }
        if self.open.len() >= MAX_DEPTH {
            self.fatal(
                codes::INTERNAL,
                position,
                format!("Excessive depth in document: {}", MAX_DEPTH),
            );
            return false;
        }

        let element = match build_element(reader, namespace, start) {
            Ok(element) => element,
            Err((code, message)) => {
                self.fatal(code, position, message);
                return false;
            }
        };

        let id = self.append(NodeData::Element(element));
        if empty {
            if self.open.is_empty() {
                self.root_closed = true;
            }
        } else {
            self.open.push(id);
        }
        true
    }

    fn text(&mut self, value: String, position: usize) -> bool {
        if !self.open.is_empty() {
            self.append(NodeData::Text(value));
            return true;
        }
        if value.trim().is_empty() {
            return true;
        }
        if self.root_closed {
            self.fatal(
                codes::DOCUMENT_END,
                position,
                "Extra content at the end of the document".into(),
            );
        } else {
            self.fatal(
                codes::DOCUMENT_EMPTY,
                position,
                "Start tag expected, '<' not found".into(),
            );
        }
        false
    }

    fn append(&mut self, data: NodeData) -> NodeId {
        let parent = self.open.last().copied().unwrap_or(NodeId::DOCUMENT);
        let nodes = &mut self.doc.nodes;
        let id = NodeId(nodes.len());
        nodes.push(Node {
            parent: Some(parent),
            children: Vec::new(),
            data,
        });
        nodes[parent.0].children.push(id);
        id
    }

    fn fatal(&mut self, code: u32, offset: usize, message: String) {
        let diagnostic = diagnostic_at(self.input, code, offset, message);
        self.record(diagnostic);
    }

    fn record(&mut self, diagnostic: Diagnostic) {
        tracing::warn!(%diagnostic, "Fatal XML parse error");
        self.diagnostics.errors.push(diagnostic);
    }

    fn finish(self) -> Loaded {
        let document = if self.diagnostics.is_empty() {
            Some(self.doc)
        } else {
            None
        };
        Loaded {
            document,
            diagnostics: self.diagnostics,
        }
    }
}

fn build_element(
    reader: &NsReader<&[u8]>,
    namespace: Option<String>,
    start: &BytesStart<'_>,
) -> Result<Element, (u32, String)> {
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| describe(&XmlError::InvalidAttr(e)))?;
        let (ns, local) = reader.resolve_attribute(attr.key);
        let namespace = namespace_uri(&ns);
        let local_name = String::from_utf8_lossy(local.as_ref()).into_owned();

        let raw = String::from_utf8_lossy(&attr.value).into_owned();
        check_references(&raw).map_err(|bad| (bad.code, bad.message))?;
        let value = match attr.decode_and_unescape_value(reader.decoder()) {
            Ok(value) => value.into_owned(),
            Err(_) => raw,
        };
        attributes.push(Attribute {
            name: String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
            local_name,
            namespace,
            value,
        });
    }

    Ok(Element {
        name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
        local_name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
        namespace,
        attributes,
    })
}

/// A malformed entity or character reference, at a byte offset into the
/// text it was found in.
struct BadReference {
    offset: usize,
    code: u32,
    message: String,
}

/// Checks that every `&` in raw text starts a well-formed reference.
///
/// Named entities only need to be well-formed here. Whether they are
/// declared is left to unescaping.
fn check_references(raw: &str) -> Result<(), BadReference> {
    let mut offset = 0;
    while let Some(found) = raw[offset..].find('&') {
        let at = offset + found;
        let after = &raw[at + 1..];
        let consumed = match after.strip_prefix('#') {
            Some(body) => {
                let len = check_char_ref(body).map_err(|message| BadReference {
                    offset: at,
                    code: codes::INVALID_CHARREF,
                    message,
                })?;
                len + 1
            }
            None => check_entity_ref(after).map_err(|(code, message)| BadReference {
                offset: at,
                code,
                message: message.to_string(),
            })?,
        };
        offset = at + 1 + consumed;
    }
    Ok(())
}

/// Length of `name;` at the start of `after`.
fn check_entity_ref(after: &str) -> Result<usize, (u32, &'static str)> {
    if !after.chars().next().is_some_and(is_name_start_char) {
        return Err((codes::NAME_REQUIRED, "xmlParseEntityRef: no name"));
    }
    let name_len = after
        .find(|c: char| !is_name_char(c))
        .unwrap_or(after.len());
    if !after[name_len..].starts_with(';') {
        return Err((codes::ENTITYREF_SEMICOL_MISSING, "EntityRef: expecting ';'"));
    }
    Ok(name_len + 1)
}

/// Length of `digits;` or `xdigits;` following `&#`.
fn check_char_ref(body: &str) -> Result<usize, String> {
    let (digits, radix, prefix_len) = match body.strip_prefix('x') {
        Some(hex) => (hex, 16, 1),
        None => (body, 10, 0),
    };
    let len = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    if len == 0 || !digits[len..].starts_with(';') {
        let kind = if radix == 16 { "hexadecimal" } else { "decimal" };
        return Err(format!("xmlParseCharRef: invalid {} value", kind));
    }
    let value = &digits[..len];
    match u32::from_str_radix(value, radix) {
        Ok(code_point) if is_xml_char(code_point) => Ok(prefix_len + len + 1),
        _ => Err(format!("xmlParseCharRef: invalid xmlChar value {}", value)),
    }
}

fn is_name_start_char(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == ':'
}

fn is_name_char(c: char) -> bool {
    is_name_start_char(c) || c.is_alphanumeric() || c == '-' || c == '.'
}

fn is_xml_char(code_point: u32) -> bool {
    matches!(
        code_point,
        0x9 | 0xA | 0xD | 0x20..=0xD7FF | 0xE000..=0xFFFD | 0x10000..=0x10FFFF
    )
}

fn namespace_uri(resolved: &ResolveResult<'_>) -> Option<String> {
    match resolved {
        ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).into_owned()),
        // Unbound prefixes are a namespace warning, not a well-formedness error.
        ResolveResult::Unbound | ResolveResult::Unknown(_) => None,
    }
}

fn describe(err: &XmlError) -> (u32, String) {
    let code = match err {
        XmlError::Syntax(_) => codes::GT_REQUIRED,
        XmlError::IllFormed(IllFormedError::MismatchedEndTag { .. })
        | XmlError::IllFormed(IllFormedError::UnmatchedEndTag(..)) => codes::TAG_NAME_MISMATCH,
        XmlError::InvalidAttr(_) => codes::ATTRIBUTE_WITHOUT_VALUE,
        _ => codes::INTERNAL,
    };
    (code, err.to_string())
}

fn diagnostic_at(input: &[u8], code: u32, offset: usize, message: String) -> Diagnostic {
    let (line, column) = locate(input, offset);
    Diagnostic {
        code,
        line,
        column,
        message,
    }
}

/// Converts a byte offset into a 1-based (line, column) pair.
fn locate(input: &[u8], offset: usize) -> (usize, usize) {
    let prefix = &input[..offset.min(input.len())];
    let line = prefix.iter().filter(|&&b| b == b'\n').count() + 1;
    let column = match prefix.iter().rposition(|&b| b == b'\n') {
        Some(nl) => prefix.len() - nl,
        None => prefix.len() + 1,
    };
    (line, column)
}
