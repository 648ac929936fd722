//! Namespace-aware path queries over a loaded [`Document`].
//!
//! Supports the slice of XPath 1.0 feed extraction needs: unions, absolute
//! and relative location paths over the child (`/`) and descendant (`//`)
//! axes, qualified name tests, and attribute predicates (`[@a]`, `[@a='v']`,
//! `[not(...)]`). Prefixes in expressions are resolved through a fixed
//! [`NamespaceRegistry`], never through the document's own declarations.
//!
//! As in XPath, an unprefixed name test only matches elements that are in no
//! namespace: `channel` matches RSS 2.0's `<channel>` but not RSS 1.0's.

use thiserror::Error;

use super::xml::{Document, Element, NodeId};

/// Namespace URIs used by the syndication formats.
pub mod ns {
    pub const ATOM: &str = "http://www.w3.org/2005/Atom";
    pub const ATOM03: &str = "http://purl.org/atom/ns#";
    pub const MEDIA: &str = "http://search.yahoo.com/mrss/";
    pub const RDF: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
    pub const SLASH: &str = "http://purl.org/rss/1.0/modules/slash/";
    pub const DC: &str = "http://purl.org/dc/elements/1.1/";
    pub const CONTENT: &str = "http://purl.org/rss/1.0/modules/content/";
    pub const THREAD: &str = "http://purl.org/syndication/thread/1.0";
    /// RSS 1.0 core vocabulary, bound as `rssfake` for RDF documents only.
    pub const RSS10: &str = "http://purl.org/rss/1.0/";
}

/// Errors raised while compiling a query expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The expression used a prefix the registry does not bind.
    #[error("namespace prefix '{prefix}' is not registered (in '{expr}')")]
    UnknownPrefix { prefix: String, expr: String },

    /// The expression is outside the supported grammar.
    #[error("invalid query '{expr}' at offset {offset}: {reason}")]
    Syntax {
        expr: String,
        offset: usize,
        reason: &'static str,
    },
}

/// Prefix → namespace URI bindings available to query expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceRegistry {
    bindings: Vec<(&'static str, &'static str)>,
}

impl NamespaceRegistry {
    /// The bindings every feed document gets.
    pub fn standard() -> Self {
        Self {
            bindings: vec![
                ("atom", ns::ATOM),
                ("atom03", ns::ATOM03),
                ("media", ns::MEDIA),
                ("rdf", ns::RDF),
                ("slash", ns::SLASH),
                ("dc", ns::DC),
                ("content", ns::CONTENT),
                ("thread", ns::THREAD),
            ],
        }
    }

    /// Adds `rssfake` for the RSS 1.0 core vocabulary.
    pub fn with_rss_core(mut self) -> Self {
        if self.resolve("rssfake").is_none() {
            self.bindings.push(("rssfake", ns::RSS10));
        }
        self
    }

    pub fn resolve(&self, prefix: &str) -> Option<&'static str> {
        self.bindings
            .iter()
            .find(|(p, _)| *p == prefix)
            .map(|(_, uri)| *uri)
    }
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QualifiedName {
    namespace: Option<&'static str>,
    local: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NameTest {
    Any,
    Name(QualifiedName),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    HasAttribute(QualifiedName),
    AttributeEquals(QualifiedName, String),
    Not(Box<Predicate>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    axis: Axis,
    test: NameTest,
    predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LocationPath {
    absolute: bool,
    steps: Vec<Step>,
}

/// A read-only query view binding a document to a namespace registry.
///
/// Cheap to copy; feed extraction and every item adapter share one.
#[derive(Debug, Clone, Copy)]
pub struct XPath<'d> {
    doc: &'d Document,
    namespaces: &'d NamespaceRegistry,
}

impl<'d> XPath<'d> {
    pub fn new(doc: &'d Document, namespaces: &'d NamespaceRegistry) -> Self {
        Self { doc, namespaces }
    }

    pub fn document(&self) -> &'d Document {
        self.doc
    }

    /// Evaluates `expr` against the whole document.
    pub fn query(&self, expr: &str) -> Result<Vec<NodeId>, QueryError> {
        self.select(expr, NodeId::DOCUMENT)
    }

    /// Evaluates `expr` with `context` as the starting node for relative paths.
    ///
    /// The result holds element nodes in document order, without duplicates.
    pub fn select(&self, expr: &str, context: NodeId) -> Result<Vec<NodeId>, QueryError> {
        let paths = Compiler::new(expr, self.namespaces).compile()?;

        let mut out = Vec::new();
        for path in &paths {
            out.extend(self.eval_path(path, context));
        }
        out.sort_unstable();
        out.dedup();
        Ok(out)
    }

    pub fn select_first(&self, expr: &str, context: NodeId) -> Result<Option<NodeId>, QueryError> {
        Ok(self.select(expr, context)?.into_iter().next())
    }

    fn eval_path(&self, path: &LocationPath, context: NodeId) -> Vec<NodeId> {
        let mut current = vec![if path.absolute {
            NodeId::DOCUMENT
        } else {
            context
        }];

        for step in &path.steps {
            let mut next = Vec::new();
            for &node in &current {
                let candidates = match step.axis {
                    Axis::Child => self.doc.children(node).to_vec(),
                    Axis::Descendant => self.doc.descendants(node),
                };
                next.extend(candidates.into_iter().filter(|&id| self.matches(step, id)));
            }
            next.sort_unstable();
            next.dedup();
            current = next;
        }

        current
    }

    fn matches(&self, step: &Step, id: NodeId) -> bool {
        let Some(element) = self.doc.element(id) else {
            return false;
        };
        let name_ok = match &step.test {
            NameTest::Any => true,
            NameTest::Name(name) => {
                element.local_name == name.local && element.namespace.as_deref() == name.namespace
            }
        };
        name_ok && step.predicates.iter().all(|p| holds(p, element))
    }
}

fn holds(predicate: &Predicate, element: &Element) -> bool {
    match predicate {
        Predicate::HasAttribute(name) => element.attribute_ns(name.namespace, &name.local).is_some(),
        Predicate::AttributeEquals(name, value) => {
            element.attribute_ns(name.namespace, &name.local) == Some(value.as_str())
        }
        Predicate::Not(inner) => !holds(inner, element),
    }
}

/// Recursive-descent compiler for the supported expression grammar.
struct Compiler<'a> {
    expr: &'a str,
    bytes: &'a [u8],
    pos: usize,
    namespaces: &'a NamespaceRegistry,
}

impl<'a> Compiler<'a> {
    fn new(expr: &'a str, namespaces: &'a NamespaceRegistry) -> Self {
        Self {
            expr,
            bytes: expr.as_bytes(),
            pos: 0,
            namespaces,
        }
    }

    fn compile(mut self) -> Result<Vec<LocationPath>, QueryError> {
        let paths = self.union()?;
        self.skip_ws();
        if self.pos != self.bytes.len() {
            return Err(self.syntax("unexpected trailing input"));
        }
        Ok(paths)
    }

    fn union(&mut self) -> Result<Vec<LocationPath>, QueryError> {
        let mut paths = Vec::new();
        loop {
            self.skip_ws();
            if self.eat("(") {
                paths.extend(self.union()?);
                self.skip_ws();
                if !self.eat(")") {
                    return Err(self.syntax("expected ')'"));
                }
            } else {
                paths.push(self.path()?);
            }
            self.skip_ws();
            if !self.eat("|") {
                return Ok(paths);
            }
        }
    }

    fn path(&mut self) -> Result<LocationPath, QueryError> {
        let (absolute, mut axis) = if self.eat("//") {
            (true, Axis::Descendant)
        } else if self.eat("/") {
            (true, Axis::Child)
        } else {
            (false, Axis::Child)
        };

        let mut steps = Vec::new();
        loop {
            steps.push(self.step(axis)?);
            if self.eat("//") {
                axis = Axis::Descendant;
            } else if self.eat("/") {
                axis = Axis::Child;
            } else {
                return Ok(LocationPath { absolute, steps });
            }
        }
    }

    fn step(&mut self, axis: Axis) -> Result<Step, QueryError> {
        let test = if self.eat("*") {
            NameTest::Any
        } else {
            NameTest::Name(self.qualified_name()?)
        };

        let mut predicates = Vec::new();
        while self.eat("[") {
            self.skip_ws();
            predicates.push(self.predicate()?);
            self.skip_ws();
            if !self.eat("]") {
                return Err(self.syntax("expected ']'"));
            }
        }

        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn predicate(&mut self) -> Result<Predicate, QueryError> {
        if self.eat("not(") {
            self.skip_ws();
            let inner = self.predicate()?;
            self.skip_ws();
            if !self.eat(")") {
                return Err(self.syntax("expected ')' after not("));
            }
            return Ok(Predicate::Not(Box::new(inner)));
        }

        if !self.eat("@") {
            return Err(self.syntax("expected attribute test"));
        }
        let name = self.qualified_name()?;
        self.skip_ws();
        if !self.eat("=") {
            return Ok(Predicate::HasAttribute(name));
        }
        self.skip_ws();
        let value = self.literal()?;
        Ok(Predicate::AttributeEquals(name, value))
    }

    fn literal(&mut self) -> Result<String, QueryError> {
        let quote = match self.bytes.get(self.pos) {
            Some(&q @ (b'\'' | b'"')) => q,
            _ => return Err(self.syntax("expected string literal")),
        };
        let start = self.pos + 1;
        let len = self.bytes[start..]
            .iter()
            .position(|&b| b == quote)
            .ok_or_else(|| self.syntax("unterminated string literal"))?;
        self.pos = start + len + 1;
        Ok(self.expr[start..start + len].to_string())
    }

    /// `prefix:local` or `local`; an unprefixed name is in no namespace.
    fn qualified_name(&mut self) -> Result<QualifiedName, QueryError> {
        let first = self.ncname()?;
        if self.bytes.get(self.pos) == Some(&b':') {
            self.pos += 1;
            let local = self.ncname()?;
            let namespace =
                self.namespaces
                    .resolve(first)
                    .ok_or_else(|| QueryError::UnknownPrefix {
                        prefix: first.to_string(),
                        expr: self.expr.to_string(),
                    })?;
            return Ok(QualifiedName {
                namespace: Some(namespace),
                local: local.to_string(),
            });
        }
        Ok(QualifiedName {
            namespace: None,
            local: first.to_string(),
        })
    }

    fn ncname(&mut self) -> Result<&'a str, QueryError> {
        let start = self.pos;
        while let Some(&b) = self.bytes.get(self.pos) {
            if b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.') {
                self.pos += 1;
            } else {
                break;
            }
        }
        if self.pos == start {
            return Err(self.syntax("expected a name"));
        }
        Ok(&self.expr[start..self.pos])
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.bytes[self.pos..].starts_with(token.as_bytes()) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|b| b.is_ascii_whitespace())
        {
            self.pos += 1;
        }
    }

    fn syntax(&self, reason: &'static str) -> QueryError {
        QueryError::Syntax {
            expr: self.expr.to_string(),
            offset: self.pos,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::xml::load;

    const SAMPLE: &[u8] = br#"<root xmlns:atom="http://www.w3.org/2005/Atom" xmlns:r="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
        <channel>
            <title>One</title>
            <atom:link href="a" rel="self"/>
            <atom:link href="b"/>
            <item r:about="x1"><title>i1</title></item>
            <item><title>i2</title></item>
        </channel>
        <channel><title>Two</title></channel>
    </root>"#;

    fn names(xpath: &XPath<'_>, ids: &[NodeId]) -> Vec<String> {
        ids.iter()
            .map(|&id| xpath.document().text_content(id).trim().to_string())
            .collect()
    }

    fn with_sample<F: FnOnce(XPath<'_>)>(f: F) {
        let doc = load(SAMPLE).document.unwrap();
        let registry = NamespaceRegistry::standard();
        f(XPath::new(&doc, &registry));
    }

    #[test]
    fn test_descendant_and_child_steps() {
        with_sample(|xpath| {
            let titles = xpath.query("//channel/title").unwrap();
            assert_eq!(names(&xpath, &titles), vec!["One", "Two"]);

            let all_titles = xpath.query("//title").unwrap();
            assert_eq!(all_titles.len(), 4);

            assert!(xpath.query("/channel").unwrap().is_empty());
            assert_eq!(xpath.query("/root/channel").unwrap().len(), 2);
        });
    }

    #[test]
    fn test_prefixed_names_use_registry() {
        with_sample(|xpath| {
            let links = xpath.query("//atom:link").unwrap();
            assert_eq!(links.len(), 2);
            // unprefixed test does not match namespaced elements
            assert!(xpath.query("//link").unwrap().is_empty());
        });
    }

    #[test]
    fn test_attribute_predicates() {
        with_sample(|xpath| {
            let doc = xpath.document();
            let href = |id: NodeId| doc.element(id).unwrap().attribute("href").unwrap().to_string();

            let self_links = xpath.query("//atom:link[@rel='self']").unwrap();
            assert_eq!(self_links.iter().map(|&id| href(id)).collect::<Vec<_>>(), vec!["a"]);

            let bare = xpath.query("//atom:link[not(@rel)]").unwrap();
            assert_eq!(bare.iter().map(|&id| href(id)).collect::<Vec<_>>(), vec!["b"]);

            let with_rel = xpath.query("//atom:link[@rel]").unwrap();
            assert_eq!(with_rel.len(), 1);

            let about = xpath.query("//item[@rdf:about=\"x1\"]").unwrap();
            assert_eq!(names(&xpath, &about), vec!["i1"]);
        });
    }

    #[test]
    fn test_union_is_in_document_order_without_duplicates() {
        with_sample(|xpath| {
            let hits = xpath.query("(//item | //channel | //item)").unwrap();
            assert_eq!(hits.len(), 4);
            assert!(hits.windows(2).all(|w| w[0] < w[1]));
            let first = xpath.document().element(hits[0]).unwrap();
            assert_eq!(first.name, "channel");
        });
    }

    #[test]
    fn test_relative_to_context() {
        with_sample(|xpath| {
            let items = xpath.query("//item").unwrap();
            let title = xpath.select_first("title", items[1]).unwrap().unwrap();
            assert_eq!(xpath.document().text_content(title), "i2");
            assert!(xpath.select("atom:link", items[0]).unwrap().is_empty());
        });
    }

    #[test]
    fn test_wildcard() {
        with_sample(|xpath| {
            let children = xpath.query("/root/*").unwrap();
            assert_eq!(children.len(), 2);
        });
    }

    #[test]
    fn test_unknown_prefix() {
        with_sample(|xpath| {
            let err = xpath.query("//rssfake:item").unwrap_err();
            assert!(matches!(err, QueryError::UnknownPrefix { ref prefix, .. } if prefix == "rssfake"));
        });
    }

    #[test]
    fn test_rss_core_registration() {
        let registry = NamespaceRegistry::standard().with_rss_core();
        assert_eq!(registry.resolve("rssfake"), Some(ns::RSS10));
        assert_eq!(NamespaceRegistry::standard().resolve("rssfake"), None);
        // idempotent
        let twice = registry.clone().with_rss_core();
        assert_eq!(twice, registry);
    }

    #[test]
    fn test_syntax_errors() {
        with_sample(|xpath| {
            for bad in ["//", "//item[", "//item[@rel='x]", "(//item", "//item]", "//item[rel]"] {
                assert!(
                    matches!(xpath.query(bad), Err(QueryError::Syntax { .. })),
                    "expected syntax error for {bad}"
                );
            }
        });
    }
}
