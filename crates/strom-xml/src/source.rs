#![forbid(unsafe_code)]

//! Token sources.
//!
//! The pipeline never parses XML bytes on the hot path; it pulls
//! [`XmlToken`]s from a [`TokenSource`]. Two adapters cover the two input
//! modes: [`IterTokenSource`] for token-by-token streaming producers and
//! [`DocumentTokenSource`] for a document that was already parsed with
//! `roxmltree`.

use crate::event::{Attribute, Namespace, QName, StartElement, XmlToken};
use roxmltree::{Node, NodeId};
use strom_core::{ns, Error};

/// A pull-based producer of XML tokens.
pub trait TokenSource {
    /// The next token, or `None` once the producer is exhausted.
    fn next_token(&mut self) -> Result<Option<XmlToken>, Error>;
}

impl<T: TokenSource + ?Sized> TokenSource for Box<T> {
    fn next_token(&mut self) -> Result<Option<XmlToken>, Error> {
        (**self).next_token()
    }
}

/// Adapts any iterator of tokens.
pub struct IterTokenSource<I> {
    iter: I,
}

impl<I> IterTokenSource<I>
where
    I: Iterator<Item = Result<XmlToken, Error>>,
{
    pub fn new(iter: I) -> Self {
        Self { iter }
    }
}

impl<I> TokenSource for IterTokenSource<I>
where
    I: Iterator<Item = Result<XmlToken, Error>>,
{
    fn next_token(&mut self) -> Result<Option<XmlToken>, Error> {
        self.iter.next().transpose()
    }
}

/// Replays an owned token list.
pub struct VecTokenSource {
    tokens: std::vec::IntoIter<XmlToken>,
}

impl VecTokenSource {
    pub fn new(tokens: Vec<XmlToken>) -> Self {
        Self {
            tokens: tokens.into_iter(),
        }
    }
}

impl TokenSource for VecTokenSource {
    fn next_token(&mut self) -> Result<Option<XmlToken>, Error> {
        Ok(self.tokens.next())
    }
}

/// Streams the tokens of a parsed `roxmltree` document in document order.
///
/// Element and attribute prefixes are read from the start tag as written;
/// roxmltree only keeps the resolved namespace URIs.
pub struct DocumentTokenSource<'a, 'input> {
    input: &'input str,
    top: NodeId,
    next: Option<Edge<'a, 'input>>,
    open: Vec<QName>,
}

#[derive(Clone, Copy)]
enum Edge<'a, 'input> {
    Open(Node<'a, 'input>),
    Close(Node<'a, 'input>),
}

impl<'a, 'input> DocumentTokenSource<'a, 'input> {
    pub fn new(doc: &'a roxmltree::Document<'input>) -> Self {
        Self::subtree(doc.root())
    }

    /// Stream only the subtree rooted at `node`.
    pub fn subtree(node: Node<'a, 'input>) -> Self {
        Self {
            input: node.document().input_text(),
            top: node.id(),
            next: Some(Edge::Open(node)),
            open: Vec::new(),
        }
    }

    fn successor(&self, edge: Edge<'a, 'input>) -> Option<Edge<'a, 'input>> {
        match edge {
            Edge::Open(node) => Some(match node.first_child() {
                Some(child) => Edge::Open(child),
                None => Edge::Close(node),
            }),
            Edge::Close(node) if node.id() == self.top => None,
            Edge::Close(node) => match node.next_sibling() {
                Some(sibling) => Some(Edge::Open(sibling)),
                None => node.parent().map(Edge::Close),
            },
        }
    }

    fn token_for_edge(&mut self, edge: Edge<'_, '_>) -> Result<Option<XmlToken>, Error> {
        Ok(match edge {
            Edge::Open(node) if node.is_root() => Some(XmlToken::StartDocument),
            Edge::Open(node) if node.is_element() => {
                let element = start_element(self.input, node)?;
                self.open.push(element.name.clone());
                Some(XmlToken::StartElement(element))
            }
            Edge::Open(node) if node.is_text() => {
                Some(XmlToken::Characters(node.text().unwrap_or("").to_owned()))
            }
            Edge::Open(node) if node.is_comment() => {
                Some(XmlToken::Comment(node.text().unwrap_or("").to_owned()))
            }
            Edge::Open(node) => node.pi().map(|pi| XmlToken::ProcessingInstruction {
                target: pi.target.to_owned(),
                data: pi.value.unwrap_or("").to_owned(),
            }),
            Edge::Close(node) if node.is_root() => Some(XmlToken::EndDocument),
            Edge::Close(node) if node.is_element() => {
                let name = self
                    .open
                    .pop()
                    .ok_or_else(|| Error::StreamProtocol("end element without start".into()))?;
                Some(XmlToken::EndElement(name))
            }
            Edge::Close(_) => None,
        })
    }
}

impl TokenSource for DocumentTokenSource<'_, '_> {
    fn next_token(&mut self) -> Result<Option<XmlToken>, Error> {
        while let Some(edge) = self.next.take() {
            self.next = self.successor(edge);
            if let Some(token) = self.token_for_edge(edge)? {
                return Ok(Some(token));
            }
        }
        Ok(None)
    }
}

/// Parsing options for the document adapter and the bytes-to-events
/// fallback: DTDs are allowed because roxmltree only expands the
/// predefined and internal entities.
pub fn parsing_options() -> roxmltree::ParsingOptions {
    roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    }
}

/// Parse `xml` and return its full token sequence.
pub fn parse_tokens(xml: &str) -> Result<Vec<XmlToken>, Error> {
    let doc = roxmltree::Document::parse_with_options(xml, parsing_options())
        .map_err(|e| Error::XmlParse(e.to_string()))?;
    let mut source = DocumentTokenSource::new(&doc);
    let mut tokens = Vec::new();
    while let Some(token) = source.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}

/// Parse raw bytes (UTF-8) into tokens.
pub fn parse_token_bytes(data: &[u8]) -> Result<Vec<XmlToken>, Error> {
    let text = std::str::from_utf8(data)
        .map_err(|e| Error::XmlParse(format!("invalid UTF-8: {e}")))?;
    parse_tokens(text)
}

/// Qualified names of a start tag as written, namespace declarations
/// left out.
struct RawStartTag<'t> {
    name: &'t str,
    attributes: Vec<&'t str>,
}

fn is_xml_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

fn read_start_tag(input: &str, start: usize) -> Option<RawStartTag<'_>> {
    let tag = input.get(start..)?.strip_prefix('<')?;
    let name_end = tag.find(|c: char| is_xml_space(c) || c == '/' || c == '>')?;
    let (name, mut rest) = tag.split_at(name_end);
    let mut attributes = Vec::new();
    loop {
        rest = rest.trim_start_matches(is_xml_space);
        if rest.is_empty() || rest.starts_with('/') || rest.starts_with('>') {
            break;
        }
        let eq = rest.find('=')?;
        let qname = rest[..eq].trim_end_matches(is_xml_space);
        rest = rest[eq + 1..].trim_start_matches(is_xml_space);
        let quote = rest.chars().next().filter(|q| *q == '"' || *q == '\'')?;
        let close = rest[1..].find(quote)?;
        rest = &rest[close + 2..];
        if qname != "xmlns" && !qname.starts_with("xmlns:") {
            attributes.push(qname);
        }
    }
    Some(RawStartTag { name, attributes })
}

fn split_qname(qname: &str) -> (&str, &str) {
    qname.split_once(':').unwrap_or(("", qname))
}

fn prefix_uri<'a>(node: Node<'a, '_>, prefix: &str) -> &'a str {
    match prefix {
        "" => "",
        "xml" => ns::XML,
        _ => node
            .namespaces()
            .find(|n| n.name() == Some(prefix))
            .map_or("", |n| n.uri()),
    }
}

fn start_element(input: &str, node: Node<'_, '_>) -> Result<StartElement, Error> {
    let offset = node.range().start;
    let raw = read_start_tag(input, offset)
        .ok_or_else(|| Error::XmlParse(format!("unreadable start tag at byte {offset}")))?;
    let tag = node.tag_name();
    let (prefix, _) = split_qname(raw.name);
    let mut element = StartElement::new(QName::new(tag.namespace().unwrap_or(""), tag.name(), prefix));

    let mut written: Vec<Option<(&str, &str)>> = raw.attributes.iter().map(|q| Some(split_qname(q))).collect();
    for attr in node.attributes() {
        let uri = attr.namespace().unwrap_or("");
        let prefix = written
            .iter_mut()
            .find_map(|slot| {
                let (prefix, local) = (*slot)?;
                if local != attr.name() || prefix_uri(node, prefix) != uri {
                    return None;
                }
                *slot = None;
                Some(prefix)
            })
            .ok_or_else(|| Error::XmlParse(format!("attribute `{}` not found in start tag", attr.name())))?;
        element.attributes.push(Attribute {
            name: QName::new(uri, attr.name(), prefix),
            value: attr.value().to_owned(),
        });
    }

    // roxmltree reports in-scope bindings; keep only what this element adds.
    let inherited: Vec<(Option<&str>, &str)> = node
        .parent_element()
        .map(|p| p.namespaces().map(|n| (n.name(), n.uri())).collect())
        .unwrap_or_default();
    let mut has_default = false;
    for binding in node.namespaces() {
        if binding.name() == Some("xml") {
            continue;
        }
        if binding.name().is_none() {
            has_default = true;
        }
        if !inherited.contains(&(binding.name(), binding.uri())) {
            element.namespaces.push(Namespace::new(
                binding.name().unwrap_or(""),
                binding.uri(),
            ));
        }
    }
    if !has_default && inherited.iter().any(|(name, _)| name.is_none()) {
        element.namespaces.push(Namespace::new("", ""));
    }
    element.namespaces.sort();
    Ok(element)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tokens_order() {
        let tokens = parse_tokens("<a x=\"1\"><!--c--><b>t</b><?p d?></a>").unwrap();
        assert_eq!(tokens.first(), Some(&XmlToken::StartDocument));
        assert_eq!(tokens.last(), Some(&XmlToken::EndDocument));
        let kinds: Vec<&str> = tokens
            .iter()
            .map(|t| match t {
                XmlToken::StartDocument => "sd",
                XmlToken::StartElement(_) => "se",
                XmlToken::EndElement(_) => "ee",
                XmlToken::Characters(_) | XmlToken::CData(_) => "ch",
                XmlToken::Comment(_) => "co",
                XmlToken::ProcessingInstruction { .. } => "pi",
                XmlToken::EndDocument => "ed",
            })
            .collect();
        assert_eq!(kinds, vec!["sd", "se", "co", "se", "ch", "ee", "pi", "ee", "ed"]);
    }

    #[test]
    fn test_declared_namespaces_only() {
        let tokens =
            parse_tokens(r#"<r xmlns="urn:d" xmlns:a="urn:a"><a:c xmlns:b="urn:b"/><e xmlns=""/></r>"#)
                .unwrap();
        let starts: Vec<&StartElement> = tokens
            .iter()
            .filter_map(|t| match t {
                XmlToken::StartElement(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(
            starts[0].namespaces,
            vec![Namespace::new("", "urn:d"), Namespace::new("a", "urn:a")]
        );
        assert_eq!(starts[1].name.prefix, "a");
        assert_eq!(starts[1].namespaces, vec![Namespace::new("b", "urn:b")]);
        assert_eq!(starts[2].namespaces, vec![Namespace::new("", "")]);
        assert_eq!(starts[2].name.namespace_uri, "");
    }

    #[test]
    fn test_attribute_prefixes() {
        let tokens = parse_tokens(r#"<r xmlns:a="urn:a" a:x="1" xml:lang="en" y="2"/>"#).unwrap();
        let XmlToken::StartElement(root) = &tokens[1] else {
            panic!("expected start element");
        };
        let prefixes: Vec<&str> = root.attributes.iter().map(|a| a.name.prefix.as_str()).collect();
        assert!(prefixes.contains(&"a"));
        assert!(prefixes.contains(&"xml"));
        assert!(prefixes.contains(&""));
    }

    #[test]
    fn test_vec_and_iter_sources() {
        let mut source = VecTokenSource::new(vec![XmlToken::StartDocument]);
        assert_eq!(source.next_token().unwrap(), Some(XmlToken::StartDocument));
        assert_eq!(source.next_token().unwrap(), None);

        let failing = vec![
            Ok(XmlToken::StartDocument),
            Err(Error::XmlParse("truncated".into())),
        ];
        let mut source = IterTokenSource::new(failing.into_iter());
        assert!(source.next_token().unwrap().is_some());
        assert!(matches!(source.next_token(), Err(Error::XmlParse(_))));
    }

    #[test]
    fn test_malformed_xml() {
        assert!(matches!(parse_tokens("<a><b></a>"), Err(Error::XmlParse(_))));
    }

    #[test]
    fn test_prefixes_as_written_with_shared_uri() {
        let tokens = parse_tokens(r#"<r xmlns="urn:d" xmlns:p="urn:d"><x/><p:y/></r>"#).unwrap();
        let names: Vec<String> = tokens
            .iter()
            .filter_map(|t| match t {
                XmlToken::StartElement(s) => Some(s.name.qualified()),
                XmlToken::EndElement(n) => Some(format!("/{}", n.qualified())),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["r", "x", "/x", "p:y", "/p:y", "/r"]);

        let tokens = parse_tokens(r#"<r xmlns:a="urn:a" xmlns:b="urn:a" b:k="1" a:j='2'/>"#).unwrap();
        let XmlToken::StartElement(root) = &tokens[1] else {
            panic!("expected start element");
        };
        let written: Vec<String> = root.attributes.iter().map(|a| a.name.qualified()).collect();
        assert_eq!(written, vec!["b:k", "a:j"]);
    }

    #[test]
    fn test_subtree_source() {
        let doc = roxmltree::Document::parse(r#"<r><a n="1"><b/></a><c/></r>"#).unwrap();
        let a = doc.descendants().find(|n| n.has_tag_name("a")).unwrap();
        let mut source = DocumentTokenSource::subtree(a);
        let mut count = 0;
        while let Some(token) = source.next_token().unwrap() {
            assert!(matches!(token, XmlToken::StartElement(_) | XmlToken::EndElement(_)));
            count += 1;
        }
        assert_eq!(count, 4);
    }
}
