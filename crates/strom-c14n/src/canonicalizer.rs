#![forbid(unsafe_code)]

//! Streaming canonicalizer.
//!
//! Consumes security events one at a time and writes canonical bytes. The
//! first start element seen opens the canonicalized region; when it is not
//! the document element, its ancestor context is read from the arena so
//! that namespace declarations and `xml:*` attributes render exactly as
//! for a document subset.

use crate::prefixes::prefix_for_token;
use crate::render::{attribute_order, render_attribute, NsDecl};
use crate::{escape, C14nMode};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use strom_core::{ns, Error};
use strom_xml::{Attribute, ElementArena, ElementId, QName, SecEvent};

type Bindings = BTreeMap<String, String>;

#[derive(Debug)]
struct Frame {
    /// Bindings in scope in the input.
    in_scope: Bindings,
    /// Bindings already emitted by an output ancestor.
    rendered: Bindings,
}

/// Event-driven C14N serializer.
#[derive(Debug)]
pub struct Canonicalizer {
    mode: C14nMode,
    inclusive_prefixes: BTreeSet<String>,
    stack: Vec<Frame>,
    seen_document_element: bool,
    scratch: Vec<u8>,
}

impl Canonicalizer {
    /// `inclusive_prefixes` holds `PrefixList` tokens and is only used by
    /// the exclusive modes.
    pub fn new(mode: C14nMode, inclusive_prefixes: &[String]) -> Self {
        Self {
            mode,
            inclusive_prefixes: inclusive_prefixes
                .iter()
                .map(|t| prefix_for_token(t).to_owned())
                .collect(),
            stack: Vec::new(),
            seen_document_element: false,
            scratch: Vec::with_capacity(256),
        }
    }

    pub fn mode(&self) -> C14nMode {
        self.mode
    }

    /// Whether an element is currently open in the canonicalized region.
    pub fn in_element(&self) -> bool {
        !self.stack.is_empty()
    }

    /// Canonicalize one event into `out`.
    pub fn process_event<W: Write + ?Sized>(
        &mut self,
        event: &SecEvent,
        arena: &ElementArena,
        out: &mut W,
    ) -> Result<(), Error> {
        self.scratch.clear();
        match event {
            SecEvent::StartElement(id) => self.start_element(*id, arena)?,
            SecEvent::EndElement(id) => self.end_element(*id, arena)?,
            SecEvent::Characters(text) | SecEvent::CData(text) => {
                if self.in_element() {
                    escape::push_text(&mut self.scratch, text);
                }
            }
            SecEvent::Comment(text) => {
                if self.mode.with_comments() {
                    self.document_level_node(|buf| {
                        buf.extend_from_slice(b"<!--");
                        buf.extend_from_slice(text.as_bytes());
                        buf.extend_from_slice(b"-->");
                    });
                }
            }
            SecEvent::ProcessingInstruction { target, data } => {
                self.document_level_node(|buf| {
                    buf.extend_from_slice(b"<?");
                    buf.extend_from_slice(target.as_bytes());
                    if !data.is_empty() {
                        buf.push(b' ');
                        escape::push_pi(buf, data);
                    }
                    buf.extend_from_slice(b"?>");
                });
            }
            SecEvent::StartDocument | SecEvent::EndDocument => {}
        }
        if !self.scratch.is_empty() {
            out.write_all(&self.scratch)?;
        }
        Ok(())
    }

    /// Comments and PIs outside the document element are separated from
    /// it by a line feed.
    fn document_level_node(&mut self, render: impl FnOnce(&mut Vec<u8>)) {
        let top_level = self.stack.is_empty();
        if top_level && self.seen_document_element {
            self.scratch.push(b'\n');
        }
        render(&mut self.scratch);
        if top_level && !self.seen_document_element {
            self.scratch.push(b'\n');
        }
    }

    fn start_element(&mut self, id: ElementId, arena: &ElementArena) -> Result<(), Error> {
        let element = arena
            .get(id)
            .ok_or_else(|| Error::Canonicalization("start element handle is stale".into()))?;

        let region_root = self.stack.is_empty();
        let (mut in_scope, rendered_parent) = match self.stack.last() {
            Some(frame) => (frame.in_scope.clone(), frame.rendered.clone()),
            None => (
                arena
                    .parent(id)
                    .map(|p| arena.in_scope_namespaces(p))
                    .unwrap_or_default(),
                Bindings::new(),
            ),
        };
        for decl in &element.namespaces {
            if decl.prefix == "xml" {
                continue;
            }
            if decl.uri.is_empty() {
                in_scope.remove(&decl.prefix);
            } else {
                in_scope.insert(decl.prefix.clone(), decl.uri.clone());
            }
        }

        let mut decls = if self.mode.is_exclusive() {
            self.exclusive_declarations(&element.name, &element.attributes, &in_scope, &rendered_parent)
        } else {
            inclusive_declarations(&in_scope, &rendered_parent)
        };
        decls.sort();

        let mut rendered = rendered_parent;
        for decl in &decls {
            rendered.insert(decl.prefix.clone(), decl.uri.clone());
        }

        // xml:* attributes are inherited onto the root of a document subset.
        let mut inherited = Vec::new();
        if region_root && !self.mode.is_exclusive() {
            for (local, value) in arena.inherited_xml_attributes(id) {
                if self.mode.is_c14n11() && local == "id" {
                    continue;
                }
                let present = element
                    .attributes
                    .iter()
                    .any(|a| a.is_xml_attribute() && a.name.local_name == local);
                if !present {
                    inherited.push(Attribute::new(QName::new(ns::XML, &local, "xml"), &value));
                }
            }
        }

        let buf = &mut self.scratch;
        buf.push(b'<');
        buf.extend_from_slice(element.name.qualified().as_bytes());
        for decl in &decls {
            decl.render_into(buf);
        }
        if inherited.is_empty() {
            for i in attribute_order(&element.attributes) {
                render_attribute(buf, &element.attributes[i]);
            }
        } else {
            let mut all = element.attributes.clone();
            all.extend(inherited);
            for i in attribute_order(&all) {
                render_attribute(buf, &all[i]);
            }
        }
        buf.push(b'>');

        self.seen_document_element = true;
        self.stack.push(Frame { in_scope, rendered });
        Ok(())
    }

    fn end_element(&mut self, id: ElementId, arena: &ElementArena) -> Result<(), Error> {
        let element = arena
            .get(id)
            .ok_or_else(|| Error::Canonicalization("end element handle is stale".into()))?;
        if self.stack.pop().is_none() {
            return Err(Error::Canonicalization(format!(
                "end element `{}` outside the canonicalized region",
                element.name.qualified()
            )));
        }
        self.scratch.extend_from_slice(b"</");
        self.scratch
            .extend_from_slice(element.name.qualified().as_bytes());
        self.scratch.push(b'>');
        Ok(())
    }

    fn exclusive_declarations(
        &self,
        name: &QName,
        attributes: &[Attribute],
        in_scope: &Bindings,
        rendered: &Bindings,
    ) -> Vec<NsDecl> {
        let mut utilized: BTreeSet<&str> = BTreeSet::new();
        utilized.insert(name.prefix.as_str());
        for attr in attributes {
            if !attr.name.prefix.is_empty() && !attr.is_xml_attribute() {
                utilized.insert(attr.name.prefix.as_str());
            }
        }
        for prefix in &self.inclusive_prefixes {
            utilized.insert(prefix.as_str());
        }

        let mut decls = Vec::new();
        for prefix in utilized {
            if prefix == "xml" {
                continue;
            }
            match in_scope.get(prefix) {
                Some(uri) if rendered.get(prefix) != Some(uri) => {
                    decls.push(NsDecl::new(prefix, uri));
                }
                Some(_) => {}
                None if prefix.is_empty() => {
                    if rendered.get("").is_some_and(|uri| !uri.is_empty()) {
                        decls.push(NsDecl::new("", ""));
                    }
                }
                None => {}
            }
        }
        decls
    }
}

fn inclusive_declarations(in_scope: &Bindings, rendered: &Bindings) -> Vec<NsDecl> {
    let mut decls: Vec<NsDecl> = in_scope
        .iter()
        .filter(|(prefix, uri)| rendered.get(*prefix) != Some(*uri))
        .map(|(prefix, uri)| NsDecl::new(prefix, uri))
        .collect();
    if !in_scope.contains_key("") && rendered.get("").is_some_and(|uri| !uri.is_empty()) {
        decls.push(NsDecl::new("", ""));
    }
    decls
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{canonicalize, canonicalize_subtree};

    fn c14n(xml: &str, mode: C14nMode) -> String {
        String::from_utf8(canonicalize(xml, mode, &[]).unwrap()).unwrap()
    }

    #[test]
    fn test_attribute_and_namespace_order() {
        let xml = r#"<e xmlns:b="urn:b" xmlns:a="urn:a" b:y="1" z="2" a:x="3" c="4"/>"#;
        assert_eq!(
            c14n(xml, C14nMode::Inclusive),
            r#"<e xmlns:a="urn:a" xmlns:b="urn:b" c="4" z="2" a:x="3" b:y="1"></e>"#
        );
    }

    #[test]
    fn test_redundant_declarations_dropped() {
        let xml = r#"<a xmlns="urn:d"><b xmlns="urn:d"><c xmlns=""/></b></a>"#;
        assert_eq!(
            c14n(xml, C14nMode::Inclusive),
            r#"<a xmlns="urn:d"><b><c xmlns=""></c></b></a>"#
        );
    }

    #[test]
    fn test_comments_and_pis_at_document_level() {
        let xml = "<?pi data?><!--before--><doc><!--in--></doc><!--after-->";
        assert_eq!(
            c14n(xml, C14nMode::InclusiveWithComments),
            "<?pi data?>\n<!--before-->\n<doc><!--in--></doc>\n<!--after-->"
        );
        assert_eq!(c14n(xml, C14nMode::Inclusive), "<?pi data?>\n<doc></doc>");
    }

    #[test]
    fn test_text_escaping_and_cdata() {
        let xml = "<a x=\"&quot;&#9;\">1 &lt; 2 &amp;&gt;<![CDATA[<raw>]]></a>";
        assert_eq!(
            c14n(xml, C14nMode::Inclusive),
            "<a x=\"&quot;&#x9;\">1 &lt; 2 &amp;&gt;&lt;raw&gt;</a>"
        );
    }

    #[test]
    fn test_subtree_inclusive_renders_context() {
        let xml = r#"<r xmlns="urn:d" xmlns:u="urn:u" xml:lang="en"><p Id="x"><q/></p></r>"#;
        let out = canonicalize_subtree(xml, "x", C14nMode::Inclusive, &[]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"<p xmlns="urn:d" xmlns:u="urn:u" Id="x" xml:lang="en"><q></q></p>"#
        );
    }

    #[test]
    fn test_subtree_exclusive_drops_unused() {
        let xml = r#"<r xmlns="urn:d" xmlns:u="urn:u" xml:lang="en"><u:p Id="x"><q/></u:p></r>"#;
        let out = canonicalize_subtree(xml, "x", C14nMode::Exclusive, &[]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"<u:p xmlns:u="urn:u" Id="x"><q xmlns="urn:d"></q></u:p>"#
        );
    }

    #[test]
    fn test_subtree_exclusive_with_inclusive_prefixes() {
        let xml = r#"<r xmlns="urn:d" xmlns:u="urn:u" xmlns:v="urn:v"><u:p Id="x"/></r>"#;
        let prefixes = vec!["#default".to_owned(), "v".to_owned()];
        let out = canonicalize_subtree(xml, "x", C14nMode::Exclusive, &prefixes).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"<u:p xmlns="urn:d" xmlns:u="urn:u" xmlns:v="urn:v" Id="x"></u:p>"#
        );
    }

    #[test]
    fn test_c14n11_does_not_inherit_xml_id() {
        let xml = r#"<r xml:id="top" xml:space="preserve"><p Id="x"/></r>"#;
        let v10 = canonicalize_subtree(xml, "x", C14nMode::Inclusive, &[]).unwrap();
        let v11 = canonicalize_subtree(xml, "x", C14nMode::Inclusive11, &[]).unwrap();
        assert_eq!(
            String::from_utf8(v10).unwrap(),
            r#"<p Id="x" xml:id="top" xml:space="preserve"></p>"#
        );
        assert_eq!(
            String::from_utf8(v11).unwrap(),
            r#"<p Id="x" xml:space="preserve"></p>"#
        );
    }

    #[test]
    fn test_stale_handle_is_error() {
        let mut arena = ElementArena::new();
        let id = arena.alloc(strom_xml::StartElement::new(QName::local("a")), None);
        arena.release(id);
        let mut c = Canonicalizer::new(C14nMode::Inclusive, &[]);
        let mut out = Vec::new();
        assert!(c
            .process_event(&SecEvent::StartElement(id), &arena, &mut out)
            .is_err());
    }
}
