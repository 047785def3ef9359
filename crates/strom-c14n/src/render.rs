#![forbid(unsafe_code)]

//! Canonical ordering and rendering of namespace declarations and
//! attributes.

use crate::escape;
use std::cmp::Ordering;
use strom_xml::Attribute;

/// A namespace declaration to be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsDecl {
    /// The prefix ("" for default namespace).
    pub prefix: String,
    /// The namespace URI ("" undeclares the default namespace).
    pub uri: String,
}

impl NsDecl {
    pub fn new(prefix: &str, uri: &str) -> Self {
        Self {
            prefix: prefix.to_owned(),
            uri: uri.to_owned(),
        }
    }

    /// Append ` xmlns[:prefix]="uri"`.
    pub fn render_into(&self, out: &mut Vec<u8>) {
        if self.prefix.is_empty() {
            out.extend_from_slice(b" xmlns=\"");
        } else {
            out.extend_from_slice(b" xmlns:");
            out.extend_from_slice(self.prefix.as_bytes());
            out.extend_from_slice(b"=\"");
        }
        escape::push_attr(out, &self.uri);
        out.push(b'"');
    }
}

impl Ord for NsDecl {
    fn cmp(&self, other: &Self) -> Ordering {
        // Default namespace first, then by prefix.
        match (self.prefix.is_empty(), other.prefix.is_empty()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => self.prefix.cmp(&other.prefix),
        }
    }
}

impl PartialOrd for NsDecl {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Canonical attribute comparison.
///
/// Attributes without a namespace URI come first, ordered by local name.
/// Namespaced attributes follow, ordered by namespace URI and then local
/// name. Prefixes never take part in the comparison.
pub fn compare_attributes(a: &Attribute, b: &Attribute) -> Ordering {
    match (a.name.has_namespace(), b.name.has_namespace()) {
        (false, false) => a.name.local_name.cmp(&b.name.local_name),
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        (true, true) => a
            .name
            .namespace_uri
            .cmp(&b.name.namespace_uri)
            .then_with(|| a.name.local_name.cmp(&b.name.local_name)),
    }
}

/// Indices of `attributes` in canonical order.
///
/// Attributes that compare equal (only possible in malformed input) keep
/// their document order, so the result is fully determined.
pub fn attribute_order(attributes: &[Attribute]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..attributes.len()).collect();
    order.sort_by(|&i, &j| compare_attributes(&attributes[i], &attributes[j]).then(i.cmp(&j)));
    order
}

/// Append ` qname="value"`.
pub fn render_attribute(out: &mut Vec<u8>, attribute: &Attribute) {
    out.push(b' ');
    if attribute.is_xml_attribute() && attribute.name.prefix.is_empty() {
        out.extend_from_slice(b"xml:");
    }
    out.extend_from_slice(attribute.name.qualified().as_bytes());
    out.extend_from_slice(b"=\"");
    escape::push_attr(out, &attribute.value);
    out.push(b'"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use strom_xml::QName;

    fn ns_attr(uri: &str, prefix: &str, local: &str) -> Attribute {
        Attribute::new(QName::new(uri, local, prefix), "v")
    }

    #[test]
    fn test_no_namespace_first() {
        let attrs = vec![
            ns_attr("urn:a", "a", "x"),
            Attribute::local("b", "1"),
            ns_attr("urn:a", "a", "w"),
        ];
        let order = attribute_order(&attrs);
        let names: Vec<String> = order.iter().map(|&i| attrs[i].name.qualified()).collect();
        assert_eq!(names, vec!["b", "a:w", "a:x"]);
    }

    #[test]
    fn test_namespace_uri_before_local_name() {
        let attrs = vec![
            ns_attr("urn:z", "a", "a"),
            ns_attr("urn:b", "z", "z"),
        ];
        assert_eq!(attribute_order(&attrs), vec![1, 0]);
    }

    #[test]
    fn test_prefix_is_ignored() {
        let a = ns_attr("urn:x", "p", "n");
        let b = ns_attr("urn:x", "q", "n");
        assert_eq!(compare_attributes(&a, &b), Ordering::Equal);
    }

    #[test]
    fn test_ns_decl_order_and_render() {
        let mut decls = vec![
            NsDecl::new("b", "urn:b"),
            NsDecl::new("", "urn:d"),
            NsDecl::new("a", "urn:a"),
        ];
        decls.sort();
        let prefixes: Vec<&str> = decls.iter().map(|d| d.prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["", "a", "b"]);

        let mut out = Vec::new();
        for d in &decls {
            d.render_into(&mut out);
        }
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#" xmlns="urn:d" xmlns:a="urn:a" xmlns:b="urn:b""#
        );
    }

    fn attribute_strategy() -> impl Strategy<Value = Attribute> {
        (
            prop_oneof![Just(""), Just("urn:a"), Just("urn:b"), Just("urn:c")],
            "[a-e]{1,3}",
        )
            .prop_map(|(uri, local)| {
                let prefix = if uri.is_empty() { "" } else { "p" };
                Attribute::new(QName::new(uri, &local, prefix), "v")
            })
    }

    proptest! {
        #[test]
        fn prop_order_is_total(a in attribute_strategy(), b in attribute_strategy(), c in attribute_strategy()) {
            // Antisymmetry.
            prop_assert_eq!(compare_attributes(&a, &b), compare_attributes(&b, &a).reverse());
            // Irreflexivity of the strict part.
            prop_assert_eq!(compare_attributes(&a, &a), Ordering::Equal);
            // Transitivity.
            if compare_attributes(&a, &b) == Ordering::Less && compare_attributes(&b, &c) == Ordering::Less {
                prop_assert_eq!(compare_attributes(&a, &c), Ordering::Less);
            }
        }

        #[test]
        fn prop_sort_is_idempotent(attrs in proptest::collection::vec(attribute_strategy(), 0..8)) {
            let once: Vec<Attribute> = attribute_order(&attrs).into_iter().map(|i| attrs[i].clone()).collect();
            let twice: Vec<Attribute> = attribute_order(&once).into_iter().map(|i| once[i].clone()).collect();
            prop_assert_eq!(&once, &twice);
            for pair in once.windows(2) {
                prop_assert_ne!(compare_attributes(&pair[0], &pair[1]), Ordering::Greater);
            }
        }
    }
}
