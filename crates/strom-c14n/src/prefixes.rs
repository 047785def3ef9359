#![forbid(unsafe_code)]

//! Inclusive-prefix computation for exclusive canonicalization.
//!
//! When a fragment is digested with exclusive C14N, ancestor namespace
//! declarations are dropped unless visibly utilized. The prefixes in scope
//! at the fragment's parent are therefore recorded as an
//! `InclusiveNamespaces PrefixList`, which forces them onto the fragment
//! root. The default namespace is spelled `#default`.

use std::collections::BTreeSet;
use strom_core::ns;
use strom_xml::{ElementArena, ElementId};

/// Compute the inclusive prefixes for the fragment rooted at `root`.
///
/// Collects every prefix bound in the ancestor context of `root` (walking
/// parent handles outward). With `exclude_visible`, prefixes the fragment
/// root declares itself or uses on its own name or attributes are removed,
/// since exclusive C14N emits those anyway.
pub fn inclusive_prefixes(
    arena: &ElementArena,
    root: ElementId,
    exclude_visible: bool,
) -> BTreeSet<String> {
    let mut result = BTreeSet::new();
    let Some(parent) = arena.parent(root) else {
        return result;
    };
    for prefix in arena.in_scope_namespaces(parent).into_keys() {
        result.insert(token_for_prefix(&prefix));
    }

    if exclude_visible {
        if let Some(element) = arena.get(root) {
            for decl in &element.namespaces {
                result.remove(&token_for_prefix(&decl.prefix));
            }
            result.remove(&token_for_prefix(&element.name.prefix));
            for attr in &element.attributes {
                if !attr.name.prefix.is_empty() {
                    result.remove(&attr.name.prefix);
                }
            }
        }
    }
    result
}

/// Space-joined rendering of a prefix set, as stored in `PrefixList`.
pub fn render_prefix_list<'a>(prefixes: impl IntoIterator<Item = &'a String>) -> String {
    prefixes
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split a `PrefixList` attribute value into its tokens.
pub fn parse_prefix_list(list: &str) -> Vec<String> {
    list.split_whitespace().map(str::to_owned).collect()
}

/// Map a `PrefixList` token to a namespace prefix (`#default` → "").
pub fn prefix_for_token(token: &str) -> &str {
    if token == ns::DEFAULT_PREFIX_TOKEN {
        ""
    } else {
        token
    }
}

fn token_for_prefix(prefix: &str) -> String {
    if prefix.is_empty() {
        ns::DEFAULT_PREFIX_TOKEN.to_owned()
    } else {
        prefix.to_owned()
    }
}
