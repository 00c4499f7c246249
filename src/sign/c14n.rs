//! Inclusive Canonical XML 1.0 (without comments) through libxml2.
//!
//! The owned [`Element`] tree locates signature targets and tracks the
//! namespaces they inherit; libxml2 produces the canonical bytes.

use std::collections::BTreeMap;

use libxml::parser::Parser;
use libxml::tree::Document;
use libxml::tree::c14n::{CanonicalizationMode, CanonicalizationOptions};
use libxml::xpath;

pub use crate::xml::tree::{Element, Node, parse};
use crate::core::FiscalError;

/// Prefix (`""` for the default namespace) to namespace URI.
pub type NamespaceScope = BTreeMap<String, String>;

/// Enveloped signatures sitting directly under the document element.
const ENVELOPED_SIGNATURE: &str =
    "/*/*[local-name()='Signature' and namespace-uri()='http://www.w3.org/2000/09/xmldsig#']";

fn c14n_error(message: String) -> FiscalError {
    FiscalError::Build(message)
}

fn options() -> CanonicalizationOptions {
    CanonicalizationOptions {
        mode: CanonicalizationMode::Canonical1_0,
        inclusive_ns_prefixes: vec![],
        with_comments: false,
    }
}

fn load(xml: &str) -> Result<Document, FiscalError> {
    Parser::default()
        .parse_string(xml)
        .map_err(|e| c14n_error(format!("XML parse error: {e:?}")))
}

fn serialize(doc: &Document) -> Result<String, FiscalError> {
    doc.canonicalize(options(), None)
        .map_err(|e| c14n_error(format!("failed to canonicalize XML: {e:?}")))
}

/// Locate the element whose `Id` (or `id`) attribute equals `id`, together
/// with the namespaces inherited from its ancestors.
pub fn find_by_id<'a>(root: &'a Element, id: &str) -> Option<(&'a Element, NamespaceScope)> {
    find_by_id_in(root, id, &NamespaceScope::new())
}

fn find_by_id_in<'a>(
    element: &'a Element,
    id: &str,
    inherited: &NamespaceScope,
) -> Option<(&'a Element, NamespaceScope)> {
    if element.get_attr("Id") == Some(id) || element.get_attr("id") == Some(id) {
        return Some((element, inherited.clone()));
    }
    let mut scope = inherited.clone();
    for (prefix, uri) in element.declared_namespaces() {
        scope.insert(prefix.to_string(), uri.to_string());
    }
    element
        .elements()
        .find_map(|child| find_by_id_in(child, id, &scope))
}

/// Canonical form of `element` as a document subset.
///
/// `inherited` holds the namespaces in scope from ancestors. Inclusive
/// C14N renders them on the apex element, so they are declared there
/// before libxml2 sees the fragment.
pub fn canonicalize(element: &Element, inherited: &NamespaceScope) -> Result<String, FiscalError> {
    let mut apex = element.clone();
    let declared: Vec<String> = apex.declared_namespaces().map(|(p, _)| p.to_string()).collect();
    for (prefix, uri) in inherited {
        if declared.contains(prefix) || (prefix.is_empty() && uri.is_empty()) {
            continue;
        }
        let name = if prefix.is_empty() {
            "xmlns".to_string()
        } else {
            format!("xmlns:{prefix}")
        };
        apex.attributes.push((name, uri.clone()));
    }
    serialize(&load(&apex.to_xml())?)
}

/// Canonical form of a whole document without its enveloped
/// `ds:Signature` (the enveloped-signature transform).
pub fn canonicalize_enveloped(xml: &str) -> Result<String, FiscalError> {
    let doc = load(xml)?;
    let ctx = xpath::Context::new(&doc)
        .map_err(|e| c14n_error(format!("XPath context error: {e:?}")))?;
    let signatures = ctx
        .evaluate(ENVELOPED_SIGNATURE)
        .map_err(|e| c14n_error(format!("XPath error: {e:?}")))?
        .get_nodes_as_vec();
    for mut node in signatures {
        node.unlink();
    }
    serialize(&doc)
}
