//! Tolerant XML tree for the catalog parsers.
//!
//! The upstream feeds drift between chains: tag casing varies (ChainId vs
//! ChainID), repeated elements sometimes appear once, optional nodes come
//! and go. This module gives the schema parsers a uniform view:
//!
//! - [`XmlNode::children_named`] normalizes 0/1/N occurrences of a child to
//!   a plain list, so parsers never special-case the single-child shape.
//! - Tag lookup is ASCII case-insensitive.
//!
//! Only malformed XML itself is an error; absent nodes are just `None` or
//! an empty list.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::FeedError;

/// One parsed element: name, accumulated text content, child elements.
/// Attributes are ignored; the catalog schemas carry data in elements only.
#[derive(Debug, Clone, Default)]
pub struct XmlNode {
    pub name: String,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    /// First child whose tag matches `name`, ignoring ASCII case.
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// All children whose tag matches `name`, ignoring ASCII case.
    ///
    /// This is the single coercion point for the upstream "one child
    /// collapses to a scalar" quirk: zero, one, or many occurrences all
    /// come back as a list.
    pub fn children_named(&self, name: &str) -> Vec<&XmlNode> {
        self.children
            .iter()
            .filter(|c| c.name.eq_ignore_ascii_case(name))
            .collect()
    }

    /// Trimmed text of the named child, `None` when absent or blank.
    pub fn text_of(&self, name: &str) -> Option<&str> {
        let t = self.child(name)?.text.trim();
        if t.is_empty() {
            None
        } else {
            Some(t)
        }
    }

    /// Walk a chain of single children, e.g. `["SubChains", "SubChain"]`.
    pub fn descend(&self, path: &[&str]) -> Option<&XmlNode> {
        let mut node = self;
        for name in path {
            node = node.child(name)?;
        }
        Some(node)
    }
}

/// Parse a document and return its root element.
pub fn parse_document(xml: &str) -> Result<XmlNode, FeedError> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                stack.push(XmlNode {
                    name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                    ..Default::default()
                });
            }
            Ok(Event::Empty(e)) => {
                let node = XmlNode {
                    name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                    ..Default::default()
                };
                attach(&mut stack, &mut root, node)?;
            }
            Ok(Event::Text(t)) => {
                if let Some(top) = stack.last_mut() {
                    let text = t
                        .unescape()
                        .map_err(|e| FeedError::Parse(format!("text unescape: {e}")))?;
                    top.text.push_str(&text);
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(top) = stack.last_mut() {
                    top.text
                        .push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Ok(Event::End(e)) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| FeedError::Parse("unexpected closing tag".into()))?;
                let end_name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if !node.name.eq_ignore_ascii_case(&end_name) {
                    return Err(FeedError::Parse(format!(
                        "mismatched closing tag: <{}> closed by </{end_name}>",
                        node.name
                    )));
                }
                attach(&mut stack, &mut root, node)?;
            }
            Ok(Event::Eof) => break,
            // Prolog, comments, processing instructions: irrelevant here.
            Ok(_) => {}
            Err(e) => return Err(FeedError::Parse(e.to_string())),
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(FeedError::Parse("unclosed element at end of document".into()));
    }
    root.ok_or_else(|| FeedError::Parse("no root element".into()))
}

fn attach(
    stack: &mut [XmlNode],
    root: &mut Option<XmlNode>,
    node: XmlNode,
) -> Result<(), FeedError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
    } else if root.is_none() {
        *root = Some(node);
    } else {
        return Err(FeedError::Parse("multiple root elements".into()));
    }
    Ok(())
}

/// Best-effort numeric coercion. Bad input nulls the field and the record
/// survives; nothing here ever raises.
pub fn coerce_f64(raw: Option<&str>) -> Option<f64> {
    let raw = raw?.trim();
    match raw.parse::<f64>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::debug!(raw, "dropping unparseable numeric field");
            None
        }
    }
}

/// Weighted-item flag as published: "1"/"true"/"y" count as set.
pub fn coerce_flag(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|s| s.trim().to_ascii_lowercase()).as_deref(),
        Some("1") | Some("true") | Some("y") | Some("yes")
    )
}
