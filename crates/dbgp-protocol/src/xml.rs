//! Defensive XML parsing into a generic node tree.
//!
//! The engine is a semi-trusted peer: its output varies with step state and
//! may be truncated or malformed. Parsing never fails loudly; problems are
//! collected as diagnostics next to an optional root.

use std::collections::BTreeMap;

use quick_xml::{
    Reader,
    events::{BytesStart, Event},
};
use serde::Serialize;

/// Nesting bound for engine documents.
const MAX_DEPTH: usize = 128;

/// One element: attributes, text leaf, and child elements grouped by tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Node {
    pub name: String,
    pub attributes: BTreeMap<String, String>,
    pub text: String,
    /// Children keyed by tag; repeated tags keep document order.
    pub children: BTreeMap<String, Vec<Node>>,
}

impl Node {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// All children with the given tag, in document order.
    #[must_use]
    pub fn children(&self, name: &str) -> &[Self] {
        self.children.get(name).map_or(&[], Vec::as_slice)
    }

    /// First child with the given tag.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Self> {
        self.children(name).first()
    }

    fn push_child(&mut self, child: Self) {
        self.children
            .entry(child.name.clone())
            .or_default()
            .push(child);
    }
}

/// Outcome of parsing one document.
#[derive(Debug, Clone, Default)]
pub struct Parsed {
    /// Root element, `None` when the document was unusable.
    pub root: Option<Node>,
    /// Everything that went wrong, in order.
    pub diagnostics: Vec<String>,
}

impl Parsed {
    fn failed(mut self, diagnostic: String) -> Self {
        self.root = None;
        self.diagnostics.push(diagnostic);
        self
    }
}

/// Parse an XML document.
///
/// Returns a `Parsed` with no root for empty, malformed, truncated, or
/// excessively nested input.
#[must_use]
pub fn parse(xml: &str) -> Parsed {
    let mut parsed = Parsed::default();
    if xml.trim().is_empty() {
        parsed.diagnostics.push("empty document".to_string());
        return parsed;
    }

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Node> = Vec::new();

    loop {
        let position = reader.buffer_position();
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                if stack.len() >= MAX_DEPTH {
                    return parsed.failed(format!("nesting deeper than {MAX_DEPTH}"));
                }
                stack.push(element(&start, &mut parsed.diagnostics));
            }
            Ok(Event::Empty(start)) => {
                let node = element(&start, &mut parsed.diagnostics);
                if let Err(diagnostic) = attach(&mut stack, &mut parsed.root, node) {
                    parsed.diagnostics.push(diagnostic);
                }
            }
            Ok(Event::End(_)) => {
                let Some(node) = stack.pop() else {
                    return parsed.failed(format!("unmatched end tag at byte {position}"));
                };
                if let Err(diagnostic) = attach(&mut stack, &mut parsed.root, node) {
                    parsed.diagnostics.push(diagnostic);
                }
            }
            Ok(Event::Text(text)) => {
                let Some(current) = stack.last_mut() else {
                    continue;
                };
                match text.unescape() {
                    Ok(text) => current.text.push_str(&text),
                    Err(e) => {
                        parsed
                            .diagnostics
                            .push(format!("bad entity at byte {position}: {e}"));
                        current.text.push_str(&String::from_utf8_lossy(&text));
                    }
                }
            }
            Ok(Event::CData(data)) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return parsed.failed(format!("malformed XML at byte {position}: {e}")),
        }
    }

    if let Some(open) = stack.last() {
        return parsed.failed(format!("document truncated inside <{}>", open.name));
    }
    if parsed.root.is_none() {
        parsed.diagnostics.push("no root element".to_string());
    }
    parsed
}

fn element(start: &BytesStart<'_>, diagnostics: &mut Vec<String>) -> Node {
    let mut node = Node::new(String::from_utf8_lossy(start.name().as_ref()));
    for attr in start.attributes() {
        match attr {
            Ok(attr) => {
                let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                let value = attr.unescape_value().map_or_else(
                    |_| String::from_utf8_lossy(&attr.value).into_owned(),
                    std::borrow::Cow::into_owned,
                );
                node.attributes.insert(key, value);
            }
            Err(e) => diagnostics.push(format!("bad attribute on <{}>: {e}", node.name)),
        }
    }
    node
}

fn attach(stack: &mut [Node], root: &mut Option<Node>, node: Node) -> Result<(), String> {
    if let Some(parent) = stack.last_mut() {
        parent.push_child(node);
        return Ok(());
    }
    if root.is_some() {
        return Err(format!("ignoring extra root element <{}>", node.name));
    }
    *root = Some(node);
    Ok(())
}
