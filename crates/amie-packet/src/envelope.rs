//! Packet envelope parser.
//!
//! Decodes packet markup into a keyed tree. Attributes become `@name` keys,
//! child elements become keys named after the element, repeated elements
//! collapse into a [`Node::List`], and text-only elements become
//! [`Node::Text`]. The document root must be the `amie` element.

use crate::error::{PacketError, PacketResult};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Name of the protocol envelope element.
pub const ENVELOPE_ELEMENT: &str = "amie";

/// Key holding text content of an element that also has children or attributes.
pub const TEXT_KEY: &str = "#text";

/// One value in the parsed tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Text content (empty for `<tag/>` and `<tag></tag>`).
    Text(String),
    /// Attributes and child elements, in document order.
    Map(Vec<(String, Node)>),
    /// Sibling elements sharing one name.
    List(Vec<Node>),
}

impl Node {
    /// Look up a key when this node is a map.
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.entries()
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, node)| node)
    }

    /// The text of a text node.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Node::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Map entries, or an empty slice for text and list nodes.
    pub fn entries(&self) -> &[(String, Node)] {
        match self {
            Node::Map(entries) => entries,
            _ => &[],
        }
    }
}

/// The content of the `amie` element: a version marker and one type-keyed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    entries: Vec<(String, Node)>,
}

impl Envelope {
    /// Parse raw payload bytes.
    ///
    /// Fails with [`PacketError::MalformedEnvelope`] when the bytes are not
    /// UTF-8 markup, the markup is not well formed, or the root element is
    /// not `amie`.
    pub fn parse(payload: &[u8]) -> PacketResult<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| PacketError::malformed(format!("payload is not UTF-8: {e}")))?;

        let (name, node) = parse_document(text)?;
        if name != ENVELOPE_ELEMENT {
            return Err(PacketError::malformed(format!(
                "amie element not found (root is <{name}>)"
            )));
        }

        match node {
            Node::Map(entries) => Ok(Self { entries }),
            _ => Err(PacketError::malformed("amie element is empty")),
        }
    }

    /// Top-level keys in document order.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// Look up a top-level key.
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.entries
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, node)| node)
    }
}

struct Frame {
    name: String,
    entries: Vec<(String, Node)>,
    text: String,
}

impl Frame {
    fn into_node(self) -> (String, Node) {
        if self.entries.is_empty() {
            return (self.name, Node::Text(self.text));
        }
        let mut entries = self.entries;
        if !self.text.trim().is_empty() {
            entries.push((TEXT_KEY.to_string(), Node::Text(self.text)));
        }
        (self.name, Node::Map(entries))
    }
}

fn parse_document(text: &str) -> PacketResult<(String, Node)> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<(String, Node)> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| PacketError::malformed(e.to_string()))?;

        match event {
            Event::Start(start) => {
                if stack.is_empty() && root.is_some() {
                    return Err(PacketError::malformed("more than one root element"));
                }
                stack.push(Frame {
                    name: element_name(&start),
                    entries: attribute_entries(&start)?,
                    text: String::new(),
                });
            }
            Event::Empty(start) => {
                let entries = attribute_entries(&start)?;
                let node = if entries.is_empty() {
                    Node::Text(String::new())
                } else {
                    Node::Map(entries)
                };
                place(&mut stack, &mut root, element_name(&start), node)?;
            }
            Event::Text(content) => {
                if let Some(frame) = stack.last_mut() {
                    let unescaped = content
                        .unescape()
                        .map_err(|e| PacketError::malformed(e.to_string()))?;
                    frame.text.push_str(&unescaped);
                }
            }
            Event::CData(content) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&content.into_inner()));
                }
            }
            Event::End(_) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| PacketError::malformed("unbalanced end tag"))?;
                let (name, node) = frame.into_node();
                place(&mut stack, &mut root, name, node)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(PacketError::malformed(format!(
            "document ended inside <{}>",
            open.name
        )));
    }

    root.ok_or_else(|| PacketError::malformed("document has no root element"))
}

fn place(
    stack: &mut [Frame],
    root: &mut Option<(String, Node)>,
    name: String,
    node: Node,
) -> PacketResult<()> {
    match stack.last_mut() {
        Some(parent) => {
            insert(&mut parent.entries, name, node);
            Ok(())
        }
        None if root.is_some() => Err(PacketError::malformed("more than one root element")),
        None => {
            *root = Some((name, node));
            Ok(())
        }
    }
}

fn insert(entries: &mut Vec<(String, Node)>, key: String, node: Node) {
    let Some(index) = entries.iter().position(|(name, _)| *name == key) else {
        entries.push((key, node));
        return;
    };

    match &mut entries[index].1 {
        Node::List(items) => items.push(node),
        other => {
            let first = std::mem::replace(other, Node::List(Vec::with_capacity(2)));
            *other = Node::List(vec![first, node]);
        }
    }
}

fn element_name(start: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(start.name().as_ref()).into_owned()
}

fn attribute_entries(start: &BytesStart<'_>) -> PacketResult<Vec<(String, Node)>> {
    let mut entries = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| PacketError::malformed(e.to_string()))?;
        let key = format!("@{}", String::from_utf8_lossy(attribute.key.as_ref()));
        let value = attribute
            .unescape_value()
            .map_err(|e| PacketError::malformed(e.to_string()))?;
        entries.push((key, Node::Text(value.into_owned())));
    }
    Ok(entries)
}
