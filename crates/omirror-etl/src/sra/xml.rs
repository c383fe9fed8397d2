//! Streaming splitter for SRA `*_SET` XML documents
//!
//! The document is read event by event; only the record currently being
//! assembled is held in memory as an [`XmlNode`] tree.

use crate::error::Result;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::BufRead;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    fn from_start(e: &BytesStart<'_>) -> Result<Self> {
        let mut attrs = Vec::new();
        for attr in e.attributes() {
            let attr = attr?;
            attrs.push((
                String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                attr.unescape_value()?.into_owned(),
            ));
        }
        Ok(Self {
            name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
            attrs,
            ..Default::default()
        })
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Descend through a chain of child names
    pub fn at(&self, path: &[&str]) -> Option<&XmlNode> {
        path.iter().try_fold(self, |node, name| node.child(name))
    }

    /// Trimmed text, `None` when empty
    pub fn text(&self) -> Option<&str> {
        let t = self.text.trim();
        (!t.is_empty()).then_some(t)
    }

    pub fn text_at(&self, path: &[&str]) -> Option<&str> {
        self.at(path).and_then(|n| n.text())
    }
}

/// Feed every `<tag>` element of the document to `visit`. Returning
/// `Ok(false)` from `visit` stops early. Returns the number of records seen.
pub fn for_each_record<R, F>(input: R, tag: &str, mut visit: F) -> Result<usize>
where
    R: BufRead,
    F: FnMut(XmlNode) -> Result<bool>,
{
    let mut reader = Reader::from_reader(input);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut seen = 0;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                if !stack.is_empty() || e.name().as_ref() == tag.as_bytes() {
                    stack.push(XmlNode::from_start(&e)?);
                }
            },
            Event::Empty(e) => {
                if !stack.is_empty() || e.name().as_ref() == tag.as_bytes() {
                    let node = XmlNode::from_start(&e)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => {
                            seen += 1;
                            if !visit(node)? {
                                return Ok(seen);
                            }
                        },
                    }
                }
            },
            Event::Text(t) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&t.unescape()?);
                }
            },
            Event::CData(c) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            },
            Event::End(_) => {
                if let Some(node) = stack.pop() {
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(node),
                        None => {
                            seen += 1;
                            if !visit(node)? {
                                return Ok(seen);
                            }
                        },
                    }
                }
            },
            Event::Eof => break,
            _ => {},
        }
        buf.clear();
    }
    Ok(seen)
}
