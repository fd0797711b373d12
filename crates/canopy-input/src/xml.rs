//! Minimal XML document tree over quick-xml's pull parser
//!
//! The input dialect nests expressions and formulas arbitrarily, which is
//! awkward to consume from a flat event stream. This module materializes
//! the document as a small element tree first; the semantic reader then
//! walks it by recursive descent. Element and attribute names are
//! lowercased on the way in, making the dialect's case-insensitivity a
//! non-issue downstream.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::InputError;

/// One XML element with its attributes, children, and text content
#[derive(Debug, Clone, Default)]
pub struct Element {
    /// Local element name, lowercased
    pub name: String,
    /// `(name, value)` pairs; names lowercased, values entity-decoded
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    pub text: String,
}

impl Element {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn required_attribute(&self, name: &str) -> Result<&str, InputError> {
        self.attribute(name).ok_or_else(|| {
            InputError::Malformed(format!(
                "element '{}' is missing attribute '{}'",
                self.name, name
            ))
        })
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |child| child.name == name)
    }
}

/// Parses a complete document into its root element.
pub fn parse_document(xml: &str) -> Result<Element, InputError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    loop {
        match reader.read_event() {
            Ok(Event::Start(ref start)) => stack.push(element_from(start)?),
            Ok(Event::Empty(ref start)) => {
                let element = element_from(start)?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| InputError::Xml("unbalanced end tag".into()))?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Text(ref text)) => {
                if let Some(top) = stack.last_mut() {
                    let decoded = text
                        .unescape()
                        .map_err(|e| InputError::Xml(e.to_string()))?;
                    top.text.push_str(&decoded);
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(InputError::Xml(e.to_string())),
        }
    }
    if !stack.is_empty() {
        return Err(InputError::Xml("unclosed element at end of input".into()));
    }
    root.ok_or_else(|| InputError::Xml("empty document".into()))
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), InputError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(element);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(InputError::Xml("multiple root elements".into())),
    }
}

fn element_from(start: &BytesStart<'_>) -> Result<Element, InputError> {
    let name = std::str::from_utf8(start.name().local_name().as_ref())
        .map_err(|e| InputError::Xml(e.to_string()))?
        .to_lowercase();
    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute.map_err(|e| InputError::Xml(e.to_string()))?;
        let key = std::str::from_utf8(attribute.key.local_name().as_ref())
            .map_err(|e| InputError::Xml(e.to_string()))?
            .to_lowercase();
        let value = attribute
            .unescape_value()
            .map_err(|e| InputError::Xml(e.to_string()))?
            .into_owned();
        attributes.push((key, value));
    }
    Ok(Element {
        name,
        attributes,
        children: Vec::new(),
        text: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_elements_and_attributes() {
        let root = parse_document(
            r#"<Outer name="Top"><inner value="1"/><inner value="2">text</inner></Outer>"#,
        )
        .unwrap();
        assert_eq!(root.name, "outer");
        assert_eq!(root.attribute("name"), Some("Top"));
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.children[1].text, "text");
        assert_eq!(root.children_named("inner").count(), 2);
    }

    #[test]
    fn truncated_document_is_a_syntax_error() {
        let err = parse_document("<a><b></a>").unwrap_err();
        assert!(matches!(err, InputError::Xml(_)));
    }

    #[test]
    fn empty_document_is_rejected() {
        assert!(matches!(
            parse_document("  "),
            Err(InputError::Xml(_))
        ));
    }
}
