use super::element::XmlElement;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("XML syntax error: {0}")]
    Syntax(String),
    #[error("document has no root element")]
    NoRoot,
    #[error("unbalanced element </{0}>")]
    Unbalanced(String),
}

fn to_element(start: &BytesStart) -> Result<XmlElement, XmlError> {
    let name = String::from_utf8_lossy(start.name().as_ref()).to_string();
    let mut element = XmlElement::new(&name);
    for attr in start.attributes() {
        let attr = attr.map_err(|e| XmlError::Syntax(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr
            .unescape_value()
            .map_err(|e| XmlError::Syntax(e.to_string()))?;
        element.attr(&key, &value);
    }
    Ok(element)
}
///
/// Parse a document produced by XmlDocument back into its root
/// element.  Text content, comments and processing instructions
/// are skipped.
///
pub fn parse_document(text: &str) -> Result<XmlElement, XmlError> {
    let mut reader = Reader::from_str(text);
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event() {
            Err(e) => return Err(XmlError::Syntax(e.to_string())),
            Ok(Event::Eof) => break,
            Ok(Event::Start(e)) => stack.push(to_element(&e)?),
            Ok(Event::Empty(e)) => {
                let element = to_element(&e)?;
                match stack.last_mut() {
                    Some(parent) => {
                        parent.add_child(element);
                    }
                    None => root = Some(element),
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                let element = stack.pop().ok_or_else(|| XmlError::Unbalanced(name.clone()))?;
                if element.name() != name {
                    return Err(XmlError::Unbalanced(name));
                }
                match stack.last_mut() {
                    Some(parent) => {
                        parent.add_child(element);
                    }
                    None => root = Some(element),
                }
            }
            Ok(_) => {}
        }
    }
    if !stack.is_empty() {
        return Err(XmlError::Syntax("unexpected end of document".to_string()));
    }
    root.ok_or(XmlError::NoRoot)
}
