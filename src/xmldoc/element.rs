use quick_xml::escape::escape;
use std::fmt;
use std::fmt::Display;

///
/// An XML element: a name, ordered attributes and child
/// elements.
///
#[derive(Debug, Clone, PartialEq)]
pub struct XmlElement {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlElement>,
}

// Methods associated with XmlElement:

impl XmlElement {
    ///
    ///  Creates a new, empty element.
    ///
    pub fn new(name: &str) -> XmlElement {
        XmlElement {
            name: String::from(name),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }
    ///
    /// Adds an attribute.  A mutable reference to the element itself
    /// is returned to support method chaining.
    ///
    pub fn attr(&mut self, name: &str, value: &str) -> &mut XmlElement {
        self.attributes
            .push((String::from(name), String::from(value)));
        self
    }
    ///
    /// Adds a constructed child element to the end of the children.
    ///
    pub fn add_child(&mut self, child: XmlElement) -> &mut XmlElement {
        self.children.push(child);
        self
    }
    ///
    /// Creates a new child and returns it so it can be filled in.
    ///
    pub fn child(&mut self, name: &str) -> &mut XmlElement {
        self.children.push(XmlElement::new(name));
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn children(&self) -> &[XmlElement] {
        &self.children
    }
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:width$}<{}", "", self.name, width = depth)?;
        for (name, value) in &self.attributes {
            write!(f, " {}=\"{}\"", name, escape(value))?;
        }
        if self.children.is_empty() {
            return writeln!(f, "/>");
        }
        writeln!(f, ">")?;
        for child in &self.children {
            child.write_indented(f, depth + 1)?;
        }
        writeln!(f, "{:width$}</{}>", "", self.name, width = depth)
    }
}

// Implement trait Display so that users can println! or format!
// an element to turn it into a string.
impl Display for XmlElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

///
/// An element with the XML declaration in front of it.
///
#[derive(Debug, Clone, PartialEq)]
pub struct XmlDocument {
    root: XmlElement,
}

impl XmlDocument {
    pub fn new(root: XmlElement) -> XmlDocument {
        XmlDocument { root }
    }
    pub fn root(&self) -> &XmlElement {
        &self.root
    }
}

impl Display for XmlDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "<?xml version=\"1.0\"?>")?;
        self.root.write_indented(f, 0)
    }
}
