//!
//! The xmldoc module provides the ability to build and format
//! simple XML documents.  The documents are simple in the sense
//! that
//! *   Elements carry attributes and child elements but no text.
//! *   Attribute values are escaped; names are trusted.
//!
//! INFO responses and the per-station `buffer.xml` state snapshot
//! are produced with it.  Normally you'd create an element and then
//! add to it.  Adding returns the element itself to support
//! chaining, e.g.
//!
//! ```
//!   use seedlink::xmldoc::*;
//!
//!   let mut station = XmlElement::new("station");
//!   station
//!     .attr("name", "APE")
//!     .attr("network", "GE");
//!   let mut root = XmlElement::new("seedlink");
//!   root.add_child(station);
//!
//!   println!("{}", XmlDocument::new(root));
//! ```
//!
//! will produce something like:
//!
//!   <?xml version="1.0"?>
//!   <seedlink>
//!    <station name="APE" network="GE"/>
//!   </seedlink>
//!
pub mod element;
pub use self::element::*;
pub mod reader;
pub use self::reader::*;
