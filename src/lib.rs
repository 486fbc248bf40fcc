//! The `jxon` crate maps XML documents to JSON-shaped key/value trees and back.
//!
//! It is meant for clients of services that speak XML (such as the Salesforce
//! Bulk API `jobInfo` and `batchInfoList` documents) but whose callers would
//! rather work with ordinary nested data.
//!
//! ## Mapping rules
//!
//! * Attributes become keys prefixed with `@`.
//! * Child elements become keys named after their tag; repeated tags become lists
//!   in document order, a single occurrence stays a bare value.
//! * An element's own trimmed text is stored under `keyValue` when it also has
//!   attributes or children, otherwise the element collapses to that text.
//! * Text is coerced to `null`, booleans and finite numbers where it fits; dates are
//!   left as strings.
//!
//! ```
//! use jxon::{Value, parse, serialize};
//!
//! let value = parse(r#"<jobInfo state="Open"><id>750x0</id><batch>1</batch><batch>2</batch></jobInfo>"#).unwrap();
//! assert_eq!(value.get("@state"), Some(&Value::from("Open")));
//! assert_eq!(value.get("batch").and_then(Value::as_list).map(|b| b.len()), Some(2));
//!
//! let xml = serialize(&value, Some("jobInfo")).unwrap();
//! assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?><jobInfo state="Open">"#));
//! ```
pub mod config;

mod errors;
pub use errors::{Error, Result};

mod mapper;
pub use mapper::{Document, Mapper};
mod quick;
pub use quick::QuickXml;
pub mod tree;
mod value;
pub use value::{Mapping, Value};
mod xml_path;

pub use config::{MapperOptions, MapperOptionsBuilder};

/// Parses an XML document with the default conventions.
///
/// # Errors
///
/// Fails for any document that is not well-formed; see [`Error::is_parse_error`].
pub fn parse(xml: &str) -> Result<Value> {
    Mapper::default().parse(xml)
}

/// Like [`parse`], but also returns the root element's name.
pub fn parse_document(xml: &str) -> Result<Document> {
    Mapper::default().parse_document(xml)
}

/// Serializes `value` into an XML document rooted at `root_name` (`xml` when `None`).
///
/// # Errors
///
/// Returns `Error::SerializationError` when the value has no XML form, e.g. a key
/// that is not a valid element name or a list used as an attribute value.
pub fn serialize(value: &Value, root_name: Option<&str>) -> Result<String> {
    Mapper::default().serialize(value, root_name)
}
