use std::io::{BufRead, Write};

use indexmap::map::Entry;
use tracing::{debug, instrument};

use crate::config::MapperOptions;
use crate::errors::{Error, Result};
use crate::quick::QuickXml;
use crate::tree::{Element, XmlBackend, XmlNode, find_invalid_char, is_xml_name};
use crate::value::{Mapping, Value};
use crate::xml_path::XmlPath;

/// A parsed document: the root element's name and its mapped value.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub root: String,
    pub value: Value,
}

/// Converts between XML text and [`Value`] trees.
///
/// A `Mapper` is immutable once built and can be shared between threads.
#[derive(Debug, Clone)]
pub struct Mapper<B = QuickXml> {
    options: MapperOptions,
    backend: B,
}

impl Default for Mapper {
    fn default() -> Self {
        Self {
            options: MapperOptions::default(),
            backend: QuickXml,
        }
    }
}

impl Mapper {
    /// Creates a mapper on the QuickXML backend after validating `options`.
    pub fn new(options: MapperOptions) -> Result<Self> {
        Self::with_backend(options, QuickXml)
    }
}

impl<B: XmlBackend> Mapper<B> {
    pub fn with_backend(options: MapperOptions, backend: B) -> Result<Self> {
        options.validate()?;
        Ok(Self { options, backend })
    }

    pub fn options(&self) -> &MapperOptions {
        &self.options
    }

    /// Parses an XML document and returns the value of its root element.
    pub fn parse(&self, xml: &str) -> Result<Value> {
        self.parse_document(xml).map(|document| document.value)
    }

    /// Parses an XML document, keeping the root element's name.
    #[instrument(skip_all, fields(len = xml.len()))]
    pub fn parse_document(&self, xml: &str) -> Result<Document> {
        let root = self.backend.read_tree(xml, &self.options)?;
        let value = self.value_from_element(&root)?;
        debug!(root = %root.name, "parsed document");
        Ok(Document {
            root: root.name,
            value,
        })
    }

    /// Reads the whole of `reader` and parses it as an XML document.
    ///
    /// Input that is not UTF-8 fails with [`Error::Utf8Error`], a parse error.
    pub fn parse_reader(&self, mut reader: impl BufRead) -> Result<Value> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        self.parse(std::str::from_utf8(&buf)?)
    }

    /// Maps an already parsed element tree.
    pub fn value_from_element(&self, element: &Element) -> Result<Value> {
        map_element(element, &self.options, 1)
    }

    /// Builds the element tree for `value` under a root named `root_name`.
    ///
    /// `None` and the empty string both select the configured default root.
    pub fn element_from_value(&self, value: &Value, root_name: Option<&str>) -> Result<Element> {
        let root_name = self.root_name(root_name);
        let mut path = XmlPath::default();
        let mut root = new_element(root_name, &mut path, &self.options)?;
        match value {
            Value::Map(map) => load_map(map, &mut root, &mut path, &self.options)?,
            Value::List(_) => {
                return Err(Error::SerializationError(format!(
                    "{path}: a list cannot be the document root"
                )));
            }
            scalar => push_text(&mut root, scalar, &path)?,
        }
        Ok(root)
    }

    fn root_name<'a>(&'a self, root_name: Option<&'a str>) -> &'a str {
        root_name
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.options.default_root)
    }

    /// Serializes `value` into an XML document.
    pub fn serialize(&self, value: &Value, root_name: Option<&str>) -> Result<String> {
        let mut out = Vec::new();
        self.serialize_to_writer(value, root_name, &mut out)?;
        String::from_utf8(out).map_err(|e| Error::Utf8Error(e.utf8_error()))
    }

    /// Serializes a parsed document under its original root name.
    pub fn serialize_document(&self, document: &Document) -> Result<String> {
        self.serialize(&document.value, Some(&document.root))
    }

    #[instrument(skip_all, fields(root = self.root_name(root_name)))]
    pub fn serialize_to_writer(
        &self,
        value: &Value,
        root_name: Option<&str>,
        mut out: impl Write,
    ) -> Result<()> {
        let root = self.element_from_value(value, root_name)?;
        self.backend.write_tree(&root, &self.options, &mut out)?;
        debug!("serialized document");
        Ok(())
    }
}

fn map_element(element: &Element, options: &MapperOptions, depth: usize) -> Result<Value> {
    if depth > options.max_depth {
        return Err(Error::ParseError(format!(
            "<{}> exceeds the maximum nesting depth of {}",
            element.name, options.max_depth
        )));
    }

    let mut result: Option<Mapping> = None;
    if !element.attributes.is_empty() {
        let map = result.get_or_insert_with(Mapping::default);
        for (name, value) in &element.attributes {
            map.insert(
                format!("{}{}", options.attribute_prefix, name),
                Value::from_text(value.trim()),
            );
        }
    }

    let mut collected_text = String::new();
    for child in &element.children {
        match child {
            XmlNode::Text(text) => collected_text.push_str(text.trim()),
            XmlNode::CData(text) => collected_text.push_str(text),
            XmlNode::Element(child) => {
                if options.skip_prefixed_elements && child.prefix().is_some() {
                    continue;
                }
                let value = map_element(child, options, depth + 1)?;
                insert_child(result.get_or_insert_with(Mapping::default), &child.name, value);
            }
        }
    }

    if collected_text.is_empty() {
        return Ok(result.map_or(Value::Null, Value::Map));
    }
    let text = Value::from_text(&collected_text);
    Ok(match result {
        Some(mut map) => {
            map.insert(options.text_key.clone(), text);
            Value::Map(map)
        }
        None => text,
    })
}

/// Stores a child value, turning a repeated tag into a list in document order.
fn insert_child(map: &mut Mapping, name: &str, value: Value) {
    match map.entry(name.to_string()) {
        Entry::Occupied(mut slot) => match slot.get_mut() {
            Value::List(items) => items.push(value),
            existing => {
                let first = std::mem::take(existing);
                *existing = Value::List(vec![first, value]);
            }
        },
        Entry::Vacant(slot) => {
            slot.insert(value);
        }
    }
}

fn new_element(name: &str, path: &mut XmlPath, options: &MapperOptions) -> Result<Element> {
    if !is_xml_name(name) {
        return Err(Error::SerializationError(format!(
            "{path}: '{name}' is not a valid element name"
        )));
    }
    path.push(name);
    if path.depth() > options.max_depth {
        return Err(Error::SerializationError(format!(
            "{path}: nesting exceeds the maximum depth of {}",
            options.max_depth
        )));
    }
    Ok(Element::new(name))
}

fn load_map(
    map: &Mapping,
    parent: &mut Element,
    path: &mut XmlPath,
    options: &MapperOptions,
) -> Result<()> {
    for (key, value) in map {
        if *key == options.text_key {
            if !value.is_scalar() {
                return Err(Error::SerializationError(format!(
                    "{path}: '{key}' must hold a scalar"
                )));
            }
            push_text(parent, value, path)?;
        } else if let Some(name) = key.strip_prefix(options.attribute_prefix.as_str()) {
            if !is_xml_name(name) {
                return Err(Error::SerializationError(format!(
                    "{path}: '{name}' is not a valid attribute name"
                )));
            }
            let text = value.to_text().ok_or_else(|| {
                Error::SerializationError(format!("{path}: attribute '{name}' must hold a scalar"))
            })?;
            check_chars(&text, path)?;
            parent.attributes.push((name.to_string(), text));
        } else if let Value::List(items) = value {
            for item in items {
                let child = child_from_value(key, item, path, options)?;
                parent.children.push(XmlNode::Element(child));
            }
        } else {
            let child = child_from_value(key, value, path, options)?;
            parent.children.push(XmlNode::Element(child));
        }
    }
    Ok(())
}

fn child_from_value(
    name: &str,
    value: &Value,
    path: &mut XmlPath,
    options: &MapperOptions,
) -> Result<Element> {
    let mut child = new_element(name, path, options)?;
    match value {
        Value::Map(map) => load_map(map, &mut child, path, options)?,
        Value::List(_) => {
            return Err(Error::SerializationError(format!(
                "{path}: a list cannot directly contain another list"
            )));
        }
        scalar => push_text(&mut child, scalar, path)?,
    }
    path.pop();
    Ok(child)
}

/// Appends the text form of a scalar. `Null` and `true` produce no text.
fn push_text(element: &mut Element, value: &Value, path: &XmlPath) -> Result<()> {
    match value {
        Value::Null | Value::Bool(true) => {}
        other => {
            if let Some(text) = other.to_text() {
                check_chars(&text, path)?;
                element.children.push(XmlNode::Text(text));
            }
        }
    }
    Ok(())
}

fn check_chars(text: &str, path: &XmlPath) -> Result<()> {
    match find_invalid_char(text) {
        Some(c) => Err(Error::SerializationError(format!(
            "{path}: character U+{:04X} cannot be written as XML",
            c as u32
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MapperOptionsBuilder;
    use approx::assert_abs_diff_eq;
    use rstest::rstest;

    fn map(entries: Vec<(&str, Value)>) -> Value {
        entries.into_iter().collect()
    }

    #[rstest]
    #[case("<r><a>1</a></r>", map(vec![("a", Value::from(1))]))]
    #[case(
        "<r><a>1</a><a>2</a></r>",
        map(vec![("a", Value::List(vec![Value::from(1), Value::from(2)]))])
    )]
    #[case("<r>   </r>", Value::Null)]
    #[case("<r/>", Value::Null)]
    #[case("<r> hi </r>", Value::from("hi"))]
    #[case("<r>true</r>", Value::Bool(true))]
    #[case("<r>FALSE</r>", Value::Bool(false))]
    #[case("<r>3.14</r>", Value::Number(3.14))]
    #[case("<r>3.14.5</r>", Value::from("3.14.5"))]
    #[case(r#"<job state="Closed"/>"#, map(vec![("@state", Value::from("Closed"))]))]
    #[case(r#"<job id=" 42 " empty=""/>"#, map(vec![("@id", Value::from(42)), ("@empty", Value::Null)]))]
    fn test_parse(#[case] xml: &str, #[case] expected: Value) -> Result<()> {
        assert_eq!(Mapper::default().parse(xml)?, expected);
        Ok(())
    }

    #[test]
    fn test_text_beside_attributes_uses_text_key() -> Result<()> {
        let value = Mapper::default().parse(r#"<price currency="USD"> 9.99 </price>"#)?;
        assert_eq!(value.get("@currency"), Some(&Value::from("USD")));
        assert_abs_diff_eq!(
            value.get("keyValue").and_then(Value::as_f64).unwrap(),
            9.99,
            epsilon = 1e-12
        );
        Ok(())
    }

    #[test]
    fn test_text_fragments_are_concatenated() -> Result<()> {
        let value = Mapper::default().parse("<r> one <a>x</a> two <b/> three </r>")?;
        assert_eq!(
            value,
            map(vec![
                ("a", Value::from("x")),
                ("b", Value::Null),
                ("keyValue", Value::from("onetwothree")),
            ])
        );
        Ok(())
    }

    #[test]
    fn test_cdata_is_kept_verbatim() -> Result<()> {
        let value = Mapper::default().parse("<r><![CDATA[ a <b> ]]></r>")?;
        assert_eq!(value, Value::from(" a <b> "));
        Ok(())
    }

    #[test]
    fn test_repeated_tags_interleaved_with_others() -> Result<()> {
        let value = Mapper::default().parse(
            "<batchInfoList><batchInfo><id>b1</id></batchInfo><total>2</total>\
             <batchInfo><id>b2</id></batchInfo><batchInfo><id>b3</id></batchInfo></batchInfoList>",
        )?;
        let batches = value.get("batchInfo").and_then(Value::as_list).unwrap();
        let ids: Vec<&str> = batches
            .iter()
            .filter_map(|b| b.get("id").and_then(Value::as_str))
            .collect();
        assert_eq!(ids, vec!["b1", "b2", "b3"]);
        let keys: Vec<&str> = value.as_map().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["batchInfo", "total"]);
        Ok(())
    }

    #[test]
    fn test_prefixed_elements_are_skipped() -> Result<()> {
        let xml = r#"<r xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"><xsi:meta>1</xsi:meta><a xsi:nil="true"/></r>"#;
        let value = Mapper::default().parse(xml)?;
        assert_eq!(
            value,
            map(vec![
                ("@xmlns:xsi", Value::from("http://www.w3.org/2001/XMLSchema-instance")),
                ("a", map(vec![("@xsi:nil", Value::Bool(true))])),
            ])
        );

        let keep = Mapper::new(MapperOptionsBuilder::new().skip_prefixed_elements(false).build()?)?;
        let value = keep.parse(xml)?;
        assert_eq!(value.get("xsi:meta"), Some(&Value::from(1)));
        Ok(())
    }

    #[test]
    fn test_value_from_hand_built_tree() -> Result<()> {
        let tree = Element::new("result-list")
            .with_text("\n  ")
            .with_child(Element::new("result").with_text("752x00000000001"))
            .with_text("\n  ")
            .with_child(Element::new("result").with_text("752x00000000002"));
        let value = Mapper::default().value_from_element(&tree)?;
        assert_eq!(
            value,
            map(vec![(
                "result",
                Value::List(vec![
                    Value::from("752x00000000001"),
                    Value::from("752x00000000002")
                ])
            )])
        );
        Ok(())
    }

    #[test]
    fn test_serialize_attribute_only() -> Result<()> {
        let value = map(vec![("@state", Value::from("Closed"))]);
        let xml = Mapper::default().serialize(&value, Some("jobInfo"))?;
        assert_eq!(
            xml,
            r#"<?xml version="1.0" encoding="UTF-8"?><jobInfo state="Closed"/>"#
        );
        Ok(())
    }

    #[test]
    fn test_serialize_job_info() -> Result<()> {
        let value = map(vec![
            ("state", Value::from("Closed")),
            ("@xmlns", Value::from("urn:example")),
        ]);
        let xml = Mapper::default().serialize(&value, Some("jobInfo"))?;
        assert_eq!(
            xml,
            r#"<?xml version="1.0" encoding="UTF-8"?><jobInfo xmlns="urn:example"><state>Closed</state></jobInfo>"#
        );
        Ok(())
    }

    #[test]
    fn test_serialize_lists_and_scalars() -> Result<()> {
        let value = map(vec![
            (
                "item",
                Value::List(vec![
                    map(vec![("@id", Value::from(1)), ("keyValue", Value::from("first"))]),
                    Value::from(2.5),
                    Value::Null,
                ]),
            ),
            ("flag", Value::Bool(true)),
            ("off", Value::Bool(false)),
            ("@empty", Value::Null),
        ]);
        let xml = Mapper::default().serialize(&value, None)?;
        assert_eq!(
            xml,
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                r#"<xml empty=""><item id="1">first</item><item>2.5</item><item/>"#,
                r#"<flag/><off>false</off></xml>"#
            )
        );
        Ok(())
    }

    #[rstest]
    #[case(Value::Null, "<r/>")]
    #[case(Value::from("text"), "<r>text</r>")]
    #[case(Value::from(7), "<r>7</r>")]
    fn test_serialize_non_map_root(#[case] value: Value, #[case] expected: &str) -> Result<()> {
        let mapper = Mapper::new(MapperOptionsBuilder::new().xml_declaration(false).build()?)?;
        assert_eq!(mapper.serialize(&value, Some("r"))?, expected);
        Ok(())
    }

    #[rstest]
    #[case(Value::List(vec![Value::from(1)]), "r")]
    #[case(map(vec![("bad name", Value::from(1))]), "r")]
    #[case(map(vec![("", Value::from(1))]), "r")]
    #[case(map(vec![("@", Value::from(1))]), "r")]
    #[case(map(vec![("@id", Value::List(vec![]))]), "r")]
    #[case(map(vec![("@id", map(vec![]))]), "r")]
    #[case(map(vec![("keyValue", map(vec![]))]), "r")]
    #[case(map(vec![("a", Value::List(vec![Value::List(vec![])]))]), "r")]
    #[case(map(vec![]), "1root")]
    #[case(map(vec![("a\u{AB}b", Value::from(1))]), "r")]
    #[case(map(vec![("@a\u{AB}b", Value::from(1))]), "r")]
    #[case(map(vec![("a", Value::from("x\u{1}y"))]), "r")]
    #[case(map(vec![("@x", Value::from("\u{1}"))]), "r")]
    #[case(map(vec![("keyValue", Value::from("nul\0"))]), "r")]
    #[case(Value::from("\u{FFFF}"), "r")]
    fn test_serialize_errors(#[case] value: Value, #[case] root: &str) {
        let result = Mapper::default().serialize(&value, Some(root));
        match result {
            Err(e) => assert!(e.is_serialization_error(), "unexpected error {e:?}"),
            Ok(xml) => panic!("expected a serialization error, got {xml}"),
        }
    }

    #[test]
    fn test_serialization_error_names_the_path() {
        let value = map(vec![("job", map(vec![("bad key", Value::from(1))]))]);
        let Err(Error::SerializationError(message)) =
            Mapper::default().serialize(&value, Some("jobInfo"))
        else {
            panic!("expected a serialization error");
        };
        assert!(message.starts_with("/jobInfo/job:"), "{message}");
    }

    #[test]
    fn test_unwritable_character_names_the_path() {
        let value = map(vec![("job", map(vec![("note", Value::from("bell\u{7}"))]))]);
        let Err(Error::SerializationError(message)) =
            Mapper::default().serialize(&value, Some("jobInfo"))
        else {
            panic!("expected a serialization error");
        };
        assert_eq!(
            message,
            "/jobInfo/job/note: character U+0007 cannot be written as XML"
        );
    }

    #[rstest]
    #[case(None)]
    #[case(Some(""))]
    fn test_missing_root_name_uses_default(#[case] root: Option<&str>) -> Result<()> {
        let mapper = Mapper::new(MapperOptionsBuilder::new().xml_declaration(false).build()?)?;
        let value = map(vec![("a", Value::from(1))]);
        assert_eq!(mapper.serialize(&value, root)?, "<xml><a>1</a></xml>");
        Ok(())
    }

    #[test]
    fn test_parse_reader_rejects_invalid_utf8() {
        let result = Mapper::default().parse_reader(&b"<a>\xff</a>"[..]);
        match result {
            Err(e @ Error::Utf8Error(_)) => assert!(e.is_parse_error()),
            other => panic!("expected a UTF-8 error, got {other:?}"),
        }
    }

    #[test]
    fn test_multiline_attribute_round_trip() -> Result<()> {
        let value = map(vec![("@note", Value::from("line 1\nline 2"))]);
        let xml = Mapper::default().serialize(&value, Some("r"))?;
        assert!(xml.ends_with(r#"<r note="line 1&#10;line 2"/>"#), "{xml}");
        assert_eq!(Mapper::default().parse(&xml)?, value);
        Ok(())
    }

    #[test]
    fn test_depth_limit_both_directions() -> Result<()> {
        let mapper = Mapper::new(MapperOptionsBuilder::new().max_depth(3).build()?)?;

        let mut deep = Value::from("leaf");
        for _ in 0..4 {
            deep = map(vec![("n", deep)]);
        }
        assert!(matches!(
            mapper.serialize(&deep, Some("r")),
            Err(Error::SerializationError(_))
        ));

        let mut tree = Element::new("n");
        for _ in 0..4 {
            tree = Element::new("n").with_child(tree);
        }
        assert!(matches!(
            mapper.value_from_element(&tree),
            Err(Error::ParseError(_))
        ));

        let shallow = map(vec![("n", map(vec![("n", Value::from(1))]))]);
        assert!(mapper.serialize(&shallow, Some("r")).is_ok());
        Ok(())
    }

    #[test]
    fn test_custom_conventions_round_trip() -> Result<()> {
        let options = MapperOptionsBuilder::new()
            .attribute_prefix("-")
            .text_key("#text")
            .build()?;
        let mapper = Mapper::new(options)?;
        let document = mapper.parse_document(r#"<price currency="EUR">12<tax>2</tax></price>"#)?;
        assert_eq!(
            document.value,
            map(vec![
                ("-currency", Value::from("EUR")),
                ("tax", Value::from(2)),
                ("#text", Value::from(12)),
            ])
        );
        let xml = mapper.serialize_document(&document)?;
        assert!(xml.ends_with(r#"<price currency="EUR"><tax>2</tax>12</price>"#), "{xml}");
        Ok(())
    }
}
