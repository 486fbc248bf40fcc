use std::io::Write;

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::escape;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use tracing::trace;

use crate::config::MapperOptions;
use crate::errors::{Error, Result};
use crate::tree::{Element, XmlBackend, XmlNode, find_invalid_char, is_xml_char, is_xml_name};

/// [`XmlBackend`] built on QuickXML.
///
/// Reading is a single pass over the event stream with an explicit element
/// stack, so document depth never turns into call depth here.
#[derive(Debug, Clone, Copy, Default)]
pub struct QuickXml;

impl XmlBackend for QuickXml {
    fn read_tree(&self, xml: &str, options: &MapperOptions) -> Result<Element> {
        let mut reader = Reader::from_str(xml);
        // Expand empty elements (e.g., <tag/>) into <tag></tag>, so only
        // Start and End events need handling.
        reader.config_mut().expand_empty_elements = true;

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;
        // Text and entity references arrive as separate events; they are
        // joined here so that one run of character data is one text node.
        let mut pending_text = String::new();
        let mut first_event = true;

        loop {
            let event = reader.read_event()?;
            let is_first = std::mem::replace(&mut first_event, false);
            match event {
                Event::Decl(_) if !is_first => {
                    return Err(Error::ParseError(
                        "XML declaration is only allowed at the start of the document".to_string(),
                    ));
                }
                Event::Start(e) => {
                    flush_text(&mut stack, &mut pending_text);
                    if stack.is_empty() && root.is_some() {
                        return Err(Error::ParseError(
                            "document has more than one root element".to_string(),
                        ));
                    }
                    if stack.len() >= options.max_depth {
                        return Err(Error::ParseError(format!(
                            "element nesting exceeds the maximum depth of {}",
                            options.max_depth
                        )));
                    }
                    let name = std::str::from_utf8(e.name().into_inner())?;
                    if !is_xml_name(name) {
                        return Err(Error::ParseError(format!("invalid element name '{name}'")));
                    }
                    let mut element = Element::new(name);
                    for attribute in e.attributes() {
                        let attribute = attribute?;
                        let key = std::str::from_utf8(attribute.key.as_ref())?;
                        if !is_xml_name(key) {
                            return Err(Error::ParseError(format!(
                                "invalid attribute name '{key}' in <{name}>"
                            )));
                        }
                        let value = attribute_value(std::str::from_utf8(&attribute.value)?)?;
                        element.attributes.push((key.to_string(), value));
                    }
                    trace!(name = %element.name, depth = stack.len(), "start element");
                    stack.push(element);
                }
                Event::End(_) => {
                    flush_text(&mut stack, &mut pending_text);
                    let element = stack.pop().ok_or_else(|| {
                        Error::ParseError("closing tag without an open element".to_string())
                    })?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(XmlNode::Element(element)),
                        None => root = Some(element),
                    }
                }
                Event::Text(e) => {
                    let text = checked_chars(std::str::from_utf8(&e)?)?;
                    if stack.is_empty() {
                        if !text.trim().is_empty() {
                            return Err(Error::ParseError(
                                "text content outside the root element".to_string(),
                            ));
                        }
                    } else {
                        pending_text.push_str(text);
                    }
                }
                Event::GeneralRef(e) => {
                    if stack.is_empty() {
                        return Err(Error::ParseError(
                            "entity reference outside the root element".to_string(),
                        ));
                    }
                    let name = e.into_inner();
                    resolve_reference(std::str::from_utf8(&name)?, &mut pending_text)?;
                }
                Event::CData(e) => {
                    flush_text(&mut stack, &mut pending_text);
                    let text = checked_chars(std::str::from_utf8(&e)?)?.to_string();
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(XmlNode::CData(text)),
                        None => {
                            return Err(Error::ParseError(
                                "CDATA section outside the root element".to_string(),
                            ));
                        }
                    }
                }
                Event::Eof => {
                    if let Some(open) = stack.last() {
                        return Err(Error::ParseError(format!(
                            "unexpected end of document inside <{}>",
                            open.name
                        )));
                    }
                    break;
                }
                // Comments, processing instructions, declarations and DOCTYPE
                // carry no mapped content but still end a run of text.
                _ => flush_text(&mut stack, &mut pending_text),
            }
        }

        root.ok_or_else(|| Error::ParseError("document has no root element".to_string()))
    }

    fn write_tree(
        &self,
        root: &Element,
        options: &MapperOptions,
        out: &mut dyn Write,
    ) -> Result<()> {
        let mut writer = Writer::new(out);
        if options.xml_declaration {
            writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
        }
        write_element(&mut writer, root)
    }
}

fn flush_text(stack: &mut [Element], pending_text: &mut String) {
    if pending_text.is_empty() {
        return;
    }
    if let Some(parent) = stack.last_mut() {
        parent
            .children
            .push(XmlNode::Text(std::mem::take(pending_text)));
    } else {
        pending_text.clear();
    }
}

fn checked_chars(text: &str) -> Result<&str> {
    match find_invalid_char(text) {
        Some(c) => Err(Error::ParseError(format!(
            "character U+{:04X} is not allowed in XML",
            c as u32
        ))),
        None => Ok(text),
    }
}

/// Normalizes and unescapes a raw attribute value.
///
/// Literal tabs and line breaks become spaces; characters written as
/// references (`&#10;`) are kept.
fn attribute_value(raw: &str) -> Result<String> {
    if raw.contains('<') {
        return Err(Error::ParseError(format!(
            "'<' is not allowed in attribute value \"{raw}\""
        )));
    }
    let mut value = String::with_capacity(raw.len());
    let mut rest = checked_chars(raw)?;
    while let Some(amp) = rest.find('&') {
        value.extend(rest[..amp].chars().map(normalize_space));
        let tail = &rest[amp + 1..];
        let end = tail.find(';').ok_or_else(|| {
            Error::ParseError(format!("unterminated reference in attribute value \"{raw}\""))
        })?;
        resolve_reference(&tail[..end], &mut value)?;
        rest = &tail[end + 1..];
    }
    value.extend(rest.chars().map(normalize_space));
    Ok(value)
}

fn normalize_space(c: char) -> char {
    match c {
        '\t' | '\n' | '\r' => ' ',
        c => c,
    }
}

/// Appends the replacement text of `&name;` to `out`.
fn resolve_reference(name: &str, out: &mut String) -> Result<()> {
    if let Some(number) = name.strip_prefix('#') {
        let code = match number.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => number.parse::<u32>().ok(),
        };
        let ch = code
            .and_then(char::from_u32)
            .filter(|&c| is_xml_char(c))
            .ok_or_else(|| {
                Error::ParseError(format!("invalid character reference '&{name};'"))
            })?;
        out.push(ch);
    } else {
        let resolved = escape::resolve_predefined_entity(name)
            .ok_or_else(|| Error::ParseError(format!("unknown entity '&{name};'")))?;
        out.push_str(resolved);
    }
    Ok(())
}

fn write_element<W: Write>(writer: &mut Writer<W>, element: &Element) -> Result<()> {
    let mut start = BytesStart::new(element.name.as_str());
    for (name, value) in &element.attributes {
        let escaped = escape_attribute(value);
        // Already escaped; the byte-tuple form is pushed as is.
        start.push_attribute((name.as_bytes(), escaped.as_bytes()));
    }
    if element.children.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    for child in &element.children {
        match child {
            XmlNode::Element(child) => write_element(writer, child)?,
            XmlNode::Text(text) => writer.write_event(Event::Text(BytesText::new(text)))?,
            XmlNode::CData(text) => {
                // A literal "]]>" cannot live in one section; split it.
                for part in BytesCData::escaped(text) {
                    writer.write_event(Event::CData(part))?;
                }
            }
        }
    }
    writer.write_event(Event::End(BytesEnd::new(element.name.as_str())))?;
    Ok(())
}

/// Escapes markup characters and writes whitespace other than the space as
/// character references, so that readers do not normalize it away.
fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in escape::escape(value).chars() {
        match c {
            '\n' => escaped.push_str("&#10;"),
            '\t' => escaped.push_str("&#9;"),
            '\r' => escaped.push_str("&#13;"),
            c => escaped.push(c),
        }
    }
    escaped
}
