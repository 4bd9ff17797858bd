//! XML → record tree conversion.
//!
//! The mapping follows the usual "XML as JSON" conventions:
//!
//! - attributes become keys of the element object (no prefix)
//! - repeated child elements collapse into an array
//! - text of an element that also has attributes or children lives under `#text`
//! - leaf text is trimmed and typed (booleans, integers, floats); values with a
//!   leading zero stay strings
//! - empty elements become `""`
//!
//! Declarations, comments, processing instructions and doctypes are ignored.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde_json::{Map, Number, Value};

use crate::error::SourceError;

/// Key under which mixed text content is stored.
pub const TEXT_KEY: &str = "#text";

struct OpenElement {
    name: String,
    fields: Map<String, Value>,
    text: String,
}

impl OpenElement {
    fn new(name: String) -> Self {
        Self {
            name,
            fields: Map::new(),
            text: String::new(),
        }
    }

    fn from_start(start: &BytesStart<'_>) -> Result<Self, SourceError> {
        let name = std::str::from_utf8(start.name().as_ref())?.to_string();
        let mut element = Self::new(name);
        for attr in start.attributes() {
            let attr = attr?;
            let key = std::str::from_utf8(attr.key.as_ref())?.to_string();
            let value = attr.unescape_value()?;
            element.fields.insert(key, typed_scalar(value.trim()));
        }
        Ok(element)
    }

    fn push_text(&mut self, text: &str) {
        let text = text.trim();
        if !text.is_empty() {
            self.text.push_str(text);
        }
    }

    fn finish(mut self) -> (String, Value) {
        let value = if self.fields.is_empty() {
            if self.text.is_empty() {
                Value::String(String::new())
            } else {
                typed_scalar(&self.text)
            }
        } else {
            if !self.text.is_empty() {
                self.fields
                    .insert(TEXT_KEY.to_string(), typed_scalar(&self.text));
            }
            Value::Object(self.fields)
        };
        (self.name, value)
    }
}

fn insert_child(fields: &mut Map<String, Value>, name: String, value: Value) {
    match fields.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            fields.insert(name, value);
        }
    }
}

/// Parses an XML document into a record tree.
///
/// The returned value is always an object keyed by the top-level element name(s).
pub fn parse_xml(text: &str) -> Result<Value, SourceError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(false);

    // Bottom of the stack is a synthetic document node.
    let mut stack: Vec<OpenElement> = vec![OpenElement::new(String::new())];

    loop {
        match reader.read_event()? {
            Event::Start(e) => stack.push(OpenElement::from_start(&e)?),
            Event::Empty(e) => {
                let (name, value) = OpenElement::from_start(&e)?.finish();
                if let Some(parent) = stack.last_mut() {
                    insert_child(&mut parent.fields, name, value);
                }
            }
            Event::Text(e) => {
                let text = e.unescape()?;
                if let Some(current) = stack.last_mut() {
                    current.push_text(&text);
                }
            }
            Event::CData(e) => {
                let raw = e.into_inner();
                let text = std::str::from_utf8(&raw)?;
                if let Some(current) = stack.last_mut() {
                    current.push_text(text);
                }
            }
            Event::End(_) => {
                if stack.len() < 2 {
                    return Err(SourceError::Xml("unexpected closing tag".to_string()));
                }
                if let Some(element) = stack.pop() {
                    let (name, value) = element.finish();
                    if let Some(parent) = stack.last_mut() {
                        insert_child(&mut parent.fields, name, value);
                    }
                }
            }
            Event::Eof => break,
            _ => (),
        }
    }

    if stack.len() != 1 {
        let open = stack.last().map(|e| e.name.clone()).unwrap_or_default();
        return Err(SourceError::Xml(format!(
            "unexpected end of document inside <{open}>"
        )));
    }

    let document = stack.pop().map(|d| d.fields).unwrap_or_default();
    Ok(Value::Object(document))
}

/// Converts trimmed text into the most specific scalar it represents.
pub fn typed_scalar(text: &str) -> Value {
    match text {
        "" => return Value::String(String::new()),
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if looks_numeric(text) {
        if let Ok(i) = text.parse::<i64>() {
            return Value::Number(i.into());
        }
        let is_integer = text.bytes().all(|b| b.is_ascii_digit() || b == b'-' || b == b'+');
        if !is_integer
            && let Ok(f) = text.parse::<f64>()
            && let Some(n) = Number::from_f64(f)
        {
            return Value::Number(n);
        }
    }
    Value::String(text.to_string())
}

fn looks_numeric(text: &str) -> bool {
    let unsigned = text.strip_prefix(['-', '+']).unwrap_or(text);
    let bytes = unsigned.as_bytes();
    if bytes.is_empty() || !bytes[0].is_ascii_digit() {
        return false;
    }
    // "007" stays a string, "0.5" does not.
    if bytes.len() > 1 && bytes[0] == b'0' && bytes[1] != b'.' {
        return false;
    }
    unsigned
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
}
