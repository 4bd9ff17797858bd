//! Locating the record sequence inside a parsed document.

use std::path::Path;

use log::debug;
use serde_json::Value;

use crate::error::SourceError;
use crate::xml::parse_xml;
use crate::Record;

/// Wrapper keys tried, in order, when a JSON object holds the record array.
const JSON_WRAPPER_KEYS: [&str; 6] = ["records", "data", "items", "rows", "results", "entries"];

const UTF8_BOM: char = '\u{feff}';

fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Turns `a.b[0].c` into the JSON pointer `/a/b/0/c`.
fn hint_to_pointer(hint: &str) -> String {
    hint.replace('[', ".")
        .replace(']', "")
        .split('.')
        .filter(|t| !t.is_empty())
        .map(|t| format!("/{}", escape_pointer_token(t)))
        .collect()
}

fn first_array_pointer(value: &Value, pointer: &mut String) -> bool {
    match value {
        Value::Array(_) => true,
        Value::Object(map) => {
            for (key, child) in map {
                let len = pointer.len();
                pointer.push('/');
                pointer.push_str(&escape_pointer_token(key));
                if first_array_pointer(child, pointer) {
                    return true;
                }
                pointer.truncate(len);
            }
            false
        }
        _ => false,
    }
}

/// Extracts the record sequence from a parsed document tree.
///
/// With a `path_hint` (`a.b[0].c`), the addressed node must be an array (its items
/// are the records) or an object (a single record). Without a hint, the first array
/// found depth-first is used, falling back to the whole document as one record.
pub fn find_records(mut root: Value, path_hint: Option<&str>) -> Result<Vec<Record>, SourceError> {
    if let Some(hint) = path_hint.filter(|h| !h.trim().is_empty()) {
        let pointer = hint_to_pointer(hint);
        return match root.pointer_mut(&pointer).map(Value::take) {
            Some(Value::Array(items)) => Ok(items),
            Some(node @ Value::Object(_)) => Ok(vec![node]),
            _ => Err(SourceError::RecordPath {
                path: hint.to_string(),
                message: "did not resolve to an array or object".to_string(),
            }),
        };
    }

    let mut pointer = String::new();
    if first_array_pointer(&root, &mut pointer) {
        debug!("Using first array found at '{}'", pointer);
        if let Some(Value::Array(items)) = root.pointer_mut(&pointer).map(Value::take) {
            return Ok(items);
        }
    }
    Ok(vec![root])
}

/// Extracts records from JSON text.
///
/// Accepts a top-level array, an object wrapping the array under one of the common
/// keys (`records`, `data`, `items`, `rows`, `results`, `entries`), or a single
/// object. A leading UTF-8 byte order mark is ignored.
pub fn parse_json_records(text: &str, path_hint: Option<&str>) -> Result<Vec<Record>, SourceError> {
    let text = text.strip_prefix(UTF8_BOM).unwrap_or(text);
    let mut data: Value = serde_json::from_str(text)?;

    if let Some(hint) = path_hint.filter(|h| !h.trim().is_empty()) {
        let mut current = &mut data;
        for key in hint.split('.') {
            let next = match current {
                Value::Object(map) => map.get_mut(key),
                Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
                _ => None,
            };
            current = next.ok_or_else(|| SourceError::RecordPath {
                path: hint.to_string(),
                message: "not found in JSON data".to_string(),
            })?;
        }
        return Ok(match current.take() {
            Value::Array(items) => items,
            other => vec![other],
        });
    }

    match data {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => {
            for key in JSON_WRAPPER_KEYS {
                if matches!(map.get(key), Some(Value::Array(_)))
                    && let Some(Value::Array(items)) = map.remove(key)
                {
                    return Ok(items);
                }
            }
            Ok(vec![Value::Object(map)])
        }
        _ => Err(SourceError::InvalidInput(
            "expected an array or an object with records".to_string(),
        )),
    }
}

/// Reads the whole input file and extracts its records.
///
/// Files with a `.json` extension are parsed as JSON, everything else as XML.
pub async fn load_records(
    path: impl AsRef<Path>,
    path_hint: Option<&str>,
) -> Result<Vec<Record>, SourceError> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path).await?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    if is_json {
        parse_json_records(&text, path_hint)
    } else {
        let text = text.strip_prefix(UTF8_BOM).unwrap_or(&text);
        find_records(parse_xml(text)?, path_hint)
    }
}

/// Converts one streamed `<tag>…</tag>` fragment into a record.
///
/// The record is the content of the element itself, not the `{tag: …}` wrapper.
pub fn fragment_record(fragment: &[u8], tag: &str) -> Result<Record, SourceError> {
    let text = std::str::from_utf8(fragment)?;
    let mut node = parse_xml(text)?;
    let inner = match &mut node {
        Value::Object(map) => map.remove(tag),
        _ => None,
    };
    Ok(inner.unwrap_or(node))
}
