//! XML → JSON tree conversion for Shopping API responses.
//!
//! Elements become object keys. An element that repeats under the same
//! parent becomes an array; a single occurrence stays a plain value, so the
//! same field can arrive in either shape depending on the item. Attributes
//! are stored as `@name`, and text next to attributes or children as `#text`.
//! Empty elements become `null`.

use quick_xml::events::{BytesStart, Event};
use serde_json::{Map, Value};

use crate::error::{AppError, Result};

struct Frame {
    name: String,
    fields: Map<String, Value>,
    text: String,
}

impl Frame {
    fn open(start: &BytesStart<'_>) -> Result<Self> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut fields = Map::new();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| AppError::Xml(e.to_string()))?;
            let key = format!("@{}", String::from_utf8_lossy(attr.key.as_ref()));
            let value = attr
                .unescape_value()
                .map_err(|e| AppError::Xml(e.to_string()))?
                .into_owned();
            fields.insert(key, Value::String(value));
        }
        Ok(Self {
            name,
            fields,
            text: String::new(),
        })
    }

    fn close(self) -> (String, Value) {
        let text = self.text.trim();
        let value = if self.fields.is_empty() {
            if text.is_empty() {
                Value::Null
            } else {
                Value::String(text.to_string())
            }
        } else {
            let mut fields = self.fields;
            if !text.is_empty() {
                fields.insert("#text".to_string(), Value::String(text.to_string()));
            }
            Value::Object(fields)
        };
        (self.name, value)
    }
}

/// Insert `value` under `key`, promoting to an array on repeats.
fn insert_child(fields: &mut Map<String, Value>, key: String, value: Value) {
    match fields.get_mut(&key) {
        None => {
            fields.insert(key, value);
        }
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
    }
}

/// Parse an XML document into `{root_name: value}`.
pub fn xml_to_value(xml: &str) -> Result<Value> {
    let mut reader = quick_xml::Reader::from_str(xml);
    let mut stack: Vec<Frame> = Vec::new();
    let mut root = Map::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(Frame::open(&e)?),
            Ok(Event::Empty(e)) => {
                let (name, value) = Frame::open(&e)?.close();
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.fields, name, value),
                    None => insert_child(&mut root, name, value),
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(top) = stack.last_mut() {
                    let text = e.unescape().map_err(|e| AppError::Xml(e.to_string()))?;
                    top.text.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                let frame = stack
                    .pop()
                    .ok_or_else(|| AppError::Xml("unbalanced closing tag".to_string()))?;
                let (name, value) = frame.close();
                match stack.last_mut() {
                    Some(parent) => insert_child(&mut parent.fields, name, value),
                    None => insert_child(&mut root, name, value),
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(AppError::Xml(e.to_string())),
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(AppError::Xml("document ended inside an element".to_string()));
    }
    if root.is_empty() {
        return Err(AppError::Xml("document has no root element".to_string()));
    }
    Ok(Value::Object(root))
}
