use serde_json::{Map, Number, Value};

use crate::error::{DataError, DataResult};
use crate::protocol::{DataDeserializer, DataSerializer};

enum WriteFrame {
    Object(Map<String, Value>),
    Array(Vec<Value>),
}

/// Builds a `serde_json::Value` document. The root must be an object.
#[derive(Default)]
pub struct JsonSerializer {
    stack: Vec<WriteFrame>,
    keys: Vec<String>,
    root: Option<Value>,
}

impl JsonSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The finished document.
    pub fn into_value(self) -> DataResult<Value> {
        if !self.stack.is_empty() {
            return Err(DataError::Protocol(format!(
                "{} JSON containers still open",
                self.stack.len()
            )));
        }
        self.root
            .ok_or_else(|| DataError::Protocol("nothing was written".into()))
    }

    pub fn to_string_pretty(self) -> DataResult<String> {
        Ok(serde_json::to_string_pretty(&self.into_value()?)?)
    }

    fn put(&mut self, value: Value) -> DataResult<()> {
        match self.stack.last_mut() {
            Some(WriteFrame::Object(map)) => {
                let key = self
                    .keys
                    .last()
                    .ok_or_else(|| DataError::Protocol("object value without a key".into()))?;
                map.insert(key.clone(), value);
                Ok(())
            }
            Some(WriteFrame::Array(items)) => {
                items.push(value);
                Ok(())
            }
            None => Err(DataError::Protocol("JSON root must be an object".into())),
        }
    }

    fn close(&mut self, value: Value) -> DataResult<()> {
        if self.stack.is_empty() {
            self.root = Some(value);
            Ok(())
        } else {
            self.put(value)
        }
    }
}

fn float_value(value: f32) -> Value {
    // Go through the shortest decimal form so 0.1f32 stays 0.1.
    value
        .to_string()
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

impl DataSerializer for JsonSerializer {
    fn write_key(&mut self, key: &str) -> DataResult<()> {
        self.keys.push(key.to_string());
        Ok(())
    }

    fn write_array(&mut self) -> DataResult<()> {
        if self.stack.is_empty() {
            return Err(DataError::Protocol("JSON root must be an object".into()));
        }
        self.stack.push(WriteFrame::Array(Vec::new()));
        Ok(())
    }

    fn write_object(&mut self) -> DataResult<()> {
        if self.stack.is_empty() && self.root.is_some() {
            return Err(DataError::Protocol("JSON root already written".into()));
        }
        self.stack.push(WriteFrame::Object(Map::new()));
        Ok(())
    }

    fn write_u8(&mut self, value: u8) -> DataResult<()> {
        self.put(Value::from(value))
    }

    fn write_i32(&mut self, value: i32) -> DataResult<()> {
        self.put(Value::from(value))
    }

    fn write_i64(&mut self, value: i64) -> DataResult<()> {
        self.put(Value::from(value))
    }

    fn write_f32(&mut self, value: f32) -> DataResult<()> {
        self.put(float_value(value))
    }

    fn write_bool(&mut self, value: bool) -> DataResult<()> {
        self.put(Value::Bool(value))
    }

    fn write_string(&mut self, value: &str) -> DataResult<()> {
        self.put(Value::String(value.to_string()))
    }

    fn write_name(&mut self, value: &str) -> DataResult<()> {
        self.put(Value::String(value.to_lowercase()))
    }

    fn write_null(&mut self) -> DataResult<()> {
        self.put(Value::Null)
    }

    fn pop_key(&mut self, key: &str) -> DataResult<()> {
        match self.keys.pop() {
            Some(open) if open == key => Ok(()),
            open => Err(DataError::UnbalancedKey {
                expected: open,
                found: key.to_string(),
            }),
        }
    }

    fn pop_array(&mut self) -> DataResult<()> {
        match self.stack.pop() {
            Some(WriteFrame::Array(items)) => self.close(Value::Array(items)),
            Some(frame) => {
                self.stack.push(frame);
                Err(DataError::Protocol("pop_array with an object open".into()))
            }
            None => Err(DataError::Protocol("pop_array with nothing open".into())),
        }
    }

    fn pop_object(&mut self) -> DataResult<()> {
        match self.stack.pop() {
            Some(WriteFrame::Object(map)) => self.close(Value::Object(map)),
            Some(frame) => {
                self.stack.push(frame);
                Err(DataError::Protocol("pop_object with an array open".into()))
            }
            None => Err(DataError::Protocol("pop_object with nothing open".into())),
        }
    }
}

enum ReadFrame {
    Object {
        entries: Vec<(String, Value)>,
        cursor: Option<usize>,
        exhausted: bool,
    },
    Array {
        items: Vec<Value>,
        cursor: Option<usize>,
        exhausted: bool,
    },
}

/// Reads a `serde_json::Value` document through the probe protocol.
///
/// Each open container keeps its own cursor, so successive `read_key` or
/// `read_index` calls walk its children instead of restarting.
pub struct JsonDeserializer {
    root: Option<Value>,
    stack: Vec<ReadFrame>,
}

impl JsonDeserializer {
    pub fn new(root: Value) -> Self {
        Self {
            root: Some(root),
            stack: Vec::new(),
        }
    }

    pub fn parse(s: &str) -> DataResult<Self> {
        Ok(Self::new(serde_json::from_str(s)?))
    }

    /// Value under the current key or index of the innermost container, or
    /// the document root before anything was opened.
    fn current(&self) -> Option<&Value> {
        match self.stack.last() {
            None => self.root.as_ref(),
            Some(ReadFrame::Object {
                entries, cursor, ..
            }) => cursor.and_then(|i| entries.get(i)).map(|(_, v)| v),
            Some(ReadFrame::Array { items, cursor, .. }) => cursor.and_then(|i| items.get(i)),
        }
    }

    fn take_current(&mut self) -> Value {
        let slot = match self.stack.last_mut() {
            None => self.root.as_mut(),
            Some(ReadFrame::Object {
                entries, cursor, ..
            }) => cursor.and_then(|i| entries.get_mut(i)).map(|(_, v)| v),
            Some(ReadFrame::Array { items, cursor, .. }) => {
                cursor.and_then(|i| items.get_mut(i))
            }
        };
        slot.map(std::mem::take).unwrap_or(Value::Null)
    }

    fn read_number(&self) -> Option<f64> {
        self.current().and_then(Value::as_f64)
    }

    fn read_integer(&self) -> Option<i64> {
        let value = self.current()?;
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
    }
}

impl DataDeserializer for JsonDeserializer {
    fn read_key(&mut self) -> DataResult<Option<String>> {
        match self.stack.last_mut() {
            Some(ReadFrame::Object {
                entries,
                cursor,
                exhausted,
            }) => {
                debug_assert!(!*exhausted, "read_key on an exhausted JSON object");
                let next = cursor.map_or(0, |i| i + 1);
                if next < entries.len() {
                    *cursor = Some(next);
                    Ok(Some(entries[next].0.clone()))
                } else {
                    *cursor = None;
                    *exhausted = true;
                    Ok(None)
                }
            }
            _ => Ok(None),
        }
    }

    fn read_index(&mut self) -> DataResult<bool> {
        match self.stack.last_mut() {
            Some(ReadFrame::Array {
                items,
                cursor,
                exhausted,
            }) => {
                debug_assert!(!*exhausted, "read_index on an exhausted JSON array");
                let next = cursor.map_or(0, |i| i + 1);
                if next < items.len() {
                    *cursor = Some(next);
                    Ok(true)
                } else {
                    *cursor = None;
                    *exhausted = true;
                    Ok(false)
                }
            }
            _ => Ok(false),
        }
    }

    fn read_array(&mut self) -> DataResult<bool> {
        if !matches!(self.current(), Some(Value::Array(_))) {
            return Ok(false);
        }
        let Value::Array(items) = self.take_current() else {
            return Ok(false);
        };
        self.stack.push(ReadFrame::Array {
            items,
            cursor: None,
            exhausted: false,
        });
        Ok(true)
    }

    fn read_object(&mut self) -> DataResult<bool> {
        if !matches!(self.current(), Some(Value::Object(_))) {
            return Ok(false);
        }
        let Value::Object(map) = self.take_current() else {
            return Ok(false);
        };
        self.stack.push(ReadFrame::Object {
            entries: map.into_iter().collect(),
            cursor: None,
            exhausted: false,
        });
        Ok(true)
    }

    fn read_u8(&mut self) -> DataResult<Option<u8>> {
        Ok(self.read_integer().and_then(|v| u8::try_from(v).ok()))
    }

    fn read_i32(&mut self) -> DataResult<Option<i32>> {
        Ok(self.read_integer().and_then(|v| i32::try_from(v).ok()))
    }

    fn read_i64(&mut self) -> DataResult<Option<i64>> {
        Ok(self.read_integer())
    }

    fn read_f32(&mut self) -> DataResult<Option<f32>> {
        Ok(self.read_number().map(|v| v as f32))
    }

    fn read_bool(&mut self) -> DataResult<Option<bool>> {
        Ok(match self.current() {
            Some(Value::Bool(b)) => Some(*b),
            Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0),
            _ => None,
        })
    }

    fn read_string(&mut self) -> DataResult<Option<String>> {
        Ok(self.current().and_then(Value::as_str).map(str::to_string))
    }

    fn read_name(&mut self) -> DataResult<Option<String>> {
        Ok(self.current().and_then(Value::as_str).map(str::to_lowercase))
    }

    fn read_null(&mut self) -> DataResult<bool> {
        Ok(matches!(self.current(), Some(Value::Null)))
    }

    fn pop_key(&mut self, _key: &str) -> DataResult<()> {
        Ok(())
    }

    fn pop_index(&mut self) -> DataResult<()> {
        Ok(())
    }

    fn pop_array(&mut self) -> DataResult<()> {
        match self.stack.pop() {
            Some(ReadFrame::Array { .. }) => Ok(()),
            _ => Err(DataError::Protocol("pop_array without an open array".into())),
        }
    }

    fn pop_object(&mut self) -> DataResult<()> {
        match self.stack.pop() {
            Some(ReadFrame::Object { .. }) => Ok(()),
            _ => Err(DataError::Protocol("pop_object without an open object".into())),
        }
    }

    fn skip_value(&mut self) -> DataResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn writes_nested_document() {
        let mut s = JsonSerializer::new();
        s.write_object().unwrap();
        s.write_key("name").unwrap();
        s.write_name("Hero").unwrap();
        s.pop_key("name").unwrap();
        s.write_key("stats").unwrap();
        s.write_array().unwrap();
        s.write_i32(1).unwrap();
        s.write_object().unwrap();
        s.write_key("ok").unwrap();
        s.write_bool(true).unwrap();
        s.pop_key("ok").unwrap();
        s.pop_object().unwrap();
        s.write_null().unwrap();
        s.pop_array().unwrap();
        s.pop_key("stats").unwrap();
        s.write_key("ratio").unwrap();
        s.write_f32(0.1).unwrap();
        s.pop_key("ratio").unwrap();
        s.pop_object().unwrap();
        assert_eq!(
            s.into_value().unwrap(),
            json!({"name": "hero", "stats": [1, {"ok": true}, null], "ratio": 0.1})
        );
    }

    #[test]
    fn root_must_be_object() {
        let mut s = JsonSerializer::new();
        assert!(s.write_array().is_err());
        assert!(s.write_i32(1).is_err());
    }

    #[test]
    fn pop_key_must_match() {
        let mut s = JsonSerializer::new();
        s.write_object().unwrap();
        s.write_key("a").unwrap();
        assert!(matches!(
            s.pop_key("b"),
            Err(DataError::UnbalancedKey { .. })
        ));
    }

    #[test]
    fn unfinished_document_is_error() {
        let mut s = JsonSerializer::new();
        s.write_object().unwrap();
        assert!(s.into_value().is_err());
    }

    #[test]
    fn keys_advance_through_object() {
        let mut de = JsonDeserializer::new(json!({"a": 1, "b": "two", "c": [true, 0]}));
        assert!(de.read_object().unwrap());
        assert_eq!(de.read_key().unwrap().as_deref(), Some("a"));
        assert_eq!(de.read_i32().unwrap(), Some(1));
        assert_eq!(de.read_key().unwrap().as_deref(), Some("b"));
        assert_eq!(de.read_i32().unwrap(), None);
        assert_eq!(de.read_string().unwrap().as_deref(), Some("two"));
        assert_eq!(de.read_key().unwrap().as_deref(), Some("c"));
        assert!(de.read_array().unwrap());
        assert!(de.read_index().unwrap());
        assert_eq!(de.read_bool().unwrap(), Some(true));
        assert!(de.read_index().unwrap());
        assert_eq!(de.read_bool().unwrap(), Some(false));
        assert!(!de.read_index().unwrap());
        de.pop_array().unwrap();
        assert_eq!(de.read_key().unwrap(), None);
        de.pop_object().unwrap();
    }

    #[test]
    fn numbers_are_lenient() {
        let mut de = JsonDeserializer::new(json!({"f": 2.0, "i": 7, "big": 300}));
        assert!(de.read_object().unwrap());
        de.read_key().unwrap();
        assert_eq!(de.read_i32().unwrap(), Some(2));
        de.read_key().unwrap();
        assert_eq!(de.read_f32().unwrap(), Some(7.0));
        assert_eq!(de.read_i64().unwrap(), Some(7));
        de.read_key().unwrap();
        assert_eq!(de.read_u8().unwrap(), None);
        assert_eq!(de.read_i32().unwrap(), Some(300));
    }

    #[test]
    fn wrong_shape_probes_do_not_consume() {
        let mut de = JsonDeserializer::new(json!({"o": {"x": 1}}));
        assert!(de.read_object().unwrap());
        de.read_key().unwrap();
        assert!(!de.read_array().unwrap());
        assert!(!de.read_null().unwrap());
        assert!(de.read_object().unwrap());
        assert_eq!(de.read_key().unwrap().as_deref(), Some("x"));
    }

    #[test]
    fn root_array_is_not_an_object() {
        let mut de = JsonDeserializer::new(json!([1]));
        assert!(!de.read_object().unwrap());
        assert!(de.read_array().unwrap());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "read_key on an exhausted JSON object")]
    fn reentering_exhausted_object_panics_in_debug() {
        let mut de = JsonDeserializer::new(json!({"a": 1}));
        assert!(de.read_object().unwrap());
        assert_eq!(de.read_key().unwrap().as_deref(), Some("a"));
        assert_eq!(de.read_key().unwrap(), None);
        let _ = de.read_key();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "read_index on an exhausted JSON array")]
    fn reentering_exhausted_array_panics_in_debug() {
        let mut de = JsonDeserializer::new(json!({"a": [1]}));
        assert!(de.read_object().unwrap());
        de.read_key().unwrap();
        assert!(de.read_array().unwrap());
        assert!(de.read_index().unwrap());
        assert!(!de.read_index().unwrap());
        let _ = de.read_index();
    }
}
