use crate::exception::ExcInfo;
use crate::level::LogLevel;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

/// A single field value carried by an [`EventDict`].
///
/// Most values are plain JSON. Raw byte strings are kept apart so the
/// structured chain can decode them explicitly before encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// Borrow the value as a string slice, if it is a JSON string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Value(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Truthiness of flag fields such as `stack_info`; zero and empty values are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            FieldValue::Value(Value::Null) => false,
            FieldValue::Value(Value::Bool(b)) => *b,
            FieldValue::Value(Value::Number(n)) => n.as_f64().map_or(true, |f| f != 0.0),
            FieldValue::Value(Value::String(s)) => !s.is_empty(),
            FieldValue::Value(Value::Array(a)) => !a.is_empty(),
            FieldValue::Value(Value::Object(o)) => !o.is_empty(),
            FieldValue::Bytes(b) => !b.is_empty(),
        }
    }

    /// Quoted rendering used by the console renderer for `key=value`.
    pub fn to_display_string(&self) -> String {
        match self {
            FieldValue::Value(Value::String(s)) => format!("{:?}", s),
            FieldValue::Value(other) => other.to_string(),
            FieldValue::Bytes(b) => format!("b{:?}", String::from_utf8_lossy(b)),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Value(v) => v.serialize(serializer),
            FieldValue::Bytes(b) => serializer.serialize_str(&String::from_utf8_lossy(b)),
        }
    }
}

impl From<Value> for FieldValue {
    fn from(v: Value) -> Self {
        FieldValue::Value(v)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Value(Value::String(s.to_string()))
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Value(Value::String(s))
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Value(Value::Bool(b))
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Value(Value::from(n))
    }
}

impl From<u64> for FieldValue {
    fn from(n: u64) -> Self {
        FieldValue::Value(Value::from(n))
    }
}

impl From<i32> for FieldValue {
    fn from(n: i32) -> Self {
        FieldValue::Value(Value::from(n))
    }
}

impl From<u32> for FieldValue {
    fn from(n: u32) -> Self {
        FieldValue::Value(Value::from(n))
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Value(Value::from(n))
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(b: Vec<u8>) -> Self {
        FieldValue::Bytes(b)
    }
}

/// Structured log record passed through the processor chain.
///
/// Fields keep insertion order. The level of the originating call and the
/// pending exception travel alongside the fields rather than inside them,
/// since neither is serializable as-is.
#[derive(Debug, Clone)]
pub struct EventDict {
    level: LogLevel,
    fields: Vec<(String, FieldValue)>,
    pub exc_info: Option<ExcInfo>,
}

impl EventDict {
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            fields: Vec::new(),
            exc_info: None,
        }
    }

    /// Shorthand for a record holding only an `event` message.
    pub fn with_event(level: LogLevel, event: impl Into<String>) -> Self {
        let mut dict = Self::new(level);
        dict.insert("event", event.into());
        dict
    }

    /// Level of the log call that produced this record.
    pub fn method_level(&self) -> LogLevel {
        self.level
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FieldValue::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == key)
    }

    /// Insert or replace a field. Replacing keeps the original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Option<FieldValue> {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.fields.push((key, value));
                None
            }
        }
    }

    /// Insert only when the key is absent.
    pub fn set_default(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        let key = key.into();
        if !self.contains_key(&key) {
            self.fields.push((key, value.into()));
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        let idx = self.fields.iter().position(|(k, _)| k == key)?;
        Some(self.fields.remove(idx).1)
    }

    /// Put `extra` in front of the existing fields. Keys already present win.
    pub fn prepend(&mut self, extra: impl IntoIterator<Item = (String, FieldValue)>) {
        let mut merged: Vec<(String, FieldValue)> = extra
            .into_iter()
            .filter(|(k, _)| !self.contains_key(k))
            .collect();
        merged.append(&mut self.fields);
        self.fields = merged;
    }

    /// Move the named keys, in the given order, to the front of the record.
    pub fn move_to_front(&mut self, keys: &[&str]) {
        let mut front = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(idx) = self.fields.iter().position(|(k, _)| k == key) {
                front.push(self.fields.remove(idx));
            }
        }
        front.append(&mut self.fields);
        self.fields = front;
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut FieldValue)> {
        self.fields.iter_mut().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for EventDict {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_in_place() {
        let mut dict = EventDict::new(LogLevel::Info);
        dict.insert("a", 1i64);
        dict.insert("b", 2i64);
        let old = dict.insert("a", 3i64);
        assert_eq!(old, Some(FieldValue::from(1i64)));
        assert_eq!(dict.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn prepend_keeps_existing_values() {
        let mut dict = EventDict::with_event(LogLevel::Info, "hi");
        dict.insert("user", "event-side");
        dict.prepend(vec![
            ("request_id".to_string(), FieldValue::from("r1")),
            ("user".to_string(), FieldValue::from("ctx-side")),
        ]);
        assert_eq!(dict.keys().collect::<Vec<_>>(), vec!["request_id", "event", "user"]);
        assert_eq!(dict.get_str("user"), Some("event-side"));
    }

    #[test]
    fn move_to_front_skips_missing_keys() {
        let mut dict = EventDict::new(LogLevel::Info);
        dict.insert("extra", "x");
        dict.insert("event", "hi");
        dict.move_to_front(&["timestamp", "level", "event"]);
        assert_eq!(dict.keys().collect::<Vec<_>>(), vec!["event", "extra"]);
    }

    #[test]
    fn serializes_in_insertion_order() {
        let mut dict = EventDict::new(LogLevel::Info);
        dict.insert("z", 1i64);
        dict.insert("a", FieldValue::Bytes(b"raw".to_vec()));
        assert_eq!(serde_json::to_string(&dict).unwrap(), r#"{"z":1,"a":"raw"}"#);
    }
}
