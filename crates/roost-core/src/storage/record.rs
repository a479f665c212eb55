//! Untyped table records
//!
//! A record is a JSON object carrying `id`, `createdAt` and `updatedAt`
//! next to its domain fields. Typed access goes through [`crate::models`].

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const ID: &str = "id";
pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";

/// One row of a table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Build a record from a JSON value, which must be an object
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// The record id as a string
    ///
    /// Numeric ids written by other clients are accepted and compared by
    /// their decimal form.
    pub fn id(&self) -> Option<String> {
        match self.0.get(ID)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn has_id(&self, id: &str) -> bool {
        self.id().as_deref() == Some(id)
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.0.insert(ID.to_string(), Value::String(id.into()));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn created_at(&self) -> Option<&str> {
        self.0.get(CREATED_AT).and_then(Value::as_str)
    }

    pub fn updated_at(&self) -> Option<&str> {
        self.0.get(UPDATED_AT).and_then(Value::as_str)
    }

    /// Fill in `id`, `createdAt` and `updatedAt` where absent
    pub fn ensure_metadata(&mut self, now: DateTime<Utc>) {
        if self.id().is_none() {
            self.set_id(generate_id());
        }
        let stamp = Value::String(timestamp(now));
        self.0
            .entry(CREATED_AT)
            .or_insert_with(|| stamp.clone());
        self.0.entry(UPDATED_AT).or_insert(stamp);
    }

    /// Shallow-merge `patch` over this record and bump `updatedAt`
    ///
    /// `id` and `createdAt` are never taken from the patch.
    pub fn apply_patch(&mut self, patch: &Map<String, Value>, now: DateTime<Utc>) {
        for (key, value) in patch {
            if key == ID || key == CREATED_AT {
                continue;
            }
            self.0.insert(key.clone(), value.clone());
        }
        self.touch(now);
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.0
            .insert(UPDATED_AT.to_string(), Value::String(timestamp(now)));
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Generate a process-local pseudo-unique id: base36 millis + random suffix
pub fn generate_id() -> String {
    let millis = Utc::now().timestamp_millis().max(0) as u64;
    let suffix: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(9)
        .collect();
    format!("{}{}", to_base36(millis), suffix)
}

pub fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[test]
    fn test_generate_id_shape() {
        let a = generate_id();
        let b = generate_id();
        assert_ne!(a, b);
        assert!(a.len() > 9);
        assert!(a
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }

    #[test]
    fn test_ensure_metadata_keeps_existing() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let mut rec = record(json!({"id": "p1", "createdAt": "2020-01-01T00:00:00.000Z"}));
        rec.ensure_metadata(now);

        assert_eq!(rec.id().as_deref(), Some("p1"));
        assert_eq!(rec.created_at(), Some("2020-01-01T00:00:00.000Z"));
        assert_eq!(rec.updated_at(), Some("2025-03-01T12:00:00.000Z"));
    }

    #[test]
    fn test_ensure_metadata_assigns_id() {
        let mut rec = record(json!({"name": "Blue Bar"}));
        rec.ensure_metadata(Utc::now());
        assert!(rec.id().is_some());
        assert_eq!(rec.created_at(), rec.updated_at());
    }

    #[test]
    fn test_numeric_ids() {
        let rec = record(json!({"id": 7}));
        assert!(rec.has_id("7"));
        assert!(!record(json!({"id": ""})).id().is_some());
    }

    #[test]
    fn test_apply_patch_protects_identity() {
        let now = Utc.with_ymd_and_hms(2025, 3, 2, 8, 30, 0).unwrap();
        let mut rec = record(json!({
            "id": "p1",
            "createdAt": "2025-03-01T00:00:00.000Z",
            "name": "Old"
        }));
        let patch = json!({"id": "hijack", "createdAt": "1999", "name": "New", "color": "red"});
        rec.apply_patch(patch.as_object().unwrap(), now);

        assert_eq!(rec.id().as_deref(), Some("p1"));
        assert_eq!(rec.created_at(), Some("2025-03-01T00:00:00.000Z"));
        assert_eq!(rec.get("name"), Some(&json!("New")));
        assert_eq!(rec.get("color"), Some(&json!("red")));
        assert_eq!(rec.updated_at(), Some("2025-03-02T08:30:00.000Z"));
    }
}
