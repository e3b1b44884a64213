//! JSON metadata stored in front of the call stream.
//!
//! The header is treated as an opaque provenance blob. The only structure this crate relies on is
//! the `conversions` array, to which every transformation appends one entry, and a few optional
//! replay hints (`defaultTid`, `threads[].winW`, `threads[].winH`).
use crate::TraceError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const CONVERSIONS: &str = "conversions";

/// One transformation applied to a trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversion {
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    #[serde(default)]
    pub tool_version: String,
    #[serde(default)]
    pub info: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    fields: Map<String, Value>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses header bytes. An empty header is an empty object.
    pub fn parse(bytes: &[u8]) -> Result<Self, TraceError> {
        if bytes.is_empty() {
            return Ok(Self::new());
        }
        let fields = serde_json::from_slice::<Map<String, Value>>(bytes)?;
        Ok(Self { fields })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // Serializing a map of JSON values cannot fail.
        serde_json::to_vec(&self.fields).unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(key.into(), value)
    }

    /// Returns the recorded transformation chain, oldest first. Malformed entries are skipped.
    pub fn conversions(&self) -> Vec<Conversion> {
        match self.fields.get(CONVERSIONS) {
            Some(Value::Array(entries)) => entries
                .iter()
                .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Appends a transformation to the chain. Existing entries are never replaced.
    pub fn add_conversion(&mut self, kind: &str, source: &str, info: Value) {
        let entry = Conversion {
            kind: kind.to_owned(),
            source: source.to_owned(),
            tool_version: env!("CARGO_PKG_VERSION").to_owned(),
            info,
        };
        let entry = serde_json::to_value(entry).unwrap_or(Value::Null);
        match self.fields.get_mut(CONVERSIONS) {
            Some(Value::Array(entries)) => entries.push(entry),
            Some(other) => {
                // Keep whatever was recorded before as the first entry of the chain.
                let previous = other.take();
                *other = Value::Array(vec![previous, entry]);
            }
            None => {
                self.fields
                    .insert(String::from(CONVERSIONS), Value::Array(vec![entry]));
            }
        }
    }

    pub fn default_tid(&self) -> Option<u32> {
        self.fields
            .get("defaultTid")
            .and_then(Value::as_u64)
            .and_then(|tid| u32::try_from(tid).ok())
    }

    /// Returns the recorded window size for `tid`, falling back to top-level `winW`/`winH`.
    pub fn surface_size(&self, tid: u32) -> Option<(u32, u32)> {
        let size = |object: &Map<String, Value>| {
            let width = object.get("winW")?.as_u64()?;
            let height = object.get("winH")?.as_u64()?;
            Some((u32::try_from(width).ok()?, u32::try_from(height).ok()?))
        };
        let threads = self.fields.get("threads").and_then(Value::as_array);
        threads
            .into_iter()
            .flatten()
            .filter_map(Value::as_object)
            .find(|thread| thread.get("id").and_then(Value::as_u64) == Some(tid as u64))
            .and_then(size)
            .or_else(|| size(&self.fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_conversions_are_appended() {
        let mut header =
            Header::parse(br#"{"glesVersion":3,"conversions":[{"type":"trim","source":"a.pat"}]}"#)
                .unwrap();
        header.add_conversion("inject_client_side_delete", "b.pat", json!({}));

        let conversions = header.conversions();
        assert_eq!(conversions.len(), 2);
        assert_eq!(conversions[0].kind, "trim");
        assert_eq!(conversions[1].kind, "inject_client_side_delete");
        assert_eq!(conversions[1].source, "b.pat");
        assert_eq!(header.get("glesVersion"), Some(&json!(3)));

        let reparsed = Header::parse(&header.to_bytes()).unwrap();
        assert_eq!(reparsed, header);
    }

    #[test]
    fn test_empty_and_invalid_headers() {
        assert_eq!(Header::parse(b"").unwrap(), Header::new());
        assert!(matches!(
            Header::parse(b"[1, 2]"),
            Err(TraceError::BadHeader(_))
        ));
    }

    #[test]
    fn test_surface_size_hints() {
        let header = Header::parse(
            br#"{"defaultTid":2,"winW":100,"winH":50,"threads":[{"id":2,"winW":1920,"winH":1080}]}"#,
        )
        .unwrap();
        assert_eq!(header.default_tid(), Some(2));
        assert_eq!(header.surface_size(2), Some((1920, 1080)));
        assert_eq!(header.surface_size(7), Some((100, 50)));
        assert_eq!(Header::new().surface_size(0), None);
    }
}
