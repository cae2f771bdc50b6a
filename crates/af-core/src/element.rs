use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A tagged value flowing through the pipeline.
///
/// The tag selects which rule groups apply; the payload is a heterogeneous
/// key/value map that rules pattern-match on. The pipeline itself never
/// interprets payload contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub tag: String,
    pub payload: Map<String, Value>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            payload: Map::new(),
        }
    }

    /// Builder-style payload entry.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.payload.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.payload.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_and_access() {
        let elem = Element::new("product")
            .with("provider", "casto")
            .with("count", 3);
        assert_eq!(elem.tag, "product");
        assert_eq!(elem.get_str("provider"), Some("casto"));
        assert_eq!(elem.get("count"), Some(&json!(3)));
        assert!(!elem.contains("missing"));
    }

    #[test]
    fn set_overwrites() {
        let mut elem = Element::new("t").with("k", "v1");
        elem.set("k", "v2");
        assert_eq!(elem.get_str("k"), Some("v2"));
    }
}
