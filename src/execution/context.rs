use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Context key holding the failure reason of a partition
pub const ERROR_KEY: &str = "batch.error";
/// Manager context key: grid size used for the plan
pub const GRID_SIZE_KEY: &str = "batch.gridSize";
/// Manager context key: all planned partition names
pub const PARTITIONS_KEY: &str = "batch.partitions";
/// Manager context key: partitions skipped because they already completed
pub const SKIPPED_KEY: &str = "batch.skipped";
/// Manager context key: partitions not completed after the run
pub const FAILED_KEY: &str = "batch.failed";

/// Opaque key/value state attached to one step execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext {
    values: BTreeMap<String, Value>,
}

impl ExecutionContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any previous one
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Insert any serializable value
    pub fn put_serialized<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<(), serde_json::Error> {
        self.values.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Raw value lookup
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// String value lookup
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Integer value lookup
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(Value::as_i64)
    }

    /// Deserialize a value into `T`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<Result<T, serde_json::Error>> {
        self.values
            .get(key)
            .map(|v| serde_json::from_value(v.clone()))
    }

    /// Whether the key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Remove a key, returning its value
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the context is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate entries in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// JSON representation used by the persistent stores
    pub fn to_json(&self) -> Value {
        Value::Object(self.values.clone().into_iter().collect())
    }

    /// Rebuild from the JSON representation
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ExecutionContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_accessors() {
        let mut ctx = ExecutionContext::new();
        ctx.put("data", "data2");
        ctx.put("index", 2);

        assert_eq!(ctx.get_str("data"), Some("data2"));
        assert_eq!(ctx.get_i64("index"), Some(2));
        assert_eq!(ctx.get_str("index"), None);
        assert!(ctx.contains_key("data"));
        assert_eq!(ctx.len(), 2);
    }

    #[test]
    fn test_serialized_values() {
        let mut ctx = ExecutionContext::new();
        ctx.put_serialized("names", &vec!["partition0", "partition1"]).unwrap();
        let names: Vec<String> = ctx.get_as("names").unwrap().unwrap();
        assert_eq!(names, vec!["partition0", "partition1"]);
        assert!(ctx.get_as::<String>("missing").is_none());
    }

    #[test]
    fn test_json_form_is_a_plain_object() {
        let ctx: ExecutionContext = [("data", json!("data0")), ("n", json!(1))]
            .into_iter()
            .collect();
        let value = ctx.to_json();
        assert_eq!(value, json!({"data": "data0", "n": 1}));
        assert_eq!(ExecutionContext::from_json(value).unwrap(), ctx);
    }
}
