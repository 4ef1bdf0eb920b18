//! Composite cache keys.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Query parameters that scope a cache entry.
///
/// Backed by a sorted map, so insertion order never affects the composite
/// key: `{boardId, status}` and `{status, boardId}` address the same entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
    self.0.insert(name.into(), value.into());
    self
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

/// Build the composite key for `base` scoped by `params`.
///
/// Nested objects are serialized with sorted keys as well, since
/// `serde_json::Map` is ordered.
pub fn compose(base: &str, params: &Params) -> String {
  if params.is_empty() {
    return base.to_string();
  }
  let object: Map<String, Value> = params
    .0
    .iter()
    .map(|(k, v)| (k.clone(), v.clone()))
    .collect();
  format!("{}:{}", base, Value::Object(object))
}
