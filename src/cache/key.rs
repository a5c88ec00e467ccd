//! Cache key derivation
//!
//! Keys have the shape `prefix + endpoint + "_" + canonical_json(params)`.
//! Parameters are serialized with sorted keys at every nesting level, so two
//! logically identical parameter sets always map to the same entry.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

/// Path segment that introduces a user id in user-scoped endpoints
pub const USER_SCOPE_SEGMENT: &str = "users";

/// Request parameters of an endpoint call
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    /// Empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a parameter
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), canonicalize(value.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Canonical JSON text of the parameters
    pub fn to_canonical_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        map.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

/// Rebuild objects with their keys in sorted order, recursively
///
/// `serde_json::Map` only sorts when the `preserve_order` feature is off,
/// and any crate in the graph can turn it on.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Derives cache keys under a fixed namespace prefix
#[derive(Debug, Clone)]
pub struct KeyCodec {
    prefix: String,
}

impl KeyCodec {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key for an endpoint call
    pub fn encode(&self, endpoint: &str, params: &Params) -> String {
        format!("{}{}_{}", self.prefix, endpoint, params.to_canonical_json())
    }

    /// Whether a key belongs to this cache's namespace
    pub fn owns(&self, key: &str) -> bool {
        key.starts_with(&self.prefix)
    }

    /// Endpoint part of a key produced by [`encode`](Self::encode)
    ///
    /// Parameters always serialize as a JSON object, so the endpoint ends at
    /// the first `_{`.
    pub fn endpoint_of<'k>(&self, key: &'k str) -> Option<&'k str> {
        let rest = key.strip_prefix(self.prefix.as_str())?;
        rest.split_once("_{").map(|(endpoint, _)| endpoint)
    }
}

/// User id encoded in an endpoint path, if any
///
/// Follows the `/users/{id}/...` convention. Matching is per path segment, so
/// `/users/12/grades` belongs to user `12` and never to user `1`.
pub fn user_scope_of(endpoint: &str) -> Option<String> {
    let path = endpoint.split(['?', '#']).next().unwrap_or(endpoint);
    let mut segments = path.split('/').filter(|s| !s.is_empty());

    while let Some(segment) = segments.next() {
        if segment == USER_SCOPE_SEGMENT {
            return segments.next().map(str::to_string);
        }
    }
    None
}
