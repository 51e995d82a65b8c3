//! Deep merging of operator generated fragments into user supplied JSON
//! documents.
//!
//! There is exactly one precedence rule: keys that already exist in the
//! target win. Maps present on both sides are merged recursively, every other
//! conflict leaves the target untouched. Lists are never merged element-wise.

use serde_json::{Map, Value};

use crate::config::stanza::SERVICE_REGISTRATION;

/// Merges `fragment` into `target` without overwriting any key `target`
/// already defines, at any depth.
pub fn merge_missing(target: &mut Map<String, Value>, fragment: Map<String, Value>) {
    for (key, value) in fragment {
        match target.get_mut(&key) {
            None => {
                target.insert(key, value);
            }
            Some(Value::Object(existing)) => match value {
                Value::Object(value) => merge_missing(existing, value),
                _ => tracing::debug!(key = %key, "keeping user defined map"),
            },
            Some(_) => tracing::debug!(key = %key, "keeping user defined value"),
        }
    }
}

/// The `service_registration` stanza registering Vault pods with Kubernetes
/// in `namespace`.
pub fn service_registration_fragment(namespace: &str) -> Map<String, Value> {
    let mut kubernetes = Map::new();
    kubernetes.insert("namespace".to_owned(), Value::from(namespace));

    let mut service_registration = Map::new();
    service_registration.insert("kubernetes".to_owned(), Value::Object(kubernetes));

    let mut fragment = Map::new();
    fragment.insert(
        SERVICE_REGISTRATION.to_owned(),
        Value::Object(service_registration),
    );
    fragment
}

/// Returns a copy of `document` with the Kubernetes service registration for
/// `namespace` merged in. The user's own `service_registration` settings win.
pub fn merge_service_registration(
    document: &Map<String, Value>,
    namespace: &str,
) -> Map<String, Value> {
    let mut merged = document.clone();
    merge_missing(&mut merged, service_registration_fragment(namespace));
    merged
}
