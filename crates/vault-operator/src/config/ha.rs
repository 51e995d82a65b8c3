//! High availability classification of the Vault storage configuration.

use serde_json::{Map, Value};

use crate::config::stanza;

/// Storage backends which support High Availability.
pub const HA_STORAGE_TYPES: &[&str] = &[
    "consul",
    "dynamodb",
    "etcd",
    "gcs",
    "mysql",
    "postgresql",
    "raft",
    "oci",
    "spanner",
    "zookeeper",
];

/// Storage backends which run in HA mode whether or not `ha_enabled` is set.
const ALWAYS_HA_STORAGE_TYPES: &[&str] = &["consul", "raft"];

/// Returns whether `storage_type` is able to run in HA mode at all.
pub fn supports_ha(storage_type: &str) -> bool {
    HA_STORAGE_TYPES.contains(&storage_type)
}

/// Returns whether the `storage` backend asserts HA mode, either because
/// `ha_enabled` is set in its parameters or because the backend is always HA.
pub fn storage_ha_enabled(storage_type: &str, params: &Map<String, Value>) -> bool {
    ALWAYS_HA_STORAGE_TYPES.contains(&storage_type) || stanza::as_bool(params.get("ha_enabled"))
}

/// Combines both signals for a highly available deployment:
///
/// 1. the `storage` backend supports HA and has it enabled, or
/// 2. a non-empty `ha_storage` stanza is present, whatever its backend type.
pub fn has_ha_storage(
    storage_type: &str,
    storage_params: &Map<String, Value>,
    ha_storage: &Map<String, Value>,
) -> bool {
    let storage_is_ha =
        supports_ha(storage_type) && storage_ha_enabled(storage_type, storage_params);
    let has_ha_storage_stanza = !ha_storage.is_empty();

    storage_is_ha || has_ha_storage_stanza
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[rstest]
    #[case("consul", json!({}), true)]
    #[case("raft", json!({}), true)]
    #[case("raft", json!({"ha_enabled": false}), true)]
    #[case("etcd", json!({}), false)]
    #[case("etcd", json!({"ha_enabled": "true"}), true)]
    #[case("dynamodb", json!({"ha_enabled": true}), true)]
    #[case("gcs", json!({"ha_enabled": false}), false)]
    #[case("mysql", json!({"ha_enabled": "false"}), false)]
    #[case("postgresql", json!({"ha_enabled": true}), true)]
    #[case("oci", json!({}), false)]
    #[case("spanner", json!({"ha_enabled": "1"}), true)]
    #[case("zookeeper", json!({"ha_enabled": true}), true)]
    fn ha_table_members(
        #[case] storage_type: &str,
        #[case] params: Value,
        #[case] expected: bool,
    ) {
        assert!(supports_ha(storage_type));
        assert_eq!(
            has_ha_storage(storage_type, &map(params), &Map::new()),
            expected
        );
    }

    #[rstest]
    #[case("file")]
    #[case("inmem")]
    #[case("s3")]
    #[case("")]
    fn non_ha_backends_ignore_ha_enabled(#[case] storage_type: &str) {
        let params = map(json!({"ha_enabled": true}));
        assert!(!supports_ha(storage_type));
        assert!(!has_ha_storage(storage_type, &params, &Map::new()));
    }

    #[test]
    fn ha_storage_stanza_is_enough() {
        let ha_storage = map(json!({"file": {}}));
        assert!(has_ha_storage("s3", &Map::new(), &ha_storage));
        assert!(has_ha_storage("", &Map::new(), &ha_storage));
    }

    #[test]
    fn empty_ha_storage_stanza_is_ignored() {
        assert!(!has_ha_storage("s3", &Map::new(), &Map::new()));
    }
}
