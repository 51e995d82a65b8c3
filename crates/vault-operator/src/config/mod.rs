//! The Vault server configuration document.
//!
//! The document is the opaque `spec.config` object of a `Vault` resource. The
//! operator only looks at a handful of stanzas, see [`stanza`], and derives
//! the facts every other component relies on from them ([`DerivedFacts`]).

use serde::Serialize;
use serde_json::{Map, Value};
use snafu::{ResultExt, Snafu};
use strum::Display;

pub mod ha;
pub mod stanza;

use stanza::StanzaError;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Snafu)]
pub enum Error {
    #[snafu(display("invalid storage configuration"))]
    InvalidStorage { source: StanzaError },

    #[snafu(display("invalid HA storage configuration"))]
    InvalidHaStorage { source: StanzaError },
}

/// The scheme used to reach the Vault API.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ApiScheme {
    Http,
    Https,
}

/// Facts derived from the configuration document.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedFacts {
    /// Backend type of the `storage` stanza, empty if none is declared.
    pub storage_type: String,

    /// Backend type of the `ha_storage` stanza, empty if none is declared.
    pub ha_storage_type: String,

    /// Whether the deployment is highly available.
    pub ha_storage: bool,

    pub tls_disabled: bool,
    pub telemetry_unauthenticated: bool,
    pub api_scheme: ApiScheme,

    /// Whether a `seal` stanza configures auto-unseal.
    pub auto_unseal: bool,

    pub raft_storage: bool,

    /// Raft is used as HA storage next to a different `storage` backend.
    pub raft_ha_storage: bool,
}

/// A Vault configuration document whose `storage` and `ha_storage` stanzas
/// declare at most one backend each.
///
/// Every accessor is infallible: the stanzas are validated once, when the
/// document is constructed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VaultConfig {
    document: Map<String, Value>,
    storage_type: String,
    ha_storage_type: String,
}

impl VaultConfig {
    /// Wraps `document`, which is treated as empty if it is not a JSON object.
    pub fn new(document: Value) -> Result<Self> {
        let document = match document {
            Value::Object(document) => document,
            _ => Map::new(),
        };

        let storage_type =
            stanza::backend_type(stanza::STORAGE, stanza::stanza(&document, stanza::STORAGE))
                .context(InvalidStorageSnafu)?
                .to_owned();
        let ha_storage_type = stanza::backend_type(
            stanza::HA_STORAGE,
            stanza::stanza(&document, stanza::HA_STORAGE),
        )
        .context(InvalidHaStorageSnafu)?
        .to_owned();

        Ok(Self {
            document,
            storage_type,
            ha_storage_type,
        })
    }

    pub fn document(&self) -> &Map<String, Value> {
        &self.document
    }

    /// The parameters of the active `storage` backend.
    pub fn storage(&self) -> &Map<String, Value> {
        self.backend_params(stanza::STORAGE)
    }

    /// The parameters of the active `ha_storage` backend.
    pub fn ha_storage(&self) -> &Map<String, Value> {
        self.backend_params(stanza::HA_STORAGE)
    }

    pub fn storage_type(&self) -> &str {
        &self.storage_type
    }

    pub fn ha_storage_type(&self) -> &str {
        &self.ha_storage_type
    }

    /// Whether Vault runs highly available, see [`ha::has_ha_storage`].
    pub fn has_ha_storage(&self) -> bool {
        ha::has_ha_storage(
            &self.storage_type,
            self.storage(),
            stanza::stanza(&self.document, stanza::HA_STORAGE),
        )
    }

    /// Whether `ha_enabled` is asserted by the `storage` backend.
    pub fn has_storage_ha_enabled(&self) -> bool {
        ha::storage_ha_enabled(&self.storage_type, self.storage())
    }

    pub fn is_tls_disabled(&self) -> bool {
        stanza::as_bool(self.tcp_listener().get("tls_disable"))
    }

    /// Whether the telemetry endpoint can be accessed without a token.
    pub fn is_telemetry_unauthenticated(&self) -> bool {
        let telemetry = stanza::as_map(self.tcp_listener().get("telemetry"));
        stanza::as_bool(telemetry.get("unauthenticated_metrics_access"))
    }

    pub fn api_scheme(&self) -> ApiScheme {
        if self.is_tls_disabled() {
            ApiScheme::Http
        } else {
            ApiScheme::Https
        }
    }

    /// Auto-unseal is configured by the mere presence of a `seal` stanza.
    pub fn is_auto_unseal(&self) -> bool {
        self.document.contains_key(stanza::SEAL)
    }

    pub fn is_raft_storage(&self) -> bool {
        self.storage_type == "raft"
    }

    pub fn is_raft_ha_storage(&self) -> bool {
        self.storage_type != "raft" && self.ha_storage_type == "raft"
    }

    pub fn facts(&self) -> DerivedFacts {
        DerivedFacts {
            storage_type: self.storage_type.clone(),
            ha_storage_type: self.ha_storage_type.clone(),
            ha_storage: self.has_ha_storage(),
            tls_disabled: self.is_tls_disabled(),
            telemetry_unauthenticated: self.is_telemetry_unauthenticated(),
            api_scheme: self.api_scheme(),
            auto_unseal: self.is_auto_unseal(),
            raft_storage: self.is_raft_storage(),
            raft_ha_storage: self.is_raft_ha_storage(),
        }
    }

    fn backend_params(&self, name: &str) -> &Map<String, Value> {
        // Validated in `new`, a second backend can't show up here.
        stanza::backend_params(name, stanza::stanza(&self.document, name))
            .unwrap_or_else(|_| stanza::as_map(None))
    }

    fn tcp_listener(&self) -> &Map<String, Value> {
        stanza::as_map(stanza::stanza(&self.document, stanza::LISTENER).get("tcp"))
    }
}

impl TryFrom<Value> for VaultConfig {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Self::new(value)
    }
}
