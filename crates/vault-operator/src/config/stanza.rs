//! Access to the named stanzas of the Vault configuration document.
//!
//! A stanza like `storage` is by convention a map with a single key naming the
//! active backend, e.g. `{"raft": {"path": "/vault/file"}}`. Missing or
//! malformed stanzas degrade to neutral values (an empty map, an empty
//! backend type, `false`), as the document is validated before it ever
//! reaches the operator.

use std::sync::LazyLock;

use serde_json::{Map, Value};
use snafu::Snafu;

pub const STORAGE: &str = "storage";
pub const HA_STORAGE: &str = "ha_storage";
pub const LISTENER: &str = "listener";
pub const SEAL: &str = "seal";
pub const SERVICE_REGISTRATION: &str = "service_registration";

static EMPTY_MAP: LazyLock<Map<String, Value>> = LazyLock::new(Map::new);

#[derive(Debug, PartialEq, Snafu)]
pub enum StanzaError {
    #[snafu(display(
        "the {stanza:?} stanza must declare exactly one backend, found {}: {backends:?}",
        backends.len()
    ))]
    AmbiguousBackend {
        stanza: String,
        backends: Vec<String>,
    },
}

/// The backend declared by a single-key stanza.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Backend<'a> {
    /// The stanza is absent, not a map or empty.
    Undeclared,

    /// The stanza names exactly one backend.
    Declared {
        kind: &'a str,
        params: &'a Map<String, Value>,
    },
}

impl<'a> Backend<'a> {
    /// Reads the backend declared by `stanza`, which is called `name` in the
    /// document.
    ///
    /// Map keys carry no meaningful order, so a stanza declaring more than one
    /// backend is rejected instead of picking one of them arbitrarily.
    pub fn from_stanza(name: &str, stanza: &'a Map<String, Value>) -> Result<Self, StanzaError> {
        let mut entries = stanza.iter();
        match (entries.next(), entries.next()) {
            (None, _) => Ok(Self::Undeclared),
            (Some((kind, params)), None) => Ok(Self::Declared {
                kind: kind.as_str(),
                params: as_map(Some(params)),
            }),
            (Some(_), Some(_)) => {
                let mut backends = stanza.keys().cloned().collect::<Vec<_>>();
                backends.sort();
                AmbiguousBackendSnafu {
                    stanza: name,
                    backends,
                }
                .fail()
            }
        }
    }

    /// The backend type, or the empty string if no backend is declared.
    pub fn kind(&self) -> &'a str {
        match *self {
            Self::Undeclared => "",
            Self::Declared { kind, .. } => kind,
        }
    }

    /// The parameters of the backend, or an empty map if no backend is declared.
    pub fn params(&self) -> &'a Map<String, Value> {
        match *self {
            Self::Undeclared => &EMPTY_MAP,
            Self::Declared { params, .. } => params,
        }
    }
}

/// Returns the top-level stanza `name` of `document`, or an empty map if it is
/// absent or not a map.
pub fn stanza<'a>(document: &'a Map<String, Value>, name: &str) -> &'a Map<String, Value> {
    as_map(document.get(name))
}

/// Returns the declared backend type of `stanza`, or the empty string if the
/// stanza is empty.
pub fn backend_type<'a>(name: &str, stanza: &'a Map<String, Value>) -> Result<&'a str, StanzaError> {
    Backend::from_stanza(name, stanza).map(|backend| backend.kind())
}

/// Returns the parameters of the backend declared by `stanza`, or an empty map
/// if the stanza is empty or the parameters are not a map.
pub fn backend_params<'a>(
    name: &str,
    stanza: &'a Map<String, Value>,
) -> Result<&'a Map<String, Value>, StanzaError> {
    Backend::from_stanza(name, stanza).map(|backend| backend.params())
}

/// Interprets `value` as a map, falling back to an empty map.
pub fn as_map(value: Option<&Value>) -> &Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map,
        _ => &EMPTY_MAP,
    }
}

/// Interprets `value` as a boolean flag.
///
/// Besides JSON booleans this accepts the string spellings `1`, `t`, `T`,
/// `TRUE`, `true`, `True` (and their false counterparts) as well as numbers,
/// where everything but zero is true. Anything else is false.
pub fn as_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(flag)) => {
            matches!(flag.as_str(), "1" | "t" | "T" | "TRUE" | "true" | "True")
        }
        Some(Value::Number(number)) => number.as_f64().is_some_and(|number| number != 0.0),
        _ => false,
    }
}
