//! Labels attached to the resources belonging to a Vault cluster and their
//! rendering as Kubernetes equality-based label selectors.
use std::{collections::BTreeMap, fmt::Display, ops::Deref};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

pub mod consts;

/// A set of Kubernetes labels, ordered by key.
///
/// The ordering is what makes [`Labels::to_selector_string`] deterministic,
/// regardless of the order in which labels were inserted.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a label, returning the previous value of `key` if there was one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Renders the labels as `key=value` pairs, sorted ascending by key and
    /// joined by commas, e.g. `app.kubernetes.io/name=vault,vault_cr=vault`.
    ///
    /// This is the format the bank-vaults `--k8s-secret-labels` flag and the
    /// Kubernetes API `labelSelector` query parameter expect.
    pub fn to_selector_string(&self) -> String {
        self.0
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Converts the labels into a [`LabelSelector`] matching exactly these labels.
    pub fn to_label_selector(&self) -> LabelSelector {
        LabelSelector {
            match_labels: Some(self.0.clone()),
            ..LabelSelector::default()
        }
    }
}

impl Deref for Labels {
    type Target = BTreeMap<String, String>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for Labels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_selector_string())
    }
}

impl<K, V> FromIterator<(K, V)> for Labels
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

impl From<BTreeMap<String, String>> for Labels {
    fn from(value: BTreeMap<String, String>) -> Self {
        Self(value)
    }
}

impl From<Labels> for BTreeMap<String, String> {
    fn from(value: Labels) -> Self {
        value.0
    }
}

/// Well-known label sets used to select the resources of a Vault cluster.
pub mod well_known {
    use super::{
        Labels,
        consts::{K8S_APP_NAME_KEY, VAULT_APP_NAME, VAULT_CONFIGURER_APP_NAME, VAULT_CR_KEY},
    };

    /// Labels selecting the Vault pods, secrets and config maps of the
    /// cluster named `vault_name`.
    pub fn vault(vault_name: &str) -> Labels {
        Labels::from_iter([(K8S_APP_NAME_KEY, VAULT_APP_NAME), (VAULT_CR_KEY, vault_name)])
    }

    /// Labels selecting the configurer pods of the cluster named `vault_name`.
    pub fn vault_configurer(vault_name: &str) -> Labels {
        Labels::from_iter([
            (K8S_APP_NAME_KEY, VAULT_CONFIGURER_APP_NAME),
            (VAULT_CR_KEY, vault_name),
        ])
    }
}
