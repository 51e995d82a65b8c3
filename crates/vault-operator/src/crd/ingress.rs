//! The optional ingress exposing the Vault API.

use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::{
    IngressBackend, IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Port of the Vault API on the Vault service.
pub const VAULT_API_PORT: i32 = 8200;

/// Annotations making the common ingress controllers talk TLS to Vault:
/// NGINX, Traefik and HAProxy, in that order.
pub const TLS_BACKEND_ANNOTATIONS: &[(&str, &str)] = &[
    ("nginx.ingress.kubernetes.io/backend-protocol", "HTTPS"),
    ("ingress.kubernetes.io/protocol", "https"),
    ("ingress.kubernetes.io/secure-backends", "true"),
];

#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ingress {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    #[serde(default)]
    pub spec: IngressSpec,
}

impl Ingress {
    /// Returns a copy of this ingress completed for the Vault cluster named
    /// `vault_name`.
    ///
    /// Without any rules or default backend, all traffic is sent to the Vault
    /// service. If Vault serves TLS, the backend protocol annotations of
    /// [`TLS_BACKEND_ANNOTATIONS`] are set, overriding user values.
    pub fn resolve(&self, vault_name: &str, tls_disabled: bool) -> Self {
        let mut ingress = self.clone();

        let has_rules = ingress.spec.rules.as_ref().is_some_and(|rules| !rules.is_empty());
        if !has_rules && ingress.spec.default_backend.is_none() {
            ingress.spec.default_backend = Some(IngressBackend {
                service: Some(IngressServiceBackend {
                    name: vault_name.to_owned(),
                    port: Some(ServiceBackendPort {
                        number: Some(VAULT_API_PORT),
                        ..ServiceBackendPort::default()
                    }),
                }),
                ..IngressBackend::default()
            });
        }

        if !tls_disabled {
            ingress.annotations.extend(
                TLS_BACKEND_ANNOTATIONS
                    .iter()
                    .map(|(key, value)| ((*key).to_owned(), (*value).to_owned())),
            );
        }

        ingress
    }
}
