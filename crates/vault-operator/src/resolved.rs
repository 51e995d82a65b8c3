//! A `Vault` with every default applied and its configuration validated.
//!
//! [`ResolvedVault`] is built once per resolution pass and never changes
//! afterwards. All accessors take `&self`, defaults are materialized when the
//! value is constructed.

use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::PersistentVolumeClaim, apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use semver::Version;
use serde_json::{Map, Value};
use snafu::{ResultExt, Snafu};
use tracing::instrument;
use vault_shared::time::Duration;

use crate::{
    config::{self, ApiScheme, DerivedFacts, VaultConfig},
    crd::{
        self, ClusterIdentity, Ingress, Vault, VaultSpec,
        unseal::{UnsealBackend, UnsealMode},
    },
    deep_merger, image,
    kvp::{Labels, well_known},
    utils::with_default,
};

pub const DEFAULT_VAULT_IMAGE: &str = "hashicorp/vault:latest";
pub const DEFAULT_BANK_VAULTS_IMAGE: &str = "ghcr.io/bank-vaults/bank-vaults:latest";
pub const DEFAULT_STATSD_IMAGE: &str = "prom/statsd-exporter:latest";
pub const DEFAULT_FLUENTD_IMAGE: &str = "fluent/fluentd:edge";
pub const DEFAULT_VELERO_FSFREEZE_IMAGE: &str = "ubuntu:bionic";
pub const DEFAULT_CONFIG_PATH: &str = "/vault/config";
pub const DEFAULT_FLUENTD_CONF_LOCATION: &str = "/fluentd/etc";
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";
pub const DEFAULT_SERVICE_TYPE: &str = "ClusterIP";
pub const DEFAULT_SIZE: i32 = 1;
pub const DEFAULT_TLS_EXPIRY_THRESHOLD: Duration = Duration::from_hours_unchecked(168);

/// Name of the Vault API port, see [`ResolvedVault::api_port_name`].
pub const API_PORT_NAME: &str = "api-port";

/// Value of `raftLeaderAddress` marking a cluster as its own Raft leader.
const RAFT_LEADER_SELF: &str = "self";

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to determine the identity of the Vault cluster"))]
    ClusterIdentity { source: crd::Error },

    #[snafu(display("invalid Vault configuration"))]
    InvalidConfig { source: config::Error },

    #[snafu(display("failed to serialize the Vault configuration"))]
    SerializeConfig { source: serde_json::Error },

    #[snafu(display("failed to serialize the external configuration"))]
    SerializeExternalConfig { source: serde_json::Error },

    #[snafu(display("failed to determine the Vault server version"))]
    ServerVersion { source: image::Error },
}

/// A `Vault` resource with defaults applied.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedVault {
    pub identity: ClusterIdentity,

    pub image: String,
    pub bank_vaults_image: String,
    pub statsd_image: String,
    pub fluentd_image: String,
    pub velero_fsfreeze_image: String,

    pub config_path: String,
    pub fluentd_conf_location: String,
    pub service_account: String,
    pub service_type: String,
    pub size: i32,

    pub annotations: BTreeMap<String, String>,
    pub vault_annotations: BTreeMap<String, String>,
    pub vault_labels: BTreeMap<String, String>,
    pub vault_configurer_annotations: BTreeMap<String, String>,
    pub vault_configurer_labels: BTreeMap<String, String>,
    pub watched_secrets_labels: Vec<BTreeMap<String, String>>,
    pub watched_secrets_annotations: Vec<BTreeMap<String, String>>,

    /// How long before expiry the Vault certificate is renewed.
    pub tls_expiry_threshold: Duration,

    config: VaultConfig,
    spec: VaultSpec,
}

impl ResolvedVault {
    #[instrument(
        skip_all,
        fields(vault.name = ?vault.metadata.name, vault.namespace = ?vault.metadata.namespace)
    )]
    pub fn new(vault: &Vault) -> Result<Self> {
        let identity = vault.cluster_identity().context(ClusterIdentitySnafu)?;
        let spec = &vault.spec;
        let config = VaultConfig::new(spec.config.clone()).context(InvalidConfigSnafu)?;

        let text =
            |value: Option<&String>, default: &str| with_default(value, || default.to_owned());

        let resolved = Self {
            image: text(spec.image.as_ref(), DEFAULT_VAULT_IMAGE),
            bank_vaults_image: text(spec.bank_vaults_image.as_ref(), DEFAULT_BANK_VAULTS_IMAGE),
            statsd_image: text(spec.statsd_image.as_ref(), DEFAULT_STATSD_IMAGE),
            fluentd_image: text(spec.fluentd_image.as_ref(), DEFAULT_FLUENTD_IMAGE),
            velero_fsfreeze_image: text(
                spec.velero_fsfreeze_image.as_ref(),
                DEFAULT_VELERO_FSFREEZE_IMAGE,
            ),
            config_path: text(spec.config_path.as_ref(), DEFAULT_CONFIG_PATH),
            fluentd_conf_location: text(
                spec.fluentd_conf_location.as_ref(),
                DEFAULT_FLUENTD_CONF_LOCATION,
            ),
            service_account: text(spec.service_account.as_ref(), DEFAULT_SERVICE_ACCOUNT),
            service_type: text(spec.service_type.as_ref(), DEFAULT_SERVICE_TYPE),
            size: with_default(spec.size.as_ref(), || DEFAULT_SIZE),
            annotations: spec.annotations.clone().unwrap_or_default(),
            vault_annotations: spec.vault_annotations.clone().unwrap_or_default(),
            vault_labels: spec.vault_labels.clone().unwrap_or_default(),
            vault_configurer_annotations: spec
                .vault_configurer_annotations
                .clone()
                .unwrap_or_default(),
            vault_configurer_labels: spec.vault_configurer_labels.clone().unwrap_or_default(),
            watched_secrets_labels: spec.watched_secrets_labels.clone().unwrap_or_default(),
            watched_secrets_annotations: spec
                .watched_secrets_annotations
                .clone()
                .unwrap_or_default(),
            tls_expiry_threshold: tls_expiry_threshold(spec.tls_expiry_threshold.as_deref()),
            identity,
            config,
            spec: spec.clone(),
        };

        tracing::debug!(
            storage_type = resolved.config.storage_type(),
            ha_storage = resolved.config.has_ha_storage(),
            "resolved Vault"
        );

        Ok(resolved)
    }

    /// The resource this was resolved from, without defaults.
    pub fn spec(&self) -> &VaultSpec {
        &self.spec
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn facts(&self) -> DerivedFacts {
        self.config.facts()
    }

    pub fn unseal_backend(&self) -> UnsealBackend<'_> {
        self.spec.unseal_config.backend()
    }

    pub fn unseal_mode(&self) -> UnsealMode {
        self.unseal_backend().mode()
    }

    /// Arguments of the bank-vaults unsealer, see
    /// [`UnsealConfig::to_args`](crate::crd::UnsealConfig::to_args).
    pub fn unseal_args(&self) -> Vec<String> {
        self.spec.unseal_config.to_args(&self.identity)
    }

    pub fn hsm_daemon_needed(&self) -> bool {
        self.spec.unseal_config.hsm_daemon_needed()
    }

    /// The Vault configuration document handed to Vault.
    ///
    /// With service registration enabled on an HA deployment, the Kubernetes
    /// `service_registration` stanza for the cluster namespace is merged in,
    /// without touching anything the user configured.
    pub fn merged_config(&self) -> Map<String, Value> {
        if self.spec.service_registration_enabled && self.config.has_ha_storage() {
            deep_merger::merge_service_registration(
                self.config.document(),
                &self.identity.namespace,
            )
        } else {
            self.config.document().clone()
        }
    }

    /// [`Self::merged_config`] serialized as JSON.
    pub fn config_json(&self) -> Result<String> {
        serde_json::to_string(&self.merged_config()).context(SerializeConfigSnafu)
    }

    /// The configuration applied by the bank-vaults configurer as JSON, if
    /// any is set.
    pub fn external_config_json(&self) -> Result<Option<String>> {
        if self.spec.external_config.is_null() {
            return Ok(None);
        }

        serde_json::to_string(&self.spec.external_config)
            .map(Some)
            .context(SerializeExternalConfigSnafu)
    }

    /// The Vault version, read from the tag of the configured Vault image.
    ///
    /// The default image isn't considered, a resource without an image has
    /// no known version.
    pub fn server_version(&self) -> Result<Version> {
        let image = self.spec.image.as_deref().unwrap_or_default();
        image::server_version(image).context(ServerVersionSnafu)
    }

    /// Name of the Vault API port. With Istio, the name carries the protocol
    /// prefix Istio uses for protocol selection.
    pub fn api_port_name(&self) -> String {
        if !self.spec.istio_enabled {
            return API_PORT_NAME.to_owned();
        }

        format!("{}-{API_PORT_NAME}", self.config.api_scheme())
    }

    /// The scheme used to reach the Raft leader's API. Defaults to the scheme
    /// of this cluster.
    pub fn raft_leader_api_scheme(&self) -> String {
        match self.spec.raft_leader_api_scheme_override.as_deref() {
            Some(scheme) if !scheme.is_empty() => scheme.to_owned(),
            _ => self.config.api_scheme().to_string(),
        }
    }

    /// Whether this cluster joins a Raft leader in another cluster.
    pub fn is_raft_bootstrap_follower(&self) -> bool {
        self.spec
            .raft_leader_address
            .as_deref()
            .is_some_and(|address| !address.is_empty() && address != RAFT_LEADER_SELF)
    }

    pub fn api_scheme(&self) -> ApiScheme {
        self.config.api_scheme()
    }

    pub fn labels_for_vault(&self) -> Labels {
        well_known::vault(&self.identity.name)
    }

    pub fn labels_for_vault_configurer(&self) -> Labels {
        well_known::vault_configurer(&self.identity.name)
    }

    /// The ingress of the cluster completed with the Vault service backend
    /// and TLS annotations, see [`Ingress::resolve`].
    pub fn ingress(&self) -> Option<Ingress> {
        self.spec
            .ingress
            .as_ref()
            .map(|ingress| ingress.resolve(&self.identity.name, self.config.is_tls_disabled()))
    }

    /// The extra volume claim templates of the Vault stateful set. Only name,
    /// labels, annotations and spec are carried over, so the templates never
    /// differ from the stored stateful set in server generated fields.
    pub fn volume_claim_templates(&self) -> Vec<PersistentVolumeClaim> {
        self.spec
            .volume_claim_templates
            .iter()
            .map(|template| PersistentVolumeClaim {
                metadata: ObjectMeta {
                    name: template.metadata.name.clone(),
                    labels: template.metadata.labels.clone(),
                    annotations: template.metadata.annotations.clone(),
                    ..ObjectMeta::default()
                },
                spec: template.spec.clone(),
                status: None,
            })
            .collect()
    }

    pub fn fluentd_enabled(&self) -> bool {
        self.spec.fluentd_enabled
    }

    pub fn statsd_disabled(&self) -> bool {
        self.spec.statsd_disabled
    }
}

impl TryFrom<&Vault> for ResolvedVault {
    type Error = Error;

    fn try_from(vault: &Vault) -> Result<Self> {
        Self::new(vault)
    }
}

/// Parses the TLS expiry threshold. A value that can't be parsed falls back
/// to the default instead of failing the resolution.
fn tls_expiry_threshold(value: Option<&str>) -> Duration {
    let Some(value) = value.filter(|value| !value.is_empty()) else {
        return DEFAULT_TLS_EXPIRY_THRESHOLD;
    };

    value.parse().unwrap_or_else(|err| {
        tracing::warn!(
            %err,
            tls_expiry_threshold = value,
            "using default threshold due to parse error"
        );
        DEFAULT_TLS_EXPIRY_THRESHOLD
    })
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn vault(yaml: &str) -> Vault {
        serde_yaml::from_str(yaml).expect("test manifest is valid")
    }

    fn resolved(spec: &str) -> ResolvedVault {
        let manifest = format!(
            "apiVersion: vault.banzaicloud.com/v1alpha1\n\
             kind: Vault\n\
             metadata:\n  name: vault\n  namespace: vault-system\n\
             spec:\n{}",
            indent(spec)
        );
        ResolvedVault::new(&vault(&manifest)).expect("test Vault resolves")
    }

    fn indent(spec: &str) -> String {
        spec.lines().map(|line| format!("  {line}\n")).collect()
    }

    #[test]
    fn defaults() {
        let resolved = resolved("{}");

        assert_eq!(resolved.image, DEFAULT_VAULT_IMAGE);
        assert_eq!(resolved.bank_vaults_image, DEFAULT_BANK_VAULTS_IMAGE);
        assert_eq!(resolved.statsd_image, DEFAULT_STATSD_IMAGE);
        assert_eq!(resolved.fluentd_image, DEFAULT_FLUENTD_IMAGE);
        assert_eq!(resolved.velero_fsfreeze_image, DEFAULT_VELERO_FSFREEZE_IMAGE);
        assert_eq!(resolved.config_path, DEFAULT_CONFIG_PATH);
        assert_eq!(resolved.fluentd_conf_location, DEFAULT_FLUENTD_CONF_LOCATION);
        assert_eq!(resolved.service_account, DEFAULT_SERVICE_ACCOUNT);
        assert_eq!(resolved.service_type, DEFAULT_SERVICE_TYPE);
        assert_eq!(resolved.size, DEFAULT_SIZE);
        assert!(resolved.annotations.is_empty());
        assert!(resolved.vault_labels.is_empty());
        assert!(resolved.watched_secrets_labels.is_empty());
        assert!(resolved.watched_secrets_annotations.is_empty());
        assert_eq!(resolved.tls_expiry_threshold, DEFAULT_TLS_EXPIRY_THRESHOLD);
        assert_eq!(resolved.tls_expiry_threshold.as_secs(), 168 * 3600);
        assert_eq!(resolved.unseal_mode(), UnsealMode::K8s);
        assert!(resolved.ingress().is_none());
    }

    #[test]
    fn empty_values_are_defaulted() {
        let resolved = resolved(indoc! {"
            image: ''
            serviceAccount: ''
            size: 0
            vaultLabels: {}
        "});

        assert_eq!(resolved.image, DEFAULT_VAULT_IMAGE);
        assert_eq!(resolved.service_account, DEFAULT_SERVICE_ACCOUNT);
        assert_eq!(resolved.size, DEFAULT_SIZE);
        assert!(resolved.vault_labels.is_empty());
    }

    #[test]
    fn user_values_are_kept() {
        let resolved = resolved(indoc! {"
            image: hashicorp/vault:1.15.2
            size: 3
            serviceType: LoadBalancer
            vaultLabels:
              team: security
            tlsExpiryThreshold: 1h30m
        "});

        assert_eq!(resolved.image, "hashicorp/vault:1.15.2");
        assert_eq!(resolved.size, 3);
        assert_eq!(resolved.service_type, "LoadBalancer");
        assert_eq!(resolved.vault_labels["team"], "security");
        assert_eq!(resolved.tls_expiry_threshold, Duration::from_secs(5400));
        assert_eq!(resolved.server_version().ok(), Some(Version::new(1, 15, 2)));
    }

    #[rstest]
    #[case::fraction("tlsExpiryThreshold: 1.5h", 5400)]
    #[case::zero("tlsExpiryThreshold: '0'", 0)]
    #[case::empty("tlsExpiryThreshold: ''", 168 * 3600)]
    fn parsed_tls_expiry_threshold(#[case] spec: &str, #[case] secs: u64) {
        assert_eq!(resolved(spec).tls_expiry_threshold.as_secs(), secs);
    }

    #[test]
    fn invalid_tls_expiry_threshold_falls_back() {
        let subscriber = tracing_subscriber::fmt().with_test_writer().finish();
        let resolved = tracing::subscriber::with_default(subscriber, || {
            resolved("tlsExpiryThreshold: one week")
        });

        assert_eq!(resolved.tls_expiry_threshold, DEFAULT_TLS_EXPIRY_THRESHOLD);
    }

    #[test]
    fn latest_has_no_server_version() {
        let err = resolved("image: hashicorp/vault:latest")
            .server_version()
            .expect_err("latest is no version");
        assert!(
            matches!(
                err,
                Error::ServerVersion {
                    source: image::Error::InvalidVersion { .. }
                }
            ),
            "{err:?}"
        );
    }

    #[test]
    fn unset_image_has_no_server_version() {
        let resolved = resolved("{}");
        assert_eq!(resolved.image, DEFAULT_VAULT_IMAGE);

        let err = resolved.server_version().expect_err("no image is set");
        assert!(
            matches!(
                err,
                Error::ServerVersion {
                    source: image::Error::InvalidReference { .. }
                }
            ),
            "{err:?}"
        );
    }

    #[test]
    fn volume_claim_templates() {
        let resolved = resolved(indoc! {"
            volumeClaimTemplates:
              - metadata:
                  name: vault-raft
                  labels:
                    app: vault
                spec:
                  accessModes: [ReadWriteOnce]
                  resources:
                    requests:
                      storage: 1Gi
        "});

        let templates = resolved.volume_claim_templates();
        assert_eq!(templates.len(), 1);

        let claim = &templates[0];
        assert_eq!(claim.metadata.name.as_deref(), Some("vault-raft"));
        assert_eq!(
            claim.metadata.labels,
            Some(BTreeMap::from([("app".to_owned(), "vault".to_owned())]))
        );
        assert_eq!(claim.metadata.annotations, None);
        assert_eq!(claim.metadata.namespace, None);
        assert!(claim.status.is_none());
        assert_eq!(
            claim.spec.as_ref().and_then(|spec| spec.access_modes.clone()),
            Some(vec!["ReadWriteOnce".to_owned()])
        );

        assert!(self::resolved("{}").volume_claim_templates().is_empty());
    }

    #[test]
    fn service_registration_on_ha_storage() {
        let resolved = resolved(indoc! {"
            serviceRegistrationEnabled: true
            config:
              storage:
                raft:
                  path: /vault/file
        "});

        assert_eq!(
            Value::Object(resolved.merged_config()),
            json!({
                "storage": {"raft": {"path": "/vault/file"}},
                "service_registration": {"kubernetes": {"namespace": "vault-system"}},
            })
        );
        // the held document is not modified
        assert!(!resolved.config().document().contains_key("service_registration"));
    }

    #[rstest]
    #[case::disabled("serviceRegistrationEnabled: false\nconfig: {storage: {raft: {}}}")]
    #[case::not_ha("serviceRegistrationEnabled: true\nconfig: {storage: {file: {}}}")]
    fn no_service_registration(#[case] spec: &str) {
        let resolved = resolved(spec);

        assert_eq!(&resolved.merged_config(), resolved.config().document());
        let json: Value =
            serde_json::from_str(&resolved.config_json().expect("config is serializable"))
                .expect("config JSON is valid");
        assert!(json.get("service_registration").is_none());
    }

    #[test]
    fn external_config_json() {
        assert_eq!(resolved("{}").external_config_json().ok(), Some(None));

        let resolved = resolved("externalConfig: {policies: [{name: allow_secrets}]}");
        assert_eq!(
            resolved.external_config_json().ok().flatten().as_deref(),
            Some(r#"{"policies":[{"name":"allow_secrets"}]}"#)
        );
    }

    #[rstest]
    #[case::plain("istioEnabled: false", "api-port")]
    #[case::istio_tls("istioEnabled: true", "https-api-port")]
    #[case::istio_plain(
        "istioEnabled: true\nconfig: {listener: {tcp: {tls_disable: true}}}",
        "http-api-port"
    )]
    fn api_port_name(#[case] spec: &str, #[case] expected: &str) {
        assert_eq!(resolved(spec).api_port_name(), expected);
    }

    #[rstest]
    #[case::unset("{}", false)]
    #[case::empty("raftLeaderAddress: ''", false)]
    #[case::leader("raftLeaderAddress: self", false)]
    #[case::follower("raftLeaderAddress: vault.other-cluster", true)]
    fn raft_bootstrap_follower(#[case] spec: &str, #[case] expected: bool) {
        assert_eq!(resolved(spec).is_raft_bootstrap_follower(), expected);
    }

    #[test]
    fn raft_leader_api_scheme() {
        assert_eq!(resolved("{}").raft_leader_api_scheme(), "https");
        assert_eq!(
            resolved("raftLeaderApiSchemeOverride: http").raft_leader_api_scheme(),
            "http"
        );
    }

    #[test]
    fn labels() {
        let resolved = resolved("{}");

        assert_eq!(
            resolved.labels_for_vault().to_selector_string(),
            "app.kubernetes.io/name=vault,vault_cr=vault"
        );
        assert_eq!(
            resolved.labels_for_vault_configurer().to_selector_string(),
            "app.kubernetes.io/name=vault-configurator,vault_cr=vault"
        );
    }

    #[test]
    fn ingress_gets_tls_annotations() {
        let resolved = resolved("ingress: {}");
        let ingress = resolved.ingress().expect("ingress is configured");

        assert_eq!(
            ingress.annotations["nginx.ingress.kubernetes.io/backend-protocol"],
            "HTTPS"
        );
        assert!(ingress.spec.default_backend.is_some());
    }

    #[test]
    fn ambiguous_storage_is_rejected() {
        let vault = vault(indoc! {"
            apiVersion: vault.banzaicloud.com/v1alpha1
            kind: Vault
            metadata:
              name: vault
              namespace: vault-system
            spec:
              config:
                storage:
                  file: {}
                  raft: {}
        "});

        let err = ResolvedVault::new(&vault).expect_err("must be rejected");
        assert!(matches!(err, Error::InvalidConfig { .. }), "{err:?}");
    }

    #[test]
    fn missing_namespace_is_rejected() {
        let vault = vault(indoc! {"
            apiVersion: vault.banzaicloud.com/v1alpha1
            kind: Vault
            metadata:
              name: vault
            spec: {}
        "});

        let err = ResolvedVault::new(&vault).expect_err("must be rejected");
        assert!(matches!(err, Error::ClusterIdentity { .. }), "{err:?}");
    }
}
