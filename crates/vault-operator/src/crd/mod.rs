//! The `Vault` custom resource (`vault.banzaicloud.com/v1alpha1`).
//!
//! Field names are kept identical to the persisted resource, so existing
//! manifests deserialize unchanged. Most fields are optional, their defaults
//! are applied by [`crate::resolved::ResolvedVault`].

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, Container, EnvVar, NodeAffinity, PersistentVolumeClaimSpec, PodSecurityContext,
    PodSpec, ResourceRequirements, Toleration, Volume, VolumeMount,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, Snafu};

use crate::{
    kvp::{Labels, well_known},
    utils::crds::{partial_container_schema, partial_pod_spec_schema, raw_object_schema},
};

pub mod ingress;
pub mod unseal;

pub use ingress::Ingress;
pub use unseal::UnsealConfig;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Snafu)]
pub enum Error {
    #[snafu(display("Vault object has no name"))]
    ObjectHasNoName,

    #[snafu(display("Vault object {name:?} has no namespace"))]
    ObjectHasNoNamespace { name: String },
}

/// A Vault cluster, its storage and high availability setup, the way it gets
/// unsealed, and the knobs of the pods running it.
#[derive(Clone, CustomResource, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[kube(
    group = "vault.banzaicloud.com",
    version = "v1alpha1",
    kind = "Vault",
    plural = "vaults",
    status = "VaultStatus",
    shortname = "vault",
    crates(
        kube_core = "kube::core",
        k8s_openapi = "k8s_openapi",
        schemars = "schemars"
    ),
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VaultSpec {
    /// Number of Vault nodes to run, defaults to 1.
    #[serde(default)]
    pub size: Option<i32>,

    /// The Vault server image, defaults to `hashicorp/vault:latest`.
    #[serde(default)]
    pub image: Option<String>,

    /// The bank-vaults image running the unsealer and configurer.
    #[serde(default)]
    pub bank_vaults_image: Option<String>,

    #[serde(default)]
    pub bank_vaults_volume_mounts: Vec<VolumeMount>,

    /// Pod spec snippet merged into the generated Vault pods. `containers`
    /// may be left out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "partial_pod_spec_schema")]
    pub vault_pod_spec: Option<PodSpec>,

    /// Container snippet merged into the generated Vault container. `name`
    /// may be left out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "partial_container_schema")]
    pub vault_container_spec: Option<Container>,

    /// Pod spec snippet merged into the generated configurer pods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "partial_pod_spec_schema")]
    pub vault_configurer_pod_spec: Option<PodSpec>,

    /// Disables the statsd metrics exporter sidecar.
    #[serde(default)]
    pub statsd_disabled: bool,

    #[serde(default)]
    pub statsd_image: Option<String>,

    /// Mapping configuration of the statsd exporter.
    #[serde(default)]
    pub statsd_config: Option<String>,

    /// Deploys a fluentd sidecar shipping the Vault audit log.
    #[serde(default)]
    pub fluentd_enabled: bool,

    #[serde(default)]
    pub fluentd_image: Option<String>,

    /// Directory the fluentd configuration is mounted at, defaults to
    /// `/fluentd/etc`.
    #[serde(default)]
    pub fluentd_conf_location: Option<String>,

    #[serde(default)]
    pub fluentd_conf_file: Option<String>,

    #[serde(default)]
    pub fluentd_config: Option<String>,

    /// Label sets of secrets in the Vault namespace whose changes restart
    /// Vault.
    #[serde(default)]
    pub watched_secrets_labels: Option<Vec<BTreeMap<String, String>>>,

    /// Annotation sets of secrets in the Vault namespace whose changes
    /// restart Vault.
    #[serde(default)]
    pub watched_secrets_annotations: Option<Vec<BTreeMap<String, String>>>,

    /// Annotations added to every generated resource.
    #[serde(default)]
    pub annotations: Option<BTreeMap<String, String>>,

    /// Annotations of the Vault pods, secrets and config maps.
    #[serde(default)]
    pub vault_annotations: Option<BTreeMap<String, String>>,

    /// Labels of the Vault pods, secrets and config maps.
    #[serde(default)]
    pub vault_labels: Option<BTreeMap<String, String>>,

    #[serde(default)]
    pub vault_configurer_annotations: Option<BTreeMap<String, String>>,

    #[serde(default)]
    pub vault_configurer_labels: Option<BTreeMap<String, String>>,

    /// Directory the Vault configuration is mounted at, defaults to
    /// `/vault/config`.
    #[serde(default)]
    pub config_path: Option<String>,

    /// The Vault server configuration, passed to Vault as is.
    #[serde(default)]
    #[schemars(schema_with = "raw_object_schema")]
    pub config: serde_json::Value,

    /// Configuration applied to the running Vault by the bank-vaults
    /// configurer (auth methods, policies, secret engines, ...).
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    #[schemars(schema_with = "raw_object_schema")]
    pub external_config: serde_json::Value,

    #[serde(default)]
    pub unseal_config: UnsealConfig,

    #[serde(default)]
    pub credentials_config: CredentialsConfig,

    #[serde(default)]
    pub envs_config: Vec<EnvVar>,

    #[serde(default)]
    pub security_context: Option<PodSecurityContext>,

    /// Type of the Vault service, defaults to `ClusterIP`.
    #[serde(default)]
    pub service_type: Option<String>,

    #[serde(default, rename = "loadBalancerIP")]
    pub load_balancer_ip: Option<String>,

    /// Registers the Vault pods with Kubernetes service registration, which
    /// labels the active and standby pods. Only effective with HA storage.
    #[serde(default)]
    pub service_registration_enabled: bool,

    /// Address of the Raft leader to join. `self` marks this cluster as the
    /// leader itself.
    #[serde(default)]
    pub raft_leader_address: Option<String>,

    /// Overrides the scheme used to reach the Raft leader's API.
    #[serde(default)]
    pub raft_leader_api_scheme_override: Option<String>,

    /// Additional ports exposed by the Vault service, by name.
    #[serde(default)]
    pub service_ports: Option<BTreeMap<String, i32>>,

    #[serde(default)]
    pub affinity: Option<Affinity>,

    /// Either `hard` or `soft`.
    #[serde(default)]
    pub pod_anti_affinity: Option<String>,

    /// Node affinity of all Vault pods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_affinity: Option<NodeAffinity>,

    #[serde(default)]
    pub node_selector: Option<BTreeMap<String, String>>,

    #[serde(default)]
    pub tolerations: Vec<Toleration>,

    /// Service account of the Vault pods, defaults to `default`.
    #[serde(default)]
    pub service_account: Option<String>,

    #[serde(default)]
    pub volumes: Vec<Volume>,

    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,

    /// Additional persistent volume claim templates of the Vault stateful
    /// set, see
    /// [`ResolvedVault::volume_claim_templates`](crate::resolved::ResolvedVault::volume_claim_templates).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_claim_templates: Vec<EmbeddedPersistentVolumeClaim>,

    #[serde(default)]
    pub vault_envs_config: Vec<EnvVar>,

    #[serde(default)]
    pub secret_inits_config: Vec<EnvVar>,

    #[serde(default)]
    pub sidecar_envs_config: Vec<EnvVar>,

    #[serde(default)]
    pub resources: Option<Resources>,

    #[serde(default)]
    pub ingress: Option<Ingress>,

    #[serde(default)]
    pub service_monitor_enabled: bool,

    /// Name of an existing `kubernetes.io/tls` secret, instead of letting the
    /// operator generate one.
    #[serde(default)]
    pub existing_tls_secret_name: Option<String>,

    /// How long before expiry the generated certificate is renewed, e.g.
    /// `168h`.
    #[serde(default)]
    pub tls_expiry_threshold: Option<String>,

    #[serde(default)]
    pub tls_additional_hosts: Vec<String>,

    /// Namespaces the CA certificate is distributed to, `*` means all.
    #[serde(default)]
    pub ca_namespaces: Vec<String>,

    #[serde(default)]
    pub istio_enabled: bool,

    #[serde(default)]
    pub velero_enabled: bool,

    #[serde(default)]
    pub velero_fsfreeze_image: Option<String>,

    /// Extra containers of the Vault pods.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vault_containers: Vec<Container>,

    /// Extra init containers of the Vault pods.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vault_init_containers: Vec<Container>,
}

/// A persistent volume claim template reduced to the fields users set.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedPersistentVolumeClaim {
    #[serde(default)]
    pub metadata: EmbeddedObjectMetadata,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<PersistentVolumeClaimSpec>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedObjectMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

/// Where the bank-vaults sidecars find cloud credentials.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsConfig {
    /// Name of the environment variable pointing at the credentials file.
    #[serde(default)]
    pub env: String,

    #[serde(default)]
    pub path: String,

    #[serde(default)]
    pub secret_name: String,
}

/// Resource requirements of the containers making up a Vault pod.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resources {
    #[serde(default)]
    pub vault: Option<ResourceRequirements>,

    #[serde(default)]
    pub bank_vaults: Option<ResourceRequirements>,

    #[serde(default)]
    pub hsm_daemon: Option<ResourceRequirements>,

    #[serde(default)]
    pub prometheus_exporter: Option<ResourceRequirements>,

    #[serde(default)]
    pub fluentd: Option<ResourceRequirements>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultStatus {
    /// Names of the Vault pods.
    #[serde(default)]
    pub nodes: Vec<String>,

    /// Name of the active Vault pod.
    #[serde(default)]
    pub leader: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ComponentCondition>,
}

/// Health of a single Vault node.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentCondition {
    #[serde(rename = "type")]
    pub type_: String,

    /// One of `True`, `False` or `Unknown`.
    pub status: String,

    #[serde(default)]
    pub message: Option<String>,

    #[serde(default)]
    pub error: Option<String>,
}

/// Name, namespace and selector labels of a Vault cluster.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClusterIdentity {
    pub name: String,
    pub namespace: String,

    /// See [`well_known::vault`].
    pub labels: Labels,
}

impl ClusterIdentity {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let name = name.into();
        let labels = well_known::vault(&name);
        Self {
            name,
            namespace: namespace.into(),
            labels,
        }
    }
}

impl Vault {
    /// Returns the identity of this cluster. Fails for objects without a name
    /// or namespace, which can't exist in a cluster.
    pub fn cluster_identity(&self) -> Result<ClusterIdentity> {
        let name = self.metadata.name.clone().context(ObjectHasNoNameSnafu)?;
        let namespace = self
            .metadata
            .namespace
            .clone()
            .context(ObjectHasNoNamespaceSnafu { name: name.clone() })?;

        Ok(ClusterIdentity::new(name, namespace))
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use serde_json::json;

    use super::*;
    use crate::CustomResourceExt;

    #[test]
    fn deserialize_manifest() {
        let vault: Vault = serde_yaml::from_str(indoc! {r#"
            apiVersion: vault.banzaicloud.com/v1alpha1
            kind: Vault
            metadata:
              name: vault
              namespace: vault-system
            spec:
              size: 3
              image: hashicorp/vault:1.15.2
              serviceType: LoadBalancer
              loadBalancerIP: 10.0.0.1
              statsdDisabled: true
              serviceRegistrationEnabled: true
              tlsExpiryThreshold: 72h
              config:
                storage:
                  raft:
                    path: /vault/file
                listener:
                  tcp:
                    address: 0.0.0.0:8200
              unsealConfig:
                options:
                  preFlightChecks: false
                aws:
                  kmsKeyId: alias/vault
                  s3Bucket: vault-unseal
                  s3Prefix: keys
                  s3SSE: aws:kms
        "#})
        .expect("test manifest is valid");

        let spec = &vault.spec;
        assert_eq!(spec.size, Some(3));
        assert_eq!(spec.image.as_deref(), Some("hashicorp/vault:1.15.2"));
        assert_eq!(spec.load_balancer_ip.as_deref(), Some("10.0.0.1"));
        assert!(spec.statsd_disabled);
        assert!(spec.service_registration_enabled);
        assert_eq!(spec.tls_expiry_threshold.as_deref(), Some("72h"));
        assert_eq!(spec.config["storage"]["raft"]["path"], json!("/vault/file"));
        assert_eq!(spec.unseal_config.options.pre_flight_checks, Some(false));

        let aws = spec.unseal_config.aws.as_ref().expect("aws unseal config");
        assert_eq!(aws.s3_sse.as_deref(), Some("aws:kms"));
        assert_eq!(aws.kms_region, None);
    }

    #[test]
    fn minimal_manifest() {
        let vault: Vault = serde_yaml::from_str(indoc! {"
            apiVersion: vault.banzaicloud.com/v1alpha1
            kind: Vault
            metadata:
              name: vault
            spec: {}
        "})
        .expect("test manifest is valid");

        assert_eq!(vault.spec, VaultSpec::default());
        assert!(vault.spec.config.is_null());
    }

    #[test]
    fn persisted_field_names() {
        let spec = VaultSpec {
            load_balancer_ip: Some("10.0.0.1".to_owned()),
            existing_tls_secret_name: Some("vault-tls".to_owned()),
            ..VaultSpec::default()
        };
        let value = serde_json::to_value(&spec).expect("spec is serializable");

        assert_eq!(value["loadBalancerIP"], json!("10.0.0.1"));
        assert_eq!(value["existingTlsSecretName"], json!("vault-tls"));
        assert!(value.get("externalConfig").is_none());
        assert!(value.get("vaultPodSpec").is_none());
        assert!(value.get("volumeClaimTemplates").is_none());
    }

    #[test]
    fn pod_customizations_survive_round_trip() {
        let vault: Vault = serde_yaml::from_str(indoc! {"
            apiVersion: vault.banzaicloud.com/v1alpha1
            kind: Vault
            metadata:
              name: vault
              namespace: vault-system
            spec:
              vaultPodSpec:
                hostNetwork: true
              vaultContainerSpec:
                imagePullPolicy: Always
              vaultConfigurerPodSpec:
                priorityClassName: high
              nodeAffinity:
                requiredDuringSchedulingIgnoredDuringExecution:
                  nodeSelectorTerms:
                    - matchExpressions:
                        - key: kubernetes.io/arch
                          operator: In
                          values: [amd64]
              volumeClaimTemplates:
                - metadata:
                    name: vault-raft
                  spec:
                    accessModes: [ReadWriteOnce]
              vaultContainers:
                - name: auditor
                  image: busybox
              vaultInitContainers:
                - name: init
                  image: busybox
        "})
        .expect("test manifest is valid");

        let spec = serde_json::to_value(&vault).expect("Vault is serializable")["spec"].clone();
        assert_eq!(spec["vaultPodSpec"]["hostNetwork"], json!(true));
        assert_eq!(spec["vaultContainerSpec"]["imagePullPolicy"], json!("Always"));
        assert_eq!(spec["vaultConfigurerPodSpec"]["priorityClassName"], json!("high"));
        assert_eq!(
            spec["nodeAffinity"]["requiredDuringSchedulingIgnoredDuringExecution"]
                ["nodeSelectorTerms"][0]["matchExpressions"][0]["key"],
            json!("kubernetes.io/arch")
        );
        assert_eq!(
            spec["volumeClaimTemplates"],
            json!([{"metadata": {"name": "vault-raft"}, "spec": {"accessModes": ["ReadWriteOnce"]}}])
        );
        assert_eq!(spec["vaultContainers"][0]["name"], json!("auditor"));
        assert_eq!(spec["vaultInitContainers"][0]["name"], json!("init"));

        let reparsed: Vault = serde_json::from_value(
            serde_json::to_value(&vault).expect("Vault is serializable"),
        )
        .expect("serialized Vault is valid");
        assert_eq!(reparsed.spec, vault.spec);
    }

    #[test]
    fn cluster_identity() {
        let mut vault = Vault::new("vault", VaultSpec::default());
        assert_eq!(
            vault.cluster_identity(),
            Err(Error::ObjectHasNoNamespace {
                name: "vault".to_owned()
            })
        );

        vault.metadata.namespace = Some("vault-system".to_owned());
        let identity = vault.cluster_identity().expect("identity is complete");
        assert_eq!(identity.name, "vault");
        assert_eq!(identity.namespace, "vault-system");
        assert_eq!(
            identity.labels.to_selector_string(),
            "app.kubernetes.io/name=vault,vault_cr=vault"
        );

        vault.metadata.name = None;
        assert_eq!(vault.cluster_identity(), Err(Error::ObjectHasNoName));
    }

    #[test]
    fn crd_schema() {
        let crd = Vault::yaml_schema().expect("CRD can be rendered");

        assert!(crd.contains("name: vaults.vault.banzaicloud.com"));
        assert!(crd.contains("x-kubernetes-preserve-unknown-fields: true"));
        assert!(crd.contains("loadBalancerIP"));
        for field in [
            "vaultPodSpec",
            "vaultContainerSpec",
            "vaultConfigurerPodSpec",
            "nodeAffinity",
            "volumeClaimTemplates",
            "vaultContainers",
            "vaultInitContainers",
        ] {
            assert!(crd.contains(field), "CRD is missing {field}");
        }
    }
}
