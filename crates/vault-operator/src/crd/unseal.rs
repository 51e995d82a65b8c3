//! How the bank-vaults agent unseals Vault, and the command line it is
//! started with.
//!
//! The persisted [`UnsealConfig`] has one optional field per mechanism. Only
//! one of them takes effect, chosen by a fixed priority, see
//! [`UnsealConfig::backend`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::crd::ClusterIdentity;

/// Suffix of the default secret holding the unseal keys, `<cluster>-unseal-keys`.
pub const DEFAULT_UNSEAL_KEYS_SECRET_SUFFIX: &str = "-unseal-keys";

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsealConfig {
    #[serde(default)]
    pub options: UnsealOptions,

    /// Where the unseal keys are stored when Kubernetes secrets are used,
    /// either on their own or together with an HSM.
    #[serde(default)]
    pub kubernetes: KubernetesUnsealConfig,

    #[serde(default)]
    pub google: Option<GoogleUnsealConfig>,

    #[serde(default)]
    pub alibaba: Option<AlibabaUnsealConfig>,

    #[serde(default)]
    pub azure: Option<AzureUnsealConfig>,

    #[serde(default)]
    pub aws: Option<AwsUnsealConfig>,

    #[serde(default)]
    pub oci: Option<OciUnsealConfig>,

    #[serde(default)]
    pub vault: Option<VaultUnsealConfig>,

    #[serde(default)]
    pub hsm: Option<HsmUnsealConfig>,
}

/// Options shared by every unseal mechanism. Unset options keep the
/// bank-vaults defaults.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsealOptions {
    /// Defaults to `true`.
    #[serde(default)]
    pub pre_flight_checks: Option<bool>,

    /// Defaults to `true`.
    #[serde(default)]
    pub store_root_token: Option<bool>,

    /// Defaults to 3.
    #[serde(default)]
    pub secret_threshold: Option<u32>,

    /// Defaults to 5.
    #[serde(default)]
    pub secret_shares: Option<u32>,
}

#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesUnsealConfig {
    #[serde(default)]
    pub secret_namespace: Option<String>,

    #[serde(default)]
    pub secret_name: Option<String>,
}

/// Google Cloud KMS encrypted keys, stored in a GCS bucket.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleUnsealConfig {
    pub kms_key_ring: String,
    pub kms_crypto_key: String,
    pub kms_location: String,
    pub kms_project: String,
    pub storage_bucket: String,
}

/// Alibaba KMS encrypted keys, stored in an OSS bucket.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlibabaUnsealConfig {
    pub kms_region: String,
    pub kms_key_id: String,
    pub oss_endpoint: String,
    pub oss_bucket: String,
    pub oss_prefix: String,
}

/// Keys stored as Azure Key Vault secrets.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureUnsealConfig {
    pub key_vault_name: String,
}

/// AWS KMS encrypted keys, stored in an S3 bucket.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsUnsealConfig {
    pub kms_key_id: String,

    #[serde(default)]
    pub kms_region: Option<String>,

    #[serde(default)]
    pub kms_encryption_context: Option<String>,

    pub s3_bucket: String,
    pub s3_prefix: String,

    #[serde(default)]
    pub s3_region: Option<String>,

    /// Server side encryption algorithm of the S3 objects.
    #[serde(default, rename = "s3SSE")]
    pub s3_sse: Option<String>,
}

/// OCI KMS encrypted keys, stored in an Object Storage bucket.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OciUnsealConfig {
    #[serde(rename = "keyOCID")]
    pub key_ocid: String,

    pub cryptographic_endpoint: String,
    pub bucket_name: String,

    #[serde(default)]
    pub bucket_namespace: Option<String>,

    #[serde(default)]
    pub bucket_prefix: Option<String>,
}

/// Keys stored in another Vault.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultUnsealConfig {
    pub address: String,
    pub unseal_keys_path: String,

    #[serde(default)]
    pub role: Option<String>,

    #[serde(default)]
    pub auth_path: Option<String>,

    #[serde(default)]
    pub token_path: Option<String>,

    #[serde(default)]
    pub token: Option<String>,
}

/// Keys encrypted by a Hardware Security Module, optionally stored in a
/// Kubernetes secret.
#[derive(Clone, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HsmUnsealConfig {
    /// Runs the HSM daemon next to Vault, for devices that need one.
    #[serde(default)]
    pub daemon: bool,

    pub module_path: String,

    #[serde(default)]
    pub slot_id: u32,

    #[serde(default)]
    pub token_label: Option<String>,

    #[serde(default)]
    pub pin: Option<String>,

    pub key_label: String,
}

/// The value of the bank-vaults `--mode` flag.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum UnsealMode {
    #[strum(serialize = "google-cloud-kms-gcs")]
    GoogleCloudKmsGcs,

    #[strum(serialize = "azure-key-vault")]
    AzureKeyVault,

    #[strum(serialize = "oci")]
    Oci,

    #[strum(serialize = "aws-kms-s3")]
    AwsKmsS3,

    #[strum(serialize = "alibaba-kms-oss")]
    AlibabaKmsOss,

    #[strum(serialize = "vault")]
    Vault,

    #[strum(serialize = "hsm")]
    Hsm,

    #[strum(serialize = "hsm-k8s")]
    HsmK8s,

    #[strum(serialize = "k8s")]
    K8s,
}

/// A Kubernetes secret the unseal keys are stored in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct KeysSecret<'a> {
    pub namespace: &'a str,
    pub name: &'a str,
}

/// The unseal mechanism in effect.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnsealBackend<'a> {
    Google(&'a GoogleUnsealConfig),
    Azure(&'a AzureUnsealConfig),
    Oci(&'a OciUnsealConfig),
    Aws(&'a AwsUnsealConfig),
    Alibaba(&'a AlibabaUnsealConfig),
    Vault(&'a VaultUnsealConfig),
    Hsm {
        hsm: &'a HsmUnsealConfig,

        /// Set if both the secret namespace and name are configured, the keys
        /// are kept in this secret instead of on the HSM.
        secret: Option<KeysSecret<'a>>,
    },
    /// The fallback if nothing else is configured.
    Kubernetes(&'a KubernetesUnsealConfig),
}

impl UnsealBackend<'_> {
    pub fn mode(&self) -> UnsealMode {
        match self {
            Self::Google(_) => UnsealMode::GoogleCloudKmsGcs,
            Self::Azure(_) => UnsealMode::AzureKeyVault,
            Self::Oci(_) => UnsealMode::Oci,
            Self::Aws(_) => UnsealMode::AwsKmsS3,
            Self::Alibaba(_) => UnsealMode::AlibabaKmsOss,
            Self::Vault(_) => UnsealMode::Vault,
            Self::Hsm { secret: None, .. } => UnsealMode::Hsm,
            Self::Hsm { secret: Some(_), .. } => UnsealMode::HsmK8s,
            Self::Kubernetes(_) => UnsealMode::K8s,
        }
    }
}

impl UnsealConfig {
    /// Selects the unseal mechanism in effect. If several are configured, the
    /// first one of Google, Azure, OCI, AWS, Alibaba, Vault and HSM wins.
    /// Without any of them, Kubernetes secrets are used.
    pub fn backend(&self) -> UnsealBackend<'_> {
        if let Some(google) = &self.google {
            UnsealBackend::Google(google)
        } else if let Some(azure) = &self.azure {
            UnsealBackend::Azure(azure)
        } else if let Some(oci) = &self.oci {
            UnsealBackend::Oci(oci)
        } else if let Some(aws) = &self.aws {
            UnsealBackend::Aws(aws)
        } else if let Some(alibaba) = &self.alibaba {
            UnsealBackend::Alibaba(alibaba)
        } else if let Some(vault) = &self.vault {
            UnsealBackend::Vault(vault)
        } else if let Some(hsm) = &self.hsm {
            let secret = match (
                non_empty(self.kubernetes.secret_namespace.as_deref()),
                non_empty(self.kubernetes.secret_name.as_deref()),
            ) {
                (Some(namespace), Some(name)) => Some(KeysSecret { namespace, name }),
                _ => None,
            };
            UnsealBackend::Hsm { hsm, secret }
        } else {
            UnsealBackend::Kubernetes(&self.kubernetes)
        }
    }

    /// Whether the HSM daemon has to run next to Vault.
    pub fn hsm_daemon_needed(&self) -> bool {
        self.hsm.as_ref().is_some_and(|hsm| hsm.daemon)
    }

    /// Builds the bank-vaults arguments: the common options first, followed
    /// by exactly one `--mode` and the flags of the selected mechanism.
    ///
    /// Optional values which are not set are passed as empty arguments, so
    /// every flag of a mechanism is always present.
    pub fn to_args(&self, cluster: &ClusterIdentity) -> Vec<String> {
        let mut args = Args::default();

        if self.options.pre_flight_checks == Some(false) {
            args.push("--pre-flight-checks=false");
        }
        if self.options.store_root_token == Some(false) {
            args.push("--store-root-token=false");
        }
        if let Some(shares) = self.options.secret_shares.filter(|shares| *shares > 0) {
            args.flag("--secret-shares", shares.to_string());
        }
        if let Some(threshold) = self.options.secret_threshold.filter(|threshold| *threshold > 0) {
            args.flag("--secret-threshold", threshold.to_string());
        }

        let backend = self.backend();
        let mode = backend.mode();
        tracing::debug!(%mode, vault.name = %cluster.name, "selected unseal mode");
        args.flag("--mode", mode.to_string());

        match backend {
            UnsealBackend::Google(google) => {
                args.flag("--google-cloud-kms-key-ring", &google.kms_key_ring);
                args.flag("--google-cloud-kms-crypto-key", &google.kms_crypto_key);
                args.flag("--google-cloud-kms-location", &google.kms_location);
                args.flag("--google-cloud-kms-project", &google.kms_project);
                args.flag("--google-cloud-storage-bucket", &google.storage_bucket);
            }
            UnsealBackend::Azure(azure) => {
                args.flag("--azure-key-vault-name", &azure.key_vault_name);
            }
            UnsealBackend::Oci(oci) => {
                args.flag("--oci-key-ocid", &oci.key_ocid);
                args.flag("--oci-cryptographic-endpoint", &oci.cryptographic_endpoint);
                args.flag("--oci-bucket-namespace", or_empty(oci.bucket_namespace.as_deref()));
                args.flag("--oci-bucket-name", &oci.bucket_name);
                args.flag("--oci-bucket-prefix", or_empty(oci.bucket_prefix.as_deref()));
            }
            UnsealBackend::Aws(aws) => {
                args.flag("--aws-kms-key-id", &aws.kms_key_id);
                args.flag("--aws-kms-region", or_empty(aws.kms_region.as_deref()));
                args.flag("--aws-s3-bucket", &aws.s3_bucket);
                args.flag("--aws-s3-prefix", &aws.s3_prefix);
                args.flag("--aws-s3-region", or_empty(aws.s3_region.as_deref()));
                args.flag("--aws-s3-sse-algo", or_empty(aws.s3_sse.as_deref()));
                if let Some(context) = non_empty(aws.kms_encryption_context.as_deref()) {
                    args.flag("--aws-kms-encryption-context", context);
                }
            }
            UnsealBackend::Alibaba(alibaba) => {
                args.flag("--alibaba-kms-region", &alibaba.kms_region);
                args.flag("--alibaba-kms-key-id", &alibaba.kms_key_id);
                args.flag("--alibaba-oss-endpoint", &alibaba.oss_endpoint);
                args.flag("--alibaba-oss-bucket", &alibaba.oss_bucket);
                args.flag("--alibaba-oss-prefix", &alibaba.oss_prefix);
            }
            UnsealBackend::Vault(vault) => {
                args.flag("--vault-addr", &vault.address);
                args.flag("--vault-unseal-keys-path", &vault.unseal_keys_path);
                if let Some(token) = non_empty(vault.token.as_deref()) {
                    args.flag("--vault-token", token);
                } else if let Some(token_path) = non_empty(vault.token_path.as_deref()) {
                    args.flag("--vault-token-path", token_path);
                } else if let Some(role) = non_empty(vault.role.as_deref()) {
                    args.flag("--vault-role", role);
                    args.flag("--vault-auth-path", or_empty(vault.auth_path.as_deref()));
                }
            }
            UnsealBackend::Hsm { hsm, secret } => {
                args.flag("--hsm-module-path", &hsm.module_path);
                args.flag("--hsm-slot-id", hsm.slot_id.to_string());
                args.flag("--hsm-key-label", &hsm.key_label);
                if let Some(pin) = non_empty(hsm.pin.as_deref()) {
                    args.flag("--hsm-pin", pin);
                }
                if let Some(token_label) = non_empty(hsm.token_label.as_deref()) {
                    args.flag("--hsm-token-label", token_label);
                }
                if let Some(secret) = secret {
                    args.k8s_secret(secret, cluster);
                }
            }
            UnsealBackend::Kubernetes(kubernetes) => {
                let default_name = format!("{}{DEFAULT_UNSEAL_KEYS_SECRET_SUFFIX}", cluster.name);
                let secret = KeysSecret {
                    namespace: non_empty(kubernetes.secret_namespace.as_deref())
                        .unwrap_or(&cluster.namespace),
                    name: non_empty(kubernetes.secret_name.as_deref()).unwrap_or(&default_name),
                };
                args.k8s_secret(secret, cluster);
            }
        }

        args.0
    }
}

#[derive(Default)]
struct Args(Vec<String>);

impl Args {
    fn push(&mut self, arg: impl Into<String>) {
        self.0.push(arg.into());
    }

    fn flag(&mut self, name: &str, value: impl Into<String>) {
        self.push(name);
        self.push(value);
    }

    fn k8s_secret(&mut self, secret: KeysSecret<'_>, cluster: &ClusterIdentity) {
        self.flag("--k8s-secret-namespace", secret.namespace);
        self.flag("--k8s-secret-name", secret.name);
        self.flag("--k8s-secret-labels", cluster.labels.to_selector_string());
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.is_empty())
}

fn or_empty(value: Option<&str>) -> &str {
    value.unwrap_or_default()
}
