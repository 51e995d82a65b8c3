use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use vault_operator::{
    CustomResourceExt, YamlSchema,
    config::DerivedFacts,
    crd::{Ingress, Vault},
    k8s_openapi::{
        api::core::v1::PersistentVolumeClaim,
        apimachinery::pkg::apis::meta::v1::LabelSelector,
    },
    logging::{self, LogFormat},
    resolved::{self, ResolvedVault},
    shared::{self, time::Duration, yaml::SerializeOptions},
};

const APP_NAME: &str = "vault-resolver";
const LOG_ENV: &str = "VAULT_RESOLVER_LOG";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize logging"))]
    InitializeLogging { source: logging::Error },

    #[snafu(display("failed to print the Vault CRD"))]
    PrintCrd { source: shared::crd::Error },

    #[snafu(display("failed to read manifest {path:?}"))]
    ReadManifest {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse Vault manifest in {path:?}"))]
    ParseManifest {
        source: serde_yaml::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to resolve Vault {name:?}"))]
    Resolve {
        source: resolved::Error,
        name: String,
    },

    #[snafu(display("failed to render the external configuration of Vault {name:?}"))]
    ExternalConfig {
        source: resolved::Error,
        name: String,
    },

    #[snafu(display("failed to print resolution report"))]
    PrintReport { source: shared::yaml::Error },
}

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Opts {
    /// Format of the log output.
    #[arg(long, env = "VAULT_RESOLVER_LOG_FORMAT", value_enum, default_value_t)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Prints the Vault CustomResourceDefinition as YAML.
    Crd,

    /// Prints what the operator derives from the Vault resources in a
    /// manifest file.
    Resolve {
        /// YAML file with one or more Vault resources.
        #[arg(long, short)]
        file: PathBuf,
    },
}

/// Everything derived from a single `Vault` resource.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    name: String,
    namespace: String,
    image: String,
    bank_vaults_image: String,
    statsd_image: String,
    fluentd_image: String,
    velero_fsfreeze_image: String,

    /// [`None`] if the image tag is not a version, e.g. `latest`.
    server_version: Option<String>,

    facts: DerivedFacts,
    unseal_mode: String,
    unseal_args: Vec<String>,
    hsm_daemon_needed: bool,
    api_port_name: String,
    raft_leader_api_scheme: String,
    raft_bootstrap_follower: bool,
    tls_expiry_threshold: Duration,
    vault_selector: LabelSelector,
    vault_configurer_selector: LabelSelector,
    config: serde_json::Map<String, serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    external_config: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    ingress: Option<Ingress>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    volume_claim_templates: Vec<PersistentVolumeClaim>,
}

impl Report {
    fn new(resolved: &ResolvedVault) -> Result<Self, Error> {
        let server_version = match resolved.server_version() {
            Ok(version) => Some(version.to_string()),
            Err(err) => {
                tracing::warn!(
                    error = &err as &dyn std::error::Error,
                    image = resolved.spec().image.as_deref().unwrap_or_default(),
                    "unable to determine Vault server version"
                );
                None
            }
        };

        let external_config = resolved.external_config_json().context(ExternalConfigSnafu {
            name: resolved.identity.name.clone(),
        })?;

        Ok(Self {
            name: resolved.identity.name.clone(),
            namespace: resolved.identity.namespace.clone(),
            image: resolved.image.clone(),
            bank_vaults_image: resolved.bank_vaults_image.clone(),
            statsd_image: resolved.statsd_image.clone(),
            fluentd_image: resolved.fluentd_image.clone(),
            velero_fsfreeze_image: resolved.velero_fsfreeze_image.clone(),
            server_version,
            facts: resolved.facts(),
            unseal_mode: resolved.unseal_mode().to_string(),
            unseal_args: resolved.unseal_args(),
            hsm_daemon_needed: resolved.hsm_daemon_needed(),
            api_port_name: resolved.api_port_name(),
            raft_leader_api_scheme: resolved.raft_leader_api_scheme(),
            raft_bootstrap_follower: resolved.is_raft_bootstrap_follower(),
            tls_expiry_threshold: resolved.tls_expiry_threshold,
            vault_selector: resolved.labels_for_vault().to_label_selector(),
            vault_configurer_selector: resolved.labels_for_vault_configurer().to_label_selector(),
            config: resolved.merged_config(),
            external_config,
            ingress: resolved.ingress(),
            volume_claim_templates: resolved.volume_claim_templates(),
        })
    }
}

#[snafu::report]
fn main() -> Result<(), Error> {
    let opts = Opts::parse();
    logging::initialize_logging(LOG_ENV, APP_NAME, opts.log_format)
        .context(InitializeLoggingSnafu)?;

    match opts.command {
        Command::Crd => Vault::print_yaml_schema().context(PrintCrdSnafu),
        Command::Resolve { file } => resolve(&file),
    }
}

fn resolve(path: &Path) -> Result<(), Error> {
    let contents = std::fs::read_to_string(path).context(ReadManifestSnafu { path })?;

    for document in serde_yaml::Deserializer::from_str(&contents) {
        let vault = Vault::deserialize(document).context(ParseManifestSnafu { path })?;
        let name = vault.metadata.name.clone().unwrap_or_default();
        tracing::info!(vault.name = %name, "resolving Vault");

        let resolved = ResolvedVault::new(&vault).context(ResolveSnafu { name })?;
        Report::new(&resolved)?
            .print_yaml(SerializeOptions::default())
            .context(PrintReportSnafu)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use serde_json::json;

    use super::*;

    #[test]
    fn report_contains_everything_resolved() {
        let vault: Vault = serde_yaml::from_str(indoc! {"
            apiVersion: vault.banzaicloud.com/v1alpha1
            kind: Vault
            metadata:
              name: vault
              namespace: vault-system
            spec:
              image: hashicorp/vault:1.15.2
              config:
                storage:
                  raft: {}
              externalConfig:
                policies:
                  - name: allow_secrets
              ingress: {}
              volumeClaimTemplates:
                - metadata:
                    name: vault-raft
        "})
        .expect("test manifest is valid");
        let resolved = ResolvedVault::new(&vault).expect("test Vault resolves");

        let report = Report::new(&resolved).expect("report can be built");
        let report = serde_json::to_value(&report).expect("report is serializable");

        assert_eq!(report["serverVersion"], json!("1.15.2"));
        assert_eq!(report["bankVaultsImage"], json!(resolved::DEFAULT_BANK_VAULTS_IMAGE));
        assert_eq!(report["veleroFsfreezeImage"], json!(resolved::DEFAULT_VELERO_FSFREEZE_IMAGE));
        assert_eq!(report["tlsExpiryThreshold"], json!("168h"));
        assert_eq!(
            report["vaultConfigurerSelector"]["matchLabels"],
            json!({"app.kubernetes.io/name": "vault-configurator", "vault_cr": "vault"})
        );
        assert_eq!(
            report["externalConfig"],
            json!(r#"{"policies":[{"name":"allow_secrets"}]}"#)
        );
        assert_eq!(
            report["ingress"]["spec"]["defaultBackend"]["service"]["name"],
            json!("vault")
        );
        assert_eq!(
            report["volumeClaimTemplates"][0]["metadata"]["name"],
            json!("vault-raft")
        );
    }

    #[test]
    fn report_leaves_out_unset_parts() {
        let vault: Vault = serde_yaml::from_str(indoc! {"
            apiVersion: vault.banzaicloud.com/v1alpha1
            kind: Vault
            metadata:
              name: vault
              namespace: vault-system
            spec: {}
        "})
        .expect("test manifest is valid");
        let resolved = ResolvedVault::new(&vault).expect("test Vault resolves");

        let report = Report::new(&resolved).expect("report can be built");
        let report = serde_json::to_value(&report).expect("report is serializable");

        assert_eq!(report["serverVersion"], serde_json::Value::Null);
        assert!(report.get("externalConfig").is_none());
        assert!(report.get("ingress").is_none());
        assert!(report.get("volumeClaimTemplates").is_none());
    }
}
