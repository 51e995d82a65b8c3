/// The well-known Kubernetes app name label key `app.kubernetes.io/name`.
pub const K8S_APP_NAME_KEY: &str = "app.kubernetes.io/name";

/// Label key holding the name of the owning `Vault` resource.
pub const VAULT_CR_KEY: &str = "vault_cr";

pub const VAULT_APP_NAME: &str = "vault";
pub const VAULT_CONFIGURER_APP_NAME: &str = "vault-configurator";
