//! Resolves the declared state of a `Vault` custom resource into the facts and
//! artifacts the rest of the operator consumes: storage and HA classification,
//! the bank-vaults unseal arguments, defaulted images and metadata, and the
//! final Vault configuration document.

pub mod config;
pub mod crd;
pub mod deep_merger;
pub mod image;
pub mod kvp;
pub mod logging;
pub mod resolved;
pub mod utils;

// External re-exports
pub use k8s_openapi;
pub use kube;
pub use schemars;
// Internal re-exports
pub use vault_shared as shared;
pub use vault_shared::{crd::CustomResourceExt, yaml::YamlSchema};
