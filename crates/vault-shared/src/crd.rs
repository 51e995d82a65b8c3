use snafu::{ResultExt, Snafu};

use crate::yaml::{SerializeOptions, YamlSchema};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to print CRD YAML schema to stdout"))]
    PrintSchema { source: crate::yaml::Error },

    #[snafu(display("failed to generate CRD YAML schema"))]
    GenerateSchema { source: crate::yaml::Error },
}

/// Provides YAML output of the `CustomResourceDefinition` of a Kubernetes custom resource.
pub trait CustomResourceExt: kube::CustomResourceExt {
    /// Generates the YAML schema of the `CustomResourceDefinition` and prints it to [stdout].
    ///
    /// The printed YAML string is an explicit document with leading dashes (`---`).
    ///
    /// [stdout]: std::io::stdout
    fn print_yaml_schema() -> Result<()> {
        Self::crd()
            .print_yaml(SerializeOptions::default())
            .context(PrintSchemaSnafu)
    }

    /// Generates the YAML schema of the `CustomResourceDefinition` and returns it as a [`String`].
    fn yaml_schema() -> Result<String> {
        Self::crd()
            .to_yaml_string(SerializeOptions::default())
            .context(GenerateSchemaSnafu)
    }
}

impl<T> CustomResourceExt for T where T: kube::CustomResourceExt {}
