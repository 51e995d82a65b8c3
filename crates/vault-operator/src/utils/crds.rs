use k8s_openapi::api::core::v1::{Container, PodSpec};
use schemars::{
    JsonSchema, Schema, SchemaGenerator, json_schema,
    transform::{RecursiveTransform, Transform},
};

/// Schema for fields holding arbitrary, externally validated JSON objects,
/// like the Vault server configuration.
pub fn raw_object_schema(_: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true,
    })
}

/// Schema of a [`PodSpec`] snippet that is merged into a generated pod, so
/// `containers` and every other required field may be left out.
pub fn partial_pod_spec_schema(generator: &mut SchemaGenerator) -> Schema {
    partial_schema::<PodSpec>(generator)
}

/// Schema of a [`Container`] snippet that is merged into a generated
/// container, so even `name` may be left out.
pub fn partial_container_schema(generator: &mut SchemaGenerator) -> Schema {
    partial_schema::<Container>(generator)
}

/// Drops required fields and docs. Without docs the CRD stays well below the
/// size limit of Kubernetes objects.
fn partial_schema<T: JsonSchema>(generator: &mut SchemaGenerator) -> Schema {
    let mut schema = T::json_schema(generator);
    RecursiveTransform(|schema: &mut Schema| {
        schema.remove("required");
        schema.remove("description");
    })
    .transform(&mut schema);

    schema
}
