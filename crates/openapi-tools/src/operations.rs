//! Operation descriptors derived from parsed OpenAPI documents.
//!
//! A descriptor is the execution-facing view of one operation: method, path
//! template, parameter slots with locations, body expectations, and whether
//! the spec declares an auth requirement. Descriptors are owned by the spec
//! cache and rebuilt whenever a document is (re)fetched; the execution path
//! never mutates them.

use openapiv3::{
    OpenAPI, Operation, Parameter, ParameterSchemaOrContent, PathItem, ReferenceOr, RequestBody,
    Schema, SchemaKind, Type,
};
use serde_json::{Value, json};
use std::collections::HashMap;

/// Where a parameter goes on the outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamLocation {
    Path,
    Query,
    Header,
}

#[derive(Debug, Clone)]
pub struct OperationParameter {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    /// JSON Schema fragment for the parameter value (primitive-typed).
    pub schema: Value,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OperationDescriptor {
    pub operation_id: String,
    /// Lowercase HTTP method (`get`, `post`, ...).
    pub method: String,
    /// Path template with `{name}` slots (e.g. `/pet/{petId}`).
    pub path: String,
    pub description: String,
    pub parameters: Vec<OperationParameter>,
    /// Whether the operation declares a request body.
    pub has_body: bool,
    pub body_required: bool,
    /// Content type the body is serialized as (JSON is the default).
    pub body_content_type: String,
    /// Whether the spec declares a security requirement for this operation.
    pub requires_auth: bool,
}

impl OperationDescriptor {
    /// JSON Schema for the tool's input object, as advertised over MCP.
    ///
    /// One property per declared parameter plus a `body` property for
    /// operations with a request body. Extra properties are allowed so
    /// callers can pass fields the spec models loosely.
    #[must_use]
    pub fn input_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required: Vec<String> = Vec::new();

        for param in &self.parameters {
            let mut schema = param.schema.clone();
            if let (Some(desc), Some(obj)) = (&param.description, schema.as_object_mut()) {
                obj.insert("description".to_string(), Value::String(desc.clone()));
            }
            properties.insert(param.name.clone(), schema);
            if param.required {
                required.push(param.name.clone());
            }
        }

        if self.has_body {
            properties.insert(
                "body".to_string(),
                json!({ "type": "object", "description": "Request body" }),
            );
            if self.body_required {
                required.push("body".to_string());
            }
        }

        let mut schema = json!({
            "type": "object",
            "properties": properties,
            "additionalProperties": true,
        });
        if !required.is_empty()
            && let Some(obj) = schema.as_object_mut()
        {
            obj.insert("required".to_string(), json!(required));
        }
        schema
    }
}

/// Extract descriptors for every operation in the spec, keyed by operation id.
///
/// Operations without an `operationId` get a generated
/// `<method>_<sanitized path>` id. Path items behind external `$ref`s are
/// skipped with a warning; duplicate operation ids keep the first occurrence.
#[must_use]
pub fn extract_operations(spec: &OpenAPI) -> HashMap<String, OperationDescriptor> {
    let spec_requires_auth = spec.security.as_ref().is_some_and(|s| !s.is_empty());
    let mut out: HashMap<String, OperationDescriptor> = HashMap::new();

    for (path, item) in &spec.paths.paths {
        let ReferenceOr::Item(path_item) = item else {
            tracing::warn!(path = %path, "skipping $ref path item (external refs are not resolved)");
            continue;
        };

        for (method, op) in operations_of(path_item) {
            let operation_id = op
                .operation_id
                .clone()
                .unwrap_or_else(|| fallback_operation_id(method, path));

            let descriptor =
                build_descriptor(spec, path_item, path, method, op, operation_id.clone(), spec_requires_auth);

            if out.contains_key(&operation_id) {
                tracing::warn!(operation_id = %operation_id, "duplicate operationId in spec; keeping first");
                continue;
            }
            out.insert(operation_id, descriptor);
        }
    }

    out
}

/// The first server URL declared by the spec, if any.
#[must_use]
pub fn server_url(spec: &OpenAPI) -> Option<String> {
    spec.servers.first().map(|s| s.url.clone())
}

fn operations_of(item: &PathItem) -> Vec<(&'static str, &Operation)> {
    [
        ("get", item.get.as_ref()),
        ("post", item.post.as_ref()),
        ("put", item.put.as_ref()),
        ("patch", item.patch.as_ref()),
        ("delete", item.delete.as_ref()),
    ]
    .into_iter()
    .filter_map(|(m, op)| op.map(|op| (m, op)))
    .collect()
}

fn build_descriptor(
    spec: &OpenAPI,
    path_item: &PathItem,
    path: &str,
    method: &str,
    op: &Operation,
    operation_id: String,
    spec_requires_auth: bool,
) -> OperationDescriptor {
    let parameters = collect_parameters(spec, path_item, op);
    let (has_body, body_required, body_content_type) = body_expectations(spec, op);

    let requires_auth = op
        .security
        .as_ref()
        .map_or(spec_requires_auth, |s| !s.is_empty());

    let description = op
        .description
        .clone()
        .or_else(|| op.summary.clone())
        .unwrap_or_default();

    OperationDescriptor {
        operation_id,
        method: method.to_string(),
        path: path.to_string(),
        description,
        parameters,
        has_body,
        body_required,
        body_content_type,
        requires_auth,
    }
}

/// Merge path-item level parameters with operation-level ones; the operation
/// wins when both declare the same `(name, location)`.
fn collect_parameters(
    spec: &OpenAPI,
    path_item: &PathItem,
    op: &Operation,
) -> Vec<OperationParameter> {
    let mut merged: Vec<OperationParameter> = Vec::new();

    for source in [&path_item.parameters, &op.parameters] {
        for param_ref in source {
            let Some(param) = resolve_parameter(spec, param_ref) else {
                tracing::warn!("skipping unresolvable parameter $ref");
                continue;
            };
            let Some(converted) = convert_parameter(spec, param) else {
                continue;
            };
            merged.retain(|p| !(p.name == converted.name && p.location == converted.location));
            merged.push(converted);
        }
    }

    merged
}

fn convert_parameter(spec: &OpenAPI, param: &Parameter) -> Option<OperationParameter> {
    let (location, data) = match param {
        Parameter::Path { parameter_data, .. } => (ParamLocation::Path, parameter_data),
        Parameter::Query { parameter_data, .. } => (ParamLocation::Query, parameter_data),
        Parameter::Header { parameter_data, .. } => (ParamLocation::Header, parameter_data),
        // Cookie parameters are not forwarded.
        Parameter::Cookie { .. } => return None,
    };

    let schema = match &data.format {
        ParameterSchemaOrContent::Schema(schema_ref) => schema_to_value(spec, schema_ref),
        ParameterSchemaOrContent::Content(_) => json!({}),
    };

    Some(OperationParameter {
        name: data.name.clone(),
        location,
        // Path parameters are always required regardless of what the spec says.
        required: data.required || location == ParamLocation::Path,
        schema,
        description: data.description.clone(),
    })
}

fn body_expectations(spec: &OpenAPI, op: &Operation) -> (bool, bool, String) {
    let Some(body_ref) = &op.request_body else {
        return (false, false, String::new());
    };
    let Some(body) = resolve_request_body(spec, body_ref) else {
        return (false, false, String::new());
    };
    if body.content.is_empty() {
        return (false, false, String::new());
    }

    let content_type = if body.content.contains_key("application/json") {
        "application/json".to_string()
    } else {
        body.content
            .keys()
            .next()
            .cloned()
            .unwrap_or_else(|| "application/json".to_string())
    };

    (true, body.required, content_type)
}

fn resolve_parameter<'a>(
    spec: &'a OpenAPI,
    param: &'a ReferenceOr<Parameter>,
) -> Option<&'a Parameter> {
    match param {
        ReferenceOr::Item(p) => Some(p),
        ReferenceOr::Reference { reference } => {
            let key = reference.strip_prefix("#/components/parameters/")?;
            match spec.components.as_ref()?.parameters.get(key)? {
                ReferenceOr::Item(p) => Some(p),
                ReferenceOr::Reference { .. } => None,
            }
        }
    }
}

fn resolve_request_body<'a>(
    spec: &'a OpenAPI,
    body: &'a ReferenceOr<RequestBody>,
) -> Option<&'a RequestBody> {
    match body {
        ReferenceOr::Item(b) => Some(b),
        ReferenceOr::Reference { reference } => {
            let key = reference.strip_prefix("#/components/request_bodies/")
                .or_else(|| reference.strip_prefix("#/components/requestBodies/"))?;
            match spec.components.as_ref()?.request_bodies.get(key)? {
                ReferenceOr::Item(b) => Some(b),
                ReferenceOr::Reference { .. } => None,
            }
        }
    }
}

/// Map an OpenAPI schema to a primitive JSON Schema fragment.
///
/// Compound schemas (oneOf/allOf/any) become the empty schema so argument
/// validation stays permissive rather than wrongly strict.
fn schema_to_value(spec: &OpenAPI, schema_ref: &ReferenceOr<Schema>) -> Value {
    let schema = match schema_ref {
        ReferenceOr::Item(s) => s,
        ReferenceOr::Reference { reference } => {
            let resolved = reference
                .strip_prefix("#/components/schemas/")
                .and_then(|key| spec.components.as_ref()?.schemas.get(key))
                .and_then(|r| match r {
                    ReferenceOr::Item(s) => Some(s),
                    ReferenceOr::Reference { .. } => None,
                });
            match resolved {
                Some(s) => s,
                None => return json!({}),
            }
        }
    };

    match &schema.schema_kind {
        SchemaKind::Type(Type::String { .. }) => json!({ "type": "string" }),
        SchemaKind::Type(Type::Integer { .. }) => json!({ "type": "integer" }),
        SchemaKind::Type(Type::Number { .. }) => json!({ "type": "number" }),
        SchemaKind::Type(Type::Boolean { .. }) => json!({ "type": "boolean" }),
        SchemaKind::Type(Type::Array { .. }) => json!({ "type": "array" }),
        SchemaKind::Type(Type::Object { .. }) => json!({ "type": "object" }),
        _ => json!({}),
    }
}

fn fallback_operation_id(method: &str, path: &str) -> String {
    let sanitized: String = path
        .trim_matches('/')
        .chars()
        .filter_map(|ch| match ch {
            '/' => Some('_'),
            '{' | '}' => None,
            other => Some(other),
        })
        .collect();
    if sanitized.is_empty() {
        format!("{method}_root")
    } else {
        format!("{method}_{sanitized}")
    }
}
