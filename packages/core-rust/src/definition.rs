//! Service definitions: operations, representations and the glossary.
//!
//! A [`ServiceDefinition`] is the schema a remote client is built from. It is
//! read from a JSON service description of the shape:
//!
//! ```json
//! {
//!   "service": { "name": "Vpos", "code_name": "vpos", "version": "0.1" },
//!   "operations": {
//!     "users": {
//!       "get_user": {
//!         "name": "Get user", "method": "get", "path": "/users/:user_id",
//!         "response": [ { "element": "user", "type": "user", "required": true } ]
//!       }
//!     }
//!   },
//!   "proxy_operations": {
//!     "users": { "get_avatar": { "method": "get", "path": "/avatars/:id", "service": "media" } }
//!   },
//!   "representations": { "user": [ { "field": "email", "type": "string" } ] },
//!   "glossary": { "user_identifier": { "short_name": "uid" } }
//! }
//! ```
//!
//! `operations` may also be a flat array of operations carrying their own
//! `code_name`; those land in a namespace named after the service.

use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::glossary::{Glossary, GlossaryError, GlossaryTerm};
use crate::method::{HttpMethod, UnsupportedMethod};

/// Sentinel type name for open, schema-less maps.
pub const VARIABLE_TYPE: &str = "variable";

/// Representations keyed by name.
pub type Representations = IndexMap<String, Representation>;

// ---------------------------------------------------------------------------
// Field
// ---------------------------------------------------------------------------

/// A typed slot: either a response element of an operation or a field of a
/// representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    #[serde(alias = "field", alias = "element")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Only an explicit `false` makes a field optional.
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Scalar type name, representation name, or [`VARIABLE_TYPE`].
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// Element type of a homogeneous collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elements_type: Option<String>,
}

fn default_required() -> bool {
    true
}

/// How a field's raw value is to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind<'a> {
    /// Nested object described by a representation.
    Representation(&'a Representation),
    /// Array whose entries are all of the named type.
    Collection(&'a str),
    /// Open map, passed through untyped.
    Variable,
    /// Declared primitive type name (validated at decode time).
    Scalar(&'a str),
    /// No type information at all.
    Untyped,
}

impl Field {
    /// Creates a required field of the given type.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            required: true,
            default: None,
            type_name: Some(type_name.into()),
            elements_type: None,
        }
    }

    /// Resolves the field's kind against a representation set.
    ///
    /// A type naming a known representation wins over everything else, then a
    /// collection marker, then the variable sentinel, then a scalar name.
    #[must_use]
    pub fn kind<'a>(&'a self, representations: &'a Representations) -> FieldKind<'a> {
        if let Some(rep) = self
            .type_name
            .as_deref()
            .and_then(|name| representations.get(name))
        {
            return FieldKind::Representation(rep);
        }
        if let Some(elements) = self.elements_type.as_deref() {
            return FieldKind::Collection(elements);
        }
        match self.type_name.as_deref() {
            Some(VARIABLE_TYPE) => FieldKind::Variable,
            Some(name) => FieldKind::Scalar(name),
            None => FieldKind::Untyped,
        }
    }
}

// ---------------------------------------------------------------------------
// Representation / Operation
// ---------------------------------------------------------------------------

/// A named object shape with an ordered field list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Representation {
    pub name: String,
    pub fields: Vec<Field>,
}

/// One HTTP-bound endpoint of a service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Operation {
    pub code_name: String,
    pub namespace: String,
    /// Human-readable operation name.
    pub name: String,
    pub description: Option<String>,
    /// Method as declared; validated when the operation is dispatched.
    pub http_method: String,
    /// Path template, possibly with `:placeholder` tokens.
    pub path: String,
    pub response_elements: Vec<Field>,
    /// For proxy operations, the code name of the service that hosts them.
    pub service_name: Option<String>,
}

impl Operation {
    /// Parses the declared HTTP method.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedMethod` for anything other than GET, POST, PUT or DELETE.
    pub fn method(&self) -> Result<HttpMethod, UnsupportedMethod> {
        HttpMethod::from_str(&self.http_method)
    }
}

// ---------------------------------------------------------------------------
// ServiceDefinition
// ---------------------------------------------------------------------------

/// Errors raised while reading a service description.
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("malformed service description: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Glossary(#[from] GlossaryError),
    #[error("operation in a flat operation list has no code_name")]
    MissingCodeName,
}

/// A complete service schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceDefinition {
    pub name: String,
    pub code_name: String,
    pub version: String,
    /// Operations grouped by namespace, in declaration order.
    pub operations: IndexMap<String, Vec<Operation>>,
    /// Operations hosted by other services, grouped by namespace.
    pub proxy_operations: IndexMap<String, Vec<Operation>>,
    pub representations: Representations,
    pub glossary: Glossary,
}

impl ServiceDefinition {
    /// Reads a definition from a parsed JSON service description.
    ///
    /// # Errors
    ///
    /// Returns `DefinitionError` if the description does not have the expected
    /// shape, a flat operation lacks a code name, or the glossary has duplicates.
    pub fn from_json(description: Value) -> Result<Self, DefinitionError> {
        let raw: RawDefinition = serde_json::from_value(description)?;
        raw.into_definition()
    }

    /// Reads a definition from JSON text.
    ///
    /// # Errors
    ///
    /// See [`ServiceDefinition::from_json`].
    pub fn from_json_str(description: &str) -> Result<Self, DefinitionError> {
        let raw: RawDefinition = serde_json::from_str(description)?;
        raw.into_definition()
    }

    /// Looks up an operation by namespace and code name.
    #[must_use]
    pub fn operation(&self, namespace: &str, code_name: &str) -> Option<&Operation> {
        self.operations
            .get(namespace)?
            .iter()
            .find(|op| op.code_name == code_name)
    }

    /// Looks up an operation by code name across all namespaces.
    #[must_use]
    pub fn find_operation(&self, code_name: &str) -> Option<&Operation> {
        self.operations
            .values()
            .flatten()
            .find(|op| op.code_name == code_name)
    }

    /// Looks up a proxy operation by code name across all namespaces.
    #[must_use]
    pub fn find_proxy_operation(&self, code_name: &str) -> Option<&Operation> {
        self.proxy_operations
            .values()
            .flatten()
            .find(|op| op.code_name == code_name)
    }

    /// Code names of every regular and proxy operation, in declaration order.
    pub fn operation_names(&self) -> impl Iterator<Item = &str> {
        self.operations
            .values()
            .chain(self.proxy_operations.values())
            .flatten()
            .map(|op| op.code_name.as_str())
    }

    #[must_use]
    pub fn representation(&self, name: &str) -> Option<&Representation> {
        self.representations.get(name)
    }

    /// Merges another definition (typically the proxy description published
    /// by a remote service) into this one.
    ///
    /// Operations are matched by namespace and code name; incoming ones replace
    /// existing ones. Incoming representations replace same-named ones. Glossary
    /// terms that do not collide with existing terms are added.
    pub fn merge(&mut self, other: ServiceDefinition) {
        merge_operations(&mut self.operations, other.operations);
        merge_operations(&mut self.proxy_operations, other.proxy_operations);
        self.representations.extend(other.representations);
        self.glossary.absorb(&other.glossary);
    }
}

fn merge_operations(
    target: &mut IndexMap<String, Vec<Operation>>,
    incoming: IndexMap<String, Vec<Operation>>,
) {
    for (namespace, operations) in incoming {
        let existing = target.entry(namespace).or_default();
        for op in operations {
            match existing.iter_mut().find(|e| e.code_name == op.code_name) {
                Some(slot) => *slot = op,
                None => existing.push(op),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Raw description shape
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawDefinition {
    #[serde(default)]
    service: RawService,
    #[serde(default)]
    code_name: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    version: Option<String>,
    #[serde(default)]
    operations: RawOperations,
    #[serde(default)]
    proxy_operations: RawOperations,
    #[serde(default)]
    representations: IndexMap<String, Vec<Field>>,
    #[serde(default)]
    glossary: IndexMap<String, RawTerm>,
}

#[derive(Debug, Default, Deserialize)]
struct RawService {
    #[serde(default, alias = "service")]
    name: Option<String>,
    #[serde(default)]
    code_name: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawOperations {
    Namespaced(IndexMap<String, IndexMap<String, RawOperation>>),
    Flat(Vec<RawOperation>),
}

impl Default for RawOperations {
    fn default() -> Self {
        Self::Namespaced(IndexMap::new())
    }
}

#[derive(Debug, Deserialize)]
struct RawOperation {
    #[serde(default)]
    code_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(alias = "http_method")]
    method: String,
    path: String,
    #[serde(default, alias = "response_elements")]
    response: Vec<Field>,
    #[serde(default, alias = "service_name")]
    service: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTerm {
    short_name: String,
    #[serde(default)]
    description: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

impl RawOperation {
    fn into_operation(self, namespace: &str, code_name: String) -> Operation {
        Operation {
            name: self.name.unwrap_or_else(|| code_name.clone()),
            code_name,
            namespace: namespace.to_string(),
            description: self.description,
            http_method: self.method,
            path: self.path,
            response_elements: self.response,
            service_name: self.service,
        }
    }
}

impl RawOperations {
    fn into_operations(
        self,
        default_namespace: &str,
    ) -> Result<IndexMap<String, Vec<Operation>>, DefinitionError> {
        let mut out: IndexMap<String, Vec<Operation>> = IndexMap::new();
        match self {
            Self::Namespaced(namespaces) => {
                for (namespace, ops) in namespaces {
                    let list = ops
                        .into_iter()
                        .map(|(code_name, raw)| {
                            let code_name = raw.code_name.clone().unwrap_or(code_name);
                            raw.into_operation(&namespace, code_name)
                        })
                        .collect();
                    out.insert(namespace, list);
                }
            }
            Self::Flat(ops) => {
                let list = out.entry(default_namespace.to_string()).or_default();
                for raw in ops {
                    let code_name = raw.code_name.clone().ok_or(DefinitionError::MissingCodeName)?;
                    list.push(raw.into_operation(default_namespace, code_name));
                }
            }
        }
        Ok(out)
    }
}

impl RawDefinition {
    fn into_definition(self) -> Result<ServiceDefinition, DefinitionError> {
        let code_name = self
            .service
            .code_name
            .or(self.code_name)
            .unwrap_or_default();
        let version = self.service.version.or(self.version).unwrap_or_default();
        let name = self.service.name.unwrap_or_else(|| code_name.clone());

        let terms = self
            .glossary
            .into_iter()
            .map(|(long_name, term)| GlossaryTerm {
                short_name: term.short_name,
                long_name,
                description: term.description,
            })
            .collect();

        let representations = self
            .representations
            .into_iter()
            .map(|(name, fields)| (name.clone(), Representation { name, fields }))
            .collect();

        Ok(ServiceDefinition {
            operations: self.operations.into_operations(&code_name)?,
            proxy_operations: self.proxy_operations.into_operations(&code_name)?,
            representations,
            glossary: Glossary::new(terms)?,
            name,
            code_name,
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn vpos() -> ServiceDefinition {
        ServiceDefinition::from_json(json!({
            "service": { "service": "Vpos", "code_name": "vpos", "version": 0.1 },
            "operations": {
                "users": {
                    "get_user": {
                        "name": "Get user",
                        "method": "get",
                        "path": "/users/:user_id",
                        "response": [
                            { "element": "user", "type": "user", "required": true },
                            { "element": "tags", "elements_type": "string" },
                            { "element": "extra", "type": "variable", "required": false }
                        ]
                    }
                }
            },
            "proxy_operations": {
                "media": {
                    "get_avatar": { "method": "get", "path": "/avatars/:id", "service": "media" }
                }
            },
            "representations": {
                "user": [ { "field": "email", "type": "string" } ]
            },
            "glossary": { "user_identifier": { "short_name": "uid" } }
        }))
        .unwrap()
    }

    #[test]
    fn reads_service_header() {
        let def = vpos();
        assert_eq!(def.name, "Vpos");
        assert_eq!(def.code_name, "vpos");
        assert_eq!(def.version, "0.1");
    }

    #[test]
    fn reads_namespaced_operations() {
        let def = vpos();
        let op = def.operation("users", "get_user").unwrap();
        assert_eq!(op.name, "Get user");
        assert_eq!(op.method().unwrap(), HttpMethod::Get);
        assert_eq!(op.path, "/users/:user_id");
        assert_eq!(op.response_elements.len(), 3);
        assert!(op.response_elements[0].required);
        assert!(!op.response_elements[2].required);
        assert!(def.operation("other", "get_user").is_none());
    }

    #[test]
    fn reads_proxy_operations() {
        let def = vpos();
        assert!(def.find_operation("get_avatar").is_none());
        let proxy = def.find_proxy_operation("get_avatar").unwrap();
        assert_eq!(proxy.service_name.as_deref(), Some("media"));
        assert_eq!(proxy.namespace, "media");
    }

    #[test]
    fn flat_operations_use_service_namespace() {
        let def = ServiceDefinition::from_json(json!({
            "service": { "code_name": "billing", "version": "1.0" },
            "operations": [ { "code_name": "charge", "method": "post", "path": "/charges" } ]
        }))
        .unwrap();
        assert!(def.operation("billing", "charge").is_some());
    }

    #[test]
    fn flat_operation_without_code_name_fails() {
        let err = ServiceDefinition::from_json(json!({
            "operations": [ { "method": "post", "path": "/charges" } ]
        }))
        .unwrap_err();
        assert!(matches!(err, DefinitionError::MissingCodeName));
    }

    #[test]
    fn field_kinds_resolve_in_priority_order() {
        let def = vpos();
        let op = def.find_operation("get_user").unwrap();
        let reps = &def.representations;
        assert!(matches!(op.response_elements[0].kind(reps), FieldKind::Representation(r) if r.name == "user"));
        assert_eq!(op.response_elements[1].kind(reps), FieldKind::Collection("string"));
        assert_eq!(op.response_elements[2].kind(reps), FieldKind::Variable);
        assert_eq!(Field::new("n", "integer").kind(reps), FieldKind::Scalar("integer"));
    }

    #[test]
    fn glossary_is_read_from_long_name_keys() {
        let def = vpos();
        assert_eq!(def.glossary.to_schema_name("user_identifier"), "uid");
    }

    #[test]
    fn operation_names_cover_regular_and_proxy() {
        let def = vpos();
        let names: Vec<&str> = def.operation_names().collect();
        assert_eq!(names, vec!["get_user", "get_avatar"]);
    }

    #[test]
    fn merge_adds_and_replaces() {
        let mut def = vpos();
        let remote = ServiceDefinition::from_json(json!({
            "service": { "code_name": "media", "version": "2.0" },
            "operations": {
                "media": {
                    "get_avatar": {
                        "method": "get", "path": "/avatars/:id",
                        "response": [ { "element": "avatar", "type": "avatar" } ]
                    }
                }
            },
            "representations": { "avatar": [ { "field": "url", "type": "string" } ] },
            "glossary": { "avatar_url": { "short_name": "au" } }
        }))
        .unwrap();

        def.merge(remote);

        let joined = def.find_operation("get_avatar").unwrap();
        assert_eq!(joined.response_elements[0].name, "avatar");
        assert!(def.representation("avatar").is_some());
        assert!(def.representation("user").is_some());
        assert_eq!(def.glossary.to_display_name("au"), "avatar_url");
        assert_eq!(def.code_name, "vpos");
    }

    #[test]
    fn merge_twice_is_stable() {
        let remote = ServiceDefinition::from_json(json!({
            "operations": { "media": { "x": { "method": "get", "path": "/x" } } }
        }))
        .unwrap();
        let mut once = vpos();
        once.merge(remote.clone());
        let mut twice = once.clone();
        twice.merge(remote);
        assert_eq!(once, twice);
    }
}
