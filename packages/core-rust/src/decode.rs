//! Response decoding against an operation's response schema.
//!
//! The decoder walks the operation's declared response elements and, for each
//! one, interprets the matching JSON value by its declared kind:
//!
//! | Kind | Result |
//! |------|--------|
//! | representation reference | nested [`DecodedRecord`] |
//! | collection (`elements_type`) | [`DecodedValue::List`] of per-entry results |
//! | `variable` | record of raw values, untyped, no glossary |
//! | scalar | coerced value; coercion failure yields `Null` |
//! | unknown scalar name | [`DecodeError::UnknownType`] |
//!
//! Records keep schema (short) names in their elements map and expose
//! glossary display (long) names through [`DecodedRecord::get`].

use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset, NaiveDate};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::definition::{Field, FieldKind, Operation, Representations, ServiceDefinition, VARIABLE_TYPE};
use crate::glossary::Glossary;
use crate::scalar::{unmarshal_scalar, ScalarType};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Fatal decoding errors. Malformed scalars are not errors; they decode to `Null`.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("response body is not valid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("unknown type `{type_name}` declared for `{field}`")]
    UnknownType { field: String, type_name: String },
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A message reported by the remote service alongside its response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub key: Option<String>,
    pub description: Option<String>,
    pub level: Option<String>,
}

/// Reads a `messages` array (`[{key, dsc, level}]`). Anything that is not an
/// array yields an empty list.
#[must_use]
pub fn build_messages(raw: Option<&Value>) -> Vec<Message> {
    let Some(Value::Array(entries)) = raw else {
        return Vec::new();
    };
    entries
        .iter()
        .map(|entry| {
            let text = |name: &str| entry.get(name).and_then(Value::as_str).map(str::to_string);
            Message {
                key: text("key"),
                description: text("dsc"),
                level: text("level"),
            }
        })
        .collect()
}

/// Extracts the messages from an error body, tolerating non-JSON bodies.
#[must_use]
pub fn messages_from_body(body: &[u8]) -> Vec<Message> {
    serde_json::from_slice::<Value>(body)
        .map(|json| build_messages(json.get("messages")))
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Decoded values
// ---------------------------------------------------------------------------

/// A decoded attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue {
    Null,
    /// Raw JSON passed through verbatim (strings, integers, booleans, objects).
    Json(Value),
    Date(NaiveDate),
    DateTime(DateTime<FixedOffset>),
    Decimal(BigDecimal),
    /// A nested representation or an open `variable` map.
    Record(DecodedRecord),
    List(Vec<DecodedValue>),
}

impl DecodedValue {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Json(value) => value.as_str(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Json(value) => value.as_i64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Json(value) => value.as_bool(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_record(&self) -> Option<&DecodedRecord> {
        match self {
            Self::Record(record) => Some(record),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[DecodedValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_decimal(&self) -> Option<&BigDecimal> {
        match self {
            Self::Decimal(d) => Some(d),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_date_time(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            Self::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Converts back to JSON, keeping schema names for nested records.
    ///
    /// Dates use ISO-8601, date-times RFC 3339, decimals their exact string form.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Json(value) => value.clone(),
            Self::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            Self::DateTime(dt) => Value::String(dt.to_rfc3339()),
            Self::Decimal(d) => Value::String(d.to_string()),
            Self::Record(record) => record.to_json(),
            Self::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }
}

/// An ordered attribute map with two naming views.
///
/// `elements` is keyed by schema (short) names and is what gets serialized.
/// Display (long) names, derived from the glossary, resolve through [`get`](Self::get).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedRecord {
    elements: IndexMap<String, DecodedValue>,
    /// display name -> schema name, only for names the glossary translates.
    display_names: IndexMap<String, String>,
}

impl DecodedRecord {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an attribute under its schema name, registering its display name.
    pub fn insert(&mut self, schema_name: String, display_name: String, value: DecodedValue) {
        if display_name != schema_name {
            self.display_names.insert(display_name, schema_name.clone());
        }
        self.elements.insert(schema_name, value);
    }

    /// Looks up an attribute by its schema (short) name.
    #[must_use]
    pub fn element(&self, schema_name: &str) -> Option<&DecodedValue> {
        self.elements.get(schema_name)
    }

    /// Looks up an attribute by its display (long) name.
    ///
    /// Attributes without a glossary term have identical display and schema
    /// names and are found either way.
    #[must_use]
    pub fn get(&self, display_name: &str) -> Option<&DecodedValue> {
        match self.display_names.get(display_name) {
            Some(schema_name) => self.elements.get(schema_name),
            None => self.elements.get(display_name),
        }
    }

    /// The underlying elements map, keyed by schema names.
    #[must_use]
    pub fn elements(&self) -> &IndexMap<String, DecodedValue> {
        &self.elements
    }

    /// Attributes as `(display_name, value)` pairs, in element order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &DecodedValue)> {
        let reverse: IndexMap<&str, &str> = self
            .display_names
            .iter()
            .map(|(display, schema)| (schema.as_str(), display.as_str()))
            .collect();
        self.elements.iter().map(move |(schema, value)| {
            let display = reverse.get(schema.as_str()).copied().unwrap_or(schema.as_str());
            (display, value)
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Serializes the elements map under schema names.
    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.elements
                .iter()
                .map(|(name, value)| (name.clone(), value.to_json()))
                .collect(),
        )
    }

    fn from_variable(fields: &Map<String, Value>) -> Self {
        let mut record = Self::new();
        for (key, value) in fields {
            record.insert(key.clone(), key.clone(), DecodedValue::Json(value.clone()));
        }
        record
    }
}

/// A decoded operation response.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedResponse {
    pub status_code: u16,
    pub body: String,
    /// Top-level `status` field, if present and a string.
    pub status: Option<String>,
    pub messages: Vec<Message>,
    /// Declared response elements.
    pub record: DecodedRecord,
}

impl DecodedResponse {
    /// See [`DecodedRecord::get`].
    #[must_use]
    pub fn get(&self, display_name: &str) -> Option<&DecodedValue> {
        self.record.get(display_name)
    }

    /// See [`DecodedRecord::element`].
    #[must_use]
    pub fn element(&self, schema_name: &str) -> Option<&DecodedValue> {
        self.record.element(schema_name)
    }

    #[must_use]
    pub fn elements(&self) -> &IndexMap<String, DecodedValue> {
        self.record.elements()
    }
}

// ---------------------------------------------------------------------------
// ResponseDecoder
// ---------------------------------------------------------------------------

/// Decodes response bodies using a definition's representations and glossary.
#[derive(Debug, Clone, Copy)]
pub struct ResponseDecoder<'a> {
    representations: &'a Representations,
    glossary: &'a Glossary,
}

impl<'a> ResponseDecoder<'a> {
    #[must_use]
    pub fn new(representations: &'a Representations, glossary: &'a Glossary) -> Self {
        Self {
            representations,
            glossary,
        }
    }

    #[must_use]
    pub fn for_definition(definition: &'a ServiceDefinition) -> Self {
        Self::new(&definition.representations, &definition.glossary)
    }

    /// Decodes `body` against `operation`'s response elements.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::InvalidJson` for a body that is not JSON and
    /// `DecodeError::UnknownType` when the schema declares a type that is
    /// neither a representation nor a known scalar.
    pub fn decode(
        &self,
        status_code: u16,
        body: &str,
        operation: &Operation,
    ) -> Result<DecodedResponse, DecodeError> {
        self.decode_slice(status_code, body.as_bytes(), operation)
    }

    /// Decodes a raw response body. Bytes that are not UTF-8 JSON fail as
    /// `DecodeError::InvalidJson`.
    ///
    /// # Errors
    ///
    /// See [`Self::decode`].
    pub fn decode_slice(
        &self,
        status_code: u16,
        body: &[u8],
        operation: &Operation,
    ) -> Result<DecodedResponse, DecodeError> {
        let json: Value = serde_json::from_slice(body)?;

        let status = json.get("status").and_then(Value::as_str).map(str::to_string);
        let messages = build_messages(json.get("messages"));

        let empty = Map::new();
        let source = json.as_object().unwrap_or(&empty);
        let record = self.decode_fields(source, &operation.response_elements)?;

        debug!(
            operation = %operation.code_name,
            status_code,
            elements = record.len(),
            "decoded response"
        );

        Ok(DecodedResponse {
            status_code,
            // Parsed JSON is valid UTF-8, so nothing is replaced here.
            body: String::from_utf8_lossy(body).into_owned(),
            status,
            messages,
            record,
        })
    }

    /// Builds a record from `source` following `fields`.
    ///
    /// Present keys are decoded; absent optional fields take their default;
    /// absent required fields produce no attribute.
    fn decode_fields(
        &self,
        source: &Map<String, Value>,
        fields: &[Field],
    ) -> Result<DecodedRecord, DecodeError> {
        let mut record = DecodedRecord::new();
        for field in fields {
            let raw = match source.get(&field.name) {
                Some(value) => value.clone(),
                None if !field.required => field.default.clone().unwrap_or(Value::Null),
                None => continue,
            };
            let value = self.decode_field(field, &raw)?;
            let display = self.glossary.to_display_name(&field.name);
            record.insert(field.name.clone(), display, value);
        }
        Ok(record)
    }

    fn decode_field(&self, field: &Field, raw: &Value) -> Result<DecodedValue, DecodeError> {
        match field.kind(self.representations) {
            FieldKind::Representation(rep) => self.decode_object(raw, &rep.fields),
            FieldKind::Collection(elements_type) => {
                let Value::Array(entries) = raw else {
                    return Ok(DecodedValue::Null);
                };
                entries
                    .iter()
                    .map(|entry| self.decode_typed(&field.name, elements_type, entry))
                    .collect::<Result<Vec<_>, _>>()
                    .map(DecodedValue::List)
            }
            FieldKind::Variable => Ok(decode_variable(raw)),
            FieldKind::Scalar(type_name) => decode_scalar(&field.name, type_name, raw),
            FieldKind::Untyped => Ok(DecodedValue::Null),
        }
    }

    /// Decodes one value by type name: representation, variable, or scalar.
    fn decode_typed(
        &self,
        field_name: &str,
        type_name: &str,
        raw: &Value,
    ) -> Result<DecodedValue, DecodeError> {
        if let Some(rep) = self.representations.get(type_name) {
            return self.decode_object(raw, &rep.fields);
        }
        if type_name == VARIABLE_TYPE {
            return Ok(decode_variable(raw));
        }
        decode_scalar(field_name, type_name, raw)
    }

    fn decode_object(&self, raw: &Value, fields: &[Field]) -> Result<DecodedValue, DecodeError> {
        match raw {
            Value::Object(map) => Ok(DecodedValue::Record(self.decode_fields(map, fields)?)),
            // null short-circuits; any other shape is tolerated as an absent object
            _ => Ok(DecodedValue::Null),
        }
    }
}

fn decode_variable(raw: &Value) -> DecodedValue {
    match raw {
        Value::Object(map) => DecodedValue::Record(DecodedRecord::from_variable(map)),
        _ => DecodedValue::Null,
    }
}

fn decode_scalar(field_name: &str, type_name: &str, raw: &Value) -> Result<DecodedValue, DecodeError> {
    let ty: ScalarType = type_name.parse().map_err(|_| DecodeError::UnknownType {
        field: field_name.to_string(),
        type_name: type_name.to_string(),
    })?;
    Ok(unmarshal_scalar(raw, ty).unwrap_or_else(|err| {
        debug!(field = field_name, error = %err, "scalar coercion failed, decoding as null");
        DecodedValue::Null
    }))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use serde_json::json;

    use super::*;

    fn definition() -> ServiceDefinition {
        ServiceDefinition::from_json(json!({
            "service": { "code_name": "accounts", "version": "1.0" },
            "operations": {
                "users": {
                    "get_user": {
                        "method": "get",
                        "path": "/users/:id",
                        "response": [
                            { "element": "user", "type": "user" },
                            { "element": "nickname", "type": "string", "required": false, "default": "anon" },
                            { "element": "friends", "elements_type": "user", "required": false },
                            { "element": "scores", "elements_type": "decimal", "required": false },
                            { "element": "meta", "type": "variable", "required": false },
                            { "element": "balance", "type": "decimal", "required": false },
                            { "element": "born", "type": "date", "required": false },
                            { "element": "token", "type": "string" }
                        ]
                    },
                    "broken": {
                        "method": "get",
                        "path": "/broken",
                        "response": [ { "element": "x", "type": "money" } ]
                    }
                }
            },
            "representations": {
                "user": [
                    { "field": "email", "type": "string" },
                    { "field": "ad", "type": "address", "required": false },
                    { "field": "tags", "elements_type": "string", "required": false }
                ],
                "address": [ { "field": "street", "type": "string" } ]
            },
            "glossary": {
                "address": { "short_name": "ad" },
                "nick": { "short_name": "nickname" }
            }
        }))
        .unwrap()
    }

    fn decode(body: &str) -> Result<DecodedResponse, DecodeError> {
        let def = definition();
        let op = def.find_operation("get_user").unwrap().clone();
        ResponseDecoder::for_definition(&def).decode(200, body, &op)
    }

    #[test]
    fn decodes_nested_representation() {
        let response = decode(r#"{"status":"ok","user":{"email":"x@y.com"}}"#).unwrap();
        assert_eq!(response.status.as_deref(), Some("ok"));
        let user = response.get("user").unwrap().as_record().unwrap();
        assert_eq!(user.get("email").unwrap().as_str(), Some("x@y.com"));
    }

    #[test]
    fn missing_optional_takes_default() {
        let response = decode(r#"{"user":null}"#).unwrap();
        assert_eq!(response.element("nickname").unwrap().as_str(), Some("anon"));
    }

    #[test]
    fn missing_required_is_absent_not_error() {
        let response = decode(r#"{"status":"ok"}"#).unwrap();
        assert!(response.element("user").is_none());
        assert!(response.element("token").is_none());
    }

    #[test]
    fn missing_optional_without_default_is_null() {
        let response = decode("{}").unwrap();
        assert!(response.element("balance").unwrap().is_null());
    }

    #[test]
    fn null_representation_short_circuits() {
        let response = decode(r#"{"user":null}"#).unwrap();
        assert!(response.element("user").unwrap().is_null());
    }

    #[test]
    fn collections_decode_each_entry() {
        let response = decode(
            r#"{"friends":[{"email":"a@b.c"},null],"scores":["1.50","bad"]}"#,
        )
        .unwrap();
        let friends = response.element("friends").unwrap().as_list().unwrap();
        assert_eq!(friends.len(), 2);
        assert_eq!(
            friends[0].as_record().unwrap().element("email").unwrap().as_str(),
            Some("a@b.c")
        );
        assert!(friends[1].is_null());

        let scores = response.element("scores").unwrap().as_list().unwrap();
        assert_eq!(scores[0].as_decimal(), Some(&BigDecimal::from_str("1.50").unwrap()));
        assert!(scores[1].is_null());
    }

    #[test]
    fn variable_passes_through_untranslated() {
        let response = decode(r#"{"meta":{"ad":1,"free form":[1,2]}}"#).unwrap();
        let meta = response.element("meta").unwrap().as_record().unwrap();
        assert_eq!(meta.element("ad").unwrap().as_i64(), Some(1));
        // "ad" is a glossary short name but variable maps are not translated.
        assert!(meta.get("address").is_none());
        assert_eq!(meta.element("free form").unwrap().to_json(), json!([1, 2]));
    }

    #[test]
    fn malformed_scalar_decodes_to_null() {
        let response = decode(r#"{"balance":"twelve","born":"yesterday"}"#).unwrap();
        assert!(response.element("balance").unwrap().is_null());
        assert!(response.element("born").unwrap().is_null());
    }

    #[test]
    fn typed_scalars_are_coerced() {
        let response = decode(r#"{"balance":"10.25","born":"1990-02-03"}"#).unwrap();
        assert_eq!(
            response.element("balance").unwrap().as_decimal(),
            Some(&BigDecimal::from_str("10.25").unwrap())
        );
        assert_eq!(
            response.element("born").unwrap().as_date(),
            NaiveDate::from_ymd_opt(1990, 2, 3)
        );
    }

    #[test]
    fn unknown_type_is_an_error() {
        let def = definition();
        let op = def.find_operation("broken").unwrap();
        let err = ResponseDecoder::for_definition(&def)
            .decode(200, r#"{"x":1}"#, op)
            .unwrap_err();
        assert!(matches!(err, DecodeError::UnknownType { ref type_name, .. } if type_name == "money"));
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(matches!(decode("<html>"), Err(DecodeError::InvalidJson(_))));
    }

    #[test]
    fn display_names_and_schema_names_are_both_queryable() {
        let response =
            decode(r#"{"user":{"email":"e","ad":{"street":"Main"}},"nickname":"bo"}"#).unwrap();

        // top level: "nickname" is the short name of "nick"
        assert_eq!(response.get("nick").unwrap().as_str(), Some("bo"));
        assert_eq!(response.element("nickname").unwrap().as_str(), Some("bo"));

        let user = response.get("user").unwrap().as_record().unwrap();
        let address = user.get("address").unwrap().as_record().unwrap();
        assert_eq!(address.get("street").unwrap().as_str(), Some("Main"));
        assert!(user.element("ad").is_some());
        assert!(user.element("address").is_none());

        let names: Vec<&str> = user.attributes().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["email", "address", "tags"]);
        assert!(user.get("tags").unwrap().is_null());
    }

    #[test]
    fn to_json_keeps_schema_names() {
        let response =
            decode(r#"{"user":{"email":"e","ad":{"street":"Main"}},"balance":"1.5"}"#).unwrap();
        let json = response.record.to_json();
        assert_eq!(json["user"]["ad"]["street"], json!("Main"));
        assert_eq!(json["balance"], json!("1.5"));
        assert!(json["user"].get("address").is_none());
    }

    #[test]
    fn messages_are_read() {
        let response = decode(
            r#"{"status":"error","messages":[{"key":"NotFound","dsc":"missing","level":"error"}]}"#,
        )
        .unwrap();
        assert_eq!(
            response.messages,
            vec![Message {
                key: Some("NotFound".into()),
                description: Some("missing".into()),
                level: Some("error".into()),
            }]
        );
    }

    #[test]
    fn non_utf8_body_is_invalid_json() {
        let def = definition();
        let op = def.find_operation("get_user").unwrap().clone();
        let err = ResponseDecoder::for_definition(&def)
            .decode_slice(200, &[0x7b, 0x22, 0xff, 0x22, 0x3a, 0x31, 0x7d], &op)
            .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidJson(_)));
    }

    #[test]
    fn decode_slice_keeps_body_text() {
        let def = definition();
        let op = def.find_operation("get_user").unwrap().clone();
        let body = r#"{"status":"ok","nickname":"zoë"}"#;
        let response = ResponseDecoder::for_definition(&def)
            .decode_slice(200, body.as_bytes(), &op)
            .unwrap();
        assert_eq!(response.body, body);
    }

    #[test]
    fn messages_from_non_json_body_are_empty() {
        assert!(messages_from_body(b"Internal Server Error").is_empty());
        assert_eq!(
            messages_from_body(br#"{"messages":[{"key":"k"}]}"#)[0].key.as_deref(),
            Some("k")
        );
    }
}
