//! Path and request-parameter encoding.
//!
//! - [`build_path`] substitutes `:placeholder` tokens positionally.
//! - [`flatten_params`] turns a nested parameter tree into bracket-notation
//!   key/value pairs (`parent[child]`, `parent[]`).
//! - [`build_request_body`] decides where parameters travel for a given
//!   method: URL query string, form body, JSON body, or multipart fields.

use std::sync::LazyLock;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use regex::Regex;

use crate::method::HttpMethod;
use crate::params::{Param, ParamMap};

/// Matches a single path placeholder such as `:user_id`.
static PATH_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":\w+").expect("path placeholder pattern is valid"));

/// Characters escaped in parameter names. Brackets stay literal so callers can
/// pass pre-flattened keys.
const KEY_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Characters escaped in query-string values.
const VALUE_ESCAPE: &AsciiSet = &KEY_ESCAPE.add(b'[').add(b']');

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Argument errors raised while encoding a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("wrong number of path arguments ({given} for {expected})")]
    PathArity { given: usize, expected: usize },
    #[error("file uploads require a method with a body, got {method}")]
    FileWithoutBody { method: HttpMethod },
    #[error("failed to encode request params as json: {0}")]
    Json(String),
}

// ---------------------------------------------------------------------------
// Path
// ---------------------------------------------------------------------------

/// Number of `:placeholder` tokens in a path template.
#[must_use]
pub fn placeholder_count(template: &str) -> usize {
    PATH_PARAM.find_iter(template).count()
}

/// Substitutes each placeholder in `template` with the matching entry of
/// `path_params`, left to right.
///
/// ```
/// use schemarpc_core::encode::build_path;
///
/// let path = build_path("/users/:user_id/profile/:profile_id", &["4201", "2"]).unwrap();
/// assert_eq!(path, "/users/4201/profile/2");
/// ```
///
/// # Errors
///
/// Returns `EncodeError::PathArity` when the number of parameters differs from
/// the number of placeholders, in either direction.
pub fn build_path<S: AsRef<str>>(template: &str, path_params: &[S]) -> Result<String, EncodeError> {
    let expected = placeholder_count(template);
    if expected != path_params.len() {
        return Err(EncodeError::PathArity {
            given: path_params.len(),
            expected,
        });
    }

    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for (found, value) in PATH_PARAM.find_iter(template).zip(path_params) {
        out.push_str(&template[last..found.start()]);
        out.push_str(value.as_ref());
        last = found.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Escaping
// ---------------------------------------------------------------------------

/// Percent-escapes a parameter name.
#[must_use]
pub fn escape_key(name: &str) -> String {
    utf8_percent_encode(name, KEY_ESCAPE).to_string()
}

/// Percent-escapes a query-string value.
#[must_use]
pub fn escape_value(value: &str) -> String {
    utf8_percent_encode(value, VALUE_ESCAPE).to_string()
}

/// Escapes every map key in the tree, including maps nested in lists.
#[must_use]
pub fn escape_keys(params: ParamMap) -> ParamMap {
    params
        .into_iter()
        .map(|(name, value)| (escape_key(&name), escape_nested_keys(value)))
        .collect()
}

fn escape_nested_keys(value: Param) -> Param {
    match value {
        Param::Map(map) => Param::Map(escape_keys(map)),
        Param::List(items) => Param::List(items.into_iter().map(escape_nested_keys).collect()),
        leaf => leaf,
    }
}

// ---------------------------------------------------------------------------
// Flattening
// ---------------------------------------------------------------------------

/// Flattens a parameter tree into bracket-notation pairs, in traversal order.
///
/// A nested map contributes `parent[child]` keys; a list contributes one
/// `parent[]` key per element. Empty containers contribute nothing.
#[must_use]
pub fn flatten_params(params: &ParamMap) -> Vec<(String, &Param)> {
    let mut out = Vec::new();
    for (key, value) in params {
        flatten_into(key.clone(), value, &mut out);
    }
    out
}

fn flatten_into<'a>(key: String, value: &'a Param, out: &mut Vec<(String, &'a Param)>) {
    match value {
        Param::Map(map) => {
            for (child, nested) in map {
                flatten_into(format!("{key}[{child}]"), nested, out);
            }
        }
        Param::List(items) => {
            for item in items {
                flatten_into(format!("{key}[]"), item, out);
            }
        }
        leaf => out.push((key, leaf)),
    }
}

/// Serializes a parameter tree as a flattened `k=v&k=v` query string.
///
/// Keys are emitted as given (escape them first with [`escape_keys`]);
/// values are percent-escaped.
#[must_use]
pub fn to_query_string(params: &ParamMap) -> String {
    flatten_params(params)
        .into_iter()
        .map(|(key, value)| {
            let text = value.scalar_text().unwrap_or_default();
            format!("{key}={}", escape_value(&text))
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Whether any value in the tree is a file upload.
#[must_use]
pub fn contains_files(params: &ParamMap) -> bool {
    params.values().any(Param::contains_files)
}

// ---------------------------------------------------------------------------
// Request body
// ---------------------------------------------------------------------------

/// Where and how request parameters travel.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedParams {
    /// Appended to the URL; empty means no query string.
    Query(String),
    /// Form-encoded body (`application/x-www-form-urlencoded`).
    Form(String),
    /// JSON body (`application/json`).
    Json(String),
    /// Flattened fields for a multipart body.
    Multipart(Vec<(String, Param)>),
}

/// Encodes request parameters for `method`.
///
/// Body methods (POST, PUT) carry JSON when `encode_as_json` is set, multipart
/// fields when any value is a file, and a form-encoded query string otherwise.
/// Body-less methods (GET, DELETE) always append a query string.
///
/// # Errors
///
/// Returns `EncodeError::FileWithoutBody` when a body-less method is given a
/// file upload, and `EncodeError::Json` if JSON serialization fails.
pub fn build_request_body(
    method: HttpMethod,
    params: &ParamMap,
    encode_as_json: bool,
) -> Result<EncodedParams, EncodeError> {
    let multipart = contains_files(params);

    if !method.carries_body() {
        if multipart {
            return Err(EncodeError::FileWithoutBody { method });
        }
        return Ok(EncodedParams::Query(to_query_string(params)));
    }

    if encode_as_json {
        let body = serde_json::to_string(params).map_err(|e| EncodeError::Json(e.to_string()))?;
        return Ok(EncodedParams::Json(body));
    }

    if multipart {
        let fields = flatten_params(params)
            .into_iter()
            .map(|(key, value)| (key, value.clone()))
            .collect();
        return Ok(EncodedParams::Multipart(fields));
    }

    Ok(EncodedParams::Form(to_query_string(params)))
}
