//! Assembly of outgoing operation requests.

use http::header::{HeaderValue, CONTENT_TYPE};
use schemarpc_core::{build_request_body, EncodeError, EncodedParams, HttpMethod, ParamMap};
use url::Url;

use crate::transport::{HttpRequest, RequestBody};

/// Path component of `api_url` without a trailing slash.
#[must_use]
pub fn base_path(api_url: &Url) -> &str {
    api_url.path().trim_end_matches('/')
}

/// Builds the request for an operation path under `api_url`.
///
/// `operation_path` is the operation's path with placeholders already
/// substituted; `params` must already carry schema names and escaped keys.
/// The request URL path is the base path of `api_url` followed by the
/// operation path, which is also what gets signed.
///
/// # Errors
///
/// See [`build_request_body`].
pub fn build_request(
    api_url: &Url,
    method: HttpMethod,
    operation_path: &str,
    params: &ParamMap,
    encode_as_json: bool,
) -> Result<HttpRequest, EncodeError> {
    let mut url = api_url.clone();
    url.set_path(&format!("{}{operation_path}", base_path(api_url)));
    url.set_query(None);
    url.set_fragment(None);

    let mut request = HttpRequest::new(method, url);
    request.body = match build_request_body(method, params, encode_as_json)? {
        EncodedParams::Query(query) => {
            if !query.is_empty() {
                request.url.set_query(Some(&query));
            }
            RequestBody::Empty
        }
        EncodedParams::Form(form) => {
            request.headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            );
            RequestBody::Form(form)
        }
        EncodedParams::Json(json) => {
            request
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            RequestBody::Json(json)
        }
        EncodedParams::Multipart(fields) => RequestBody::Multipart(fields),
    };
    Ok(request)
}
