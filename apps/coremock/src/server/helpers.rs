use axum::{
    body::Bytes,
    http::{HeaderMap, header},
};
use serde_json::{Map, Value};

use super::ApiError;

/// The `Authorization` header value exactly as sent. No scheme is expected;
/// an absent header reads as the empty string and non-ASCII bytes are
/// rendered lossily so the value still never matches a registered token.
pub(super) fn raw_token(headers: &HeaderMap) -> String {
    headers
        .get(header::AUTHORIZATION)
        .map(|value| match value.to_str() {
            Ok(token) => token.to_string(),
            Err(_) => String::from_utf8_lossy(value.as_bytes()).into_owned(),
        })
        .unwrap_or_default()
}

/// Parses a JSON request body. An empty body reads as `{}`, which is what
/// agents sending bodiless POSTs expect.
pub(super) fn parse_json_body(body: &Bytes) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(body)
        .map_err(|error| ApiError::BadRequest(format!("invalid json body: {error}")))
}
