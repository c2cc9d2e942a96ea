//! Response classification and formatting

use base64::{engine::general_purpose, Engine};
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

/// Reserved prefix for handler-supplied headers other than content-type,
/// so they cannot collide with host-controlled response headers
pub const REMAPPED_HEADER_PREFIX: &str = "x-amzn-remapped-";

/// Header carrying the handler-requested HTTP status code
pub const STATUS_HEADER: &str = "x-amzn-status-code";

const FUNCTION_URL_MARKER: &str = ".lambda-url.";
const FUNCTION_URL_SUFFIX: &str = ".on.aws";

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Invalid base64 body: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Response encoding chosen for an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Plain JSON body
    Standard,
    /// HTTP-style response for a Function URL event
    HttpShaped,
}

/// A response ready to post to the Runtime API
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Classify the inbound event
///
/// HttpShaped only when `requestContext.domainName` matches the Function
/// URL domain pattern. The shape of the handler's result plays no part in
/// this decision.
pub fn classify(event: &Value) -> ResponseKind {
    let domain = event
        .get("requestContext")
        .and_then(|ctx| ctx.get("domainName"))
        .and_then(Value::as_str);

    match domain {
        Some(d) if d.contains(FUNCTION_URL_MARKER) && d.ends_with(FUNCTION_URL_SUFFIX) => {
            ResponseKind::HttpShaped
        }
        _ => ResponseKind::Standard,
    }
}

/// Serialize the result as a plain JSON body
pub fn format_standard(result: &Value) -> Result<FormattedResponse, FormatError> {
    Ok(FormattedResponse {
        status: 200,
        headers: vec![(
            "content-type".to_string(),
            "application/json".to_string(),
        )],
        body: Bytes::from(serde_json::to_vec(result)?),
    })
}

/// Shape an HTTP-style result for a Function URL event
///
/// Returns `Ok(None)` when the result does not carry a usable `statusCode`;
/// the caller then falls back to the standard encoding. The `content-type`
/// header is forwarded under its own name; every other header is remapped
/// under [`REMAPPED_HEADER_PREFIX`].
pub fn format_http_shaped(result: &Value) -> Result<Option<FormattedResponse>, FormatError> {
    let Some(obj) = result.as_object() else {
        return Ok(None);
    };
    let Some(status) = obj.get("statusCode").and_then(Value::as_i64) else {
        return Ok(None);
    };
    let Ok(status) = u16::try_from(status) else {
        return Ok(None);
    };

    let body_str = obj.get("body").and_then(Value::as_str).unwrap_or_default();
    let is_base64 = obj
        .get("isBase64Encoded")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let body = if is_base64 {
        Bytes::from(general_purpose::STANDARD.decode(body_str)?)
    } else {
        Bytes::copy_from_slice(body_str.as_bytes())
    };

    let mut headers = Vec::new();
    if let Some(map) = obj.get("headers").and_then(Value::as_object) {
        for (name, value) in map {
            let Some(value) = value.as_str() else { continue };
            let name = name.to_ascii_lowercase();
            if name == "content-type" {
                headers.push((name, value.to_string()));
            } else {
                headers.push((
                    format!("{}{}", REMAPPED_HEADER_PREFIX, name),
                    value.to_string(),
                ));
            }
        }
    }

    Ok(Some(FormattedResponse {
        status,
        headers,
        body,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_function_url_event() {
        let event = json!({
            "requestContext": {"domainName": "abc123.lambda-url.us-east-1.on.aws"}
        });

        assert_eq!(classify(&event), ResponseKind::HttpShaped);
    }

    #[test]
    fn test_classify_plain_events_as_standard() {
        for event in [
            json!({}),
            json!(null),
            json!({"requestContext": {}}),
            json!({"requestContext": {"domainName": "example.com"}}),
            json!({"requestContext": {"domainName": "abc.lambda-url.us-east-1.on.aws.evil.com"}}),
            json!({"requestContext": {"domainName": 42}}),
        ] {
            assert_eq!(classify(&event), ResponseKind::Standard);
        }
    }

    #[test]
    fn test_http_shaped_requires_status_code() {
        let result = json!({"headers": {"content-type": "text/plain"}, "body": "hi"});

        assert!(format_http_shaped(&result).unwrap().is_none());
        assert!(format_http_shaped(&json!("not an object")).unwrap().is_none());
        assert!(format_http_shaped(&json!({"statusCode": -1})).unwrap().is_none());
    }

    #[test]
    fn test_http_shaped_forwards_content_type_only() {
        let result = json!({
            "statusCode": 200,
            "headers": {"Content-Type": "text/plain"},
            "body": "hi"
        });

        let shaped = format_http_shaped(&result).unwrap().unwrap();
        assert_eq!(shaped.status, 200);
        assert_eq!(&shaped.body[..], b"hi");
        assert_eq!(
            shaped.headers,
            vec![("content-type".to_string(), "text/plain".to_string())]
        );
    }

    #[test]
    fn test_http_shaped_remaps_other_headers() {
        let result = json!({
            "statusCode": 201,
            "headers": {"X-Custom": "1", "content-type": "text/html"},
            "body": ""
        });

        let shaped = format_http_shaped(&result).unwrap().unwrap();
        assert!(shaped
            .headers
            .contains(&("content-type".to_string(), "text/html".to_string())));
        assert!(shaped
            .headers
            .contains(&("x-amzn-remapped-x-custom".to_string(), "1".to_string())));
    }

    #[test]
    fn test_http_shaped_decodes_base64_body() {
        let result = json!({
            "statusCode": 200,
            "body": "aGVsbG8=",
            "isBase64Encoded": true
        });

        let shaped = format_http_shaped(&result).unwrap().unwrap();
        assert_eq!(&shaped.body[..], b"hello");
    }

    #[test]
    fn test_http_shaped_rejects_invalid_base64() {
        let result = json!({
            "statusCode": 200,
            "body": "not base64!!!",
            "isBase64Encoded": true
        });

        assert!(matches!(
            format_http_shaped(&result),
            Err(FormatError::InvalidBase64(_))
        ));
    }

    #[test]
    fn test_standard_round_trips_json_values() {
        for value in [
            json!(null),
            json!(42),
            json!(-7),
            json!(1.5),
            json!("text"),
            json!({"nested": {"list": [1, 2, 3]}}),
            json!([{"a": 1}, [2], "3", null]),
        ] {
            let formatted = format_standard(&value).unwrap();
            let parsed: Value = serde_json::from_slice(&formatted.body).unwrap();
            assert_eq!(parsed, value);
            assert_eq!(formatted.status, 200);
            assert_eq!(
                formatted.headers,
                vec![("content-type".to_string(), "application/json".to_string())]
            );
        }
    }
}
