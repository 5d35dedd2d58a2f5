// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    header,
    http::{self, HeaderMap},
    Response, StatusCode,
};
use serde_json::json;
use tracing::{debug, error, warn};

pub type HttpResponse = Response<Full<Bytes>>;

/// Logs `message` and returns it as a `{"message": ...}` JSON body with the
/// given status. Success is logged at debug, client errors at warn, and
/// everything else at error.
pub fn log_and_create_http_response(message: &str, status: StatusCode) -> http::Result<HttpResponse> {
    if status.is_success() {
        debug!("{message}");
    } else if status.is_client_error() {
        warn!("{message}");
    } else {
        error!("{message}");
    }
    let body = json!({ "message": message }).to_string();
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(body)))
}

/// Checks the request's "content-length" header against `max_content_length`.
/// A chunked request without one passes here and is capped while its body
/// is read.
///
/// Returns None when the request may proceed, otherwise the error response.
pub fn verify_request_content_length(
    header_map: &HeaderMap,
    max_content_length: usize,
    error_message_prefix: &str,
) -> Option<http::Result<HttpResponse>> {
    let Some(content_length_header) = header_map.get(header::CONTENT_LENGTH) else {
        if header_map.contains_key(header::TRANSFER_ENCODING) {
            return None;
        }
        return Some(log_and_create_http_response(
            &format!("{error_message_prefix}: Missing Content-Length and Transfer-Encoding header"),
            StatusCode::LENGTH_REQUIRED,
        ));
    };
    let content_length = match content_length_header
        .to_str()
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
    {
        Some(length) => length,
        None => {
            return Some(log_and_create_http_response(
                &format!("{error_message_prefix}: Invalid Content-Length header"),
                StatusCode::BAD_REQUEST,
            ));
        }
    };
    if content_length > max_content_length {
        return Some(log_and_create_http_response(
            &format!("{error_message_prefix}: Payload too large"),
            StatusCode::PAYLOAD_TOO_LARGE,
        ));
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use http_body_util::BodyExt;
    use hyper::header;
    use hyper::HeaderMap;
    use hyper::StatusCode;

    use super::verify_request_content_length;
    use super::HttpResponse;

    fn create_test_headers_with_content_length(val: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(header::CONTENT_LENGTH, val.parse().unwrap());
        map
    }

    async fn get_response_body_as_string(response: HttpResponse) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_request_content_length_missing() {
        let response = verify_request_content_length(&HeaderMap::new(), 1, "Test Prefix")
            .unwrap()
            .unwrap();
        assert_eq!(response.status(), StatusCode::LENGTH_REQUIRED);
        assert_eq!(
            get_response_body_as_string(response).await,
            "{\"message\":\"Test Prefix: Missing Content-Length and Transfer-Encoding header\"}"
        );
    }

    #[test]
    fn test_request_chunked_passes() {
        let mut headers = HeaderMap::new();
        headers.insert(header::TRANSFER_ENCODING, "chunked".parse().unwrap());
        assert!(verify_request_content_length(&headers, 1, "Test Prefix").is_none());
    }

    #[tokio::test]
    async fn test_request_content_length_cant_convert_to_usize() {
        let response = verify_request_content_length(
            &create_test_headers_with_content_length("not_an_int"),
            1,
            "Test Prefix",
        )
        .unwrap()
        .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            get_response_body_as_string(response).await,
            "{\"message\":\"Test Prefix: Invalid Content-Length header\"}"
        );
    }

    #[tokio::test]
    async fn test_request_content_length_too_long() {
        let response = verify_request_content_length(
            &create_test_headers_with_content_length("65537"),
            65536,
            "Test Prefix",
        )
        .unwrap()
        .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            get_response_body_as_string(response).await,
            "{\"message\":\"Test Prefix: Payload too large\"}"
        );
    }

    #[test]
    fn test_request_content_length_at_limit() {
        let headers = create_test_headers_with_content_length("65536");
        assert!(verify_request_content_length(&headers, 65536, "Test Prefix").is_none());
    }
}
