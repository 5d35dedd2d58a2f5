// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::service::service_fn;
use hyper::{header, http, Method, Request, Response, StatusCode};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::accumulator::BatchAccumulator;
use crate::entry::LogEntry;
use crate::http_utils::{log_and_create_http_response, verify_request_content_length, HttpResponse};

pub const UPLOAD_ENDPOINT_PREFIX: &str = "/upload/";
pub const HEALTH_ENDPOINT_PATH: &str = "/healthz";
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

/// Turns `PUT /upload/{category}/{stream_id}` requests into log entries and
/// hands them to the category's accumulator.
pub struct IntakeService {
    accumulators: HashMap<String, Arc<BatchAccumulator>>,
    max_body_bytes: usize,
}

impl IntakeService {
    pub fn new<I>(accumulators: I, max_body_bytes: usize) -> Self
    where
        I: IntoIterator<Item = Arc<BatchAccumulator>>,
    {
        Self {
            accumulators: accumulators
                .into_iter()
                .map(|accumulator| (accumulator.category().to_string(), accumulator))
                .collect(),
            max_body_bytes,
        }
    }

    pub async fn handle<B>(&self, req: Request<B>) -> http::Result<HttpResponse>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let path = req.uri().path();
        if path == HEALTH_ENDPOINT_PATH {
            if req.method() != Method::GET {
                return log_and_create_http_response(
                    &format!("Method {} not allowed on {path}", req.method()),
                    StatusCode::METHOD_NOT_ALLOWED,
                );
            }
            return Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/plain")
                .body(Full::new(Bytes::from_static(b"OK\n")));
        }

        let Some(rest) = path.strip_prefix(UPLOAD_ENDPOINT_PREFIX) else {
            return not_found();
        };
        let Some((category, stream_id)) = parse_upload_path(rest) else {
            return not_found();
        };

        if req.method() != Method::PUT {
            return log_and_create_http_response(
                &format!("Method {} not allowed on {path}", req.method()),
                StatusCode::METHOD_NOT_ALLOWED,
            );
        }

        let Some(accumulator) = self.accumulators.get(&category).cloned() else {
            return log_and_create_http_response(
                &format!("Unknown log category '{category}'"),
                StatusCode::NOT_FOUND,
            );
        };

        if let Some(response) =
            verify_request_content_length(req.headers(), self.max_body_bytes, "Error uploading logs")
        {
            return response;
        }

        let payload = match Limited::new(req.into_body(), self.max_body_bytes)
            .collect()
            .await
        {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                return log_and_create_http_response(
                    "Error uploading logs: Payload too large",
                    StatusCode::PAYLOAD_TOO_LARGE,
                );
            }
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Error reading request body: {e}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        };

        let received = payload.len();
        let entry = LogEntry::new(category.as_str(), stream_id.as_str(), payload);
        let size = match entry.serialized_size() {
            Ok(size) => size,
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Error encoding log entry: {e}"),
                    StatusCode::INTERNAL_SERVER_ERROR,
                );
            }
        };

        match accumulator.add(entry, size).await {
            Ok(()) => log_and_create_http_response(
                &format!("Accepted {received} bytes for {category}/{stream_id}"),
                StatusCode::OK,
            ),
            Err(e) => log_and_create_http_response(&e.to_string(), StatusCode::SERVICE_UNAVAILABLE),
        }
    }
}

fn not_found() -> http::Result<HttpResponse> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Full::new(Bytes::new()))
}

/// Splits `{category}/{stream_id}` into its two decoded segments.
fn parse_upload_path(rest: &str) -> Option<(String, String)> {
    let (category, stream_id) = rest.split_once('/')?;
    if category.is_empty() || stream_id.is_empty() || stream_id.contains('/') {
        return None;
    }
    Some((percent_decode(category)?, percent_decode(stream_id)?))
}

fn percent_decode(segment: &str) -> Option<String> {
    let bytes = segment.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = segment.get(i + 1..i + 3)?;
            if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                return None;
            }
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

/// Accepts connections on `listener` until `cancel` fires, then gives open
/// connections up to `grace` to finish their requests before aborting them.
pub async fn serve(
    listener: TcpListener,
    service: Arc<IntakeService>,
    cancel: CancellationToken,
    grace: Duration,
) -> Result<(), io::Error> {
    let server = hyper::server::conn::http1::Builder::new();
    let mut joinset = tokio::task::JoinSet::new();

    loop {
        let conn = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            con_res = listener.accept() => match con_res {
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    error!("Server error: {e}");
                    return Err(e);
                }
                Ok((conn, _)) => conn,
            },
            finished = async {
                match joinset.join_next().await {
                    Some(finished) => finished,
                    None => std::future::pending().await,
                }
            } => match finished {
                Err(e) if e.is_panic() => {
                    error!("Connection handler panicked: {:?}", e);
                    continue;
                }
                Ok(()) | Err(_) => continue,
            },
        };

        let io = hyper_util::rt::TokioIo::new(conn);
        let server = server.clone();
        let service = service.clone();
        let cancel = cancel.clone();
        joinset.spawn(async move {
            let svc = service_fn(move |req| {
                let service = service.clone();
                async move { service.handle(req).await }
            });
            let conn = server.serve_connection(io, svc);
            tokio::pin!(conn);
            tokio::select! {
                res = conn.as_mut() => {
                    if let Err(e) = res {
                        debug!("Connection error: {e}");
                    }
                }
                () = cancel.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    if let Err(e) = conn.await {
                        debug!("Connection error during shutdown: {e}");
                    }
                }
            }
        });
    }

    drop(listener);
    debug!(connections = joinset.len(), "Intake stopped accepting connections");

    let drained = tokio::time::timeout(grace, async {
        while joinset.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            connections = joinset.len(),
            "Aborting connections still open after {:?}", grace
        );
        joinset.shutdown().await;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::accumulator::BatchConfig;
    use crate::committer::{Commit, CommitReceipt};
    use crate::entry::Batch;
    use crate::error::CommitError;
    use async_trait::async_trait;

    struct Discard;

    #[async_trait]
    impl Commit for Discard {
        async fn commit(&self, _batch: Batch) -> Result<CommitReceipt, CommitError> {
            Err(CommitError::NothingToCommit)
        }
    }

    fn service(max_body_bytes: usize) -> (IntakeService, Arc<BatchAccumulator>) {
        let (accumulator, _lane) =
            BatchAccumulator::new("techaro.anubis", BatchConfig::default(), Arc::new(Discard));
        (
            IntakeService::new([accumulator.clone()], max_body_bytes),
            accumulator,
        )
    }

    fn upload(path: &str, body: &'static [u8]) -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::PUT)
            .uri(path)
            .header(header::CONTENT_LENGTH, body.len())
            .body(Full::new(Bytes::from_static(body)))
            .unwrap()
    }

    async fn body_string(response: HttpResponse) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_parse_upload_path() {
        assert_eq!(
            parse_upload_path("techaro.anubis/instance-1"),
            Some(("techaro.anubis".to_string(), "instance-1".to_string()))
        );
        assert_eq!(
            parse_upload_path("techaro.anubis/pod%201%2Fa"),
            Some(("techaro.anubis".to_string(), "pod 1/a".to_string()))
        );
        assert_eq!(parse_upload_path("techaro.anubis"), None);
        assert_eq!(parse_upload_path("techaro.anubis/"), None);
        assert_eq!(parse_upload_path("/instance-1"), None);
        assert_eq!(parse_upload_path("a/b/c"), None);
        assert_eq!(parse_upload_path("a/bad%2"), None);
        assert_eq!(parse_upload_path("a/bad%zz"), None);
        assert_eq!(parse_upload_path("a/%+1"), None);
        assert_eq!(parse_upload_path("a/%-1"), None);
        assert_eq!(parse_upload_path("a/%2a"), Some(("a".to_string(), "*".to_string())));
    }

    #[tokio::test]
    async fn test_upload_accepted() {
        let (service, accumulator) = service(DEFAULT_MAX_BODY_BYTES);

        let response = service
            .handle(upload("/upload/techaro.anubis/instance-1", b"line one\n"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(accumulator.open_len(), 1);
        assert!(accumulator.pending_bytes() > 9);
    }

    #[tokio::test]
    async fn test_unknown_category_is_rejected() {
        let (service, accumulator) = service(DEFAULT_MAX_BODY_BYTES);

        let response = service
            .handle(upload("/upload/techaro.unknown/instance-1", b"data"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_string(response).await,
            "{\"message\":\"Unknown log category 'techaro.unknown'\"}"
        );
        assert_eq!(accumulator.open_len(), 0);
    }

    #[tokio::test]
    async fn test_wrong_method() {
        let (service, _) = service(DEFAULT_MAX_BODY_BYTES);
        let request = Request::builder()
            .method(Method::GET)
            .uri("/upload/techaro.anubis/instance-1")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let response = service.handle(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_declared_length_over_cap() {
        let (service, accumulator) = service(4);

        let response = service
            .handle(upload("/upload/techaro.anubis/instance-1", b"too long"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(accumulator.open_len(), 0);
    }

    #[tokio::test]
    async fn test_streamed_body_over_cap() {
        let (service, accumulator) = service(4);
        // Lies about its length so only the limited read catches it.
        let request = Request::builder()
            .method(Method::PUT)
            .uri("/upload/techaro.anubis/instance-1")
            .header(header::CONTENT_LENGTH, 2)
            .body(Full::new(Bytes::from_static(b"too long")))
            .unwrap();

        let response = service.handle(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(accumulator.open_len(), 0);
    }

    #[tokio::test]
    async fn test_missing_length() {
        let (service, _) = service(DEFAULT_MAX_BODY_BYTES);
        let request = Request::builder()
            .method(Method::PUT)
            .uri("/upload/techaro.anubis/instance-1")
            .body(Full::new(Bytes::from_static(b"x")))
            .unwrap();

        let response = service.handle(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::LENGTH_REQUIRED);
    }

    #[tokio::test]
    async fn test_closed_accumulator() {
        let (service, accumulator) = service(DEFAULT_MAX_BODY_BYTES);
        accumulator.close();

        let response = service
            .handle(upload("/upload/techaro.anubis/instance-1", b"late"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_and_unknown_route() {
        let (service, _) = service(DEFAULT_MAX_BODY_BYTES);

        let request = Request::builder()
            .uri("/healthz")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = service.handle(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "OK\n");

        let request = Request::builder()
            .method(Method::POST)
            .uri("/healthz")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = service.handle(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let request = Request::builder()
            .uri("/metrics")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = service.handle(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
