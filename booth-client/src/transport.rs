//! Single-attempt HTTP execution
//!
//! A transport performs exactly one request. Retry policy lives in
//! [`crate::client::ApiClient`]; the transport's job is to map low-level
//! failures onto [`ApiError`] kinds the policy can classify.

use crate::endpoint::{HttpRequest, HttpResponse, Method, RequestBody};
use crate::error::{ApiError, ApiResult};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::time::Duration;

/// Executes one HTTP request
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Performs `request` once, bounded by `timeout`.
    ///
    /// Any HTTP status is returned as `Ok`; only transport-level failures are
    /// errors (`Timeout`, `ServerUnreachable` or `Network`).
    async fn execute(&self, request: HttpRequest, timeout: Duration) -> ApiResult<HttpResponse>;
}

/// Transport backed by a shared `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport with connection pooling suitable for a booth on Wi-Fi
    pub fn new(user_agent: &str) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .tcp_keepalive(Duration::from_secs(30))
            .user_agent(user_agent)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| ApiError::InvalidConfiguration(format!("Client build failed: {}", e)))?;
        Ok(Self { client })
    }

    /// Wrap an already configured client
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
    }
}

/// Maps a reqwest failure onto the semantic kinds the retry policy understands
fn map_reqwest_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout
    } else if err.is_connect() || connection_lost(&err) {
        ApiError::ServerUnreachable
    } else if err.is_builder() {
        ApiError::InvalidRequest(err.to_string())
    } else {
        ApiError::Network(err.to_string())
    }
}

/// A reset, aborted or closed connection anywhere in the cause chain
fn connection_lost(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut cause = Some(err);
    while let Some(e) = cause {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::NotConnected
                    | ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        cause = e.source();
    }
    false
}

fn to_reqwest_form(form: crate::endpoint::MultipartForm) -> ApiResult<reqwest::multipart::Form> {
    let mut out = reqwest::multipart::Form::new();
    for (name, value) in form.fields {
        out = out.text(name, value);
    }
    let file = form.file;
    let length = file.bytes.len() as u64;
    let part = reqwest::multipart::Part::stream_with_length(reqwest::Body::from(file.bytes), length)
        .file_name(file.file_name)
        .mime_str(&file.mime_type)
        .map_err(|e| ApiError::InvalidRequest(format!("Invalid MIME type: {}", e)))?;
    Ok(out.part(file.field_name, part))
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest, timeout: Duration) -> ApiResult<HttpResponse> {
        // Presigned destinations may sign Content-Type; never send it twice
        let content_type_set = request.header("content-type").is_some();
        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), request.url)
            .timeout(timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match request.body {
            None => builder,
            Some(RequestBody::Json(bytes)) => {
                if !content_type_set {
                    builder = builder.header(reqwest::header::CONTENT_TYPE, "application/json");
                }
                builder.body(bytes)
            }
            Some(RequestBody::Raw {
                bytes,
                content_type,
            }) => {
                if !content_type_set {
                    builder = builder.header(reqwest::header::CONTENT_TYPE, content_type);
                }
                builder.body(bytes)
            }
            Some(RequestBody::Multipart(form)) => builder.multipart(to_reqwest_form(form)?),
        };

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        Ok(HttpResponse { status, body })
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use stub::{RecordedCall, StubTransport};

#[cfg(any(test, feature = "test-util"))]
mod stub {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    type Handler = Box<dyn Fn(&HttpRequest) -> ApiResult<HttpResponse> + Send + Sync>;

    /// One request seen by a [`StubTransport`]
    #[derive(Debug, Clone)]
    pub struct RecordedCall {
        pub request: HttpRequest,
        pub at: tokio::time::Instant,
    }

    /// Scripted transport for tests; records every request it receives
    pub struct StubTransport {
        handler: Handler,
        calls: Mutex<Vec<RecordedCall>>,
    }

    impl StubTransport {
        /// Answer every request through `handler`
        pub fn new<F>(handler: F) -> Self
        where
            F: Fn(&HttpRequest) -> ApiResult<HttpResponse> + Send + Sync + 'static,
        {
            Self {
                handler: Box::new(handler),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Answer every request with the same status and body
        pub fn always(status: u16, body: &'static str) -> Self {
            Self::new(move |_| Ok(HttpResponse::new(status, body)))
        }

        /// Answer requests with `outcomes` in order, repeating the last one
        pub fn sequence(outcomes: Vec<ApiResult<HttpResponse>>) -> Self {
            let queue = Mutex::new(VecDeque::from(outcomes));
            Self::new(move |_| {
                let mut queue = queue.lock().unwrap();
                if queue.len() > 1 {
                    queue.pop_front().unwrap()
                } else {
                    queue
                        .front()
                        .cloned()
                        .unwrap_or_else(|| Ok(HttpResponse::new(200, "")))
                }
            })
        }

        pub fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpTransport for StubTransport {
        async fn execute(&self, request: HttpRequest, _timeout: Duration) -> ApiResult<HttpResponse> {
            let outcome = (self.handler)(&request);
            self.calls.lock().unwrap().push(RecordedCall {
                request,
                at: tokio::time::Instant::now(),
            });
            outcome
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{FilePart, MultipartForm};
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use url::Url;

    const OK_RESPONSE: &str = "HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok";

    fn transport() -> ReqwestTransport {
        ReqwestTransport::new("booth-client-tests").unwrap()
    }

    /// Headers and body are in once the declared length has arrived
    fn request_complete(buf: &[u8]) -> bool {
        let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
        let body = &buf[end + 4..];
        if head.contains("transfer-encoding: chunked") {
            return body.ends_with(b"0\r\n\r\n");
        }
        let length = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        body.len() >= length
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        while !request_complete(&buf) {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    /// Local server answering one request; yields the raw request text
    async fn serve_once() -> (Url, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}/upload", listener.local_addr().unwrap())).unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let raw = read_request(&mut socket).await;
            socket.write_all(OK_RESPONSE.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            raw
        });
        (url, handle)
    }

    fn content_type_lines(raw: &str) -> Vec<String> {
        raw.lines()
            .map(str::to_ascii_lowercase)
            .filter(|l| l.starts_with("content-type:"))
            .collect()
    }

    #[tokio::test]
    async fn test_request_content_type_is_sent_once() {
        let (url, server) = serve_once().await;
        let mut request = HttpRequest::new(Method::Put, url).with_body(RequestBody::Raw {
            bytes: Bytes::from_static(b"jpeg"),
            content_type: "application/octet-stream".to_string(),
        });
        request.set_header("Content-Type", "image/jpeg");

        let response = transport()
            .execute(request, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.body, Bytes::from_static(b"ok"));
        let raw = server.await.unwrap();
        assert_eq!(content_type_lines(&raw), vec!["content-type: image/jpeg"]);
        assert!(raw.ends_with("jpeg"));
    }

    #[tokio::test]
    async fn test_json_body_gets_json_content_type() {
        let (url, server) = serve_once().await;
        let request = HttpRequest::new(Method::Post, url)
            .with_body(RequestBody::Json(Bytes::from_static(b"{\"a\":1}")));

        transport()
            .execute(request, Duration::from_secs(5))
            .await
            .unwrap();

        let raw = server.await.unwrap();
        assert_eq!(content_type_lines(&raw), vec!["content-type: application/json"]);
    }

    #[tokio::test]
    async fn test_multipart_file_is_last_part() {
        let (url, server) = serve_once().await;
        let form = MultipartForm {
            fields: vec![
                ("assetId".to_string(), "a1".to_string()),
                ("kind".to_string(), "photo".to_string()),
            ],
            file: FilePart {
                field_name: "file".to_string(),
                file_name: "a1.jpg".to_string(),
                mime_type: "image/jpeg".to_string(),
                bytes: Bytes::from_static(b"JPEGDATA"),
            },
        };
        let request = HttpRequest::new(Method::Post, url).with_body(RequestBody::Multipart(form));

        transport()
            .execute(request, Duration::from_secs(5))
            .await
            .unwrap();

        let raw = server.await.unwrap();
        let asset_id = raw.find("name=\"assetId\"").unwrap();
        let kind = raw.find("name=\"kind\"").unwrap();
        let file = raw.find("name=\"file\"; filename=\"a1.jpg\"").unwrap();
        assert!(asset_id < kind && kind < file);
        assert!(raw.find("JPEGDATA").unwrap() > file);
    }

    #[tokio::test]
    async fn test_refused_port_is_server_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let url = Url::parse(&format!("http://{}/events", addr)).unwrap();

        let result = transport()
            .execute(HttpRequest::new(Method::Get, url), Duration::from_secs(5))
            .await;

        assert_eq!(result, Err(ApiError::ServerUnreachable));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}/events", listener.local_addr().unwrap())).unwrap();
        let _server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        });

        let result = transport()
            .execute(HttpRequest::new(Method::Get, url), Duration::from_millis(200))
            .await;

        assert_eq!(result, Err(ApiError::Timeout));
    }

    #[derive(Debug)]
    struct Wrapped(std::io::Error);

    impl std::fmt::Display for Wrapped {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "request failed")
        }
    }

    impl std::error::Error for Wrapped {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_connection_lost_is_found_in_cause_chain() {
        assert!(connection_lost(&Wrapped(ErrorKind::ConnectionReset.into())));
        assert!(connection_lost(&Wrapped(ErrorKind::BrokenPipe.into())));
        assert!(!connection_lost(&Wrapped(ErrorKind::PermissionDenied.into())));
    }

    #[test]
    fn test_method_mapping() {
        assert_eq!(to_reqwest_method(Method::Get), reqwest::Method::GET);
        assert_eq!(to_reqwest_method(Method::Delete), reqwest::Method::DELETE);
    }

    #[tokio::test]
    async fn test_stub_sequence_repeats_last() {
        let stub = StubTransport::sequence(vec![
            Ok(HttpResponse::new(503, "busy")),
            Ok(HttpResponse::new(200, "ok")),
        ]);
        let url = url::Url::parse("http://booth.local/api/events").unwrap();
        let first = stub
            .execute(HttpRequest::new(Method::Get, url.clone()), Duration::from_secs(1))
            .await
            .unwrap();
        let second = stub
            .execute(HttpRequest::new(Method::Get, url.clone()), Duration::from_secs(1))
            .await
            .unwrap();
        let third = stub
            .execute(HttpRequest::new(Method::Get, url), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(first.status, 503);
        assert_eq!(second.status, 200);
        assert_eq!(third.status, 200);
        assert_eq!(stub.call_count(), 3);
    }
}
