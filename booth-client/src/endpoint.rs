//! Declarative request targets
//!
//! An [`Endpoint`] describes *what* to call (path, method, headers, query).
//! [`build_request`] turns it into a concrete [`HttpRequest`] against a base
//! address. Both are plain values; nothing here performs I/O.

use crate::error::{ApiError, ApiResult};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use url::Url;

/// HTTP method of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            other => Err(ApiError::InvalidRequest(format!(
                "Unsupported HTTP method: {}",
                other
            ))),
        }
    }
}

/// Immutable description of a request target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub path: String,
    pub method: Method,
    pub headers: BTreeMap<String, String>,
    pub query: Option<Vec<(String, String)>>,
}

impl Endpoint {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
            headers: BTreeMap::new(),
            query: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    /// Returns a copy with one more header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Returns a copy with one more query parameter (order is preserved)
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query
            .get_or_insert_with(Vec::new)
            .push((key.into(), value.into()));
        self
    }
}

/// File part of a multipart form; always encoded last
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub field_name: String,
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

/// multipart/form-data payload: one text part per field, then the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartForm {
    pub fields: Vec<(String, String)>,
    pub file: FilePart,
}

/// Request payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Json(Bytes),
    Multipart(MultipartForm),
    Raw { bytes: Bytes, content_type: String },
}

/// Fully-qualified request, ready for a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Looks up a header case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Inserts or replaces a header (names compare case-insensitively)
    pub fn set_header(&mut self, name: &str, value: &str) {
        match self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }
}

/// Raw response as seen by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    /// Body as text, if it is valid UTF-8
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// Headers every request starts with
pub const DEFAULT_HEADERS: &[(&str, &str)] = &[("Accept", "application/json")];

/// Builds a concrete request from a base address and an endpoint
///
/// An endpoint whose path is already an absolute `http(s)://` URL ignores the
/// base address. Endpoint headers are applied over [`DEFAULT_HEADERS`], so an
/// endpoint may override `Accept`.
pub fn build_request(base_url: &str, endpoint: &Endpoint) -> ApiResult<HttpRequest> {
    let raw = if endpoint.path.starts_with("http://") || endpoint.path.starts_with("https://") {
        endpoint.path.clone()
    } else if endpoint.path.is_empty() {
        base_url.to_string()
    } else {
        format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            endpoint.path.trim_start_matches('/')
        )
    };

    let mut url = Url::parse(&raw)
        .map_err(|e| ApiError::InvalidConfiguration(format!("'{}' is not a valid URL: {}", raw, e)))?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(ApiError::InvalidConfiguration(format!(
            "'{}' has no host",
            raw
        )));
    }

    if let Some(query) = &endpoint.query {
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
    }

    let mut request = HttpRequest::new(endpoint.method, url);
    for (name, value) in DEFAULT_HEADERS {
        request.set_header(name, value);
    }
    for (name, value) in &endpoint.headers {
        request.set_header(name, value);
    }

    Ok(request)
}
