//! Transport layer: one request in, one status + JSON body out.
//!
//! [`Transport`] is the seam between the typed [`Client`](crate::Client) and
//! the wire. [`UreqTransport`] talks to a real server; [`MockServer`](crate::MockServer)
//! answers from memory for tests.

use crate::error::{Error, Result};
use serde_json::{Value, json};
use std::fmt;
use std::time::Duration;

/// Timeout applied to every request, connection included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const USER_AGENT: &str = concat!("akrecon/", env!("CARGO_PKG_VERSION"));

/// HTTP methods used against the Authentik API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// A request against the API root (`<host>/api/v3/`).
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API root, e.g. `providers/proxy/`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// Add a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Attach a JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

impl fmt::Display for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)?;
        for (i, (key, value)) in self.query.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{key}={value}")?;
        }
        Ok(())
    }
}

/// Status and decoded body of a response.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Value,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends API requests.
///
/// A non-2xx answer is still `Ok`: only the failure to obtain a response at
/// all is an error at this layer. Turning statuses into errors and retrying is
/// the client's job.
pub trait Transport: Send + Sync {
    fn send(&self, request: &ApiRequest) -> Result<RawResponse>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, request: &ApiRequest) -> Result<RawResponse> {
        (**self).send(request)
    }
}

/// Decode a response body the way the API is read everywhere: empty means
/// `{}`, and text that is not JSON is kept under `raw_response`.
pub fn decode_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(text).unwrap_or_else(|_| json!({ "raw_response": text }))
}

/// Blocking HTTP transport built on `ureq`.
pub struct UreqTransport {
    agent: ureq::Agent,
    base_url: String,
    token: String,
}

impl UreqTransport {
    /// Create a transport for `base_url` (e.g. `https://authentik.example.com`)
    /// authenticating every request with `token`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build();

        Self {
            agent: ureq::Agent::new_with_config(config),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Get the server base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v3/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn prepare<B>(
        &self,
        mut builder: ureq::RequestBuilder<B>,
        request: &ApiRequest,
    ) -> ureq::RequestBuilder<B> {
        for (key, value) in &request.query {
            builder = builder.query(key, value);
        }
        builder
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
    }

    fn transport_error(request: &ApiRequest, err: &ureq::Error) -> Error {
        Error::Transport {
            method: request.method,
            path: request.path.clone(),
            message: err.to_string(),
        }
    }
}

impl Transport for UreqTransport {
    fn send(&self, request: &ApiRequest) -> Result<RawResponse> {
        let url = self.url(&request.path);

        let result = match request.method {
            Method::Get => self.prepare(self.agent.get(&url), request).call(),
            Method::Delete => self.prepare(self.agent.delete(&url), request).call(),
            Method::Post | Method::Patch => {
                let builder = if request.method == Method::Post {
                    self.agent.post(&url)
                } else {
                    self.agent.patch(&url)
                };
                let builder = self.prepare(builder, request);
                match &request.body {
                    Some(body) => builder.send_json(body),
                    None => builder.send_empty(),
                }
            }
        };

        let mut response = result.map_err(|e| Self::transport_error(request, &e))?;
        let status = response.status().as_u16();
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(|e| Self::transport_error(request, &e))?;

        Ok(RawResponse {
            status,
            body: decode_body(&text),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_body_variants() {
        assert_eq!(decode_body(""), json!({}));
        assert_eq!(decode_body("  \n"), json!({}));
        assert_eq!(decode_body(r#"{"pk": 3}"#), json!({"pk": 3}));
        assert_eq!(
            decode_body("<html>bad gateway</html>"),
            json!({"raw_response": "<html>bad gateway</html>"})
        );
    }

    #[test]
    fn test_url_building() {
        let transport = UreqTransport::new("https://auth.example.com/", "secret");
        assert_eq!(transport.base_url(), "https://auth.example.com");
        assert_eq!(
            transport.url("providers/proxy/"),
            "https://auth.example.com/api/v3/providers/proxy/"
        );
        assert_eq!(
            transport.url("/core/users/me/"),
            "https://auth.example.com/api/v3/core/users/me/"
        );
    }

    #[test]
    fn test_request_display() {
        let request = ApiRequest::get("flows/instances/")
            .query("slug", "default-authorization-flow")
            .query("page", "1");
        assert_eq!(
            request.to_string(),
            "GET flows/instances/?slug=default-authorization-flow&page=1"
        );
    }

    #[test]
    fn test_success_range() {
        assert!(RawResponse { status: 200, body: json!({}) }.is_success());
        assert!(RawResponse { status: 201, body: json!({}) }.is_success());
        assert!(!RawResponse { status: 404, body: json!({}) }.is_success());
    }
}
