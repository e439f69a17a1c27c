//! HTTP transport built on reqwest
//!
//! A transport is either plain (a fresh connection context per run, no
//! shared state) or a session: default headers and a cookie store that
//! persist across all requests of a plan run.

use std::time::{Duration, Instant};

use indexmap::IndexMap;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{json, Value};

use crate::errors::{ReqplanError, Result};

/// Resolved session configuration: header and cookie pairs applied to
/// every request sent through the transport.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub headers: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Plain transport without shared session state.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(HttpTransport { client })
    }

    /// Session transport: enables the cookie store and applies the
    /// configured headers and cookies to every request.
    pub fn with_session(config: &SessionConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
                ReqplanError::Dependency(format!("Invalid session header name {name:?}: {err}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|err| {
                ReqplanError::Dependency(format!("Invalid session header value: {err}"))
            })?;
            headers.insert(name, value);
        }

        if !config.cookies.is_empty() {
            let cookie = config
                .cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; ");
            let value = HeaderValue::from_str(&cookie).map_err(|err| {
                ReqplanError::Dependency(format!("Invalid session cookie value: {err}"))
            })?;
            headers.insert(reqwest::header::COOKIE, value);
        }

        let client = reqwest::Client::builder()
            .cookie_store(true)
            .default_headers(headers)
            .build()?;
        Ok(HttpTransport { client })
    }

    /// Send one request. `params` is the resolved request parameter
    /// mapping: `url` is required, `headers`, `params`, `json`,
    /// `body`/`data` and `timeout` are honored when present.
    pub async fn send(&self, method: &str, params: &Value) -> Result<HttpResponse> {
        let map = params.as_object().ok_or_else(|| {
            ReqplanError::InvalidPlan("Request params must be a mapping.".to_string())
        })?;
        let url = map.get("url").and_then(Value::as_str).ok_or_else(|| {
            ReqplanError::InvalidPlan("Request params must include url.".to_string())
        })?;

        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| ReqplanError::InvalidPlan(format!("Invalid HTTP method {method:?}.")))?;

        let mut builder = self.client.request(method, url);

        if let Some(headers) = map.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                builder = builder.header(name, scalar_to_string(value));
            }
        }

        if let Some(query) = map.get("params").and_then(Value::as_object) {
            let pairs = query
                .iter()
                .map(|(name, value)| (name.clone(), scalar_to_string(value)))
                .collect::<Vec<_>>();
            builder = builder.query(&pairs);
        }

        if let Some(body) = map.get("json") {
            builder = builder.json(body);
        } else if let Some(body) = map.get("body").or_else(|| map.get("data")) {
            builder = match body {
                Value::String(text) => builder.body(text.clone()),
                Value::Object(fields) => {
                    let form = fields
                        .iter()
                        .map(|(name, value)| (name.clone(), scalar_to_string(value)))
                        .collect::<Vec<_>>();
                    builder.form(&form)
                }
                other => builder.body(other.to_string()),
            };
        }

        if let Some(timeout) = map.get("timeout").and_then(Value::as_f64) {
            builder = builder.timeout(Duration::from_secs_f64(timeout));
        }

        let request = builder.build()?;
        let sent = RequestInfo {
            method: request.method().to_string(),
            url: request.url().to_string(),
            headers: header_map_to_values(request.headers()),
            body: request
                .body()
                .and_then(|body| body.as_bytes())
                .map(|bytes| String::from_utf8_lossy(bytes).to_string()),
        };

        let started = Instant::now();
        let response = self.client.execute(request).await?;
        let elapsed = started.elapsed();

        let status = response.status();
        let headers = header_map_to_values(response.headers());
        let text = response.text().await?;
        let json = serde_json::from_str(&text).ok();

        Ok(HttpResponse {
            ok: status.as_u16() < 400,
            status_code: status.as_u16(),
            reason: status
                .canonical_reason()
                .unwrap_or_default()
                .to_string(),
            elapsed,
            headers,
            text,
            json,
            request: sent,
        })
    }
}

/// The request as it was actually sent, for output and templating.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: String,
    pub url: String,
    pub headers: IndexMap<String, String>,
    pub body: Option<String>,
}

/// A received response, decoupled from the transport so later requests can
/// reference it through the template namespace.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub ok: bool,
    pub status_code: u16,
    pub reason: String,
    pub elapsed: Duration,
    pub headers: IndexMap<String, String>,
    pub text: String,
    pub json: Option<Value>,
    pub request: RequestInfo,
}

impl HttpResponse {
    /// Value form registered into the template namespace as `response`
    /// and under any register alias.
    pub fn to_value(&self) -> Value {
        json!({
            "ok": self.ok,
            "status_code": self.status_code,
            "reason": self.reason,
            "elapsed_ms": self.elapsed.as_secs_f64() * 1000.0,
            "headers": headers_value(&self.headers),
            "text": self.text,
            "json": self.json.clone().unwrap_or(Value::Null),
            "request": {
                "method": self.request.method,
                "url": self.request.url,
                "headers": headers_value(&self.request.headers),
                "body": self.request.body.clone().map(Value::String).unwrap_or(Value::Null),
            },
        })
    }
}

fn headers_value(headers: &IndexMap<String, String>) -> Value {
    let mut map = serde_json::Map::new();
    for (name, value) in headers {
        map.insert(name.clone(), Value::String(value.clone()));
    }
    Value::Object(map)
}

fn header_map_to_values(headers: &HeaderMap) -> IndexMap<String, String> {
    let mut map: IndexMap<String, String> = IndexMap::new();
    for (name, value) in headers {
        let value = value.to_str().unwrap_or_default().to_string();
        map.entry(name.to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    map
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_send_get_with_headers_and_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/items"))
            .and(header("X-Token", "secret"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 7})))
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let params = json!({
            "url": format!("{}/items", server.uri()),
            "headers": {"X-Token": "secret"},
            "params": {"page": 2},
        });
        let response = transport.send("get", &params).await.unwrap();

        assert!(response.ok);
        assert_eq!(response.status_code, 200);
        assert_eq!(response.json, Some(json!({"id": 7})));
        assert_eq!(response.request.method, "GET");
        assert!(response.request.url.contains("page=2"));
    }

    #[tokio::test]
    async fn test_redirect_status_counts_as_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cached"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let response = transport
            .send("get", &json!({"url": format!("{}/cached", server.uri())}))
            .await
            .unwrap();

        // Only 4xx and 5xx responses raise; 3xx is fine.
        assert!(response.ok);
        assert_eq!(response.status_code, 304);
    }

    #[tokio::test]
    async fn test_send_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/items"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let transport = HttpTransport::new().unwrap();
        let params = json!({
            "url": format!("{}/items", server.uri()),
            "json": {"name": "first"},
        });
        let response = transport.send("post", &params).await.unwrap();

        assert_eq!(response.status_code, 201);
        assert_eq!(
            response.request.body.as_deref(),
            Some(r#"{"name":"first"}"#)
        );
    }

    #[tokio::test]
    async fn test_session_headers_applied() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .and(header("X-Session", "on"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let config = SessionConfig {
            headers: vec![("X-Session".to_string(), "on".to_string())],
            cookies: Vec::new(),
        };
        let transport = HttpTransport::with_session(&config).unwrap();
        let response = transport
            .send("get", &json!({"url": server.uri()}))
            .await
            .unwrap();
        assert_eq!(response.status_code, 204);
    }

    #[test]
    fn test_response_to_value_shape() {
        let response = HttpResponse {
            ok: true,
            status_code: 200,
            reason: "OK".to_string(),
            elapsed: Duration::from_millis(12),
            headers: IndexMap::from([("content-type".to_string(), "text/plain".to_string())]),
            text: "hello".to_string(),
            json: None,
            request: RequestInfo {
                method: "GET".to_string(),
                url: "http://localhost/".to_string(),
                headers: IndexMap::new(),
                body: None,
            },
        };

        let value = response.to_value();
        assert_eq!(value["status_code"], json!(200));
        assert_eq!(value["json"], Value::Null);
        assert_eq!(value["headers"]["content-type"], json!("text/plain"));
        assert_eq!(value["request"]["method"], json!("GET"));
    }
}
