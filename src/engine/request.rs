//! Per-request state machine
//!
//! A raw request definition is parsed into a `ParsedRequest` whose state
//! captures every outcome: definition errors and skips at construction
//! time, transport errors and assertion results at send time.

use indexmap::IndexMap;
use serde_json::Value;

use crate::errors::{ReqplanError, Result};
use crate::plan::ensure_list;
use crate::template::{is_truthy, Environment, TemplateError};
use crate::transport::{HttpResponse, HttpTransport};

pub const METHODS: &[&str] = &["GET", "OPTIONS", "HEAD", "POST", "PUT", "PATCH", "DELETE"];

pub const EARLIER_ERRORS_SKIP: &str = "Request skipped due to earlier error.";
pub const NO_HTTP_METHOD: &str =
    "Request definition should contain exactly one HTTP method as \
     a main level dict key or as main level method and params keys.";
pub const METHOD_OR_PARAMS_MISSING: &str =
    "When using method and params fields to define the request, both method \
     and params must be defined.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Success,
    NotRaised,
    Failure,
    Error,
    Skipped,
}

impl StateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKind::Success => "SUCCESS",
            StateKind::NotRaised => "NOT-RAISED",
            StateKind::Failure => "FAILURE",
            StateKind::Error => "ERROR",
            StateKind::Skipped => "SKIPPED",
        }
    }
}

/// Terminal state of a request. Equality compares the kind only; the
/// message is diagnostic detail.
#[derive(Debug, Clone)]
pub struct RequestState {
    pub kind: StateKind,
    pub message: Option<String>,
}

impl RequestState {
    pub fn new(kind: StateKind, message: Option<String>) -> Self {
        RequestState { kind, message }
    }

    /// Skipped and not-raised states do not count as failures.
    pub fn ok(&self) -> bool {
        matches!(
            self.kind,
            StateKind::Success | StateKind::NotRaised | StateKind::Skipped
        )
    }
}

impl PartialEq for RequestState {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl PartialEq<StateKind> for RequestState {
    fn eq(&self, other: &StateKind) -> bool {
        self.kind == *other
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind.as_str())
    }
}

/// An assertion evaluated after its request has been sent. Defined either
/// as a bare expression string or as a `{name, expression}` mapping.
#[derive(Debug, Clone)]
pub struct Assertion {
    pub name: String,
    pub expression: String,
    ok: Option<bool>,
}

impl Assertion {
    fn parse(raw: &Value) -> Self {
        match raw {
            Value::Object(map) => {
                let expression = map
                    .get("expression")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let name = map
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| expression.clone());
                Assertion {
                    name,
                    expression,
                    ok: None,
                }
            }
            Value::String(expression) => Assertion {
                name: expression.clone(),
                expression: expression.clone(),
                ok: None,
            },
            other => Assertion {
                name: other.to_string(),
                expression: other.to_string(),
                ok: None,
            },
        }
    }

    pub fn executed(&self) -> bool {
        self.ok.is_some()
    }

    /// Result of the assertion. Panics when the assertion has not been
    /// executed; reading an unset result is always a caller bug.
    pub fn ok(&self) -> bool {
        match self.ok {
            Some(ok) => ok,
            None => panic!("Assertion has not been executed yet."),
        }
    }

    /// Evaluate the expression. An evaluation error marks the assertion
    /// failed and is returned to the caller.
    pub fn execute(
        &mut self,
        env: &mut Environment,
        context: Option<&IndexMap<String, Value>>,
    ) -> std::result::Result<bool, TemplateError> {
        match env.resolve_expression(&self.expression, context) {
            Ok(value) => {
                let ok = is_truthy(&value);
                self.ok = Some(ok);
                Ok(ok)
            }
            Err(err) => {
                self.ok = Some(false);
                Err(err)
            }
        }
    }
}

/// A fully parsed request, ready to send.
#[derive(Debug)]
pub struct ParsedRequest {
    pub name: Option<String>,
    pub method: Option<String>,
    pub params: Value,
    pub register: Option<String>,
    pub raise_for_status: bool,
    pub output: Vec<String>,
    pub assertions: Vec<Assertion>,
    pub context: Option<IndexMap<String, Value>>,
    pub state: Option<RequestState>,
    pub response: Option<HttpResponse>,
}

impl ParsedRequest {
    /// Parse a raw definition. Never fails: definition and templating
    /// problems land in `state`, and `send` becomes a no-op for them.
    ///
    /// Assertions are parsed before template resolution so that they are
    /// preserved for reporting even when templating fails. A skipped
    /// request resolves no templates at all.
    pub fn new(
        raw: &Value,
        env: &mut Environment,
        skip: bool,
        context: Option<IndexMap<String, Value>>,
    ) -> Self {
        let mut map = raw.as_object().cloned().unwrap_or_default();
        map.shift_remove("loop");

        let raw_assertions = map
            .shift_remove("assertions")
            .filter(|value| !value.is_null())
            .or_else(|| map.shift_remove("assert"))
            .unwrap_or(Value::Null);
        let assertions = ensure_list(&raw_assertions)
            .iter()
            .map(Assertion::parse)
            .collect::<Vec<_>>();

        let mut state: Option<RequestState> = None;

        if skip {
            set_once(
                &mut state,
                StateKind::Skipped,
                Some(EARLIER_ERRORS_SKIP.to_string()),
            );
        } else {
            match env.resolve_templates(&Value::Object(map.clone()), context.as_ref()) {
                Ok(Value::Object(resolved)) => map = resolved,
                Ok(_) => {}
                Err(err) => {
                    set_once(
                        &mut state,
                        StateKind::Error,
                        Some(format!("Failed to resolve templates: {err}")),
                    );
                }
            }
        }

        let name = map
            .shift_remove("name")
            .and_then(|value| value.as_str().map(str::to_string));

        let (method, params) = parse_method_and_params(&mut map, &mut state);

        let register = map
            .get("register")
            .and_then(Value::as_str)
            .map(str::to_string);
        let raise_for_status = map
            .get("raise_for_status")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let output = ensure_list(map.get("output").unwrap_or(&Value::Null))
            .iter()
            .filter_map(|value| value.as_str().map(str::to_string))
            .collect();

        ParsedRequest {
            name,
            method,
            params,
            register,
            raise_for_status,
            output,
            assertions,
            context,
            state,
            response: None,
        }
    }

    /// Send the request and settle the final state. No-op when the state
    /// is already set (skipped or malformed requests).
    pub async fn send(&mut self, env: &mut Environment, transport: &HttpTransport) {
        if self.state.is_some() {
            return;
        }
        let Some(method) = self.method.clone() else {
            return;
        };

        let response = match transport.send(&method, &self.params).await {
            Ok(response) => response,
            Err(err) => {
                self.state = Some(RequestState::new(StateKind::Error, Some(err.to_string())));
                return;
            }
        };

        let value = response.to_value();
        env.register("response", value.clone());
        if let Some(alias) = &self.register {
            env.register(alias, value);
        }

        let kind = if response.ok {
            StateKind::Success
        } else if self.raise_for_status {
            StateKind::Failure
        } else {
            StateKind::NotRaised
        };
        self.response = Some(response);
        self.state = Some(RequestState::new(kind, None));

        let context = self.context.clone();
        for assertion in &mut self.assertions {
            match assertion.execute(env, context.as_ref()) {
                Ok(true) => {}
                Ok(false) => transition(&mut self.state, StateKind::Failure, None),
                Err(err) => {
                    transition(&mut self.state, StateKind::Error, Some(err.to_string()))
                }
            }
        }
    }
}

// Error is never downgraded to failure; otherwise the last transition
// and its message win.
fn transition(state: &mut Option<RequestState>, kind: StateKind, message: Option<String>) {
    if let Some(current) = state {
        if current.kind == StateKind::Error && kind == StateKind::Failure {
            return;
        }
    }
    *state = Some(RequestState::new(kind, message));
}

fn set_once(state: &mut Option<RequestState>, kind: StateKind, message: Option<String>) {
    if state.is_none() {
        *state = Some(RequestState::new(kind, message));
    }
}

fn parse_method_and_params(
    map: &mut serde_json::Map<String, Value>,
    state: &mut Option<RequestState>,
) -> (Option<String>, Value) {
    let method_keys = map
        .keys()
        .filter(|key| METHODS.contains(&key.to_uppercase().as_str()))
        .cloned()
        .collect::<Vec<_>>();

    let explicit_method = map
        .get("method")
        .and_then(Value::as_str)
        .filter(|method| !method.is_empty())
        .map(str::to_string);
    let explicit_params = map.get("params").filter(|params| !params.is_null()).cloned();

    match (explicit_method, explicit_params) {
        (Some(method), Some(params)) => {
            if !method_keys.is_empty() {
                set_once(state, StateKind::Error, Some(NO_HTTP_METHOD.to_string()));
            }
            (Some(method.to_uppercase()), params)
        }
        (Some(_), None) | (None, Some(_)) => {
            set_once(
                state,
                StateKind::Error,
                Some(METHOD_OR_PARAMS_MISSING.to_string()),
            );
            (None, Value::Null)
        }
        (None, None) => {
            if method_keys.len() != 1 {
                set_once(state, StateKind::Error, Some(NO_HTTP_METHOD.to_string()));
                return (None, Value::Null);
            }
            let key = &method_keys[0];
            let params = map.shift_remove(key).unwrap_or(Value::Null);
            (Some(key.to_uppercase()), params)
        }
    }
}

/// Expand a request definition's `loop` into per-item local contexts.
/// Without a loop the request runs once with no local context.
pub fn expand_loop(
    raw: &Value,
    env: &mut Environment,
) -> Result<Vec<Option<IndexMap<String, Value>>>> {
    let loop_value = match raw.get("loop") {
        None | Some(Value::Null) => return Ok(vec![None]),
        Some(Value::String(text)) if text.is_empty() => return Ok(vec![None]),
        Some(Value::Array(items)) if items.is_empty() => return Ok(vec![None]),
        Some(value) => value,
    };

    let resolved = env
        .resolve_templates(loop_value, None)
        .map_err(|err| ReqplanError::InvalidPlan(err.to_string()))?;

    let items = match resolved {
        Value::Array(items) => items,
        other => {
            return Err(ReqplanError::InvalidPlan(format!(
                "Expected loop to be a list, got {}.",
                value_type_name(&other)
            )))
        }
    };

    Ok(items
        .into_iter()
        .map(|item| {
            let mut context = IndexMap::new();
            context.insert("item".to_string(), item);
            Some(context)
        })
        .collect())
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn env() -> Environment {
        Environment::new(None)
    }

    #[test]
    fn test_method_key_form() {
        let raw = json!({"name": "Get index", "get": {"url": "http://localhost"}});
        let request = ParsedRequest::new(&raw, &mut env(), false, None);

        assert!(request.state.is_none());
        assert_eq!(request.name.as_deref(), Some("Get index"));
        assert_eq!(request.method.as_deref(), Some("GET"));
        assert_eq!(request.params["url"], json!("http://localhost"));
        assert!(request.raise_for_status);
    }

    #[test]
    fn test_method_and_params_form() {
        let raw = json!({"method": "post", "params": {"url": "http://localhost"}});
        let request = ParsedRequest::new(&raw, &mut env(), false, None);

        assert!(request.state.is_none());
        assert_eq!(request.method.as_deref(), Some("POST"));
    }

    #[test]
    fn test_no_method_is_error() {
        for raw in [
            json!({"name": "no method"}),
            json!({"get": {"url": "u"}, "post": {"url": "u"}}),
            json!({"method": "get", "params": {"url": "u"}, "post": {"url": "u"}}),
        ] {
            let request = ParsedRequest::new(&raw, &mut env(), false, None);
            let state = request.state.unwrap();
            assert_eq!(state.kind, StateKind::Error);
            assert_eq!(state.message.as_deref(), Some(NO_HTTP_METHOD));
        }
    }

    #[test]
    fn test_method_without_params_is_error() {
        let raw = json!({"method": "get"});
        let request = ParsedRequest::new(&raw, &mut env(), false, None);
        let state = request.state.unwrap();
        assert_eq!(state.kind, StateKind::Error);
        assert_eq!(state.message.as_deref(), Some(METHOD_OR_PARAMS_MISSING));
    }

    #[test]
    fn test_skip_takes_precedence() {
        // Skipped requests resolve no templates and keep the skip state
        // even when the definition is also malformed.
        let raw = json!({"get": {"url": "{{ undefined_url }}"}, "post": {"url": "u"}});
        let request = ParsedRequest::new(&raw, &mut env(), true, None);
        let state = request.state.unwrap();
        assert_eq!(state.kind, StateKind::Skipped);
        assert_eq!(state.message.as_deref(), Some(EARLIER_ERRORS_SKIP));
    }

    #[test]
    fn test_template_failure_is_error_state() {
        let raw = json!({"get": {"url": "{{ undefined_url }}"}});
        let request = ParsedRequest::new(&raw, &mut env(), false, None);
        let state = request.state.unwrap();
        assert_eq!(state.kind, StateKind::Error);
        assert!(state
            .message
            .as_deref()
            .unwrap()
            .starts_with("Failed to resolve templates:"));
    }

    #[test]
    fn test_assertions_survive_template_failure() {
        let raw = json!({
            "get": {"url": "{{ undefined_url }}"},
            "assert": "response.ok",
        });
        let request = ParsedRequest::new(&raw, &mut env(), false, None);
        assert_eq!(request.assertions.len(), 1);
        assert_eq!(request.assertions[0].expression, "response.ok");
        assert!(!request.assertions[0].executed());
    }

    #[test]
    fn test_assertion_forms() {
        let raw = json!({
            "get": {"url": "u"},
            "assertions": [
                "response.ok",
                {"name": "Status is created", "expression": "response.status_code == 201"},
            ],
        });
        let request = ParsedRequest::new(&raw, &mut env(), false, None);
        assert_eq!(request.assertions.len(), 2);
        assert_eq!(request.assertions[0].name, "response.ok");
        assert_eq!(request.assertions[1].name, "Status is created");
        assert_eq!(
            request.assertions[1].expression,
            "response.status_code == 201"
        );
    }

    #[test]
    #[should_panic(expected = "has not been executed")]
    fn test_unexecuted_assertion_panics() {
        let assertion = Assertion::parse(&json!("response.ok"));
        assertion.ok();
    }

    #[test]
    fn test_loop_expansion() {
        let mut env = env();
        env.register("items", json!([1, 2, 3]));

        let raw = json!({"get": {"url": "u"}, "loop": "{{ items }}"});
        let contexts = expand_loop(&raw, &mut env).unwrap();
        assert_eq!(contexts.len(), 3);
        assert_eq!(contexts[1].as_ref().unwrap()["item"], json!(2));

        let raw = json!({"get": {"url": "u"}});
        assert_eq!(expand_loop(&raw, &mut env).unwrap(), vec![None]);
    }

    #[test]
    fn test_loop_must_be_list() {
        let raw = json!({"get": {"url": "u"}, "loop": "not-a-list"});
        let err = expand_loop(&raw, &mut env()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Expected loop to be a list, got string."
        );
    }

    #[tokio::test]
    async fn test_send_success_and_register() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
            .mount(&server)
            .await;

        let mut env = env();
        let raw = json!({
            "get": {"url": server.uri()},
            "register": "index",
            "assert": "response.status_code == 200",
        });
        let mut request = ParsedRequest::new(&raw, &mut env, false, None);
        let transport = HttpTransport::new().unwrap();
        request.send(&mut env, &transport).await;

        let state = request.state.unwrap();
        assert_eq!(state.kind, StateKind::Success);
        assert!(request.assertions[0].ok());
        assert_eq!(env.get("index").unwrap()["json"]["id"], json!(1));
        assert_eq!(env.get("response").unwrap()["status_code"], json!(200));
    }

    #[tokio::test]
    async fn test_send_failed_assertion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut env = env();
        let raw = json!({
            "get": {"url": server.uri()},
            "assert": ["response.ok", "response.status_code == 404"],
        });
        let mut request = ParsedRequest::new(&raw, &mut env, false, None);
        let transport = HttpTransport::new().unwrap();
        request.send(&mut env, &transport).await;

        let state = request.state.unwrap();
        assert_eq!(state.kind, StateKind::Failure);
        assert!(request.assertions[0].ok());
        assert!(!request.assertions[1].ok());
    }

    #[tokio::test]
    async fn test_assertion_error_not_downgraded_by_later_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut env = env();
        let raw = json!({
            "get": {"url": server.uri()},
            "assert": ["undefined_name > 1", "response.status_code == 404"],
        });
        let mut request = ParsedRequest::new(&raw, &mut env, false, None);
        let transport = HttpTransport::new().unwrap();
        request.send(&mut env, &transport).await;

        // The first assertion raises and the second fails; the error
        // state and its message survive the later failure.
        let state = request.state.unwrap();
        assert_eq!(state.kind, StateKind::Error);
        assert!(state.message.is_some());
        assert!(!request.assertions[0].ok());
        assert!(!request.assertions[1].ok());
    }

    #[tokio::test]
    async fn test_not_raised_when_status_ignored() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut env = env();
        let raw = json!({"get": {"url": server.uri()}, "raise_for_status": false});
        let mut request = ParsedRequest::new(&raw, &mut env, false, None);
        let transport = HttpTransport::new().unwrap();
        request.send(&mut env, &transport).await;

        let state = request.state.clone().unwrap();
        assert_eq!(state.kind, StateKind::NotRaised);
        assert!(state.ok());
    }

    #[tokio::test]
    async fn test_transport_error_is_error_state() {
        let mut env = env();
        // Unroutable port on localhost.
        let raw = json!({"get": {"url": "http://127.0.0.1:1", "timeout": 1}});
        let mut request = ParsedRequest::new(&raw, &mut env, false, None);
        let transport = HttpTransport::new().unwrap();
        request.send(&mut env, &transport).await;

        let state = request.state.unwrap();
        assert_eq!(state.kind, StateKind::Error);
        assert!(state.message.is_some());
        assert!(request.response.is_none());
    }
}
