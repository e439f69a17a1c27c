//! Template resolution and expression evaluation
//!
//! Wraps a [`tera::Tera`] instance together with a mutable variable
//! namespace. One `Environment` lives for the duration of one plan run:
//! plan variables, loop items, responses and the repeat index are all
//! registered here and visible to every later template and expression.
//!
//! Strings that are exactly one `{{ ... }}` expression keep the native
//! type of their result (numbers, booleans, lists, mappings) instead of
//! collapsing to text. This is done by evaluating the expression through
//! a `{% set %}` + `json_encode` wrapper and parsing the output back
//! with serde_json.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tera::{Context, Tera};
use thiserror::Error;

pub const VAR_START: &str = "{{";
pub const VAR_END: &str = "}}";

// Tera reports unbound names as "Variable `name` not found" somewhere in
// the error chain; cached to avoid recompilation in hot paths.
static VAR_NOT_FOUND_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Variable `([^`]+)` not found").unwrap()
});

/// Classification of a template resolution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateErrorKind {
    /// An expression referenced a name that is not bound in the namespace.
    UndefinedReference,
    /// The template or expression could not be parsed.
    Syntax,
    /// A lookup source failed, e.g. `lookup_file` did not find its file.
    DependencyNotFound,
    /// Any other evaluation failure (bad filter input, unknown function, ...).
    Evaluation,
}

#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct TemplateError {
    pub kind: TemplateErrorKind,
    pub message: String,
}

impl TemplateError {
    fn from_tera(err: tera::Error) -> Self {
        let message = describe_tera_error(&err);

        let kind = if VAR_NOT_FOUND_RE.is_match(&message) {
            TemplateErrorKind::UndefinedReference
        } else if message.contains("lookup_file:") || message.contains("env_var:") {
            TemplateErrorKind::DependencyNotFound
        } else if message.contains("Failed to parse") {
            TemplateErrorKind::Syntax
        } else {
            TemplateErrorKind::Evaluation
        };

        TemplateError { kind, message }
    }
}

/// Flatten a tera error and its source chain into one message; the
/// top-level display alone is usually just "Failed to render '...'".
fn describe_tera_error(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Variable namespace and template engine for one plan run.
pub struct Environment {
    tera: Tera,
    variables: IndexMap<String, Value>,
    base_path: Option<PathBuf>,
}

impl Environment {
    /// Create an environment. `base_path` is the directory used to resolve
    /// relative `lookup_file` paths, normally the plan file's directory.
    pub fn new(base_path: Option<&Path>) -> Self {
        let base_path = base_path.map(Path::to_path_buf);
        let mut tera = Tera::default();

        tera.register_function("env_var", env_var);

        let lookup_base = base_path.clone();
        tera.register_function(
            "lookup_file",
            move |args: &HashMap<String, Value>| -> tera::Result<Value> {
                lookup_file(lookup_base.as_deref(), args)
            },
        );

        Environment {
            tera,
            variables: IndexMap::new(),
            base_path,
        }
    }

    /// Bind or rebind a variable. There is no removal operation.
    pub fn register(&mut self, name: &str, value: Value) {
        self.variables.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn base_path(&self) -> Option<&Path> {
        self.base_path.as_deref()
    }

    /// Recursively resolve templates in a value, preserving structure and
    /// key order. `context` supplies transient bindings (e.g. a loop item)
    /// layered on top of the persistent namespace for this call only.
    pub fn resolve_templates(
        &mut self,
        value: &Value,
        context: Option<&IndexMap<String, Value>>,
    ) -> Result<Value, TemplateError> {
        match value {
            Value::String(input) => self.resolve_string(input, context),
            Value::Array(items) => {
                let resolved = items
                    .iter()
                    .map(|item| self.resolve_templates(item, context))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(resolved))
            }
            Value::Object(map) => {
                let mut resolved = serde_json::Map::new();
                for (key, item) in map {
                    resolved.insert(key.clone(), self.resolve_templates(item, context)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    /// Evaluate an expression directly (no string-template wrapper) and
    /// return its native result; used for assertions and repeat conditions.
    pub fn resolve_expression(
        &mut self,
        expression: &str,
        context: Option<&IndexMap<String, Value>>,
    ) -> Result<Value, TemplateError> {
        let wrapped = format!(
            "{{%- set __out = {} -%}}{{{{ __out | json_encode() }}}}",
            expression.trim()
        );
        let rendered = self.render(&wrapped, context)?;
        Ok(serde_json::from_str(&rendered).unwrap_or(Value::String(rendered)))
    }

    fn resolve_string(
        &mut self,
        input: &str,
        context: Option<&IndexMap<String, Value>>,
    ) -> Result<Value, TemplateError> {
        if !(input.contains(VAR_START) && input.contains(VAR_END)) {
            return Ok(Value::String(input.to_string()));
        }

        if is_single_expression(input) {
            let expression = input
                .strip_prefix(VAR_START)
                .and_then(|rest| rest.strip_suffix(VAR_END))
                .unwrap_or(input);
            return self.resolve_expression(expression, context);
        }

        let rendered = self.render(input, context)?;
        Ok(Value::String(rendered))
    }

    fn render(
        &mut self,
        template: &str,
        context: Option<&IndexMap<String, Value>>,
    ) -> Result<String, TemplateError> {
        let mut tera_context = Context::new();
        for (key, value) in &self.variables {
            tera_context.insert(key, value);
        }
        if let Some(local) = context {
            for (key, value) in local {
                tera_context.insert(key, value);
            }
        }

        self.tera
            .render_str(template, &tera_context)
            .map_err(TemplateError::from_tera)
    }
}

/// A string that is exactly one expression: starts and ends with the
/// expression markers and contains a single opening marker.
fn is_single_expression(input: &str) -> bool {
    input.starts_with(VAR_START)
        && input.ends_with(VAR_END)
        && input.matches(VAR_START).count() == 1
}

/// Truthiness of a resolved value, used for assertions and repeat
/// conditions.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// `env_var(name="...")`: process environment value, or null when unset.
fn env_var(args: &HashMap<String, Value>) -> tera::Result<Value> {
    let name = args
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| tera::Error::msg("env_var: requires a `name` argument"))?;

    Ok(match std::env::var(name) {
        Ok(value) => Value::String(value),
        Err(_) => Value::Null,
    })
}

/// `lookup_file(path="...")`: full text content of a file. Relative paths
/// are resolved against the plan directory first, then the working
/// directory.
fn lookup_file(base: Option<&Path>, args: &HashMap<String, Value>) -> tera::Result<Value> {
    let raw = args
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| tera::Error::msg("lookup_file: requires a `path` argument"))?;

    let path = resolve_lookup_path(base, Path::new(raw)).ok_or_else(|| {
        tera::Error::msg(format!(
            "lookup_file: did not find '{}' in plan directory or working directory",
            raw
        ))
    })?;

    let content = std::fs::read_to_string(&path).map_err(|err| {
        tera::Error::msg(format!(
            "lookup_file: failed to read '{}': {}",
            path.display(),
            err
        ))
    })?;

    Ok(Value::String(content.trim_end_matches('\n').to_string()))
}

fn resolve_lookup_path(base: Option<&Path>, path: &Path) -> Option<PathBuf> {
    if path.is_absolute() {
        return path.exists().then(|| path.to_path_buf());
    }

    if let Some(base) = base {
        let candidate = base.join(path);
        if candidate.exists() {
            return Some(candidate);
        }
    }

    path.exists().then(|| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env_with(vars: &[(&str, Value)]) -> Environment {
        let mut env = Environment::new(None);
        for (name, value) in vars {
            env.register(name, value.clone());
        }
        env
    }

    #[test]
    fn test_plain_string_passes_through() {
        let mut env = env_with(&[]);
        let resolved = env.resolve_templates(&json!("no markers here"), None).unwrap();
        assert_eq!(resolved, json!("no markers here"));
    }

    #[test]
    fn test_single_expression_keeps_native_types() {
        let mut env = env_with(&[
            ("num", json!(42)),
            ("flag", json!(true)),
            ("items", json!([1, 2, 3])),
            ("obj", json!({"a": 1})),
        ]);

        assert_eq!(env.resolve_templates(&json!("{{ num }}"), None).unwrap(), json!(42));
        assert_eq!(env.resolve_templates(&json!("{{ flag }}"), None).unwrap(), json!(true));
        assert_eq!(
            env.resolve_templates(&json!("{{ items }}"), None).unwrap(),
            json!([1, 2, 3])
        );
        assert_eq!(
            env.resolve_templates(&json!("{{ obj }}"), None).unwrap(),
            json!({"a": 1})
        );
    }

    #[test]
    fn test_mixed_string_renders_to_text() {
        let mut env = env_with(&[("num", json!(42))]);
        let resolved = env.resolve_templates(&json!("value: {{ num }}"), None).unwrap();
        assert_eq!(resolved, json!("value: 42"));
    }

    #[test]
    fn test_nested_structure_resolved_in_place() {
        let mut env = env_with(&[("host", json!("example.org")), ("port", json!(8080))]);
        let input = json!({
            "url": "http://{{ host }}/api",
            "meta": {"port": "{{ port }}", "tags": ["{{ host }}", "static"]},
            "count": 3,
        });
        let resolved = env.resolve_templates(&input, None).unwrap();
        assert_eq!(
            resolved,
            json!({
                "url": "http://example.org/api",
                "meta": {"port": 8080, "tags": ["example.org", "static"]},
                "count": 3,
            })
        );
    }

    #[test]
    fn test_local_context_layers_over_namespace() {
        let mut env = env_with(&[("item", json!("persistent"))]);
        let mut local = IndexMap::new();
        local.insert("item".to_string(), json!("transient"));

        let resolved = env.resolve_templates(&json!("{{ item }}"), Some(&local)).unwrap();
        assert_eq!(resolved, json!("transient"));

        // The layered binding is gone after the call.
        let resolved = env.resolve_templates(&json!("{{ item }}"), None).unwrap();
        assert_eq!(resolved, json!("persistent"));
    }

    #[test]
    fn test_undefined_reference_kind() {
        let mut env = env_with(&[]);
        let err = env.resolve_templates(&json!("{{ missing }}"), None).unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::UndefinedReference);

        let err = env.resolve_expression("missing > 1", None).unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::UndefinedReference);
    }

    #[test]
    fn test_syntax_error_kind() {
        let mut env = env_with(&[]);
        let err = env.resolve_templates(&json!("{{ 1 + }} trailing"), None).unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::Syntax);
    }

    #[test]
    fn test_expression_evaluates_to_native_boolean() {
        let mut env = env_with(&[("count", json!(2))]);
        assert_eq!(env.resolve_expression("count < 3", None).unwrap(), json!(true));
        assert_eq!(env.resolve_expression("count < 1", None).unwrap(), json!(false));
    }

    #[test]
    fn test_env_var_lookup() {
        std::env::set_var("REQPLAN_TEST_CITY", "Rovaniemi");
        let mut env = env_with(&[]);

        let value = env
            .resolve_templates(&json!("{{ env_var(name=\"REQPLAN_TEST_CITY\") }}"), None)
            .unwrap();
        assert_eq!(value, json!("Rovaniemi"));

        let value = env
            .resolve_templates(&json!("{{ env_var(name=\"REQPLAN_TEST_UNSET\") }}"), None)
            .unwrap();
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn test_lookup_file_prefers_base_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data.txt"), "from base\n").unwrap();

        let mut env = Environment::new(Some(dir.path()));
        let value = env
            .resolve_templates(&json!("{{ lookup_file(path=\"data.txt\") }}"), None)
            .unwrap();
        assert_eq!(value, json!("from base"));
    }

    #[test]
    fn test_lookup_file_missing_is_dependency_error() {
        let mut env = env_with(&[]);
        let err = env
            .resolve_templates(&json!("{{ lookup_file(path=\"definitely/not/here.txt\") }}"), None)
            .unwrap_err();
        assert_eq!(err.kind, TemplateErrorKind::DependencyNotFound);
    }

    #[test]
    fn test_is_truthy() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
        assert!(is_truthy(&json!(true)));
        assert!(is_truthy(&json!(1)));
        assert!(is_truthy(&json!("x")));
        assert!(is_truthy(&json!([0])));
        assert!(is_truthy(&json!({"k": 0})));
    }
}
