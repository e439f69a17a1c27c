//! Plan definition and loading
//!
//! Supports YAML and JSON plan files. A plan is validated and normalized
//! once, before any execution, and is immutable afterwards; every run
//! gets a fresh runner and template environment.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_json::Value;

use crate::errors::{ReqplanError, Result};

/// Recognized plan file extensions.
pub const KNOWN_EXTENSIONS: &[&str] = &["json", "yaml", "yml"];

/// The `session` plan option: disabled, enabled with defaults, or enabled
/// with a headers/cookies mapping (templates resolved at session setup).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOption {
    Disabled,
    Enabled,
    Configured(Value),
}

impl SessionOption {
    fn parse(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) | Some(Value::Bool(false)) => SessionOption::Disabled,
            Some(Value::Bool(true)) => SessionOption::Enabled,
            Some(config @ Value::Object(_)) => SessionOption::Configured(config.clone()),
            Some(_) => SessionOption::Enabled,
        }
    }

    pub fn enabled(&self) -> bool {
        !matches!(self, SessionOption::Disabled)
    }
}

/// Execution options of a plan.
#[derive(Debug, Clone)]
pub struct PlanOptions {
    pub session: SessionOption,
    pub ignore_errors: bool,
    /// Repeat condition: a string is evaluated as an expression between
    /// iterations, any other value is used for its truthiness.
    pub repeat_while: Option<Value>,
    /// Seconds to pause between iterations (not before the first).
    pub repeat_delay: Option<f64>,
}

impl PlanOptions {
    fn parse(options: Option<&Value>) -> Result<Self> {
        let empty = serde_json::Map::new();
        let map = match options {
            None | Some(Value::Null) => &empty,
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(ReqplanError::InvalidPlan(
                    "Plan options must be a mapping.".to_string(),
                ))
            }
        };

        let repeat_while = map.get("repeat_while").filter(|v| !v.is_null()).cloned();
        let repeat_delay = match map.get("repeat_delay") {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.as_f64().ok_or_else(|| {
                ReqplanError::InvalidPlan("Plan option repeat_delay must be a number.".to_string())
            })?),
        };

        Ok(PlanOptions {
            session: SessionOption::parse(map.get("session")),
            ignore_errors: map
                .get("ignore_errors")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            repeat_while,
            repeat_delay,
        })
    }
}

/// A validated plan: metadata, options, resolved variable bindings and the
/// ordered raw request definitions.
#[derive(Debug, Clone)]
pub struct Plan {
    pub name: Option<String>,
    pub path: PathBuf,
    pub options: PlanOptions,
    pub variables: IndexMap<String, Value>,
    pub requests: Vec<Value>,
}

impl Plan {
    /// Build a plan from raw plan data. Variable merge order: plan
    /// `variables`, then `variable_files` contents in order, then caller
    /// overrides — later wins.
    pub fn new(
        data: Value,
        path: PathBuf,
        variables_override: &IndexMap<String, Value>,
    ) -> Result<Self> {
        let map = data.as_object().ok_or_else(|| {
            ReqplanError::InvalidPlan(format!(
                "Plan file {} must contain a mapping.",
                path.display()
            ))
        })?;

        let name = map
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string);
        let options = PlanOptions::parse(map.get("options"))?;

        let mut variables = IndexMap::new();
        if let Some(declared) = map.get("variables") {
            let declared = declared.as_object().ok_or_else(|| {
                ReqplanError::InvalidPlan("Plan variables must be a mapping.".to_string())
            })?;
            for (key, value) in declared {
                variables.insert(key.clone(), value.clone());
            }
        }

        for file in ensure_list(map.get("variable_files").unwrap_or(&Value::Null)) {
            let file = file.as_str().ok_or_else(|| {
                ReqplanError::InvalidPlan("Plan variable_files entries must be paths.".to_string())
            })?;
            load_variable_file(&mut variables, path.parent(), Path::new(file))?;
        }

        for (key, value) in variables_override {
            variables.insert(key.clone(), value.clone());
        }

        let requests = match map.get("requests") {
            Some(Value::Array(requests)) if !requests.is_empty() => requests.clone(),
            _ => {
                return Err(ReqplanError::InvalidPlan(
                    "Plan must contain requests array.".to_string(),
                ))
            }
        };

        Ok(Plan {
            name,
            path,
            options,
            variables,
            requests,
        })
    }

    /// Human-readable title, optionally including the source file name to
    /// disambiguate plans in multi-plan runs.
    pub fn title(&self, display_filename: bool) -> String {
        let filename = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string());

        match (&self.name, display_filename) {
            (Some(name), true) => format!("{} ({})", name, filename),
            (Some(name), false) => name.clone(),
            (None, _) => filename,
        }
    }
}

/// Normalize an optional single-or-list value into a list. Null produces
/// an empty list, a list is taken as-is, anything else wraps into a
/// one-element list.
pub(crate) fn ensure_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn load_variable_file(
    variables: &mut IndexMap<String, Value>,
    base: Option<&Path>,
    file: &Path,
) -> Result<()> {
    let path = if file.is_relative() {
        base.map(|base| base.join(file)).unwrap_or_else(|| file.to_path_buf())
    } else {
        file.to_path_buf()
    };

    let content = fs::read_to_string(&path).map_err(|err| {
        ReqplanError::Dependency(format!(
            "Failed to read variable file {}: {}",
            path.display(),
            err
        ))
    })?;

    let data = parse_structured(&content, &path).map_err(|err| {
        ReqplanError::Dependency(format!(
            "Failed to parse variable file {}: {}",
            path.display(),
            err
        ))
    })?;

    let map = data.as_object().ok_or_else(|| {
        ReqplanError::Dependency(format!(
            "Variable file {} must contain a mapping.",
            path.display()
        ))
    })?;

    for (key, value) in map {
        variables.insert(key.clone(), value.clone());
    }
    Ok(())
}

/// Raw plan data together with its originating path.
#[derive(Debug, Clone)]
pub struct RawPlan {
    pub data: Value,
    pub path: PathBuf,
}

/// Load raw plan data from the given files and/or directories. Directory
/// entries are sorted and recursed; inside a directory only files with a
/// recognized extension are considered.
pub fn load_plan_files(paths: &[PathBuf]) -> Result<Vec<RawPlan>> {
    if paths.is_empty() {
        return Err(ReqplanError::NoPlan(
            "No requests plan file provided.".to_string(),
        ));
    }

    let mut plans = Vec::new();
    for path in paths {
        load_plan_path(&mut plans, path, false)?;
    }

    if plans.is_empty() {
        let listed = paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(ReqplanError::NoPlan(format!(
            "Did not find plan file in {}.",
            listed
        )));
    }

    Ok(plans)
}

fn load_plan_path(plans: &mut Vec<RawPlan>, path: &Path, in_directory: bool) -> Result<()> {
    if path.is_dir() {
        let mut entries = fs::read_dir(path)
            .map_err(ReqplanError::Io)?
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(ReqplanError::Io)?
            .into_iter()
            .map(|entry| entry.path())
            .collect::<Vec<_>>();
        entries.sort();

        for entry in entries {
            load_plan_path(plans, &entry, true)?;
        }
        return Ok(());
    }

    if in_directory && !has_known_extension(path) {
        return Ok(());
    }

    if !path.exists() {
        return Err(ReqplanError::NoPlan(format!(
            "Did not find plan file in {}.",
            path.display()
        )));
    }

    plans.push(load_plan_file(path)?);
    Ok(())
}

fn has_known_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| KNOWN_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Load one plan file, detecting the format from the extension.
pub fn load_plan_file(path: &Path) -> Result<RawPlan> {
    if !has_known_extension(path) {
        return Err(ReqplanError::InvalidPlan(format!(
            "Failed to recognize file type of {}. File extension must be json, yaml, or yml.",
            path.display()
        )));
    }

    let content = fs::read_to_string(path).map_err(|err| match err.kind() {
        std::io::ErrorKind::NotFound => {
            ReqplanError::NoPlan(format!("Did not find plan file in {}.", path.display()))
        }
        _ => ReqplanError::Io(err),
    })?;

    let data = parse_structured(&content, path).map_err(|err| {
        ReqplanError::InvalidPlan(format!(
            "Failed to parse plan file {}: {}",
            path.display(),
            err
        ))
    })?;

    Ok(RawPlan {
        data,
        path: path.to_path_buf(),
    })
}

fn parse_structured(content: &str, path: &Path) -> std::result::Result<Value, String> {
    let json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        serde_json::from_str(content).map_err(|err| err.to_string())
    } else {
        serde_yaml::from_str(content).map_err(|err| err.to_string())
    }
}

/// Parse `--variable NAME:VALUE` definitions into an override mapping.
pub fn parse_variables(raw_variables: &[String]) -> Result<IndexMap<String, Value>> {
    let mut variables = IndexMap::new();

    for raw in raw_variables {
        let (key, value) = raw.split_once(':').ok_or_else(|| {
            ReqplanError::InvalidPlan(format!(
                "Variable definition \"{}\" has invalid format. \
                 Variables should be defined as NAME:VALUE strings.",
                raw
            ))
        })?;
        variables.insert(key.to_string(), Value::String(value.to_string()));
    }

    Ok(variables)
}
