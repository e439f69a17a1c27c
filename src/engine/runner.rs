//! Single-plan execution
//!
//! A `PlanRunner` owns a private template environment and transport for
//! the duration of one plan run; nothing is shared across plans.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::errors::{ReqplanError, Result};
use crate::output::report::Reporter;
use crate::plan::{Plan, SessionOption};
use crate::signals;
use crate::template::{is_truthy, Environment};
use crate::transport::{HttpTransport, SessionConfig};

use super::plans::Counters;
use super::request::{expand_loop, ParsedRequest};

pub struct PlanRunner<'a> {
    plan: &'a Plan,
    env: Environment,
    transport: HttpTransport,
    display_filename: bool,
    print_name: bool,
}

impl<'a> PlanRunner<'a> {
    /// Prepare the environment, session and plan variables. Session and
    /// variable resolution failures are dependency errors that abort
    /// this plan before any request is sent.
    pub fn new(plan: &'a Plan, display_filename: bool, print_name: bool) -> Result<Self> {
        let mut env = Environment::new(plan.path.parent());

        let variables = Value::Object(
            plan.variables
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        );
        let resolved = env.resolve_templates(&variables, None).map_err(|err| {
            ReqplanError::Dependency(format!("Failed to load plan variables: {err}"))
        })?;
        if let Value::Object(resolved) = resolved {
            for (name, value) in resolved {
                env.register(&name, value);
            }
        }

        // Variables are registered first so session headers and cookies
        // can reference them.
        let transport = match &plan.options.session {
            SessionOption::Disabled => HttpTransport::new()?,
            SessionOption::Enabled => HttpTransport::with_session(&SessionConfig::default())?,
            SessionOption::Configured(config) => {
                let resolved = env.resolve_templates(config, None).map_err(|err| {
                    ReqplanError::Dependency(format!("Failed to prepare session: {err}"))
                })?;
                HttpTransport::with_session(&session_config(&resolved))?
            }
        };

        Ok(PlanRunner {
            plan,
            env,
            transport,
            display_filename,
            print_name,
        })
    }

    pub fn title(&self) -> String {
        self.plan.title(self.display_filename)
    }

    /// Run the plan's iterations to completion and return the request
    /// counters. Interrupts are checked between requests.
    pub async fn run(&mut self, reporter: &mut dyn Reporter) -> Result<Counters> {
        let mut counters = Counters::default();
        debug!(plan = %self.title(), requests = self.plan.requests.len(), "running plan");

        let has_repeat = self.plan.options.repeat_while.is_some();
        let ignore_errors = self.plan.options.ignore_errors;
        let mut repeat_index: usize = 0;

        loop {
            if repeat_index > 0 {
                if let Some(delay) = self.plan.options.repeat_delay {
                    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                }
            }

            if has_repeat {
                self.env
                    .register("repeat_index", Value::from(repeat_index as u64));
            }

            let title = self.print_name.then(|| self.title());
            reporter.title(
                title.as_deref(),
                self.plan.requests.len(),
                has_repeat.then_some(repeat_index),
            );

            for raw in &self.plan.requests {
                for context in expand_loop(raw, &mut self.env)? {
                    if signals::was_interrupted() {
                        return Err(ReqplanError::Interrupted);
                    }

                    let skip = !ignore_errors && counters.failed > 0;
                    let mut request = ParsedRequest::new(raw, &mut self.env, skip, context);

                    if request.state.is_none() {
                        reporter.start_request(&request);
                        request.send(&mut self.env, &self.transport).await;
                    }

                    reporter.finish_request(&request);
                    counters.update(&request);
                }
            }

            if !ignore_errors && counters.failed > 0 {
                debug!(plan = %self.title(), "stopping repeats after failure");
                break;
            }
            if !has_repeat {
                break;
            }

            // The condition is evaluated against the index of the
            // iteration that would run next, so `repeat_index < 3`
            // runs exactly the indices 0, 1 and 2.
            repeat_index += 1;
            self.env
                .register("repeat_index", Value::from(repeat_index as u64));
            if !self.check_repeat_condition()? {
                break;
            }
        }

        Ok(counters)
    }

    fn check_repeat_condition(&mut self) -> Result<bool> {
        match &self.plan.options.repeat_while {
            None => Ok(false),
            Some(Value::String(expression)) => {
                let expression = expression.clone();
                let value = self.env.resolve_expression(&expression, None)?;
                Ok(is_truthy(&value))
            }
            Some(other) => Ok(is_truthy(other)),
        }
    }
}

fn session_config(resolved: &Value) -> SessionConfig {
    let pairs = |key: &str| -> Vec<(String, String)> {
        resolved
            .get(key)
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .map(|(name, value)| {
                        let value = match value {
                            Value::String(text) => text.clone(),
                            other => other.to_string(),
                        };
                        (name.clone(), value)
                    })
                    .collect()
            })
            .unwrap_or_default()
    };

    SessionConfig {
        headers: pairs("headers"),
        cookies: pairs("cookies"),
    }
}
