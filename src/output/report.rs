//! Plan execution reporters
//!
//! `ConsoleReporter` narrates one plan's execution line by line into any
//! writer. `MultiReporter` serializes start/finish notifications from
//! concurrently running plans, each carrying its own buffered narrative.

use std::io::{self, Write};
use std::sync::Mutex;
use std::time::Duration;

use indexmap::IndexMap;
use indicatif::{ProgressBar, ProgressStyle};

use crate::engine::request::{ParsedRequest, StateKind};
use crate::output::terminal;

const MARK_OK: &str = "✔";
const MARK_FAIL: &str = "✘";
const MARK_SKIP: &str = "➖";

const KNOWN_OUTPUTS: &str = "headers, request_headers, request_body, \
response_headers, response_body, text, json, yml, yaml";

/// One row of the final summary table.
pub struct SummaryRow {
    pub label: &'static str,
    pub cell: SummaryCell,
}

pub enum SummaryCell {
    Counts {
        passed: usize,
        failed: usize,
        total: usize,
    },
    Text(String),
}

/// Receives execution events of a single plan run.
pub trait Reporter: Send {
    fn title(&mut self, name: Option<&str>, num_requests: usize, repeat_index: Option<usize>);
    fn start_request(&mut self, request: &ParsedRequest);
    fn finish_request(&mut self, request: &ParsedRequest);
    fn error(&mut self, message: &str);
    fn summary(&mut self, rows: &[SummaryRow]);
}

/// Line-by-line narrative of a plan run, written to any target. With
/// animations enabled an in-flight request shows a spinner until its
/// finish line replaces it.
pub struct ConsoleReporter<W: Write + Send> {
    target: W,
    animations: bool,
    colors: bool,
    log_started: bool,
    spinner: Option<ProgressBar>,
}

impl ConsoleReporter<io::Stdout> {
    pub fn stdout(animations: bool, colors: bool) -> Self {
        ConsoleReporter {
            target: io::stdout(),
            animations,
            colors,
            log_started: true,
            spinner: None,
        }
    }
}

impl<W: Write + Send> ConsoleReporter<W> {
    /// Reporter writing into a buffer or other custom target; used for
    /// parallel plan runs. Never animates or logs request starts.
    pub fn buffered(target: W, colors: bool) -> Self {
        ConsoleReporter {
            target,
            animations: false,
            colors,
            log_started: false,
            spinner: None,
        }
    }

    pub fn into_target(self) -> W {
        self.target
    }

    fn style(&self, text: &str, style: fn(&str) -> String) -> String {
        if self.colors {
            style(text)
        } else {
            text.to_string()
        }
    }

    fn state_mark(&self, kind: StateKind) -> String {
        match kind {
            StateKind::Success | StateKind::NotRaised => self.style(MARK_OK, terminal::success),
            StateKind::Failure | StateKind::Error => self.style(MARK_FAIL, terminal::error),
            StateKind::Skipped => self.style(MARK_SKIP, terminal::muted),
        }
    }

    fn method_text(&self, request: &ParsedRequest) -> String {
        let method = request.method.as_deref().unwrap_or("?");
        let url = request
            .params
            .get("url")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        format!("{} {}", self.style(method, terminal::bold), url)
    }

    fn response_code_text(&self, request: &ParsedRequest) -> String {
        let Some(response) = &request.response else {
            return String::new();
        };

        let code = format!("HTTP {}", response.status_code);
        let code = if self.colors {
            terminal::bold_color(&code, terminal::http_status(response.status_code))
        } else {
            code
        };
        let elapsed_ms = response.elapsed.as_secs_f64() * 1000.0;

        let mut text = format!("{} ({:.3} ms)", code, elapsed_ms);
        if request.state.as_ref().is_some_and(|s| s.kind == StateKind::NotRaised) {
            text.push_str(&self.style(" HTTP status code ignored.", terminal::muted));
        }
        text
    }

    fn message_text(&self, request: &ParsedRequest) -> String {
        let Some(state) = &request.state else {
            return String::new();
        };
        match &state.message {
            Some(message) => format!(
                "{} {}",
                self.style(&format!("{}:", state.kind.as_str()), terminal::bold),
                message
            ),
            None => String::new(),
        }
    }

    fn assertions_text(&self, request: &ParsedRequest) -> String {
        if request
            .state
            .as_ref()
            .is_some_and(|s| s.kind == StateKind::Skipped)
        {
            return String::new();
        }

        let mut text = String::new();
        for assertion in &request.assertions {
            let mark = if !assertion.executed() {
                self.style(MARK_SKIP, terminal::muted)
            } else if assertion.ok() {
                self.style(MARK_OK, terminal::success)
            } else {
                self.style(MARK_FAIL, terminal::error)
            };
            text.push_str(&format!("  {} {}\n", mark, assertion.name));
        }
        text
    }

    fn headers_text(&self, headers: &IndexMap<String, String>) -> String {
        headers
            .iter()
            .map(|(name, value)| format!("{}: {}", self.style(name, terminal::bold), value))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn body_text(&self, body: &str, content_type: Option<&str>) -> String {
        let content_type = content_type.unwrap_or_default();
        if content_type.starts_with("application/json") {
            serde_json::from_str::<serde_json::Value>(body)
                .and_then(|value| serde_json::to_string_pretty(&value))
                .unwrap_or_else(|_| body.to_string())
        } else if content_type.starts_with("application/yaml") {
            serde_yaml::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|value| serde_yaml::to_string(&value).ok())
                .unwrap_or_else(|| body.to_string())
        } else {
            body.to_string()
        }
    }

    fn output_text(&self, request: &ParsedRequest, selector: &str) -> String {
        let Some(response) = &request.response else {
            return String::new();
        };

        match selector.to_lowercase().as_str() {
            "headers" | "response_headers" => {
                format_output(&self.headers_text(&response.headers), "< ")
            }
            "request_headers" => {
                format_output(&self.headers_text(&response.request.headers), "> ")
            }
            "request_body" => match &response.request.body {
                Some(body) => {
                    let content_type = header_value(&response.request.headers, "content-type");
                    format_output(&self.body_text(body, content_type), "> ")
                }
                None => String::new(),
            },
            "response_body" => {
                let content_type = header_value(&response.headers, "content-type");
                format_output(&self.body_text(&response.text, content_type), "< ")
            }
            "text" => format_output(&response.text, "< "),
            "json" => match response
                .json
                .as_ref()
                .and_then(|json| serde_json::to_string_pretty(json).ok())
            {
                Some(pretty) => format_output(&pretty, "< "),
                None => String::new(),
            },
            "yml" | "yaml" => match response
                .json
                .as_ref()
                .and_then(|json| serde_yaml::to_string(json).ok())
            {
                Some(pretty) => format_output(&pretty, "< "),
                None => String::new(),
            },
            other => format_output(
                &format!(
                    "Unknown output entry [{}], expected one of [{}]",
                    other, KNOWN_OUTPUTS
                ),
                "? ",
            ),
        }
    }

    fn finish_text(&self, request: &ParsedRequest) -> String {
        let mark = request
            .state
            .as_ref()
            .map(|state| self.state_mark(state.kind))
            .unwrap_or_else(|| self.style(MARK_SKIP, terminal::muted));

        let mut text = String::new();
        match &request.name {
            Some(name) => {
                text.push_str(&format!("{} {}\n", mark, self.style(name, terminal::bold)));
                text.push_str(&format!("  {}\n", self.method_text(request)));
            }
            None => text.push_str(&format!("{} {}\n", mark, self.method_text(request))),
        }

        let code_text = self.response_code_text(request);
        let message_text = self.message_text(request);
        match (code_text.is_empty(), message_text.is_empty()) {
            (false, false) => text.push_str(&format!("  {}\n  {}\n", code_text, message_text)),
            (false, true) => text.push_str(&format!("  {}\n", code_text)),
            (true, false) => text.push_str(&format!("  {}\n", message_text)),
            (true, true) => {}
        }

        text.push_str(&self.assertions_text(request));

        for selector in &request.output {
            text.push_str(&self.output_text(request, selector));
        }

        text
    }

    fn clear_spinner(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }
}

impl<W: Write + Send> Reporter for ConsoleReporter<W> {
    fn title(&mut self, name: Option<&str>, num_requests: usize, repeat_index: Option<usize>) {
        if let Some(name) = name {
            let _ = writeln!(self.target, "{}", self.style(name, terminal::bold));
        }
        let repeat_text = repeat_index
            .map(|index| format!(" (repeat_index={})", index))
            .unwrap_or_default();
        let _ = writeln!(
            self.target,
            "Sending {} requests{}:\n",
            num_requests, repeat_text
        );
    }

    fn start_request(&mut self, request: &ParsedRequest) {
        if !self.log_started {
            return;
        }
        if !self.animations {
            return;
        }

        let message = match &request.name {
            Some(name) => self.style(name, terminal::bold),
            None => self.method_text(request),
        };
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner.set_message(message);
        self.spinner = Some(spinner);
    }

    fn finish_request(&mut self, request: &ParsedRequest) {
        self.clear_spinner();
        let text = self.finish_text(request);
        let _ = write!(self.target, "{}", text);
        let _ = self.target.flush();
    }

    fn error(&mut self, message: &str) {
        if message.is_empty() {
            return;
        }
        self.clear_spinner();
        let _ = writeln!(
            self.target,
            "{} {}",
            self.style("ERROR:", terminal::error),
            message
        );
    }

    fn summary(&mut self, rows: &[SummaryRow]) {
        let text = format_summary(rows, self.colors);
        let _ = write!(self.target, "\n{}", text);
        let _ = self.target.flush();
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("  {}", line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
        + if text.ends_with('\n') { "\n" } else { "" }
}

fn header_value<'a>(headers: &'a IndexMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn format_output(output: &str, prefix: &str) -> String {
    let trimmed = output.trim_end_matches([' ', '\n']);
    if trimmed.is_empty() {
        return String::new();
    }
    let prefixed = trimmed.replace('\n', &format!("\n{}", prefix));
    format!("\n{}{}\n", prefix, prefixed)
}

fn format_summary(rows: &[SummaryRow], colors: bool) -> String {
    let style = |text: &str, f: fn(&str) -> String| {
        if colors {
            f(text)
        } else {
            text.to_string()
        }
    };
    let key_width = rows
        .iter()
        .map(|row| row.label.len())
        .max()
        .unwrap_or_default()
        + 1;

    let mut text = String::new();
    for row in rows {
        let value = match &row.cell {
            SummaryCell::Counts {
                passed,
                failed,
                total,
            } => {
                let mut values = Vec::new();
                if *passed > 0 {
                    values.push(style(&format!("{} succeeded", passed), terminal::success));
                }
                if *failed > 0 {
                    values.push(style(&format!("{} failed", failed), terminal::error));
                }
                values.push(format!("{} total", total));
                values.join(", ")
            }
            SummaryCell::Text(value) => value.clone(),
        };

        let label = format!("{}:", row.label);
        text.push_str(&format!(
            "{} {}\n",
            style(&format!("{:<key_width$}", label), terminal::bold),
            value
        ));
    }
    text
}

/// Shared reporter for parallel runs. Each plan pushes one start and one
/// finish notification; the finish carries the plan's complete buffered
/// narrative so output of concurrent plans never interleaves.
pub struct MultiReporter {
    inner: Mutex<MultiInner>,
}

struct MultiInner {
    target: io::Stdout,
    colors: bool,
}

impl MultiReporter {
    pub fn new(colors: bool) -> Self {
        MultiReporter {
            inner: Mutex::new(MultiInner {
                target: io::stdout(),
                colors,
            }),
        }
    }

    fn style(colors: bool, text: &str, f: fn(&str) -> String) -> String {
        if colors {
            f(text)
        } else {
            text.to_string()
        }
    }

    pub fn start_plan(&self, title: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            let colors = inner.colors;
            let _ = writeln!(
                inner.target,
                "{} {}",
                Self::style(colors, "▸", terminal::muted),
                Self::style(colors, title, terminal::bold)
            );
        }
    }

    pub fn finish_plan(&self, title: &str, ok: bool, details: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            let colors = inner.colors;
            let mark = if ok {
                Self::style(colors, MARK_OK, terminal::success)
            } else {
                Self::style(colors, MARK_FAIL, terminal::error)
            };
            let _ = writeln!(
                inner.target,
                "{} {}",
                mark,
                Self::style(colors, title, terminal::bold)
            );
            let _ = write!(inner.target, "{}", indent(details));
            let _ = inner.target.flush();
        }
    }

    pub fn error(&self, message: &str) {
        if message.is_empty() {
            return;
        }
        if let Ok(mut inner) = self.inner.lock() {
            let colors = inner.colors;
            let _ = writeln!(
                inner.target,
                "{} {}",
                Self::style(colors, "ERROR:", terminal::error),
                message
            );
        }
    }

    pub fn summary(&self, rows: &[SummaryRow]) {
        if let Ok(mut inner) = self.inner.lock() {
            let text = format_summary(rows, inner.colors);
            let _ = write!(inner.target, "\n{}", text);
            let _ = inner.target.flush();
        }
    }
}
