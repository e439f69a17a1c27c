//! Program entry logic: argument handling, plan loading and dispatch to
//! the engine, mapping every outcome to an exit status.

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::cli::Args;
use crate::engine::PlansRunner;
use crate::errors::ReqplanError;
use crate::output::report::{ConsoleReporter, Reporter};
use crate::plan::{load_plan_files, parse_variables, Plan};
use crate::signals;
use crate::status::ExitStatus;

/// Main entry point for the CLI.
///
/// Parses arguments, loads and validates the plans, and runs them on a
/// tokio runtime.
pub fn run(args: Vec<String>) -> ExitStatus {
    init_tracing();

    let parsed = match Args::try_parse_from(&args) {
        Ok(args) => args,
        Err(e) => {
            e.print().ok();
            return if e.kind() == clap::error::ErrorKind::DisplayHelp
                || e.kind() == clap::error::ErrorKind::DisplayVersion
            {
                ExitStatus::Completed(0)
            } else {
                ExitStatus::Unexpected
            };
        }
    };

    let mut reporter = ConsoleReporter::stdout(false, parsed.colors());

    let plans = match load_plans(&parsed) {
        Ok(plans) => plans,
        Err(err) => {
            reporter.error(&err.to_string());
            return error_status(&err);
        }
    };

    let runner = PlansRunner::new(
        plans,
        parsed.parallel,
        parsed.animations(),
        parsed.colors(),
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            reporter.error(&format!("Failed to create runtime: {err}"));
            return ExitStatus::Unexpected;
        }
    };

    match runtime.block_on(runner.run()) {
        Ok(outcome) => {
            debug!(?outcome, "run finished");
            if outcome.invalid_plan {
                ExitStatus::InvalidPlan
            } else {
                ExitStatus::from_failed_count(outcome.requests.failed)
            }
        }
        Err(ReqplanError::Interrupted) => ExitStatus::Interrupted,
        Err(err) => {
            reporter.error(&err.to_string());
            error_status(&err)
        }
    }
}

fn load_plans(args: &Args) -> Result<Vec<Plan>, ReqplanError> {
    let variables = parse_variables(&args.variables)?;

    let mut plans = Vec::new();
    for raw in load_plan_files(&args.plan_files)? {
        if signals::was_interrupted() {
            return Err(ReqplanError::Interrupted);
        }
        plans.push(Plan::new(raw.data, raw.path, &variables)?);
    }
    Ok(plans)
}

fn error_status(err: &ReqplanError) -> ExitStatus {
    match err {
        ReqplanError::NoPlan(_) => ExitStatus::NoPlan,
        ReqplanError::InvalidPlan(_) | ReqplanError::Dependency(_) => ExitStatus::InvalidPlan,
        ReqplanError::Interrupted => ExitStatus::Interrupted,
        _ => ExitStatus::Unexpected,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            error_status(&ReqplanError::NoPlan(String::new())).code(),
            251
        );
        assert_eq!(
            error_status(&ReqplanError::InvalidPlan(String::new())).code(),
            252
        );
        assert_eq!(
            error_status(&ReqplanError::Dependency(String::new())).code(),
            252
        );
        assert_eq!(error_status(&ReqplanError::Interrupted).code(), 253);
    }
}
