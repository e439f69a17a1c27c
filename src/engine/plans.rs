//! Multi-plan orchestration
//!
//! Runs plans sequentially with live output, or through a bounded worker
//! pool where each plan writes into an isolated buffer that is flushed
//! atomically when the plan finishes.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::errors::{ReqplanError, Result};
use crate::output::report::{
    ConsoleReporter, MultiReporter, Reporter, SummaryCell, SummaryRow,
};
use crate::plan::Plan;

use super::request::ParsedRequest;
use super::runner::PlanRunner;

/// Passed, failed and total request counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl Counters {
    /// Account one finished request. A request in a non-ok state counts
    /// as failed; an ok state counts as passed only when a response was
    /// actually obtained, so skipped requests count toward the total
    /// alone.
    pub fn update(&mut self, request: &ParsedRequest) {
        match &request.state {
            Some(state) if !state.ok() => self.failed += 1,
            _ if request.response.is_some() => self.passed += 1,
            _ => {}
        }
        self.total += 1;
    }

    fn add(&mut self, other: Counters) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.total += other.total;
    }

    fn cell(&self) -> SummaryCell {
        SummaryCell::Counts {
            passed: self.passed,
            failed: self.failed,
            total: self.total,
        }
    }
}

/// Aggregate result of a whole run.
#[derive(Debug, Clone, Copy)]
pub struct RunOutcome {
    pub requests: Counters,
    pub plans: Counters,
    /// Some plan failed to load or validate; the process result is the
    /// invalid-plan code instead of the failed-request count.
    pub invalid_plan: bool,
}

pub struct PlansRunner {
    plans: Vec<Arc<Plan>>,
    parallel: usize,
    animations: bool,
    colors: bool,
}

impl PlansRunner {
    /// The effective concurrency limit defaults to the number of
    /// available execution units and never exceeds the plan count.
    pub fn new(plans: Vec<Plan>, parallel: Option<usize>, animations: bool, colors: bool) -> Self {
        let available = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1);
        let parallel = plans
            .len()
            .max(1)
            .min(parallel.filter(|limit| *limit > 0).unwrap_or(available));

        PlansRunner {
            plans: plans.into_iter().map(Arc::new).collect(),
            parallel,
            animations,
            colors,
        }
    }

    pub async fn run(&self) -> Result<RunOutcome> {
        let start = Instant::now();
        debug!(plans = self.plans.len(), parallel = self.parallel, "starting run");

        let outcome = if self.parallel <= 1 {
            self.run_sequential().await?
        } else {
            self.run_parallel().await?
        };

        let elapsed = start.elapsed().as_secs_f64();
        let mut rows = Vec::new();
        if outcome.plans.total > 1 {
            rows.push(SummaryRow {
                label: "Plans",
                cell: outcome.plans.cell(),
            });
        }
        rows.push(SummaryRow {
            label: "Requests",
            cell: outcome.requests.cell(),
        });
        rows.push(SummaryRow {
            label: "Elapsed",
            cell: SummaryCell::Text(format!("{:.3} s", elapsed)),
        });

        if self.parallel <= 1 {
            let mut reporter = ConsoleReporter::stdout(self.animations, self.colors);
            reporter.summary(&rows);
        } else {
            MultiReporter::new(self.colors).summary(&rows);
        }

        Ok(outcome)
    }

    async fn run_sequential(&self) -> Result<RunOutcome> {
        let mut outcome = RunOutcome {
            requests: Counters::default(),
            plans: Counters::default(),
            invalid_plan: false,
        };
        let display_filename = self.plans.len() > 1;
        let mut reporter = ConsoleReporter::stdout(self.animations, self.colors);

        for plan in &self.plans {
            match run_single(plan, &mut reporter, display_filename, true).await {
                Ok(counters) => outcome.account(counters),
                Err(ReqplanError::Interrupted) => return Err(ReqplanError::Interrupted),
                Err(err) => {
                    reporter.error(&err.to_string());
                    outcome.account_error();
                }
            }
        }
        Ok(outcome)
    }

    async fn run_parallel(&self) -> Result<RunOutcome> {
        let mut outcome = RunOutcome {
            requests: Counters::default(),
            plans: Counters::default(),
            invalid_plan: false,
        };
        let multi = Arc::new(MultiReporter::new(self.colors));
        let semaphore = Arc::new(Semaphore::new(self.parallel));
        let mut tasks = JoinSet::new();

        for plan in &self.plans {
            let plan = Arc::clone(plan);
            let multi = Arc::clone(&multi);
            let semaphore = Arc::clone(&semaphore);
            let colors = self.colors;

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| ReqplanError::Interrupted)?;

                let title = plan.title(true);
                multi.start_plan(&title);

                let mut reporter = ConsoleReporter::buffered(Vec::new(), colors);
                let result = run_single(&plan, &mut reporter, true, false).await;
                if let Err(err) = &result {
                    if !matches!(err, ReqplanError::Interrupted) {
                        reporter.error(&err.to_string());
                    }
                }
                let details = String::from_utf8_lossy(&reporter.into_target()).to_string();

                let ok = matches!(&result, Ok(counters) if counters.failed == 0);
                if !matches!(&result, Err(ReqplanError::Interrupted)) {
                    multi.finish_plan(&title, ok, &details);
                }
                result
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined? {
                Ok(counters) => outcome.account(counters),
                Err(ReqplanError::Interrupted) => {
                    tasks.abort_all();
                    return Err(ReqplanError::Interrupted);
                }
                Err(err) => {
                    multi.error(&err.to_string());
                    outcome.account_error();
                }
            }
        }
        Ok(outcome)
    }
}

impl RunOutcome {
    fn account(&mut self, counters: Counters) {
        self.requests.add(counters);
        if counters.failed > 0 {
            self.plans.failed += 1;
        } else {
            self.plans.passed += 1;
        }
        self.plans.total += 1;
    }

    // A plan that failed to load counts as a failed plan and marks the
    // whole run invalid.
    fn account_error(&mut self) {
        self.plans.failed += 1;
        self.plans.total += 1;
        self.invalid_plan = true;
    }
}

async fn run_single(
    plan: &Plan,
    reporter: &mut dyn Reporter,
    display_filename: bool,
    print_name: bool,
) -> Result<Counters> {
    let mut runner = PlanRunner::new(plan, display_filename, print_name)?;
    runner.run(reporter).await
}
