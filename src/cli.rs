//! CLI argument definitions using clap

use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "reqplan", version, about = "Send a plan of HTTP requests", long_about = None)]
pub struct Args {
    /// Load requests plan from JSON or YAML file or directory
    #[arg(value_name = "PLAN_FILE")]
    pub plan_files: Vec<PathBuf>,

    /// Limit number of parallel plan executions
    #[arg(long = "parallel", value_name = "N")]
    pub parallel: Option<usize>,

    /// Define a variable to be used in the requests; repeat the argument
    /// to set multiple variables
    #[arg(
        short = 'v',
        long = "variable",
        value_name = "NAME:VALUE",
        action = ArgAction::Append
    )]
    pub variables: Vec<String>,

    /// Disable progress animations in console output
    #[arg(long = "no-animation", action = ArgAction::SetTrue)]
    pub no_animation: bool,

    /// Disable colors in console output
    #[arg(long = "no-colors", action = ArgAction::SetTrue)]
    pub no_colors: bool,
}

impl Args {
    pub fn animations(&self) -> bool {
        !self.no_animation
    }

    pub fn colors(&self) -> bool {
        !self.no_colors
    }
}
