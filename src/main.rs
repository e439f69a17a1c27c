use std::sync::atomic::{AtomicBool, Ordering};

use reqplan::core;
use reqplan::signals;
use reqplan::status::ExitStatus;

/// Entry point - catches Ctrl+C and calls core::run()
///
/// Returns ExitStatus directly, which implements std::process::Termination.
fn main() -> ExitStatus {
    // Set up Ctrl+C handler that sets a flag instead of calling exit()
    // This allows destructors to run and resources to be cleaned up properly
    ctrlc::set_handler(move || {
        signals::set_interrupted();

        // Print newline to clean up interrupted line
        eprintln!("\nInterrupted");

        // On second Ctrl+C, force exit (user really wants out)
        static SECOND_CTRL_C: AtomicBool = AtomicBool::new(false);
        if SECOND_CTRL_C.swap(true, Ordering::SeqCst) {
            std::process::exit(ExitStatus::Interrupted.code() as i32);
        }
    })
    .ok();

    let args: Vec<String> = std::env::args().collect();

    let status = core::run(args);

    if signals::was_interrupted() {
        return ExitStatus::Interrupted;
    }

    status
}
