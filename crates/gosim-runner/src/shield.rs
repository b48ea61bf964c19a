//! Keeps the controller alive across SIGINT/SIGTERM.
//!
//! The handler only logs. The controller then finishes the current run and
//! its parking step before exiting on its own. SIGKILL cannot be caught, and
//! a terminal Ctrl-C still reaches a synchronous child because it shares the
//! foreground process group. That is the intended way to abort one run.

use crate::PROGRAM;
use tracing::warn;

pub fn install_signal_shield() -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(|| {
        eprintln!("{} escaped signal", PROGRAM);
        warn!("termination request ignored until the current run completes");
    })
}
