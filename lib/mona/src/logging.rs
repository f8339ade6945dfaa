//! Thin facade over `slog`. Components take an optional parent `Logger` and
//! fall back to `Discard`, so library users only pay for logging they wire up.

pub use slog::{crit, debug, error, info, o, trace, warn};
pub use slog::{Discard, Logger};
pub use sloggers::types::Severity;

use crate::error::{Error, ErrorKind, Result};
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::Build;

/// Builds a terminal logger writing to stderr.
pub fn init(severity: Severity) -> Result<Logger> {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(severity);
    builder.destination(Destination::Stderr);

    builder
        .build()
        .map_err(|err| Error::new(ErrorKind::Intern, err.to_string()))
}
