// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]

use std::fmt;

/// Installs the global subscriber. `RUST_LOG` wins over `default_filter`;
/// calling this twice is harmless.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}

/// How the frame loop has to react to a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Terminates the render loop; there is no alternate resource path.
    Fatal,
    /// Skip this iteration and rebuild; invisible beyond a dropped frame.
    Recoverable,
    /// Logged, no state change.
    Advisory,
}

impl Severity {
    pub fn is_fatal(self) -> bool {
        matches!(self, Severity::Fatal)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Fatal => "fatal",
            Severity::Recoverable => "recoverable",
            Severity::Advisory => "advisory",
        })
    }
}
