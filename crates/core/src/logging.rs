//! Structured logging setup.
//!
//! The numeric verbosity knob (10/20/30/40/50, matching the conventional
//! debug/info/warning/error/critical ladder) is mapped onto a `tracing`
//! level and installed as the default global filter.

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Translates the `--verbosity` CLI value onto a `tracing::Level`. Values between the
/// named rungs round down to the nearest more-verbose level (e.g. 25 behaves like 20).
pub fn level_for_verbosity(verbosity: i64) -> Level {
	if verbosity <= 10 {
		Level::DEBUG
	} else if verbosity <= 20 {
		Level::INFO
	} else if verbosity <= 30 {
		Level::WARN
	} else {
		Level::ERROR
	}
}

/// Installs the global subscriber. Returns a `WorkerGuard` that must be held for the
/// lifetime of the process: dropping it flushes and stops the background writer thread.
///
/// `RUST_LOG` overrides `verbosity` entirely when set, matching the convention used
/// throughout the rest of the ecosystem.
pub fn init(verbosity: i64) -> WorkerGuard {
	let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());

	let filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(level_for_verbosity(verbosity).to_string()));

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(non_blocking)
		.with_target(true)
		.init();

	guard
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn verbosity_ladder_matches_original_thresholds() {
		assert_eq!(level_for_verbosity(10), Level::DEBUG);
		assert_eq!(level_for_verbosity(15), Level::DEBUG);
		assert_eq!(level_for_verbosity(20), Level::INFO);
		assert_eq!(level_for_verbosity(30), Level::WARN);
		assert_eq!(level_for_verbosity(40), Level::ERROR);
		assert_eq!(level_for_verbosity(50), Level::ERROR);
	}
}
