//! Log output for the binary.

/// Initialize the tracing subscriber if the telemetry feature is enabled.
///
/// `RUST_LOG` wins over `level`. Logs go to stderr so command output on
/// stdout stays machine-readable.
#[cfg(feature = "telemetry")]
pub fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // A subscriber may already be installed when embedded in tests.
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "telemetry"))]
pub fn init_tracing(_level: &str) {}
