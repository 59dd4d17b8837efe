//! Centralized tracing initialization for every binary in the workspace.
//!
//! The control loop runs on a multi-threaded tokio runtime, so the subscriber
//! is installed process-wide rather than per thread.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Initialize tracing for a binary.
///
/// - Respects the `RUST_LOG` environment variable (defaults to "info")
/// - Outputs compact logs without target, file or line metadata
/// - Calling it a second time is a no-op
///
/// # Example
/// ```no_run
/// use arm_inference_lib::init_tracing;
///
/// fn main() {
///     init_tracing();
///     // Your binary code here
/// }
/// ```
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_file(false)
        .with_line_number(false);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}
