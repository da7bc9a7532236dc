//! Development-time tracing for debugging storyteller runs.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Diagnostics via `RUST_LOG`, output to stderr.
//!   Never carries story content meant for the user.
//!
//! - **Artifacts (`io/artifacts`)**: Product output under `output/` and the
//!   artifact store. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn` if unset, so persistence warnings from
/// the artifact writer stay visible.
///
/// # Example
/// ```bash
/// RUST_LOG=storyteller=debug storyteller generate "haunted castle, treasure"
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
