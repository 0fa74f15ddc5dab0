//! Log output for the presubmit binary.
//!
//! Lines go to stderr so stdout stays free for the round summary and the
//! JSON report. `RUST_LOG` overrides the filter built here.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// HTTP stack crates capped at `warn` unless `RUST_LOG` says otherwise.
const NOISY_TARGETS: [&str; 3] = ["hyper", "reqwest", "rustls"];

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_filter(level: Level) -> String {
    let mut directives = vec![level.as_str().to_ascii_lowercase()];
    directives.extend(NOISY_TARGETS.iter().map(|target| format!("{target}=warn")));
    directives.join(",")
}

/// Install the global subscriber, as text or newline-delimited JSON.
///
/// Returns `false` when a subscriber was already installed.
pub fn init_tracing(json: bool, level: Level) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));
    let (text_layer, json_layer) = if json {
        let layer = fmt::layer().with_target(false).with_writer(std::io::stderr).json();
        (None, Some(layer))
    } else {
        let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
        (Some(layer), None)
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .try_init()
        .is_ok()
}
