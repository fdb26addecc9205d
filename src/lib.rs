//! Scheduled posting and review auto-reply for Google Business Profile locations.

pub mod api;
pub mod automation;
pub mod cli;
pub mod config;
pub mod error;
pub mod google;
pub mod llm;
pub mod store;

#[cfg(test)]
mod testing;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "gbp_autopilot=info,tower_http=info";

/// Install the global tracing subscriber. `LOG_FORMAT=json` switches to JSON lines.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
