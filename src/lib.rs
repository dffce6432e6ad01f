pub mod callback;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod prompt;
pub mod providers;
pub mod server;
pub mod service;
pub mod session;
pub mod throttle;

pub use error::{AnalysisError, ServiceError};
pub use service::AnalysisService;
pub use session::{Level, LogEntry, LogSession, SourceLocation};
pub use throttle::{Admission, ThrottleRegistry};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing/logging
///
/// `log_format` selects `json` output; anything else uses the text format.
/// This function can only be called once.
pub fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}
