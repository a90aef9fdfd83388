//! Tracing setup shared by the server and the CLI.

use std::env;
use std::sync::Once;

use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// How log output is rendered.
#[derive(Debug, Clone, Copy)]
pub struct LoggingConfig {
    pub level: Level,
    /// Emit one JSON object per line instead of the console format.
    pub use_json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: Level::INFO, use_json: false }
    }
}

/// Parses a level name, falling back to INFO on anything unknown.
pub fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Reads `APPFORGE_LOG_LEVEL` and `APPFORGE_LOG_JSON` and initializes
/// tracing. `RUST_LOG` still wins for per-target filtering.
pub fn init_from_env() {
    let level = env::var("APPFORGE_LOG_LEVEL")
        .map(|raw| parse_level(&raw))
        .unwrap_or(Level::INFO);
    let use_json = env::var("APPFORGE_LOG_JSON")
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false);
    init_logging(LoggingConfig { level, use_json });
}

/// Initializes the subscriber; later calls are no-ops.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut filter = EnvFilter::from_default_env()
            .add_directive(format!("appforge={}", config.level).parse().unwrap());

        // Without RUST_LOG the HTTP stack stays quiet below warn.
        if env::var("RUST_LOG").is_err() {
            filter = filter
                .add_directive("h2=warn".parse().unwrap())
                .add_directive("hyper=warn".parse().unwrap())
                .add_directive("reqwest=warn".parse().unwrap());
        }

        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_target(true))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true))
                .init();
        }
    });
}
