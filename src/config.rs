use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub log_filter: String,
    pub log_json: bool,
    pub commit_settle: Duration,
    pub strict_probe: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            log_filter: "info".to_string(),
            log_json: false,
            commit_settle: Duration::from_millis(1000),
            strict_probe: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workspace: env::var("ROUTINED_WORKSPACE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            log_filter: env::var("ROUTINED_LOG").unwrap_or(defaults.log_filter),
            log_json: env_bool("ROUTINED_LOG_JSON", defaults.log_json),
            commit_settle: Duration::from_millis(env_u64(
                "ROUTINED_COMMIT_SETTLE_MS",
                defaults.commit_settle.as_millis() as u64,
            )),
            strict_probe: env_bool("ROUTINED_STRICT_PROBE", defaults.strict_probe),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

/// Logs go to stderr; stdout carries the protocol.
pub fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.log_json {
        registry.with(fmt.json()).try_init()
    } else {
        registry.with(fmt).try_init()
    };
    if result.is_err() {
        eprintln!("routined: tracing already initialised");
    }
}
