//! Logging bootstrapper shared by the CardSense binaries.

use env_logger::Env;
use serde_json::json;
use std::env;
use std::io::Write;
use std::sync::OnceLock;

static INIT: OnceLock<()> = OnceLock::new();

const FORMAT_ENV: &str = "CARDSENSE_LOG_FORMAT";
const LEVEL_ENV: &str = "CARDSENSE_LOG_LEVEL";

/// Output shape for log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

impl LogFormat {
    fn from_env() -> Self {
        let raw = env::var(FORMAT_ENV).unwrap_or_else(|_| String::from("json"));
        Self::parse(&raw)
    }

    /// Anything other than `plain` keeps the JSON default.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("plain") {
            LogFormat::Plain
        } else {
            LogFormat::Json
        }
    }
}

/// Initialize the global logger.
///
/// The first caller wins; later calls are no-ops. When `RUST_LOG` is unset
/// the level comes from `CARDSENSE_LOG_LEVEL`, then `default_level`.
/// `CARDSENSE_LOG_FORMAT=plain` switches off JSON output.
pub fn init(default_level: &str) {
    let _ = INIT.get_or_init(|| configure(default_level));
}

fn configure(default_level: &str) {
    let level = env::var(LEVEL_ENV).unwrap_or_else(|_| default_level.to_string());
    let env = Env::default().default_filter_or(level);

    let mut builder = env_logger::Builder::from_env(env);
    match LogFormat::from_env() {
        LogFormat::Json => {
            builder.format(|buf, record| {
                let payload = json!({
                    "timestamp": buf.timestamp().to_string(),
                    "level": record.level().to_string().to_lowercase(),
                    "target": record.target(),
                    "message": record.args().to_string(),
                });
                writeln!(buf, "{}", payload)
            });
        }
        LogFormat::Plain => {
            builder.format(|buf, record| {
                writeln!(
                    buf,
                    "{} {} {} - {}",
                    buf.timestamp(),
                    record.level().to_string().to_lowercase(),
                    record.target(),
                    record.args()
                )
            });
        }
    }

    if let Err(err) = builder.try_init() {
        eprintln!("failed to initialize logger: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_defaults_to_json() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse("whatever"), LogFormat::Json);
        assert_eq!(LogFormat::parse(" Plain "), LogFormat::Plain);
    }

    #[test]
    fn init_is_idempotent() {
        init("debug");
        init("info");
    }
}
