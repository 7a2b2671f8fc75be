use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{Error, Result};

/// Environment variable read by [`init_default_logging`].
pub const LOG_ENV: &str = "GRAPHBULK_LOG";

/// Engine events at `info` (one summary per call), everything else at `warn`.
pub const DEFAULT_DIRECTIVE: &str = "graphbulk=info,warn";

/// Installs a global `tracing` subscriber filtered by `level`.
///
/// `level` accepts any `EnvFilter` directive, e.g. `"info"` or
/// `"graphbulk::executor=debug,warn"`. Worker threads are named after their
/// pool (`graphbulk-write-0`, ...), so thread names are included in every
/// line. Fails if a subscriber is already installed.
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(parse_directive(level)?)
        .with_target(true)
        .with_thread_names(true)
        .try_init()
        .map_err(|_| Error::InvalidArgument("logging already initialized".into()))
}

/// Like [`init_logging`], taking the directive from `GRAPHBULK_LOG` and
/// falling back to [`DEFAULT_DIRECTIVE`] when it is unset or empty.
pub fn init_default_logging() -> Result<()> {
    let directive = std::env::var(LOG_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_string());
    init_logging(&directive)
}

fn parse_directive(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level)
        .map_err(|e| Error::InvalidArgument(format!("invalid log level `{level}`: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directive_parses() {
        assert!(parse_directive(DEFAULT_DIRECTIVE).is_ok());
    }

    #[test]
    fn rejects_bad_directive() {
        assert!(matches!(
            init_logging("graphbulk=notalevel"),
            Err(Error::InvalidArgument(msg)) if msg.contains("invalid log level")
        ));
    }
}
