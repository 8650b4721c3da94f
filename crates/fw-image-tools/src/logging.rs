use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{Error, Result};

/// Picks the filter directive: `RUST_LOG`, then `-v`, then config, then `info`.
pub fn filter_directive(cfg: &LoggingConfig, verbose: bool) -> String {
    if let Ok(env) = std::env::var(EnvFilter::DEFAULT_ENV) {
        if !env.trim().is_empty() {
            return env;
        }
    }
    if verbose {
        return "debug".into();
    }
    cfg.filter
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("info")
        .to_string()
}

/// Installs the global subscriber. Logs go to stderr so stdout stays clean
/// for command output.
pub fn init(cfg: &LoggingConfig, verbose: bool) -> Result<()> {
    let directive = filter_directive(cfg, verbose);
    let filter = EnvFilter::try_new(&directive)
        .map_err(|e| Error::config(format!("invalid log filter '{directive}': {e}")))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match cfg.format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };
    installed.map_err(|e| Error::msg(format!("failed to install logger: {e}")))
}

/// Installs the default subscriber if nothing is installed yet, so errors
/// raised before the config is read (or while reading it) are still logged.
pub fn ensure_installed(verbose: bool) {
    if !tracing::dispatcher::has_been_set() {
        let _ = init(&LoggingConfig::default(), verbose);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_install_is_idempotent() {
        ensure_installed(false);
        ensure_installed(true);
        assert!(tracing::dispatcher::has_been_set());
    }

    #[test]
    fn config_filter_used_without_verbose() {
        if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
            return;
        }
        let cfg = LoggingConfig {
            filter: Some(" warn ".into()),
            ..Default::default()
        };
        assert_eq!(filter_directive(&cfg, false), "warn");
        assert_eq!(filter_directive(&cfg, true), "debug");
        assert_eq!(filter_directive(&LoggingConfig::default(), false), "info");
    }
}
