//! Tracing subscriber setup driven by `LoggingConfig`.

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use live_core::config::LoggingConfig;

/// Filter directives for `config`: the level (forced to `debug` when
/// `verbose`), followed by the per-target overrides.
pub fn directives(config: &LoggingConfig, verbose: bool) -> String {
    let level = if verbose {
        "debug"
    } else {
        config.level.as_deref().unwrap_or("info")
    };

    std::iter::once(level)
        .chain(config.filters.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber. `RUST_LOG` takes precedence over config.
pub fn init(config: &LoggingConfig, verbose: bool) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(directives(config, verbose))?,
    };

    let writer = match config.output.as_str() {
        "stdout" => BoxMakeWriter::new(std::io::stdout),
        _ => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);

    match config.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    }
    .map_err(|e| anyhow::anyhow!("Failed to install logger: {e}"))
}
