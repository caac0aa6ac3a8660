use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

/// Target of the structured access-record events emitted by
/// [`TracingAccessLog`](crate::adapters::access_log::TracingAccessLog).
pub const ACCESS_LOG_TARGET: &str = "access";

fn env_filter(level: &str) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}")),
    }
}

/// Initialize logging. `RUST_LOG` takes precedence over `level`.
///
/// Access records are ordinary events on the [`ACCESS_LOG_TARGET`] target, so they can be
/// filtered separately, e.g. `RUST_LOG=info,access=off`.
pub fn init_tracing(level: &str, json_format: bool) -> Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let registry = Registry::default().with(env_filter(level)?);
    if json_format {
        registry
            .with(fmt_layer.json().with_current_span(false).with_span_list(true))
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
    } else {
        registry
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init()
            .wrap_err("Failed to install tracing subscriber")?;
    }

    tracing::debug!(level, json_format, "Logging initialized");
    Ok(())
}
