use tenant_schemas::config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Default directive for a `-v` count; `RUST_LOG` takes precedence.
fn default_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "info,sqlx=warn",
        1 => "debug,sqlx=warn",
        2 => "debug",
        _ => "trace",
    }
}

pub fn init(config: &LoggingConfig, verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(e) = installed {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
}
