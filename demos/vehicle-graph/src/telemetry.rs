use anyhow::anyhow;
use clap::ValueEnum;
use tracing_subscriber::{
    EnvFilter, fmt,
    filter::LevelFilter,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the `info` default.
pub fn init(format: LogFormat) -> anyhow::Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let fmt_layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}
