use clap::{Args, ValueEnum};
use is_terminal::IsTerminal;
use tracing::{Dispatch, dispatcher};
use tracing_log::AsLog;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Args)]
pub struct LoggingOpts {
    #[clap(long, env = "RMA_LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,

    #[clap(long, env = "RMA_LOG_COLOR", value_enum, default_value = "auto")]
    pub log_color: LogColor,

    /// Log directives in the RUST_LOG format, e.g. `rma_lib=trace`.
    /// RUST_LOG wins where both name the same target.
    #[clap(long = "log")]
    pub log_directives: Option<String>,
}

impl Default for LoggingOpts {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Text,
            log_color: LogColor::Auto,
            log_directives: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Compact,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogColor {
    Auto,
    Always,
    Never,
}

impl LogColor {
    /// Logs go to stderr, so that is the stream checked for a terminal.
    fn enabled(self) -> bool {
        match self {
            LogColor::Auto => std::io::stderr().is_terminal(),
            LogColor::Always => true,
            LogColor::Never => false,
        }
    }
}

fn env_filter(directives: Option<&str>) -> anyhow::Result<EnvFilter> {
    let mut builder = EnvFilter::builder();
    if let Some(directives) = directives {
        builder = builder.with_default_directive(directives.parse()?);
    }
    Ok(builder.from_env_lossy())
}

/// Install the global subscriber and route `log` records into it.
pub fn init(opts: &LoggingOpts) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(opts.log_directives.as_deref())?)
        .with_writer(std::io::stderr);

    let dispatch: Dispatch = match opts.log_format {
        LogFormat::Text => builder.with_ansi(opts.log_color.enabled()).finish().into(),
        LogFormat::Compact => {
            builder.compact().with_ansi(opts.log_color.enabled()).finish().into()
        }
        LogFormat::Json => builder.json().finish().into(),
    };
    dispatcher::set_global_default(dispatch)?;

    // Must come after the global default so the max level hint is known.
    tracing_log::LogTracer::builder()
        .with_max_level(tracing_core::LevelFilter::current().as_log())
        .init()?;
    Ok(())
}
