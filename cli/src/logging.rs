use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Level for the mcpilot crates given the number of `-v` flags.
pub fn level_for_verbosity(verbose: u8) -> Level {
    match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

fn build_filter(level: Level) -> EnvFilter {
    // RUST_LOG wins when set.
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    EnvFilter::new(format!(
        "warn,mcpilot_core={level},mcpilot_cli={level},mcpilot={level},hyper=warn,reqwest=warn"
    ))
}

/// Logs go to stderr so they never interleave with the streamed answer on
/// stdout. Safe to call more than once; later calls are ignored.
pub fn init(verbose: u8) {
    let level = level_for_verbosity(verbose);

    let _ = tracing_subscriber::registry()
        .with(build_filter(level))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbose > 1)
                .compact(),
        )
        .try_init();
}
