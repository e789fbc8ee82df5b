use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{Layer, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Other crates log at `warn`; this crate at `level`.
fn filter_directive(level: Level) -> String {
    format!("warn,enisync={}", level.as_str().to_lowercase())
}

/// Install the global subscriber. Call once, before any other work.
pub fn init(log_level: Level) {
    let mut fmt_layer = Layer::new()
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(std::env::var("NO_COLOR").is_err());

    match log_level {
        Level::DEBUG => fmt_layer = fmt_layer.with_file(true).with_line_number(true),
        Level::TRACE => {
            fmt_layer = fmt_layer
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
        }
        _ => {}
    }

    tracing_subscriber::registry()
        .with(EnvFilter::new(filter_directive(log_level)))
        .with(fmt_layer)
        .init();
}
