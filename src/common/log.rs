use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_tree::HierarchicalLayer;

/// Installs the process-wide subscriber. Filtering follows `RUST_LOG` and
/// falls back to `info`.
///
/// Only the binary calls this. Library code never installs a subscriber so
/// that embedders and tests keep control over output.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let tree = HierarchicalLayer::default()
        .with_indent_amount(2)
        .with_indent_lines(true)
        .with_targets(true)
        .with_thread_names(true)
        .with_timer(tracing_tree::time::Uptime::default());

    if tracing_subscriber::registry().with(filter).with(tree).try_init().is_err() {
        eprintln!("scene-wm: a global tracing subscriber was already installed");
    }
}
