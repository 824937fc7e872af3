//! Log subscriber for the `churnbench` binary.
//!
//! `RUST_LOG` wins when set; otherwise `-v`/`-q` pick the level for the
//! churnbench crates and everything else stays at `warn`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn default_directive(verbose: u8, quiet: bool) -> String {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    format!("warn,churnbench_core={level},churnbench_store={level},churnbench_dataset={level},churnbench={level}")
}

pub fn init(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbose, quiet)));
    // A second init (tests) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert!(default_directive(0, false).contains("churnbench_core=info"));
        assert!(default_directive(1, false).contains("churnbench_core=debug"));
        assert!(default_directive(3, false).contains("churnbench_core=trace"));
        assert!(default_directive(2, true).contains("churnbench_core=error"));
        assert!(EnvFilter::try_new(default_directive(0, false)).is_ok());
    }
}
