use tracing_subscriber::EnvFilter;

/// Installs the tracing subscriber for the binary.
///
/// `RUST_LOG` wins when set; otherwise `--verbose` raises the crate's level
/// to debug. Repeated initialization (tests) is a no-op.
pub fn init(verbose: bool) {
    let default = if verbose {
        "warn,hss_importer=debug"
    } else {
        "warn,hss_importer=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
