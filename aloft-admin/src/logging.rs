use tracing_subscriber::EnvFilter;

/// Installs a `tracing_subscriber` that reads its filter from `RUST_LOG`,
/// defaulting to `info`. Call once at process startup.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
