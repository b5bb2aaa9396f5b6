use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initialize the tracing subscriber for a blockmesh binary.
///
/// `RUST_LOG` wins when set; otherwise the filter from the config file is
/// used, falling back to a build-dependent default.
pub fn init_logging(config_filter: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        match config_filter {
            Some(f) => EnvFilter::new(f),
            None if cfg!(debug_assertions) => EnvFilter::new("blockmesh=debug"),
            None => EnvFilter::new("blockmesh=info"),
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)?;

    Ok(())
}

/// Initialize logging with fallback behavior if setup fails.
pub fn init_logging_safe(config_filter: Option<&str>) {
    if let Err(e) = init_logging(config_filter) {
        eprintln!(
            "Warning: failed to set up structured logging: {}. Continuing without it.",
            e
        );
    }
}
