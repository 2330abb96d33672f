use std::env;
use std::fs;
use std::io;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

pub const LOG_FILE: &str = "avatar-sync.log";

/// Initialize console and session-file logging
///
/// `RUST_LOG` overrides the default filter. The log file is recreated on
/// every start; if it cannot be created, logging continues on the console.
pub fn init_logging() {
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let enable_backtrace = env::var("RUST_BACKTRACE").map_or(false, |v| v == "1");

    if let Err(e) = fs::remove_file(LOG_FILE) {
        if e.kind() != io::ErrorKind::NotFound {
            eprintln!("Warning: Failed to remove existing {}: {}", LOG_FILE, e);
        }
    }
    let log_file = match fs::File::create(LOG_FILE) {
        Ok(file) => Some(file),
        Err(e) => {
            eprintln!("Warning: Failed to create {}: {}", LOG_FILE, e);
            None
        }
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let filter = EnvFilter::new(&log_level);
        match "avatar_sync=debug".parse() {
            Ok(directive) => filter.add_directive(directive),
            Err(_) => filter,
        }
    });

    let file_layer = log_file.map(|file| {
        fmt::layer()
            .with_writer(file)
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .boxed()
    });

    let result = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_names(true)
                .with_ansi(true),
        )
        .with(file_layer)
        .try_init();
    if let Err(e) = result {
        eprintln!("Warning: logging already initialized: {}", e);
        return;
    }

    std::panic::set_hook(Box::new(move |panic_info| {
        tracing::error!("Panic occurred: {}", panic_info);

        if let Some(location) = panic_info.location() {
            tracing::error!(
                "Panic location: {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            );
        }

        if enable_backtrace {
            tracing::error!("Backtrace:\n{:?}", std::backtrace::Backtrace::capture());
        }
    }));

    tracing::info!("Logging initialized with level: {}", log_level);
    tracing::info!("File logging: {} (recreated on startup)", LOG_FILE);
}

/// Log the platform and build this process runs on
pub fn log_system_info() {
    tracing::info!("=== System Information ===");
    tracing::info!("OS: {}", env::consts::OS);
    tracing::info!("Architecture: {}", env::consts::ARCH);
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("==========================");
}
