use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;

/// Log to stderr, keeping stdout for the rendered reply
pub fn setup_logging(verbose_level: u8) {
    setup_logging_with_file(verbose_level, None);
}

/// Log to a file in the cache dir so log lines do not interleave with the REPL
pub fn setup_logging_for_repl(verbose_level: u8) -> PathBuf {
    let log_file_path = dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("tracks-chat")
        .join("repl.log");

    if let Some(parent) = log_file_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    setup_logging_with_file(verbose_level, Some(log_file_path.clone()));
    log_file_path
}

fn filter_for_verbosity(verbose_level: u8) -> &'static str {
    match verbose_level {
        0 => "warn,tracks_chat=info,tracks_stream=info",
        1 => "info,tracks_chat=debug,tracks_stream=debug",
        _ => "debug,tracks_chat=trace,tracks_stream=trace",
    }
}

fn setup_logging_with_file(verbose_level: u8, log_file: Option<PathBuf>) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::from_default_env()
    } else {
        tracing_subscriber::EnvFilter::new(filter_for_verbosity(verbose_level))
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_level(true);

    let file = log_file.and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                eprintln!(
                    "Warning: Could not open log file {}: {e}, logging to stderr",
                    path.display()
                );
            })
            .ok()
    });

    match file {
        Some(file) => subscriber
            .with_ansi(false)
            .with_writer(move || match file.try_clone() {
                Ok(file) => Box::new(file) as Box<dyn io::Write + Send>,
                Err(_) => Box::new(io::sink()),
            })
            .init(),
        None => subscriber.with_writer(io::stderr).init(),
    }
}
