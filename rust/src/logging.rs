use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Mutex, Once};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const LOG_FILE_NAME: &str = "edu_chat.log";

static INIT: Once = Once::new();

/// Install the global subscriber: stderr plus `<data_dir>/edu_chat.log`.
/// Safe to call repeatedly; only the first call has an effect.
pub fn init_logging(data_dir: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "info,edu_chat_core=debug".into());

        let file_layer = open_log_file(data_dir).map(|file| {
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
        });

        // Another subscriber may already be installed (host app, test harness).
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(file_layer)
            .try_init();
    });
}

fn open_log_file(data_dir: &str) -> Option<std::fs::File> {
    let dir = Path::new(data_dir);
    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("[edu_chat] cannot create data dir {}: {e}", dir.display());
        return None;
    }
    match OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))
    {
        Ok(file) => Some(file),
        Err(e) => {
            eprintln!("[edu_chat] cannot open log file: {e}");
            None
        }
    }
}
