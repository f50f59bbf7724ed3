//! Logger setup.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use simplelog::{
    ColorChoice, Config, ConfigBuilder, LevelFilter, TermLogger, TerminalMode, WriteLogger,
};

/// Where the daemon logs when it is not attached to a terminal.
pub fn log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("prestod")
        .join("prestod.log")
}

fn open_log_file(path: &Path) -> Option<File> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    OpenOptions::new().create(true).append(true).open(path).ok()
}

fn config() -> Config {
    ConfigBuilder::new()
        .set_target_level(LevelFilter::Error)
        .set_thread_level(LevelFilter::Debug)
        .build()
}

/// Install the global logger.
///
/// In the foreground logs go to stderr; otherwise they are appended to
/// [`log_path`], falling back to stderr if the file cannot be opened.
pub fn init(verbose: bool, foreground: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let file = if foreground {
        None
    } else {
        let path = log_path();
        let file = open_log_file(&path);
        if file.is_none() {
            eprintln!("prestod: cannot open {}, logging to stderr", path.display());
        }
        file
    };

    let res = match file {
        Some(file) => WriteLogger::init(level, config(), file),
        None => TermLogger::init(level, config(), TerminalMode::Stderr, ColorChoice::Auto),
    };
    if res.is_err() {
        // Already installed (tests, embedding); keep the existing one.
        return;
    }
    log::info!("prestod {} starting (log level: {level:?})", env!("CARGO_PKG_VERSION"));
}
