use colored::Colorize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

static LOG_FILE: Mutex<Option<PathBuf>> = Mutex::new(None);
static VERBOSITY: Mutex<u8> = Mutex::new(0);
static QUIET: Mutex<bool> = Mutex::new(false);

/// Get the current verbosity level
pub fn get_verbosity() -> u8 {
    VERBOSITY.lock().ok().map(|v| *v).unwrap_or(0)
}

/// Set the verbosity level (0 = warnings only, 1 = debug, 2+ = trace)
pub fn set_verbosity(verbosity: u8) {
    if let Ok(mut v) = VERBOSITY.lock() {
        *v = verbosity;
    }
}

/// Get whether console output is suppressed
pub fn get_quiet() -> bool {
    QUIET.lock().ok().map(|v| *v).unwrap_or(false)
}

/// Suppress console output; messages still go to the log file
pub fn set_quiet(quiet: bool) {
    if let Ok(mut v) = QUIET.lock() {
        *v = quiet;
    }
}

/// Initialize the logger with a verbosity level, logging to the default file
pub fn init_with_verbosity(verbosity: u8, quiet: bool) -> Result<(), String> {
    set_verbosity(verbosity);
    set_quiet(quiet);

    let config_dir = get_config_dir()?;
    init_with_log_file(&config_dir.join("pyhost.log"))
}

/// Point the logger at an explicit log file
///
/// The file is truncated so each process run starts with a clean log.
pub fn init_with_log_file(log_file: &Path) -> Result<(), String> {
    if let Some(parent) = log_file.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create log directory: {}", e))?;
    }

    if log_file.exists() {
        let _ = fs::remove_file(log_file);
    }

    let mut guard = LOG_FILE
        .lock()
        .map_err(|_| "Log file lock poisoned".to_string())?;
    *guard = Some(log_file.to_path_buf());

    Ok(())
}

/// Get the config directory path
fn get_config_dir() -> Result<PathBuf, String> {
    #[cfg(not(target_os = "windows"))]
    let config_dir = dirs::home_dir()
        .ok_or("Could not determine home directory")?
        .join(".config")
        .join("pyhost");

    #[cfg(target_os = "windows")]
    let config_dir = dirs::config_dir()
        .ok_or("Could not determine config directory")?
        .join("pyhost");

    Ok(config_dir)
}

fn write_to_log(message: &str) {
    write_to_log_with_source(message, "HOST")
}

fn write_to_log_with_source(message: &str, source: &str) {
    if let Ok(log_file_guard) = LOG_FILE.lock() {
        if let Some(ref log_path) = *log_file_guard {
            if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(log_path) {
                let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
                let _ = writeln!(file, "[{}] [{}] {}", timestamp, source, message);
            }
        }
    }
}

fn console_enabled(min_verbosity: u8) -> bool {
    !get_quiet() && get_verbosity() >= min_verbosity
}

/// Log an informational message (to console if verbose >= 1, always to file)
pub fn info(message: &str) {
    write_to_log(&format!("INFO {}", message));
    if console_enabled(1) {
        eprintln!("{}", message);
    }
}

/// Log a debug message (to console if verbose >= 1, always to file)
pub fn debug(message: &str) {
    write_to_log(&format!("DEBUG {}", message));
    if console_enabled(1) {
        eprintln!("{} {}", "DEBUG:".blue().bold(), message);
    }
}

/// Log a warning message (to both file and console)
pub fn warn(message: &str) {
    write_to_log(&format!("WARN {}", message));
    if console_enabled(0) {
        eprintln!("{} {}", "warning:".yellow().bold(), message);
    }
}

/// Log an error message (to both file and console)
pub fn error(message: &str) {
    write_to_log(&format!("ERROR {}", message));
    if console_enabled(0) {
        eprintln!("{} {}", "Error:".red().bold(), message);
    }
}

/// Log a success message
pub fn success(message: &str) {
    write_to_log(&format!("SUCCESS {}", message));
    if console_enabled(1) {
        eprintln!("{} {}", "\u{2714}".green().bold(), message);
    }
}

/// Log a lifecycle step (console only at trace verbosity)
pub fn step(message: &str) {
    if console_enabled(2) {
        eprintln!("TRACE: {}", message);
    }
    write_to_log(&format!("STEP: {}", message));
}

/// Log a message reported by the embedded interpreter itself
pub fn engine(message: &str) {
    write_to_log_with_source(message, "PYTHON");
    if console_enabled(1) {
        eprintln!("{} {}", "PYTHON:".magenta().bold(), message);
    }
}

/// Get the log file path
pub fn get_log_path() -> Option<PathBuf> {
    LOG_FILE.lock().ok().and_then(|guard| guard.clone())
}
