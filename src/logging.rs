//
// iidc-driver - IEEE 1394 IIDC camera driver
// Copyright (c) 2024 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! File logging.
//!

use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum LoggingError {
    InvalidTimeOffset(String),
    Io(std::io::Error),
    AlreadyInitialized(log::SetLoggerError)
}

impl std::fmt::Display for LoggingError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            LoggingError::InvalidTimeOffset(msg) => write!(f, "invalid time offset: {}", msg),
            LoggingError::Io(e) => write!(f, "cannot create log file: {}", e),
            LoggingError::AlreadyInitialized(e) => write!(f, "{}", e)
        }
    }
}

impl std::error::Error for LoggingError {}

impl From<std::io::Error> for LoggingError {
    fn from(e: std::io::Error) -> LoggingError { LoggingError::Io(e) }
}

/// Returns path of a new log file in the user's data directory.
pub fn log_file_path() -> PathBuf {
    dirs::data_dir().unwrap_or(Path::new("").to_path_buf())
        .join(format!("iidc_driver_{}.log", chrono::Local::now().format("%Y-%m-%d_%H%M%S")))
}

/// Installs a file logger and a panic hook which logs the backtrace.
///
/// Returns the log file path.
pub fn set_up_logging() -> Result<PathBuf, LoggingError> {
    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::force_capture();
        log::error!("{}\n\n{}", info, backtrace);
    }));

    let tz_offset = *chrono::Local::now().offset();
    let time_offset = time::UtcOffset::from_whole_seconds(tz_offset.local_minus_utc())
        .map_err(|e| LoggingError::InvalidTimeOffset(e.to_string()))?;

    let logfile = log_file_path();
    simplelog::WriteLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::ConfigBuilder::new()
            .set_target_level(simplelog::LevelFilter::Error)
            .set_time_offset(time_offset)
            .set_time_format_custom(simplelog::format_description!(
                "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:6]"
            ))
            .build(),
        std::fs::File::create(&logfile)?
    ).map_err(LoggingError::AlreadyInitialized)?;

    log::info!("iidc-driver ver. {} on {} started", crate::VERSION_STRING, os_info::get());

    Ok(logfile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_timestamp_name_log_file() {
        let name = log_file_path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("iidc_driver_"));
        assert!(name.ends_with(".log"));
        // iidc_driver_YYYY-mm-dd_HHMMSS.log
        assert_eq!("iidc_driver_".len() + 17 + ".log".len(), name.len());
    }
}
