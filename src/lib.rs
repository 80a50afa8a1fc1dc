//! Reads bead pattern color codes out of images with a cloud OCR service.
//!
//! Two modes are supported. List mode turns a photographed shopping list into
//! `(code, quantity)` pairs. Grid mode places the code printed in every cell
//! of a pattern chart, filling cells OCR missed by matching their color.

pub mod config;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod imaging;
pub mod model;
pub mod ocr;
pub mod paths;
pub mod scanner;

use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;

pub use error::{Result, ScanError};
pub use scanner::BeadScanner;

/// Writes a timestamped line to stderr and appends it to the log file when
/// the logs directory exists.
pub fn log(msg: &str) {
    let timestamp = Local::now().format("%H:%M:%S%.3f");
    let line = format!("[{}] {}\n", timestamp, msg);
    eprint!("{}", line);
    let log_path = paths::get_log_file();
    if !paths::get_logs_dir().is_dir() {
        return;
    }
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&log_path) {
        let _ = file.write_all(line.as_bytes());
    }
}
