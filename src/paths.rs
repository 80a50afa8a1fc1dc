use std::path::PathBuf;
use std::sync::OnceLock;

static EXE_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the directory containing the executable.
pub fn get_exe_dir() -> &'static PathBuf {
    EXE_DIR.get_or_init(|| {
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
    })
}

/// Returns the logs directory: `<exe_dir>/logs/`
pub fn get_logs_dir() -> PathBuf {
    get_exe_dir().join("logs")
}

/// Returns the log file path: `<exe_dir>/logs/bead_grid_ocr.log`
pub fn get_log_file() -> PathBuf {
    get_logs_dir().join("bead_grid_ocr.log")
}

/// Candidate config file locations, in lookup order:
/// `<exe_dir>/config.json`, then `<config_dir>/bead-grid-ocr/config.json`.
pub fn get_config_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![get_exe_dir().join("config.json")];
    if let Some(dir) = dirs::config_dir() {
        candidates.push(dir.join("bead-grid-ocr").join("config.json"));
    }
    candidates
}

/// Ensures the logs directory exists. Call at startup.
pub fn ensure_directories() -> std::io::Result<()> {
    std::fs::create_dir_all(get_logs_dir())
}
