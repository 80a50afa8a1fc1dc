//! Bead Grid OCR
//!
//! Command-line front end: reads an image file, runs list or grid
//! recognition against the configured OCR service and prints JSON.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bead_grid_ocr::config::load_config;
use bead_grid_ocr::model::{CropRect, GridRequest};
use bead_grid_ocr::ocr::{BaiduOcrClient, RateLimiter};
use bead_grid_ocr::{log, paths, BeadScanner};

#[derive(Parser, Debug)]
#[command(name = "bead-grid-ocr")]
#[command(about = "Read bead color codes from pattern charts and shopping lists", long_about = None)]
struct Cli {
    /// Config file (defaults to config.json next to the executable)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Place the code of every cell of a pattern grid
    Grid {
        image: PathBuf,

        #[arg(long)]
        rows: i64,

        #[arg(long)]
        cols: i64,

        /// Codes the pattern is known to use, e.g. C11,B22
        #[arg(long, value_delimiter = ',')]
        candidates: Vec<String>,

        /// JSON list of `{code, hex, quantity}` used to fill cells by color
        #[arg(long, value_name = "FILE")]
        palette: Option<PathBuf>,

        /// Only read this rectangle: x,y,width,height
        #[arg(long, value_parser = parse_crop)]
        crop: Option<CropRect>,
    },
    /// Read a color shopping list
    List {
        image: PathBuf,

        /// Print the strategy, grouped lines and pairing logs too
        #[arg(long)]
        debug: bool,

        #[arg(long, value_parser = parse_crop)]
        crop: Option<CropRect>,
    },
}

fn parse_crop(text: &str) -> std::result::Result<CropRect, String> {
    CropRect::parse(text).ok_or_else(|| format!("expected x,y,width,height, got '{}'", text))
}

/// One entry of a palette file.
#[derive(Debug, Deserialize)]
struct PaletteEntry {
    code: String,
    #[serde(default)]
    hex: Option<String>,
    #[serde(default)]
    quantity: Option<u32>,
}

fn read_image_base64(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read image {}", path.display()))?;
    Ok(STANDARD.encode(bytes))
}

fn read_palette(path: &Path) -> Result<Vec<PaletteEntry>> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read palette {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse palette {}", path.display()))
}

fn main() -> Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        let msg = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        let location = panic_info
            .location()
            .map(|loc| format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_default();
        log(&format!("[PANIC]{} {}", location, msg));
    }));

    let cli = Cli::parse();

    if let Err(e) = paths::ensure_directories() {
        eprintln!("Warning: could not create logs directory: {}", e);
    }

    let config = load_config(cli.config.as_deref());
    let limiter = Arc::new(RateLimiter::new(Duration::from_millis(config.ocr.min_interval_ms)));
    let client = BaiduOcrClient::new(&config.ocr, limiter).context("Failed to create OCR client")?;
    let scanner = BeadScanner::new(client, config);

    let output = match cli.command {
        Command::Grid {
            image,
            rows,
            cols,
            candidates,
            palette,
            crop,
        } => {
            let (width, height) = image::image_dimensions(&image)
                .with_context(|| format!("Failed to read image size of {}", image.display()))?;
            let mut request = GridRequest {
                image_base64: read_image_base64(&image)?,
                rows,
                cols,
                image_width: width as i64,
                image_height: height as i64,
                candidate_codes: candidates,
                crop,
                ..GridRequest::default()
            };

            if let Some(path) = palette {
                let entries = read_palette(&path)?;
                if request.candidate_codes.is_empty() {
                    request.candidate_codes = entries.iter().map(|e| e.code.clone()).collect();
                }
                let quantities: HashMap<String, u32> = entries
                    .iter()
                    .filter_map(|e| e.quantity.map(|q| (e.code.clone(), q)))
                    .collect();
                let hex_colors: HashMap<String, String> = entries
                    .iter()
                    .filter_map(|e| e.hex.clone().map(|h| (e.code.clone(), h)))
                    .collect();
                log(&format!(
                    "palette: {} entries, {} with quantity, {} with color",
                    entries.len(),
                    quantities.len(),
                    hex_colors.len()
                ));
                request.candidate_quantities = Some(quantities);
                request.candidate_color_hex = Some(hex_colors);
            }

            let result = scanner
                .analyze_grid(&request)
                .context("Grid analysis failed")?;
            serde_json::to_string_pretty(&result)?
        }
        Command::List { image, debug, crop } => {
            let payload = read_image_base64(&image)?;
            if debug {
                let result = scanner
                    .extract_colors_debug(&payload, crop.as_ref())
                    .context("List extraction failed")?;
                serde_json::to_string_pretty(&result)?
            } else {
                let colors = scanner
                    .extract_colors(&payload, crop.as_ref())
                    .context("List extraction failed")?;
                serde_json::to_string_pretty(&colors)?
            }
        }
    };

    println!("{}", output);
    Ok(())
}
