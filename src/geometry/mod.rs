//! Grid geometry: perspective rectification and cell boundary detection.

pub mod grid;
pub mod homography;
pub mod perspective;

pub use grid::{detect_grid_geometry, locate_index, GridGeometry};
pub use homography::{homography_from_quad, Homography, Point};
pub use perspective::{correct_perspective, sample_bilinear, Correction};
