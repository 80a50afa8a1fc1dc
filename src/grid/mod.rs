//! Grid mode: turning OCR word boxes into a per-cell code map.

pub mod fill;
pub mod mapper;
pub mod tiles;

pub use fill::{color_distance, fill_missing_cells_by_color, parse_hex, sample_cell_color, to_lab};
pub use mapper::{
    analyze_single_with_variants, fill_threshold, run_single_image_pipeline, CellVotes,
    GridMapper, PreparedGridImage, TokenHit,
};
pub use tiles::{
    analyze_grid_by_tiles, extract_list_by_tiles, grid_split_count, grid_tiles,
    image_split_count, GridTile, TiledList,
};
