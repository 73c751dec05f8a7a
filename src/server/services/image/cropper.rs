use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{GenericImageView, ImageFormat};
use tracing::{debug, warn};

use crate::server::models::{BatchResult, Template};

/// Inset applied on all four sides of a cell, as a fraction of the smaller
/// cell dimension, to keep grid lines out of the crop.
const CELL_INSET_RATIO: f32 = 0.05;

/// Cuts each graded character's cell out of the original photo, guided by the
/// sheet template. Crops are deterministic functions of image size, template
/// geometry, and the parsed row/column.
pub struct GridCropper;

impl GridCropper {
    /// Attaches a base64 PNG crop to every analysis with an in-range
    /// position. Decode failures leave the result without crops; out-of-range
    /// positions are skipped.
    pub fn attach_crops(result: &mut BatchResult, image_bytes: &[u8], template: &Template) {
        let decoded = match image::load_from_memory(image_bytes) {
            Ok(img) => img,
            Err(e) => {
                warn!(task_id = %result.task_id, error = %e, "source image undecodable, skipping crops");
                return;
            }
        };
        let (width, height) = decoded.dimensions();

        for analysis in &mut result.analyses {
            let Some((x, y, w, h)) =
                Self::cell_rect(width, height, template, analysis.row, analysis.column)
            else {
                debug!(
                    row = analysis.row,
                    col = analysis.column,
                    rows = template.grid_rows,
                    cols = template.grid_cols,
                    "analysis position outside grid, no crop"
                );
                continue;
            };
            let cell = decoded.crop_imm(x, y, w, h);
            let mut png = Vec::new();
            match cell.write_to(&mut Cursor::new(&mut png), ImageFormat::Png) {
                Ok(()) => analysis.char_image_base64 = Some(BASE64.encode(&png)),
                Err(e) => warn!(error = %e, "png encode failed for cell crop"),
            }
        }
    }

    /// Computes the inset crop rectangle for a 1-based (row, col), clipped to
    /// the image. `None` when the position is off-grid or the clipped
    /// rectangle has no area.
    pub fn cell_rect(
        width: u32,
        height: u32,
        template: &Template,
        row: u32,
        col: u32,
    ) -> Option<(u32, u32, u32, u32)> {
        if row == 0 || col == 0 || row > template.grid_rows || col > template.grid_cols {
            return None;
        }

        let header = (height as f32 * template.clamped_header_ratio()).floor() as u32;
        let grid_height = height.saturating_sub(header);
        let cell_w = width / template.grid_cols;
        let cell_h = grid_height / template.grid_rows;
        if cell_w == 0 || cell_h == 0 {
            return None;
        }

        let inset = (cell_w.min(cell_h) as f32 * CELL_INSET_RATIO).floor() as u32;
        let x = (col - 1) * cell_w + inset;
        let y = header + (row - 1) * cell_h + inset;
        let w = cell_w.saturating_sub(2 * inset);
        let h = cell_h.saturating_sub(2 * inset);

        if x >= width || y >= height {
            return None;
        }
        let w = w.min(width - x);
        let h = h.min(height - y);
        if w == 0 || h == 0 {
            return None;
        }
        Some((x, y, w, h))
    }
}
