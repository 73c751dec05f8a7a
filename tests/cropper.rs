use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, GenericImageView, ImageFormat, RgbaImage};

use inkgrade::server::models::{BatchResult, CharAnalysis, GridType, Template};
use inkgrade::services::image::{compress_for_upload, GridCropper};

fn template(rows: u32, cols: u32, header_ratio: f32) -> Template {
    Template {
        id: 1,
        name: "测试格".to_string(),
        grid_type: GridType::Tian,
        grid_rows: rows,
        grid_cols: cols,
        header_ratio,
    }
}

fn analysis(row: u32, column: u32) -> CharAnalysis {
    CharAnalysis {
        char_index: 1,
        recognized_char: "永".to_string(),
        row,
        column,
        structure_score: 60,
        structure_comment: String::new(),
        stroke_score: 60,
        stroke_comment: String::new(),
        overall_score: 60,
        overall_comment: String::new(),
        suggestion: String::new(),
        char_image_base64: None,
    }
}

fn batch_with(analyses: Vec<CharAnalysis>) -> BatchResult {
    BatchResult {
        task_id: "task-test".to_string(),
        image_id: "img-test".to_string(),
        total_characters: analyses.len() as u32,
        grid_rows: 0,
        grid_cols: 0,
        analyses,
        avg_structure_score: 60,
        avg_stroke_score: 60,
        avg_overall_score: 60,
        summary_comment: String::new(),
        processing_time_ms: 0,
        created_at: String::new(),
    }
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
        width,
        height,
        image::Rgba([30, 30, 30, 255]),
    ));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

#[test]
fn test_cell_rect_matches_worked_example() {
    // 1000x800 sheet, 4x5 grid, 5% header: cell 200x190, inset 9.
    let rect = GridCropper::cell_rect(1000, 800, &template(4, 5, 0.05), 2, 3);
    assert_eq!(rect, Some((409, 239, 182, 172)));
}

#[test]
fn test_single_cell_template_covers_almost_everything() {
    let rect = GridCropper::cell_rect(1000, 800, &template(1, 1, 0.0), 1, 1);
    assert_eq!(rect, Some((40, 40, 920, 720)));
}

#[test]
fn test_out_of_range_positions_are_skipped() {
    let tpl = template(4, 5, 0.0);
    assert_eq!(GridCropper::cell_rect(1000, 800, &tpl, 0, 1), None);
    assert_eq!(GridCropper::cell_rect(1000, 800, &tpl, 1, 0), None);
    assert_eq!(GridCropper::cell_rect(1000, 800, &tpl, 5, 1), None);
    assert_eq!(GridCropper::cell_rect(1000, 800, &tpl, 1, 6), None);
}

#[test]
fn test_rects_stay_inside_image_with_positive_area() {
    let tpl = template(4, 5, 0.05);
    for row in 1..=4 {
        for col in 1..=5 {
            let (x, y, w, h) = GridCropper::cell_rect(997, 803, &tpl, row, col)
                .expect("in-range cell must produce a rect");
            assert!(w > 0 && h > 0);
            assert!(x + w <= 997);
            assert!(y + h <= 803);
        }
    }
}

#[test]
fn test_attach_crops_encodes_in_range_cells_only() {
    let image = png_bytes(100, 100);
    let mut result = batch_with(vec![analysis(1, 1), analysis(9, 9)]);

    GridCropper::attach_crops(&mut result, &image, &template(2, 2, 0.0));

    let encoded = result.analyses[0]
        .char_image_base64
        .as_ref()
        .expect("in-range cell gets a crop");
    let decoded = image::load_from_memory(&BASE64.decode(encoded).unwrap()).unwrap();
    // 50px cell minus a 2px inset per side.
    assert_eq!(decoded.dimensions(), (46, 46));
    assert!(result.analyses[1].char_image_base64.is_none());
}

#[test]
fn test_attach_crops_survives_undecodable_image() {
    let mut result = batch_with(vec![analysis(1, 1)]);
    GridCropper::attach_crops(&mut result, b"not an image", &template(2, 2, 0.0));
    assert!(result.analyses[0].char_image_base64.is_none());
}

#[test]
fn test_compress_passes_through_undecodable_bytes() {
    let bytes = b"definitely not an image".to_vec();
    assert_eq!(compress_for_upload(&bytes, 512), bytes);
}

#[test]
fn test_compress_downscales_and_reencodes_as_jpeg() {
    let original = png_bytes(1024, 512);
    let compressed = compress_for_upload(&original, 512);
    let decoded = image::load_from_memory(&compressed).unwrap();
    assert_eq!(decoded.dimensions(), (512, 256));
    // JPEG magic bytes.
    assert_eq!(&compressed[..2], &[0xFF, 0xD8]);
}

#[test]
fn test_compress_keeps_small_images_at_size() {
    let original = png_bytes(200, 100);
    let compressed = compress_for_upload(&original, 512);
    let decoded = image::load_from_memory(&compressed).unwrap();
    assert_eq!(decoded.dimensions(), (200, 100));
}
