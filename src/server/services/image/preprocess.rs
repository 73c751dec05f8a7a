use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{GenericImageView, Rgb, RgbImage};
use tracing::{debug, warn};

const JPEG_QUALITY: u8 = 85;

/// Shrinks an upload before it is sent upstream: bilinear downscale so the
/// longest edge is at most `max_size`, flatten any alpha onto white, re-encode
/// as JPEG. Bytes that fail to decode pass through unchanged; the upstream
/// will reject them and the caller handles that as an AI error.
pub fn compress_for_upload(bytes: &[u8], max_size: u32) -> Vec<u8> {
    let decoded = match image::load_from_memory(bytes) {
        Ok(img) => img,
        Err(e) => {
            warn!(error = %e, "upload failed to decode, sending original bytes");
            return bytes.to_vec();
        }
    };

    let (width, height) = decoded.dimensions();
    let resized = if width.max(height) > max_size {
        decoded.resize(max_size, max_size, FilterType::Triangle)
    } else {
        decoded
    };

    let rgba = resized.to_rgba8();
    let mut canvas = RgbImage::from_pixel(rgba.width(), rgba.height(), Rgb([255, 255, 255]));
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = u32::from(pixel[3]);
        let blend = |channel: u8| -> u8 {
            ((u32::from(channel) * alpha + 255 * (255 - alpha)) / 255) as u8
        };
        canvas.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
    }

    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
    if let Err(e) = encoder.encode_image(&canvas) {
        warn!(error = %e, "jpeg re-encode failed, sending original bytes");
        return bytes.to_vec();
    }
    debug!(
        original = bytes.len(),
        compressed = out.len(),
        width = canvas.width(),
        height = canvas.height(),
        "upload preconditioned"
    );
    out
}
