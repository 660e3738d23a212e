//! Helpers shared by the gallery unit tests.

use image::{DynamicImage, ImageFormat, RgbImage};

/// Encode a small test image with a quadrant pattern, enough structure to
/// survive resampling.
pub(crate) fn make_image_bytes(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let mut img = RgbImage::new(width, height);
    for (x, y, pixel) in img.enumerate_pixels_mut() {
        pixel.0 = match (x < width / 2, y < height / 2) {
            (true, true) => [255, 0, 0],
            (false, true) => [0, 255, 0],
            (true, false) => [0, 0, 255],
            (false, false) => [0, 0, 0],
        };
    }
    let mut buffer = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buffer, format)
        .unwrap();
    buffer.into_inner()
}

pub(crate) fn decode_size(bytes: &[u8]) -> (u32, u32) {
    let img = image::load_from_memory(bytes).unwrap();
    (img.width(), img.height())
}
