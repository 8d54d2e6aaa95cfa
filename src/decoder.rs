use crate::error::DecodeError;
use image::RgbImage;
use std::io::Cursor;

/// An uploaded image coerced to 8-bit RGB.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pixels: RgbImage,
}

impl DecodedImage {
    pub fn new(pixels: RgbImage) -> Self {
        Self { pixels }
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// Decodes raw upload bytes. The format is guessed from the content, so the
/// client supplied filename and content type are never trusted.
pub fn decode_image(image_data: &[u8]) -> Result<DecodedImage, DecodeError> {
    if image_data.is_empty() {
        return Err(DecodeError::EmptyPayload);
    }

    let image_reader = image::ImageReader::new(Cursor::new(image_data))
        .with_guessed_format()
        .map_err(image::ImageError::IoError)?;
    if image_reader.format().is_none() {
        return Err(DecodeError::UnknownFormat);
    }

    let original_img = image_reader.decode()?;

    // Grayscale, alpha, palette and 16-bit inputs all end up as RGB8.
    Ok(DecodedImage::new(original_img.to_rgb8()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, ImageBuffer, ImageFormat, Luma, Rgb, Rgba, RgbaImage};

    fn encode(img: DynamicImage) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        img.write_to(&mut cursor, ImageFormat::Png).unwrap();
        cursor.into_inner()
    }

    #[test]
    fn test_decode_rgb_png() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(100, 80, Rgb([255, 0, 0]));
        let decoded = decode_image(&encode(DynamicImage::ImageRgb8(img))).unwrap();

        assert_eq!(decoded.width(), 100);
        assert_eq!(decoded.height(), 80);
        assert_eq!(decoded.pixels().get_pixel(0, 0), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_decode_coerces_grayscale_to_rgb() {
        let img = GrayImage::from_pixel(10, 10, Luma([128]));
        let decoded = decode_image(&encode(DynamicImage::ImageLuma8(img))).unwrap();

        assert_eq!(decoded.pixels().get_pixel(5, 5), &Rgb([128, 128, 128]));
    }

    #[test]
    fn test_decode_drops_alpha() {
        let img = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 0]));
        let decoded = decode_image(&encode(DynamicImage::ImageRgba8(img))).unwrap();

        assert_eq!(decoded.pixels().get_pixel(0, 0), &Rgb([10, 20, 30]));
    }

    #[test]
    fn test_decode_empty_payload() {
        assert!(matches!(decode_image(&[]), Err(DecodeError::EmptyPayload)));
    }

    #[test]
    fn test_decode_garbage_bytes() {
        assert!(matches!(
            decode_image(b"definitely not an image"),
            Err(DecodeError::UnknownFormat)
        ));
    }

    #[test]
    fn test_decode_truncated_png() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(50, 50, Rgb([1, 2, 3]));
        let bytes = encode(DynamicImage::ImageRgb8(img));
        let truncated = &bytes[..bytes.len() / 2];

        assert!(matches!(decode_image(truncated), Err(DecodeError::Corrupt(_))));
    }
}
