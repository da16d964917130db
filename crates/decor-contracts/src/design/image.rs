use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

/// Encoded raster image held in memory.
///
/// Every constructor decodes the bytes once, so a `RoomImage` that exists is
/// known to be a readable image of `width` x `height` pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomImage {
    bytes: Vec<u8>,
    mime_type: String,
    width: u32,
    height: u32,
}

impl RoomImage {
    pub fn decode(bytes: Vec<u8>) -> Result<Self> {
        if bytes.is_empty() {
            bail!("image payload is empty");
        }
        let format = image::guess_format(&bytes).context("unrecognized image encoding")?;
        let decoded = image::load_from_memory_with_format(&bytes, format)
            .context("image payload failed to decode")?;
        Ok(Self {
            mime_type: mime_for_format(format).to_string(),
            width: decoded.width(),
            height: decoded.height(),
            bytes,
        })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        Self::decode(bytes).with_context(|| format!("{} is not a usable image", path.display()))
    }

    /// Encodes an in-memory buffer as PNG.
    pub fn from_rgb(image: RgbImage) -> Result<Self> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
            .context("failed to encode PNG")?;
        Self::decode(bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            "image/bmp" => "bmp",
            _ => "png",
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, &self.bytes).with_context(|| format!("failed to write {}", path.display()))
    }

    /// Bytes and mime type to upload to a vision model.
    ///
    /// Images larger than `max_dim` on either edge are flattened onto white,
    /// downscaled and re-encoded as JPEG. Anything that fails to re-encode is
    /// sent as the original bytes.
    pub fn vision_payload(&self, max_dim: u32) -> (Vec<u8>, String) {
        let dim = max_dim.max(128);
        if self.width <= dim && self.height <= dim {
            return (self.bytes.clone(), self.mime_type.clone());
        }
        match self.downscaled_jpeg(dim) {
            Ok(bytes) => (bytes, "image/jpeg".to_string()),
            Err(_) => (self.bytes.clone(), self.mime_type.clone()),
        }
    }

    fn downscaled_jpeg(&self, dim: u32) -> Result<Vec<u8>> {
        let rgba = image::load_from_memory(&self.bytes)?.to_rgba8();
        let mut flattened = RgbImage::new(rgba.width(), rgba.height());
        for (x, y, pixel) in rgba.enumerate_pixels() {
            let alpha = u16::from(pixel[3]);
            let blend = |channel: u8| -> u8 {
                (((u16::from(channel) * alpha) + (255 * (255 - alpha))) / 255) as u8
            };
            flattened.put_pixel(x, y, Rgb([blend(pixel[0]), blend(pixel[1]), blend(pixel[2])]));
        }
        let resized = DynamicImage::ImageRgb8(flattened)
            .resize(dim, dim, FilterType::Triangle)
            .to_rgb8();
        let mut bytes = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut bytes, 90);
        encoder.encode_image(&resized)?;
        Ok(bytes)
    }
}

fn mime_for_format(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::WebP => "image/webp",
        ImageFormat::Gif => "image/gif",
        ImageFormat::Bmp => "image/bmp",
        _ => "image/png",
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::RoomImage;

    fn solid(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([40, 120, 200]))
    }

    #[test]
    fn decode_reads_dimensions_and_mime() -> anyhow::Result<()> {
        let image = RoomImage::from_rgb(solid(12, 8))?;
        assert_eq!(image.width(), 12);
        assert_eq!(image.height(), 8);
        assert_eq!(image.mime_type(), "image/png");
        assert_eq!(image.extension(), "png");

        let again = RoomImage::decode(image.bytes().to_vec())?;
        assert_eq!(again, image);
        Ok(())
    }

    #[test]
    fn decode_rejects_empty_and_garbage_payloads() {
        let empty = RoomImage::decode(Vec::new()).unwrap_err();
        assert!(format!("{empty:#}").contains("empty"));

        let garbage = RoomImage::decode(b"definitely not an image".to_vec()).unwrap_err();
        assert!(format!("{garbage:#}").contains("unrecognized image encoding"));
    }

    #[test]
    fn decode_rejects_truncated_png() -> anyhow::Result<()> {
        let image = RoomImage::from_rgb(solid(32, 32))?;
        let truncated = image.bytes()[..image.bytes().len() / 2].to_vec();
        assert!(RoomImage::decode(truncated).is_err());
        Ok(())
    }

    #[test]
    fn open_and_save_round_trip_through_disk() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("out").join("room.png");
        let image = RoomImage::from_rgb(solid(4, 4))?;
        image.save(&path)?;
        assert_eq!(RoomImage::open(&path)?, image);

        let missing = RoomImage::open(&temp.path().join("missing.png")).unwrap_err();
        assert!(format!("{missing:#}").contains("failed reading"));
        Ok(())
    }

    #[test]
    fn vision_payload_downscales_large_images_to_jpeg() -> anyhow::Result<()> {
        let small = RoomImage::from_rgb(solid(64, 48))?;
        let (bytes, mime) = small.vision_payload(1024);
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, small.bytes());

        let large = RoomImage::from_rgb(solid(400, 200))?;
        let (bytes, mime) = large.vision_payload(128);
        assert_eq!(mime, "image/jpeg");
        let shrunk = RoomImage::decode(bytes)?;
        assert_eq!(shrunk.width(), 128);
        assert_eq!(shrunk.height(), 64);
        Ok(())
    }
}
