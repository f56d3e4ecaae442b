use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Why a thumbnail couldn't be produced
///
/// Cloneable because one failed decode is reported to every waiting caller.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecodeFailure {
    #[error("failed to open {}: {message}", .path.display())]
    Open { path: PathBuf, message: String },
    #[error("failed to decode {}: {message}", .path.display())]
    Decode { path: PathBuf, message: String },
    #[error("decode worker failed: {0}")]
    Worker(String),
}

/// A decoded, orientation-corrected image sized for display
#[derive(Debug, Clone)]
pub struct Thumbnail {
    image: DynamicImage,
}

impl Thumbnail {
    pub fn new(image: DynamicImage) -> Self {
        Self { image }
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn save(&self, path: &Path) -> Result<(), image::ImageError> {
        self.image.save(path)
    }
}

/// Largest power-of-two downsample factor that keeps both halved
/// dimensions above the requested display size
pub fn calculate_sample_size(raw_width: u32, raw_height: u32, req_width: u32, req_height: u32) -> u32 {
    let mut sample_size = 1;

    if raw_height > req_height || raw_width > req_width {
        let half_height = raw_height / 2;
        let half_width = raw_width / 2;

        while half_height / sample_size > req_height && half_width / sample_size > req_width {
            sample_size *= 2;
        }
    }

    sample_size
}

/// Clockwise rotation needed to display an image upright
///
/// Only pure rotations are honoured; mirrored orientations display as stored.
pub fn rotation_degrees(orientation: Orientation) -> u16 {
    match orientation {
        Orientation::Rotate90 => 90,
        Orientation::Rotate180 => 180,
        Orientation::Rotate270 => 270,
        _ => 0,
    }
}

pub fn rotate(image: DynamicImage, degrees: u16) -> DynamicImage {
    match degrees {
        90 => image.rotate90(),
        180 => image.rotate180(),
        270 => image.rotate270(),
        _ => image,
    }
}

/// Decode `path` for display at `width` x `height`
///
/// The image is downsampled by `calculate_sample_size` before the
/// orientation stored in its metadata is applied. Missing or unreadable
/// orientation means no rotation.
pub fn decode_thumbnail(path: &Path, width: u32, height: u32) -> Result<Thumbnail, DecodeFailure> {
    let open_failed = |e: std::io::Error| DecodeFailure::Open {
        path: path.to_path_buf(),
        message: e.to_string(),
    };
    let decode_failed = |e: image::ImageError| DecodeFailure::Decode {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let reader = ImageReader::open(path)
        .map_err(open_failed)?
        .with_guessed_format()
        .map_err(open_failed)?;
    let mut decoder = reader.into_decoder().map_err(decode_failed)?;

    let orientation = decoder.orientation().unwrap_or_else(|e| {
        tracing::debug!("no orientation for {}: {}", path.display(), e);
        Orientation::NoTransforms
    });
    let (raw_width, raw_height) = decoder.dimensions();

    let image = DynamicImage::from_decoder(decoder).map_err(decode_failed)?;

    let sample_size = calculate_sample_size(raw_width, raw_height, width, height);
    let image = if sample_size > 1 {
        image.resize_exact(
            (raw_width / sample_size).max(1),
            (raw_height / sample_size).max(1),
            FilterType::Triangle,
        )
    } else {
        image
    };

    let image = rotate(image, rotation_degrees(orientation));

    tracing::debug!(
        sample_size,
        width = image.width(),
        height = image.height(),
        "decoded thumbnail for {}",
        path.display()
    );
    Ok(Thumbnail::new(image))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    /// Write a `width` x `height` PNG with a red top-left pixel
    pub(crate) fn write_test_image(path: &Path, width: u32, height: u32) {
        let mut img = RgbImage::from_pixel(width, height, Rgb([0, 0, 255]));
        img.put_pixel(0, 0, Rgb([255, 0, 0]));
        img.save(path).unwrap();
    }

    #[test]
    fn test_sample_size_small_image() {
        assert_eq!(calculate_sample_size(100, 80, 200, 200), 1);
        assert_eq!(calculate_sample_size(300, 300, 200, 200), 1);
    }

    #[test]
    fn test_sample_size_large_image() {
        assert_eq!(calculate_sample_size(400, 300, 100, 100), 2);
        assert_eq!(calculate_sample_size(4000, 3000, 100, 100), 16);
        // Both halved dimensions must stay above the request
        assert_eq!(calculate_sample_size(4000, 150, 100, 100), 1);
    }

    #[test]
    fn test_rotation_degrees() {
        assert_eq!(rotation_degrees(Orientation::NoTransforms), 0);
        assert_eq!(rotation_degrees(Orientation::Rotate90), 90);
        assert_eq!(rotation_degrees(Orientation::Rotate180), 180);
        assert_eq!(rotation_degrees(Orientation::Rotate270), 270);
        assert_eq!(rotation_degrees(Orientation::FlipHorizontal), 0);
    }

    #[test]
    fn test_rotate_swaps_dimensions() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(4, 2));
        let rotated = rotate(img.clone(), 90);
        assert_eq!((rotated.width(), rotated.height()), (2, 4));
        let rotated = rotate(img.clone(), 180);
        assert_eq!((rotated.width(), rotated.height()), (4, 2));
        let rotated = rotate(img, 270);
        assert_eq!((rotated.width(), rotated.height()), (2, 4));
    }

    #[test]
    fn test_decode_downsamples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exhibit.png");
        write_test_image(&path, 400, 300);

        let thumb = decode_thumbnail(&path, 100, 100).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (200, 150));
    }

    #[test]
    fn test_decode_small_image_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.png");
        write_test_image(&path, 40, 30);

        let thumb = decode_thumbnail(&path, 100, 100).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (40, 30));
    }

    /// Write a JPEG whose first segment after SOI is `app1`
    fn write_jpeg_with_app1(path: &Path, width: u32, height: u32, app1: &[u8]) {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([40, 90, 160])));
        let mut encoded = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut encoded), image::ImageFormat::Jpeg)
            .unwrap();
        assert_eq!(&encoded[..2], &[0xFF, 0xD8]);

        let mut bytes = encoded[..2].to_vec();
        bytes.extend_from_slice(app1);
        bytes.extend_from_slice(&encoded[2..]);
        std::fs::write(path, bytes).unwrap();
    }

    /// APP1 segment holding a big-endian TIFF block with a single
    /// Orientation entry
    fn exif_orientation_segment(orientation: u16) -> Vec<u8> {
        let mut tiff = vec![b'M', b'M', 0x00, 0x2A, 0x00, 0x00, 0x00, 0x08];
        tiff.extend_from_slice(&1u16.to_be_bytes());
        tiff.extend_from_slice(&0x0112u16.to_be_bytes());
        tiff.extend_from_slice(&3u16.to_be_bytes());
        tiff.extend_from_slice(&1u32.to_be_bytes());
        tiff.extend_from_slice(&orientation.to_be_bytes());
        tiff.extend_from_slice(&[0x00, 0x00]);
        tiff.extend_from_slice(&0u32.to_be_bytes());
        app1_segment(&tiff)
    }

    fn app1_segment(tiff: &[u8]) -> Vec<u8> {
        let mut payload = b"Exif\0\0".to_vec();
        payload.extend_from_slice(tiff);
        let mut segment = vec![0xFF, 0xE1];
        segment.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        segment.extend_from_slice(&payload);
        segment
    }

    #[test]
    fn test_decode_applies_exif_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portrait.jpg");
        write_jpeg_with_app1(&path, 800, 400, &exif_orientation_segment(6));

        let thumb = decode_thumbnail(&path, 100, 100).unwrap();
        // Downsampled by 2 to 400x200, then turned upright
        assert_eq!((thumb.width(), thumb.height()), (200, 400));
    }

    #[test]
    fn test_decode_upright_exif_keeps_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("landscape.jpg");
        write_jpeg_with_app1(&path, 800, 400, &exif_orientation_segment(1));

        let thumb = decode_thumbnail(&path, 100, 100).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (400, 200));
    }

    #[test]
    fn test_decode_unreadable_exif_means_no_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd.jpg");
        write_jpeg_with_app1(&path, 800, 400, &app1_segment(b"not a tiff block"));

        let thumb = decode_thumbnail(&path, 100, 100).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (400, 200));
    }

    #[test]
    fn test_decode_missing_file() {
        let err = decode_thumbnail(Path::new("/nonexistent/photo.jpg"), 64, 64).unwrap_err();
        assert!(matches!(err, DecodeFailure::Open { .. }));
    }

    #[test]
    fn test_decode_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.jpg");
        std::fs::write(&path, b"definitely not an image").unwrap();
        assert!(decode_thumbnail(&path, 64, 64).is_err());
    }
}
