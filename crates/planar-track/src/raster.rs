//! `image`-crate backed frame rasterization and template loading.

use std::path::Path;

use ::image::{imageops::FilterType, DynamicImage, RgbaImage};
use planar_track_core::{CapabilityError, FrameRasterizer, GrayImage, RgbaFrame, TemplateSource};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Any decoded image as an RGBA frame.
pub fn rgba_frame_from_image(img: &DynamicImage) -> RgbaFrame {
    let rgba = img.to_rgba8();
    RgbaFrame {
        width: rgba.width(),
        height: rgba.height(),
        data: rgba.into_raw(),
    }
}

/// Open and decode an image file into an RGBA frame.
pub fn load_rgba_frame(path: impl AsRef<Path>) -> Result<RgbaFrame, ::image::ImageError> {
    Ok(rgba_frame_from_image(&::image::open(path)?))
}

/// Resizes with the `image` crate, then converts to luma.
#[derive(Clone, Copy, Debug)]
pub struct ImageRasterizer {
    filter: FilterType,
}

impl Default for ImageRasterizer {
    fn default() -> Self {
        Self::new(FilterType::Triangle)
    }
}

impl ImageRasterizer {
    pub fn new(filter: FilterType) -> Self {
        Self { filter }
    }
}

impl FrameRasterizer for ImageRasterizer {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, frame), fields(src_w = frame.width, src_h = frame.height))
    )]
    fn rasterize(
        &mut self,
        frame: &RgbaFrame,
        width: u32,
        height: u32,
    ) -> Result<GrayImage, CapabilityError> {
        if width == 0 || height == 0 {
            return Err(CapabilityError::new(format!(
                "invalid target size {width}x{height}"
            )));
        }
        let rgba = RgbaImage::from_raw(frame.width, frame.height, frame.data.clone())
            .filter(|_| !frame.is_empty())
            .ok_or_else(|| {
                CapabilityError::new(format!(
                    "{} bytes do not form a {}x{} RGBA frame",
                    frame.data.len(),
                    frame.width,
                    frame.height
                ))
            })?;
        let rgba = if (frame.width, frame.height) == (width, height) {
            rgba
        } else {
            ::image::imageops::resize(&rgba, width, height, self.filter)
        };
        let luma = DynamicImage::ImageRgba8(rgba).to_luma8();
        Ok(GrayImage {
            width: luma.width() as usize,
            height: luma.height() as usize,
            data: luma.into_raw(),
        })
    }
}

/// Reads templates from the local file system. Accepts plain paths and
/// `file://` URLs.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileTemplateSource;

impl FileTemplateSource {
    pub fn new() -> Self {
        Self
    }
}

impl TemplateSource for FileTemplateSource {
    fn fetch(&mut self, url: &str) -> Result<RgbaFrame, CapabilityError> {
        let path = url.strip_prefix("file://").unwrap_or(url);
        load_rgba_frame(path).map_err(|e| CapabilityError::new(format!("{path}: {e}")))
    }
}

/// Downloads `http(s)://` templates with a blocking client; anything else is
/// read from disk.
#[cfg(feature = "http")]
pub struct HttpTemplateSource {
    client: reqwest::blocking::Client,
}

#[cfg(feature = "http")]
impl HttpTemplateSource {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("planar-track/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    fn download(&self, url: &str) -> Result<Vec<u8>, reqwest::Error> {
        let resp = self.client.get(url).send()?.error_for_status()?;
        Ok(resp.bytes()?.to_vec())
    }
}

#[cfg(feature = "http")]
impl TemplateSource for HttpTemplateSource {
    fn fetch(&mut self, url: &str) -> Result<RgbaFrame, CapabilityError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return FileTemplateSource.fetch(url);
        }
        let bytes = self
            .download(url)
            .map_err(|e| CapabilityError::new(e.to_string()))?;
        let img = ::image::load_from_memory(&bytes)
            .map_err(|e| CapabilityError::new(format!("{url}: {e}")))?;
        Ok(rgba_frame_from_image(&img))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_size_rasterization_is_plain_luma() {
        let frame = RgbaFrame::new(2, 1, vec![255, 255, 255, 255, 0, 0, 0, 255]).expect("frame");
        let gray = ImageRasterizer::default()
            .rasterize(&frame, 2, 1)
            .expect("raster");
        assert_eq!((gray.width, gray.height), (2, 1));
        assert_eq!(gray.data, vec![255, 0]);
    }

    #[test]
    fn downsizes_to_requested_resolution() {
        let frame = RgbaFrame::from_gray(&GrayImage::from_raw(8, 4, vec![100; 32]).expect("gray"));
        let gray = ImageRasterizer::default()
            .rasterize(&frame, 4, 2)
            .expect("raster");
        assert_eq!((gray.width, gray.height), (4, 2));
        assert!(gray.data.iter().all(|&v| v.abs_diff(100) <= 1));
    }

    #[test]
    fn malformed_frames_are_errors() {
        let frame = RgbaFrame {
            width: 4,
            height: 4,
            data: vec![0; 10],
        };
        assert!(ImageRasterizer::default().rasterize(&frame, 4, 4).is_err());
        let ok = RgbaFrame::from_gray(&GrayImage::new(2, 2));
        assert!(ImageRasterizer::default().rasterize(&ok, 0, 2).is_err());
    }

    #[test]
    fn file_source_reads_paths_and_file_urls() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("t.png");
        ::image::GrayImage::from_pixel(5, 3, ::image::Luma([42u8]))
            .save(&path)
            .expect("save");

        let mut src = FileTemplateSource::new();
        let a = src.fetch(&path.to_string_lossy()).expect("path");
        let b = src
            .fetch(&format!("file://{}", path.to_string_lossy()))
            .expect("url");
        assert_eq!((a.width, a.height), (5, 3));
        assert_eq!(a, b);
        assert_eq!(&a.data[..4], &[42, 42, 42, 255]);
        assert!(src.fetch("/definitely/not/here.png").is_err());
    }
}
