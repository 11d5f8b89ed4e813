use crate::config::OverlayConfig;
use anyhow::{bail, Context, Result};
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};

pub type PixelBuffer = RgbaImage;

/// Supplies viewport-sized captures of the page and of the overlay image
/// after it has been positioned and scaled.
pub trait RasterSource {
    fn capture_page(&mut self, viewport: (u32, u32)) -> Result<PixelBuffer>;
    fn render_overlay(&mut self, config: &OverlayConfig, viewport: (u32, u32))
        -> Result<PixelBuffer>;
}

/// Raster source backed by image files on disk: a page screenshot and the
/// reference image named in the overlay configuration.
#[derive(Debug, Clone)]
pub struct ImageFileSource {
    page_path: PathBuf,
}

impl ImageFileSource {
    pub fn new(page_path: impl Into<PathBuf>) -> Self {
        Self {
            page_path: page_path.into(),
        }
    }
}

impl RasterSource for ImageFileSource {
    fn capture_page(&mut self, viewport: (u32, u32)) -> Result<PixelBuffer> {
        let page = load_rgba(&self.page_path)?;
        Ok(fit_to_viewport(&page, viewport))
    }

    fn render_overlay(
        &mut self,
        config: &OverlayConfig,
        viewport: (u32, u32),
    ) -> Result<PixelBuffer> {
        let Some(path) = config.image_path.as_deref() else {
            bail!("no overlay image configured");
        };
        let image = load_rgba(path)?;
        Ok(transform_overlay(
            &image,
            config.offset_x,
            config.offset_y,
            config.scale,
            viewport,
        ))
    }
}

pub fn load_rgba(path: &Path) -> Result<RgbaImage> {
    if !path.exists() {
        bail!("image not found: {}", path.display());
    }
    let image =
        image::open(path).with_context(|| format!("failed to open image: {}", path.display()))?;
    Ok(image.to_rgba8())
}

/// Clips or pads a page capture to the viewport. Uncovered area is white,
/// like a blank page.
pub fn fit_to_viewport(page: &RgbaImage, viewport: (u32, u32)) -> RgbaImage {
    let (width, height) = viewport;
    if page.dimensions() == viewport {
        return page.clone();
    }
    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    imageops::replace(&mut canvas, page, 0, 0);
    canvas
}

/// Places `image` on a transparent viewport canvas, scaled by `scale_percent`
/// around its top-left corner and then translated by the offsets.
pub fn transform_overlay(
    image: &RgbaImage,
    offset_x: i32,
    offset_y: i32,
    scale_percent: u32,
    viewport: (u32, u32),
) -> RgbaImage {
    let (width, height) = viewport;
    let mut canvas = RgbaImage::new(width, height);

    let factor = f64::from(scale_percent) / 100.0;
    let scaled_w = ((f64::from(image.width()) * factor).round() as u32).max(1);
    let scaled_h = ((f64::from(image.height()) * factor).round() as u32).max(1);

    if (scaled_w, scaled_h) == image.dimensions() {
        imageops::replace(&mut canvas, image, i64::from(offset_x), i64::from(offset_y));
    } else {
        let scaled = imageops::resize(image, scaled_w, scaled_h, FilterType::Lanczos3);
        imageops::replace(&mut canvas, &scaled, i64::from(offset_x), i64::from(offset_y));
    }
    canvas
}

/// Grayscale copy used for luminance-only comparison. Alpha is untouched.
pub fn desaturate(buffer: &RgbaImage) -> RgbaImage {
    let mut out = buffer.clone();
    for pixel in out.pixels_mut() {
        let [r, g, b, a] = pixel.0;
        let luma = (0.2126 * f64::from(r) + 0.7152 * f64::from(g) + 0.0722 * f64::from(b))
            .round()
            .clamp(0.0, 255.0) as u8;
        *pixel = Rgba([luma, luma, luma, a]);
    }
    out
}
