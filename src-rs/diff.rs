use crate::config::DiffVariant;
use crate::geometry::Point;
use crate::raster::{desaturate, PixelBuffer};
use crate::refresh::{RefreshTimer, DEFAULT_REFRESH_INTERVAL};
use anyhow::{bail, Result};
use image::{Rgba, RgbaImage};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_THRESHOLD: u8 = 30;

/// Flood-fill seeds are taken every `SEED_STRIDE` pixels on both axes. A
/// region thinner than the stride can fall between seeds and go unreported.
pub const SEED_STRIDE: u32 = 5;

/// Regions must be wider and taller than this to be kept.
pub const MIN_REGION_SIDE: u32 = 5;

pub const DIFF_COLOR: Rgba<u8> = Rgba([255, 0, 0, 200]);

/// Same size as the viewport; a pixel is either transparent or `DIFF_COLOR`.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffMask {
    image: RgbaImage,
}

impl DiffMask {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn is_marked(&self, x: u32, y: u32) -> bool {
        x < self.width() && y < self.height() && self.image.get_pixel(x, y).0[3] > 0
    }

    pub fn is_marked_at(&self, point: Point) -> bool {
        point.x >= 0 && point.y >= 0 && self.is_marked(point.x as u32, point.y as u32)
    }

    pub fn marked_count(&self) -> u64 {
        self.image.pixels().filter(|p| p.0[3] > 0).count() as u64
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// Hit test used for hover lookup; the right and bottom edges count.
    pub fn contains(&self, point: Point) -> bool {
        let (px, py) = (i64::from(point.x), i64::from(point.y));
        let (x, y) = (i64::from(self.x), i64::from(self.y));
        px >= x && px <= x + i64::from(self.width) && py >= y && py <= y + i64::from(self.height)
    }

    pub fn label(&self) -> String {
        format!("{}×{}px", self.width, self.height)
    }
}

pub type RegionSet = Vec<Region>;

/// Marks every pixel the overlay covers whose R, G or B differs from the page
/// by more than `threshold`.
pub fn compute_diff_mask(
    page: &PixelBuffer,
    overlay: &PixelBuffer,
    threshold: u8,
) -> Result<DiffMask> {
    if page.dimensions() != overlay.dimensions() {
        let (pw, ph) = page.dimensions();
        let (ow, oh) = overlay.dimensions();
        bail!("raster sizes differ: page {pw}x{ph}, overlay {ow}x{oh}");
    }

    let (width, height) = page.dimensions();
    let mut mask = RgbaImage::new(width, height);

    for (x, y, over) in overlay.enumerate_pixels() {
        let [or, og, ob, oa] = over.0;
        if oa == 0 {
            continue;
        }
        let [pr, pg, pb, _] = page.get_pixel(x, y).0;
        let differs = pr.abs_diff(or) > threshold
            || pg.abs_diff(og) > threshold
            || pb.abs_diff(ob) > threshold;
        if differs {
            mask.put_pixel(x, y, DIFF_COLOR);
        }
    }

    Ok(DiffMask { image: mask })
}

pub fn find_diff_regions(mask: &DiffMask) -> RegionSet {
    find_diff_regions_with(mask, SEED_STRIDE, MIN_REGION_SIDE)
}

/// Connected components (4-neighbour) of marked pixels, seeded on a
/// `stride` grid. Each pixel is visited at most once.
pub fn find_diff_regions_with(mask: &DiffMask, stride: u32, min_side: u32) -> RegionSet {
    let width = mask.width();
    let height = mask.height();
    let stride = stride.max(1) as usize;
    let mut visited = vec![false; (width as usize) * (height as usize)];
    let mut stack: Vec<usize> = Vec::new();
    let mut regions = Vec::new();

    for y in (0..height).step_by(stride) {
        for x in (0..width).step_by(stride) {
            let seed = (y * width + x) as usize;
            if visited[seed] || !mask.is_marked(x, y) {
                continue;
            }

            visited[seed] = true;
            stack.push(seed);

            let (mut minx, mut maxx, mut miny, mut maxy) = (x, x, y, y);

            while let Some(node) = stack.pop() {
                let cx = (node as u32) % width;
                let cy = (node as u32) / width;

                minx = minx.min(cx);
                maxx = maxx.max(cx);
                miny = miny.min(cy);
                maxy = maxy.max(cy);

                let mut visit = |nx: u32, ny: u32| {
                    let idx = (ny * width + nx) as usize;
                    if !visited[idx] && mask.is_marked(nx, ny) {
                        visited[idx] = true;
                        stack.push(idx);
                    }
                };

                if cx + 1 < width {
                    visit(cx + 1, cy);
                }
                if cx > 0 {
                    visit(cx - 1, cy);
                }
                if cy + 1 < height {
                    visit(cx, cy + 1);
                }
                if cy > 0 {
                    visit(cx, cy - 1);
                }
            }

            let region = Region {
                x: minx,
                y: miny,
                width: maxx - minx + 1,
                height: maxy - miny + 1,
            };
            if region.width > min_side && region.height > min_side {
                regions.push(region);
            }
        }
    }

    regions
}

pub fn query_region_at(regions: &[Region], point: Point) -> Option<Region> {
    regions.iter().find(|r| r.contains(point)).copied()
}

/// Owns the current diff mask, its lazily derived regions and the styling
/// refresh timer. Replacing the mask drops the cached regions.
pub struct DiffEngine {
    threshold: u8,
    refresh_interval: Duration,
    variant: Option<DiffVariant>,
    mask: Option<DiffMask>,
    regions: Option<RegionSet>,
    timer: Option<RefreshTimer>,
    refresh_generation: Arc<AtomicU64>,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffEngine {
    pub fn new() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            variant: None,
            mask: None,
            regions: None,
            timer: None,
            refresh_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn is_active(&self) -> bool {
        self.variant.is_some()
    }

    pub fn variant(&self) -> Option<DiffVariant> {
        self.variant
    }

    pub fn mask(&self) -> Option<&DiffMask> {
        self.mask.as_ref()
    }

    pub fn refresh_running(&self) -> bool {
        self.timer.as_ref().is_some_and(RefreshTimer::is_running)
    }

    /// Number of styling refreshes fired since the engine was created.
    pub fn refresh_generation(&self) -> u64 {
        self.refresh_generation.load(Ordering::Relaxed)
    }

    /// Recomputes the mask from fresh captures. Luminance mode compares
    /// desaturated copies of both buffers.
    pub fn run(
        &mut self,
        page: &PixelBuffer,
        overlay: &PixelBuffer,
        variant: DiffVariant,
    ) -> Result<()> {
        let mask = match variant {
            DiffVariant::Color => compute_diff_mask(page, overlay, self.threshold)?,
            DiffVariant::Luminance => {
                compute_diff_mask(&desaturate(page), &desaturate(overlay), self.threshold)?
            }
        };
        log::debug!(
            "diff mask {}x{} with {} marked pixels",
            mask.width(),
            mask.height(),
            mask.marked_count()
        );
        self.set_mask(mask, variant);
        Ok(())
    }

    pub fn set_mask(&mut self, mask: DiffMask, variant: DiffVariant) {
        self.mask = Some(mask);
        self.regions = None;
        self.variant = Some(variant);
        if !self.refresh_running() {
            let generation = Arc::clone(&self.refresh_generation);
            self.timer = Some(RefreshTimer::start(self.refresh_interval, move || {
                generation.fetch_add(1, Ordering::Relaxed);
            }));
        }
    }

    pub fn regions(&mut self) -> &[Region] {
        if self.regions.is_none() {
            if let Some(mask) = &self.mask {
                self.regions = Some(find_diff_regions(mask));
            }
        }
        self.regions.as_deref().unwrap_or(&[])
    }

    pub fn has_cached_regions(&self) -> bool {
        self.regions.is_some()
    }

    /// Region under the pointer, only when the pointer is on a marked pixel.
    pub fn hover(&mut self, point: Point) -> Option<Region> {
        let on_diff = self.mask.as_ref().is_some_and(|m| m.is_marked_at(point));
        if !on_diff {
            return None;
        }
        query_region_at(self.regions(), point)
    }

    pub fn disable(&mut self) {
        if let Some(mut timer) = self.timer.take() {
            timer.stop();
        }
        self.variant = None;
        self.mask = None;
        self.regions = None;
    }
}
