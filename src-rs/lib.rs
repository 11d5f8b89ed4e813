//! Overlay comparison engines: an on-page ruler that turns clicks into
//! measurements (with display-scale detection), and a pixel diff that
//! highlights where a reference image and the rendered page disagree.

pub mod config;
pub mod diff;
pub mod geometry;
pub mod present;
pub mod raster;
pub mod refresh;
pub mod ruler;
pub mod session;

pub use config::{apply_shortcut, DiffVariant, KeyChord, OverlayConfig};
pub use diff::{
    compute_diff_mask, find_diff_regions, query_region_at, DiffEngine, DiffMask, Region, RegionSet,
};
pub use geometry::{Measurement, Point, Rect};
pub use present::{Presenter, RecordingPresenter};
pub use raster::{ImageFileSource, PixelBuffer, RasterSource};
pub use refresh::RefreshTimer;
pub use ruler::{detect_scale, DisplaySize, RulerEngine, RulerState, SCALE_CANDIDATES};
pub use session::{InputEvent, OverlaySession, RawEvent};
