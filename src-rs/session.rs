use crate::config::{apply_shortcut, DiffVariant, KeyChord, OverlayConfig};
use crate::diff::DiffEngine;
use crate::geometry::Point;
use crate::present::Presenter;
use crate::raster::RasterSource;
use crate::ruler::RulerEngine;
use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputEvent {
    PointerDown { point: Point },
    PointerMove { point: Point },
    KeyPress { chord: KeyChord },
}

/// Event as delivered by the host: mouse, touch or keyboard, with any of its
/// fields possibly absent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub key: Option<String>,
    pub alt: bool,
    pub shift: bool,
    pub ctrl: bool,
}

impl RawEvent {
    pub fn to_input(&self) -> Option<InputEvent> {
        let point = || match (self.x, self.y) {
            (Some(x), Some(y)) if x.is_finite() && y.is_finite() => {
                Some(Point::new(x.round() as i32, y.round() as i32))
            }
            _ => None,
        };

        match self.kind.as_str() {
            "down" | "click" | "pointerdown" | "touchstart" => {
                point().map(|point| InputEvent::PointerDown { point })
            }
            "move" | "pointermove" | "mousemove" | "touchmove" => {
                point().map(|point| InputEvent::PointerMove { point })
            }
            "key" | "keydown" => self.key.as_ref().map(|key| InputEvent::KeyPress {
                chord: KeyChord {
                    key: key.clone(),
                    alt: self.alt,
                    shift: self.shift,
                    ctrl: self.ctrl,
                },
            }),
            _ => None,
        }
    }
}

/// One overlay session over one viewport: the ruler and diff engines plus
/// the configuration most recently pushed by the store.
pub struct OverlaySession<P: Presenter, R: RasterSource> {
    config: OverlayConfig,
    viewport: (u32, u32),
    ruler: RulerEngine<P>,
    diff: DiffEngine,
    raster: R,
    seen_refresh_generation: u64,
}

impl<P: Presenter, R: RasterSource> OverlaySession<P, R> {
    pub fn new(presenter: P, raster: R, viewport: (u32, u32)) -> Self {
        Self::with_diff_engine(presenter, raster, viewport, DiffEngine::new())
    }

    pub fn with_diff_engine(presenter: P, raster: R, viewport: (u32, u32), diff: DiffEngine) -> Self {
        Self {
            config: OverlayConfig::default(),
            viewport,
            ruler: RulerEngine::new(presenter, viewport.0, viewport.1),
            seen_refresh_generation: diff.refresh_generation(),
            diff,
            raster,
        }
    }

    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    pub fn ruler(&self) -> &RulerEngine<P> {
        &self.ruler
    }

    pub fn diff(&self) -> &DiffEngine {
        &self.diff
    }

    pub fn diff_mut(&mut self) -> &mut DiffEngine {
        &mut self.diff
    }

    pub fn presenter(&self) -> &P {
        self.ruler.presenter()
    }

    pub fn apply_config(&mut self, config: OverlayConfig) {
        let config = config.normalized();

        match (config.ruler_mode, self.ruler.is_active()) {
            (true, false) => self.ruler.on_activate(),
            (false, true) => self.ruler.on_deactivate(),
            _ => {}
        }

        self.config = config;
        self.refresh_diff();
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if self.viewport == (width, height) {
            return;
        }
        self.viewport = (width, height);
        self.ruler.set_viewport(width, height);
        self.refresh_diff();
    }

    /// Routes one input event. A returned configuration is a change the
    /// store should persist and push back through `apply_config`.
    pub fn handle_event(&mut self, event: InputEvent) -> Option<OverlayConfig> {
        self.poll_refresh();
        match event {
            InputEvent::PointerDown { point } => {
                if self.ruler.is_active() {
                    self.ruler.on_pointer_down(point);
                }
                None
            }
            InputEvent::PointerMove { point } => {
                if self.ruler.is_active() {
                    self.ruler.on_pointer_move(point);
                } else if self.diff.is_active() {
                    self.update_tooltip(point);
                }
                None
            }
            InputEvent::KeyPress { chord } => {
                if chord.is_escape() {
                    if self.ruler.is_active() {
                        self.ruler.on_escape();
                    }
                    return None;
                }
                apply_shortcut(&self.config, &chord)
            }
        }
    }

    pub fn handle_raw(&mut self, raw: &RawEvent) -> Option<OverlayConfig> {
        match raw.to_input() {
            Some(event) => self.handle_event(event),
            None => {
                log::debug!("ignoring malformed {:?} event", raw.kind);
                None
            }
        }
    }

    /// Forwards refresh ticks that fired since the last poll to the presenter.
    pub fn poll_refresh(&mut self) {
        let generation = self.diff.refresh_generation();
        if generation == self.seen_refresh_generation {
            return;
        }
        self.seen_refresh_generation = generation;
        if self.diff.is_active() {
            self.ruler.presenter_mut().refresh_diff_styling();
        }
    }

    fn update_tooltip(&mut self, point: Point) {
        let presenter = self.ruler.presenter_mut();
        match self.diff.hover(point) {
            Some(region) => presenter.show_tooltip(point, &region.label()),
            None => presenter.hide_tooltip(),
        }
    }

    fn refresh_diff(&mut self) {
        let Some(variant) = self.config.requested_diff() else {
            self.disable_diff();
            return;
        };

        if !self.config.image_present() {
            log::warn!("no reference image loaded; {variant:?} diff request ignored");
            self.disable_diff();
            return;
        }
        if !self.config.is_visible {
            self.disable_diff();
            return;
        }

        if let Err(err) = self.run_diff(variant) {
            log::warn!("diff mode unavailable, showing plain overlay: {err:#}");
            self.disable_diff();
        }
    }

    fn run_diff(&mut self, variant: DiffVariant) -> Result<()> {
        let page = self.raster.capture_page(self.viewport)?;
        let overlay = self.raster.render_overlay(&self.config, self.viewport)?;
        self.diff.run(&page, &overlay, variant)
    }

    fn disable_diff(&mut self) {
        if self.diff.is_active() {
            self.diff.disable();
            self.ruler.presenter_mut().hide_tooltip();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use crate::present::RecordingPresenter;
    use crate::raster::PixelBuffer;
    use crate::ruler::RulerState;
    use anyhow::bail;
    use image::{Rgba, RgbaImage};
    use std::path::PathBuf;
    use std::time::Duration;

    struct FakeRaster {
        page: PixelBuffer,
        overlay: PixelBuffer,
        available: bool,
    }

    impl RasterSource for FakeRaster {
        fn capture_page(&mut self, _viewport: (u32, u32)) -> Result<PixelBuffer> {
            if !self.available {
                bail!("no graphics context");
            }
            Ok(self.page.clone())
        }

        fn render_overlay(
            &mut self,
            _config: &OverlayConfig,
            _viewport: (u32, u32),
        ) -> Result<PixelBuffer> {
            Ok(self.overlay.clone())
        }
    }

    fn raster(available: bool) -> FakeRaster {
        let page = RgbaImage::from_pixel(60, 60, Rgba([255, 255, 255, 255]));
        let mut overlay = page.clone();
        for y in 20..30 {
            for x in 20..30 {
                overlay.put_pixel(x, y, Rgba([0, 0, 0, 255]));
            }
        }
        FakeRaster {
            page,
            overlay,
            available,
        }
    }

    fn session(available: bool) -> OverlaySession<RecordingPresenter, FakeRaster> {
        let diff = DiffEngine::new().with_refresh_interval(Duration::from_secs(60));
        OverlaySession::with_diff_engine(RecordingPresenter::new(), raster(available), (60, 60), diff)
    }

    fn diff_config() -> OverlayConfig {
        OverlayConfig {
            image_path: Some(PathBuf::from("mock.png")),
            diff_mode: true,
            ..OverlayConfig::default()
        }
    }

    fn down(x: i32, y: i32) -> InputEvent {
        InputEvent::PointerDown {
            point: Point::new(x, y),
        }
    }

    fn motion(x: i32, y: i32) -> InputEvent {
        InputEvent::PointerMove {
            point: Point::new(x, y),
        }
    }

    #[test]
    fn ruler_end_to_end() {
        let mut s = session(true);
        s.apply_config(OverlayConfig {
            ruler_mode: true,
            ..OverlayConfig::default()
        });
        assert!(s.presenter().input_captured);

        s.handle_event(down(100, 100));
        s.handle_event(motion(150, 130));
        assert_eq!(s.presenter().rectangle, Some(Rect::new(100, 100, 50, 30)));

        s.handle_event(down(150, 130));
        assert!(matches!(s.ruler().state(), RulerState::Finished { .. }));
        assert!(s.presenter().label.as_deref().unwrap_or("").contains("50px × 30px"));

        s.handle_event(down(150, 130));
        assert_eq!(s.ruler().state(), RulerState::Idle);
        assert_eq!(s.presenter().rectangle, None);
    }

    #[test]
    fn pointer_events_ignored_without_ruler() {
        let mut s = session(true);
        s.handle_event(down(10, 10));
        assert_eq!(s.ruler().state(), RulerState::Idle);
    }

    #[test]
    fn unrelated_config_push_keeps_measurement() {
        let mut s = session(true);
        let config = OverlayConfig {
            ruler_mode: true,
            ..OverlayConfig::default()
        };
        s.apply_config(config.clone());
        s.handle_event(down(1, 1));
        s.apply_config(OverlayConfig {
            opacity: 80,
            ..config
        });
        assert!(matches!(s.ruler().state(), RulerState::Started { .. }));

        s.apply_config(OverlayConfig::default());
        assert!(!s.ruler().is_active());
        assert!(!s.presenter().input_captured);
    }

    #[test]
    fn escape_key_clears_ruler() {
        let mut s = session(true);
        s.apply_config(OverlayConfig {
            ruler_mode: true,
            ..OverlayConfig::default()
        });
        s.handle_event(down(1, 1));
        let out = s.handle_event(InputEvent::KeyPress {
            chord: KeyChord::plain("Escape"),
        });
        assert_eq!(out, None);
        assert_eq!(s.ruler().state(), RulerState::Idle);
    }

    #[test]
    fn diff_mode_runs_and_hover_shows_region() {
        let mut s = session(true);
        s.apply_config(diff_config());
        assert!(s.diff().is_active());
        assert_eq!(s.diff().mask().map(|m| m.marked_count()), Some(100));

        s.handle_event(motion(25, 25));
        let tooltip = s.presenter().tooltip.clone().map(|(_, text)| text);
        assert_eq!(tooltip.as_deref(), Some("10×10px"));

        s.handle_event(motion(5, 5));
        assert_eq!(s.presenter().tooltip, None);
    }

    #[test]
    fn diff_without_image_is_a_no_op() {
        let mut s = session(true);
        s.apply_config(OverlayConfig {
            diff_mode: true,
            ..OverlayConfig::default()
        });
        assert!(!s.diff().is_active());
    }

    #[test]
    fn unavailable_raster_leaves_diff_inactive() {
        let mut s = session(false);
        s.apply_config(diff_config());
        assert!(!s.diff().is_active());
        assert!(!s.diff().refresh_running());
    }

    #[test]
    fn turning_diff_off_cancels_refresh() {
        let mut s = session(true);
        s.apply_config(diff_config());
        assert!(s.diff().refresh_running());
        s.apply_config(OverlayConfig {
            diff_mode: false,
            ..diff_config()
        });
        assert!(!s.diff().is_active());
        assert!(!s.diff().refresh_running());
    }

    #[test]
    fn refresh_ticks_restyle_on_next_event() {
        let diff = DiffEngine::new().with_refresh_interval(Duration::from_millis(5));
        let mut s =
            OverlaySession::with_diff_engine(RecordingPresenter::new(), raster(true), (60, 60), diff);
        s.apply_config(diff_config());
        assert_eq!(s.presenter().styling_refreshes, 0);

        std::thread::sleep(Duration::from_millis(40));
        s.handle_event(motion(5, 5));
        assert_eq!(s.presenter().styling_refreshes, 1);

        s.apply_config(OverlayConfig::default());
        std::thread::sleep(Duration::from_millis(20));
        s.poll_refresh();
        assert_eq!(s.presenter().styling_refreshes, 1);
    }

    #[test]
    fn shortcut_returns_requested_config() {
        let mut s = session(true);
        s.apply_config(OverlayConfig {
            image_path: Some(PathBuf::from("mock.png")),
            ..OverlayConfig::default()
        });
        let next = s
            .handle_event(InputEvent::KeyPress {
                chord: KeyChord::alt_shift("G"),
            })
            .unwrap();
        assert!(next.no_color_diff);

        s.apply_config(next);
        assert_eq!(s.diff().variant(), Some(DiffVariant::Luminance));
    }

    #[test]
    fn malformed_raw_events_are_ignored() {
        let raw: RawEvent = serde_json::from_str(r#"{"type": "touchstart"}"#).unwrap();
        assert_eq!(raw.to_input(), None);

        let raw: RawEvent = serde_json::from_str(r#"{"type": "wheel", "x": 1, "y": 2}"#).unwrap();
        assert_eq!(raw.to_input(), None);

        let raw: RawEvent = serde_json::from_str(r#"{"type": "touchmove", "x": 10.6, "y": 2.2}"#).unwrap();
        assert_eq!(raw.to_input(), Some(motion(11, 2)));

        let mut s = session(true);
        assert_eq!(s.handle_raw(&RawEvent::default()), None);
    }
}
