use crate::geometry::{Measurement, Point};
use crate::present::Presenter;
use serde::Serialize;

/// Common viewport widths, widest first. Scale detection takes the first hit.
pub const SCALE_CANDIDATES: [u32; 10] = [1920, 1440, 1366, 1280, 1024, 768, 414, 390, 375, 360];

/// A measurement only qualifies for unscaling when it spans the viewport to
/// within this many pixels.
pub const VIEWPORT_MATCH_TOLERANCE: u32 = 5;

const MIN_SCALE: f64 = 1.1;
const MAX_SCALE: f64 = 3.0;
const QUARTER_STEP_TOLERANCE: f64 = 0.01;

const PROMPT_IDLE: &str = "Click to start measuring";
const PROMPT_STARTED: &str = "Click to set end point";
const PROMPT_FINISHED: &str = "Click to clear";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RulerState {
    Idle,
    Started { start: Point },
    Finished { start: Point, end: Point },
}

impl RulerState {
    pub fn name(&self) -> &'static str {
        match self {
            RulerState::Idle => "idle",
            RulerState::Started { .. } => "started",
            RulerState::Finished { .. } => "finished",
        }
    }
}

/// Size shown to the user. `scale` is set when the raw viewport-pixel size
/// was unscaled back to CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DisplaySize {
    pub width: u32,
    pub height: u32,
    pub raw_width: u32,
    pub raw_height: u32,
    pub scale: Option<f64>,
}

impl DisplaySize {
    pub fn label(&self) -> String {
        format!("{}px × {}px", self.width, self.height)
    }
}

/// Infers a zoom/device scale factor from a measurement that spans the whole
/// viewport. Returns the matching candidate width and the factor.
pub fn detect_scale(width: u32, viewport_width: u32) -> Option<(u32, f64)> {
    if width.abs_diff(viewport_width) >= VIEWPORT_MATCH_TOLERANCE {
        return None;
    }

    SCALE_CANDIDATES.iter().find_map(|&candidate| {
        let scale = f64::from(width) / f64::from(candidate);
        let quarter = (scale * 4.0).round() / 4.0;
        if scale > MIN_SCALE && scale < MAX_SCALE && (scale - quarter).abs() < QUARTER_STEP_TOLERANCE
        {
            Some((candidate, scale))
        } else {
            None
        }
    })
}

pub fn display_size(measurement: &Measurement, viewport_width: u32) -> DisplaySize {
    let raw_width = measurement.width;
    let raw_height = measurement.height;

    match detect_scale(raw_width, viewport_width) {
        Some((_, scale)) => DisplaySize {
            width: (f64::from(raw_width) / scale).round() as u32,
            height: (f64::from(raw_height) / scale).round() as u32,
            raw_width,
            raw_height,
            scale: Some(scale),
        },
        None => DisplaySize {
            width: raw_width,
            height: raw_height,
            raw_width,
            raw_height,
            scale: None,
        },
    }
}

/// Click-driven measuring tool: first click anchors, second click fixes the
/// end point, third click clears. Escape clears from anywhere.
pub struct RulerEngine<P: Presenter> {
    state: RulerState,
    active: bool,
    viewport_width: u32,
    viewport_height: u32,
    last_reading: Option<DisplaySize>,
    presenter: P,
}

impl<P: Presenter> RulerEngine<P> {
    pub fn new(presenter: P, viewport_width: u32, viewport_height: u32) -> Self {
        Self {
            state: RulerState::Idle,
            active: false,
            viewport_width,
            viewport_height,
            last_reading: None,
            presenter,
        }
    }

    pub fn state(&self) -> RulerState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn start_point(&self) -> Option<Point> {
        match self.state {
            RulerState::Idle => None,
            RulerState::Started { start } | RulerState::Finished { start, .. } => Some(start),
        }
    }

    pub fn end_point(&self) -> Option<Point> {
        match self.state {
            RulerState::Finished { end, .. } => Some(end),
            _ => None,
        }
    }

    /// Most recent size rendered, preview or final.
    pub fn last_reading(&self) -> Option<DisplaySize> {
        self.last_reading
    }

    pub fn viewport(&self) -> (u32, u32) {
        (self.viewport_width, self.viewport_height)
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport_width = width;
        self.viewport_height = height;
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    pub fn on_activate(&mut self) {
        self.active = true;
        self.reset();
        self.presenter.set_input_capture(true);
        self.presenter.set_label(PROMPT_IDLE);
        log::debug!(
            "ruler active over {}x{} viewport",
            self.viewport_width,
            self.viewport_height
        );
    }

    pub fn on_pointer_down(&mut self, point: Point) {
        match self.state {
            RulerState::Idle => {
                self.state = RulerState::Started { start: point };
                self.last_reading = None;
                self.presenter.hide_all();
                self.presenter.set_label(PROMPT_STARTED);
            }
            RulerState::Started { start } => {
                self.state = RulerState::Finished { start, end: point };
                self.render(start, point);
            }
            RulerState::Finished { .. } => {
                self.reset();
                self.presenter.set_label(PROMPT_IDLE);
            }
        }
    }

    pub fn on_pointer_move(&mut self, point: Point) {
        if let RulerState::Started { start } = self.state {
            self.render(start, point);
        }
    }

    pub fn on_escape(&mut self) {
        self.reset();
        if self.active {
            self.presenter.set_label(PROMPT_IDLE);
        }
    }

    pub fn on_deactivate(&mut self) {
        self.active = false;
        self.reset();
        self.presenter.set_input_capture(false);
        log::debug!("ruler released viewport");
    }

    fn reset(&mut self) {
        self.state = RulerState::Idle;
        self.last_reading = None;
        self.presenter.hide_all();
    }

    fn render(&mut self, start: Point, end: Point) {
        let measurement = Measurement::between(start, end);
        let size = display_size(&measurement, self.viewport_width);
        let prompt = match self.state {
            RulerState::Finished { .. } => PROMPT_FINISHED,
            _ => PROMPT_STARTED,
        };

        self.presenter.draw_rectangle(measurement.rect());
        self.presenter
            .set_label(&format!("{} — {}", size.label(), prompt));
        self.last_reading = Some(size);
    }
}
