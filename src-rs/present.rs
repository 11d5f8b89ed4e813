use crate::geometry::{Point, Rect};
use serde::Serialize;

/// Drawing surface the engines render into. Styling and DOM/window specifics
/// live entirely on the other side of this trait.
pub trait Presenter {
    fn draw_rectangle(&mut self, rect: Rect);
    fn set_label(&mut self, text: &str);
    fn hide_all(&mut self);
    /// Full-viewport pointer capture so the host page stops receiving events.
    fn set_input_capture(&mut self, captured: bool);
    fn show_tooltip(&mut self, at: Point, text: &str);
    fn hide_tooltip(&mut self);
    /// Re-applies diff highlight styling after a refresh tick.
    fn refresh_diff_styling(&mut self);
}

/// In-memory sink that keeps whatever is currently on screen.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordingPresenter {
    pub rectangle: Option<Rect>,
    pub label: Option<String>,
    pub input_captured: bool,
    pub tooltip: Option<(Point, String)>,
    pub styling_refreshes: u64,
}

impl RecordingPresenter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Presenter for RecordingPresenter {
    fn draw_rectangle(&mut self, rect: Rect) {
        self.rectangle = Some(rect);
    }

    fn set_label(&mut self, text: &str) {
        self.label = Some(text.to_string());
    }

    fn hide_all(&mut self) {
        self.rectangle = None;
        self.label = None;
        self.tooltip = None;
    }

    fn set_input_capture(&mut self, captured: bool) {
        self.input_captured = captured;
    }

    fn show_tooltip(&mut self, at: Point, text: &str) {
        // offset so the tooltip does not sit under the cursor
        let pos = Point::new(at.x + 10, at.y - 30);
        self.tooltip = Some((pos, text.to_string()));
    }

    fn hide_tooltip(&mut self) {
        self.tooltip = None;
    }

    fn refresh_diff_styling(&mut self) {
        self.styling_refreshes += 1;
    }
}
