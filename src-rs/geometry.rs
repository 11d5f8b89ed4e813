use serde::{Deserialize, Serialize};

/// Viewport coordinate as reported by the input layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Axis-aligned span between two points. Never negative; zero when both
/// points coincide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Measurement {
    pub width: u32,
    pub height: u32,
    pub origin_left: i32,
    pub origin_top: i32,
}

impl Measurement {
    pub fn between(a: Point, b: Point) -> Self {
        Self {
            width: a.x.abs_diff(b.x),
            height: a.y.abs_diff(b.y),
            origin_left: a.x.min(b.x),
            origin_top: a.y.min(b.y),
        }
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.origin_left, self.origin_top, self.width, self.height)
    }
}
