//! Geometric primitives shared across the canvas.
//!
//! Items use world coordinates (f64, y down). The [`Viewport`] maps world
//! coordinates to window pixels; items themselves carry only translations,
//! so scaling happens in exactly one place.

/// Signal-flow direction of a canvas.
///
/// Determines where ports sit on their module and where edges anchor onto
/// nodes: `Right` flows input-left / output-right, `Down` flows
/// input-top / output-bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Right,
    Down,
}

/// An axis-aligned rectangle in world coordinates.
///
/// Most canvas code keeps rectangles normalized (`x1 <= x2`, `y1 <= y2`);
/// mutations that can invert the corners call [`Rect::normalize`] before
/// the rectangle is observed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl Rect {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Rect { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    /// Swaps corners as needed so `x1 <= x2` and `y1 <= y2`.
    pub fn normalize(&mut self) {
        if self.x1 > self.x2 {
            std::mem::swap(&mut self.x1, &mut self.x2);
        }
        if self.y1 > self.y2 {
            std::mem::swap(&mut self.y1, &mut self.y2);
        }
    }

    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.x1 && x <= self.x2 && y >= self.y1 && y <= self.y2
    }

    /// True if `other` lies entirely inside this rectangle.
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.x1 >= self.x1 && other.y1 >= self.y1 && other.x2 <= self.x2 && other.y2 <= self.y2
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x1 <= other.x2 && other.x1 <= self.x2 && self.y1 <= other.y2 && other.y1 <= self.y2
    }

    /// Smallest rectangle covering both.
    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }

    /// Grows the rectangle by `pad` on every side.
    pub fn inflate(&self, pad: f64) -> Rect {
        Rect {
            x1: self.x1 - pad,
            y1: self.y1 - pad,
            x2: self.x2 + pad,
            y2: self.y2 + pad,
        }
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Rect {
        Rect {
            x1: self.x1 + dx,
            y1: self.y1 + dy,
            x2: self.x2 + dx,
            y2: self.y2 + dy,
        }
    }

    /// Distance from a point to the rectangle, 0.0 if inside.
    pub fn distance_to_point(&self, x: f64, y: f64) -> f64 {
        let dx = if x < self.x1 {
            self.x1 - x
        } else if x > self.x2 {
            x - self.x2
        } else {
            0.0
        };
        let dy = if y < self.y1 {
            self.y1 - y
        } else if y > self.y2 {
            y - self.y2
        } else {
            0.0
        };
        (dx * dx + dy * dy).sqrt()
    }
}

/// World-to-window mapping: scroll offset plus uniform zoom.
///
/// `zoom` is in pixels per world unit. Window coordinates are pixels with
/// the viewport origin at the top-left of the visible area.
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub zoom: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport {
            scroll_x: 0.0,
            scroll_y: 0.0,
            zoom: 1.0,
            width: 800.0,
            height: 600.0,
        }
    }
}

impl Viewport {
    pub fn window_to_world(&self, wx: f64, wy: f64) -> (f64, f64) {
        (
            self.scroll_x + wx / self.zoom,
            self.scroll_y + wy / self.zoom,
        )
    }

    pub fn world_to_window(&self, x: f64, y: f64) -> (f64, f64) {
        ((x - self.scroll_x) * self.zoom, (y - self.scroll_y) * self.zoom)
    }

    /// The visible region in world coordinates.
    pub fn visible_rect(&self) -> Rect {
        let (x1, y1) = self.window_to_world(0.0, 0.0);
        let (x2, y2) = self.window_to_world(self.width, self.height);
        Rect::new(x1, y1, x2, y2)
    }

    /// Maps a world rectangle to window pixels.
    pub fn world_rect_to_window(&self, r: &Rect) -> Rect {
        let (x1, y1) = self.world_to_window(r.x1, r.y1);
        let (x2, y2) = self.world_to_window(r.x2, r.y2);
        Rect::new(x1, y1, x2, y2)
    }
}

pub const DEFAULT_TEXT_COLOR: u32 = 0xFFFF_FFFF;
pub const DEFAULT_FILL_COLOR: u32 = 0x1E22_24FF;
pub const DEFAULT_BORDER_COLOR: u32 = 0x3E42_44FF;

/// Additively brightens the RGB channels of a packed RGBA color, leaving
/// alpha untouched.
pub fn highlight_color(c: u32, delta: u8) -> u32 {
    let r = ((c >> 24) & 0xFF).saturating_add(delta as u32).min(0xFF);
    let g = ((c >> 16) & 0xFF).saturating_add(delta as u32).min(0xFF);
    let b = ((c >> 8) & 0xFF).saturating_add(delta as u32).min(0xFF);
    let a = c & 0xFF;
    (r << 24) | (g << 16) | (b << 8) | a
}

/// Unpacks a packed RGBA color into 0..1 components.
pub fn color_to_rgba(c: u32) -> (f64, f64, f64, f64) {
    (
        ((c >> 24) & 0xFF) as f64 / 255.0,
        ((c >> 16) & 0xFF) as f64 / 255.0,
        ((c >> 8) & 0xFF) as f64 / 255.0,
        (c & 0xFF) as f64 / 255.0,
    )
}
