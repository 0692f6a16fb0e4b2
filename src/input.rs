//! Input events at the toolkit boundary.
//!
//! The host toolkit translates its native events into these types and
//! feeds them to [`Canvas::handle_event`](crate::canvas::Canvas::handle_event).
//! Pointer positions are window pixels; `root` positions are screen pixels
//! and only matter for scroll drags, which track the pointer even after it
//! leaves the canvas window.

/// Pointer buttons, numbered the X11 way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Left,
    Middle,
    Right,
}

/// Modifier keys held during an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub ctrl: bool,
    pub shift: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        ctrl: false,
        shift: false,
    };

    pub fn any(&self) -> bool {
        self.ctrl || self.shift
    }
}

/// Keys the canvas itself reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Up,
    Down,
    Left,
    Right,
    Return,
}

/// Scroll wheel direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDelta {
    Up,
    Down,
}

/// A single input event in window coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    ButtonPress {
        button: Button,
        x: f64,
        y: f64,
        root_x: f64,
        root_y: f64,
        modifiers: Modifiers,
    },
    ButtonRelease {
        button: Button,
        x: f64,
        y: f64,
        root_x: f64,
        root_y: f64,
        modifiers: Modifiers,
    },
    Motion {
        x: f64,
        y: f64,
        root_x: f64,
        root_y: f64,
        modifiers: Modifiers,
    },
    /// Pointer entered the canvas window.
    Enter { x: f64, y: f64 },
    /// Pointer left the canvas window.
    Leave,
    KeyPress { key: Key, modifiers: Modifiers },
    Scroll {
        delta: ScrollDelta,
        x: f64,
        y: f64,
        modifiers: Modifiers,
    },
}

impl Event {
    /// Window-space pointer position, if this event carries one.
    pub fn position(&self) -> Option<(f64, f64)> {
        match *self {
            Event::ButtonPress { x, y, .. }
            | Event::ButtonRelease { x, y, .. }
            | Event::Motion { x, y, .. }
            | Event::Enter { x, y }
            | Event::Scroll { x, y, .. } => Some((x, y)),
            Event::Leave | Event::KeyPress { .. } => None,
        }
    }

    pub fn modifiers(&self) -> Modifiers {
        match *self {
            Event::ButtonPress { modifiers, .. }
            | Event::ButtonRelease { modifiers, .. }
            | Event::Motion { modifiers, .. }
            | Event::KeyPress { modifiers, .. }
            | Event::Scroll { modifiers, .. } => modifiers,
            Event::Enter { .. } | Event::Leave => Modifiers::NONE,
        }
    }
}

/// Convenience constructors used heavily by tests and simple hosts.
impl Event {
    pub fn press(button: Button, x: f64, y: f64) -> Event {
        Event::ButtonPress {
            button,
            x,
            y,
            root_x: x,
            root_y: y,
            modifiers: Modifiers::NONE,
        }
    }

    pub fn release(button: Button, x: f64, y: f64) -> Event {
        Event::ButtonRelease {
            button,
            x,
            y,
            root_x: x,
            root_y: y,
            modifiers: Modifiers::NONE,
        }
    }

    pub fn motion(x: f64, y: f64) -> Event {
        Event::Motion {
            x,
            y,
            root_x: x,
            root_y: y,
            modifiers: Modifiers::NONE,
        }
    }
}
