//! Connectable nodes: the payload carried by `ItemKind::Node`.
//!
//! A node is styling (fill/border/dash), an optional label, a handful of
//! interaction flags, and a shape. Shapes form a closed set: rectangular
//! boxes (plain, module, or port) and circles. Edge anchoring is
//! direction-aware; each shape knows where an edge should attach and in
//! which outward direction it should leave.

use crate::geometry::{Direction, Rect, DEFAULT_BORDER_COLOR, DEFAULT_FILL_COLOR};
use crate::item::{ItemArena, ItemId};
use crate::module::{ModuleData, PortData};
use crate::text::TextMeasure;

/// Padding between a label and its surrounding box edge.
pub const LABEL_PAD: f64 = 2.0;

/// Extra visual extent of a stacked box.
pub const STACKED_OFFSET: f64 = 4.0;

/// A measured label, positioned relative to its owning node.
#[derive(Debug, Clone)]
pub struct Label {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub visible: bool,
}

impl Label {
    pub fn new(text: &str, measure: &dyn TextMeasure, points: f64) -> Label {
        let (width, height) = measure.measure(text, points);
        Label {
            text: text.to_owned(),
            x: 0.0,
            y: 0.0,
            width,
            height,
            visible: true,
        }
    }

    /// Re-measures after a text or font-size change.
    pub fn remeasure(&mut self, measure: &dyn TextMeasure, points: f64) {
        let (w, h) = measure.measure(&self.text, points);
        self.width = w;
        self.height = h;
    }
}

/// Rectangular node geometry, relative to the item origin.
#[derive(Debug)]
pub struct BoxShape {
    /// Corner coordinates; kept normalized (`x1 <= x2`, `y1 <= y2`).
    pub rect: Rect,
    pub radius_tl: f64,
    pub radius_tr: f64,
    pub radius_br: f64,
    pub radius_bl: f64,
    pub stacked: bool,
    pub kind: BoxKind,
}

/// What a box is used as.
#[derive(Debug)]
pub enum BoxKind {
    Plain,
    Module(ModuleData),
    Port(PortData),
}

impl BoxShape {
    pub fn plain() -> BoxShape {
        BoxShape {
            rect: Rect::default(),
            radius_tl: 0.0,
            radius_tr: 0.0,
            radius_br: 0.0,
            radius_bl: 0.0,
            stacked: false,
            kind: BoxKind::Plain,
        }
    }

    pub fn width(&self) -> f64 {
        self.rect.width()
    }

    pub fn height(&self) -> f64 {
        self.rect.height()
    }

    pub fn set_width(&mut self, width: f64) {
        self.rect.x2 = self.rect.x1 + width;
    }

    pub fn set_height(&mut self, height: f64) {
        self.rect.y2 = self.rect.y1 + height;
    }
}

/// Circular node geometry, centered on the item origin.
#[derive(Debug, Clone)]
pub struct CircleShape {
    pub radius: f64,
    /// When > 0, the radius follows the canvas font size (`ems` × points).
    pub radius_ems: f64,
    /// Grow the radius to bound the label.
    pub fit_label: bool,
}

impl CircleShape {
    pub fn new(radius: f64) -> CircleShape {
        CircleShape {
            radius,
            radius_ems: 0.0,
            fit_label: false,
        }
    }
}

#[derive(Debug)]
pub enum NodeShape {
    Box(BoxShape),
    Circle(CircleShape),
}

/// Payload of a connectable item.
#[derive(Debug)]
pub struct NodeData {
    pub fill_color: u32,
    pub border_color: u32,
    pub border_width: f64,
    pub dash_length: f64,
    pub dash_offset: f64,
    pub label: Option<Label>,
    pub selected: bool,
    pub highlighted: bool,
    pub draggable: bool,
    pub can_tail: bool,
    pub can_head: bool,
    /// Layout alignment hint only, never connectivity.
    pub partner: Option<ItemId>,
    pub must_resize: bool,
    pub shape: NodeShape,
}

impl NodeData {
    fn new(shape: NodeShape) -> NodeData {
        NodeData {
            fill_color: DEFAULT_FILL_COLOR,
            border_color: DEFAULT_BORDER_COLOR,
            border_width: 2.0,
            dash_length: 0.0,
            dash_offset: 0.0,
            label: None,
            selected: false,
            highlighted: false,
            draggable: false,
            can_tail: false,
            can_head: false,
            partner: None,
            must_resize: false,
            shape,
        }
    }

    pub fn new_box() -> NodeData {
        NodeData::new(NodeShape::Box(BoxShape::plain()))
    }

    pub fn new_circle(radius: f64) -> NodeData {
        let mut node = NodeData::new(NodeShape::Circle(CircleShape::new(radius)));
        // Circles connect directly, without ports.
        node.can_tail = true;
        node.can_head = true;
        node.draggable = true;
        node
    }

    pub fn box_shape(&self) -> Option<&BoxShape> {
        match &self.shape {
            NodeShape::Box(b) => Some(b),
            _ => None,
        }
    }

    pub fn box_shape_mut(&mut self) -> Option<&mut BoxShape> {
        match &mut self.shape {
            NodeShape::Box(b) => Some(b),
            _ => None,
        }
    }

    pub fn module(&self) -> Option<&ModuleData> {
        match &self.shape {
            NodeShape::Box(BoxShape {
                kind: BoxKind::Module(m),
                ..
            }) => Some(m),
            _ => None,
        }
    }

    pub fn module_mut(&mut self) -> Option<&mut ModuleData> {
        match &mut self.shape {
            NodeShape::Box(BoxShape {
                kind: BoxKind::Module(m),
                ..
            }) => Some(m),
            _ => None,
        }
    }

    pub fn port(&self) -> Option<&PortData> {
        match &self.shape {
            NodeShape::Box(BoxShape {
                kind: BoxKind::Port(p),
                ..
            }) => Some(p),
            _ => None,
        }
    }

    pub fn port_mut(&mut self) -> Option<&mut PortData> {
        match &mut self.shape {
            NodeShape::Box(BoxShape {
                kind: BoxKind::Port(p),
                ..
            }) => Some(p),
            _ => None,
        }
    }

    pub fn is_port(&self) -> bool {
        self.port().is_some()
    }

    pub fn is_module(&self) -> bool {
        self.module().is_some()
    }

    /// Effective dash length, border color and fill color for drawing,
    /// folding in the selected and highlighted states.
    pub fn draw_properties(&self) -> (f64, u32, u32) {
        use crate::geometry::highlight_color;
        let mut dash_length = self.dash_length;
        let mut border_color = self.border_color;
        let mut fill_color = self.fill_color;
        if self.selected {
            dash_length = 4.0;
            border_color = highlight_color(self.border_color, 0x20);
        }
        if self.highlighted {
            fill_color = highlight_color(self.fill_color, 0x20);
            border_color = highlight_color(self.border_color, 0x20);
        }
        (dash_length, border_color, fill_color)
    }

    /// Bounding box relative to the item origin, including border width and
    /// the stacked offset.
    pub fn local_bounds(&self) -> Rect {
        match &self.shape {
            NodeShape::Box(b) => {
                let mut r = b.rect.normalized().inflate(self.border_width);
                if b.stacked {
                    r.x2 += STACKED_OFFSET;
                    r.y2 += STACKED_OFFSET;
                }
                r
            }
            NodeShape::Circle(c) => {
                let e = c.radius + self.border_width;
                Rect::new(-e, -e, e, e)
            }
        }
    }

    /// Distance from a point (in item-relative coordinates) to the node
    /// outline, 0.0 if inside.
    pub fn distance_to_point(&self, x: f64, y: f64) -> f64 {
        match &self.shape {
            NodeShape::Box(b) => b.rect.normalized().distance_to_point(x, y),
            NodeShape::Circle(c) => {
                let d = (x * x + y * y).sqrt();
                (d - (c.radius + self.border_width)).max(0.0)
            }
        }
    }

    /// Fits the node to its label. Idempotent while the label size is
    /// unchanged. Modules and ports are laid out in `module` instead.
    pub fn fit_to_label(&mut self) {
        let (label_w, label_h) = match &self.label {
            Some(l) if l.visible => (l.width, l.height),
            _ => return,
        };
        match &mut self.shape {
            NodeShape::Box(b) => {
                if matches!(b.kind, BoxKind::Plain) {
                    b.set_width(label_w + 2.0 * LABEL_PAD);
                    b.set_height(label_h + 2.0 * LABEL_PAD);
                }
            }
            NodeShape::Circle(c) => {
                if c.fit_label {
                    let fit = (label_w * label_w + label_h * label_h).sqrt() / 2.0 + LABEL_PAD;
                    c.radius = c.radius.max(fit);
                }
            }
        }
        if let Some(label) = &mut self.label {
            match &self.shape {
                NodeShape::Box(b) => {
                    label.x = (b.width() - label.width) / 2.0;
                    label.y = (b.height() - label.height) / 2.0;
                }
                NodeShape::Circle(_) => {
                    label.x = -label.width / 2.0;
                    label.y = -label.height / 2.0;
                }
            }
        }
    }

    /// True if the node's extent lies fully inside a world rectangle
    /// (circles test only their center, like the original rubber-band
    /// behavior).
    pub fn is_within(&self, world_x: f64, world_y: f64, rect: &Rect) -> bool {
        match &self.shape {
            NodeShape::Box(b) => {
                let r = b.rect.normalized().translate(world_x, world_y);
                rect.contains_rect(&r)
            }
            NodeShape::Circle(_) => rect.contains_point(world_x, world_y),
        }
    }
}

/// Where an edge attaches to a node: a world-space point and an outward
/// unit direction used to bend the curve away from the node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeAnchor {
    pub x: f64,
    pub y: f64,
    pub dx: f64,
    pub dy: f64,
}

/// Anchor for an edge leaving `id` toward `head`.
pub fn tail_anchor(arena: &ItemArena, id: ItemId, head: ItemId, direction: Direction) -> EdgeAnchor {
    let (wx, wy) = arena.item_to_world(id);
    let node = match arena.get(id).and_then(|i| i.node()) {
        Some(n) => n,
        None => return EdgeAnchor { x: wx, y: wy, dx: 1.0, dy: 0.0 },
    };
    let _ = head;
    match &node.shape {
        NodeShape::Box(b) if node.is_port() => {
            let (w, h) = (b.width(), b.height());
            match direction {
                Direction::Right => EdgeAnchor {
                    x: wx + w,
                    y: wy + h / 2.0,
                    dx: 1.0,
                    dy: 0.0,
                },
                Direction::Down => EdgeAnchor {
                    x: wx + w / 2.0,
                    y: wy + h,
                    dx: 0.0,
                    dy: 1.0,
                },
            }
        }
        NodeShape::Circle(_) => EdgeAnchor {
            x: wx,
            y: wy,
            dx: 0.0,
            dy: 0.0,
        },
        _ => EdgeAnchor {
            x: wx,
            y: wy,
            dx: 1.0,
            dy: 0.0,
        },
    }
}

/// Anchor for an edge arriving at `id` from `tail`.
pub fn head_anchor(arena: &ItemArena, id: ItemId, tail: ItemId, direction: Direction) -> EdgeAnchor {
    let (wx, wy) = arena.item_to_world(id);
    let node = match arena.get(id).and_then(|i| i.node()) {
        Some(n) => n,
        None => return EdgeAnchor { x: wx, y: wy, dx: -1.0, dy: 0.0 },
    };
    match &node.shape {
        NodeShape::Box(b) if node.is_port() => {
            let (w, h) = (b.width(), b.height());
            match direction {
                Direction::Right => EdgeAnchor {
                    x: wx,
                    y: wy + h / 2.0,
                    dx: -1.0,
                    dy: 0.0,
                },
                Direction::Down => EdgeAnchor {
                    x: wx + w / 2.0,
                    y: wy,
                    dx: 0.0,
                    dy: -1.0,
                },
            }
        }
        NodeShape::Circle(c) => {
            // Project onto the circle boundary along the line toward the
            // tail's center.
            let (tx, ty) = arena.item_to_world(tail);
            let xdist = tx - wx;
            let ydist = ty - wy;
            let h = (xdist * xdist + ydist * ydist).sqrt();
            let theta = (xdist / (h + f64::EPSILON)).asin();
            let y_mod = if wy < ty { 1.0 } else { -1.0 };
            let ret_h = h - c.radius;
            EdgeAnchor {
                x: tx - theta.sin() * ret_h,
                y: ty - theta.cos() * ret_h * y_mod,
                dx: 0.0,
                dy: 0.0,
            }
        }
        _ => EdgeAnchor {
            x: wx,
            y: wy,
            dx: -1.0,
            dy: 0.0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Item, ItemKind};
    use crate::text::FixedMetrics;
    use proptest::prelude::*;

    // ============================================================
    // Box geometry
    // ============================================================

    #[test]
    fn test_box_set_width_height() {
        let mut b = BoxShape::plain();
        b.rect = Rect::new(10.0, 10.0, 10.0, 10.0);
        b.set_width(30.0);
        b.set_height(20.0);
        assert_eq!(b.rect, Rect::new(10.0, 10.0, 40.0, 30.0));
    }

    proptest! {
        #[test]
        fn test_box_bounds_always_normalized(
            x1 in -1e6f64..1e6, y1 in -1e6f64..1e6,
            x2 in -1e6f64..1e6, y2 in -1e6f64..1e6,
            w in 0.0f64..16.0,
        ) {
            let mut node = NodeData::new_box();
            node.border_width = w;
            let b = node.box_shape_mut().unwrap();
            b.rect = Rect::new(x1, y1, x2, y2);
            let r = node.local_bounds();
            prop_assert!(r.x1 <= r.x2);
            prop_assert!(r.y1 <= r.y2);
        }
    }

    #[test]
    fn test_stacked_box_bounds_include_offset() {
        let mut node = NodeData::new_box();
        node.border_width = 0.0;
        let b = node.box_shape_mut().unwrap();
        b.rect = Rect::new(0.0, 0.0, 10.0, 10.0);
        b.stacked = true;
        let r = node.local_bounds();
        assert_eq!(r, Rect::new(0.0, 0.0, 14.0, 14.0));
    }

    // ============================================================
    // Labels and resizing
    // ============================================================

    #[test]
    fn test_box_fits_label_and_is_idempotent() {
        let metrics = FixedMetrics::default();
        let mut node = NodeData::new_box();
        node.label = Some(Label::new("oscillator", &metrics, 12.0));
        let (lw, lh) = metrics.measure("oscillator", 12.0);

        node.fit_to_label();
        let b = node.box_shape().unwrap();
        assert!(b.width() >= lw + 2.0 * LABEL_PAD);
        assert!(b.height() >= lh + 2.0 * LABEL_PAD);

        let before = b.rect;
        node.fit_to_label();
        assert_eq!(node.box_shape().unwrap().rect, before);
    }

    #[test]
    fn test_circle_radius_grows_to_fit_label() {
        let metrics = FixedMetrics::default();
        let mut node = NodeData::new_circle(8.0);
        if let NodeShape::Circle(c) = &mut node.shape {
            c.fit_label = true;
        }
        node.label = Some(Label::new("feedback", &metrics, 12.0));
        node.fit_to_label();
        let (lw, lh) = metrics.measure("feedback", 12.0);
        let needed = (lw * lw + lh * lh).sqrt() / 2.0;
        if let NodeShape::Circle(c) = &node.shape {
            assert!(c.radius >= needed);
        } else {
            unreachable!();
        }
    }

    // ============================================================
    // Draw properties
    // ============================================================

    #[test]
    fn test_selected_node_draws_dashed_highlight_border() {
        let mut node = NodeData::new_box();
        node.selected = true;
        let (dash, border, fill) = node.draw_properties();
        assert_eq!(dash, 4.0);
        assert_eq!(border, crate::geometry::highlight_color(node.border_color, 0x20));
        assert_eq!(fill, node.fill_color);
    }

    #[test]
    fn test_highlighted_node_brightens_fill() {
        let mut node = NodeData::new_box();
        node.highlighted = true;
        let (dash, _, fill) = node.draw_properties();
        assert_eq!(dash, 0.0);
        assert_eq!(fill, crate::geometry::highlight_color(node.fill_color, 0x20));
    }

    // ============================================================
    // Edge anchors
    // ============================================================

    fn arena_with(nodes: Vec<NodeData>) -> (ItemArena, Vec<ItemId>) {
        let mut arena = ItemArena::new();
        let ids = nodes
            .into_iter()
            .map(|n| arena.insert(Item::new(ItemKind::Node(n))))
            .collect();
        (arena, ids)
    }

    #[test]
    fn test_circle_head_anchor_sits_on_boundary() {
        let mut head = NodeData::new_circle(10.0);
        head.border_width = 0.0;
        let tail = NodeData::new_circle(5.0);
        let (mut arena, ids) = arena_with(vec![head, tail]);
        arena.get_mut(ids[1]).unwrap().x = 100.0;
        arena.get_mut(ids[1]).unwrap().y = 0.0;

        let a = head_anchor(&arena, ids[0], ids[1], Direction::Right);
        let d = (a.x * a.x + a.y * a.y).sqrt();
        assert!((d - 10.0).abs() < 1e-6, "anchor at distance {d}");
        // On the side facing the tail.
        assert!(a.x > 0.0);
    }

    #[test]
    fn test_circle_tail_anchor_is_center() {
        let c = NodeData::new_circle(10.0);
        let other = NodeData::new_circle(5.0);
        let (mut arena, ids) = arena_with(vec![c, other]);
        arena.get_mut(ids[0]).unwrap().x = 30.0;
        arena.get_mut(ids[0]).unwrap().y = 40.0;
        let a = tail_anchor(&arena, ids[0], ids[1], Direction::Right);
        assert_eq!((a.x, a.y), (30.0, 40.0));
        assert_eq!((a.dx, a.dy), (0.0, 0.0));
    }
}
