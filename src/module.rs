//! Module and port layout.
//!
//! A module is a box owning an ordered list of port children and sized to
//! fit them plus its own title. Layout depends on the canvas flow
//! direction: flowing right, inputs stack down the left edge and outputs
//! down the right edge, label-fit width; flowing down, inputs line the top
//! edge and outputs the bottom edge at a fixed breadth derived from the
//! font size. Relayout is idempotent and runs from the update pass whenever
//! a port is added or removed, a label size changes, or the direction
//! flips.

use tracing::trace;

use crate::geometry::Direction;
use crate::item::{ItemArena, ItemId};
use crate::node::NodeData;

/// Inner padding used throughout module layout.
pub const MODULE_PAD: f64 = 2.0;
/// Horizontal padding around a port label.
pub const PORT_LABEL_HPAD: f64 = 4.0;
/// Vertical padding around a port label.
pub const PORT_LABEL_VPAD: f64 = 1.0;

/// State of a module box: its ports and cached layout metrics.
#[derive(Debug, Default)]
pub struct ModuleData {
    /// Ports in display order (insertion order unless re-sorted by the
    /// canvas's port comparator).
    pub ports: Vec<ItemId>,
    /// Cached widest natural width over the input ports.
    pub widest_input: f64,
    /// Cached widest natural width over the output ports.
    pub widest_output: f64,
    pub show_port_labels: bool,
}

impl ModuleData {
    pub fn new() -> ModuleData {
        ModuleData {
            show_port_labels: true,
            ..ModuleData::default()
        }
    }
}

/// An interactive control displayed as a fill bar inside a port.
#[derive(Debug, Clone)]
pub struct PortControl {
    pub value: f32,
    pub min: f32,
    pub max: f32,
    pub is_toggle: bool,
    pub is_integer: bool,
    /// Width of the value indicator, derived from value and port width.
    pub fill_width: f64,
}

impl Default for PortControl {
    fn default() -> Self {
        PortControl {
            value: 0.0,
            min: 0.0,
            max: 0.0,
            is_toggle: false,
            is_integer: false,
            fill_width: 0.0,
        }
    }
}

/// State of a port box.
#[derive(Debug, Default)]
pub struct PortData {
    /// Fixed at construction; derives the node's can_head/can_tail.
    pub is_input: bool,
    pub control: Option<PortControl>,
}

/// A fresh port box. Connection capability follows direction: outputs can
/// tail an edge, inputs can head one.
pub fn new_port(is_input: bool) -> NodeData {
    let mut node = NodeData::new_box();
    node.border_width = 1.0;
    node.can_tail = !is_input;
    node.can_head = is_input;
    if let Some(b) = node.box_shape_mut() {
        b.kind = crate::node::BoxKind::Port(PortData {
            is_input,
            control: None,
        });
    }
    node
}

/// Port height and the fixed cross-direction port size, both derived from
/// the canvas font size.
pub fn empty_port_depth(font_size: f64) -> f64 {
    font_size
}

pub fn empty_port_breadth(font_size: f64) -> f64 {
    empty_port_depth(font_size) * 2.0
}

/// The width a port wants for itself before the module stretches it.
pub fn port_natural_width(port: &NodeData, direction: Direction, font_size: f64) -> f64 {
    if direction == Direction::Down {
        return empty_port_breadth(font_size);
    }
    match &port.label {
        Some(l) if l.visible => l.width + PORT_LABEL_HPAD * 2.0,
        _ => empty_port_depth(font_size),
    }
}

/// Applies direction-dependent port styling: outward corners rounded,
/// labels shown only in the horizontal flow.
pub fn set_port_direction(port: &mut NodeData, direction: Direction) {
    let is_input = port.port().map_or(true, |p| p.is_input);
    if let Some(b) = port.box_shape_mut() {
        let r = 4.0;
        match direction {
            Direction::Right => {
                b.radius_tl = if is_input { 0.0 } else { r };
                b.radius_tr = if is_input { r } else { 0.0 };
                b.radius_br = if is_input { r } else { 0.0 };
                b.radius_bl = if is_input { 0.0 } else { r };
            }
            Direction::Down => {
                b.radius_tl = if is_input { 0.0 } else { r };
                b.radius_tr = if is_input { 0.0 } else { r };
                b.radius_br = if is_input { r } else { 0.0 };
                b.radius_bl = if is_input { r } else { 0.0 };
            }
        }
    }
    if let Some(l) = &mut port.label {
        l.visible = direction == Direction::Right;
    }
    resize_port(port);
    port.must_resize = true;
}

/// Fits a port box to its label, keeping the label inset by the port pads.
pub fn resize_port(port: &mut NodeData) {
    let (lw, lh, visible) = match &port.label {
        Some(l) => (l.width, l.height, l.visible),
        None => return,
    };
    if !visible {
        return;
    }
    if let Some(b) = port.box_shape_mut() {
        b.set_width(lw + PORT_LABEL_HPAD * 2.0);
        b.set_height(lh + PORT_LABEL_VPAD * 2.0);
    }
    if let Some(l) = &mut port.label {
        l.x = PORT_LABEL_HPAD;
        l.y = PORT_LABEL_VPAD;
    }
}

/// Sets a control value with toggle snapping, integer rounding, min/max
/// widening and clamping, then recomputes the indicator width from the
/// port's current box width.
///
/// Returns `Some(applied_value)` when the stored value actually changed so
/// the canvas can emit a value-changed notification.
pub fn set_control_value(port: &mut NodeData, value: f32) -> Option<f32> {
    let box_width = port.box_shape().map(|b| b.width()).unwrap_or(0.0);
    let control = port.port_mut()?.control.as_mut()?;

    let mut value = value;
    if control.is_toggle {
        value = if value != 0.0 { control.max } else { control.min };
    }
    if control.is_integer {
        value = value.round();
    }

    if value < control.min {
        control.min = value;
    }
    if value > control.max {
        control.max = value;
    }
    if control.max == control.min {
        control.max = control.min + 1.0;
    }

    if value.is_infinite() {
        value = if value < 0.0 { control.min } else { control.max };
    }

    let w = (value - control.min) as f64 / (control.max - control.min) as f64 * box_width;
    if w.is_nan() {
        return None;
    }
    control.fill_width = (w - 1.0).max(0.0);

    let changed = control.value != value;
    control.value = value;
    changed.then_some(value)
}

/// Recomputes the cached widest-input/widest-output metrics from the
/// ports' natural widths. Called after any port add/remove or label
/// change.
pub fn measure_ports(
    arena: &ItemArena,
    module: &mut ModuleData,
    direction: Direction,
    font_size: f64,
) {
    module.widest_input = 0.0;
    module.widest_output = 0.0;
    for &pid in &module.ports {
        let node = match arena.get(pid).and_then(|i| i.node()) {
            Some(n) => n,
            None => continue,
        };
        let w = port_natural_width(node, direction, font_size);
        if node.port().map_or(false, |p| p.is_input) {
            module.widest_input = module.widest_input.max(w);
        } else {
            module.widest_output = module.widest_output.max(w);
        }
    }
}

struct Metrics {
    width: f64,
    input_width: f64,
    output_width: f64,
    horiz: bool,
}

fn measure(
    module: &ModuleData,
    title: Option<(f64, f64)>,
    direction: Direction,
    font_size: f64,
) -> Metrics {
    if direction == Direction::Down {
        let mut contents_width = MODULE_PAD;
        if let Some((tw, _)) = title {
            contents_width += tw;
        }
        let breadth = empty_port_breadth(font_size);
        let ports_width = MODULE_PAD + (breadth + MODULE_PAD) * module.ports.len() as f64;
        return Metrics {
            width: contents_width.max(ports_width),
            input_width: breadth,
            output_width: breadth,
            horiz: false,
        };
    }

    // Space between a port's inner edge and the module edge.
    let hor_pad = if title.is_some() { 10.0 } else { 20.0 };

    let mut width = match title {
        Some((tw, _)) => tw + 10.0,
        None => 1.0,
    };

    // Wide title: inputs and outputs fit beside each other.
    let horiz = module.widest_input + module.widest_output + 10.0 < width;

    let mut input_width = module.widest_input;
    let mut output_width = module.widest_output;
    let expand_w = (if horiz { width / 2.0 } else { width }) - hor_pad;
    if module.show_port_labels {
        input_width = input_width.max(expand_w);
        output_width = output_width.max(expand_w);
    }

    let widest = input_width.max(output_width);

    if title.is_none() && (module.widest_input == 0.0 || module.widest_output == 0.0) {
        width += 10.0;
    }

    width += 4.0;
    width = width.max(widest + hor_pad);

    Metrics {
        width,
        input_width,
        output_width,
        horiz,
    }
}

/// Full module relayout: recomputes port metrics, sizes the module box,
/// and places every port.
///
/// Returns the ports whose position or size changed so the canvas can
/// refresh their incident edges.
pub fn layout_module(
    arena: &mut ItemArena,
    module_id: ItemId,
    direction: Direction,
    font_size: f64,
) -> Vec<ItemId> {
    let (ports, title) = match arena.get(module_id).and_then(|i| i.node()) {
        Some(n) => {
            let module = match n.module() {
                Some(m) => m,
                None => return Vec::new(),
            };
            let title = n
                .label
                .as_ref()
                .filter(|l| l.visible)
                .map(|l| (l.width, l.height));
            (module.ports.clone(), title)
        }
        None => return Vec::new(),
    };

    // Refresh cached widest metrics before measuring.
    {
        let mut module = match arena
            .get_mut(module_id)
            .and_then(|i| i.node_mut())
            .and_then(|n| n.module_mut())
            .map(std::mem::take)
        {
            Some(m) => m,
            None => return Vec::new(),
        };
        measure_ports(arena, &mut module, direction, font_size);
        if let Some(slot) = arena
            .get_mut(module_id)
            .and_then(|i| i.node_mut())
            .and_then(|n| n.module_mut())
        {
            *slot = module;
        }
    }

    let module_data = arena
        .get(module_id)
        .and_then(|i| i.node())
        .and_then(|n| n.module())
        .expect("module checked above");
    let m = measure(module_data, title, direction, font_size);

    trace!(
        width = m.width,
        input_width = m.input_width,
        output_width = m.output_width,
        horiz = m.horiz,
        "module layout"
    );

    let mut moved = Vec::with_capacity(ports.len());
    let (module_width, module_height) = match direction {
        Direction::Right => layout_right(arena, &ports, &m, title, &mut moved),
        Direction::Down => layout_down(arena, &ports, &m, title, font_size, &mut moved),
    };

    if let Some(node) = arena.get_mut(module_id).and_then(|i| i.node_mut()) {
        if let Some(b) = node.box_shape_mut() {
            b.set_width(module_width);
            b.set_height(module_height);
        }
        // Center the title along the top edge.
        if let Some(label) = node.label.as_mut().filter(|l| l.visible) {
            label.x = (module_width - label.width) / 2.0;
            label.y = match direction {
                Direction::Right => 0.0,
                Direction::Down => empty_port_depth(font_size) + 2.0,
            };
        }
        node.must_resize = false;
    }
    moved
}

fn layout_right(
    arena: &mut ItemArena,
    ports: &[ItemId],
    m: &Metrics,
    title: Option<(f64, f64)>,
    moved: &mut Vec<ItemId>,
) -> (f64, f64) {
    let title_h = title.map_or(0.0, |(_, th)| th);
    let header_height = 2.0 + title_h;

    let mut i = 0u32;
    let mut last_was_input = false;
    let mut y = 0.0;
    let mut h = 0.0;
    for &pid in ports {
        let node = match arena.get_mut(pid).and_then(|it| it.node_mut()) {
            Some(n) => n,
            None => continue,
        };
        let is_input = node.port().map_or(false, |p| p.is_input);
        h = node.box_shape().map_or(0.0, |b| b.height());
        let (x, width) = if is_input {
            y = header_height + 2.0 + (i as f64 * (h + 2.0));
            i += 1;
            last_was_input = true;
            (0.0, m.input_width)
        } else {
            // Pair an output with the input on the same row when the
            // module is wide enough.
            if !m.horiz || !last_was_input {
                y = header_height + 2.0 + (i as f64 * (h + 2.0));
                i += 1;
            }
            last_was_input = false;
            (m.width - m.output_width, m.output_width)
        };
        let item = arena.get_mut(pid).unwrap();
        if item.x != x || item.y != y {
            moved.push(pid);
        }
        item.x = x;
        item.y = y;
        if let Some(n) = item.node_mut() {
            if let Some(b) = n.box_shape_mut() {
                b.set_width(width);
            }
            // The stretched width is authoritative; only a label change
            // re-fits a port.
            n.must_resize = false;
        }
    }

    if ports.is_empty() {
        h += header_height;
    }
    (m.width, y + h + 4.0)
}

fn layout_down(
    arena: &mut ItemArena,
    ports: &[ItemId],
    m: &Metrics,
    title: Option<(f64, f64)>,
    font_size: f64,
    moved: &mut Vec<ItemId>,
) -> (f64, f64) {
    let title_h = title.map_or(0.0, |(_, th)| th);
    let port_depth = empty_port_depth(font_size);
    let port_breadth = empty_port_breadth(font_size);
    let height = MODULE_PAD + title_h + port_depth * 2.0;

    let mut i = 0u32;
    let mut last_was_input = false;
    let mut x = 0.0;
    for &pid in ports {
        let node = match arena.get_mut(pid).and_then(|it| it.node_mut()) {
            Some(n) => n,
            None => continue,
        };
        let is_input = node.port().map_or(false, |p| p.is_input);
        if let Some(b) = node.box_shape_mut() {
            b.set_width(port_breadth);
            b.set_height(port_depth);
        }
        node.must_resize = false;
        let y = if is_input {
            x = MODULE_PAD + (i as f64 * (port_breadth + MODULE_PAD));
            i += 1;
            last_was_input = true;
            0.0
        } else {
            if !last_was_input {
                x = MODULE_PAD + (i as f64 * (port_breadth + MODULE_PAD));
                i += 1;
            }
            last_was_input = false;
            height - port_depth
        };
        let item = arena.get_mut(pid).unwrap();
        if item.x != x || item.y != y {
            moved.push(pid);
        }
        item.x = x;
        item.y = y;
    }
    (m.width, height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Item, ItemKind};
    use crate::node::{BoxKind, Label, NodeData};
    use crate::text::{FixedMetrics, TextMeasure};

    const FONT: f64 = 12.0;

    fn make_module(arena: &mut ItemArena, title: &str) -> ItemId {
        let mut node = NodeData::new_box();
        node.draggable = true;
        if !title.is_empty() {
            node.label = Some(Label::new(title, &FixedMetrics::default(), FONT));
        }
        node.box_shape_mut().unwrap().kind = BoxKind::Module(ModuleData::new());
        arena.insert(Item::new(ItemKind::Node(node)))
    }

    fn make_port(arena: &mut ItemArena, module: ItemId, label: &str, is_input: bool) -> ItemId {
        let mut node = new_port(is_input);
        node.label = Some(Label::new(label, &FixedMetrics::default(), FONT));
        set_port_direction(&mut node, Direction::Right);
        let id = arena.insert(Item::new(ItemKind::Node(node)));
        arena
            .get_mut(module)
            .unwrap()
            .node_mut()
            .unwrap()
            .module_mut()
            .unwrap()
            .ports
            .push(id);
        id
    }

    fn box_rect(arena: &ItemArena, id: ItemId) -> crate::geometry::Rect {
        arena
            .get(id)
            .unwrap()
            .node()
            .unwrap()
            .box_shape()
            .unwrap()
            .rect
    }

    // ============================================================
    // Port sizing
    // ============================================================

    #[test]
    fn test_port_natural_width_follows_label_when_flowing_right() {
        let metrics = FixedMetrics::default();
        let mut node = NodeData::new_box();
        node.box_shape_mut().unwrap().kind = BoxKind::Port(PortData::default());
        node.label = Some(Label::new("freq", &metrics, FONT));
        let (lw, _) = metrics.measure("freq", FONT);

        let w = port_natural_width(&node, Direction::Right, FONT);
        assert_eq!(w, lw + 2.0 * PORT_LABEL_HPAD);

        // Flowing down, ports are fixed-breadth regardless of label.
        let w = port_natural_width(&node, Direction::Down, FONT);
        assert_eq!(w, empty_port_breadth(FONT));
    }

    #[test]
    fn test_empty_port_sizes_derive_from_font() {
        assert_eq!(empty_port_depth(10.0), 10.0);
        assert_eq!(empty_port_breadth(10.0), 20.0);
    }

    // ============================================================
    // Module layout, flow right
    // ============================================================

    #[test]
    fn test_layout_stacks_inputs_left_outputs_right() {
        let mut arena = ItemArena::new();
        let module = make_module(&mut arena, "mixer");
        let in1 = make_port(&mut arena, module, "in 1", true);
        let in2 = make_port(&mut arena, module, "in 2", true);
        let out = make_port(&mut arena, module, "out", false);

        layout_module(&mut arena, module, Direction::Right, FONT);

        let mw = box_rect(&arena, module).width();
        let i1 = arena.get(in1).unwrap();
        let i2 = arena.get(in2).unwrap();
        let o = arena.get(out).unwrap();

        assert_eq!(i1.x, 0.0);
        assert_eq!(i2.x, 0.0);
        assert!(i2.y > i1.y);
        // Output column hugs the right edge.
        let out_w = box_rect(&arena, out).width();
        assert_eq!(o.x, mw - out_w);
        // Module is wide enough for the widest port plus padding.
        let widest = box_rect(&arena, in1)
            .width()
            .max(box_rect(&arena, in2).width());
        assert!(mw >= widest);
    }

    #[test]
    fn test_layout_is_idempotent() {
        let mut arena = ItemArena::new();
        let module = make_module(&mut arena, "osc");
        let a = make_port(&mut arena, module, "freq", true);
        let b = make_port(&mut arena, module, "sine", false);

        layout_module(&mut arena, module, Direction::Right, FONT);
        let snapshot: Vec<_> = [module, a, b]
            .iter()
            .map(|&id| {
                let item = arena.get(id).unwrap();
                (item.x, item.y, box_rect(&arena, id))
            })
            .collect();

        let moved = layout_module(&mut arena, module, Direction::Right, FONT);
        let again: Vec<_> = [module, a, b]
            .iter()
            .map(|&id| {
                let item = arena.get(id).unwrap();
                (item.x, item.y, box_rect(&arena, id))
            })
            .collect();
        assert_eq!(snapshot, again);
        assert!(moved.is_empty());
    }

    #[test]
    fn test_module_fits_title() {
        let mut arena = ItemArena::new();
        let module = make_module(&mut arena, "a very long module title");
        make_port(&mut arena, module, "in", true);
        layout_module(&mut arena, module, Direction::Right, FONT);

        let title_w = arena
            .get(module)
            .unwrap()
            .node()
            .unwrap()
            .label
            .as_ref()
            .unwrap()
            .width;
        assert!(box_rect(&arena, module).width() >= title_w);
    }

    #[test]
    fn test_wide_title_pairs_input_output_rows() {
        let mut arena = ItemArena::new();
        let module = make_module(&mut arena, "a definitely extremely wide module title here");
        let inp = make_port(&mut arena, module, "i", true);
        let out = make_port(&mut arena, module, "o", false);
        layout_module(&mut arena, module, Direction::Right, FONT);

        // Input and output share a row when the title is wide enough.
        assert_eq!(arena.get(inp).unwrap().y, arena.get(out).unwrap().y);
    }

    // ============================================================
    // Module layout, flow down
    // ============================================================

    #[test]
    fn test_layout_down_lines_top_and_bottom() {
        let mut arena = ItemArena::new();
        let module = make_module(&mut arena, "gain");
        let inp = make_port(&mut arena, module, "in", true);
        let out = make_port(&mut arena, module, "out", false);
        for &pid in &[inp, out] {
            let node = arena.get_mut(pid).unwrap().node_mut().unwrap();
            set_port_direction(node, Direction::Down);
        }

        layout_module(&mut arena, module, Direction::Down, FONT);

        let mh = box_rect(&arena, module).height();
        assert_eq!(arena.get(inp).unwrap().y, 0.0);
        assert_eq!(arena.get(out).unwrap().y, mh - empty_port_depth(FONT));
        for &pid in &[inp, out] {
            let r = box_rect(&arena, pid);
            assert_eq!(r.width(), empty_port_breadth(FONT));
            assert_eq!(r.height(), empty_port_depth(FONT));
        }
    }

    // ============================================================
    // Widest-port metrics
    // ============================================================

    #[test]
    fn test_measure_ports_tracks_widest_per_side() {
        let mut arena = ItemArena::new();
        let module = make_module(&mut arena, "m");
        make_port(&mut arena, module, "tiny", true);
        let wide = make_port(&mut arena, module, "a rather wide input label", true);
        make_port(&mut arena, module, "out", false);

        let mut data = std::mem::take(
            arena
                .get_mut(module)
                .unwrap()
                .node_mut()
                .unwrap()
                .module_mut()
                .unwrap(),
        );
        measure_ports(&arena, &mut data, Direction::Right, FONT);

        let wide_w = port_natural_width(
            arena.get(wide).unwrap().node().unwrap(),
            Direction::Right,
            FONT,
        );
        assert_eq!(data.widest_input, wide_w);
        assert!(data.widest_output < data.widest_input);

        // Removing the widest port shrinks the metric.
        data.ports.retain(|&p| p != wide);
        measure_ports(&arena, &mut data, Direction::Right, FONT);
        assert!(data.widest_input < wide_w);
    }

    // ============================================================
    // Port controls
    // ============================================================

    fn control_port(min: f32, max: f32, value: f32) -> NodeData {
        let mut node = NodeData::new_box();
        node.box_shape_mut().unwrap().set_width(100.0);
        node.box_shape_mut().unwrap().kind = BoxKind::Port(PortData {
            is_input: true,
            control: Some(PortControl {
                value,
                min,
                max,
                ..PortControl::default()
            }),
        });
        node
    }

    #[test]
    fn test_control_value_widens_range_and_fills() {
        let mut port = control_port(0.0, 1.0, 0.0);
        assert_eq!(set_control_value(&mut port, 0.5), Some(0.5));
        let c = port.port().unwrap().control.as_ref().unwrap();
        assert_eq!(c.value, 0.5);
        assert_eq!(c.fill_width, 49.0);

        // Out-of-range values widen the range instead of clamping away.
        assert_eq!(set_control_value(&mut port, 2.0), Some(2.0));
        let c = port.port().unwrap().control.as_ref().unwrap();
        assert_eq!(c.max, 2.0);
    }

    #[test]
    fn test_toggle_control_snaps_to_extremes() {
        let mut port = control_port(-1.0, 1.0, -1.0);
        port.port_mut().unwrap().control.as_mut().unwrap().is_toggle = true;
        assert_eq!(set_control_value(&mut port, 0.3), Some(1.0));
        assert_eq!(set_control_value(&mut port, 0.0), Some(-1.0));
    }

    #[test]
    fn test_integer_control_rounds() {
        let mut port = control_port(0.0, 10.0, 0.0);
        port.port_mut().unwrap().control.as_mut().unwrap().is_integer = true;
        assert_eq!(set_control_value(&mut port, 3.4), Some(3.0));
        // Same rounded value again: no change notification.
        assert_eq!(set_control_value(&mut port, 3.2), None);
    }

    #[test]
    fn test_degenerate_range_is_widened() {
        let mut port = control_port(5.0, 5.0, 5.0);
        set_control_value(&mut port, 5.0);
        let c = port.port().unwrap().control.as_ref().unwrap();
        assert!(c.max > c.min);
    }

    #[test]
    fn test_infinite_value_clamps_to_range() {
        let mut port = control_port(0.0, 1.0, 0.5);
        assert_eq!(set_control_value(&mut port, f32::NEG_INFINITY), Some(0.0));
        assert_eq!(set_control_value(&mut port, f32::INFINITY), Some(1.0));
    }
}
