//! The canvas coordinator.
//!
//! Owns the item tree, the edge set and its connectivity indices, the
//! selection sets, and the interaction state machine. Input events arrive
//! through [`Canvas::handle_event`]; structural work is deferred and
//! reconciled by [`Canvas::tick`], which runs update, repick, and paint
//! phases to a fixed point and returns the pixel rectangles to invalidate.
//!
//! The canvas never creates or destroys real connections on its own.
//! Connect and disconnect gestures become [`Notification`]s drained via
//! [`Canvas::take_notifications`]; the application decides whether to call
//! [`Canvas::add_edge`] / [`Canvas::remove_edge`] in response.

use std::cmp::Ordering;
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;

use tracing::{debug, trace};

use crate::edge::{Edge, EdgeArena, EdgeId, EdgeIndex};
use crate::error::CanvasError;
use crate::force::{self, ForceNode, ForceOptions};
use crate::geometry::{Direction, Rect, Viewport};
use crate::input::{Button, Event, Key, Modifiers, ScrollDelta};
use crate::item::{Item, ItemArena, ItemId, ItemKind};
use crate::module::{self, ModuleData, PortControl};
use crate::node::{head_anchor, tail_anchor, Label, NodeData};
use crate::text::TextMeasure;

use glam::DVec2;

/// Arrow-key scroll step in window pixels.
const SCROLL_STEP: f64 = 10.0;
/// Padding around the content box when zooming to fit.
const ZOOM_FULL_PAD: f64 = 8.0;
/// Dash offset per animation second.
const DASH_SPEED: f64 = 8.0;

/// Canvas-wide tunables.
#[derive(Debug, Clone, Copy)]
pub struct CanvasOptions {
    pub font_size: f64,
    pub direction: Direction,
    pub min_zoom: f64,
    pub min_font_size: f64,
    /// Pick tolerance in world units: how far from an item's outline a
    /// pointer still hits it.
    pub close_enough: f64,
}

impl Default for CanvasOptions {
    fn default() -> Self {
        CanvasOptions {
            font_size: 12.0,
            direction: Direction::default(),
            min_zoom: 0.01,
            min_font_size: 1.0,
            close_enough: 2.0,
        }
    }
}

/// Tunables for dragging a port control's value.
#[derive(Debug, Clone, Copy)]
pub struct ControlDragOptions {
    /// Vertical displacement (window pixels) beyond which horizontal motion
    /// switches to fine adjustment.
    pub fine_threshold: f64,
    /// Sensitivity divisor applied in fine mode.
    pub fine_divisor: f64,
}

impl Default for ControlDragOptions {
    fn default() -> Self {
        ControlDragOptions {
            fine_threshold: 16.0,
            fine_divisor: 4.0,
        }
    }
}

/// A gesture or value change the application should react to.
///
/// Connect and disconnect are proposals: the canvas reports the gesture and
/// leaves the actual edge mutation to the application.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Notification {
    Connect { tail: ItemId, head: ItemId },
    Disconnect { tail: ItemId, head: ItemId },
    ValueChanged { port: ItemId, value: f32 },
    MoveFinished { node: ItemId },
}

/// What the pointer is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pick {
    Item(ItemId),
    Edge(EdgeId),
}

/// The single active drag mode. Port-press bookkeeping (connect candidate,
/// control drag) is held separately and does not occupy the drag slot.
#[derive(Debug, Clone, Copy)]
pub enum DragState {
    None,
    Scroll {
        origin_root_x: f64,
        origin_root_y: f64,
        start_scroll_x: f64,
        start_scroll_y: f64,
    },
    Select {
        rect: Rect,
    },
    Edge {
        source: ItemId,
        ghost_node: ItemId,
        ghost_edge: EdgeId,
        source_is_input: bool,
    },
}

#[derive(Debug, Clone, Copy)]
struct PortPress {
    port: ItemId,
    /// Press position in window pixels; the control drag range math works
    /// in screen space.
    px: f64,
    py: f64,
    /// Control value at press time, when the port has a draggable control.
    control: Option<f32>,
    moved: bool,
}

#[derive(Debug, Clone, Copy)]
struct NodeDrag {
    node: ItemId,
    last_x: f64,
    last_y: f64,
    moved: bool,
}

/// Optional total order over sibling ports within a module.
pub type PortOrder = Box<dyn Fn(&NodeData, &NodeData) -> Ordering>;

/// Shape consumer for a paint pass. Called at most once per item, only for
/// items whose bounds intersect the clip.
pub trait DrawBackend {
    fn draw_node(&mut self, id: ItemId, world_x: f64, world_y: f64, node: &NodeData);
    fn draw_edge(&mut self, id: EdgeId, edge: &Edge);
    fn draw_rubber_band(&mut self, rect: &Rect);
}

pub struct Canvas {
    arena: ItemArena,
    root: ItemId,
    /// All realized top-level nodes.
    nodes: HashSet<ItemId>,
    edges: EdgeArena,
    index: EdgeIndex,

    selected_nodes: HashSet<ItemId>,
    selected_edges: HashSet<EdgeId>,
    /// Selection order feeds pivot selection and bulk join.
    selected_ports: Vec<ItemId>,
    last_selected_port: Option<ItemId>,

    drag: DragState,
    port_press: Option<PortPress>,
    node_drag: Option<NodeDrag>,

    current: Option<ItemId>,
    grabbed: Option<ItemId>,
    focused: Option<ItemId>,
    left_grabbed: bool,
    in_repick: bool,
    need_repick: bool,
    button_down: bool,
    /// Last pointer position in window pixels, `None` outside the window.
    pointer: Option<(f64, f64)>,

    viewport: Viewport,
    direction: Direction,
    font_size: f64,
    options: CanvasOptions,
    control_options: ControlDragOptions,
    force_options: ForceOptions,
    sprung: bool,

    measure: Rc<dyn TextMeasure>,
    port_order: Option<PortOrder>,
    notifications: VecDeque<Notification>,
    /// Pending world-coordinate redraw rectangles, drained by `tick`.
    redraw: Vec<Rect>,
}

impl Canvas {
    pub fn new(measure: Rc<dyn TextMeasure>, options: CanvasOptions) -> Canvas {
        let mut arena = ItemArena::new();
        let root = arena.insert(Item::new(ItemKind::Group(Default::default())));
        Canvas {
            arena,
            root,
            nodes: HashSet::new(),
            edges: EdgeArena::new(),
            index: EdgeIndex::new(),
            selected_nodes: HashSet::new(),
            selected_edges: HashSet::new(),
            selected_ports: Vec::new(),
            last_selected_port: None,
            drag: DragState::None,
            port_press: None,
            node_drag: None,
            current: None,
            grabbed: None,
            focused: None,
            left_grabbed: false,
            in_repick: false,
            need_repick: false,
            button_down: false,
            pointer: None,
            viewport: Viewport::default(),
            direction: options.direction,
            font_size: options.font_size,
            options,
            control_options: ControlDragOptions::default(),
            force_options: ForceOptions::default(),
            sprung: false,
            measure,
            port_order: None,
            notifications: VecDeque::new(),
            redraw: Vec::new(),
        }
    }

    // ------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------

    pub fn root(&self) -> ItemId {
        self.root
    }

    pub fn arena(&self) -> &ItemArena {
        &self.arena
    }

    pub fn edges(&self) -> &EdgeArena {
        &self.edges
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn font_size(&self) -> f64 {
        self.font_size
    }

    pub fn drag_state(&self) -> &DragState {
        &self.drag
    }

    pub fn current_item(&self) -> Option<ItemId> {
        self.current
    }

    pub fn grabbed_item(&self) -> Option<ItemId> {
        self.grabbed
    }

    pub fn focused_item(&self) -> Option<ItemId> {
        self.focused
    }

    pub fn selected_nodes(&self) -> &HashSet<ItemId> {
        &self.selected_nodes
    }

    pub fn selected_edges(&self) -> &HashSet<EdgeId> {
        &self.selected_edges
    }

    pub fn selected_ports(&self) -> &[ItemId] {
        &self.selected_ports
    }

    pub fn set_control_drag_options(&mut self, options: ControlDragOptions) {
        self.control_options = options;
    }

    pub fn set_force_options(&mut self, options: ForceOptions) {
        self.force_options = options;
    }

    pub fn set_viewport_size(&mut self, width: f64, height: f64) {
        self.viewport.width = width;
        self.viewport.height = height;
        self.redraw.push(self.viewport.visible_rect());
    }

    pub fn scroll_to(&mut self, x: f64, y: f64) {
        self.viewport.scroll_x = x;
        self.viewport.scroll_y = y;
        self.need_repick = true;
    }

    /// Drains the queued application notifications in emission order.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    // ------------------------------------------------------------
    // Structure: nodes, ports, edges
    // ------------------------------------------------------------

    /// A module box at the origin; position it with [`Canvas::move_node_to`].
    pub fn create_module(&mut self, title: &str) -> ItemId {
        let mut node = NodeData::new_box();
        node.draggable = true;
        node.must_resize = true;
        if !title.is_empty() {
            node.label = Some(Label::new(title, &*self.measure, self.font_size));
        }
        if let Some(b) = node.box_shape_mut() {
            b.kind = crate::node::BoxKind::Module(ModuleData::new());
        }
        let id = self.arena.insert(Item::new(ItemKind::Node(node)));
        self.arena.attach(id, self.root);
        self.nodes.insert(id);
        self.arena.request_update(id);
        debug!(?id, title, "module created");
        id
    }

    pub fn create_circle(&mut self, label: &str, radius: f64) -> ItemId {
        let mut node = NodeData::new_circle(radius);
        if !label.is_empty() {
            node.label = Some(Label::new(label, &*self.measure, self.font_size));
            node.must_resize = true;
        }
        let id = self.arena.insert(Item::new(ItemKind::Node(node)));
        self.arena.attach(id, self.root);
        self.nodes.insert(id);
        self.arena.request_update(id);
        debug!(?id, label, "circle created");
        id
    }

    pub fn create_port(
        &mut self,
        module_id: ItemId,
        label: &str,
        is_input: bool,
    ) -> Result<ItemId, CanvasError> {
        if self
            .arena
            .get(module_id)
            .and_then(|i| i.node())
            .map_or(true, |n| !n.is_module())
        {
            return Err(CanvasError::StaleHandle);
        }
        let mut node = module::new_port(is_input);
        if !label.is_empty() {
            node.label = Some(Label::new(label, &*self.measure, self.font_size));
        }
        module::set_port_direction(&mut node, self.direction);
        let id = self.arena.insert(Item::new(ItemKind::Node(node)));
        self.arena.attach(id, module_id);
        if let Some(m) = self
            .arena
            .get_mut(module_id)
            .and_then(|i| i.node_mut())
            .and_then(|n| n.module_mut())
        {
            m.ports.push(id);
        }
        self.sort_module_ports(module_id);
        if let Some(n) = self.arena.get_mut(module_id).and_then(|i| i.node_mut()) {
            n.must_resize = true;
        }
        self.arena.request_update(module_id);
        debug!(?id, ?module_id, is_input, "port created");
        Ok(id)
    }

    /// Destroys a node (module, circle, or port) together with every edge
    /// touching it. Module destruction takes its ports along. Every canvas
    /// slot referencing a destroyed item is cleared.
    pub fn remove_node(&mut self, id: ItemId) -> Result<(), CanvasError> {
        if !self.arena.contains(id) {
            return Err(CanvasError::StaleHandle);
        }
        let ports = self
            .arena
            .get(id)
            .and_then(|i| i.node())
            .and_then(|n| n.module())
            .map(|m| m.ports.clone())
            .unwrap_or_default();
        for p in ports {
            self.remove_item(p);
        }
        self.remove_item(id);
        Ok(())
    }

    fn remove_item(&mut self, id: ItemId) {
        self.redraw_item(id);

        let incident: Vec<EdgeId> = self.index.edges_on(id).collect();
        for e in incident {
            let _ = self.remove_edge(e);
        }

        // A connect drag anchored on the item cannot survive it.
        match self.drag {
            DragState::Edge {
                source, ghost_node, ..
            } if source == id || ghost_node == id => self.cancel_edge_drag(),
            _ => {}
        }
        if self.port_press.map_or(false, |p| p.port == id) {
            self.port_press = None;
        }
        if self.node_drag.map_or(false, |d| d.node == id) {
            self.node_drag = None;
        }

        if self.current == Some(id) {
            self.current = None;
        }
        if self.grabbed == Some(id) {
            self.grabbed = None;
            self.left_grabbed = false;
        }
        if self.focused == Some(id) {
            self.focused = None;
        }

        self.selected_nodes.remove(&id);
        self.selected_ports.retain(|&p| p != id);
        if self.last_selected_port == Some(id) {
            self.last_selected_port = None;
        }

        // Partner references die with the item.
        let holders: Vec<ItemId> = self
            .arena
            .iter()
            .filter(|(_, it)| it.node().map_or(false, |n| n.partner == Some(id)))
            .map(|(pid, _)| pid)
            .collect();
        for h in holders {
            if let Some(n) = self.arena.get_mut(h).and_then(|i| i.node_mut()) {
                n.partner = None;
            }
        }

        // Port: drop out of the owning module's list and relayout.
        if let Some(parent) = self.arena.get(id).and_then(|i| i.parent) {
            if let Some(n) = self.arena.get_mut(parent).and_then(|i| i.node_mut()) {
                if let Some(m) = n.module_mut() {
                    m.ports.retain(|&p| p != id);
                }
                n.must_resize = true;
            }
            self.arena.request_update(parent);
        }

        self.nodes.remove(&id);
        self.arena.detach(id);
        self.arena.remove(id);
        self.need_repick = true;
        debug!(?id, "item destroyed");
    }

    /// Creates an edge after checking both endpoint capabilities.
    pub fn add_edge(&mut self, tail: ItemId, head: ItemId) -> Result<EdgeId, CanvasError> {
        let t = self
            .arena
            .get(tail)
            .and_then(|i| i.node())
            .ok_or(CanvasError::StaleHandle)?;
        if !t.can_tail {
            return Err(CanvasError::CannotTail);
        }
        let h = self
            .arena
            .get(head)
            .and_then(|i| i.node())
            .ok_or(CanvasError::StaleHandle)?;
        if !h.can_head {
            return Err(CanvasError::CannotHead);
        }
        let id = self.edges.insert(Edge::new(tail, head));
        self.index.insert(id, tail, head);
        debug!(?id, ?tail, ?head, "edge added");
        Ok(id)
    }

    pub fn remove_edge(&mut self, id: EdgeId) -> Result<(), CanvasError> {
        let edge = self.edges.remove(id).ok_or(CanvasError::StaleHandle)?;
        if !edge.ghost {
            self.index.remove(id, edge.tail, edge.head);
        }
        self.selected_edges.remove(&id);
        self.redraw.push(edge.coords.bounds());
        debug!(?id, "edge removed");
        Ok(())
    }

    pub fn are_connected(&self, tail: ItemId, head: ItemId) -> bool {
        self.index.are_connected(tail, head)
    }

    pub fn edges_from(&self, node: ItemId) -> Vec<EdgeId> {
        self.index.edges_from(node).collect()
    }

    pub fn edges_to(&self, node: ItemId) -> Vec<EdgeId> {
        self.index.edges_to(node).collect()
    }

    pub fn edges_on(&self, node: ItemId) -> Vec<EdgeId> {
        self.index.edges_on(node).collect()
    }

    pub fn move_node(&mut self, id: ItemId, dx: f64, dy: f64) -> Result<(), CanvasError> {
        let item = self.arena.get_mut(id).ok_or(CanvasError::StaleHandle)?;
        item.x += dx;
        item.y += dy;
        self.refresh_node(id);
        Ok(())
    }

    pub fn move_node_to(&mut self, id: ItemId, x: f64, y: f64) -> Result<(), CanvasError> {
        let item = self.arena.get_mut(id).ok_or(CanvasError::StaleHandle)?;
        item.x = x;
        item.y = y;
        self.refresh_node(id);
        Ok(())
    }

    /// Marks the node, its ports, and every incident edge for update.
    fn refresh_node(&mut self, id: ItemId) {
        self.arena.request_update(id);
        self.touch_edges_on(id);
        let ports = self
            .arena
            .get(id)
            .and_then(|i| i.node())
            .and_then(|n| n.module())
            .map(|m| m.ports.clone())
            .unwrap_or_default();
        for p in ports {
            self.arena.request_update(p);
            self.touch_edges_on(p);
        }
    }

    fn touch_edges_on(&mut self, id: ItemId) {
        let incident: Vec<EdgeId> = self.index.edges_on(id).collect();
        for e in incident {
            if let Some(edge) = self.edges.get_mut(e) {
                edge.need_update = true;
            }
        }
        // Ghost edges bypass the indices.
        let ghosts: Vec<EdgeId> = self
            .edges
            .iter()
            .filter(|(_, e)| e.ghost && (e.tail == id || e.head == id))
            .map(|(eid, _)| eid)
            .collect();
        for e in ghosts {
            self.edges.get_mut(e).unwrap().need_update = true;
        }
    }

    pub fn set_visible(&mut self, id: ItemId, visible: bool) {
        if let Some(item) = self.arena.get_mut(id) {
            item.visible = visible;
        }
        self.redraw_item(id);
        self.need_repick = true;
    }

    pub fn set_port_control(&mut self, port: ItemId, control: PortControl) -> Result<(), CanvasError> {
        let node = self
            .arena
            .get_mut(port)
            .and_then(|i| i.node_mut())
            .ok_or(CanvasError::StaleHandle)?;
        match node.port_mut() {
            Some(p) => p.control = Some(control),
            None => return Err(CanvasError::StaleHandle),
        }
        self.redraw_item(port);
        Ok(())
    }

    /// Sets a port control's value with clamping and toggle snapping; emits
    /// [`Notification::ValueChanged`] only when the stored value changed.
    pub fn set_port_value(&mut self, port: ItemId, value: f32) -> Result<(), CanvasError> {
        let node = self
            .arena
            .get_mut(port)
            .and_then(|i| i.node_mut())
            .ok_or(CanvasError::StaleHandle)?;
        if let Some(applied) = module::set_control_value(node, value) {
            self.notifications
                .push_back(Notification::ValueChanged { port, value: applied });
            self.redraw_item(port);
        }
        Ok(())
    }

    /// Installs (or clears) the port ordering comparator and re-sorts every
    /// module. Absent comparator means insertion order.
    pub fn set_port_order(&mut self, order: Option<PortOrder>) {
        self.port_order = order;
        let modules: Vec<ItemId> = self.nodes.iter().copied().collect();
        for m in modules {
            self.sort_module_ports(m);
            if let Some(n) = self.arena.get_mut(m).and_then(|i| i.node_mut()) {
                if n.is_module() {
                    n.must_resize = true;
                }
            }
            self.arena.request_update(m);
        }
    }

    fn sort_module_ports(&mut self, module_id: ItemId) {
        let order = match &self.port_order {
            Some(o) => o,
            None => return,
        };
        let mut ports = match self
            .arena
            .get(module_id)
            .and_then(|i| i.node())
            .and_then(|n| n.module())
        {
            Some(m) => m.ports.clone(),
            None => return,
        };
        let arena = &self.arena;
        ports.sort_by(|&a, &b| {
            match (
                arena.get(a).and_then(|i| i.node()),
                arena.get(b).and_then(|i| i.node()),
            ) {
                (Some(x), Some(y)) => order(x, y),
                _ => Ordering::Equal,
            }
        });
        if let Some(m) = self
            .arena
            .get_mut(module_id)
            .and_then(|i| i.node_mut())
            .and_then(|n| n.module_mut())
        {
            m.ports = ports;
        }
    }

    // ------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------

    pub fn select_node(&mut self, id: ItemId) {
        if let Some(n) = self.arena.get_mut(id).and_then(|i| i.node_mut()) {
            n.selected = true;
        }
        self.selected_nodes.insert(id);
        self.redraw_item(id);
    }

    pub fn unselect_node(&mut self, id: ItemId) {
        if let Some(n) = self.arena.get_mut(id).and_then(|i| i.node_mut()) {
            n.selected = false;
        }
        self.selected_nodes.remove(&id);
        self.redraw_item(id);
    }

    pub fn toggle_node_selection(&mut self, id: ItemId) {
        if self.selected_nodes.contains(&id) {
            self.unselect_node(id);
        } else {
            self.select_node(id);
        }
    }

    pub fn select_edge(&mut self, id: EdgeId) {
        if let Some(e) = self.edges.get_mut(id) {
            e.selected = true;
            self.redraw.push(e.coords.bounds());
        }
        self.selected_edges.insert(id);
    }

    pub fn unselect_edge(&mut self, id: EdgeId) {
        if let Some(e) = self.edges.get_mut(id) {
            e.selected = false;
            self.redraw.push(e.coords.bounds());
        }
        self.selected_edges.remove(&id);
    }

    pub fn toggle_edge_selection(&mut self, id: EdgeId) {
        if self.selected_edges.contains(&id) {
            self.unselect_edge(id);
        } else {
            self.select_edge(id);
        }
    }

    pub fn select_port(&mut self, id: ItemId) {
        if let Some(n) = self.arena.get_mut(id).and_then(|i| i.node_mut()) {
            n.selected = true;
        }
        if !self.selected_ports.contains(&id) {
            self.selected_ports.push(id);
        }
        self.last_selected_port = Some(id);
        self.redraw_item(id);
    }

    pub fn unselect_port(&mut self, id: ItemId) {
        if let Some(n) = self.arena.get_mut(id).and_then(|i| i.node_mut()) {
            n.selected = false;
        }
        self.selected_ports.retain(|&p| p != id);
        if self.last_selected_port == Some(id) {
            self.last_selected_port = None;
        }
        self.redraw_item(id);
    }

    fn toggle_port_selection(&mut self, id: ItemId) {
        if self.selected_ports.contains(&id) {
            self.unselect_port(id);
        } else {
            self.select_port(id);
        }
    }

    fn clear_port_selection(&mut self) {
        let ports = std::mem::take(&mut self.selected_ports);
        for p in ports {
            if let Some(n) = self.arena.get_mut(p).and_then(|i| i.node_mut()) {
                n.selected = false;
            }
            self.redraw_item(p);
        }
        self.last_selected_port = None;
    }

    pub fn clear_selection(&mut self) {
        let nodes: Vec<ItemId> = self.selected_nodes.iter().copied().collect();
        for n in nodes {
            self.unselect_node(n);
        }
        let edges: Vec<EdgeId> = self.selected_edges.iter().copied().collect();
        for e in edges {
            self.unselect_edge(e);
        }
        self.clear_port_selection();
    }

    // ------------------------------------------------------------
    // Grab and focus
    // ------------------------------------------------------------

    /// Acquires the single pointer grab slot. Fails distinctly when the
    /// grab is held elsewhere and when the item is hidden.
    pub fn grab_item(&mut self, id: ItemId) -> Result<(), CanvasError> {
        let item = self.arena.get(id).ok_or(CanvasError::StaleHandle)?;
        if !item.visible {
            return Err(CanvasError::GrabHidden);
        }
        match self.grabbed {
            Some(g) if g != id => Err(CanvasError::GrabHeld),
            _ => {
                self.grabbed = Some(id);
                Ok(())
            }
        }
    }

    pub fn ungrab_item(&mut self, id: ItemId) {
        if self.grabbed == Some(id) {
            self.grabbed = None;
            self.left_grabbed = false;
            self.need_repick = true;
        }
    }

    pub fn focus_item(&mut self, id: ItemId) -> Result<(), CanvasError> {
        if !self.arena.contains(id) {
            return Err(CanvasError::StaleHandle);
        }
        self.focused = Some(id);
        Ok(())
    }

    // ------------------------------------------------------------
    // Picking
    // ------------------------------------------------------------

    /// Topmost thing within the pick tolerance of a world point. Nodes and
    /// ports take priority over edge handles.
    pub fn pick(&self, wx: f64, wy: f64) -> Option<Pick> {
        if let Some(id) = self.pick_item(wx, wy) {
            return Some(Pick::Item(id));
        }
        let tol = self.options.close_enough;
        let mut best: Option<(f64, EdgeId)> = None;
        for (eid, e) in self.edges.iter() {
            if e.ghost {
                continue;
            }
            let d = e.coords.distance_to_point(wx, wy);
            if d <= tol && best.map_or(true, |(bd, _)| d < bd) {
                best = Some((d, eid));
            }
        }
        best.map(|(_, id)| Pick::Edge(id))
    }

    fn pick_item(&self, wx: f64, wy: f64) -> Option<ItemId> {
        let tol = self.options.close_enough;
        let root = self.arena.get(self.root)?.group()?;
        let mut best: Option<(f64, ItemId)> = None;
        // Topmost child first; within a module its ports sit on top.
        for &id in root.children.iter().rev() {
            if let Some(m) = self
                .arena
                .get(id)
                .and_then(|i| i.node())
                .and_then(|n| n.module())
            {
                for &pid in m.ports.iter().rev() {
                    self.consider(pid, wx, wy, tol, &mut best);
                }
            }
            self.consider(id, wx, wy, tol, &mut best);
            if matches!(best, Some((d, _)) if d == 0.0) {
                break;
            }
        }
        best.map(|(_, id)| id)
    }

    fn consider(&self, id: ItemId, wx: f64, wy: f64, tol: f64, best: &mut Option<(f64, ItemId)>) {
        let item = match self.arena.get(id) {
            Some(i) if i.visible => i,
            _ => return,
        };
        // Cheap reject against the cached bounds before the exact test.
        if !item.bounds.inflate(tol).contains_point(wx, wy) {
            return;
        }
        let node = match item.node() {
            Some(n) => n,
            None => return,
        };
        let (ox, oy) = self.arena.item_to_world(id);
        let d = node.distance_to_point(wx - ox, wy - oy);
        if d <= tol && best.map_or(true, |(bd, _)| d < bd) {
            *best = Some((d, id));
        }
    }

    // ------------------------------------------------------------
    // Connection gestures
    // ------------------------------------------------------------

    /// The join gesture between two ports: a no-op for the same port or two
    /// same-direction ports; otherwise proposes connect or, when already
    /// connected, disconnect.
    pub fn ports_joined(&mut self, a: ItemId, b: ItemId) {
        if a == b {
            return;
        }
        let a_in = match self
            .arena
            .get(a)
            .and_then(|i| i.node())
            .and_then(|n| n.port())
        {
            Some(p) => p.is_input,
            None => return,
        };
        let b_in = match self
            .arena
            .get(b)
            .and_then(|i| i.node())
            .and_then(|n| n.port())
        {
            Some(p) => p.is_input,
            None => return,
        };
        if a_in == b_in {
            return;
        }
        let (tail, head) = if a_in { (b, a) } else { (a, b) };
        self.propose_connection(tail, head);
    }

    fn propose_connection(&mut self, tail: ItemId, head: ItemId) {
        let t_ok = self
            .arena
            .get(tail)
            .and_then(|i| i.node())
            .map_or(false, |n| n.can_tail);
        let h_ok = self
            .arena
            .get(head)
            .and_then(|i| i.node())
            .map_or(false, |n| n.can_head);
        if !t_ok || !h_ok {
            return;
        }
        if self.index.are_connected(tail, head) {
            debug!(?tail, ?head, "disconnect proposed");
            self.notifications
                .push_back(Notification::Disconnect { tail, head });
        } else {
            debug!(?tail, ?head, "connect proposed");
            self.notifications
                .push_back(Notification::Connect { tail, head });
        }
    }

    /// Bulk join over the selected ports: one input fans out to every
    /// selected output (and vice versa); otherwise inputs pair with outputs
    /// in selection order up to the shorter list.
    pub fn join_selection(&mut self) {
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for &p in &self.selected_ports {
            match self
                .arena
                .get(p)
                .and_then(|i| i.node())
                .and_then(|n| n.port())
            {
                Some(d) if d.is_input => inputs.push(p),
                Some(_) => outputs.push(p),
                None => {}
            }
        }
        if inputs.len() == 1 {
            for o in outputs {
                self.ports_joined(o, inputs[0]);
            }
        } else if outputs.len() == 1 {
            for i in inputs {
                self.ports_joined(outputs[0], i);
            }
        } else {
            for (i, o) in inputs.into_iter().zip(outputs) {
                self.ports_joined(o, i);
            }
        }
    }

    /// Host-initiated connect drag from a port; the pointer takes over via
    /// subsequent motion events.
    pub fn start_connect_drag(&mut self, port: ItemId) -> Result<(), CanvasError> {
        if !matches!(self.drag, DragState::None) {
            return Err(CanvasError::DragInProgress);
        }
        let node = self
            .arena
            .get(port)
            .and_then(|i| i.node())
            .ok_or(CanvasError::StaleHandle)?;
        if !node.can_tail && !node.can_head {
            return Err(CanvasError::CannotTail);
        }
        let (wx, wy) = self.arena.item_to_world(port);
        self.begin_edge_drag(port, wx, wy);
        Ok(())
    }

    fn begin_edge_drag(&mut self, source: ItemId, wx: f64, wy: f64) {
        if !matches!(self.drag, DragState::None) {
            return;
        }
        let source_is_input = self
            .arena
            .get(source)
            .and_then(|i| i.node())
            .map_or(false, |n| n.can_head && !n.can_tail);

        let mut ghost = Item::new(ItemKind::Node(NodeData::new_circle(0.0)));
        ghost.x = wx;
        ghost.y = wy;
        ghost.visible = false;
        let ghost_node = self.arena.insert(ghost);
        self.arena.attach(ghost_node, self.root);

        let mut edge = if source_is_input {
            Edge::new(ghost_node, source)
        } else {
            Edge::new(source, ghost_node)
        };
        edge.ghost = true;
        let ghost_edge = self.edges.insert(edge);

        self.arena.request_update(ghost_node);
        self.drag = DragState::Edge {
            source,
            ghost_node,
            ghost_edge,
            source_is_input,
        };
        debug!(?source, "connect drag started");
    }

    fn edge_drag_motion(&mut self, wx: f64, wy: f64) {
        let (source, ghost_node, ghost_edge, source_is_input) = match self.drag {
            DragState::Edge {
                source,
                ghost_node,
                ghost_edge,
                source_is_input,
            } => (source, ghost_node, ghost_edge, source_is_input),
            _ => return,
        };
        if let Some(item) = self.arena.get_mut(ghost_node) {
            item.x = wx;
            item.y = wy;
        }
        self.arena.request_update(ghost_node);

        // Snap the free end to a capable node under the pointer.
        let target = match self.pick_item(wx, wy) {
            Some(t) if t != source => {
                let ok = self.arena.get(t).and_then(|i| i.node()).map_or(false, |n| {
                    if source_is_input {
                        n.can_tail
                    } else {
                        n.can_head
                    }
                });
                ok.then_some(t)
            }
            _ => None,
        };
        let endpoint = target.unwrap_or(ghost_node);
        if let Some(e) = self.edges.get_mut(ghost_edge) {
            if source_is_input {
                e.tail = endpoint;
            } else {
                e.head = endpoint;
            }
            e.need_update = true;
        }
    }

    fn finish_edge_drag(&mut self, wx: f64, wy: f64) {
        let (source, ghost_node, ghost_edge, source_is_input) =
            match std::mem::replace(&mut self.drag, DragState::None) {
                DragState::Edge {
                    source,
                    ghost_node,
                    ghost_edge,
                    source_is_input,
                } => (source, ghost_node, ghost_edge, source_is_input),
                other => {
                    self.drag = other;
                    return;
                }
            };
        let target = self.pick_item(wx, wy);

        if let Some(e) = self.edges.remove(ghost_edge) {
            self.redraw.push(e.coords.bounds());
        }
        self.arena.detach(ghost_node);
        self.arena.remove(ghost_node);

        match target {
            Some(t) if t == source => self.port_clicked(source),
            Some(t) => {
                let (tail, head) = if source_is_input {
                    (t, source)
                } else {
                    (source, t)
                };
                self.propose_connection(tail, head);
                self.clear_port_selection();
            }
            None => {}
        }
        self.need_repick = true;
        debug!(?source, "connect drag finished");
    }

    fn cancel_edge_drag(&mut self) {
        if !matches!(self.drag, DragState::Edge { .. }) {
            return;
        }
        if let DragState::Edge {
            ghost_node,
            ghost_edge,
            ..
        } = std::mem::replace(&mut self.drag, DragState::None)
        {
            if let Some(e) = self.edges.remove(ghost_edge) {
                self.redraw.push(e.coords.bounds());
            }
            self.arena.detach(ghost_node);
            self.arena.remove(ghost_node);
        }
        debug!("connect drag cancelled");
    }

    /// Release over the origin port: unselect a selected port, join the
    /// current selection to it, or select it.
    fn port_clicked(&mut self, port: ItemId) {
        if self.selected_ports.contains(&port) {
            self.unselect_port(port);
        } else if !self.selected_ports.is_empty() {
            let sel = self.selected_ports.clone();
            for p in sel {
                self.ports_joined(p, port);
            }
            self.clear_port_selection();
        } else {
            self.select_port(port);
        }
    }

    /// Shift-click pivot: selects the contiguous range of same-direction
    /// ports between the previously selected port and the clicked one,
    /// deselecting the module's other ports. Falls back to a plain toggle
    /// when the pivot lives on another module (or is gone).
    fn pivot_select(&mut self, port: ItemId) {
        let module_id = self.arena.get(port).and_then(|i| i.parent);
        let pivot = self.last_selected_port;
        let same_module = match (pivot, module_id) {
            (Some(p), Some(m)) if p != port => {
                self.arena.get(p).and_then(|i| i.parent) == Some(m)
            }
            _ => false,
        };
        if !same_module {
            self.toggle_port_selection(port);
            return;
        }
        let pivot = pivot.unwrap();
        let module_id = module_id.unwrap();
        let ports = match self
            .arena
            .get(module_id)
            .and_then(|i| i.node())
            .and_then(|n| n.module())
        {
            Some(m) => m.ports.clone(),
            None => {
                self.toggle_port_selection(port);
                return;
            }
        };
        let (lo, hi) = match (
            ports.iter().position(|&p| p == pivot),
            ports.iter().position(|&p| p == port),
        ) {
            (Some(a), Some(b)) => (a.min(b), a.max(b)),
            _ => {
                self.toggle_port_selection(port);
                return;
            }
        };
        let want_input = self
            .arena
            .get(port)
            .and_then(|i| i.node())
            .and_then(|n| n.port())
            .map_or(false, |p| p.is_input);
        for (idx, &pid) in ports.iter().enumerate() {
            let same_dir = self
                .arena
                .get(pid)
                .and_then(|i| i.node())
                .and_then(|n| n.port())
                .map_or(false, |p| p.is_input)
                == want_input;
            if idx >= lo && idx <= hi && same_dir {
                self.select_port(pid);
            } else {
                self.unselect_port(pid);
            }
        }
        self.last_selected_port = Some(port);
    }

    // ------------------------------------------------------------
    // Event dispatch
    // ------------------------------------------------------------

    /// Feeds one input event through the canvas. Returns true when the
    /// event was consumed.
    pub fn handle_event(&mut self, event: Event) -> bool {
        match event {
            Event::ButtonPress {
                button,
                x,
                y,
                root_x,
                root_y,
                modifiers,
            } => self.on_button_press(button, x, y, root_x, root_y, modifiers),
            Event::ButtonRelease { button, x, y, .. } => self.on_button_release(button, x, y),
            Event::Motion {
                x, y, root_x, root_y, ..
            } => self.on_motion(x, y, root_x, root_y),
            Event::Enter { x, y } => {
                self.pointer = Some((x, y));
                self.need_repick = true;
                true
            }
            Event::Leave => {
                self.pointer = None;
                if let Some(c) = self.current.take() {
                    self.leave_item(c);
                }
                true
            }
            Event::KeyPress { key, .. } => self.on_key(key),
            Event::Scroll { delta, modifiers, .. } => self.on_scroll(delta, modifiers),
        }
    }

    fn on_button_press(
        &mut self,
        button: Button,
        x: f64,
        y: f64,
        root_x: f64,
        root_y: f64,
        modifiers: Modifiers,
    ) -> bool {
        self.pointer = Some((x, y));
        match button {
            Button::Middle => {
                if !matches!(self.drag, DragState::None) {
                    return false;
                }
                self.drag = DragState::Scroll {
                    origin_root_x: root_x,
                    origin_root_y: root_y,
                    start_scroll_x: self.viewport.scroll_x,
                    start_scroll_y: self.viewport.scroll_y,
                };
                debug!("scroll drag started");
                true
            }
            Button::Left => {
                self.button_down = true;
                if !matches!(self.drag, DragState::None) {
                    return true;
                }
                let (wx, wy) = self.viewport.window_to_world(x, y);
                match self.pick(wx, wy) {
                    Some(Pick::Edge(eid)) => {
                        self.toggle_edge_selection(eid);
                        true
                    }
                    Some(Pick::Item(id)) => {
                        // Ancestor chain, first consumer wins.
                        let mut cur = Some(id);
                        while let Some(i) = cur {
                            if i == self.root {
                                break;
                            }
                            if self.item_pressed(i, x, y, wx, wy, modifiers) {
                                return true;
                            }
                            cur = self.arena.get(i).and_then(|it| it.parent);
                        }
                        self.begin_select(wx, wy, modifiers);
                        true
                    }
                    None => {
                        self.begin_select(wx, wy, modifiers);
                        true
                    }
                }
            }
            Button::Right => false,
        }
    }

    fn item_pressed(
        &mut self,
        id: ItemId,
        x: f64,
        y: f64,
        wx: f64,
        wy: f64,
        modifiers: Modifiers,
    ) -> bool {
        let node = match self.arena.get(id).and_then(|i| i.node()) {
            Some(n) => n,
            None => return false,
        };
        if node.is_port() {
            if modifiers.shift {
                self.pivot_select(id);
                return true;
            }
            if modifiers.ctrl {
                self.toggle_port_selection(id);
                return true;
            }
            let control = node
                .port()
                .and_then(|p| p.control.as_ref())
                .filter(|c| !c.is_toggle)
                .map(|c| c.value);
            let _ = self.grab_item(id);
            self.port_press = Some(PortPress {
                port: id,
                px: x,
                py: y,
                control,
                moved: false,
            });
            return true;
        }
        // Module or circle body.
        if modifiers.ctrl {
            self.toggle_node_selection(id);
        } else if !self.selected_nodes.contains(&id) {
            self.clear_selection();
            self.select_node(id);
        }
        if node_is_draggable(&self.arena, id) {
            let _ = self.grab_item(id);
            self.node_drag = Some(NodeDrag {
                node: id,
                last_x: wx,
                last_y: wy,
                moved: false,
            });
        }
        true
    }

    fn begin_select(&mut self, wx: f64, wy: f64, modifiers: Modifiers) {
        if !matches!(self.drag, DragState::None) {
            return;
        }
        if !modifiers.any() {
            self.clear_selection();
        }
        self.drag = DragState::Select {
            rect: Rect::new(wx, wy, wx, wy),
        };
        debug!("select drag started");
    }

    fn on_motion(&mut self, x: f64, y: f64, root_x: f64, root_y: f64) -> bool {
        self.pointer = Some((x, y));
        let (wx, wy) = self.viewport.window_to_world(x, y);

        match self.drag {
            DragState::Scroll {
                origin_root_x,
                origin_root_y,
                start_scroll_x,
                start_scroll_y,
            } => {
                let zoom = self.viewport.zoom;
                self.viewport.scroll_x = start_scroll_x - (root_x - origin_root_x) / zoom;
                self.viewport.scroll_y = start_scroll_y - (root_y - origin_root_y) / zoom;
                self.need_repick = true;
                return true;
            }
            DragState::Select { rect } => {
                let mut new_rect = rect;
                new_rect.x2 = wx;
                new_rect.y2 = wy;
                self.drag = DragState::Select { rect: new_rect };
                self.redraw.push(rect.normalized().union(&new_rect.normalized()));
                return true;
            }
            DragState::Edge { .. } => {
                self.edge_drag_motion(wx, wy);
                return true;
            }
            DragState::None => {}
        }

        if let Some(pp) = self.port_press {
            if pp.control.is_some() {
                self.control_drag_motion(x, y);
                return true;
            }
            // Leaving the pressed port starts the connect drag.
            let over_source = matches!(self.pick_item(wx, wy), Some(i) if i == pp.port);
            if !over_source {
                self.port_press = None;
                self.begin_edge_drag(pp.port, wx, wy);
                self.edge_drag_motion(wx, wy);
            }
            return true;
        }

        if let Some(drag) = self.node_drag {
            if self.button_down {
                let dx = wx - drag.last_x;
                let dy = wy - drag.last_y;
                let mut targets: HashSet<ItemId> = self.selected_nodes.clone();
                targets.insert(drag.node);
                for t in targets {
                    let _ = self.move_node(t, dx, dy);
                }
                self.node_drag = Some(NodeDrag {
                    node: drag.node,
                    last_x: wx,
                    last_y: wy,
                    moved: true,
                });
                return true;
            }
        }

        self.need_repick = true;
        false
    }

    fn control_drag_motion(&mut self, x: f64, y: f64) {
        let pp = match self.port_press.as_mut() {
            Some(p) => {
                p.moved = true;
                *p
            }
            None => return,
        };
        let start = match pp.control {
            Some(v) => v,
            None => return,
        };
        let (min, max) = match self
            .arena
            .get(pp.port)
            .and_then(|i| i.node())
            .and_then(|n| n.port())
            .and_then(|p| p.control.as_ref())
        {
            Some(c) => (c.min, c.max),
            None => return,
        };
        let dx = x - pp.px;
        // Asymmetric range: the full span from the press point to the
        // window edge in the drag direction maps onto the value range.
        let range_x = if dx > 0.0 {
            self.viewport.width - pp.px
        } else {
            pp.px
        }
        .max(1.0);
        let mut frac = dx / range_x;
        if (y - pp.py).abs() > self.control_options.fine_threshold {
            frac /= self.control_options.fine_divisor;
        }
        let value = start + frac as f32 * (max - min);
        let _ = self.set_port_value(pp.port, value);
    }

    fn on_button_release(&mut self, button: Button, x: f64, y: f64) -> bool {
        match button {
            Button::Middle => {
                if matches!(self.drag, DragState::Scroll { .. }) {
                    self.drag = DragState::None;
                    debug!("scroll drag finished");
                    true
                } else {
                    false
                }
            }
            Button::Left => {
                self.button_down = false;
                self.left_grabbed = false;
                self.need_repick = true;
                self.grabbed = None;
                let (wx, wy) = self.viewport.window_to_world(x, y);

                if matches!(self.drag, DragState::Select { .. }) {
                    if let DragState::Select { rect } =
                        std::mem::replace(&mut self.drag, DragState::None)
                    {
                        self.finish_select(rect);
                    }
                    return true;
                }
                if matches!(self.drag, DragState::Edge { .. }) {
                    self.finish_edge_drag(wx, wy);
                    return true;
                }
                if let Some(pp) = self.port_press.take() {
                    if pp.control.is_none() || !pp.moved {
                        self.port_clicked(pp.port);
                    }
                    return true;
                }
                if let Some(drag) = self.node_drag.take() {
                    if drag.moved {
                        let mut moved: Vec<ItemId> =
                            self.selected_nodes.iter().copied().collect();
                        if !moved.contains(&drag.node) {
                            moved.push(drag.node);
                        }
                        for node in moved {
                            self.notifications
                                .push_back(Notification::MoveFinished { node });
                        }
                    }
                    return true;
                }
                false
            }
            Button::Right => false,
        }
    }

    /// Rubber-band release: toggles selection for fully contained nodes and
    /// for edges whose handle lies inside the rectangle.
    fn finish_select(&mut self, rect: Rect) {
        let rect = rect.normalized();
        self.redraw.push(rect);
        debug!(?rect, "select drag finished");

        let nodes: Vec<ItemId> = self.nodes.iter().copied().collect();
        for id in nodes {
            let (wx, wy) = self.arena.item_to_world(id);
            let contained = self
                .arena
                .get(id)
                .and_then(|i| i.node())
                .map_or(false, |n| n.is_within(wx, wy, &rect));
            if contained {
                self.toggle_node_selection(id);
            }
        }
        let contained_edges: Vec<EdgeId> = self
            .edges
            .iter()
            .filter(|(_, e)| !e.ghost && e.is_within(&rect))
            .map(|(id, _)| id)
            .collect();
        for e in contained_edges {
            self.toggle_edge_selection(e);
        }
    }

    fn on_key(&mut self, key: Key) -> bool {
        let step = SCROLL_STEP / self.viewport.zoom;
        match key {
            Key::Up => {
                self.viewport.scroll_y -= step;
                self.need_repick = true;
                true
            }
            Key::Down => {
                self.viewport.scroll_y += step;
                self.need_repick = true;
                true
            }
            Key::Left => {
                self.viewport.scroll_x -= step;
                self.need_repick = true;
                true
            }
            Key::Right => {
                self.viewport.scroll_x += step;
                self.need_repick = true;
                true
            }
            Key::Return => {
                if self.selected_ports.len() >= 2 {
                    self.join_selection();
                    self.clear_port_selection();
                    true
                } else {
                    false
                }
            }
        }
    }

    fn on_scroll(&mut self, delta: ScrollDelta, modifiers: Modifiers) -> bool {
        if !modifiers.ctrl {
            // Plain wheel scrolling belongs to the host's scrolled window.
            return false;
        }
        let points = match delta {
            ScrollDelta::Up => self.font_size * 1.25,
            ScrollDelta::Down => self.font_size * 0.75,
        };
        self.set_zoom_and_font_size(self.viewport.zoom, points);
        true
    }

    // ------------------------------------------------------------
    // Zoom and fonts
    // ------------------------------------------------------------

    pub fn set_zoom(&mut self, zoom: f64) {
        self.set_zoom_and_font_size(zoom, self.font_size);
    }

    pub fn set_font_size(&mut self, points: f64) {
        self.set_zoom_and_font_size(self.viewport.zoom, points);
    }

    /// Applies zoom and font size together, clamped to the configured
    /// minima. A font change re-measures every label and queues a relayout
    /// of every node.
    pub fn set_zoom_and_font_size(&mut self, zoom: f64, points: f64) {
        let zoom = zoom.max(self.options.min_zoom);
        let points = points.max(self.options.min_font_size);
        if points != self.font_size {
            self.font_size = points;
            let measure = Rc::clone(&self.measure);
            let ids: Vec<ItemId> = self.arena.iter().map(|(id, _)| id).collect();
            for id in ids {
                if let Some(n) = self.arena.get_mut(id).and_then(|i| i.node_mut()) {
                    if let Some(label) = &mut n.label {
                        label.remeasure(&*measure, points);
                    }
                    if let crate::node::NodeShape::Circle(c) = &mut n.shape {
                        if c.radius_ems > 0.0 {
                            c.radius = c.radius_ems * points;
                        }
                    }
                    n.must_resize = true;
                }
                self.arena.request_update(id);
            }
            debug!(points, "font size changed");
        }
        self.viewport.zoom = zoom;
        self.redraw.push(self.viewport.visible_rect());
        self.need_repick = true;
    }

    /// Fits the whole drawing into the viewport with a fixed pad. Uses the
    /// cached bounds, so call after a `tick`.
    pub fn zoom_full(&mut self) {
        let bounds = match self.content_bounds() {
            Some(b) => b,
            None => return,
        };
        let zoom = (self.viewport.width / (bounds.width() + ZOOM_FULL_PAD * 2.0))
            .min(self.viewport.height / (bounds.height() + ZOOM_FULL_PAD * 2.0));
        self.set_zoom(zoom);
        self.viewport.scroll_x = bounds.x1 - ZOOM_FULL_PAD;
        self.viewport.scroll_y = bounds.y1 - ZOOM_FULL_PAD;
    }

    fn content_bounds(&self) -> Option<Rect> {
        let mut bounds: Option<Rect> = None;
        for &id in &self.nodes {
            if let Some(item) = self.arena.get(id) {
                bounds = Some(match bounds {
                    Some(b) => b.union(&item.bounds),
                    None => item.bounds,
                });
            }
        }
        for (_, e) in self.edges.iter() {
            if e.ghost {
                continue;
            }
            let b = e.coords.bounds();
            bounds = Some(match bounds {
                Some(u) => u.union(&b),
                None => b,
            });
        }
        bounds
    }

    /// Sets the signal-flow direction, restyling every port and queuing a
    /// relayout of every module.
    pub fn set_direction(&mut self, direction: Direction) {
        if direction == self.direction {
            return;
        }
        self.direction = direction;
        let ids: Vec<ItemId> = self.arena.iter().map(|(id, _)| id).collect();
        for id in ids {
            if let Some(n) = self.arena.get_mut(id).and_then(|i| i.node_mut()) {
                if n.is_port() {
                    module::set_port_direction(n, direction);
                } else {
                    n.must_resize = true;
                }
            }
            self.arena.request_update(id);
        }
        let eids: Vec<EdgeId> = self.edges.iter().map(|(eid, _)| eid).collect();
        for e in eids {
            self.edges.get_mut(e).unwrap().need_update = true;
        }
        debug!(?direction, "direction changed");
    }

    /// Advances the dash animation on selected nodes, ports, and edges.
    pub fn animate(&mut self, seconds: f64) {
        let offset = seconds * DASH_SPEED;
        let ids: Vec<ItemId> = self
            .arena
            .iter()
            .filter(|(_, i)| i.node().map_or(false, |n| n.selected))
            .map(|(id, _)| id)
            .collect();
        for id in ids {
            if let Some(n) = self.arena.get_mut(id).and_then(|i| i.node_mut()) {
                n.dash_offset = offset;
            }
            self.redraw_item(id);
        }
        let eids: Vec<EdgeId> = self
            .edges
            .iter()
            .filter(|(_, e)| e.selected)
            .map(|(eid, _)| eid)
            .collect();
        for eid in eids {
            if let Some(e) = self.edges.get_mut(eid) {
                e.dash_offset = offset;
                self.redraw.push(e.coords.bounds());
            }
        }
    }

    // ------------------------------------------------------------
    // Layout strategies
    // ------------------------------------------------------------

    pub fn set_sprung_layout(&mut self, enabled: bool) {
        self.sprung = enabled;
    }

    pub fn sprung_layout_enabled(&self) -> bool {
        self.sprung
    }

    /// Pairs `node` with `partner` so the sprung layout holds them side by
    /// side. Alignment only, no edge is created. `None` clears the pairing.
    pub fn set_partner(
        &mut self,
        node: ItemId,
        partner: Option<ItemId>,
    ) -> Result<(), CanvasError> {
        if let Some(p) = partner {
            if !self.arena.contains(p) {
                return Err(CanvasError::StaleHandle);
            }
        }
        let n = self
            .arena
            .get_mut(node)
            .and_then(|i| i.node_mut())
            .ok_or(CanvasError::StaleHandle)?;
        n.partner = partner;
        Ok(())
    }

    /// One force-layout frame: `seconds` of wall clock become a bounded
    /// number of fixed sub-steps. Returns total node movement, 0.0 when the
    /// sprung layout is disabled.
    pub fn layout_tick(&mut self, seconds: f64) -> f64 {
        if !self.sprung {
            return 0.0;
        }
        let ids: Vec<ItemId> = self.nodes.iter().copied().collect();
        if ids.is_empty() {
            return 0.0;
        }
        let mut sim = Vec::with_capacity(ids.len());
        for &id in &ids {
            let b = self
                .arena
                .get(id)
                .map(|i| i.bounds)
                .unwrap_or_default();
            let center = DVec2::new((b.x1 + b.x2) / 2.0, (b.y1 + b.y2) / 2.0);
            let mut node = ForceNode::new(center, DVec2::new(b.width(), b.height()));
            node.pinned = self.node_drag.map_or(false, |d| d.node == id);
            sim.push(node);
        }

        let idx_of = |id: ItemId| ids.iter().position(|&n| n == id);
        let mut sim_edges = Vec::new();
        for (_, e) in self.edges.iter() {
            if e.ghost {
                continue;
            }
            let tail = self.top_level_ancestor(e.tail).and_then(idx_of);
            let head = self.top_level_ancestor(e.head).and_then(idx_of);
            if let (Some(t), Some(h)) = (tail, head) {
                if t != h {
                    sim_edges.push((t, h));
                }
            }
        }

        let mut sim_partners = Vec::new();
        for (i, &id) in ids.iter().enumerate() {
            let partner = self
                .arena
                .get(id)
                .and_then(|it| it.node())
                .and_then(|n| n.partner);
            if let Some(p) = partner {
                if let Some(j) = self.top_level_ancestor(p).and_then(idx_of) {
                    if j != i {
                        sim_partners.push((i, j));
                    }
                }
            }
        }

        let flow = match self.direction {
            Direction::Right => DVec2::new(1.0, 0.0),
            Direction::Down => DVec2::new(0.0, 1.0),
        };
        let steps = ((seconds / self.force_options.time_step).ceil() as usize).clamp(1, 10);
        let mut moved = 0.0;
        let opts = self.force_options;
        for _ in 0..steps {
            moved += force::step(&mut sim, &sim_edges, &sim_partners, flow, &opts);
        }
        trace!(moved, steps, "sprung layout frame");

        for (i, &id) in ids.iter().enumerate() {
            let b = self
                .arena
                .get(id)
                .map(|it| it.bounds)
                .unwrap_or_default();
            let old = DVec2::new((b.x1 + b.x2) / 2.0, (b.y1 + b.y2) / 2.0);
            let delta = sim[i].region.pos - old;
            if delta.length_squared() > 0.0 {
                let _ = self.move_node(id, delta.x, delta.y);
            }
        }
        moved
    }

    fn top_level_ancestor(&self, mut id: ItemId) -> Option<ItemId> {
        loop {
            let item = self.arena.get(id)?;
            match item.parent {
                Some(p) if p == self.root => return Some(id),
                Some(p) => id = p,
                None => return Some(id),
            }
        }
    }

    /// True when the static hierarchical arrangement was compiled in.
    pub fn supports_arrange(&self) -> bool {
        cfg!(feature = "layout")
    }

    /// Static hierarchical arrangement of the top-level nodes, translated
    /// so the drawing's top-left corner sits at a fixed margin.
    #[cfg(feature = "layout")]
    pub fn arrange(&mut self) -> Result<(), CanvasError> {
        use crate::layout::{sugiyama_layout_for_items, SugiyamaConfig};

        const ARRANGE_MARGIN: f64 = 8.0;

        let edge_pairs: Vec<(ItemId, ItemId)> = self
            .edges
            .iter()
            .filter(|(_, e)| !e.ghost)
            .map(|(_, e)| (e.tail, e.head))
            .collect();
        let config = SugiyamaConfig {
            direction: self.direction,
            ..Default::default()
        };
        let positions = sugiyama_layout_for_items(&self.arena, self.root, &edge_pairs, &config);
        if positions.is_empty() {
            return Ok(());
        }
        let min_x = positions.iter().map(|p| p.x).fold(f64::INFINITY, f64::min);
        let min_y = positions.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
        for p in positions {
            let _ = self.move_node_to(p.id, p.x - min_x + ARRANGE_MARGIN, p.y - min_y + ARRANGE_MARGIN);
        }
        Ok(())
    }

    #[cfg(not(feature = "layout"))]
    pub fn arrange(&mut self) -> Result<(), CanvasError> {
        Err(CanvasError::LayoutUnsupported)
    }

    // ------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------

    /// Runs the deferred update, repick, and paint phases to a fixed point
    /// and returns the window-pixel rectangles to invalidate. Rectangles
    /// outside the visible viewport are dropped.
    pub fn tick(&mut self) -> Vec<Rect> {
        loop {
            while self.has_dirty() {
                self.update_pass();
            }
            if !self.need_repick {
                break;
            }
            self.repick();
            if !self.has_dirty() && !self.need_repick {
                break;
            }
        }
        let vp = self.viewport;
        let visible = vp.visible_rect();
        let mut out = Vec::new();
        for r in self.redraw.drain(..) {
            let r = r.normalized();
            if r.width() <= 0.0 && r.height() <= 0.0 {
                continue;
            }
            if r.intersects(&visible) {
                out.push(vp.world_rect_to_window(&r));
            }
        }
        out
    }

    fn has_dirty(&self) -> bool {
        self.arena.iter().any(|(_, i)| i.need_update)
            || self.edges.iter().any(|(_, e)| e.need_update)
    }

    fn update_pass(&mut self) {
        let mut dirty_nodes = Vec::new();
        let mut dirty_groups = Vec::new();
        for (id, item) in self.arena.iter() {
            if item.need_update {
                match item.kind {
                    ItemKind::Group(_) => dirty_groups.push(id),
                    ItemKind::Node(_) => dirty_nodes.push(id),
                }
            }
        }
        trace!(
            nodes = dirty_nodes.len(),
            groups = dirty_groups.len(),
            "update pass"
        );
        for id in dirty_nodes {
            self.update_node(id);
        }
        // Groups after their children: bounds are the union of child bounds.
        for id in dirty_groups {
            let children = self
                .arena
                .get(id)
                .and_then(|i| i.group())
                .map(|g| g.children.clone())
                .unwrap_or_default();
            let mut bounds: Option<Rect> = None;
            for c in children {
                if let Some(item) = self.arena.get(c) {
                    if item.visible {
                        bounds = Some(match bounds {
                            Some(b) => b.union(&item.bounds),
                            None => item.bounds,
                        });
                    }
                }
            }
            if let Some(item) = self.arena.get_mut(id) {
                item.bounds = bounds.unwrap_or_default();
                item.need_update = false;
            }
        }

        let dirty_edges: Vec<EdgeId> = self
            .edges
            .iter()
            .filter(|(_, e)| e.need_update)
            .map(|(id, _)| id)
            .collect();
        for eid in dirty_edges {
            let (tail, head, old) = match self.edges.get(eid) {
                Some(e) => (e.tail, e.head, e.coords.bounds()),
                None => continue,
            };
            let t = tail_anchor(&self.arena, tail, head, self.direction);
            let h = head_anchor(&self.arena, head, tail, self.direction);
            let new = match self.edges.get_mut(eid) {
                Some(e) => {
                    e.coords.update(t, h);
                    e.need_update = false;
                    e.coords.bounds()
                }
                None => continue,
            };
            self.redraw.push(old);
            self.redraw.push(new);
        }
    }

    fn update_node(&mut self, id: ItemId) {
        let (must_resize, is_module, is_port) = match self.arena.get(id).and_then(|i| i.node()) {
            Some(n) => (n.must_resize, n.is_module(), n.is_port()),
            None => return,
        };
        if must_resize {
            if is_module {
                let moved = module::layout_module(&mut self.arena, id, self.direction, self.font_size);
                for pid in moved {
                    self.arena.request_update(pid);
                    self.touch_edges_on(pid);
                }
            } else if let Some(n) = self.arena.get_mut(id).and_then(|i| i.node_mut()) {
                if is_port {
                    module::resize_port(n);
                } else {
                    n.fit_to_label();
                }
                n.must_resize = false;
            }
        }
        let (wx, wy) = self.arena.item_to_world(id);
        let new_bounds = self
            .arena
            .get(id)
            .and_then(|i| i.node())
            .map(|n| n.local_bounds().translate(wx, wy))
            .unwrap_or_default();
        let old = self.arena.get(id).map(|i| i.bounds).unwrap_or_default();
        if let Some(item) = self.arena.get_mut(id) {
            item.bounds = new_bounds;
            item.need_update = false;
        }
        if old != new_bounds {
            self.redraw.push(old);
            self.redraw.push(new_bounds);
            self.touch_edges_on(id);
        }
    }

    /// Re-determines the item under the pointer, synthesizing enter/leave.
    /// While a button is down no new item is entered; the enter for
    /// whatever ends up under the pointer happens on release.
    fn repick(&mut self) {
        if self.in_repick {
            return;
        }
        self.in_repick = true;
        self.need_repick = false;

        let new = self.pointer.and_then(|(x, y)| {
            let (wx, wy) = self.viewport.window_to_world(x, y);
            self.pick_item(wx, wy)
        });
        if new != self.current {
            if let Some(c) = self.current.take() {
                self.leave_item(c);
            }
            if self.button_down {
                self.left_grabbed = true;
            }
            if !self.left_grabbed {
                self.current = new;
                if let Some(n) = new {
                    self.enter_item(n);
                }
            }
        }
        self.in_repick = false;
    }

    fn enter_item(&mut self, id: ItemId) {
        if let Some(n) = self.arena.get_mut(id).and_then(|i| i.node_mut()) {
            n.highlighted = true;
        }
        self.redraw_item(id);
    }

    fn leave_item(&mut self, id: ItemId) {
        if let Some(n) = self.arena.get_mut(id).and_then(|i| i.node_mut()) {
            n.highlighted = false;
        }
        self.redraw_item(id);
    }

    fn redraw_item(&mut self, id: ItemId) {
        if let Some(item) = self.arena.get(id) {
            self.redraw.push(item.bounds);
        }
    }

    // ------------------------------------------------------------
    // Painting
    // ------------------------------------------------------------

    /// Hands every visible shape intersecting `clip` (world coordinates) to
    /// the backend, edges below nodes, each at most once.
    pub fn draw(&self, backend: &mut dyn DrawBackend, clip: &Rect) {
        for (eid, e) in self.edges.iter() {
            if e.coords.bounds().intersects(clip) {
                backend.draw_edge(eid, e);
            }
        }
        let children = match self.arena.get(self.root).and_then(|i| i.group()) {
            Some(g) => g.children.clone(),
            None => return,
        };
        for id in children {
            self.draw_item(backend, clip, id);
            let ports = self
                .arena
                .get(id)
                .and_then(|i| i.node())
                .and_then(|n| n.module())
                .map(|m| m.ports.clone())
                .unwrap_or_default();
            for p in ports {
                self.draw_item(backend, clip, p);
            }
        }
        if let DragState::Select { rect } = &self.drag {
            backend.draw_rubber_band(&rect.normalized());
        }
    }

    fn draw_item(&self, backend: &mut dyn DrawBackend, clip: &Rect, id: ItemId) {
        let item = match self.arena.get(id) {
            Some(i) if i.visible => i,
            _ => return,
        };
        if !item.bounds.intersects(clip) {
            return;
        }
        if let Some(node) = item.node() {
            let (wx, wy) = self.arena.item_to_world(id);
            backend.draw_node(id, wx, wy, node);
        }
    }
}

fn node_is_draggable(arena: &ItemArena, id: ItemId) -> bool {
    arena
        .get(id)
        .and_then(|i| i.node())
        .map_or(false, |n| n.draggable)
}
