//! # Patch Canvas
//!
//! A headless scene graph for patchbay-style diagrams: modules with rows of
//! input and output ports, free-floating circle nodes, and curved edges
//! between them. The crate owns structure, geometry, interaction, and
//! damage tracking; it draws nothing and opens no windows. A host feeds
//! pointer and key events in, calls [`Canvas::tick`] to reconcile deferred
//! work, and hands the resulting shapes to its own renderer through
//! [`DrawBackend`].
//!
//! ## Core Types
//!
//! - [`Canvas`] - Owns the item tree, edges, selection, and interaction state
//! - [`ItemId`] / [`EdgeId`] - Generational weak handles; destruction never dangles
//! - [`Notification`] - Connect/disconnect proposals and value changes for the host
//! - [`TextMeasure`] - Host-supplied font metrics
//! - [`DrawBackend`] - Shape sink for a paint pass
//!
//! ## Quick Start
//!
//! ```
//! use std::rc::Rc;
//! use patch_canvas::{Canvas, CanvasOptions, FixedMetrics};
//!
//! let mut canvas = Canvas::new(Rc::new(FixedMetrics::default()), CanvasOptions::default());
//! let osc = canvas.create_module("oscillator");
//! let out = canvas.create_port(osc, "out", false).unwrap();
//! let amp = canvas.create_module("amp");
//! canvas.move_node_to(amp, 200.0, 0.0).unwrap();
//! let inp = canvas.create_port(amp, "in", true).unwrap();
//! canvas.add_edge(out, inp).unwrap();
//! let damage = canvas.tick();
//! assert!(!damage.is_empty());
//! ```
//!
//! The optional `layout` feature adds [`Canvas::arrange`], a static
//! hierarchical arrangement backed by `rust-sugiyama`; the always-available
//! sprung layout lives in [`force`] and runs through [`Canvas::layout_tick`].

pub mod canvas;
pub mod edge;
pub mod error;
pub mod force;
pub mod geometry;
pub mod input;
pub mod item;
#[cfg(feature = "layout")]
pub mod layout;
pub mod module;
pub mod node;
pub mod text;

pub use canvas::{
    Canvas, CanvasOptions, ControlDragOptions, DragState, DrawBackend, Notification, Pick,
    PortOrder,
};
pub use edge::{Edge, EdgeCoords, EdgeId};
pub use error::CanvasError;
pub use force::ForceOptions;
pub use geometry::{Direction, Rect, Viewport};
pub use input::{Button, Event, Key, Modifiers, ScrollDelta};
pub use item::{Item, ItemArena, ItemId, ItemKind};
#[cfg(feature = "layout")]
pub use layout::{sugiyama_layout, sugiyama_layout_for_items, NodePosition, SugiyamaConfig};
pub use module::{ModuleData, PortControl, PortData};
pub use node::{BoxKind, BoxShape, CircleShape, Label, NodeData, NodeShape};
pub use text::{FixedMetrics, TextMeasure};
