//! Edges and the connectivity indices.
//!
//! An edge connects a tail node to a head node and is owned by the canvas,
//! never by its endpoints. Geometry (endpoints, curve control points, the
//! midpoint handle) is cached and recomputed whenever an endpoint moves.
//!
//! Connectivity queries go through [`EdgeIndex`]: two ordered sets over the
//! same edge collection, one keyed (tail, head), one keyed (head, tail), so
//! "all edges from X" and "all edges to X" are both range scans. The two
//! sets are mutated together, never one without the other. Ghost edges
//! (connect-drag previews) are excluded from the indices entirely.

use std::collections::BTreeSet;

use crate::geometry::Rect;
use crate::item::ItemId;
use crate::node::EdgeAnchor;

/// Weak handle to an edge, same index + generation scheme as [`ItemId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId {
    index: u32,
    generation: u32,
}

impl EdgeId {
    pub const MIN: EdgeId = EdgeId {
        index: 0,
        generation: 0,
    };
    pub const MAX: EdgeId = EdgeId {
        index: u32::MAX,
        generation: u32::MAX,
    };
}

/// Cached edge geometry in world coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EdgeCoords {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub cx1: f64,
    pub cy1: f64,
    pub cx2: f64,
    pub cy2: f64,
    pub handle_x: f64,
    pub handle_y: f64,
    pub width: f64,
    pub handle_radius: f64,
    pub curved: bool,
    pub arrowhead: bool,
}

impl EdgeCoords {
    pub fn new() -> EdgeCoords {
        EdgeCoords {
            width: 2.0,
            handle_radius: 4.0,
            ..EdgeCoords::default()
        }
    }

    /// Recomputes endpoints, control points, and the handle from the
    /// endpoint anchors. Control points extend along the anchor direction
    /// by a quarter of the horizontal separation.
    pub fn update(&mut self, tail: EdgeAnchor, head: EdgeAnchor) {
        self.x1 = tail.x;
        self.y1 = tail.y;
        self.x2 = head.x;
        self.y2 = head.y;

        let dx = self.x2 - self.x1;
        let dy = self.y2 - self.y1;
        self.handle_x = self.x1 + dx / 2.0;
        self.handle_y = self.y1 + dy / 2.0;

        let reach = (dx.abs().ceil()) / 4.0;
        self.cx1 = self.x1 + tail.dx * reach;
        self.cy1 = self.y1 + tail.dy;
        self.cx2 = self.x2 + head.dx * reach;
        self.cy2 = self.y2 + head.dy;
    }

    /// Bounding box including line width, never zero-area.
    pub fn bounds(&self) -> Rect {
        let w = self.width;
        let mut r = if self.curved {
            Rect {
                x1: self.x1.min(self.cx1).min(self.x2).min(self.cx2) - w,
                y1: self.y1.min(self.cy1).min(self.y2).min(self.cy2) - w,
                x2: self.x1.max(self.cx1).max(self.x2).max(self.cx2) + w,
                y2: self.y1.max(self.cy1).max(self.y2).max(self.cy2) + w,
            }
        } else {
            Rect {
                x1: self.x1.min(self.x2) - w,
                y1: self.y1.min(self.y2) - w,
                x2: self.x1.max(self.x2) + w,
                y2: self.y1.max(self.y2) + w,
            }
        };
        let handle = Rect::new(
            self.handle_x - self.handle_radius,
            self.handle_y - self.handle_radius,
            self.handle_x + self.handle_radius,
            self.handle_y + self.handle_radius,
        );
        r = r.union(&handle);
        if r.x1 == r.x2 {
            r.x2 += 1.0;
        }
        if r.y1 == r.y2 {
            r.y2 += 1.0;
        }
        r
    }

    /// Distance from a world point to the edge's handle disc, 0 inside.
    pub fn distance_to_point(&self, x: f64, y: f64) -> f64 {
        let dx = (x - self.handle_x).abs();
        let dy = (y - self.handle_y).abs();
        let d = (dx * dx + dy * dy).sqrt();
        if d <= self.handle_radius {
            0.0
        } else {
            d - (self.handle_radius + self.width)
        }
    }
}

/// A directed connection between two nodes.
#[derive(Debug)]
pub struct Edge {
    pub tail: ItemId,
    pub head: ItemId,
    pub coords: EdgeCoords,
    pub color: u32,
    pub dash_length: f64,
    pub dash_offset: f64,
    pub selected: bool,
    pub highlighted: bool,
    /// Preview edges outside the indices and connectivity notifications.
    pub ghost: bool,
    pub need_update: bool,
}

impl Edge {
    pub fn new(tail: ItemId, head: ItemId) -> Edge {
        Edge {
            tail,
            head,
            coords: EdgeCoords::new(),
            color: 0xA0A0_A0FF,
            dash_length: 0.0,
            dash_offset: 0.0,
            selected: false,
            highlighted: false,
            ghost: false,
            need_update: true,
        }
    }

    /// True if the edge's handle lies inside a world rectangle; this is
    /// the rubber-band containment test for edges.
    pub fn is_within(&self, rect: &Rect) -> bool {
        rect.contains_point(self.coords.handle_x, self.coords.handle_y)
    }
}

struct Slot {
    generation: u32,
    edge: Option<Edge>,
}

/// Generational arena owning every edge of one canvas.
#[derive(Default)]
pub struct EdgeArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl EdgeArena {
    pub fn new() -> EdgeArena {
        EdgeArena::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, edge: Edge) -> EdgeId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.edge = Some(edge);
            EdgeId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                edge: Some(edge),
            });
            EdgeId {
                index,
                generation: 0,
            }
        }
    }

    pub fn remove(&mut self, id: EdgeId) -> Option<Edge> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation || slot.edge.is_none() {
            return None;
        }
        slot.generation = slot.generation.wrapping_add(1);
        self.len -= 1;
        self.free.push(id.index);
        slot.edge.take()
    }

    pub fn contains(&self, id: EdgeId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: EdgeId) -> Option<&Edge> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.edge.as_ref()
    }

    pub fn get_mut(&mut self, id: EdgeId) -> Option<&mut Edge> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.edge.as_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.edge.as_ref().map(|edge| {
                (
                    EdgeId {
                        index: i as u32,
                        generation: slot.generation,
                    },
                    edge,
                )
            })
        })
    }
}

/// The dual ordered connectivity indices.
#[derive(Default)]
pub struct EdgeIndex {
    by_tail: BTreeSet<(ItemId, ItemId, EdgeId)>,
    by_head: BTreeSet<(ItemId, ItemId, EdgeId)>,
}

impl EdgeIndex {
    pub fn new() -> EdgeIndex {
        EdgeIndex::default()
    }

    pub fn len(&self) -> usize {
        self.by_tail.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_tail.is_empty()
    }

    /// Inserts into both orderings; the caller guarantees the edge is not
    /// a ghost.
    pub fn insert(&mut self, id: EdgeId, tail: ItemId, head: ItemId) {
        self.by_tail.insert((tail, head, id));
        self.by_head.insert((head, tail, id));
    }

    /// Removes from both orderings.
    pub fn remove(&mut self, id: EdgeId, tail: ItemId, head: ItemId) {
        self.by_tail.remove(&(tail, head, id));
        self.by_head.remove(&(head, tail, id));
    }

    /// All edges whose tail is `node`.
    pub fn edges_from(&self, node: ItemId) -> impl Iterator<Item = EdgeId> + '_ {
        self.by_tail
            .range((node, ItemId::MIN, EdgeId::MIN)..=(node, ItemId::MAX, EdgeId::MAX))
            .map(|&(_, _, id)| id)
    }

    /// All edges whose head is `node`.
    pub fn edges_to(&self, node: ItemId) -> impl Iterator<Item = EdgeId> + '_ {
        self.by_head
            .range((node, ItemId::MIN, EdgeId::MIN)..=(node, ItemId::MAX, EdgeId::MAX))
            .map(|&(_, _, id)| id)
    }

    /// All edges touching `node` on either side.
    pub fn edges_on(&self, node: ItemId) -> impl Iterator<Item = EdgeId> + '_ {
        self.edges_from(node).chain(self.edges_to(node))
    }

    /// First edge from `tail` to `head`, if any.
    pub fn first_between(&self, tail: ItemId, head: ItemId) -> Option<EdgeId> {
        self.by_tail
            .range((tail, head, EdgeId::MIN)..=(tail, head, EdgeId::MAX))
            .next()
            .map(|&(_, _, id)| id)
    }

    pub fn are_connected(&self, tail: ItemId, head: ItemId) -> bool {
        self.first_between(tail, head).is_some()
    }

    /// Both orderings must always describe the same edge set.
    #[cfg(test)]
    pub fn check_consistency(&self) -> bool {
        use std::collections::BTreeSet as Set;
        let a: Set<EdgeId> = self.by_tail.iter().map(|&(_, _, id)| id).collect();
        let b: Set<EdgeId> = self.by_head.iter().map(|&(_, _, id)| id).collect();
        a == b && a.len() == self.by_tail.len() && b.len() == self.by_head.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Item, ItemArena, ItemKind};
    use crate::node::{EdgeAnchor, NodeData};
    use proptest::prelude::*;

    fn node_ids(n: usize) -> (ItemArena, Vec<ItemId>) {
        let mut arena = ItemArena::new();
        let ids = (0..n)
            .map(|_| arena.insert(Item::new(ItemKind::Node(NodeData::new_circle(4.0)))))
            .collect();
        (arena, ids)
    }

    // ============================================================
    // Geometry
    // ============================================================

    #[test]
    fn test_handle_sits_at_midpoint() {
        let mut c = EdgeCoords::new();
        c.update(
            EdgeAnchor {
                x: 0.0,
                y: 0.0,
                dx: 1.0,
                dy: 0.0,
            },
            EdgeAnchor {
                x: 100.0,
                y: 40.0,
                dx: -1.0,
                dy: 0.0,
            },
        );
        assert_eq!((c.handle_x, c.handle_y), (50.0, 20.0));
        // Control points reach a quarter of the horizontal separation.
        assert_eq!(c.cx1, 25.0);
        assert_eq!(c.cx2, 75.0);
    }

    #[test]
    fn test_bounds_never_zero_area() {
        let mut c = EdgeCoords::new();
        c.width = 0.0;
        c.handle_radius = 0.0;
        c.update(
            EdgeAnchor {
                x: 5.0,
                y: 5.0,
                dx: 0.0,
                dy: 0.0,
            },
            EdgeAnchor {
                x: 5.0,
                y: 5.0,
                dx: 0.0,
                dy: 0.0,
            },
        );
        let b = c.bounds();
        assert!(b.width() > 0.0 && b.height() > 0.0);
    }

    #[test]
    fn test_distance_is_zero_inside_handle() {
        let mut c = EdgeCoords::new();
        c.update(
            EdgeAnchor {
                x: 0.0,
                y: 0.0,
                dx: 1.0,
                dy: 0.0,
            },
            EdgeAnchor {
                x: 10.0,
                y: 0.0,
                dx: -1.0,
                dy: 0.0,
            },
        );
        assert_eq!(c.distance_to_point(5.0, 0.0), 0.0);
        assert!(c.distance_to_point(5.0, 20.0) > 0.0);
    }

    // ============================================================
    // Arena
    // ============================================================

    #[test]
    fn test_edge_handles_go_stale() {
        let (_, ids) = node_ids(2);
        let mut edges = EdgeArena::new();
        let e = edges.insert(Edge::new(ids[0], ids[1]));
        assert!(edges.contains(e));
        edges.remove(e);
        assert!(!edges.contains(e));
        let e2 = edges.insert(Edge::new(ids[0], ids[1]));
        assert_ne!(e, e2);
    }

    // ============================================================
    // Index
    // ============================================================

    #[test]
    fn test_range_queries() {
        let (_, n) = node_ids(3);
        let mut edges = EdgeArena::new();
        let mut index = EdgeIndex::new();

        let e01 = edges.insert(Edge::new(n[0], n[1]));
        let e02 = edges.insert(Edge::new(n[0], n[2]));
        let e21 = edges.insert(Edge::new(n[2], n[1]));
        index.insert(e01, n[0], n[1]);
        index.insert(e02, n[0], n[2]);
        index.insert(e21, n[2], n[1]);

        let from0: Vec<_> = index.edges_from(n[0]).collect();
        assert_eq!(from0.len(), 2);
        assert!(from0.contains(&e01) && from0.contains(&e02));

        let to1: Vec<_> = index.edges_to(n[1]).collect();
        assert_eq!(to1.len(), 2);
        assert!(to1.contains(&e01) && to1.contains(&e21));

        assert!(index.are_connected(n[0], n[1]));
        assert!(!index.are_connected(n[1], n[0]));
        assert_eq!(index.first_between(n[2], n[1]), Some(e21));

        let on2: Vec<_> = index.edges_on(n[2]).collect();
        assert_eq!(on2.len(), 2);
    }

    #[test]
    fn test_remove_updates_both_orderings() {
        let (_, n) = node_ids(2);
        let mut edges = EdgeArena::new();
        let mut index = EdgeIndex::new();
        let e = edges.insert(Edge::new(n[0], n[1]));
        index.insert(e, n[0], n[1]);
        index.remove(e, n[0], n[1]);
        assert!(index.is_empty());
        assert_eq!(index.edges_to(n[1]).count(), 0);
        assert!(index.check_consistency());
    }

    proptest! {
        /// Random insert/remove interleavings keep the two orderings in
        /// lock step, and range queries agree with brute-force filtering.
        #[test]
        fn test_index_consistency(ops in proptest::collection::vec((0usize..8, 0usize..8, any::<bool>()), 1..64)) {
            let (_, n) = node_ids(8);
            let mut edges = EdgeArena::new();
            let mut index = EdgeIndex::new();
            let mut live: Vec<(EdgeId, ItemId, ItemId)> = Vec::new();

            for (t, h, remove) in ops {
                if remove && !live.is_empty() {
                    let (id, tail, head) = live.swap_remove(t % live.len());
                    edges.remove(id);
                    index.remove(id, tail, head);
                } else {
                    let id = edges.insert(Edge::new(n[t], n[h]));
                    index.insert(id, n[t], n[h]);
                    live.push((id, n[t], n[h]));
                }
                prop_assert!(index.check_consistency());

                for &probe in &n {
                    let from: std::collections::BTreeSet<_> = index.edges_from(probe).collect();
                    let brute: std::collections::BTreeSet<_> = live
                        .iter()
                        .filter(|(_, t2, _)| *t2 == probe)
                        .map(|&(id, _, _)| id)
                        .collect();
                    prop_assert_eq!(from, brute);
                }
            }
        }
    }
}
