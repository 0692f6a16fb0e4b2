//! Layered arrangement of the patch graph.
//!
//! Wraps the `rust-sugiyama` solver: modules become vertices, connections
//! become layering constraints, and the result is a column (or row) per
//! layer in flow order. The canvas drives this through its arrange
//! operation; the free function also works on any handle/size list.
//!
//! Requires the `layout` feature to be enabled.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use crate::geometry::Direction;
use crate::item::{ItemArena, ItemId};

/// A solved position, by the same handle that went in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodePosition {
    pub id: ItemId,
    /// Top-left corner of the node.
    pub x: f64,
    /// Top-left corner of the node.
    pub y: f64,
}

/// Knobs forwarded to the solver. Zero values keep the solver's own
/// defaults (10.0 spacing, minimum length 1).
#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
pub struct SugiyamaConfig {
    pub vertex_spacing: f64,
    pub minimum_length: u32,
    pub dummy_vertices: bool,
    /// Flow direction the layers follow.
    pub direction: Direction,
}

/// Solves layered positions for `node_sizes`, with `edges` as
/// `(tail, head)` layering constraints.
///
/// Handles are arbitrary; they are compacted to dense solver indices and
/// mapped back on the way out. A handle repeated in `node_sizes` keeps
/// its first size, and edges naming unknown handles are dropped.
pub fn sugiyama_layout(
    edges: &[(ItemId, ItemId)],
    node_sizes: &[(ItemId, (f64, f64))],
    config: &SugiyamaConfig,
) -> Vec<NodePosition> {
    if node_sizes.is_empty() {
        return Vec::new();
    }

    let flip = config.direction == Direction::Right;

    let mut index: HashMap<ItemId, u32> = HashMap::with_capacity(node_sizes.len());
    let mut handles: Vec<ItemId> = Vec::with_capacity(node_sizes.len());
    let mut vertices: Vec<(u32, (f64, f64))> = Vec::with_capacity(node_sizes.len());
    for &(id, (w, h)) in node_sizes {
        if let Entry::Vacant(slot) = index.entry(id) {
            let idx = handles.len() as u32;
            slot.insert(idx);
            handles.push(id);
            // The solver stacks layers along y. For rightward flow the
            // extents go in swapped, so spacing lands on the axis that
            // ends up horizontal.
            vertices.push((idx, if flip { (h, w) } else { (w, h) }));
        }
    }

    let mapped: Vec<(u32, u32)> = edges
        .iter()
        .filter_map(|&(tail, head)| Some((*index.get(&tail)?, *index.get(&head)?)))
        .collect();

    let mut solver = rust_sugiyama::configure::Config {
        dummy_vertices: config.dummy_vertices,
        ..Default::default()
    };
    if config.vertex_spacing > 0.0 {
        solver.vertex_spacing = config.vertex_spacing;
    }
    if config.minimum_length > 0 {
        solver.minimum_length = config.minimum_length;
    }

    // One entry per connected component.
    let components = rust_sugiyama::from_vertices_and_edges(&vertices, &mapped, &solver);

    let mut out = Vec::with_capacity(handles.len());
    for (positions, _width, _height) in &components {
        for &(idx, (x, y)) in positions {
            if let Some(&id) = handles.get(idx) {
                let (x, y) = if flip { (y, x) } else { (x, y) };
                out.push(NodePosition { id, x, y });
            }
        }
    }
    out
}

/// Solves layered positions for the top-level nodes of an item tree.
///
/// Attachment points in `edges` (ports, or nodes when an edge attaches to a
/// node directly) are resolved to their owning top-level node via the parent
/// chain. Self-loops are skipped, and multiple connections between the same
/// node pair are deduplicated before being passed to the layout algorithm.
pub fn sugiyama_layout_for_items(
    arena: &ItemArena,
    root: ItemId,
    edges: &[(ItemId, ItemId)],
    config: &SugiyamaConfig,
) -> Vec<NodePosition> {
    // Walk up to the child of `root` (or the topmost ancestor).
    let resolve = |mut id: ItemId| -> Option<ItemId> {
        loop {
            let item = arena.get(id)?;
            match item.parent {
                Some(p) if p == root => return Some(id),
                Some(p) => id = p,
                None => return Some(id),
            }
        }
    };

    let node_edges: Vec<(ItemId, ItemId)> = edges
        .iter()
        .filter_map(|&(tail, head)| {
            let src = resolve(tail)?;
            let dst = resolve(head)?;
            if src == dst {
                return None;
            }
            Some((src, dst))
        })
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();

    // Sizes come from the top-level children's bounding boxes.
    let node_sizes: Vec<(ItemId, (f64, f64))> = arena
        .get(root)
        .and_then(|r| r.group())
        .map(|g| {
            g.children
                .iter()
                .filter_map(|&id| {
                    let node = arena.get(id)?.node()?;
                    let b = node.local_bounds();
                    Some((id, (b.width(), b.height())))
                })
                .collect()
        })
        .unwrap_or_default();

    sugiyama_layout(&node_edges, &node_sizes, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{GroupData, Item, ItemKind};
    use crate::module::{self, ModuleData};
    use crate::node::{BoxKind, NodeData};

    fn pos_map(positions: Vec<NodePosition>) -> HashMap<ItemId, (f64, f64)> {
        positions.into_iter().map(|p| (p.id, (p.x, p.y))).collect()
    }

    /// Fabricate distinct handles for the free-function tests.
    fn handles(n: u32) -> Vec<ItemId> {
        let mut arena = ItemArena::new();
        (0..n)
            .map(|_| arena.insert(Item::new(ItemKind::Group(Default::default()))))
            .collect()
    }

    fn uniform_sizes(h: &[ItemId]) -> Vec<(ItemId, (f64, f64))> {
        h.iter().map(|&id| (id, (80.0, 40.0))).collect()
    }

    fn down() -> SugiyamaConfig {
        SugiyamaConfig {
            direction: Direction::Down,
            ..Default::default()
        }
    }

    // ============================================================
    // Solver wrapper
    // ============================================================

    #[test]
    fn test_no_nodes_yields_no_positions() {
        assert!(sugiyama_layout(&[], &[], &SugiyamaConfig::default()).is_empty());
    }

    #[test]
    fn test_edge_orders_layers_along_the_flow() {
        let h = handles(2);
        let sizes = uniform_sizes(&h);
        let edge = [(h[0], h[1])];

        let pos = pos_map(sugiyama_layout(&edge, &sizes, &down()));
        assert!(pos[&h[0]].1 < pos[&h[1]].1, "tail should land upstream");

        let pos = pos_map(sugiyama_layout(&edge, &sizes, &SugiyamaConfig::default()));
        assert!(
            pos[&h[0]].0 < pos[&h[1]].0,
            "rightward flow should separate layers in x instead"
        );
    }

    #[test]
    fn test_diamond_shares_a_middle_layer() {
        let h = handles(4);
        let edges = [(h[0], h[1]), (h[0], h[2]), (h[1], h[3]), (h[2], h[3])];
        let pos = pos_map(sugiyama_layout(&edges, &uniform_sizes(&h), &down()));

        assert_eq!(pos.len(), 4);
        assert!(pos[&h[0]].1 < pos[&h[3]].1, "source upstream of sink");
        let (mid_a, mid_b) = (pos[&h[1]].1, pos[&h[2]].1);
        assert!((mid_a - mid_b).abs() < 1.0, "branches share a layer");
    }

    #[test]
    fn test_rightward_diamond_layers_run_in_x() {
        let h = handles(4);
        let edges = [(h[0], h[1]), (h[0], h[2]), (h[1], h[3]), (h[2], h[3])];
        let pos = pos_map(sugiyama_layout(
            &edges,
            &uniform_sizes(&h),
            &SugiyamaConfig::default(),
        ));

        assert!(pos[&h[0]].0 < pos[&h[3]].0);
        assert!((pos[&h[1]].0 - pos[&h[2]].0).abs() < 1.0);
    }

    #[test]
    fn test_edges_naming_unknown_handles_are_dropped() {
        let h = handles(2);
        let sizes = vec![(h[0], (80.0, 40.0))];
        let result = sugiyama_layout(&[(h[0], h[1])], &sizes, &SugiyamaConfig::default());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, h[0]);
    }

    #[test]
    fn test_repeated_handles_keep_their_first_size() {
        let id = handles(1)[0];
        let sizes = vec![(id, (80.0, 40.0)), (id, (500.0, 500.0))];
        let result = sugiyama_layout(&[], &sizes, &SugiyamaConfig::default());
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, id);
    }

    #[test]
    fn test_disconnected_components_are_each_layered() {
        let h = handles(4);
        let edges = [(h[0], h[1]), (h[2], h[3])];
        let pos = pos_map(sugiyama_layout(&edges, &uniform_sizes(&h), &down()));

        assert_eq!(pos.len(), 4);
        assert!(pos[&h[0]].1 < pos[&h[1]].1);
        assert!(pos[&h[2]].1 < pos[&h[3]].1);
    }

    #[test]
    fn test_cycle_still_positions_every_node() {
        let h = handles(3);
        let edges = [(h[0], h[1]), (h[1], h[2]), (h[2], h[0])];
        let result = sugiyama_layout(&edges, &uniform_sizes(&h), &SugiyamaConfig::default());

        assert_eq!(result.len(), 3);
        for p in result {
            assert!(p.x.is_finite() && p.y.is_finite());
        }
    }

    // ============================================================
    // Item-tree front end
    // ============================================================

    /// Build an arena with a root group, `n` module nodes under it, and one
    /// port under each module. Returns (arena, root, modules, ports).
    fn make_tree(n: usize) -> (ItemArena, ItemId, Vec<ItemId>, Vec<ItemId>) {
        let mut arena = ItemArena::new();
        let root = arena.insert(Item::new(ItemKind::Group(GroupData::default())));
        let mut modules = Vec::new();
        let mut ports = Vec::new();
        for _ in 0..n {
            let mut data = NodeData::new_box();
            data.box_shape_mut().unwrap().kind = BoxKind::Module(ModuleData::new());
            data.box_shape_mut().unwrap().set_width(100.0);
            data.box_shape_mut().unwrap().set_height(50.0);
            let m = arena.insert(Item::new(ItemKind::Node(data)));
            arena.attach(m, root);
            let p = arena.insert(Item::new(ItemKind::Node(module::new_port(false))));
            arena.attach(p, m);
            modules.push(m);
            ports.push(p);
        }
        (arena, root, modules, ports)
    }

    #[test]
    fn test_for_items_resolves_ports_to_modules() {
        let (arena, root, modules, ports) = make_tree(2);
        let result = sugiyama_layout_for_items(&arena, root, &[(ports[0], ports[1])], &down());
        let pos = pos_map(result);

        assert_eq!(pos.len(), 2);
        assert!(
            pos[&modules[0]].1 < pos[&modules[1]].1,
            "the feeding module lands in an earlier layer"
        );
    }

    #[test]
    fn test_for_items_skips_self_loops() {
        let (mut arena, root, modules, ports) = make_tree(1);
        // Second port on the same module.
        let p2 = arena.insert(Item::new(ItemKind::Node(module::new_port(true))));
        arena.attach(p2, modules[0]);

        let result = sugiyama_layout_for_items(
            &arena,
            root,
            &[(ports[0], p2)],
            &SugiyamaConfig::default(),
        );

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, modules[0]);
    }

    #[test]
    fn test_for_items_deduplicates_parallel_connections() {
        let (mut arena, root, modules, ports) = make_tree(2);
        // Second pair of ports between the same two modules.
        let pa = arena.insert(Item::new(ItemKind::Node(module::new_port(false))));
        arena.attach(pa, modules[0]);
        let pb = arena.insert(Item::new(ItemKind::Node(module::new_port(true))));
        arena.attach(pb, modules[1]);

        let result = sugiyama_layout_for_items(
            &arena,
            root,
            &[(ports[0], ports[1]), (pa, pb)],
            &SugiyamaConfig::default(),
        );

        assert_eq!(result.len(), 2);
        let pos = pos_map(result);
        assert!(pos.contains_key(&modules[0]));
        assert!(pos.contains_key(&modules[1]));
    }

    #[test]
    fn test_for_items_skips_stale_handles() {
        let (mut arena, root, modules, ports) = make_tree(2);
        let stale = ports[1];
        arena.detach(stale);
        arena.remove(stale);

        let result = sugiyama_layout_for_items(
            &arena,
            root,
            &[(ports[0], stale)],
            &SugiyamaConfig::default(),
        );

        // Both modules still appear; the broken edge is ignored.
        assert_eq!(result.len(), 2);
        let pos = pos_map(result);
        assert!(pos.contains_key(&modules[0]));
        assert!(pos.contains_key(&modules[1]));
    }

    #[test]
    fn test_for_items_empty_canvas() {
        let mut arena = ItemArena::new();
        let root = arena.insert(Item::new(ItemKind::Group(GroupData::default())));
        let result = sugiyama_layout_for_items(&arena, root, &[], &SugiyamaConfig::default());
        assert!(result.is_empty());
    }

    #[test]
    fn test_for_items_accepts_direct_node_attachment() {
        // Edges attached to a top-level node without a port resolve to the
        // node itself.
        let (arena, root, modules, _) = make_tree(2);
        let result =
            sugiyama_layout_for_items(&arena, root, &[(modules[0], modules[1])], &down());
        let pos = pos_map(result);
        assert!(pos[&modules[0]].1 < pos[&modules[1]].1);
    }
}
