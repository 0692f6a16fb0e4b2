//! The scene-graph item tree.
//!
//! Items live in a generational arena and refer to each other through
//! [`ItemId`] handles (index plus generation). A handle to a destroyed item
//! goes stale rather than dangling: arena lookups return `None` and every
//! canvas-level slot holding the handle is cleared on removal. The tree is
//! strictly a tree — each item has at most one parent group, and the canvas
//! root group reaches every realized item.
//!
//! Items carry only a translation relative to their parent; scale lives in
//! the viewport transform, so item→world conversion is a walk up the parent
//! chain summing positions.

use crate::geometry::Rect;
use crate::node::NodeData;

/// Weak handle to an item: slot index plus generation.
///
/// Ordered (index, then generation) so handles can key ordered sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemId {
    index: u32,
    generation: u32,
}

impl ItemId {
    /// Smallest possible handle, for range scans over ordered sets.
    pub const MIN: ItemId = ItemId {
        index: 0,
        generation: 0,
    };
    /// Largest possible handle, for range scans over ordered sets.
    pub const MAX: ItemId = ItemId {
        index: u32::MAX,
        generation: u32::MAX,
    };
}

/// What an item is. Closed set: the canvas knows every kind.
#[derive(Debug)]
pub enum ItemKind {
    /// Composite holding an ordered child list, drawn back-to-front.
    Group(GroupData),
    /// A connectable entity (box, circle, module, port).
    Node(NodeData),
}

#[derive(Debug, Default)]
pub struct GroupData {
    /// Children in stacking order, first is bottom-most.
    pub children: Vec<ItemId>,
}

/// Common fields of every scene-graph item.
#[derive(Debug)]
pub struct Item {
    /// Position relative to the parent group.
    pub x: f64,
    pub y: f64,
    pub parent: Option<ItemId>,
    pub visible: bool,
    /// World-coordinate bounding box, cached by the update pass.
    pub bounds: Rect,
    pub need_update: bool,
    pub kind: ItemKind,
}

impl Item {
    pub fn new(kind: ItemKind) -> Item {
        Item {
            x: 0.0,
            y: 0.0,
            parent: None,
            visible: true,
            bounds: Rect::default(),
            need_update: true,
            kind,
        }
    }

    pub fn group(&self) -> Option<&GroupData> {
        match &self.kind {
            ItemKind::Group(g) => Some(g),
            _ => None,
        }
    }

    pub fn node(&self) -> Option<&NodeData> {
        match &self.kind {
            ItemKind::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn node_mut(&mut self) -> Option<&mut NodeData> {
        match &mut self.kind {
            ItemKind::Node(n) => Some(n),
            _ => None,
        }
    }
}

struct Slot {
    generation: u32,
    item: Option<Item>,
}

/// Generational arena owning every item of one canvas.
#[derive(Default)]
pub struct ItemArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl ItemArena {
    pub fn new() -> ItemArena {
        ItemArena::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, item: Item) -> ItemId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.item = Some(item);
            ItemId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                item: Some(item),
            });
            ItemId {
                index,
                generation: 0,
            }
        }
    }

    /// Removes the item, invalidating every copy of its handle.
    ///
    /// Tree links are not touched here; [`crate::canvas::Canvas`] detaches
    /// and clears referencing slots before freeing the slot.
    pub fn remove(&mut self, id: ItemId) -> Option<Item> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation || slot.item.is_none() {
            return None;
        }
        slot.generation = slot.generation.wrapping_add(1);
        self.len -= 1;
        self.free.push(id.index);
        slot.item.take()
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.item.as_ref()
    }

    pub fn get_mut(&mut self, id: ItemId) -> Option<&mut Item> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.item.as_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ItemId, &Item)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.item.as_ref().map(|item| {
                (
                    ItemId {
                        index: i as u32,
                        generation: slot.generation,
                    },
                    item,
                )
            })
        })
    }

    // ------------------------------------------------------------
    // Tree structure
    // ------------------------------------------------------------

    /// Sets `child`'s parent link and, when `parent` is a group, appends it
    /// to the child list (top of stacking order). Ports parent under module
    /// nodes; their sibling order lives in the module's port list instead.
    pub fn attach(&mut self, child: ItemId, parent: ItemId) {
        if let Some(item) = self.get_mut(child) {
            item.parent = Some(parent);
        }
        if let Some(ItemKind::Group(g)) = self.get_mut(parent).map(|p| &mut p.kind) {
            g.children.push(child);
        }
    }

    /// Unlinks `child` from its parent's child list.
    pub fn detach(&mut self, child: ItemId) {
        let parent = match self.get(child).and_then(|i| i.parent) {
            Some(p) => p,
            None => return,
        };
        if let Some(ItemKind::Group(g)) = self.get_mut(parent).map(|p| &mut p.kind) {
            g.children.retain(|&c| c != child);
        }
        if let Some(item) = self.get_mut(child) {
            item.parent = None;
        }
    }

    /// Moves `id` to the top of its parent's stacking order.
    pub fn raise_to_top(&mut self, id: ItemId) {
        let parent = match self.get(id).and_then(|i| i.parent) {
            Some(p) => p,
            None => return,
        };
        if let Some(ItemKind::Group(g)) = self.get_mut(parent).map(|p| &mut p.kind) {
            g.children.retain(|&c| c != id);
            g.children.push(id);
        }
    }

    /// Moves `id` to the bottom of its parent's stacking order.
    pub fn lower_to_bottom(&mut self, id: ItemId) {
        let parent = match self.get(id).and_then(|i| i.parent) {
            Some(p) => p,
            None => return,
        };
        if let Some(ItemKind::Group(g)) = self.get_mut(parent).map(|p| &mut p.kind) {
            g.children.retain(|&c| c != id);
            g.children.insert(0, id);
        }
    }

    /// Sums translations up the parent chain: the item's origin in world
    /// coordinates.
    pub fn item_to_world(&self, id: ItemId) -> (f64, f64) {
        let mut x = 0.0;
        let mut y = 0.0;
        let mut cur = Some(id);
        while let Some(i) = cur {
            match self.get(i) {
                Some(item) => {
                    x += item.x;
                    y += item.y;
                    cur = item.parent;
                }
                None => break,
            }
        }
        (x, y)
    }

    /// World origin of the item's parent (identity for root-level items).
    pub fn parent_to_world(&self, id: ItemId) -> (f64, f64) {
        match self.get(id).and_then(|i| i.parent) {
            Some(p) => self.item_to_world(p),
            None => (0.0, 0.0),
        }
    }

    /// True if `id` equals `ancestor` or sits below it in the tree.
    pub fn is_descendant(&self, id: ItemId, ancestor: ItemId) -> bool {
        let mut cur = Some(id);
        while let Some(i) = cur {
            if i == ancestor {
                return true;
            }
            cur = self.get(i).and_then(|item| item.parent);
        }
        false
    }

    /// Marks `id` and every ancestor as needing an update pass.
    pub fn request_update(&mut self, id: ItemId) -> bool {
        let mut cur = Some(id);
        let mut marked = false;
        while let Some(i) = cur {
            match self.get_mut(i) {
                Some(item) => {
                    item.need_update = true;
                    marked = true;
                    cur = item.parent;
                }
                None => break,
            }
        }
        marked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeData;

    fn group() -> Item {
        Item::new(ItemKind::Group(GroupData::default()))
    }

    fn node() -> Item {
        Item::new(ItemKind::Node(NodeData::new_box()))
    }

    // ============================================================
    // Arena handles
    // ============================================================

    #[test]
    fn test_handles_go_stale_after_remove() {
        let mut arena = ItemArena::new();
        let id = arena.insert(node());
        assert!(arena.contains(id));
        arena.remove(id);
        assert!(!arena.contains(id));
        assert!(arena.get(id).is_none());
        assert!(arena.remove(id).is_none());
    }

    #[test]
    fn test_slot_reuse_bumps_generation() {
        let mut arena = ItemArena::new();
        let a = arena.insert(node());
        arena.remove(a);
        let b = arena.insert(node());
        // Same slot, different handle: the old handle must not resolve.
        assert_ne!(a, b);
        assert!(arena.get(a).is_none());
        assert!(arena.get(b).is_some());
        assert_eq!(arena.len(), 1);
    }

    // ============================================================
    // Tree structure
    // ============================================================

    #[test]
    fn test_attach_detach_maintains_child_list() {
        let mut arena = ItemArena::new();
        let root = arena.insert(group());
        let a = arena.insert(node());
        let b = arena.insert(node());
        arena.attach(a, root);
        arena.attach(b, root);
        assert_eq!(arena.get(root).unwrap().group().unwrap().children, vec![a, b]);

        arena.detach(a);
        assert_eq!(arena.get(root).unwrap().group().unwrap().children, vec![b]);
        assert!(arena.get(a).unwrap().parent.is_none());
    }

    #[test]
    fn test_stacking_order_ops() {
        let mut arena = ItemArena::new();
        let root = arena.insert(group());
        let a = arena.insert(node());
        let b = arena.insert(node());
        let c = arena.insert(node());
        for id in [a, b, c] {
            arena.attach(id, root);
        }

        arena.raise_to_top(a);
        assert_eq!(arena.get(root).unwrap().group().unwrap().children, vec![b, c, a]);
        arena.lower_to_bottom(c);
        assert_eq!(arena.get(root).unwrap().group().unwrap().children, vec![c, b, a]);
    }

    #[test]
    fn test_item_to_world_sums_parent_chain() {
        let mut arena = ItemArena::new();
        let root = arena.insert(group());
        let inner = arena.insert(group());
        let leaf = arena.insert(node());
        arena.attach(inner, root);
        arena.attach(leaf, inner);

        arena.get_mut(inner).unwrap().x = 10.0;
        arena.get_mut(inner).unwrap().y = 20.0;
        arena.get_mut(leaf).unwrap().x = 3.0;
        arena.get_mut(leaf).unwrap().y = 4.0;

        assert_eq!(arena.item_to_world(leaf), (13.0, 24.0));
        assert_eq!(arena.parent_to_world(leaf), (10.0, 20.0));
    }

    #[test]
    fn test_is_descendant() {
        let mut arena = ItemArena::new();
        let root = arena.insert(group());
        let inner = arena.insert(group());
        let leaf = arena.insert(node());
        let other = arena.insert(node());
        arena.attach(inner, root);
        arena.attach(leaf, inner);
        arena.attach(other, root);

        assert!(arena.is_descendant(leaf, root));
        assert!(arena.is_descendant(leaf, inner));
        assert!(arena.is_descendant(leaf, leaf));
        assert!(!arena.is_descendant(other, inner));
    }

    #[test]
    fn test_request_update_marks_ancestors() {
        let mut arena = ItemArena::new();
        let root = arena.insert(group());
        let inner = arena.insert(group());
        let leaf = arena.insert(node());
        arena.attach(inner, root);
        arena.attach(leaf, inner);
        for id in [root, inner, leaf] {
            arena.get_mut(id).unwrap().need_update = false;
        }

        arena.request_update(leaf);
        assert!(arena.get(leaf).unwrap().need_update);
        assert!(arena.get(inner).unwrap().need_update);
        assert!(arena.get(root).unwrap().need_update);
    }
}
