use crate::bbox::Aabb;
use crate::octree::{Octree, UNREACHABLE};
use crate::vector::Vec3;

/// Lightweight handle addressing one node of an [`Octree`].
///
/// Non-negative indices name internal slots, negative ones leaves (−1
/// is the last leaf). The handle borrows the tree and every traversal
/// restarts from the stored delta chain, so iterating holds no state on
/// the tree itself.
#[derive(Debug)]
pub struct NodeRef<'a, T> {
    tree: &'a Octree<T>,
    idx: i64,
}

impl<'a, T> Copy for NodeRef<'a, T> {}

impl<'a, T> Clone for NodeRef<'a, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, T> NodeRef<'a, T> {
    pub(crate) fn new(tree: &'a Octree<T>, idx: i64) -> Self {
        Self { tree, idx }
    }

    /// Signed node address: non-negative for internals, negative for
    /// leaves.
    pub fn index(&self) -> i64 {
        self.idx
    }

    pub fn is_leaf(&self) -> bool {
        self.idx < 0
    }

    /// Number of children; zero for leaves.
    pub fn arity(&self) -> usize {
        self.children().count()
    }

    /// The sibling-linked children, left to right. Leaves yield an empty
    /// sequence.
    pub fn children(&self) -> Children<'a, T> {
        let first = if self.is_leaf() {
            None
        } else {
            Some(self.idx + self.tree.internal(self.idx).first_child_delta)
        };
        Children {
            tree: self.tree,
            next: first,
        }
    }

    /// The contiguous range this node's leaves occupy in the
    /// Morton-sorted leaf table.
    pub fn leaf_range(&self) -> (usize, usize) {
        let leaf_count = self.tree.leaves().len() as i64;
        if self.is_leaf() {
            let at = (leaf_count + self.idx) as usize;
            return (at, at + 1);
        }
        let mut first = *self;
        while !first.is_leaf() {
            first = first.children().next().unwrap();
        }
        let mut last = *self;
        while !last.is_leaf() {
            last = last.children().last().unwrap();
        }
        (
            (leaf_count + first.idx) as usize,
            (leaf_count + last.idx) as usize + 1,
        )
    }

    /// The node's items with their positions, lazily, in Morton order.
    pub fn items(&self) -> impl Iterator<Item = (&'a T, Vec3)> {
        let (lo, hi) = self.leaf_range();
        self.tree.leaves()[lo..hi]
            .iter()
            .map(|leaf| (&leaf.item, leaf.position))
    }

    /// Tight bounding box of the node's item positions; empty when the
    /// positions do not pin one down.
    pub fn bound(&self) -> Aabb {
        Aabb::bound_of_points(self.items().map(|(_, position)| position))
            .unwrap_or(Aabb::EMPTY)
    }
}

/// Lazy, restartable child iterator following the sibling chain.
pub struct Children<'a, T> {
    tree: &'a Octree<T>,
    next: Option<i64>,
}

impl<'a, T> Iterator for Children<'a, T> {
    type Item = NodeRef<'a, T>;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.next?;
        let delta = self.tree.sibling_delta(idx);
        if idx >= 0 {
            assert!(
                delta != UNREACHABLE,
                "unreachable internal slot {idx} linked into a sibling chain"
            );
        }
        self.next = (delta != 0).then(|| idx + delta);
        Some(NodeRef::new(self.tree, idx))
    }
}

#[cfg(test)]
mod node_test {
    use crate::bbox::Aabb;
    use crate::octree::Octree;
    use crate::vector::vec3;

    fn unit_bound() -> Aabb {
        Aabb::new(vec3(0.0, 0.0, 0.0), vec3(1.0, 1.0, 1.0))
    }

    #[test]
    fn traversals_restart_from_scratch() {
        let tree = Octree::new(
            (0..8u32).map(|k| {
                let p = 0.25 + 0.5 * ((k >> 2) & 1) as f64;
                let q = 0.25 + 0.5 * ((k >> 1) & 1) as f64;
                let r = 0.25 + 0.5 * (k & 1) as f64;
                (k, vec3(p, q, r))
            }),
            unit_bound(),
        );
        let root = tree.root();
        let first: Vec<i64> = root.children().map(|c| c.index()).collect();
        let second: Vec<i64> = root.children().map(|c| c.index()).collect();
        assert_eq!(first, second);
        let items_twice: (usize, usize) = (root.items().count(), root.items().count());
        assert_eq!(items_twice, (8, 8));
    }

    #[test]
    fn leaf_handles_have_no_children() {
        let tree = Octree::new([(7u32, vec3(0.5, 0.5, 0.5))], unit_bound());
        let root = tree.root();
        assert!(root.is_leaf());
        assert_eq!(root.arity(), 0);
        assert_eq!(root.children().count(), 0);
        assert_eq!(root.leaf_range(), (0, 1));
    }

    #[test]
    fn bound_is_tight_over_item_positions() {
        let tree = Octree::new(
            [
                (0u32, vec3(0.25, 0.25, 0.25)),
                (1u32, vec3(0.75, 0.5, 0.25)),
            ],
            unit_bound(),
        );
        let bound = tree.root().bound();
        assert_eq!(bound.origin(), vec3(0.25, 0.25, 0.25));
        assert_eq!(bound.max_corner(), vec3(0.75, 0.5, 0.25));
    }
}
