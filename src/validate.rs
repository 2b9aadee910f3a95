//! Structural consistency checks shared by the test suites and the
//! builder's debug assertions. A failed check means the builder (not
//! the caller) is wrong, so everything here panics.

use crate::bbox::Aabb;
use crate::morton;
use crate::node::NodeRef;
use crate::octree::Octree;

/// Interior-overlap tolerance for sibling boxes: octant cells share
/// faces, so a touching slab this thin does not count as overlap.
const BOX_EPS: f64 = 1e-12;

/// Walk the whole tree and assert the structural invariants: arity
/// bounds, sentinel-free sibling chains, contiguous child leaf ranges
/// tiling the parent, interior-disjoint child boxes and exact union
/// coverage.
pub fn check_structure<T>(tree: &Octree<T>) {
    if tree.item_count() == 0 {
        return;
    }
    check_node(tree, tree.root());
}

fn check_node<T>(tree: &Octree<T>, node: NodeRef<'_, T>) {
    if node.is_leaf() {
        return;
    }
    let children: Vec<NodeRef<'_, T>> = node.children().collect();
    assert!(
        children.len() >= 2,
        "internal node {} has arity {}",
        node.index(),
        children.len()
    );
    if children.len() > 8 {
        // only a run of identical keys may fan out wider than one level
        let mut keys = node
            .items()
            .map(|(_, position)| morton::encode(position, &tree.bound()));
        let first = keys.next().unwrap();
        assert!(
            children.iter().all(|child| child.is_leaf()) && keys.all(|key| key == first),
            "internal node {} has arity {} without identical keys",
            node.index(),
            children.len()
        );
    }

    // children tile the parent's leaf range in order
    let (lo, hi) = node.leaf_range();
    let mut cursor = lo;
    for child in &children {
        let (child_lo, child_hi) = child.leaf_range();
        assert_eq!(
            child_lo,
            cursor,
            "child ranges of node {} do not tile its leaf range",
            node.index()
        );
        cursor = child_hi;
    }
    assert_eq!(cursor, hi, "children of node {} leave a gap", node.index());

    // sibling boxes are interior-disjoint and union to the parent's box
    let boxes: Vec<Aabb> = children.iter().map(|child| child.bound()).collect();
    if boxes.iter().all(|b| !b.is_empty()) {
        for (a, first) in boxes.iter().enumerate() {
            for second in boxes.iter().skip(a + 1) {
                let overlap = first.intersect(second);
                assert!(
                    overlap.is_empty() || overlap.min_extent() <= BOX_EPS,
                    "sibling boxes of node {} overlap: {} vs {}",
                    node.index(),
                    first,
                    second
                );
            }
        }
        let union = Aabb::bound_of_boxes(boxes.iter().copied());
        assert_eq!(
            union,
            node.bound(),
            "child boxes of node {} do not cover it",
            node.index()
        );
    }

    for child in children {
        check_node(tree, child);
    }
}
