//! Pointer-free octree construction over Morton-sorted items.
//!
//! The tree is two flat tables linked by signed index deltas
//! (`target - self`): non-negative indices name internal slots, negative
//! ones leaves counted from the end. Every internal slot is filled by an
//! independent per-leaf task in one data-parallel pass, so the structure
//! can be rebuilt from scratch each frame and compacted without chasing
//! pointers.

use std::cmp::Ord;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use rdst::{RadixKey, RadixSort};

use crate::bbox::Aabb;
use crate::morton::{self, MAX_DEPTH};
use crate::node::NodeRef;
use crate::parallel::prefix_count;
use crate::vector::Vec3;

/// Sibling-link value marking an internal slot that lost the boundary
/// contest during construction; such slots are not part of the tree.
pub(crate) const UNREACHABLE: i64 = -1;

/// Entry of the leaf table: one input item in Morton-sorted order.
#[derive(Debug, Clone)]
pub(crate) struct Leaf<T> {
    pub(crate) item: T,
    pub(crate) position: Vec3,
    pub(crate) right_sibling_delta: i64,
}

/// Entry of the internal-node table. The slot at index `i` represents
/// the subtree whose leaf range has a boundary at leaf `i`.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub(crate) struct Internal {
    pub(crate) first_child_delta: i64,
    pub(crate) right_sibling_delta: i64,
}

static_assertions::assert_eq_size!(Internal, [i64; 2]);

/// Parallel octree spatial index over items carrying a 3D position.
///
/// Built once from a snapshot of `(item, position)` pairs and a bound
/// containing all positions; immutable afterwards. Navigation starts at
/// [`Octree::root`].
#[derive(Debug)]
pub struct Octree<T> {
    leaves: Vec<Leaf<T>>,
    internals: Vec<Internal>,
    bound: Aabb,
}

/// Morton key paired with the item's original index. The index is part
/// of the radix key, so equal codes keep insertion order on both sort
/// paths.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct MortonEntry {
    code: u64,
    index: u32,
}

impl RadixKey for MortonEntry {
    const LEVELS: usize = 12;

    #[inline]
    fn get_level(&self, level: usize) -> u8 {
        if level < 4 {
            (self.index >> (level * 8)) as u8
        } else {
            (self.code >> ((level - 4) * 8)) as u8
        }
    }
}

impl Ord for MortonEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.code, self.index).cmp(&(other.code, other.index))
    }
}

impl PartialOrd for MortonEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Wall time of the construction phases, reported at debug level.
#[derive(Debug, Copy, Clone, Default)]
struct BuildStats {
    morton_codes: Duration,
    sort: Duration,
    leaf_init: Duration,
    node_init: Duration,
}

impl BuildStats {
    fn total(&self) -> Duration {
        self.morton_codes + self.sort + self.leaf_init + self.node_init
    }
}

/// Shared mutable view of the two node tables for the parallel link
/// phase.
///
/// Safety: `link_range` gives every written field exactly one writer
/// (each slot's child link is written by the slot's own winning task,
/// each sibling link by the single task that addresses the node as a
/// child), so the raw stores never alias. Payload items are never
/// touched through this view.
struct TablePtrs<T> {
    internals: *mut Internal,
    leaves: *mut Leaf<T>,
    leaf_count: i64,
}

unsafe impl<T> Sync for TablePtrs<T> {}

impl<T> TablePtrs<T> {
    /// Store the sibling link of the node addressed by the signed index
    /// `idx` (negative for leaves).
    ///
    /// Safety: the caller must be the unique writer of that link.
    unsafe fn set_sibling(&self, idx: i64, delta: i64) {
        if idx >= 0 {
            (*self.internals.add(idx as usize)).right_sibling_delta = delta;
        } else {
            (*self.leaves.add((self.leaf_count + idx) as usize)).right_sibling_delta = delta;
        }
    }

    /// Safety: the caller must be the unique writer of that slot's
    /// child link.
    unsafe fn set_first_child(&self, slot: i64, delta: i64) {
        (*self.internals.add(slot as usize)).first_child_delta = delta;
    }
}

/// First index in `[lo, hi)` whose code has a 1 bit at `power`, or `hi`
/// when none has. The codes are sorted and share all bits above
/// `power` within the range, so the digit is monotone across it.
fn split(codes: &[u64], power: u32, lo: i64, hi: i64) -> i64 {
    let (mut a, mut b) = (lo, hi);
    while a < b {
        let mid = (a + b) / 2;
        if morton::digit(power, codes[mid as usize]) == 0 {
            a = mid + 1;
        } else {
            b = mid;
        }
    }
    a
}

/// The per-leaf construction task: decide which subtree boundary leaf
/// `i` belongs to, find the opposite boundary, and emit the node's
/// children into the internal slot at `i`.
fn link_range<T>(codes: &[u64], tables: &TablePtrs<T>, i: i64) {
    // Side selection: the deeper neighbor divergence is the sibling
    // side. Equal depths mean the boundary is interior to a sibling
    // list; the slot then stays unreachable.
    let side = (morton::slotted_sigma(codes, i, i + 1)
        - morton::slotted_sigma(codes, i - 1, i))
        .signum() as i64;
    if side == 0 {
        return;
    }
    let boundary_depth = morton::slotted_sigma(codes, i, i - side);

    // Exponential extension towards the opposite boundary, then binary
    // refinement to the last leaf still sharing more than
    // `boundary_depth` levels.
    let mut step: i64 = 2;
    while morton::slotted_sigma(codes, i, i + step * side) > boundary_depth {
        step *= 2;
    }
    let mut reach: i64 = 0;
    let mut half = step / 2;
    while half >= 1 {
        if morton::slotted_sigma(codes, i, i + (reach + half) * side) > boundary_depth {
            reach += half;
        }
        half /= 2;
    }
    let opposite = i + reach * side;
    let (lo, hi) = if side > 0 {
        (i, opposite + 1)
    } else {
        (opposite, i + 1)
    };

    // A range whose left boundary diverges at exactly the claim depth is
    // claimed from both ends; the left task wins and this slot stays
    // unreachable.
    if side < 0 && morton::slotted_sigma(codes, lo - 1, lo) == boundary_depth {
        return;
    }

    let leaf_count = tables.leaf_count;
    let depth = morton::slotted_sigma(codes, lo, hi - 1);
    if depth >= MAX_DEPTH {
        // Every key in the range is identical: one internal node with
        // all the leaves as direct children.
        unsafe {
            tables.set_first_child(i, (lo - leaf_count) - i);
            for leaf in lo..hi - 1 {
                tables.set_sibling(leaf - leaf_count, 1);
            }
            tables.set_sibling(hi - 1 - leaf_count, 0);
        }
        return;
    }

    // Partition at the three bits of the first divergent level.
    let power = 64 - (1 + depth * 3);
    let mut starts = [0i64; 9];
    starts[0] = lo;
    starts[8] = hi;
    starts[4] = split(codes, (power - 1) as u32, lo, hi);
    starts[2] = split(codes, (power - 2) as u32, lo, starts[4]);
    starts[6] = split(codes, (power - 2) as u32, starts[4], hi);
    starts[1] = split(codes, (power - 3) as u32, lo, starts[2]);
    starts[3] = split(codes, (power - 3) as u32, starts[2], starts[4]);
    starts[5] = split(codes, (power - 3) as u32, starts[4], starts[6]);
    starts[7] = split(codes, (power - 3) as u32, starts[6], starts[8]);

    let mut prev: Option<i64> = None;
    for octant in 0..8 {
        let (a, b) = (starts[octant], starts[octant + 1]);
        if a == b {
            continue;
        }
        // The first child is addressed at the far end of its range so
        // its slot cannot collide with this node's own slot; later
        // children are addressed at their start.
        let child = if b - a == 1 {
            a - leaf_count
        } else if prev.is_none() {
            b - 1
        } else {
            a
        };
        match prev {
            None => unsafe { tables.set_first_child(i, child - i) },
            Some(previous) => unsafe { tables.set_sibling(previous, child - previous) },
        }
        prev = Some(child);
    }
    // terminate the sibling chain at the last child
    unsafe { tables.set_sibling(prev.unwrap(), 0) };
}

impl<T> Octree<T> {
    /// Build the index from a snapshot of items and a bound containing
    /// their positions. Positions outside the bound are clamped onto it
    /// by the key quantization.
    pub fn new(items: impl IntoIterator<Item = (T, Vec3)>, bound: Aabb) -> Self {
        let mut stats = BuildStats::default();
        let mut phase = Instant::now();

        let (mut slots, positions): (Vec<Option<T>>, Vec<Vec3>) = items
            .into_iter()
            .map(|(item, position)| (Some(item), position))
            .unzip();
        let leaf_count = slots.len();

        let mut entries: Vec<MortonEntry> = positions
            .par_iter()
            .enumerate()
            .map(|(index, &position)| MortonEntry {
                code: morton::encode(position, &bound),
                index: index as u32,
            })
            .collect();
        stats.morton_codes = phase.elapsed();
        phase = Instant::now();

        if cfg!(debug_assertions) {
            // rdst relies on wrapping unsigned arithmetic that trips the
            // overflow checks of debug builds, so those get a comparison
            // sort; the composite (code, index) key makes both paths
            // produce the same insertion-order-stable result.
            entries.sort_unstable();
        } else {
            entries.radix_sort_unstable();
        }
        stats.sort = phase.elapsed();
        phase = Instant::now();

        // The sort fixed a bijective placement, so moving the items into
        // leaf order is a plain take-pass.
        let mut leaves = Vec::with_capacity(leaf_count);
        let mut codes = Vec::with_capacity(leaf_count);
        for entry in &entries {
            let index = entry.index as usize;
            leaves.push(Leaf {
                item: slots[index].take().unwrap(),
                position: positions[index],
                right_sibling_delta: 0,
            });
            codes.push(entry.code);
        }
        stats.leaf_init = phase.elapsed();
        phase = Instant::now();

        // Slots start out unreachable; the link phase only ever writes
        // the slots that win their boundary, and each sibling link is
        // written by the one task that addresses the node as a child.
        let mut internals = vec![
            Internal {
                first_child_delta: 0,
                right_sibling_delta: UNREACHABLE,
            };
            leaf_count
        ];
        if leaf_count >= 2 {
            let tables = TablePtrs {
                internals: internals.as_mut_ptr(),
                leaves: leaves.as_mut_ptr(),
                leaf_count: leaf_count as i64,
            };
            (0..leaf_count as i64)
                .into_par_iter()
                .for_each(|i| link_range(&codes, &tables, i));
            // nothing addresses the root, so its chain ends here
            internals[0].right_sibling_delta = 0;
        }
        stats.node_init = phase.elapsed();

        log::debug!(
            "built octree over {} items in {:?} (codes {:?}, sort {:?}, leaves {:?}, nodes {:?})",
            leaf_count,
            stats.total(),
            stats.morton_codes,
            stats.sort,
            stats.leaf_init,
            stats.node_init,
        );

        let tree = Self {
            leaves,
            internals,
            bound,
        };
        #[cfg(debug_assertions)]
        crate::validate::check_structure(&tree);
        tree
    }

    pub fn item_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Length of the internal-node table, including slots construction
    /// left unreachable; [`Octree::compress`] shrinks it to the live
    /// node count.
    pub fn internal_slot_count(&self) -> usize {
        self.internals.len()
    }

    pub fn bound(&self) -> Aabb {
        self.bound
    }

    /// Handle on the root node.
    pub fn root(&self) -> NodeRef<'_, T> {
        assert!(!self.leaves.is_empty(), "empty tree");
        let idx = if self.leaves.len() == 1 { -1 } else { 0 };
        NodeRef::new(self, idx)
    }

    pub(crate) fn leaves(&self) -> &[Leaf<T>] {
        &self.leaves
    }

    pub(crate) fn internal(&self, slot: i64) -> &Internal {
        &self.internals[slot as usize]
    }

    /// Sibling link of the node addressed by the signed index.
    pub(crate) fn sibling_delta(&self, idx: i64) -> i64 {
        if idx >= 0 {
            self.internals[idx as usize].right_sibling_delta
        } else {
            self.leaves[(self.leaves.len() as i64 + idx) as usize].right_sibling_delta
        }
    }
}

impl<T: Send> Octree<T> {
    /// Drop every unreachable internal slot and rewrite all deltas to
    /// the re-packed positions. Returns an equivalent tree; trees too
    /// small to carry redundant slots (and already-compacted trees)
    /// come back unchanged.
    pub fn compress(mut self) -> Self {
        let leaf_count = self.leaves.len();
        if leaf_count < 2 || leaf_count > self.internals.len() {
            return self;
        }
        let start = Instant::now();

        let new_idx = prefix_count(&self.internals, |node| {
            node.right_sibling_delta != UNREACHABLE
        });
        let translate = |target: i64| {
            if target < 0 {
                target
            } else {
                new_idx[target as usize]
            }
        };

        // Prefix counts are monotone, so the order-preserving collect
        // places every survivor at exactly its new index.
        let internals: Vec<Internal> = self
            .internals
            .par_iter()
            .enumerate()
            .filter(|(_, node)| node.right_sibling_delta != UNREACHABLE)
            .map(|(old, node)| {
                let old = old as i64;
                Internal {
                    first_child_delta: translate(old + node.first_child_delta) - new_idx[old as usize],
                    right_sibling_delta: translate(old + node.right_sibling_delta)
                        - new_idx[old as usize],
                }
            })
            .collect();

        // A leaf's sibling link is the only leaf field that can point at
        // an internal slot.
        let offset = leaf_count as i64;
        self.leaves.par_iter_mut().enumerate().for_each(|(i, leaf)| {
            let this = i as i64 - offset;
            let target = this + leaf.right_sibling_delta;
            if target >= 0 {
                leaf.right_sibling_delta = new_idx[target as usize] - this;
            }
        });

        log::debug!(
            "compacted {} internal slots down to {} in {:?}",
            leaf_count,
            internals.len(),
            start.elapsed(),
        );

        let tree = Self {
            leaves: self.leaves,
            internals,
            bound: self.bound,
        };
        #[cfg(debug_assertions)]
        crate::validate::check_structure(&tree);
        tree
    }
}
