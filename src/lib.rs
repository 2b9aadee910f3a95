//! Parallel, pointer-free octree spatial index built from Morton codes.
//!
//! Items carrying a 3D position are sorted along the Z-order curve and a
//! flat internal-node table is filled in one data-parallel pass over the
//! leaf indices. Nodes reference each other through signed index deltas
//! instead of pointers, which is what lets construction run one
//! independent task per leaf and lets compaction relocate nodes by
//! rewriting two tables.

pub mod bbox;
pub mod morton;
pub mod node;
pub mod octree;
pub mod parallel;
pub mod validate;
pub mod vector;

pub use bbox::Aabb;
pub use node::{Children, NodeRef};
pub use octree::Octree;
pub use vector::{vec3, Vec3};
