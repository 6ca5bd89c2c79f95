//! 骨骼系统和 IK 求解器

mod bone;
mod ik_solver;
mod manager;

pub use bone::{Bone, Endpoint, IkConfig, IkLink, InherentLink};
pub use ik_solver::{IkError, IkSolver};
pub use manager::{sort_bones, BoneManager, BoneOrder};
