//! IK 求解器
//!
//! CCD 风格的循环求解：每次迭代按链顺序旋转每个关节，使关节到效应器的方向
//! 对准关节到目标（IK 骨骼）的方向。单步角度受 `angle_limit × (j+1) × 2` 约束，
//! 有角度限制的关节在前半迭代中旋转后投影回各轴范围。求解不会失败，退化方向直接跳过。

use glam::{EulerRot, Quat, Vec3};

use super::bone::{Bone, IkConfig};
use super::manager::update_subtree;

/// 小于此角度的修正视为已对齐
const MIN_ANGLE: f32 = 1.0e-5;
/// 方向/轴长度平方的退化阈值
const DEGENERATE: f32 = 1.0e-10;
/// 角度范围宽度小于此值视为锁定轴
const LOCKED_RANGE: f32 = 1.0e-6;

/// 求解误差
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IkError {
    /// 效应器到目标的距离
    pub distance: f32,
    /// 链根关节处，根→效应器与根→目标两个方向的夹角
    pub angle: f32,
}

/// IK 求解器
#[derive(Clone, Debug)]
pub struct IkSolver {
    /// IK 骨骼（目标）
    pub bone_index: usize,
    pub config: IkConfig,
    pub enabled: bool,
}

impl IkSolver {
    pub fn new(bone_index: usize, config: IkConfig) -> Self {
        Self {
            bone_index,
            config,
            enabled: true,
        }
    }

    /// 求解 IK
    pub fn solve(&self, bones: &mut [Bone], children: &[Vec<usize>]) {
        self.run(bones, children, None);
    }

    /// 求解并记录误差：第一项为求解前，之后每次迭代一项（恢复最佳结果之前的值）
    pub fn solve_with_trace(&self, bones: &mut [Bone], children: &[Vec<usize>]) -> Vec<IkError> {
        let mut trace = Vec::with_capacity(self.config.iterations as usize + 1);
        self.run(bones, children, Some(&mut trace));
        trace
    }

    fn measure(&self, bones: &[Bone], target: Vec3) -> IkError {
        let effector = bones[self.config.effector_index].world_position();
        let root = self
            .config
            .links
            .last()
            .and_then(|link| bones.get(link.bone_index))
            .map_or(effector, Bone::world_position);
        let to_effector = effector - root;
        let to_target = target - root;
        let degenerate =
            to_effector.length_squared() < DEGENERATE || to_target.length_squared() < DEGENERATE;
        let angle = if degenerate {
            0.0
        } else {
            to_effector.angle_between(to_target)
        };
        IkError {
            distance: effector.distance(target),
            angle,
        }
    }

    fn run(&self, bones: &mut [Bone], children: &[Vec<usize>], mut trace: Option<&mut Vec<IkError>>) {
        if !self.enabled || self.config.links.is_empty() {
            return;
        }
        let effector = self.config.effector_index;
        if effector >= bones.len() || self.bone_index >= bones.len() {
            return;
        }

        for link in &self.config.links {
            if link.bone_index < bones.len() {
                bones[link.bone_index].ik_rotation = Quat::IDENTITY;
                update_subtree(bones, children, link.bone_index);
            }
        }

        let target = bones[self.bone_index].world_position();
        let mut best_distance = bones[effector].world_position().distance(target);
        let mut best: Vec<Quat> = self
            .config
            .links
            .iter()
            .map(|link| bones.get(link.bone_index).map_or(Quat::IDENTITY, |b| b.ik_rotation))
            .collect();
        if let Some(trace) = trace.as_deref_mut() {
            trace.push(self.measure(bones, target));
        }

        for iteration in 0..self.config.iterations {
            self.solve_core(bones, children, target, iteration);

            let distance = bones[effector].world_position().distance(target);
            if let Some(trace) = trace.as_deref_mut() {
                trace.push(self.measure(bones, target));
            }
            if distance < best_distance {
                best_distance = distance;
                for (saved, link) in best.iter_mut().zip(&self.config.links) {
                    *saved = bones[link.bone_index].ik_rotation;
                }
            } else {
                // 没有改善，恢复最佳结果后结束
                for (saved, link) in best.iter().zip(&self.config.links) {
                    bones[link.bone_index].ik_rotation = *saved;
                    update_subtree(bones, children, link.bone_index);
                }
                break;
            }
        }
    }

    /// 一次迭代
    fn solve_core(&self, bones: &mut [Bone], children: &[Vec<usize>], target: Vec3, iteration: u32) {
        let effector = self.config.effector_index;

        for (j, link) in self.config.links.iter().enumerate() {
            let index = link.bone_index;
            if index >= bones.len() || index == effector {
                continue;
            }

            let inverse = bones[index].global_transform.inverse();
            let to_effector = inverse.transform_point3(bones[effector].world_position());
            let to_target = inverse.transform_point3(target);
            if to_effector.length_squared() < DEGENERATE || to_target.length_squared() < DEGENERATE {
                continue;
            }
            let to_effector = to_effector.normalize();
            let to_target = to_target.normalize();

            let angle = to_effector.dot(to_target).clamp(-1.0, 1.0).acos();
            if angle < MIN_ANGLE {
                continue;
            }
            let axis = to_effector.cross(to_target);
            if axis.length_squared() < DEGENERATE {
                continue;
            }
            let step_limit = self.config.angle_limit * (j as f32 + 1.0) * 2.0;
            let delta = Quat::from_axis_angle(axis.normalize(), angle.min(step_limit));

            // 关节旋转 = 基础旋转 × IK 旋转
            let bone = &bones[index];
            let base = bone.inherited_rotation * bone.animated_rotation() * bone.morph_rotation;
            let mut joint = (base * bone.ik_rotation * delta).normalize();
            // 角度限制只在前半迭代中投影
            if let Some((lower, upper)) = link.limits {
                if iteration < self.config.iterations / 2 {
                    joint = limit_rotation(joint, lower, upper);
                }
            }

            bones[index].ik_rotation = (base.inverse() * joint).normalize();
            update_subtree(bones, children, index);
        }
    }
}

/// 将旋转投影回各轴角度范围
///
/// 若只有一个轴可动则按该轴锁定求解；其余情况用 XYZ 欧拉角逐轴截断。
pub(crate) fn limit_rotation(rotation: Quat, lower: Vec3, upper: Vec3) -> Quat {
    if let Some(axis) = single_free_axis(lower, upper) {
        let unit = Vec3::AXES[axis];
        let twist = super::bone::project_onto_axis(rotation, unit);
        let (twist_axis, mut angle) = twist.to_axis_angle();
        if twist_axis.dot(unit) < 0.0 {
            angle = -angle;
        }
        if angle > std::f32::consts::PI {
            angle -= std::f32::consts::TAU;
        } else if angle < -std::f32::consts::PI {
            angle += std::f32::consts::TAU;
        }
        let angle = angle.clamp(lower[axis], upper[axis]);
        return Quat::from_axis_angle(unit, angle);
    }

    let (x, y, z) = rotation.to_euler(EulerRot::XYZ);
    Quat::from_euler(
        EulerRot::XYZ,
        x.clamp(lower.x, upper.x),
        y.clamp(lower.y, upper.y),
        z.clamp(lower.z, upper.z),
    )
}

/// 恰好只有一个轴范围非零时返回该轴
fn single_free_axis(lower: Vec3, upper: Vec3) -> Option<usize> {
    let mut free = (0..3).filter(|&i| (upper[i] - lower[i]).abs() > LOCKED_RANGE);
    match (free.next(), free.next()) {
        (Some(axis), None) => Some(axis),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_free_axis() {
        let lower = Vec3::new(-std::f32::consts::PI, 0.0, 0.0);
        let upper = Vec3::new(-0.008727, 0.0, 0.0);
        assert_eq!(single_free_axis(lower, upper), Some(0));
        assert_eq!(single_free_axis(Vec3::splat(-1.0), Vec3::splat(1.0)), None);
        assert_eq!(single_free_axis(Vec3::ZERO, Vec3::ZERO), None);
    }

    #[test]
    fn test_axis_lock_clamps_to_range() {
        let lower = Vec3::new(-std::f32::consts::PI, 0.0, 0.0);
        let upper = Vec3::new(-0.1, 0.0, 0.0);

        // 正方向弯曲被截断到上限
        let limited = limit_rotation(Quat::from_rotation_x(0.8), lower, upper);
        assert!(limited.angle_between(Quat::from_rotation_x(-0.1)) < 1e-4);

        // 其他轴的分量被丢弃
        let mixed = Quat::from_rotation_x(-0.5) * Quat::from_rotation_y(0.4);
        let limited = limit_rotation(mixed, lower, upper);
        let (_, y, z) = limited.to_euler(EulerRot::XYZ);
        assert!(y.abs() < 1e-4 && z.abs() < 1e-4);
    }

    #[test]
    fn test_euler_clamp() {
        let limited = limit_rotation(
            Quat::from_rotation_z(1.0),
            Vec3::splat(-0.5),
            Vec3::splat(0.5),
        );
        assert!(limited.angle_between(Quat::from_rotation_z(0.5)) < 1e-4);
    }
}
