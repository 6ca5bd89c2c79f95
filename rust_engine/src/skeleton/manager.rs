//! 骨骼管理器

use glam::{Mat4, Quat, Vec3};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use super::bone::{Bone, Endpoint};
use super::IkSolver;
use crate::model::{BoneData, BoneDestination, LocalAxes};
use crate::{MmdError, Result};

/// 骨骼求值顺序
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BoneOrder {
    /// 物理模拟前变形的骨骼
    pub before_physics: Vec<usize>,
    /// 物理模拟后变形的骨骼
    pub after_physics: Vec<usize>,
}

/// 计算骨骼求值顺序
///
/// 父骨骼和付与父骨骼总是先于自身；其余按 (变形阶层, 声明顺序) 升序。
/// 父骨骼链或付与链成环时返回 `Cycle` 错误。越界索引不参与排序。
pub fn sort_bones(bones: &[BoneData]) -> Result<BoneOrder> {
    let count = bones.len();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut pending = vec![0usize; count];

    for (index, bone) in bones.iter().enumerate() {
        let parent = usize::try_from(bone.parent_index).ok();
        let inherent = bone
            .inherent_parent_index()
            .and_then(|i| usize::try_from(i).ok());
        for dependency in [parent, inherent].into_iter().flatten() {
            if dependency < count {
                dependents[dependency].push(index);
                pending[index] += 1;
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<(i32, usize)>> = bones
        .iter()
        .enumerate()
        .filter(|&(index, _)| pending[index] == 0)
        .map(|(index, bone)| Reverse((bone.layer, index)))
        .collect();

    let mut order = BoneOrder::default();
    let mut visited = 0;
    while let Some(Reverse((_, index))) = ready.pop() {
        visited += 1;
        if bones[index].is_after_physics() {
            order.after_physics.push(index);
        } else {
            order.before_physics.push(index);
        }
        for &dependent in &dependents[index] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.push(Reverse((bones[dependent].layer, dependent)));
            }
        }
    }

    if visited < count {
        if let Some(index) = (0..count).find(|&i| pending[i] > 0) {
            let parent_stuck = usize::try_from(bones[index].parent_index)
                .ok()
                .is_some_and(|p| p < count && pending[p] > 0);
            let kind = if parent_stuck { "parent" } else { "inherent parent" };
            return Err(MmdError::Cycle { kind, index });
        }
    }
    Ok(order)
}

/// 重新计算骨骼及其子树的全局变换
pub(crate) fn update_subtree(bones: &mut [Bone], children: &[Vec<usize>], index: usize) {
    bones[index].update_local_transform();
    let mut stack = vec![index];
    while let Some(current) = stack.pop() {
        let parent_global = bones[current]
            .parent_index
            .map_or(Mat4::IDENTITY, |parent| bones[parent].global_transform);
        bones[current].global_transform = parent_global * bones[current].local_transform;
        if let Some(list) = children.get(current) {
            stack.extend(list.iter().copied());
        }
    }
}

/// 骨骼管理器
pub struct BoneManager {
    bones: Vec<Bone>,
    name_to_index: HashMap<String, usize>,
    children: Vec<Vec<usize>>,
    order: BoneOrder,
    ik_solvers: Vec<IkSolver>,
    /// 骨骼索引 → IK 求解器索引
    solver_of: Vec<Option<usize>>,
    skinning_matrices: Vec<Mat4>,
}

impl BoneManager {
    pub fn new() -> Self {
        Self {
            bones: Vec::new(),
            name_to_index: HashMap::new(),
            children: Vec::new(),
            order: BoneOrder::default(),
            ik_solvers: Vec::new(),
            solver_of: Vec::new(),
            skinning_matrices: Vec::new(),
        }
    }

    /// 从骨骼记录构建：解析索引、计算求值顺序和绑定姿势
    pub fn from_model(records: &[BoneData]) -> Result<Self> {
        let count = records.len();
        let check = |kind: &'static str, index: i32, optional: bool| -> Result<()> {
            if (optional && index == -1) || (index >= 0 && (index as usize) < count) {
                Ok(())
            } else {
                Err(MmdError::Index {
                    kind,
                    index: index as i64,
                    count,
                })
            }
        };
        for record in records {
            check("bone parent", record.parent_index, true)?;
            if let BoneDestination::Bone(index) = record.destination {
                check("bone destination", index, true)?;
            }
            if let Some(index) = record.inherent_parent_index() {
                check("bone inherent parent", index, true)?;
            }
            if let Some(ik) = &record.ik {
                check("ik effector", ik.effector_index, false)?;
                for link in &ik.links {
                    check("ik link", link.bone_index, false)?;
                }
            }
        }
        let order = sort_bones(records)?;

        let mut manager = Self::new();
        manager.order = order;
        manager.children = vec![Vec::new(); count];
        manager.solver_of = vec![None; count];

        for (index, record) in records.iter().enumerate() {
            let mut bone = Bone::from_data(record);
            if let Some(parent) = bone.parent_index {
                bone.offset = record.origin - records[parent].origin;
                manager.children[parent].push(index);
            } else {
                bone.offset = record.origin;
            }
            bone.update_local_transform();
            manager.name_to_index.entry(bone.name.clone()).or_insert(index);
            manager.bones.push(bone);
        }

        for index in 0..count {
            let Some(config) = manager.bones[index].ik.clone() else {
                continue;
            };
            for link in &config.links {
                manager.bones[link.bone_index].is_ik_link = true;
            }
            manager.solver_of[index] = Some(manager.ik_solvers.len());
            manager.ik_solvers.push(IkSolver::new(index, config));
        }

        manager.skinning_matrices = vec![Mat4::IDENTITY; count];
        log::debug!(
            "骨骼排序完成: 物理前 {}, 物理后 {}, IK {}",
            manager.order.before_physics.len(),
            manager.order.after_physics.len(),
            manager.ik_solvers.len()
        );
        Ok(manager)
    }

    /// 通过名称查找骨骼
    pub fn find_bone_by_name(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// 获取骨骼数量
    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    /// 获取骨骼
    pub fn get_bone(&self, index: usize) -> Option<&Bone> {
        self.bones.get(index)
    }

    /// 获取可变骨骼引用
    pub fn get_bone_mut(&mut self, index: usize) -> Option<&mut Bone> {
        self.bones.get_mut(index)
    }

    pub fn order(&self) -> &BoneOrder {
        &self.order
    }

    /// 开始更新：清除上一帧的动画/Morph/IK 状态
    pub fn begin_update(&mut self) {
        for bone in &mut self.bones {
            bone.reset_animation();
        }
    }

    /// 结束更新：计算蒙皮矩阵
    pub fn end_update(&mut self) {
        for (matrix, bone) in self.skinning_matrices.iter_mut().zip(&self.bones) {
            *matrix = bone.get_skinning_matrix();
        }
    }

    /// 设置骨骼动画平移
    pub fn set_bone_translation(&mut self, index: usize, translation: Vec3) {
        if let Some(bone) = self.bones.get_mut(index) {
            bone.local_translation = translation;
        }
    }

    /// 设置骨骼动画旋转
    pub fn set_bone_rotation(&mut self, index: usize, rotation: Quat) {
        if let Some(bone) = self.bones.get_mut(index) {
            bone.local_rotation = rotation;
        }
    }

    /// 设置骨骼 Morph 产生的平移/旋转
    pub fn set_morph_transform(&mut self, index: usize, translation: Vec3, rotation: Quat) {
        if let Some(bone) = self.bones.get_mut(index) {
            bone.morph_translation = translation;
            bone.morph_rotation = rotation;
        }
    }

    /// 按 IK 骨骼名称开关 IK，找不到返回 false
    pub fn set_ik_enabled(&mut self, name: &str, enabled: bool) -> bool {
        let Some(solver) = self.find_bone_by_name(name).and_then(|i| self.solver_of[i]) else {
            return false;
        };
        self.ik_solvers[solver].enabled = enabled;
        true
    }

    pub fn is_ik_enabled(&self, name: &str) -> Option<bool> {
        self.find_bone_by_name(name)
            .and_then(|i| self.solver_of[i])
            .map(|solver| self.ik_solvers[solver].enabled)
    }

    /// 更新一个阶段（物理前或物理后）的骨骼变换
    ///
    /// 1. 按顺序计算本地/全局变换
    /// 2. 按顺序求解启用的 IK
    /// 3. 再次按顺序计算变换，使依赖 IK 结果的付与骨骼同步
    pub fn update_transforms(&mut self, after_physics: bool) {
        let order = if after_physics {
            std::mem::take(&mut self.order.after_physics)
        } else {
            std::mem::take(&mut self.order.before_physics)
        };

        for &index in &order {
            self.bones[index].ik_rotation = Quat::IDENTITY;
        }
        for &index in &order {
            self.perform_transform(index);
        }
        for &index in &order {
            if let Some(solver) = self.solver_of[index] {
                self.ik_solvers[solver].solve(&mut self.bones, &self.children);
            }
        }
        for &index in &order {
            self.perform_transform(index);
        }

        if after_physics {
            self.order.after_physics = order;
        } else {
            self.order.before_physics = order;
        }
    }

    /// 计算单个骨骼的付与、本地与全局变换
    fn perform_transform(&mut self, index: usize) {
        let (rotation, translation) = self.inherited_motion(index);
        let bone = &mut self.bones[index];
        bone.inherited_rotation = rotation;
        bone.inherited_translation = translation;
        bone.update_local_transform();

        let parent_global = self.bones[index]
            .parent_index
            .map_or(Mat4::IDENTITY, |parent| self.bones[parent].global_transform);
        self.bones[index].global_transform = parent_global * self.bones[index].local_transform;
    }

    /// 从付与父骨骼取得的旋转/平移
    fn inherited_motion(&self, index: usize) -> (Quat, Vec3) {
        let Some(link) = self.bones[index].inherent else {
            return (Quat::IDENTITY, Vec3::ZERO);
        };
        let parent = &self.bones[link.parent_index];
        let parent_link = parent.inherent;

        let mut rotation = Quat::IDENTITY;
        if link.rotation {
            rotation = match parent_link {
                Some(l) if l.rotation => parent.inherited_rotation,
                _ => parent.animated_rotation() * parent.morph_rotation,
            };
            if link.coefficient != 1.0 {
                rotation = Quat::IDENTITY.slerp(rotation, link.coefficient);
            }
            if parent.is_ik_link {
                rotation *= parent.ik_rotation;
            }
        }

        let mut translation = Vec3::ZERO;
        if link.translation {
            translation = match parent_link {
                Some(l) if l.translation => parent.inherited_translation,
                _ => parent.local_translation + parent.morph_translation,
            };
            if link.coefficient != 1.0 {
                translation *= link.coefficient;
            }
        }
        (rotation, translation)
    }

    /// 获取全局变换
    pub fn get_global_transform(&self, index: usize) -> Mat4 {
        self.bones
            .get(index)
            .map_or(Mat4::IDENTITY, |bone| bone.global_transform)
    }

    /// 设置全局变换（物理结果回写），并更新子骨骼
    pub fn set_global_transform(&mut self, index: usize, transform: Mat4) {
        if index >= self.bones.len() {
            return;
        }
        let parent_global = self.bones[index]
            .parent_index
            .map_or(Mat4::IDENTITY, |parent| self.bones[parent].global_transform);
        self.bones[index].local_transform = parent_global.inverse() * transform;
        self.bones[index].global_transform = transform;

        let mut stack: Vec<usize> = self.children[index].clone();
        while let Some(current) = stack.pop() {
            let parent_global = self.bones[current]
                .parent_index
                .map_or(Mat4::IDENTITY, |parent| self.bones[parent].global_transform);
            self.bones[current].global_transform = parent_global * self.bones[current].local_transform;
            stack.extend(self.children[current].iter().copied());
        }
    }

    /// 骨骼末端的当前世界坐标
    pub fn destination_position(&self, index: usize) -> Option<Vec3> {
        let bone = self.bones.get(index)?;
        match bone.endpoint {
            Endpoint::None => None,
            Endpoint::Bone(target) => self.bones.get(target).map(|b| b.world_position()),
            Endpoint::Offset(offset) => Some(bone.global_transform.transform_point3(offset)),
        }
    }

    /// 当前世界空间下的本地轴
    pub fn local_axes(&self, index: usize) -> Option<LocalAxes> {
        let bone = self.bones.get(index)?;
        let axes = bone.local_axes?;
        Some(LocalAxes {
            x: bone.global_transform.transform_vector3(axes.x).normalize_or_zero(),
            z: bone.global_transform.transform_vector3(axes.z).normalize_or_zero(),
        })
    }

    /// 获取蒙皮矩阵数组
    pub fn get_skinning_matrices(&self) -> &[Mat4] {
        &self.skinning_matrices
    }
}

impl Default for BoneManager {
    fn default() -> Self {
        Self::new()
    }
}
