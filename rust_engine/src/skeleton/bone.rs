//! 骨骼节点（运行时）

use glam::{Mat4, Quat, Vec3};

use crate::model::{BoneData, BoneDestination, BoneFlags, LocalAxes};

/// IK 链接信息（索引已解析）
#[derive(Clone, Debug)]
pub struct IkLink {
    pub bone_index: usize,
    /// 角度限制（下限, 上限），弧度
    pub limits: Option<(Vec3, Vec3)>,
}

/// IK 配置
#[derive(Clone, Debug)]
pub struct IkConfig {
    pub effector_index: usize,
    pub iterations: u32,
    pub angle_limit: f32,
    pub links: Vec<IkLink>,
}

/// 付与（继承）设置
#[derive(Clone, Copy, Debug)]
pub struct InherentLink {
    pub parent_index: usize,
    pub coefficient: f32,
    pub rotation: bool,
    pub translation: bool,
    pub local: bool,
}

/// 骨骼末端（索引已解析）
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Endpoint {
    None,
    Bone(usize),
    Offset(Vec3),
}

/// 骨骼节点
#[derive(Clone, Debug)]
pub struct Bone {
    pub name: String,
    pub parent_index: Option<usize>,
    pub layer: i32,
    pub after_physics: bool,

    // 绑定姿势
    pub origin: Vec3,
    /// 相对于父骨骼的偏移
    pub offset: Vec3,
    pub inverse_bind_matrix: Mat4,

    pub endpoint: Endpoint,
    pub inherent: Option<InherentLink>,
    pub fixed_axis: Option<Vec3>,
    pub local_axes: Option<LocalAxes>,
    pub external_parent_key: Option<i32>,
    pub ik: Option<IkConfig>,
    /// 是否被某个 IK 链引用
    pub is_ik_link: bool,

    // 动画状态
    pub local_translation: Vec3,
    pub local_rotation: Quat,
    pub morph_translation: Vec3,
    pub morph_rotation: Quat,
    pub ik_rotation: Quat,
    pub inherited_translation: Vec3,
    pub inherited_rotation: Quat,

    // 变换结果
    pub local_transform: Mat4,
    pub global_transform: Mat4,
}

impl Bone {
    pub fn new(name: String) -> Self {
        Self {
            name,
            parent_index: None,
            layer: 0,
            after_physics: false,
            origin: Vec3::ZERO,
            offset: Vec3::ZERO,
            inverse_bind_matrix: Mat4::IDENTITY,
            endpoint: Endpoint::None,
            inherent: None,
            fixed_axis: None,
            local_axes: None,
            external_parent_key: None,
            ik: None,
            is_ik_link: false,
            local_translation: Vec3::ZERO,
            local_rotation: Quat::IDENTITY,
            morph_translation: Vec3::ZERO,
            morph_rotation: Quat::IDENTITY,
            ik_rotation: Quat::IDENTITY,
            inherited_translation: Vec3::ZERO,
            inherited_rotation: Quat::IDENTITY,
            local_transform: Mat4::IDENTITY,
            global_transform: Mat4::IDENTITY,
        }
    }

    /// 从骨骼记录创建（调用方保证索引已校验）
    pub fn from_data(data: &BoneData) -> Self {
        let to_index = |index: i32| usize::try_from(index).ok();

        let mut bone = Self::new(data.name.clone());
        bone.parent_index = to_index(data.parent_index);
        bone.layer = data.layer;
        bone.after_physics = data.is_after_physics();
        bone.origin = data.origin;
        bone.inverse_bind_matrix = Mat4::from_translation(-data.origin);
        bone.global_transform = Mat4::from_translation(data.origin);

        bone.endpoint = match data.destination {
            BoneDestination::Bone(index) => to_index(index).map_or(Endpoint::None, Endpoint::Bone),
            BoneDestination::Offset(offset) => Endpoint::Offset(offset),
        };

        if let (Some(inherent), Some(parent)) = (data.inherent, data.inherent_parent_index()) {
            if let Some(parent_index) = to_index(parent) {
                bone.inherent = Some(InherentLink {
                    parent_index,
                    coefficient: inherent.coefficient,
                    rotation: data.has_inherent_rotation(),
                    translation: data.has_inherent_translation(),
                    local: data.flags.contains(BoneFlags::INHERENT_LOCAL),
                });
            }
        }

        bone.fixed_axis = data.fixed_axis.filter(|axis| axis.length_squared() > 0.0);
        bone.local_axes = data.local_axes;
        bone.external_parent_key = data.external_parent_key;

        if let Some(ik) = &data.ik {
            bone.ik = Some(IkConfig {
                effector_index: ik.effector_index.max(0) as usize,
                iterations: ik.iterations.max(0) as u32,
                angle_limit: ik.angle_limit,
                links: ik
                    .links
                    .iter()
                    .filter_map(|link| {
                        to_index(link.bone_index).map(|bone_index| IkLink {
                            bone_index,
                            limits: link.limits,
                        })
                    })
                    .collect(),
            });
        }
        bone
    }

    /// 重置动画状态（每帧开始时调用）
    pub fn reset_animation(&mut self) {
        self.local_translation = Vec3::ZERO;
        self.local_rotation = Quat::IDENTITY;
        self.morph_translation = Vec3::ZERO;
        self.morph_rotation = Quat::IDENTITY;
        self.ik_rotation = Quat::IDENTITY;
        self.inherited_translation = Vec3::ZERO;
        self.inherited_rotation = Quat::IDENTITY;
    }

    /// 动画旋转（固定轴骨骼投影到轴上）
    pub fn animated_rotation(&self) -> Quat {
        match self.fixed_axis {
            Some(axis) => project_onto_axis(self.local_rotation, axis),
            None => self.local_rotation,
        }
    }

    /// 最终本地旋转 = 付与 × 动画 × Morph × IK
    pub fn rotation(&self) -> Quat {
        self.inherited_rotation * self.animated_rotation() * self.morph_rotation * self.ik_rotation
    }

    /// 最终本地平移 = 付与 + 动画 + Morph
    pub fn translation(&self) -> Vec3 {
        self.inherited_translation + self.local_translation + self.morph_translation
    }

    /// 更新本地变换
    pub fn update_local_transform(&mut self) {
        self.local_transform =
            Mat4::from_rotation_translation(self.rotation(), self.translation() + self.offset);
    }

    /// 当前世界坐标原点
    pub fn world_position(&self) -> Vec3 {
        self.global_transform.w_axis.truncate()
    }

    /// 获取蒙皮矩阵 = 当前全局变换 * 逆绑定矩阵
    pub fn get_skinning_matrix(&self) -> Mat4 {
        self.global_transform * self.inverse_bind_matrix
    }
}

impl Default for Bone {
    fn default() -> Self {
        Self::new(String::new())
    }
}

/// 取旋转在给定轴上的扭转分量
pub(crate) fn project_onto_axis(rotation: Quat, axis: Vec3) -> Quat {
    let axis = axis.normalize_or_zero();
    if axis == Vec3::ZERO {
        return rotation;
    }
    let projected = axis * rotation.xyz().dot(axis);
    let twist = Quat::from_xyzw(projected.x, projected.y, projected.z, rotation.w);
    if twist.length_squared() < 1e-12 {
        Quat::IDENTITY
    } else {
        twist.normalize()
    }
}
