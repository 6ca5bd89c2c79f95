//! Morph 变形系统
//!
//! `MorphManager` 持有解析后的 Morph，每帧把权重转换为 `MorphDeltas`
//! 中的顶点/UV/骨骼/材质增量和刚体冲量。

mod manager;
mod morph;

pub use manager::{flip_index, MorphManager};
pub use morph::{Morph, MorphKind, MorphLink};

use glam::{Quat, Vec3, Vec4};

use crate::model::{Material, MaterialOffset, MaterialOperation};

/// Morph 类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MorphType {
    Group,
    Vertex,
    Bone,
    Uv,
    AdditionalUv1,
    AdditionalUv2,
    AdditionalUv3,
    AdditionalUv4,
    Material,
    Flip,
    Impulse,
}

impl MorphType {
    /// UV 通道对应的类型（0 为基本 UV）
    pub fn from_uv_channel(channel: usize) -> Self {
        match channel {
            0 => MorphType::Uv,
            1 => MorphType::AdditionalUv1,
            2 => MorphType::AdditionalUv2,
            3 => MorphType::AdditionalUv3,
            _ => MorphType::AdditionalUv4,
        }
    }
}

/// UV 通道数（基本 UV + 4 个追加 UV）
pub const UV_CHANNELS: usize = 5;

/// 材质的可变属性
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MaterialValues {
    pub diffuse: Vec4,
    pub specular: Vec3,
    pub shininess: f32,
    pub ambient: Vec3,
    pub edge_color: Vec4,
    pub edge_size: f32,
    pub texture_tint: Vec4,
    pub sphere_tint: Vec4,
    pub toon_tint: Vec4,
}

impl MaterialValues {
    /// 所有属性为 1（乘法单位元）
    pub const ONE: Self = Self {
        diffuse: Vec4::ONE,
        specular: Vec3::ONE,
        shininess: 1.0,
        ambient: Vec3::ONE,
        edge_color: Vec4::ONE,
        edge_size: 1.0,
        texture_tint: Vec4::ONE,
        sphere_tint: Vec4::ONE,
        toon_tint: Vec4::ONE,
    };

    /// 所有属性为 0（加法单位元）
    pub const ZERO: Self = Self {
        diffuse: Vec4::ZERO,
        specular: Vec3::ZERO,
        shininess: 0.0,
        ambient: Vec3::ZERO,
        edge_color: Vec4::ZERO,
        edge_size: 0.0,
        texture_tint: Vec4::ZERO,
        sphere_tint: Vec4::ZERO,
        toon_tint: Vec4::ZERO,
    };

    /// 材质的基础值，纹理系数为 1
    pub fn from_material(material: &Material) -> Self {
        Self {
            diffuse: material.diffuse,
            specular: material.specular,
            shininess: material.shininess,
            ambient: material.ambient,
            edge_color: material.edge_color,
            edge_size: material.edge_size,
            ..Self::ONE
        }
    }

    fn from_offset(offset: &MaterialOffset) -> Self {
        Self {
            diffuse: offset.diffuse,
            specular: offset.specular,
            shininess: offset.shininess,
            ambient: offset.ambient,
            edge_color: offset.edge_color,
            edge_size: offset.edge_size,
            texture_tint: offset.texture_tint,
            sphere_tint: offset.sphere_tint,
            toon_tint: offset.toon_tint,
        }
    }

    /// 逐属性合并
    fn zip(
        self,
        other: Self,
        f4: impl Fn(Vec4, Vec4) -> Vec4,
        f3: impl Fn(Vec3, Vec3) -> Vec3,
        f1: impl Fn(f32, f32) -> f32,
    ) -> Self {
        Self {
            diffuse: f4(self.diffuse, other.diffuse),
            specular: f3(self.specular, other.specular),
            shininess: f1(self.shininess, other.shininess),
            ambient: f3(self.ambient, other.ambient),
            edge_color: f4(self.edge_color, other.edge_color),
            edge_size: f1(self.edge_size, other.edge_size),
            texture_tint: f4(self.texture_tint, other.texture_tint),
            sphere_tint: f4(self.sphere_tint, other.sphere_tint),
            toon_tint: f4(self.toon_tint, other.toon_tint),
        }
    }
}

/// 单个材质上累积的 Morph 效果
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MaterialAccumulator {
    pub multiply: MaterialValues,
    pub add: MaterialValues,
}

impl Default for MaterialAccumulator {
    fn default() -> Self {
        Self {
            multiply: MaterialValues::ONE,
            add: MaterialValues::ZERO,
        }
    }
}

impl MaterialAccumulator {
    /// 乘算按 lerp(1, m, w) 连乘，加算按 m × w 累加
    pub fn apply(&mut self, offset: &MaterialOffset, weight: f32) {
        let values = MaterialValues::from_offset(offset);
        match offset.operation {
            MaterialOperation::Multiply => {
                self.multiply = self.multiply.zip(
                    values,
                    |a, m| a * Vec4::ONE.lerp(m, weight),
                    |a, m| a * Vec3::ONE.lerp(m, weight),
                    |a, m| a * (1.0 + (m - 1.0) * weight),
                );
            }
            MaterialOperation::Add => {
                self.add = self.add.zip(
                    values,
                    |a, m| a + m * weight,
                    |a, m| a + m * weight,
                    |a, m| a + m * weight,
                );
            }
        }
    }

    /// 最终值 = 基础值 × 乘算 + 加算
    pub fn resolve(&self, base: &MaterialValues) -> MaterialValues {
        base.zip(self.multiply, |b, m| b * m, |b, m| b * m, |b, m| b * m)
            .zip(self.add, |v, a| v + a, |v, a| v + a, |v, a| v + a)
    }
}

/// 交给物理引擎的刚体冲量
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MorphImpulse {
    pub rigid_body_index: usize,
    pub local: bool,
    pub velocity: Vec3,
    pub torque: Vec3,
}

/// 一次 Morph 计算的全部结果
#[derive(Clone, Debug)]
pub struct MorphDeltas {
    pub positions: Vec<Vec3>,
    /// 每个顶点 5 个 UV 通道的增量
    pub uvs: Vec<[Vec4; UV_CHANNELS]>,
    pub bone_translations: Vec<Vec3>,
    pub bone_rotations: Vec<Quat>,
    pub materials: Vec<MaterialAccumulator>,
    pub impulses: Vec<MorphImpulse>,
}

impl MorphDeltas {
    pub fn new(vertex_count: usize, bone_count: usize, material_count: usize) -> Self {
        Self {
            positions: vec![Vec3::ZERO; vertex_count],
            uvs: vec![[Vec4::ZERO; UV_CHANNELS]; vertex_count],
            bone_translations: vec![Vec3::ZERO; bone_count],
            bone_rotations: vec![Quat::IDENTITY; bone_count],
            materials: vec![MaterialAccumulator::default(); material_count],
            impulses: Vec::new(),
        }
    }

    /// 清零所有增量（冲量队列保留，由调用方取走）
    pub fn reset(&mut self) {
        self.positions.fill(Vec3::ZERO);
        self.uvs.fill([Vec4::ZERO; UV_CHANNELS]);
        self.bone_translations.fill(Vec3::ZERO);
        self.bone_rotations.fill(Quat::IDENTITY);
        self.materials.fill(MaterialAccumulator::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offset(operation: MaterialOperation, value: f32) -> MaterialOffset {
        MaterialOffset {
            material_index: 0,
            operation,
            diffuse: Vec4::splat(value),
            specular: Vec3::splat(value),
            shininess: value,
            ambient: Vec3::splat(value),
            edge_color: Vec4::splat(value),
            edge_size: value,
            texture_tint: Vec4::splat(value),
            sphere_tint: Vec4::splat(value),
            toon_tint: Vec4::splat(value),
        }
    }

    #[test]
    fn test_material_multiply_then_add() {
        let mut accumulator = MaterialAccumulator::default();
        accumulator.apply(&offset(MaterialOperation::Multiply, 0.0), 0.5);
        accumulator.apply(&offset(MaterialOperation::Add, 0.2), 0.5);

        let base = MaterialValues {
            diffuse: Vec4::splat(0.8),
            shininess: 10.0,
            ..MaterialValues::ONE
        };
        let result = accumulator.resolve(&base);
        // 0.8 × lerp(1, 0, 0.5) + 0.2 × 0.5
        assert!((result.diffuse.x - 0.5).abs() < 1e-6);
        assert!((result.shininess - 5.1).abs() < 1e-5);
        assert!((result.toon_tint.w - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_deltas_reset_keeps_impulses() {
        let mut deltas = MorphDeltas::new(2, 1, 1);
        deltas.positions[1] = Vec3::ONE;
        deltas.bone_rotations[0] = Quat::from_rotation_x(1.0);
        deltas.impulses.push(MorphImpulse {
            rigid_body_index: 0,
            local: false,
            velocity: Vec3::Y,
            torque: Vec3::ZERO,
        });
        deltas.reset();
        assert_eq!(deltas.positions[1], Vec3::ZERO);
        assert_eq!(deltas.bone_rotations[0], Quat::IDENTITY);
        assert_eq!(deltas.impulses.len(), 1);
    }
}
