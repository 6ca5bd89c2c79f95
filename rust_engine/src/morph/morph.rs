//! Morph 定义

use glam::{Quat, Vec3, Vec4};

use super::MorphType;
use crate::model::{
    GroupOffset, ImpulseOffset, MaterialOffset, MorphCategory, MorphData, MorphOffsets,
};
use crate::{MmdError, Result};

/// 组/翻转 Morph 的子项
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MorphLink {
    pub morph_index: usize,
    pub weight: f32,
}

/// 解析后的 Morph 内容（索引已校验）
#[derive(Clone, Debug)]
pub enum MorphKind {
    Group(Vec<MorphLink>),
    Flip(Vec<MorphLink>),
    Vertex(Vec<(usize, Vec3)>),
    Uv {
        channel: usize,
        offsets: Vec<(usize, Vec4)>,
    },
    Bone(Vec<(usize, Vec3, Quat)>),
    /// `None` 表示作用于全部材质
    Material(Vec<(Option<usize>, MaterialOffset)>),
    Impulse(Vec<(usize, ImpulseOffset)>),
}

/// 解析 Morph 时使用的各表大小
#[derive(Clone, Copy, Debug)]
pub(crate) struct TableSizes {
    pub vertices: usize,
    pub bones: usize,
    pub materials: usize,
    pub morphs: usize,
    pub rigid_bodies: usize,
}

fn resolve(kind: &'static str, index: i32, count: usize) -> Result<usize> {
    usize::try_from(index)
        .ok()
        .filter(|&i| i < count)
        .ok_or_else(|| MmdError::Index {
            kind,
            index: index as i64,
            count,
        })
}

/// Morph 变形
#[derive(Clone, Debug)]
pub struct Morph {
    pub name: String,
    pub category: MorphCategory,
    pub kind: MorphKind,
    /// 用户设置的权重
    weight: f32,
    /// 上一次计算中实际生效的权重（含组/翻转传播）
    internal_weight: f32,
    /// 再上一次计算的生效权重，冲量只在生效权重变化时发出
    previous_internal_weight: f32,
    dirty: bool,
}

impl Morph {
    pub(crate) fn from_data(data: &MorphData, sizes: &TableSizes) -> Result<Self> {
        let links = |items: &[GroupOffset]| -> Result<Vec<MorphLink>> {
            items
                .iter()
                .map(|item| {
                    resolve("morph child", item.morph_index, sizes.morphs).map(|morph_index| {
                        MorphLink {
                            morph_index,
                            weight: item.weight,
                        }
                    })
                })
                .collect()
        };

        let kind = match &data.offsets {
            MorphOffsets::Group(items) => MorphKind::Group(links(items)?),
            MorphOffsets::Flip(items) => MorphKind::Flip(links(items)?),
            MorphOffsets::Vertex(items) => MorphKind::Vertex(
                items
                    .iter()
                    .map(|o| {
                        resolve("morph vertex", o.vertex_index, sizes.vertices).map(|i| (i, o.position))
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
            MorphOffsets::Uv { channel, offsets } => MorphKind::Uv {
                channel: *channel as usize,
                offsets: offsets
                    .iter()
                    .map(|o| {
                        resolve("morph uv vertex", o.vertex_index, sizes.vertices).map(|i| (i, o.offset))
                    })
                    .collect::<Result<Vec<_>>>()?,
            },
            MorphOffsets::Bone(items) => MorphKind::Bone(
                items
                    .iter()
                    .map(|o| {
                        resolve("morph bone", o.bone_index, sizes.bones)
                            .map(|i| (i, o.translation, o.rotation))
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
            MorphOffsets::Material(items) => MorphKind::Material(
                items
                    .iter()
                    .map(|o| {
                        if o.material_index == -1 {
                            Ok((None, *o))
                        } else {
                            resolve("morph material", o.material_index, sizes.materials)
                                .map(|i| (Some(i), *o))
                        }
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
            MorphOffsets::Impulse(items) => MorphKind::Impulse(
                items
                    .iter()
                    .map(|o| {
                        resolve("morph rigid body", o.rigid_body_index, sizes.rigid_bodies)
                            .map(|i| (i, *o))
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
        };

        Ok(Self {
            name: data.name.clone(),
            category: data.category,
            kind,
            weight: 0.0,
            internal_weight: 0.0,
            previous_internal_weight: 0.0,
            dirty: false,
        })
    }

    pub fn morph_type(&self) -> MorphType {
        match &self.kind {
            MorphKind::Group(_) => MorphType::Group,
            MorphKind::Flip(_) => MorphType::Flip,
            MorphKind::Vertex(_) => MorphType::Vertex,
            MorphKind::Uv { channel, .. } => MorphType::from_uv_channel(*channel),
            MorphKind::Bone(_) => MorphType::Bone,
            MorphKind::Material(_) => MorphType::Material,
            MorphKind::Impulse(_) => MorphType::Impulse,
        }
    }

    /// 组和翻转 Morph 每次都要重新传播
    pub fn is_composite(&self) -> bool {
        matches!(self.kind, MorphKind::Group(_) | MorphKind::Flip(_))
    }

    /// 获取名称
    pub fn get_name(&self) -> &str {
        &self.name
    }

    /// 获取权重
    pub fn get_weight(&self) -> f32 {
        self.weight
    }

    pub fn internal_weight(&self) -> f32 {
        self.internal_weight
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// 设置权重（截断到 0~1），值变化时标记为脏
    pub fn set_weight(&mut self, weight: f32) {
        let weight = weight.clamp(0.0, 1.0);
        if weight != self.weight {
            self.weight = weight;
            self.dirty = true;
        }
    }

    /// 重置权重
    pub fn reset(&mut self) {
        self.set_weight(0.0);
    }

    pub(super) fn begin_pass(&mut self) {
        self.previous_internal_weight = self.internal_weight;
        self.internal_weight = 0.0;
    }

    /// 本次计算的生效权重与上一次不同
    pub(super) fn internal_weight_changed(&self) -> bool {
        self.internal_weight != self.previous_internal_weight
    }

    pub(super) fn add_internal_weight(&mut self, weight: f32) {
        self.internal_weight += weight;
    }

    pub(super) fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes() -> TableSizes {
        TableSizes {
            vertices: 4,
            bones: 2,
            materials: 1,
            morphs: 3,
            rigid_bodies: 0,
        }
    }

    #[test]
    fn test_weight_clamp_and_dirty() {
        let data = MorphData {
            name: "あ".to_string(),
            english_name: String::new(),
            category: MorphCategory::Lip,
            offsets: MorphOffsets::Vertex(Vec::new()),
        };
        let mut morph = Morph::from_data(&data, &sizes()).unwrap();
        assert!(!morph.is_dirty());
        morph.set_weight(1.5);
        assert_eq!(morph.get_weight(), 1.0);
        assert!(morph.is_dirty());
        morph.clear_dirty();
        morph.set_weight(1.0);
        assert!(!morph.is_dirty());
    }

    #[test]
    fn test_dangling_child_rejected() {
        let data = MorphData {
            name: "グループ".to_string(),
            english_name: String::new(),
            category: MorphCategory::Other,
            offsets: MorphOffsets::Group(vec![GroupOffset {
                morph_index: 3,
                weight: 1.0,
            }]),
        };
        assert!(matches!(
            Morph::from_data(&data, &sizes()),
            Err(MmdError::Index { kind: "morph child", index: 3, count: 3 })
        ));
    }
}
