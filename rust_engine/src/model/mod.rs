//! MMD 模型数据与运行时
//!
//! `Model` 保存文件中的全部实体表（索引保持原始值），
//! `MmdModel` 在其上构建骨骼/Morph 管理器并驱动每帧更新。

mod bone;
mod label;
mod material;
mod morph;
mod physics;
mod pmd;
mod pmx;
mod runtime;
mod submesh;
mod vertex;

#[cfg(test)]
pub(crate) mod fixtures;

pub use bone::{BoneData, BoneDestination, BoneFlags, IkData, IkLinkData, Inherent, LocalAxes};
pub use label::{Label, LabelItem};
pub use material::{Material, MaterialFlags, SphereMode, Toon};
pub use morph::{
    BoneOffset, GroupOffset, ImpulseOffset, MaterialOffset, MaterialOperation, MorphCategory,
    MorphData, MorphOffsets, UvOffset, VertexOffset,
};
pub use physics::{Joint, JointKind, RigidBody, RigidBodyMode, RigidBodyShape};
pub use runtime::MmdModel;
pub use submesh::SubMesh;
pub use vertex::{Vertex, VertexWeight};

use std::path::Path;

use crate::codec::TextEncoding;
use crate::{MmdError, Result};

/// 模型文件格式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelFormat {
    Pmx,
    Pmd,
}

/// 模型头部信息
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ModelInfo {
    pub name: String,
    pub english_name: String,
    pub comment: String,
    pub english_comment: String,
}

/// 模型实体表
#[derive(Clone, Debug, PartialEq)]
pub struct Model {
    pub format: ModelFormat,
    /// PMX 2.0/2.1，PMD 1.0
    pub version: f32,
    pub encoding: TextEncoding,
    /// 追加 UV 数量（0~4）
    pub additional_uv_count: usize,
    pub info: ModelInfo,
    pub vertices: Vec<Vertex>,
    /// 三角形顶点索引
    pub indices: Vec<u32>,
    /// 纹理路径
    pub textures: Vec<String>,
    pub materials: Vec<Material>,
    pub bones: Vec<BoneData>,
    pub morphs: Vec<MorphData>,
    pub labels: Vec<Label>,
    pub rigid_bodies: Vec<RigidBody>,
    pub joints: Vec<Joint>,
    /// PMX 2.1 软体数据（原样保留）
    pub soft_body_data: Vec<u8>,
    /// PMD 共享 toon 纹理名（10 个）
    pub toon_textures: Vec<String>,
}

impl Model {
    /// 创建空模型（PMX 2.0, UTF-16LE）
    pub fn new() -> Self {
        Self {
            format: ModelFormat::Pmx,
            version: 2.0,
            encoding: TextEncoding::Utf16Le,
            additional_uv_count: 0,
            info: ModelInfo::default(),
            vertices: Vec::new(),
            indices: Vec::new(),
            textures: Vec::new(),
            materials: Vec::new(),
            bones: Vec::new(),
            morphs: Vec::new(),
            labels: Vec::new(),
            rigid_bodies: Vec::new(),
            joints: Vec::new(),
            soft_body_data: Vec::new(),
            toon_textures: Vec::new(),
        }
    }

    /// 从字节解析（按签名选择 PMX/PMD）
    pub fn load(data: &[u8]) -> Result<Self> {
        if data.starts_with(b"PMX ") {
            pmx::load(data)
        } else if data.starts_with(b"Pmd") {
            pmd::load(data)
        } else {
            Err(MmdError::Signature("not a PMX/PMD model".to_string()))
        }
    }

    /// 从文件加载
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::load(&data)
    }

    /// 按 `format` 序列化
    pub fn save(&self) -> Result<Vec<u8>> {
        match self.format {
            ModelFormat::Pmx => pmx::save(self),
            ModelFormat::Pmd => pmd::save(self),
        }
    }

    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let data = self.save()?;
        std::fs::write(path.as_ref(), data)?;
        Ok(())
    }

    /// 根据名称查找骨骼
    pub fn find_bone_by_name(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.name == name)
    }

    /// 根据名称查找 Morph
    pub fn find_morph_by_name(&self, name: &str) -> Option<usize> {
        self.morphs.iter().position(|m| m.name == name)
    }

    /// 按材质拆分的子网格
    pub fn submeshes(&self) -> Vec<SubMesh> {
        let mut begin = 0u32;
        self.materials
            .iter()
            .enumerate()
            .map(|(i, material)| {
                let count = material.index_count.max(0) as u32;
                let submesh = SubMesh::new(begin, count, i as i32);
                begin += count;
                submesh
            })
            .collect()
    }

    /// 链接检查：所有交叉引用必须在范围内，骨骼依赖不能成环
    pub fn validate(&self) -> Result<()> {
        let vertex_count = self.vertices.len();
        let bone_count = self.bones.len();
        let texture_count = self.textures.len();
        let material_count = self.materials.len();
        let morph_count = self.morphs.len();
        let rigid_count = self.rigid_bodies.len();

        if self.additional_uv_count > 4 {
            return Err(MmdError::Header(format!(
                "additional uv count {} exceeds 4",
                self.additional_uv_count
            )));
        }

        for vertex in &self.vertices {
            for &bone in vertex.weight.bone_indices() {
                check_optional("vertex bone", bone, bone_count)?;
            }
        }

        if self.indices.len() % 3 != 0 {
            return Err(MmdError::Header(format!(
                "face index count {} is not a multiple of 3",
                self.indices.len()
            )));
        }
        for &index in &self.indices {
            check_required("face vertex", index as i64, vertex_count)?;
        }

        let mut material_indices = 0i64;
        for material in &self.materials {
            check_optional("material texture", material.texture_index, texture_count)?;
            check_optional("material sphere texture", material.sphere_texture_index, texture_count)?;
            if let Toon::Texture(index) = material.toon {
                check_optional("material toon", index, texture_count)?;
            }
            if material.index_count < 0 {
                return Err(MmdError::Header(format!(
                    "material '{}' has negative index count",
                    material.name
                )));
            }
            material_indices += material.index_count as i64;
        }
        if material_indices != self.indices.len() as i64 {
            return Err(MmdError::Header(format!(
                "material index counts sum to {}, face table has {}",
                material_indices,
                self.indices.len()
            )));
        }

        for bone in &self.bones {
            check_optional("bone parent", bone.parent_index, bone_count)?;
            if let BoneDestination::Bone(index) = bone.destination {
                check_optional("bone destination", index, bone_count)?;
            }
            if let Some(index) = bone.inherent_parent_index() {
                check_optional("bone inherent parent", index, bone_count)?;
            }
            if let Some(ik) = &bone.ik {
                check_required("ik effector", ik.effector_index as i64, bone_count)?;
                for link in &ik.links {
                    check_required("ik link", link.bone_index as i64, bone_count)?;
                }
            }
        }

        for morph in &self.morphs {
            match &morph.offsets {
                MorphOffsets::Group(items) | MorphOffsets::Flip(items) => {
                    for item in items {
                        check_required("morph child", item.morph_index as i64, morph_count)?;
                    }
                }
                MorphOffsets::Vertex(items) => {
                    for item in items {
                        check_required("morph vertex", item.vertex_index as i64, vertex_count)?;
                    }
                }
                MorphOffsets::Bone(items) => {
                    for item in items {
                        check_required("morph bone", item.bone_index as i64, bone_count)?;
                    }
                }
                MorphOffsets::Uv { offsets, .. } => {
                    for item in offsets {
                        check_required("morph uv vertex", item.vertex_index as i64, vertex_count)?;
                    }
                }
                MorphOffsets::Material(items) => {
                    for item in items {
                        check_optional("morph material", item.material_index, material_count)?;
                    }
                }
                MorphOffsets::Impulse(items) => {
                    for item in items {
                        check_required("morph rigid body", item.rigid_body_index as i64, rigid_count)?;
                    }
                }
            }
        }

        for label in &self.labels {
            for item in &label.items {
                match *item {
                    LabelItem::Bone(index) => check_required("label bone", index as i64, bone_count)?,
                    LabelItem::Morph(index) => {
                        check_required("label morph", index as i64, morph_count)?
                    }
                }
            }
        }

        for body in &self.rigid_bodies {
            check_optional("rigid body bone", body.bone_index, bone_count)?;
        }
        for joint in &self.joints {
            check_optional("joint rigid body", joint.rigid_body_a_index, rigid_count)?;
            check_optional("joint rigid body", joint.rigid_body_b_index, rigid_count)?;
        }

        crate::skeleton::sort_bones(&self.bones)?;
        Ok(())
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

/// -1 表示无，其余必须在 0..count 内
fn check_optional(kind: &'static str, index: i32, count: usize) -> Result<()> {
    if index == -1 {
        Ok(())
    } else {
        check_required(kind, index as i64, count)
    }
}

fn check_required(kind: &'static str, index: i64, count: usize) -> Result<()> {
    if index < 0 || index >= count as i64 {
        return Err(MmdError::Index { kind, index, count });
    }
    Ok(())
}
