//! Morph 记录

use glam::{Quat, Vec3, Vec4};

use crate::codec::{ByteReader, ByteWriter, IndexWidth, TextEncoding};
use crate::{MmdError, Result};

/// 操作面板分类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MorphCategory {
    Base,
    Eyebrow,
    Eye,
    Lip,
    #[default]
    Other,
}

impl MorphCategory {
    pub fn from_byte(value: u8) -> Result<Self> {
        match value {
            0 => Ok(MorphCategory::Base),
            1 => Ok(MorphCategory::Eyebrow),
            2 => Ok(MorphCategory::Eye),
            3 => Ok(MorphCategory::Lip),
            4 => Ok(MorphCategory::Other),
            _ => Err(MmdError::Header(format!("unknown morph category {}", value))),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            MorphCategory::Base => 0,
            MorphCategory::Eyebrow => 1,
            MorphCategory::Eye => 2,
            MorphCategory::Lip => 3,
            MorphCategory::Other => 4,
        }
    }
}

/// 组/翻转 Morph 的子项
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroupOffset {
    pub morph_index: i32,
    pub weight: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VertexOffset {
    pub vertex_index: i32,
    pub position: Vec3,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoneOffset {
    pub bone_index: i32,
    pub translation: Vec3,
    pub rotation: Quat,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UvOffset {
    pub vertex_index: i32,
    pub offset: Vec4,
}

/// 材质 Morph 运算方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MaterialOperation {
    Multiply,
    Add,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MaterialOffset {
    /// -1 表示全部材质
    pub material_index: i32,
    pub operation: MaterialOperation,
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

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImpulseOffset {
    pub rigid_body_index: i32,
    pub local: bool,
    pub velocity: Vec3,
    pub torque: Vec3,
}

/// Morph 偏移表（按类型区分）
#[derive(Clone, Debug, PartialEq)]
pub enum MorphOffsets {
    Group(Vec<GroupOffset>),
    Vertex(Vec<VertexOffset>),
    Bone(Vec<BoneOffset>),
    /// 通道 0 为基本 UV，1~4 为追加 UV
    Uv { channel: u8, offsets: Vec<UvOffset> },
    Material(Vec<MaterialOffset>),
    Flip(Vec<GroupOffset>),
    Impulse(Vec<ImpulseOffset>),
}

impl MorphOffsets {
    /// PMX 类型字节
    pub fn type_byte(&self) -> u8 {
        match self {
            MorphOffsets::Group(_) => 0,
            MorphOffsets::Vertex(_) => 1,
            MorphOffsets::Bone(_) => 2,
            MorphOffsets::Uv { channel, .. } => 3 + channel,
            MorphOffsets::Material(_) => 8,
            MorphOffsets::Flip(_) => 9,
            MorphOffsets::Impulse(_) => 10,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            MorphOffsets::Group(v) | MorphOffsets::Flip(v) => v.len(),
            MorphOffsets::Vertex(v) => v.len(),
            MorphOffsets::Bone(v) => v.len(),
            MorphOffsets::Uv { offsets, .. } => offsets.len(),
            MorphOffsets::Material(v) => v.len(),
            MorphOffsets::Impulse(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 预解析与读取时使用的索引宽度
#[derive(Clone, Copy, Debug)]
pub(crate) struct MorphWidths {
    pub vertex: IndexWidth,
    pub bone: IndexWidth,
    pub material: IndexWidth,
    pub morph: IndexWidth,
    pub rigid_body: IndexWidth,
}

impl MorphWidths {
    fn offset_size(&self, type_byte: u8) -> Result<usize> {
        match type_byte {
            0 | 9 => Ok(self.morph.bytes() + 4),
            1 => Ok(self.vertex.bytes() + 12),
            2 => Ok(self.bone.bytes() + 28),
            3..=7 => Ok(self.vertex.bytes() + 16),
            8 => Ok(self.material.bytes() + 1 + 112),
            10 => Ok(self.rigid_body.bytes() + 25),
            other => Err(MmdError::Header(format!("unknown morph type {}", other))),
        }
    }
}

/// Morph 记录
#[derive(Clone, Debug, PartialEq)]
pub struct MorphData {
    pub name: String,
    pub english_name: String,
    pub category: MorphCategory,
    pub offsets: MorphOffsets,
}

impl MorphData {
    pub(crate) fn skip_pmx(reader: &mut ByteReader, widths: &MorphWidths) -> Result<()> {
        reader.skip_text("morph name")?;
        reader.skip_text("morph english name")?;
        reader.skip(1, "morph category")?;
        let type_byte = reader.read_u8("morph type")?;
        let size = widths.offset_size(type_byte)?;
        let count = reader.read_count("morph offset count")?;
        let total = size
            .checked_mul(count)
            .ok_or_else(|| MmdError::Header(format!("morph offset count {} overflows", count)))?;
        reader.skip(total, "morph offsets")
    }

    pub(crate) fn read_pmx(
        reader: &mut ByteReader,
        encoding: TextEncoding,
        widths: &MorphWidths,
    ) -> Result<Self> {
        let name = reader.read_text(encoding, "morph name")?;
        let english_name = reader.read_text(encoding, "morph english name")?;
        let category = MorphCategory::from_byte(reader.read_u8("morph category")?)?;
        let type_byte = reader.read_u8("morph type")?;
        let count = reader.read_count("morph offset count")?;
        // 预解析已验证大小，这里仍然逐项检查
        let capacity = count.min(reader.remaining());

        let offsets = match type_byte {
            0 | 9 => {
                let mut items = Vec::with_capacity(capacity);
                for _ in 0..count {
                    items.push(GroupOffset {
                        morph_index: reader.read_index(widths.morph, "morph group child")?,
                        weight: reader.read_f32("morph group weight")?,
                    });
                }
                if type_byte == 0 {
                    MorphOffsets::Group(items)
                } else {
                    MorphOffsets::Flip(items)
                }
            }
            1 => {
                let mut items = Vec::with_capacity(capacity);
                for _ in 0..count {
                    items.push(VertexOffset {
                        vertex_index: reader.read_unsigned_index(widths.vertex, "morph vertex")?,
                        position: reader.read_vec3("morph vertex offset")?,
                    });
                }
                MorphOffsets::Vertex(items)
            }
            2 => {
                let mut items = Vec::with_capacity(capacity);
                for _ in 0..count {
                    items.push(BoneOffset {
                        bone_index: reader.read_index(widths.bone, "morph bone")?,
                        translation: reader.read_vec3("morph bone translation")?,
                        rotation: reader.read_quat("morph bone rotation")?,
                    });
                }
                MorphOffsets::Bone(items)
            }
            3..=7 => {
                let mut items = Vec::with_capacity(capacity);
                for _ in 0..count {
                    items.push(UvOffset {
                        vertex_index: reader.read_unsigned_index(widths.vertex, "morph uv vertex")?,
                        offset: reader.read_vec4("morph uv offset")?,
                    });
                }
                MorphOffsets::Uv {
                    channel: type_byte - 3,
                    offsets: items,
                }
            }
            8 => {
                let mut items = Vec::with_capacity(capacity);
                for _ in 0..count {
                    let material_index = reader.read_index(widths.material, "morph material")?;
                    let operation = match reader.read_u8("morph material operation")? {
                        0 => MaterialOperation::Multiply,
                        1 => MaterialOperation::Add,
                        other => {
                            return Err(MmdError::Header(format!(
                                "unknown material morph operation {}",
                                other
                            )))
                        }
                    };
                    items.push(MaterialOffset {
                        material_index,
                        operation,
                        diffuse: reader.read_vec4("morph material diffuse")?,
                        specular: reader.read_vec3("morph material specular")?,
                        shininess: reader.read_f32("morph material shininess")?,
                        ambient: reader.read_vec3("morph material ambient")?,
                        edge_color: reader.read_vec4("morph material edge color")?,
                        edge_size: reader.read_f32("morph material edge size")?,
                        texture_tint: reader.read_vec4("morph material texture")?,
                        sphere_tint: reader.read_vec4("morph material sphere")?,
                        toon_tint: reader.read_vec4("morph material toon")?,
                    });
                }
                MorphOffsets::Material(items)
            }
            10 => {
                let mut items = Vec::with_capacity(capacity);
                for _ in 0..count {
                    items.push(ImpulseOffset {
                        rigid_body_index: reader.read_index(widths.rigid_body, "morph impulse body")?,
                        local: reader.read_u8("morph impulse local")? != 0,
                        velocity: reader.read_vec3("morph impulse velocity")?,
                        torque: reader.read_vec3("morph impulse torque")?,
                    });
                }
                MorphOffsets::Impulse(items)
            }
            other => return Err(MmdError::Header(format!("unknown morph type {}", other))),
        };

        Ok(Self {
            name,
            english_name,
            category,
            offsets,
        })
    }

    pub(crate) fn write_pmx(
        &self,
        writer: &mut ByteWriter,
        encoding: TextEncoding,
        widths: &MorphWidths,
    ) -> Result<()> {
        writer.write_text(&self.name, encoding, "morph name")?;
        writer.write_text(&self.english_name, encoding, "morph english name")?;
        writer.write_u8(self.category.to_byte())?;
        writer.write_u8(self.offsets.type_byte())?;
        writer.write_count(self.offsets.len(), "morph offset count")?;

        match &self.offsets {
            MorphOffsets::Group(items) | MorphOffsets::Flip(items) => {
                for item in items {
                    writer.write_index(widths.morph, item.morph_index, "morph group child")?;
                    writer.write_f32(item.weight)?;
                }
            }
            MorphOffsets::Vertex(items) => {
                for item in items {
                    writer.write_unsigned_index(widths.vertex, item.vertex_index, "morph vertex")?;
                    writer.write_vec3(item.position)?;
                }
            }
            MorphOffsets::Bone(items) => {
                for item in items {
                    writer.write_index(widths.bone, item.bone_index, "morph bone")?;
                    writer.write_vec3(item.translation)?;
                    writer.write_quat(item.rotation)?;
                }
            }
            MorphOffsets::Uv { offsets, .. } => {
                for item in offsets {
                    writer.write_unsigned_index(widths.vertex, item.vertex_index, "morph uv vertex")?;
                    writer.write_vec4(item.offset)?;
                }
            }
            MorphOffsets::Material(items) => {
                for item in items {
                    writer.write_index(widths.material, item.material_index, "morph material")?;
                    writer.write_u8(match item.operation {
                        MaterialOperation::Multiply => 0,
                        MaterialOperation::Add => 1,
                    })?;
                    writer.write_vec4(item.diffuse)?;
                    writer.write_vec3(item.specular)?;
                    writer.write_f32(item.shininess)?;
                    writer.write_vec3(item.ambient)?;
                    writer.write_vec4(item.edge_color)?;
                    writer.write_f32(item.edge_size)?;
                    writer.write_vec4(item.texture_tint)?;
                    writer.write_vec4(item.sphere_tint)?;
                    writer.write_vec4(item.toon_tint)?;
                }
            }
            MorphOffsets::Impulse(items) => {
                for item in items {
                    writer.write_index(widths.rigid_body, item.rigid_body_index, "morph impulse body")?;
                    writer.write_u8(item.local as u8)?;
                    writer.write_vec3(item.velocity)?;
                    writer.write_vec3(item.torque)?;
                }
            }
        }
        Ok(())
    }
}
