//! 顶点记录

use glam::{Vec2, Vec3, Vec4};

use crate::codec::{ByteReader, ByteWriter, IndexWidth};
use crate::{MmdError, Result};

/// 模型顶点骨骼权重
///
/// 骨骼索引保持文件中的原始值，-1 表示无骨骼。
#[derive(Clone, Debug, PartialEq)]
pub enum VertexWeight {
    Bdef1 { bone: i32 },
    Bdef2 { bones: [i32; 2], weight: f32 },
    Bdef4 { bones: [i32; 4], weights: [f32; 4] },
    Sdef { bones: [i32; 2], weight: f32, c: Vec3, r0: Vec3, r1: Vec3 },
    Qdef { bones: [i32; 4], weights: [f32; 4] },
}

impl Default for VertexWeight {
    fn default() -> Self {
        VertexWeight::Bdef1 { bone: 0 }
    }
}

impl VertexWeight {
    /// PMX 权重类型字节
    pub fn type_byte(&self) -> u8 {
        match self {
            VertexWeight::Bdef1 { .. } => 0,
            VertexWeight::Bdef2 { .. } => 1,
            VertexWeight::Bdef4 { .. } => 2,
            VertexWeight::Sdef { .. } => 3,
            VertexWeight::Qdef { .. } => 4,
        }
    }

    /// 引用的骨骼索引
    pub fn bone_indices(&self) -> &[i32] {
        match self {
            VertexWeight::Bdef1 { bone } => std::slice::from_ref(bone),
            VertexWeight::Bdef2 { bones, .. } | VertexWeight::Sdef { bones, .. } => &bones[..],
            VertexWeight::Bdef4 { bones, .. } | VertexWeight::Qdef { bones, .. } => &bones[..],
        }
    }

    /// 给定权重类型后，记录剩余部分的字节数
    pub fn record_size(type_byte: u8, bone_width: IndexWidth) -> Result<usize> {
        let b = bone_width.bytes();
        match type_byte {
            0 => Ok(b),
            1 => Ok(b * 2 + 4),
            2 | 4 => Ok(b * 4 + 16),
            3 => Ok(b * 2 + 4 + 36),
            other => Err(MmdError::Header(format!("unknown vertex weight type {}", other))),
        }
    }
}

/// 顶点
#[derive(Clone, Debug, PartialEq)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    /// 追加 UV（数量由头部决定，0~4）
    pub additional_uvs: Vec<Vec4>,
    pub weight: VertexWeight,
    pub edge_size: f32,
}

impl Default for Vertex {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            normal: Vec3::Y,
            uv: Vec2::ZERO,
            additional_uvs: Vec::new(),
            weight: VertexWeight::default(),
            edge_size: 1.0,
        }
    }
}

impl Vertex {
    /// 预解析：只检查大小，不创建对象
    pub(crate) fn skip_pmx(
        reader: &mut ByteReader,
        additional_uv_count: usize,
        bone_width: IndexWidth,
    ) -> Result<()> {
        reader.skip(32 + additional_uv_count * 16, "vertex")?;
        let type_byte = reader.read_u8("vertex weight type")?;
        let size = VertexWeight::record_size(type_byte, bone_width)?;
        reader.skip(size + 4, "vertex weight")
    }

    pub(crate) fn read_pmx(
        reader: &mut ByteReader,
        additional_uv_count: usize,
        bone_width: IndexWidth,
    ) -> Result<Self> {
        let position = reader.read_vec3("vertex position")?;
        let normal = reader.read_vec3("vertex normal")?;
        let uv = reader.read_vec2("vertex uv")?;
        let mut additional_uvs = Vec::with_capacity(additional_uv_count);
        for _ in 0..additional_uv_count {
            additional_uvs.push(reader.read_vec4("vertex additional uv")?);
        }

        let ctx = "vertex bone";
        let weight = match reader.read_u8("vertex weight type")? {
            0 => VertexWeight::Bdef1 {
                bone: reader.read_index(bone_width, ctx)?,
            },
            1 => VertexWeight::Bdef2 {
                bones: [reader.read_index(bone_width, ctx)?, reader.read_index(bone_width, ctx)?],
                weight: reader.read_f32("vertex weight")?,
            },
            kind @ (2 | 4) => {
                let mut bones = [0i32; 4];
                for bone in &mut bones {
                    *bone = reader.read_index(bone_width, ctx)?;
                }
                let mut weights = [0f32; 4];
                for weight in &mut weights {
                    *weight = reader.read_f32("vertex weight")?;
                }
                if kind == 2 {
                    VertexWeight::Bdef4 { bones, weights }
                } else {
                    VertexWeight::Qdef { bones, weights }
                }
            }
            3 => VertexWeight::Sdef {
                bones: [reader.read_index(bone_width, ctx)?, reader.read_index(bone_width, ctx)?],
                weight: reader.read_f32("vertex weight")?,
                c: reader.read_vec3("sdef c")?,
                r0: reader.read_vec3("sdef r0")?,
                r1: reader.read_vec3("sdef r1")?,
            },
            other => {
                return Err(MmdError::Header(format!("unknown vertex weight type {}", other)))
            }
        };
        let edge_size = reader.read_f32("vertex edge")?;

        Ok(Self {
            position,
            normal,
            uv,
            additional_uvs,
            weight,
            edge_size,
        })
    }

    pub(crate) fn write_pmx(
        &self,
        writer: &mut ByteWriter,
        additional_uv_count: usize,
        bone_width: IndexWidth,
    ) -> Result<()> {
        writer.write_vec3(self.position)?;
        writer.write_vec3(self.normal)?;
        writer.write_vec2(self.uv)?;
        for i in 0..additional_uv_count {
            writer.write_vec4(self.additional_uvs.get(i).copied().unwrap_or(Vec4::ZERO))?;
        }

        let ctx = "vertex bone";
        writer.write_u8(self.weight.type_byte())?;
        match &self.weight {
            VertexWeight::Bdef1 { bone } => writer.write_index(bone_width, *bone, ctx)?,
            VertexWeight::Bdef2 { bones, weight } => {
                writer.write_index(bone_width, bones[0], ctx)?;
                writer.write_index(bone_width, bones[1], ctx)?;
                writer.write_f32(*weight)?;
            }
            VertexWeight::Bdef4 { bones, weights } | VertexWeight::Qdef { bones, weights } => {
                for bone in bones {
                    writer.write_index(bone_width, *bone, ctx)?;
                }
                for weight in weights {
                    writer.write_f32(*weight)?;
                }
            }
            VertexWeight::Sdef { bones, weight, c, r0, r1 } => {
                writer.write_index(bone_width, bones[0], ctx)?;
                writer.write_index(bone_width, bones[1], ctx)?;
                writer.write_f32(*weight)?;
                writer.write_vec3(*c)?;
                writer.write_vec3(*r0)?;
                writer.write_vec3(*r1)?;
            }
        }
        writer.write_f32(self.edge_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_sizes() {
        assert_eq!(VertexWeight::record_size(0, IndexWidth::Two).unwrap(), 2);
        assert_eq!(VertexWeight::record_size(1, IndexWidth::One).unwrap(), 6);
        assert_eq!(VertexWeight::record_size(2, IndexWidth::Four).unwrap(), 32);
        assert_eq!(VertexWeight::record_size(3, IndexWidth::One).unwrap(), 42);
        assert!(VertexWeight::record_size(5, IndexWidth::One).is_err());
    }

    #[test]
    fn test_sdef_vertex_roundtrip() {
        let vertex = Vertex {
            position: Vec3::new(1.0, 2.0, 3.0),
            additional_uvs: vec![Vec4::new(0.1, 0.2, 0.3, 0.4)],
            weight: VertexWeight::Sdef {
                bones: [0, 1],
                weight: 0.25,
                c: Vec3::new(0.0, 1.0, 0.0),
                r0: Vec3::X,
                r1: Vec3::Z,
            },
            ..Default::default()
        };
        let mut writer = ByteWriter::new();
        vertex.write_pmx(&mut writer, 1, IndexWidth::One).unwrap();
        let bytes = writer.into_inner();
        assert_eq!(bytes.len(), 32 + 16 + 1 + 42 + 4);

        let mut skipper = ByteReader::new(&bytes);
        Vertex::skip_pmx(&mut skipper, 1, IndexWidth::One).unwrap();
        assert!(skipper.is_eof());

        let mut reader = ByteReader::new(&bytes);
        assert_eq!(Vertex::read_pmx(&mut reader, 1, IndexWidth::One).unwrap(), vertex);
    }

    #[test]
    fn test_unknown_weight_type() {
        let mut bytes = vec![0u8; 32];
        bytes.push(9);
        let mut reader = ByteReader::new(&bytes);
        assert!(matches!(
            Vertex::read_pmx(&mut reader, 0, IndexWidth::One),
            Err(MmdError::Header(_))
        ));
    }
}
