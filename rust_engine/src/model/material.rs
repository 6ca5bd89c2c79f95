//! MMD 材质定义

use bitflags::bitflags;
use glam::{Vec3, Vec4};

use crate::codec::{ByteReader, ByteWriter, IndexWidth, TextEncoding};
use crate::{MmdError, Result};

bitflags! {
    /// 材质绘制标志（保留未知位，写回时逐字节一致）
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct MaterialFlags: u8 {
        const DOUBLE_SIDED = 0x01;
        const GROUND_SHADOW = 0x02;
        const CASTS_SHADOW = 0x04;
        const RECEIVES_SHADOW = 0x08;
        const HAS_EDGE = 0x10;
        const VERTEX_COLOR = 0x20;
        const POINT_DRAW = 0x40;
        const LINE_DRAW = 0x80;
    }
}

/// 球面贴图混合方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SphereMode {
    #[default]
    None,
    Multiply,
    Add,
    SubTexture,
}

impl SphereMode {
    fn from_byte(value: u8) -> Result<Self> {
        match value {
            0 => Ok(SphereMode::None),
            1 => Ok(SphereMode::Multiply),
            2 => Ok(SphereMode::Add),
            3 => Ok(SphereMode::SubTexture),
            _ => Err(MmdError::Header(format!("unknown sphere mode {}", value))),
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            SphereMode::None => 0,
            SphereMode::Multiply => 1,
            SphereMode::Add => 2,
            SphereMode::SubTexture => 3,
        }
    }
}

/// Toon 贴图引用
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Toon {
    /// 纹理表索引（-1 表示无）
    Texture(i32),
    /// 共享 toon01~toon10
    Shared(u8),
}

impl Default for Toon {
    fn default() -> Self {
        Toon::Texture(-1)
    }
}

/// MMD 材质
#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub name: String,
    pub english_name: String,
    pub diffuse: Vec4,
    pub specular: Vec3,
    pub shininess: f32,
    pub ambient: Vec3,
    pub flags: MaterialFlags,
    pub edge_color: Vec4,
    pub edge_size: f32,
    pub texture_index: i32,
    pub sphere_texture_index: i32,
    pub sphere_mode: SphereMode,
    pub toon: Toon,
    pub memo: String,
    /// 该材质占用的面索引数（3 的倍数）
    pub index_count: i32,
}

impl Material {
    /// 是否双面渲染
    pub fn is_double_sided(&self) -> bool {
        self.flags.contains(MaterialFlags::DOUBLE_SIDED)
    }

    /// 是否投射阴影
    pub fn casts_shadow(&self) -> bool {
        self.flags.contains(MaterialFlags::CASTS_SHADOW)
    }

    /// 是否接收阴影
    pub fn receives_shadow(&self) -> bool {
        self.flags.contains(MaterialFlags::RECEIVES_SHADOW)
    }

    /// 是否绘制边缘
    pub fn has_edge(&self) -> bool {
        self.flags.contains(MaterialFlags::HAS_EDGE)
    }

    pub(crate) fn skip_pmx(reader: &mut ByteReader, texture_width: IndexWidth) -> Result<()> {
        reader.skip_text("material name")?;
        reader.skip_text("material english name")?;
        // diffuse .. edge size
        reader.skip(16 + 12 + 4 + 12 + 1 + 16 + 4, "material")?;
        reader.skip(texture_width.bytes() * 2 + 1, "material texture")?;
        let shared = reader.read_u8("material toon flag")?;
        let toon_size = if shared == 0 { texture_width.bytes() } else { 1 };
        reader.skip(toon_size, "material toon")?;
        reader.skip_text("material memo")?;
        reader.skip(4, "material index count")
    }

    pub(crate) fn read_pmx(
        reader: &mut ByteReader,
        encoding: TextEncoding,
        texture_width: IndexWidth,
    ) -> Result<Self> {
        let name = reader.read_text(encoding, "material name")?;
        let english_name = reader.read_text(encoding, "material english name")?;
        let diffuse = reader.read_vec4("material diffuse")?;
        let specular = reader.read_vec3("material specular")?;
        let shininess = reader.read_f32("material shininess")?;
        let ambient = reader.read_vec3("material ambient")?;
        let flags = MaterialFlags::from_bits_retain(reader.read_u8("material flags")?);
        let edge_color = reader.read_vec4("material edge color")?;
        let edge_size = reader.read_f32("material edge size")?;
        let texture_index = reader.read_index(texture_width, "material texture")?;
        let sphere_texture_index = reader.read_index(texture_width, "material sphere texture")?;
        let sphere_mode = SphereMode::from_byte(reader.read_u8("material sphere mode")?)?;
        let toon = match reader.read_u8("material toon flag")? {
            0 => Toon::Texture(reader.read_index(texture_width, "material toon")?),
            1 => Toon::Shared(reader.read_u8("material toon")?),
            other => return Err(MmdError::Header(format!("unknown toon flag {}", other))),
        };
        let memo = reader.read_text(encoding, "material memo")?;
        let index_count = reader.read_i32("material index count")?;

        Ok(Self {
            name,
            english_name,
            diffuse,
            specular,
            shininess,
            ambient,
            flags,
            edge_color,
            edge_size,
            texture_index,
            sphere_texture_index,
            sphere_mode,
            toon,
            memo,
            index_count,
        })
    }

    pub(crate) fn write_pmx(
        &self,
        writer: &mut ByteWriter,
        encoding: TextEncoding,
        texture_width: IndexWidth,
    ) -> Result<()> {
        writer.write_text(&self.name, encoding, "material name")?;
        writer.write_text(&self.english_name, encoding, "material english name")?;
        writer.write_vec4(self.diffuse)?;
        writer.write_vec3(self.specular)?;
        writer.write_f32(self.shininess)?;
        writer.write_vec3(self.ambient)?;
        writer.write_u8(self.flags.bits())?;
        writer.write_vec4(self.edge_color)?;
        writer.write_f32(self.edge_size)?;
        writer.write_index(texture_width, self.texture_index, "material texture")?;
        writer.write_index(texture_width, self.sphere_texture_index, "material sphere texture")?;
        writer.write_u8(self.sphere_mode.to_byte())?;
        match self.toon {
            Toon::Texture(index) => {
                writer.write_u8(0)?;
                writer.write_index(texture_width, index, "material toon")?;
            }
            Toon::Shared(index) => {
                writer.write_u8(1)?;
                writer.write_u8(index)?;
            }
        }
        writer.write_text(&self.memo, encoding, "material memo")?;
        writer.write_i32(self.index_count)
    }
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: String::new(),
            english_name: String::new(),
            diffuse: Vec4::new(1.0, 1.0, 1.0, 1.0),
            specular: Vec3::new(0.0, 0.0, 0.0),
            shininess: 0.0,
            ambient: Vec3::new(0.5, 0.5, 0.5),
            flags: MaterialFlags::empty(),
            edge_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            edge_size: 1.0,
            texture_index: -1,
            sphere_texture_index: -1,
            sphere_mode: SphereMode::None,
            toon: Toon::default(),
            memo: String::new(),
            index_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_material_roundtrip_keeps_unknown_flags() {
        let material = Material {
            name: "肌".to_string(),
            flags: MaterialFlags::from_bits_retain(0xFF),
            texture_index: 2,
            sphere_mode: SphereMode::Add,
            toon: Toon::Shared(3),
            memo: "memo".to_string(),
            index_count: 6,
            ..Default::default()
        };
        let mut writer = ByteWriter::new();
        material
            .write_pmx(&mut writer, TextEncoding::Utf16Le, IndexWidth::One)
            .unwrap();
        let bytes = writer.into_inner();

        let mut skipper = ByteReader::new(&bytes);
        Material::skip_pmx(&mut skipper, IndexWidth::One).unwrap();
        assert!(skipper.is_eof());

        let mut reader = ByteReader::new(&bytes);
        let decoded = Material::read_pmx(&mut reader, TextEncoding::Utf16Le, IndexWidth::One).unwrap();
        assert_eq!(decoded, material);
        assert!(decoded.has_edge());
        assert!(decoded.is_double_sided());
    }
}
