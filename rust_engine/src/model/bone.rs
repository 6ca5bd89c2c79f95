//! 骨骼记录（文件中的原始形式）

use bitflags::bitflags;
use glam::Vec3;

use crate::codec::{ByteReader, ByteWriter, IndexWidth, TextEncoding};
use crate::Result;

bitflags! {
    /// PMX 骨骼标志
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct BoneFlags: u16 {
        /// 末端由骨骼索引指定（否则为偏移）
        const DESTINATION_BONE = 0x0001;
        const ROTATABLE = 0x0002;
        const MOVABLE = 0x0004;
        const VISIBLE = 0x0008;
        const OPERABLE = 0x0010;
        const IK = 0x0020;
        const INHERENT_LOCAL = 0x0080;
        const INHERENT_ROTATION = 0x0100;
        const INHERENT_TRANSLATION = 0x0200;
        const FIXED_AXIS = 0x0400;
        const LOCAL_AXES = 0x0800;
        const AFTER_PHYSICS = 0x1000;
        const EXTERNAL_PARENT = 0x2000;
    }
}

/// 骨骼末端
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BoneDestination {
    Bone(i32),
    Offset(Vec3),
}

/// 付与（继承）父骨骼
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Inherent {
    pub parent_index: i32,
    pub coefficient: f32,
}

/// 本地轴
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocalAxes {
    pub x: Vec3,
    pub z: Vec3,
}

/// IK 链接
#[derive(Clone, Debug, PartialEq)]
pub struct IkLinkData {
    pub bone_index: i32,
    /// 角度限制（下限, 上限），弧度
    pub limits: Option<(Vec3, Vec3)>,
}

/// IK 设置
#[derive(Clone, Debug, PartialEq)]
pub struct IkData {
    pub effector_index: i32,
    pub iterations: i32,
    /// 每次迭代的单位角度限制（弧度）
    pub angle_limit: f32,
    pub links: Vec<IkLinkData>,
}

/// 骨骼记录
#[derive(Clone, Debug, PartialEq)]
pub struct BoneData {
    pub name: String,
    pub english_name: String,
    /// 绑定姿势下的世界坐标
    pub origin: Vec3,
    pub parent_index: i32,
    /// 变形阶层
    pub layer: i32,
    pub flags: BoneFlags,
    pub destination: BoneDestination,
    pub inherent: Option<Inherent>,
    pub fixed_axis: Option<Vec3>,
    pub local_axes: Option<LocalAxes>,
    pub external_parent_key: Option<i32>,
    pub ik: Option<IkData>,
}

impl Default for BoneData {
    fn default() -> Self {
        Self {
            name: String::new(),
            english_name: String::new(),
            origin: Vec3::ZERO,
            parent_index: -1,
            layer: 0,
            flags: BoneFlags::ROTATABLE | BoneFlags::VISIBLE | BoneFlags::OPERABLE,
            destination: BoneDestination::Offset(Vec3::ZERO),
            inherent: None,
            fixed_axis: None,
            local_axes: None,
            external_parent_key: None,
            ik: None,
        }
    }
}

impl BoneData {
    pub fn has_inherent_rotation(&self) -> bool {
        self.flags.contains(BoneFlags::INHERENT_ROTATION)
    }

    pub fn has_inherent_translation(&self) -> bool {
        self.flags.contains(BoneFlags::INHERENT_TRANSLATION)
    }

    /// 付与父骨骼索引（仅当标志位启用付与时有效）
    pub fn inherent_parent_index(&self) -> Option<i32> {
        if self.has_inherent_rotation() || self.has_inherent_translation() {
            self.inherent.map(|inherent| inherent.parent_index)
        } else {
            None
        }
    }

    pub fn is_after_physics(&self) -> bool {
        self.flags.contains(BoneFlags::AFTER_PHYSICS)
    }

    pub(crate) fn skip_pmx(reader: &mut ByteReader, bone_width: IndexWidth) -> Result<()> {
        let b = bone_width.bytes();
        reader.skip_text("bone name")?;
        reader.skip_text("bone english name")?;
        reader.skip(12 + b + 4, "bone")?;
        let flags = BoneFlags::from_bits_retain(reader.read_u16("bone flags")?);
        let destination = if flags.contains(BoneFlags::DESTINATION_BONE) { b } else { 12 };
        reader.skip(destination, "bone destination")?;
        if flags.intersects(BoneFlags::INHERENT_ROTATION | BoneFlags::INHERENT_TRANSLATION) {
            reader.skip(b + 4, "bone inherent")?;
        }
        if flags.contains(BoneFlags::FIXED_AXIS) {
            reader.skip(12, "bone fixed axis")?;
        }
        if flags.contains(BoneFlags::LOCAL_AXES) {
            reader.skip(24, "bone local axes")?;
        }
        if flags.contains(BoneFlags::EXTERNAL_PARENT) {
            reader.skip(4, "bone external parent")?;
        }
        if flags.contains(BoneFlags::IK) {
            reader.skip(b + 8, "bone ik")?;
            let link_count = reader.read_count("bone ik link count")?;
            for _ in 0..link_count {
                reader.skip(b, "bone ik link")?;
                if reader.read_u8("bone ik limit flag")? != 0 {
                    reader.skip(24, "bone ik limits")?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn read_pmx(
        reader: &mut ByteReader,
        encoding: TextEncoding,
        bone_width: IndexWidth,
    ) -> Result<Self> {
        let name = reader.read_text(encoding, "bone name")?;
        let english_name = reader.read_text(encoding, "bone english name")?;
        let origin = reader.read_vec3("bone origin")?;
        let parent_index = reader.read_index(bone_width, "bone parent")?;
        let layer = reader.read_i32("bone layer")?;
        let flags = BoneFlags::from_bits_retain(reader.read_u16("bone flags")?);

        let destination = if flags.contains(BoneFlags::DESTINATION_BONE) {
            BoneDestination::Bone(reader.read_index(bone_width, "bone destination")?)
        } else {
            BoneDestination::Offset(reader.read_vec3("bone destination")?)
        };

        let inherent = if flags.intersects(BoneFlags::INHERENT_ROTATION | BoneFlags::INHERENT_TRANSLATION) {
            Some(Inherent {
                parent_index: reader.read_index(bone_width, "bone inherent parent")?,
                coefficient: reader.read_f32("bone inherent coefficient")?,
            })
        } else {
            None
        };

        let fixed_axis = if flags.contains(BoneFlags::FIXED_AXIS) {
            Some(reader.read_vec3("bone fixed axis")?)
        } else {
            None
        };

        let local_axes = if flags.contains(BoneFlags::LOCAL_AXES) {
            Some(LocalAxes {
                x: reader.read_vec3("bone local x")?,
                z: reader.read_vec3("bone local z")?,
            })
        } else {
            None
        };

        let external_parent_key = if flags.contains(BoneFlags::EXTERNAL_PARENT) {
            Some(reader.read_i32("bone external parent")?)
        } else {
            None
        };

        let ik = if flags.contains(BoneFlags::IK) {
            let effector_index = reader.read_index(bone_width, "bone ik effector")?;
            let iterations = reader.read_i32("bone ik iterations")?;
            let angle_limit = reader.read_f32("bone ik angle limit")?;
            let link_count = reader.read_count("bone ik link count")?;
            let mut links = Vec::with_capacity(link_count.min(reader.remaining()));
            for _ in 0..link_count {
                let bone_index = reader.read_index(bone_width, "bone ik link")?;
                let limits = if reader.read_u8("bone ik limit flag")? != 0 {
                    Some((
                        reader.read_vec3("bone ik lower limit")?,
                        reader.read_vec3("bone ik upper limit")?,
                    ))
                } else {
                    None
                };
                links.push(IkLinkData { bone_index, limits });
            }
            Some(IkData {
                effector_index,
                iterations,
                angle_limit,
                links,
            })
        } else {
            None
        };

        Ok(Self {
            name,
            english_name,
            origin,
            parent_index,
            layer,
            flags,
            destination,
            inherent,
            fixed_axis,
            local_axes,
            external_parent_key,
            ik,
        })
    }

    /// 写出；可选字段是否写出由标志位决定，缺失时写默认值
    pub(crate) fn write_pmx(
        &self,
        writer: &mut ByteWriter,
        encoding: TextEncoding,
        bone_width: IndexWidth,
    ) -> Result<()> {
        writer.write_text(&self.name, encoding, "bone name")?;
        writer.write_text(&self.english_name, encoding, "bone english name")?;
        writer.write_vec3(self.origin)?;
        writer.write_index(bone_width, self.parent_index, "bone parent")?;
        writer.write_i32(self.layer)?;
        writer.write_u16(self.flags.bits())?;

        if self.flags.contains(BoneFlags::DESTINATION_BONE) {
            let index = match self.destination {
                BoneDestination::Bone(index) => index,
                BoneDestination::Offset(_) => -1,
            };
            writer.write_index(bone_width, index, "bone destination")?;
        } else {
            let offset = match self.destination {
                BoneDestination::Offset(offset) => offset,
                BoneDestination::Bone(_) => Vec3::ZERO,
            };
            writer.write_vec3(offset)?;
        }

        if self.flags.intersects(BoneFlags::INHERENT_ROTATION | BoneFlags::INHERENT_TRANSLATION) {
            let inherent = self.inherent.unwrap_or(Inherent {
                parent_index: -1,
                coefficient: 1.0,
            });
            writer.write_index(bone_width, inherent.parent_index, "bone inherent parent")?;
            writer.write_f32(inherent.coefficient)?;
        }
        if self.flags.contains(BoneFlags::FIXED_AXIS) {
            writer.write_vec3(self.fixed_axis.unwrap_or(Vec3::X))?;
        }
        if self.flags.contains(BoneFlags::LOCAL_AXES) {
            let axes = self.local_axes.unwrap_or(LocalAxes { x: Vec3::X, z: Vec3::Z });
            writer.write_vec3(axes.x)?;
            writer.write_vec3(axes.z)?;
        }
        if self.flags.contains(BoneFlags::EXTERNAL_PARENT) {
            writer.write_i32(self.external_parent_key.unwrap_or(0))?;
        }
        if self.flags.contains(BoneFlags::IK) {
            match &self.ik {
                Some(ik) => {
                    writer.write_index(bone_width, ik.effector_index, "bone ik effector")?;
                    writer.write_i32(ik.iterations)?;
                    writer.write_f32(ik.angle_limit)?;
                    writer.write_count(ik.links.len(), "bone ik link count")?;
                    for link in &ik.links {
                        writer.write_index(bone_width, link.bone_index, "bone ik link")?;
                        match link.limits {
                            Some((lower, upper)) => {
                                writer.write_u8(1)?;
                                writer.write_vec3(lower)?;
                                writer.write_vec3(upper)?;
                            }
                            None => writer.write_u8(0)?,
                        }
                    }
                }
                None => {
                    writer.write_index(bone_width, -1, "bone ik effector")?;
                    writer.write_i32(0)?;
                    writer.write_f32(0.0)?;
                    writer.write_i32(0)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ik_bone() -> BoneData {
        BoneData {
            name: "左足ＩＫ".to_string(),
            origin: Vec3::new(1.0, 1.0, 0.0),
            parent_index: 0,
            layer: 1,
            flags: BoneFlags::ROTATABLE
                | BoneFlags::MOVABLE
                | BoneFlags::IK
                | BoneFlags::INHERENT_ROTATION
                | BoneFlags::LOCAL_AXES
                | BoneFlags::EXTERNAL_PARENT,
            destination: BoneDestination::Offset(Vec3::new(0.0, 0.0, 1.0)),
            inherent: Some(Inherent {
                parent_index: 2,
                coefficient: 0.5,
            }),
            local_axes: Some(LocalAxes { x: Vec3::X, z: Vec3::Z }),
            external_parent_key: Some(7),
            ik: Some(IkData {
                effector_index: 3,
                iterations: 40,
                angle_limit: 2.0,
                links: vec![
                    IkLinkData {
                        bone_index: 2,
                        limits: Some((Vec3::new(-3.14, 0.0, 0.0), Vec3::new(-0.01, 0.0, 0.0))),
                    },
                    IkLinkData {
                        bone_index: 1,
                        limits: None,
                    },
                ],
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_bone_roundtrip() {
        let bone = ik_bone();
        let mut writer = ByteWriter::new();
        bone.write_pmx(&mut writer, TextEncoding::Utf8, IndexWidth::Two).unwrap();
        let bytes = writer.into_inner();

        let mut skipper = ByteReader::new(&bytes);
        BoneData::skip_pmx(&mut skipper, IndexWidth::Two).unwrap();
        assert_eq!(skipper.offset(), bytes.len());

        let mut reader = ByteReader::new(&bytes);
        let decoded = BoneData::read_pmx(&mut reader, TextEncoding::Utf8, IndexWidth::Two).unwrap();
        assert_eq!(decoded, bone);
        assert_eq!(decoded.inherent_parent_index(), Some(2));
    }

    #[test]
    fn test_inherent_ignored_without_flag() {
        let bone = BoneData {
            inherent: Some(Inherent {
                parent_index: 1,
                coefficient: 1.0,
            }),
            ..Default::default()
        };
        assert_eq!(bone.inherent_parent_index(), None);
    }
}
