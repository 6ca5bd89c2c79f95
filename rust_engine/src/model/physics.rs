//! 刚体与关节记录
//!
//! 只保存数据，物理模拟由外部引擎完成。

use glam::{EulerRot, Mat4, Quat, Vec3};

use crate::codec::{ByteReader, ByteWriter, IndexWidth, TextEncoding};
use crate::{MmdError, Result};

/// 碰撞形状
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RigidBodyShape {
    #[default]
    Sphere,
    Box,
    Capsule,
}

impl RigidBodyShape {
    pub fn from_byte(value: u8) -> Result<Self> {
        match value {
            0 => Ok(RigidBodyShape::Sphere),
            1 => Ok(RigidBodyShape::Box),
            2 => Ok(RigidBodyShape::Capsule),
            _ => Err(MmdError::Header(format!("unknown rigid body shape {}", value))),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            RigidBodyShape::Sphere => 0,
            RigidBodyShape::Box => 1,
            RigidBodyShape::Capsule => 2,
        }
    }
}

/// 刚体运算模式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RigidBodyMode {
    /// 跟随骨骼
    #[default]
    Static,
    /// 物理驱动
    Dynamic,
    /// 物理驱动，位置跟随骨骼
    DynamicWithBonePosition,
}

impl RigidBodyMode {
    pub fn from_byte(value: u8) -> Result<Self> {
        match value {
            0 => Ok(RigidBodyMode::Static),
            1 => Ok(RigidBodyMode::Dynamic),
            2 => Ok(RigidBodyMode::DynamicWithBonePosition),
            _ => Err(MmdError::Header(format!("unknown rigid body mode {}", value))),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            RigidBodyMode::Static => 0,
            RigidBodyMode::Dynamic => 1,
            RigidBodyMode::DynamicWithBonePosition => 2,
        }
    }
}

/// 刚体
#[derive(Clone, Debug, PartialEq)]
pub struct RigidBody {
    pub name: String,
    pub english_name: String,
    /// 关联骨骼，-1 表示世界/中心
    pub bone_index: i32,
    /// 碰撞组
    pub group: u8,
    /// 不碰撞组掩码
    pub group_mask: u16,
    pub shape: RigidBodyShape,
    pub size: Vec3,
    /// 模型空间位置
    pub position: Vec3,
    /// 欧拉角（弧度）
    pub rotation: Vec3,
    pub mass: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub restitution: f32,
    pub friction: f32,
    pub mode: RigidBodyMode,
}

impl Default for RigidBody {
    fn default() -> Self {
        Self {
            name: String::new(),
            english_name: String::new(),
            bone_index: -1,
            group: 0,
            group_mask: 0xFFFF,
            shape: RigidBodyShape::Sphere,
            size: Vec3::ONE,
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            mass: 1.0,
            linear_damping: 0.5,
            angular_damping: 0.5,
            restitution: 0.0,
            friction: 0.5,
            mode: RigidBodyMode::Static,
        }
    }
}

/// 欧拉角按 Y-X-Z 顺序组合
fn euler_to_quat(rotation: Vec3) -> Quat {
    Quat::from_euler(EulerRot::YXZ, rotation.y, rotation.x, rotation.z)
}

impl RigidBody {
    /// 初始世界变换
    pub fn initial_transform(&self) -> Mat4 {
        Mat4::from_rotation_translation(euler_to_quat(self.rotation), self.position)
    }

    /// 刚体相对于骨骼的偏移矩阵
    pub fn offset_from_bone(&self, bone_origin: Vec3) -> Mat4 {
        Mat4::from_translation(-bone_origin) * self.initial_transform()
    }

    pub(crate) fn skip_pmx(reader: &mut ByteReader, bone_width: IndexWidth) -> Result<()> {
        reader.skip_text("rigid body name")?;
        reader.skip_text("rigid body english name")?;
        // group .. mode
        reader.skip(bone_width.bytes() + 1 + 2 + 1 + 36 + 20 + 1, "rigid body")
    }

    pub(crate) fn read_pmx(
        reader: &mut ByteReader,
        encoding: TextEncoding,
        bone_width: IndexWidth,
    ) -> Result<Self> {
        Ok(Self {
            name: reader.read_text(encoding, "rigid body name")?,
            english_name: reader.read_text(encoding, "rigid body english name")?,
            bone_index: reader.read_index(bone_width, "rigid body bone")?,
            group: reader.read_u8("rigid body group")?,
            group_mask: reader.read_u16("rigid body mask")?,
            shape: RigidBodyShape::from_byte(reader.read_u8("rigid body shape")?)?,
            size: reader.read_vec3("rigid body size")?,
            position: reader.read_vec3("rigid body position")?,
            rotation: reader.read_vec3("rigid body rotation")?,
            mass: reader.read_f32("rigid body mass")?,
            linear_damping: reader.read_f32("rigid body linear damping")?,
            angular_damping: reader.read_f32("rigid body angular damping")?,
            restitution: reader.read_f32("rigid body restitution")?,
            friction: reader.read_f32("rigid body friction")?,
            mode: RigidBodyMode::from_byte(reader.read_u8("rigid body mode")?)?,
        })
    }

    pub(crate) fn write_pmx(
        &self,
        writer: &mut ByteWriter,
        encoding: TextEncoding,
        bone_width: IndexWidth,
    ) -> Result<()> {
        writer.write_text(&self.name, encoding, "rigid body name")?;
        writer.write_text(&self.english_name, encoding, "rigid body english name")?;
        writer.write_index(bone_width, self.bone_index, "rigid body bone")?;
        writer.write_u8(self.group)?;
        writer.write_u16(self.group_mask)?;
        writer.write_u8(self.shape.to_byte())?;
        writer.write_vec3(self.size)?;
        writer.write_vec3(self.position)?;
        writer.write_vec3(self.rotation)?;
        writer.write_f32(self.mass)?;
        writer.write_f32(self.linear_damping)?;
        writer.write_f32(self.angular_damping)?;
        writer.write_f32(self.restitution)?;
        writer.write_f32(self.friction)?;
        writer.write_u8(self.mode.to_byte())
    }
}

/// 关节类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum JointKind {
    #[default]
    Spring6Dof,
    SixDof,
    PointToPoint,
    ConeTwist,
    Slider,
    Hinge,
}

impl JointKind {
    pub fn from_byte(value: u8) -> Result<Self> {
        match value {
            0 => Ok(JointKind::Spring6Dof),
            1 => Ok(JointKind::SixDof),
            2 => Ok(JointKind::PointToPoint),
            3 => Ok(JointKind::ConeTwist),
            4 => Ok(JointKind::Slider),
            5 => Ok(JointKind::Hinge),
            _ => Err(MmdError::Header(format!("unknown joint type {}", value))),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            JointKind::Spring6Dof => 0,
            JointKind::SixDof => 1,
            JointKind::PointToPoint => 2,
            JointKind::ConeTwist => 3,
            JointKind::Slider => 4,
            JointKind::Hinge => 5,
        }
    }
}

/// 关节（连接两个刚体）
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Joint {
    pub name: String,
    pub english_name: String,
    pub kind: JointKind,
    pub rigid_body_a_index: i32,
    pub rigid_body_b_index: i32,
    pub position: Vec3,
    pub rotation: Vec3,
    pub linear_lower: Vec3,
    pub linear_upper: Vec3,
    pub angular_lower: Vec3,
    pub angular_upper: Vec3,
    pub linear_spring: Vec3,
    pub angular_spring: Vec3,
}

impl Joint {
    /// 关节世界变换
    pub fn transform(&self) -> Mat4 {
        Mat4::from_rotation_translation(euler_to_quat(self.rotation), self.position)
    }

    pub(crate) fn skip_pmx(reader: &mut ByteReader, rigid_width: IndexWidth) -> Result<()> {
        reader.skip_text("joint name")?;
        reader.skip_text("joint english name")?;
        reader.skip(1 + rigid_width.bytes() * 2 + 12 * 8, "joint")
    }

    pub(crate) fn read_pmx(
        reader: &mut ByteReader,
        encoding: TextEncoding,
        rigid_width: IndexWidth,
    ) -> Result<Self> {
        Ok(Self {
            name: reader.read_text(encoding, "joint name")?,
            english_name: reader.read_text(encoding, "joint english name")?,
            kind: JointKind::from_byte(reader.read_u8("joint type")?)?,
            rigid_body_a_index: reader.read_index(rigid_width, "joint rigid body a")?,
            rigid_body_b_index: reader.read_index(rigid_width, "joint rigid body b")?,
            position: reader.read_vec3("joint position")?,
            rotation: reader.read_vec3("joint rotation")?,
            linear_lower: reader.read_vec3("joint linear lower")?,
            linear_upper: reader.read_vec3("joint linear upper")?,
            angular_lower: reader.read_vec3("joint angular lower")?,
            angular_upper: reader.read_vec3("joint angular upper")?,
            linear_spring: reader.read_vec3("joint linear spring")?,
            angular_spring: reader.read_vec3("joint angular spring")?,
        })
    }

    pub(crate) fn write_pmx(
        &self,
        writer: &mut ByteWriter,
        encoding: TextEncoding,
        rigid_width: IndexWidth,
    ) -> Result<()> {
        writer.write_text(&self.name, encoding, "joint name")?;
        writer.write_text(&self.english_name, encoding, "joint english name")?;
        writer.write_u8(self.kind.to_byte())?;
        writer.write_index(rigid_width, self.rigid_body_a_index, "joint rigid body a")?;
        writer.write_index(rigid_width, self.rigid_body_b_index, "joint rigid body b")?;
        for v in [
            self.position,
            self.rotation,
            self.linear_lower,
            self.linear_upper,
            self.angular_lower,
            self.angular_upper,
            self.linear_spring,
            self.angular_spring,
        ] {
            writer.write_vec3(v)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rigid_body_and_joint_roundtrip() {
        let body = RigidBody {
            name: "頭".to_string(),
            bone_index: 3,
            shape: RigidBodyShape::Capsule,
            mode: RigidBodyMode::DynamicWithBonePosition,
            position: Vec3::new(0.0, 15.0, 0.0),
            ..Default::default()
        };
        let joint = Joint {
            name: "首".to_string(),
            kind: JointKind::Hinge,
            rigid_body_a_index: 0,
            rigid_body_b_index: 1,
            angular_lower: Vec3::new(-0.5, 0.0, 0.0),
            ..Default::default()
        };

        let mut writer = ByteWriter::new();
        body.write_pmx(&mut writer, TextEncoding::Utf16Le, IndexWidth::Two).unwrap();
        joint.write_pmx(&mut writer, TextEncoding::Utf16Le, IndexWidth::One).unwrap();
        let bytes = writer.into_inner();

        let mut skipper = ByteReader::new(&bytes);
        RigidBody::skip_pmx(&mut skipper, IndexWidth::Two).unwrap();
        Joint::skip_pmx(&mut skipper, IndexWidth::One).unwrap();
        assert!(skipper.is_eof());

        let mut reader = ByteReader::new(&bytes);
        assert_eq!(
            RigidBody::read_pmx(&mut reader, TextEncoding::Utf16Le, IndexWidth::Two).unwrap(),
            body
        );
        assert_eq!(
            Joint::read_pmx(&mut reader, TextEncoding::Utf16Le, IndexWidth::One).unwrap(),
            joint
        );
    }

    #[test]
    fn test_offset_from_bone() {
        let body = RigidBody {
            position: Vec3::new(1.0, 5.0, 0.0),
            ..Default::default()
        };
        let offset = body.offset_from_bone(Vec3::new(1.0, 4.0, 0.0));
        let p = offset.transform_point3(Vec3::ZERO);
        assert!((p - Vec3::new(0.0, 1.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_unknown_shape() {
        assert!(RigidBodyShape::from_byte(3).is_err());
        assert!(JointKind::from_byte(6).is_err());
    }
}
