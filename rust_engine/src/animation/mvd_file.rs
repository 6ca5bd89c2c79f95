//! MVD 文件解析与写出
//!
//! 头部之后是带类型标签的段，每段声明记录大小、记录数和保留区大小，
//! 读取时跳过记录中未知的尾部字节。名称通过名称表的键引用。

use std::collections::{BTreeMap, HashMap};

use crate::codec::{ByteReader, ByteWriter, TextEncoding};
use crate::{MmdError, Result};

use super::keyframe::{
    BoneChannel, BoneKeyframe, CameraChannel, CameraKeyframe, IkState, LightKeyframe,
    ModelKeyframe, MorphKeyframe, ProjectKeyframe,
};
use super::{Motion, MotionFormat};

pub(crate) const SIGNATURE: &[u8] = b"Motion Vector Data file";

const SIGNATURE_SIZE: usize = 30;
const VERSION: f32 = 1.0;

const BONE_RECORD_SIZE: usize = 56;
const MORPH_RECORD_SIZE: usize = 16;
const CAMERA_RECORD_SIZE: usize = 57;
const LIGHT_RECORD_SIZE: usize = 32;
const MODEL_RECORD_BASE_SIZE: usize = 36;
const PROJECT_RECORD_SIZE: usize = 36;

/// 段类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SectionType {
    NameList = 0,
    Bone = 16,
    Morph = 32,
    Camera = 48,
    Light = 49,
    Model = 64,
    Project = 66,
    Eof = 255,
}

impl SectionType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(SectionType::NameList),
            16 => Some(SectionType::Bone),
            32 => Some(SectionType::Morph),
            48 => Some(SectionType::Camera),
            49 => Some(SectionType::Light),
            64 => Some(SectionType::Model),
            66 => Some(SectionType::Project),
            255 => Some(SectionType::Eof),
            _ => None,
        }
    }
}

/// 段头
#[derive(Clone, Copy, Debug)]
struct SectionHeader {
    key: i32,
    record_size: usize,
    count: usize,
    reserved_size: usize,
}

impl SectionHeader {
    fn read(reader: &mut ByteReader) -> Result<Self> {
        Ok(Self {
            key: reader.read_i32("section key")?,
            record_size: reader.read_count("section record size")?,
            count: reader.read_count("section record count")?,
            reserved_size: reader.read_count("section reserved size")?,
        })
    }

    /// 校验记录大小并确认剩余字节足够
    fn check(&self, reader: &ByteReader, min_record_size: usize, context: &'static str) -> Result<()> {
        if self.record_size < min_record_size {
            return Err(MmdError::Header(format!(
                "{}: record size {} is smaller than {}",
                context, self.record_size, min_record_size
            )));
        }
        match self.count.checked_mul(self.record_size) {
            Some(total) if total <= reader.remaining() => Ok(()),
            total => Err(MmdError::Size {
                context,
                offset: reader.offset(),
                requested: total.unwrap_or(usize::MAX),
                remaining: reader.remaining(),
            }),
        }
    }
}

/// 依次取出每条记录
fn next_record<'a>(
    reader: &mut ByteReader<'a>,
    header: &SectionHeader,
    context: &'static str,
) -> Result<ByteReader<'a>> {
    Ok(ByteReader::new(reader.read_bytes(header.record_size, context)?))
}

fn lookup_name(names: &HashMap<i32, String>, key: i32) -> Result<String> {
    names.get(&key).cloned().ok_or(MmdError::Index {
        kind: "mvd name key",
        index: key as i64,
        count: names.len(),
    })
}

// ========== 读取 ==========

/// 解析 MVD 字节
pub(crate) fn load(data: &[u8]) -> Result<Motion> {
    let mut reader = ByteReader::new(data);
    let signature = reader.read_bytes(SIGNATURE_SIZE, "mvd signature")?;
    if !signature.starts_with(SIGNATURE) {
        return Err(MmdError::Signature("missing MVD signature".to_string()));
    }
    let version = reader.read_f32("mvd version")?;
    if !(version > 0.0) {
        return Err(MmdError::Header(format!("invalid MVD version {}", version)));
    }
    let encoding = TextEncoding::from_pmx_byte(reader.read_u8("mvd encoding")?)?;

    let mut motion = Motion::new(MotionFormat::Mvd);
    let table_size = motion.table_size();
    motion.target_model_name = reader.read_text(encoding, "mvd model name")?;
    motion.target_model_name2 = reader.read_text(encoding, "mvd model name2")?;
    motion.fps = reader.read_f32("mvd fps")?;
    let reserved = reader.read_count("mvd reserved size")?;
    reader.skip(reserved, "mvd reserved")?;

    let mut names = HashMap::new();
    loop {
        let kind = reader.read_u8("section type")?;
        let minor = reader.read_u8("section minor type")?;
        let section = match SectionType::from_u8(kind) {
            Some(SectionType::Eof) => break,
            other => other,
        };

        let header = SectionHeader::read(&mut reader)?;
        let reserved = reader.read_bytes(header.reserved_size, "section reserved")?;
        match section {
            Some(SectionType::NameList) => {
                for _ in 0..header.count {
                    let key = reader.read_i32("name key")?;
                    let name = reader.read_text(encoding, "name")?;
                    names.insert(key, name);
                }
            }
            Some(SectionType::Bone) => {
                header.check(&reader, BONE_RECORD_SIZE, "bone records")?;
                let name = lookup_name(&names, header.key)?;
                for _ in 0..header.count {
                    let mut record = next_record(&mut reader, &header, "bone record")?;
                    let keyframe = read_bone(&mut record, table_size)?;
                    motion.insert_bone_keyframe(&name, keyframe);
                }
            }
            Some(SectionType::Morph) => {
                header.check(&reader, MORPH_RECORD_SIZE, "morph records")?;
                let name = lookup_name(&names, header.key)?;
                for _ in 0..header.count {
                    let mut record = next_record(&mut reader, &header, "morph record")?;
                    let mut keyframe = MorphKeyframe::new(
                        record.read_u64("morph frame")?,
                        record.read_f32("morph weight")?,
                        table_size,
                    );
                    keyframe.set_interpolation_parameter(record.read_array::<4>("morph interpolation")?);
                    motion.insert_morph_keyframe(&name, keyframe);
                }
            }
            Some(SectionType::Camera) => {
                header.check(&reader, CAMERA_RECORD_SIZE, "camera records")?;
                for _ in 0..header.count {
                    let mut record = next_record(&mut reader, &header, "camera record")?;
                    let mut keyframe = read_camera(&mut record, table_size)?;
                    keyframe.layer = header.key;
                    motion.insert_camera_keyframe(keyframe);
                }
            }
            Some(SectionType::Light) => {
                header.check(&reader, LIGHT_RECORD_SIZE, "light records")?;
                for _ in 0..header.count {
                    let mut record = next_record(&mut reader, &header, "light record")?;
                    let mut keyframe = LightKeyframe::new(record.read_u64("light frame")?);
                    keyframe.color = record.read_vec3("light color")?;
                    keyframe.direction = record.read_vec3("light direction")?;
                    motion.insert_light_keyframe(keyframe);
                }
            }
            Some(SectionType::Model) => {
                // 保留区：IK 数量 + IK 骨骼名称键
                let mut reserved = ByteReader::new(reserved);
                let ik_count = reserved.read_count("model ik count")?;
                let mut ik_names = Vec::with_capacity(ik_count.min(reserved.remaining() / 4));
                for _ in 0..ik_count {
                    ik_names.push(lookup_name(&names, reserved.read_i32("model ik key")?)?);
                }
                header.check(&reader, MODEL_RECORD_BASE_SIZE + ik_count, "model records")?;
                for _ in 0..header.count {
                    let mut record = next_record(&mut reader, &header, "model record")?;
                    motion.insert_model_keyframe(read_model(&mut record, &ik_names)?);
                }
            }
            Some(SectionType::Project) => {
                header.check(&reader, PROJECT_RECORD_SIZE, "project records")?;
                for _ in 0..header.count {
                    let mut record = next_record(&mut reader, &header, "project record")?;
                    let mut keyframe = ProjectKeyframe::new(record.read_u64("project frame")?);
                    keyframe.gravity = record.read_f32("project gravity")?;
                    keyframe.gravity_noise = record.read_i32("project gravity noise")?;
                    keyframe.gravity_direction = record.read_vec3("project gravity direction")?;
                    keyframe.shadow_mode = record.read_i32("project shadow mode")?;
                    keyframe.shadow_distance = record.read_f32("project shadow distance")?;
                    motion.insert_project_keyframe(keyframe);
                }
            }
            Some(SectionType::Eof) | None => {
                log::warn!("跳过未知 MVD 段: 类型 {} 子类型 {}", kind, minor);
                header.check(&reader, 0, "unknown section")?;
                reader.skip(header.count * header.record_size, "unknown section")?;
            }
        }
    }

    log::debug!(
        "MVD 解析完成: {} 个骨骼关键帧, {} 个 Morph 关键帧, {} 个名称",
        motion.bone_keyframe_count(),
        motion.morph_keyframe_count(),
        names.len()
    );
    Ok(motion)
}

fn read_bone(record: &mut ByteReader, table_size: usize) -> Result<BoneKeyframe> {
    let layer = record.read_i32("bone layer")?;
    let mut keyframe = BoneKeyframe::new(record.read_u64("bone frame")?, table_size);
    keyframe.layer = layer;
    keyframe.translation = record.read_vec3("bone translation")?;
    keyframe.rotation = record.read_quat("bone rotation")?;
    for channel in [
        BoneChannel::TranslationX,
        BoneChannel::TranslationY,
        BoneChannel::TranslationZ,
        BoneChannel::Rotation,
    ] {
        keyframe.set_interpolation_parameter(channel, record.read_array::<4>("bone interpolation")?);
    }
    Ok(keyframe)
}

fn read_camera(record: &mut ByteReader, table_size: usize) -> Result<CameraKeyframe> {
    let mut keyframe = CameraKeyframe::new(record.read_u64("camera frame")?, table_size);
    keyframe.distance = record.read_f32("camera distance")?;
    keyframe.look_at = record.read_vec3("camera look at")?;
    keyframe.angle = record.read_vec3("camera angle")?;
    keyframe.fov = record.read_f32("camera fov")?;
    keyframe.perspective = record.read_u8("camera perspective")? != 0;
    // 注视点三轴共用一条曲线
    let look_at = record.read_array::<4>("camera look at interpolation")?;
    for channel in [CameraChannel::LookAtX, CameraChannel::LookAtY, CameraChannel::LookAtZ] {
        keyframe.set_interpolation_parameter(channel, look_at);
    }
    for channel in [CameraChannel::Angle, CameraChannel::Fov, CameraChannel::Distance] {
        keyframe.set_interpolation_parameter(channel, record.read_array::<4>("camera interpolation")?);
    }
    Ok(keyframe)
}

fn read_model(record: &mut ByteReader, ik_names: &[String]) -> Result<ModelKeyframe> {
    let mut keyframe = ModelKeyframe::new(record.read_u64("model frame")?);
    keyframe.visible = record.read_u8("model visible")? != 0;
    keyframe.shadow_enabled = record.read_u8("model shadow")? != 0;
    keyframe.add_blend_enabled = record.read_u8("model add blend")? != 0;
    keyframe.physics_enabled = record.read_u8("model physics")? != 0;
    keyframe.physics_still_mode = record.read_u8("model physics still mode")?;
    record.skip(3, "model padding")?;
    keyframe.edge_width = record.read_f32("model edge width")?;
    keyframe.edge_color = record.read_vec4("model edge color")?;
    for name in ik_names {
        let enabled = record.read_u8("model ik enabled")? != 0;
        keyframe.ik_states.push(IkState {
            name: name.clone(),
            enabled,
        });
    }
    Ok(keyframe)
}

// ========== 写出 ==========

/// 名称表（按首次出现顺序分配键）
#[derive(Default)]
struct NameTable {
    names: Vec<String>,
    keys: HashMap<String, i32>,
}

impl NameTable {
    fn intern(&mut self, name: &str) -> Result<i32> {
        if let Some(&key) = self.keys.get(name) {
            return Ok(key);
        }
        let key = i32::try_from(self.names.len())
            .map_err(|_| MmdError::ValueRange("too many MVD names".to_string()))?;
        self.names.push(name.to_string());
        self.keys.insert(name.to_string(), key);
        Ok(key)
    }
}

fn write_section_header(
    writer: &mut ByteWriter,
    kind: SectionType,
    key: i32,
    record_size: usize,
    count: usize,
) -> Result<()> {
    writer.write_u8(kind as u8)?;
    writer.write_u8(0)?;
    writer.write_i32(key)?;
    writer.write_count(record_size, "section record size")?;
    writer.write_count(count, "section record count")?;
    Ok(())
}

/// 序列化为 MVD（UTF-16LE）
pub(crate) fn save(motion: &Motion) -> Result<Vec<u8>> {
    let encoding = TextEncoding::Utf16Le;
    let mut writer = ByteWriter::new();
    let mut signature = SIGNATURE.to_vec();
    signature.resize(SIGNATURE_SIZE, 0);
    writer.write_bytes(&signature);
    writer.write_f32(VERSION)?;
    writer.write_u8(encoding.to_pmx_byte()?)?;
    writer.write_text(&motion.target_model_name, encoding, "mvd model name")?;
    writer.write_text(&motion.target_model_name2, encoding, "mvd model name2")?;
    writer.write_f32(motion.fps)?;
    writer.write_count(0, "mvd reserved size")?;

    let mut names = NameTable::default();
    let bone_keys = motion
        .bone_tracks
        .keys()
        .map(|name| names.intern(name))
        .collect::<Result<Vec<_>>>()?;
    let morph_keys = motion
        .morph_tracks
        .keys()
        .map(|name| names.intern(name))
        .collect::<Result<Vec<_>>>()?;
    let mut ik_names: Vec<&str> = Vec::new();
    for keyframe in motion.model_track.keyframes() {
        for state in &keyframe.ik_states {
            if !ik_names.contains(&state.name.as_str()) {
                ik_names.push(&state.name);
            }
        }
    }
    let ik_keys = ik_names
        .iter()
        .map(|name| names.intern(name))
        .collect::<Result<Vec<_>>>()?;

    // 名称表
    write_section_header(&mut writer, SectionType::NameList, 0, 0, names.names.len())?;
    writer.write_count(0, "section reserved size")?;
    for (key, name) in names.names.iter().enumerate() {
        writer.write_i32(key as i32)?;
        writer.write_text(name, encoding, "name")?;
    }

    for (track, key) in motion.bone_tracks.values().zip(bone_keys) {
        write_section_header(&mut writer, SectionType::Bone, key, BONE_RECORD_SIZE, track.len())?;
        writer.write_count(0, "section reserved size")?;
        for keyframe in track.keyframes() {
            writer.write_i32(keyframe.layer)?;
            writer.write_u64(keyframe.frame)?;
            writer.write_vec3(keyframe.translation)?;
            writer.write_quat(keyframe.rotation)?;
            for channel in [
                BoneChannel::TranslationX,
                BoneChannel::TranslationY,
                BoneChannel::TranslationZ,
                BoneChannel::Rotation,
            ] {
                writer.write_bytes(&keyframe.interpolation_parameter(channel));
            }
        }
    }

    for (track, key) in motion.morph_tracks.values().zip(morph_keys) {
        write_section_header(&mut writer, SectionType::Morph, key, MORPH_RECORD_SIZE, track.len())?;
        writer.write_count(0, "section reserved size")?;
        for keyframe in track.keyframes() {
            writer.write_u64(keyframe.frame)?;
            writer.write_f32(keyframe.weight)?;
            writer.write_bytes(&keyframe.interpolation_parameter());
        }
    }

    // 相机按层分段
    let mut layers: BTreeMap<i32, Vec<&CameraKeyframe>> = BTreeMap::new();
    for keyframe in motion.camera_track.keyframes() {
        layers.entry(keyframe.layer).or_default().push(keyframe);
    }
    for (layer, keyframes) in layers {
        write_section_header(&mut writer, SectionType::Camera, layer, CAMERA_RECORD_SIZE, keyframes.len())?;
        writer.write_count(0, "section reserved size")?;
        for keyframe in keyframes {
            writer.write_u64(keyframe.frame)?;
            writer.write_f32(keyframe.distance)?;
            writer.write_vec3(keyframe.look_at)?;
            writer.write_vec3(keyframe.angle)?;
            writer.write_f32(keyframe.fov)?;
            writer.write_u8(u8::from(keyframe.perspective))?;
            for channel in [
                CameraChannel::LookAtX,
                CameraChannel::Angle,
                CameraChannel::Fov,
                CameraChannel::Distance,
            ] {
                writer.write_bytes(&keyframe.interpolation_parameter(channel));
            }
        }
    }

    if !motion.light_track.is_empty() {
        write_section_header(&mut writer, SectionType::Light, 0, LIGHT_RECORD_SIZE, motion.light_track.len())?;
        writer.write_count(0, "section reserved size")?;
        for keyframe in motion.light_track.keyframes() {
            writer.write_u64(keyframe.frame)?;
            writer.write_vec3(keyframe.color)?;
            writer.write_vec3(keyframe.direction)?;
        }
    }

    if !motion.model_track.is_empty() {
        let record_size = MODEL_RECORD_BASE_SIZE + ik_keys.len();
        write_section_header(&mut writer, SectionType::Model, 0, record_size, motion.model_track.len())?;
        writer.write_count(4 + 4 * ik_keys.len(), "section reserved size")?;
        writer.write_count(ik_keys.len(), "model ik count")?;
        for key in &ik_keys {
            writer.write_i32(*key)?;
        }
        for keyframe in motion.model_track.keyframes() {
            writer.write_u64(keyframe.frame)?;
            writer.write_u8(u8::from(keyframe.visible))?;
            writer.write_u8(u8::from(keyframe.shadow_enabled))?;
            writer.write_u8(u8::from(keyframe.add_blend_enabled))?;
            writer.write_u8(u8::from(keyframe.physics_enabled))?;
            writer.write_u8(keyframe.physics_still_mode)?;
            writer.write_zeros(3);
            writer.write_f32(keyframe.edge_width)?;
            writer.write_vec4(keyframe.edge_color)?;
            for name in &ik_names {
                // 该关键帧未记录的 IK 视为启用
                let enabled = keyframe.is_ik_enabled(name).unwrap_or(true);
                writer.write_u8(u8::from(enabled))?;
            }
        }
    }

    if !motion.project_track.is_empty() {
        write_section_header(&mut writer, SectionType::Project, 0, PROJECT_RECORD_SIZE, motion.project_track.len())?;
        writer.write_count(0, "section reserved size")?;
        for keyframe in motion.project_track.keyframes() {
            writer.write_u64(keyframe.frame)?;
            writer.write_f32(keyframe.gravity)?;
            writer.write_i32(keyframe.gravity_noise)?;
            writer.write_vec3(keyframe.gravity_direction)?;
            writer.write_i32(keyframe.shadow_mode)?;
            writer.write_f32(keyframe.shadow_distance)?;
        }
    }

    writer.write_u8(SectionType::Eof as u8)?;
    writer.write_u8(0)?;
    Ok(writer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3, Vec4};

    fn sample_motion() -> Motion {
        let mut motion = Motion::new(MotionFormat::Mvd);
        motion.target_model_name = "初音ミク".to_string();
        motion.target_model_name2 = "Miku".to_string();
        motion.fps = 60.0;
        let size = motion.table_size();

        let mut bone = BoneKeyframe::new(u32::MAX as u64 + 10, size);
        bone.layer = 2;
        bone.translation = Vec3::new(1.0, -2.0, 3.5);
        bone.rotation = Quat::from_rotation_z(0.25);
        bone.set_interpolation_parameter(BoneChannel::Rotation, [0, 127, 127, 0]);
        motion.insert_bone_keyframe("センター", bone);

        let mut morph = MorphKeyframe::new(12, 0.5, size);
        morph.set_interpolation_parameter([30, 10, 90, 120]);
        motion.insert_morph_keyframe("あ", morph);

        let mut camera = CameraKeyframe::new(1, size);
        camera.layer = 1;
        camera.fov = 27.5;
        camera.set_interpolation_parameter(CameraChannel::Fov, [1, 2, 3, 4]);
        motion.insert_camera_keyframe(camera);

        motion.insert_light_keyframe(LightKeyframe::new(2));

        let mut model = ModelKeyframe::new(3);
        model.edge_width = 1.5;
        model.edge_color = Vec4::new(1.0, 0.0, 0.0, 1.0);
        model.physics_still_mode = 2;
        model.ik_states.push(IkState {
            name: "左足ＩＫ".to_string(),
            enabled: false,
        });
        motion.insert_model_keyframe(model);

        let mut project = ProjectKeyframe::new(4);
        project.gravity = 20.0;
        project.shadow_mode = 2;
        motion.insert_project_keyframe(project);
        motion
    }

    #[test]
    fn test_every_kind_roundtrips() {
        let motion = sample_motion();
        let bytes = save(&motion).unwrap();
        let loaded = load(&bytes).unwrap();
        assert_eq!(loaded, motion);
        assert_eq!(save(&loaded).unwrap(), bytes);
        assert_eq!(loaded.bone_tracks["センター"].max_frame_index(), u32::MAX as u64 + 10);
    }

    #[test]
    fn test_truncation_fails_cleanly() {
        let bytes = save(&sample_motion()).unwrap();
        for end in 0..bytes.len() {
            assert!(load(&bytes[..end]).is_err(), "truncated at {}", end);
        }
    }

    #[test]
    fn test_extra_record_bytes_skipped() {
        let mut writer = ByteWriter::new();
        let mut signature = SIGNATURE.to_vec();
        signature.resize(SIGNATURE_SIZE, 0);
        writer.write_bytes(&signature);
        writer.write_f32(VERSION).unwrap();
        writer.write_u8(1).unwrap();
        writer.write_text("m", TextEncoding::Utf8, "name").unwrap();
        writer.write_text("", TextEncoding::Utf8, "name2").unwrap();
        writer.write_f32(30.0).unwrap();
        writer.write_count(0, "reserved").unwrap();

        write_section_header(&mut writer, SectionType::NameList, 0, 0, 1).unwrap();
        writer.write_count(0, "reserved").unwrap();
        writer.write_i32(7).unwrap();
        writer.write_text("まばたき", TextEncoding::Utf8, "name").unwrap();

        // 记录比已知格式多 4 字节，保留区 2 字节
        write_section_header(&mut writer, SectionType::Morph, 7, MORPH_RECORD_SIZE + 4, 1).unwrap();
        writer.write_count(2, "reserved").unwrap();
        writer.write_zeros(2);
        writer.write_u64(9).unwrap();
        writer.write_f32(0.25).unwrap();
        writer.write_bytes(&[20, 20, 107, 107]);
        writer.write_bytes(&[0xAA; 4]);

        // 未知段整体跳过
        write_section_header(&mut writer, SectionType::Eof, 0, 0, 0).unwrap();
        writer.write_count(0, "reserved").unwrap();
        let bytes = writer.into_inner();
        // 把最后一个段头改成未知类型，再补上真正的结束标记
        let mut bytes = bytes;
        let unknown_at = bytes.len() - 18;
        bytes[unknown_at] = 200;
        bytes.extend_from_slice(&[SectionType::Eof as u8, 0]);

        let motion = load(&bytes).unwrap();
        assert_eq!(motion.target_model_name, "m");
        assert_eq!(motion.find_morph_weight("まばたき", 9.0), Some(0.25));
    }

    #[test]
    fn test_unknown_name_key_rejected() {
        let mut motion = Motion::new(MotionFormat::Mvd);
        motion.insert_morph_keyframe("あ", MorphKeyframe::new(0, 1.0, 128));
        let mut bytes = save(&motion).unwrap();
        // 段头 18 字节，键位于类型字节之后
        let header_at = bytes.len() - 2 - MORPH_RECORD_SIZE - 18;
        bytes[header_at + 2..header_at + 6].copy_from_slice(&5i32.to_le_bytes());
        assert!(matches!(
            load(&bytes),
            Err(MmdError::Index { kind: "mvd name key", index: 5, .. })
        ));
    }

    #[test]
    fn test_short_record_size_rejected() {
        let mut motion = Motion::new(MotionFormat::Mvd);
        motion.insert_light_keyframe(LightKeyframe::new(0));
        let mut bytes = save(&motion).unwrap();
        let header_at = bytes.len() - 2 - LIGHT_RECORD_SIZE - 18;
        bytes[header_at + 6..header_at + 10].copy_from_slice(&8i32.to_le_bytes());
        assert!(matches!(load(&bytes), Err(MmdError::Header(_))));
    }
}
