//! VMD 文件解析与写出
//!
//! 固定长度记录流：骨骼、Morph、相机、光源、自阴影、模型/IK。
//! 骨骼段之后的各段可以在段边界处缺省（旧版本文件）。

use crate::codec::{ByteReader, ByteWriter, TextEncoding};
use crate::{MmdError, Result};

use super::keyframe::{
    BoneChannel, BoneKeyframe, CameraChannel, CameraKeyframe, IkState, LightKeyframe,
    ModelKeyframe, MorphKeyframe, SelfShadowKeyframe,
};
use super::{Motion, MotionFormat};

pub(crate) const SIGNATURE: &[u8] = b"Vocaloid Motion Data 0002";
pub(crate) const LEGACY_SIGNATURE: &[u8] = b"Vocaloid Motion Data file";

const SIGNATURE_SIZE: usize = 30;
const MODEL_NAME_SIZE: usize = 20;
const LEGACY_MODEL_NAME_SIZE: usize = 10;
const NAME_SIZE: usize = 15;
const IK_NAME_SIZE: usize = 20;

const BONE_RECORD_SIZE: usize = 111;
const MORPH_RECORD_SIZE: usize = 23;
const CAMERA_RECORD_SIZE: usize = 61;
const LIGHT_RECORD_SIZE: usize = 28;
const SELF_SHADOW_RECORD_SIZE: usize = 9;
const IK_STATE_SIZE: usize = IK_NAME_SIZE + 1;

/// 插值表中表示「物理关闭」的标记字节（位于第 2、3 字节）
const PHYSICS_OFF_MARKER: [u8; 2] = [99, 15];

/// 相机插值通道在文件中的顺序
const CAMERA_CHANNELS: [CameraChannel; 6] = [
    CameraChannel::LookAtX,
    CameraChannel::LookAtY,
    CameraChannel::LookAtZ,
    CameraChannel::Angle,
    CameraChannel::Distance,
    CameraChannel::Fov,
];

/// 确认剩余字节足够容纳 `count` 条记录
fn ensure_records(
    reader: &ByteReader,
    count: usize,
    record_size: usize,
    context: &'static str,
) -> Result<()> {
    match count.checked_mul(record_size) {
        Some(total) if total <= reader.remaining() => Ok(()),
        total => Err(MmdError::Size {
            context,
            offset: reader.offset(),
            requested: total.unwrap_or(usize::MAX),
            remaining: reader.remaining(),
        }),
    }
}

/// 读取段的记录数；文件在段边界结束时返回 None
fn read_section_count(reader: &mut ByteReader, context: &'static str) -> Result<Option<usize>> {
    if reader.is_eof() {
        return Ok(None);
    }
    Ok(Some(reader.read_u32(context)? as usize))
}

fn frame_to_u32(frame: u64, context: &str) -> Result<u32> {
    u32::try_from(frame).map_err(|_| {
        MmdError::ValueRange(format!("{}: frame {} exceeds the VMD frame range", context, frame))
    })
}

fn count_to_u32(count: usize, context: &str) -> Result<u32> {
    u32::try_from(count)
        .map_err(|_| MmdError::ValueRange(format!("{}: count {} exceeds u32", context, count)))
}

// ========== 插值表 ==========

/// 64 字节骨骼插值表：第 0 行为
/// `X.x1 Y.x1 Z.x1 R.x1 X.y1 Y.y1 Z.y1 R.y1 X.x2 .. R.y2`，
/// 第 k 行为第 0 行左移 k 字节，末尾补 0
fn encode_bone_interpolation(keyframe: &BoneKeyframe) -> [u8; 64] {
    let channels = [
        keyframe.interpolation_parameter(BoneChannel::TranslationX),
        keyframe.interpolation_parameter(BoneChannel::TranslationY),
        keyframe.interpolation_parameter(BoneChannel::TranslationZ),
        keyframe.interpolation_parameter(BoneChannel::Rotation),
    ];
    let mut row = [0u8; 16];
    for (channel, params) in channels.iter().enumerate() {
        for (point, value) in params.iter().enumerate() {
            row[point * 4 + channel] = *value;
        }
    }

    let mut table = [0u8; 64];
    for k in 0..4 {
        for j in 0..16 - k {
            table[k * 16 + j] = row[j + k];
        }
    }
    if !keyframe.physics_enabled {
        table[2..4].copy_from_slice(&PHYSICS_OFF_MARKER);
    }
    table
}

/// 解码骨骼插值表。Z 与 R 从第 1、2 行读取，不受物理标记影响
fn decode_bone_interpolation(table: &[u8; 64]) -> ([[u8; 4]; 4], bool) {
    let pick = |base: usize| [table[base], table[base + 4], table[base + 8], table[base + 12]];
    let params = [pick(0), pick(1), pick(17), pick(33)];
    let physics_enabled = table[2..4] != PHYSICS_OFF_MARKER;
    (params, physics_enabled)
}

// ========== 读取 ==========

/// 解析 VMD 字节
pub(crate) fn load(data: &[u8]) -> Result<Motion> {
    let mut reader = ByteReader::new(data);
    let signature = reader.read_bytes(SIGNATURE_SIZE, "vmd signature")?;
    let name_size = if signature.starts_with(SIGNATURE) {
        MODEL_NAME_SIZE
    } else if signature.starts_with(LEGACY_SIGNATURE) {
        LEGACY_MODEL_NAME_SIZE
    } else {
        return Err(MmdError::Signature("missing VMD signature".to_string()));
    };

    let mut motion = Motion::new(MotionFormat::Vmd);
    let table_size = motion.table_size();
    motion.target_model_name =
        reader.read_fixed_text(name_size, TextEncoding::ShiftJis, "vmd model name")?;

    // 骨骼段必需
    let count = reader.read_u32("bone keyframe count")? as usize;
    ensure_records(&reader, count, BONE_RECORD_SIZE, "bone keyframes")?;
    for _ in 0..count {
        let name = reader.read_fixed_text(NAME_SIZE, TextEncoding::ShiftJis, "bone name")?;
        let mut keyframe = BoneKeyframe::new(reader.read_u32("bone frame")? as u64, table_size);
        keyframe.translation = reader.read_vec3("bone translation")?;
        keyframe.rotation = reader.read_quat("bone rotation")?;
        let table = reader.read_array::<64>("bone interpolation")?;
        let (params, physics_enabled) = decode_bone_interpolation(&table);
        keyframe.set_interpolation_parameter(BoneChannel::TranslationX, params[0]);
        keyframe.set_interpolation_parameter(BoneChannel::TranslationY, params[1]);
        keyframe.set_interpolation_parameter(BoneChannel::TranslationZ, params[2]);
        keyframe.set_interpolation_parameter(BoneChannel::Rotation, params[3]);
        keyframe.physics_enabled = physics_enabled;
        motion.insert_bone_keyframe(&name, keyframe);
    }

    if let Some(count) = read_section_count(&mut reader, "morph keyframe count")? {
        ensure_records(&reader, count, MORPH_RECORD_SIZE, "morph keyframes")?;
        for _ in 0..count {
            let name = reader.read_fixed_text(NAME_SIZE, TextEncoding::ShiftJis, "morph name")?;
            let frame = reader.read_u32("morph frame")? as u64;
            let weight = reader.read_f32("morph weight")?;
            motion.insert_morph_keyframe(&name, MorphKeyframe::new(frame, weight, table_size));
        }
    } else {
        return Ok(finish(motion));
    }

    if let Some(count) = read_section_count(&mut reader, "camera keyframe count")? {
        ensure_records(&reader, count, CAMERA_RECORD_SIZE, "camera keyframes")?;
        for _ in 0..count {
            motion.insert_camera_keyframe(read_camera(&mut reader, table_size)?);
        }
    } else {
        return Ok(finish(motion));
    }

    if let Some(count) = read_section_count(&mut reader, "light keyframe count")? {
        ensure_records(&reader, count, LIGHT_RECORD_SIZE, "light keyframes")?;
        for _ in 0..count {
            let mut keyframe = LightKeyframe::new(reader.read_u32("light frame")? as u64);
            keyframe.color = reader.read_vec3("light color")?;
            keyframe.direction = reader.read_vec3("light direction")?;
            motion.insert_light_keyframe(keyframe);
        }
    } else {
        return Ok(finish(motion));
    }

    if let Some(count) = read_section_count(&mut reader, "self shadow keyframe count")? {
        ensure_records(&reader, count, SELF_SHADOW_RECORD_SIZE, "self shadow keyframes")?;
        for _ in 0..count {
            let mut keyframe = SelfShadowKeyframe::new(reader.read_u32("self shadow frame")? as u64);
            keyframe.mode = reader.read_u8("self shadow mode")?;
            keyframe.distance = reader.read_f32("self shadow distance")?;
            motion.insert_self_shadow_keyframe(keyframe);
        }
    } else {
        return Ok(finish(motion));
    }

    if let Some(count) = read_section_count(&mut reader, "model keyframe count")? {
        // 变长记录，至少 9 字节
        ensure_records(&reader, count, 9, "model keyframes")?;
        for _ in 0..count {
            let mut keyframe = ModelKeyframe::new(reader.read_u32("model frame")? as u64);
            keyframe.visible = reader.read_u8("model visible")? != 0;
            let ik_count = reader.read_u32("ik state count")? as usize;
            ensure_records(&reader, ik_count, IK_STATE_SIZE, "ik states")?;
            keyframe.ik_states.reserve(ik_count);
            for _ in 0..ik_count {
                let name = reader.read_fixed_text(IK_NAME_SIZE, TextEncoding::ShiftJis, "ik name")?;
                let enabled = reader.read_u8("ik enabled")? != 0;
                keyframe.ik_states.push(IkState { name, enabled });
            }
            motion.insert_model_keyframe(keyframe);
        }
    }

    if !reader.is_eof() {
        log::debug!("VMD 末尾有 {} 字节未识别数据", reader.remaining());
    }
    Ok(finish(motion))
}

fn read_camera(reader: &mut ByteReader, table_size: usize) -> Result<CameraKeyframe> {
    let mut keyframe = CameraKeyframe::new(reader.read_u32("camera frame")? as u64, table_size);
    keyframe.distance = reader.read_f32("camera distance")?;
    keyframe.look_at = reader.read_vec3("camera look at")?;
    keyframe.angle = reader.read_vec3("camera angle")?;
    // 每通道按 x1 x2 y1 y2 排列
    let table = reader.read_array::<24>("camera interpolation")?;
    for (i, channel) in CAMERA_CHANNELS.iter().enumerate() {
        let b = &table[i * 4..i * 4 + 4];
        keyframe.set_interpolation_parameter(*channel, [b[0], b[2], b[1], b[3]]);
    }
    keyframe.fov = reader.read_u32("camera fov")? as f32;
    // 0 表示透视开启
    keyframe.perspective = reader.read_u8("camera perspective")? == 0;
    Ok(keyframe)
}

fn finish(motion: Motion) -> Motion {
    log::debug!(
        "VMD 解析完成: {} 个骨骼关键帧, {} 个 Morph 关键帧, {} 个相机关键帧",
        motion.bone_keyframe_count(),
        motion.morph_keyframe_count(),
        motion.camera_track.len()
    );
    motion
}

// ========== 写出 ==========

/// 序列化为 VMD（总是写出新版签名和全部段）
pub(crate) fn save(motion: &Motion) -> Result<Vec<u8>> {
    let mut writer = ByteWriter::new();
    let mut signature = SIGNATURE.to_vec();
    signature.resize(SIGNATURE_SIZE, 0);
    writer.write_bytes(&signature);
    writer.write_fixed_text(&motion.target_model_name, MODEL_NAME_SIZE, TextEncoding::ShiftJis)?;

    writer.write_u32(count_to_u32(motion.bone_keyframe_count(), "bone keyframes")?)?;
    for (name, track) in &motion.bone_tracks {
        for keyframe in track.keyframes() {
            writer.write_fixed_text(name, NAME_SIZE, TextEncoding::ShiftJis)?;
            writer.write_u32(frame_to_u32(keyframe.frame, "bone keyframe")?)?;
            writer.write_vec3(keyframe.translation)?;
            writer.write_quat(keyframe.rotation)?;
            writer.write_bytes(&encode_bone_interpolation(keyframe));
        }
    }

    writer.write_u32(count_to_u32(motion.morph_keyframe_count(), "morph keyframes")?)?;
    for (name, track) in &motion.morph_tracks {
        for keyframe in track.keyframes() {
            writer.write_fixed_text(name, NAME_SIZE, TextEncoding::ShiftJis)?;
            writer.write_u32(frame_to_u32(keyframe.frame, "morph keyframe")?)?;
            writer.write_f32(keyframe.weight)?;
        }
    }

    writer.write_u32(count_to_u32(motion.camera_track.len(), "camera keyframes")?)?;
    for keyframe in motion.camera_track.keyframes() {
        writer.write_u32(frame_to_u32(keyframe.frame, "camera keyframe")?)?;
        writer.write_f32(keyframe.distance)?;
        writer.write_vec3(keyframe.look_at)?;
        writer.write_vec3(keyframe.angle)?;
        for channel in CAMERA_CHANNELS {
            let [x1, y1, x2, y2] = keyframe.interpolation_parameter(channel);
            writer.write_bytes(&[x1, x2, y1, y2]);
        }
        writer.write_u32(keyframe.fov.max(0.0).round() as u32)?;
        writer.write_u8(u8::from(!keyframe.perspective))?;
    }

    writer.write_u32(count_to_u32(motion.light_track.len(), "light keyframes")?)?;
    for keyframe in motion.light_track.keyframes() {
        writer.write_u32(frame_to_u32(keyframe.frame, "light keyframe")?)?;
        writer.write_vec3(keyframe.color)?;
        writer.write_vec3(keyframe.direction)?;
    }

    writer.write_u32(count_to_u32(motion.self_shadow_track.len(), "self shadow keyframes")?)?;
    for keyframe in motion.self_shadow_track.keyframes() {
        writer.write_u32(frame_to_u32(keyframe.frame, "self shadow keyframe")?)?;
        writer.write_u8(keyframe.mode)?;
        writer.write_f32(keyframe.distance)?;
    }

    writer.write_u32(count_to_u32(motion.model_track.len(), "model keyframes")?)?;
    for keyframe in motion.model_track.keyframes() {
        writer.write_u32(frame_to_u32(keyframe.frame, "model keyframe")?)?;
        writer.write_u8(u8::from(keyframe.visible))?;
        writer.write_u32(count_to_u32(keyframe.ik_states.len(), "ik states")?)?;
        for state in &keyframe.ik_states {
            writer.write_fixed_text(&state.name, IK_NAME_SIZE, TextEncoding::ShiftJis)?;
            writer.write_u8(u8::from(state.enabled))?;
        }
    }

    Ok(writer.into_inner())
}
