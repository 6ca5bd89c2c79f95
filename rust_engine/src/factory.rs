//! 格式识别与转换
//!
//! 按文件头签名选择模型/动作编解码器，并在 VMD 与 MVD 之间转换动作。

use crate::animation::{
    CameraChannel, Motion, MotionFormat, ProjectKeyframe, SelfShadowKeyframe,
    DEFAULT_INTERPOLATION,
};
use crate::model::{Model, ModelFormat};
use crate::{MmdError, Result};

/// 模型类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelType {
    Pmx,
    Pmd,
    /// 其他格式，交给外部资源导入管线
    Asset,
}

/// 动作类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionType {
    Vmd,
    Mvd,
    Unknown,
}

/// 识别模型类型
pub fn find_model_type(data: &[u8]) -> ModelType {
    if data.starts_with(b"PMX ") {
        ModelType::Pmx
    } else if data.starts_with(b"Pmd") {
        ModelType::Pmd
    } else {
        ModelType::Asset
    }
}

/// 识别动作类型，无法识别时返回 Unknown
pub fn find_motion_type(data: &[u8]) -> MotionType {
    match MotionFormat::sniff(data) {
        Some(MotionFormat::Vmd) => MotionType::Vmd,
        Some(MotionFormat::Mvd) => MotionType::Mvd,
        None => MotionType::Unknown,
    }
}

/// 创建并加载模型；失败时不返回部分构造的模型
pub fn create_model(data: &[u8]) -> Result<Model> {
    match find_model_type(data) {
        ModelType::Pmx | ModelType::Pmd => {
            let model = Model::load(data)?;
            log::info!(
                "模型加载完成: {} ({:?}, {} 个顶点, {} 个骨骼, {} 个 Morph)",
                model.info.name,
                model.format,
                model.vertices.len(),
                model.bones.len(),
                model.morphs.len()
            );
            Ok(model)
        }
        ModelType::Asset => Err(MmdError::Unsupported(
            "model is neither PMX nor PMD".to_string(),
        )),
    }
}

/// 创建并加载动作
pub fn create_motion(data: &[u8]) -> Result<Motion> {
    match find_motion_type(data) {
        MotionType::Vmd | MotionType::Mvd => Motion::load(data),
        MotionType::Unknown => Err(MmdError::Unsupported("unknown motion format".to_string())),
    }
}

/// 模型格式对应的类型
impl From<ModelFormat> for ModelType {
    fn from(format: ModelFormat) -> Self {
        match format {
            ModelFormat::Pmx => ModelType::Pmx,
            ModelFormat::Pmd => ModelType::Pmd,
        }
    }
}

/// 在 VMD 与 MVD 之间转换动作
///
/// - 相机注视点：MVD 只有一条曲线，转换为 MVD 时取 X 通道，转回 VMD 时复制到三轴
/// - VMD 自阴影 ↔ MVD 项目关键帧（重力取默认值）
/// - 模型关键帧中 VMD 无法表达的字段恢复默认
/// - 转为 VMD 时帧号超过 u32 范围返回 `ValueRange`
pub fn convert_motion(motion: &Motion, target: MotionFormat) -> Result<Motion> {
    if motion.format == target {
        return Ok(motion.clone());
    }
    if target == MotionFormat::Vmd && motion.duration() > u32::MAX as u64 {
        return Err(MmdError::ValueRange(format!(
            "frame {} exceeds the VMD frame range",
            motion.duration()
        )));
    }

    let mut converted = motion.clone();
    converted.format = target;
    converted.resize_curves(target.table_size());

    for keyframe in converted.camera_track.keyframes_mut() {
        let look_at = keyframe.interpolation_parameter(CameraChannel::LookAtX);
        keyframe.set_interpolation_parameter(CameraChannel::LookAtY, look_at);
        keyframe.set_interpolation_parameter(CameraChannel::LookAtZ, look_at);
    }
    for keyframe in converted.model_track.keyframes_mut() {
        keyframe.reset_extended_fields();
    }

    match target {
        MotionFormat::Mvd => {
            for track in converted.bone_tracks.values_mut() {
                for keyframe in track.keyframes_mut() {
                    keyframe.physics_enabled = true;
                }
            }
            for shadow in std::mem::take(&mut converted.self_shadow_track).keyframes() {
                let mut project = ProjectKeyframe::new(shadow.frame);
                project.shadow_mode = shadow.mode as i32;
                project.shadow_distance = shadow.distance;
                converted.insert_project_keyframe(project);
            }
        }
        MotionFormat::Vmd => {
            converted.target_model_name2.clear();
            converted.fps = Motion::DEFAULT_FPS;
            for track in converted.bone_tracks.values_mut() {
                for keyframe in track.keyframes_mut() {
                    keyframe.layer = 0;
                }
            }
            for track in converted.morph_tracks.values_mut() {
                for keyframe in track.keyframes_mut() {
                    keyframe.set_interpolation_parameter(DEFAULT_INTERPOLATION);
                }
            }
            for keyframe in converted.camera_track.keyframes_mut() {
                keyframe.layer = 0;
            }
            for project in std::mem::take(&mut converted.project_track).keyframes() {
                let mut shadow = SelfShadowKeyframe::new(project.frame);
                shadow.mode = u8::try_from(project.shadow_mode.max(0)).unwrap_or(u8::MAX);
                shadow.distance = project.shadow_distance;
                converted.insert_self_shadow_keyframe(shadow);
            }
        }
    }

    log::info!(
        "动作格式转换: {:?} -> {:?} ({} 个骨骼关键帧)",
        motion.format,
        target,
        converted.bone_keyframe_count()
    );
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{BoneChannel, BoneKeyframe, CameraKeyframe, MorphKeyframe};
    use crate::model::fixtures::sample_model;
    use glam::Vec3;

    fn vmd_motion() -> Motion {
        let mut motion = Motion::new(MotionFormat::Vmd);
        motion.target_model_name = "ミク".to_string();
        let size = motion.table_size();
        let mut bone = BoneKeyframe::new(10, size);
        bone.translation = Vec3::new(0.0, 1.0, 0.0);
        bone.physics_enabled = false;
        bone.set_interpolation_parameter(BoneChannel::Rotation, [10, 20, 30, 40]);
        motion.insert_bone_keyframe("センター", bone);
        motion.insert_morph_keyframe("あ", MorphKeyframe::new(5, 0.5, size));

        let mut camera = CameraKeyframe::new(0, size);
        camera.set_interpolation_parameter(CameraChannel::LookAtX, [1, 2, 3, 4]);
        camera.set_interpolation_parameter(CameraChannel::LookAtY, [5, 6, 7, 8]);
        motion.insert_camera_keyframe(camera);

        let mut shadow = SelfShadowKeyframe::new(20);
        shadow.mode = 2;
        shadow.distance = 0.03;
        motion.insert_self_shadow_keyframe(shadow);
        motion
    }

    #[test]
    fn test_sniffing() {
        assert_eq!(find_model_type(b"PMX \x00\x00\x00\x40"), ModelType::Pmx);
        assert_eq!(find_model_type(b"Pmd\x00\x00\x80\x3f"), ModelType::Pmd);
        assert_eq!(find_model_type(b"glTF"), ModelType::Asset);
        assert_eq!(find_motion_type(b"Vocaloid Motion Data 0002\0"), MotionType::Vmd);
        assert_eq!(find_motion_type(b"Vocaloid Motion Data file\0"), MotionType::Vmd);
        assert_eq!(find_motion_type(b"Motion Vector Data file\0"), MotionType::Mvd);
        assert_eq!(find_motion_type(b"RIFF"), MotionType::Unknown);
    }

    #[test]
    fn test_create_dispatch() {
        let model = sample_model();
        let bytes = model.save().unwrap();
        let loaded = create_model(&bytes).unwrap();
        assert_eq!(ModelType::from(loaded.format), find_model_type(&bytes));
        assert_eq!(loaded.bones.len(), model.bones.len());

        assert!(matches!(create_model(b"glTF...."), Err(MmdError::Unsupported(_))));
        assert!(matches!(create_motion(b"nothing"), Err(MmdError::Unsupported(_))));

        let motion = vmd_motion();
        let loaded = create_motion(&motion.save().unwrap()).unwrap();
        assert_eq!(loaded.format, MotionFormat::Vmd);
        assert_eq!(loaded.bone_keyframe_count(), 1);
    }

    #[test]
    fn test_vmd_to_mvd_and_back() {
        let vmd = vmd_motion();
        let mvd = convert_motion(&vmd, MotionFormat::Mvd).unwrap();
        assert_eq!(mvd.format, MotionFormat::Mvd);
        assert!(mvd.self_shadow_track.is_empty());
        let project = mvd.project_track.find(20).unwrap();
        assert_eq!(project.shadow_mode, 2);
        assert_eq!(project.shadow_distance, 0.03);

        // 注视点曲线合并为 X 通道
        let camera = mvd.camera_track.find(0).unwrap();
        assert_eq!(camera.interpolation_parameter(CameraChannel::LookAtY), [1, 2, 3, 4]);
        assert_eq!(camera.curve(CameraChannel::LookAtX).table_size(), MotionFormat::Mvd.table_size());

        // 经过 MVD 编解码后再转回
        let reloaded = Motion::load(&mvd.save().unwrap()).unwrap();
        let back = convert_motion(&reloaded, MotionFormat::Vmd).unwrap();
        let bone = back.bone_tracks["センター"].find(10).unwrap();
        assert_eq!(bone.translation, Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(bone.interpolation_parameter(BoneChannel::Rotation), [10, 20, 30, 40]);
        assert_eq!(back.find_morph_weight("あ", 5.0), Some(0.5));
        let shadow = back.self_shadow_track.find(20).unwrap();
        assert_eq!(shadow.mode, 2);
        assert!(back.project_track.is_empty());
        assert_eq!(back.target_model_name, "ミク");
    }

    #[test]
    fn test_large_frame_rejected_for_vmd() {
        let mut motion = Motion::new(MotionFormat::Mvd);
        motion.insert_morph_keyframe("あ", MorphKeyframe::new(u32::MAX as u64 + 1, 1.0, 128));
        assert!(matches!(
            convert_motion(&motion, MotionFormat::Vmd),
            Err(MmdError::ValueRange(_))
        ));
    }

    #[test]
    fn test_same_format_is_copy() {
        let motion = vmd_motion();
        assert_eq!(convert_motion(&motion, MotionFormat::Vmd).unwrap(), motion);
    }
}
