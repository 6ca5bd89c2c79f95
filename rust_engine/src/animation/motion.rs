//! Motion 核心数据结构
//!
//! 存储完整的动画数据：按名称索引的骨骼/Morph 轨道，以及相机、光源、
//! 阴影、模型、项目等全局轨道。

use std::collections::BTreeMap;
use std::path::Path;

use super::keyframe::{
    BoneFrameTransform, BoneKeyframe, CameraFrame, CameraKeyframe, Keyframe, LightKeyframe,
    ModelKeyframe, MorphKeyframe, ProjectKeyframe, SelfShadowKeyframe,
};
use super::motion_track::MotionTrack;
use super::{mvd_file, vmd_file, MotionFormat};
use crate::{MmdError, Result};

/// 动画数据
#[derive(Clone, Debug, PartialEq)]
pub struct Motion {
    pub format: MotionFormat,
    /// 目标模型名
    pub target_model_name: String,
    /// MVD 第二名称（英文名）
    pub target_model_name2: String,
    /// MVD 帧率，VMD 固定 30
    pub fps: f32,
    /// 骨骼动画轨道（骨骼名称 -> 轨道）
    pub bone_tracks: BTreeMap<String, MotionTrack<BoneKeyframe>>,
    /// Morph 动画轨道（Morph 名称 -> 轨道）
    pub morph_tracks: BTreeMap<String, MotionTrack<MorphKeyframe>>,
    pub camera_track: MotionTrack<CameraKeyframe>,
    pub light_track: MotionTrack<LightKeyframe>,
    pub self_shadow_track: MotionTrack<SelfShadowKeyframe>,
    pub model_track: MotionTrack<ModelKeyframe>,
    pub project_track: MotionTrack<ProjectKeyframe>,
}

impl Motion {
    /// 默认帧率
    pub const DEFAULT_FPS: f32 = 30.0;

    /// 创建空的 Motion
    pub fn new(format: MotionFormat) -> Self {
        Self {
            format,
            target_model_name: String::new(),
            target_model_name2: String::new(),
            fps: Self::DEFAULT_FPS,
            bone_tracks: BTreeMap::new(),
            morph_tracks: BTreeMap::new(),
            camera_track: MotionTrack::new(),
            light_track: MotionTrack::new(),
            self_shadow_track: MotionTrack::new(),
            model_track: MotionTrack::new(),
            project_track: MotionTrack::new(),
        }
    }

    /// 从字节解析（按签名选择 VMD/MVD）
    pub fn load(data: &[u8]) -> Result<Self> {
        match MotionFormat::sniff(data) {
            Some(MotionFormat::Vmd) => vmd_file::load(data),
            Some(MotionFormat::Mvd) => mvd_file::load(data),
            None => Err(MmdError::Signature("not a VMD/MVD motion".to_string())),
        }
    }

    /// 从文件加载
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        let motion = Self::load(&data)?;
        log::info!(
            "动作加载完成: {} ({} 个骨骼轨道, {} 个 Morph 轨道)",
            path.as_ref().display(),
            motion.bone_tracks.len(),
            motion.morph_tracks.len()
        );
        Ok(motion)
    }

    /// 按 `format` 序列化
    pub fn save(&self) -> Result<Vec<u8>> {
        match self.format {
            MotionFormat::Vmd => vmd_file::save(self),
            MotionFormat::Mvd => mvd_file::save(self),
        }
    }

    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let data = self.save()?;
        std::fs::write(path.as_ref(), data)?;
        Ok(())
    }

    /// 当前格式的插值表大小
    pub fn table_size(&self) -> usize {
        self.format.table_size()
    }

    // ========== 插入 ==========

    /// 插入骨骼关键帧
    pub fn insert_bone_keyframe(&mut self, name: &str, keyframe: BoneKeyframe) {
        let frame = keyframe.frame;
        let track = self.bone_tracks.entry(name.to_string()).or_default();
        if track.insert_keyframe(keyframe).is_some() {
            log::warn!("骨骼 {} 第 {} 帧存在重复关键帧，保留后者", name, frame);
        }
    }

    /// 插入 Morph 关键帧
    pub fn insert_morph_keyframe(&mut self, name: &str, keyframe: MorphKeyframe) {
        let frame = keyframe.frame;
        let track = self.morph_tracks.entry(name.to_string()).or_default();
        if track.insert_keyframe(keyframe).is_some() {
            log::warn!("Morph {} 第 {} 帧存在重复关键帧，保留后者", name, frame);
        }
    }

    /// 插入相机关键帧
    pub fn insert_camera_keyframe(&mut self, keyframe: CameraKeyframe) {
        insert_global(&mut self.camera_track, keyframe, "相机");
    }

    pub fn insert_light_keyframe(&mut self, keyframe: LightKeyframe) {
        insert_global(&mut self.light_track, keyframe, "光源");
    }

    pub fn insert_self_shadow_keyframe(&mut self, keyframe: SelfShadowKeyframe) {
        insert_global(&mut self.self_shadow_track, keyframe, "自阴影");
    }

    pub fn insert_model_keyframe(&mut self, keyframe: ModelKeyframe) {
        insert_global(&mut self.model_track, keyframe, "模型");
    }

    pub fn insert_project_keyframe(&mut self, keyframe: ProjectKeyframe) {
        insert_global(&mut self.project_track, keyframe, "项目");
    }

    // ========== 求值 ==========

    /// 获取骨骼帧变换，轨道不存在时返回 None
    pub fn find_bone_transform(&self, name: &str, frame: f32) -> Option<BoneFrameTransform> {
        self.bone_tracks.get(name).and_then(|track| track.seek(frame))
    }

    /// 获取 Morph 权重，轨道不存在时返回 None
    pub fn find_morph_weight(&self, name: &str, frame: f32) -> Option<f32> {
        self.morph_tracks.get(name).and_then(|track| track.seek(frame))
    }

    /// 获取相机状态
    pub fn find_camera(&self, frame: f32) -> Option<CameraFrame> {
        self.camera_track.seek(frame)
    }

    /// 获取光源颜色与方向
    pub fn find_light(&self, frame: f32) -> Option<(glam::Vec3, glam::Vec3)> {
        self.light_track.seek(frame)
    }

    /// 获取 IK 在指定帧的启用状态，没有记录时返回 None
    pub fn is_ik_enabled(&self, name: &str, frame: f32) -> Option<bool> {
        self.model_track
            .seek(frame)
            .and_then(|keyframe| keyframe.is_ik_enabled(name))
    }

    /// 获取模型是否可见
    pub fn is_visible(&self, frame: f32) -> Option<bool> {
        self.model_track.seek(frame).map(|keyframe| keyframe.visible)
    }

    // ========== 统计 ==========

    /// 获取动画持续时间（最大帧号）
    pub fn duration(&self) -> u64 {
        let bone_max = self.bone_tracks.values().map(|t| t.max_frame_index());
        let morph_max = self.morph_tracks.values().map(|t| t.max_frame_index());
        bone_max
            .chain(morph_max)
            .chain([
                self.camera_track.max_frame_index(),
                self.light_track.max_frame_index(),
                self.self_shadow_track.max_frame_index(),
                self.model_track.max_frame_index(),
                self.project_track.max_frame_index(),
            ])
            .max()
            .unwrap_or(0)
    }

    pub fn bone_keyframe_count(&self) -> usize {
        self.bone_tracks.values().map(|t| t.len()).sum()
    }

    pub fn morph_keyframe_count(&self) -> usize {
        self.morph_tracks.values().map(|t| t.len()).sum()
    }

    /// 是否包含相机数据
    pub fn has_camera_data(&self) -> bool {
        !self.camera_track.is_empty()
    }

    /// 以新的插值表大小重建所有曲线
    pub(crate) fn resize_curves(&mut self, table_size: usize) {
        for track in self.bone_tracks.values_mut() {
            track.keyframes_mut().for_each(|k| k.resize_curves(table_size));
        }
        for track in self.morph_tracks.values_mut() {
            track.keyframes_mut().for_each(|k| k.resize_curves(table_size));
        }
        self.camera_track
            .keyframes_mut()
            .for_each(|k| k.resize_curves(table_size));
    }
}

fn insert_global<K: Keyframe>(track: &mut MotionTrack<K>, keyframe: K, kind: &str) {
    let frame = keyframe.frame();
    if track.insert_keyframe(keyframe).is_some() {
        log::warn!("{}第 {} 帧存在重复关键帧，保留后者", kind, frame);
    }
}

impl Default for Motion {
    fn default() -> Self {
        Self::new(MotionFormat::Vmd)
    }
}
