//! 动画系统
//!
//! 提供 VMD/MVD 动作编解码、关键帧插值和 VPD 姿势文件解析。

mod bezier;
mod keyframe;
mod motion;
mod motion_track;
mod mvd_file;
mod vmd_file;
mod vpd_file;

pub use bezier::{build_table, InterpolationCurve, DEFAULT_INTERPOLATION};
pub use keyframe::{
    BoneChannel, BoneFrameTransform, BoneKeyframe, CameraChannel, CameraFrame, CameraKeyframe,
    IkState, Keyframe, LightKeyframe, ModelKeyframe, MorphKeyframe, ProjectKeyframe,
    SelfShadowKeyframe,
};
pub use motion::Motion;
pub use motion_track::MotionTrack;
pub use vpd_file::{Pose, PoseBone, PoseMorph, PoseStateError};

pub(crate) use mvd_file::SIGNATURE as MVD_SIGNATURE;
pub(crate) use vmd_file::{SIGNATURE as VMD_SIGNATURE, LEGACY_SIGNATURE as VMD_LEGACY_SIGNATURE};

use crate::config::get_config;

/// 动作文件格式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionFormat {
    Vmd,
    Mvd,
}

impl MotionFormat {
    /// 按签名识别格式
    pub fn sniff(data: &[u8]) -> Option<Self> {
        if data.starts_with(VMD_SIGNATURE) || data.starts_with(VMD_LEGACY_SIGNATURE) {
            Some(MotionFormat::Vmd)
        } else if data.starts_with(MVD_SIGNATURE) {
            Some(MotionFormat::Mvd)
        } else {
            None
        }
    }

    /// 插值查找表大小（加载时读取配置）
    pub fn table_size(self) -> usize {
        let config = get_config();
        match self {
            MotionFormat::Vmd => config.vmd_interpolation_table_size,
            MotionFormat::Mvd => config.mvd_interpolation_table_size,
        }
    }
}
