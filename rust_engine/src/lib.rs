//! MMD Core - MMD 模型/动作编解码与骨骼运行时
//!
//! 提供以下功能：
//! - PMX/PMD 模型二进制编解码（含索引校验与链接）
//! - VMD/MVD 动作编解码、插值曲线与格式转换
//! - VPD 姿势文件解析
//! - 骨骼系统和 IK 求解
//! - Morph 变形系统
//! - 顶点蒙皮计算

pub mod animation;
pub mod codec;
pub mod config;
pub mod factory;
pub mod model;
pub mod morph;
pub mod skeleton;
pub mod skinning;

pub use animation::{Motion, MotionFormat, Pose, PoseStateError};
pub use config::{get_config, set_config, reset_config, EngineConfig};
pub use factory::{
    convert_motion, create_model, create_motion, find_model_type, find_motion_type, ModelType,
    MotionType,
};
pub use model::{MmdModel, Model, ModelFormat};
pub use morph::{Morph, MorphManager};
pub use skeleton::{Bone, BoneManager, IkSolver};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MmdError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid signature: {0}")]
    Signature(String),

    #[error("Header error: {0}")]
    Header(String),

    #[error("Size error: {context} needs {requested} bytes at offset {offset}, {remaining} remaining")]
    Size {
        context: &'static str,
        offset: usize,
        requested: usize,
        remaining: usize,
    },

    #[error("Index error: {kind} index {index} out of range (count {count})")]
    Index {
        kind: &'static str,
        index: i64,
        count: usize,
    },

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Pose parse error: {0}")]
    PoseState(#[from] PoseStateError),

    #[error("Cyclic {kind} reference at bone {index}")]
    Cycle { kind: &'static str, index: usize },

    #[error("Value out of range: {0}")]
    ValueRange(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, MmdError>;
