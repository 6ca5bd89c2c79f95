//! 动画关键帧
//!
//! VMD 与 MVD 共用同一组关键帧类型；只存在于一种格式的字段在另一种格式
//! 写出时被忽略或取默认值。

use glam::{Quat, Vec3, Vec4};

use super::bezier::InterpolationCurve;

/// 关键帧公共接口
pub trait Keyframe: Clone {
    /// 求值结果
    type Value;

    fn frame(&self) -> u64;

    /// 关键帧自身的值
    fn value(&self) -> Self::Value;

    /// 从 `self` 过渡到 `next`，`t` 为线性时间比例；
    /// 曲线取 `next` 的插值参数。默认为阶跃
    fn interpolate(&self, _next: &Self, _t: f32) -> Self::Value {
        self.value()
    }

    /// 以新的查找表大小重建插值曲线
    fn resize_curves(&mut self, _table_size: usize) {}
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

// ========== 骨骼 ==========

/// 骨骼插值通道
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoneChannel {
    TranslationX = 0,
    TranslationY = 1,
    TranslationZ = 2,
    Rotation = 3,
}

/// 骨骼帧求值结果
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoneFrameTransform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub physics_enabled: bool,
}

/// 骨骼关键帧
#[derive(Clone, Debug, PartialEq)]
pub struct BoneKeyframe {
    pub frame: u64,
    pub translation: Vec3,
    pub rotation: Quat,
    /// MVD 层索引
    pub layer: i32,
    /// VMD 插值表中的物理开关
    pub physics_enabled: bool,
    curves: [InterpolationCurve; 4],
}

impl BoneKeyframe {
    pub fn new(frame: u64, table_size: usize) -> Self {
        Self {
            frame,
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            layer: 0,
            physics_enabled: true,
            curves: std::array::from_fn(|_| InterpolationCurve::linear(table_size)),
        }
    }

    pub fn set_interpolation_parameter(&mut self, channel: BoneChannel, params: [u8; 4]) {
        self.curves[channel as usize].set_params(params);
    }

    pub fn interpolation_parameter(&self, channel: BoneChannel) -> [u8; 4] {
        self.curves[channel as usize].params()
    }

    pub fn curve(&self, channel: BoneChannel) -> &InterpolationCurve {
        &self.curves[channel as usize]
    }
}

impl Keyframe for BoneKeyframe {
    type Value = BoneFrameTransform;

    fn frame(&self) -> u64 {
        self.frame
    }

    fn value(&self) -> BoneFrameTransform {
        BoneFrameTransform {
            translation: self.translation,
            rotation: self.rotation,
            physics_enabled: self.physics_enabled,
        }
    }

    fn interpolate(&self, next: &Self, t: f32) -> BoneFrameTransform {
        let amounts = Vec3::new(
            next.curve(BoneChannel::TranslationX).evaluate(t),
            next.curve(BoneChannel::TranslationY).evaluate(t),
            next.curve(BoneChannel::TranslationZ).evaluate(t),
        );
        let translation = self.translation + (next.translation - self.translation) * amounts;
        let amount = next.curve(BoneChannel::Rotation).evaluate(t);
        BoneFrameTransform {
            translation,
            rotation: self.rotation.slerp(next.rotation, amount),
            physics_enabled: self.physics_enabled && next.physics_enabled,
        }
    }

    fn resize_curves(&mut self, table_size: usize) {
        for curve in &mut self.curves {
            curve.resize(table_size);
        }
    }
}

// ========== Morph ==========

/// Morph 关键帧（VMD 无插值参数，按线性处理）
#[derive(Clone, Debug, PartialEq)]
pub struct MorphKeyframe {
    pub frame: u64,
    pub weight: f32,
    curve: InterpolationCurve,
}

impl MorphKeyframe {
    pub fn new(frame: u64, weight: f32, table_size: usize) -> Self {
        Self {
            frame,
            weight,
            curve: InterpolationCurve::linear(table_size),
        }
    }

    pub fn set_interpolation_parameter(&mut self, params: [u8; 4]) {
        self.curve.set_params(params);
    }

    pub fn interpolation_parameter(&self) -> [u8; 4] {
        self.curve.params()
    }
}

impl Keyframe for MorphKeyframe {
    type Value = f32;

    fn frame(&self) -> u64 {
        self.frame
    }

    fn value(&self) -> f32 {
        self.weight
    }

    fn interpolate(&self, next: &Self, t: f32) -> f32 {
        lerp(self.weight, next.weight, next.curve.evaluate(t))
    }

    fn resize_curves(&mut self, table_size: usize) {
        self.curve.resize(table_size);
    }
}

// ========== 相机 ==========

/// 相机插值通道
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CameraChannel {
    LookAtX = 0,
    LookAtY = 1,
    LookAtZ = 2,
    Angle = 3,
    Fov = 4,
    Distance = 5,
}

/// 相机帧求值结果
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraFrame {
    pub look_at: Vec3,
    /// 欧拉角（弧度）
    pub angle: Vec3,
    pub distance: f32,
    /// 视角（度）
    pub fov: f32,
    pub perspective: bool,
}

/// 相机关键帧
#[derive(Clone, Debug, PartialEq)]
pub struct CameraKeyframe {
    pub frame: u64,
    /// MVD 相机层
    pub layer: i32,
    pub look_at: Vec3,
    pub angle: Vec3,
    pub distance: f32,
    pub fov: f32,
    pub perspective: bool,
    curves: [InterpolationCurve; 6],
}

impl CameraKeyframe {
    pub fn new(frame: u64, table_size: usize) -> Self {
        Self {
            frame,
            layer: 0,
            look_at: Vec3::ZERO,
            angle: Vec3::ZERO,
            distance: -45.0,
            fov: 30.0,
            perspective: true,
            curves: std::array::from_fn(|_| InterpolationCurve::linear(table_size)),
        }
    }

    pub fn set_interpolation_parameter(&mut self, channel: CameraChannel, params: [u8; 4]) {
        self.curves[channel as usize].set_params(params);
    }

    pub fn interpolation_parameter(&self, channel: CameraChannel) -> [u8; 4] {
        self.curves[channel as usize].params()
    }

    pub fn curve(&self, channel: CameraChannel) -> &InterpolationCurve {
        &self.curves[channel as usize]
    }
}

impl Keyframe for CameraKeyframe {
    type Value = CameraFrame;

    fn frame(&self) -> u64 {
        self.frame
    }

    fn value(&self) -> CameraFrame {
        CameraFrame {
            look_at: self.look_at,
            angle: self.angle,
            distance: self.distance,
            fov: self.fov,
            perspective: self.perspective,
        }
    }

    fn interpolate(&self, next: &Self, t: f32) -> CameraFrame {
        let amounts = Vec3::new(
            next.curve(CameraChannel::LookAtX).evaluate(t),
            next.curve(CameraChannel::LookAtY).evaluate(t),
            next.curve(CameraChannel::LookAtZ).evaluate(t),
        );
        let angle = next.curve(CameraChannel::Angle).evaluate(t);
        CameraFrame {
            look_at: self.look_at + (next.look_at - self.look_at) * amounts,
            angle: self.angle.lerp(next.angle, angle),
            distance: lerp(
                self.distance,
                next.distance,
                next.curve(CameraChannel::Distance).evaluate(t),
            ),
            fov: lerp(self.fov, next.fov, next.curve(CameraChannel::Fov).evaluate(t)),
            perspective: self.perspective,
        }
    }

    fn resize_curves(&mut self, table_size: usize) {
        for curve in &mut self.curves {
            curve.resize(table_size);
        }
    }
}

// ========== 光源 ==========

/// 光源关键帧
#[derive(Clone, Debug, PartialEq)]
pub struct LightKeyframe {
    pub frame: u64,
    pub color: Vec3,
    pub direction: Vec3,
}

impl LightKeyframe {
    pub fn new(frame: u64) -> Self {
        Self {
            frame,
            color: Vec3::splat(154.0 / 255.0),
            direction: Vec3::new(-0.5, -1.0, 0.5),
        }
    }
}

impl Keyframe for LightKeyframe {
    type Value = (Vec3, Vec3);

    fn frame(&self) -> u64 {
        self.frame
    }

    fn value(&self) -> (Vec3, Vec3) {
        (self.color, self.direction)
    }

    fn interpolate(&self, next: &Self, t: f32) -> (Vec3, Vec3) {
        (
            self.color.lerp(next.color, t),
            self.direction.lerp(next.direction, t),
        )
    }
}

// ========== 阴影 / 项目 ==========

/// VMD 自阴影关键帧
#[derive(Clone, Debug, PartialEq)]
pub struct SelfShadowKeyframe {
    pub frame: u64,
    /// 0: 无，1: 模式 1，2: 模式 2
    pub mode: u8,
    pub distance: f32,
}

impl SelfShadowKeyframe {
    pub const DEFAULT_DISTANCE: f32 = 0.1;

    pub fn new(frame: u64) -> Self {
        Self {
            frame,
            mode: 1,
            distance: Self::DEFAULT_DISTANCE,
        }
    }
}

impl Keyframe for SelfShadowKeyframe {
    type Value = Self;

    fn frame(&self) -> u64 {
        self.frame
    }

    fn value(&self) -> Self {
        self.clone()
    }
}

/// MVD 项目关键帧（重力与阴影）
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectKeyframe {
    pub frame: u64,
    pub gravity: f32,
    pub gravity_noise: i32,
    pub gravity_direction: Vec3,
    pub shadow_mode: i32,
    pub shadow_distance: f32,
}

impl ProjectKeyframe {
    pub fn new(frame: u64) -> Self {
        Self {
            frame,
            gravity: 9.8,
            gravity_noise: 0,
            gravity_direction: Vec3::new(0.0, -1.0, 0.0),
            shadow_mode: 1,
            shadow_distance: SelfShadowKeyframe::DEFAULT_DISTANCE,
        }
    }
}

impl Keyframe for ProjectKeyframe {
    type Value = Self;

    fn frame(&self) -> u64 {
        self.frame
    }

    fn value(&self) -> Self {
        self.clone()
    }
}

// ========== 模型 ==========

/// IK 启用状态
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IkState {
    pub name: String,
    pub enabled: bool,
}

/// 模型关键帧（VMD 显示/IK 记录，MVD 模型关键帧）
#[derive(Clone, Debug, PartialEq)]
pub struct ModelKeyframe {
    pub frame: u64,
    pub visible: bool,
    pub ik_states: Vec<IkState>,
    // 以下字段只存在于 MVD
    pub shadow_enabled: bool,
    pub add_blend_enabled: bool,
    pub physics_enabled: bool,
    pub physics_still_mode: u8,
    pub edge_width: f32,
    pub edge_color: Vec4,
}

impl ModelKeyframe {
    pub fn new(frame: u64) -> Self {
        Self {
            frame,
            visible: true,
            ik_states: Vec::new(),
            shadow_enabled: true,
            add_blend_enabled: false,
            physics_enabled: true,
            physics_still_mode: 0,
            edge_width: 1.0,
            edge_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
        }
    }

    /// 只保留 VMD 可以表达的字段
    pub fn reset_extended_fields(&mut self) {
        let defaults = Self::new(self.frame);
        self.shadow_enabled = defaults.shadow_enabled;
        self.add_blend_enabled = defaults.add_blend_enabled;
        self.physics_enabled = defaults.physics_enabled;
        self.physics_still_mode = defaults.physics_still_mode;
        self.edge_width = defaults.edge_width;
        self.edge_color = defaults.edge_color;
    }

    /// 查找 IK 状态
    pub fn is_ik_enabled(&self, name: &str) -> Option<bool> {
        self.ik_states
            .iter()
            .find(|state| state.name == name)
            .map(|state| state.enabled)
    }
}

impl Keyframe for ModelKeyframe {
    type Value = Self;

    fn frame(&self) -> u64 {
        self.frame
    }

    fn value(&self) -> Self {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bone_uses_next_curve() {
        let mut a = BoneKeyframe::new(0, 256);
        a.translation = Vec3::ZERO;
        let mut b = BoneKeyframe::new(10, 256);
        b.translation = Vec3::new(10.0, 10.0, 10.0);
        b.rotation = Quat::from_rotation_y(1.0);
        b.set_interpolation_parameter(BoneChannel::TranslationY, [127, 0, 127, 0]);

        let value = a.interpolate(&b, 0.5);
        assert!((value.translation.x - 5.0).abs() < 1e-5);
        assert!(value.translation.y < 5.0);
        assert!((value.translation.z - 5.0).abs() < 1e-5);
        assert!(value.rotation.angle_between(Quat::from_rotation_y(0.5)) < 1e-4);
    }

    #[test]
    fn test_clone_is_deep() {
        let mut keyframe = CameraKeyframe::new(3, 128);
        keyframe.set_interpolation_parameter(CameraChannel::Fov, [10, 100, 20, 120]);
        let copy = keyframe.clone();
        keyframe.set_interpolation_parameter(CameraChannel::Fov, [64, 64, 64, 64]);
        assert_eq!(copy.interpolation_parameter(CameraChannel::Fov), [10, 100, 20, 120]);
        assert!(!copy.curve(CameraChannel::Fov).is_linear());
        assert!(keyframe.curve(CameraChannel::Fov).is_linear());
    }

    #[test]
    fn test_model_ik_lookup() {
        let mut keyframe = ModelKeyframe::new(0);
        keyframe.ik_states.push(IkState {
            name: "左足ＩＫ".to_string(),
            enabled: false,
        });
        assert_eq!(keyframe.is_ik_enabled("左足ＩＫ"), Some(false));
        assert_eq!(keyframe.is_ik_enabled("右足ＩＫ"), None);

        keyframe.edge_width = 2.0;
        keyframe.reset_extended_fields();
        assert_eq!(keyframe.edge_width, 1.0);
        assert_eq!(keyframe.ik_states.len(), 1);
    }
}
