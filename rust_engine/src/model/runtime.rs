//! MMD 运行时模型
//!
//! 持有静态 `Model` 与骨骼/Morph 管理器，按帧驱动：
//! 动作/姿势 → Morph → 骨骼（物理前）→ 外部物理 → 骨骼（物理后）→ 蒙皮。

use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::animation::{Motion, Pose};
use crate::morph::{MaterialValues, MorphDeltas, MorphImpulse, MorphManager};
use crate::skeleton::BoneManager;
use crate::skinning::{skin_into, SkinningInput, SkinningOutput};
use crate::Result;

use super::{Model, SubMesh, VertexWeight};

/// MMD 运行时模型
pub struct MmdModel {
    model: Model,

    // 静态顶点数据
    base_positions: Vec<Vec3>,
    base_normals: Vec<Vec3>,
    base_uvs: Vec<Vec2>,
    base_additional_uvs: Vec<Vec<Vec4>>,
    weights: Vec<VertexWeight>,
    base_materials: Vec<MaterialValues>,
    ik_bone_names: Vec<String>,

    // 子系统
    pub bone_manager: BoneManager,
    pub morph_manager: MorphManager,

    // 运行时数据
    morph_deltas: MorphDeltas,
    morphed_positions: Vec<Vec3>,
    skinned: SkinningOutput,
    update_uvs: Vec<Vec2>,
    /// 按通道存放：`[通道][顶点]`
    update_additional_uvs: Vec<Vec<Vec4>>,
    material_values: Vec<MaterialValues>,
    pending_impulses: Vec<MorphImpulse>,
}

impl MmdModel {
    /// 链接模型并构建运行时状态，结果处于绑定姿势
    pub fn new(model: Model) -> Result<Self> {
        model.validate()?;
        let bone_manager = BoneManager::from_model(&model.bones)?;
        let morph_manager = MorphManager::from_model(&model)?;

        let base_positions: Vec<Vec3> = model.vertices.iter().map(|v| v.position).collect();
        let base_normals: Vec<Vec3> = model.vertices.iter().map(|v| v.normal).collect();
        let base_uvs: Vec<Vec2> = model.vertices.iter().map(|v| v.uv).collect();
        let base_additional_uvs: Vec<Vec<Vec4>> = (0..model.additional_uv_count)
            .map(|channel| {
                model
                    .vertices
                    .iter()
                    .map(|v| v.additional_uvs.get(channel).copied().unwrap_or(Vec4::ZERO))
                    .collect()
            })
            .collect();
        let weights: Vec<VertexWeight> = model.vertices.iter().map(|v| v.weight.clone()).collect();
        let base_materials: Vec<MaterialValues> =
            model.materials.iter().map(MaterialValues::from_material).collect();
        let ik_bone_names = model
            .bones
            .iter()
            .filter(|bone| bone.ik.is_some())
            .map(|bone| bone.name.clone())
            .collect();

        let morph_deltas =
            MorphDeltas::new(model.vertices.len(), model.bones.len(), model.materials.len());

        let mut runtime = Self {
            morphed_positions: base_positions.clone(),
            skinned: SkinningOutput {
                positions: base_positions.clone(),
                normals: base_normals.clone(),
            },
            update_uvs: base_uvs.clone(),
            update_additional_uvs: base_additional_uvs.clone(),
            material_values: base_materials.clone(),
            base_positions,
            base_normals,
            base_uvs,
            base_additional_uvs,
            weights,
            base_materials,
            ik_bone_names,
            bone_manager,
            morph_manager,
            morph_deltas,
            pending_impulses: Vec::new(),
            model,
        };
        runtime.initialize_animation();

        log::info!(
            "运行时模型创建: {} ({} 个顶点, {} 个骨骼, {} 个 Morph, {} 个 IK)",
            runtime.model.info.name,
            runtime.vertex_count(),
            runtime.bone_manager.bone_count(),
            runtime.morph_manager.morph_count(),
            runtime.ik_bone_names.len()
        );
        Ok(runtime)
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn name(&self) -> &str {
        &self.model.info.name
    }

    pub fn vertex_count(&self) -> usize {
        self.base_positions.len()
    }

    pub fn index_count(&self) -> usize {
        self.model.indices.len()
    }

    pub fn material_count(&self) -> usize {
        self.model.materials.len()
    }

    pub fn submeshes(&self) -> Vec<SubMesh> {
        self.model.submeshes()
    }

    // ========== 动画流程 ==========

    /// 回到绑定姿势：清空 Morph 权重并完整求值一帧
    pub fn initialize_animation(&mut self) {
        self.morph_manager.reset_all_weights();
        self.update_all_animation(None, 0.0);
        self.pending_impulses.clear();
    }

    pub fn begin_animation(&mut self) {
        self.bone_manager.begin_update();
    }

    pub fn end_animation(&mut self) {
        self.bone_manager.end_update();
    }

    /// 按帧号采样动作：骨骼、Morph 与 IK 开关；动作中没有的轨道保持不变
    pub fn apply_motion(&mut self, motion: &Motion, frame: f32) {
        for index in 0..self.bone_manager.bone_count() {
            let transform = self
                .bone_manager
                .get_bone(index)
                .and_then(|bone| motion.find_bone_transform(&bone.name, frame));
            if let Some(transform) = transform {
                self.bone_manager.set_bone_translation(index, transform.translation);
                self.bone_manager.set_bone_rotation(index, transform.rotation);
            }
        }

        for index in 0..self.morph_manager.morph_count() {
            let weight = self
                .morph_manager
                .get_morph(index)
                .and_then(|morph| motion.find_morph_weight(morph.get_name(), frame));
            if let Some(weight) = weight {
                self.morph_manager.set_morph_weight(index, weight);
            }
        }

        for name in &self.ik_bone_names {
            if let Some(enabled) = motion.is_ik_enabled(name, frame) {
                self.bone_manager.set_ik_enabled(name, enabled);
            }
        }
    }

    /// 应用 VPD 姿势；模型中不存在的骨骼/Morph 被忽略
    pub fn apply_pose(&mut self, pose: &Pose) {
        let mut missing = 0usize;
        for bone in &pose.bones {
            match self.bone_manager.find_bone_by_name(&bone.name) {
                Some(index) => {
                    self.bone_manager.set_bone_translation(index, bone.translation);
                    self.bone_manager.set_bone_rotation(index, bone.rotation);
                }
                None => missing += 1,
            }
        }
        for morph in &pose.morphs {
            if !self.morph_manager.set_weight_by_name(&morph.name, morph.weight) {
                missing += 1;
            }
        }
        if missing > 0 {
            log::debug!("姿势中有 {} 个名称在模型 {} 中不存在", missing, self.model.info.name);
        }
    }

    /// 计算 Morph 并把结果写入顶点/UV/材质缓冲和骨骼
    pub fn update_morph_animation(&mut self) {
        if self.morph_manager.update(&mut self.morph_deltas) {
            self.apply_vertex_deltas();
            self.apply_material_deltas();
            self.pending_impulses.append(&mut self.morph_deltas.impulses);
        }

        // 骨骼状态每帧被 begin_animation 清空，需重新写入
        for index in 0..self.bone_manager.bone_count() {
            self.bone_manager.set_morph_transform(
                index,
                self.morph_deltas.bone_translations[index],
                self.morph_deltas.bone_rotations[index],
            );
        }
    }

    /// 更新骨骼变换（物理前 / 物理后阶段）
    pub fn update_node_animation(&mut self, after_physics: bool) {
        self.bone_manager.update_transforms(after_physics);
    }

    /// 蒙皮：Morph 后的顶点经骨骼矩阵变换
    pub fn update(&mut self) {
        let input = SkinningInput {
            positions: &self.morphed_positions,
            normals: &self.base_normals,
            weights: &self.weights,
            bone_matrices: self.bone_manager.get_skinning_matrices(),
        };
        skin_into(&input, &mut self.skinned);
    }

    /// 无外部物理时的完整一帧
    pub fn update_all_animation(&mut self, motion: Option<&Motion>, frame: f32) {
        self.begin_animation();
        if let Some(motion) = motion {
            self.apply_motion(motion, frame);
        }
        self.update_morph_animation();
        self.update_node_animation(false);
        self.update_node_animation(true);
        self.end_animation();
        self.update();
    }

    fn apply_vertex_deltas(&mut self) {
        let deltas = &self.morph_deltas;
        for (index, position) in self.morphed_positions.iter_mut().enumerate() {
            *position = self.base_positions[index] + deltas.positions[index];
        }
        for (index, uv) in self.update_uvs.iter_mut().enumerate() {
            let offset = deltas.uvs[index][0];
            *uv = self.base_uvs[index] + Vec2::new(offset.x, offset.y);
        }
        for (channel, uvs) in self.update_additional_uvs.iter_mut().enumerate() {
            let base = &self.base_additional_uvs[channel];
            for (index, uv) in uvs.iter_mut().enumerate() {
                *uv = base[index] + deltas.uvs[index][channel + 1];
            }
        }
    }

    fn apply_material_deltas(&mut self) {
        for (index, values) in self.material_values.iter_mut().enumerate() {
            *values = self.morph_deltas.materials[index].resolve(&self.base_materials[index]);
        }
    }

    // ========== 结果访问 ==========

    /// 蒙皮后的顶点位置
    pub fn positions(&self) -> &[Vec3] {
        &self.skinned.positions
    }

    pub fn normals(&self) -> &[Vec3] {
        &self.skinned.normals
    }

    pub fn uvs(&self) -> &[Vec2] {
        &self.update_uvs
    }

    /// 追加 UV 通道（0 起），超出模型声明的数量返回 None
    pub fn additional_uvs(&self, channel: usize) -> Option<&[Vec4]> {
        self.update_additional_uvs.get(channel).map(Vec::as_slice)
    }

    /// Morph 后的材质参数
    pub fn material_values(&self) -> &[MaterialValues] {
        &self.material_values
    }

    pub fn indices(&self) -> &[u32] {
        &self.model.indices
    }

    pub fn bone_global_transform(&self, index: usize) -> Mat4 {
        self.bone_manager.get_global_transform(index)
    }

    pub fn bone_global_transform_by_name(&self, name: &str) -> Option<Mat4> {
        self.bone_manager
            .find_bone_by_name(name)
            .map(|index| self.bone_manager.get_global_transform(index))
    }

    /// 物理结果回写
    pub fn set_bone_global_transform(&mut self, index: usize, transform: Mat4) {
        self.bone_manager.set_global_transform(index, transform);
    }

    /// 取走累积的刚体冲量
    pub fn take_impulses(&mut self) -> Vec<MorphImpulse> {
        std::mem::take(&mut self.pending_impulses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{BoneKeyframe, IkState, ModelKeyframe, MotionFormat, PoseBone, PoseMorph};
    use crate::model::fixtures::sample_model;
    use crate::model::{GroupOffset, MorphOffsets};

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-4
    }

    #[test]
    fn test_rest_pose_matches_base() {
        let model = sample_model();
        let runtime = MmdModel::new(model.clone()).unwrap();
        assert_eq!(runtime.vertex_count(), model.vertices.len());
        for (skinned, vertex) in runtime.positions().iter().zip(&model.vertices) {
            assert!(approx(*skinned, vertex.position), "{skinned:?} != {:?}", vertex.position);
        }
        assert_eq!(runtime.additional_uvs(0).map(<[Vec4]>::len), Some(model.vertices.len()));
        assert!(runtime.additional_uvs(1).is_none());
        assert_eq!(runtime.submeshes().len(), 2);
    }

    #[test]
    fn test_invalid_model_rejected() {
        let mut model = sample_model();
        model.vertices[0].weight = VertexWeight::Bdef1 { bone: 42 };
        assert!(MmdModel::new(model).is_err());
    }

    #[test]
    fn test_vertex_and_uv_morph() {
        let mut runtime = MmdModel::new(sample_model()).unwrap();
        assert!(runtime.morph_manager.set_weight_by_name("あ", 1.0));
        assert!(runtime.morph_manager.set_weight_by_name("スクロール", 1.0));
        runtime.update_all_animation(None, 0.0);
        assert!(approx(runtime.positions()[0], Vec3::new(1.0, 0.0, 0.0)));
        assert_eq!(runtime.uvs()[2], Vec2::new(0.25, 1.0));

        // 权重未变时沿用缓存结果
        runtime.update_all_animation(None, 1.0);
        assert!(approx(runtime.positions()[0], Vec3::new(1.0, 0.0, 0.0)));
    }

    #[test]
    fn test_material_morph_and_impulse() {
        let mut runtime = MmdModel::new(sample_model()).unwrap();
        runtime.morph_manager.set_weight_by_name("暗い", 1.0);
        runtime.morph_manager.set_weight_by_name("衝撃", 1.0);
        runtime.update_all_animation(None, 0.0);

        assert_eq!(runtime.material_values()[1].diffuse, Vec4::new(0.25, 0.25, 0.25, 1.0));
        let impulses = runtime.take_impulses();
        assert_eq!(impulses.len(), 1);
        assert_eq!(impulses[0].velocity, Vec3::new(0.0, 2.0, 0.0));
        assert!(runtime.take_impulses().is_empty());
    }

    #[test]
    fn test_impulse_queue_stays_bounded() {
        let mut model = sample_model();
        model.morphs[3].offsets = MorphOffsets::Group(vec![GroupOffset {
            morph_index: 8,
            weight: 1.0,
        }]);
        let mut runtime = MmdModel::new(model).unwrap();
        runtime.morph_manager.set_weight_by_name("グループ", 1.0);
        for frame in 0..100 {
            runtime.update_all_animation(None, frame as f32);
        }
        assert_eq!(runtime.take_impulses().len(), 1);
    }

    #[test]
    fn test_apply_motion_moves_bones() {
        let mut runtime = MmdModel::new(sample_model()).unwrap();
        let mut motion = Motion::new(MotionFormat::Vmd);
        let mut keyframe = BoneKeyframe::new(0, motion.table_size());
        keyframe.translation = Vec3::new(0.0, 1.0, 0.0);
        motion.insert_bone_keyframe("センター", keyframe);

        runtime.update_all_animation(Some(&motion), 0.0);
        assert!(approx(runtime.positions()[0], Vec3::new(0.0, 1.0, 0.0)));
        let arm = runtime.bone_global_transform_by_name("腕").unwrap();
        assert!(approx(arm.w_axis.truncate(), Vec3::new(0.0, 2.0, 0.0)));
        assert!(runtime.bone_global_transform_by_name("存在しない").is_none());
    }

    #[test]
    fn test_motion_toggles_ik() {
        let mut runtime = MmdModel::new(sample_model()).unwrap();
        let mut motion = Motion::new(MotionFormat::Vmd);
        let mut keyframe = ModelKeyframe::new(0);
        keyframe.ik_states.push(IkState {
            name: "手IK".to_string(),
            enabled: false,
        });
        motion.insert_model_keyframe(keyframe);

        assert_eq!(runtime.bone_manager.is_ik_enabled("手IK"), Some(true));
        runtime.update_all_animation(Some(&motion), 5.0);
        assert_eq!(runtime.bone_manager.is_ik_enabled("手IK"), Some(false));
    }

    #[test]
    fn test_apply_pose() {
        let mut runtime = MmdModel::new(sample_model()).unwrap();
        let pose = Pose {
            model_name: "test.osm".to_string(),
            bones: vec![
                PoseBone {
                    name: "センター".to_string(),
                    translation: Vec3::new(0.0, 0.0, 2.0),
                    rotation: glam::Quat::IDENTITY,
                },
                PoseBone {
                    name: "ない".to_string(),
                    translation: Vec3::ONE,
                    rotation: glam::Quat::IDENTITY,
                },
            ],
            morphs: vec![PoseMorph {
                name: "い".to_string(),
                weight: 1.0,
            }],
        };

        runtime.begin_animation();
        runtime.apply_pose(&pose);
        runtime.update_morph_animation();
        runtime.update_node_animation(false);
        runtime.update_node_animation(true);
        runtime.end_animation();
        runtime.update();
        assert!(approx(runtime.positions()[0], Vec3::new(0.0, 1.0, 2.0)));
    }

    #[test]
    fn test_initialize_resets_morphs() {
        let mut runtime = MmdModel::new(sample_model()).unwrap();
        runtime.morph_manager.set_weight_by_name("あ", 1.0);
        runtime.update_all_animation(None, 0.0);
        runtime.initialize_animation();
        assert!(approx(runtime.positions()[0], Vec3::ZERO));
    }
}
