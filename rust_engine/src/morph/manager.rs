//! Morph 管理器

use std::collections::HashMap;

use glam::Quat;

use super::morph::TableSizes;
use super::{Morph, MorphDeltas, MorphImpulse, MorphKind};
use crate::config::get_config;
use crate::model::Model;
use crate::Result;

/// 翻转 Morph 选择的子项：把 [0, 1] 分成 n 个宽 1/n 的区间（左闭），
/// 权重 1.0 归入最后一个区间
pub fn flip_index(weight: f32, count: usize) -> usize {
    if count == 0 {
        return 0;
    }
    let bucket = (weight.clamp(0.0, 1.0) * count as f32).floor() as usize;
    bucket.min(count - 1)
}

/// Morph 管理器
pub struct MorphManager {
    morphs: Vec<Morph>,
    name_to_index: HashMap<String, usize>,
}

impl MorphManager {
    pub fn new() -> Self {
        Self {
            morphs: Vec::new(),
            name_to_index: HashMap::new(),
        }
    }

    /// 从模型构建，所有引用在此解析
    pub fn from_model(model: &Model) -> Result<Self> {
        let sizes = TableSizes {
            vertices: model.vertices.len(),
            bones: model.bones.len(),
            materials: model.materials.len(),
            morphs: model.morphs.len(),
            rigid_bodies: model.rigid_bodies.len(),
        };
        let mut manager = Self::new();
        for data in &model.morphs {
            manager.add_morph(Morph::from_data(data, &sizes)?);
        }
        Ok(manager)
    }

    /// 添加 Morph
    fn add_morph(&mut self, morph: Morph) {
        let index = self.morphs.len();
        self.name_to_index.entry(morph.name.clone()).or_insert(index);
        self.morphs.push(morph);
    }

    /// 通过名称查找 Morph
    pub fn find_morph_by_name(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// 获取 Morph 数量
    pub fn morph_count(&self) -> usize {
        self.morphs.len()
    }

    /// 获取 Morph
    pub fn get_morph(&self, index: usize) -> Option<&Morph> {
        self.morphs.get(index)
    }

    /// 设置 Morph 权重
    pub fn set_morph_weight(&mut self, index: usize, weight: f32) {
        if let Some(morph) = self.morphs.get_mut(index) {
            morph.set_weight(weight);
        }
    }

    /// 按名称设置权重，找不到返回 false
    pub fn set_weight_by_name(&mut self, name: &str, weight: f32) -> bool {
        match self.find_morph_by_name(name) {
            Some(index) => {
                self.set_morph_weight(index, weight);
                true
            }
            None => false,
        }
    }

    /// 重置所有 Morph 权重
    pub fn reset_all_weights(&mut self) {
        for morph in &mut self.morphs {
            morph.reset();
        }
    }

    /// 是否需要完整计算：有权重变化，或有激活的组/翻转 Morph
    pub fn needs_update(&self) -> bool {
        self.morphs
            .iter()
            .any(|m| m.is_dirty() || (m.is_composite() && m.get_weight() > 0.0))
    }

    /// 计算所有 Morph，结果写入 `deltas`；未执行完整计算时返回 false
    pub fn update(&mut self, deltas: &mut MorphDeltas) -> bool {
        if !self.needs_update() {
            return false;
        }
        let limit = get_config().morph_recursion_limit;

        deltas.reset();
        for morph in &mut self.morphs {
            morph.begin_pass();
        }

        let mut stack = Vec::with_capacity(limit);
        for index in 0..self.morphs.len() {
            let weight = self.morphs[index].get_weight();
            if weight > 0.0 {
                self.apply(index, weight, deltas, &mut stack, limit);
            }
        }
        self.emit_impulses(deltas);

        for morph in &mut self.morphs {
            morph.clear_dirty();
        }
        true
    }

    /// 生效权重变化且大于 0 的冲量 Morph 发出一次冲量
    fn emit_impulses(&self, deltas: &mut MorphDeltas) {
        for morph in &self.morphs {
            let MorphKind::Impulse(offsets) = &morph.kind else {
                continue;
            };
            let weight = morph.internal_weight();
            if weight <= 0.0 || !morph.internal_weight_changed() {
                continue;
            }
            for &(rigid_body_index, offset) in offsets {
                deltas.impulses.push(MorphImpulse {
                    rigid_body_index,
                    local: offset.local,
                    velocity: offset.velocity * weight,
                    torque: offset.torque * weight,
                });
            }
        }
    }

    /// 按类型分派，组/翻转递归到子 Morph
    fn apply(
        &mut self,
        index: usize,
        weight: f32,
        deltas: &mut MorphDeltas,
        stack: &mut Vec<usize>,
        limit: usize,
    ) {
        if weight == 0.0 {
            return;
        }
        if stack.contains(&index) {
            log::warn!("Morph 循环引用被截断: {}", self.morphs[index].name);
            return;
        }
        if stack.len() >= limit {
            log::warn!(
                "Morph 递归超过 {} 层被截断: {}",
                limit,
                self.morphs[index].name
            );
            return;
        }

        self.morphs[index].add_internal_weight(weight);

        let children = match &self.morphs[index].kind {
            MorphKind::Group(links) => links
                .iter()
                .filter(|link| link.morph_index != index)
                .map(|link| (link.morph_index, link.weight * weight))
                .collect::<Vec<_>>(),
            MorphKind::Flip(links) => {
                if links.is_empty() {
                    return;
                }
                let link = links[flip_index(weight, links.len())];
                if link.morph_index == index {
                    return;
                }
                vec![(link.morph_index, link.weight)]
            }
            MorphKind::Vertex(offsets) => {
                for &(vertex, offset) in offsets {
                    deltas.positions[vertex] += offset * weight;
                }
                return;
            }
            MorphKind::Uv { channel, offsets } => {
                for &(vertex, offset) in offsets {
                    deltas.uvs[vertex][*channel] += offset * weight;
                }
                return;
            }
            MorphKind::Bone(offsets) => {
                for &(bone, translation, rotation) in offsets {
                    deltas.bone_translations[bone] += translation * weight;
                    deltas.bone_rotations[bone] *= Quat::IDENTITY.slerp(rotation, weight);
                }
                return;
            }
            MorphKind::Material(offsets) => {
                for (target, offset) in offsets {
                    match target {
                        Some(material) => deltas.materials[*material].apply(offset, weight),
                        None => {
                            for accumulator in &mut deltas.materials {
                                accumulator.apply(offset, weight);
                            }
                        }
                    }
                }
                return;
            }
            // 冲量在整次计算结束后按生效权重发出
            MorphKind::Impulse(_) => return,
        };

        stack.push(index);
        for (child, child_weight) in children {
            self.apply(child, child_weight, deltas, stack, limit);
        }
        stack.pop();
    }
}

impl Default for MorphManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::sample_model;
    use crate::model::{GroupOffset, MorphOffsets};
    use crate::morph::MaterialValues;
    use glam::{Vec3, Vec4};

    fn setup() -> (Model, MorphManager, MorphDeltas) {
        let model = sample_model();
        let manager = MorphManager::from_model(&model).unwrap();
        let deltas = MorphDeltas::new(
            model.vertices.len(),
            model.bones.len(),
            model.materials.len(),
        );
        (model, manager, deltas)
    }

    #[test]
    fn test_flip_index_buckets() {
        assert_eq!(flip_index(0.0, 3), 0);
        assert_eq!(flip_index(0.2, 3), 0);
        assert_eq!(flip_index(0.33, 3), 0);
        assert_eq!(flip_index(0.34, 3), 1);
        assert_eq!(flip_index(0.66, 3), 1);
        assert_eq!(flip_index(0.67, 3), 2);
        assert_eq!(flip_index(1.0, 3), 2);
        // 边界归入上一个区间
        assert_eq!(flip_index(0.5, 2), 1);
        assert_eq!(flip_index(0.5, 0), 0);
    }

    #[test]
    fn test_group_morph_sums_children() {
        let (_, mut manager, mut deltas) = setup();
        let group = manager.find_morph_by_name("グループ").unwrap();

        manager.set_morph_weight(group, 1.0);
        assert!(manager.update(&mut deltas));
        // あ (1,0,0) × 0.5 + い (0,1,0) × 0.3
        assert!((deltas.positions[0] - Vec3::new(0.5, 0.3, 0.0)).length() < 1e-6);
        assert!((manager.get_morph(0).unwrap().internal_weight() - 0.5).abs() < 1e-6);

        manager.set_morph_weight(group, 0.0);
        assert!(manager.update(&mut deltas));
        assert_eq!(deltas.positions[0], Vec3::ZERO);
        // 无变化且无激活的组时跳过
        assert!(!manager.update(&mut deltas));
    }

    #[test]
    fn test_flip_morph_selects_one_child() {
        let (_, mut manager, mut deltas) = setup();
        let flip = manager.find_morph_by_name("フリップ").unwrap();

        for (weight, expected) in [
            (0.1, Vec3::new(1.0, 0.0, 0.0)),
            (0.2, Vec3::new(1.0, 0.0, 0.0)),
            (0.5, Vec3::new(0.0, 1.0, 0.0)),
            (0.9, Vec3::ZERO),
        ] {
            manager.set_morph_weight(flip, weight);
            manager.update(&mut deltas);
            assert!((deltas.positions[0] - expected).length() < 1e-6, "weight {}", weight);
        }
        // 第三个子项作用在顶点 1，且使用子项自身权重
        assert!((deltas.positions[1] - Vec3::new(0.0, 0.0, 1.0)).length() < 1e-6);
    }

    #[test]
    fn test_bone_uv_material_impulse() {
        let (model, mut manager, mut deltas) = setup();
        manager.set_weight_by_name("腕上げ", 0.5);
        manager.set_weight_by_name("スクロール", 1.0);
        manager.set_weight_by_name("暗い", 1.0);
        manager.set_weight_by_name("衝撃", 0.5);
        manager.update(&mut deltas);

        assert!((deltas.bone_translations[1] - Vec3::new(0.0, 0.5, 0.0)).length() < 1e-6);
        let expected = Quat::from_rotation_z(std::f32::consts::FRAC_PI_4);
        assert!(deltas.bone_rotations[1].angle_between(expected) < 1e-4);

        assert_eq!(deltas.uvs[2][0], Vec4::new(0.25, 0.0, 0.0, 0.0));

        // 材质索引 -1 作用于全部材质
        for (accumulator, material) in deltas.materials.iter().zip(&model.materials) {
            let base = MaterialValues::from_material(material);
            let resolved = accumulator.resolve(&base);
            assert!((resolved.diffuse.x - material.diffuse.x * 0.5).abs() < 1e-6);
        }

        let impulses = std::mem::take(&mut deltas.impulses);
        assert_eq!(impulses.len(), 1);
        assert_eq!(impulses[0].velocity, Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn test_impulse_fires_once_inside_active_group() {
        let mut model = sample_model();
        model.morphs[3].offsets = MorphOffsets::Group(vec![GroupOffset {
            morph_index: 8,
            weight: 1.0,
        }]);
        let mut manager = MorphManager::from_model(&model).unwrap();
        let mut deltas = MorphDeltas::new(
            model.vertices.len(),
            model.bones.len(),
            model.materials.len(),
        );
        manager.set_morph_weight(3, 1.0);

        // 组一直激活，每次都完整计算，但冲量只在生效权重变化时发出
        for _ in 0..10 {
            assert!(manager.update(&mut deltas));
        }
        let impulses = std::mem::take(&mut deltas.impulses);
        assert_eq!(impulses.len(), 1);
        assert_eq!(impulses[0].velocity, Vec3::new(0.0, 2.0, 0.0));

        manager.set_morph_weight(3, 0.5);
        manager.update(&mut deltas);
        manager.update(&mut deltas);
        let impulses = std::mem::take(&mut deltas.impulses);
        assert_eq!(impulses.len(), 1);
        assert_eq!(impulses[0].velocity, Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn test_cycle_is_cut() {
        let mut model = sample_model();
        // グループ → 自身以外のフリップ → グループ
        model.morphs[3].offsets = MorphOffsets::Group(vec![GroupOffset {
            morph_index: 4,
            weight: 1.0,
        }]);
        model.morphs[4].offsets = MorphOffsets::Flip(vec![GroupOffset {
            morph_index: 3,
            weight: 1.0,
        }]);
        let mut manager = MorphManager::from_model(&model).unwrap();
        let mut deltas = MorphDeltas::new(
            model.vertices.len(),
            model.bones.len(),
            model.materials.len(),
        );
        manager.set_morph_weight(3, 1.0);
        assert!(manager.update(&mut deltas));
        assert!((manager.get_morph(4).unwrap().internal_weight() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_name() {
        let (_, mut manager, _) = setup();
        assert!(!manager.set_weight_by_name("存在しない", 1.0));
    }
}
