//! 测试用内存模型

use glam::{Quat, Vec2, Vec3, Vec4};

use super::*;

fn bone(name: &str, origin: Vec3, parent_index: i32) -> BoneData {
    BoneData {
        name: name.to_string(),
        origin,
        parent_index,
        ..Default::default()
    }
}

fn vertex_morph(name: &str, vertex_index: i32, position: Vec3) -> MorphData {
    MorphData {
        name: name.to_string(),
        english_name: String::new(),
        category: MorphCategory::Lip,
        offsets: MorphOffsets::Vertex(vec![VertexOffset {
            vertex_index,
            position,
        }]),
    }
}

/// 腕链 + IK 的小模型
///
/// 骨骼: 0 センター, 1 腕, 2 ひじ, 3 手首, 4 手IK (效应器 3, 链 2→1)
/// Morph: 0~2 顶点, 3 组, 4 翻转, 5 骨骼, 6 材质, 7 UV, 8 冲量
pub(crate) fn sample_model() -> Model {
    let mut model = Model::new();
    model.additional_uv_count = 1;
    model.info = ModelInfo {
        name: "テスト".to_string(),
        english_name: "test".to_string(),
        comment: "コメント".to_string(),
        english_comment: "comment".to_string(),
    };

    model.vertices = vec![
        Vertex {
            position: Vec3::new(0.0, 0.0, 0.0),
            uv: Vec2::new(0.0, 0.0),
            additional_uvs: vec![Vec4::ZERO],
            weight: VertexWeight::Bdef1 { bone: 0 },
            ..Default::default()
        },
        Vertex {
            position: Vec3::new(0.0, 1.5, 0.0),
            uv: Vec2::new(1.0, 0.0),
            additional_uvs: vec![Vec4::ZERO],
            weight: VertexWeight::Bdef2 {
                bones: [1, 2],
                weight: 0.5,
            },
            ..Default::default()
        },
        Vertex {
            position: Vec3::new(0.0, 2.5, 0.0),
            uv: Vec2::new(0.0, 1.0),
            additional_uvs: vec![Vec4::ZERO],
            weight: VertexWeight::Sdef {
                bones: [2, 3],
                weight: 0.75,
                c: Vec3::new(0.0, 2.5, 0.0),
                r0: Vec3::new(0.0, 2.0, 0.0),
                r1: Vec3::new(0.0, 3.0, 0.0),
            },
            ..Default::default()
        },
        Vertex {
            position: Vec3::new(0.0, 3.0, 0.0),
            uv: Vec2::new(1.0, 1.0),
            additional_uvs: vec![Vec4::ZERO],
            weight: VertexWeight::Bdef4 {
                bones: [3, 2, -1, -1],
                weights: [0.6, 0.2, 0.0, 0.0],
            },
            ..Default::default()
        },
    ];
    model.indices = vec![0, 1, 2, 1, 3, 2];
    model.textures = vec!["tex/body.png".to_string(), "tex/body.spa".to_string()];
    model.materials = vec![
        Material {
            name: "体".to_string(),
            texture_index: 0,
            sphere_texture_index: 1,
            sphere_mode: SphereMode::Add,
            toon: Toon::Shared(1),
            flags: MaterialFlags::CASTS_SHADOW | MaterialFlags::HAS_EDGE,
            index_count: 3,
            ..Default::default()
        },
        Material {
            name: "服".to_string(),
            diffuse: Vec4::new(0.5, 0.5, 0.5, 1.0),
            index_count: 3,
            ..Default::default()
        },
    ];

    let mut wrist_ik = bone("手IK", Vec3::new(0.0, 3.0, 0.0), 0);
    wrist_ik.flags |= BoneFlags::IK | BoneFlags::MOVABLE;
    wrist_ik.ik = Some(IkData {
        effector_index: 3,
        iterations: 10,
        angle_limit: 1.0,
        links: vec![
            IkLinkData {
                bone_index: 2,
                limits: None,
            },
            IkLinkData {
                bone_index: 1,
                limits: None,
            },
        ],
    });
    let mut center = bone("センター", Vec3::ZERO, -1);
    center.flags |= BoneFlags::MOVABLE;
    let mut arm = bone("腕", Vec3::new(0.0, 1.0, 0.0), 0);
    arm.destination = BoneDestination::Bone(2);
    arm.flags |= BoneFlags::DESTINATION_BONE;
    let mut wrist = bone("手首", Vec3::new(0.0, 3.0, 0.0), 2);
    wrist.destination = BoneDestination::Offset(Vec3::new(0.0, 0.5, 0.0));
    model.bones = vec![
        center,
        arm,
        bone("ひじ", Vec3::new(0.0, 2.0, 0.0), 1),
        wrist,
        wrist_ik,
    ];

    model.morphs = vec![
        vertex_morph("あ", 0, Vec3::new(1.0, 0.0, 0.0)),
        vertex_morph("い", 0, Vec3::new(0.0, 1.0, 0.0)),
        vertex_morph("う", 1, Vec3::new(0.0, 0.0, 1.0)),
        MorphData {
            name: "グループ".to_string(),
            english_name: String::new(),
            category: MorphCategory::Other,
            offsets: MorphOffsets::Group(vec![
                GroupOffset {
                    morph_index: 0,
                    weight: 0.5,
                },
                GroupOffset {
                    morph_index: 1,
                    weight: 0.3,
                },
            ]),
        },
        MorphData {
            name: "フリップ".to_string(),
            english_name: String::new(),
            category: MorphCategory::Other,
            offsets: MorphOffsets::Flip(
                (0..3)
                    .map(|i| GroupOffset {
                        morph_index: i,
                        weight: 1.0,
                    })
                    .collect(),
            ),
        },
        MorphData {
            name: "腕上げ".to_string(),
            english_name: String::new(),
            category: MorphCategory::Other,
            offsets: MorphOffsets::Bone(vec![BoneOffset {
                bone_index: 1,
                translation: Vec3::new(0.0, 1.0, 0.0),
                rotation: Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
            }]),
        },
        MorphData {
            name: "暗い".to_string(),
            english_name: String::new(),
            category: MorphCategory::Other,
            offsets: MorphOffsets::Material(vec![MaterialOffset {
                material_index: -1,
                operation: MaterialOperation::Multiply,
                diffuse: Vec4::new(0.5, 0.5, 0.5, 1.0),
                specular: Vec3::ONE,
                shininess: 1.0,
                ambient: Vec3::ONE,
                edge_color: Vec4::ONE,
                edge_size: 1.0,
                texture_tint: Vec4::ONE,
                sphere_tint: Vec4::ONE,
                toon_tint: Vec4::ONE,
            }]),
        },
        MorphData {
            name: "スクロール".to_string(),
            english_name: String::new(),
            category: MorphCategory::Other,
            offsets: MorphOffsets::Uv {
                channel: 0,
                offsets: vec![UvOffset {
                    vertex_index: 2,
                    offset: Vec4::new(0.25, 0.0, 0.0, 0.0),
                }],
            },
        },
        MorphData {
            name: "衝撃".to_string(),
            english_name: String::new(),
            category: MorphCategory::Other,
            offsets: MorphOffsets::Impulse(vec![ImpulseOffset {
                rigid_body_index: 0,
                local: false,
                velocity: Vec3::new(0.0, 2.0, 0.0),
                torque: Vec3::ZERO,
            }]),
        },
    ];

    model.labels = vec![
        Label {
            name: "Root".to_string(),
            english_name: "Root".to_string(),
            special: true,
            items: vec![LabelItem::Bone(0)],
        },
        Label {
            name: "表情".to_string(),
            english_name: "Exp".to_string(),
            special: true,
            items: (0..5).map(LabelItem::Morph).collect(),
        },
        Label {
            name: "腕".to_string(),
            english_name: String::new(),
            special: false,
            items: vec![LabelItem::Bone(1), LabelItem::Bone(2), LabelItem::Bone(4)],
        },
    ];

    model.rigid_bodies = vec![
        RigidBody {
            name: "腕".to_string(),
            bone_index: 1,
            position: Vec3::new(0.0, 1.5, 0.0),
            ..Default::default()
        },
        RigidBody {
            name: "ひじ".to_string(),
            bone_index: 2,
            position: Vec3::new(0.0, 2.5, 0.0),
            mode: RigidBodyMode::Dynamic,
            ..Default::default()
        },
    ];
    model.joints = vec![Joint {
        name: "ひじ".to_string(),
        rigid_body_a_index: 0,
        rigid_body_b_index: 1,
        position: Vec3::new(0.0, 2.0, 0.0),
        ..Default::default()
    }];
    model
}
