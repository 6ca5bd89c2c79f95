//! PMD 1.0 编解码
//!
//! PMD 数据加载时转换为 PMX 结构：顶点统一为 BDEF2，表情转为顶点 Morph，
//! 显示枠转为 Label。写出时做反向转换，PMD 无法表达的数据会被丢弃。

use std::collections::HashMap;

use glam::Vec3;

use crate::codec::{ByteReader, ByteWriter, TextEncoding};
use crate::config::get_config;
use crate::{MmdError, Result};

use super::{
    BoneData, BoneDestination, BoneFlags, IkData, IkLinkData, Inherent, Joint, JointKind, Label,
    LabelItem, Material, MaterialFlags, Model, ModelFormat, ModelInfo, MorphCategory, MorphData,
    MorphOffsets, RigidBody, RigidBodyMode, RigidBodyShape, SphereMode, Toon, Vertex, VertexOffset,
    VertexWeight,
};

const SIGNATURE: &[u8; 3] = b"Pmd";
const ENCODING: TextEncoding = TextEncoding::ShiftJis;
const NAME_SIZE: usize = 20;
const COMMENT_SIZE: usize = 256;
const DISPLAY_NAME_SIZE: usize = 50;
const TOON_NAME_SIZE: usize = 100;
const TOON_COUNT: usize = 10;
const NONE_U16: u16 = 0xFFFF;

/// 膝盖 IK 隐式角度限制（弧度）
const KNEE_LOWER: Vec3 = Vec3::new(-std::f32::consts::PI, 0.0, 0.0);
const KNEE_UPPER: Vec3 = Vec3::new(-0.008727, 0.0, 0.0);

const ROOT_LABEL: &str = "Root";
const MORPH_LABEL: &str = "表情";

fn index_from_u16(value: u16) -> i32 {
    if value == NONE_U16 {
        -1
    } else {
        value as i32
    }
}

fn index_to_u16(index: i32, context: &str) -> Result<u16> {
    if index == -1 {
        return Ok(NONE_U16);
    }
    u16::try_from(index)
        .ok()
        .filter(|&v| v != NONE_U16)
        .ok_or_else(|| MmdError::ValueRange(format!("{} index {} does not fit in PMD", context, index)))
}

fn count_to_u16(count: usize, context: &str) -> Result<u16> {
    u16::try_from(count)
        .map_err(|_| MmdError::ValueRange(format!("{} count {} exceeds PMD limit", context, count)))
}

fn count_to_u8(count: usize, context: &str) -> Result<u8> {
    u8::try_from(count)
        .map_err(|_| MmdError::ValueRange(format!("{} count {} exceeds PMD limit", context, count)))
}

fn read_u32_count(reader: &mut ByteReader, context: &'static str) -> Result<usize> {
    Ok(reader.read_u32(context)? as usize)
}

fn read_name(reader: &mut ByteReader, width: usize, context: &'static str) -> Result<String> {
    reader.read_fixed_text(width, ENCODING, context)
}

/// 骨骼类型 → 标志位
fn flags_from_type(kind: u8) -> BoneFlags {
    let base = BoneFlags::ROTATABLE | BoneFlags::VISIBLE | BoneFlags::OPERABLE;
    match kind {
        1 => base | BoneFlags::MOVABLE,
        2 => base | BoneFlags::MOVABLE | BoneFlags::IK,
        5 | 9 => base | BoneFlags::INHERENT_ROTATION,
        6 | 7 => BoneFlags::ROTATABLE,
        8 => base | BoneFlags::FIXED_AXIS,
        _ => base,
    }
}

/// 标志位 → 骨骼类型（有损）
fn type_from_flags(flags: BoneFlags) -> u8 {
    if flags.contains(BoneFlags::IK) {
        2
    } else if flags.contains(BoneFlags::INHERENT_ROTATION) {
        5
    } else if flags.contains(BoneFlags::FIXED_AXIS) {
        8
    } else if flags.contains(BoneFlags::MOVABLE) {
        1
    } else if !flags.contains(BoneFlags::VISIBLE) {
        7
    } else {
        0
    }
}

/// 表情记录
struct Face {
    name: String,
    kind: u8,
    entries: Vec<(u32, Vec3)>,
}

/// 解析 PMD 字节
pub(crate) fn load(data: &[u8]) -> Result<Model> {
    load_with(data, get_config().pmd_knee_limits)
}

fn load_with(data: &[u8], knee_limits: bool) -> Result<Model> {
    let mut reader = ByteReader::new(data);
    let signature = reader.read_array::<3>("pmd signature")?;
    if &signature != SIGNATURE {
        return Err(MmdError::Signature("missing 'Pmd' signature".to_string()));
    }
    let version = reader.read_f32("pmd version")?;
    let mut info = ModelInfo {
        name: read_name(&mut reader, NAME_SIZE, "model name")?,
        comment: read_name(&mut reader, COMMENT_SIZE, "model comment")?,
        ..Default::default()
    };

    // 顶点
    let vertex_count = read_u32_count(&mut reader, "vertex count")?;
    if vertex_count.checked_mul(38).map_or(true, |n| n > reader.remaining()) {
        return Err(MmdError::Size {
            context: "vertices",
            offset: reader.offset(),
            requested: vertex_count.saturating_mul(38),
            remaining: reader.remaining(),
        });
    }
    let mut vertices = Vec::with_capacity(vertex_count);
    for _ in 0..vertex_count {
        let position = reader.read_vec3("vertex position")?;
        let normal = reader.read_vec3("vertex normal")?;
        let uv = reader.read_vec2("vertex uv")?;
        let bone0 = index_from_u16(reader.read_u16("vertex bone")?);
        let bone1 = index_from_u16(reader.read_u16("vertex bone")?);
        let weight = reader.read_u8("vertex weight")? as f32 / 100.0;
        let no_edge = reader.read_u8("vertex edge")? != 0;
        vertices.push(Vertex {
            position,
            normal,
            uv,
            additional_uvs: Vec::new(),
            weight: VertexWeight::Bdef2 {
                bones: [bone0, bone1],
                weight,
            },
            edge_size: if no_edge { 0.0 } else { 1.0 },
        });
    }

    // 面
    let index_count = read_u32_count(&mut reader, "face count")?;
    let face_bytes = reader.read_bytes(
        index_count
            .checked_mul(2)
            .ok_or_else(|| MmdError::Header("face count overflows".to_string()))?,
        "faces",
    )?;
    let indices: Vec<u32> = face_bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]) as u32)
        .collect();

    // 材质
    let material_count = read_u32_count(&mut reader, "material count")?;
    let mut textures: Vec<String> = Vec::new();
    let mut materials = Vec::with_capacity(material_count.min(reader.remaining() / 70));
    for i in 0..material_count {
        let diffuse = reader.read_vec4("material diffuse")?;
        let shininess = reader.read_f32("material shininess")?;
        let specular = reader.read_vec3("material specular")?;
        let ambient = reader.read_vec3("material ambient")?;
        let toon_index = reader.read_u8("material toon")?;
        let edge = reader.read_u8("material edge")? != 0;
        let index_count = reader.read_u32("material index count")?;
        let texture_name = read_name(&mut reader, NAME_SIZE, "material texture")?;

        let mut flags =
            MaterialFlags::GROUND_SHADOW | MaterialFlags::CASTS_SHADOW | MaterialFlags::RECEIVES_SHADOW;
        if edge {
            flags |= MaterialFlags::HAS_EDGE;
        }
        if diffuse.w < 1.0 {
            flags |= MaterialFlags::DOUBLE_SIDED;
        }

        let mut material = Material {
            name: format!("材質{}", i + 1),
            diffuse,
            specular,
            shininess,
            ambient,
            flags,
            toon: if toon_index == 0xFF {
                Toon::Texture(-1)
            } else {
                Toon::Shared(toon_index)
            },
            index_count: i32::try_from(index_count)
                .map_err(|_| MmdError::Header(format!("material index count {}", index_count)))?,
            ..Default::default()
        };
        for part in texture_name.split('*').filter(|p| !p.is_empty()) {
            let lower = part.to_ascii_lowercase();
            let slot = intern_texture(&mut textures, part);
            if lower.ends_with(".sph") {
                material.sphere_texture_index = slot;
                material.sphere_mode = SphereMode::Multiply;
            } else if lower.ends_with(".spa") {
                material.sphere_texture_index = slot;
                material.sphere_mode = SphereMode::Add;
            } else {
                material.texture_index = slot;
            }
        }
        materials.push(material);
    }

    // 骨骼
    let bone_count = reader.read_u16("bone count")? as usize;
    let mut bones = Vec::with_capacity(bone_count);
    let mut tails = Vec::with_capacity(bone_count);
    for _ in 0..bone_count {
        let name = read_name(&mut reader, NAME_SIZE, "bone name")?;
        let parent_index = index_from_u16(reader.read_u16("bone parent")?);
        let tail = index_from_u16(reader.read_u16("bone tail")?);
        let kind = reader.read_u8("bone type")?;
        let ik_field = index_from_u16(reader.read_u16("bone ik")?);
        let origin = reader.read_vec3("bone origin")?;

        let flags = flags_from_type(kind) | BoneFlags::DESTINATION_BONE;
        let inherent = flags.contains(BoneFlags::INHERENT_ROTATION).then_some(Inherent {
            parent_index: ik_field,
            coefficient: 1.0,
        });
        tails.push(tail);
        bones.push(BoneData {
            name,
            origin,
            parent_index,
            flags,
            destination: BoneDestination::Bone(tail),
            inherent,
            ..Default::default()
        });
    }
    // 捻转轴指向末端骨骼
    for i in 0..bones.len() {
        if bones[i].flags.contains(BoneFlags::FIXED_AXIS) {
            let axis = usize::try_from(tails[i])
                .ok()
                .and_then(|t| bones.get(t))
                .map(|tail| (tail.origin - bones[i].origin).normalize_or_zero())
                .filter(|axis| *axis != Vec3::ZERO)
                .unwrap_or(Vec3::X);
            bones[i].fixed_axis = Some(axis);
        }
    }

    // IK
    let ik_count = reader.read_u16("ik count")?;
    for _ in 0..ik_count {
        let ik_bone = reader.read_u16("ik bone")? as usize;
        let effector_index = index_from_u16(reader.read_u16("ik target")?);
        let chain_length = reader.read_u8("ik chain length")?;
        let iterations = reader.read_u16("ik iterations")? as i32;
        let weight = reader.read_f32("ik weight")?;
        let mut links = Vec::with_capacity(chain_length as usize);
        for _ in 0..chain_length {
            let bone_index = index_from_u16(reader.read_u16("ik chain")?);
            let is_knee = knee_limits
                && usize::try_from(bone_index)
                    .ok()
                    .and_then(|i| bones.get(i))
                    .map_or(false, |b| b.name.contains("ひざ"));
            links.push(IkLinkData {
                bone_index,
                limits: is_knee.then_some((KNEE_LOWER, KNEE_UPPER)),
            });
        }
        let bone = bones.get_mut(ik_bone).ok_or(MmdError::Index {
            kind: "ik bone",
            index: ik_bone as i64,
            count: bone_count,
        })?;
        if bone.ik.is_some() {
            log::warn!("PMD 骨骼 {} 有多条 IK 记录，使用最后一条", bone.name);
        }
        bone.flags |= BoneFlags::IK;
        bone.ik = Some(IkData {
            effector_index,
            iterations,
            angle_limit: weight * 4.0,
            links,
        });
    }

    // 表情
    let face_count = reader.read_u16("face morph count")? as usize;
    let mut faces = Vec::with_capacity(face_count);
    for _ in 0..face_count {
        let name = read_name(&mut reader, NAME_SIZE, "face name")?;
        let count = read_u32_count(&mut reader, "face vertex count")?;
        let kind = reader.read_u8("face type")?;
        let mut entries = Vec::with_capacity(count.min(reader.remaining() / 16));
        for _ in 0..count {
            entries.push((reader.read_u32("face vertex")?, reader.read_vec3("face offset")?));
        }
        faces.push(Face { name, kind, entries });
    }
    let morphs = faces_to_morphs(&faces)?;

    // 显示枠
    let face_display_count = reader.read_u8("face display count")?;
    let mut morph_items = Vec::with_capacity(face_display_count as usize);
    for _ in 0..face_display_count {
        let face = reader.read_u16("face display")? as i32;
        if face > 0 {
            morph_items.push(LabelItem::Morph(face - 1));
        }
    }
    let display_name_count = reader.read_u8("bone display name count")? as usize;
    let mut display_labels = Vec::with_capacity(display_name_count);
    for _ in 0..display_name_count {
        display_labels.push(Label {
            name: read_name(&mut reader, DISPLAY_NAME_SIZE, "bone display name")?,
            ..Default::default()
        });
    }
    let bone_display_count = read_u32_count(&mut reader, "bone display count")?;
    for _ in 0..bone_display_count {
        let bone = index_from_u16(reader.read_u16("bone display bone")?);
        let frame = reader.read_u8("bone display frame")? as usize;
        match frame.checked_sub(1).and_then(|i| display_labels.get_mut(i)) {
            Some(label) => label.items.push(LabelItem::Bone(bone)),
            None => {
                return Err(MmdError::Index {
                    kind: "bone display frame",
                    index: frame as i64,
                    count: display_name_count,
                })
            }
        }
    }

    let mut model = Model {
        format: ModelFormat::Pmd,
        version,
        encoding: ENCODING,
        additional_uv_count: 0,
        info: ModelInfo::default(),
        vertices,
        indices,
        textures,
        materials,
        bones,
        morphs,
        labels: Vec::new(),
        rigid_bodies: Vec::new(),
        joints: Vec::new(),
        soft_body_data: Vec::new(),
        toon_textures: default_toon_names(),
    };

    // 以下扩展段均可省略（仅在段边界处结束）
    if !reader.is_eof() {
        if reader.read_u8("english flag")? != 0 {
            info.english_name = read_name(&mut reader, NAME_SIZE, "english name")?;
            info.english_comment = read_name(&mut reader, COMMENT_SIZE, "english comment")?;
            for bone in &mut model.bones {
                bone.english_name = read_name(&mut reader, NAME_SIZE, "bone english name")?;
            }
            // 表情英文名不含 base
            for i in 0..face_count.saturating_sub(1) {
                let name = read_name(&mut reader, NAME_SIZE, "face english name")?;
                if let Some(morph) = model.morphs.get_mut(i) {
                    morph.english_name = name;
                }
            }
            for label in &mut display_labels {
                label.english_name =
                    read_name(&mut reader, DISPLAY_NAME_SIZE, "bone display english name")?;
            }
        }
    }
    if !reader.is_eof() {
        for name in &mut model.toon_textures {
            *name = read_name(&mut reader, TOON_NAME_SIZE, "toon texture")?;
        }
    }
    if !reader.is_eof() {
        let count = read_u32_count(&mut reader, "rigid body count")?;
        let mut bodies = Vec::with_capacity(count.min(reader.remaining() / 83));
        for _ in 0..count {
            bodies.push(read_rigid_body(&mut reader, &model.bones)?);
        }
        model.rigid_bodies = bodies;
    }
    if !reader.is_eof() {
        let count = read_u32_count(&mut reader, "joint count")?;
        let mut joints = Vec::with_capacity(count.min(reader.remaining() / 124));
        for _ in 0..count {
            joints.push(read_joint(&mut reader)?);
        }
        model.joints = joints;
    }
    if !reader.is_eof() {
        log::warn!("PMD 末尾有 {} 字节未知数据", reader.remaining());
    }

    model.info = info;
    model.labels = build_labels(&model, morph_items, display_labels);
    model.validate()?;

    log::info!(
        "PMD 模型加载完成: {} ({} 顶点, {} 材质, {} 骨骼, {} 表情)",
        model.info.name,
        model.vertices.len(),
        model.materials.len(),
        model.bones.len(),
        model.morphs.len()
    );
    Ok(model)
}

fn intern_texture(textures: &mut Vec<String>, name: &str) -> i32 {
    let index = match textures.iter().position(|t| t == name) {
        Some(index) => index,
        None => {
            textures.push(name.to_string());
            textures.len() - 1
        }
    };
    index as i32
}

fn default_toon_names() -> Vec<String> {
    (1..=TOON_COUNT).map(|i| format!("toon{:02}.bmp", i)).collect()
}

/// base 表情之外的表情转为绝对顶点索引的顶点 Morph
fn faces_to_morphs(faces: &[Face]) -> Result<Vec<MorphData>> {
    let base = match faces.iter().find(|f| f.kind == 0) {
        Some(base) => base,
        None if faces.is_empty() => return Ok(Vec::new()),
        None => return Err(MmdError::Header("face morphs without base".to_string())),
    };
    faces
        .iter()
        .filter(|f| f.kind != 0)
        .map(|face| {
            let offsets = face
                .entries
                .iter()
                .map(|&(index, position)| {
                    let (vertex, _) = base.entries.get(index as usize).ok_or(MmdError::Index {
                        kind: "face base",
                        index: index as i64,
                        count: base.entries.len(),
                    })?;
                    let vertex_index = i32::try_from(*vertex).map_err(|_| MmdError::Index {
                        kind: "face vertex",
                        index: *vertex as i64,
                        count: 0,
                    })?;
                    Ok(VertexOffset {
                        vertex_index,
                        position,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(MorphData {
                name: face.name.clone(),
                english_name: String::new(),
                category: MorphCategory::from_byte(face.kind)?,
                offsets: MorphOffsets::Vertex(offsets),
            })
        })
        .collect()
}

fn build_labels(model: &Model, morph_items: Vec<LabelItem>, display: Vec<Label>) -> Vec<Label> {
    let mut labels = Vec::with_capacity(display.len() + 2);
    labels.push(Label {
        name: ROOT_LABEL.to_string(),
        english_name: ROOT_LABEL.to_string(),
        special: true,
        items: if model.bones.is_empty() {
            Vec::new()
        } else {
            vec![LabelItem::Bone(0)]
        },
    });
    labels.push(Label {
        name: MORPH_LABEL.to_string(),
        english_name: "Exp".to_string(),
        special: true,
        items: morph_items,
    });
    labels.extend(display);
    labels
}

fn read_rigid_body(reader: &mut ByteReader, bones: &[BoneData]) -> Result<RigidBody> {
    let name = read_name(reader, NAME_SIZE, "rigid body name")?;
    let bone_index = index_from_u16(reader.read_u16("rigid body bone")?);
    let group = reader.read_u8("rigid body group")?;
    let group_mask = reader.read_u16("rigid body mask")?;
    let shape = RigidBodyShape::from_byte(reader.read_u8("rigid body shape")?)?;
    let size = reader.read_vec3("rigid body size")?;
    let relative = reader.read_vec3("rigid body position")?;
    let rotation = reader.read_vec3("rigid body rotation")?;
    let mass = reader.read_f32("rigid body mass")?;
    let linear_damping = reader.read_f32("rigid body linear damping")?;
    let angular_damping = reader.read_f32("rigid body angular damping")?;
    let restitution = reader.read_f32("rigid body restitution")?;
    let friction = reader.read_f32("rigid body friction")?;
    let mode = RigidBodyMode::from_byte(reader.read_u8("rigid body mode")?)?;

    Ok(RigidBody {
        name,
        english_name: String::new(),
        bone_index,
        group,
        group_mask,
        shape,
        size,
        position: relative + rigid_anchor(bones, bone_index),
        rotation,
        mass,
        linear_damping,
        angular_damping,
        restitution,
        friction,
        mode,
    })
}

/// PMD 刚体位置相对于关联骨骼（无骨骼时相对于骨骼 0）
fn rigid_anchor(bones: &[BoneData], bone_index: i32) -> Vec3 {
    let index = usize::try_from(bone_index).unwrap_or(0);
    bones.get(index).map_or(Vec3::ZERO, |b| b.origin)
}

fn read_joint(reader: &mut ByteReader) -> Result<Joint> {
    Ok(Joint {
        name: read_name(reader, NAME_SIZE, "joint name")?,
        english_name: String::new(),
        kind: JointKind::Spring6Dof,
        rigid_body_a_index: reader.read_u32("joint rigid body a")? as i32,
        rigid_body_b_index: reader.read_u32("joint rigid body b")? as i32,
        position: reader.read_vec3("joint position")?,
        rotation: reader.read_vec3("joint rotation")?,
        linear_lower: reader.read_vec3("joint linear lower")?,
        linear_upper: reader.read_vec3("joint linear upper")?,
        angular_lower: reader.read_vec3("joint angular lower")?,
        angular_upper: reader.read_vec3("joint angular upper")?,
        linear_spring: reader.read_vec3("joint linear spring")?,
        angular_spring: reader.read_vec3("joint angular spring")?,
    })
}

/// PMD 顶点只支持两根骨骼
fn pmd_weight(weight: &VertexWeight) -> ([i32; 2], f32) {
    match weight {
        VertexWeight::Bdef1 { bone } => ([*bone, *bone], 1.0),
        VertexWeight::Bdef2 { bones, weight } | VertexWeight::Sdef { bones, weight, .. } => {
            (*bones, *weight)
        }
        VertexWeight::Bdef4 { bones, weights } | VertexWeight::Qdef { bones, weights } => {
            let sum = weights[0] + weights[1];
            let w = if sum > 0.0 { weights[0] / sum } else { 1.0 };
            ([bones[0], bones[1]], w)
        }
    }
}

/// 序列化为 PMD
pub(crate) fn save(model: &Model) -> Result<Vec<u8>> {
    let mut writer = ByteWriter::new();
    writer.write_bytes(SIGNATURE);
    writer.write_f32(1.0)?;
    writer.write_fixed_text(&model.info.name, NAME_SIZE, ENCODING)?;
    writer.write_fixed_text(&model.info.comment, COMMENT_SIZE, ENCODING)?;

    let vertex_count = u32::try_from(model.vertices.len())
        .map_err(|_| MmdError::ValueRange("vertex count exceeds u32".to_string()))?;
    writer.write_u32(vertex_count)?;
    for vertex in &model.vertices {
        writer.write_vec3(vertex.position)?;
        writer.write_vec3(vertex.normal)?;
        writer.write_vec2(vertex.uv)?;
        let (bones, weight) = pmd_weight(&vertex.weight);
        writer.write_u16(index_to_u16(bones[0], "vertex bone")?)?;
        writer.write_u16(index_to_u16(bones[1], "vertex bone")?)?;
        writer.write_u8((weight.clamp(0.0, 1.0) * 100.0).round() as u8)?;
        writer.write_u8((vertex.edge_size == 0.0) as u8)?;
    }

    writer.write_u32(model.indices.len() as u32)?;
    for &index in &model.indices {
        let index = u16::try_from(index)
            .map_err(|_| MmdError::ValueRange(format!("face index {} exceeds u16", index)))?;
        writer.write_u16(index)?;
    }

    writer.write_u32(model.materials.len() as u32)?;
    for material in &model.materials {
        writer.write_vec4(material.diffuse)?;
        writer.write_f32(material.shininess)?;
        writer.write_vec3(material.specular)?;
        writer.write_vec3(material.ambient)?;
        writer.write_u8(match material.toon {
            Toon::Shared(index) => index,
            Toon::Texture(_) => 0xFF,
        })?;
        writer.write_u8(material.has_edge() as u8)?;
        writer.write_u32(material.index_count.max(0) as u32)?;
        let texture = texture_name(model, material.texture_index);
        let sphere = match material.sphere_mode {
            SphereMode::Multiply | SphereMode::Add => texture_name(model, material.sphere_texture_index),
            _ => "",
        };
        let name = match (texture.is_empty(), sphere.is_empty()) {
            (false, false) => format!("{}*{}", texture, sphere),
            (false, true) => texture.to_string(),
            (true, _) => sphere.to_string(),
        };
        writer.write_fixed_text(&name, NAME_SIZE, ENCODING)?;
    }

    writer.write_u16(count_to_u16(model.bones.len(), "bone")?)?;
    for bone in &model.bones {
        writer.write_fixed_text(&bone.name, NAME_SIZE, ENCODING)?;
        writer.write_u16(index_to_u16(bone.parent_index, "bone parent")?)?;
        let tail = match bone.destination {
            BoneDestination::Bone(index) => index,
            BoneDestination::Offset(_) => -1,
        };
        writer.write_u16(index_to_u16(tail, "bone tail")?)?;
        writer.write_u8(type_from_flags(bone.flags))?;
        let ik_field = if bone.flags.contains(BoneFlags::INHERENT_ROTATION) {
            bone.inherent.map_or(-1, |i| i.parent_index)
        } else {
            0
        };
        writer.write_u16(index_to_u16(ik_field, "bone ik")?)?;
        writer.write_vec3(bone.origin)?;
    }

    let ik_bones: Vec<(usize, &IkData)> = model
        .bones
        .iter()
        .enumerate()
        .filter_map(|(i, b)| b.ik.as_ref().map(|ik| (i, ik)))
        .collect();
    writer.write_u16(count_to_u16(ik_bones.len(), "ik")?)?;
    for (index, ik) in ik_bones {
        writer.write_u16(index_to_u16(index as i32, "ik bone")?)?;
        writer.write_u16(index_to_u16(ik.effector_index, "ik target")?)?;
        writer.write_u8(count_to_u8(ik.links.len(), "ik chain")?)?;
        let iterations = u16::try_from(ik.iterations).map_err(|_| {
            MmdError::ValueRange(format!("ik iterations {} exceed u16", ik.iterations))
        })?;
        writer.write_u16(iterations)?;
        writer.write_f32(ik.angle_limit / 4.0)?;
        for link in &ik.links {
            writer.write_u16(index_to_u16(link.bone_index, "ik chain")?)?;
        }
    }

    // 表情：仅顶点 Morph，base 按引用顶点重建
    let mut face_index: HashMap<usize, u16> = HashMap::new();
    let vertex_morphs: Vec<(usize, &MorphData, &Vec<VertexOffset>)> = model
        .morphs
        .iter()
        .enumerate()
        .filter_map(|(i, m)| match &m.offsets {
            MorphOffsets::Vertex(offsets) => Some((i, m, offsets)),
            _ => {
                log::warn!("PMD 不支持 Morph '{}' 的类型，已跳过", m.name);
                None
            }
        })
        .collect();
    let mut base: Vec<i32> = vertex_morphs
        .iter()
        .flat_map(|(_, _, offsets)| offsets.iter().map(|o| o.vertex_index))
        .collect();
    base.sort_unstable();
    base.dedup();
    let base_slot: HashMap<i32, u32> = base.iter().enumerate().map(|(i, &v)| (v, i as u32)).collect();

    if vertex_morphs.is_empty() {
        writer.write_u16(0)?;
    } else {
        writer.write_u16(count_to_u16(vertex_morphs.len() + 1, "face")?)?;
        writer.write_fixed_text("base", NAME_SIZE, ENCODING)?;
        writer.write_u32(base.len() as u32)?;
        writer.write_u8(0)?;
        for &vertex in &base {
            let position = usize::try_from(vertex)
                .ok()
                .and_then(|v| model.vertices.get(v))
                .map_or(Vec3::ZERO, |v| v.position);
            writer.write_u32(vertex as u32)?;
            writer.write_vec3(position)?;
        }
        for (slot, (index, morph, offsets)) in vertex_morphs.iter().enumerate() {
            face_index.insert(*index, (slot + 1) as u16);
            writer.write_fixed_text(&morph.name, NAME_SIZE, ENCODING)?;
            writer.write_u32(offsets.len() as u32)?;
            writer.write_u8(match morph.category {
                MorphCategory::Base => MorphCategory::Other.to_byte(),
                other => other.to_byte(),
            })?;
            for offset in offsets.iter() {
                writer.write_u32(base_slot[&offset.vertex_index])?;
                writer.write_vec3(offset.position)?;
            }
        }
    }

    // 显示枠
    let face_display: Vec<u16> = model
        .labels
        .iter()
        .filter(|l| l.special && l.name == MORPH_LABEL)
        .flat_map(|l| l.items.iter())
        .filter_map(|item| match item {
            LabelItem::Morph(i) => usize::try_from(*i).ok().and_then(|i| face_index.get(&i).copied()),
            LabelItem::Bone(_) => None,
        })
        .collect();
    writer.write_u8(count_to_u8(face_display.len(), "face display")?)?;
    for face in face_display {
        writer.write_u16(face)?;
    }

    let display_labels: Vec<&Label> = model.labels.iter().filter(|l| !l.special).collect();
    writer.write_u8(count_to_u8(display_labels.len(), "bone display name")?)?;
    for label in &display_labels {
        writer.write_fixed_text(&label.name, DISPLAY_NAME_SIZE, ENCODING)?;
    }
    let mut bone_display = Vec::new();
    for (frame, label) in display_labels.iter().enumerate() {
        for item in &label.items {
            if let LabelItem::Bone(bone) = item {
                bone_display.push((index_to_u16(*bone, "bone display")?, (frame + 1) as u8));
            }
        }
    }
    writer.write_u32(bone_display.len() as u32)?;
    for (bone, frame) in bone_display {
        writer.write_u16(bone)?;
        writer.write_u8(frame)?;
    }

    // 英文扩展
    writer.write_u8(1)?;
    writer.write_fixed_text(&model.info.english_name, NAME_SIZE, ENCODING)?;
    writer.write_fixed_text(&model.info.english_comment, COMMENT_SIZE, ENCODING)?;
    for bone in &model.bones {
        writer.write_fixed_text(&bone.english_name, NAME_SIZE, ENCODING)?;
    }
    for (_, morph, _) in &vertex_morphs {
        writer.write_fixed_text(&morph.english_name, NAME_SIZE, ENCODING)?;
    }
    for label in &display_labels {
        writer.write_fixed_text(&label.english_name, DISPLAY_NAME_SIZE, ENCODING)?;
    }

    let defaults = default_toon_names();
    for i in 0..TOON_COUNT {
        let name = model.toon_textures.get(i).unwrap_or(&defaults[i]);
        writer.write_fixed_text(name, TOON_NAME_SIZE, ENCODING)?;
    }

    writer.write_u32(model.rigid_bodies.len() as u32)?;
    for body in &model.rigid_bodies {
        writer.write_fixed_text(&body.name, NAME_SIZE, ENCODING)?;
        writer.write_u16(index_to_u16(body.bone_index, "rigid body bone")?)?;
        writer.write_u8(body.group)?;
        writer.write_u16(body.group_mask)?;
        writer.write_u8(body.shape.to_byte())?;
        writer.write_vec3(body.size)?;
        writer.write_vec3(body.position - rigid_anchor(&model.bones, body.bone_index))?;
        writer.write_vec3(body.rotation)?;
        writer.write_f32(body.mass)?;
        writer.write_f32(body.linear_damping)?;
        writer.write_f32(body.angular_damping)?;
        writer.write_f32(body.restitution)?;
        writer.write_f32(body.friction)?;
        writer.write_u8(body.mode.to_byte())?;
    }

    writer.write_u32(model.joints.len() as u32)?;
    for joint in &model.joints {
        writer.write_fixed_text(&joint.name, NAME_SIZE, ENCODING)?;
        writer.write_u32(joint.rigid_body_a_index as u32)?;
        writer.write_u32(joint.rigid_body_b_index as u32)?;
        for v in [
            joint.position,
            joint.rotation,
            joint.linear_lower,
            joint.linear_upper,
            joint.angular_lower,
            joint.angular_upper,
            joint.linear_spring,
            joint.angular_spring,
        ] {
            writer.write_vec3(v)?;
        }
    }

    Ok(writer.into_inner())
}

fn texture_name(model: &Model, index: i32) -> &str {
    usize::try_from(index)
        .ok()
        .and_then(|i| model.textures.get(i))
        .map_or("", |s| s.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec2, Vec4};

    fn legacy_model() -> Model {
        let mut model = Model::new();
        model.format = ModelFormat::Pmd;
        model.encoding = ENCODING;
        model.info.name = "初音ミク".to_string();
        model.info.english_name = "Miku".to_string();
        model.vertices = (0..4)
            .map(|i| Vertex {
                position: Vec3::new(0.0, i as f32, 0.0),
                uv: Vec2::new(0.5, 0.5),
                weight: VertexWeight::Bdef2 {
                    bones: [1, 2],
                    weight: 0.25,
                },
                edge_size: if i == 3 { 0.0 } else { 1.0 },
                ..Default::default()
            })
            .collect();
        model.indices = vec![0, 1, 2, 1, 3, 2];
        model.textures = vec!["body.png".to_string(), "hair.sph".to_string()];
        model.materials = vec![Material {
            diffuse: Vec4::new(1.0, 1.0, 1.0, 0.5),
            texture_index: 0,
            sphere_texture_index: 1,
            sphere_mode: SphereMode::Multiply,
            toon: Toon::Shared(2),
            flags: MaterialFlags::HAS_EDGE,
            index_count: 6,
            ..Default::default()
        }];

        let mut center = BoneData {
            name: "センター".to_string(),
            ..Default::default()
        };
        center.flags |= BoneFlags::MOVABLE;
        let thigh = BoneData {
            name: "左足".to_string(),
            origin: Vec3::new(1.0, 10.0, 0.0),
            parent_index: 0,
            ..Default::default()
        };
        let knee = BoneData {
            name: "左ひざ".to_string(),
            origin: Vec3::new(1.0, 5.0, 0.0),
            parent_index: 1,
            ..Default::default()
        };
        let ankle = BoneData {
            name: "左足首".to_string(),
            origin: Vec3::new(1.0, 1.0, 0.0),
            parent_index: 2,
            flags: BoneFlags::ROTATABLE,
            ..Default::default()
        };
        let ik = BoneData {
            name: "左足ＩＫ".to_string(),
            origin: Vec3::new(1.0, 1.0, 0.0),
            parent_index: 0,
            flags: BoneFlags::IK | BoneFlags::MOVABLE,
            ik: Some(IkData {
                effector_index: 3,
                iterations: 40,
                angle_limit: 2.0,
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
            }),
            ..Default::default()
        };
        let follow = BoneData {
            name: "右目".to_string(),
            parent_index: 0,
            flags: BoneFlags::ROTATABLE | BoneFlags::INHERENT_ROTATION,
            inherent: Some(Inherent {
                parent_index: 1,
                coefficient: 1.0,
            }),
            ..Default::default()
        };
        model.bones = vec![center, thigh, knee, ankle, ik, follow];

        model.morphs = vec![
            MorphData {
                name: "あ".to_string(),
                english_name: "a".to_string(),
                category: MorphCategory::Lip,
                offsets: MorphOffsets::Vertex(vec![
                    VertexOffset {
                        vertex_index: 3,
                        position: Vec3::new(0.0, 0.1, 0.0),
                    },
                    VertexOffset {
                        vertex_index: 1,
                        position: Vec3::new(0.1, 0.0, 0.0),
                    },
                ]),
            },
            MorphData {
                name: "まばたき".to_string(),
                english_name: "blink".to_string(),
                category: MorphCategory::Eye,
                offsets: MorphOffsets::Vertex(vec![VertexOffset {
                    vertex_index: 2,
                    position: Vec3::new(0.0, -0.1, 0.0),
                }]),
            },
        ];
        model.labels = vec![
            Label {
                name: MORPH_LABEL.to_string(),
                special: true,
                items: vec![LabelItem::Morph(1), LabelItem::Morph(0)],
                ..Default::default()
            },
            Label {
                name: "足".to_string(),
                english_name: "Legs".to_string(),
                items: vec![LabelItem::Bone(1), LabelItem::Bone(4)],
                ..Default::default()
            },
        ];
        model.rigid_bodies = vec![RigidBody {
            name: "左足".to_string(),
            bone_index: 1,
            position: Vec3::new(1.0, 8.0, 0.0),
            ..Default::default()
        }];
        model.joints = vec![Joint {
            name: "j".to_string(),
            rigid_body_a_index: 0,
            rigid_body_b_index: 0,
            ..Default::default()
        }];
        model
    }

    #[test]
    fn test_legacy_conversion_is_stable() {
        let first = load(&save(&legacy_model()).unwrap()).unwrap();
        let bytes = save(&first).unwrap();
        let second = load(&bytes).unwrap();
        assert_eq!(first, second);
        assert_eq!(save(&second).unwrap(), bytes);
    }

    #[test]
    fn test_legacy_fields_mapped() {
        let model = load(&save(&legacy_model()).unwrap()).unwrap();
        assert_eq!(model.format, ModelFormat::Pmd);
        assert_eq!(model.info.name, "初音ミク");
        assert_eq!(model.info.english_name, "Miku");

        // 纹理与球面贴图拆分
        let material = &model.materials[0];
        assert_eq!(model.textures, vec!["body.png".to_string(), "hair.sph".to_string()]);
        assert_eq!(material.sphere_mode, SphereMode::Multiply);
        assert!(material.is_double_sided());
        assert!(material.has_edge());
        assert_eq!(material.toon, Toon::Shared(2));

        // IK 角度限制与膝盖限制
        let ik = model.bones[4].ik.as_ref().unwrap();
        assert!((ik.angle_limit - 2.0).abs() < 1e-6);
        assert_eq!(ik.iterations, 40);
        assert_eq!(ik.links[0].limits, Some((KNEE_LOWER, KNEE_UPPER)));
        assert_eq!(ik.links[1].limits, None);

        // 付与
        assert!(model.bones[5].has_inherent_rotation());
        assert_eq!(model.bones[5].inherent_parent_index(), Some(1));

        // 表情顶点索引为绝对索引
        match &model.morphs[0].offsets {
            MorphOffsets::Vertex(offsets) => {
                assert_eq!(offsets[0].vertex_index, 3);
                assert_eq!(offsets[1].vertex_index, 1);
            }
            other => panic!("unexpected offsets {:?}", other),
        }
        assert_eq!(model.morphs[1].category, MorphCategory::Eye);
        assert_eq!(model.morphs[1].english_name, "blink");

        // 显示枠
        assert_eq!(model.labels[0].name, ROOT_LABEL);
        assert_eq!(model.labels[1].items, vec![LabelItem::Morph(1), LabelItem::Morph(0)]);
        assert_eq!(model.labels[2].name, "足");
        assert_eq!(model.labels[2].english_name, "Legs");

        // 刚体位置还原为模型空间
        assert!((model.rigid_bodies[0].position - Vec3::new(1.0, 8.0, 0.0)).length() < 1e-5);
        assert_eq!(model.vertices[3].edge_size, 0.0);
    }

    #[test]
    fn test_truncated_legacy_model() {
        let bytes = save(&legacy_model()).unwrap();
        let model = load(&bytes).unwrap();
        // 英文扩展段之前的部分为必需
        let english = 1
            + NAME_SIZE
            + COMMENT_SIZE
            + NAME_SIZE * model.bones.len()
            + NAME_SIZE * model.morphs.len()
            + DISPLAY_NAME_SIZE * (model.labels.len() - 2);
        let toon = TOON_NAME_SIZE * TOON_COUNT;
        let rigid = 4 + 83 * model.rigid_bodies.len();
        let joint = 4 + 124 * model.joints.len();
        let required = bytes.len() - english - toon - rigid - joint;
        let boundaries = [
            required,
            required + english,
            required + english + toon,
            required + english + toon + rigid,
        ];
        for len in 0..bytes.len() {
            let result = load(&bytes[..len]);
            if boundaries.contains(&len) {
                assert!(result.is_ok(), "section boundary {} rejected", len);
            } else {
                assert!(result.is_err(), "truncated at {} loaded", len);
            }
        }
    }

    #[test]
    fn test_knee_limits_disabled() {
        let bytes = save(&legacy_model()).unwrap();
        let model = load_with(&bytes, false).unwrap();
        assert_eq!(model.bones[4].ik.as_ref().unwrap().links[0].limits, None);
    }
}
