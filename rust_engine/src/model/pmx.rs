//! PMX 2.0/2.1 编解码
//!
//! 加载分两步：预解析只移动游标并记录各段偏移和数量，
//! 全部大小检查通过后才创建实体对象。

use crate::codec::{ByteReader, ByteWriter, IndexWidth, TextEncoding};
use crate::{MmdError, Result};

use super::morph::MorphWidths;
use super::{
    BoneData, Joint, Label, Material, Model, ModelFormat, ModelInfo, MorphData, RigidBody, Vertex,
};

const SIGNATURE: &[u8; 4] = b"PMX ";
const GLOBALS_COUNT: u8 = 8;

/// 头部全局设置
#[derive(Clone, Copy, Debug)]
struct Globals {
    encoding: TextEncoding,
    additional_uv_count: usize,
    vertex: IndexWidth,
    texture: IndexWidth,
    material: IndexWidth,
    bone: IndexWidth,
    morph: IndexWidth,
    rigid_body: IndexWidth,
}

impl Globals {
    fn morph_widths(&self) -> MorphWidths {
        MorphWidths {
            vertex: self.vertex,
            bone: self.bone,
            material: self.material,
            morph: self.morph,
            rigid_body: self.rigid_body,
        }
    }

    /// 写出时按实体数量重新计算最小宽度
    fn for_model(model: &Model, encoding: TextEncoding) -> Self {
        Self {
            encoding,
            additional_uv_count: model.additional_uv_count,
            vertex: IndexWidth::for_unsigned_count(model.vertices.len()),
            texture: IndexWidth::for_signed_count(model.textures.len()),
            material: IndexWidth::for_signed_count(model.materials.len()),
            bone: IndexWidth::for_signed_count(model.bones.len()),
            morph: IndexWidth::for_signed_count(model.morphs.len()),
            rigid_body: IndexWidth::for_signed_count(model.rigid_bodies.len()),
        }
    }
}

/// 段偏移与数量
#[derive(Clone, Copy, Debug, Default)]
struct Section {
    offset: usize,
    count: usize,
}

/// 预解析结果
#[derive(Clone, Copy, Debug, Default)]
struct Layout {
    vertices: Section,
    faces: Section,
    textures: Section,
    materials: Section,
    bones: Section,
    morphs: Section,
    labels: Section,
    rigid_bodies: Section,
    joints: Section,
    /// 软体数据起点（仅 2.1 且有剩余字节时）
    soft_bodies: Option<usize>,
}

fn read_header(reader: &mut ByteReader) -> Result<(f32, Globals)> {
    let signature = reader.read_array::<4>("pmx signature")?;
    if &signature != SIGNATURE {
        return Err(MmdError::Signature("missing 'PMX ' signature".to_string()));
    }
    let version = reader.read_f32("pmx version")?;
    if !(version == 2.0 || version == 2.1) {
        return Err(MmdError::Header(format!("unsupported PMX version {}", version)));
    }
    let count = reader.read_u8("pmx globals count")?;
    if count < GLOBALS_COUNT {
        return Err(MmdError::Header(format!("PMX globals count {} below 8", count)));
    }
    let globals = reader.read_bytes(count as usize, "pmx globals")?;
    let additional_uv_count = globals[1] as usize;
    if additional_uv_count > 4 {
        return Err(MmdError::Header(format!(
            "additional uv count {} exceeds 4",
            additional_uv_count
        )));
    }
    Ok((
        version,
        Globals {
            encoding: TextEncoding::from_pmx_byte(globals[0])?,
            additional_uv_count,
            vertex: IndexWidth::from_byte(globals[2])?,
            texture: IndexWidth::from_byte(globals[3])?,
            material: IndexWidth::from_byte(globals[4])?,
            bone: IndexWidth::from_byte(globals[5])?,
            morph: IndexWidth::from_byte(globals[6])?,
            rigid_body: IndexWidth::from_byte(globals[7])?,
        },
    ))
}

/// 扫描所有段，只校验大小
fn preparse(reader: &mut ByteReader, version: f32, globals: &Globals) -> Result<Layout> {
    for _ in 0..4 {
        reader.skip_text("model info")?;
    }

    let mut layout = Layout::default();

    layout.vertices = begin_section(reader, "vertex count")?;
    for _ in 0..layout.vertices.count {
        Vertex::skip_pmx(reader, globals.additional_uv_count, globals.bone)?;
    }

    layout.faces = begin_section(reader, "face count")?;
    let face_bytes = layout
        .faces
        .count
        .checked_mul(globals.vertex.bytes())
        .ok_or_else(|| MmdError::Header("face count overflows".to_string()))?;
    reader.skip(face_bytes, "faces")?;

    layout.textures = begin_section(reader, "texture count")?;
    for _ in 0..layout.textures.count {
        reader.skip_text("texture path")?;
    }

    layout.materials = begin_section(reader, "material count")?;
    for _ in 0..layout.materials.count {
        Material::skip_pmx(reader, globals.texture)?;
    }

    layout.bones = begin_section(reader, "bone count")?;
    for _ in 0..layout.bones.count {
        BoneData::skip_pmx(reader, globals.bone)?;
    }

    let morph_widths = globals.morph_widths();
    layout.morphs = begin_section(reader, "morph count")?;
    for _ in 0..layout.morphs.count {
        MorphData::skip_pmx(reader, &morph_widths)?;
    }

    layout.labels = begin_section(reader, "label count")?;
    for _ in 0..layout.labels.count {
        Label::skip_pmx(reader, globals.bone, globals.morph)?;
    }

    layout.rigid_bodies = begin_section(reader, "rigid body count")?;
    for _ in 0..layout.rigid_bodies.count {
        RigidBody::skip_pmx(reader, globals.bone)?;
    }

    layout.joints = begin_section(reader, "joint count")?;
    for _ in 0..layout.joints.count {
        Joint::skip_pmx(reader, globals.rigid_body)?;
    }

    if !reader.is_eof() {
        if version < 2.1 {
            return Err(MmdError::Header(format!(
                "{} trailing bytes after joints",
                reader.remaining()
            )));
        }
        layout.soft_bodies = Some(reader.offset());
    }

    log::debug!("PMX 预解析完成: {:?}", layout);
    Ok(layout)
}

fn begin_section(reader: &mut ByteReader, context: &'static str) -> Result<Section> {
    let offset = reader.offset();
    let count = reader.read_count(context)?;
    Ok(Section { offset, count })
}

/// 进入段：跳过计数字段
fn enter(reader: &mut ByteReader, section: Section) -> Result<()> {
    debug_assert_eq!(reader.offset(), section.offset);
    reader.skip(4, "section count")
}

/// 解析 PMX 字节
pub(crate) fn load(data: &[u8]) -> Result<Model> {
    let mut reader = ByteReader::new(data);
    let (version, globals) = read_header(&mut reader)?;
    let info_offset = reader.offset();
    let layout = preparse(&mut reader, version, &globals)?;

    let mut reader = ByteReader::new(data);
    reader.skip(info_offset, "pmx header")?;
    let encoding = globals.encoding;

    let info = ModelInfo {
        name: reader.read_text(encoding, "model name")?,
        english_name: reader.read_text(encoding, "model english name")?,
        comment: reader.read_text(encoding, "model comment")?,
        english_comment: reader.read_text(encoding, "model english comment")?,
    };

    enter(&mut reader, layout.vertices)?;
    let mut vertices = Vec::with_capacity(layout.vertices.count);
    for _ in 0..layout.vertices.count {
        vertices.push(Vertex::read_pmx(&mut reader, globals.additional_uv_count, globals.bone)?);
    }

    enter(&mut reader, layout.faces)?;
    let mut indices = Vec::with_capacity(layout.faces.count);
    for _ in 0..layout.faces.count {
        let index = reader.read_unsigned_index(globals.vertex, "face vertex")?;
        let index = u32::try_from(index).map_err(|_| MmdError::Index {
            kind: "face vertex",
            index: index as i64,
            count: layout.vertices.count,
        })?;
        indices.push(index);
    }

    enter(&mut reader, layout.textures)?;
    let mut textures = Vec::with_capacity(layout.textures.count);
    for _ in 0..layout.textures.count {
        textures.push(reader.read_text(encoding, "texture path")?);
    }

    enter(&mut reader, layout.materials)?;
    let mut materials = Vec::with_capacity(layout.materials.count);
    for _ in 0..layout.materials.count {
        materials.push(Material::read_pmx(&mut reader, encoding, globals.texture)?);
    }

    enter(&mut reader, layout.bones)?;
    let mut bones = Vec::with_capacity(layout.bones.count);
    for _ in 0..layout.bones.count {
        bones.push(BoneData::read_pmx(&mut reader, encoding, globals.bone)?);
    }

    let morph_widths = globals.morph_widths();
    enter(&mut reader, layout.morphs)?;
    let mut morphs = Vec::with_capacity(layout.morphs.count);
    for _ in 0..layout.morphs.count {
        morphs.push(MorphData::read_pmx(&mut reader, encoding, &morph_widths)?);
    }

    enter(&mut reader, layout.labels)?;
    let mut labels = Vec::with_capacity(layout.labels.count);
    for _ in 0..layout.labels.count {
        labels.push(Label::read_pmx(&mut reader, encoding, globals.bone, globals.morph)?);
    }

    enter(&mut reader, layout.rigid_bodies)?;
    let mut rigid_bodies = Vec::with_capacity(layout.rigid_bodies.count);
    for _ in 0..layout.rigid_bodies.count {
        rigid_bodies.push(RigidBody::read_pmx(&mut reader, encoding, globals.bone)?);
    }

    enter(&mut reader, layout.joints)?;
    let mut joints = Vec::with_capacity(layout.joints.count);
    for _ in 0..layout.joints.count {
        joints.push(Joint::read_pmx(&mut reader, encoding, globals.rigid_body)?);
    }

    let soft_body_data = match layout.soft_bodies {
        Some(_) => {
            let rest = reader.read_bytes(reader.remaining(), "soft body")?;
            log::warn!("PMX 2.1 软体数据未解析，原样保留 {} 字节", rest.len());
            rest.to_vec()
        }
        None => Vec::new(),
    };

    let model = Model {
        format: ModelFormat::Pmx,
        version,
        encoding,
        additional_uv_count: globals.additional_uv_count,
        info,
        vertices,
        indices,
        textures,
        materials,
        bones,
        morphs,
        labels,
        rigid_bodies,
        joints,
        soft_body_data,
        toon_textures: Vec::new(),
    };
    model.validate()?;

    log::info!(
        "PMX 模型加载完成: {} ({} 顶点, {} 材质, {} 骨骼, {} Morph, {} 刚体)",
        model.info.name,
        model.vertices.len(),
        model.materials.len(),
        model.bones.len(),
        model.morphs.len(),
        model.rigid_bodies.len()
    );
    Ok(model)
}

/// 序列化为 PMX
pub(crate) fn save(model: &Model) -> Result<Vec<u8>> {
    let encoding = match model.encoding {
        TextEncoding::ShiftJis => {
            log::debug!("Shift-JIS 模型以 UTF-16LE 写出 PMX");
            TextEncoding::Utf16Le
        }
        other => other,
    };
    let version = if model.version >= 2.1 { 2.1 } else { 2.0 };
    let globals = Globals::for_model(model, encoding);
    let mut writer = ByteWriter::new();

    writer.write_bytes(SIGNATURE);
    writer.write_f32(version)?;
    writer.write_u8(GLOBALS_COUNT)?;
    writer.write_u8(encoding.to_pmx_byte()?)?;
    let uv_count = u8::try_from(model.additional_uv_count)
        .ok()
        .filter(|&n| n <= 4)
        .ok_or_else(|| {
            MmdError::ValueRange(format!(
                "additional uv count {} exceeds 4",
                model.additional_uv_count
            ))
        })?;
    writer.write_u8(uv_count)?;
    for width in [
        globals.vertex,
        globals.texture,
        globals.material,
        globals.bone,
        globals.morph,
        globals.rigid_body,
    ] {
        writer.write_u8(width.bytes() as u8)?;
    }

    writer.write_text(&model.info.name, encoding, "model name")?;
    writer.write_text(&model.info.english_name, encoding, "model english name")?;
    writer.write_text(&model.info.comment, encoding, "model comment")?;
    writer.write_text(&model.info.english_comment, encoding, "model english comment")?;

    writer.write_count(model.vertices.len(), "vertex count")?;
    for vertex in &model.vertices {
        vertex.write_pmx(&mut writer, globals.additional_uv_count, globals.bone)?;
    }

    writer.write_count(model.indices.len(), "face count")?;
    for &index in &model.indices {
        let index = i32::try_from(index)
            .map_err(|_| MmdError::ValueRange(format!("face index {} exceeds i32", index)))?;
        writer.write_unsigned_index(globals.vertex, index, "face vertex")?;
    }

    writer.write_count(model.textures.len(), "texture count")?;
    for texture in &model.textures {
        writer.write_text(texture, encoding, "texture path")?;
    }

    writer.write_count(model.materials.len(), "material count")?;
    for material in &model.materials {
        material.write_pmx(&mut writer, encoding, globals.texture)?;
    }

    writer.write_count(model.bones.len(), "bone count")?;
    for bone in &model.bones {
        bone.write_pmx(&mut writer, encoding, globals.bone)?;
    }

    let morph_widths = globals.morph_widths();
    writer.write_count(model.morphs.len(), "morph count")?;
    for morph in &model.morphs {
        morph.write_pmx(&mut writer, encoding, &morph_widths)?;
    }

    writer.write_count(model.labels.len(), "label count")?;
    for label in &model.labels {
        label.write_pmx(&mut writer, encoding, globals.bone, globals.morph)?;
    }

    writer.write_count(model.rigid_bodies.len(), "rigid body count")?;
    for body in &model.rigid_bodies {
        body.write_pmx(&mut writer, encoding, globals.bone)?;
    }

    writer.write_count(model.joints.len(), "joint count")?;
    for joint in &model.joints {
        joint.write_pmx(&mut writer, encoding, globals.rigid_body)?;
    }

    if version >= 2.1 {
        writer.write_bytes(&model.soft_body_data);
    }
    Ok(writer.into_inner())
}
