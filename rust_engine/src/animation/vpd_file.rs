//! VPD (Vocaloid Pose Data) 文件解析
//!
//! VPD 是 Shift-JIS 编码、CRLF 换行的文本文件，包含骨骼位姿和 Morph 表情数据。
//! Morph 数据是 MMM (MikuMikuMoving) 的扩展，但被广泛支持。
//!
//! 解析器是逐行推进的状态机：
//! 骨骼头 → 位移 → 四元数 → 右括号，Morph 块为 Morph 头 → 权重 → 右括号。

use std::fmt::Write as _;
use std::path::Path;

use glam::{Quat, Vec3};
use thiserror::Error;

use crate::codec::TextEncoding;
use crate::{MmdError, Result};

const HEADER: &str = "Vocaloid Pose Data file";

/// 状态机在某个状态下遇到无法识别的行（行号从 1 开始）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoseStateError {
    #[error("line {line}: expected `BoneN{{name` or `MorphN{{name`")]
    BoneHeader { line: usize },

    #[error("line {line}: expected bone position `x,y,z;`")]
    Position { line: usize },

    #[error("line {line}: expected bone quaternion `x,y,z,w;`")]
    Quaternion { line: usize },

    #[error("line {line}: expected `}}` closing the block")]
    CloseBrace { line: usize },

    #[error("line {line}: expected morph weight `w;`")]
    MorphWeight { line: usize },
}

/// VPD 骨骼数据
#[derive(Clone, Debug, PartialEq)]
pub struct PoseBone {
    pub name: String,
    pub translation: Vec3,
    pub rotation: Quat,
}

/// VPD Morph 数据
#[derive(Clone, Debug, PartialEq)]
pub struct PoseMorph {
    pub name: String,
    pub weight: f32,
}

/// 姿势快照
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pose {
    /// 親ファイル名（如 `miku.osm`）
    pub model_name: String,
    pub bones: Vec<PoseBone>,
    pub morphs: Vec<PoseMorph>,
}

/// 解析状态
#[derive(Clone, Debug)]
enum State {
    BoneHeader,
    Position { name: String },
    Quaternion { name: String, translation: Vec3 },
    BoneClose(PoseBone),
    MorphWeight { name: String },
    MorphClose(PoseMorph),
}

impl State {
    /// 当前状态对应的错误
    fn error(&self, line: usize) -> PoseStateError {
        match self {
            State::BoneHeader => PoseStateError::BoneHeader { line },
            State::Position { .. } => PoseStateError::Position { line },
            State::Quaternion { .. } => PoseStateError::Quaternion { line },
            State::BoneClose(_) | State::MorphClose(_) => PoseStateError::CloseBrace { line },
            State::MorphWeight { .. } => PoseStateError::MorphWeight { line },
        }
    }
}

/// 去掉注释与空白
fn strip(line: &str) -> &str {
    let line = match line.find("//") {
        Some(index) => &line[..index],
        None => line,
    };
    line.trim()
}

/// 解析 `a,b,c;` 形式的浮点数列表
fn parse_floats<const N: usize>(line: &str) -> Option<[f32; N]> {
    let body = line.strip_suffix(';')?;
    let mut values = [0.0f32; N];
    let mut parts = body.split(',');
    for value in &mut values {
        *value = parts.next()?.trim().parse().ok()?;
    }
    parts.next().is_none().then_some(values)
}

/// 解析 `BoneN{name` / `MorphN{name`
fn parse_block_header<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(prefix)?;
    let (index, name) = rest.split_once('{')?;
    if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(name.trim())
}

impl Pose {
    /// 从字节解析
    pub fn load(data: &[u8]) -> Result<Self> {
        let content = TextEncoding::ShiftJis.decode(data)?;
        Self::parse(&content)
    }

    /// 从文件加载
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        let pose = Self::load(&data)?;
        log::info!(
            "VPD 解析完成: {} 个骨骼, {} 个表情",
            pose.bones.len(),
            pose.morphs.len()
        );
        Ok(pose)
    }

    /// 解析已解码的文本
    pub fn parse(content: &str) -> Result<Self> {
        let mut lines = content
            .lines()
            .enumerate()
            .map(|(index, line)| (index + 1, strip(line)))
            .filter(|(_, line)| !line.is_empty());

        match lines.next() {
            Some((_, line)) if line.starts_with(HEADER) => {}
            _ => return Err(MmdError::Signature("missing VPD header".to_string())),
        }
        let model_name = match lines.next() {
            Some((_, line)) => line.trim_end_matches(';').trim().to_string(),
            None => return Err(MmdError::Header("missing VPD model name".to_string())),
        };
        let declared = match lines.next() {
            Some((line_number, line)) => line
                .trim_end_matches(';')
                .trim()
                .parse::<usize>()
                .map_err(|_| {
                    MmdError::Header(format!("line {}: invalid bone count '{}'", line_number, line))
                })?,
            None => return Err(MmdError::Header("missing VPD bone count".to_string())),
        };

        let mut pose = Pose {
            model_name,
            ..Default::default()
        };
        let mut state = State::BoneHeader;
        let mut last_line = 0;
        for (line_number, line) in lines {
            last_line = line_number;
            state = match state {
                State::BoneHeader => {
                    if let Some(name) = parse_block_header(line, "Bone") {
                        State::Position {
                            name: name.to_string(),
                        }
                    } else if let Some(name) = parse_block_header(line, "Morph") {
                        State::MorphWeight {
                            name: name.to_string(),
                        }
                    } else {
                        return Err(PoseStateError::BoneHeader { line: line_number }.into());
                    }
                }
                State::Position { name } => match parse_floats::<3>(line) {
                    Some([x, y, z]) => State::Quaternion {
                        name,
                        translation: Vec3::new(x, y, z),
                    },
                    None => return Err(PoseStateError::Position { line: line_number }.into()),
                },
                State::Quaternion { name, translation } => match parse_floats::<4>(line) {
                    Some([x, y, z, w]) => State::BoneClose(PoseBone {
                        name,
                        translation,
                        rotation: Quat::from_xyzw(x, y, z, w),
                    }),
                    None => return Err(PoseStateError::Quaternion { line: line_number }.into()),
                },
                State::BoneClose(bone) => {
                    if line != "}" {
                        return Err(PoseStateError::CloseBrace { line: line_number }.into());
                    }
                    pose.bones.push(bone);
                    State::BoneHeader
                }
                State::MorphWeight { name } => match parse_floats::<1>(line) {
                    Some([weight]) => State::MorphClose(PoseMorph { name, weight }),
                    None => return Err(PoseStateError::MorphWeight { line: line_number }.into()),
                },
                State::MorphClose(morph) => {
                    if line != "}" {
                        return Err(PoseStateError::CloseBrace { line: line_number }.into());
                    }
                    pose.morphs.push(morph);
                    State::BoneHeader
                }
            };
        }

        // 文件在块中间结束
        if !matches!(state, State::BoneHeader) {
            return Err(state.error(last_line + 1).into());
        }
        if pose.bones.len() != declared {
            return Err(MmdError::Header(format!(
                "VPD declares {} bones but contains {}",
                declared,
                pose.bones.len()
            )));
        }
        Ok(pose)
    }

    /// 序列化为 Shift-JIS 字节
    pub fn save(&self) -> Result<Vec<u8>> {
        TextEncoding::ShiftJis.encode(&self.to_text())
    }

    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path.as_ref(), self.save()?)?;
        Ok(())
    }

    /// 生成 VPD 文本（CRLF）
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        // 写入 String 不会失败
        let _ = write!(out, "{}\r\n\r\n", HEADER);
        let _ = write!(out, "{};\t\t// 親ファイル名\r\n", self.model_name);
        let _ = write!(out, "{};\t\t\t\t// 総ポーズボーン数\r\n\r\n", self.bones.len());
        for (i, bone) in self.bones.iter().enumerate() {
            let t = bone.translation;
            let r = bone.rotation;
            let _ = write!(out, "Bone{}{{{}\r\n", i, bone.name);
            let _ = write!(out, "  {:.6},{:.6},{:.6};\t\t\t\t// trans x,y,z\r\n", t.x, t.y, t.z);
            let _ = write!(
                out,
                "  {:.6},{:.6},{:.6},{:.6};\t\t// Quaternion x,y,z,w\r\n",
                r.x, r.y, r.z, r.w
            );
            out.push_str("}\r\n\r\n");
        }
        for (i, morph) in self.morphs.iter().enumerate() {
            let _ = write!(out, "Morph{}{{{}\r\n", i, morph.name);
            let _ = write!(out, "  {:.6};\t\t\t\t// weight\r\n", morph.weight);
            out.push_str("}\r\n\r\n");
        }
        out
    }

    /// 根据名称查找骨骼
    pub fn find_bone(&self, name: &str) -> Option<&PoseBone> {
        self.bones.iter().find(|bone| bone.name == name)
    }

    /// 获取骨骼数量
    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    /// 获取 Morph 数量
    pub fn morph_count(&self) -> usize {
        self.morphs.len()
    }
}
