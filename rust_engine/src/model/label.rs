//! 显示枠

use crate::codec::{ByteReader, ByteWriter, IndexWidth, TextEncoding};
use crate::{MmdError, Result};

/// 显示枠元素
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LabelItem {
    Bone(i32),
    Morph(i32),
}

/// 显示枠（Root / 表情 为特殊枠）
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Label {
    pub name: String,
    pub english_name: String,
    pub special: bool,
    pub items: Vec<LabelItem>,
}

impl Label {
    pub(crate) fn skip_pmx(
        reader: &mut ByteReader,
        bone_width: IndexWidth,
        morph_width: IndexWidth,
    ) -> Result<()> {
        reader.skip_text("label name")?;
        reader.skip_text("label english name")?;
        reader.skip(1, "label special")?;
        let count = reader.read_count("label item count")?;
        for _ in 0..count {
            let width = match reader.read_u8("label item type")? {
                0 => bone_width,
                1 => morph_width,
                other => return Err(MmdError::Header(format!("unknown label item type {}", other))),
            };
            reader.skip(width.bytes(), "label item")?;
        }
        Ok(())
    }

    pub(crate) fn read_pmx(
        reader: &mut ByteReader,
        encoding: TextEncoding,
        bone_width: IndexWidth,
        morph_width: IndexWidth,
    ) -> Result<Self> {
        let name = reader.read_text(encoding, "label name")?;
        let english_name = reader.read_text(encoding, "label english name")?;
        let special = reader.read_u8("label special")? != 0;
        let count = reader.read_count("label item count")?;
        let mut items = Vec::with_capacity(count.min(reader.remaining()));
        for _ in 0..count {
            let item = match reader.read_u8("label item type")? {
                0 => LabelItem::Bone(reader.read_index(bone_width, "label bone")?),
                1 => LabelItem::Morph(reader.read_index(morph_width, "label morph")?),
                other => return Err(MmdError::Header(format!("unknown label item type {}", other))),
            };
            items.push(item);
        }
        Ok(Self {
            name,
            english_name,
            special,
            items,
        })
    }

    pub(crate) fn write_pmx(
        &self,
        writer: &mut ByteWriter,
        encoding: TextEncoding,
        bone_width: IndexWidth,
        morph_width: IndexWidth,
    ) -> Result<()> {
        writer.write_text(&self.name, encoding, "label name")?;
        writer.write_text(&self.english_name, encoding, "label english name")?;
        writer.write_u8(self.special as u8)?;
        writer.write_count(self.items.len(), "label item count")?;
        for item in &self.items {
            match *item {
                LabelItem::Bone(index) => {
                    writer.write_u8(0)?;
                    writer.write_index(bone_width, index, "label bone")?;
                }
                LabelItem::Morph(index) => {
                    writer.write_u8(1)?;
                    writer.write_index(morph_width, index, "label morph")?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_roundtrip() {
        let label = Label {
            name: "表情".to_string(),
            english_name: "Exp".to_string(),
            special: true,
            items: vec![LabelItem::Morph(3), LabelItem::Bone(200)],
        };
        let mut writer = ByteWriter::new();
        label
            .write_pmx(&mut writer, TextEncoding::Utf8, IndexWidth::Two, IndexWidth::One)
            .unwrap();
        let bytes = writer.into_inner();

        let mut skipper = ByteReader::new(&bytes);
        Label::skip_pmx(&mut skipper, IndexWidth::Two, IndexWidth::One).unwrap();
        assert!(skipper.is_eof());

        let mut reader = ByteReader::new(&bytes);
        let decoded =
            Label::read_pmx(&mut reader, TextEncoding::Utf8, IndexWidth::Two, IndexWidth::One).unwrap();
        assert_eq!(decoded, label);
    }
}
