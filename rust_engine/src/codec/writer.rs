//! 二进制写入器（与 ByteReader 对称）

use byteorder::{LittleEndian, WriteBytesExt};
use glam::{Quat, Vec2, Vec3, Vec4};

use super::{IndexWidth, TextEncoding};
use crate::{MmdError, Result};

/// 小端字节缓冲区写入器
#[derive(Clone, Debug, Default)]
pub struct ByteWriter {
    buffer: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// 写入 n 个 0 字节（保留/填充字段）
    pub fn write_zeros(&mut self, n: usize) {
        self.buffer.resize(self.buffer.len() + n, 0);
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.buffer.write_u8(value)?;
        Ok(())
    }

    pub fn write_i8(&mut self, value: i8) -> Result<()> {
        self.buffer.write_i8(value)?;
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.buffer.write_u16::<LittleEndian>(value)?;
        Ok(())
    }

    pub fn write_i16(&mut self, value: i16) -> Result<()> {
        self.buffer.write_i16::<LittleEndian>(value)?;
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.buffer.write_u32::<LittleEndian>(value)?;
        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.buffer.write_i32::<LittleEndian>(value)?;
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.buffer.write_u64::<LittleEndian>(value)?;
        Ok(())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.buffer.write_f32::<LittleEndian>(value)?;
        Ok(())
    }

    pub fn write_vec2(&mut self, v: Vec2) -> Result<()> {
        self.write_f32(v.x)?;
        self.write_f32(v.y)
    }

    pub fn write_vec3(&mut self, v: Vec3) -> Result<()> {
        for c in v.to_array() {
            self.write_f32(c)?;
        }
        Ok(())
    }

    pub fn write_vec4(&mut self, v: Vec4) -> Result<()> {
        for c in v.to_array() {
            self.write_f32(c)?;
        }
        Ok(())
    }

    pub fn write_quat(&mut self, q: Quat) -> Result<()> {
        self.write_vec4(Vec4::new(q.x, q.y, q.z, q.w))
    }

    /// 非负计数
    pub fn write_count(&mut self, count: usize, context: &'static str) -> Result<()> {
        let value = i32::try_from(count)
            .map_err(|_| MmdError::ValueRange(format!("{}: count {} exceeds i32", context, count)))?;
        self.write_i32(value)
    }

    /// 变宽有符号索引
    pub fn write_index(&mut self, width: IndexWidth, index: i32, context: &'static str) -> Result<()> {
        match width {
            IndexWidth::One => {
                let v = i8::try_from(index).map_err(|_| index_range(context, index, width))?;
                self.write_i8(v)
            }
            IndexWidth::Two => {
                let v = i16::try_from(index).map_err(|_| index_range(context, index, width))?;
                self.write_i16(v)
            }
            IndexWidth::Four => self.write_i32(index),
        }
    }

    /// 变宽无符号索引
    pub fn write_unsigned_index(
        &mut self,
        width: IndexWidth,
        index: i32,
        context: &'static str,
    ) -> Result<()> {
        match width {
            IndexWidth::One => {
                let v = u8::try_from(index).map_err(|_| index_range(context, index, width))?;
                self.write_u8(v)
            }
            IndexWidth::Two => {
                let v = u16::try_from(index).map_err(|_| index_range(context, index, width))?;
                self.write_u16(v)
            }
            IndexWidth::Four => self.write_i32(index),
        }
    }

    /// i32 长度前缀文本
    pub fn write_text(&mut self, text: &str, encoding: TextEncoding, context: &'static str) -> Result<()> {
        let bytes = encoding.encode(text)?;
        self.write_count(bytes.len(), context)?;
        self.write_bytes(&bytes);
        Ok(())
    }

    /// 固定长度文本，不足部分补 0
    pub fn write_fixed_text(&mut self, text: &str, width: usize, encoding: TextEncoding) -> Result<()> {
        let bytes = encoding.encode_fixed(text, width)?;
        self.write_bytes(&bytes);
        Ok(())
    }
}

fn index_range(context: &'static str, index: i32, width: IndexWidth) -> MmdError {
    MmdError::ValueRange(format!(
        "{}: index {} does not fit in {} byte(s)",
        context,
        index,
        width.bytes()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ByteReader;

    #[test]
    fn test_index_widths() {
        let mut writer = ByteWriter::new();
        writer.write_index(IndexWidth::One, -1, "i").unwrap();
        writer.write_index(IndexWidth::Two, 300, "i").unwrap();
        writer.write_unsigned_index(IndexWidth::One, 255, "v").unwrap();
        let bytes = writer.into_inner();
        assert_eq!(bytes, vec![0xFF, 0x2C, 0x01, 0xFF]);

        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.read_index(IndexWidth::One, "i").unwrap(), -1);
        assert_eq!(reader.read_index(IndexWidth::Two, "i").unwrap(), 300);
        assert_eq!(reader.read_unsigned_index(IndexWidth::One, "v").unwrap(), 255);
    }

    #[test]
    fn test_index_overflow_is_error() {
        let mut writer = ByteWriter::new();
        assert!(writer.write_index(IndexWidth::One, 128, "i").is_err());
        assert!(writer.write_unsigned_index(IndexWidth::Two, 70000, "v").is_err());
    }

    #[test]
    fn test_fixed_text_padding() {
        let mut writer = ByteWriter::new();
        writer.write_fixed_text("abc", 6, TextEncoding::ShiftJis).unwrap();
        assert_eq!(writer.into_inner(), b"abc\0\0\0".to_vec());
    }
}
