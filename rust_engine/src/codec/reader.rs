//! 带边界检查的二进制读取器

use byteorder::{ByteOrder, LittleEndian};
use glam::{Quat, Vec2, Vec3, Vec4};

use super::{IndexWidth, TextEncoding};
use crate::{MmdError, Result};

/// 字节游标
///
/// 每次读取前检查剩余字节数，越界时返回 `MmdError::Size`，游标不移动。
#[derive(Clone, Debug)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// 当前偏移
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// 剩余字节数
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn is_eof(&self) -> bool {
        self.remaining() == 0
    }

    /// 取出 n 个字节
    fn take(&mut self, n: usize, context: &'static str) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(MmdError::Size {
                context,
                offset: self.offset,
                requested: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(slice)
    }

    pub fn read_bytes(&mut self, n: usize, context: &'static str) -> Result<&'a [u8]> {
        self.take(n, context)
    }

    pub fn read_array<const N: usize>(&mut self, context: &'static str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, context)?);
        Ok(out)
    }

    pub fn skip(&mut self, n: usize, context: &'static str) -> Result<()> {
        self.take(n, context).map(|_| ())
    }

    pub fn read_u8(&mut self, context: &'static str) -> Result<u8> {
        Ok(self.take(1, context)?[0])
    }

    pub fn read_i8(&mut self, context: &'static str) -> Result<i8> {
        Ok(self.take(1, context)?[0] as i8)
    }

    pub fn read_u16(&mut self, context: &'static str) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2, context)?))
    }

    pub fn read_i16(&mut self, context: &'static str) -> Result<i16> {
        Ok(LittleEndian::read_i16(self.take(2, context)?))
    }

    pub fn read_u32(&mut self, context: &'static str) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4, context)?))
    }

    pub fn read_i32(&mut self, context: &'static str) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.take(4, context)?))
    }

    pub fn read_u64(&mut self, context: &'static str) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8, context)?))
    }

    pub fn read_f32(&mut self, context: &'static str) -> Result<f32> {
        Ok(LittleEndian::read_f32(self.take(4, context)?))
    }

    pub fn read_vec2(&mut self, context: &'static str) -> Result<Vec2> {
        let bytes = self.take(8, context)?;
        Ok(Vec2::new(
            LittleEndian::read_f32(&bytes[0..4]),
            LittleEndian::read_f32(&bytes[4..8]),
        ))
    }

    pub fn read_vec3(&mut self, context: &'static str) -> Result<Vec3> {
        let mut v = [0f32; 3];
        LittleEndian::read_f32_into(self.take(12, context)?, &mut v);
        Ok(Vec3::from_array(v))
    }

    pub fn read_vec4(&mut self, context: &'static str) -> Result<Vec4> {
        let mut v = [0f32; 4];
        LittleEndian::read_f32_into(self.take(16, context)?, &mut v);
        Ok(Vec4::from_array(v))
    }

    /// 四元数按 x, y, z, w 顺序存储
    pub fn read_quat(&mut self, context: &'static str) -> Result<Quat> {
        let v = self.read_vec4(context)?;
        Ok(Quat::from_xyzw(v.x, v.y, v.z, v.w))
    }

    /// 非负 i32 计数
    pub fn read_count(&mut self, context: &'static str) -> Result<usize> {
        let offset = self.offset;
        let value = self.read_i32(context)?;
        if value < 0 {
            return Err(MmdError::Header(format!(
                "{}: negative count {} at offset {}",
                context, value, offset
            )));
        }
        Ok(value as usize)
    }

    /// 变宽有符号索引（-1 表示无）
    pub fn read_index(&mut self, width: IndexWidth, context: &'static str) -> Result<i32> {
        match width {
            IndexWidth::One => Ok(self.read_i8(context)? as i32),
            IndexWidth::Two => Ok(self.read_i16(context)? as i32),
            IndexWidth::Four => self.read_i32(context),
        }
    }

    /// 变宽无符号索引（顶点索引）
    pub fn read_unsigned_index(&mut self, width: IndexWidth, context: &'static str) -> Result<i32> {
        match width {
            IndexWidth::One => Ok(self.read_u8(context)? as i32),
            IndexWidth::Two => Ok(self.read_u16(context)? as i32),
            IndexWidth::Four => self.read_i32(context),
        }
    }

    /// i32 长度前缀文本
    pub fn read_text(&mut self, encoding: TextEncoding, context: &'static str) -> Result<String> {
        let length = self.read_count(context)?;
        let bytes = self.take(length, context)?;
        encoding.decode(bytes)
    }

    /// 跳过 i32 长度前缀文本（预解析用）
    pub fn skip_text(&mut self, context: &'static str) -> Result<()> {
        let length = self.read_count(context)?;
        self.skip(length, context)
    }

    /// 固定长度、null 结尾的文本
    pub fn read_fixed_text(
        &mut self,
        width: usize,
        encoding: TextEncoding,
        context: &'static str,
    ) -> Result<String> {
        let bytes = self.take(width, context)?;
        Ok(encoding.decode_fixed(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_primitives() {
        let data = [0x01, 0xFF, 0x34, 0x12, 0x00, 0x00, 0x80, 0x3F];
        let mut reader = ByteReader::new(&data);
        assert_eq!(reader.read_u8("a").unwrap(), 1);
        assert_eq!(reader.read_i8("b").unwrap(), -1);
        assert_eq!(reader.read_u16("c").unwrap(), 0x1234);
        assert_eq!(reader.read_f32("d").unwrap(), 1.0);
        assert!(reader.is_eof());
    }

    #[test]
    fn test_overrun_does_not_advance() {
        let data = [0u8; 3];
        let mut reader = ByteReader::new(&data);
        reader.read_u8("a").unwrap();
        match reader.read_u32("field") {
            Err(MmdError::Size { context, offset, requested, remaining }) => {
                assert_eq!(context, "field");
                assert_eq!(offset, 1);
                assert_eq!(requested, 4);
                assert_eq!(remaining, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(reader.offset(), 1);
    }

    #[test]
    fn test_signed_and_unsigned_index() {
        let data = [0xFF, 0xFF, 0xFF, 0xFF];
        let mut reader = ByteReader::new(&data);
        assert_eq!(reader.read_index(IndexWidth::One, "i").unwrap(), -1);
        assert_eq!(reader.read_unsigned_index(IndexWidth::One, "u").unwrap(), 255);
        assert_eq!(reader.read_index(IndexWidth::Two, "i").unwrap(), -1);
    }

    #[test]
    fn test_text_length_overrun() {
        // 长度声明 100，但只有 2 字节
        let data = [100, 0, 0, 0, b'a', 0];
        let mut reader = ByteReader::new(&data);
        assert!(matches!(
            reader.read_text(TextEncoding::Utf8, "name"),
            Err(MmdError::Size { .. })
        ));
    }

    #[test]
    fn test_negative_count_is_header_error() {
        let data = (-5i32).to_le_bytes();
        let mut reader = ByteReader::new(&data);
        assert!(matches!(reader.read_count("count"), Err(MmdError::Header(_))));
    }
}
