//! 二进制读写基础设施
//!
//! 模型与动作编解码共用的读取器、写入器、文本编码和变宽索引。

mod reader;
mod text;
mod writer;

pub use reader::ByteReader;
pub use text::TextEncoding;
pub use writer::ByteWriter;

use crate::{MmdError, Result};

/// 索引字段宽度（1/2/4 字节）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexWidth {
    One,
    Two,
    Four,
}

impl IndexWidth {
    /// 从头部字节创建
    pub fn from_byte(value: u8) -> Result<Self> {
        match value {
            1 => Ok(IndexWidth::One),
            2 => Ok(IndexWidth::Two),
            4 => Ok(IndexWidth::Four),
            _ => Err(MmdError::Header(format!("invalid index width {}", value))),
        }
    }

    pub fn bytes(self) -> usize {
        match self {
            IndexWidth::One => 1,
            IndexWidth::Two => 2,
            IndexWidth::Four => 4,
        }
    }

    /// 有符号索引宽度：需要容纳 0..count-1 以及 -1
    pub fn for_signed_count(count: usize) -> Self {
        if count <= i8::MAX as usize + 1 {
            IndexWidth::One
        } else if count <= i16::MAX as usize + 1 {
            IndexWidth::Two
        } else {
            IndexWidth::Four
        }
    }

    /// 无符号索引宽度：最大值保留为哨兵
    pub fn for_unsigned_count(count: usize) -> Self {
        if count <= u8::MAX as usize {
            IndexWidth::One
        } else if count <= u16::MAX as usize {
            IndexWidth::Two
        } else {
            IndexWidth::Four
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_width_boundary() {
        assert_eq!(IndexWidth::for_signed_count(0), IndexWidth::One);
        assert_eq!(IndexWidth::for_signed_count(128), IndexWidth::One);
        assert_eq!(IndexWidth::for_signed_count(129), IndexWidth::Two);
        assert_eq!(IndexWidth::for_signed_count(32768), IndexWidth::Two);
        assert_eq!(IndexWidth::for_signed_count(32769), IndexWidth::Four);
    }

    #[test]
    fn test_unsigned_width_boundary() {
        assert_eq!(IndexWidth::for_unsigned_count(255), IndexWidth::One);
        assert_eq!(IndexWidth::for_unsigned_count(256), IndexWidth::Two);
        assert_eq!(IndexWidth::for_unsigned_count(65535), IndexWidth::Two);
        assert_eq!(IndexWidth::for_unsigned_count(65536), IndexWidth::Four);
    }

    #[test]
    fn test_from_byte() {
        assert_eq!(IndexWidth::from_byte(2).unwrap(), IndexWidth::Two);
        assert!(IndexWidth::from_byte(3).is_err());
    }
}
