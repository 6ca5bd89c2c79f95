//! 文本编解码
//!
//! PMX 头部声明 UTF-16LE 或 UTF-8，PMD/VMD/VPD 使用 Shift-JIS。

use encoding_rs::{Encoding, SHIFT_JIS, UTF_16LE, UTF_8};

use crate::{MmdError, Result};

/// 文本编码
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextEncoding {
    Utf16Le,
    Utf8,
    ShiftJis,
}

impl TextEncoding {
    /// 从 PMX 头部编码字节创建
    pub fn from_pmx_byte(value: u8) -> Result<Self> {
        match value {
            0 => Ok(TextEncoding::Utf16Le),
            1 => Ok(TextEncoding::Utf8),
            _ => Err(MmdError::Header(format!("unknown PMX text encoding {}", value))),
        }
    }

    /// PMX 头部编码字节
    pub fn to_pmx_byte(self) -> Result<u8> {
        match self {
            TextEncoding::Utf16Le => Ok(0),
            TextEncoding::Utf8 => Ok(1),
            TextEncoding::ShiftJis => Err(MmdError::Encoding(
                "Shift-JIS cannot be declared in a PMX header".to_string(),
            )),
        }
    }

    /// 严格解码，遇到非法字节返回错误
    pub fn decode(self, bytes: &[u8]) -> Result<String> {
        let (decoded, had_errors) = self.encoding().decode_without_bom_handling(bytes);
        if had_errors {
            return Err(MmdError::Encoding(format!(
                "invalid {} sequence in {} bytes",
                self.encoding().name(),
                bytes.len()
            )));
        }
        Ok(decoded.into_owned())
    }

    /// 宽松解码（固定长度名称字段，截断到第一个 null）
    pub fn decode_fixed(self, bytes: &[u8]) -> String {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        let (decoded, _) = self.encoding().decode_without_bom_handling(&bytes[..end]);
        decoded.into_owned()
    }

    /// 编码字符串
    pub fn encode(self, text: &str) -> Result<Vec<u8>> {
        match self {
            // encoding_rs 不提供 UTF-16 编码器
            TextEncoding::Utf16Le => Ok(text
                .encode_utf16()
                .flat_map(|unit| unit.to_le_bytes())
                .collect()),
            TextEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
            TextEncoding::ShiftJis => {
                let (encoded, _, had_errors) = SHIFT_JIS.encode(text);
                if had_errors {
                    return Err(MmdError::Encoding(format!(
                        "'{}' is not representable in Shift-JIS",
                        text
                    )));
                }
                Ok(encoded.into_owned())
            }
        }
    }

    /// 编码到固定长度缓冲区（截断时不拆分多字节字符）
    pub fn encode_fixed(self, text: &str, width: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(width);
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            let encoded = self.encode(ch.encode_utf8(&mut buf))?;
            if out.len() + encoded.len() > width {
                break;
            }
            out.extend_from_slice(&encoded);
        }
        out.resize(width, 0);
        Ok(out)
    }

    fn encoding(self) -> &'static Encoding {
        match self {
            TextEncoding::Utf16Le => UTF_16LE,
            TextEncoding::Utf8 => UTF_8,
            TextEncoding::ShiftJis => SHIFT_JIS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf16_roundtrip() {
        let bytes = TextEncoding::Utf16Le.encode("センター").unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(TextEncoding::Utf16Le.decode(&bytes).unwrap(), "センター");
    }

    #[test]
    fn test_shift_jis_fixed() {
        let bytes = TextEncoding::ShiftJis.encode_fixed("左ひざ", 15).unwrap();
        assert_eq!(bytes.len(), 15);
        assert_eq!(&bytes[6..], &[0u8; 9]);
        assert_eq!(TextEncoding::ShiftJis.decode_fixed(&bytes), "左ひざ");
    }

    #[test]
    fn test_fixed_truncates_on_char_boundary() {
        // 每个假名 2 字节，5 字节只能放下 2 个
        let bytes = TextEncoding::ShiftJis.encode_fixed("あいう", 5).unwrap();
        assert_eq!(TextEncoding::ShiftJis.decode_fixed(&bytes), "あい");
    }

    #[test]
    fn test_invalid_utf16_is_error() {
        // 孤立的高位代理
        let bytes = [0x00, 0xD8];
        assert!(matches!(
            TextEncoding::Utf16Le.decode(&bytes),
            Err(MmdError::Encoding(_))
        ));
    }
}
