//! GGUF header metadata
//!
//! Only the key/value section is read. Tensor data is never touched, so
//! this is cheap even for multi-gigabyte files. Large arrays (tokenizer
//! vocabularies) are skipped and only their length is kept.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::LoadError;

const GGUF_MAGIC: &[u8; 4] = b"GGUF";
const MIN_VERSION: u32 = 2;
const MAX_VERSION: u32 = 3;

/// Longest string accepted in metadata (keys and values)
const MAX_STRING_LEN: u64 = 16 * 1024 * 1024;

/// A metadata value
#[derive(Debug, Clone, PartialEq)]
pub enum GgufValue {
    UInt(u64),
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    /// Arrays are skipped; only the element count is kept
    Array { len: u64 },
}

impl GgufValue {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            GgufValue::UInt(v) => Some(*v),
            GgufValue::Int(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            GgufValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Parsed GGUF header
#[derive(Debug, Clone)]
pub struct GgufInfo {
    pub version: u32,
    pub tensor_count: u64,
    pub file_size: u64,
    pub metadata: HashMap<String, GgufValue>,
}

impl GgufInfo {
    pub fn get(&self, key: &str) -> Option<&GgufValue> {
        self.metadata.get(key)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(GgufValue::as_u64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(GgufValue::as_str)
    }

    /// `general.architecture`, defaulting to llama
    pub fn architecture(&self) -> &str {
        self.get_str("general.architecture").unwrap_or("llama")
    }

    /// Look up an architecture-scoped key, e.g. `llama.block_count`
    pub fn arch_u64(&self, suffix: &str) -> Option<u64> {
        self.get_u64(&format!("{}.{}", self.architecture(), suffix))
    }
}

/// Read the GGUF header and metadata of a file
pub fn get_gguf_info<P: AsRef<Path>>(path: P) -> Result<GgufInfo, LoadError> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| LoadError::NotFound(format!("{}: {}", path.display(), e)))?;
    let file_size = file
        .metadata()
        .map(|m| m.len())
        .map_err(|e| LoadError::InvalidModel(format!("{}: {}", path.display(), e)))?;

    let mut reader = BufReader::new(file);
    parse(&mut reader, file_size)
        .map_err(|reason| LoadError::InvalidModel(format!("{}: {}", path.display(), reason)))
}

fn parse<R: Read>(reader: &mut R, file_size: u64) -> Result<GgufInfo, String> {
    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|e| format!("truncated header: {}", e))?;
    if &magic != GGUF_MAGIC {
        return Err("not a GGUF file".to_string());
    }

    let version = read_u32(reader)?;
    if !(MIN_VERSION..=MAX_VERSION).contains(&version) {
        return Err(format!(
            "unsupported GGUF version {} (supported: {}-{})",
            version, MIN_VERSION, MAX_VERSION
        ));
    }

    let tensor_count = read_u64(reader)?;
    let kv_count = read_u64(reader)?;

    let mut metadata = HashMap::new();
    for _ in 0..kv_count {
        let key = read_string(reader)?;
        let value_type = read_u32(reader)?;
        let value = read_value(reader, value_type)?;
        metadata.insert(key, value);
    }

    Ok(GgufInfo {
        version,
        tensor_count,
        file_size,
        metadata,
    })
}

fn read_value<R: Read>(reader: &mut R, value_type: u32) -> Result<GgufValue, String> {
    let value = match value_type {
        0 => GgufValue::UInt(read_array::<1, R>(reader)?[0] as u64),
        1 => GgufValue::Int(read_array::<1, R>(reader)?[0] as i8 as i64),
        2 => GgufValue::UInt(u16::from_le_bytes(read_array(reader)?) as u64),
        3 => GgufValue::Int(i16::from_le_bytes(read_array(reader)?) as i64),
        4 => GgufValue::UInt(read_u32(reader)? as u64),
        5 => GgufValue::Int(i32::from_le_bytes(read_array(reader)?) as i64),
        6 => GgufValue::Float(f32::from_le_bytes(read_array(reader)?) as f64),
        7 => GgufValue::Bool(read_array::<1, R>(reader)?[0] != 0),
        8 => GgufValue::String(read_string(reader)?),
        9 => {
            let item_type = read_u32(reader)?;
            let len = read_u64(reader)?;
            for _ in 0..len {
                skip_value(reader, item_type)?;
            }
            GgufValue::Array { len }
        }
        10 => GgufValue::UInt(read_u64(reader)?),
        11 => GgufValue::Int(i64::from_le_bytes(read_array(reader)?)),
        12 => GgufValue::Float(f64::from_le_bytes(read_array(reader)?)),
        other => return Err(format!("unknown metadata value type {}", other)),
    };
    Ok(value)
}

fn skip_value<R: Read>(reader: &mut R, value_type: u32) -> Result<(), String> {
    let width = match value_type {
        0 | 1 | 7 => 1,
        2 | 3 => 2,
        4 | 5 | 6 => 4,
        10 | 11 | 12 => 8,
        8 => read_u64(reader)?,
        9 => {
            let item_type = read_u32(reader)?;
            let len = read_u64(reader)?;
            for _ in 0..len {
                skip_value(reader, item_type)?;
            }
            return Ok(());
        }
        other => return Err(format!("unknown metadata value type {}", other)),
    };
    let skipped = std::io::copy(&mut reader.by_ref().take(width), &mut std::io::sink())
        .map_err(|e| format!("truncated metadata: {}", e))?;
    if skipped != width {
        return Err("truncated metadata".to_string());
    }
    Ok(())
}

fn read_array<const N: usize, R: Read>(reader: &mut R) -> Result<[u8; N], String> {
    let mut buf = [0u8; N];
    reader
        .read_exact(&mut buf)
        .map_err(|e| format!("truncated metadata: {}", e))?;
    Ok(buf)
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32, String> {
    Ok(u32::from_le_bytes(read_array(reader)?))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64, String> {
    Ok(u64::from_le_bytes(read_array(reader)?))
}

fn read_string<R: Read>(reader: &mut R) -> Result<String, String> {
    let len = read_u64(reader)?;
    if len > MAX_STRING_LEN {
        return Err(format!("metadata string of {} bytes is too long", len));
    }
    let mut buf = vec![0u8; len as usize];
    reader
        .read_exact(&mut buf)
        .map_err(|e| format!("truncated metadata: {}", e))?;
    String::from_utf8(buf).map_err(|e| format!("invalid UTF-8 in metadata: {}", e))
}


#[cfg(test)]
mod tests {
    use super::testing::{write_gguf, Value};
    use super::*;

    #[test]
    fn test_reads_scalar_and_skips_arrays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.gguf");
        write_gguf(
            &path,
            &[
                ("general.architecture", Value::Str("qwen2")),
                ("tokenizer.ggml.tokens", Value::StrArray(&["<s>", "</s>", "a"])),
                ("qwen2.block_count", Value::U32(28)),
                ("qwen2.context_length", Value::U32(32768)),
            ],
            1024,
        );

        let info = get_gguf_info(&path).unwrap();
        assert_eq!(info.version, 3);
        assert_eq!(info.architecture(), "qwen2");
        assert_eq!(info.arch_u64("block_count"), Some(28));
        assert_eq!(info.arch_u64("context_length"), Some(32768));
        assert_eq!(
            info.get("tokenizer.ggml.tokens"),
            Some(&GgufValue::Array { len: 3 })
        );
        assert!(info.file_size > 1024);
    }

    #[test]
    fn test_rejects_non_gguf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.gguf");
        std::fs::write(&path, b"NOPE0000").unwrap();
        assert!(matches!(
            get_gguf_info(&path),
            Err(LoadError::InvalidModel(_))
        ));
    }
}
