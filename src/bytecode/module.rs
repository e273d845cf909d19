use std::io::{Read, Write};

use thiserror::Error;

use crate::ast::SubroutineKind;

pub const MAGIC: &[u8; 4] = b"NSX0";
const TABLE_SENTINEL: u32 = 0xFFFF_FFFF;
const SUB_MARKER: &[u8; 4] = b"SUB\0";
const RTI_MARKER: &[u8; 4] = b"RTI\0";
const IMP_MARKER: &[u8; 4] = b"IMP\0";
const STR_MARKER: &[u8; 4] = b"STR\0";
const HEADER_SIZE: usize = 4 + 8 + 4 * 4;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NsxError {
    #[error("invalid module magic")]
    InvalidMagic,
    #[error("table marker `{0}` not found at its recorded offset")]
    BadMarker(&'static str),
    #[error("table `{0}` is not closed by the end sentinel")]
    MissingSentinel(&'static str),
    #[error("unexpected end of module data")]
    UnexpectedEof,
    #[error("invalid utf-8 in string data")]
    InvalidUtf8,
    #[error("subroutine and runtime-info tables disagree in length")]
    TableMismatch,
    #[error("unknown subroutine kind {0}")]
    UnknownKind(u8),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for NsxError {
    fn from(err: std::io::Error) -> Self {
        NsxError::Io(err.to_string())
    }
}

/// Per-subroutine record. The binary layout splits this across the
/// subroutine offset table and the runtime-info table; both tables share one
/// fixed ordering (chapters, then scenes, then functions), so the in-memory
/// form keeps them joined.
#[derive(Debug, Clone, PartialEq)]
pub struct SubroutineRecord {
    pub kind: SubroutineKind,
    pub name: String,
    /// Code offset relative to the start of the code section.
    pub offset: u32,
    pub dialogue_blocks: Vec<DialogueBlockRecord>,
    pub parameters: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DialogueBlockRecord {
    /// Code offset of the block body, relative to the code section.
    pub offset: u32,
    pub box_name: String,
    pub name: String,
}

/// One compiled `.nsx` module: header, subroutine table, runtime-info table,
/// import table, string heap and code section, in that fixed order.
#[derive(Debug, Clone, PartialEq)]
pub struct NsxModule {
    pub name: String,
    pub mtime: i64,
    pub subroutines: Vec<SubroutineRecord>,
    pub imports: Vec<String>,
    pub strings: Vec<String>,
    pub code: Vec<u8>,
}

impl NsxModule {
    pub fn subroutine_index(&self, name: &str) -> Option<u16> {
        self.subroutines
            .iter()
            .position(|s| s.name == name)
            .map(|i| i as u16)
    }

    pub fn string(&self, token: u16) -> Option<&str> {
        self.strings.get(token as usize).map(String::as_str)
    }

    pub fn import(&self, token: u16) -> Option<&str> {
        self.imports.get(token as usize).map(String::as_str)
    }

    /// Find a dialogue block by name anywhere in the module.
    pub fn dialogue_block(&self, name: &str) -> Option<(u16, &DialogueBlockRecord)> {
        for (index, sub) in self.subroutines.iter().enumerate() {
            if let Some(block) = sub.dialogue_blocks.iter().find(|b| b.name == name) {
                return Some((index as u16, block));
            }
        }
        None
    }

    // ----- encoding ---------------------------------------------------------

    pub fn encode<W: Write>(&self, mut writer: W) -> Result<(), NsxError> {
        let sub_table = self.encode_subroutine_table();
        let rti_table = self.encode_runtime_info_table();
        let imp_table = encode_string_table(IMP_MARKER, &self.imports);
        let str_table = encode_string_table(STR_MARKER, &self.strings);

        let sub_offset = HEADER_SIZE;
        let rti_offset = sub_offset + sub_table.len();
        let imp_offset = rti_offset + rti_table.len();
        let str_offset = imp_offset + imp_table.len();

        writer.write_all(MAGIC)?;
        writer.write_all(&self.mtime.to_le_bytes())?;
        writer.write_all(&(sub_offset as i32).to_le_bytes())?;
        writer.write_all(&(rti_offset as i32).to_le_bytes())?;
        writer.write_all(&(imp_offset as i32).to_le_bytes())?;
        writer.write_all(&(str_offset as i32).to_le_bytes())?;
        writer.write_all(&sub_table)?;
        writer.write_all(&rti_table)?;
        writer.write_all(&imp_table)?;
        writer.write_all(&str_table)?;
        writer.write_all(&self.code)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, NsxError> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }

    fn encode_subroutine_table(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(SUB_MARKER);
        bytes.extend_from_slice(&(self.subroutines.len() as u16).to_le_bytes());
        for sub in &self.subroutines {
            bytes.extend_from_slice(&(sub.offset as i32).to_le_bytes());
        }
        bytes.extend_from_slice(&TABLE_SENTINEL.to_le_bytes());
        bytes
    }

    fn encode_runtime_info_table(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(RTI_MARKER);
        bytes.extend_from_slice(&(self.subroutines.len() as u16).to_le_bytes());
        for sub in &self.subroutines {
            bytes.push(encode_kind(sub.kind));
            encode_str(&mut bytes, &sub.name);
            bytes.extend_from_slice(&(sub.dialogue_blocks.len() as u16).to_le_bytes());
            for block in &sub.dialogue_blocks {
                bytes.extend_from_slice(&(block.offset as i32).to_le_bytes());
                encode_str(&mut bytes, &block.box_name);
                encode_str(&mut bytes, &block.name);
            }
            bytes.extend_from_slice(&(sub.parameters.len() as u16).to_le_bytes());
            for parameter in &sub.parameters {
                encode_str(&mut bytes, parameter);
            }
        }
        bytes.extend_from_slice(&TABLE_SENTINEL.to_le_bytes());
        bytes
    }

    // ----- decoding ---------------------------------------------------------

    pub fn read_from<R: Read>(mut reader: R, name: &str) -> Result<Self, NsxError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::decode(&bytes, name)
    }

    pub fn decode(bytes: &[u8], name: &str) -> Result<Self, NsxError> {
        if bytes.len() < HEADER_SIZE {
            return Err(NsxError::UnexpectedEof);
        }
        if &bytes[0..4] != MAGIC {
            return Err(NsxError::InvalidMagic);
        }
        let mtime = i64::from_le_bytes(bytes[4..12].try_into().unwrap());
        let sub_offset = read_i32_at(bytes, 12)? as usize;
        let rti_offset = read_i32_at(bytes, 16)? as usize;
        let imp_offset = read_i32_at(bytes, 20)? as usize;
        let str_offset = read_i32_at(bytes, 24)? as usize;

        let mut cursor = TableCursor::at(bytes, sub_offset)?;
        cursor.expect_marker(SUB_MARKER, "SUB")?;
        let sub_count = cursor.read_u16()? as usize;
        let mut offsets = Vec::with_capacity(sub_count);
        for _ in 0..sub_count {
            offsets.push(cursor.read_i32()? as u32);
        }
        cursor.expect_sentinel("SUB")?;

        let mut cursor = TableCursor::at(bytes, rti_offset)?;
        cursor.expect_marker(RTI_MARKER, "RTI")?;
        let rti_count = cursor.read_u16()? as usize;
        if rti_count != sub_count {
            return Err(NsxError::TableMismatch);
        }
        let mut subroutines = Vec::with_capacity(sub_count);
        for offset in offsets {
            let kind = decode_kind(cursor.read_u8()?)?;
            let name = cursor.read_str()?;
            let block_count = cursor.read_u16()? as usize;
            let mut dialogue_blocks = Vec::with_capacity(block_count);
            for _ in 0..block_count {
                let block_offset = cursor.read_i32()? as u32;
                let box_name = cursor.read_str()?;
                let block_name = cursor.read_str()?;
                dialogue_blocks.push(DialogueBlockRecord {
                    offset: block_offset,
                    box_name,
                    name: block_name,
                });
            }
            let param_count = cursor.read_u16()? as usize;
            let mut parameters = Vec::with_capacity(param_count);
            for _ in 0..param_count {
                parameters.push(cursor.read_str()?);
            }
            subroutines.push(SubroutineRecord {
                kind,
                name,
                offset,
                dialogue_blocks,
                parameters,
            });
        }
        cursor.expect_sentinel("RTI")?;

        let mut cursor = TableCursor::at(bytes, imp_offset)?;
        let imports = cursor.read_string_table(IMP_MARKER, "IMP")?;
        let mut cursor = TableCursor::at(bytes, str_offset)?;
        let strings = cursor.read_string_table(STR_MARKER, "STR")?;
        let code = bytes[cursor.position()..].to_vec();

        Ok(NsxModule {
            name: name.to_string(),
            mtime,
            subroutines,
            imports,
            strings,
            code,
        })
    }
}

fn encode_kind(kind: SubroutineKind) -> u8 {
    match kind {
        SubroutineKind::Chapter => 0,
        SubroutineKind::Scene => 1,
        SubroutineKind::Function => 2,
    }
}

fn decode_kind(byte: u8) -> Result<SubroutineKind, NsxError> {
    match byte {
        0 => Ok(SubroutineKind::Chapter),
        1 => Ok(SubroutineKind::Scene),
        2 => Ok(SubroutineKind::Function),
        other => Err(NsxError::UnknownKind(other)),
    }
}

fn encode_str(bytes: &mut Vec<u8>, value: &str) {
    let data = value.as_bytes();
    bytes.extend_from_slice(&(data.len() as u16).to_le_bytes());
    bytes.extend_from_slice(data);
}

fn encode_string_table(marker: &[u8; 4], entries: &[String]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(marker);
    bytes.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for entry in entries {
        encode_str(&mut bytes, entry);
    }
    bytes.extend_from_slice(&TABLE_SENTINEL.to_le_bytes());
    bytes
}

fn read_i32_at(bytes: &[u8], at: usize) -> Result<i32, NsxError> {
    let slice = bytes.get(at..at + 4).ok_or(NsxError::UnexpectedEof)?;
    Ok(i32::from_le_bytes(slice.try_into().unwrap()))
}

struct TableCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> TableCursor<'a> {
    fn at(bytes: &'a [u8], pos: usize) -> Result<Self, NsxError> {
        if pos > bytes.len() {
            return Err(NsxError::UnexpectedEof);
        }
        Ok(Self { bytes, pos })
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], NsxError> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + len)
            .ok_or(NsxError::UnexpectedEof)?;
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, NsxError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, NsxError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn read_i32(&mut self) -> Result<i32, NsxError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_str(&mut self) -> Result<String, NsxError> {
        let len = self.read_u16()? as usize;
        let data = self.take(len)?;
        String::from_utf8(data.to_vec()).map_err(|_| NsxError::InvalidUtf8)
    }

    fn expect_marker(&mut self, marker: &[u8; 4], label: &'static str) -> Result<(), NsxError> {
        if self.take(4)? != marker {
            return Err(NsxError::BadMarker(label));
        }
        Ok(())
    }

    fn expect_sentinel(&mut self, label: &'static str) -> Result<(), NsxError> {
        let value = u32::from_le_bytes(self.take(4)?.try_into().unwrap());
        if value != TABLE_SENTINEL {
            return Err(NsxError::MissingSentinel(label));
        }
        Ok(())
    }

    fn read_string_table(
        &mut self,
        marker: &[u8; 4],
        label: &'static str,
    ) -> Result<Vec<String>, NsxError> {
        self.expect_marker(marker, label)?;
        let count = self.read_u16()? as usize;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(self.read_str()?);
        }
        self.expect_sentinel(label)?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_module() -> NsxModule {
        NsxModule {
            name: "boot".to_string(),
            mtime: 1_700_000_000,
            subroutines: vec![
                SubroutineRecord {
                    kind: SubroutineKind::Chapter,
                    name: "main".to_string(),
                    offset: 0,
                    dialogue_blocks: vec![DialogueBlockRecord {
                        offset: 12,
                        box_name: "box01".to_string(),
                        name: "text001".to_string(),
                    }],
                    parameters: Vec::new(),
                },
                SubroutineRecord {
                    kind: SubroutineKind::Function,
                    name: "helper".to_string(),
                    offset: 40,
                    dialogue_blocks: Vec::new(),
                    parameters: vec!["$a".to_string(), "$b".to_string()],
                },
            ],
            imports: vec!["sys".to_string()],
            strings: vec!["hello".to_string(), "world".to_string()],
            code: vec![0, 16, 16],
        }
    }

    #[test]
    fn module_round_trips() {
        let module = sample_module();
        let bytes = module.to_bytes().expect("encode");
        let decoded = NsxModule::decode(&bytes, "boot").expect("decode");
        assert_eq!(module, decoded);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = sample_module().to_bytes().expect("encode");
        bytes[0] = b'X';
        assert_eq!(
            NsxModule::decode(&bytes, "boot"),
            Err(NsxError::InvalidMagic)
        );
    }

    #[test]
    fn rejects_corrupted_sentinel() {
        let module = sample_module();
        let bytes = module.to_bytes().expect("encode");
        // The SUB table sentinel sits right before the RTI marker.
        let rti = bytes
            .windows(4)
            .position(|w| w == RTI_MARKER)
            .expect("rti marker");
        let mut corrupted = bytes.clone();
        corrupted[rti - 1] = 0;
        assert_eq!(
            NsxModule::decode(&corrupted, "boot"),
            Err(NsxError::MissingSentinel("SUB"))
        );
    }

    #[test]
    fn looks_up_dialogue_block_by_name() {
        let module = sample_module();
        let (sub, block) = module.dialogue_block("text001").expect("block");
        assert_eq!(sub, 0);
        assert_eq!(block.offset, 12);
    }
}
