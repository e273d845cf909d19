use std::collections::HashMap;
use std::io::{Read, Write};

use super::module::NsxError;

/// Prefix marking a variable as engine-owned system state. The check ignores
/// the `$`/`#` sigil the name was declared with.
pub const SYSTEM_PREFIX: &str = "SYSTEM";

/// The global variable table: every variable or flag name referenced by any
/// compiled module, mapped to a stable numeric slot. Written next to the
/// compiled modules as its own binary artifact so every module shares one
/// slot assignment.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GlobalsTable {
    names: Vec<String>,
    index: HashMap<String, u16>,
}

impl GlobalsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Slot already assigned to `name`, if any.
    pub fn slot(&self, name: &str) -> Option<u16> {
        self.index.get(name).copied()
    }

    /// Slot for `name`, assigning the next free one on first sight.
    pub fn get_or_insert(&mut self, name: &str) -> u16 {
        if let Some(slot) = self.index.get(name) {
            return *slot;
        }
        let slot = self.names.len() as u16;
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), slot);
        slot
    }

    pub fn name(&self, slot: u16) -> Option<&str> {
        self.names.get(slot as usize).map(String::as_str)
    }

    pub fn is_system_slot(&self, slot: u16) -> bool {
        self.name(slot).is_some_and(is_system_name)
    }

    pub fn system_slots(&self) -> Vec<u16> {
        (0..self.names.len() as u16)
            .filter(|slot| self.is_system_slot(*slot))
            .collect()
    }

    // ----- binary form ------------------------------------------------------
    //
    // u16 name count, i32 name-offset array (relative to the heap), u16
    // system-variable count, u16 system index array, then the NUL-terminated
    // UTF-8 name heap.

    pub fn encode<W: Write>(&self, mut writer: W) -> Result<(), NsxError> {
        let mut heap = Vec::new();
        let mut offsets = Vec::with_capacity(self.names.len());
        for name in &self.names {
            offsets.push(heap.len() as i32);
            heap.extend_from_slice(name.as_bytes());
            heap.push(0);
        }
        let system = self.system_slots();

        writer.write_all(&(self.names.len() as u16).to_le_bytes())?;
        for offset in offsets {
            writer.write_all(&offset.to_le_bytes())?;
        }
        writer.write_all(&(system.len() as u16).to_le_bytes())?;
        for slot in system {
            writer.write_all(&slot.to_le_bytes())?;
        }
        writer.write_all(&heap)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, NsxError> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        Ok(buf)
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, NsxError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::decode(&bytes)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, NsxError> {
        let mut pos = 0usize;
        let count = read_u16(bytes, &mut pos)? as usize;
        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            offsets.push(read_i32(bytes, &mut pos)? as usize);
        }
        let system_count = read_u16(bytes, &mut pos)? as usize;
        for _ in 0..system_count {
            // The system index array is redundant with the name prefix; it is
            // carried for readers that do not want to scan the heap.
            read_u16(bytes, &mut pos)?;
        }
        let heap = bytes.get(pos..).ok_or(NsxError::UnexpectedEof)?;

        let mut table = GlobalsTable::new();
        for offset in offsets {
            let tail = heap.get(offset..).ok_or(NsxError::UnexpectedEof)?;
            let end = tail
                .iter()
                .position(|b| *b == 0)
                .ok_or(NsxError::UnexpectedEof)?;
            let name =
                std::str::from_utf8(&tail[..end]).map_err(|_| NsxError::InvalidUtf8)?;
            table.get_or_insert(name);
        }
        Ok(table)
    }
}

/// A name is a system variable iff it is prefixed `SYSTEM` after its sigil.
pub fn is_system_name(name: &str) -> bool {
    name.trim_start_matches(['$', '#']).starts_with(SYSTEM_PREFIX)
}

fn read_u16(bytes: &[u8], pos: &mut usize) -> Result<u16, NsxError> {
    let slice = bytes.get(*pos..*pos + 2).ok_or(NsxError::UnexpectedEof)?;
    *pos += 2;
    Ok(u16::from_le_bytes(slice.try_into().unwrap()))
}

fn read_i32(bytes: &[u8], pos: &mut usize) -> Result<i32, NsxError> {
    let slice = bytes.get(*pos..*pos + 4).ok_or(NsxError::UnexpectedEof)?;
    *pos += 4;
    Ok(i32::from_le_bytes(slice.try_into().unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigns_stable_slots() {
        let mut table = GlobalsTable::new();
        let a = table.get_or_insert("$a");
        let b = table.get_or_insert("$b");
        assert_eq!(table.get_or_insert("$a"), a);
        assert_eq!((a, b), (0, 1));
    }

    #[test]
    fn detects_system_names_behind_sigils() {
        assert!(is_system_name("$SYSTEM_title"));
        assert!(is_system_name("#SYSTEM_skip"));
        assert!(!is_system_name("$system_lowercase"));
        assert!(!is_system_name("$savepoint"));
    }

    #[test]
    fn table_round_trips() {
        let mut table = GlobalsTable::new();
        table.get_or_insert("$hero_hp");
        table.get_or_insert("$SYSTEM_volume");
        table.get_or_insert("#seen_intro");
        let bytes = table.to_bytes().expect("encode");
        let decoded = GlobalsTable::decode(&bytes).expect("decode");
        assert_eq!(table, decoded);
        assert_eq!(decoded.system_slots(), vec![1]);
    }
}
