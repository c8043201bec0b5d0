//! Index of a loose cooked directory (`container.index.bin`).
//!
//! Assets live in side-car files next to the index; the index maps each
//! asset key to its type and the relative path of its descriptor file.

use super::{AssetType, FormatError, magic16};
use crate::io::{MemoryStream, Reader, Writer};
use crate::types::AssetKey;

pub const LOOSE_INDEX_FILE_NAME: &str = "container.index.bin";
pub const LOOSE_INDEX_MAGIC: [u8; 16] = magic16(b"OXLCIDX");
pub const LOOSE_INDEX_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LooseIndexEntry {
    pub asset_key: AssetKey,
    pub asset_type: AssetType,
    pub descriptor_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LooseCookedIndex {
    pub entries: Vec<LooseIndexEntry>,
}

impl LooseCookedIndex {
    pub fn parse(data: Vec<u8>) -> Result<Self, FormatError> {
        let mut r = Reader::new(MemoryStream::from_bytes(data));
        if r.read_bytes(16)? != LOOSE_INDEX_MAGIC {
            return Err(FormatError::BadMagic { expected: "OXLCIDX" });
        }
        let version: u32 = r.read()?;
        if version != LOOSE_INDEX_VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }
        let count: u32 = r.read()?;
        let mut entries = Vec::with_capacity(count.min(4096) as usize);
        for _ in 0..count {
            let mut key = [0u8; 16];
            key.copy_from_slice(&r.read_bytes(16)?);
            let asset_type = AssetType::from_u8(r.read()?);
            let descriptor_path = r.read_string()?;
            if descriptor_path.is_empty() || descriptor_path.starts_with('/') || descriptor_path.contains("..") {
                return Err(FormatError::Malformed(format!(
                    "descriptor path '{descriptor_path}' must be relative"
                )));
            }
            entries.push(LooseIndexEntry {
                asset_key: AssetKey(key),
                asset_type,
                descriptor_path,
            });
        }
        Ok(Self { entries })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FormatError> {
        let mut w = Writer::new(MemoryStream::new());
        w.write_bytes(&LOOSE_INDEX_MAGIC)?;
        w.write(LOOSE_INDEX_VERSION)?;
        w.write(self.entries.len() as u32)?;
        for e in &self.entries {
            w.write_bytes(e.asset_key.as_bytes())?;
            w.write(e.asset_type as u8)?;
            w.write_string(&e.descriptor_path)?;
        }
        Ok(w.into_inner().into_inner())
    }

    pub fn find(&self, key: &AssetKey) -> Option<&LooseIndexEntry> {
        self.entries.iter().find(|e| e.asset_key == *key)
    }
}
