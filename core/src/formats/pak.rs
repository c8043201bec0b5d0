//! PAK cooked container.
//!
//! ```text
//! +--------------------+ 0
//! | header (24 bytes)  |  magic[16], u32 format_version, u32 content_version
//! +--------------------+
//! | asset descriptors  |
//! +--------------------+ directory_offset
//! | directory entries  |  asset_count x 40 bytes
//! +--------------------+
//! | footer (48 bytes)  |  u64 pak_hash, u64 directory_offset, u64 directory_size,
//! +--------------------+  u64 asset_count, footer_magic[16]
//! ```
//!
//! `pak_hash` is FNV-1a over every byte preceding the footer.

use super::{AssetType, FormatError, magic16};
use crate::hash::fnv1a64;
use crate::io::{MemoryStream, Reader, Stream, Writer};
use crate::types::AssetKey;

pub const PAK_MAGIC: [u8; 16] = magic16(b"OXPAK");
pub const PAK_FOOTER_MAGIC: [u8; 16] = magic16(b"OXPAKEND");
pub const PAK_FORMAT_VERSION: u32 = 1;

pub const HEADER_SIZE: u64 = 24;
pub const FOOTER_SIZE: u64 = 48;
pub const DIRECTORY_ENTRY_SIZE: u64 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PakHeader {
    pub format_version: u32,
    pub content_version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PakFooter {
    pub pak_hash: u64,
    pub directory_offset: u64,
    pub directory_size: u64,
    pub asset_count: u64,
}

/// One fixed-size directory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetDirectoryEntry {
    pub asset_key: AssetKey,
    pub asset_type: AssetType,
    pub descriptor_offset: u64,
    pub descriptor_size: u64,
}

/// A parsed, validated PAK file held in memory.
#[derive(Debug)]
pub struct PakFile {
    data: Vec<u8>,
    header: PakHeader,
    footer: PakFooter,
    directory: Vec<AssetDirectoryEntry>,
}

impl PakFile {
    /// Parses and validates `data`. The directory hash is always checked.
    pub fn parse(data: Vec<u8>) -> Result<Self, FormatError> {
        let len = data.len() as u64;
        if len < HEADER_SIZE + FOOTER_SIZE {
            return Err(FormatError::OutOfBounds {
                what: "pak header/footer",
                offset: 0,
                size: HEADER_SIZE + FOOTER_SIZE,
                len,
            });
        }

        let mut r = Reader::new(MemoryStream::from_bytes(data[..HEADER_SIZE as usize].to_vec()));
        let magic = r.read_bytes(16)?;
        if magic != PAK_MAGIC {
            return Err(FormatError::BadMagic { expected: "OXPAK" });
        }
        let header = PakHeader {
            format_version: r.read()?,
            content_version: r.read()?,
        };
        if header.format_version != PAK_FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion(header.format_version));
        }

        let footer_start = (len - FOOTER_SIZE) as usize;
        let mut r = Reader::new(MemoryStream::from_bytes(data[footer_start..].to_vec()));
        let footer = PakFooter {
            pak_hash: r.read()?,
            directory_offset: r.read()?,
            directory_size: r.read()?,
            asset_count: r.read()?,
        };
        if r.read_bytes(16)? != PAK_FOOTER_MAGIC {
            return Err(FormatError::BadMagic { expected: "OXPAKEND" });
        }

        let computed = fnv1a64(&data[..footer_start]);
        if computed != footer.pak_hash {
            return Err(FormatError::HashMismatch {
                stored: footer.pak_hash,
                computed,
            });
        }

        let dir_end = footer.directory_offset.checked_add(footer.directory_size);
        if footer.directory_offset < HEADER_SIZE || dir_end.is_none_or(|end| end > footer_start as u64) {
            return Err(FormatError::OutOfBounds {
                what: "directory",
                offset: footer.directory_offset,
                size: footer.directory_size,
                len,
            });
        }
        if footer.asset_count.checked_mul(DIRECTORY_ENTRY_SIZE) != Some(footer.directory_size) {
            return Err(FormatError::Malformed(format!(
                "directory size {} does not hold {} entries",
                footer.directory_size, footer.asset_count
            )));
        }

        let dir_start = footer.directory_offset as usize;
        let dir_bytes = data[dir_start..dir_start + footer.directory_size as usize].to_vec();
        let mut r = Reader::new(MemoryStream::from_bytes(dir_bytes));
        let mut directory = Vec::with_capacity(footer.asset_count as usize);
        for _ in 0..footer.asset_count {
            let mut key = [0u8; 16];
            key.copy_from_slice(&r.read_bytes(16)?);
            let asset_type = AssetType::from_u8(r.read()?);
            r.read_bytes(7)?;
            let entry = AssetDirectoryEntry {
                asset_key: AssetKey(key),
                asset_type,
                descriptor_offset: r.read()?,
                descriptor_size: r.read()?,
            };
            let end = entry.descriptor_offset.checked_add(entry.descriptor_size);
            if entry.descriptor_offset < HEADER_SIZE || end.is_none_or(|e| e > footer.directory_offset) {
                return Err(FormatError::OutOfBounds {
                    what: "asset descriptor",
                    offset: entry.descriptor_offset,
                    size: entry.descriptor_size,
                    len,
                });
            }
            directory.push(entry);
        }

        log::debug!(
            "parsed pak: content v{}, {} assets",
            header.content_version,
            directory.len()
        );
        Ok(Self {
            data,
            header,
            footer,
            directory,
        })
    }

    pub fn header(&self) -> &PakHeader {
        &self.header
    }

    pub fn footer(&self) -> &PakFooter {
        &self.footer
    }

    pub fn directory(&self) -> &[AssetDirectoryEntry] {
        &self.directory
    }

    pub fn find(&self, key: &AssetKey) -> Option<&AssetDirectoryEntry> {
        self.directory.iter().find(|e| e.asset_key == *key)
    }

    /// Raw descriptor bytes of an entry from this file's directory.
    pub fn descriptor(&self, entry: &AssetDirectoryEntry) -> &[u8] {
        let start = entry.descriptor_offset as usize;
        &self.data[start..start + entry.descriptor_size as usize]
    }
}

/// Builds PAK files; used by tools and tests.
#[derive(Debug, Default)]
pub struct PakBuilder {
    content_version: u32,
    assets: Vec<(AssetKey, AssetType, Vec<u8>)>,
}

impl PakBuilder {
    pub fn new(content_version: u32) -> Self {
        Self {
            content_version,
            assets: Vec::new(),
        }
    }

    pub fn with_asset(mut self, key: AssetKey, asset_type: AssetType, descriptor: Vec<u8>) -> Self {
        self.assets.push((key, asset_type, descriptor));
        self
    }

    pub fn build(self) -> Result<Vec<u8>, FormatError> {
        let mut w = Writer::new(MemoryStream::new());
        w.write_bytes(&PAK_MAGIC)?;
        w.write(PAK_FORMAT_VERSION)?;
        w.write(self.content_version)?;

        let mut entries = Vec::with_capacity(self.assets.len());
        for (key, asset_type, descriptor) in &self.assets {
            entries.push(AssetDirectoryEntry {
                asset_key: *key,
                asset_type: *asset_type,
                descriptor_offset: w.position(),
                descriptor_size: descriptor.len() as u64,
            });
            w.write_bytes(descriptor)?;
        }

        let directory_offset = w.position();
        for e in &entries {
            w.write_bytes(e.asset_key.as_bytes())?;
            w.write(e.asset_type as u8)?;
            w.write_bytes(&[0u8; 7])?;
            w.write(e.descriptor_offset)?;
            w.write(e.descriptor_size)?;
        }
        let directory_size = w.position() - directory_offset;

        let pak_hash = fnv1a64(w.stream().data());
        w.write(pak_hash)?;
        w.write(directory_offset)?;
        w.write(directory_size)?;
        w.write(entries.len() as u64)?;
        w.write_bytes(&PAK_FOOTER_MAGIC)?;
        let stream = w.into_inner();
        debug_assert_eq!(stream.position(), stream.size());
        Ok(stream.into_inner())
    }
}
