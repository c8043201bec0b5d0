//! `OXRF` shader reflection blobs.
//!
//! Little-endian and byte-packed:
//!
//! ```text
//! u32 magic "OXRF" (0x4F585246), u32 version = 1,
//! u8 stage, u8 sm_major, u8 sm_minor, u8 reserved,
//! u16 entry_point_len, bytes entry_point,
//! u32 bound_resources, u32 tg_x, u32 tg_y, u32 tg_z,
//! bound_resources x {
//!     u8 resource_type, u8 bind_kind, u16 space, u32 bind_point,
//!     u32 bind_count, u32 cbv_byte_size, u16 name_len, bytes name
//! }
//! ```

use super::FormatError;
use crate::io::{MemoryStream, Reader, Stream, Writer};

pub const REFLECTION_MAGIC: u32 = 0x4F58_5246;
pub const REFLECTION_VERSION: u32 = 1;

/// Pipeline stage a shader was compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ShaderStage {
    Vertex = 0,
    Hull = 1,
    Domain = 2,
    Geometry = 3,
    Pixel = 4,
    Compute = 5,
    Amplification = 6,
    Mesh = 7,
}

impl ShaderStage {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Vertex,
            1 => Self::Hull,
            2 => Self::Domain,
            3 => Self::Geometry,
            4 => Self::Pixel,
            5 => Self::Compute,
            6 => Self::Amplification,
            7 => Self::Mesh,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BindKind {
    Cbv = 0,
    Srv = 1,
    Uav = 2,
    Sampler = 3,
}

impl BindKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => Self::Cbv,
            1 => Self::Srv,
            2 => Self::Uav,
            3 => Self::Sampler,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundResource {
    /// Backend resource-type code, passed through unchanged.
    pub resource_type: u8,
    pub bind_kind: BindKind,
    pub space: u16,
    pub bind_point: u32,
    pub bind_count: u32,
    /// Zero unless `bind_kind` is [`BindKind::Cbv`].
    pub cbv_byte_size: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderReflection {
    pub stage: ShaderStage,
    pub shader_model: (u8, u8),
    pub entry_point: String,
    pub thread_group_size: [u32; 3],
    pub resources: Vec<BoundResource>,
}

impl ShaderReflection {
    pub fn parse(blob: &[u8]) -> Result<Self, FormatError> {
        let mut r = Reader::new(MemoryStream::from_bytes(blob.to_vec()));
        if r.read::<u32>()? != REFLECTION_MAGIC {
            return Err(FormatError::BadMagic { expected: "OXRF" });
        }
        let version: u32 = r.read()?;
        if version != REFLECTION_VERSION {
            return Err(FormatError::UnsupportedVersion(version));
        }
        let stage_raw: u8 = r.read()?;
        let stage = ShaderStage::from_u8(stage_raw)
            .ok_or_else(|| FormatError::Malformed(format!("unknown shader stage {stage_raw}")))?;
        let sm_major: u8 = r.read()?;
        let sm_minor: u8 = r.read()?;
        let _reserved: u8 = r.read()?;
        let entry_point = read_short_string(&mut r)?;

        let count: u32 = r.read()?;
        let thread_group_size: [u32; 3] = [r.read()?, r.read()?, r.read()?];
        let mut resources = Vec::with_capacity(count.min(256) as usize);
        for _ in 0..count {
            let resource_type: u8 = r.read()?;
            let kind_raw: u8 = r.read()?;
            let bind_kind = BindKind::from_u8(kind_raw)
                .ok_or_else(|| FormatError::Malformed(format!("unknown bind kind {kind_raw}")))?;
            resources.push(BoundResource {
                resource_type,
                bind_kind,
                space: r.read()?,
                bind_point: r.read()?,
                bind_count: r.read()?,
                cbv_byte_size: r.read()?,
                name: read_short_string(&mut r)?,
            });
        }
        if r.remaining() != 0 {
            return Err(FormatError::Malformed(format!("{} trailing bytes", r.remaining())));
        }
        Ok(Self {
            stage,
            shader_model: (sm_major, sm_minor),
            entry_point,
            thread_group_size,
            resources,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FormatError> {
        let mut w = Writer::new(MemoryStream::new());
        w.write(REFLECTION_MAGIC)?;
        w.write(REFLECTION_VERSION)?;
        w.write(self.stage as u8)?;
        w.write(self.shader_model.0)?;
        w.write(self.shader_model.1)?;
        w.write(0u8)?;
        write_short_string(&mut w, &self.entry_point)?;
        w.write(self.resources.len() as u32)?;
        for v in self.thread_group_size {
            w.write(v)?;
        }
        for res in &self.resources {
            w.write(res.resource_type)?;
            w.write(res.bind_kind as u8)?;
            w.write(res.space)?;
            w.write(res.bind_point)?;
            w.write(res.bind_count)?;
            w.write(res.cbv_byte_size)?;
            write_short_string(&mut w, &res.name)?;
        }
        Ok(w.into_inner().into_inner())
    }

    /// Finds a bound resource by name.
    pub fn resource(&self, name: &str) -> Option<&BoundResource> {
        self.resources.iter().find(|r| r.name == name)
    }
}

fn read_short_string<S: Stream>(r: &mut Reader<S>) -> Result<String, FormatError> {
    let len: u16 = r.read()?;
    let bytes = r.read_bytes(len as usize)?;
    String::from_utf8(bytes).map_err(|_| FormatError::Malformed("name is not UTF-8".into()))
}

fn write_short_string<S: Stream>(w: &mut Writer<S>, value: &str) -> Result<(), FormatError> {
    let len = u16::try_from(value.len())
        .map_err(|_| FormatError::Malformed(format!("name of {} bytes too long", value.len())))?;
    w.write(len)?;
    w.write_bytes(value.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ShaderReflection {
        ShaderReflection {
            stage: ShaderStage::Compute,
            shader_model: (6, 6),
            entry_point: "CS".into(),
            thread_group_size: [16, 16, 1],
            resources: vec![BoundResource {
                resource_type: 0,
                bind_kind: BindKind::Cbv,
                space: 0,
                bind_point: 1,
                bind_count: 1,
                cbv_byte_size: 256,
                name: "SceneConstants".into(),
            }],
        }
    }

    #[test]
    fn test_header_layout() {
        let bytes = sample().to_bytes().unwrap();
        assert_eq!(&bytes[0..4], &0x4F58_5246u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(bytes[8], ShaderStage::Compute as u8);
        assert_eq!((bytes[9], bytes[10]), (6, 6));
        assert_eq!(&bytes[12..14], &2u16.to_le_bytes());
        assert_eq!(&bytes[14..16], b"CS");
    }

    #[test]
    fn test_parse_written_blob() {
        let parsed = ShaderReflection::parse(&sample().to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, sample());
        assert_eq!(parsed.resource("SceneConstants").unwrap().cbv_byte_size, 256);
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = sample().to_bytes().unwrap();
        bytes.push(0);
        assert!(matches!(ShaderReflection::parse(&bytes), Err(FormatError::Malformed(_))));
    }
}
