//! Binders and uploaders that turn scene assets into bindless indices.
//!
//! | Type | Keyed by | Lifetime of handles |
//! |------|----------|---------------------|
//! | [`TextureBinder`] | `ResourceKey` | until evicted |
//! | [`MaterialBinder`] | material content | persistent |
//! | [`GeometryUploader`] | `(AssetKey, lod)` | until the asset is evicted |
//! | [`TransformUploader`] | quantized matrix + exact compare | one frame |
//! | [`DrawMetadataEmitter`] | view | one frame |

mod draw_metadata;
mod geometry;
mod material;
mod texture;
mod transform;

pub use draw_metadata::{DrawMetadata, DrawMetadataEmitter, PassMask, ViewId};
pub use geometry::{GeometryHandle, GeometryIndices, GeometryState, GeometryUploader, GeometryUploaderStats};
pub use material::{MaterialBinder, MaterialBinderStats, MaterialConstants, MaterialHandle};
pub use texture::{
    MemoryTextureSource, NoTextureSource, TextureBinder, TextureBinderStats, TextureData,
    TextureLoad, TextureSource,
};
pub use transform::{QUANTIZATION_SCALE, TransformHandle, TransformUploader, quantized_key};
