//! View descriptions registered against buffers and textures.

use super::{TextureFormat, ViewType};

/// What a descriptor exposes of its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewDescription {
    /// Structured (`stride > 0`) or typed buffer view.
    Buffer {
        view_type: ViewType,
        format: Option<TextureFormat>,
        first_element: u64,
        element_count: u64,
        stride: u32,
    },
    /// Constant buffer window.
    Constant { offset: u64, size: u32 },
    /// Texture view over a mip range.
    Texture {
        view_type: ViewType,
        format: TextureFormat,
        base_mip: u32,
        mip_count: u32,
    },
}

impl ViewDescription {
    /// Shader-readable structured buffer of `element_count` elements.
    pub fn structured_srv(element_count: u64, stride: u32) -> Self {
        Self::Buffer {
            view_type: ViewType::Srv,
            format: None,
            first_element: 0,
            element_count,
            stride,
        }
    }

    /// Shader-writable structured buffer of `element_count` elements.
    pub fn structured_uav(element_count: u64, stride: u32) -> Self {
        Self::Buffer {
            view_type: ViewType::Uav,
            format: None,
            first_element: 0,
            element_count,
            stride,
        }
    }

    /// Typed buffer SRV (e.g. `R32Uint` index buffers).
    pub fn typed_srv(format: TextureFormat, element_count: u64) -> Self {
        Self::Buffer {
            view_type: ViewType::Srv,
            format: Some(format),
            first_element: 0,
            element_count,
            stride: 0,
        }
    }

    pub fn texture_srv(format: TextureFormat) -> Self {
        Self::Texture {
            view_type: ViewType::Srv,
            format,
            base_mip: 0,
            mip_count: 1,
        }
    }

    pub fn view_type(&self) -> ViewType {
        match self {
            Self::Buffer { view_type, .. } | Self::Texture { view_type, .. } => *view_type,
            Self::Constant { .. } => ViewType::Cbv,
        }
    }

    /// Same view with the element count replaced; other variants unchanged.
    pub fn with_element_count(self, count: u64) -> Self {
        match self {
            Self::Buffer {
                view_type,
                format,
                first_element,
                stride,
                ..
            } => Self::Buffer {
                view_type,
                format,
                first_element,
                element_count: count,
                stride,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_element_count() {
        let view = ViewDescription::structured_srv(8, 80).with_element_count(16);
        assert_eq!(view, ViewDescription::structured_srv(16, 80));
        assert_eq!(view.view_type(), ViewType::Srv);
        let cbv = ViewDescription::Constant { offset: 0, size: 256 };
        assert_eq!(cbv.with_element_count(4), cbv);
    }
}
