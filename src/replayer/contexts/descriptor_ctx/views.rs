use ash::vk;
use crate::replayer::contexts::resource_ctx::resource::ResidencyState;
use crate::replayer::error::ReplayError;
use crate::replayer::workload::tokens::{self, BufferViewFlags, SamplerFilter, ViewDimension};
use crate::replayer::workload::{SamplerDecl, SrvDecl, UavDecl};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ViewKind {
    ShaderResource,
    UnorderedAccess,
    ConstantBuffer,
    /// Counter buffer paired with an unordered-access view.
    Counter,
    Sampler,
}

impl ViewKind {
    /// Residency state a resource must be in while this view is bound.
    pub fn required_state(self) -> Option<ResidencyState> {
        match self {
            Self::ShaderResource | Self::ConstantBuffer => Some(ResidencyState::ShaderRead),
            Self::UnorderedAccess | Self::Counter => Some(ResidencyState::UnorderedAccess),
            Self::Sampler => None,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BufferRange {
    pub first_element: u64,
    /// 0 covers the rest of the buffer.
    pub num_elements: u32,
    pub structure_byte_stride: u32,
    pub raw: bool,
}

impl BufferRange {
    /// Typed views go through a texel buffer, everything else through a storage buffer.
    pub fn is_typed(&self, format: vk::Format) -> bool {
        !self.raw && self.structure_byte_stride == 0 && format != vk::Format::UNDEFINED
    }

    /// Byte offset and size of the range. `None` size means the rest of the buffer.
    pub fn byte_range(&self, format: vk::Format) -> (u64, Option<u64>) {
        let element_size = if self.raw {
            4
        } else if self.structure_byte_stride != 0 {
            self.structure_byte_stride as u64
        } else {
            tokens::block_info(format).map_or(1, |block| block.bytes as u64)
        };
        let size = (self.num_elements != 0).then(|| self.num_elements as u64 * element_size);
        (self.first_element.saturating_mul(element_size), size)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TextureRange {
    pub base_mip: u32,
    /// `None` covers the remaining mips.
    pub mip_count: Option<u32>,
    pub base_layer: u32,
    /// `None` covers the remaining layers.
    pub layer_count: Option<u32>,
    pub plane_slice: u32,
    pub min_lod_clamp: f32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ViewDesc {
    Buffer {
        format: vk::Format,
        range: BufferRange,
    },
    Texture {
        dimension: ViewDimension,
        format: vk::Format,
        range: TextureRange,
    },
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SamplerDesc {
    pub filter: SamplerFilter,
    pub address: [vk::SamplerAddressMode; 3],
    pub compare: vk::CompareOp,
    pub max_anisotropy: f32,
    pub min_lod: f32,
    pub max_lod: f32,
    pub mip_lod_bias: f32,
    pub border_color: [f32; 4],
}

/// A view as handed to the device for installation into a table slot.
pub enum ViewInstall<'a, A> {
    ShaderResource {
        target: &'a A,
        desc: ViewDesc,
    },
    UnorderedAccess {
        target: &'a A,
        desc: ViewDesc,
    },
    ConstantBuffer {
        target: &'a A,
        offset: u64,
        size: u64,
    },
    /// Counter storage of an unordered-access view, 4 bytes at `offset`.
    Counter {
        target: &'a A,
        offset: u64,
    },
    Sampler(SamplerDesc),
}

impl<A> ViewInstall<'_, A> {
    pub fn kind(&self) -> ViewKind {
        match self {
            Self::ShaderResource { .. } => ViewKind::ShaderResource,
            Self::UnorderedAccess { .. } => ViewKind::UnorderedAccess,
            Self::ConstantBuffer { .. } => ViewKind::ConstantBuffer,
            Self::Counter { .. } => ViewKind::Counter,
            Self::Sampler(_) => ViewKind::Sampler,
        }
    }
}

fn view_format(declared: Option<&str>, resource_format: vk::Format) -> vk::Format {
    declared.map_or(resource_format, tokens::convert_format)
}

fn buffer_flags(declared: Option<&str>) -> bool {
    declared.map(tokens::convert_buffer_view_flags) == Some(BufferViewFlags::Raw)
}

pub fn srv_desc(decl: &SrvDecl, resource_format: vk::Format) -> Result<ViewDesc, ReplayError> {
    let context = format!("SRV of \"{}\"", decl.resource);
    let token = decl
        .view_dimension
        .as_deref()
        .ok_or_else(|| ReplayError::missing_field(&context, "ViewDimension"))?;
    let format = view_format(decl.format.as_deref(), resource_format);

    let dimension = tokens::convert_srv_dimension(token);
    let layer_count = match dimension {
        ViewDimension::Unknown => {
            return Err(ReplayError::config(context, format!("unknown view dimension \"{}\"", token)));
        }
        ViewDimension::Buffer => {
            return Ok(ViewDesc::Buffer {
                format,
                range: BufferRange {
                    first_element: decl.first_element,
                    num_elements: decl.num_elements,
                    structure_byte_stride: decl.structure_byte_stride,
                    raw: buffer_flags(decl.flags.as_deref()),
                },
            });
        }
        ViewDimension::TextureCube => Some(6),
        ViewDimension::TextureCubeArray => decl.num_cubes.map(|cubes| cubes.saturating_mul(6)),
        ViewDimension::Texture1D | ViewDimension::Texture2D | ViewDimension::Texture3D
        | ViewDimension::Texture2DMs => Some(1),
        _ => decl.array_size,
    };
    let base_layer = match dimension {
        ViewDimension::TextureCubeArray => decl.first_2d_array_face,
        ViewDimension::Texture1DArray | ViewDimension::Texture2DArray
        | ViewDimension::Texture2DMsArray => decl.first_array_slice,
        _ => 0,
    };

    Ok(ViewDesc::Texture {
        dimension,
        format,
        range: TextureRange {
            base_mip: decl.most_detailed_mip,
            mip_count: decl.mip_levels,
            base_layer,
            layer_count,
            plane_slice: decl.plane_slice,
            min_lod_clamp: decl.min_lod_clamp,
        },
    })
}

pub fn uav_desc(decl: &UavDecl, resource_format: vk::Format) -> Result<ViewDesc, ReplayError> {
    let context = format!("UAV of \"{}\"", decl.resource);
    let token = decl
        .view_dimension
        .as_deref()
        .ok_or_else(|| ReplayError::missing_field(&context, "ViewDimension"))?;
    let format = view_format(decl.format.as_deref(), resource_format);

    let dimension = tokens::convert_uav_dimension(token);
    let (base_layer, layer_count) = match dimension {
        ViewDimension::Unknown => {
            return Err(ReplayError::config(context, format!("unknown view dimension \"{}\"", token)));
        }
        ViewDimension::Buffer => {
            return Ok(ViewDesc::Buffer {
                format,
                range: BufferRange {
                    first_element: decl.first_element,
                    num_elements: decl.num_elements,
                    structure_byte_stride: decl.structure_byte_stride,
                    raw: buffer_flags(decl.flags.as_deref()),
                },
            });
        }
        // Depth slices of a 3D view select a W range rather than array layers.
        ViewDimension::Texture3D => (decl.first_w_slice, decl.w_size),
        ViewDimension::Texture1D | ViewDimension::Texture2D | ViewDimension::Texture2DMs => (0, Some(1)),
        _ => (decl.first_array_slice, decl.array_size),
    };

    Ok(ViewDesc::Texture {
        dimension,
        format,
        range: TextureRange {
            base_mip: decl.mip_slice,
            mip_count: Some(1),
            base_layer,
            layer_count,
            plane_slice: decl.plane_slice,
            min_lod_clamp: 0.0,
        },
    })
}

pub fn sampler_desc(decl: &SamplerDecl) -> SamplerDesc {
    let address = |token: &Option<String>| {
        token
            .as_deref()
            .map_or(vk::SamplerAddressMode::CLAMP_TO_EDGE, tokens::convert_address_mode)
    };

    SamplerDesc {
        filter: tokens::convert_filter(&decl.filter),
        address: [
            address(&decl.address_u),
            address(&decl.address_v),
            address(&decl.address_w),
        ],
        compare: decl
            .comparison_func
            .as_deref()
            .map_or(vk::CompareOp::NEVER, tokens::convert_comparison_func),
        max_anisotropy: decl.max_anisotropy.max(1) as f32,
        min_lod: decl.min_lod,
        max_lod: decl.max_lod,
        mip_lod_bias: decl.mip_lod_bias,
        border_color: decl.border_color,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn srv(json: &str) -> SrvDecl {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn structured_buffer_ranges_use_the_stride() {
        let desc = srv_desc(
            &srv(r#"{ "Resource": "b", "HeapOffset": 0, "ViewDimension": "BUFFER", "FirstElement": 2, "NumElements": 4, "StructureByteStride": 16 }"#),
            vk::Format::UNDEFINED,
        ).unwrap();
        let ViewDesc::Buffer { format, range } = desc else { panic!("expected buffer view") };
        assert!(!range.is_typed(format));
        assert_eq!(range.byte_range(format), (32, Some(64)));
    }

    #[test]
    fn typed_buffer_ranges_use_the_format() {
        let desc = srv_desc(
            &srv(r#"{ "Resource": "b", "HeapOffset": 0, "ViewDimension": "BUFFER", "Format": "R32G32_FLOAT", "FirstElement": 1 }"#),
            vk::Format::UNDEFINED,
        ).unwrap();
        let ViewDesc::Buffer { format, range } = desc else { panic!("expected buffer view") };
        assert!(range.is_typed(format));
        assert_eq!(range.byte_range(format), (8, None));
    }

    #[test]
    fn cube_views_cover_six_faces() {
        let desc = srv_desc(
            &srv(r#"{ "Resource": "t", "HeapOffset": 0, "ViewDimension": "TEXTURECUBEARRAY", "NumCubes": 2, "First2DArrayFace": 6 }"#),
            vk::Format::R8G8B8A8_UNORM,
        ).unwrap();
        let ViewDesc::Texture { range, format, .. } = desc else { panic!("expected texture view") };
        assert_eq!(format, vk::Format::R8G8B8A8_UNORM);
        assert_eq!((range.base_layer, range.layer_count), (6, Some(12)));
        assert_eq!(range.mip_count, None);
    }

    #[test]
    fn missing_or_unknown_dimension_is_a_config_error() {
        let missing = srv_desc(&srv(r#"{ "Resource": "t", "HeapOffset": 0 }"#), vk::Format::UNDEFINED);
        assert!(matches!(missing, Err(ReplayError::Config { .. })));

        let uav: UavDecl = serde_json::from_str(
            r#"{ "Resource": "t", "HeapOffset": 0, "ViewDimension": "TEXTURECUBE" }"#,
        ).unwrap();
        assert!(matches!(uav_desc(&uav, vk::Format::UNDEFINED), Err(ReplayError::Config { .. })));
    }

    #[test]
    fn counters_and_uavs_require_unordered_access() {
        assert_eq!(ViewKind::Counter.required_state(), Some(ResidencyState::UnorderedAccess));
        assert_eq!(ViewKind::ConstantBuffer.required_state(), Some(ResidencyState::ShaderRead));
        assert_eq!(ViewKind::Sampler.required_state(), None);
    }
}
