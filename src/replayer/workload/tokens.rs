//! Token tables for the workload document.
//!
//! Every lookup is a static table. Unrecognized tokens are logged and map to an explicit
//! sentinel value so that the caller decides whether the run can continue.

use std::collections::HashMap;
use std::sync::LazyLock;
use ash::vk;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Dimension {
    Unknown,
    Buffer,
    Texture1D,
    Texture2D,
    Texture3D,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ViewDimension {
    Unknown,
    Buffer,
    Texture1D,
    Texture1DArray,
    Texture2D,
    Texture2DArray,
    Texture2DMs,
    Texture2DMsArray,
    Texture3D,
    TextureCube,
    TextureCubeArray,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BufferViewFlags {
    #[default]
    None,
    Raw,
}

/// Decomposed sampler filter token.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SamplerFilter {
    pub min: vk::Filter,
    pub mag: vk::Filter,
    pub mip: vk::SamplerMipmapMode,
    pub anisotropic: bool,
    pub comparison: bool,
    pub reduction: Option<vk::SamplerReductionMode>,
}

/// Texel block footprint of a format as laid out in a staging buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    pub width: u32,
    pub height: u32,
    pub bytes: u32,
}

static FORMATS: LazyLock<HashMap<&'static str, vk::Format>> = LazyLock::new(|| {
    HashMap::from([
        ("UNKNOWN", vk::Format::UNDEFINED),
        ("R32G32B32A32_TYPELESS", vk::Format::R32G32B32A32_UINT),
        ("R32G32B32A32_FLOAT", vk::Format::R32G32B32A32_SFLOAT),
        ("R32G32B32A32_UINT", vk::Format::R32G32B32A32_UINT),
        ("R32G32B32A32_SINT", vk::Format::R32G32B32A32_SINT),
        ("R32G32B32_TYPELESS", vk::Format::R32G32B32_UINT),
        ("R32G32B32_FLOAT", vk::Format::R32G32B32_SFLOAT),
        ("R32G32B32_UINT", vk::Format::R32G32B32_UINT),
        ("R32G32B32_SINT", vk::Format::R32G32B32_SINT),
        ("R16G16B16A16_TYPELESS", vk::Format::R16G16B16A16_UNORM),
        ("R16G16B16A16_FLOAT", vk::Format::R16G16B16A16_SFLOAT),
        ("R16G16B16A16_UNORM", vk::Format::R16G16B16A16_UNORM),
        ("R16G16B16A16_UINT", vk::Format::R16G16B16A16_UINT),
        ("R16G16B16A16_SNORM", vk::Format::R16G16B16A16_SNORM),
        ("R16G16B16A16_SINT", vk::Format::R16G16B16A16_SINT),
        ("R32G32_TYPELESS", vk::Format::R32G32_UINT),
        ("R32G32_FLOAT", vk::Format::R32G32_SFLOAT),
        ("R32G32_UINT", vk::Format::R32G32_UINT),
        ("R32G32_SINT", vk::Format::R32G32_SINT),
        ("R32G8X24_TYPELESS", vk::Format::D32_SFLOAT_S8_UINT),
        ("D32_FLOAT_S8X24_UINT", vk::Format::D32_SFLOAT_S8_UINT),
        ("R32_FLOAT_X8X24_TYPELESS", vk::Format::D32_SFLOAT_S8_UINT),
        ("X32_TYPELESS_G8X24_UINT", vk::Format::D32_SFLOAT_S8_UINT),
        ("R10G10B10A2_TYPELESS", vk::Format::A2B10G10R10_UINT_PACK32),
        ("R10G10B10A2_UNORM", vk::Format::A2B10G10R10_UNORM_PACK32),
        ("R10G10B10A2_UINT", vk::Format::A2B10G10R10_UINT_PACK32),
        ("R11G11B10_FLOAT", vk::Format::B10G11R11_UFLOAT_PACK32),
        ("R8G8B8A8_TYPELESS", vk::Format::R8G8B8A8_UNORM),
        ("R8G8B8A8_UNORM", vk::Format::R8G8B8A8_UNORM),
        ("R8G8B8A8_UNORM_SRGB", vk::Format::R8G8B8A8_SRGB),
        ("R8G8B8A8_UINT", vk::Format::R8G8B8A8_UINT),
        ("R8G8B8A8_SNORM", vk::Format::R8G8B8A8_SNORM),
        ("R8G8B8A8_SINT", vk::Format::R8G8B8A8_SINT),
        ("R16G16_TYPELESS", vk::Format::R16G16_UNORM),
        ("R16G16_FLOAT", vk::Format::R16G16_SFLOAT),
        ("R16G16_UNORM", vk::Format::R16G16_UNORM),
        ("R16G16_UINT", vk::Format::R16G16_UINT),
        ("R16G16_SNORM", vk::Format::R16G16_SNORM),
        ("R16G16_SINT", vk::Format::R16G16_SINT),
        ("R32_TYPELESS", vk::Format::R32_UINT),
        ("D32_FLOAT", vk::Format::D32_SFLOAT),
        ("R32_FLOAT", vk::Format::R32_SFLOAT),
        ("R32_UINT", vk::Format::R32_UINT),
        ("R32_SINT", vk::Format::R32_SINT),
        ("R24G8_TYPELESS", vk::Format::D24_UNORM_S8_UINT),
        ("D24_UNORM_S8_UINT", vk::Format::D24_UNORM_S8_UINT),
        ("R24_UNORM_X8_TYPELESS", vk::Format::D24_UNORM_S8_UINT),
        ("X24_TYPELESS_G8_UINT", vk::Format::D24_UNORM_S8_UINT),
        ("R8G8_TYPELESS", vk::Format::R8G8_UNORM),
        ("R8G8_UNORM", vk::Format::R8G8_UNORM),
        ("R8G8_UINT", vk::Format::R8G8_UINT),
        ("R8G8_SNORM", vk::Format::R8G8_SNORM),
        ("R8G8_SINT", vk::Format::R8G8_SINT),
        ("R16_TYPELESS", vk::Format::R16_UNORM),
        ("R16_FLOAT", vk::Format::R16_SFLOAT),
        ("D16_UNORM", vk::Format::D16_UNORM),
        ("R16_UNORM", vk::Format::R16_UNORM),
        ("R16_UINT", vk::Format::R16_UINT),
        ("R16_SNORM", vk::Format::R16_SNORM),
        ("R16_SINT", vk::Format::R16_SINT),
        ("R8_TYPELESS", vk::Format::R8_UNORM),
        ("R8_UNORM", vk::Format::R8_UNORM),
        ("R8_UINT", vk::Format::R8_UINT),
        ("R8_SNORM", vk::Format::R8_SNORM),
        ("R8_SINT", vk::Format::R8_SINT),
        ("A8_UNORM", vk::Format::R8_UNORM),
        ("R9G9B9E5_SHAREDEXP", vk::Format::E5B9G9R9_UFLOAT_PACK32),
        ("R8G8_B8G8_UNORM", vk::Format::B8G8R8G8_422_UNORM),
        ("G8R8_G8B8_UNORM", vk::Format::G8B8G8R8_422_UNORM),
        ("BC1_TYPELESS", vk::Format::BC1_RGBA_UNORM_BLOCK),
        ("BC1_UNORM", vk::Format::BC1_RGBA_UNORM_BLOCK),
        ("BC1_UNORM_SRGB", vk::Format::BC1_RGBA_SRGB_BLOCK),
        ("BC2_TYPELESS", vk::Format::BC2_UNORM_BLOCK),
        ("BC2_UNORM", vk::Format::BC2_UNORM_BLOCK),
        ("BC2_UNORM_SRGB", vk::Format::BC2_SRGB_BLOCK),
        ("BC3_TYPELESS", vk::Format::BC3_UNORM_BLOCK),
        ("BC3_UNORM", vk::Format::BC3_UNORM_BLOCK),
        ("BC3_UNORM_SRGB", vk::Format::BC3_SRGB_BLOCK),
        ("BC4_TYPELESS", vk::Format::BC4_UNORM_BLOCK),
        ("BC4_UNORM", vk::Format::BC4_UNORM_BLOCK),
        ("BC4_SNORM", vk::Format::BC4_SNORM_BLOCK),
        ("BC5_TYPELESS", vk::Format::BC5_UNORM_BLOCK),
        ("BC5_UNORM", vk::Format::BC5_UNORM_BLOCK),
        ("BC5_SNORM", vk::Format::BC5_SNORM_BLOCK),
        ("B5G6R5_UNORM", vk::Format::R5G6B5_UNORM_PACK16),
        ("B5G5R5A1_UNORM", vk::Format::A1R5G5B5_UNORM_PACK16),
        ("B8G8R8A8_UNORM", vk::Format::B8G8R8A8_UNORM),
        ("B8G8R8X8_UNORM", vk::Format::B8G8R8A8_UNORM),
        ("B8G8R8A8_TYPELESS", vk::Format::B8G8R8A8_UNORM),
        ("B8G8R8A8_UNORM_SRGB", vk::Format::B8G8R8A8_SRGB),
        ("B8G8R8X8_TYPELESS", vk::Format::B8G8R8A8_UNORM),
        ("B8G8R8X8_UNORM_SRGB", vk::Format::B8G8R8A8_SRGB),
        ("BC6H_TYPELESS", vk::Format::BC6H_UFLOAT_BLOCK),
        ("BC6H_UF16", vk::Format::BC6H_UFLOAT_BLOCK),
        ("BC6H_SF16", vk::Format::BC6H_SFLOAT_BLOCK),
        ("BC7_TYPELESS", vk::Format::BC7_UNORM_BLOCK),
        ("BC7_UNORM", vk::Format::BC7_UNORM_BLOCK),
        ("BC7_UNORM_SRGB", vk::Format::BC7_SRGB_BLOCK),
        ("NV12", vk::Format::G8_B8R8_2PLANE_420_UNORM),
        ("P010", vk::Format::G10X6_B10X6R10X6_2PLANE_420_UNORM_3PACK16),
        ("P016", vk::Format::G16_B16R16_2PLANE_420_UNORM),
        ("YUY2", vk::Format::G8B8G8R8_422_UNORM),
        ("Y210", vk::Format::G10X6B10X6G10X6R10X6_422_UNORM_4PACK16),
        ("Y216", vk::Format::G16B16G16R16_422_UNORM),
        ("B4G4R4A4_UNORM", vk::Format::A4R4G4B4_UNORM_PACK16),
        ("A4B4G4R4_UNORM", vk::Format::A4B4G4R4_UNORM_PACK16),
        // Recognized, but nothing in Vulkan corresponds to them.
        ("R1_UNORM", vk::Format::UNDEFINED),
        ("R10G10B10_XR_BIAS_A2_UNORM", vk::Format::UNDEFINED),
        ("AYUV", vk::Format::UNDEFINED),
        ("Y410", vk::Format::UNDEFINED),
        ("Y416", vk::Format::UNDEFINED),
        ("420_OPAQUE", vk::Format::UNDEFINED),
        ("NV11", vk::Format::UNDEFINED),
        ("AI44", vk::Format::UNDEFINED),
        ("IA44", vk::Format::UNDEFINED),
        ("P8", vk::Format::UNDEFINED),
        ("A8P8", vk::Format::UNDEFINED),
        ("P208", vk::Format::UNDEFINED),
        ("V208", vk::Format::UNDEFINED),
        ("V408", vk::Format::UNDEFINED),
    ])
});

static DIMENSIONS: LazyLock<HashMap<&'static str, Dimension>> = LazyLock::new(|| {
    HashMap::from([
        ("BUFFER", Dimension::Buffer),
        ("TEXTURE1D", Dimension::Texture1D),
        ("TEXTURE2D", Dimension::Texture2D),
        ("TEXTURE3D", Dimension::Texture3D),
    ])
});

static SRV_DIMENSIONS: LazyLock<HashMap<&'static str, ViewDimension>> = LazyLock::new(|| {
    HashMap::from([
        ("BUFFER", ViewDimension::Buffer),
        ("TEXTURE1D", ViewDimension::Texture1D),
        ("TEXTURE1DARRAY", ViewDimension::Texture1DArray),
        ("TEXTURE2D", ViewDimension::Texture2D),
        ("TEXTURE2DARRAY", ViewDimension::Texture2DArray),
        ("TEXTURE2DMS", ViewDimension::Texture2DMs),
        ("TEXTURE2DMSARRAY", ViewDimension::Texture2DMsArray),
        ("TEXTURE3D", ViewDimension::Texture3D),
        ("TEXTURECUBE", ViewDimension::TextureCube),
        ("TEXTURECUBEARRAY", ViewDimension::TextureCubeArray),
    ])
});

static UAV_DIMENSIONS: LazyLock<HashMap<&'static str, ViewDimension>> = LazyLock::new(|| {
    HashMap::from([
        ("BUFFER", ViewDimension::Buffer),
        ("TEXTURE1D", ViewDimension::Texture1D),
        ("TEXTURE1DARRAY", ViewDimension::Texture1DArray),
        ("TEXTURE2D", ViewDimension::Texture2D),
        ("TEXTURE2DARRAY", ViewDimension::Texture2DArray),
        ("TEXTURE2DMS", ViewDimension::Texture2DMs),
        ("TEXTURE2DMSARRAY", ViewDimension::Texture2DMsArray),
        ("TEXTURE3D", ViewDimension::Texture3D),
    ])
});

static BUFFER_VIEW_FLAGS: LazyLock<HashMap<&'static str, BufferViewFlags>> = LazyLock::new(|| {
    HashMap::from([
        ("NONE", BufferViewFlags::None),
        ("RAW", BufferViewFlags::Raw),
    ])
});

static ADDRESS_MODES: LazyLock<HashMap<&'static str, vk::SamplerAddressMode>> = LazyLock::new(|| {
    HashMap::from([
        ("CLAMP", vk::SamplerAddressMode::CLAMP_TO_EDGE),
        ("WRAP", vk::SamplerAddressMode::REPEAT),
        ("MIRROR", vk::SamplerAddressMode::MIRRORED_REPEAT),
        ("MIRROR_ONCE", vk::SamplerAddressMode::MIRROR_CLAMP_TO_EDGE),
        ("BORDER", vk::SamplerAddressMode::CLAMP_TO_BORDER),
    ])
});

static COMPARISON_FUNCS: LazyLock<HashMap<&'static str, vk::CompareOp>> = LazyLock::new(|| {
    HashMap::from([
        ("LESS", vk::CompareOp::LESS),
        ("LESS_EQUAL", vk::CompareOp::LESS_OR_EQUAL),
        ("EQUAL", vk::CompareOp::EQUAL),
        ("NOT_EQUAL", vk::CompareOp::NOT_EQUAL),
        ("ALWAYS", vk::CompareOp::ALWAYS),
        ("NEVER", vk::CompareOp::NEVER),
        ("GREATER", vk::CompareOp::GREATER),
        ("GREATER_EQUAL", vk::CompareOp::GREATER_OR_EQUAL),
    ])
});

// Filter tokens are a reduction prefix followed by a base filter. The codes are the
// low bits of the classic filter enumeration: 0x1 mip linear, 0x4 mag linear,
// 0x10 min linear, 0x40 anisotropic.
const FILTER_REDUCTIONS: &[(&str, u32)] = &[
    ("", 0x000),
    ("COMPARISON_", 0x080),
    ("MINIMUM_", 0x100),
    ("MAXIMUM_", 0x180),
];
const FILTER_BASES: &[(&str, u32)] = &[
    ("MIN_MAG_MIP_POINT", 0x00),
    ("MIN_MAG_POINT_MIP_LINEAR", 0x01),
    ("MIN_POINT_MAG_LINEAR_MIP_POINT", 0x04),
    ("MIN_POINT_MAG_MIP_LINEAR", 0x05),
    ("MIN_LINEAR_MAG_MIP_POINT", 0x10),
    ("MIN_LINEAR_MAG_POINT_MIP_LINEAR", 0x11),
    ("MIN_MAG_LINEAR_MIP_POINT", 0x14),
    ("MIN_MAG_MIP_LINEAR", 0x15),
    ("MIN_MAG_ANISOTROPIC_MIP_POINT", 0x54),
    ("ANISOTROPIC", 0x55),
];

static FILTERS: LazyLock<HashMap<String, u32>> = LazyLock::new(|| {
    FILTER_REDUCTIONS
        .iter()
        .flat_map(|(prefix, reduction)| {
            FILTER_BASES
                .iter()
                .map(move |(base, code)| (format!("{}{}", prefix, base), reduction | code))
        })
        .collect()
});

pub fn convert_format(token: &str) -> vk::Format {
    match FORMATS.get(token) {
        Some(&format) => {
            if format == vk::Format::UNDEFINED && token != "UNKNOWN" {
                log::error!("Format \"{}\" has no Vulkan equivalent", token);
            }
            format
        }
        None => {
            log::error!("Unrecognized format \"{}\"", token);
            vk::Format::UNDEFINED
        }
    }
}

pub fn convert_resource_dimension(token: &str) -> Dimension {
    DIMENSIONS.get(token).copied().unwrap_or_else(|| {
        log::error!("Unrecognized resource dimension \"{}\"", token);
        Dimension::Unknown
    })
}

pub fn convert_srv_dimension(token: &str) -> ViewDimension {
    SRV_DIMENSIONS.get(token).copied().unwrap_or_else(|| {
        log::error!("Unrecognized SRV dimension \"{}\"", token);
        ViewDimension::Unknown
    })
}

pub fn convert_uav_dimension(token: &str) -> ViewDimension {
    UAV_DIMENSIONS.get(token).copied().unwrap_or_else(|| {
        log::error!("Unrecognized UAV dimension \"{}\"", token);
        ViewDimension::Unknown
    })
}

pub fn convert_buffer_view_flags(token: &str) -> BufferViewFlags {
    BUFFER_VIEW_FLAGS.get(token).copied().unwrap_or_else(|| {
        log::error!("Unrecognized buffer view flags \"{}\"", token);
        BufferViewFlags::None
    })
}

pub fn convert_address_mode(token: &str) -> vk::SamplerAddressMode {
    ADDRESS_MODES.get(token).copied().unwrap_or_else(|| {
        log::error!("Unrecognized address mode \"{}\"", token);
        vk::SamplerAddressMode::CLAMP_TO_EDGE
    })
}

pub fn convert_comparison_func(token: &str) -> vk::CompareOp {
    COMPARISON_FUNCS.get(token).copied().unwrap_or_else(|| {
        log::error!("Unrecognized comparison func \"{}\"", token);
        vk::CompareOp::ALWAYS
    })
}

pub fn convert_filter(token: &str) -> SamplerFilter {
    let code = FILTERS.get(token).copied().unwrap_or_else(|| {
        log::error!("Unrecognized filter \"{}\"", token);
        0
    });
    decode_filter(code)
}

fn decode_filter(code: u32) -> SamplerFilter {
    let linear = |bit: u32| {
        if code & bit != 0 { vk::Filter::LINEAR } else { vk::Filter::NEAREST }
    };
    let reduction = match code & 0x180 {
        0x100 => Some(vk::SamplerReductionMode::MIN),
        0x180 => Some(vk::SamplerReductionMode::MAX),
        _ => None,
    };

    SamplerFilter {
        min: linear(0x10),
        mag: linear(0x04),
        mip: if code & 0x01 != 0 {
            vk::SamplerMipmapMode::LINEAR
        } else {
            vk::SamplerMipmapMode::NEAREST
        },
        anisotropic: code & 0x40 != 0,
        comparison: code & 0x180 == 0x080,
        reduction,
    }
}

/// Format used for the staging copies of a resource. Depth formats cannot be the target
/// of a plain color copy, so their staging data is laid out as the equivalent color format.
pub fn staging_format(format: vk::Format) -> vk::Format {
    match format {
        vk::Format::D32_SFLOAT
        | vk::Format::D32_SFLOAT_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::X8_D24_UNORM_PACK32 => vk::Format::R32_SFLOAT,
        vk::Format::D16_UNORM | vk::Format::D16_UNORM_S8_UINT => vk::Format::R16_UNORM,
        vk::Format::S8_UINT => vk::Format::R8_UINT,
        _ => format,
    }
}

pub fn is_depth_format(format: vk::Format) -> bool {
    staging_format(format) != format
}

pub fn block_info(format: vk::Format) -> Option<BlockInfo> {
    let (width, height, bytes) = match format {
        vk::Format::UNDEFINED => (1, 1, 1),

        vk::Format::BC1_RGBA_UNORM_BLOCK
        | vk::Format::BC1_RGBA_SRGB_BLOCK
        | vk::Format::BC4_UNORM_BLOCK
        | vk::Format::BC4_SNORM_BLOCK => (4, 4, 8),
        vk::Format::BC2_UNORM_BLOCK
        | vk::Format::BC2_SRGB_BLOCK
        | vk::Format::BC3_UNORM_BLOCK
        | vk::Format::BC3_SRGB_BLOCK
        | vk::Format::BC5_UNORM_BLOCK
        | vk::Format::BC5_SNORM_BLOCK
        | vk::Format::BC6H_UFLOAT_BLOCK
        | vk::Format::BC6H_SFLOAT_BLOCK
        | vk::Format::BC7_UNORM_BLOCK
        | vk::Format::BC7_SRGB_BLOCK => (4, 4, 16),

        vk::Format::R32G32B32A32_SFLOAT
        | vk::Format::R32G32B32A32_UINT
        | vk::Format::R32G32B32A32_SINT => (1, 1, 16),
        vk::Format::R32G32B32_SFLOAT
        | vk::Format::R32G32B32_UINT
        | vk::Format::R32G32B32_SINT => (1, 1, 12),
        vk::Format::R16G16B16A16_SFLOAT
        | vk::Format::R16G16B16A16_UNORM
        | vk::Format::R16G16B16A16_UINT
        | vk::Format::R16G16B16A16_SNORM
        | vk::Format::R16G16B16A16_SINT
        | vk::Format::R32G32_SFLOAT
        | vk::Format::R32G32_UINT
        | vk::Format::R32G32_SINT => (1, 1, 8),
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::R8G8B8A8_UINT
        | vk::Format::R8G8B8A8_SNORM
        | vk::Format::R8G8B8A8_SINT
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::R16G16_SFLOAT
        | vk::Format::R16G16_UNORM
        | vk::Format::R16G16_UINT
        | vk::Format::R16G16_SNORM
        | vk::Format::R16G16_SINT
        | vk::Format::R32_SFLOAT
        | vk::Format::R32_UINT
        | vk::Format::R32_SINT
        | vk::Format::A2B10G10R10_UNORM_PACK32
        | vk::Format::A2B10G10R10_UINT_PACK32
        | vk::Format::B10G11R11_UFLOAT_PACK32
        | vk::Format::E5B9G9R9_UFLOAT_PACK32 => (1, 1, 4),
        vk::Format::B8G8R8G8_422_UNORM | vk::Format::G8B8G8R8_422_UNORM => (2, 1, 4),
        vk::Format::R8G8_UNORM
        | vk::Format::R8G8_UINT
        | vk::Format::R8G8_SNORM
        | vk::Format::R8G8_SINT
        | vk::Format::R16_SFLOAT
        | vk::Format::R16_UNORM
        | vk::Format::R16_UINT
        | vk::Format::R16_SNORM
        | vk::Format::R16_SINT
        | vk::Format::R5G6B5_UNORM_PACK16
        | vk::Format::A1R5G5B5_UNORM_PACK16
        | vk::Format::A4R4G4B4_UNORM_PACK16
        | vk::Format::A4B4G4R4_UNORM_PACK16 => (1, 1, 2),
        vk::Format::R8_UNORM
        | vk::Format::R8_UINT
        | vk::Format::R8_SNORM
        | vk::Format::R8_SINT => (1, 1, 1),
        _ => return None,
    };

    Some(BlockInfo { width, height, bytes })
}
