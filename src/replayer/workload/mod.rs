pub mod layout;
pub mod tokens;

use std::fs;
use std::path::{Path, PathBuf};
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use serde::Deserialize;
use crate::replayer::error::ReplayError;
use crate::replayer::workload::layout::BindingLayout;

/// Resource usage bits of the `Flags` field.
pub const FLAG_RENDER_TARGET: u32 = 0x1;
pub const FLAG_DEPTH_STENCIL: u32 = 0x2;
pub const FLAG_UNORDERED_ACCESS: u32 = 0x4;

#[derive(Debug, Deserialize)]
pub struct WorkloadDocument {
    #[serde(rename = "CS")]
    pub kernel: String,
    #[serde(rename = "RootSignature")]
    pub root_signature: String,
    #[serde(rename = "EntryPoint", default = "default_entry_point")]
    pub entry_point: String,
    #[serde(rename = "Resources")]
    pub resources: Vec<ResourceDecl>,
    #[serde(rename = "SRV", default)]
    pub srvs: Vec<SrvDecl>,
    #[serde(rename = "UAV", default)]
    pub uavs: Vec<UavDecl>,
    #[serde(rename = "CBV", default)]
    pub cbvs: Vec<CbvDecl>,
    #[serde(rename = "Sampler", default)]
    pub samplers: Vec<SamplerDecl>,
    #[serde(rename = "RootParameters")]
    pub root_parameters: Vec<RootParameterDecl>,
    #[serde(rename = "Dispatch")]
    pub dispatch: [u32; 3],
}

#[derive(Debug, Deserialize)]
pub struct ResourceDecl {
    pub name: String,
    #[serde(rename = "Dimension", default = "default_dimension")]
    pub dimension: String,
    #[serde(rename = "Format", default = "default_format")]
    pub format: String,
    #[serde(rename = "Width", default = "one_u64")]
    pub width: u64,
    #[serde(rename = "Height", default = "one")]
    pub height: u32,
    #[serde(rename = "DepthOrArraySize", default = "one")]
    pub depth_or_array_size: u32,
    #[serde(rename = "MipLevels", default = "one")]
    pub mip_levels: u32,
    #[serde(rename = "SampleCount", default = "one")]
    pub sample_count: u32,
    #[serde(rename = "Flags", default)]
    pub flags: u32,
    #[serde(rename = "FlagUAV", default)]
    pub flag_uav: u32,
    #[serde(rename = "FlagRTV", default)]
    pub flag_rtv: u32,
    #[serde(rename = "FlagDSV", default)]
    pub flag_dsv: u32,
    /// One file per mip level.
    #[serde(default)]
    pub data: Option<Vec<String>>,
    #[serde(rename = "PixelSize")]
    pub pixel_size: Option<u32>,
    #[serde(rename = "PixelSlice")]
    pub pixel_slice: Option<u32>,
}

impl ResourceDecl {
    pub fn usage_flags(&self) -> u32 {
        let mut flags = self.flags;
        if self.flag_rtv != 0 {
            flags |= FLAG_RENDER_TARGET;
        }
        if self.flag_dsv != 0 {
            flags |= FLAG_DEPTH_STENCIL;
        }
        if self.flag_uav != 0 {
            flags |= FLAG_UNORDERED_ACCESS;
        }
        flags
    }
}

#[derive(Debug, Deserialize)]
pub struct SrvDecl {
    #[serde(rename = "Resource")]
    pub resource: String,
    #[serde(rename = "HeapOffset")]
    pub heap_offset: u32,
    #[serde(rename = "ViewDimension")]
    pub view_dimension: Option<String>,
    #[serde(rename = "Format")]
    pub format: Option<String>,
    #[serde(rename = "FirstElement", default)]
    pub first_element: u64,
    #[serde(rename = "NumElements", default)]
    pub num_elements: u32,
    #[serde(rename = "StructureByteStride", default)]
    pub structure_byte_stride: u32,
    #[serde(rename = "Flags")]
    pub flags: Option<String>,
    #[serde(rename = "MipLevels")]
    pub mip_levels: Option<u32>,
    #[serde(rename = "MostDetailedMip", default)]
    pub most_detailed_mip: u32,
    #[serde(rename = "ResourceMinLODClamp", default)]
    pub min_lod_clamp: f32,
    #[serde(rename = "ArraySize")]
    pub array_size: Option<u32>,
    #[serde(rename = "FirstArraySlice", default)]
    pub first_array_slice: u32,
    #[serde(rename = "PlaneSlice", default)]
    pub plane_slice: u32,
    #[serde(rename = "NumCubes")]
    pub num_cubes: Option<u32>,
    #[serde(rename = "First2DArrayFace", default)]
    pub first_2d_array_face: u32,
}

#[derive(Debug, Deserialize)]
pub struct UavDecl {
    #[serde(rename = "Resource")]
    pub resource: String,
    #[serde(rename = "HeapOffset")]
    pub heap_offset: u32,
    #[serde(rename = "ViewDimension")]
    pub view_dimension: Option<String>,
    #[serde(rename = "Format")]
    pub format: Option<String>,
    #[serde(rename = "FirstElement", default)]
    pub first_element: u64,
    #[serde(rename = "NumElements", default)]
    pub num_elements: u32,
    #[serde(rename = "StructureByteStride", default)]
    pub structure_byte_stride: u32,
    #[serde(rename = "Flags")]
    pub flags: Option<String>,
    #[serde(rename = "CounterOffsetInBytes", default)]
    pub counter_offset: u64,
    #[serde(rename = "CounterResource")]
    pub counter_resource: Option<String>,
    #[serde(rename = "MipSlice", default)]
    pub mip_slice: u32,
    #[serde(rename = "ArraySize")]
    pub array_size: Option<u32>,
    #[serde(rename = "FirstArraySlice", default)]
    pub first_array_slice: u32,
    #[serde(rename = "PlaneSlice", default)]
    pub plane_slice: u32,
    #[serde(rename = "FirstWSlice", default)]
    pub first_w_slice: u32,
    #[serde(rename = "WSize")]
    pub w_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct CbvDecl {
    #[serde(rename = "Resource")]
    pub resource: String,
    #[serde(rename = "HeapOffset")]
    pub heap_offset: u32,
    /// Byte offset into the resource.
    #[serde(rename = "BufferLocation", default)]
    pub buffer_location: u64,
    #[serde(rename = "SizeInBytes")]
    pub size_in_bytes: u64,
}

#[derive(Debug, Deserialize)]
pub struct SamplerDecl {
    #[serde(rename = "HeapOffset")]
    pub heap_offset: u32,
    #[serde(rename = "Filter")]
    pub filter: String,
    #[serde(rename = "AddressU")]
    pub address_u: Option<String>,
    #[serde(rename = "AddressV")]
    pub address_v: Option<String>,
    #[serde(rename = "AddressW")]
    pub address_w: Option<String>,
    #[serde(rename = "ComparisonFunc")]
    pub comparison_func: Option<String>,
    #[serde(rename = "MaxAnisotropy", default)]
    pub max_anisotropy: u32,
    #[serde(rename = "MinLOD", default)]
    pub min_lod: f32,
    #[serde(rename = "MaxLOD", default)]
    pub max_lod: f32,
    #[serde(rename = "MipLODBias", default)]
    pub mip_lod_bias: f32,
    #[serde(rename = "BorderColor", default)]
    pub border_color: [f32; 4],
}

#[derive(Debug, Deserialize)]
pub struct RootParameterDecl {
    #[serde(rename = "type")]
    pub kind: String,
    pub index: u32,
    pub offset: u64,
    #[serde(rename = "Resource")]
    pub resource: Option<String>,
}

fn default_entry_point() -> String {
    "main".to_string()
}

fn default_dimension() -> String {
    "BUFFER".to_string()
}

fn default_format() -> String {
    "UNKNOWN".to_string()
}

fn one() -> u32 {
    1
}

fn one_u64() -> u64 {
    1
}

/// A parsed workload with its kernel and binding layout loaded from disk.
pub struct Workload {
    pub document: WorkloadDocument,
    pub kernel: Vec<u32>,
    pub layout: BindingLayout,
    base_dir: PathBuf,
}

impl Workload {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read workload {:?}", path))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::from_text(&text, base_dir)
    }

    /// Parses a workload document whose relative paths resolve against `base_dir`.
    pub fn from_text(text: &str, base_dir: PathBuf) -> Result<Self> {
        let document = parse_document(text)?;

        let kernel_path = base_dir.join(&document.kernel);
        let mut kernel_file = fs::File::open(&kernel_path)
            .wrap_err_with(|| format!("Failed to open kernel {:?}", kernel_path))?;
        let kernel = ash::util::read_spv(&mut kernel_file)
            .map_err(|e| ReplayError::config(format!("kernel {:?}", kernel_path), e.to_string()))?;

        let layout_path = base_dir.join(&document.root_signature);
        let blob = fs::read(&layout_path)
            .wrap_err_with(|| format!("Failed to read binding layout {:?}", layout_path))?;
        let layout = BindingLayout::parse(&blob)?;

        log::info!(
            "Loaded workload: {} resources, {} root parameters, dispatch {:?}",
            document.resources.len(),
            document.root_parameters.len(),
            document.dispatch,
        );

        Ok(Self {
            document,
            kernel,
            layout,
            base_dir,
        })
    }

    /// Resolves a path declared in the document relative to the workload file.
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.base_dir.join(path)
    }

    pub fn read_data(&self, path: &str) -> Result<Vec<u8>> {
        let path = self.resolve(path);
        let data = fs::read(&path)
            .wrap_err_with(|| format!("Failed to load initial data {:?}", path))?;
        Ok(data)
    }
}

pub fn parse_document(text: &str) -> Result<WorkloadDocument, ReplayError> {
    serde_json::from_str(text).map_err(|e| {
        log::error!("Workload parse error at line {}, column {}: {}", e.line(), e.column(), e);
        ReplayError::config(
            format!("workload (line {}, column {})", e.line(), e.column()),
            e.to_string(),
        )
    })
}
