pub mod resource;
pub mod upload;

use std::collections::HashMap;
use ash::vk;
use color_eyre::Result;
use crate::replayer::contexts::resource_ctx::resource::{AllocationDesc, ResidencyState, Resource, ResourceUsage};
use crate::replayer::contexts::resource_ctx::upload::{slice_pixels, StagingLayout};
use crate::replayer::device::{HostBuffer, HostBufferUsage, ReplayDevice};
use crate::replayer::error::ReplayError;
use crate::replayer::workload::tokens::{self, Dimension};
use crate::replayer::workload::{ResourceDecl, FLAG_DEPTH_STENCIL, FLAG_RENDER_TARGET, FLAG_UNORDERED_ACCESS};

/// Owns every named resource of the workload.
pub struct ResourceRegistry<D: ReplayDevice> {
    resources: Vec<Resource<D>>,
    index: HashMap<String, usize>,
}

impl<D: ReplayDevice> ResourceRegistry<D> {
    pub fn new() -> Self {
        Self {
            resources: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Creates every declared resource. `load_data` reads an initial-data file named in
    /// the document.
    pub fn load<F>(device: &D, decls: &[ResourceDecl], load_data: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<Vec<u8>>,
    {
        let mut registry = Self::new();
        for decl in decls {
            registry.create(device, decl, &load_data)?;
        }
        log::info!("Created {} resources", registry.resources.len());
        Ok(registry)
    }

    pub fn create<F>(&mut self, device: &D, decl: &ResourceDecl, load_data: &F) -> Result<()>
    where
        F: Fn(&str) -> Result<Vec<u8>>,
    {
        let name = decl.name.as_str();
        let context = format!("resource \"{}\"", name);

        if self.index.contains_key(name) {
            return Err(ReplayError::config(context, "declared more than once").into());
        }

        let desc = Self::allocation_desc(decl, &context)?;
        let staging = if desc.is_buffer() {
            StagingLayout::for_buffer(desc.width)
        } else {
            StagingLayout::for_texture(&desc).ok_or_else(|| {
                ReplayError::config(&context, format!("format {:?} has no staging layout", desc.format))
            })?
        };

        let allocation = device.create_allocation(name, &desc).map_err(|e| {
            log::error!("Failed to create {}: {:?}", context, e);
            ReplayError::creation(name, "allocation", e)
        })?;
        let mirror = device
            .create_buffer(&format!("{} staging mirror", name), staging.size)
            .map_err(|e| ReplayError::creation(name, "staging mirror", e))?;
        let mut shadow = device
            .create_host_buffer(&format!("{} staging", name), staging.size, HostBufferUsage::Upload)
            .map_err(|e| ReplayError::creation(name, "staging buffer", e))?;

        // Unwritten regions stay zero so the device contents are always defined.
        let mut staged = vec![0u8; staging.size as usize];
        if let Some(files) = &decl.data {
            Self::stage_initial_data(decl, &desc, &staging, files, &mut staged, load_data)?;
        }
        shadow.write(0, &staged)?;

        log::debug!(
            "Created {} ({:?} {:?}, {} staging bytes)",
            context,
            desc.dimension,
            desc.format,
            staging.size,
        );

        self.index.insert(name.to_string(), self.resources.len());
        self.resources.push(Resource {
            name: name.to_string(),
            desc,
            staging,
            allocation,
            mirror,
            shadow: Some(shadow),
            current_state: ResidencyState::Undefined,
            mirror_state: ResidencyState::Undefined,
            execution_state: None,
            dirty: true,
            dirty_gpu_staging: true,
        });

        Ok(())
    }

    fn allocation_desc(decl: &ResourceDecl, context: &str) -> Result<AllocationDesc, ReplayError> {
        let dimension = tokens::convert_resource_dimension(&decl.dimension);
        if dimension == Dimension::Unknown {
            return Err(ReplayError::config(context, format!("unknown dimension \"{}\"", decl.dimension)));
        }

        let flags = decl.usage_flags();
        let usage = ResourceUsage {
            render_target: flags & FLAG_RENDER_TARGET != 0,
            depth_stencil: flags & FLAG_DEPTH_STENCIL != 0,
            unordered_access: flags & FLAG_UNORDERED_ACCESS != 0,
        };

        let format = match (decl.format.as_str(), usage.depth_stencil) {
            ("R32_TYPELESS", true) => vk::Format::D32_SFLOAT,
            ("R16_TYPELESS", true) => vk::Format::D16_UNORM,
            (token, _) => tokens::convert_format(token),
        };

        if dimension == Dimension::Buffer {
            if decl.width == 0 {
                return Err(ReplayError::config(context, "buffer Width must be non-zero"));
            }
            return Ok(AllocationDesc {
                dimension,
                format: vk::Format::UNDEFINED,
                width: decl.width,
                height: 1,
                depth_or_array_size: 1,
                mip_levels: 1,
                usage,
            });
        }

        if format == vk::Format::UNDEFINED {
            return Err(ReplayError::config(context, format!("unusable format \"{}\"", decl.format)));
        }
        if decl.sample_count > 1 {
            return Err(ReplayError::creation(&decl.name, "texture", "multisampling not supported"));
        }
        if decl.mip_levels == 0 || decl.depth_or_array_size == 0 || decl.width == 0 || decl.height == 0 {
            return Err(ReplayError::config(context, "extents and mip levels must be non-zero"));
        }

        let width = u32::try_from(decl.width)
            .map_err(|_| ReplayError::config(context, format!("texture Width {} is too large", decl.width)))?;

        let desc = AllocationDesc {
            dimension,
            format,
            width: decl.width,
            height: decl.height,
            depth_or_array_size: decl.depth_or_array_size,
            mip_levels: decl.mip_levels,
            usage,
        };

        let full_chain = 32 - width.max(desc.height).max(desc.depth()).leading_zeros();
        if desc.mip_levels > full_chain {
            return Err(ReplayError::config(
                context,
                format!("MipLevels {} exceeds the full mip chain of {} levels", desc.mip_levels, full_chain),
            ));
        }

        Ok(desc)
    }

    fn stage_initial_data<F>(
        decl: &ResourceDecl,
        desc: &AllocationDesc,
        staging: &StagingLayout,
        files: &[String],
        staged: &mut [u8],
        load_data: &F,
    ) -> Result<()>
    where
        F: Fn(&str) -> Result<Vec<u8>>,
    {
        let name = decl.name.as_str();
        let context = format!("resource \"{}\"", name);

        if files.len() < desc.mip_levels as usize {
            return Err(ReplayError::config(
                context,
                format!("{} data files for {} mip levels", files.len(), desc.mip_levels),
            ).into());
        }

        if desc.is_buffer() {
            let data = load_data(&files[0])?;
            if data.len() as u64 != desc.width {
                log::error!("Mismatch between Width and data of \"{}\": {} != {}", name, desc.width, data.len());
                return Err(ReplayError::data(
                    name,
                    format!("{} bytes of data for Width {}", data.len(), desc.width),
                ).into());
            }
            staged.copy_from_slice(&data);
            return Ok(());
        }

        let declared_pixel_size = decl
            .pixel_size
            .ok_or_else(|| ReplayError::missing_field(&context, "PixelSize"))?;
        if declared_pixel_size == 0 {
            return Err(ReplayError::config(context, "PixelSize must be non-zero").into());
        }

        for (mip, path) in files.iter().take(desc.mip_levels as usize).enumerate() {
            let mut data = load_data(path)?;
            let mut pixel_size = declared_pixel_size;

            // Mostly used to pull the depth plane out of depth/stencil data.
            if let Some(slice) = decl.pixel_slice {
                if slice == 0 || slice > pixel_size {
                    return Err(ReplayError::config(
                        context,
                        format!("PixelSlice {} does not fit PixelSize {}", slice, pixel_size),
                    ).into());
                }
                data = slice_pixels(&data, slice as usize, pixel_size as usize);
                pixel_size = slice;
            }

            let consumed = staging
                .pack_mip(mip as u32, &data, pixel_size, staged)
                .map_err(|e| {
                    log::error!("Attempting to load \"{}\" out of bounds: {}", name, e);
                    ReplayError::data(name, e.to_string())
                })?;
            if consumed < data.len() {
                log::warn!(
                    "Ignoring {} trailing bytes of mip {} data for \"{}\"",
                    data.len() - consumed,
                    mip,
                    name,
                );
            }
        }

        Ok(())
    }

    pub fn position(&self, name: &str) -> Result<usize, ReplayError> {
        self.index.get(name).copied().ok_or_else(|| {
            log::error!("Could not find resource named \"{}\"", name);
            ReplayError::NotFound(name.to_string())
        })
    }

    pub fn find(&self, name: &str) -> Result<&Resource<D>, ReplayError> {
        let index = self.position(name)?;
        Ok(&self.resources[index])
    }

    pub fn find_mut(&mut self, name: &str) -> Result<&mut Resource<D>, ReplayError> {
        let index = self.position(name)?;
        Ok(&mut self.resources[index])
    }

    pub fn get(&self, index: usize) -> &Resource<D> {
        &self.resources[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut Resource<D> {
        &mut self.resources[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource<D>> {
        self.resources.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Resource<D>> {
        self.resources.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// A kernel with unordered write access is assumed to have written every such
    /// resource, so all of them are synced again before the next dispatch.
    pub fn mark_unordered_dirty(&mut self) {
        for resource in &mut self.resources {
            if resource.execution_state.is_some_and(ResidencyState::permits_unordered_writes) {
                resource.dirty = true;
            }
        }
    }
}

impl<D: ReplayDevice> Default for ResourceRegistry<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use color_eyre::eyre::eyre;
    use super::*;
    use crate::replayer::device::mock::MockDevice;

    fn decl(json: &str) -> ResourceDecl {
        serde_json::from_str(json).unwrap()
    }

    fn files(path: &str) -> Result<Vec<u8>> {
        match path {
            "ramp64.bin" => Ok((0..64).collect()),
            "rgba4x4.bin" => Ok(vec![7; 64]),
            "rgba2x2.bin" => Ok(vec![9; 16]),
            "short.bin" => Ok(vec![1; 10]),
            "ds.bin" => Ok([[1u8, 2, 3, 4, 0xAA, 0xBB, 0xCC, 0xDD]; 4].concat()),
            _ => Err(eyre!("no such file {}", path)),
        }
    }

    fn replay_error(result: Result<()>) -> ReplayError {
        result.unwrap_err().downcast::<ReplayError>().unwrap()
    }

    #[test]
    fn buffer_with_initial_data_starts_dirty() {
        let device = MockDevice::new();
        let mut registry = ResourceRegistry::new();
        registry
            .create(&device, &decl(r#"{ "name": "buf", "Width": 64, "data": ["ramp64.bin"] }"#), &files)
            .unwrap();

        let res = registry.find("buf").unwrap();
        assert!(res.is_dirty());
        assert!(res.is_gpu_staging_dirty());
        assert_eq!(res.current_state(), ResidencyState::Undefined);
        assert_eq!(res.execution_state(), None);

        let mut staged = vec![0u8; 64];
        res.shadow.as_ref().unwrap().read(0, &mut staged).unwrap();
        assert_eq!(staged, (0..64).collect::<Vec<u8>>());
    }

    #[test]
    fn resources_without_data_are_zero_filled() {
        let device = MockDevice::new();
        let mut registry = ResourceRegistry::new();
        registry.create(&device, &decl(r#"{ "name": "buf", "Width": 16 }"#), &files).unwrap();

        let mut staged = vec![0xFFu8; 16];
        registry.find("buf").unwrap().shadow.as_ref().unwrap().read(0, &mut staged).unwrap();
        assert_eq!(staged, vec![0; 16]);
        assert!(registry.find("buf").unwrap().is_dirty());
    }

    #[test]
    fn buffer_data_must_match_width() {
        let device = MockDevice::new();
        let mut registry = ResourceRegistry::new();
        let err = replay_error(registry.create(
            &device,
            &decl(r#"{ "name": "buf", "Width": 32, "data": ["ramp64.bin"] }"#),
            &files,
        ));
        assert!(matches!(err, ReplayError::Data { ref resource, .. } if resource == "buf"));
    }

    #[test]
    fn texture_mips_are_packed_per_subresource() {
        let device = MockDevice::new();
        let mut registry = ResourceRegistry::new();
        registry.create(&device, &decl(r#"{
            "name": "tex", "Dimension": "TEXTURE2D", "Format": "R8G8B8A8_UNORM",
            "Width": 4, "Height": 4, "MipLevels": 2, "PixelSize": 4,
            "data": ["rgba4x4.bin", "rgba2x2.bin"]
        }"#), &files).unwrap();

        let res = registry.find("tex").unwrap();
        assert_eq!(res.staging.size, 80);
        let mut staged = vec![0u8; 80];
        res.shadow.as_ref().unwrap().read(0, &mut staged).unwrap();
        assert!(staged[..64].iter().all(|&b| b == 7));
        assert!(staged[64..].iter().all(|&b| b == 9));
        assert!(!res.needs_per_subresource_copy());
    }

    #[test]
    fn pixel_slice_extracts_depth_plane() {
        let device = MockDevice::new();
        let mut registry = ResourceRegistry::new();
        registry.create(&device, &decl(r#"{
            "name": "depth", "Dimension": "TEXTURE2D", "Format": "R32G8X24_TYPELESS", "Flags": 2,
            "Width": 2, "Height": 2, "PixelSize": 8, "PixelSlice": 4, "data": ["ds.bin"]
        }"#), &files).unwrap();

        let res = registry.find("depth").unwrap();
        assert_eq!(res.desc.format, vk::Format::D32_SFLOAT_S8_UINT);
        assert_eq!(res.staging.format, vk::Format::R32_SFLOAT);
        assert!(res.needs_per_subresource_copy());

        let mut staged = vec![0u8; 16];
        res.shadow.as_ref().unwrap().read(0, &mut staged).unwrap();
        assert_eq!(staged, [[1u8, 2, 3, 4]; 4].concat());
    }

    #[test]
    fn typeless_depth_stencil_resolves_to_depth_format() {
        let device = MockDevice::new();
        let mut registry = ResourceRegistry::new();
        registry.create(&device, &decl(r#"{
            "name": "d", "Dimension": "TEXTURE2D", "Format": "R32_TYPELESS", "FlagDSV": 1, "Width": 2, "Height": 2
        }"#), &files).unwrap();
        assert_eq!(registry.find("d").unwrap().desc.format, vk::Format::D32_SFLOAT);
    }

    #[test]
    fn short_texture_data_is_rejected() {
        let device = MockDevice::new();
        let mut registry = ResourceRegistry::new();
        let err = replay_error(registry.create(&device, &decl(r#"{
            "name": "tex", "Dimension": "TEXTURE2D", "Format": "R8G8B8A8_UNORM",
            "Width": 4, "Height": 4, "PixelSize": 4, "data": ["short.bin"]
        }"#), &files));
        assert!(matches!(err, ReplayError::Data { .. }));
    }

    #[test]
    fn declaration_errors_are_classified() {
        let device = MockDevice::new();
        let mut registry = ResourceRegistry::new();

        let err = replay_error(registry.create(&device, &decl(r#"{
            "name": "tex", "Dimension": "TEXTURE2D", "Format": "FOO_BAR", "Width": 4, "Height": 4
        }"#), &files));
        assert!(matches!(err, ReplayError::Config { .. }));

        let err = replay_error(registry.create(&device, &decl(r#"{
            "name": "tex", "Dimension": "TEXTURE2D", "Format": "R8_UNORM", "SampleCount": 4
        }"#), &files));
        assert!(matches!(err, ReplayError::ResourceCreation { .. }));

        let err = replay_error(registry.create(&device, &decl(r#"{
            "name": "tex", "Dimension": "TEXTURE2D", "Format": "R8_UNORM", "data": ["rgba4x4.bin"]
        }"#), &files));
        assert!(matches!(err, ReplayError::Config { ref message, .. } if message.contains("PixelSize")));

        let err = replay_error(registry.create(&device, &decl(r#"{
            "name": "tex", "Dimension": "TEXTURE2D", "Format": "R8_UNORM", "MipLevels": 2,
            "PixelSize": 1, "data": ["rgba4x4.bin"]
        }"#), &files));
        assert!(matches!(err, ReplayError::Config { .. }));

        // A buffer's format token is never consulted.
        registry.create(&device, &decl(r#"{ "name": "buf", "Format": "FOO_BAR", "Width": 4 }"#), &files).unwrap();
        let err = replay_error(registry.create(&device, &decl(r#"{ "name": "buf", "Width": 4 }"#), &files));
        assert!(matches!(err, ReplayError::Config { .. }));
    }

    #[test]
    fn mip_levels_past_the_full_chain_are_rejected() {
        let device = MockDevice::new();
        let mut registry = ResourceRegistry::new();

        let err = replay_error(registry.create(&device, &decl(r#"{
            "name": "tex", "Dimension": "TEXTURE2D", "Format": "R8_UNORM", "Width": 4, "Height": 4, "MipLevels": 33
        }"#), &files));
        assert!(matches!(err, ReplayError::Config { ref message, .. } if message.contains("MipLevels")));

        let err = replay_error(registry.create(&device, &decl(r#"{
            "name": "tex", "Dimension": "TEXTURE2D", "Format": "R8_UNORM", "Width": 4, "Height": 4, "MipLevels": 4
        }"#), &files));
        assert!(matches!(err, ReplayError::Config { .. }));
        assert!(registry.is_empty());

        // 4x4 has exactly three levels: 4, 2 and 1.
        registry.create(&device, &decl(r#"{
            "name": "tex", "Dimension": "TEXTURE2D", "Format": "R8_UNORM", "Width": 4, "Height": 4, "MipLevels": 3
        }"#), &files).unwrap();
        assert_eq!(registry.find("tex").unwrap().staging.footprints.len(), 3);
    }

    #[test]
    fn unknown_names_are_not_found() {
        let registry = ResourceRegistry::<MockDevice>::new();
        assert!(matches!(registry.find("ghost"), Err(ReplayError::NotFound(ref name)) if name == "ghost"));
    }
}
