use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use gpu_descriptor::{DescriptorAllocator, DescriptorSet, DescriptorSetLayoutCreateFlags, DescriptorTotalCount};
use crate::replayer::contexts::descriptor_ctx::views::{SamplerDesc, TextureRange, ViewDesc, ViewInstall};
use crate::replayer::device::TableSizes;
use crate::replayer::vk::buffer::AllocatedBuffer;
use crate::replayer::vk::descriptor_set_layout_builder::DescriptorSetLayoutBuilder;
use crate::replayer::vk::device::DescriptorAshDevice;
use crate::replayer::vk::image::AllocatedImage;
use crate::replayer::vk::GpuResource;
use crate::replayer::workload::tokens::ViewDimension;

// Resource table bindings. Every binding is indexed by the same slot numbers.
pub const CONSTANT_BUFFERS: u32 = 0;
pub const STORAGE_BUFFERS: u32 = 1;
pub const UNIFORM_TEXEL_BUFFERS: u32 = 2;
pub const STORAGE_TEXEL_BUFFERS: u32 = 3;
pub const SAMPLED_IMAGES: u32 = 4;
pub const STORAGE_IMAGES: u32 = 5;
pub const COUNTER_BUFFERS: u32 = 6;

// Sampler table binding.
pub const SAMPLERS: u32 = 0;

pub type SharedDescriptorAllocator = Arc<Mutex<DescriptorAllocator<vk::DescriptorPool, vk::DescriptorSet>>>;

/// Set 0 holds every resource view, set 1 every sampler.
pub struct DescriptorTables {
    pub resource_layout: vk::DescriptorSetLayout,
    pub sampler_layout: vk::DescriptorSetLayout,
    resource_set: Option<DescriptorSet<vk::DescriptorSet>>,
    sampler_set: Option<DescriptorSet<vk::DescriptorSet>>,

    resource_slots: u32,
    sampler_slots: u32,
    constant_buffer_slots: u32,
    limits: vk::PhysicalDeviceLimits,
    anisotropy: bool,

    image_views: Vec<vk::ImageView>,
    buffer_views: Vec<vk::BufferView>,
    samplers: Vec<vk::Sampler>,

    descriptor_allocator: SharedDescriptorAllocator,
    device: Arc<ash::Device>,
}

impl DescriptorTables {
    pub fn new(
        sizes: TableSizes,
        limits: vk::PhysicalDeviceLimits,
        anisotropy: bool,
        descriptor_allocator: SharedDescriptorAllocator,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let resource_slots = sizes.resources.max(1);
        let sampler_slots = sizes.samplers.max(1);
        let constant_buffer_slots = resource_slots.min(limits.max_per_stage_descriptor_uniform_buffers);
        if constant_buffer_slots < sizes.resources {
            log::warn!(
                "Device limits constant buffers to {} slots of {}",
                constant_buffer_slots,
                sizes.resources,
            );
        }

        let resource_layout = DescriptorSetLayoutBuilder::new()
            .add_binding(CONSTANT_BUFFERS, vk::DescriptorType::UNIFORM_BUFFER, constant_buffer_slots)
            .add_binding(STORAGE_BUFFERS, vk::DescriptorType::STORAGE_BUFFER, resource_slots)
            .add_binding(UNIFORM_TEXEL_BUFFERS, vk::DescriptorType::UNIFORM_TEXEL_BUFFER, resource_slots)
            .add_binding(STORAGE_TEXEL_BUFFERS, vk::DescriptorType::STORAGE_TEXEL_BUFFER, resource_slots)
            .add_binding(SAMPLED_IMAGES, vk::DescriptorType::SAMPLED_IMAGE, resource_slots)
            .add_binding(STORAGE_IMAGES, vk::DescriptorType::STORAGE_IMAGE, resource_slots)
            .add_binding(COUNTER_BUFFERS, vk::DescriptorType::STORAGE_BUFFER, resource_slots)
            .build(&device)?;
        let sampler_layout = DescriptorSetLayoutBuilder::new()
            .add_binding(SAMPLERS, vk::DescriptorType::SAMPLER, sampler_slots)
            .build(&device)?;

        let mut tables = Self {
            resource_layout,
            sampler_layout,
            resource_set: None,
            sampler_set: None,

            resource_slots,
            sampler_slots,
            constant_buffer_slots,
            limits,
            anisotropy,

            image_views: Vec::new(),
            buffer_views: Vec::new(),
            samplers: Vec::new(),

            descriptor_allocator,
            device,
        };

        let resource_count = DescriptorTotalCount {
            sampler: 0,
            combined_image_sampler: 0,
            sampled_image: resource_slots,
            storage_image: resource_slots,
            uniform_texel_buffer: resource_slots,
            storage_texel_buffer: resource_slots,
            uniform_buffer: constant_buffer_slots,
            // Storage views and counters
            storage_buffer: resource_slots * 2,
            uniform_buffer_dynamic: 0,
            storage_buffer_dynamic: 0,
            input_attachment: 0,
            acceleration_structure: 0,
            inline_uniform_block_bytes: 0,
            inline_uniform_block_bindings: 0,
        };
        let sampler_count = DescriptorTotalCount {
            sampler: sampler_slots,
            combined_image_sampler: 0,
            sampled_image: 0,
            storage_image: 0,
            uniform_texel_buffer: 0,
            storage_texel_buffer: 0,
            uniform_buffer: 0,
            storage_buffer: 0,
            uniform_buffer_dynamic: 0,
            storage_buffer_dynamic: 0,
            input_attachment: 0,
            acceleration_structure: 0,
            inline_uniform_block_bytes: 0,
            inline_uniform_block_bindings: 0,
        };
        tables.resource_set = Some(tables.allocate_set(resource_layout, &resource_count)?);
        tables.sampler_set = Some(tables.allocate_set(sampler_layout, &sampler_count)?);

        log::debug!(
            "Created descriptor tables: {} resource slots, {} sampler slots",
            resource_slots,
            sampler_slots,
        );
        Ok(tables)
    }

    fn allocate_set(
        &self,
        layout: vk::DescriptorSetLayout,
        count: &DescriptorTotalCount,
    ) -> Result<DescriptorSet<vk::DescriptorSet>> {
        let ash_device = DescriptorAshDevice::from(self.device.clone());
        let mut allocator = self
            .descriptor_allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))?;
        let set = unsafe {
            allocator
                .allocate(&ash_device, &layout, DescriptorSetLayoutCreateFlags::empty(), count, 1)?
                .drain(..)
                .next()
                .ok_or_eyre("Failed to allocate descriptor table")?
        };
        Ok(set)
    }

    pub fn sets(&self) -> Result<[vk::DescriptorSet; 2]> {
        match (&self.resource_set, &self.sampler_set) {
            (Some(resources), Some(samplers)) => Ok([*resources.raw(), *samplers.raw()]),
            _ => Err(eyre!("Descriptor tables are not allocated")),
        }
    }

    pub fn install(&mut self, slot: u32, view: ViewInstall<'_, GpuResource>) -> Result<()> {
        match view {
            ViewInstall::ShaderResource { target, desc } => self.install_view(slot, target, desc, false),
            ViewInstall::UnorderedAccess { target, desc } => self.install_view(slot, target, desc, true),
            ViewInstall::ConstantBuffer { target, offset, size } => {
                if slot >= self.constant_buffer_slots {
                    return Err(eyre!(
                        "Constant buffer slot {} exceeds the device's {} constant buffer slots",
                        slot,
                        self.constant_buffer_slots,
                    ));
                }
                let buffer = as_buffer(target)?;
                let range = if size == 0 { vk::WHOLE_SIZE } else { size };
                self.write_buffer(CONSTANT_BUFFERS, slot, vk::DescriptorType::UNIFORM_BUFFER, buffer, offset, range)
            }
            ViewInstall::Counter { target, offset } => {
                let buffer = as_buffer(target)?;
                self.write_buffer(COUNTER_BUFFERS, slot, vk::DescriptorType::STORAGE_BUFFER, buffer, offset, 4)
            }
            ViewInstall::Sampler(desc) => self.install_sampler(slot, &desc),
        }
    }

    fn install_view(&mut self, slot: u32, target: &GpuResource, desc: ViewDesc, unordered: bool) -> Result<()> {
        match desc {
            ViewDesc::Buffer { format, range } => {
                let buffer = as_buffer(target)?;
                let (offset, size) = range.byte_range(format);
                let size = size.unwrap_or(vk::WHOLE_SIZE);

                if range.is_typed(format) {
                    let (binding, ty) = if unordered {
                        (STORAGE_TEXEL_BUFFERS, vk::DescriptorType::STORAGE_TEXEL_BUFFER)
                    } else {
                        (UNIFORM_TEXEL_BUFFERS, vk::DescriptorType::UNIFORM_TEXEL_BUFFER)
                    };
                    let view = self.create_buffer_view(buffer, format, offset, size)?;
                    self.write_texel_buffer(binding, slot, ty, view)
                } else {
                    if offset % self.limits.min_storage_buffer_offset_alignment != 0 {
                        log::warn!(
                            "Storage view at slot {} starts at byte {}, not a multiple of {}",
                            slot,
                            offset,
                            self.limits.min_storage_buffer_offset_alignment,
                        );
                    }
                    self.write_buffer(STORAGE_BUFFERS, slot, vk::DescriptorType::STORAGE_BUFFER, buffer, offset, size)
                }
            }
            ViewDesc::Texture { dimension, format, range } => {
                let image = as_image(target)?;
                let view = self.create_image_view(image, dimension, format, &range)?;
                let (binding, ty, layout) = if unordered {
                    (STORAGE_IMAGES, vk::DescriptorType::STORAGE_IMAGE, vk::ImageLayout::GENERAL)
                } else {
                    (SAMPLED_IMAGES, vk::DescriptorType::SAMPLED_IMAGE, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                };
                self.write_image(binding, slot, ty, view, layout)
            }
        }
    }

    fn create_buffer_view(
        &mut self,
        buffer: &AllocatedBuffer,
        format: vk::Format,
        offset: u64,
        range: u64,
    ) -> Result<vk::BufferView> {
        let info = vk::BufferViewCreateInfo::default()
            .buffer(buffer.buffer)
            .format(format)
            .offset(offset)
            .range(range);
        let view = unsafe { self.device.create_buffer_view(&info, None)? };
        self.buffer_views.push(view);
        Ok(view)
    }

    fn create_image_view(
        &mut self,
        image: &AllocatedImage,
        dimension: ViewDimension,
        format: vk::Format,
        range: &TextureRange,
    ) -> Result<vk::ImageView> {
        let view_type = match dimension {
            ViewDimension::Texture1D => vk::ImageViewType::TYPE_1D,
            ViewDimension::Texture1DArray => vk::ImageViewType::TYPE_1D_ARRAY,
            ViewDimension::Texture2D | ViewDimension::Texture2DMs => vk::ImageViewType::TYPE_2D,
            ViewDimension::Texture2DArray | ViewDimension::Texture2DMsArray => vk::ImageViewType::TYPE_2D_ARRAY,
            ViewDimension::Texture3D => vk::ImageViewType::TYPE_3D,
            ViewDimension::TextureCube => vk::ImageViewType::CUBE,
            ViewDimension::TextureCubeArray => vk::ImageViewType::CUBE_ARRAY,
            ViewDimension::Buffer | ViewDimension::Unknown => {
                return Err(eyre!("{:?} is not a texture view", dimension));
            }
        };
        if matches!(view_type, vk::ImageViewType::CUBE | vk::ImageViewType::CUBE_ARRAY)
            && !image.flags.contains(vk::ImageCreateFlags::CUBE_COMPATIBLE)
        {
            return Err(eyre!("Cube view of an image that is not cube compatible"));
        }

        let (base_array_layer, layer_count) = if view_type == vk::ImageViewType::TYPE_3D {
            if range.base_layer != 0 || range.layer_count.is_some_and(|count| count != image.extent.depth) {
                log::debug!(
                    "3D view selects depth slices {}..{:?}, viewing the whole volume",
                    range.base_layer,
                    range.layer_count,
                );
            }
            (0, 1)
        } else {
            (range.base_layer, range.layer_count.unwrap_or(vk::REMAINING_ARRAY_LAYERS))
        };

        // Depth images are viewed through their own format, one aspect at a time.
        let (format, aspect_mask) = if image.is_depth() {
            (image.format, vk::ImageAspectFlags::DEPTH)
        } else if image.aspect == vk::ImageAspectFlags::STENCIL {
            (image.format, vk::ImageAspectFlags::STENCIL)
        } else if format == vk::Format::UNDEFINED {
            (image.format, vk::ImageAspectFlags::COLOR)
        } else {
            (format, vk::ImageAspectFlags::COLOR)
        };
        if range.plane_slice != 0 {
            log::debug!("Ignoring plane slice {} of a single-plane image", range.plane_slice);
        }

        let info = vk::ImageViewCreateInfo::default()
            .view_type(view_type)
            .image(image.image)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: range.base_mip,
                level_count: range.mip_count.unwrap_or(vk::REMAINING_MIP_LEVELS),
                base_array_layer,
                layer_count,
            });
        let view = unsafe { self.device.create_image_view(&info, None)? };
        self.image_views.push(view);
        Ok(view)
    }

    fn install_sampler(&mut self, slot: u32, desc: &SamplerDesc) -> Result<()> {
        if slot >= self.sampler_slots {
            return Err(eyre!("Sampler slot {} is out of range ({} slots)", slot, self.sampler_slots));
        }

        let filter = desc.filter;
        let anisotropy = filter.anisotropic && self.anisotropy;
        let mut reduction_info = vk::SamplerReductionModeCreateInfo::default();
        let mut info = vk::SamplerCreateInfo::default()
            .mag_filter(filter.mag)
            .min_filter(filter.min)
            .mipmap_mode(filter.mip)
            .address_mode_u(desc.address[0])
            .address_mode_v(desc.address[1])
            .address_mode_w(desc.address[2])
            .mip_lod_bias(desc.mip_lod_bias)
            .anisotropy_enable(anisotropy)
            .max_anisotropy(desc.max_anisotropy.min(self.limits.max_sampler_anisotropy))
            .compare_enable(filter.comparison)
            .compare_op(desc.compare)
            .min_lod(desc.min_lod)
            .max_lod(desc.max_lod)
            .border_color(border_color(desc.border_color));
        if let Some(mode) = filter.reduction {
            reduction_info = reduction_info.reduction_mode(mode);
            info = info.push_next(&mut reduction_info);
        }

        let sampler = unsafe { self.device.create_sampler(&info, None)? };
        self.samplers.push(sampler);

        let set = self.sets()?[1];
        let image_info = [vk::DescriptorImageInfo::default().sampler(sampler)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(SAMPLERS)
            .dst_array_element(slot)
            .descriptor_type(vk::DescriptorType::SAMPLER)
            .image_info(&image_info);
        unsafe {
            self.device.update_descriptor_sets(&[write], &[]);
        }
        Ok(())
    }

    fn check_resource_slot(&self, slot: u32) -> Result<vk::DescriptorSet> {
        if slot >= self.resource_slots {
            return Err(eyre!("Resource slot {} is out of range ({} slots)", slot, self.resource_slots));
        }
        Ok(self.sets()?[0])
    }

    fn write_buffer(
        &self,
        binding: u32,
        slot: u32,
        ty: vk::DescriptorType,
        buffer: &AllocatedBuffer,
        offset: u64,
        range: u64,
    ) -> Result<()> {
        let set = self.check_resource_slot(slot)?;
        let buffer_info = [vk::DescriptorBufferInfo::default()
            .buffer(buffer.buffer)
            .offset(offset)
            .range(range)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(binding)
            .dst_array_element(slot)
            .descriptor_type(ty)
            .buffer_info(&buffer_info);
        unsafe {
            self.device.update_descriptor_sets(&[write], &[]);
        }
        Ok(())
    }

    fn write_texel_buffer(&self, binding: u32, slot: u32, ty: vk::DescriptorType, view: vk::BufferView) -> Result<()> {
        let set = self.check_resource_slot(slot)?;
        let views = [view];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(binding)
            .dst_array_element(slot)
            .descriptor_type(ty)
            .texel_buffer_view(&views);
        unsafe {
            self.device.update_descriptor_sets(&[write], &[]);
        }
        Ok(())
    }

    fn write_image(
        &self,
        binding: u32,
        slot: u32,
        ty: vk::DescriptorType,
        view: vk::ImageView,
        layout: vk::ImageLayout,
    ) -> Result<()> {
        let set = self.check_resource_slot(slot)?;
        let image_info = [vk::DescriptorImageInfo::default()
            .image_view(view)
            .image_layout(layout)];
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(binding)
            .dst_array_element(slot)
            .descriptor_type(ty)
            .image_info(&image_info);
        unsafe {
            self.device.update_descriptor_sets(&[write], &[]);
        }
        Ok(())
    }
}

impl Drop for DescriptorTables {
    fn drop(&mut self) {
        unsafe {
            for view in self.image_views.drain(..) {
                self.device.destroy_image_view(view, None);
            }
            for view in self.buffer_views.drain(..) {
                self.device.destroy_buffer_view(view, None);
            }
            for sampler in self.samplers.drain(..) {
                self.device.destroy_sampler(sampler, None);
            }

            let sets = self.resource_set.take().into_iter().chain(self.sampler_set.take());
            match self.descriptor_allocator.lock() {
                Ok(mut allocator) => {
                    allocator.free(&DescriptorAshDevice::from(self.device.clone()), sets);
                }
                Err(err) => log::error!("Descriptor allocator poisoned: {}", err),
            }

            self.device.destroy_descriptor_set_layout(self.resource_layout, None);
            self.device.destroy_descriptor_set_layout(self.sampler_layout, None);
        }
    }
}

fn as_buffer(target: &GpuResource) -> Result<&AllocatedBuffer> {
    match target {
        GpuResource::Buffer(buffer) => Ok(buffer),
        GpuResource::Image(_) => Err(eyre!("Buffer view of a texture")),
    }
}

fn as_image(target: &GpuResource) -> Result<&AllocatedImage> {
    match target {
        GpuResource::Image(image) => Ok(image),
        GpuResource::Buffer(_) => Err(eyre!("Texture view of a buffer")),
    }
}

/// Picks the fixed border color closest to the requested one.
fn border_color(color: [f32; 4]) -> vk::BorderColor {
    match color {
        [r, g, b, a] if r >= 0.5 && g >= 0.5 && b >= 0.5 && a >= 0.5 => vk::BorderColor::FLOAT_OPAQUE_WHITE,
        [_, _, _, a] if a >= 0.5 => vk::BorderColor::FLOAT_OPAQUE_BLACK,
        _ => vk::BorderColor::FLOAT_TRANSPARENT_BLACK,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn border_colors_snap_to_the_fixed_palette() {
        assert_eq!(border_color([0.0; 4]), vk::BorderColor::FLOAT_TRANSPARENT_BLACK);
        assert_eq!(border_color([0.0, 0.0, 0.0, 1.0]), vk::BorderColor::FLOAT_OPAQUE_BLACK);
        assert_eq!(border_color([1.0; 4]), vk::BorderColor::FLOAT_OPAQUE_WHITE);
        assert_eq!(border_color([1.0, 0.0, 0.0, 1.0]), vk::BorderColor::FLOAT_OPAQUE_BLACK);
    }
}
