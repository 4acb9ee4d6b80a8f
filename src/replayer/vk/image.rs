use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator},
    MemoryLocation,
};
use crate::replayer::contexts::resource_ctx::resource::AllocationDesc;
use crate::replayer::workload::tokens::{self, Dimension};

pub struct AllocatedImage {
    pub image: vk::Image,
    pub format: vk::Format,
    pub dimension: Dimension,
    pub extent: vk::Extent3D,
    pub mip_levels: u32,
    pub array_layers: u32,
    /// Aspects a copy writes. Depth-stencil formats carry both.
    pub aspect: vk::ImageAspectFlags,
    pub flags: vk::ImageCreateFlags,

    allocation: Option<Allocation>, // GPU-only memory block
    memory_allocator: Arc<Mutex<Allocator>>,
    device: Arc<ash::Device>,
}

impl AllocatedImage {
    pub fn new(
        name: &str,
        desc: &AllocationDesc,
        memory_allocator: Arc<Mutex<Allocator>>,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let image_type = match desc.dimension {
            Dimension::Texture1D => vk::ImageType::TYPE_1D,
            Dimension::Texture2D => vk::ImageType::TYPE_2D,
            Dimension::Texture3D => vk::ImageType::TYPE_3D,
            other => return Err(eyre!("\"{}\" has no image type for {:?}", name, other)),
        };
        let extent = vk::Extent3D {
            width: desc.width as u32,
            height: desc.height.max(1),
            depth: desc.depth().max(1),
        };
        let array_layers = desc.array_layers().max(1);

        let aspect = image_aspect(desc.format);
        let mut usage = vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED;
        if desc.usage.unordered_access {
            usage |= vk::ImageUsageFlags::STORAGE;
        }
        if desc.usage.render_target {
            usage |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if desc.usage.depth_stencil {
            usage |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }

        let mut flags = vk::ImageCreateFlags::MUTABLE_FORMAT;
        if image_type == vk::ImageType::TYPE_2D && array_layers >= 6 && extent.width == extent.height {
            flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
        }

        let image = {
            let info = vk::ImageCreateInfo::default()
                .flags(flags)
                .format(desc.format)
                .usage(usage)
                .extent(extent)
                .image_type(image_type)
                .mip_levels(desc.mip_levels.max(1))
                .array_layers(array_layers)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL)
                .initial_layout(vk::ImageLayout::UNDEFINED);
            unsafe { device.create_image(&info, None)? }
        };
        let reqs = unsafe { device.get_image_memory_requirements(image) };
        let allocation = memory_allocator
            .lock()
            .map_err(|e| eyre!(e.to_string()))?
            .allocate(&AllocationCreateDesc {
                name,
                requirements: reqs,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::DedicatedImage(image),
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.destroy_image(image, None) };
                return Err(err.into());
            }
        };
        unsafe {
            device.bind_image_memory(image, allocation.memory(), allocation.offset())?;
        }

        log::trace!(
            "Created {:?} image \"{}\" {:?} {}x{}x{} ({} mips, {} layers)",
            image_type, name, desc.format, extent.width, extent.height, extent.depth,
            desc.mip_levels, array_layers,
        );

        Ok(Self {
            image,
            format: desc.format,
            dimension: desc.dimension,
            extent,
            mip_levels: desc.mip_levels.max(1),
            array_layers,
            aspect,
            flags,

            allocation: Some(allocation),
            memory_allocator,
            device,
        })
    }

    pub fn is_depth(&self) -> bool {
        self.aspect.contains(vk::ImageAspectFlags::DEPTH)
    }

    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: 0,
            level_count: vk::REMAINING_MIP_LEVELS,
            base_array_layer: 0,
            layer_count: vk::REMAINING_ARRAY_LAYERS,
        }
    }
}

impl Drop for AllocatedImage {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.memory_allocator.lock() {
                Ok(mut allocator) => {
                    if let Err(err) = allocator.free(allocation) {
                        log::error!("Failed to free image memory: {}", err);
                    }
                }
                Err(err) => log::error!("Memory allocator poisoned: {}", err),
            }
        }
        unsafe {
            self.device.destroy_image(self.image, None);
        }
    }
}

fn image_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        f if tokens::is_depth_format(f) => vk::ImageAspectFlags::DEPTH,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_stencil_formats_carry_both_aspects() {
        assert_eq!(
            image_aspect(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        );
        assert_eq!(image_aspect(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(image_aspect(vk::Format::R8G8B8A8_UNORM), vk::ImageAspectFlags::COLOR);
    }
}
