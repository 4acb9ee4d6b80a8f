use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::OptionExt;
use color_eyre::Result;
use winit::window::Window;
use crate::replayer::contexts::frame_ctx::FRAME_COUNT;
use crate::replayer::vk::barrier;

const CLEAR_COLOR: [f32; 4] = [0.1, 0.2, 0.3, 1.0];

/// Surface, swapchain and the semaphores that order acquire, clear and present.
pub struct Presenter {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::khr::swapchain::Device,
    pub images: Vec<vk::Image>,
    pub extent: vk::Extent2D,
    pub format: vk::Format,

    /// Signaled by acquire, one per frame slot.
    acquire_semaphores: [vk::Semaphore; FRAME_COUNT],
    /// Signaled by the submission that cleared the image, one per swapchain image.
    render_semaphores: Vec<vk::Semaphore>,

    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    device: Arc<ash::Device>,
}

impl Presenter {
    pub fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: ash::khr::surface::Instance,
        window: &Window,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let surface_capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let surface_format = {
            let formats = unsafe {
                surface_loader.get_physical_device_surface_formats(physical_device, surface)?
            };
            formats
                .iter()
                .find(|f| f.format == vk::Format::B8G8R8A8_UNORM)
                .or_else(|| formats.first())
                .copied()
                .ok_or_eyre("Surface reports no formats")?
        };
        let present_mode = {
            let modes = unsafe {
                surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
            };
            if modes.contains(&vk::PresentModeKHR::MAILBOX) {
                vk::PresentModeKHR::MAILBOX
            } else {
                vk::PresentModeKHR::FIFO
            }
        };

        let image_extent = {
            if surface_capabilities.current_extent.width != u32::MAX {
                surface_capabilities.current_extent
            } else {
                let window_size = window.inner_size();
                vk::Extent2D {
                    width: window_size.width.clamp(
                        surface_capabilities.min_image_extent.width,
                        surface_capabilities.max_image_extent.width,
                    ),
                    height: window_size.height.clamp(
                        surface_capabilities.min_image_extent.height,
                        surface_capabilities.max_image_extent.height,
                    ),
                }
            }
        };

        let min_image_count = {
            let min = surface_capabilities.min_image_count;
            let max = surface_capabilities.max_image_count;
            let wanted = (FRAME_COUNT as u32).max(min);
            if max > 0 { wanted.min(max) } else { wanted }
        };
        let pre_transform = if surface_capabilities
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            surface_capabilities.current_transform
        };

        let swapchain_loader = ash::khr::swapchain::Device::new(instance, &device);
        let swapchain_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(min_image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(image_extent)
            .image_usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .image_array_layers(1);
        let swapchain = unsafe {
            swapchain_loader.create_swapchain(&swapchain_info, None)?
        };
        let images = unsafe { swapchain_loader.get_swapchain_images(swapchain)? };

        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let acquire_semaphores = unsafe {
            [
                device.create_semaphore(&semaphore_info, None)?,
                device.create_semaphore(&semaphore_info, None)?,
            ]
        };
        let render_semaphores = images
            .iter()
            .map(|_| unsafe { device.create_semaphore(&semaphore_info, None) })
            .collect::<ash::prelude::VkResult<Vec<_>>>()?;

        log::info!(
            "Created swapchain: {} images, {:?}, {:?}, {}x{}",
            images.len(),
            surface_format.format,
            present_mode,
            image_extent.width,
            image_extent.height,
        );

        Ok(Self {
            swapchain,
            swapchain_loader,
            images,
            extent: image_extent,
            format: surface_format.format,

            acquire_semaphores,
            render_semaphores,

            surface,
            surface_loader,
            device,
        })
    }

    pub fn acquire(&self, slot: usize) -> Result<u32> {
        let (index, suboptimal) = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                self.acquire_semaphores[slot],
                vk::Fence::null(),
            )?
        };
        if suboptimal {
            log::debug!("Swapchain is suboptimal for the surface");
        }
        Ok(index)
    }

    /// Clears the image and leaves it ready to present.
    pub fn record_clear(&self, cmd: vk::CommandBuffer, image_index: u32) -> Result<()> {
        let image = *self
            .images
            .get(image_index as usize)
            .ok_or_eyre("Acquired image index out of range")?;

        barrier::transition_image_layout(
            &self.device,
            cmd,
            image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        let clear_value = vk::ClearColorValue { float32: CLEAR_COLOR };
        let range = [vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }];
        unsafe {
            self.device.cmd_clear_color_image(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear_value,
                &range,
            );
        }
        barrier::transition_image_layout(
            &self.device,
            cmd,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        Ok(())
    }

    pub fn acquire_semaphore(&self, slot: usize) -> vk::Semaphore {
        self.acquire_semaphores[slot]
    }

    pub fn render_semaphore(&self, image_index: u32) -> Option<vk::Semaphore> {
        self.render_semaphores.get(image_index as usize).copied()
    }

    pub fn present(&self, queue: vk::Queue, image_index: u32) -> Result<()> {
        let wait_semaphores = [self
            .render_semaphore(image_index)
            .ok_or_eyre("Presented image index out of range")?];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        let suboptimal = unsafe {
            self.swapchain_loader.queue_present(queue, &present_info)?
        };
        if suboptimal {
            log::debug!("Presented to a suboptimal swapchain");
        }
        Ok(())
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        unsafe {
            for semaphore in self.acquire_semaphores.iter().chain(&self.render_semaphores) {
                self.device.destroy_semaphore(*semaphore, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}
