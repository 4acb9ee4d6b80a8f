//! Vulkan implementation of the replay device.

pub mod barrier;
pub mod buffer;
pub mod descriptor_set_layout_builder;
pub mod device;
pub mod frame;
pub mod image;
pub mod instance;
pub mod pipeline;
pub mod swapchain;
pub mod tables;

use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex};
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use gpu_allocator::MemoryLocation;
use gpu_descriptor::DescriptorAllocator;
use winit::window::Window;
use crate::replayer::config::DeviceConfig;
use crate::replayer::contexts::descriptor_ctx::views::ViewInstall;
use crate::replayer::contexts::frame_ctx::FRAME_COUNT;
use crate::replayer::contexts::resource_ctx::resource::AllocationDesc;
use crate::replayer::contexts::resource_ctx::upload::SubresourceFootprint;
use crate::replayer::device::{CopyMode, HostBufferUsage, ReplayDevice, TableSizes, Transition};
use crate::replayer::error::ReplayError;
use crate::replayer::vk::buffer::AllocatedBuffer;
use crate::replayer::vk::device::DescriptorAshDevice;
use crate::replayer::vk::frame::{CommandList, TimestampQueries};
use crate::replayer::vk::image::AllocatedImage;
use crate::replayer::vk::instance::ReplayInstance;
use crate::replayer::vk::pipeline::ComputePipeline;
use crate::replayer::vk::swapchain::Presenter;
use crate::replayer::vk::tables::{DescriptorTables, SharedDescriptorAllocator};
use crate::replayer::workload::layout::{BindingLayout, RootViewKind, TableKind, ROOT_PARAMETER_SIZE};

/// GPU-resident form of a workload resource.
pub enum GpuResource {
    Buffer(AllocatedBuffer),
    Image(AllocatedImage),
}

pub struct VulkanDevice {
    pub logical: Arc<ash::Device>,
    pub physical: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,

    queue: vk::Queue,
    queue_family: u32,
    /// Signaled with the submission counter of every submit.
    timeline: vk::Semaphore,
    anisotropy: bool,

    presenter: Option<Presenter>,
    acquired_images: [Option<u32>; FRAME_COUNT],

    memory_allocator: ManuallyDrop<Arc<Mutex<Allocator>>>,
    descriptor_allocator: SharedDescriptorAllocator,

    instance: ReplayInstance,
    // Outlives the surface.
    _window: Option<Arc<Window>>,
}

const RESOURCE_BUFFER_USAGE: vk::BufferUsageFlags = vk::BufferUsageFlags::from_raw(
    vk::BufferUsageFlags::TRANSFER_DST.as_raw()
        | vk::BufferUsageFlags::STORAGE_BUFFER.as_raw()
        | vk::BufferUsageFlags::UNIFORM_BUFFER.as_raw()
        | vk::BufferUsageFlags::UNIFORM_TEXEL_BUFFER.as_raw()
        | vk::BufferUsageFlags::STORAGE_TEXEL_BUFFER.as_raw()
        | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS.as_raw(),
);

impl VulkanDevice {
    pub fn new(config: &DeviceConfig, window: Option<Arc<Window>>) -> Result<Self> {
        let instance = ReplayInstance::new(config, window.as_deref())?;
        let surface = window
            .as_deref()
            .map(|window| instance.create_surface(window))
            .transpose()?;

        let selected = device::select_physical_device(
            &instance.instance,
            surface.as_ref().map(|(surface, loader)| (surface, loader)),
        )?;
        let (logical, queue) = device::create_logical_device(
            &instance.instance,
            &selected,
            surface.is_some(),
        )?;

        let memory_allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: logical.clone(),
            physical_device: selected.physical,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: true,
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })?;
        let logical = Arc::new(logical);

        let timeline = {
            let mut type_info = vk::SemaphoreTypeCreateInfo::default()
                .semaphore_type(vk::SemaphoreType::TIMELINE)
                .initial_value(0);
            let info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
            unsafe { logical.create_semaphore(&info, None)? }
        };

        let presenter = match (surface, &window) {
            (Some((surface, surface_loader)), Some(window)) => Some(Presenter::new(
                &instance.instance,
                selected.physical,
                surface,
                surface_loader,
                window,
                logical.clone(),
            )?),
            _ => None,
        };

        let anisotropy = unsafe {
            instance
                .instance
                .get_physical_device_features(selected.physical)
                .sampler_anisotropy
                == vk::TRUE
        };

        let descriptor_allocator: DescriptorAllocator<vk::DescriptorPool, vk::DescriptorSet>
            = DescriptorAllocator::new(0);

        Ok(Self {
            logical,
            physical: selected.physical,
            properties: selected.properties,

            queue,
            queue_family: selected.queue_family,
            timeline,
            anisotropy,

            presenter,
            acquired_images: [None; FRAME_COUNT],

            memory_allocator: ManuallyDrop::new(Arc::new(Mutex::new(memory_allocator))),
            descriptor_allocator: Arc::new(Mutex::new(descriptor_allocator)),

            instance,
            _window: window,
        })
    }

    fn new_buffer(&self, name: &str, size: u64, usage: vk::BufferUsageFlags, location: MemoryLocation) -> Result<AllocatedBuffer> {
        AllocatedBuffer::new(
            size,
            usage,
            name,
            location,
            Arc::clone(&self.memory_allocator),
            self.logical.clone(),
        )
    }

    fn push_constants(&self, cmd: &CommandList, pipeline: &ComputePipeline, index: u32, bytes: &[u8]) -> Result<()> {
        let range = index
            .checked_mul(ROOT_PARAMETER_SIZE)
            .and_then(|offset| offset.checked_add(bytes.len() as u32).map(|end| (offset, end)));
        let Some((offset, _)) = range.filter(|&(_, end)| end <= pipeline.push_constant_size) else {
            log::error!(
                "Root parameter {} lies outside the {} push constant bytes of the pipeline",
                index,
                pipeline.push_constant_size,
            );
            return Err(ReplayError::execution(
                "root parameters",
                format!("parameter {} outside {} push constant bytes", index, pipeline.push_constant_size),
            ).into());
        };
        unsafe {
            self.logical.cmd_push_constants(
                cmd.command_buffer,
                pipeline.layout,
                vk::ShaderStageFlags::COMPUTE,
                offset,
                bytes,
            );
        }
        Ok(())
    }
}

impl ReplayDevice for VulkanDevice {
    type Allocation = GpuResource;
    type Buffer = AllocatedBuffer;
    type HostBuffer = AllocatedBuffer;
    type Pipeline = ComputePipeline;
    type Tables = DescriptorTables;
    type CommandList = CommandList;
    type QueryPool = TimestampQueries;

    fn create_allocation(&self, name: &str, desc: &AllocationDesc) -> Result<GpuResource> {
        if desc.is_buffer() {
            let buffer = self.new_buffer(name, desc.width, RESOURCE_BUFFER_USAGE, MemoryLocation::GpuOnly)?;
            Ok(GpuResource::Buffer(buffer))
        } else {
            let image = AllocatedImage::new(
                name,
                desc,
                Arc::clone(&self.memory_allocator),
                self.logical.clone(),
            )?;
            Ok(GpuResource::Image(image))
        }
    }

    fn create_buffer(&self, name: &str, size: u64) -> Result<AllocatedBuffer> {
        self.new_buffer(
            name,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
        )
    }

    fn create_host_buffer(&self, name: &str, size: u64, usage: HostBufferUsage) -> Result<AllocatedBuffer> {
        match usage {
            HostBufferUsage::Upload => {
                self.new_buffer(name, size, vk::BufferUsageFlags::TRANSFER_SRC, MemoryLocation::CpuToGpu)
            }
            HostBufferUsage::Readback => {
                self.new_buffer(name, size, vk::BufferUsageFlags::TRANSFER_DST, MemoryLocation::GpuToCpu)
            }
        }
    }

    fn create_tables(&self, sizes: TableSizes) -> Result<DescriptorTables> {
        DescriptorTables::new(
            sizes,
            self.properties.limits,
            self.anisotropy,
            self.descriptor_allocator.clone(),
            self.logical.clone(),
        )
    }

    fn create_pipeline(
        &self,
        kernel: &[u32],
        layout: &BindingLayout,
        entry_point: &str,
        tables: &DescriptorTables,
    ) -> Result<ComputePipeline> {
        ComputePipeline::new(
            kernel,
            layout,
            entry_point,
            tables,
            &self.properties.limits,
            self.logical.clone(),
        )
    }

    fn install_view(
        &self,
        tables: &mut DescriptorTables,
        slot: u32,
        view: ViewInstall<'_, GpuResource>,
    ) -> Result<()> {
        tables.install(slot, view)
    }

    fn create_command_list(&self, slot: usize) -> Result<CommandList> {
        CommandList::new(slot, self.queue_family, self.logical.clone())
    }

    fn create_query_pool(&self, count: u32) -> Result<TimestampQueries> {
        TimestampQueries::new(count, self.logical.clone())
    }

    fn resource_address(&self, allocation: &GpuResource) -> Result<u64> {
        match allocation {
            GpuResource::Buffer(buffer) => buffer
                .address
                .ok_or_eyre("Buffer was created without a device address"),
            GpuResource::Image(_) => Err(eyre!("Textures have no device address")),
        }
    }

    fn timestamp_frequency(&self) -> f64 {
        1.0e9 / self.properties.limits.timestamp_period as f64
    }

    fn has_surface(&self) -> bool {
        self.presenter.is_some()
    }

    fn begin(&self, cmd: &mut CommandList) -> Result<()> {
        cmd.begin()
    }

    fn transition(&self, cmd: &mut CommandList, transitions: &[Transition<'_, GpuResource>]) {
        barrier::record_transitions(&self.logical, cmd.command_buffer, transitions);
    }

    fn transition_buffers(&self, cmd: &mut CommandList, transitions: &[Transition<'_, AllocatedBuffer>]) {
        barrier::record_buffer_transitions(&self.logical, cmd.command_buffer, transitions);
    }

    fn copy_host_to_buffer(
        &self,
        cmd: &mut CommandList,
        src: &AllocatedBuffer,
        dst: &AllocatedBuffer,
        size: u64,
    ) {
        let size = size.min(src.size).min(dst.size);
        if size == 0 {
            return;
        }
        let region = [vk::BufferCopy::default().size(size)];
        unsafe {
            self.logical.cmd_copy_buffer(cmd.command_buffer, src.buffer, dst.buffer, &region);
        }
    }

    fn copy_buffer_to_allocation(
        &self,
        cmd: &mut CommandList,
        src: &AllocatedBuffer,
        dst: &GpuResource,
        footprints: &[SubresourceFootprint],
        mode: CopyMode,
    ) {
        match dst {
            GpuResource::Buffer(buffer) => {
                let region = [vk::BufferCopy::default().size(src.size.min(buffer.size))];
                unsafe {
                    self.logical.cmd_copy_buffer(cmd.command_buffer, src.buffer, buffer.buffer, &region);
                }
            }
            GpuResource::Image(image) => {
                // Staging data of depth formats is laid out for the depth aspect alone.
                let aspect_mask = match mode {
                    CopyMode::PerSubresource if image.is_depth() => vk::ImageAspectFlags::DEPTH,
                    _ => image.aspect,
                };
                let regions = footprints
                    .iter()
                    .map(|footprint| vk::BufferImageCopy {
                        buffer_offset: footprint.offset,
                        buffer_row_length: 0,
                        buffer_image_height: 0,
                        image_subresource: vk::ImageSubresourceLayers {
                            aspect_mask,
                            mip_level: footprint.mip_level,
                            base_array_layer: footprint.array_layer,
                            layer_count: 1,
                        },
                        image_offset: vk::Offset3D::default(),
                        image_extent: vk::Extent3D {
                            width: footprint.width,
                            height: footprint.height,
                            depth: footprint.depth,
                        },
                    })
                    .collect::<Vec<_>>();

                match mode {
                    CopyMode::Full => unsafe {
                        self.logical.cmd_copy_buffer_to_image(
                            cmd.command_buffer,
                            src.buffer,
                            image.image,
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            &regions,
                        );
                    },
                    CopyMode::PerSubresource => {
                        for region in &regions {
                            unsafe {
                                self.logical.cmd_copy_buffer_to_image(
                                    cmd.command_buffer,
                                    src.buffer,
                                    image.image,
                                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                                    std::slice::from_ref(region),
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    fn bind_pipeline(&self, cmd: &mut CommandList, pipeline: &ComputePipeline) {
        unsafe {
            self.logical.cmd_bind_pipeline(
                cmd.command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                pipeline.pipeline,
            );
        }
    }

    fn bind_tables(&self, cmd: &mut CommandList, pipeline: &ComputePipeline, tables: &DescriptorTables) -> Result<()> {
        let sets = tables.sets().map_err(|err| {
            log::error!("Cannot bind descriptor tables: {}", err);
            ReplayError::execution("bind tables", err)
        })?;
        unsafe {
            self.logical.cmd_bind_descriptor_sets(
                cmd.command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                pipeline.layout,
                0,
                &sets,
                &[],
            );
        }
        Ok(())
    }

    fn set_table(
        &self,
        cmd: &mut CommandList,
        pipeline: &ComputePipeline,
        index: u32,
        table: TableKind,
        offset: u32,
    ) -> Result<()> {
        log::trace!("Root parameter {}: {:?} table at slot {}", index, table, offset);
        let words = [offset, 0u32];
        self.push_constants(cmd, pipeline, index, bytemuck::cast_slice(&words))
    }

    fn set_root_address(
        &self,
        cmd: &mut CommandList,
        pipeline: &ComputePipeline,
        index: u32,
        kind: RootViewKind,
        address: u64,
    ) -> Result<()> {
        log::trace!("Root parameter {}: {:?} at {:#x}", index, kind, address);
        self.push_constants(cmd, pipeline, index, bytemuck::bytes_of(&address))
    }

    fn reset_queries(&self, cmd: &mut CommandList, pool: &TimestampQueries, count: u32) {
        unsafe {
            self.logical
                .cmd_reset_query_pool(cmd.command_buffer, pool.pool, 0, count.min(pool.count));
        }
    }

    fn write_timestamp(&self, cmd: &mut CommandList, pool: &TimestampQueries, query: u32) {
        unsafe {
            self.logical.cmd_write_timestamp2(
                cmd.command_buffer,
                vk::PipelineStageFlags2::ALL_COMMANDS,
                pool.pool,
                query,
            );
        }
    }

    fn dispatch(&self, cmd: &mut CommandList, groups: [u32; 3]) {
        unsafe {
            self.logical.cmd_dispatch(cmd.command_buffer, groups[0], groups[1], groups[2]);
        }
    }

    fn global_barrier(&self, cmd: &mut CommandList) {
        barrier::record_global_barrier(&self.logical, cmd.command_buffer);
    }

    fn resolve_timestamps(
        &self,
        cmd: &mut CommandList,
        pool: &TimestampQueries,
        count: u32,
        readback: &AllocatedBuffer,
    ) {
        unsafe {
            self.logical.cmd_copy_query_pool_results(
                cmd.command_buffer,
                pool.pool,
                0,
                count.min(pool.count),
                readback.buffer,
                0,
                size_of::<u64>() as u64,
                vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
            );
        }

        let memory_barrier = [vk::MemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::ALL_TRANSFER)
            .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::HOST)
            .dst_access_mask(vk::AccessFlags2::HOST_READ)];
        let dep_info = vk::DependencyInfo::default().memory_barriers(&memory_barrier);
        unsafe {
            self.logical.cmd_pipeline_barrier2(cmd.command_buffer, &dep_info);
        }
    }

    fn clear_presentable(&mut self, cmd: &mut CommandList, slot: usize) -> Result<()> {
        let presenter = self.presenter.as_ref().ok_or_eyre("No presentation surface")?;
        let image_index = presenter.acquire(slot)?;
        presenter.record_clear(cmd.command_buffer, image_index)?;
        self.acquired_images[slot] = Some(image_index);
        Ok(())
    }

    fn submit(&self, cmd: &mut CommandList, slot: usize, signal_value: u64) -> Result<()> {
        unsafe {
            self.logical.end_command_buffer(cmd.command_buffer)?;
        }

        let mut wait_infos = Vec::new();
        let mut signal_infos = vec![
            vk::SemaphoreSubmitInfo::default()
                .semaphore(self.timeline)
                .value(signal_value)
                .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
        ];
        if let (Some(presenter), Some(image_index)) = (&self.presenter, self.acquired_images[slot]) {
            wait_infos.push(
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(presenter.acquire_semaphore(slot))
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
            );
            signal_infos.push(
                vk::SemaphoreSubmitInfo::default()
                    .semaphore(presenter.render_semaphore(image_index).ok_or_eyre("No semaphore for the acquired image")?)
                    .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS),
            );
        }

        let command_buffer_infos = [vk::CommandBufferSubmitInfo::default().command_buffer(cmd.command_buffer)];
        let submit_info = [vk::SubmitInfo2::default()
            .wait_semaphore_infos(&wait_infos)
            .command_buffer_infos(&command_buffer_infos)
            .signal_semaphore_infos(&signal_infos)];
        unsafe {
            self.logical.queue_submit2(self.queue, &submit_info, vk::Fence::null())?;
        }
        log::trace!("Frame {}: submitted, signals {}", slot, signal_value);
        Ok(())
    }

    fn present(&mut self, slot: usize) -> Result<()> {
        let presenter = self.presenter.as_ref().ok_or_eyre("No presentation surface")?;
        let image_index = self.acquired_images[slot]
            .take()
            .ok_or_else(|| eyre!("Frame {} has no acquired image to present", slot))?;
        presenter.present(self.queue, image_index)
    }

    fn wait(&self, value: u64) -> Result<()> {
        let semaphores = [self.timeline];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe {
            self.logical.wait_semaphores(&wait_info, u64::MAX)?;
        }
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.logical.device_wait_idle() {
                log::error!("Failed to wait for the device to idle: {}", err);
            }

            self.presenter = None;

            match self.descriptor_allocator.lock() {
                Ok(mut allocator) => allocator.cleanup(&DescriptorAshDevice::from(self.logical.clone())),
                Err(err) => log::error!("Descriptor allocator poisoned: {}", err),
            }

            self.logical.destroy_semaphore(self.timeline, None);
            ManuallyDrop::drop(&mut self.memory_allocator);
            self.logical.destroy_device(None);
        }
        // The instance is destroyed when the field drops.
    }
}
