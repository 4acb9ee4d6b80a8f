use std::ffi::{c_char, CStr};
use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt};
use color_eyre::Result;
use gpu_descriptor::{CreatePoolError, DescriptorDevice, DescriptorPoolCreateFlags, DescriptorTotalCount, DeviceAllocationError};

/// The physical device the replay runs on and its one queue family. The family must
/// support compute, timestamps and, when a surface is attached, presentation.
pub struct SelectedDevice {
    pub physical: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub queue_family: u32,
}

pub fn select_physical_device(
    instance: &ash::Instance,
    surface: Option<(&vk::SurfaceKHR, &ash::khr::surface::Instance)>,
) -> Result<SelectedDevice> {
    let req_device_exts = required_device_extensions(surface.is_some());

    let (physical, queue_family) = unsafe {
        instance
            .enumerate_physical_devices()?
            .into_iter()
            // Filter out devices that do not contain the required device extensions
            .filter(|device| {
                let supported_extensions = instance
                    .enumerate_device_extension_properties(*device)
                    .unwrap_or_default();

                req_device_exts.iter().all(|req_ext| {
                    let supported = supported_extensions
                        .iter()
                        .any(|sup_ext| sup_ext.extension_name_as_c_str() == Ok(*req_ext));
                    if !supported {
                        log::debug!("Device extension not supported: {:?}", req_ext);
                    }
                    supported
                })
            })
            .filter(|device| RequiredDeviceFeatures::new(device, instance).has_all())
            // Filter out devices without a queue that can dispatch, time and present
            .filter_map(|device| {
                instance
                    .get_physical_device_queue_family_properties(device)
                    .iter()
                    .enumerate()
                    .position(|(i, q)| {
                        let supports_compute = q.queue_flags.contains(vk::QueueFlags::COMPUTE);
                        let supports_timestamps = q.timestamp_valid_bits > 0;
                        let supports_present = surface.is_none_or(|(surface, surface_loader)| {
                            surface_loader
                                .get_physical_device_surface_support(device, i as u32, *surface)
                                .unwrap_or(false)
                        });
                        supports_compute && supports_timestamps && supports_present
                    })
                    .map(|index| (device, index as u32))
            })
            .min_by_key(|(device, _)| {
                let props = instance.get_physical_device_properties(*device);
                match props.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => 0,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                    vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
                    vk::PhysicalDeviceType::CPU => 3,
                    vk::PhysicalDeviceType::OTHER => 4,
                    _ => 5,
                }
            })
            .ok_or_eyre("No suitable physical device found")?
    };

    let properties = unsafe { instance.get_physical_device_properties(physical) };
    log::info!(
        "Selected {:?} (queue family {}, timestamp period {} ns)",
        properties.device_name_as_c_str().unwrap_or(c"unknown"),
        queue_family,
        properties.limits.timestamp_period,
    );

    Ok(SelectedDevice {
        physical,
        properties,
        queue_family,
    })
}

pub fn create_logical_device(
    instance: &ash::Instance,
    selected: &SelectedDevice,
    present: bool,
) -> Result<(ash::Device, vk::Queue)> {
    let queue_priorities = [1.0];
    let queue_create_infos = [
        vk::DeviceQueueCreateInfo::default()
            .queue_family_index(selected.queue_family)
            .queue_priorities(&queue_priorities),
    ];

    let device = {
        let enabled_extension_names = required_device_extensions(present)
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();
        let mut enabled_features = RequiredDeviceFeatures::new(&selected.physical, instance);
        if !enabled_features.has_all() {
            return Err(eyre!("Required features not supported"));
        }
        let mut features = enabled_features.features2();

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&enabled_extension_names)
            .push_next(&mut features);

        unsafe {
            instance.create_device(selected.physical, &device_create_info, None)?
        }
    };

    let queue = unsafe { device.get_device_queue(selected.queue_family, 0) };
    Ok((device, queue))
}

fn required_device_extensions(present: bool) -> Vec<&'static CStr> {
    let mut exts = Vec::new();
    if present {
        exts.push(ash::khr::swapchain::NAME);
    }

    #[cfg(target_os = "macos")]
    exts.push(ash::khr::portability_subset::NAME);

    exts
}

struct RequiredDeviceFeatures<'a> {
    features: vk::PhysicalDeviceFeatures,
    vulkan_12_features: vk::PhysicalDeviceVulkan12Features<'a>,
    vulkan_13_features: vk::PhysicalDeviceVulkan13Features<'a>,
}

impl<'a> RequiredDeviceFeatures<'a> {
    /// Queries what the device supports. Only the features the replay needs are enabled
    /// by `features2`.
    fn new(physical_device: &vk::PhysicalDevice, instance: &ash::Instance) -> Self {
        let mut vulkan_12_features = vk::PhysicalDeviceVulkan12Features::default();
        let mut vulkan_13_features = vk::PhysicalDeviceVulkan13Features::default();
        let features = {
            let mut features = vk::PhysicalDeviceFeatures2::default()
                .push_next(&mut vulkan_12_features)
                .push_next(&mut vulkan_13_features);
            unsafe {
                instance.get_physical_device_features2(*physical_device, &mut features);
            }
            features.features
        };
        vulkan_12_features.p_next = std::ptr::null_mut();
        vulkan_13_features.p_next = std::ptr::null_mut();

        Self {
            features,
            vulkan_12_features,
            vulkan_13_features,
        }
    }

    fn has_all(&self) -> bool {
        self.vulkan_12_features.timeline_semaphore == vk::TRUE
            && self.vulkan_12_features.buffer_device_address == vk::TRUE
            && self.vulkan_12_features.descriptor_indexing == vk::TRUE
            && self.vulkan_12_features.descriptor_binding_partially_bound == vk::TRUE
            && self.vulkan_12_features.runtime_descriptor_array == vk::TRUE
            && self.vulkan_13_features.synchronization2 == vk::TRUE
    }

    fn features2(&'a mut self) -> vk::PhysicalDeviceFeatures2<'a> {
        // Optional features stay on when supported; kernels may rely on them.
        let optional = vk::PhysicalDeviceFeatures::default()
            .shader_int64(self.features.shader_int64 == vk::TRUE)
            .shader_int16(self.features.shader_int16 == vk::TRUE)
            .shader_float64(self.features.shader_float64 == vk::TRUE)
            .sampler_anisotropy(self.features.sampler_anisotropy == vk::TRUE)
            .shader_storage_image_write_without_format(
                self.features.shader_storage_image_write_without_format == vk::TRUE,
            )
            .shader_storage_image_read_without_format(
                self.features.shader_storage_image_read_without_format == vk::TRUE,
            );
        let sampler_filter_minmax = self.vulkan_12_features.sampler_filter_minmax;
        let shader_float16 = self.vulkan_12_features.shader_float16;

        self.vulkan_12_features = vk::PhysicalDeviceVulkan12Features::default()
            .timeline_semaphore(true)
            .buffer_device_address(true)
            .descriptor_indexing(true)
            .descriptor_binding_partially_bound(true)
            .runtime_descriptor_array(true)
            .sampler_filter_minmax(sampler_filter_minmax == vk::TRUE)
            .shader_float16(shader_float16 == vk::TRUE);
        self.vulkan_13_features = vk::PhysicalDeviceVulkan13Features::default()
            .synchronization2(true);

        vk::PhysicalDeviceFeatures2::default()
            .features(optional)
            .push_next(&mut self.vulkan_12_features)
            .push_next(&mut self.vulkan_13_features)
    }
}

/// Lets `gpu-descriptor` create pools and sets on an `ash` device.
pub struct DescriptorAshDevice(pub Arc<ash::Device>);

impl From<Arc<ash::Device>> for DescriptorAshDevice {
    fn from(device: Arc<ash::Device>) -> Self {
        Self(device)
    }
}

impl DescriptorDevice<vk::DescriptorSetLayout, vk::DescriptorPool, vk::DescriptorSet>
for DescriptorAshDevice
{
    unsafe fn create_descriptor_pool(
        &self,
        descriptor_count: &DescriptorTotalCount,
        max_sets: u32,
        flags: DescriptorPoolCreateFlags,
    ) -> Result<vk::DescriptorPool, CreatePoolError> {
        let counts = [
            (vk::DescriptorType::SAMPLER, descriptor_count.sampler),
            (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, descriptor_count.combined_image_sampler),
            (vk::DescriptorType::SAMPLED_IMAGE, descriptor_count.sampled_image),
            (vk::DescriptorType::STORAGE_IMAGE, descriptor_count.storage_image),
            (vk::DescriptorType::UNIFORM_TEXEL_BUFFER, descriptor_count.uniform_texel_buffer),
            (vk::DescriptorType::STORAGE_TEXEL_BUFFER, descriptor_count.storage_texel_buffer),
            (vk::DescriptorType::UNIFORM_BUFFER, descriptor_count.uniform_buffer),
            (vk::DescriptorType::STORAGE_BUFFER, descriptor_count.storage_buffer),
            (vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, descriptor_count.uniform_buffer_dynamic),
            (vk::DescriptorType::STORAGE_BUFFER_DYNAMIC, descriptor_count.storage_buffer_dynamic),
            (vk::DescriptorType::INPUT_ATTACHMENT, descriptor_count.input_attachment),
        ];
        let pool_sizes: smallvec::SmallVec<[vk::DescriptorPoolSize; 11]> = counts
            .iter()
            .filter(|(_, count)| *count != 0)
            .map(|&(ty, descriptor_count)| vk::DescriptorPoolSize { ty, descriptor_count })
            .collect();

        if descriptor_count.acceleration_structure != 0
            || descriptor_count.inline_uniform_block_bytes != 0
            || descriptor_count.inline_uniform_block_bindings != 0
        {
            log::error!(
                "Descriptor pool requested unsupported descriptor kinds ({} acceleration structures, {} inline uniform bytes)",
                descriptor_count.acceleration_structure,
                descriptor_count.inline_uniform_block_bytes,
            );
            return Err(CreatePoolError::OutOfHostMemory);
        }

        let mut ash_flags = vk::DescriptorPoolCreateFlags::empty();

        if flags.contains(DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET) {
            ash_flags |= vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET;
        }

        if flags.contains(DescriptorPoolCreateFlags::UPDATE_AFTER_BIND) {
            ash_flags |= vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND;
        }

        let result = unsafe {
            self.0.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::default()
                    .max_sets(max_sets)
                    .pool_sizes(&pool_sizes)
                    .flags(ash_flags),
                None,
            )
        };

        match result {
            Ok(pool) => Ok(pool),
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY) => Err(CreatePoolError::OutOfDeviceMemory),
            Err(vk::Result::ERROR_FRAGMENTATION) => Err(CreatePoolError::Fragmentation),
            Err(err) => {
                log::error!("Unexpected result creating descriptor pool: {}", err);
                Err(CreatePoolError::OutOfHostMemory)
            }
        }
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe {
            self.0.destroy_descriptor_pool(pool, None)
        }
    }

    unsafe fn alloc_descriptor_sets<'a>(
        &self,
        pool: &mut vk::DescriptorPool,
        layouts: impl ExactSizeIterator<Item = &'a vk::DescriptorSetLayout>,
        sets: &mut impl Extend<vk::DescriptorSet>,
    ) -> Result<(), DeviceAllocationError> {
        let set_layouts: smallvec::SmallVec<[_; 16]> = layouts.copied().collect();

        unsafe {
            match self.0.allocate_descriptor_sets(
                &vk::DescriptorSetAllocateInfo::default()
                    .set_layouts(&set_layouts)
                    .descriptor_pool(*pool),
            ) {
                Ok(allocated) => {
                    sets.extend(allocated);
                    Ok(())
                }
                Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY) => {
                    Err(DeviceAllocationError::OutOfHostMemory)
                }
                Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY) => {
                    Err(DeviceAllocationError::OutOfDeviceMemory)
                }
                Err(vk::Result::ERROR_FRAGMENTED_POOL) => Err(DeviceAllocationError::FragmentedPool),
                Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY) => Err(DeviceAllocationError::OutOfPoolMemory),
                Err(err) => {
                    log::error!("Unexpected result allocating descriptor sets: {}", err);
                    Err(DeviceAllocationError::OutOfHostMemory)
                }
            }
        }
    }

    unsafe fn dealloc_descriptor_sets(
        &self,
        pool: &mut vk::DescriptorPool,
        sets: impl Iterator<Item = vk::DescriptorSet>,
    ) {
        let sets: smallvec::SmallVec<[_; 16]> = sets.collect();
        unsafe {
            if let Err(err) = self.0.free_descriptor_sets(*pool, &sets) {
                log::error!("Failed to free {} descriptor sets: {}", sets.len(), err);
            }
        }
    }
}
