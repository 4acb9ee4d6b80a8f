use std::ffi::CString;
use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use crate::replayer::vk::tables::DescriptorTables;
use crate::replayer::workload::layout::BindingLayout;

pub struct ComputePipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub push_constant_size: u32,

    device: Arc<ash::Device>,
}

impl ComputePipeline {
    pub fn new(
        kernel: &[u32],
        binding_layout: &BindingLayout,
        entry_point: &str,
        tables: &DescriptorTables,
        limits: &vk::PhysicalDeviceLimits,
        device: Arc<ash::Device>,
    ) -> Result<Self> {
        let push_constant_size = binding_layout.push_constant_size();
        if push_constant_size > limits.max_push_constants_size {
            return Err(eyre!(
                "{} root parameters need {} bytes of push constants, the device allows {}",
                binding_layout.parameters.len(),
                push_constant_size,
                limits.max_push_constants_size,
            ));
        }

        let layout = {
            let set_layouts = [tables.resource_layout, tables.sampler_layout];
            let push_constant_ranges = [vk::PushConstantRange::default()
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .offset(0)
                .size(push_constant_size)];
            let ranges: &[vk::PushConstantRange] = if push_constant_size == 0 {
                &[]
            } else {
                &push_constant_ranges
            };
            let info = vk::PipelineLayoutCreateInfo::default()
                .set_layouts(&set_layouts)
                .push_constant_ranges(ranges);
            unsafe { device.create_pipeline_layout(&info, None)? }
        };

        let pipeline = match Self::create_pipeline(kernel, entry_point, layout, &device) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(err);
            }
        };

        log::debug!(
            "Created compute pipeline \"{}\" ({} words, {} push constant bytes)",
            entry_point,
            kernel.len(),
            push_constant_size,
        );

        Ok(Self {
            pipeline,
            layout,
            push_constant_size,
            device,
        })
    }

    fn create_pipeline(
        kernel: &[u32],
        entry_point: &str,
        layout: vk::PipelineLayout,
        device: &ash::Device,
    ) -> Result<vk::Pipeline> {
        let entry_point = CString::new(entry_point)?;
        let module = unsafe {
            device.create_shader_module(&vk::ShaderModuleCreateInfo::default().code(kernel), None)?
        };

        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(&entry_point);
        let info = [vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(layout)];
        let pipelines = unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), &info, None)
        };
        unsafe { device.destroy_shader_module(module, None) };

        pipelines
            .map_err(|(_, err)| eyre!("Failed to create compute pipeline: {}", err))?
            .into_iter()
            .next()
            .ok_or_else(|| eyre!("No compute pipeline was created"))
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}
