use ash::vk;
use crate::replayer::contexts::resource_ctx::resource::ResidencyState;
use crate::replayer::device::Transition;
use crate::replayer::vk::buffer::AllocatedBuffer;
use crate::replayer::vk::GpuResource;

/// Synchronization scope of a residency state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct StateScope {
    pub layout: vk::ImageLayout,
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
}

pub fn scope(state: ResidencyState) -> StateScope {
    let (layout, stage, access) = match state {
        ResidencyState::Undefined => (
            vk::ImageLayout::UNDEFINED,
            vk::PipelineStageFlags2::NONE,
            vk::AccessFlags2::NONE,
        ),
        ResidencyState::Common => (
            vk::ImageLayout::GENERAL,
            vk::PipelineStageFlags2::ALL_COMMANDS,
            vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE,
        ),
        ResidencyState::CopyDest => (
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::PipelineStageFlags2::ALL_TRANSFER,
            vk::AccessFlags2::TRANSFER_WRITE,
        ),
        ResidencyState::CopySource => (
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::PipelineStageFlags2::ALL_TRANSFER,
            vk::AccessFlags2::TRANSFER_READ,
        ),
        ResidencyState::ShaderRead => (
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::UNIFORM_READ,
        ),
        ResidencyState::UnorderedAccess => (
            vk::ImageLayout::GENERAL,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::SHADER_WRITE,
        ),
    };
    StateScope { layout, stage, access }
}

fn buffer_barrier(buffer: vk::Buffer, before: StateScope, after: StateScope) -> vk::BufferMemoryBarrier2<'static> {
    vk::BufferMemoryBarrier2::default()
        .src_stage_mask(before.stage)
        .src_access_mask(before.access)
        .dst_stage_mask(after.stage)
        .dst_access_mask(after.access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer)
        .offset(0)
        .size(vk::WHOLE_SIZE)
}

/// Records one dependency covering every transition in the batch.
pub fn record_transitions(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    transitions: &[Transition<'_, GpuResource>],
) {
    let mut buffer_barriers = Vec::new();
    let mut image_barriers = Vec::new();

    for transition in transitions {
        let before = scope(transition.before);
        let after = scope(transition.after);
        match transition.target {
            GpuResource::Buffer(buffer) => {
                buffer_barriers.push(buffer_barrier(buffer.buffer, before, after));
            }
            GpuResource::Image(image) => {
                image_barriers.push(
                    vk::ImageMemoryBarrier2::default()
                        .src_stage_mask(before.stage)
                        .src_access_mask(before.access)
                        .dst_stage_mask(after.stage)
                        .dst_access_mask(after.access)
                        .old_layout(before.layout)
                        .new_layout(after.layout)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .image(image.image)
                        .subresource_range(image.full_range()),
                );
            }
        }
    }

    let dep_info = vk::DependencyInfo::default()
        .buffer_memory_barriers(&buffer_barriers)
        .image_memory_barriers(&image_barriers);
    unsafe {
        device.cmd_pipeline_barrier2(cmd, &dep_info);
    }
}

pub fn record_buffer_transitions(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    transitions: &[Transition<'_, AllocatedBuffer>],
) {
    let buffer_barriers = transitions
        .iter()
        .map(|t| buffer_barrier(t.target.buffer, scope(t.before), scope(t.after)))
        .collect::<Vec<_>>();

    let dep_info = vk::DependencyInfo::default().buffer_memory_barriers(&buffer_barriers);
    unsafe {
        device.cmd_pipeline_barrier2(cmd, &dep_info);
    }
}

/// Every prior write is made visible to every later access.
pub fn record_global_barrier(device: &ash::Device, cmd: vk::CommandBuffer) {
    let memory_barrier = [vk::MemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .dst_access_mask(vk::AccessFlags2::MEMORY_READ | vk::AccessFlags2::MEMORY_WRITE)];
    let dep_info = vk::DependencyInfo::default().memory_barriers(&memory_barrier);
    unsafe {
        device.cmd_pipeline_barrier2(cmd, &dep_info);
    }
}

pub fn transition_image_layout(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    if old_layout == new_layout {
        return;
    }

    let image_barrier = [vk::ImageMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
        .dst_access_mask(vk::AccessFlags2::MEMORY_WRITE | vk::AccessFlags2::MEMORY_READ)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })];

    let dep_info = vk::DependencyInfo::default().image_memory_barriers(&image_barrier);
    unsafe {
        device.cmd_pipeline_barrier2(cmd, &dep_info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unordered_access_and_common_share_the_general_layout() {
        assert_eq!(scope(ResidencyState::UnorderedAccess).layout, vk::ImageLayout::GENERAL);
        assert_eq!(scope(ResidencyState::Common).layout, vk::ImageLayout::GENERAL);
    }

    #[test]
    fn copy_states_use_transfer_layouts() {
        let dest = scope(ResidencyState::CopyDest);
        assert_eq!(dest.layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert!(dest.access.contains(vk::AccessFlags2::TRANSFER_WRITE));

        let source = scope(ResidencyState::CopySource);
        assert_eq!(source.layout, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert!(source.access.contains(vk::AccessFlags2::TRANSFER_READ));
    }

    #[test]
    fn undefined_waits_on_nothing() {
        let undefined = scope(ResidencyState::Undefined);
        assert_eq!(undefined.stage, vk::PipelineStageFlags2::NONE);
        assert_eq!(undefined.access, vk::AccessFlags2::NONE);
    }
}
