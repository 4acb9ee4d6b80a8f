use color_eyre::Result;
use crate::replayer::contexts::frame_ctx::frame::FrameContext;
use crate::replayer::contexts::resource_ctx::resource::ResidencyState;
use crate::replayer::contexts::resource_ctx::ResourceRegistry;
use crate::replayer::device::{CopyMode, ReplayDevice, Transition};
use crate::replayer::error::ReplayError;

/// Copies every pending host shadow into its device-local mirror. The shadow moves into
/// the frame, which keeps it alive until the submission has retired.
pub fn stage_host_data<D: ReplayDevice>(
    device: &D,
    frame: &mut FrameContext<D>,
    registry: &mut ResourceRegistry<D>,
) -> Result<()> {
    let pending = (0..registry.len())
        .filter(|&i| registry.get(i).dirty_gpu_staging)
        .collect::<Vec<_>>();
    if pending.is_empty() {
        return Ok(());
    }

    {
        let to_copy_dest = pending
            .iter()
            .map(|&i| registry.get(i))
            .filter(|r| r.mirror_state != ResidencyState::CopyDest)
            .map(|r| Transition {
                target: &r.mirror,
                before: r.mirror_state,
                after: ResidencyState::CopyDest,
            })
            .collect::<Vec<_>>();
        if !to_copy_dest.is_empty() {
            device.transition_buffers(&mut frame.commands, &to_copy_dest);
        }

        for &i in &pending {
            let resource = registry.get(i);
            let shadow = resource.shadow.as_ref().ok_or_else(|| {
                ReplayError::execution("staging upload", format!("\"{}\" has no staging buffer", resource.name))
            })?;
            device.copy_host_to_buffer(&mut frame.commands, shadow, &resource.mirror, resource.staging.size);
        }

        let to_copy_source = pending
            .iter()
            .map(|&i| registry.get(i))
            .map(|r| Transition {
                target: &r.mirror,
                before: ResidencyState::CopyDest,
                after: ResidencyState::CopySource,
            })
            .collect::<Vec<_>>();
        device.transition_buffers(&mut frame.commands, &to_copy_source);
    }

    for &i in &pending {
        let resource = registry.get_mut(i);
        resource.mirror_state = ResidencyState::CopySource;
        resource.dirty_gpu_staging = false;
        if let Some(shadow) = resource.shadow.take() {
            frame.consume_shadow(shadow);
        }
    }

    log::debug!("Frame {}: staged {} host buffers", frame.slot, pending.len());
    Ok(())
}

/// Restores every dirty allocation from its mirror and leaves it in its execution state.
pub fn upload_dirty<D: ReplayDevice>(
    device: &D,
    cmd: &mut D::CommandList,
    registry: &mut ResourceRegistry<D>,
) {
    let dirty = (0..registry.len())
        .filter(|&i| registry.get(i).dirty)
        .collect::<Vec<_>>();
    if dirty.is_empty() {
        return;
    }

    {
        let to_copy_dest = dirty
            .iter()
            .map(|&i| registry.get(i))
            .filter(|r| r.current_state != ResidencyState::CopyDest)
            .map(|r| Transition {
                target: &r.allocation,
                before: r.current_state,
                after: ResidencyState::CopyDest,
            })
            .collect::<Vec<_>>();
        if !to_copy_dest.is_empty() {
            device.transition(cmd, &to_copy_dest);
        }

        for &i in &dirty {
            let resource = registry.get(i);
            let mode = if resource.needs_per_subresource_copy() {
                CopyMode::PerSubresource
            } else {
                CopyMode::Full
            };
            device.copy_buffer_to_allocation(cmd, &resource.mirror, &resource.allocation, &resource.staging.footprints, mode);
        }

        let to_target = dirty
            .iter()
            .map(|&i| registry.get(i))
            .filter(|r| r.target_state() != ResidencyState::CopyDest)
            .map(|r| Transition {
                target: &r.allocation,
                before: ResidencyState::CopyDest,
                after: r.target_state(),
            })
            .collect::<Vec<_>>();
        if !to_target.is_empty() {
            device.transition(cmd, &to_target);
        }
    }

    for &i in &dirty {
        let resource = registry.get_mut(i);
        resource.current_state = resource.target_state();
        resource.dirty = false;
    }

    log::trace!("Restored {} dirty resources", dirty.len());
}
