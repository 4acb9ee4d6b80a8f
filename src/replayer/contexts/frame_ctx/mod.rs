pub mod frame;
pub mod sync;

use color_eyre::Result;
use crate::replayer::contexts::descriptor_ctx::DescriptorBinder;
use crate::replayer::contexts::frame_ctx::frame::{FrameContext, FrameState};
use crate::replayer::contexts::pipeline_ctx::{DispatchPlan, PipelineState};
use crate::replayer::contexts::resource_ctx::ResourceRegistry;
use crate::replayer::device::ReplayDevice;
use crate::replayer::error::ReplayError;
use crate::replayer::profiler::Profiler;

pub const FRAME_COUNT: usize = 2;

/// Borrowed view of everything an iteration records against.
pub struct IterationInputs<'a, D: ReplayDevice> {
    pub registry: &'a mut ResourceRegistry<D>,
    pub binder: &'a DescriptorBinder<D>,
    pub pipeline: &'a PipelineState<D>,
    pub plan: &'a DispatchPlan,
    pub profiler: &'a mut Profiler,
}

/// Double-buffered submission: iteration `n` records into slot `n % 2` while the other
/// slot may still be executing.
pub struct FramePipeline<D: ReplayDevice> {
    frames: [FrameContext<D>; FRAME_COUNT],
    iteration: u64,
    latest_fence_value: u64,
}

impl<D: ReplayDevice> FramePipeline<D> {
    pub fn new(device: &D) -> Result<Self> {
        Ok(Self {
            frames: [FrameContext::new(device, 0)?, FrameContext::new(device, 1)?],
            iteration: 0,
            latest_fence_value: 0,
        })
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn frame_index(&self) -> usize {
        (self.iteration % FRAME_COUNT as u64) as usize
    }

    pub fn frame(&self, slot: usize) -> &FrameContext<D> {
        &self.frames[slot]
    }

    pub fn latest_fence_value(&self) -> u64 {
        self.latest_fence_value
    }

    /// Records and submits one iteration of `dispatches` dispatches.
    pub fn execute(&mut self, device: &mut D, inputs: IterationInputs<'_, D>, dispatches: u32) -> Result<()> {
        let IterationInputs { registry, binder, pipeline, plan, profiler } = inputs;
        let slot = self.frame_index();
        let frame = &mut self.frames[slot];

        frame.retire(device, profiler)?;
        frame.ensure_capacity(device, dispatches.max(1))?;
        frame.begin(device)?;

        let queries = frame
            .queries
            .take()
            .ok_or_else(|| ReplayError::execution("record", "no timestamp queries"))?;
        let recorded = Self::record(device, frame, &queries, registry, binder, pipeline, plan, dispatches);
        frame.queries = Some(queries);
        recorded?;

        if device.has_surface() {
            device
                .clear_presentable(&mut frame.commands, slot)
                .map_err(|e| ReplayError::execution("acquire presentable", e))?;
        }

        self.latest_fence_value += 1;
        device
            .submit(&mut frame.commands, slot, self.latest_fence_value)
            .map_err(|e| ReplayError::execution("submit", e))?;
        if device.has_surface() {
            device
                .present(slot)
                .map_err(|e| ReplayError::execution("present", e))?;
        }
        frame.mark_submitted(self.latest_fence_value, dispatches);

        self.iteration += 1;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        device: &D,
        frame: &mut FrameContext<D>,
        queries: &D::QueryPool,
        registry: &mut ResourceRegistry<D>,
        binder: &DescriptorBinder<D>,
        pipeline: &PipelineState<D>,
        plan: &DispatchPlan,
        dispatches: u32,
    ) -> Result<()> {
        device.reset_queries(&mut frame.commands, queries, dispatches * 2);

        for i in 0..dispatches {
            sync::stage_host_data(device, frame, registry)?;
            sync::upload_dirty(device, &mut frame.commands, registry);

            plan.record(device, &mut frame.commands, pipeline, &binder.tables)?;
            device.write_timestamp(&mut frame.commands, queries, i * 2);
            device.dispatch(&mut frame.commands, plan.groups);
            device.write_timestamp(&mut frame.commands, queries, i * 2 + 1);
            device.global_barrier(&mut frame.commands);

            registry.mark_unordered_dirty();
        }

        if dispatches > 0 {
            let readback = frame
                .readback
                .as_ref()
                .ok_or_else(|| ReplayError::execution("record", "no timestamp readback buffer"))?;
            device.resolve_timestamps(&mut frame.commands, queries, dispatches * 2, readback);
        }
        Ok(())
    }

    /// Waits for the most recent submission. Timestamps still pending in either slot are
    /// not drained.
    pub fn finish(&mut self, device: &D) -> Result<()> {
        if self.latest_fence_value == 0 {
            return Ok(());
        }
        device
            .wait(self.latest_fence_value)
            .map_err(|e| ReplayError::execution("final fence wait", e))?;
        for frame in &self.frames {
            if frame.state() == FrameState::Submitted && frame.pending_timestamps() > 0 {
                log::debug!(
                    "Frame {}: {} dispatches left undrained",
                    frame.slot,
                    frame.pending_timestamps(),
                );
            }
        }
        Ok(())
    }
}
