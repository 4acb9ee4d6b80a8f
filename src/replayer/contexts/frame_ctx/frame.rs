use color_eyre::Result;
use crate::replayer::device::{HostBuffer, HostBufferUsage, ReplayDevice};
use crate::replayer::error::ReplayError;
use crate::replayer::profiler::Profiler;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Recording,
    Submitted,
    Retiring,
}

/// One of the two submission slots.
pub struct FrameContext<D: ReplayDevice> {
    pub slot: usize,
    pub commands: D::CommandList,
    pub queries: Option<D::QueryPool>,
    pub readback: Option<D::HostBuffer>,
    /// Dispatches the query pool and readback buffer can hold.
    query_capacity: u32,

    /// Value signaled by this slot's last submission, 0 before the first one.
    fence_value: u64,
    /// Timestamp pairs written by the last submission and not yet drained.
    pending_timestamps: u32,
    /// Staging shadows read by the last submission.
    consumed_shadows: Vec<D::HostBuffer>,

    state: FrameState,
}

impl<D: ReplayDevice> FrameContext<D> {
    pub fn new(device: &D, slot: usize) -> Result<Self> {
        Ok(Self {
            slot,
            commands: device.create_command_list(slot)?,
            queries: None,
            readback: None,
            query_capacity: 0,
            fence_value: 0,
            pending_timestamps: 0,
            consumed_shadows: Vec::new(),
            state: FrameState::Idle,
        })
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn fence_value(&self) -> u64 {
        self.fence_value
    }

    pub fn pending_timestamps(&self) -> u32 {
        self.pending_timestamps
    }

    pub fn consumed_shadow_count(&self) -> usize {
        self.consumed_shadows.len()
    }

    fn set_state(&mut self, state: FrameState) {
        log::trace!("Frame {}: {:?} -> {:?}", self.slot, self.state, state);
        self.state = state;
    }

    /// Waits for this slot's previous submission, then releases what it consumed and drains
    /// its timestamps. Nothing the slot owns is touched before the wait returns.
    pub fn retire(&mut self, device: &D, profiler: &mut Profiler) -> Result<()> {
        if self.fence_value != 0 {
            self.set_state(FrameState::Retiring);
            device
                .wait(self.fence_value)
                .map_err(|e| ReplayError::execution("fence wait", e))?;

            if !self.consumed_shadows.is_empty() {
                log::debug!("Frame {}: releasing {} staging buffers", self.slot, self.consumed_shadows.len());
                self.consumed_shadows.clear();
            }

            if self.pending_timestamps > 0 {
                let readback = self
                    .readback
                    .as_ref()
                    .ok_or_else(|| ReplayError::execution("timestamp readback", "no readback buffer"))?;
                let mut timestamps = vec![0u64; self.pending_timestamps as usize * 2];
                readback
                    .read(0, bytemuck::cast_slice_mut(&mut timestamps))
                    .map_err(|e| ReplayError::execution("timestamp readback", e))?;
                profiler.drain(&timestamps);
                self.pending_timestamps = 0;
            }
        }

        self.set_state(FrameState::Idle);
        Ok(())
    }

    /// Grows the query pool and readback buffer to hold `dispatches` timestamp pairs.
    pub fn ensure_capacity(&mut self, device: &D, dispatches: u32) -> Result<()> {
        if dispatches <= self.query_capacity && self.queries.is_some() {
            return Ok(());
        }

        log::debug!("Frame {}: sizing timestamp queries for {} dispatches", self.slot, dispatches);
        self.queries = Some(device.create_query_pool(dispatches * 2)?);
        self.readback = Some(device.create_host_buffer(
            &format!("frame {} timestamps", self.slot),
            dispatches as u64 * 2 * size_of::<u64>() as u64,
            HostBufferUsage::Readback,
        )?);
        self.query_capacity = dispatches;
        Ok(())
    }

    pub fn begin(&mut self, device: &D) -> Result<()> {
        self.set_state(FrameState::Recording);
        device.begin(&mut self.commands)
    }

    pub fn consume_shadow(&mut self, shadow: D::HostBuffer) {
        self.consumed_shadows.push(shadow);
    }

    pub fn mark_submitted(&mut self, fence_value: u64, dispatches: u32) {
        self.fence_value = fence_value;
        self.pending_timestamps = dispatches;
        self.set_state(FrameState::Submitted);
    }
}
