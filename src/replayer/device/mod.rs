//! The seam between the residency tracker and the GPU. `VulkanDevice` is the real
//! backend; tests drive the tracker through the recording mock.

#[cfg(test)]
pub mod mock;

use color_eyre::Result;
use crate::replayer::contexts::descriptor_ctx::views::ViewInstall;
use crate::replayer::contexts::resource_ctx::resource::{AllocationDesc, ResidencyState};
use crate::replayer::contexts::resource_ctx::upload::SubresourceFootprint;
use crate::replayer::workload::layout::{BindingLayout, RootViewKind, TableKind};

/// Host-visible memory, persistently mapped.
pub trait HostBuffer {
    fn size(&self) -> u64;

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()>;

    fn read(&self, offset: u64, out: &mut [u8]) -> Result<()>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HostBufferUsage {
    /// Source of host-to-device copies.
    Upload,
    /// Destination of device-to-host copies.
    Readback,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CopyMode {
    /// One copy covering the whole resource.
    Full,
    /// One copy per subresource, reinterpreting the staging format.
    PerSubresource,
}

/// Slot counts of the two descriptor tables.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TableSizes {
    pub resources: u32,
    pub samplers: u32,
}

pub struct Transition<'a, T> {
    pub target: &'a T,
    pub before: ResidencyState,
    pub after: ResidencyState,
}

pub trait ReplayDevice {
    /// GPU-resident buffer or texture.
    type Allocation;
    /// Device-local buffer.
    type Buffer;
    type HostBuffer: HostBuffer;
    type Pipeline;
    type Tables;
    type CommandList;
    type QueryPool;

    // Creation

    fn create_allocation(&self, name: &str, desc: &AllocationDesc) -> Result<Self::Allocation>;

    fn create_buffer(&self, name: &str, size: u64) -> Result<Self::Buffer>;

    fn create_host_buffer(&self, name: &str, size: u64, usage: HostBufferUsage) -> Result<Self::HostBuffer>;

    fn create_tables(&self, sizes: TableSizes) -> Result<Self::Tables>;

    /// The pipeline layout is derived from `layout` and from the table layouts of `tables`.
    fn create_pipeline(
        &self,
        kernel: &[u32],
        layout: &BindingLayout,
        entry_point: &str,
        tables: &Self::Tables,
    ) -> Result<Self::Pipeline>;

    fn install_view(
        &self,
        tables: &mut Self::Tables,
        slot: u32,
        view: ViewInstall<'_, Self::Allocation>,
    ) -> Result<()>;

    fn create_command_list(&self, slot: usize) -> Result<Self::CommandList>;

    fn create_query_pool(&self, count: u32) -> Result<Self::QueryPool>;

    fn resource_address(&self, allocation: &Self::Allocation) -> Result<u64>;

    /// Timestamp ticks per second.
    fn timestamp_frequency(&self) -> f64;

    fn has_surface(&self) -> bool;

    // Recording

    fn begin(&self, cmd: &mut Self::CommandList) -> Result<()>;

    fn transition(&self, cmd: &mut Self::CommandList, transitions: &[Transition<'_, Self::Allocation>]);

    fn transition_buffers(&self, cmd: &mut Self::CommandList, transitions: &[Transition<'_, Self::Buffer>]);

    fn copy_host_to_buffer(
        &self,
        cmd: &mut Self::CommandList,
        src: &Self::HostBuffer,
        dst: &Self::Buffer,
        size: u64,
    );

    fn copy_buffer_to_allocation(
        &self,
        cmd: &mut Self::CommandList,
        src: &Self::Buffer,
        dst: &Self::Allocation,
        footprints: &[SubresourceFootprint],
        mode: CopyMode,
    );

    fn bind_pipeline(&self, cmd: &mut Self::CommandList, pipeline: &Self::Pipeline);

    fn bind_tables(&self, cmd: &mut Self::CommandList, pipeline: &Self::Pipeline, tables: &Self::Tables) -> Result<()>;

    fn set_table(
        &self,
        cmd: &mut Self::CommandList,
        pipeline: &Self::Pipeline,
        index: u32,
        table: TableKind,
        offset: u32,
    ) -> Result<()>;

    fn set_root_address(
        &self,
        cmd: &mut Self::CommandList,
        pipeline: &Self::Pipeline,
        index: u32,
        kind: RootViewKind,
        address: u64,
    ) -> Result<()>;

    fn reset_queries(&self, cmd: &mut Self::CommandList, pool: &Self::QueryPool, count: u32);

    fn write_timestamp(&self, cmd: &mut Self::CommandList, pool: &Self::QueryPool, query: u32);

    fn dispatch(&self, cmd: &mut Self::CommandList, groups: [u32; 3]);

    /// Makes every prior write visible to every later access.
    fn global_barrier(&self, cmd: &mut Self::CommandList);

    fn resolve_timestamps(
        &self,
        cmd: &mut Self::CommandList,
        pool: &Self::QueryPool,
        count: u32,
        readback: &Self::HostBuffer,
    );

    /// Acquires the slot's presentable image and records a clear of it.
    fn clear_presentable(&mut self, cmd: &mut Self::CommandList, slot: usize) -> Result<()>;

    // Queue

    /// Closes the list and submits it, signaling `signal_value` on completion.
    fn submit(&self, cmd: &mut Self::CommandList, slot: usize, signal_value: u64) -> Result<()>;

    fn present(&mut self, slot: usize) -> Result<()>;

    /// Blocks until the device has reached `value`.
    fn wait(&self, value: u64) -> Result<()>;
}
