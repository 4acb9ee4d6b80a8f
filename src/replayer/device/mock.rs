//! Recording device for tests. Every command is appended to a shared event log, copies
//! move real bytes, and submissions complete immediately.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use color_eyre::eyre::eyre;
use color_eyre::Result;
use crate::replayer::contexts::descriptor_ctx::views::{ViewInstall, ViewKind};
use crate::replayer::contexts::resource_ctx::resource::{AllocationDesc, ResidencyState};
use crate::replayer::contexts::resource_ctx::upload::SubresourceFootprint;
use crate::replayer::device::{CopyMode, HostBuffer, HostBufferUsage, ReplayDevice, TableSizes, Transition};
use crate::replayer::error::ReplayError;
use crate::replayer::workload::layout::{BindingLayout, RootViewKind, TableKind, ROOT_PARAMETER_SIZE};

pub const TICK_DELTA: u64 = 10;
pub const FREQUENCY: f64 = 1_000_000.0;

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    CreateAllocation(String),
    CreateTables(TableSizes),
    InstallView { slot: u32, kind: ViewKind },
    Begin { slot: usize },
    Transition { name: String, before: ResidencyState, after: ResidencyState },
    BufferTransition { name: String, before: ResidencyState, after: ResidencyState },
    CopyHostToBuffer { name: String },
    CopyBufferToAllocation { name: String, mode: CopyMode },
    BindPipeline,
    BindTables,
    SetTable { index: u32, table: TableKind, offset: u32 },
    SetRootAddress { index: u32, kind: RootViewKind, address: u64 },
    ResetQueries { count: u32 },
    Timestamp { query: u32 },
    Dispatch([u32; 3]),
    GlobalBarrier,
    ResolveTimestamps { count: u32 },
    ClearPresentable { slot: usize },
    Submit { slot: usize, signal_value: u64 },
    Present { slot: usize },
    Wait { value: u64 },
    ReleaseHostBuffer { name: String },
}

#[derive(Default)]
struct MockState {
    events: Vec<Event>,
    completed: u64,
    next_tick: u64,
    next_address: u64,
}

type Shared = Rc<RefCell<MockState>>;

pub struct MockDevice {
    state: Shared,
    surface: bool,
}

pub struct MockAllocation {
    pub name: String,
    /// Buffer contents. Textures land in `subresources` instead.
    pub bytes: RefCell<Vec<u8>>,
    /// Texture contents keyed by `(mip_level, array_layer)`.
    pub subresources: RefCell<HashMap<(u32, u32), Vec<u8>>>,
    address: u64,
}

impl MockAllocation {
    pub fn subresource(&self, mip_level: u32, array_layer: u32) -> Option<Vec<u8>> {
        self.subresources.borrow().get(&(mip_level, array_layer)).cloned()
    }
}

pub struct MockPipeline {
    pub push_constant_size: u32,
}

pub struct MockBuffer {
    pub name: String,
    pub bytes: RefCell<Vec<u8>>,
}

pub struct MockHostBuffer {
    pub name: String,
    bytes: RefCell<Vec<u8>>,
    state: Shared,
}

pub struct MockCommandList {
    slot: usize,
    recording: bool,
}

pub struct MockQueryPool {
    pub count: u32,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(MockState {
                next_address: 0x1000_0000,
                ..Default::default()
            })),
            surface: false,
        }
    }

    pub fn with_surface() -> Self {
        Self {
            surface: true,
            ..Self::new()
        }
    }

    /// A second handle onto the same event log, for inspection after the device moved.
    pub fn log(&self) -> MockLog {
        MockLog(self.state.clone())
    }

    fn record(&self, event: Event) {
        self.state.borrow_mut().events.push(event);
    }
}

pub struct MockLog(Shared);

impl MockLog {
    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().events.clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().events.clear();
    }
}

impl HostBuffer for MockHostBuffer {
    fn size(&self) -> u64 {
        self.bytes.borrow().len() as u64
    }

    fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let bytes = self.bytes.get_mut();
        let range = offset as usize..offset as usize + data.len();
        bytes
            .get_mut(range)
            .ok_or_else(|| eyre!("write out of bounds of \"{}\"", self.name))?
            .copy_from_slice(data);
        Ok(())
    }

    fn read(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        let bytes = self.bytes.borrow();
        let range = offset as usize..offset as usize + out.len();
        out.copy_from_slice(
            bytes
                .get(range)
                .ok_or_else(|| eyre!("read out of bounds of \"{}\"", self.name))?,
        );
        Ok(())
    }
}

impl Drop for MockHostBuffer {
    fn drop(&mut self) {
        self.state.borrow_mut().events.push(Event::ReleaseHostBuffer {
            name: self.name.clone(),
        });
    }
}

impl ReplayDevice for MockDevice {
    type Allocation = MockAllocation;
    type Buffer = MockBuffer;
    type HostBuffer = MockHostBuffer;
    type Pipeline = MockPipeline;
    type Tables = TableSizes;
    type CommandList = MockCommandList;
    type QueryPool = MockQueryPool;

    fn create_allocation(&self, name: &str, _desc: &AllocationDesc) -> Result<MockAllocation> {
        self.record(Event::CreateAllocation(name.to_string()));
        let address = {
            let mut state = self.state.borrow_mut();
            state.next_address += 0x1_0000;
            state.next_address
        };
        Ok(MockAllocation {
            name: name.to_string(),
            bytes: RefCell::new(Vec::new()),
            subresources: RefCell::new(HashMap::new()),
            address,
        })
    }

    fn create_buffer(&self, name: &str, size: u64) -> Result<MockBuffer> {
        Ok(MockBuffer {
            name: name.to_string(),
            bytes: RefCell::new(vec![0; size as usize]),
        })
    }

    fn create_host_buffer(&self, name: &str, size: u64, _usage: HostBufferUsage) -> Result<MockHostBuffer> {
        // Poison fresh memory so that missing zero-fills show up.
        Ok(MockHostBuffer {
            name: name.to_string(),
            bytes: RefCell::new(vec![0xCD; size as usize]),
            state: self.state.clone(),
        })
    }

    fn create_pipeline(&self, _kernel: &[u32], layout: &BindingLayout, _entry_point: &str, _tables: &TableSizes) -> Result<MockPipeline> {
        Ok(MockPipeline {
            push_constant_size: layout.push_constant_size(),
        })
    }

    fn create_tables(&self, sizes: TableSizes) -> Result<TableSizes> {
        self.record(Event::CreateTables(sizes));
        Ok(sizes)
    }

    fn install_view(&self, tables: &mut TableSizes, slot: u32, view: ViewInstall<'_, MockAllocation>) -> Result<()> {
        let capacity = match view {
            ViewInstall::Sampler(_) => tables.samplers,
            _ => tables.resources,
        };
        if slot >= capacity {
            return Err(eyre!("slot {} outside table of {}", slot, capacity));
        }
        self.record(Event::InstallView { slot, kind: view.kind() });
        Ok(())
    }

    fn create_command_list(&self, slot: usize) -> Result<MockCommandList> {
        Ok(MockCommandList { slot, recording: false })
    }

    fn create_query_pool(&self, count: u32) -> Result<MockQueryPool> {
        Ok(MockQueryPool { count })
    }

    fn resource_address(&self, allocation: &MockAllocation) -> Result<u64> {
        Ok(allocation.address)
    }

    fn timestamp_frequency(&self) -> f64 {
        FREQUENCY
    }

    fn has_surface(&self) -> bool {
        self.surface
    }

    fn begin(&self, cmd: &mut MockCommandList) -> Result<()> {
        cmd.recording = true;
        self.record(Event::Begin { slot: cmd.slot });
        Ok(())
    }

    fn transition(&self, _cmd: &mut MockCommandList, transitions: &[Transition<'_, MockAllocation>]) {
        for t in transitions {
            self.record(Event::Transition {
                name: t.target.name.clone(),
                before: t.before,
                after: t.after,
            });
        }
    }

    fn transition_buffers(&self, _cmd: &mut MockCommandList, transitions: &[Transition<'_, MockBuffer>]) {
        for t in transitions {
            self.record(Event::BufferTransition {
                name: t.target.name.clone(),
                before: t.before,
                after: t.after,
            });
        }
    }

    fn copy_host_to_buffer(&self, _cmd: &mut MockCommandList, src: &MockHostBuffer, dst: &MockBuffer, size: u64) {
        let src = src.bytes.borrow();
        dst.bytes.borrow_mut()[..size as usize].copy_from_slice(&src[..size as usize]);
        self.record(Event::CopyHostToBuffer { name: dst.name.clone() });
    }

    fn copy_buffer_to_allocation(
        &self,
        _cmd: &mut MockCommandList,
        src: &MockBuffer,
        dst: &MockAllocation,
        footprints: &[SubresourceFootprint],
        mode: CopyMode,
    ) {
        let src = src.bytes.borrow();
        if footprints.is_empty() {
            *dst.bytes.borrow_mut() = src.clone();
        } else {
            let mut subresources = dst.subresources.borrow_mut();
            for fp in footprints {
                let range = fp.offset as usize..(fp.offset + fp.size()) as usize;
                subresources.insert((fp.mip_level, fp.array_layer), src[range].to_vec());
            }
        }
        self.record(Event::CopyBufferToAllocation { name: dst.name.clone(), mode });
    }

    fn bind_pipeline(&self, _cmd: &mut MockCommandList, _pipeline: &MockPipeline) {
        self.record(Event::BindPipeline);
    }

    fn bind_tables(&self, _cmd: &mut MockCommandList, _pipeline: &MockPipeline, _tables: &TableSizes) -> Result<()> {
        self.record(Event::BindTables);
        Ok(())
    }

    fn set_table(&self, _cmd: &mut MockCommandList, pipeline: &MockPipeline, index: u32, table: TableKind, offset: u32) -> Result<()> {
        check_root_parameter(pipeline, index)?;
        self.record(Event::SetTable { index, table, offset });
        Ok(())
    }

    fn set_root_address(&self, _cmd: &mut MockCommandList, pipeline: &MockPipeline, index: u32, kind: RootViewKind, address: u64) -> Result<()> {
        check_root_parameter(pipeline, index)?;
        self.record(Event::SetRootAddress { index, kind, address });
        Ok(())
    }

    fn reset_queries(&self, _cmd: &mut MockCommandList, pool: &MockQueryPool, count: u32) {
        assert!(count <= pool.count);
        self.record(Event::ResetQueries { count });
    }

    fn write_timestamp(&self, _cmd: &mut MockCommandList, pool: &MockQueryPool, query: u32) {
        assert!(query < pool.count);
        self.record(Event::Timestamp { query });
    }

    fn dispatch(&self, _cmd: &mut MockCommandList, groups: [u32; 3]) {
        self.record(Event::Dispatch(groups));
    }

    fn global_barrier(&self, _cmd: &mut MockCommandList) {
        self.record(Event::GlobalBarrier);
    }

    fn resolve_timestamps(&self, _cmd: &mut MockCommandList, _pool: &MockQueryPool, count: u32, readback: &MockHostBuffer) {
        let mut state = self.state.borrow_mut();
        let mut bytes = readback.bytes.borrow_mut();
        for pair in 0..(count / 2) as usize {
            let begin = state.next_tick;
            let end = begin + TICK_DELTA;
            state.next_tick = end + 1;
            bytes[pair * 16..pair * 16 + 8].copy_from_slice(&begin.to_le_bytes());
            bytes[pair * 16 + 8..pair * 16 + 16].copy_from_slice(&end.to_le_bytes());
        }
        state.events.push(Event::ResolveTimestamps { count });
    }

    fn clear_presentable(&mut self, _cmd: &mut MockCommandList, slot: usize) -> Result<()> {
        self.record(Event::ClearPresentable { slot });
        Ok(())
    }

    fn submit(&self, cmd: &mut MockCommandList, slot: usize, signal_value: u64) -> Result<()> {
        if !cmd.recording {
            return Err(eyre!("submitting a command list that was never begun"));
        }
        cmd.recording = false;
        let mut state = self.state.borrow_mut();
        if signal_value <= state.completed {
            return Err(eyre!("fence value {} is not increasing", signal_value));
        }
        state.completed = signal_value;
        state.events.push(Event::Submit { slot, signal_value });
        Ok(())
    }

    fn present(&mut self, slot: usize) -> Result<()> {
        self.record(Event::Present { slot });
        Ok(())
    }

    fn wait(&self, value: u64) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if value > state.completed {
            return Err(eyre!("waiting on fence value {} that was never signaled", value));
        }
        state.events.push(Event::Wait { value });
        Ok(())
    }
}

fn check_root_parameter(pipeline: &MockPipeline, index: u32) -> Result<()> {
    if (index + 1) * ROOT_PARAMETER_SIZE > pipeline.push_constant_size {
        return Err(ReplayError::execution(
            "root parameters",
            format!("parameter {} outside {} push constant bytes", index, pipeline.push_constant_size),
        ).into());
    }
    Ok(())
}
